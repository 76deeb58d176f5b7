// Copyright (c) 2025 sbksba
//
// This software is licensed under the terms of the MIT License.
// See the LICENSE file in the project root for the full license text.
use std::collections::HashSet;

use thiserror::Error;

use crate::TaskPayload;

/// Reasons a task payload is refused before it reaches the engine.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Task name cannot be empty.")]
    EmptyName,

    #[error("Assignee identifiers cannot be empty.")]
    EmptyAssignee,

    #[error("Assignee {0} is listed more than once.")]
    DuplicateAssignee(String),

    #[error("User {0} is listed more than once in visible_to.")]
    DuplicateViewer(String),
}

/// Checks the fields the engine relies on. Negative periods and tolerances
/// are already unrepresentable in the payload.
pub fn validate_task_payload(payload: &TaskPayload) -> Result<(), ValidationError> {
    if payload.name.trim().is_empty() {
        return Err(ValidationError::EmptyName);
    }

    let mut seen = HashSet::new();
    for assignee in &payload.assignees {
        if assignee.trim().is_empty() {
            return Err(ValidationError::EmptyAssignee);
        }
        if !seen.insert(assignee.as_str()) {
            return Err(ValidationError::DuplicateAssignee(assignee.clone()));
        }
    }

    let mut seen = HashSet::new();
    for viewer in &payload.visible_to {
        if !seen.insert(viewer.as_str()) {
            return Err(ValidationError::DuplicateViewer(viewer.clone()));
        }
    }

    Ok(())
}
