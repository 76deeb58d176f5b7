// Copyright (c) 2025 sbksba
//
// This software is licensed under the terms of the MIT License.
// See the LICENSE file in the project root for the full license text.
use crate::{Accomplishment, Task, UserId};

/// Reorders `assignees` so that whoever completed the task least recently
/// comes first. `history` must be ordered newest first.
///
/// Completers are struck off a working copy of the list, newest first,
/// until a single candidate is left; that candidate moves to the front and
/// everyone else keeps their relative order. Joint tasks and lists of one
/// or fewer are returned as they are. The order is always recomputed from
/// history, so deleting an accomplishment corrects it on the next call.
pub fn rotate(assignees: &[UserId], is_joint: bool, history: &[Accomplishment]) -> Vec<UserId> {
    if is_joint || assignees.len() <= 1 {
        return assignees.to_vec();
    }

    let mut candidates: Vec<&UserId> = assignees.iter().collect();
    'scan: for accomplishment in history {
        for user in &accomplishment.completed_by {
            candidates.retain(|id| *id != user);
            if candidates.len() == 1 {
                break 'scan;
            }
        }
    }

    let Some(next) = candidates.first().map(|id| (*id).clone()) else {
        return assignees.to_vec();
    };

    let mut ordered = Vec::with_capacity(assignees.len());
    ordered.push(next.clone());
    ordered.extend(assignees.iter().filter(|id| **id != next).cloned());
    ordered
}

/// Who is expected to do the task next: everyone for a joint task,
/// otherwise the head of the rotation.
pub fn to_be_completed_by(task: &Task) -> Vec<UserId> {
    if task.is_joint {
        task.assignees.clone()
    } else {
        task.assignees.first().cloned().into_iter().collect()
    }
}

/// Completers recorded when the request does not name any.
pub fn default_completed_by(task: &Task, acting_user: &str) -> Vec<UserId> {
    if task.is_joint {
        task.assignees.clone()
    } else {
        vec![acting_user.to_string()]
    }
}
