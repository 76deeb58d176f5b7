// Copyright (c) 2025 sbksba
//
// This software is licensed under the terms of the MIT License.
// See the LICENSE file in the project root for the full license text.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::rotation::to_be_completed_by;
use crate::units::to_bucket;
use crate::Task;

/// Whether a reminder for `task` should go out at `now`.
///
/// Reminders start once the due bucket is reached and repeat at most once
/// per tolerance window. `ignore_last_notified` bypasses that
/// deduplication for manual triggers.
pub fn should_notify(task: &Task, now: DateTime<Utc>, ignore_last_notified: bool) -> bool {
    if task.is_archived() {
        return false;
    }
    let Some(due) = task.to_be_done_time else {
        return false;
    };

    let unit = task.tolerance_unit;
    let desired = to_bucket(due, unit);
    let now_bucket = to_bucket(now, unit);

    if now_bucket < desired {
        return false;
    }

    if !ignore_last_notified {
        if let Some(notified) = task.last_notified_at {
            if now_bucket - to_bucket(notified, unit) <= i64::from(task.tolerance) {
                return false;
            }
        }
    }

    true
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Due,
    Overdue,
}

impl NotificationKind {
    pub fn of(task: &Task, now: DateTime<Utc>) -> Self {
        if task.status(now).is_overdue() {
            NotificationKind::Overdue
        } else {
            NotificationKind::Due
        }
    }
}

/// Tasks a user should be reminded of, split by urgency.
#[derive(Debug, Clone, Default)]
pub struct Reminders {
    pub overdue: Vec<Task>,
    pub due: Vec<Task>,
}

impl Reminders {
    pub fn is_empty(&self) -> bool {
        self.overdue.is_empty() && self.due.is_empty()
    }

    pub fn task_ids(&self) -> Vec<i64> {
        self.overdue.iter().chain(&self.due).map(|t| t.id).collect()
    }
}

/// Picks the tasks `user` is next responsible for and should hear about.
///
/// Both lists are ordered latest due time first, so the most overdue
/// reminder is delivered last and ends up on top of the user's
/// notification stack. Within a list the finer late/very late split
/// plays no part, only the due time does.
pub fn select_for_user(
    tasks: &[Task],
    user: &str,
    now: DateTime<Utc>,
    ignore_last_notified: bool,
) -> Reminders {
    let mut selected: Vec<&Task> = tasks
        .iter()
        .filter(|task| task.is_visible_to(user))
        .filter(|task| to_be_completed_by(task).iter().any(|id| id == user))
        .filter(|task| should_notify(task, now, ignore_last_notified))
        .collect();
    selected.sort_by(|a, b| b.to_be_done_time.cmp(&a.to_be_done_time));

    let mut reminders = Reminders::default();
    for task in selected {
        match NotificationKind::of(task, now) {
            NotificationKind::Overdue => reminders.overdue.push(task.clone()),
            NotificationKind::Due => reminders.due.push(task.clone()),
        }
    }
    reminders
}
