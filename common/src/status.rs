// Copyright (c) 2025 sbksba
//
// This software is licensed under the terms of the MIT License.
// See the LICENSE file in the project root for the full license text.
use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Task;
use crate::units::{TimeUnit, to_bucket};

/// How urgent a task is right now. Always derived, never stored.
///
/// Variants are declared from most to least urgent, so the derived `Ord`
/// is the order used to sort task lists.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    VeryLate,
    Late,
    DueNow,
    DueSoon,
    Waiting,
    Archived,
}

impl TaskStatus {
    pub fn is_overdue(self) -> bool {
        matches!(self, TaskStatus::VeryLate | TaskStatus::Late)
    }
}

/// Classifies a due time against `now`, in buckets of `tolerance_unit`.
///
/// Being one tolerance window past due makes a task late, two windows
/// make it very late.
pub fn classify(
    to_be_done_time: Option<DateTime<Utc>>,
    tolerance_unit: TimeUnit,
    tolerance: u32,
    now: DateTime<Utc>,
    archived: bool,
) -> TaskStatus {
    if archived {
        return TaskStatus::Archived;
    }
    let Some(due) = to_be_done_time else {
        return TaskStatus::Waiting;
    };

    let delta = to_bucket(due, tolerance_unit) - to_bucket(now, tolerance_unit);
    let window = i64::from(tolerance) + 1;

    if delta <= -window * 2 {
        TaskStatus::VeryLate
    } else if delta <= -window {
        TaskStatus::Late
    } else if delta <= 0 {
        TaskStatus::DueNow
    } else if delta <= i64::from(tolerance) {
        TaskStatus::DueSoon
    } else {
        TaskStatus::Waiting
    }
}

impl Task {
    pub fn status(&self, now: DateTime<Utc>) -> TaskStatus {
        classify(
            self.to_be_done_time,
            self.tolerance_unit,
            self.tolerance,
            now,
            self.is_archived(),
        )
    }
}

/// Bucket difference between the due time and now, in the tolerance unit.
/// `None` when the task is archived or not scheduled.
pub fn time_difference_in_unit(task: &Task, now: DateTime<Utc>) -> Option<i64> {
    if task.is_archived() {
        return None;
    }
    let due = task.to_be_done_time?;
    Some(to_bucket(due, task.tolerance_unit) - to_bucket(now, task.tolerance_unit))
}

/// Most urgent status first, then earliest due time. Unscheduled tasks come
/// last within their status.
pub fn compare_tasks(a: &Task, b: &Task, now: DateTime<Utc>) -> Ordering {
    a.status(now)
        .cmp(&b.status(now))
        .then_with(|| match (a.to_be_done_time, b.to_be_done_time) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
}

pub fn sort_tasks(tasks: &mut [Task], now: DateTime<Utc>) {
    tasks.sort_by(|a, b| compare_tasks(a, b, now));
}
