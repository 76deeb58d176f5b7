// Copyright (c) 2025 sbksba
//
// This software is licensed under the terms of the MIT License.
// See the LICENSE file in the project root for the full license text.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::status::classify;
use crate::units::{add_duration, sub_duration};
use crate::{Accomplishment, NewAccomplishment, Task};

/// How the next due time is derived after a completion.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum ScheduleMode {
    /// Next occurrence is one period after the actual completion.
    #[default]
    Rolling,
    /// Next occurrence is one period after the previous due time.
    Fixed,
}

/// Upper bound on the missed occurrences generated for one completion.
pub const MAX_BACKFILL: usize = 100;

/// What recording a completion does to a task's schedule.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionPlan {
    /// Due times that were missed before the completion, oldest first.
    pub missed: Vec<DateTime<Utc>>,
    pub next_due: Option<DateTime<Utc>>,
    /// Set when backfilling stopped at `MAX_BACKFILL`.
    pub capped: bool,
}

impl CompletionPlan {
    /// The failed accomplishments to store before the real one.
    pub fn failed_accomplishments(&self, task_id: i64) -> Vec<NewAccomplishment> {
        self.missed
            .iter()
            .map(|due| NewAccomplishment::failed(task_id, *due))
            .collect()
    }
}

/// Computes the schedule change caused by a completion at `completion_time`,
/// `history` being the accomplishments already recorded for the task.
///
/// A task that was never scheduled is treated as due `now`. A rolling
/// schedule restarts from the latest real completion, so logging an older
/// one never pulls the due time back. Under a fixed schedule every
/// occurrence that is already late at `completion_time` is reported as
/// missed before the schedule moves past the completion.
pub fn plan_completion(
    task: &Task,
    history: &[Accomplishment],
    completion_time: DateTime<Utc>,
    now: DateTime<Utc>,
) -> CompletionPlan {
    if task.period == 0 {
        return CompletionPlan {
            missed: Vec::new(),
            next_due: None,
            capped: false,
        };
    }

    let current = task.to_be_done_time.unwrap_or(now);

    match task.schedule_mode {
        ScheduleMode::Rolling => {
            let latest = history
                .iter()
                .filter(|a| !a.is_failed)
                .map(|a| a.completion_time)
                .fold(completion_time, |latest, t| latest.max(t));
            CompletionPlan {
                missed: Vec::new(),
                next_due: Some(add_duration(latest, task.period, task.unit)),
                capped: false,
            }
        }
        ScheduleMode::Fixed => {
            let mut due = current;
            let mut missed = Vec::new();
            let mut capped = false;

            while classify(
                Some(due),
                task.tolerance_unit,
                task.tolerance,
                completion_time,
                false,
            )
            .is_overdue()
            {
                if missed.len() == MAX_BACKFILL {
                    warn!(
                        "Task {} still late after {} missed occurrences, stopping backfill at {}.",
                        task.id, MAX_BACKFILL, due
                    );
                    capped = true;
                    break;
                }
                missed.push(due);
                due = add_duration(due, task.period, task.unit);
            }

            debug!(
                "Task {}: {} missed occurrences before completion at {}",
                task.id,
                missed.len(),
                completion_time
            );

            CompletionPlan {
                missed,
                next_due: Some(add_duration(due, task.period, task.unit)),
                capped,
            }
        }
    }
}

/// Recomputes a due time from the completion history alone: due now when
/// nothing was ever really done, never again for a one-time task, and one
/// period after the latest real completion otherwise.
pub fn due_from_history(
    task: &Task,
    history: &[Accomplishment],
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let latest = history
        .iter()
        .filter(|a| !a.is_failed)
        .map(|a| a.completion_time)
        .max();

    match latest {
        None => Some(now),
        Some(_) if task.period == 0 => None,
        Some(last) => Some(add_duration(last, task.period, task.unit)),
    }
}

/// New due time once `deleted` has been removed, `remaining` being the
/// accomplishments left for the task.
///
/// Under a fixed schedule, removing the latest record undoes the period it
/// advanced; removing an older one changes nothing.
pub fn due_after_deletion(
    task: &Task,
    deleted: &Accomplishment,
    remaining: &[Accomplishment],
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    if task.period == 0 || task.schedule_mode == ScheduleMode::Rolling {
        return due_from_history(task, remaining, now);
    }

    let was_latest = remaining
        .iter()
        .all(|a| a.completion_time <= deleted.completion_time);

    match task.to_be_done_time {
        Some(due) if was_latest => Some(sub_duration(due, task.period, task.unit)),
        Some(due) => Some(due),
        None => Some(now),
    }
}
