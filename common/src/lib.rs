// Copyright (c) 2025 sbksba
//
// This software is licensed under the terms of the MIT License.
// See the LICENSE file in the project root for the full license text.
pub mod notify;
pub mod recurrence;
pub mod rotation;
pub mod status;
pub mod units;
pub mod validate;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use recurrence::ScheduleMode;
pub use status::TaskStatus;
pub use units::TimeUnit;

/// Opaque identifier of a household member, as handed out by the
/// identity provider.
pub type UserId = String;

#[allow(clippy::doc_overindented_list_items)]
/// Represents a recurring chore.
///
/// Derivation attributes (derive):
/// - `Serialize`, `Deserialize`: Allows conversion to/from JSON.
/// - `sqlx::FromRow`: Allows `sqlx` to build a `Task` directly from a row.
///    The two id lists live in JSON text columns.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Task {
    pub id: i64,

    pub name: String,

    pub description: Option<String>,

    // 0 means the task is done once and never comes back.
    pub period: u32,

    pub unit: TimeUnit,

    pub tolerance: u32,

    pub tolerance_unit: TimeUnit,

    pub schedule_mode: ScheduleMode,

    pub is_joint: bool,

    // Rotation order: index 0 is the next person expected to act.
    #[sqlx(json)]
    pub assignees: Vec<UserId>,

    // Empty means every user can see the task.
    #[sqlx(json)]
    pub visible_to: Vec<UserId>,

    pub to_be_done_time: Option<DateTime<Utc>>,

    pub last_notified_at: Option<DateTime<Utc>>,

    pub archived_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
}

impl Task {
    pub fn is_archived(&self) -> bool {
        self.archived_at.is_some()
    }

    pub fn is_visible_to(&self, user: &str) -> bool {
        self.visible_to.is_empty() || self.visible_to.iter().any(|id| id == user)
    }
}

/// One completion of a task, or a missed fixed-schedule occurrence when
/// `is_failed` is set.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Accomplishment {
    pub id: i64,

    pub task_id: i64,

    pub completion_time: DateTime<Utc>,

    #[sqlx(json)]
    pub completed_by: Vec<UserId>,

    pub is_failed: bool,
}

/// An accomplishment that has not been stored yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAccomplishment {
    pub task_id: i64,
    pub completion_time: DateTime<Utc>,
    pub completed_by: Vec<UserId>,
    pub is_failed: bool,
}

impl NewAccomplishment {
    /// A missed fixed-schedule occurrence, dated at the due time it missed.
    pub fn failed(task_id: i64, due: DateTime<Utc>) -> Self {
        Self {
            task_id,
            completion_time: due,
            completed_by: Vec::new(),
            is_failed: true,
        }
    }
}

/// A push delivery endpoint registered by a user.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Subscription {
    pub id: i64,
    pub user_id: UserId,
    pub target: String,
    pub created_at: DateTime<Utc>,
}

fn default_unit() -> TimeUnit {
    TimeUnit::Day
}

/// Structure used to receive task creation and edition data from the API.
/// Fields the engine maintains itself (`last_notified_at`, `archived_at`)
/// are not part of it.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TaskPayload {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub period: u32,
    #[serde(default = "default_unit")]
    pub unit: TimeUnit,
    #[serde(default)]
    pub tolerance: u32,
    #[serde(default = "default_unit")]
    pub tolerance_unit: TimeUnit,
    #[serde(default)]
    pub schedule_mode: ScheduleMode,
    #[serde(default)]
    pub is_joint: bool,
    #[serde(default)]
    pub assignees: Vec<UserId>,
    #[serde(default)]
    pub visible_to: Vec<UserId>,
    // When absent on creation, the task is due right away.
    #[serde(default)]
    pub to_be_done_time: Option<DateTime<Utc>>,
}

/// Body of a "mark done" request. Everything is optional: the completion
/// defaults to now, by the acting user (or everyone for a joint task).
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CompletionPayload {
    #[serde(default)]
    pub completion_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_by: Option<Vec<UserId>>,
    #[serde(default = "default_true")]
    pub update_due_time: bool,
}

impl Default for CompletionPayload {
    fn default() -> Self {
        Self {
            completion_time: None,
            completed_by: None,
            update_due_time: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Structure used to register or remove a push subscription.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SubscriptionPayload {
    pub target: String,
}

/// A task as shown to a user: the stored record plus everything derived
/// from it at read time.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TaskView {
    #[serde(flatten)]
    pub task: Task,
    pub status: TaskStatus,
    pub to_be_completed_by: Vec<UserId>,
    pub due_label: Option<String>,
    pub accomplishments: Vec<Accomplishment>,
}

impl TaskView {
    /// `history` must be ordered newest first.
    pub fn new(task: Task, history: Vec<Accomplishment>, now: DateTime<Utc>) -> Self {
        let status = task.status(now);
        let to_be_completed_by = rotation::to_be_completed_by(&task);
        let due_label = status::time_difference_in_unit(&task, now)
            .map(|delta| units::describe_relative(delta, task.tolerance_unit));
        Self {
            task,
            status,
            to_be_completed_by,
            due_label,
            accomplishments: history,
        }
    }
}
