// Copyright (c) 2025 sbksba
//
// This software is licensed under the terms of the MIT License.
// See the LICENSE file in the project root for the full license text.
use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Timelike, Utc};
use common::notify::{NotificationKind, select_for_user};
use common::{Task, UserId};
use serde::Serialize;
use sqlx::SqlitePool;
use tokio::time;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::database;
use crate::push::{PushError, PushTransport};

/// What a push subscription receives, serialized as JSON.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct PushMessage {
    pub title: String,
    pub body: String,
    pub data: PushData,
    pub badge: String,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct PushData {
    pub url: String,
}

impl PushMessage {
    pub fn for_task(task: &Task, kind: NotificationKind, app_url: &str) -> Self {
        let (title, badge) = match kind {
            NotificationKind::Due => ("To do", "/badge-happy.svg"),
            NotificationKind::Overdue => ("Overdue!", "/badge-sad.svg"),
        };
        Self {
            title: title.to_string(),
            body: task.name.clone(),
            data: PushData {
                url: format!("{}/tasks/{}", app_url, task.id),
            },
            badge: badge.to_string(),
        }
    }
}

/// Counters for one notification run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct NotifyReport {
    pub users: usize,
    pub sent: usize,
    pub failed: usize,
    pub expired: usize,
    pub tasks_marked: u64,
}

impl NotifyReport {
    fn absorb(&mut self, other: NotifyReport) {
        self.users += other.users;
        self.sent += other.sent;
        self.failed += other.failed;
        self.expired += other.expired;
        self.tasks_marked += other.tasks_marked;
    }
}

/// Pushes every pending reminder of `user_id` to each of its `targets`.
///
/// Due reminders go out first and overdue ones last, each list least
/// urgent first. Selected tasks are marked notified once the sends are
/// done, whether or not they succeeded, unless `ignore_last_notified` is
/// set.
pub async fn notify_user(
    pool: &SqlitePool,
    transport: &dyn PushTransport,
    user_id: &str,
    targets: &[String],
    app_url: &str,
    now: DateTime<Utc>,
    ignore_last_notified: bool,
) -> Result<NotifyReport> {
    let tasks = database::list_tasks_from_db(pool).await?;
    deliver(
        pool,
        transport,
        &tasks,
        user_id,
        targets,
        app_url,
        now,
        ignore_last_notified,
    )
    .await
}

#[allow(clippy::too_many_arguments)]
async fn deliver(
    pool: &SqlitePool,
    transport: &dyn PushTransport,
    tasks: &[Task],
    user_id: &str,
    targets: &[String],
    app_url: &str,
    now: DateTime<Utc>,
    ignore_last_notified: bool,
) -> Result<NotifyReport> {
    let reminders = select_for_user(tasks, user_id, now, ignore_last_notified);

    let mut report = NotifyReport {
        users: 1,
        ..NotifyReport::default()
    };
    if reminders.is_empty() {
        debug!("Nothing to notify for user {}", user_id);
        return Ok(report);
    }

    info!(
        "Notifying user {} of {} due and {} overdue task(s) on {} target(s)",
        user_id,
        reminders.due.len(),
        reminders.overdue.len(),
        targets.len()
    );

    let messages = reminders
        .due
        .iter()
        .map(|task| (task, NotificationKind::Due))
        .chain(
            reminders
                .overdue
                .iter()
                .map(|task| (task, NotificationKind::Overdue)),
        );

    // Nothing in this loop may return early: the selected tasks are marked
    // below even when some deliveries went wrong.
    let mut live_targets: Vec<&String> = targets.iter().collect();
    for (task, kind) in messages {
        let payload = match serde_json::to_string(&PushMessage::for_task(task, kind, app_url)) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to serialize push message for task {}: {}", task.id, e);
                report.failed += live_targets.len();
                continue;
            }
        };

        let mut expired = Vec::new();
        for target in &live_targets {
            match transport.send(target, &payload).await {
                Ok(()) => report.sent += 1,
                Err(PushError::Expired(_)) => {
                    info!("Removing expired subscription {} of user {}", target, user_id);
                    if let Err(e) = database::remove_subscription_target_in_db(pool, target).await {
                        error!("Failed to remove expired subscription {}: {:?}", target, e);
                    }
                    report.expired += 1;
                    expired.push(target.to_string());
                }
                Err(err) => {
                    warn!("Failed to notify user {} about task {}: {}", user_id, task.id, err);
                    report.failed += 1;
                }
            }
        }
        live_targets.retain(|target| !expired.iter().any(|gone| gone == *target));
    }

    if !ignore_last_notified {
        report.tasks_marked =
            database::mark_tasks_notified_in_db(pool, &reminders.task_ids(), now).await?;
    }

    Ok(report)
}

/// One notification run over every user holding at least one subscription.
/// Every user is matched against the same snapshot of tasks, so a joint
/// task marked for one assignee still reaches the others. A failure for
/// one user is logged and does not stop the others.
pub async fn notify_all_users(
    pool: &SqlitePool,
    transport: &dyn PushTransport,
    app_url: &str,
    now: DateTime<Utc>,
) -> Result<NotifyReport> {
    let mut targets_by_user: BTreeMap<UserId, Vec<String>> = BTreeMap::new();
    for subscription in database::list_subscriptions_from_db(pool).await? {
        targets_by_user
            .entry(subscription.user_id)
            .or_default()
            .push(subscription.target);
    }

    let tasks = database::list_tasks_from_db(pool).await?;
    let mut report = NotifyReport::default();
    for (user_id, targets) in &targets_by_user {
        match deliver(pool, transport, &tasks, user_id, targets, app_url, now, false).await {
            Ok(user_report) => report.absorb(user_report),
            Err(e) => error!("Error while notifying user {}: {:?}", user_id, e),
        }
    }
    Ok(report)
}

/// Runs `notify_all_users` every `config.notify_interval`, staying silent
/// during quiet hours.
pub async fn run_notification_loop(
    pool: SqlitePool,
    transport: Arc<dyn PushTransport>,
    config: Config,
) {
    let mut interval = time::interval(config.notify_interval);

    // The first tick completes immediately. Skip it to wait for the first interval.
    interval.tick().await;

    loop {
        interval.tick().await;

        let now = Utc::now();
        if config.quiet_hours.is_some_and(|quiet| quiet.contains(now.hour())) {
            debug!("Quiet hours at {}, no notifications sent.", now);
            continue;
        }

        match notify_all_users(&pool, transport.as_ref(), &config.app_url, now).await {
            Ok(report) => info!(
                "Notification run done: {} user(s), {} sent, {} failed, {} expired, {} task(s) marked.",
                report.users, report.sent, report.failed, report.expired, report.tasks_marked
            ),
            Err(e) => error!("Error during notification run: {:?}", e),
        }
    }
}
