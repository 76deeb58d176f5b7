// Copyright (c) 2025 sbksba
//
// This software is licensed under the terms of the MIT License.
// See the LICENSE file in the project root for the full license text.
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use common::recurrence::{due_after_deletion, due_from_history, plan_completion};
use common::rotation::{default_completed_by, rotate};
use common::{
    Accomplishment, CompletionPayload, NewAccomplishment, Subscription, Task, TaskPayload,
    UserId,
};
use sqlx::types::Json;
use sqlx::{
    QueryBuilder, Sqlite, SqliteConnection, SqlitePool, Transaction, migrate::MigrateDatabase,
};
use tracing::{debug, info};

/// Statements creating the schema. Shared by the application and the tests
/// so both always run against the same tables.
pub const SCHEMA: [&str; 4] = [
    r#"
    CREATE TABLE IF NOT EXISTS tasks (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        description TEXT NULL,
        period INTEGER NOT NULL,
        unit TEXT NOT NULL,
        tolerance INTEGER NOT NULL,
        tolerance_unit TEXT NOT NULL,
        schedule_mode TEXT NOT NULL,
        is_joint BOOLEAN NOT NULL,
        assignees TEXT NOT NULL,
        visible_to TEXT NOT NULL,
        to_be_done_time TIMESTAMP WITH TIME ZONE NULL,
        last_notified_at TIMESTAMP WITH TIME ZONE NULL,
        archived_at TIMESTAMP WITH TIME ZONE NULL,
        created_at TIMESTAMP WITH TIME ZONE NOT NULL
    );
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS accomplishments (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        task_id INTEGER NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
        completion_time TIMESTAMP WITH TIME ZONE NOT NULL,
        completed_by TEXT NOT NULL,
        is_failed BOOLEAN NOT NULL
    );
    "#,
    "CREATE INDEX IF NOT EXISTS accomplishments_task_id ON accomplishments (task_id);",
    r#"
    CREATE TABLE IF NOT EXISTS subscriptions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id TEXT NOT NULL,
        target TEXT NOT NULL,
        created_at TIMESTAMP WITH TIME ZONE NOT NULL,
        UNIQUE (user_id, target)
    );
    "#,
];

/// Establishes the database connection pool.
/// If the database does not exist, it creates it, along with its directory.
/// It also ensures every table has the correct schema.
pub async fn establish_connection_pool(database_url: &str) -> Result<SqlitePool> {
    if !Sqlite::database_exists(database_url).await.unwrap_or(false) {
        info!("Creating database {}", database_url);
        if let Some(parent) = database_url
            .strip_prefix("sqlite://")
            .and_then(|path| Path::new(path).parent())
            .filter(|dir| !dir.as_os_str().is_empty())
        {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
        Sqlite::create_database(database_url)
            .await
            .context("Failed to create database")?;
    } else {
        info!("Database already exists.");
    }

    let pool = SqlitePool::connect(database_url)
        .await
        .context("Failed to connect to database")?;

    init_schema(&pool).await?;

    Ok(pool)
}

pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    for statement in SCHEMA {
        sqlx::query(statement)
            .execute(pool)
            .await
            .context("Failed to create schema")?;
    }
    info!("Schema is ready.");
    Ok(())
}

// --- Row level helpers, usable inside a transaction ---

/// Opens a transaction that holds the write lock from its first statement.
/// Concurrent read-modify-write sequences on a task then wait for each
/// other instead of failing to upgrade a read lock.
async fn begin_write(pool: &SqlitePool) -> Result<Transaction<'static, Sqlite>> {
    pool.begin_with("BEGIN IMMEDIATE")
        .await
        .context("Failed to begin transaction")
}

async fn fetch_task(conn: &mut SqliteConnection, task_id: i64) -> Result<Option<Task>> {
    sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE id = ?")
        .bind(task_id)
        .fetch_optional(&mut *conn)
        .await
        .with_context(|| format!("Failed to retrieve task with ID: {}", task_id))
}

/// Accomplishments of a task, newest first.
async fn fetch_history(conn: &mut SqliteConnection, task_id: i64) -> Result<Vec<Accomplishment>> {
    let mut history =
        sqlx::query_as::<_, Accomplishment>("SELECT * FROM accomplishments WHERE task_id = ?")
            .bind(task_id)
            .fetch_all(&mut *conn)
            .await
            .with_context(|| format!("Failed to retrieve accomplishments of task {}", task_id))?;
    history.sort_by(|a, b| {
        b.completion_time
            .cmp(&a.completion_time)
            .then(b.id.cmp(&a.id))
    });
    Ok(history)
}

async fn insert_accomplishment(
    conn: &mut SqliteConnection,
    record: &NewAccomplishment,
) -> Result<i64> {
    let id = sqlx::query(
        "INSERT INTO accomplishments (task_id, completion_time, completed_by, is_failed) VALUES (?, ?, ?, ?)",
    )
    .bind(record.task_id)
    .bind(record.completion_time)
    .bind(Json(&record.completed_by))
    .bind(record.is_failed)
    .execute(&mut *conn)
    .await
    .context("Failed to insert accomplishment into DB")?
    .last_insert_rowid();
    Ok(id)
}

/// Writes the two fields the engine maintains after each accomplishment.
async fn patch_schedule(
    conn: &mut SqliteConnection,
    task_id: i64,
    to_be_done_time: Option<DateTime<Utc>>,
    assignees: &[UserId],
) -> Result<()> {
    sqlx::query("UPDATE tasks SET to_be_done_time = ?, assignees = ? WHERE id = ?")
        .bind(to_be_done_time)
        .bind(Json(assignees))
        .bind(task_id)
        .execute(&mut *conn)
        .await
        .with_context(|| format!("Failed to update schedule of task {}", task_id))?;
    Ok(())
}

// --- Tasks ---

/// Inserts a new task. It is due right away unless the payload says otherwise.
pub async fn create_task_in_db(
    pool: &SqlitePool,
    payload: TaskPayload,
    now: DateTime<Utc>,
) -> Result<Task> {
    let to_be_done_time = Some(payload.to_be_done_time.unwrap_or(now));

    debug!(
        "Insert values: name={}, period={} {:?}, tolerance={} {:?}, mode={:?}, assignees={:?}",
        payload.name,
        payload.period,
        payload.unit,
        payload.tolerance,
        payload.tolerance_unit,
        payload.schedule_mode,
        payload.assignees
    );

    let id = sqlx::query(
        "INSERT INTO tasks (name, description, period, unit, tolerance, tolerance_unit, schedule_mode, is_joint, assignees, visible_to, to_be_done_time, last_notified_at, archived_at, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, NULL, NULL, ?)",
    )
    .bind(&payload.name)
    .bind(&payload.description)
    .bind(payload.period)
    .bind(payload.unit)
    .bind(payload.tolerance)
    .bind(payload.tolerance_unit)
    .bind(payload.schedule_mode)
    .bind(payload.is_joint)
    .bind(Json(&payload.assignees))
    .bind(Json(&payload.visible_to))
    .bind(to_be_done_time)
    .bind(now)
    .execute(pool)
    .await
    .context("Failed to insert task into DB")?
    .last_insert_rowid();

    Ok(Task {
        id,
        name: payload.name,
        description: payload.description,
        period: payload.period,
        unit: payload.unit,
        tolerance: payload.tolerance,
        tolerance_unit: payload.tolerance_unit,
        schedule_mode: payload.schedule_mode,
        is_joint: payload.is_joint,
        assignees: payload.assignees,
        visible_to: payload.visible_to,
        to_be_done_time,
        last_notified_at: None,
        archived_at: None,
        created_at: now,
    })
}

pub async fn get_task_from_db(pool: &SqlitePool, task_id: i64) -> Result<Option<Task>> {
    let mut conn = pool.acquire().await.context("Failed to acquire connection")?;
    fetch_task(&mut conn, task_id).await
}

pub async fn list_tasks_from_db(pool: &SqlitePool) -> Result<Vec<Task>> {
    sqlx::query_as::<_, Task>("SELECT * FROM tasks ORDER BY id ASC")
        .fetch_all(pool)
        .await
        .context("Failed to retrieve tasks from DB")
}

/// Replaces the editable fields of a task. The rotation order is rebuilt
/// from history for the new assignee list; the due time only changes when
/// the payload carries one.
pub async fn update_task_in_db(
    pool: &SqlitePool,
    task_id: i64,
    payload: TaskPayload,
) -> Result<Option<Task>> {
    let mut tx = begin_write(pool).await?;

    let Some(mut task) = fetch_task(&mut tx, task_id).await? else {
        return Ok(None);
    };
    let history = fetch_history(&mut tx, task_id).await?;

    task.name = payload.name;
    task.description = payload.description;
    task.period = payload.period;
    task.unit = payload.unit;
    task.tolerance = payload.tolerance;
    task.tolerance_unit = payload.tolerance_unit;
    task.schedule_mode = payload.schedule_mode;
    task.is_joint = payload.is_joint;
    task.assignees = rotate(&payload.assignees, payload.is_joint, &history);
    task.visible_to = payload.visible_to;
    if payload.to_be_done_time.is_some() {
        task.to_be_done_time = payload.to_be_done_time;
    }

    sqlx::query(
        "UPDATE tasks SET name = ?, description = ?, period = ?, unit = ?, tolerance = ?, tolerance_unit = ?, schedule_mode = ?, is_joint = ?, assignees = ?, visible_to = ?, to_be_done_time = ? WHERE id = ?",
    )
    .bind(&task.name)
    .bind(&task.description)
    .bind(task.period)
    .bind(task.unit)
    .bind(task.tolerance)
    .bind(task.tolerance_unit)
    .bind(task.schedule_mode)
    .bind(task.is_joint)
    .bind(Json(&task.assignees))
    .bind(Json(&task.visible_to))
    .bind(task.to_be_done_time)
    .bind(task_id)
    .execute(&mut *tx)
    .await
    .with_context(|| format!("Failed to update task with ID: {}", task_id))?;

    tx.commit().await.context("Failed to commit task update")?;
    info!("Updated task {}", task_id);
    Ok(Some(task))
}

/// Sets or clears `archived_at`. Returns false if no task has this ID.
pub async fn set_archived_in_db(
    pool: &SqlitePool,
    task_id: i64,
    archived_at: Option<DateTime<Utc>>,
) -> Result<bool> {
    let result = sqlx::query("UPDATE tasks SET archived_at = ? WHERE id = ?")
        .bind(archived_at)
        .bind(task_id)
        .execute(pool)
        .await
        .with_context(|| format!("Failed to change archive state of task {}", task_id))?;
    Ok(result.rows_affected() > 0)
}

/// Deletes a task and all of its accomplishments.
/// Returns true if a task was deleted, false if no task with the given ID was found.
pub async fn delete_task_in_db(pool: &SqlitePool, task_id: i64) -> Result<bool> {
    debug!("Attempting to delete task with ID: {}", task_id);
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    let removed = sqlx::query("DELETE FROM accomplishments WHERE task_id = ?")
        .bind(task_id)
        .execute(&mut *tx)
        .await
        .context("Failed to delete accomplishments")?
        .rows_affected();

    let deleted = sqlx::query("DELETE FROM tasks WHERE id = ?")
        .bind(task_id)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("Failed to delete task with ID: {}", task_id))?
        .rows_affected();

    tx.commit().await.context("Failed to commit task deletion")?;
    info!(
        "Deleted {} task(s) and {} accomplishment(s) for task ID: {}",
        deleted, removed, task_id
    );
    Ok(deleted > 0)
}

/// Recomputes the due time of a task from its history alone.
pub async fn reset_due_time_in_db(
    pool: &SqlitePool,
    task_id: i64,
    now: DateTime<Utc>,
) -> Result<Option<Task>> {
    let mut tx = begin_write(pool).await?;

    let Some(mut task) = fetch_task(&mut tx, task_id).await? else {
        return Ok(None);
    };
    let history = fetch_history(&mut tx, task_id).await?;
    task.to_be_done_time = due_from_history(&task, &history, now);
    patch_schedule(&mut tx, task_id, task.to_be_done_time, &task.assignees).await?;

    tx.commit().await.context("Failed to commit due time reset")?;
    Ok(Some(task))
}

/// Stamps `last_notified_at` on every given task in one statement.
pub async fn mark_tasks_notified_in_db(
    pool: &SqlitePool,
    task_ids: &[i64],
    now: DateTime<Utc>,
) -> Result<u64> {
    if task_ids.is_empty() {
        return Ok(0);
    }

    let mut builder: QueryBuilder<Sqlite> =
        QueryBuilder::new("UPDATE tasks SET last_notified_at = ");
    builder.push_bind(now);
    builder.push(" WHERE id IN (");
    let mut ids = builder.separated(", ");
    for id in task_ids {
        ids.push_bind(*id);
    }
    ids.push_unseparated(")");

    let result = builder
        .build()
        .execute(pool)
        .await
        .context("Failed to mark tasks as notified")?;
    Ok(result.rows_affected())
}

// --- Accomplishments ---

pub async fn get_accomplishments_from_db(
    pool: &SqlitePool,
    task_id: i64,
) -> Result<Vec<Accomplishment>> {
    let mut conn = pool.acquire().await.context("Failed to acquire connection")?;
    fetch_history(&mut conn, task_id).await
}

pub async fn get_accomplishment_from_db(
    pool: &SqlitePool,
    accomplishment_id: i64,
) -> Result<Option<Accomplishment>> {
    sqlx::query_as::<_, Accomplishment>("SELECT * FROM accomplishments WHERE id = ?")
        .bind(accomplishment_id)
        .fetch_optional(pool)
        .await
        .with_context(|| format!("Failed to retrieve accomplishment {}", accomplishment_id))
}

#[derive(Debug)]
pub enum CompletionOutcome {
    Recorded { task: Task, missed: usize },
    NotFound,
    Archived,
}

/// Records that `acting_user` (or the completers named in the payload) did
/// the task, backfills missed fixed occurrences, and moves the schedule
/// and the rotation forward. Everything happens in one transaction so
/// concurrent completions cannot compute from the same stale task.
pub async fn record_completion_in_db(
    pool: &SqlitePool,
    task_id: i64,
    acting_user: &str,
    payload: CompletionPayload,
    now: DateTime<Utc>,
) -> Result<CompletionOutcome> {
    let mut tx = begin_write(pool).await?;

    let Some(mut task) = fetch_task(&mut tx, task_id).await? else {
        return Ok(CompletionOutcome::NotFound);
    };
    if task.is_archived() {
        return Ok(CompletionOutcome::Archived);
    }

    let completion_time = payload.completion_time.unwrap_or(now);
    let completed_by = payload
        .completed_by
        .unwrap_or_else(|| default_completed_by(&task, acting_user));

    let mut missed = 0;
    if payload.update_due_time {
        let history = fetch_history(&mut tx, task_id).await?;
        let plan = plan_completion(&task, &history, completion_time, now);
        for failed in plan.failed_accomplishments(task_id) {
            insert_accomplishment(&mut tx, &failed).await?;
        }
        missed = plan.missed.len();
        task.to_be_done_time = plan.next_due;
    }

    insert_accomplishment(
        &mut tx,
        &NewAccomplishment {
            task_id,
            completion_time,
            completed_by,
            is_failed: false,
        },
    )
    .await?;

    let history = fetch_history(&mut tx, task_id).await?;
    task.assignees = rotate(&task.assignees, task.is_joint, &history);
    patch_schedule(&mut tx, task_id, task.to_be_done_time, &task.assignees).await?;

    tx.commit().await.context("Failed to commit completion")?;

    info!(
        "Task {} completed at {} ({} missed), next due {:?}",
        task_id, completion_time, missed, task.to_be_done_time
    );
    Ok(CompletionOutcome::Recorded { task, missed })
}

/// Deletes an accomplishment and recomputes the schedule and the rotation
/// of its task. Archived tasks keep their frozen schedule.
/// Returns `None` if no accomplishment has this ID.
pub async fn delete_accomplishment_in_db(
    pool: &SqlitePool,
    accomplishment_id: i64,
    now: DateTime<Utc>,
) -> Result<Option<Task>> {
    let mut tx = begin_write(pool).await?;

    let Some(deleted) =
        sqlx::query_as::<_, Accomplishment>("SELECT * FROM accomplishments WHERE id = ?")
            .bind(accomplishment_id)
            .fetch_optional(&mut *tx)
            .await
            .context("Failed to retrieve accomplishment")?
    else {
        return Ok(None);
    };

    sqlx::query("DELETE FROM accomplishments WHERE id = ?")
        .bind(accomplishment_id)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("Failed to delete accomplishment {}", accomplishment_id))?;

    let Some(mut task) = fetch_task(&mut tx, deleted.task_id).await? else {
        tx.commit().await.context("Failed to commit deletion")?;
        return Ok(None);
    };

    if !task.is_archived() {
        let remaining = fetch_history(&mut tx, task.id).await?;
        task.to_be_done_time = due_after_deletion(&task, &deleted, &remaining, now);
        task.assignees = rotate(&task.assignees, task.is_joint, &remaining);
        patch_schedule(&mut tx, task.id, task.to_be_done_time, &task.assignees).await?;
    }

    tx.commit().await.context("Failed to commit deletion")?;
    info!(
        "Deleted accomplishment {} of task {}",
        accomplishment_id, task.id
    );
    Ok(Some(task))
}

// --- Subscriptions ---

/// Registers a push target for a user. Registering the same target twice
/// is a no-op.
pub async fn add_subscription_in_db(
    pool: &SqlitePool,
    user_id: &str,
    target: &str,
    now: DateTime<Utc>,
) -> Result<Subscription> {
    sqlx::query(
        "INSERT INTO subscriptions (user_id, target, created_at) VALUES (?, ?, ?) ON CONFLICT (user_id, target) DO NOTHING",
    )
    .bind(user_id)
    .bind(target)
    .bind(now)
    .execute(pool)
    .await
    .context("Failed to insert subscription")?;

    sqlx::query_as::<_, Subscription>(
        "SELECT * FROM subscriptions WHERE user_id = ? AND target = ?",
    )
    .bind(user_id)
    .bind(target)
    .fetch_one(pool)
    .await
    .context("Failed to retrieve subscription")
}

pub async fn remove_subscription_in_db(
    pool: &SqlitePool,
    user_id: &str,
    target: &str,
) -> Result<bool> {
    let result = sqlx::query("DELETE FROM subscriptions WHERE user_id = ? AND target = ?")
        .bind(user_id)
        .bind(target)
        .execute(pool)
        .await
        .context("Failed to delete subscription")?;
    Ok(result.rows_affected() > 0)
}

/// Drops a target for every user, used once the transport reports it gone.
pub async fn remove_subscription_target_in_db(pool: &SqlitePool, target: &str) -> Result<u64> {
    let result = sqlx::query("DELETE FROM subscriptions WHERE target = ?")
        .bind(target)
        .execute(pool)
        .await
        .context("Failed to delete expired subscription")?;
    Ok(result.rows_affected())
}

pub async fn list_subscriptions_from_db(pool: &SqlitePool) -> Result<Vec<Subscription>> {
    sqlx::query_as::<_, Subscription>("SELECT * FROM subscriptions ORDER BY id ASC")
        .fetch_all(pool)
        .await
        .context("Failed to retrieve subscriptions")
}

pub async fn list_user_subscriptions_from_db(
    pool: &SqlitePool,
    user_id: &str,
) -> Result<Vec<Subscription>> {
    sqlx::query_as::<_, Subscription>(
        "SELECT * FROM subscriptions WHERE user_id = ? ORDER BY id ASC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await
    .context("Failed to retrieve subscriptions")
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone};
    use common::{ScheduleMode, TimeUnit};
    use sqlx::sqlite::SqlitePoolOptions;

    /// Helper function to set up an in-memory SQLite database for testing.
    /// This creates a fresh, empty database for each test, ensuring they are isolated.
    pub async fn setup_test_db() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to connect to in-memory SQLite");
        init_schema(&pool).await.expect("Failed to create schema");
        pool
    }

    pub fn utc(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    pub fn payload(name: &str, assignees: &[&str]) -> TaskPayload {
        TaskPayload {
            name: name.to_string(),
            description: None,
            period: 1,
            unit: TimeUnit::Day,
            tolerance: 0,
            tolerance_unit: TimeUnit::Day,
            schedule_mode: ScheduleMode::Rolling,
            is_joint: false,
            assignees: assignees.iter().map(|a| a.to_string()).collect(),
            visible_to: Vec::new(),
            to_be_done_time: None,
        }
    }

    fn completion_at(time: DateTime<Utc>) -> CompletionPayload {
        CompletionPayload {
            completion_time: Some(time),
            ..CompletionPayload::default()
        }
    }

    async fn complete(pool: &SqlitePool, task_id: i64, user: &str, at: DateTime<Utc>) -> Task {
        match record_completion_in_db(pool, task_id, user, completion_at(at), at)
            .await
            .unwrap()
        {
            CompletionOutcome::Recorded { task, .. } => task,
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_create_and_get_task() {
        let pool = setup_test_db().await;
        let now = utc(2025, 1, 10, 12);

        let created = create_task_in_db(&pool, payload("Dishes", &["alice", "bob"]), now)
            .await
            .unwrap();

        // Assert: The created task has the correct data and is due right away.
        assert!(created.id > 0);
        assert_eq!(created.to_be_done_time, Some(now));
        assert_eq!(created.assignees, vec!["alice".to_string(), "bob".to_string()]);

        let fetched = get_task_from_db(&pool, created.id).await.unwrap().unwrap();
        assert_eq!(fetched, created);
        assert_eq!(list_tasks_from_db(&pool).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rolling_completion_rotates_and_reschedules() {
        let pool = setup_test_db().await;
        let now = utc(2025, 1, 10, 12);
        let mut p = payload("Dishes", &["alice", "bob", "carol"]);
        p.period = 7;
        let task = create_task_in_db(&pool, p, now).await.unwrap();

        let task = complete(&pool, task.id, "alice", utc(2025, 1, 11, 9)).await;

        assert_eq!(task.to_be_done_time, Some(utc(2025, 1, 18, 9)));
        assert_eq!(task.assignees[0], "bob");

        let stored = get_task_from_db(&pool, task.id).await.unwrap().unwrap();
        assert_eq!(stored.to_be_done_time, task.to_be_done_time);
        assert_eq!(stored.assignees, task.assignees);

        let history = get_accomplishments_from_db(&pool, task.id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].completed_by, vec!["alice".to_string()]);
        assert!(!history[0].is_failed);
    }

    #[tokio::test]
    async fn test_fixed_completion_backfills_failed_occurrences() {
        let pool = setup_test_db().await;
        let due = utc(2025, 1, 10, 12);
        let mut p = payload("Plants", &["alice", "bob"]);
        p.schedule_mode = ScheduleMode::Fixed;
        p.to_be_done_time = Some(due);
        let task = create_task_in_db(&pool, p, due).await.unwrap();

        let completion = due + TimeDelta::days(3);
        let outcome = record_completion_in_db(&pool, task.id, "bob", completion_at(completion), completion)
            .await
            .unwrap();
        let CompletionOutcome::Recorded { task, missed } = outcome else {
            panic!("completion was not recorded");
        };

        assert_eq!(missed, 3);
        assert_eq!(task.to_be_done_time, Some(due + TimeDelta::days(4)));

        let history = get_accomplishments_from_db(&pool, task.id).await.unwrap();
        assert_eq!(history.len(), 4);
        assert!(!history[0].is_failed);
        assert_eq!(history[0].completed_by, vec!["bob".to_string()]);
        let failed_times: Vec<DateTime<Utc>> = history[1..].iter().map(|a| a.completion_time).collect();
        assert_eq!(
            failed_times,
            vec![due + TimeDelta::days(2), due + TimeDelta::days(1), due]
        );
        assert!(history[1..].iter().all(|a| a.is_failed && a.completed_by.is_empty()));
        // bob did it, so alice is next.
        assert_eq!(task.assignees[0], "alice");
    }

    #[tokio::test]
    async fn test_backdated_completion_does_not_pull_due_time_back() {
        let pool = setup_test_db().await;
        let now = utc(2025, 1, 10, 12);
        let task = create_task_in_db(&pool, payload("Dishes", &["alice", "bob"]), now)
            .await
            .unwrap();

        complete(&pool, task.id, "alice", now).await;
        let outcome = record_completion_in_db(
            &pool,
            task.id,
            "bob",
            completion_at(utc(2025, 1, 5, 12)),
            now,
        )
        .await
        .unwrap();
        let CompletionOutcome::Recorded { task, .. } = outcome else {
            panic!("completion was not recorded");
        };

        assert_eq!(task.to_be_done_time, Some(utc(2025, 1, 11, 12)));
        let history = get_accomplishments_from_db(&pool, task.id).await.unwrap();
        assert_eq!(task.to_be_done_time, due_from_history(&task, &history, now));
    }

    #[tokio::test]
    async fn test_concurrent_completions_are_serialized() {
        let path = std::env::temp_dir().join(format!(
            "chores-concurrent-{}-{}.db",
            std::process::id(),
            Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ));
        let url = format!("sqlite://{}", path.display());
        Sqlite::create_database(&url).await.unwrap();
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect(&url)
            .await
            .unwrap();
        init_schema(&pool).await.unwrap();

        let now = utc(2025, 1, 10, 12);
        let task = create_task_in_db(&pool, payload("Dishes", &["alice", "bob"]), now)
            .await
            .unwrap();

        let completions = (0..8).map(|i| {
            let pool = pool.clone();
            tokio::spawn(async move {
                let user = if i % 2 == 0 { "alice" } else { "bob" };
                let at = utc(2025, 1, 10, 13) + TimeDelta::minutes(i);
                record_completion_in_db(&pool, task.id, user, completion_at(at), at).await
            })
        });
        for handle in completions.collect::<Vec<_>>() {
            let outcome = handle.await.unwrap().unwrap();
            assert!(matches!(outcome, CompletionOutcome::Recorded { .. }));
        }

        let history = get_accomplishments_from_db(&pool, task.id).await.unwrap();
        assert_eq!(history.len(), 8);
        let stored = get_task_from_db(&pool, task.id).await.unwrap().unwrap();
        assert_eq!(stored.to_be_done_time, due_from_history(&stored, &history, now));

        pool.close().await;
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_completion_without_rescheduling() {
        let pool = setup_test_db().await;
        let now = utc(2025, 1, 10, 12);
        let task = create_task_in_db(&pool, payload("Dishes", &["alice", "bob"]), now)
            .await
            .unwrap();

        let outcome = record_completion_in_db(
            &pool,
            task.id,
            "alice",
            CompletionPayload {
                completion_time: Some(utc(2025, 1, 5, 12)),
                completed_by: None,
                update_due_time: false,
            },
            now,
        )
        .await
        .unwrap();
        let CompletionOutcome::Recorded { task, .. } = outcome else {
            panic!("completion was not recorded");
        };

        assert_eq!(task.to_be_done_time, Some(now));
        assert_eq!(task.assignees[0], "bob");
    }

    #[tokio::test]
    async fn test_completion_on_archived_or_missing_task() {
        let pool = setup_test_db().await;
        let now = utc(2025, 1, 10, 12);
        let task = create_task_in_db(&pool, payload("Dishes", &["alice"]), now)
            .await
            .unwrap();
        assert!(set_archived_in_db(&pool, task.id, Some(now)).await.unwrap());

        let archived = record_completion_in_db(&pool, task.id, "alice", CompletionPayload::default(), now)
            .await
            .unwrap();
        assert!(matches!(archived, CompletionOutcome::Archived));

        let missing = record_completion_in_db(&pool, 999, "alice", CompletionPayload::default(), now)
            .await
            .unwrap();
        assert!(matches!(missing, CompletionOutcome::NotFound));
        assert!(get_accomplishments_from_db(&pool, task.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_accomplishment_restores_schedule_and_rotation() {
        let pool = setup_test_db().await;
        let now = utc(2025, 1, 10, 12);
        let task = create_task_in_db(&pool, payload("Dishes", &["alice", "bob"]), now)
            .await
            .unwrap();

        complete(&pool, task.id, "alice", utc(2025, 1, 10, 13)).await;
        let after_second = complete(&pool, task.id, "bob", utc(2025, 1, 11, 13)).await;
        assert_eq!(after_second.assignees[0], "alice");
        assert_eq!(after_second.to_be_done_time, Some(utc(2025, 1, 12, 13)));

        let latest = get_accomplishments_from_db(&pool, task.id).await.unwrap()[0].clone();
        let task = delete_accomplishment_in_db(&pool, latest.id, now)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(task.to_be_done_time, Some(utc(2025, 1, 11, 13)));
        assert_eq!(task.assignees[0], "bob");
        assert!(delete_accomplishment_in_db(&pool, latest.id, now).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_task_keeps_rotation_consistent() {
        let pool = setup_test_db().await;
        let now = utc(2025, 1, 10, 12);
        let task = create_task_in_db(&pool, payload("Dishes", &["alice", "bob"]), now)
            .await
            .unwrap();
        complete(&pool, task.id, "alice", now).await;

        let updated = update_task_in_db(&pool, task.id, payload("Dishes", &["alice", "carol", "bob"]))
            .await
            .unwrap()
            .unwrap();

        // alice did it last; carol is first among the others.
        assert_eq!(
            updated.assignees,
            vec!["carol".to_string(), "alice".to_string(), "bob".to_string()]
        );
        // No due time in the payload: the computed one is kept.
        assert_eq!(updated.to_be_done_time, Some(utc(2025, 1, 11, 12)));
        assert!(update_task_in_db(&pool, 999, payload("x", &[])).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_task_cascades() {
        let pool = setup_test_db().await;
        let now = utc(2025, 1, 10, 12);
        let task = create_task_in_db(&pool, payload("Dishes", &["alice"]), now)
            .await
            .unwrap();
        complete(&pool, task.id, "alice", now).await;

        assert!(delete_task_in_db(&pool, task.id).await.unwrap());
        assert!(get_task_from_db(&pool, task.id).await.unwrap().is_none());
        assert!(get_accomplishments_from_db(&pool, task.id).await.unwrap().is_empty());
        assert!(!delete_task_in_db(&pool, task.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_reset_due_time() {
        let pool = setup_test_db().await;
        let now = utc(2025, 1, 10, 12);
        let mut p = payload("Dishes", &["alice"]);
        p.to_be_done_time = Some(utc(2025, 3, 1, 0));
        let task = create_task_in_db(&pool, p, now).await.unwrap();

        let reset = reset_due_time_in_db(&pool, task.id, now).await.unwrap().unwrap();
        assert_eq!(reset.to_be_done_time, Some(now));
        assert!(reset_due_time_in_db(&pool, 999, now).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_mark_tasks_notified() {
        let pool = setup_test_db().await;
        let now = utc(2025, 1, 10, 12);
        let a = create_task_in_db(&pool, payload("A", &[]), now).await.unwrap();
        let b = create_task_in_db(&pool, payload("B", &[]), now).await.unwrap();
        let c = create_task_in_db(&pool, payload("C", &[]), now).await.unwrap();

        assert_eq!(mark_tasks_notified_in_db(&pool, &[], now).await.unwrap(), 0);
        assert_eq!(mark_tasks_notified_in_db(&pool, &[a.id, c.id], now).await.unwrap(), 2);

        let a = get_task_from_db(&pool, a.id).await.unwrap().unwrap();
        let b = get_task_from_db(&pool, b.id).await.unwrap().unwrap();
        assert_eq!(a.last_notified_at, Some(now));
        assert_eq!(b.last_notified_at, None);
    }

    #[tokio::test]
    async fn test_subscriptions() {
        let pool = setup_test_db().await;
        let now = utc(2025, 1, 10, 12);

        let first = add_subscription_in_db(&pool, "alice", "endpoint-1", now).await.unwrap();
        let again = add_subscription_in_db(&pool, "alice", "endpoint-1", now).await.unwrap();
        assert_eq!(first.id, again.id);
        add_subscription_in_db(&pool, "bob", "endpoint-2", now).await.unwrap();

        assert_eq!(list_subscriptions_from_db(&pool).await.unwrap().len(), 2);
        assert_eq!(list_user_subscriptions_from_db(&pool, "alice").await.unwrap().len(), 1);

        assert!(remove_subscription_in_db(&pool, "alice", "endpoint-1").await.unwrap());
        assert!(!remove_subscription_in_db(&pool, "alice", "endpoint-1").await.unwrap());
        assert_eq!(remove_subscription_target_in_db(&pool, "endpoint-2").await.unwrap(), 1);
        assert!(list_subscriptions_from_db(&pool).await.unwrap().is_empty());
    }
}
