// Copyright (c) 2025 sbksba
//
// This software is licensed under the terms of the MIT License.
// See the LICENSE file in the project root for the full license text.
use crate::database::{self, CompletionOutcome};
use crate::identity::ActingUser;
use crate::notifier;
use crate::routes::AppState;
use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use common::status::sort_tasks;
use common::validate::{ValidationError, validate_task_payload};
use common::{CompletionPayload, Subscription, SubscriptionPayload, Task, TaskPayload, TaskView};
use sqlx::SqlitePool;
use tracing::{Level, debug, error, info, warn};

/// Loads a task the acting user is allowed to see. Invisible tasks are
/// reported exactly like missing ones.
async fn load_visible_task(pool: &SqlitePool, task_id: i64, user: &str) -> Result<Task, AppError> {
    match database::get_task_from_db(pool, task_id).await? {
        Some(task) if task.is_visible_to(user) => Ok(task),
        _ => Err(task_not_found(task_id)),
    }
}

fn task_not_found(task_id: i64) -> AppError {
    AppError::new(
        StatusCode::NOT_FOUND,
        &format!("Task with ID {} not found.", task_id),
    )
}

async fn view_of(pool: &SqlitePool, task: Task, now: DateTime<Utc>) -> Result<TaskView, AppError> {
    let history = database::get_accomplishments_from_db(pool, task.id).await?;
    Ok(TaskView::new(task, history, now))
}

/// Handler for listing the tasks visible to the acting user, most urgent first.
pub async fn list_tasks(
    State(pool): State<SqlitePool>,
    ActingUser(user): ActingUser,
) -> Result<Json<Vec<TaskView>>, AppError> {
    let now = Utc::now();
    let mut tasks: Vec<Task> = database::list_tasks_from_db(&pool)
        .await?
        .into_iter()
        .filter(|task| task.is_visible_to(&user))
        .collect();
    sort_tasks(&mut tasks, now);

    let mut views = Vec::with_capacity(tasks.len());
    for task in tasks {
        views.push(view_of(&pool, task, now).await?);
    }

    info!("Successfully retrieved {} tasks for {}.", views.len(), user);
    Ok(Json(views))
}

/// Handler for fetching a single task.
pub async fn get_task(
    State(pool): State<SqlitePool>,
    ActingUser(user): ActingUser,
    Path(task_id): Path<i64>,
) -> Result<Json<TaskView>, AppError> {
    let task = load_visible_task(&pool, task_id, &user).await?;
    Ok(Json(view_of(&pool, task, Utc::now()).await?))
}

/// Handler for creating a new task.
pub async fn create_task(
    State(pool): State<SqlitePool>,
    ActingUser(user): ActingUser,
    Json(payload): Json<TaskPayload>, // Extracting the request body as JSON
) -> Result<(StatusCode, Json<TaskView>), AppError> {
    debug!("Received request from {} to create task: {}", user, payload.name);
    validate_task_payload(&payload)?;

    let now = Utc::now();
    let new_task = database::create_task_in_db(&pool, payload, now).await?;

    info!("Task created successfully with ID: {}", new_task.id);

    // Return a 201 Created status with the new task as JSON.
    Ok((
        StatusCode::CREATED,
        Json(TaskView::new(new_task, Vec::new(), now)),
    ))
}

/// Handler for editing a task.
pub async fn update_task(
    State(pool): State<SqlitePool>,
    ActingUser(user): ActingUser,
    Path(task_id): Path<i64>,
    Json(payload): Json<TaskPayload>,
) -> Result<Json<TaskView>, AppError> {
    debug!("Received request to update task with ID: {}", task_id);
    validate_task_payload(&payload)?;
    load_visible_task(&pool, task_id, &user).await?;

    let task = database::update_task_in_db(&pool, task_id, payload)
        .await?
        .ok_or_else(|| task_not_found(task_id))?;
    Ok(Json(view_of(&pool, task, Utc::now()).await?))
}

/// Handler for deleting a task by ID, along with its history.
pub async fn delete_task(
    State(pool): State<SqlitePool>,
    ActingUser(user): ActingUser,
    Path(task_id): Path<i64>, // Extract task ID from the URL path
) -> Result<StatusCode, AppError> {
    debug!("Attempting to delete task with ID: {}", task_id);
    load_visible_task(&pool, task_id, &user).await?;

    if database::delete_task_in_db(&pool, task_id).await? {
        info!("Task with ID {} deleted successfully.", task_id);
        Ok(StatusCode::NO_CONTENT) // 204 No Content for successful deletion
    } else {
        warn!("Task with ID {} not found for deletion.", task_id);
        Err(task_not_found(task_id))
    }
}

async fn set_archived(
    pool: &SqlitePool,
    user: &str,
    task_id: i64,
    archived_at: Option<DateTime<Utc>>,
) -> Result<Json<TaskView>, AppError> {
    load_visible_task(pool, task_id, user).await?;
    if !database::set_archived_in_db(pool, task_id, archived_at).await? {
        return Err(task_not_found(task_id));
    }
    let task = load_visible_task(pool, task_id, user).await?;
    Ok(Json(view_of(pool, task, Utc::now()).await?))
}

/// Handler for archiving a task. Archived tasks keep their schedule frozen.
pub async fn archive_task(
    State(pool): State<SqlitePool>,
    ActingUser(user): ActingUser,
    Path(task_id): Path<i64>,
) -> Result<Json<TaskView>, AppError> {
    info!("Archiving task {}", task_id);
    set_archived(&pool, &user, task_id, Some(Utc::now())).await
}

pub async fn unarchive_task(
    State(pool): State<SqlitePool>,
    ActingUser(user): ActingUser,
    Path(task_id): Path<i64>,
) -> Result<Json<TaskView>, AppError> {
    info!("Unarchiving task {}", task_id);
    set_archived(&pool, &user, task_id, None).await
}

/// Handler for recomputing a task's due time from its history.
pub async fn reset_due_time(
    State(pool): State<SqlitePool>,
    ActingUser(user): ActingUser,
    Path(task_id): Path<i64>,
) -> Result<Json<TaskView>, AppError> {
    load_visible_task(&pool, task_id, &user).await?;
    let now = Utc::now();
    let task = database::reset_due_time_in_db(&pool, task_id, now)
        .await?
        .ok_or_else(|| task_not_found(task_id))?;
    info!("Due time of task {} reset to {:?}", task_id, task.to_be_done_time);
    Ok(Json(view_of(&pool, task, now).await?))
}

/// Handler for marking a task as done.
pub async fn add_accomplishment(
    State(pool): State<SqlitePool>,
    ActingUser(user): ActingUser,
    Path(task_id): Path<i64>,
    Json(payload): Json<CompletionPayload>,
) -> Result<(StatusCode, Json<TaskView>), AppError> {
    debug!("Received completion of task {} from {}: {:?}", task_id, user, payload);
    load_visible_task(&pool, task_id, &user).await?;

    let now = Utc::now();
    match database::record_completion_in_db(&pool, task_id, &user, payload, now).await? {
        CompletionOutcome::Recorded { task, missed } => {
            if missed > 0 {
                info!("Recorded {} missed occurrence(s) of task {}", missed, task_id);
            }
            Ok((StatusCode::CREATED, Json(view_of(&pool, task, now).await?)))
        }
        CompletionOutcome::Archived => Err(AppError::new(
            StatusCode::CONFLICT,
            &format!("Task with ID {} is archived.", task_id),
        )),
        CompletionOutcome::NotFound => Err(task_not_found(task_id)),
    }
}

/// Handler for undoing a completion.
pub async fn delete_accomplishment(
    State(pool): State<SqlitePool>,
    ActingUser(user): ActingUser,
    Path(accomplishment_id): Path<i64>,
) -> Result<Json<TaskView>, AppError> {
    let not_found = || {
        AppError::new(
            StatusCode::NOT_FOUND,
            &format!("Accomplishment with ID {} not found.", accomplishment_id),
        )
    };

    let accomplishment = database::get_accomplishment_from_db(&pool, accomplishment_id)
        .await?
        .ok_or_else(not_found)?;
    load_visible_task(&pool, accomplishment.task_id, &user)
        .await
        .map_err(|_| not_found())?;

    let now = Utc::now();
    let task = database::delete_accomplishment_in_db(&pool, accomplishment_id, now)
        .await?
        .ok_or_else(not_found)?;
    Ok(Json(view_of(&pool, task, now).await?))
}

/// Handler for registering a push subscription of the acting user.
pub async fn subscribe(
    State(pool): State<SqlitePool>,
    ActingUser(user): ActingUser,
    Json(payload): Json<SubscriptionPayload>,
) -> Result<(StatusCode, Json<Subscription>), AppError> {
    if payload.target.trim().is_empty() {
        return Err(AppError::new(
            StatusCode::BAD_REQUEST,
            "Subscription target cannot be empty.",
        ));
    }
    let subscription =
        database::add_subscription_in_db(&pool, &user, &payload.target, Utc::now()).await?;
    info!("User {} subscribed with {}", user, subscription.target);
    Ok((StatusCode::CREATED, Json(subscription)))
}

pub async fn unsubscribe(
    State(pool): State<SqlitePool>,
    ActingUser(user): ActingUser,
    Json(payload): Json<SubscriptionPayload>,
) -> Result<StatusCode, AppError> {
    if database::remove_subscription_in_db(&pool, &user, &payload.target).await? {
        info!("User {} unsubscribed {}", user, payload.target);
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::new(
            StatusCode::NOT_FOUND,
            "Subscription not found.",
        ))
    }
}

/// Handler for sending the acting user their pending reminders right now,
/// even if they were already notified.
pub async fn notify_test(
    State(state): State<AppState>,
    ActingUser(user): ActingUser,
) -> Result<Json<serde_json::Value>, AppError> {
    debug!("Received request to send test notifications to {}", user);

    let targets: Vec<String> = database::list_user_subscriptions_from_db(&state.pool, &user)
        .await?
        .into_iter()
        .map(|subscription| subscription.target)
        .collect();

    let report = notifier::notify_user(
        &state.pool,
        state.transport.as_ref(),
        &user,
        &targets,
        &state.app_url,
        Utc::now(),
        true,
    )
    .await?;

    Ok(Json(serde_json::json!({
        "message": format!("Sent {} notification(s).", report.sent),
        "sent": report.sent,
        "failed": report.failed,
        "expired": report.expired,
    })))
}

// --- Custom Error Handling ---

/// Our custom error type for the application.
#[derive(Debug)]
pub struct AppError {
    pub(crate) code: StatusCode,
    pub(crate) message: String,
}

impl AppError {
    pub(crate) fn new(code: StatusCode, message: &str) -> Self {
        Self {
            code,
            message: message.to_string(),
        }
    }

    /// Server faults are errors; anything the client got wrong is a warning.
    pub(crate) fn log_level(&self) -> Level {
        if self.code.is_server_error() {
            Level::ERROR
        } else {
            Level::WARN
        }
    }
}

/// Allows converting an `anyhow::Error` (coming from `database.rs`)
/// into our `AppError`.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        // Log the internal error for debugging.
        tracing::error!("Internal server error: {:?}", err);
        Self {
            code: StatusCode::INTERNAL_SERVER_ERROR,
            message: "An internal error occurred.".to_string(),
        }
    }
}

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        debug!("Validation failed: {}", err);
        Self::new(StatusCode::BAD_REQUEST, &err.to_string())
    }
}

/// Allows Axum to convert our `AppError` into an HTTP `Response`.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.log_level() == Level::ERROR {
            error!(
                "Responding with error: status_code={}, message={}",
                self.code.as_u16(),
                self.message
            );
        } else {
            warn!(
                "Responding with error: status_code={}, message={}",
                self.code.as_u16(),
                self.message
            );
        }
        (
            self.code,
            Json(serde_json::json!({ "error": self.message })),
        )
            .into_response()
    }
}
