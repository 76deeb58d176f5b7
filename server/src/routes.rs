// Copyright (c) 2025 sbksba
//
// This software is licensed under the terms of the MIT License.
// See the LICENSE file in the project root for the full license text.
use std::sync::Arc;

use crate::config::DEFAULT_APP_URL;
use crate::handlers;
use crate::push::{LogTransport, PushTransport};
use axum::{
    Router,
    extract::FromRef,
    routing::{delete, get, post},
};
use sqlx::SqlitePool;

/// Shared state of the application.
#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub transport: Arc<dyn PushTransport>,
    pub app_url: String,
}

impl AppState {
    /// State that delivers notifications to the log only.
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            transport: Arc::new(LogTransport),
            app_url: DEFAULT_APP_URL.to_string(),
        }
    }

    pub fn with_transport(mut self, transport: Arc<dyn PushTransport>) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_app_url(mut self, app_url: impl Into<String>) -> Self {
        self.app_url = app_url.into();
        self
    }
}

impl FromRef<AppState> for SqlitePool {
    fn from_ref(state: &AppState) -> Self {
        state.pool.clone()
    }
}

/// Creates and configures the application router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Tasks visible to the acting user, and task creation
        .route(
            "/api/tasks",
            get(handlers::list_tasks).post(handlers::create_task),
        )
        .route(
            "/api/tasks/{id}",
            get(handlers::get_task)
                .put(handlers::update_task)
                .delete(handlers::delete_task),
        )
        .route("/api/tasks/{id}/archive", post(handlers::archive_task))
        .route("/api/tasks/{id}/unarchive", post(handlers::unarchive_task))
        // Recomputes the due time from the completion history
        .route("/api/tasks/{id}/reset", post(handlers::reset_due_time))
        // Marks a task as done
        .route(
            "/api/tasks/{id}/accomplishments",
            post(handlers::add_accomplishment),
        )
        .route(
            "/api/accomplishments/{id}",
            delete(handlers::delete_accomplishment),
        )
        .route(
            "/api/subscriptions",
            post(handlers::subscribe).delete(handlers::unsubscribe),
        )
        .route("/api/notifications/test", post(handlers::notify_test))
        // Adds the shared state (DB pool and push transport) to the application
        .with_state(state)
}
