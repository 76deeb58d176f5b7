// Copyright (c) 2025 sbksba
//
// This software is licensed under the terms of the MIT License.
// See the LICENSE file in the project root for the full license text.
use axum::extract::FromRequestParts;
use axum::http::StatusCode;
use axum::http::request::Parts;
use common::UserId;

use crate::handlers::AppError;

/// Header carrying the identifier of the user making the request.
pub const USER_HEADER: &str = "x-user-id";

/// The user on whose behalf a request runs. Requests without one are
/// rejected with 401.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActingUser(pub UserId);

impl<S> FromRequestParts<S> for ActingUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|user| !user.is_empty())
            .map(|user| ActingUser(user.to_string()))
            .ok_or_else(|| AppError::new(StatusCode::UNAUTHORIZED, "Missing user identity."))
    }
}
