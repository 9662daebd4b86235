// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! HTTP-facing error type. Store failures become 5xx with a short message
//! (the underlying cause goes to the log, not the client); authorization
//! failures surface as 401/403; lookups that found nothing are 404.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum HubError {
    #[error("store failure")]
    Store(#[from] confab_store::StoreError),

    #[error("not found")]
    NotFound,

    #[error("unauthorized")]
    Unauthorized,

    #[error("bad request: {0}")]
    BadRequest(String),
}

impl IntoResponse for HubError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            HubError::Store(cause) => {
                error!("store failure in HTTP handler: {cause}");
                (StatusCode::INTERNAL_SERVER_ERROR, "store failure".to_string())
            }
            HubError::NotFound => (StatusCode::NOT_FOUND, "not found".to_string()),
            HubError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized".to_string()),
            HubError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
        };
        (status, message).into_response()
    }
}
