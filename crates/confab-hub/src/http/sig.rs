// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Signed-request verification middleware.
//!
//! A signed request carries two headers:
//!
//! ```text
//! public-key: <hex x-only key>
//! signature:  <hex Schnorr signature over method+path+body>
//! ```
//!
//! [`require_signed`] buffers the body (bounded by the configured body
//! limit), verifies the signature over the canonicalization, and stashes the
//! signer's key as a [`SignerKey`] request extension for the handler.
//! [`require_admin`] layers on top and compares the signer against the
//! configured admin key in constant time.

use axum::{
    body::{to_bytes, Body},
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use subtle::ConstantTimeEq;
use tracing::warn;

use confab_proto::identity;

use crate::HubState;

pub const PUBLIC_KEY_HEADER: &str = "public-key";
pub const SIGNATURE_HEADER: &str = "signature";

/// The verified signer of the current request.
#[derive(Debug, Clone)]
pub struct SignerKey(pub String);

/// Verify the request signature; reject with 401 on any failure.
pub async fn require_signed(
    State(state): State<HubState>,
    req: Request,
    next: Next,
) -> Response {
    let (mut parts, body) = req.into_parts();
    let Some((key, sig)) = signature_headers(&parts.headers) else {
        return (StatusCode::UNAUTHORIZED, "missing signature headers").into_response();
    };

    let bytes = match to_bytes(body, state.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(_) => return (StatusCode::PAYLOAD_TOO_LARGE, "body too large").into_response(),
    };

    match identity::verify_http(&key, parts.method.as_str(), parts.uri.path(), &bytes, &sig) {
        Ok(()) => {
            parts.extensions.insert(SignerKey(key));
            let req = Request::from_parts(parts, Body::from(bytes));
            next.run(req).await
        }
        Err(e) => {
            warn!(path = %parts.uri.path(), "request signature rejected: {e}");
            (StatusCode::UNAUTHORIZED, "invalid signature").into_response()
        }
    }
}

/// Gate a route on the configured admin key. Must be layered inside
/// [`require_signed`] (it reads the [`SignerKey`] extension).
pub async fn require_admin(State(state): State<HubState>, req: Request, next: Next) -> Response {
    let Some(signer) = req.extensions().get::<SignerKey>() else {
        return (StatusCode::UNAUTHORIZED, "unsigned request").into_response();
    };
    if !is_admin(&state, &signer.0) {
        warn!(path = %req.uri().path(), "admin request from non-admin key rejected");
        return (StatusCode::FORBIDDEN, "admin key required").into_response();
    }
    next.run(req).await
}

/// Constant-time comparison against the configured admin key.
/// Always false when no admin key is configured.
pub fn is_admin(state: &HubState, key: &str) -> bool {
    match &state.admin_key {
        Some(admin) => bool::from(admin.as_bytes().ct_eq(key.as_bytes())),
        None => false,
    }
}

fn signature_headers(headers: &HeaderMap) -> Option<(String, String)> {
    let key = headers.get(PUBLIC_KEY_HEADER)?.to_str().ok()?;
    let sig = headers.get(SIGNATURE_HEADER)?.to_str().ok()?;
    Some((key.to_string(), sig.to_string()))
}

// ── Unit tests ────────────────────────────────────────────────────────────────
