// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Router assembly and the listener.
//!
//! [`router`] builds the full HTTP + WebSocket surface for a [`HubState`];
//! [`attach`] merges it into an externally constructed `Router` so a host
//! application can hang the live-connection upgrade path off its own
//! server; [`serve`] binds and runs.

use anyhow::Context;
use axum::{
    extract::{ws::WebSocketUpgrade, State},
    middleware,
    response::Response,
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer};
use tracing::info;

use crate::http::{admin, history, sig};
use crate::{connection, HubState};

/// `GET /ws` — upgrade to the live bidirectional connection.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<HubState>) -> Response {
    ws.on_upgrade(move |socket| connection::handle_socket(socket, state))
}

/// The full hub surface: WebSocket upgrade, history reads, signed mutators,
/// and the admin API.
pub fn router(state: HubState) -> Router {
    // Full paths + merge rather than nest: nesting strips the prefix from
    // the request URI, and the signature canonicalization must cover the
    // path exactly as the client signed it.
    let admin_routes = Router::new()
        .route("/api/admin/get-room-info", post(admin::get_room_info))
        .route("/api/admin/delete-room", post(admin::delete_room))
        .route(
            "/api/admin/get-recent-attachments",
            post(admin::get_recent_attachments),
        )
        .route("/api/admin/create-test-data", post(admin::create_test_data))
        .route("/api/admin/block-user", post(admin::block_user))
        .route(
            "/api/admin/attachments/:id/delete",
            post(admin::delete_attachment),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            sig::require_admin,
        ))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            sig::require_signed,
        ));

    let signed_routes = Router::new()
        .route("/api/rooms/:room/send-messages", post(history::send_messages))
        .route("/api/delete-message", post(admin::delete_message))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            sig::require_signed,
        ));

    Router::new()
        .route("/ws", get(ws_handler))
        .route("/api/rooms/:room/message-ids", get(history::message_ids))
        .route(
            "/api/rooms/:room/get-messages-by-id",
            post(history::messages_by_id),
        )
        .route("/api/messages", get(history::messages_window))
        .route("/api/attachments/:id", get(history::attachment_bytes))
        .merge(signed_routes)
        .merge(admin_routes)
        .layer(RequestBodyLimitLayer::new(state.max_body_bytes))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Merge the hub surface into an externally constructed router.
pub fn attach(base: Router, state: HubState) -> Router {
    base.merge(router(state))
}

/// Bind and run until shutdown.
pub async fn serve(bind: &str, app: Router) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("binding {bind}"))?;
    info!(bind = %listener.local_addr()?, "confab hub listening");
    axum::serve(listener, app)
        .await
        .context("HTTP server error")?;
    Ok(())
}
