// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Read endpoints for history sync, plus the signed bulk-send used by
//! clients to resend unacknowledged messages.
//!
//! - `GET  /api/rooms/{room}/message-ids?daysOfHistory=N`
//! - `POST /api/rooms/{room}/get-messages-by-id` (body-posted id list)
//! - `POST /api/rooms/{room}/send-messages` (signed)
//! - `GET  /api/messages?roomName=…&limit=…&offset=…`
//! - `GET  /api/attachments/{id}`

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::Response,
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use confab_proto::{identity, ChatMessage};
use confab_store::RoomKey;

use crate::error::HubError;
use crate::http::sig::SignerKey;
use crate::HubState;

const MS_PER_DAY: i64 = 86_400_000;
/// History windows shorter than this leak nothing useful and break the
/// client's retention math; clamp below.
const MIN_HISTORY_DAYS: i64 = 2;
const DEFAULT_PAGE_LIMIT: u32 = 100;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageIdsQuery {
    pub days_of_history: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageIdsResponse {
    pub message_ids: Vec<String>,
}

/// `GET /api/rooms/{room}/message-ids`. Absent `daysOfHistory` means
/// everything.
pub async fn message_ids(
    State(state): State<HubState>,
    Path(room): Path<String>,
    Query(query): Query<MessageIdsQuery>,
) -> Result<Json<MessageIdsResponse>, HubError> {
    let since = query
        .days_of_history
        .map(|days| now_ms() - days.max(MIN_HISTORY_DAYS) * MS_PER_DAY);
    let message_ids = state
        .store
        .message_ids_for_room(RoomKey::Name(&room), since)?;
    Ok(Json(MessageIdsResponse { message_ids }))
}

#[derive(Debug, Deserialize)]
pub struct IdListBody {
    pub ids: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct MessagesResponse {
    pub messages: Vec<ChatMessage>,
}

/// `POST /api/rooms/{room}/get-messages-by-id`. Body-posted so large id
/// lists do not hit URL length limits. Room-scoped: ids living elsewhere
/// are silently omitted.
pub async fn messages_by_id(
    State(state): State<HubState>,
    Path(room): Path<String>,
    Json(body): Json<IdListBody>,
) -> Result<Json<MessagesResponse>, HubError> {
    let messages = state.store.messages_by_ids(&body.ids, RoomKey::Name(&room))?;
    Ok(Json(MessagesResponse { messages }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryQuery {
    pub room_name: String,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

/// `GET /api/messages` — newest-first window with hydrated attachments.
pub async fn messages_window(
    State(state): State<HubState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<MessagesResponse>, HubError> {
    let messages = state.store.messages_for_room(
        &query.room_name,
        query.limit.unwrap_or(DEFAULT_PAGE_LIMIT),
        query.offset.unwrap_or(0),
    )?;
    Ok(Json(MessagesResponse { messages }))
}

#[derive(Debug, Deserialize)]
pub struct SendMessagesBody {
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessagesResponse {
    pub all_ok: bool,
}

/// `POST /api/rooms/{room}/send-messages` (signed).
///
/// The bulk counterpart of the broadcast pipeline's persistence step, used
/// by clients to resend messages that never got an ack. Each message's own
/// signature is verified and the block list applies — the HTTP envelope
/// signature only authenticates the request, not the content.
pub async fn send_messages(
    State(state): State<HubState>,
    Path(room): Path<String>,
    Extension(signer): Extension<SignerKey>,
    Json(body): Json<SendMessagesBody>,
) -> Result<Json<SendMessagesResponse>, HubError> {
    let mut accepted = Vec::with_capacity(body.messages.len());
    let mut all_ok = true;
    for msg in body.messages {
        if let Err(e) = identity::verify_chat_message(&msg) {
            warn!(%room, message = %msg.id, "bulk-send message rejected: {e}");
            all_ok = false;
            continue;
        }
        if msg
            .public_key
            .as_deref()
            .map(|key| state.store.is_blocked(key))
            .unwrap_or(false)
        {
            info!(%room, "bulk-send from blocked key suppressed");
            all_ok = false;
            continue;
        }
        accepted.push(msg);
    }
    let inserted = state.store.save_messages(&room, &accepted)?;
    info!(%room, signer = %signer.0, inserted, "bulk-send persisted");
    Ok(Json(SendMessagesResponse { all_ok }))
}

/// `GET /api/attachments/{id}` — raw bytes with correct `Content-Type`,
/// `Content-Length`, and an inline `Content-Disposition` naming the file.
pub async fn attachment_bytes(
    State(state): State<HubState>,
    Path(id): Path<i64>,
) -> Result<Response, HubError> {
    let record = state.store.attachment(id)?.ok_or(HubError::NotFound)?;
    let filename = record.name.replace('"', "'");
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, record.mime)
        .header(header::CONTENT_LENGTH, record.data.len())
        .header(
            header::CONTENT_DISPOSITION,
            format!("inline; filename=\"{filename}\""),
        )
        .body(Body::from(record.data))
        .map_err(|e| HubError::BadRequest(e.to_string()))
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
