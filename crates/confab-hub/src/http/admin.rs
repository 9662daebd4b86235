// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Admin mutators and the owner-or-admin message delete.
//!
//! Everything under `/api/admin/*` is layered behind
//! [`crate::http::sig::require_admin`]; the handlers here can assume the
//! request was signed by the configured admin key. `delete-message` is the
//! exception: it is merely signed, and the store decides owner-or-admin.

use axum::{
    extract::{Path, State},
    Extension, Json,
};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use confab_proto::{ChatMessage, Frame};
use confab_store::{RecentAttachment, RoomOverview};

use crate::error::HubError;
use crate::http::sig::SignerKey;
use crate::HubState;

const DEFAULT_ATTACHMENT_LIMIT: u32 = 100;

/// The room repopulated by `create-test-data`.
const TEST_ROOM: &str = "test";
const TEST_DAYS: i64 = 7;
const TEST_MESSAGES_PER_DAY: usize = 10;
const MS_PER_DAY: i64 = 86_400_000;

#[derive(Debug, Serialize)]
pub struct RoomInfoResponse {
    pub rooms: Vec<RoomOverview>,
}

/// `POST /api/admin/get-room-info` — `(name, messageCount)` sorted by name.
pub async fn get_room_info(
    State(state): State<HubState>,
) -> Result<Json<RoomInfoResponse>, HubError> {
    Ok(Json(RoomInfoResponse {
        rooms: state.store.room_info()?,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomBody {
    pub room_name: String,
}

#[derive(Debug, Serialize)]
pub struct OkResponse {
    pub ok: bool,
}

/// `POST /api/admin/delete-room` — transactional; idempotent (a second call
/// reports `ok: false` without error).
pub async fn delete_room(
    State(state): State<HubState>,
    Json(body): Json<RoomBody>,
) -> Result<Json<OkResponse>, HubError> {
    let ok = state.store.delete_room(&body.room_name)?;
    info!(room = %body.room_name, ok, "admin deleted room");
    Ok(Json(OkResponse { ok }))
}

#[derive(Debug, Deserialize)]
pub struct AttachmentLimitBody {
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct RecentAttachmentsResponse {
    pub attachments: Vec<RecentAttachment>,
}

/// `POST /api/admin/get-recent-attachments` — newest-first by parent
/// message timestamp.
pub async fn get_recent_attachments(
    State(state): State<HubState>,
    Json(body): Json<AttachmentLimitBody>,
) -> Result<Json<RecentAttachmentsResponse>, HubError> {
    let attachments = state
        .store
        .recent_attachments(body.limit.unwrap_or(DEFAULT_ATTACHMENT_LIMIT))?;
    Ok(Json(RecentAttachmentsResponse { attachments }))
}

/// `POST /api/admin/attachments/{id}/delete` — idempotent single-row delete.
pub async fn delete_attachment(
    State(state): State<HubState>,
    Path(id): Path<i64>,
) -> Result<Json<OkResponse>, HubError> {
    let ok = state.store.delete_attachment(id)?;
    info!(attachment = id, ok, "admin deleted attachment");
    Ok(Json(OkResponse { ok }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockUserBody {
    pub public_key: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockUserResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub messages_removed: usize,
}

/// `POST /api/admin/block-user` — remove all of the key's content, then
/// block it. The block is applied even if the content sweep fails; the
/// sweep error is surfaced in the response.
pub async fn block_user(
    State(state): State<HubState>,
    Json(body): Json<BlockUserBody>,
) -> Result<Json<BlockUserResponse>, HubError> {
    let swept = state.store.delete_user_content(&body.public_key);
    state.store.block_user(&body.public_key)?;
    match swept {
        Ok(messages_removed) => {
            info!(messages_removed, "admin blocked key and removed its content");
            Ok(Json(BlockUserResponse {
                ok: true,
                error: None,
                messages_removed,
            }))
        }
        Err(e) => {
            warn!("key blocked but content sweep failed: {e}");
            Ok(Json(BlockUserResponse {
                ok: false,
                error: Some(format!("content sweep failed: {e}")),
                messages_removed: 0,
            }))
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TestDataResponse {
    pub ok: bool,
    pub inserted: usize,
}

/// `POST /api/admin/create-test-data` — wipe the well-known `test` room and
/// repopulate it with a week of messages: 10 per day with random intra-day
/// offsets. The content itself is unsigned; the gate is the admin key.
pub async fn create_test_data(
    State(state): State<HubState>,
) -> Result<Json<TestDataResponse>, HubError> {
    state.store.wipe_room(TEST_ROOM)?;
    let now = chrono::Utc::now().timestamp_millis();
    let mut rng = rand::thread_rng();
    let mut batch = Vec::with_capacity(TEST_DAYS as usize * TEST_MESSAGES_PER_DAY);
    for day in 0..TEST_DAYS {
        for n in 0..TEST_MESSAGES_PER_DAY {
            let offset: i64 = rng.gen_range(0..MS_PER_DAY);
            batch.push(ChatMessage {
                id: format!("test-{day}-{n}-{:08x}", rng.gen::<u32>()),
                timestamp: now - day * MS_PER_DAY - offset,
                sender: format!("Test User {}", n % 3 + 1),
                content: format!("Test message {n} from {day} day(s) ago"),
                public_key: None,
                signature: None,
                state: None,
                attachments: Vec::new(),
            });
        }
    }
    let inserted = state.store.save_messages(TEST_ROOM, &batch)?;
    info!(inserted, "test data repopulated");
    Ok(Json(TestDataResponse { ok: true, inserted }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteMessageBody {
    pub message_id: String,
    pub room_name: String,
}

/// `POST /api/delete-message` (signed, not admin-gated): the store refuses
/// unless the signer owns the message or is the admin. On success, live
/// members of the room are told to drop it — except the initiator, whose
/// own cache already knows.
pub async fn delete_message(
    State(state): State<HubState>,
    Extension(signer): Extension<SignerKey>,
    Json(body): Json<DeleteMessageBody>,
) -> Result<Json<OkResponse>, HubError> {
    let ok = state
        .store
        .delete_message(&body.message_id, &signer.0, state.admin_key.as_deref())?;
    if ok {
        info!(message = %body.message_id, room = %body.room_name, "message deleted");
        let frame = Frame::DeleteMsg {
            room: body.room_name.clone(),
            message_id: body.message_id.clone(),
        };
        for member in state.registry.members(&body.room_name) {
            if member.user.public_key == signer.0 {
                continue;
            }
            let _ = member.tx.try_send(frame.clone());
        }
    }
    Ok(Json(OkResponse { ok }))
}
