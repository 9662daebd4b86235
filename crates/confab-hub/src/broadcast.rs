// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! The broadcast pipeline: verify → block-filter → persist → fan out.
//!
//! Within a single originating connection broadcasts run in arrival order —
//! the dispatch loop awaits each [`process`] call before decoding the next
//! frame. Across connections the only ordering is the store's per-insert
//! serialization; clients sort by the embedded timestamp on display.
//!
//! The originator receives an `ack` carrying the message id; everyone else
//! in the room receives the full frame with the server-observed `sender`.
//! Absence of an ack is the client's signal that the hub did not accept the
//! message — which is exactly what happens on a bad signature or a blocked
//! key, both of which drop silently here.

use tracing::{debug, error, info, warn};

use confab_proto::{identity, ChatMessage, Frame, MessageState};

use crate::connection::ConnHandle;
use crate::HubState;

/// Handle one `broadcast` frame from a connection in `JOINED` state.
pub async fn process(state: &HubState, conn: &ConnHandle, message: ChatMessage) {
    let Some(joined) = &conn.joined else {
        debug!(conn = conn.id, "broadcast before join; dropped");
        return;
    };

    if let Err(e) = identity::verify_chat_message(&message) {
        warn!(conn = conn.id, message = %message.id, "broadcast rejected: {e}");
        return;
    }
    // verify_chat_message fails without an embedded key, so this cannot be
    // empty past this point; the key is required to persist.
    let sender_key = message.public_key.clone().unwrap_or_default();

    // Blocked senders are dropped without any response: the missing ack must
    // look identical to any other persistence failure so block-list
    // membership is not leaked.
    if state.store.is_blocked(&sender_key) {
        info!(room = %joined.room, "broadcast from blocked key suppressed");
        return;
    }

    let room_id = match state.store.get_or_create_room(&joined.room) {
        Ok(id) => id,
        Err(e) => {
            error!(room = %joined.room, "room resolution failed: {e}");
            return;
        }
    };
    // A duplicate id returns Ok(false): the existing row wins and the
    // pipeline continues as a success (peers dedup by id).
    if let Err(e) = state.store.persist_message(room_id, &message) {
        error!(room = %joined.room, message = %message.id, "persist failed: {e}");
        return;
    }

    let mut out = message;
    out.state = Some(MessageState::Saved);
    let ack = Frame::Ack { id: out.id.clone() };
    let frame = Frame::Broadcast {
        room: joined.room.clone(),
        message: out,
        sender: Some(joined.user.clone()),
    };

    if conn.tx.try_send(ack).is_err() {
        warn!(conn = conn.id, "originator queue full; ack dropped");
    }
    for member in state.registry.members(&joined.room) {
        if member.conn_id == conn.id {
            continue;
        }
        if member.tx.try_send(frame.clone()).is_err() {
            warn!(
                room = %joined.room,
                peer = %member.user.name,
                "member queue full; broadcast dropped for this peer"
            );
        }
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────
