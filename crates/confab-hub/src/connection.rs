// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Per-connection lifecycle: the WebSocket dispatch loop.
//!
//! Each accepted connection runs [`handle_socket`] as its own task. The loop
//! interleaves three things: inbound frames from the socket, outbound frames
//! queued by other tasks (fan-out, acks, forwards), and an optional idle
//! timeout.
//!
//! # Connection states
//!
//! `OPENING → JOINED → CLOSING → CLOSED`. A connection is `OPENING` until a
//! verified `join` registers it in a room; frames other than `join` received
//! before that are dropped with a log line. A connection that never joins
//! still closes cleanly.
//!
//! # Failure policy
//!
//! A decode error, missing field, or failed signature drops the frame — the
//! connection is never torn down for it, so a noisy client cannot DOS itself
//! off the room. The terminal cleanup step removes the participant and
//! notifies the room in exactly one place, regardless of how the connection
//! ended.

use std::sync::atomic::{AtomicU64, Ordering};

use axum::extract::ws::{Message, WebSocket};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use confab_proto::{identity, Frame, UserRef};

use crate::{broadcast, HubState};

/// Outbound queue depth per connection. A member that cannot drain this many
/// frames is dropped-to rather than allowed to stall the whole room.
const OUTBOUND_QUEUE: usize = 64;

static CONN_SEQ: AtomicU64 = AtomicU64::new(1);

/// The joined half of a connection's state.
#[derive(Debug, Clone)]
pub struct Joined {
    pub room: String,
    pub user: UserRef,
}

/// Mutable per-connection state shared with the frame handlers.
pub struct ConnHandle {
    pub id: u64,
    /// This connection's own outbound queue (acks, room-info replies).
    pub tx: mpsc::Sender<Frame>,
    pub joined: Option<Joined>,
}

/// Run one connection to completion: dispatch inbound frames, drain the
/// outbound queue, and clean up room membership at the end.
pub async fn handle_socket(mut socket: WebSocket, state: HubState) {
    let conn_id = CONN_SEQ.fetch_add(1, Ordering::Relaxed);
    let (tx, mut rx) = mpsc::channel::<Frame>(OUTBOUND_QUEUE);
    let mut conn = ConnHandle {
        id: conn_id,
        tx,
        joined: None,
    };
    info!(conn = conn_id, "connection opened");

    let mut deadline = state.idle_timeout.map(|d| tokio::time::Instant::now() + d);

    loop {
        tokio::select! {
            msg = socket.recv() => {
                if let Some(d) = state.idle_timeout {
                    deadline = Some(tokio::time::Instant::now() + d);
                }
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match Frame::decode(&text) {
                            Ok(frame) => dispatch(&state, &mut conn, frame).await,
                            Err(e) => warn!(conn = conn_id, "undecodable frame dropped: {e}"),
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // binary frames ignored
                    Some(Err(e)) => {
                        debug!(conn = conn_id, "socket recv error: {e}");
                        break;
                    }
                }
            }
            out = rx.recv() => {
                match out {
                    Some(frame) => {
                        if !send_frame(&mut socket, &frame).await {
                            break;
                        }
                    }
                    None => break,
                }
            }
            _ = async { tokio::time::sleep_until(deadline.unwrap_or_else(tokio::time::Instant::now)).await },
                if deadline.is_some() => {
                info!(conn = conn_id, "idle timeout; closing connection");
                break;
            }
        }
    }

    // CLOSING: single cleanup path for remote close, protocol error, and
    // server shutdown alike.
    if let Some(joined) = conn.joined.take() {
        leave_and_notify(&state, &joined, conn_id).await;
    }
    info!(conn = conn_id, "connection closed");
}

async fn send_frame(socket: &mut WebSocket, frame: &Frame) -> bool {
    match frame.encode() {
        Ok(json) => socket.send(Message::Text(json)).await.is_ok(),
        Err(e) => {
            warn!("outbound frame failed to encode: {e}");
            true
        }
    }
}

/// Route one inbound frame. Errors are translated to log lines here; nothing
/// propagates out of the dispatch loop.
pub async fn dispatch(state: &HubState, conn: &mut ConnHandle, frame: Frame) {
    match frame {
        Frame::Join {
            room,
            user,
            signature,
        } => handle_join(state, conn, room, user, &signature).await,

        Frame::Offer {
            id,
            offer,
            target,
            room,
            sender: _,
            public_key,
            signature,
        } => {
            // Offers carry participation identity; verify before forwarding.
            if let Err(e) = identity::verify_offer(&id, &room, &offer, &public_key, &signature) {
                warn!(conn = conn.id, "offer signature rejected: {e}");
                return;
            }
            let frame = |sender: UserRef, room: String| Frame::Offer {
                id,
                offer,
                target: target.clone(),
                room,
                sender: Some(sender),
                public_key,
                signature,
            };
            forward_signal(state, conn, &target, frame).await;
        }

        Frame::Answer {
            id,
            answer,
            target,
            room: _,
            sender: _,
        } => {
            // Answers and ICE pass through unsigned: authenticity is settled
            // by the DTLS handshake the peers perform over the data channel.
            let frame = |sender: UserRef, room: String| Frame::Answer {
                id,
                answer,
                target: target.clone(),
                room,
                sender: Some(sender),
            };
            forward_signal(state, conn, &target, frame).await;
        }

        Frame::IceCandidate {
            id,
            candidate,
            target,
            room: _,
            sender: _,
        } => {
            let frame = |sender: UserRef, room: String| Frame::IceCandidate {
                id,
                candidate,
                target: target.clone(),
                room,
                sender: Some(sender),
            };
            forward_signal(state, conn, &target, frame).await;
        }

        Frame::Broadcast {
            room: _,
            message,
            sender: _,
        } => broadcast::process(state, conn, message).await,

        // Server-originated frame types have no business arriving inbound.
        Frame::RoomInfo { .. } | Frame::UserLeft { .. } | Frame::Ack { .. } | Frame::DeleteMsg { .. } => {
            debug!(conn = conn.id, kind = frame.kind(), "server-originated frame from client; dropped");
        }
    }
}

async fn handle_join(
    state: &HubState,
    conn: &mut ConnHandle,
    room: String,
    user: UserRef,
    signature: &str,
) {
    if let Err(e) = identity::verify_join(&room, &user, signature) {
        warn!(conn = conn.id, %room, "join signature rejected: {e}");
        return;
    }

    // A connection occupies one room at a time; joining another room first
    // leaves the old one (with the usual user-left fan-out).
    if let Some(previous) = conn.joined.take() {
        leave_and_notify(state, &previous, conn.id).await;
    }

    let others = state
        .registry
        .join(&room, user.clone(), conn.id, conn.tx.clone());
    info!(conn = conn.id, %room, user = %user.name, "participant joined");
    conn.joined = Some(Joined {
        room: room.clone(),
        user,
    });

    let reply = Frame::RoomInfo {
        room,
        participants: others,
    };
    if conn.tx.try_send(reply).is_err() {
        warn!(conn = conn.id, "room-info reply dropped: outbound queue full");
    }
}

/// Forward a signaling frame to its target within the *sender's* room.
///
/// The target must resolve inside the room this connection joined — the
/// frame's own `room` field is client-claimed and is used only for signature
/// coverage, never for routing. Missing targets are dropped silently.
async fn forward_signal<F>(state: &HubState, conn: &ConnHandle, target: &UserRef, build: F)
where
    F: FnOnce(UserRef, String) -> Frame,
{
    let Some(joined) = &conn.joined else {
        debug!(conn = conn.id, "signaling frame before join; dropped");
        return;
    };
    let Some(member) = state.registry.target(&joined.room, &target.public_key) else {
        debug!(
            conn = conn.id,
            room = %joined.room,
            "signaling target not in room; dropped"
        );
        return;
    };
    let frame = build(joined.user.clone(), joined.room.clone());
    if member.tx.try_send(frame).is_err() {
        warn!(
            conn = conn.id,
            peer = %member.user.name,
            "target outbound queue full; signaling frame dropped"
        );
    }
}

/// Terminal cleanup: deregister and tell the room. Shared by connection
/// close and room switches.
pub async fn leave_and_notify(state: &HubState, joined: &Joined, conn_id: u64) {
    let Some((left, remaining)) = state
        .registry
        .leave(&joined.room, &joined.user.public_key, conn_id)
    else {
        return;
    };
    info!(room = %joined.room, user = %left.name, "participant left");
    let frame = Frame::UserLeft {
        room: joined.room.clone(),
        user: left,
    };
    for member in remaining {
        let _ = member.tx.try_send(frame.clone());
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────
