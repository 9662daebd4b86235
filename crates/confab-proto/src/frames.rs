// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Control-plane frame envelope (JSON over the live WebSocket connection).
//!
//! Every frame carries a `type` discriminator. Client-originated frames that
//! matter for integrity additionally carry a detached `signature` and, where
//! the signer is not implied by context, the signer's `publicKey`.
//!
//! # Typical relay-mode flow
//!
//! ```text
//! Client A                          Hub                          Client B
//!    │                               │                               │
//!    │── join {room, user, sig} ────►│                               │
//!    │◄─ room-info {participants} ───│                               │
//!    │                               │◄──── join {room, user, sig} ──│
//!    │                               │──── room-info {incl. A} ─────►│
//!    │── broadcast {message} ───────►│  verify, block-check, persist │
//!    │◄─ ack {id} ───────────────────│──── broadcast {message} ─────►│
//!    │                               │                               │
//!    │── offer {target: B, sig} ────►│  forward, annotate sender     │
//!    │                               │──── offer {sender: A} ───────►│
//! ```
//!
//! Signaling frames (`offer`/`answer`/`ice-candidate`) are forwarded to one
//! specific peer; `broadcast` fans out to the whole room. Server-originated
//! frames (`room-info`, `user-left`, `ack`, `delete-msg`) are unsigned — the
//! connection itself is the trust boundary.

use serde::{Deserialize, Serialize};

use crate::error::ProtoError;

// ── Frame envelope ────────────────────────────────────────────────────────────

/// One frame on the live connection, discriminated by `type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Frame {
    /// Client → hub: enter a room under a signed identity.
    #[serde(rename_all = "camelCase")]
    Join {
        room: String,
        user: UserRef,
        signature: String,
    },

    /// Hub → joining client: the room's current other participants.
    #[serde(rename_all = "camelCase")]
    RoomInfo {
        room: String,
        participants: Vec<UserRef>,
    },

    /// Hub → remaining room members: a participant's connection closed.
    #[serde(rename_all = "camelCase")]
    UserLeft { room: String, user: UserRef },

    /// WebRTC offer, forwarded verbatim to `target` within the sender's room.
    /// `sender` is rewritten by the hub before forwarding.
    #[serde(rename_all = "camelCase")]
    Offer {
        id: String,
        offer: serde_json::Value,
        target: UserRef,
        room: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender: Option<UserRef>,
        public_key: String,
        signature: String,
    },

    /// WebRTC answer. Unsigned: authenticity is settled by the DTLS
    /// handshake the browsers perform once the channel is up.
    #[serde(rename_all = "camelCase")]
    Answer {
        id: String,
        answer: serde_json::Value,
        target: UserRef,
        room: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender: Option<UserRef>,
    },

    /// Trickle ICE candidate. Unsigned, same rationale as `answer`.
    #[serde(rename_all = "camelCase")]
    IceCandidate {
        id: String,
        candidate: serde_json::Value,
        target: UserRef,
        room: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender: Option<UserRef>,
    },

    /// Client → hub: a chat message for the whole room (relay mode).
    /// Hub → other members: the same frame with `sender` rewritten.
    #[serde(rename_all = "camelCase")]
    Broadcast {
        room: String,
        message: ChatMessage,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender: Option<UserRef>,
    },

    /// Hub → originator: the broadcast with this `id` was persisted.
    #[serde(rename_all = "camelCase")]
    Ack { id: String },

    /// Hub → room members: a message was deleted upstream; drop it from
    /// local caches.
    #[serde(rename_all = "camelCase")]
    DeleteMsg { room: String, message_id: String },
}

impl Frame {
    /// The single decode entry point for inbound frames.
    pub fn decode(text: &str) -> Result<Frame, ProtoError> {
        serde_json::from_str(text).map_err(|e| ProtoError::MalformedFrame(e.to_string()))
    }

    pub fn encode(&self) -> Result<String, ProtoError> {
        serde_json::to_string(self).map_err(|e| ProtoError::MalformedFrame(e.to_string()))
    }

    /// Frame type tag as it appears on the wire, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Join { .. } => "join",
            Frame::RoomInfo { .. } => "room-info",
            Frame::UserLeft { .. } => "user-left",
            Frame::Offer { .. } => "offer",
            Frame::Answer { .. } => "answer",
            Frame::IceCandidate { .. } => "ice-candidate",
            Frame::Broadcast { .. } => "broadcast",
            Frame::Ack { .. } => "ack",
            Frame::DeleteMsg { .. } => "delete-msg",
        }
    }
}

// ── Supporting types ──────────────────────────────────────────────────────────

/// A (displayName, publicKey) identity reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRef {
    pub name: String,
    pub public_key: String,
}

/// Delivery state of a chat message as tracked by clients.
///
/// `SAVED` means server-acknowledged; a persisted row is `SAVED` by
/// definition. `SENT` is live-sent-but-unacknowledged, `FAILED` means the
/// live send itself reported failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageState {
    Sent,
    Saved,
    Failed,
}

impl MessageState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageState::Sent => "SENT",
            MessageState::Saved => "SAVED",
            MessageState::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SENT" => Some(MessageState::Sent),
            "SAVED" => Some(MessageState::Saved),
            "FAILED" => Some(MessageState::Failed),
            _ => None,
        }
    }
}

/// A chat message as it appears on the wire and in the history API.
///
/// `id` is a client-generated short opaque id, globally unique across rooms.
/// `timestamp` is the client clock in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub timestamp: i64,
    pub sender: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<MessageState>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<AttachmentPayload>,
}

/// An attachment as carried on the wire: `data` is a data URL
/// (`data:<mime>;base64,<payload>`). The hub decodes it to raw bytes for
/// storage and re-encodes on read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentPayload {
    pub name: String,
    #[serde(rename = "type")]
    pub mime: String,
    pub size: i64,
    pub data: String,
}

// ── Unit tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn user(name: &str) -> UserRef {
        UserRef {
            name: name.to_string(),
            public_key: format!("{name}-key"),
        }
    }

    #[test]
    fn join_tag_and_fields_are_wire_shaped() {
        let frame = Frame::Join {
            room: "r1".to_string(),
            user: user("alice"),
            signature: "sig".to_string(),
        };
        let json: serde_json::Value = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "join");
        assert_eq!(json["user"]["publicKey"], "alice-key");
    }

    #[test]
    fn ice_candidate_tag_is_kebab_case() {
        let frame = Frame::IceCandidate {
            id: "c1".to_string(),
            candidate: serde_json::json!({"candidate": "udp ..."}),
            target: user("bob"),
            room: "r1".to_string(),
            sender: None,
        };
        let json = frame.encode().unwrap();
        assert!(json.contains("\"type\":\"ice-candidate\""));
        // Absent sender must not serialize as null.
        assert!(!json.contains("sender"));
    }

    #[test]
    fn delete_msg_round_trip() {
        let text = r#"{"type":"delete-msg","room":"r1","messageId":"m9"}"#;
        let frame = Frame::decode(text).unwrap();
        match frame {
            Frame::DeleteMsg { room, message_id } => {
                assert_eq!(room, "r1");
                assert_eq!(message_id, "m9");
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn broadcast_json_round_trip() {
        let frame = Frame::Broadcast {
            room: "r1".to_string(),
            message: ChatMessage {
                id: "m1".to_string(),
                timestamp: 1000,
                sender: "alice".to_string(),
                content: "hi".to_string(),
                public_key: Some("pk".to_string()),
                signature: Some("sig".to_string()),
                state: None,
                attachments: Vec::new(),
            },
            sender: None,
        };
        let back = Frame::decode(&frame.encode().unwrap()).unwrap();
        match back {
            Frame::Broadcast { message, .. } => {
                assert_eq!(message.id, "m1");
                assert_eq!(message.content, "hi");
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn message_state_serializes_uppercase() {
        assert_eq!(
            serde_json::to_string(&MessageState::Saved).unwrap(),
            "\"SAVED\""
        );
        assert_eq!(MessageState::parse("FAILED"), Some(MessageState::Failed));
        assert_eq!(MessageState::parse("saved"), None);
    }

    #[test]
    fn attachment_mime_field_is_named_type() {
        let a = AttachmentPayload {
            name: "cat.png".to_string(),
            mime: "image/png".to_string(),
            size: 4,
            data: "data:image/png;base64,AAAA".to_string(),
        };
        let json: serde_json::Value = serde_json::to_value(&a).unwrap();
        assert_eq!(json["type"], "image/png");
    }

    #[test]
    fn unknown_frame_type_is_a_decode_error() {
        let err = Frame::decode(r#"{"type":"bogus"}"#).unwrap_err();
        assert!(matches!(err, ProtoError::MalformedFrame(_)));
    }

    #[test]
    fn missing_required_field_is_a_decode_error() {
        // join without a signature must not decode.
        let err = Frame::decode(r#"{"type":"join","room":"r1","user":{"name":"a","publicKey":"k"}}"#)
            .unwrap_err();
        assert!(matches!(err, ProtoError::MalformedFrame(_)));
    }
}
