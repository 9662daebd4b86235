// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Canonical byte serialization for signable variants.
//!
//! Both signing and verification run over these byte strings, so the field
//! list and order per variant is part of the wire contract and must be
//! identical on both sides.
//!
//! # Encoding
//!
//! Each included field is written as `<len>:<bytes>` (decimal length, UTF-8
//! bytes) and the fields are concatenated. The length prefix removes
//! field-boundary ambiguity: `("ab", "c")` and `("a", "bc")` canonicalize
//! differently.
//!
//! The `signature` field itself and transient routing fields (`sender`,
//! `target`, receive-side annotations) are never included. Attachment bytes
//! are excluded from the chat-message canonicalization: the hub re-encodes
//! attachment data on read, which would invalidate any signature over it.
//! Numeric timestamps are rendered as decimal without padding.

use crate::frames::{ChatMessage, UserRef};

fn field(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(bytes.len().to_string().as_bytes());
    buf.push(b':');
    buf.extend_from_slice(bytes);
}

/// `ChatMessage`: `id`, `timestamp`, `sender` (display name), `content`,
/// `publicKey` (empty when absent).
pub fn chat_message(msg: &ChatMessage) -> Vec<u8> {
    let mut buf = Vec::new();
    field(&mut buf, msg.id.as_bytes());
    field(&mut buf, msg.timestamp.to_string().as_bytes());
    field(&mut buf, msg.sender.as_bytes());
    field(&mut buf, msg.content.as_bytes());
    field(
        &mut buf,
        msg.public_key.as_deref().unwrap_or_default().as_bytes(),
    );
    buf
}

/// `join`: `room`, `user.name`, `user.publicKey`.
pub fn join(room: &str, user: &UserRef) -> Vec<u8> {
    let mut buf = Vec::new();
    field(&mut buf, room.as_bytes());
    field(&mut buf, user.name.as_bytes());
    field(&mut buf, user.public_key.as_bytes());
    buf
}

/// `offer`: `id`, `room`, the offer payload as compact JSON, `publicKey`.
///
/// `serde_json` renders object keys in sorted order for a decoded `Value`,
/// so the same wire JSON canonicalizes identically on both sides.
pub fn offer(id: &str, room: &str, offer: &serde_json::Value, public_key: &str) -> Vec<u8> {
    let mut buf = Vec::new();
    field(&mut buf, id.as_bytes());
    field(&mut buf, room.as_bytes());
    field(&mut buf, offer.to_string().as_bytes());
    field(&mut buf, public_key.as_bytes());
    buf
}

/// Signed HTTP request: method, path, raw body bytes.
pub fn http_request(method: &str, path: &str, body: &[u8]) -> Vec<u8> {
    let mut buf = Vec::new();
    field(&mut buf, method.as_bytes());
    field(&mut buf, path.as_bytes());
    field(&mut buf, body);
    buf
}

// ── Unit tests ────────────────────────────────────────────────────────────────
