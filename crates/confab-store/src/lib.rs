// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! SQLite persistence for the confab hub.
//!
//! Four tables: `rooms`, `messages`, `attachments`, `blocked_keys`.
//! Attachment bytes live in the database as blobs — no filesystem
//! dependency. Every multi-row lifecycle operation (message + attachments,
//! room deletion, user content removal) runs in a single transaction, and
//! attachment rows are deleted explicitly on every delete path rather than
//! relying on SQL-level cascades.

mod error;
mod store;

pub use error::StoreError;
pub use store::{AttachmentRecord, RecentAttachment, RoomKey, RoomOverview, Store};
