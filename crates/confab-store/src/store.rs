// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! The `Store` — transactional persistence of rooms, messages, attachments,
//! and the block list.
//!
//! # Concurrency model
//!
//! A single `rusqlite::Connection` behind a mutex. Store calls are brief
//! blocking calls made inline from the hub's per-connection dispatch tasks.
//! The block list is additionally cached in memory; the cache is refreshed
//! when a block mutation commits, so `is_blocked` never touches SQL on the
//! broadcast hot path.
//!
//! # Invariants
//!
//! - Message ids are globally unique; a duplicate insert is a silent no-op
//!   and the pre-existing row wins.
//! - Every attachment row references an existing message; all delete paths
//!   remove attachments explicitly before their messages.
//! - Equal timestamps order by message id so paging is stable.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, RwLock};

use rusqlite::{params, types::Value, Connection, OptionalExtension, Transaction};
use serde::Serialize;
use tracing::debug;

use confab_proto::{datauri, AttachmentPayload, ChatMessage, MessageState};

use crate::error::StoreError;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS rooms (
    id   INTEGER PRIMARY KEY,
    name TEXT UNIQUE NOT NULL
);
CREATE TABLE IF NOT EXISTS messages (
    id         TEXT PRIMARY KEY,
    room_id    INTEGER NOT NULL REFERENCES rooms(id),
    timestamp  INTEGER NOT NULL,
    sender     TEXT NOT NULL,
    content    TEXT,
    public_key TEXT,
    signature  TEXT,
    state      TEXT
);
CREATE INDEX IF NOT EXISTS idx_messages_room_id   ON messages(room_id);
CREATE INDEX IF NOT EXISTS idx_messages_timestamp ON messages(timestamp);
CREATE TABLE IF NOT EXISTS attachments (
    id         INTEGER PRIMARY KEY,
    message_id TEXT NOT NULL REFERENCES messages(id),
    name       TEXT NOT NULL,
    type       TEXT NOT NULL,
    size       INTEGER NOT NULL,
    data       BLOB
);
CREATE INDEX IF NOT EXISTS idx_attachments_message_id ON attachments(message_id);
CREATE TABLE IF NOT EXISTS blocked_keys (
    pub_key TEXT PRIMARY KEY
);
";

/// Room lookup key: numeric id or case-sensitive name.
#[derive(Debug, Clone, Copy)]
pub enum RoomKey<'a> {
    Id(i64),
    Name(&'a str),
}

/// A stored attachment with its raw bytes, for the byte-serving endpoint.
#[derive(Debug, Clone)]
pub struct AttachmentRecord {
    pub id: i64,
    pub message_id: String,
    pub name: String,
    pub mime: String,
    pub size: i64,
    pub data: Vec<u8>,
}

/// Attachment overview row for the admin listing (no bytes).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentAttachment {
    pub id: i64,
    pub message_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub mime: String,
    pub size: i64,
    pub room: String,
    pub sender: String,
    pub public_key: Option<String>,
    pub timestamp: i64,
}

/// Per-room overview for the admin room listing.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomOverview {
    pub name: String,
    pub message_count: i64,
}

pub struct Store {
    conn: Mutex<Connection>,
    blocked: RwLock<HashSet<String>>,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Self::from_connection(Connection::open(path)?)
    }

    /// In-memory database, used by tests and the `create-test-data` smoke
    /// path in ephemeral deployments.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.pragma_update(None, "foreign_keys", true)?;
        conn.execute_batch(SCHEMA)?;
        let blocked = {
            let mut stmt = conn.prepare("SELECT pub_key FROM blocked_keys")?;
            let keys = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<Result<HashSet<_>, _>>()?;
            keys
        };
        Ok(Store {
            conn: Mutex::new(conn),
            blocked: RwLock::new(blocked),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ── Rooms ─────────────────────────────────────────────────────────────────

    /// Idempotent room creation. Concurrent creation cannot produce duplicate
    /// rows: the unique constraint absorbs the race and the follow-up select
    /// returns whichever row won.
    pub fn get_or_create_room(&self, name: &str) -> Result<i64, StoreError> {
        let conn = self.conn();
        conn.execute("INSERT OR IGNORE INTO rooms (name) VALUES (?1)", [name])?;
        let id = conn.query_row("SELECT id FROM rooms WHERE name = ?1", [name], |row| {
            row.get(0)
        })?;
        Ok(id)
    }

    fn resolve_room(conn: &Connection, key: RoomKey<'_>) -> Result<Option<i64>, StoreError> {
        match key {
            RoomKey::Id(id) => Ok(Some(id)),
            RoomKey::Name(name) => Ok(conn
                .query_row("SELECT id FROM rooms WHERE name = ?1", [name], |row| {
                    row.get(0)
                })
                .optional()?),
        }
    }

    /// `(name, messageCount)` per room, sorted by name.
    pub fn room_info(&self) -> Result<Vec<RoomOverview>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT r.name, COUNT(m.id) FROM rooms r \
             LEFT JOIN messages m ON m.room_id = r.id \
             GROUP BY r.id ORDER BY r.name",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(RoomOverview {
                    name: row.get(0)?,
                    message_count: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ── Messages ──────────────────────────────────────────────────────────────

    /// Insert a message and all its attachments in one transaction.
    ///
    /// The stored state is normalized to `SAVED` regardless of what the
    /// client sent, so the record handed back to fan-out carries the
    /// authoritative state. A duplicate id is a silent no-op; returns
    /// whether a row was actually inserted.
    pub fn persist_message(&self, room_id: i64, msg: &ChatMessage) -> Result<bool, StoreError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let inserted = persist_in_tx(&tx, room_id, msg)?;
        tx.commit()?;
        Ok(inserted)
    }

    /// Ensure the room exists, then persist each message. The entire batch
    /// is one transaction. Returns the count actually inserted.
    pub fn save_messages(&self, room: &str, msgs: &[ChatMessage]) -> Result<usize, StoreError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute("INSERT OR IGNORE INTO rooms (name) VALUES (?1)", [room])?;
        let room_id: i64 =
            tx.query_row("SELECT id FROM rooms WHERE name = ?1", [room], |row| {
                row.get(0)
            })?;
        let mut inserted = 0;
        for msg in msgs {
            if persist_in_tx(&tx, room_id, msg)? {
                inserted += 1;
            }
        }
        tx.commit()?;
        debug!(%room, inserted, total = msgs.len(), "saved message batch");
        Ok(inserted)
    }

    /// Newest-first message window with hydrated attachments.
    pub fn messages_for_room(
        &self,
        room: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<ChatMessage>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT m.id, m.timestamp, m.sender, m.content, m.public_key, m.signature, m.state \
             FROM messages m JOIN rooms r ON r.id = m.room_id \
             WHERE r.name = ?1 \
             ORDER BY m.timestamp DESC, m.id DESC LIMIT ?2 OFFSET ?3",
        )?;
        let mut messages = stmt
            .query_map(params![room, limit, offset], row_to_message)?
            .collect::<Result<Vec<_>, _>>()?;
        for msg in &mut messages {
            msg.attachments = attachments_for_message(&conn, &msg.id)?;
        }
        Ok(messages)
    }

    /// Ids only — the cheap cache-diff primitive. `since` is an inclusive
    /// millisecond lower bound. Unknown rooms yield an empty list.
    pub fn message_ids_for_room(
        &self,
        room: RoomKey<'_>,
        since: Option<i64>,
    ) -> Result<Vec<String>, StoreError> {
        let conn = self.conn();
        let Some(room_id) = Self::resolve_room(&conn, room)? else {
            return Ok(Vec::new());
        };
        let mut ids = Vec::new();
        match since {
            Some(ts) => {
                let mut stmt = conn.prepare(
                    "SELECT id FROM messages WHERE room_id = ?1 AND timestamp >= ?2 \
                     ORDER BY timestamp, id",
                )?;
                let rows = stmt.query_map(params![room_id, ts], |row| row.get::<_, String>(0))?;
                for row in rows {
                    ids.push(row?);
                }
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT id FROM messages WHERE room_id = ?1 ORDER BY timestamp, id",
                )?;
                let rows = stmt.query_map([room_id], |row| row.get::<_, String>(0))?;
                for row in rows {
                    ids.push(row?);
                }
            }
        }
        Ok(ids)
    }

    /// Room-scoped retrieval by id list; ids that belong to other rooms are
    /// silently omitted. A single join recovers messages and attachments in
    /// one round trip.
    pub fn messages_by_ids(
        &self,
        ids: &[String],
        room: RoomKey<'_>,
    ) -> Result<Vec<ChatMessage>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn();
        let Some(room_id) = Self::resolve_room(&conn, room)? else {
            return Ok(Vec::new());
        };
        let placeholders = vec!["?"; ids.len()].join(",");
        let sql = format!(
            "SELECT m.id, m.timestamp, m.sender, m.content, m.public_key, m.signature, m.state, \
                    a.name, a.type, a.data \
             FROM messages m LEFT JOIN attachments a ON a.message_id = m.id \
             WHERE m.room_id = ? AND m.id IN ({placeholders}) \
             ORDER BY m.timestamp, m.id, a.id"
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut bind: Vec<Value> = Vec::with_capacity(ids.len() + 1);
        bind.push(Value::Integer(room_id));
        bind.extend(ids.iter().map(|id| Value::Text(id.clone())));

        let mut messages: Vec<ChatMessage> = Vec::new();
        let mut rows = stmt.query(rusqlite::params_from_iter(bind))?;
        while let Some(row) = rows.next()? {
            let id: String = row.get(0)?;
            if messages.last().map(|m| m.id != id).unwrap_or(true) {
                messages.push(row_to_message(row)?);
            }
            let name: Option<String> = row.get(7)?;
            if let (Some(name), Some(msg)) = (name, messages.last_mut()) {
                let mime: String = row.get(8)?;
                let data: Vec<u8> = row.get(9)?;
                msg.attachments.push(AttachmentPayload {
                    name,
                    size: data.len() as i64,
                    data: datauri::encode(&mime, &data),
                    mime,
                });
            }
        }
        Ok(messages)
    }

    /// Delete a message and its attachments in one transaction. Refuses
    /// unless `requester` matches the stored key or the admin key. Returns
    /// whether a row was removed.
    pub fn delete_message(
        &self,
        id: &str,
        requester: &str,
        admin_key: Option<&str>,
    ) -> Result<bool, StoreError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let owner: Option<Option<String>> = tx
            .query_row("SELECT public_key FROM messages WHERE id = ?1", [id], |row| {
                row.get(0)
            })
            .optional()?;
        let Some(owner) = owner else {
            return Ok(false);
        };
        let is_owner = owner.as_deref() == Some(requester);
        let is_admin = admin_key == Some(requester);
        if !is_owner && !is_admin {
            debug!(message = %id, "delete refused: requester is neither owner nor admin");
            return Ok(false);
        }
        tx.execute("DELETE FROM attachments WHERE message_id = ?1", [id])?;
        let removed = tx.execute("DELETE FROM messages WHERE id = ?1", [id])?;
        tx.commit()?;
        Ok(removed > 0)
    }

    // ── Room lifecycle ────────────────────────────────────────────────────────

    /// Delete all attachments, all messages, then the room row, in a single
    /// transaction. Idempotent: a second call returns `false` without error.
    pub fn delete_room(&self, name: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        wipe_in_tx(&tx, name)?;
        let removed = tx.execute("DELETE FROM rooms WHERE name = ?1", [name])?;
        tx.commit()?;
        Ok(removed > 0)
    }

    /// As [`Store::delete_room`] but the room row survives.
    pub fn wipe_room(&self, name: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let existed = wipe_in_tx(&tx, name)?;
        tx.commit()?;
        Ok(existed)
    }

    // ── Attachments ───────────────────────────────────────────────────────────

    pub fn attachment(&self, id: i64) -> Result<Option<AttachmentRecord>, StoreError> {
        let conn = self.conn();
        let record = conn
            .query_row(
                "SELECT id, message_id, name, type, size, data FROM attachments WHERE id = ?1",
                [id],
                |row| {
                    Ok(AttachmentRecord {
                        id: row.get(0)?,
                        message_id: row.get(1)?,
                        name: row.get(2)?,
                        mime: row.get(3)?,
                        size: row.get(4)?,
                        data: row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    /// Idempotent single-row delete.
    pub fn delete_attachment(&self, id: i64) -> Result<bool, StoreError> {
        let removed = self
            .conn()
            .execute("DELETE FROM attachments WHERE id = ?1", [id])?;
        Ok(removed > 0)
    }

    /// Newest-first by parent message timestamp, joined so each row carries
    /// room name, sender, sender key, and timestamp.
    pub fn recent_attachments(&self, limit: u32) -> Result<Vec<RecentAttachment>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT a.id, a.message_id, a.name, a.type, a.size, \
                    r.name, m.sender, m.public_key, m.timestamp \
             FROM attachments a \
             JOIN messages m ON m.id = a.message_id \
             JOIN rooms r ON r.id = m.room_id \
             ORDER BY m.timestamp DESC, a.id DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map([limit], |row| {
                Ok(RecentAttachment {
                    id: row.get(0)?,
                    message_id: row.get(1)?,
                    name: row.get(2)?,
                    mime: row.get(3)?,
                    size: row.get(4)?,
                    room: row.get(5)?,
                    sender: row.get(6)?,
                    public_key: row.get(7)?,
                    timestamp: row.get(8)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ── Block list ────────────────────────────────────────────────────────────

    /// Idempotent. The in-memory cache is refreshed when the insert commits.
    pub fn block_user(&self, key: &str) -> Result<(), StoreError> {
        self.conn()
            .execute("INSERT OR IGNORE INTO blocked_keys (pub_key) VALUES (?1)", [key])?;
        self.blocked
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string());
        Ok(())
    }

    pub fn is_blocked(&self, key: &str) -> bool {
        self.blocked
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains(key)
    }

    /// Remove all of the key's messages and their attachments across all
    /// rooms, in one transaction. Returns the number of messages removed.
    pub fn delete_user_content(&self, key: &str) -> Result<usize, StoreError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM attachments WHERE message_id IN \
             (SELECT id FROM messages WHERE public_key = ?1)",
            [key],
        )?;
        let removed = tx.execute("DELETE FROM messages WHERE public_key = ?1", [key])?;
        tx.commit()?;
        Ok(removed)
    }
}

// ── Transaction bodies and row mapping ────────────────────────────────────────

fn persist_in_tx(tx: &Transaction<'_>, room_id: i64, msg: &ChatMessage) -> Result<bool, StoreError> {
    let inserted = tx.execute(
        "INSERT OR IGNORE INTO messages \
         (id, room_id, timestamp, sender, content, public_key, signature, state) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            msg.id,
            room_id,
            msg.timestamp,
            msg.sender,
            msg.content,
            msg.public_key,
            msg.signature,
            MessageState::Saved.as_str(),
        ],
    )?;
    if inserted == 0 {
        // Duplicate id: the pre-existing row wins, attachments included.
        debug!(message = %msg.id, "duplicate message id; insert skipped");
        return Ok(false);
    }
    for attachment in &msg.attachments {
        let (mime, bytes) = datauri::decode(&attachment.data)?;
        tx.execute(
            "INSERT INTO attachments (message_id, name, type, size, data) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![msg.id, attachment.name, mime, bytes.len() as i64, bytes],
        )?;
    }
    Ok(true)
}

/// Delete all attachments and messages of a room. Returns whether the room
/// row exists.
fn wipe_in_tx(tx: &Transaction<'_>, name: &str) -> Result<bool, StoreError> {
    let room_id: Option<i64> = tx
        .query_row("SELECT id FROM rooms WHERE name = ?1", [name], |row| {
            row.get(0)
        })
        .optional()?;
    let Some(room_id) = room_id else {
        return Ok(false);
    };
    tx.execute(
        "DELETE FROM attachments WHERE message_id IN \
         (SELECT id FROM messages WHERE room_id = ?1)",
        [room_id],
    )?;
    tx.execute("DELETE FROM messages WHERE room_id = ?1", [room_id])?;
    Ok(true)
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChatMessage> {
    let state: Option<String> = row.get(6)?;
    Ok(ChatMessage {
        id: row.get(0)?,
        timestamp: row.get(1)?,
        sender: row.get(2)?,
        content: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
        public_key: row.get(4)?,
        signature: row.get(5)?,
        state: state.as_deref().and_then(MessageState::parse),
        attachments: Vec::new(),
    })
}

fn attachments_for_message(
    conn: &Connection,
    message_id: &str,
) -> Result<Vec<AttachmentPayload>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT name, type, data FROM attachments WHERE message_id = ?1 ORDER BY id",
    )?;
    let rows = stmt
        .query_map([message_id], |row| {
            let name: String = row.get(0)?;
            let mime: String = row.get(1)?;
            let data: Vec<u8> = row.get(2)?;
            Ok(AttachmentPayload {
                name,
                size: data.len() as i64,
                data: datauri::encode(&mime, &data),
                mime,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
