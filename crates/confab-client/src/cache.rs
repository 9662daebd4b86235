// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Local room cache: one blob per room, keyed by room name, always
//! rewritten whole.
//!
//! [`FileCache`] is the durable implementation (one JSON file per room
//! under a directory); [`MemoryCache`] backs tests and short-lived
//! embeddings. Both also keep the visited-room bookmark list and report
//! storage usage so the sync engine can prune when near quota.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use confab_proto::ChatMessage;

use crate::error::ClientError;

/// A visited-room bookmark.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomHistoryItem {
    pub room: String,
    pub last_visited: i64,
}

/// Storage usage report. `quota_bytes: None` means unlimited.
#[derive(Debug, Clone, Copy)]
pub struct CacheUsage {
    pub used_bytes: u64,
    pub quota_bytes: Option<u64>,
}

pub trait RoomCache: Send + Sync {
    fn load_room(&self, room: &str) -> Result<Vec<ChatMessage>, ClientError>;
    /// Rewrite the room's blob whole.
    fn store_room(&self, room: &str, messages: &[ChatMessage]) -> Result<(), ClientError>;
    fn history(&self) -> Result<Vec<RoomHistoryItem>, ClientError>;
    fn touch_history(&self, room: &str, visited_at: i64) -> Result<(), ClientError>;
    fn usage(&self) -> Result<CacheUsage, ClientError>;
}

// ── File-backed cache ─────────────────────────────────────────────────────────

/// One JSON file per room under `dir/rooms/`, bookmarks in `dir/history.json`.
///
/// Room names are case-sensitive and unrestricted, so file names are the
/// hex of the room name bytes rather than the name itself.
pub struct FileCache {
    dir: PathBuf,
    quota_bytes: Option<u64>,
}

impl FileCache {
    pub fn open(dir: &Path) -> Result<Self, ClientError> {
        std::fs::create_dir_all(dir.join("rooms"))?;
        Ok(FileCache {
            dir: dir.to_path_buf(),
            quota_bytes: None,
        })
    }

    /// As [`FileCache::open`] but with a soft storage quota the sync engine
    /// prunes against.
    pub fn open_with_quota(dir: &Path, quota_bytes: u64) -> Result<Self, ClientError> {
        let mut cache = Self::open(dir)?;
        cache.quota_bytes = Some(quota_bytes);
        Ok(cache)
    }

    fn room_path(&self, room: &str) -> PathBuf {
        self.dir.join("rooms").join(format!("{}.json", hex::encode(room)))
    }

    fn history_path(&self) -> PathBuf {
        self.dir.join("history.json")
    }
}

impl RoomCache for FileCache {
    fn load_room(&self, room: &str) -> Result<Vec<ChatMessage>, ClientError> {
        let path = self.room_path(room);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    fn store_room(&self, room: &str, messages: &[ChatMessage]) -> Result<(), ClientError> {
        let text = serde_json::to_string(messages)?;
        std::fs::write(self.room_path(room), text)?;
        Ok(())
    }

    fn history(&self) -> Result<Vec<RoomHistoryItem>, ClientError> {
        let path = self.history_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    fn touch_history(&self, room: &str, visited_at: i64) -> Result<(), ClientError> {
        let mut items = self.history()?;
        match items.iter_mut().find(|item| item.room == room) {
            Some(item) => item.last_visited = visited_at,
            None => items.push(RoomHistoryItem {
                room: room.to_string(),
                last_visited: visited_at,
            }),
        }
        items.sort_by(|a, b| b.last_visited.cmp(&a.last_visited));
        std::fs::write(self.history_path(), serde_json::to_string(&items)?)?;
        Ok(())
    }

    fn usage(&self) -> Result<CacheUsage, ClientError> {
        let mut used_bytes = 0;
        for entry in std::fs::read_dir(self.dir.join("rooms"))? {
            used_bytes += entry?.metadata()?.len();
        }
        Ok(CacheUsage {
            used_bytes,
            quota_bytes: self.quota_bytes,
        })
    }
}

// ── In-memory cache ───────────────────────────────────────────────────────────

/// In-memory cache for tests and ephemeral sessions.
#[derive(Default)]
pub struct MemoryCache {
    inner: Mutex<MemoryInner>,
    quota_bytes: Option<u64>,
}

#[derive(Default)]
struct MemoryInner {
    rooms: HashMap<String, Vec<ChatMessage>>,
    history: Vec<RoomHistoryItem>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota_bytes: u64) -> Self {
        MemoryCache {
            quota_bytes: Some(quota_bytes),
            ..Self::default()
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl RoomCache for MemoryCache {
    fn load_room(&self, room: &str) -> Result<Vec<ChatMessage>, ClientError> {
        Ok(self.lock().rooms.get(room).cloned().unwrap_or_default())
    }

    fn store_room(&self, room: &str, messages: &[ChatMessage]) -> Result<(), ClientError> {
        self.lock().rooms.insert(room.to_string(), messages.to_vec());
        Ok(())
    }

    fn history(&self) -> Result<Vec<RoomHistoryItem>, ClientError> {
        Ok(self.lock().history.clone())
    }

    fn touch_history(&self, room: &str, visited_at: i64) -> Result<(), ClientError> {
        let mut inner = self.lock();
        match inner.history.iter_mut().find(|item| item.room == room) {
            Some(item) => item.last_visited = visited_at,
            None => inner.history.push(RoomHistoryItem {
                room: room.to_string(),
                last_visited: visited_at,
            }),
        }
        inner.history.sort_by(|a, b| b.last_visited.cmp(&a.last_visited));
        Ok(())
    }

    fn usage(&self) -> Result<CacheUsage, ClientError> {
        let inner = self.lock();
        let used_bytes = inner
            .rooms
            .values()
            .flatten()
            .map(message_weight)
            .sum();
        Ok(CacheUsage {
            used_bytes,
            quota_bytes: self.quota_bytes,
        })
    }
}

/// Rough serialized weight of a message, for quota accounting.
pub(crate) fn message_weight(msg: &ChatMessage) -> u64 {
    let attachment_bytes: usize = msg.attachments.iter().map(|a| a.data.len()).sum();
    (msg.content.len() + attachment_bytes + 128) as u64
}

// ── Unit tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(id: &str, ts: i64) -> ChatMessage {
        ChatMessage {
            id: id.to_string(),
            timestamp: ts,
            sender: "alice".to_string(),
            content: "x".to_string(),
            public_key: None,
            signature: None,
            state: None,
            attachments: Vec::new(),
        }
    }

    #[test]
    fn file_cache_round_trips_room_blobs() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::open(dir.path()).unwrap();
        assert!(cache.load_room("r1").unwrap().is_empty());

        cache.store_room("r1", &[msg("m1", 1), msg("m2", 2)]).unwrap();
        let loaded = cache.load_room("r1").unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].id, "m1");

        // Whole-blob rewrite replaces, never merges.
        cache.store_room("r1", &[msg("m3", 3)]).unwrap();
        assert_eq!(cache.load_room("r1").unwrap().len(), 1);
    }

    #[test]
    fn file_cache_separates_rooms_with_odd_names() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::open(dir.path()).unwrap();
        cache.store_room("a/b", &[msg("m1", 1)]).unwrap();
        cache.store_room("A/B", &[msg("m2", 2)]).unwrap();
        assert_eq!(cache.load_room("a/b").unwrap()[0].id, "m1");
        assert_eq!(cache.load_room("A/B").unwrap()[0].id, "m2");
    }

    #[test]
    fn history_tracks_most_recent_first() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::open(dir.path()).unwrap();
        cache.touch_history("r1", 100).unwrap();
        cache.touch_history("r2", 200).unwrap();
        cache.touch_history("r1", 300).unwrap();

        let items = cache.history().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].room, "r1");
        assert_eq!(items[0].last_visited, 300);
    }

    #[test]
    fn usage_reflects_stored_bytes_and_quota() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::open_with_quota(dir.path(), 1024).unwrap();
        cache.store_room("r1", &[msg("m1", 1)]).unwrap();
        let usage = cache.usage().unwrap();
        assert!(usage.used_bytes > 0);
        assert_eq!(usage.quota_bytes, Some(1024));
    }
}
