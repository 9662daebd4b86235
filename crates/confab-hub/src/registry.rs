// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! In-memory registry of live rooms and their participants.
//!
//! This is live-connection state only — it says nothing about which rooms
//! exist in the store. A room's entry appears when its first participant
//! joins and is reclaimed when the last one leaves; the persisted room row
//! is untouched by either.
//!
//! Mutations for one room are serialized by the map's per-entry locking;
//! reads hand out snapshots so callers never iterate under the lock.
//!
//! A public key occupies at most one slot per room: a second connection
//! joining under the same key supersedes the first for routing purposes
//! (last-writer-wins). The superseded connection stays open; its eventual
//! close must not evict its successor, so removal is guarded by the
//! connection id.

use dashmap::DashMap;
use std::collections::HashMap;
use tokio::sync::mpsc;

use confab_proto::{Frame, UserRef};

/// A live (connection, identity) binding inside a room.
#[derive(Debug, Clone)]
pub struct Member {
    pub user: UserRef,
    pub conn_id: u64,
    /// Outbound frame queue of the member's connection.
    pub tx: mpsc::Sender<Frame>,
}

#[derive(Default)]
struct RoomEntry {
    /// publicKey → member. Last writer wins on duplicate keys.
    members: HashMap<String, Member>,
}

pub struct RoomRegistry {
    rooms: DashMap<String, RoomEntry>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        RoomRegistry {
            rooms: DashMap::new(),
        }
    }

    /// Register a participant; returns a snapshot of the *other* current
    /// participants for the `room-info` reply.
    pub fn join(
        &self,
        room: &str,
        user: UserRef,
        conn_id: u64,
        tx: mpsc::Sender<Frame>,
    ) -> Vec<UserRef> {
        let mut entry = self.rooms.entry(room.to_string()).or_default();
        let others: Vec<UserRef> = entry
            .members
            .values()
            .filter(|m| m.user.public_key != user.public_key)
            .map(|m| m.user.clone())
            .collect();
        entry.members.insert(
            user.public_key.clone(),
            Member { user, conn_id, tx },
        );
        others
    }

    /// Remove a participant slot, but only if it still belongs to `conn_id`
    /// (a rejoin from another connection supersedes the slot, and the old
    /// connection's close must not evict the new one).
    ///
    /// Returns the removed user and a snapshot of the remaining members for
    /// the `user-left` fan-out; `None` if the slot was absent or superseded.
    pub fn leave(
        &self,
        room: &str,
        public_key: &str,
        conn_id: u64,
    ) -> Option<(UserRef, Vec<Member>)> {
        let removed = {
            let mut entry = self.rooms.get_mut(room)?;
            match entry.members.get(public_key) {
                Some(member) if member.conn_id == conn_id => {
                    let member = entry.members.remove(public_key);
                    let remaining = entry.members.values().cloned().collect();
                    member.map(|m| (m.user, remaining))
                }
                _ => None,
            }
        };
        // Reclaim the entry once the last live participant is gone.
        self.rooms.remove_if(room, |_, entry| entry.members.is_empty());
        removed
    }

    /// Look up a forwarding target by public key within a room.
    pub fn target(&self, room: &str, public_key: &str) -> Option<Member> {
        self.rooms.get(room)?.members.get(public_key).cloned()
    }

    /// Snapshot of a room's members for fan-out.
    pub fn members(&self, room: &str) -> Vec<Member> {
        self.rooms
            .get(room)
            .map(|entry| entry.members.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Participant snapshot suitable for a `room-info` frame.
    pub fn participants(&self, room: &str) -> Vec<UserRef> {
        self.rooms
            .get(room)
            .map(|entry| entry.members.values().map(|m| m.user.clone()).collect())
            .unwrap_or_default()
    }

    /// Number of rooms with at least one live participant.
    pub fn live_room_count(&self) -> usize {
        self.rooms.len()
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
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

    fn sender() -> mpsc::Sender<Frame> {
        mpsc::channel(4).0
    }

    #[test]
    fn join_returns_other_participants_only() {
        let reg = RoomRegistry::new();
        assert!(reg.join("r1", user("alice"), 1, sender()).is_empty());
        let others = reg.join("r1", user("bob"), 2, sender());
        assert_eq!(others.len(), 1);
        assert_eq!(others[0].name, "alice");
    }

    #[test]
    fn rejoin_under_same_key_is_last_writer_wins() {
        let reg = RoomRegistry::new();
        reg.join("r1", user("alice"), 1, sender());
        reg.join("r1", user("alice"), 2, sender());
        let members = reg.members("r1");
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].conn_id, 2);
    }

    #[test]
    fn superseded_connection_close_does_not_evict_successor() {
        let reg = RoomRegistry::new();
        reg.join("r1", user("alice"), 1, sender());
        reg.join("r1", user("alice"), 2, sender());
        // Old connection 1 closes: slot belongs to connection 2 now.
        assert!(reg.leave("r1", "alice-key", 1).is_none());
        assert_eq!(reg.members("r1").len(), 1);
        // Connection 2 closing removes the slot for real.
        assert!(reg.leave("r1", "alice-key", 2).is_some());
        assert!(reg.members("r1").is_empty());
    }

    #[test]
    fn leave_reports_remaining_members_and_reclaims_empty_rooms() {
        let reg = RoomRegistry::new();
        reg.join("r1", user("alice"), 1, sender());
        reg.join("r1", user("bob"), 2, sender());

        let (left, remaining) = reg.leave("r1", "alice-key", 1).unwrap();
        assert_eq!(left.name, "alice");
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].user.name, "bob");
        assert_eq!(reg.live_room_count(), 1);

        reg.leave("r1", "bob-key", 2).unwrap();
        assert_eq!(reg.live_room_count(), 0);
    }

    #[test]
    fn target_is_room_scoped() {
        let reg = RoomRegistry::new();
        reg.join("r1", user("alice"), 1, sender());
        reg.join("r2", user("bob"), 2, sender());
        assert!(reg.target("r1", "alice-key").is_some());
        assert!(reg.target("r1", "bob-key").is_none());
    }
}
