// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Sync engine tests: id-set reconciliation, retention, resend, pruning.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use confab_client::{ClientError, MemoryCache, RoomCache, ServerApi, SyncConfig, SyncEngine};
use confab_proto::{ChatMessage, Identity, MessageState};

const MS_PER_DAY: i64 = 86_400_000;

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn msg(id: &str, ts: i64, state: Option<MessageState>) -> ChatMessage {
    ChatMessage {
        id: id.to_string(),
        timestamp: ts,
        sender: "alice".to_string(),
        content: format!("content {id}"),
        public_key: None,
        signature: None,
        state,
        attachments: Vec::new(),
    }
}

/// Scripted server double.
#[derive(Default)]
struct MockApi {
    ids: Vec<String>,
    fetchable: HashMap<String, ChatMessage>,
    accept_sends: bool,
    sent_batches: Mutex<Vec<Vec<ChatMessage>>>,
}

#[async_trait]
impl ServerApi for MockApi {
    async fn message_ids(&self, _room: &str, _days: Option<i64>) -> Result<Vec<String>, ClientError> {
        Ok(self.ids.clone())
    }

    async fn messages_by_ids(
        &self,
        _room: &str,
        ids: &[String],
    ) -> Result<Vec<ChatMessage>, ClientError> {
        Ok(ids.iter().filter_map(|id| self.fetchable.get(id).cloned()).collect())
    }

    async fn send_messages(
        &self,
        _room: &str,
        messages: &[ChatMessage],
    ) -> Result<bool, ClientError> {
        self.sent_batches
            .lock()
            .unwrap()
            .push(messages.to_vec());
        Ok(self.accept_sends)
    }

    async fn delete_message(&self, _room: &str, _id: &str) -> Result<bool, ClientError> {
        Ok(true)
    }
}

fn engine(cache: MemoryCache, api: MockApi) -> SyncEngine<MemoryCache, MockApi> {
    SyncEngine::new(cache, api, Identity::generate(), SyncConfig::default())
}

#[tokio::test]
async fn reconciliation_promotes_adopts_and_drops() {
    // Cache: m10 SAVED, m11 SAVED, m12 SENT (mine). Server: m10, m13.
    // Expected: m10 stays SAVED, m11 removed (deleted upstream), m12 kept
    // (mine, not yet SAVED), m13 fetched as SAVED. Ascending timestamps.
    let now = now_ms();
    let identity = Identity::generate();
    let own_key = identity.public_key_hex();

    let cache = MemoryCache::new();
    let mut m12 = msg("m12", now - 1000, Some(MessageState::Sent));
    m12.public_key = Some(own_key);
    cache
        .store_room(
            "r1",
            &[
                msg("m10", now - 4000, Some(MessageState::Saved)),
                msg("m11", now - 3000, Some(MessageState::Saved)),
                m12,
            ],
        )
        .unwrap();

    let api = MockApi {
        ids: vec!["m10".to_string(), "m13".to_string()],
        fetchable: HashMap::from([(
            "m13".to_string(),
            msg("m13", now - 2000, None),
        )]),
        accept_sends: false, // resend not acknowledged: m12 stays SENT
        ..MockApi::default()
    };

    let engine = SyncEngine::new(cache, api, identity, SyncConfig::default());
    let result = engine.open_room("r1").await.unwrap();

    let ids: Vec<&str> = result.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["m10", "m13", "m12"]);
    assert_eq!(result[0].state, Some(MessageState::Saved));
    assert_eq!(result[1].state, Some(MessageState::Saved));
    assert_eq!(result[2].state, Some(MessageState::Sent));
}

#[tokio::test]
async fn retention_evicts_old_messages_before_diffing() {
    let now = now_ms();
    let cache = MemoryCache::new();
    cache
        .store_room(
            "r1",
            &[
                msg("ancient", now - 40 * MS_PER_DAY, Some(MessageState::Saved)),
                msg("fresh", now - MS_PER_DAY, Some(MessageState::Saved)),
            ],
        )
        .unwrap();

    let api = MockApi {
        ids: vec!["fresh".to_string()],
        ..MockApi::default()
    };
    let result = engine(cache, api).open_room("r1").await.unwrap();
    assert_eq!(result.len(), 1);
    assert_eq!(result[0].id, "fresh");
}

#[tokio::test]
async fn retention_window_clamps_to_at_least_two_days() {
    let now = now_ms();
    let cache = MemoryCache::new();
    cache
        .store_room("r1", &[msg("m1", now - MS_PER_DAY, Some(MessageState::Saved))])
        .unwrap();

    let api = MockApi {
        ids: vec!["m1".to_string()],
        ..MockApi::default()
    };
    let config = SyncConfig {
        retention_days: 0, // below the floor
        ..SyncConfig::default()
    };
    let engine = SyncEngine::new(cache, api, Identity::generate(), config);
    // One-day-old message survives because the window is clamped to 2 days.
    assert_eq!(engine.open_room("r1").await.unwrap().len(), 1);
}

#[tokio::test]
async fn own_unsaved_messages_are_resent_and_promoted_on_accept() {
    let now = now_ms();
    let identity = Identity::generate();
    let own_key = identity.public_key_hex();

    let cache = MemoryCache::new();
    let mut mine = msg("mine", now - 1000, Some(MessageState::Failed));
    mine.public_key = Some(own_key);
    let mut theirs = msg("theirs", now - 2000, Some(MessageState::Sent));
    theirs.public_key = Some("somebody-else".to_string());
    cache.store_room("r1", &[mine, theirs]).unwrap();

    let api = MockApi {
        accept_sends: true,
        ..MockApi::default()
    };
    let engine = SyncEngine::new(cache, api, identity, SyncConfig::default());
    let result = engine.open_room("r1").await.unwrap();

    let mine_after = result.iter().find(|m| m.id == "mine").unwrap();
    assert_eq!(mine_after.state, Some(MessageState::Saved));
    // Someone else's stuck message is not ours to resend.
    let theirs_after = result.iter().find(|m| m.id == "theirs").unwrap();
    assert_eq!(theirs_after.state, Some(MessageState::Sent));

    let batches = engine.api().sent_batches.lock().unwrap();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].len(), 1);
    assert_eq!(batches[0][0].id, "mine");
}

#[tokio::test]
async fn offline_mode_only_prunes_and_sorts() {
    let now = now_ms();
    let cache = MemoryCache::new();
    cache
        .store_room(
            "r1",
            &[
                msg("b", now - 1000, Some(MessageState::Sent)),
                msg("a", now - 2000, Some(MessageState::Saved)),
            ],
        )
        .unwrap();

    let config = SyncConfig {
        server_mode: false,
        ..SyncConfig::default()
    };
    let engine = SyncEngine::new(cache, MockApi::default(), Identity::generate(), config);
    let result = engine.open_room("r1").await.unwrap();
    // No server contact: SAVED state untouched, just ordered.
    let ids: Vec<&str> = result.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b"]);
}

#[tokio::test]
async fn compose_record_ack_cycle() {
    let cache = MemoryCache::new();
    let engine = engine(cache, MockApi::default());

    let msg = engine.compose("alice", "hello", Vec::new());
    assert_eq!(msg.id.len(), 12);
    assert!(msg.signature.is_some());

    engine.record_send("r1", &msg, true).unwrap();
    assert!(!engine.is_saved("r1", &msg.id).unwrap());

    // Duplicate record is a no-op (id-keyed).
    engine.record_send("r1", &msg, false).unwrap();

    assert!(engine.apply_ack("r1", &msg.id).unwrap());
    assert!(engine.is_saved("r1", &msg.id).unwrap());
    assert!(!engine.apply_ack("r1", "unknown").unwrap());
}

#[tokio::test]
async fn failed_live_send_is_recorded_as_failed() {
    let cache = MemoryCache::new();
    let engine = engine(cache, MockApi::default());
    let msg = engine.compose("alice", "hello", Vec::new());
    engine.record_send("r1", &msg, false).unwrap();

    let config = SyncConfig {
        ack_timeout: std::time::Duration::from_millis(10),
        ..SyncConfig::default()
    };
    let cache2 = MemoryCache::new();
    let engine2 = SyncEngine::new(cache2, MockApi::default(), Identity::generate(), config);
    let msg2 = engine2.compose("alice", "hi", Vec::new());
    engine2.record_send("r1", &msg2, true).unwrap();
    // No ack arrives: the delivery check reports failure.
    assert!(!engine2.confirm_delivery("r1", &msg2.id).await.unwrap());
}

#[tokio::test]
async fn incoming_broadcasts_dedup_by_id() {
    let cache = MemoryCache::new();
    let engine = engine(cache, MockApi::default());
    let incoming = msg("m1", 1000, None);

    engine.apply_incoming("r1", &incoming).unwrap();
    engine.apply_incoming("r1", &incoming).unwrap();

    let room = engine.cached("r1").unwrap();
    assert_eq!(room.len(), 1);
    assert_eq!(room[0].state, Some(MessageState::Saved));
}

#[tokio::test]
async fn delete_msg_frame_removes_locally() {
    let cache = MemoryCache::new();
    let engine = engine(cache, MockApi::default());
    engine.apply_incoming("r1", &msg("m1", 1000, None)).unwrap();
    engine.apply_delete("r1", "m1").unwrap();
    assert!(engine.cached("r1").unwrap().is_empty());
}

#[tokio::test]
async fn near_quota_prunes_oldest_fifth_after_confirmation() {
    // 10 cached messages weigh ~1380 bytes against a 1500-byte quota:
    // past the 90% threshold.
    let cache = MemoryCache::with_quota(1500);
    let engine = engine(cache, MockApi::default());
    for n in 0..10 {
        engine
            .record_send("r1", &msg(&format!("m{n}"), 1000 + n, None), true)
            .unwrap();
    }

    let incoming = msg("new", 5000, None);
    // Decline the prompt: no room is made.
    assert!(!engine.ensure_capacity("r1", &incoming, || false).unwrap());
    assert_eq!(engine.cached("r1").unwrap().len(), 10);

    // Confirm: the oldest 20% goes.
    assert!(engine.ensure_capacity("r1", &incoming, || true).unwrap());
    let kept = engine.cached("r1").unwrap();
    assert_eq!(kept.len(), 8);
    assert!(kept.iter().all(|m| m.id != "m0" && m.id != "m1"));
}

#[tokio::test]
async fn unlimited_quota_never_prompts() {
    let cache = MemoryCache::new();
    let engine = engine(cache, MockApi::default());
    engine.record_send("r1", &msg("m1", 1000, None), true).unwrap();
    let ok = engine
        .ensure_capacity("r1", &msg("new", 2000, None), || {
            panic!("prompt must not fire without a quota")
        })
        .unwrap();
    assert!(ok);
}
