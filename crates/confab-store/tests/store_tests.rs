// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Store lifecycle tests: referential integrity, idempotence, room scoping.

use confab_proto::{datauri, AttachmentPayload, ChatMessage, MessageState};
use confab_store::{RoomKey, Store};

fn msg(id: &str, ts: i64, sender: &str, key: &str) -> ChatMessage {
    ChatMessage {
        id: id.to_string(),
        timestamp: ts,
        sender: sender.to_string(),
        content: format!("content of {id}"),
        public_key: Some(key.to_string()),
        signature: Some("deadbeef".to_string()),
        state: Some(MessageState::Sent),
        attachments: Vec::new(),
    }
}

fn with_attachment(mut m: ChatMessage, name: &str, bytes: &[u8]) -> ChatMessage {
    m.attachments.push(AttachmentPayload {
        name: name.to_string(),
        mime: "application/octet-stream".to_string(),
        size: bytes.len() as i64,
        data: datauri::encode("application/octet-stream", bytes),
    });
    m
}

#[test]
fn persist_then_read_round_trips_modulo_state() {
    let store = Store::open_in_memory().unwrap();
    let room = store.get_or_create_room("r1").unwrap();
    let m = msg("m1", 1000, "alice", "keyA");
    assert!(store.persist_message(room, &m).unwrap());

    let got = store
        .messages_by_ids(&["m1".to_string()], RoomKey::Name("r1"))
        .unwrap();
    assert_eq!(got.len(), 1);
    assert_eq!(got[0].id, "m1");
    assert_eq!(got[0].content, m.content);
    assert_eq!(got[0].public_key, m.public_key);
    // Persistence normalizes state to SAVED.
    assert_eq!(got[0].state, Some(MessageState::Saved));
}

#[test]
fn duplicate_id_insert_is_a_silent_noop() {
    let store = Store::open_in_memory().unwrap();
    let room = store.get_or_create_room("r1").unwrap();
    assert!(store.persist_message(room, &msg("m1", 1000, "alice", "keyA")).unwrap());

    // Same id, different content: the pre-existing row wins.
    let mut other = msg("m1", 2000, "mallory", "keyM");
    other.content = "rewritten".to_string();
    assert!(!store.persist_message(room, &other).unwrap());

    let got = store
        .messages_by_ids(&["m1".to_string()], RoomKey::Name("r1"))
        .unwrap();
    assert_eq!(got[0].sender, "alice");
    assert_eq!(got[0].content, "content of m1");
}

#[test]
fn get_or_create_room_is_idempotent() {
    let store = Store::open_in_memory().unwrap();
    let a = store.get_or_create_room("r1").unwrap();
    let b = store.get_or_create_room("r1").unwrap();
    assert_eq!(a, b);
    assert_ne!(a, store.get_or_create_room("r2").unwrap());
}

#[test]
fn room_names_are_case_sensitive() {
    let store = Store::open_in_memory().unwrap();
    assert_ne!(
        store.get_or_create_room("Lobby").unwrap(),
        store.get_or_create_room("lobby").unwrap()
    );
}

#[test]
fn fetch_by_ids_is_room_scoped() {
    let store = Store::open_in_memory().unwrap();
    let r1 = store.get_or_create_room("r1").unwrap();
    let r2 = store.get_or_create_room("r2").unwrap();
    store.persist_message(r1, &msg("m1", 1000, "alice", "keyA")).unwrap();
    store.persist_message(r2, &msg("m2", 1000, "bob", "keyB")).unwrap();

    // m2 belongs to another room: silently omitted.
    let got = store
        .messages_by_ids(&["m1".to_string(), "m2".to_string()], RoomKey::Name("r1"))
        .unwrap();
    assert_eq!(got.len(), 1);
    assert_eq!(got[0].id, "m1");

    // Numeric room keys resolve the same way.
    let got = store
        .messages_by_ids(&["m2".to_string()], RoomKey::Id(r2))
        .unwrap();
    assert_eq!(got.len(), 1);
}

#[test]
fn message_ids_honor_the_since_bound_and_sort_stably() {
    let store = Store::open_in_memory().unwrap();
    let room = store.get_or_create_room("r1").unwrap();
    // Two equal timestamps: tie-break by id keeps results stable.
    store.persist_message(room, &msg("b", 2000, "alice", "keyA")).unwrap();
    store.persist_message(room, &msg("a", 2000, "alice", "keyA")).unwrap();
    store.persist_message(room, &msg("old", 10, "alice", "keyA")).unwrap();

    let all = store.message_ids_for_room(RoomKey::Name("r1"), None).unwrap();
    assert_eq!(all, vec!["old", "a", "b"]);

    let recent = store
        .message_ids_for_room(RoomKey::Name("r1"), Some(1000))
        .unwrap();
    assert_eq!(recent, vec!["a", "b"]);

    // Unknown room is empty, not an error.
    assert!(store
        .message_ids_for_room(RoomKey::Name("nowhere"), None)
        .unwrap()
        .is_empty());
}

#[test]
fn history_window_is_newest_first_with_offset() {
    let store = Store::open_in_memory().unwrap();
    let room = store.get_or_create_room("r1").unwrap();
    for (id, ts) in [("m1", 100), ("m2", 200), ("m3", 300)] {
        store.persist_message(room, &msg(id, ts, "alice", "keyA")).unwrap();
    }
    let page = store.messages_for_room("r1", 2, 0).unwrap();
    assert_eq!(
        page.iter().map(|m| m.id.as_str()).collect::<Vec<_>>(),
        vec!["m3", "m2"]
    );
    let rest = store.messages_for_room("r1", 2, 2).unwrap();
    assert_eq!(rest.len(), 1);
    assert_eq!(rest[0].id, "m1");
}

#[test]
fn attachments_round_trip_as_data_urls() {
    let store = Store::open_in_memory().unwrap();
    let room = store.get_or_create_room("r1").unwrap();
    let bytes = vec![7u8; 1024];
    let m = with_attachment(msg("m20", 1000, "alice", "keyA"), "blob.bin", &bytes);
    store.persist_message(room, &m).unwrap();

    let got = store
        .messages_by_ids(&["m20".to_string()], RoomKey::Name("r1"))
        .unwrap();
    assert_eq!(got[0].attachments.len(), 1);
    let a = &got[0].attachments[0];
    assert_eq!(a.size, 1024);
    let (mime, decoded) = datauri::decode(&a.data).unwrap();
    assert_eq!(mime, "application/octet-stream");
    assert_eq!(decoded, bytes);
}

#[test]
fn deleting_a_message_removes_its_attachments() {
    let store = Store::open_in_memory().unwrap();
    let room = store.get_or_create_room("r1").unwrap();
    let m = with_attachment(msg("m20", 1000, "alice", "keyA"), "a.bin", &[1, 2, 3]);
    store.persist_message(room, &m).unwrap();

    let attachment = store.recent_attachments(10).unwrap().remove(0);
    assert!(store.attachment(attachment.id).unwrap().is_some());

    assert!(store.delete_message("m20", "keyA", None).unwrap());
    assert!(store.attachment(attachment.id).unwrap().is_none());
    assert!(store
        .messages_by_ids(&["m20".to_string()], RoomKey::Name("r1"))
        .unwrap()
        .is_empty());
}

#[test]
fn delete_message_requires_owner_or_admin() {
    let store = Store::open_in_memory().unwrap();
    let room = store.get_or_create_room("r1").unwrap();
    store.persist_message(room, &msg("m3", 1000, "alice", "keyA")).unwrap();

    // Neither owner nor admin: refused, row remains.
    assert!(!store.delete_message("m3", "keyB", Some("adminKey")).unwrap());
    assert_eq!(
        store.message_ids_for_room(RoomKey::Name("r1"), None).unwrap().len(),
        1
    );

    // Owner succeeds.
    assert!(store.delete_message("m3", "keyA", Some("adminKey")).unwrap());

    // Admin succeeds on someone else's message.
    store.persist_message(room, &msg("m4", 1000, "alice", "keyA")).unwrap();
    assert!(store.delete_message("m4", "adminKey", Some("adminKey")).unwrap());

    // Unknown id: success-with-zero-rows.
    assert!(!store.delete_message("m4", "adminKey", Some("adminKey")).unwrap());
}

#[test]
fn delete_room_is_transactional_and_idempotent() {
    let store = Store::open_in_memory().unwrap();
    let room = store.get_or_create_room("r1").unwrap();
    let m = with_attachment(msg("m1", 1000, "alice", "keyA"), "a.bin", &[9]);
    store.persist_message(room, &m).unwrap();

    assert!(store.delete_room("r1").unwrap());
    assert!(!store.delete_room("r1").unwrap());
    assert!(store.recent_attachments(10).unwrap().is_empty());
    assert!(store.room_info().unwrap().is_empty());
}

#[test]
fn wipe_room_preserves_the_room_row() {
    let store = Store::open_in_memory().unwrap();
    let room = store.get_or_create_room("r1").unwrap();
    store.persist_message(room, &msg("m1", 1000, "alice", "keyA")).unwrap();

    assert!(store.wipe_room("r1").unwrap());
    let info = store.room_info().unwrap();
    assert_eq!(info.len(), 1);
    assert_eq!(info[0].name, "r1");
    assert_eq!(info[0].message_count, 0);

    assert!(!store.wipe_room("gone").unwrap());
}

#[test]
fn room_info_counts_messages_sorted_by_name() {
    let store = Store::open_in_memory().unwrap();
    let rb = store.get_or_create_room("beta").unwrap();
    let ra = store.get_or_create_room("alpha").unwrap();
    store.persist_message(rb, &msg("m1", 1, "a", "k")).unwrap();
    store.persist_message(rb, &msg("m2", 2, "a", "k")).unwrap();
    store.persist_message(ra, &msg("m3", 3, "a", "k")).unwrap();

    let info = store.room_info().unwrap();
    assert_eq!(info.len(), 2);
    assert_eq!((info[0].name.as_str(), info[0].message_count), ("alpha", 1));
    assert_eq!((info[1].name.as_str(), info[1].message_count), ("beta", 2));
}

#[test]
fn recent_attachments_carry_room_and_sender_context() {
    let store = Store::open_in_memory().unwrap();
    let room = store.get_or_create_room("r1").unwrap();
    store
        .persist_message(
            room,
            &with_attachment(msg("m1", 100, "alice", "keyA"), "old.bin", &[1]),
        )
        .unwrap();
    store
        .persist_message(
            room,
            &with_attachment(msg("m2", 200, "bob", "keyB"), "new.bin", &[2]),
        )
        .unwrap();

    let recent = store.recent_attachments(10).unwrap();
    assert_eq!(recent.len(), 2);
    // Newest parent message first.
    assert_eq!(recent[0].name, "new.bin");
    assert_eq!(recent[0].room, "r1");
    assert_eq!(recent[0].sender, "bob");
    assert_eq!(recent[0].public_key.as_deref(), Some("keyB"));
    assert_eq!(recent[0].timestamp, 200);
}

#[test]
fn block_list_is_idempotent_and_cached() {
    let store = Store::open_in_memory().unwrap();
    assert!(!store.is_blocked("keyA"));
    store.block_user("keyA").unwrap();
    store.block_user("keyA").unwrap();
    assert!(store.is_blocked("keyA"));
    assert!(!store.is_blocked("keyB"));
}

#[test]
fn blocked_keys_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("confab.db");
    {
        let store = Store::open(&path).unwrap();
        store.block_user("keyA").unwrap();
    }
    let store = Store::open(&path).unwrap();
    assert!(store.is_blocked("keyA"));
}

#[test]
fn delete_user_content_sweeps_all_rooms() {
    let store = Store::open_in_memory().unwrap();
    let r1 = store.get_or_create_room("r1").unwrap();
    let r2 = store.get_or_create_room("r2").unwrap();
    store
        .persist_message(r1, &with_attachment(msg("m1", 1, "eve", "keyE"), "x", &[1]))
        .unwrap();
    store.persist_message(r2, &msg("m2", 2, "eve", "keyE")).unwrap();
    store.persist_message(r2, &msg("m3", 3, "alice", "keyA")).unwrap();

    assert_eq!(store.delete_user_content("keyE").unwrap(), 2);
    assert!(store.recent_attachments(10).unwrap().is_empty());
    assert_eq!(
        store.message_ids_for_room(RoomKey::Name("r2"), None).unwrap(),
        vec!["m3"]
    );
}

#[test]
fn save_messages_reports_only_new_inserts() {
    let store = Store::open_in_memory().unwrap();
    let batch = vec![
        msg("m1", 100, "alice", "keyA"),
        msg("m2", 200, "alice", "keyA"),
    ];
    assert_eq!(store.save_messages("r1", &batch).unwrap(), 2);
    // Re-sending the same batch plus one new message inserts exactly one.
    let mut again = batch.clone();
    again.push(msg("m3", 300, "alice", "keyA"));
    assert_eq!(store.save_messages("r1", &again).unwrap(), 1);
}
