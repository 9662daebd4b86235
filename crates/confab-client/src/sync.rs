// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! The sync engine: reconcile the local room cache with server truth.
//!
//! # Room-open reconciliation
//!
//! 1. Load the cached message list and evict anything older than the
//!    retention window.
//! 2. Fetch the server's id set for the window (server mode only).
//! 3. Diff: ids present on both sides promote to `SAVED`; ids `SAVED`
//!    locally but gone from the server were deleted upstream and are
//!    dropped; ids only on the server are fetched.
//! 4. Resend own messages that never reached `SAVED`.
//! 5. Sort ascending by timestamp (id tie-break) and rewrite the blob whole.
//!
//! All dedup and promotion is keyed on the message id alone — two legitimate
//! messages with identical content and timestamps are distinct as long as
//! their ids differ.
//!
//! # Send path
//!
//! [`SyncEngine::compose`] assigns a short random id, timestamps, and signs;
//! the caller pushes the frame over its live connection and records the
//! outcome with [`SyncEngine::record_send`] (`SENT`, or `FAILED` when the
//! live send itself reported failure). An incoming `ack` promotes via
//! [`SyncEngine::apply_ack`]; [`SyncEngine::confirm_delivery`] is the
//! fixed-delay check behind the "server did not accept this message" hint.

use std::collections::HashSet;
use std::time::Duration;

use rand::{distributions::Alphanumeric, Rng};
use tracing::{debug, info};

use confab_proto::{AttachmentPayload, ChatMessage, Identity, MessageState};

use crate::api::ServerApi;
use crate::cache::{message_weight, RoomCache};
use crate::error::ClientError;

const MS_PER_DAY: i64 = 86_400_000;
const MESSAGE_ID_LEN: usize = 12;

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Local retention window in days. Minimum 2, default 30.
    pub retention_days: i64,
    /// When false the engine works offline: no id-set fetch, no resend.
    pub server_mode: bool,
    /// How long to wait for an ack before reporting a delivery failure.
    pub ack_timeout: Duration,
    /// Fraction of quota at which the cache counts as near-full.
    pub quota_threshold: f64,
    /// Fraction of the room's oldest messages dropped by a prune.
    pub prune_fraction: f64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            retention_days: 30,
            server_mode: true,
            ack_timeout: Duration::from_secs(3),
            quota_threshold: 0.9,
            prune_fraction: 0.2,
        }
    }
}

pub struct SyncEngine<C: RoomCache, A: ServerApi> {
    cache: C,
    api: A,
    identity: Identity,
    config: SyncConfig,
}

impl<C: RoomCache, A: ServerApi> SyncEngine<C, A> {
    pub fn new(cache: C, api: A, identity: Identity, mut config: SyncConfig) -> Self {
        config.retention_days = config.retention_days.max(2);
        SyncEngine {
            cache,
            api,
            identity,
            config,
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    // ── Room open ─────────────────────────────────────────────────────────────

    /// Reconcile and return the room's messages, ascending by timestamp.
    pub async fn open_room(&self, room: &str) -> Result<Vec<ChatMessage>, ClientError> {
        let mut local = self.cache.load_room(room)?;
        let cutoff = now_ms() - self.config.retention_days * MS_PER_DAY;
        let before = local.len();
        local.retain(|m| m.timestamp >= cutoff);
        if local.len() < before {
            debug!(%room, evicted = before - local.len(), "retention eviction");
        }

        if self.config.server_mode {
            let server_ids: HashSet<String> = self
                .api
                .message_ids(room, Some(self.config.retention_days))
                .await?
                .into_iter()
                .collect();

            // Present on both sides: the server has it, so it is SAVED.
            for msg in &mut local {
                if server_ids.contains(&msg.id) && msg.state != Some(MessageState::Saved) {
                    msg.state = Some(MessageState::Saved);
                }
            }
            // SAVED locally but gone from the server: deleted upstream.
            // Anything not yet SAVED is ours-in-flight and survives.
            local.retain(|m| {
                server_ids.contains(&m.id) || m.state != Some(MessageState::Saved)
            });

            // Only on the server: fetch and adopt.
            let known: HashSet<&str> = local.iter().map(|m| m.id.as_str()).collect();
            let missing: Vec<String> = server_ids
                .iter()
                .filter(|id| !known.contains(id.as_str()))
                .cloned()
                .collect();
            if !missing.is_empty() {
                let mut fetched = self.api.messages_by_ids(room, &missing).await?;
                for msg in &mut fetched {
                    msg.state = Some(MessageState::Saved);
                }
                info!(%room, fetched = fetched.len(), "adopted server-only messages");
                local.append(&mut fetched);
            }

            self.resend_unsaved(room, &mut local).await?;
        }

        sort_for_display(&mut local);
        self.cache.store_room(room, &local)?;
        self.cache.touch_history(room, now_ms())?;
        Ok(local)
    }

    /// Push our own not-yet-SAVED messages through the bulk-send endpoint;
    /// promote them when the server accepts the whole batch.
    async fn resend_unsaved(
        &self,
        room: &str,
        local: &mut [ChatMessage],
    ) -> Result<(), ClientError> {
        let own_key = self.identity.public_key_hex();
        let pending: Vec<ChatMessage> = local
            .iter()
            .filter(|m| {
                m.state != Some(MessageState::Saved)
                    && m.public_key.as_deref() == Some(own_key.as_str())
            })
            .cloned()
            .collect();
        if pending.is_empty() {
            return Ok(());
        }
        info!(%room, count = pending.len(), "resending unacknowledged messages");
        if self.api.send_messages(room, &pending).await? {
            let resent: HashSet<&str> = pending.iter().map(|m| m.id.as_str()).collect();
            for msg in local.iter_mut() {
                if resent.contains(msg.id.as_str()) {
                    msg.state = Some(MessageState::Saved);
                }
            }
        }
        Ok(())
    }

    // ── Send path ─────────────────────────────────────────────────────────────

    /// Build a signed message ready for the live connection: short random
    /// id, current timestamp, detached signature.
    pub fn compose(
        &self,
        sender: &str,
        content: &str,
        attachments: Vec<AttachmentPayload>,
    ) -> ChatMessage {
        let id: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(MESSAGE_ID_LEN)
            .map(char::from)
            .collect();
        let mut msg = ChatMessage {
            id,
            timestamp: now_ms(),
            sender: sender.to_string(),
            content: content.to_string(),
            public_key: None,
            signature: None,
            state: None,
            attachments,
        };
        self.identity.sign_chat_message(&mut msg);
        msg
    }

    /// Record the outcome of the live send: `SENT` when the push went out,
    /// `FAILED` when it did not. Id-keyed, so re-recording is a no-op.
    pub fn record_send(
        &self,
        room: &str,
        msg: &ChatMessage,
        live_send_ok: bool,
    ) -> Result<(), ClientError> {
        let mut local = self.cache.load_room(room)?;
        if local.iter().any(|m| m.id == msg.id) {
            return Ok(());
        }
        let mut stored = msg.clone();
        stored.state = Some(if live_send_ok {
            MessageState::Sent
        } else {
            MessageState::Failed
        });
        local.push(stored);
        sort_for_display(&mut local);
        self.cache.store_room(room, &local)
    }

    /// Promote a message to `SAVED` on an incoming `ack`. Returns whether
    /// the id was known.
    pub fn apply_ack(&self, room: &str, id: &str) -> Result<bool, ClientError> {
        let mut local = self.cache.load_room(room)?;
        let mut found = false;
        for msg in &mut local {
            if msg.id == id {
                msg.state = Some(MessageState::Saved);
                found = true;
            }
        }
        if found {
            self.cache.store_room(room, &local)?;
        }
        Ok(found)
    }

    /// Adopt an incoming broadcast. Dedup is by id only; an already-known
    /// message is promoted to `SAVED` rather than duplicated.
    pub fn apply_incoming(&self, room: &str, msg: &ChatMessage) -> Result<(), ClientError> {
        let mut local = self.cache.load_room(room)?;
        match local.iter_mut().find(|m| m.id == msg.id) {
            Some(existing) => existing.state = Some(MessageState::Saved),
            None => {
                let mut adopted = msg.clone();
                adopted.state = Some(MessageState::Saved);
                local.push(adopted);
            }
        }
        sort_for_display(&mut local);
        self.cache.store_room(room, &local)
    }

    /// Drop a message the server says was deleted (a `delete-msg` frame).
    pub fn apply_delete(&self, room: &str, id: &str) -> Result<(), ClientError> {
        let mut local = self.cache.load_room(room)?;
        local.retain(|m| m.id != id);
        self.cache.store_room(room, &local)
    }

    /// Current cache contents for a room, without any reconciliation.
    pub fn cached(&self, room: &str) -> Result<Vec<ChatMessage>, ClientError> {
        self.cache.load_room(room)
    }

    pub fn is_saved(&self, room: &str, id: &str) -> Result<bool, ClientError> {
        Ok(self
            .cache
            .load_room(room)?
            .iter()
            .any(|m| m.id == id && m.state == Some(MessageState::Saved)))
    }

    /// Wait the configured ack window, then report whether the message made
    /// it to `SAVED`. `false` means the caller should surface a
    /// "server did not accept this message" hint.
    pub async fn confirm_delivery(&self, room: &str, id: &str) -> Result<bool, ClientError> {
        tokio::time::sleep(self.config.ack_timeout).await;
        self.is_saved(room, id)
    }

    // ── Quota pruning ─────────────────────────────────────────────────────────

    /// Check quota headroom for an incoming message; when near-full, ask the
    /// caller (a modal prompt in a UI) and drop the oldest fraction of the
    /// room on confirmation.
    ///
    /// Returns whether there is room to proceed.
    pub fn ensure_capacity(
        &self,
        room: &str,
        incoming: &ChatMessage,
        confirm: impl FnOnce() -> bool,
    ) -> Result<bool, ClientError> {
        let usage = self.cache.usage()?;
        let Some(quota) = usage.quota_bytes else {
            return Ok(true);
        };
        let needed = message_weight(incoming);
        let near_full = usage.used_bytes as f64 >= quota as f64 * self.config.quota_threshold
            || usage.used_bytes + needed > quota;
        if !near_full {
            return Ok(true);
        }
        if !confirm() {
            return Ok(false);
        }

        let mut local = self.cache.load_room(room)?;
        sort_for_display(&mut local);
        let drop_count =
            ((local.len() as f64) * self.config.prune_fraction).ceil() as usize;
        let kept = local.split_off(drop_count.min(local.len()));
        info!(%room, dropped = drop_count, "pruned oldest messages for quota");
        self.cache.store_room(room, &kept)?;
        Ok(true)
    }
}

fn sort_for_display(messages: &mut [ChatMessage]) {
    messages.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
