// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! HTTP client for the hub's history API.
//!
//! POST requests are signed the way the hub verifies them: `public-key` and
//! `signature` headers over the method+path+body canonicalization. Reads
//! are unauthenticated.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use confab_proto::{ChatMessage, Identity};

use crate::error::ClientError;

/// The server operations the sync engine needs; mockable in tests.
#[async_trait]
pub trait ServerApi: Send + Sync {
    /// Message ids for a room, bounded to the last `days` when given.
    async fn message_ids(&self, room: &str, days: Option<i64>)
        -> Result<Vec<String>, ClientError>;

    async fn messages_by_ids(
        &self,
        room: &str,
        ids: &[String],
    ) -> Result<Vec<ChatMessage>, ClientError>;

    /// Bulk persist; returns the server's `allOk` verdict.
    async fn send_messages(
        &self,
        room: &str,
        messages: &[ChatMessage],
    ) -> Result<bool, ClientError>;

    async fn delete_message(&self, room: &str, id: &str) -> Result<bool, ClientError>;
}

pub struct HttpApi {
    base: String,
    client: reqwest::Client,
    identity: Identity,
}

impl HttpApi {
    /// `base` is scheme + authority, e.g. `http://127.0.0.1:8777`.
    pub fn new(base: impl Into<String>, identity: Identity) -> Self {
        HttpApi {
            base: base.into(),
            client: reqwest::Client::new(),
            identity,
        }
    }

    async fn signed_post<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &impl serde::Serialize,
    ) -> Result<T, ClientError> {
        let bytes = serde_json::to_vec(body)?;
        let signature = self.identity.sign_http("POST", path, &bytes);
        let resp = self
            .client
            .post(format!("{}{path}", self.base))
            .header("public-key", self.identity.public_key_hex())
            .header("signature", signature)
            .header("content-type", "application/json")
            .body(bytes)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(ClientError::Server(format!(
                "{path}: {}",
                resp.status()
            )));
        }
        Ok(resp.json().await?)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageIdsResponse {
    message_ids: Vec<String>,
}

#[derive(Deserialize)]
struct MessagesResponse {
    messages: Vec<ChatMessage>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendMessagesResponse {
    all_ok: bool,
}

#[derive(Deserialize)]
struct OkResponse {
    ok: bool,
}

#[async_trait]
impl ServerApi for HttpApi {
    async fn message_ids(
        &self,
        room: &str,
        days: Option<i64>,
    ) -> Result<Vec<String>, ClientError> {
        let mut url = format!("{}/api/rooms/{room}/message-ids", self.base);
        if let Some(days) = days {
            url.push_str(&format!("?daysOfHistory={days}"));
        }
        let resp = self.client.get(url).send().await?;
        if !resp.status().is_success() {
            return Err(ClientError::Server(format!("message-ids: {}", resp.status())));
        }
        let body: MessageIdsResponse = resp.json().await?;
        debug!(%room, count = body.message_ids.len(), "fetched server id set");
        Ok(body.message_ids)
    }

    async fn messages_by_ids(
        &self,
        room: &str,
        ids: &[String],
    ) -> Result<Vec<ChatMessage>, ClientError> {
        let body: MessagesResponse = self
            .signed_post(
                &format!("/api/rooms/{room}/get-messages-by-id"),
                &serde_json::json!({ "ids": ids }),
            )
            .await?;
        Ok(body.messages)
    }

    async fn send_messages(
        &self,
        room: &str,
        messages: &[ChatMessage],
    ) -> Result<bool, ClientError> {
        let body: SendMessagesResponse = self
            .signed_post(
                &format!("/api/rooms/{room}/send-messages"),
                &serde_json::json!({ "messages": messages }),
            )
            .await?;
        Ok(body.all_ok)
    }

    async fn delete_message(&self, room: &str, id: &str) -> Result<bool, ClientError> {
        let body: OkResponse = self
            .signed_post(
                "/api/delete-message",
                &serde_json::json!({ "messageId": id, "roomName": room }),
            )
            .await?;
        Ok(body.ok)
    }
}
