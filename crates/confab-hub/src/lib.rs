// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! The confab hub: live-connection signaling, broadcast persistence, and the
//! HTTP history/admin surface.
//!
//! # Architecture
//!
//! ```text
//!   WebSocket conn ──► connection::handle_socket ──► dispatch loop
//!        │                    │ join/offer/answer/ice     │ broadcast
//!        │                    ▼                           ▼
//!        │              RoomRegistry ◄──────────── broadcast pipeline
//!        │               (live fan-out)                   │ persist
//!        │                                                ▼
//!   HTTP /api/* ──► history + admin handlers ─────────► Store (SQLite)
//! ```
//!
//! Each accepted WebSocket connection runs an independent dispatch task;
//! tasks share the [`registry::RoomRegistry`] (in-memory, live state only)
//! and the [`confab_store::Store`]. Inbound frames on one connection are
//! processed strictly in arrival order. A failure in one connection never
//! takes down another: handlers translate errors into dropped frames and
//! log lines.

pub mod broadcast;
pub mod config;
pub mod connection;
pub mod error;
pub mod http;
pub mod registry;
pub mod server;

use std::sync::Arc;

use confab_store::Store;
use registry::RoomRegistry;

pub use config::HubConfig;
pub use error::HubError;
pub use server::{attach, router, serve};

/// Shared state threaded through the WebSocket handler and all HTTP routes.
#[derive(Clone)]
pub struct HubState {
    pub store: Arc<Store>,
    pub registry: Arc<RoomRegistry>,
    /// Hex x-only public key whose signed requests are privileged.
    /// `None` disables the admin surface entirely.
    pub admin_key: Option<String>,
    pub max_body_bytes: usize,
    pub idle_timeout: Option<std::time::Duration>,
}

impl HubState {
    pub fn new(store: Arc<Store>, config: &HubConfig) -> Self {
        HubState {
            store,
            registry: Arc::new(RoomRegistry::new()),
            admin_key: config.admin_public_key.clone(),
            max_body_bytes: config.max_body_bytes,
            idle_timeout: config.idle_timeout_secs.map(std::time::Duration::from_secs),
        }
    }
}
