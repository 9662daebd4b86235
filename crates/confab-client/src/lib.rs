// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Client-side state for the confab fabric: a per-room local cache, the
//! sync engine that reconciles it with server truth, and a signed HTTP
//! client for the hub's history API.
//!
//! The cache weakly mirrors the server and is never trusted as
//! authoritative: the sync engine always rewrites a room's blob whole,
//! which sidesteps partial-update consistency bugs.

pub mod api;
pub mod cache;
pub mod error;
pub mod sync;

pub use api::{HttpApi, ServerApi};
pub use cache::{CacheUsage, FileCache, MemoryCache, RoomCache, RoomHistoryItem};
pub use error::ClientError;
pub use sync::{SyncConfig, SyncEngine};
