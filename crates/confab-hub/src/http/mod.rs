// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! HTTP surface: unauthenticated history reads, signed mutators, and the
//! admin-key-gated destructive operations.

pub mod admin;
pub mod history;
pub mod sig;
