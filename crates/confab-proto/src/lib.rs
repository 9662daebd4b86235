// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Wire protocol for the confab chat fabric.
//!
//! This crate is shared by the hub and the client and defines the three
//! things both sides must agree on byte-for-byte:
//!
//! - [`frames`] — the JSON frame envelope spoken over the live WebSocket
//!   connection, plus the [`frames::ChatMessage`] record that rides inside
//!   `broadcast` frames and the HTTP history API.
//! - [`canonical`] — deterministic byte strings for every signable variant.
//!   Signing and verification both run over these bytes; any divergence
//!   between the two sides silently breaks all signatures, so the field
//!   lists live in exactly one place.
//! - [`identity`] — the long-lived key pair and the detached-signature
//!   scheme (BIP340 Schnorr over secp256k1, x-only public keys).

pub mod canonical;
pub mod datauri;
pub mod error;
pub mod frames;
pub mod identity;

pub use error::ProtoError;
pub use frames::{AttachmentPayload, ChatMessage, Frame, MessageState, UserRef};
pub use identity::Identity;
