// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Identity key pairs and detached signatures.
//!
//! # Scheme
//!
//! BIP340 Schnorr over secp256k1 — the signature scheme of the broader
//! pseudonymous signed-message ecosystem this fabric interoperates with.
//! Public keys are the 32-byte x-only form, hex-encoded on the wire; secret
//! keys are 32 bytes hex. Signatures are 64 bytes hex.
//!
//! The rest of the system treats this module as a black box: it signs and
//! verifies byte strings produced by [`crate::canonical`].
//!
//! # Usage
//!
//! ```rust
//! use confab_proto::{ChatMessage, Identity};
//! use confab_proto::identity::verify_chat_message;
//!
//! let id = Identity::generate();
//! let mut msg = ChatMessage {
//!     id: "m1".to_string(),
//!     timestamp: 1000,
//!     sender: "alice".to_string(),
//!     content: "hi".to_string(),
//!     public_key: None,
//!     signature: None,
//!     state: None,
//!     attachments: Vec::new(),
//! };
//! id.sign_chat_message(&mut msg);
//! assert!(verify_chat_message(&msg).is_ok());
//! ```

use k256::schnorr::{Signature, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use signature::{Signer, Verifier};

use crate::canonical;
use crate::error::ProtoError;
use crate::frames::{ChatMessage, UserRef};

/// A long-lived signing key pair.
#[derive(Clone)]
pub struct Identity {
    signing: SigningKey,
}

impl Identity {
    /// Generate a fresh key pair from the OS CSPRNG.
    pub fn generate() -> Self {
        Identity {
            signing: SigningKey::random(&mut OsRng),
        }
    }

    /// Load from a 32-byte hex-encoded secret key.
    pub fn from_secret_hex(secret: &str) -> Result<Self, ProtoError> {
        let bytes = hex::decode(secret.trim())
            .map_err(|e| ProtoError::MalformedKey(e.to_string()))?;
        let signing = SigningKey::from_bytes(&bytes)
            .map_err(|e| ProtoError::MalformedKey(e.to_string()))?;
        Ok(Identity { signing })
    }

    /// Hex-encoded secret key, for persistence by the caller.
    pub fn secret_hex(&self) -> String {
        hex::encode(self.signing.to_bytes())
    }

    /// Hex-encoded 32-byte x-only public key.
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.signing.verifying_key().to_bytes())
    }

    /// Sign arbitrary canonical bytes; returns the hex signature.
    pub fn sign_bytes(&self, bytes: &[u8]) -> String {
        let sig: Signature = self.signing.sign(bytes);
        hex::encode(sig.to_bytes())
    }

    /// Attach `publicKey` and `signature` to a chat message.
    pub fn sign_chat_message(&self, msg: &mut ChatMessage) {
        msg.public_key = Some(self.public_key_hex());
        msg.signature = Some(self.sign_bytes(&canonical::chat_message(msg)));
    }

    pub fn sign_join(&self, room: &str, user: &UserRef) -> String {
        self.sign_bytes(&canonical::join(room, user))
    }

    pub fn sign_offer(&self, id: &str, room: &str, offer: &serde_json::Value) -> String {
        self.sign_bytes(&canonical::offer(id, room, offer, &self.public_key_hex()))
    }

    pub fn sign_http(&self, method: &str, path: &str, body: &[u8]) -> String {
        self.sign_bytes(&canonical::http_request(method, path, body))
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print the secret key.
        f.debug_struct("Identity")
            .field("public_key", &self.public_key_hex())
            .finish()
    }
}

// ── Verification ──────────────────────────────────────────────────────────────

/// Verify a hex signature over canonical bytes with a hex x-only public key.
pub fn verify_bytes(public_key: &str, bytes: &[u8], signature: &str) -> Result<(), ProtoError> {
    let key_bytes =
        hex::decode(public_key).map_err(|e| ProtoError::MalformedKey(e.to_string()))?;
    let key = VerifyingKey::from_bytes(&key_bytes)
        .map_err(|e| ProtoError::MalformedKey(e.to_string()))?;
    let sig_bytes = hex::decode(signature).map_err(|_| ProtoError::InvalidSignature)?;
    let sig = Signature::try_from(sig_bytes.as_slice()).map_err(|_| ProtoError::InvalidSignature)?;
    key.verify(bytes, &sig)
        .map_err(|_| ProtoError::InvalidSignature)
}

/// Verify a chat message against its embedded `publicKey`/`signature`.
pub fn verify_chat_message(msg: &ChatMessage) -> Result<(), ProtoError> {
    let key = msg.public_key.as_deref().ok_or(ProtoError::MissingKey)?;
    let sig = msg.signature.as_deref().ok_or(ProtoError::MissingSignature)?;
    verify_bytes(key, &canonical::chat_message(msg), sig)
}

/// Verify a `join` frame; the key is the joining user's.
pub fn verify_join(room: &str, user: &UserRef, signature: &str) -> Result<(), ProtoError> {
    verify_bytes(&user.public_key, &canonical::join(room, user), signature)
}

/// Verify an `offer` frame; the key is the frame's embedded `publicKey`.
pub fn verify_offer(
    id: &str,
    room: &str,
    offer: &serde_json::Value,
    public_key: &str,
    signature: &str,
) -> Result<(), ProtoError> {
    verify_bytes(public_key, &canonical::offer(id, room, offer, public_key), signature)
}

/// Verify a signed HTTP request (method + path + body).
pub fn verify_http(
    public_key: &str,
    method: &str,
    path: &str,
    body: &[u8],
    signature: &str,
) -> Result<(), ProtoError> {
    verify_bytes(public_key, &canonical::http_request(method, path, body), signature)
}

// ── Unit tests ────────────────────────────────────────────────────────────────
