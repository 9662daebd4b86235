// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("invalid signature")]
    InvalidSignature,

    #[error("malformed key: {0}")]
    MalformedKey(String),

    #[error("missing public key")]
    MissingKey,

    #[error("missing signature")]
    MissingSignature,

    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("malformed data URL: {0}")]
    MalformedDataUrl(String),
}
