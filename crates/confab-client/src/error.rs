// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("cache I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache encoding: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("http: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server rejected request: {0}")]
    Server(String),

    #[error(transparent)]
    Proto(#[from] confab_proto::ProtoError),
}
