// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Data-URL (`data:<mime>;base64,<payload>`) encoding for attachment bytes.
//!
//! Attachments ride the wire as data URLs for client convenience; the hub
//! stores raw bytes and re-encodes on read.

use base64::Engine;

use crate::error::ProtoError;

const ENGINE: base64::engine::GeneralPurpose = base64::engine::general_purpose::STANDARD;

pub fn encode(mime: &str, bytes: &[u8]) -> String {
    format!("data:{mime};base64,{}", ENGINE.encode(bytes))
}

/// Returns `(mime, bytes)`.
pub fn decode(url: &str) -> Result<(String, Vec<u8>), ProtoError> {
    let rest = url
        .strip_prefix("data:")
        .ok_or_else(|| ProtoError::MalformedDataUrl("missing data: scheme".to_string()))?;
    let (mime, payload) = rest
        .split_once(";base64,")
        .ok_or_else(|| ProtoError::MalformedDataUrl("missing ;base64, marker".to_string()))?;
    let bytes = ENGINE
        .decode(payload)
        .map_err(|e| ProtoError::MalformedDataUrl(e.to_string()))?;
    Ok((mime.to_string(), bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_then_decode_recovers_bytes() {
        let url = encode("image/png", &[1, 2, 3, 255]);
        assert!(url.starts_with("data:image/png;base64,"));
        let (mime, bytes) = decode(&url).unwrap();
        assert_eq!(mime, "image/png");
        assert_eq!(bytes, vec![1, 2, 3, 255]);
    }

    #[test]
    fn decode_rejects_plain_urls() {
        assert!(decode("https://example.com/x.png").is_err());
        assert!(decode("data:image/png,notbase64").is_err());
    }

    #[test]
    fn decode_rejects_invalid_base64() {
        assert!(decode("data:text/plain;base64,!!!").is_err());
    }
}
