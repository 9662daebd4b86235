// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Hub configuration loaded from YAML.
//!
//! Configuration is YAML (never TOML). All fields have production-safe
//! defaults; `load(None)` gives you a loopback bind and a `confab.db` in the
//! working directory, with the admin surface disabled until a key is set.
//!
//! # Example full config
//! ```yaml
//! bind: "127.0.0.1:8777"
//! database: "/var/lib/confab/confab.db"
//! # Hex x-only public key allowed to call /api/admin/*. Absent = disabled.
//! admin_public_key: "9f3a..."
//! max_body_bytes: 20971520
//! # Optional: drop connections with no inbound traffic for this long.
//! idle_timeout_secs: 900
//! ```

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

fn default_bind() -> String {
    "127.0.0.1:8777".to_string()
}

fn default_database() -> PathBuf {
    PathBuf::from("confab.db")
}

/// 20 MiB: attachments ride inside JSON bodies as base64, so the ceiling is
/// deliberately higher than a plain chat payload would need.
fn default_max_body() -> usize {
    20 * 1024 * 1024
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// `host:port` to listen on. Default: loopback only.
    #[serde(default = "default_bind")]
    pub bind: String,

    /// SQLite database path.
    #[serde(default = "default_database")]
    pub database: PathBuf,

    /// Hex x-only public key whose signed requests may call `/api/admin/*`
    /// and delete any message. `None` disables those endpoints.
    #[serde(default)]
    pub admin_public_key: Option<String>,

    #[serde(default = "default_max_body")]
    pub max_body_bytes: usize,

    /// Idle-connection timeout for live connections, in seconds.
    /// `None` (the default) never times out.
    #[serde(default)]
    pub idle_timeout_secs: Option<u64>,
}

impl Default for HubConfig {
    fn default() -> Self {
        HubConfig {
            bind: default_bind(),
            database: default_database(),
            admin_public_key: None,
            max_body_bytes: default_max_body(),
            idle_timeout_secs: None,
        }
    }
}

/// Load configuration from an explicit YAML path, or defaults when `None`.
pub fn load(path: Option<&Path>) -> anyhow::Result<HubConfig> {
    match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            serde_yaml::from_str(&text)
                .with_context(|| format!("parsing config {}", path.display()))
        }
        None => Ok(HubConfig::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_loopback_with_admin_disabled() {
        let config = load(None).unwrap();
        assert!(config.bind.starts_with("127.0.0.1"));
        assert!(config.admin_public_key.is_none());
        assert!(config.idle_timeout_secs.is_none());
    }

    #[test]
    fn partial_yaml_overrides_only_named_fields() {
        let config: HubConfig =
            serde_yaml::from_str("admin_public_key: \"aa\"\nbind: \"0.0.0.0:9000\"").unwrap();
        assert_eq!(config.bind, "0.0.0.0:9000");
        assert_eq!(config.admin_public_key.as_deref(), Some("aa"));
        assert_eq!(config.max_body_bytes, default_max_body());
    }
}
