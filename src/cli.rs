// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "confab", version, about = "Signed, room-oriented chat hub")]
pub struct Cli {
    /// Increase log verbosity (-v: debug, -vv: trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the hub (the default when no subcommand is given).
    Serve {
        /// Path to a YAML config file.
        #[arg(short, long, env = "CONFAB_CONFIG")]
        config: Option<PathBuf>,
    },

    /// Print the effective configuration as YAML.
    ShowConfig {
        #[arg(short, long, env = "CONFAB_CONFIG")]
        config: Option<PathBuf>,
    },

    /// Generate a fresh identity key pair and print it once.
    /// The public key is what goes into `admin_public_key`.
    GenIdentity,
}
