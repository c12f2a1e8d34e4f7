//! Clap CLI definitions for keymesh.

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

pub const AFTER_HELP: &str = "\
\x1b[1;36mExamples:\x1b[0m
  keymesh                          Run a node from ~/.keymesh/config.toml
  keymesh listen --addr 0.0.0.0:1337
                                   Accept peers on port 1337
  keymesh dial ws://localhost:1337/ --call ping
                                   Connect to a peer and ping it
  keymesh id                       Print a freshly generated identity";

/// keymesh: peer-to-peer RPC between nodes identified by their public keys.
#[derive(Parser)]
#[command(name = "keymesh", version, after_help = AFTER_HELP)]
pub struct Cli {
    /// Path to config file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Silence the node logger (tracing output is still governed by RUST_LOG).
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Accept inbound connections on this address (overrides the config file).
    #[arg(long, conflicts_with = "bootstrap")]
    pub listen: Option<SocketAddr>,

    /// Dial this WebSocket URL (overrides the config file).
    #[arg(long)]
    pub bootstrap: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a server node that accepts inbound peers.
    Listen {
        /// Address to bind [default: config `listen`, else 127.0.0.1:1337].
        #[arg(long)]
        addr: Option<SocketAddr>,
    },
    /// Connect to one peer, optionally call a method on it.
    Dial {
        /// WebSocket URL of the peer [default: config `bootstrap`, else ws://localhost:1337/].
        url: Option<String>,
        /// Call this method once connected, print the result and exit.
        #[arg(long)]
        call: Option<String>,
        /// Positional parameters for `--call`, each parsed as JSON (bare words become strings).
        #[arg(long = "param", requires = "call")]
        params: Vec<String>,
    },
    /// Generate a fresh identity and print its address and public key.
    Id {
        /// Print as JSON.
        #[arg(long)]
        json: bool,
    },
}
