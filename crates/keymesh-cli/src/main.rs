//! keymesh CLI: run nodes that find each other by public key and call methods
//! on one another.
//!
//! Every node command loads `~/.keymesh/config.toml` (or `--config`), applies
//! the command-line overrides and then listens or dials.

mod cli;
mod cmd;
mod config;

use crate::cli::{Cli, Commands};
use clap::Parser;

fn init_tracing_stderr() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing_stderr();

    let load = || {
        let mut node_config = config::load_config(cli.config.as_deref());
        config::apply_overrides(
            &mut node_config,
            cli.listen,
            cli.bootstrap.clone(),
            cli.quiet,
        );
        node_config
    };

    let result = match cli.command {
        None => cmd::node::cmd_run(load()),
        Some(Commands::Listen { addr }) => cmd::node::cmd_listen(load(), addr),
        Some(Commands::Dial {
            ref url,
            ref call,
            ref params,
        }) => cmd::node::cmd_dial(load(), url.clone(), call.clone(), params.clone()),
        Some(Commands::Id { json }) => cmd::id::cmd_id(json),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
