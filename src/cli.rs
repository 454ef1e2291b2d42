//! Command-line interface definitions for `vault-auth-broker`.
//!
//! Defines the top-level [`Cli`] struct parsed by `clap` and the [`Command`]
//! subcommand enum that drives the binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// OIDC authentication broker for team-scoped Vault tokens
///
/// Sits between developer/CI clients, an OIDC identity provider, and a
/// HashiCorp Vault instance. Turns an interactive login into a short-lived,
/// narrowly-scoped Vault token whose permissions reflect the user's team,
/// so large numbers of users collapse onto a stable set of Vault entities.
///
/// Run without a subcommand to start the broker server.
#[derive(Parser, Debug)]
#[command(name = "vault-auth-broker")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to the broker configuration file (YAML)
    #[arg(short, long, env = "BROKER_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Minimum log level: trace, debug, info, warn, or error
    #[arg(long, default_value = "info", env = "BROKER_LOG_LEVEL", global = true)]
    pub log_level: String,

    /// Log output format: "text" for human-readable, "json" for structured
    #[arg(long, env = "BROKER_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand to run (defaults to server mode when omitted)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Top-level subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the broker server (default when no subcommand is given)
    #[command(about = "Start the broker server")]
    Serve,

    /// Provision the Vault-side configuration the broker relies on
    ///
    /// Writes the JWT auth config and one JWT role plus one token role per
    /// configured team, authenticated with `VAULT_ROOT_TOKEN`.
    #[command(about = "Write Vault JWT and token roles for every team")]
    Setup,
}
