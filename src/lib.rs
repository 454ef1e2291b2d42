//! Vault Auth Broker Library
//!
//! An authentication broker between developer/CI clients, an external OIDC
//! identity provider, and a HashiCorp Vault instance.
//!
//! # Flow
//!
//! 1. A client starts a session (`/cli/start` or `/auth/login`) and the user
//!    completes Authorization Code + PKCE at the IdP.
//! 2. The callback verifies the ID token and maps IdP groups onto teams;
//!    users in several teams pick one.
//! 3. `/exchange` mints a broker JWT whose subject is the *team*, logs in to
//!    Vault's JWT auth under the team role, and creates a bounded child
//!    token from the team's token role.
//!
//! Because the JWT subject is the team, all same-team logins reuse one
//! Vault identity entity — user identity rides along as metadata only.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod broker;
pub mod cli;
pub mod config;
pub mod error;
pub mod idp;
pub mod jwt;
pub mod keys;
pub mod retry;
pub mod session;
pub mod teams;
pub mod vault;

pub use broker::Broker;
pub use config::Config;
pub use error::{Error, Result};

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Setup tracing/logging
///
/// # Errors
///
/// Currently infallible; kept fallible for parity with future sinks.
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber.with(fmt::layer().json()).init();
        }
        _ => {
            subscriber.with(fmt::layer()).init();
        }
    }

    Ok(())
}
