//! Vault integration — hybrid JWT login and child-token minting, plus the
//! Vault-side provisioning the broker's correctness depends on.

mod client;
mod setup;

pub use client::{ChildToken, ChildTokenRequest, VaultAuth, VaultClient};
pub use setup::VaultProvisioner;
