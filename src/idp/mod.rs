//! IdP client — outbound OIDC against the configured identity provider.
//!
//! Implements the broker's half of the Authorization Code + PKCE contract:
//! authorization-URL construction, code/token exchange, userinfo lookup,
//! and ID-token verification against the provider's JWKS.

mod client;
pub mod pkce;
mod verify;

pub use client::{IdpClient, TokenSet, UserInfo};
pub use verify::{IdTokenClaims, IdTokenVerifier};
