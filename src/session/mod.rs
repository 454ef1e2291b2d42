//! Session store — in-memory, TTL-bounded records for in-flight auth flows.

mod state;
mod store;

pub use state::{now_unix, SessionState, SessionStatus, UserIdentity};
pub use store::{spawn_sweeper, SessionStore, SWEEP_INTERVAL};
