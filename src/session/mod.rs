//! Local sessions for CAS logins.
//!
//! The host web layer establishes a session once a ticket validates and
//! looks it up by cookie on later requests.

pub mod cleanup;
pub mod store;
pub mod types;

pub use cleanup::{spawn_cleanup_task, DEFAULT_CLEANUP_INTERVAL_SECS};
pub use store::{SessionStore, DEFAULT_MAX_SESSIONS};
pub use types::{Session, SessionId, SessionSink};
