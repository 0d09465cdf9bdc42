//! Zentinel CAS Agent
//!
//! Client side of the CAS single sign-on protocol: redirect to the CAS
//! login page, validate the returned service ticket server-to-server, parse
//! the XML assertion into an identity, and keep a local session for it.

pub mod cas;
pub mod flow;
pub mod session;

pub use cas::{AuthError, CasClient, CasConfig, Identity, ValidationOutcome};
pub use flow::{CasFlow, FlowRequest, FlowResponse};
pub use session::{Session, SessionId, SessionSink, SessionStore};
