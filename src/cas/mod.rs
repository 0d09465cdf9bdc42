//! CAS (Central Authentication Service) client protocol.
//!
//! Validates service tickets against `serviceValidate` and turns the XML
//! assertion into an [`Identity`].

pub mod assertion;
pub mod client;
pub mod config;
pub mod validator;

pub use assertion::{parse, ValidationOutcome};
pub use client::{identity_from_outcome, AuthError, CasClient, Identity, AUTH_METHOD};
pub use config::{CasConfig, CasConfigJson};
pub use validator::{TicketValidator, ValidationError, ValidationRequest, ValidationResponse};
