//! CAS client: ticket validation, assertion mapping and redirect URLs.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::assertion::{parse, ValidationOutcome};
use super::config::CasConfig;
use super::validator::{TicketValidator, ValidationError, ValidationRequest};

/// Value of the auth method header for CAS identities.
pub const AUTH_METHOD: &str = "cas";

/// Authenticated identity produced from a CAS assertion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Principal asserted by CAS.
    pub id: String,
    /// All assertion attributes, keyed by local element name.
    pub claims: BTreeMap<String, String>,
}

impl Identity {
    pub fn new(id: impl Into<String>, claims: BTreeMap<String, String>) -> Self {
        Self {
            id: id.into(),
            claims,
        }
    }
}

/// Why a ticket did not yield an identity.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AuthError {
    /// CAS could not be reached.
    #[error("CAS server unreachable: {0}")]
    Network(String),

    /// CAS answered with a non-2xx status.
    #[error("CAS server returned HTTP {status}")]
    Http { status: u16 },

    /// The response was not a usable CAS document.
    #[error("malformed CAS response: {reason}")]
    Malformed { reason: String },

    /// CAS rejected the ticket.
    #[error("CAS rejected ticket: {message}")]
    Rejected {
        code: Option<String>,
        message: String,
    },
}

impl AuthError {
    /// Reason code for audit logs.
    pub fn reason_code(&self) -> &'static str {
        match self {
            AuthError::Network(_) => "CAS_UNREACHABLE",
            AuthError::Http { .. } => "CAS_HTTP_ERROR",
            AuthError::Malformed { .. } => "CAS_MALFORMED_RESPONSE",
            AuthError::Rejected { .. } => "CAS_TICKET_REJECTED",
        }
    }
}

impl From<ValidationError> for AuthError {
    fn from(err: ValidationError) -> Self {
        match err {
            ValidationError::Network(message) => AuthError::Network(message),
            ValidationError::Http { status, .. } => AuthError::Http { status },
        }
    }
}

/// Map a parsed outcome onto an identity.
pub fn identity_from_outcome(outcome: ValidationOutcome) -> std::result::Result<Identity, AuthError> {
    match outcome {
        ValidationOutcome::Success {
            principal,
            attributes,
        } => Ok(Identity::new(principal, attributes)),
        ValidationOutcome::Failure { code, message } => Err(AuthError::Rejected { code, message }),
        ValidationOutcome::Malformed { raw_body, reason } => {
            debug!(body = %raw_body, "Malformed CAS response body");
            Err(AuthError::Malformed { reason })
        }
    }
}

/// CAS client bound to one CAS server and service URL.
#[derive(Clone)]
pub struct CasClient {
    config: CasConfig,
    validator: TicketValidator,
}

impl CasClient {
    /// Create a client. The HTTP client is built once here and reused.
    pub fn new(config: CasConfig) -> Result<Self> {
        config.validate().map_err(|e| anyhow!(e))?;

        let validator =
            TicketValidator::new(Duration::from_secs(config.validation_timeout_secs))?;

        Ok(Self { config, validator })
    }

    pub fn config(&self) -> &CasConfig {
        &self.config
    }

    /// URL of the CAS login page for this service.
    pub fn login_url(&self) -> String {
        let mut url = format!(
            "{}/login?service={}",
            self.base_url(),
            urlencoding::encode(&self.config.service_url)
        );

        if self.config.renew {
            url.push_str("&renew=true");
        }
        if self.config.gateway {
            url.push_str("&gateway=true");
        }

        url
    }

    /// URL of the CAS logout page.
    pub fn logout_url(&self) -> String {
        let service = self
            .config
            .post_logout_service
            .as_deref()
            .unwrap_or(&self.config.service_url);

        format!(
            "{}/logout?service={}",
            self.base_url(),
            urlencoding::encode(service)
        )
    }

    fn base_url(&self) -> &str {
        self.config.server_url.trim_end_matches('/')
    }

    fn request(&self, ticket: &str) -> ValidationRequest {
        ValidationRequest::new(
            self.config.server_url.clone(),
            self.config.service_url.clone(),
            ticket,
        )
        .with_renew(self.config.renew)
    }

    /// Validate a service ticket and return the asserted identity.
    pub async fn authenticate(&self, ticket: &str) -> std::result::Result<Identity, AuthError> {
        let response = self.validator.validate(&self.request(ticket)).await?;
        self.finish(response.status, &response.body)
    }

    /// Like [`authenticate`](Self::authenticate), abandoning the call when
    /// `cancel` resolves.
    pub async fn authenticate_until<F>(
        &self,
        ticket: &str,
        cancel: F,
    ) -> std::result::Result<Identity, AuthError>
    where
        F: Future<Output = ()>,
    {
        let response = self
            .validator
            .validate_until(&self.request(ticket), cancel)
            .await?;
        self.finish(response.status, &response.body)
    }

    fn finish(&self, status: u16, body: &str) -> std::result::Result<Identity, AuthError> {
        let outcome = parse(body);
        debug!(status, outcome = outcome.kind(), "Parsed CAS validation response");

        match identity_from_outcome(outcome) {
            Ok(identity) => {
                info!(
                    principal = %identity.id,
                    attributes = identity.claims.len(),
                    "CAS ticket validated"
                );
                Ok(identity)
            }
            Err(e) => {
                match &e {
                    AuthError::Rejected { code, message } => {
                        warn!(code = ?code, message = %message, "CAS ticket validation failed");
                    }
                    other => {
                        warn!(error = %other, "CAS ticket validation failed");
                    }
                }
                Err(e)
            }
        }
    }
}
