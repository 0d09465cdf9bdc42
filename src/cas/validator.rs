//! Service ticket validation against the CAS `serviceValidate` endpoint.

use anyhow::{Context, Result};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Default timeout for a validation round trip.
pub const DEFAULT_VALIDATION_TIMEOUT_SECS: u64 = 10;

/// One ticket validation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationRequest {
    /// CAS server base URL, e.g. `https://cas.example.edu/cas`.
    pub cas_base_url: String,
    /// Externally visible callback URL the ticket was issued for.
    pub service_url: String,
    /// Service ticket, sent as-is.
    pub ticket: String,
    /// Ask CAS to reject tickets not issued from primary credentials.
    pub renew: bool,
}

impl ValidationRequest {
    pub fn new(
        cas_base_url: impl Into<String>,
        service_url: impl Into<String>,
        ticket: impl Into<String>,
    ) -> Self {
        Self {
            cas_base_url: cas_base_url.into(),
            service_url: service_url.into(),
            ticket: ticket.into(),
            renew: false,
        }
    }

    pub fn with_renew(mut self, renew: bool) -> Self {
        self.renew = renew;
        self
    }

    /// Full `serviceValidate` URL.
    ///
    /// The service URL is percent-encoded, the ticket is not.
    pub fn url(&self) -> String {
        let mut url = format!(
            "{}/serviceValidate?service={}&ticket={}",
            self.cas_base_url.trim_end_matches('/'),
            urlencoding::encode(&self.service_url),
            self.ticket
        );

        if self.renew {
            url.push_str("&renew=true");
        }

        url
    }
}

/// Raw response from a 2xx validation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResponse {
    pub status: u16,
    pub body: String,
}

/// Transport-level validation failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ValidationError {
    /// The call did not complete: DNS, connect, timeout or cancellation.
    #[error("CAS validation request failed: {0}")]
    Network(String),

    /// CAS answered with a non-2xx status. The body is kept for logging only.
    #[error("CAS server returned HTTP {status}")]
    Http { status: u16, body: String },
}

/// Validates service tickets over a pooled HTTP client.
///
/// Cloning is cheap and clones share the same connection pool.
#[derive(Clone)]
pub struct TicketValidator {
    http_client: reqwest::Client,
}

impl TicketValidator {
    /// Create a validator whose calls time out after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { http_client })
    }

    /// Create a validator on top of an existing client.
    pub fn with_client(http_client: reqwest::Client) -> Self {
        Self { http_client }
    }

    /// Perform the validation call.
    ///
    /// No retries: tickets are single-use, so a second attempt with the same
    /// ticket cannot succeed.
    pub async fn validate(
        &self,
        request: &ValidationRequest,
    ) -> std::result::Result<ValidationResponse, ValidationError> {
        debug!(
            cas = %request.cas_base_url,
            service = %request.service_url,
            renew = request.renew,
            "Validating CAS service ticket"
        );

        let response = self
            .http_client
            .get(request.url())
            .send()
            .await
            .map_err(|e| ValidationError::Network(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ValidationError::Network(e.to_string()))?;

        if !status.is_success() {
            warn!(
                status = status.as_u16(),
                body = %body,
                "CAS validation endpoint returned non-success status"
            );
            return Err(ValidationError::Http {
                status: status.as_u16(),
                body,
            });
        }

        debug!(status = status.as_u16(), bytes = body.len(), "CAS validation response received");

        Ok(ValidationResponse {
            status: status.as_u16(),
            body,
        })
    }

    /// Like [`validate`](Self::validate), but gives up as soon as `cancel`
    /// resolves.
    pub async fn validate_until<F>(
        &self,
        request: &ValidationRequest,
        cancel: F,
    ) -> std::result::Result<ValidationResponse, ValidationError>
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            biased;
            _ = cancel => {
                debug!(service = %request.service_url, "CAS validation cancelled");
                Err(ValidationError::Network("validation cancelled".to_string()))
            }
            result = self.validate(request) => result,
        }
    }
}
