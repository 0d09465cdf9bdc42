//! Session types for CAS logins.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::cas::Identity;

/// Unique session identifier (16-byte random value, hex-encoded in cookies).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId([u8; 16]);

impl SessionId {
    /// Generate a new random session ID.
    pub fn new() -> Self {
        Self(rand::random())
    }

    /// Convert to hex string for cookies.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex string.
    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        let arr: [u8; 16] = bytes.try_into().ok()?;
        Some(Self(arr))
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// A local session established from a validated CAS ticket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Session ID.
    pub id: SessionId,

    /// Principal asserted by CAS.
    pub principal: String,

    /// CAS assertion attributes.
    pub attributes: BTreeMap<String, String>,

    /// Session creation time.
    pub created_at: DateTime<Utc>,

    /// Session expiry time.
    pub expires_at: DateTime<Utc>,

    /// Last access time (updated on each request).
    pub last_accessed: DateTime<Utc>,

    /// Client IP at session creation (optional binding).
    pub client_ip: Option<String>,
}

impl Session {
    /// Create a session for an identity.
    ///
    /// A TTL too large to represent saturates at the latest representable
    /// time.
    pub fn new(identity: Identity, ttl_secs: u64) -> Self {
        let now = Utc::now();
        let expires_at = i64::try_from(ttl_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .and_then(|ttl| now.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        Self {
            id: SessionId::new(),
            principal: identity.id,
            attributes: identity.claims,
            created_at: now,
            expires_at,
            last_accessed: now,
            client_ip: None,
        }
    }

    /// Check if the session is expired.
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    /// Update last accessed time.
    pub fn touch(&mut self) {
        self.last_accessed = Utc::now();
    }

    pub fn get_attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// Identity carried by this session.
    pub fn identity(&self) -> Identity {
        Identity::new(self.principal.clone(), self.attributes.clone())
    }
}

/// The "set current session identity" capability a host web layer offers.
pub trait SessionSink: Send + Sync {
    /// Start a session for a freshly validated identity.
    fn establish(&self, identity: Identity, ttl_secs: u64, client_ip: Option<String>)
        -> Result<Session>;

    /// Look up a live session.
    fn current(&self, id: SessionId) -> Result<Option<Session>>;

    /// End a session. Returns whether it existed.
    fn end(&self, id: SessionId) -> Result<bool>;
}
