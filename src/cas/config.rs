//! CAS client configuration.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use super::validator::DEFAULT_VALIDATION_TIMEOUT_SECS;

/// CAS client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CasConfig {
    /// Enable CAS authentication.
    #[serde(default)]
    pub enabled: bool,

    /// CAS server base URL.
    /// Example: "https://cas.example.edu/cas"
    #[serde(default)]
    pub server_url: String,

    /// Externally visible callback URL sent as the `service` parameter.
    /// Example: "https://app.example.edu/cas/callback"
    #[serde(default)]
    pub service_url: String,

    /// Path CAS redirects back to with the `ticket` query parameter.
    #[serde(default = "default_callback_path")]
    pub callback_path: String,

    /// Path that starts a login by redirecting to CAS.
    #[serde(default = "default_login_path")]
    pub login_path: String,

    /// Path that ends the local session and redirects to CAS logout.
    #[serde(default = "default_logout_path")]
    pub logout_path: String,

    /// Where to send the browser after a successful login.
    #[serde(default = "default_post_login_redirect")]
    pub post_login_redirect: String,

    /// `service` passed to CAS logout. Defaults to `service_url`.
    #[serde(default)]
    pub post_logout_service: Option<String>,

    /// Force primary credentials (CAS `renew=true`).
    #[serde(default)]
    pub renew: bool,

    /// Do not challenge the user at CAS (CAS `gateway=true`).
    #[serde(default)]
    pub gateway: bool,

    /// Timeout for the `serviceValidate` call in seconds.
    #[serde(default = "default_validation_timeout")]
    pub validation_timeout_secs: u64,

    /// Session TTL in seconds (default: 8 hours).
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: u64,

    /// Cookie name for session ID.
    #[serde(default = "default_cookie_name")]
    pub session_cookie_name: String,

    /// Cookie domain (optional, defaults to request host).
    #[serde(default)]
    pub cookie_domain: Option<String>,

    /// Cookie path.
    #[serde(default = "default_cookie_path")]
    pub cookie_path: String,

    /// Require HTTPS for cookies (Secure flag).
    #[serde(default = "default_true")]
    pub cookie_secure: bool,

    /// Set HttpOnly flag on cookies.
    #[serde(default = "default_true")]
    pub cookie_http_only: bool,

    /// SameSite attribute value.
    #[serde(default = "default_same_site")]
    pub cookie_same_site: String,

    /// Header carrying the principal on allowed requests.
    #[serde(default = "default_user_id_header")]
    pub user_id_header: String,

    /// Header carrying the auth method on allowed requests.
    #[serde(default = "default_auth_method_header")]
    pub auth_method_header: String,

    /// Attribute mapping: CAS attribute name -> header name.
    /// e.g., {"mail": "X-Auth-Email", "memberOf": "X-Auth-Groups"}
    #[serde(default)]
    pub attribute_mapping: HashMap<String, String>,

    /// Paths to protect with CAS authentication (if empty, protects all).
    #[serde(default)]
    pub protected_paths: Vec<String>,

    /// Paths to exclude from CAS authentication.
    #[serde(default)]
    pub excluded_paths: Vec<String>,

    /// Session cleanup interval in seconds.
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,
}

fn default_callback_path() -> String {
    "/cas/callback".to_string()
}

fn default_login_path() -> String {
    "/cas/login".to_string()
}

fn default_logout_path() -> String {
    "/cas/logout".to_string()
}

fn default_post_login_redirect() -> String {
    "/".to_string()
}

fn default_validation_timeout() -> u64 {
    DEFAULT_VALIDATION_TIMEOUT_SECS
}

/// Longest accepted session lifetime (one year).
pub const MAX_SESSION_TTL_SECS: u64 = 365 * 24 * 60 * 60;

fn default_session_ttl() -> u64 {
    8 * 60 * 60 // 8 hours
}

fn default_cookie_name() -> String {
    "zentinel_cas_session".to_string()
}

fn default_cookie_path() -> String {
    "/".to_string()
}

fn default_true() -> bool {
    true
}

fn default_same_site() -> String {
    "Lax".to_string()
}

fn default_user_id_header() -> String {
    "X-User-Id".to_string()
}

fn default_auth_method_header() -> String {
    "X-Auth-Method".to_string()
}

fn default_cleanup_interval() -> u64 {
    300 // 5 minutes
}

impl Default for CasConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            server_url: String::new(),
            service_url: String::new(),
            callback_path: default_callback_path(),
            login_path: default_login_path(),
            logout_path: default_logout_path(),
            post_login_redirect: default_post_login_redirect(),
            post_logout_service: None,
            renew: false,
            gateway: false,
            validation_timeout_secs: default_validation_timeout(),
            session_ttl_secs: default_session_ttl(),
            session_cookie_name: default_cookie_name(),
            cookie_domain: None,
            cookie_path: default_cookie_path(),
            cookie_secure: true,
            cookie_http_only: true,
            cookie_same_site: default_same_site(),
            user_id_header: default_user_id_header(),
            auth_method_header: default_auth_method_header(),
            attribute_mapping: HashMap::new(),
            protected_paths: Vec::new(),
            excluded_paths: Vec::new(),
            cleanup_interval_secs: default_cleanup_interval(),
        }
    }
}

impl CasConfig {
    /// Load a JSON overlay file on top of the defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read CAS config: {:?}", path))?;
        let json: CasConfigJson = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse CAS config: {:?}", path))?;

        let mut config = Self::default();
        json.apply_to(&mut config);
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if !self.enabled {
            return Ok(());
        }

        if self.server_url.is_empty() {
            return Err("CAS server_url is required".to_string());
        }

        if !self.server_url.starts_with("https://") && !self.server_url.starts_with("http://") {
            return Err("CAS server_url must be a valid HTTP(S) URL".to_string());
        }

        if self.service_url.is_empty() {
            return Err("CAS service_url is required".to_string());
        }

        if self.validation_timeout_secs == 0 {
            return Err("CAS validation_timeout_secs must be greater than zero".to_string());
        }

        if self.session_ttl_secs == 0 || self.session_ttl_secs > MAX_SESSION_TTL_SECS {
            return Err(format!(
                "CAS session_ttl_secs must be between 1 and {}",
                MAX_SESSION_TTL_SECS
            ));
        }

        if self.session_cookie_name.is_empty() {
            return Err("CAS session_cookie_name must not be empty".to_string());
        }

        Ok(())
    }

    /// Check if a path should be protected by CAS.
    pub fn should_protect_path(&self, path: &str) -> bool {
        if self.excluded_paths.iter().any(|p| path.starts_with(p)) {
            return false;
        }

        if self.protected_paths.is_empty() {
            return true;
        }

        self.protected_paths.iter().any(|p| path.starts_with(p))
    }

    /// Check if the path (without query) is the ticket callback.
    pub fn is_callback_path(&self, path: &str) -> bool {
        path == self.callback_path
    }

    /// Build the session cookie value.
    pub fn build_cookie(&self, session_id: &str) -> String {
        self.cookie_with_max_age(session_id, self.session_ttl_secs)
    }

    /// Build a cookie that makes the browser drop the session cookie.
    pub fn build_expired_cookie(&self) -> String {
        self.cookie_with_max_age("", 0)
    }

    fn cookie_with_max_age(&self, value: &str, max_age: u64) -> String {
        let mut cookie = format!("{}={}", self.session_cookie_name, value);

        if let Some(ref domain) = self.cookie_domain {
            cookie.push_str(&format!("; Domain={}", domain));
        }

        cookie.push_str(&format!("; Path={}", self.cookie_path));

        if self.cookie_secure {
            cookie.push_str("; Secure");
        }

        if self.cookie_http_only {
            cookie.push_str("; HttpOnly");
        }

        cookie.push_str(&format!("; SameSite={}", self.cookie_same_site));
        cookie.push_str(&format!("; Max-Age={}", max_age));

        cookie
    }

    /// Parse session ID from cookie header.
    pub fn parse_session_cookie(&self, cookie_header: &str) -> Option<String> {
        let prefix = format!("{}=", self.session_cookie_name);
        cookie_header
            .split(';')
            .map(str::trim)
            .find_map(|part| part.strip_prefix(&prefix))
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    }
}

/// JSON configuration overlay.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub struct CasConfigJson {
    pub enabled: Option<bool>,
    pub server_url: Option<String>,
    pub service_url: Option<String>,
    pub callback_path: Option<String>,
    pub login_path: Option<String>,
    pub logout_path: Option<String>,
    pub post_login_redirect: Option<String>,
    pub post_logout_service: Option<String>,
    pub renew: Option<bool>,
    pub gateway: Option<bool>,
    pub validation_timeout_secs: Option<u64>,
    pub session_ttl_secs: Option<u64>,
    pub session_cookie_name: Option<String>,
    pub cookie_domain: Option<String>,
    pub cookie_path: Option<String>,
    pub cookie_secure: Option<bool>,
    pub cookie_http_only: Option<bool>,
    pub cookie_same_site: Option<String>,
    pub user_id_header: Option<String>,
    pub auth_method_header: Option<String>,
    #[serde(default)]
    pub attribute_mapping: HashMap<String, String>,
    #[serde(default)]
    pub protected_paths: Vec<String>,
    #[serde(default)]
    pub excluded_paths: Vec<String>,
    pub cleanup_interval_secs: Option<u64>,
}

impl CasConfigJson {
    /// Merge JSON config into existing config.
    pub fn apply_to(&self, config: &mut CasConfig) {
        if let Some(enabled) = self.enabled {
            config.enabled = enabled;
        }
        if let Some(ref url) = self.server_url {
            config.server_url = url.clone();
        }
        if let Some(ref url) = self.service_url {
            config.service_url = url.clone();
        }
        if let Some(ref path) = self.callback_path {
            config.callback_path = path.clone();
        }
        if let Some(ref path) = self.login_path {
            config.login_path = path.clone();
        }
        if let Some(ref path) = self.logout_path {
            config.logout_path = path.clone();
        }
        if let Some(ref target) = self.post_login_redirect {
            config.post_login_redirect = target.clone();
        }
        if let Some(ref service) = self.post_logout_service {
            config.post_logout_service = Some(service.clone());
        }
        if let Some(renew) = self.renew {
            config.renew = renew;
        }
        if let Some(gateway) = self.gateway {
            config.gateway = gateway;
        }
        if let Some(timeout) = self.validation_timeout_secs {
            config.validation_timeout_secs = timeout;
        }
        if let Some(ttl) = self.session_ttl_secs {
            config.session_ttl_secs = ttl;
        }
        if let Some(ref name) = self.session_cookie_name {
            config.session_cookie_name = name.clone();
        }
        if let Some(ref domain) = self.cookie_domain {
            config.cookie_domain = Some(domain.clone());
        }
        if let Some(ref path) = self.cookie_path {
            config.cookie_path = path.clone();
        }
        if let Some(secure) = self.cookie_secure {
            config.cookie_secure = secure;
        }
        if let Some(http_only) = self.cookie_http_only {
            config.cookie_http_only = http_only;
        }
        if let Some(ref same_site) = self.cookie_same_site {
            config.cookie_same_site = same_site.clone();
        }
        if let Some(ref header) = self.user_id_header {
            config.user_id_header = header.clone();
        }
        if let Some(ref header) = self.auth_method_header {
            config.auth_method_header = header.clone();
        }
        if !self.attribute_mapping.is_empty() {
            config.attribute_mapping = self.attribute_mapping.clone();
        }
        if !self.protected_paths.is_empty() {
            config.protected_paths = self.protected_paths.clone();
        }
        if !self.excluded_paths.is_empty() {
            config.excluded_paths = self.excluded_paths.clone();
        }
        if let Some(interval) = self.cleanup_interval_secs {
            config.cleanup_interval_secs = interval;
        }
    }
}
