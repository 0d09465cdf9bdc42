//! Request handling for the CAS login flow.
//!
//! Decides, per request, whether to complete a ticket callback, start a
//! login, end a session, or pass the request through with identity headers.
//! The host web layer turns the returned [`FlowResponse`] into HTTP.

use reqwest::header::{HeaderName, HeaderValue};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cas::{AuthError, CasClient, Identity, AUTH_METHOD};
use crate::session::{SessionId, SessionSink};

/// The parts of an incoming request the flow looks at.
#[derive(Debug, Clone, Default)]
pub struct FlowRequest {
    /// Request path including the query string.
    pub path: String,
    /// Raw `Cookie` header, if any.
    pub cookie: Option<String>,
    /// Client address, recorded on new sessions.
    pub client_ip: Option<String>,
}

impl FlowRequest {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn with_cookie(mut self, cookie: impl Into<String>) -> Self {
        self.cookie = Some(cookie.into());
        self
    }

    pub fn with_client_ip(mut self, ip: impl Into<String>) -> Self {
        self.client_ip = Some(ip.into());
        self
    }

    /// Path without the query string.
    pub fn route(&self) -> &str {
        self.path.split_once('?').map(|(p, _)| p).unwrap_or(&self.path)
    }

    /// First value of a query parameter, percent-decoded.
    pub fn query_param(&self, name: &str) -> Option<String> {
        let (_, query) = self.path.split_once('?')?;
        query.split('&').find_map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (key == name).then(|| {
                urlencoding::decode(value)
                    .map(|s| s.into_owned())
                    .unwrap_or_else(|_| value.to_string())
            })
        })
    }
}

/// What the host should do with the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowResponse {
    /// Forward upstream with these request headers set.
    ///
    /// Each header replaces any value of the same name already on the
    /// request, so client-supplied identity headers never reach upstream.
    Allow { headers: Vec<(String, String)> },
    /// Answer with `302 Found`.
    Redirect {
        location: String,
        set_cookie: Option<String>,
    },
    /// Answer with an error status.
    Deny { status: u16, message: String },
}

impl FlowResponse {
    fn redirect(location: String) -> Self {
        FlowResponse::Redirect {
            location,
            set_cookie: None,
        }
    }
}

/// CAS login flow over a client and a session sink.
pub struct CasFlow {
    client: CasClient,
    sessions: Arc<dyn SessionSink>,
}

impl CasFlow {
    pub fn new(client: CasClient, sessions: Arc<dyn SessionSink>) -> Self {
        Self { client, sessions }
    }

    pub fn client(&self) -> &CasClient {
        &self.client
    }

    /// Handle one request.
    pub async fn handle(&self, request: &FlowRequest) -> FlowResponse {
        let config = self.client.config();
        let route = request.route();

        if !config.enabled {
            return FlowResponse::Allow {
                headers: Vec::new(),
            };
        }

        if route == config.login_path {
            debug!("CAS login requested");
            return FlowResponse::redirect(self.client.login_url());
        }

        if route == config.logout_path {
            return self.handle_logout(request);
        }

        if config.is_callback_path(route) {
            return self.handle_callback(request).await;
        }

        if !config.should_protect_path(route) {
            return FlowResponse::Allow {
                headers: Vec::new(),
            };
        }

        match self.current_identity(request) {
            Some(identity) => {
                debug!(principal = %identity.id, "CAS session authentication successful");
                FlowResponse::Allow {
                    headers: self.identity_headers(&identity),
                }
            }
            None => {
                info!(path = %route, "No CAS session, redirecting to CAS login");
                FlowResponse::redirect(self.client.login_url())
            }
        }
    }

    async fn handle_callback(&self, request: &FlowRequest) -> FlowResponse {
        let ticket = match request.query_param("ticket").filter(|t| !t.is_empty()) {
            Some(ticket) => ticket,
            None => {
                warn!("CAS callback without ticket");
                return FlowResponse::Deny {
                    status: 400,
                    message: "Missing ticket".to_string(),
                };
            }
        };

        let identity = match self.client.authenticate(&ticket).await {
            Ok(identity) => identity,
            Err(e) => return Self::auth_failure(e),
        };

        let config = self.client.config();
        let session = match self.sessions.establish(
            identity,
            config.session_ttl_secs,
            request.client_ip.clone(),
        ) {
            Ok(session) => session,
            Err(e) => {
                warn!(error = %e, "Failed to create CAS session");
                return FlowResponse::Deny {
                    status: 500,
                    message: "Failed to create session".to_string(),
                };
            }
        };

        info!(
            principal = %session.principal,
            session_id = %session.id,
            "CAS authentication successful, session created"
        );

        FlowResponse::Redirect {
            location: config.post_login_redirect.clone(),
            set_cookie: Some(config.build_cookie(&session.id.to_hex())),
        }
    }

    fn handle_logout(&self, request: &FlowRequest) -> FlowResponse {
        if let Some(id) = self.session_id(request) {
            match self.sessions.end(id) {
                Ok(true) => info!(session_id = %id, "CAS session ended"),
                Ok(false) => debug!(session_id = %id, "Logout for unknown session"),
                Err(e) => warn!(error = %e, "Failed to end CAS session"),
            }
        }

        FlowResponse::Redirect {
            location: self.client.logout_url(),
            set_cookie: Some(self.client.config().build_expired_cookie()),
        }
    }

    fn auth_failure(error: AuthError) -> FlowResponse {
        warn!(
            error = %error,
            reason = error.reason_code(),
            "CAS ticket validation did not produce an identity"
        );

        FlowResponse::Deny {
            status: 401,
            message: "Unauthorized".to_string(),
        }
    }

    fn session_id(&self, request: &FlowRequest) -> Option<SessionId> {
        let cookie = request.cookie.as_deref()?;
        let value = self.client.config().parse_session_cookie(cookie)?;
        SessionId::from_hex(&value)
    }

    fn current_identity(&self, request: &FlowRequest) -> Option<Identity> {
        let id = self.session_id(request)?;
        match self.sessions.current(id) {
            Ok(session) => session.map(|s| s.identity()),
            Err(e) => {
                warn!(error = %e, "Session lookup failed");
                None
            }
        }
    }

    /// Upstream headers describing an identity.
    ///
    /// Headers whose name is not a valid token or whose value carries
    /// control characters are left out.
    pub fn identity_headers(&self, identity: &Identity) -> Vec<(String, String)> {
        let config = self.client.config();
        let mut headers = Vec::new();

        push_header(&mut headers, config.user_id_header.clone(), &identity.id);
        push_header(&mut headers, config.auth_method_header.clone(), AUTH_METHOD);

        let mut mapped: Vec<_> = config.attribute_mapping.iter().collect();
        mapped.sort();
        for (attr_name, header_name) in mapped {
            if let Some(value) = identity.claims.get(attr_name) {
                push_header(&mut headers, header_name.clone(), value);
            }
        }

        for (key, value) in &identity.claims {
            push_header(&mut headers, format!("X-Auth-Claim-{}", key), value);
        }

        headers
    }
}

fn push_header(headers: &mut Vec<(String, String)>, name: String, value: &str) {
    let valid = HeaderName::from_bytes(name.as_bytes()).is_ok()
        && HeaderValue::from_bytes(value.as_bytes()).is_ok();

    if valid {
        headers.push((name, value.to_string()));
    } else {
        warn!(header = %name.escape_debug(), "Skipping identity header with invalid name or value");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cas::CasConfig;
    use crate::session::SessionStore;
    use mockito::Matcher;
    use std::collections::BTreeMap;

    const SUCCESS_BODY: &str = r#"<cas:serviceResponse xmlns:cas="http://www.yale.edu/tp/cas"><cas:authenticationSuccess><cas:user>jdoe</cas:user><cas:attributes><cas:mail>jane@example.edu</cas:mail></cas:attributes></cas:authenticationSuccess></cas:serviceResponse>"#;

    fn flow(server_url: String) -> (CasFlow, Arc<SessionStore>) {
        let mut config = CasConfig {
            enabled: true,
            server_url,
            service_url: "https://app.example.edu/cas/callback".to_string(),
            post_login_redirect: "/protected".to_string(),
            excluded_paths: vec!["/health".to_string()],
            ..Default::default()
        };
        config
            .attribute_mapping
            .insert("mail".to_string(), "X-Auth-Email".to_string());

        let store = Arc::new(SessionStore::new());
        let client = CasClient::new(config).unwrap();
        (CasFlow::new(client, store.clone()), store)
    }

    fn cookie_pair(set_cookie: &str) -> String {
        set_cookie.split(';').next().unwrap().to_string()
    }

    #[test]
    fn test_query_param() {
        let request = FlowRequest::new("/cas/callback?a=1&ticket=ST-1%2Dx&b");
        assert_eq!(request.route(), "/cas/callback");
        assert_eq!(request.query_param("ticket").as_deref(), Some("ST-1-x"));
        assert_eq!(request.query_param("b").as_deref(), Some(""));
        assert_eq!(request.query_param("missing"), None);
        assert_eq!(FlowRequest::new("/plain").query_param("ticket"), None);
    }

    #[tokio::test]
    async fn test_unauthenticated_redirects_to_login() {
        let (flow, _) = flow("https://cas.example.edu/cas".to_string());

        let response = flow.handle(&FlowRequest::new("/protected")).await;
        assert_eq!(
            response,
            FlowResponse::Redirect {
                location: "https://cas.example.edu/cas/login?service=https%3A%2F%2Fapp.example.edu%2Fcas%2Fcallback".to_string(),
                set_cookie: None,
            }
        );

        let response = flow.handle(&FlowRequest::new("/cas/login")).await;
        assert!(matches!(response, FlowResponse::Redirect { .. }));
    }

    #[tokio::test]
    async fn test_excluded_path_passes_through() {
        let (flow, _) = flow("https://cas.example.edu/cas".to_string());
        let response = flow.handle(&FlowRequest::new("/health")).await;
        assert_eq!(response, FlowResponse::Allow { headers: Vec::new() });
    }

    #[tokio::test]
    async fn test_callback_without_ticket() {
        let (flow, _) = flow("https://cas.example.edu/cas".to_string());
        let response = flow.handle(&FlowRequest::new("/cas/callback")).await;
        assert!(matches!(response, FlowResponse::Deny { status: 400, .. }));
    }

    #[tokio::test]
    async fn test_full_login_and_logout() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/serviceValidate")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("ticket".into(), "ST-good".into()),
                Matcher::UrlEncoded(
                    "service".into(),
                    "https://app.example.edu/cas/callback".into(),
                ),
            ]))
            .with_status(200)
            .with_body(SUCCESS_BODY)
            .create_async()
            .await;

        let (flow, store) = flow(server.url());

        let response = flow
            .handle(&FlowRequest::new("/cas/callback?ticket=ST-good").with_client_ip("10.1.2.3"))
            .await;
        let set_cookie = match response {
            FlowResponse::Redirect {
                location,
                set_cookie: Some(cookie),
            } => {
                assert_eq!(location, "/protected");
                cookie
            }
            other => panic!("expected redirect with cookie, got {:?}", other),
        };
        assert_eq!(store.session_count().unwrap(), 1);

        let cookie = cookie_pair(&set_cookie);
        let response = flow
            .handle(&FlowRequest::new("/protected").with_cookie(cookie.clone()))
            .await;
        let headers = match response {
            FlowResponse::Allow { headers } => headers,
            other => panic!("expected allow, got {:?}", other),
        };
        let header = |name: &str| {
            headers
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.as_str())
        };
        assert_eq!(header("X-User-Id"), Some("jdoe"));
        assert_eq!(header("X-Auth-Method"), Some("cas"));
        assert_eq!(header("X-Auth-Email"), Some("jane@example.edu"));
        assert_eq!(header("X-Auth-Claim-user"), Some("jdoe"));

        let response = flow
            .handle(&FlowRequest::new("/cas/logout").with_cookie(cookie.clone()))
            .await;
        match response {
            FlowResponse::Redirect {
                location,
                set_cookie: Some(expired),
            } => {
                assert!(location.contains("/logout?service="));
                assert!(expired.contains("Max-Age=0"));
            }
            other => panic!("expected logout redirect, got {:?}", other),
        }
        assert_eq!(store.session_count().unwrap(), 0);

        let response = flow
            .handle(&FlowRequest::new("/protected").with_cookie(cookie))
            .await;
        assert!(matches!(response, FlowResponse::Redirect { set_cookie: None, .. }));
    }

    #[tokio::test]
    async fn test_rejected_ticket_creates_no_session() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/serviceValidate")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"<cas:serviceResponse xmlns:cas="http://www.yale.edu/tp/cas"><cas:authenticationFailure code="INVALID_TICKET">Ticket has already been used</cas:authenticationFailure></cas:serviceResponse>"#)
            .create_async()
            .await;

        let (flow, store) = flow(server.url());
        let response = flow
            .handle(&FlowRequest::new("/cas/callback?ticket=ST-used"))
            .await;

        assert!(matches!(response, FlowResponse::Deny { status: 401, .. }));
        assert_eq!(store.session_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unknown_cookie_redirects() {
        let (flow, _) = flow("https://cas.example.edu/cas".to_string());
        let request = FlowRequest::new("/protected")
            .with_cookie(format!("zentinel_cas_session={}", SessionId::new().to_hex()));
        assert!(matches!(
            flow.handle(&request).await,
            FlowResponse::Redirect { .. }
        ));
    }

    #[tokio::test]
    async fn test_disabled_config_passes_everything_through() {
        let config = CasConfig {
            enabled: false,
            ..Default::default()
        };
        let client = CasClient::new(config).unwrap();
        let flow = CasFlow::new(client, Arc::new(SessionStore::new()));

        for path in ["/anything", "/cas/login", "/cas/logout", "/cas/callback?ticket=ST-1"] {
            assert_eq!(
                flow.handle(&FlowRequest::new(path)).await,
                FlowResponse::Allow { headers: Vec::new() },
                "path {}",
                path
            );
        }
    }

    #[test]
    fn test_identity_headers_skip_invalid() {
        let (flow, _) = flow("https://cas.example.edu/cas".to_string());
        let identity = Identity::new(
            "u1",
            BTreeMap::from([
                ("cn".to_string(), "José Núñez".to_string()),
                ("mail".to_string(), "a@example.edu\r\nX-Injected: 1".to_string()),
                ("prénom".to_string(), "Jo".to_string()),
                ("title".to_string(), "line one\nline two".to_string()),
            ]),
        );

        let headers = flow.identity_headers(&identity);
        let names: Vec<&str> = headers.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(
            names,
            vec!["X-User-Id", "X-Auth-Method", "X-Auth-Claim-cn"]
        );
        assert_eq!(headers[2].1, "José Núñez");
    }

    #[test]
    fn test_identity_headers_order() {
        let (flow, _) = flow("https://cas.example.edu/cas".to_string());
        let identity = Identity::new(
            "u1",
            BTreeMap::from([
                ("uid".to_string(), "u1".to_string()),
                ("cn".to_string(), "User One".to_string()),
            ]),
        );

        let headers = flow.identity_headers(&identity);
        assert_eq!(headers[0], ("X-User-Id".to_string(), "u1".to_string()));
        assert_eq!(headers[1], ("X-Auth-Method".to_string(), "cas".to_string()));
        assert_eq!(
            &headers[2..],
            &[
                ("X-Auth-Claim-cn".to_string(), "User One".to_string()),
                ("X-Auth-Claim-uid".to_string(), "u1".to_string()),
            ]
        );
    }
}
