//! CAS `serviceValidate` response parsing.
//!
//! Elements are matched by local name only, so `cas:`, any other prefix or a
//! default namespace declaration all parse the same way.

use roxmltree::{Document, Node};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

const SUCCESS_ELEMENT: &str = "authenticationSuccess";
const FAILURE_ELEMENT: &str = "authenticationFailure";
const UID_ELEMENT: &str = "uid";
const USER_ELEMENT: &str = "user";

/// Message used when a failure node carries neither text nor a code.
const GENERIC_FAILURE_MESSAGE: &str = "CAS authentication failure";

/// Result of parsing a ticket validation response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ValidationOutcome {
    /// The CAS server vouched for the ticket.
    Success {
        principal: String,
        attributes: BTreeMap<String, String>,
    },
    /// The CAS server rejected the ticket.
    Failure {
        code: Option<String>,
        message: String,
    },
    /// The body was not XML, or not a recognizable CAS response.
    Malformed { raw_body: String, reason: String },
}

impl ValidationOutcome {
    fn malformed(raw_body: &str, reason: impl Into<String>) -> Self {
        Self::Malformed {
            raw_body: raw_body.to_string(),
            reason: reason.into(),
        }
    }

    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::Failure { .. } => "failure",
            Self::Malformed { .. } => "malformed",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn principal(&self) -> Option<&str> {
        match self {
            Self::Success { principal, .. } => Some(principal),
            _ => None,
        }
    }
}

/// Parse a raw `serviceValidate` body.
///
/// Never fails: anything that is not a well-formed success or failure
/// response comes back as [`ValidationOutcome::Malformed`] with the body kept
/// for diagnostics.
pub fn parse(raw_body: &str) -> ValidationOutcome {
    if raw_body.trim().is_empty() {
        return ValidationOutcome::malformed(raw_body, "empty response body");
    }

    let doc = match Document::parse(raw_body) {
        Ok(doc) => doc,
        Err(e) => {
            debug!(error = %e, "CAS response is not well-formed XML");
            return ValidationOutcome::malformed(raw_body, format!("invalid XML: {e}"));
        }
    };

    if let Some(success) = find_element(doc.root(), SUCCESS_ELEMENT) {
        return parse_success(raw_body, success);
    }

    if let Some(failure) = find_element(doc.root(), FAILURE_ELEMENT) {
        return parse_failure(failure);
    }

    ValidationOutcome::malformed(
        raw_body,
        "response contains neither authenticationSuccess nor authenticationFailure",
    )
}

fn parse_success(raw_body: &str, success: Node<'_, '_>) -> ValidationOutcome {
    let mut attributes = BTreeMap::new();

    // descendants() yields the node itself first
    for node in success.descendants().skip(1).filter(|n| n.is_element()) {
        let text = own_text(node);
        let text = text.trim();
        if text.is_empty() {
            continue;
        }
        attributes.insert(node.tag_name().name().to_string(), text.to_string());
    }

    let principal = attributes
        .get(UID_ELEMENT)
        .or_else(|| attributes.get(USER_ELEMENT))
        .cloned();

    match principal {
        Some(principal) => ValidationOutcome::Success {
            principal,
            attributes,
        },
        None => ValidationOutcome::malformed(
            raw_body,
            "authenticationSuccess without a uid or user element",
        ),
    }
}

fn parse_failure(failure: Node<'_, '_>) -> ValidationOutcome {
    let code = failure
        .attribute("code")
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string);

    let text: String = failure
        .descendants()
        .filter(|n| n.is_text())
        .filter_map(|n| n.text())
        .collect();
    let text = text.trim();

    let message = if !text.is_empty() {
        text.to_string()
    } else if let Some(ref code) = code {
        code.clone()
    } else {
        GENERIC_FAILURE_MESSAGE.to_string()
    };

    ValidationOutcome::Failure { code, message }
}

/// First element at or below `root` with the given local name.
fn find_element<'a, 'input>(root: Node<'a, 'input>, local: &str) -> Option<Node<'a, 'input>> {
    root.descendants()
        .find(|n| n.is_element() && n.tag_name().name() == local)
}

/// Concatenated direct text children, so wrapper elements contribute nothing.
fn own_text(node: Node<'_, '_>) -> String {
    node.children()
        .filter(|c| c.is_text())
        .filter_map(|c| c.text())
        .collect()
}
