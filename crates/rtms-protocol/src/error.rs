//! Vendor error taxonomy.
//!
//! Every error surfaced from a stream session carries the
//! `{code, category, causes, fixes, docs_url}` envelope.  The mapping from
//! vendor handshake `status_code` to category is a fixed table; the category
//! alone decides whether the session may reconnect.

use serde::{Deserialize, Serialize};

/// Error categories.  Retryability is a property of the category, not of
/// the individual status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    Auth,
    Meeting,
    Stream,
    Permission,
    Network,
    Server,
    Limit,
    Media,
    Protocol,
    Security,
    Connection,
    Request,
    Sdk,
    Config,
    Unknown,
}

impl ErrorCategory {
    /// Categories for which the session keeps its reconnect timer.
    ///
    /// Everything else disables reconnect and surfaces a terminal `error`
    /// event.
    pub fn retryable(self) -> bool {
        matches!(
            self,
            ErrorCategory::Network
                | ErrorCategory::Server
                | ErrorCategory::Limit
                | ErrorCategory::Connection
                | ErrorCategory::Media
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::Auth => "auth",
            ErrorCategory::Meeting => "meeting",
            ErrorCategory::Stream => "stream",
            ErrorCategory::Permission => "permission",
            ErrorCategory::Network => "network",
            ErrorCategory::Server => "server",
            ErrorCategory::Limit => "limit",
            ErrorCategory::Media => "media",
            ErrorCategory::Protocol => "protocol",
            ErrorCategory::Security => "security",
            ErrorCategory::Connection => "connection",
            ErrorCategory::Request => "request",
            ErrorCategory::Sdk => "sdk",
            ErrorCategory::Config => "config",
            ErrorCategory::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fixed vendor `status_code` → category table.
pub fn category_for_status(status_code: i64) -> ErrorCategory {
    match status_code {
        1 | 2 | 18 => ErrorCategory::Auth,
        3 => ErrorCategory::Request,
        4 => ErrorCategory::Protocol,
        5 | 13 => ErrorCategory::Meeting,
        6 | 7 => ErrorCategory::Stream,
        8 => ErrorCategory::Permission,
        9 => ErrorCategory::Limit,
        10 | 11 => ErrorCategory::Server,
        12 => ErrorCategory::Network,
        14 => ErrorCategory::Connection,
        15 | 17 => ErrorCategory::Security,
        16 => ErrorCategory::Media,
        _ => ErrorCategory::Unknown,
    }
}

/// The error envelope emitted on `error` events and HTTP error bodies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RtmsError {
    pub code: i64,
    pub category: ErrorCategory,
    pub causes: Vec<String>,
    pub fixes: Vec<String>,
    pub docs_url: String,
}

impl RtmsError {
    /// Build the envelope for a vendor handshake status code.
    pub fn from_status(status_code: i64) -> Self {
        let category = category_for_status(status_code);
        let (causes, fixes) = guidance(category);
        RtmsError {
            code: status_code,
            category,
            causes: causes.iter().map(|s| (*s).to_owned()).collect(),
            fixes: fixes.iter().map(|s| (*s).to_owned()).collect(),
            docs_url: format!("https://rtms.dev/docs/errors#{}", category.as_str()),
        }
    }

    /// Envelope for a client-side failure that never reached the vendor.
    pub fn local(category: ErrorCategory, cause: impl Into<String>) -> Self {
        RtmsError {
            code: -1,
            category,
            causes: vec![cause.into()],
            fixes: Vec::new(),
            docs_url: format!("https://rtms.dev/docs/errors#{}", category.as_str()),
        }
    }

    pub fn retryable(&self) -> bool {
        self.category.retryable()
    }
}

impl std::fmt::Display for RtmsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "status {} ({})", self.code, self.category)?;
        if let Some(cause) = self.causes.first() {
            write!(f, ": {cause}")?;
        }
        Ok(())
    }
}

fn guidance(category: ErrorCategory) -> (&'static [&'static str], &'static [&'static str]) {
    match category {
        ErrorCategory::Auth => (
            &["client credentials rejected", "OAuth token expired or revoked"],
            &["verify client_id/client_secret for the product", "re-issue credentials"],
        ),
        ErrorCategory::Security => (
            &["handshake signature mismatch"],
            &["confirm the client secret used to sign matches the registered app"],
        ),
        ErrorCategory::Meeting => (
            &["meeting unknown to the media server or already ended"],
            &["check the meeting UUID in the webhook payload"],
        ),
        ErrorCategory::Stream => (
            &["stream id unknown or already claimed"],
            &["wait for a fresh rtms_started event"],
        ),
        ErrorCategory::Permission => (
            &["app lacks the media scope it subscribed to"],
            &["grant the missing scope and reinstall the app"],
        ),
        ErrorCategory::Network => (
            &["timeout talking to the media server"],
            &["transient; the session reconnects automatically"],
        ),
        ErrorCategory::Server => (
            &["media server internal error or restart"],
            &["transient; the session reconnects automatically"],
        ),
        ErrorCategory::Limit => (
            &["concurrent stream or rate limit reached"],
            &["reduce concurrent sessions or request a higher limit"],
        ),
        ErrorCategory::Media => (
            &["requested media type not supported for this session"],
            &["narrow the subscription mask"],
        ),
        ErrorCategory::Connection => (
            &["socket dropped before the handshake settled"],
            &["transient; the session reconnects automatically"],
        ),
        ErrorCategory::Request => (
            &["malformed handshake or subscription frame"],
            &["this is a client bug; check the frame against the wire format"],
        ),
        ErrorCategory::Protocol => (
            &["protocol version not accepted"],
            &["upgrade the client"],
        ),
        ErrorCategory::Sdk | ErrorCategory::Config | ErrorCategory::Unknown => (&[], &[]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_table_matches_the_fixed_mapping() {
        assert_eq!(category_for_status(1), ErrorCategory::Auth);
        assert_eq!(category_for_status(2), ErrorCategory::Auth);
        assert_eq!(category_for_status(18), ErrorCategory::Auth);
        assert_eq!(category_for_status(5), ErrorCategory::Meeting);
        assert_eq!(category_for_status(13), ErrorCategory::Meeting);
        assert_eq!(category_for_status(10), ErrorCategory::Server);
        assert_eq!(category_for_status(11), ErrorCategory::Server);
        assert_eq!(category_for_status(12), ErrorCategory::Network);
        assert_eq!(category_for_status(16), ErrorCategory::Media);
        assert_eq!(category_for_status(15), ErrorCategory::Security);
        assert_eq!(category_for_status(17), ErrorCategory::Security);
        assert_eq!(category_for_status(999), ErrorCategory::Unknown);
    }

    #[test]
    fn retryability_follows_category_not_code() {
        for code in [9, 10, 11, 12, 14, 16] {
            assert!(RtmsError::from_status(code).retryable(), "code {code}");
        }
        for code in [1, 2, 3, 5, 6, 13, 15, 17, 18] {
            assert!(!RtmsError::from_status(code).retryable(), "code {code}");
        }
    }

    #[test]
    fn envelope_serializes_with_lowercase_category() {
        let err = RtmsError::from_status(15);
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["category"], "security");
        assert_eq!(json["code"], 15);
        assert!(json["docs_url"].as_str().unwrap().ends_with("#security"));
    }
}
