use std::fmt;

/// Errors reported by the platform API client.
///
/// Kept as a plain enum so guidance matchers can inspect the variant
/// (e.g. a DNS failure during login) instead of parsing strings.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientError {
    /// The login or instance host could not be resolved.
    HostNotFound { host: String },
    /// The platform rejected the credentials or the session token.
    Auth { message: String },
    /// Non-2xx response from the platform.
    Api { status: u16, body: String },
    /// Connection-level failure (refused, reset, timeout).
    Transport(String),
    /// Response body did not have the expected shape.
    Decode(String),
    /// Operation not offered by this client implementation.
    Unsupported(&'static str),
    /// The session or subscription was already closed.
    Closed,
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::HostNotFound { host } => write!(f, "host not found: {}", host),
            ClientError::Auth { message } => write!(f, "authentication failed: {}", message),
            ClientError::Api { status, body } => {
                write!(f, "platform API error (status {}): {}", status, body)
            }
            ClientError::Transport(e) => write!(f, "transport error: {}", e),
            ClientError::Decode(e) => write!(f, "failed to decode response: {}", e),
            ClientError::Unsupported(op) => write!(f, "operation not supported: {}", op),
            ClientError::Closed => write!(f, "session closed"),
        }
    }
}

impl std::error::Error for ClientError {}

impl ClientError {
    /// Map a reqwest failure, recognizing DNS lookup failures for `host`.
    pub(crate) fn from_reqwest(err: reqwest::Error, host: &str) -> Self {
        if err.is_decode() {
            return ClientError::Decode(err.to_string());
        }
        if err.is_connect() && is_dns_failure(&err) {
            return ClientError::HostNotFound {
                host: host.to_string(),
            };
        }
        ClientError::Transport(err.to_string())
    }
}

/// Walks the error source chain looking for a resolver failure.
fn is_dns_failure(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(e) = current {
        let text = e.to_string().to_lowercase();
        if text.contains("dns error")
            || text.contains("failed to lookup address")
            || text.contains("name or service not known")
            || text.contains("no such host")
        {
            return true;
        }
        current = e.source();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = ClientError::HostNotFound {
            host: "https://login.example.com".to_string(),
        };
        assert_eq!(err.to_string(), "host not found: https://login.example.com");

        let err = ClientError::Api {
            status: 400,
            body: "MALFORMED_QUERY".to_string(),
        };
        assert!(err.to_string().contains("status 400"));
        assert!(err.to_string().contains("MALFORMED_QUERY"));
    }

    #[derive(Debug)]
    struct Outer(Inner);
    #[derive(Debug)]
    struct Inner;

    impl fmt::Display for Outer {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "error trying to connect")
        }
    }
    impl fmt::Display for Inner {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "dns error: failed to lookup address information")
        }
    }
    impl std::error::Error for Outer {
        fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
            Some(&self.0)
        }
    }
    impl std::error::Error for Inner {}

    #[test]
    fn test_dns_failure_found_in_source_chain() {
        assert!(is_dns_failure(&Outer(Inner)));
        assert!(!is_dns_failure(&Inner2));
    }

    #[derive(Debug)]
    struct Inner2;
    impl fmt::Display for Inner2 {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "connection refused")
        }
    }
    impl std::error::Error for Inner2 {}
}
