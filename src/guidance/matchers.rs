use super::{ErrorGuidance, ErrorMatcher};
use crate::client::ClientError;

/// Origin key for errors raised while logging in.
pub const SOURCE_LOGIN: &str = "session.login";

/// Matchers every registry starts with.
pub fn builtin() -> Vec<ErrorMatcher> {
    vec![host_not_found(SOURCE_LOGIN)]
}

/// Recognizes an unresolvable login host.
pub fn host_not_found(login_key: &str) -> ErrorMatcher {
    let expected = login_key.to_string();
    ErrorMatcher::predicate(login_key, move |key, error| {
        if key != expected {
            return None;
        }
        match error.downcast_ref::<ClientError>() {
            Some(ClientError::HostNotFound { host }) => Some(ErrorGuidance::new(
                "Could not connect to login host",
                format!(
                    "Host Address was not found[{}]. Is the address correct? Is the user online?",
                    host
                ),
            )),
            _ => None,
        }
    })
}
