//! Error guidance for failures raised by external systems.
//!
//! Matchers map a captured error, keyed by where it was captured, to a
//! user-facing and a developer-facing explanation. When several matchers
//! match, their messages are joined with `" OR "` in registration order.
//!
//! ```
//! use sfconn::guidance::{Audience, ErrorMatcher, GuidanceRegistry};
//!
//! let registry = GuidanceRegistry::new();
//! registry.add_matcher(ErrorMatcher::keyed(
//!     "session.login",
//!     "Could not log in",
//!     "Check the username, password and security token",
//! ));
//!
//! let err = std::io::Error::new(std::io::ErrorKind::Other, "boom");
//! let text = registry.guidance_string("session.login", &err, Audience::Developer, "unknown");
//! assert_eq!(text, "Check the username, password and security token");
//! ```

use std::fmt;
use std::sync::{Arc, RwLock};

pub mod matchers;


/// Who a guidance message is written for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Audience {
    Developer,
    User,
}

/// Guidance produced by a matching [`ErrorMatcher`].
#[derive(Clone, Debug, PartialEq)]
pub struct ErrorGuidance {
    pub user_message: String,
    pub developer_message: String,
    /// Origin key the guidance was produced for.
    pub key: Option<String>,
}

impl ErrorGuidance {
    pub fn new(user_message: impl Into<String>, developer_message: impl Into<String>) -> Self {
        Self {
            user_message: user_message.into(),
            developer_message: developer_message.into(),
            key: None,
        }
    }

    pub fn message_for(&self, audience: Audience) -> &str {
        match audience {
            Audience::Developer => &self.developer_message,
            Audience::User => &self.user_message,
        }
    }
}

type MatchFn =
    dyn Fn(&str, &(dyn std::error::Error + 'static)) -> Option<ErrorGuidance> + Send + Sync;

/// Rule that turns an error signature into guidance.
#[derive(Clone)]
pub enum ErrorMatcher {
    /// Matches on the origin key alone.
    Keyed {
        key: String,
        user_message: String,
        developer_message: String,
    },
    /// Inspects the key and the error itself.
    Predicate { key: String, matcher: Arc<MatchFn> },
}

impl ErrorMatcher {
    pub fn keyed(
        key: impl Into<String>,
        user_message: impl Into<String>,
        developer_message: impl Into<String>,
    ) -> Self {
        ErrorMatcher::Keyed {
            key: key.into(),
            user_message: user_message.into(),
            developer_message: developer_message.into(),
        }
    }

    pub fn predicate<F>(key: impl Into<String>, matcher: F) -> Self
    where
        F: Fn(&str, &(dyn std::error::Error + 'static)) -> Option<ErrorGuidance>
            + Send
            + Sync
            + 'static,
    {
        ErrorMatcher::Predicate {
            key: key.into(),
            matcher: Arc::new(matcher),
        }
    }

    pub fn key(&self) -> &str {
        match self {
            ErrorMatcher::Keyed { key, .. } | ErrorMatcher::Predicate { key, .. } => key,
        }
    }

    pub fn matches_key(&self, key: &str) -> bool {
        self.key() == key
    }

    pub fn matches(
        &self,
        key: &str,
        error: &(dyn std::error::Error + 'static),
    ) -> Option<ErrorGuidance> {
        match self {
            ErrorMatcher::Keyed {
                user_message,
                developer_message,
                ..
            } => self
                .matches_key(key)
                .then(|| ErrorGuidance::new(user_message.clone(), developer_message.clone())),
            ErrorMatcher::Predicate { matcher, .. } => matcher(key, error),
        }
    }
}

impl fmt::Debug for ErrorMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorMatcher::Keyed { key, .. } => f.debug_struct("Keyed").field("key", key).finish(),
            ErrorMatcher::Predicate { key, .. } => {
                f.debug_struct("Predicate").field("key", key).finish()
            }
        }
    }
}

/// Ordered collection of matchers.
///
/// Created once at startup and shared (`Arc`) with every component that
/// reports external errors. Matchers are registered during composition.
#[derive(Debug, Default)]
pub struct GuidanceRegistry {
    matchers: RwLock<Vec<ErrorMatcher>>,
}

impl GuidanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the built-in matchers.
    pub fn with_builtin_matchers() -> Self {
        let registry = Self::new();
        registry.add_matchers(matchers::builtin());
        registry
    }

    pub fn add_matcher(&self, matcher: ErrorMatcher) {
        self.write().push(matcher);
    }

    pub fn add_matchers(&self, matchers: impl IntoIterator<Item = ErrorMatcher>) {
        self.write().extend(matchers);
    }

    pub fn clear(&self) {
        self.write().clear();
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// All guidance matching `(key, error)`, in registration order.
    pub fn guidance(
        &self,
        key: &str,
        error: &(dyn std::error::Error + 'static),
    ) -> Vec<ErrorGuidance> {
        self.read()
            .iter()
            .filter_map(|m| m.matches(key, error))
            .map(|mut g| {
                g.key = Some(key.to_string());
                g
            })
            .collect()
    }

    /// Matching messages for `audience` joined with `" OR "`, or `default`
    /// when nothing matches.
    pub fn guidance_string(
        &self,
        key: &str,
        error: &(dyn std::error::Error + 'static),
        audience: Audience,
        default: &str,
    ) -> String {
        let joined = self
            .guidance(key, error)
            .iter()
            .map(|g| g.message_for(audience))
            .filter(|m| !m.is_empty())
            .collect::<Vec<_>>()
            .join(" OR ");

        if joined.is_empty() {
            default.to_string()
        } else {
            joined
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<ErrorMatcher>> {
        self.matchers.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Vec<ErrorMatcher>> {
        self.matchers.write().unwrap_or_else(|p| p.into_inner())
    }
}
