pub mod runtime;
pub use runtime::RuntimeConfig;

use serde::Deserialize;

use crate::client::rest::DEFAULT_API_VERSION;

/// One login target. Each configured connection becomes a Session Holder.
///
/// `host`, `username`, `password`, `token`, `client_id` and `client_secret`
/// may hold the name of an environment variable instead of a literal; when
/// such a variable exists its value is used (see [`ConnectionConfig::resolved`]).
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ConnectionConfig {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Security token, appended to the password at login.
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
}

fn default_api_version() -> String {
    DEFAULT_API_VERSION.to_string()
}

impl ConnectionConfig {
    pub fn new(id: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            host: host.into(),
            username: String::new(),
            password: String::new(),
            token: String::new(),
            client_id: String::new(),
            client_secret: String::new(),
            api_version: default_api_version(),
        }
    }

    /// Copy with every env-capable field expanded.
    pub fn resolved(&self) -> Self {
        Self {
            id: self.id.clone(),
            name: self.name.clone(),
            host: expand_env(&self.host),
            username: expand_env(&self.username),
            password: expand_env(&self.password),
            token: expand_env(&self.token),
            client_id: expand_env(&self.client_id),
            client_secret: expand_env(&self.client_secret),
            api_version: self.api_version.clone(),
        }
    }

    /// Password with the security token appended.
    pub fn secret(&self) -> String {
        format!("{}{}", self.password, self.token)
    }
}

/// Where node context (replay offsets) is persisted.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ContextConfig {
    /// SQLite database path. Empty keeps context in memory only.
    #[serde(default = "default_context_path")]
    pub path: String,
}

fn default_context_path() -> String {
    "flow-context.db".to_string()
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            path: default_context_path(),
        }
    }
}

/// Returns the value of the environment variable named `value`, or `value`
/// itself when no such variable is set.
pub fn expand_env(value: &str) -> String {
    if value.is_empty() {
        return String::new();
    }
    std::env::var(value).unwrap_or_else(|_| value.to_string())
}
