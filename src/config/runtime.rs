/// Process-level settings read from the environment.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeConfig {
    /// Flow configuration file.
    pub config_path: String,
    /// Log in against a scripted offline session instead of the network.
    pub offline: bool,
    /// Overrides the context database path from the config file.
    pub context_db: Option<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            config_path: "flow.toml".to_string(),
            offline: false,
            context_db: None,
        }
    }
}

impl RuntimeConfig {
    /// Build from env vars, falling back to defaults.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("SFCONN_CONFIG") {
            if !v.is_empty() {
                cfg.config_path = v;
            }
        }
        if let Ok(v) = std::env::var("SFCONN_OFFLINE") {
            if let Ok(b) = v.parse::<bool>() {
                cfg.offline = b;
            }
        }
        if let Ok(v) = std::env::var("SFCONN_CONTEXT_DB") {
            cfg.context_db = Some(v);
        }

        cfg
    }
}
