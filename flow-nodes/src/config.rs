use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer};
use sfconn::config::{ConnectionConfig, ContextConfig};
use sfconn::host::NodeProperty;

use crate::platform_events::replay::ReplaySetting;

/// Complete flow description.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FlowConfig {
    #[serde(default)]
    pub connections: Vec<ConnectionConfig>,
    #[serde(default)]
    pub nodes: Vec<NodeConfig>,
    #[serde(default)]
    pub context: ContextConfig,
}

/// One node, selected by its `type` key.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum NodeConfig {
    Query(QueryNodeConfig),
    Describe(DescribeNodeConfig),
    Http(HttpNodeConfig),
    PlatformEventSubscriber(SubscriberNodeConfig),
    PlatformEventPublisher(PublisherNodeConfig),
    GenerateLoopKeys(LoopKeysNodeConfig),
}

impl NodeConfig {
    pub fn id(&self) -> &str {
        match self {
            NodeConfig::Query(c) => &c.id,
            NodeConfig::Describe(c) => &c.id,
            NodeConfig::Http(c) => &c.id,
            NodeConfig::PlatformEventSubscriber(c) => &c.id,
            NodeConfig::PlatformEventPublisher(c) => &c.id,
            NodeConfig::GenerateLoopKeys(c) => &c.id,
        }
    }
}

fn default_target() -> String {
    "payload".to_string()
}

fn default_query_api() -> String {
    "soql".to_string()
}

fn default_describe_api() -> String {
    "soap".to_string()
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct QueryNodeConfig {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Session Holder to attach to.
    pub connection: String,
    /// `soql` or `tooling`.
    #[serde(default = "default_query_api")]
    pub api: String,
    #[serde(default)]
    pub query: NodeProperty,
    #[serde(default = "default_target")]
    pub target: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DescribeNodeConfig {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub connection: String,
    /// `soap`, `tooling` or `metadata`.
    #[serde(default = "default_describe_api")]
    pub api: String,
    #[serde(default)]
    pub describe_all: bool,
    #[serde(default)]
    pub object: Option<NodeProperty>,
    #[serde(default = "default_target")]
    pub target: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HttpNodeConfig {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub connection: String,
    #[serde(default)]
    pub url: NodeProperty,
    #[serde(default = "default_target")]
    pub target: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SubscriberNodeConfig {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub connection: String,
    /// Platform event API name, e.g. `Order_Placed__e`.
    pub event_object: String,
    /// Starting offset: an integer, or legacy text such as `"12!"`.
    #[serde(default, deserialize_with = "deserialize_replay")]
    pub replay_id: ReplaySetting,
    /// Use `replay_id` even when an offset has been persisted.
    #[serde(default)]
    pub force_replay: bool,
}

impl SubscriberNodeConfig {
    /// Replay setting with `force_replay` folded in.
    pub fn replay(&self) -> ReplaySetting {
        ReplaySetting {
            offset: self.replay_id.offset,
            force: self.replay_id.force || self.force_replay,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PublisherNodeConfig {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub connection: String,
    pub event_object: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LoopKeysNodeConfig {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub array_path: String,
    /// Path inside each element; the element itself when empty.
    #[serde(default)]
    pub value_path: String,
    #[serde(default = "default_target")]
    pub target_path: String,
}

fn deserialize_replay<'de, D>(deserializer: D) -> Result<ReplaySetting, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(i64),
        Text(String),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Number(n) => ReplaySetting {
            offset: Some(n),
            force: false,
        },
        Raw::Text(s) => ReplaySetting::parse(&s),
    })
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> Result<FlowConfig> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path))?;
    let config: FlowConfig =
        toml::from_str(&contents).with_context(|| format!("Failed to parse {}", path))?;
    Ok(config)
}
