//! Flow nodes built on the `sfconn` session lifecycle.
//!
//! Every session-dependent node composes a `SessionConsumer`, attaches to a
//! Session Holder through `listen_to_connection`, and handles inbound flow
//! messages with whatever session is current.
//!
//! ```text
//!                 ┌───────────────────────────────┐
//!  flow.toml ───▶ │ Flow (builder / input router) │
//!                 └───────────────┬───────────────┘
//!        ┌──────────┬──────────┬──┴───────┬─────────────┬──────────────┐
//!        ▼          ▼          ▼          ▼             ▼              ▼
//!     query     describe     http    pe-subscriber  pe-publisher  loop-keys
//!        └──────────┴──────────┴──────────┴─────────────┘
//!                      session-dependent (SessionAware)
//! ```
//!
//! # Core Types
//!
//! - [`FlowNode`] - inbound message handling shared by every node type
//! - [`flow::Flow`] - builds holders and nodes from configuration
//! - [`config::FlowConfig`] - the TOML flow description

use async_trait::async_trait;
use sfconn::host::FlowMessage;

pub mod config;
pub mod describe;
pub mod flow;
pub mod http;
pub mod loop_keys;
pub mod platform_events;
pub mod query;

pub use config::{load_config, FlowConfig, NodeConfig};
pub use flow::Flow;

/// A node that accepts flow messages.
///
/// Errors never escape `on_input`; they go to the node's error channel.
#[async_trait]
pub trait FlowNode: Send + Sync {
    fn id(&self) -> &str;

    /// Node type name as used in configuration.
    fn kind(&self) -> &'static str;

    async fn on_input(&self, msg: FlowMessage);
}
