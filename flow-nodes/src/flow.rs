//! Builds a running flow from its configuration.
//!
//! Holders are created and logged in first; nodes attach afterwards and pick
//! up the current session during `listen_to_connection`.

use anyhow::{anyhow, Result};
use sfconn::client::mock::MockAuthenticator;
use sfconn::client::rest::RestAuthenticator;
use sfconn::client::Authenticator;
use sfconn::config::{ConnectionConfig, RuntimeConfig};
use sfconn::consumer::{listen_to_connection, SessionAware};
use sfconn::guidance::GuidanceRegistry;
use sfconn::host::{
    ChannelNode, ContextStore, FlowMessage, NodeContext, NodeHandle, NodeOutput, NodeRegistry,
};
use sfconn::session::SessionHolder;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::{FlowConfig, NodeConfig};
use crate::describe::DescribeNode;
use crate::http::HttpNode;
use crate::loop_keys::GenerateLoopKeys;
use crate::platform_events::{PlatformEventPublisher, PlatformEventSubscriber};
use crate::query::QueryNode;
use crate::FlowNode;

/// Authenticator for a connection: scripted when offline, REST otherwise.
pub fn authenticator_for(connection: &ConnectionConfig, offline: bool) -> Arc<dyn Authenticator> {
    if offline {
        return Arc::new(MockAuthenticator::new());
    }
    let resolved = connection.resolved();
    Arc::new(RestAuthenticator::new(
        resolved.client_id,
        resolved.client_secret,
        resolved.api_version,
    ))
}

/// A deployed flow: holders, nodes and their lifecycle listeners.
pub struct Flow {
    registry: Arc<NodeRegistry>,
    inputs: HashMap<String, Arc<dyn FlowNode>>,
    subscribers: Vec<Arc<PlatformEventSubscriber>>,
    listeners: Vec<JoinHandle<()>>,
}

impl Flow {
    /// Deploys `config` with authenticators chosen from `runtime`.
    pub async fn start(
        config: &FlowConfig,
        runtime: &RuntimeConfig,
        context: Arc<dyn ContextStore>,
        outputs: mpsc::UnboundedSender<NodeOutput>,
    ) -> Result<Self> {
        let offline = runtime.offline;
        if offline {
            info!("Offline mode: connections use scripted sessions");
        }
        Self::start_with(config, |c| authenticator_for(c, offline), context, outputs).await
    }

    /// Deploys `config`, asking `authenticator` for each connection's login.
    pub async fn start_with<F>(
        config: &FlowConfig,
        authenticator: F,
        context: Arc<dyn ContextStore>,
        outputs: mpsc::UnboundedSender<NodeOutput>,
    ) -> Result<Self>
    where
        F: Fn(&ConnectionConfig) -> Arc<dyn Authenticator>,
    {
        let guidance = Arc::new(GuidanceRegistry::with_builtin_matchers());
        let registry = Arc::new(NodeRegistry::new());

        for connection in &config.connections {
            let holder =
                SessionHolder::new(connection, authenticator(connection), Arc::clone(&guidance));
            if registry.register(holder).is_some() {
                warn!(connection = %connection.id, "Duplicate connection id, keeping the last one");
            }
        }
        for id in registry.ids() {
            if let Some(holder) = registry.holder(&id) {
                holder.refresh().await;
            }
        }

        let mut flow = Self {
            registry,
            inputs: HashMap::new(),
            subscribers: Vec::new(),
            listeners: Vec::new(),
        };

        let mut seen = HashSet::new();
        for node_config in &config.nodes {
            if !seen.insert(node_config.id()) {
                return Err(anyhow!("duplicate node id '{}'", node_config.id()));
            }
            flow.add_node(node_config, &context, &outputs).await;
        }

        info!(
            connections = flow.registry.len(),
            nodes = config.nodes.len(),
            "Flow started"
        );
        Ok(flow)
    }

    async fn add_node(
        &mut self,
        config: &NodeConfig,
        context: &Arc<dyn ContextStore>,
        outputs: &mpsc::UnboundedSender<NodeOutput>,
    ) {
        let (id, name) = node_identity(config);
        let handle: Arc<dyn NodeHandle> = Arc::new(ChannelNode::new(id, name, outputs.clone()));

        match config {
            NodeConfig::Query(c) => match QueryNode::new(handle.clone(), c) {
                Ok(node) => self.add_session_node(id, node, &c.connection, handle.as_ref()).await,
                Err(err) => reject(handle.as_ref(), err.to_string()),
            },
            NodeConfig::Describe(c) => match DescribeNode::new(handle.clone(), c) {
                Ok(node) => self.add_session_node(id, node, &c.connection, handle.as_ref()).await,
                Err(err) => reject(handle.as_ref(), err.to_string()),
            },
            NodeConfig::Http(c) => {
                let node = HttpNode::new(handle.clone(), c);
                self.add_session_node(id, node, &c.connection, handle.as_ref()).await;
            }
            NodeConfig::PlatformEventPublisher(c) => {
                match PlatformEventPublisher::new(handle.clone(), c) {
                    Ok(node) => {
                        self.add_session_node(id, node, &c.connection, handle.as_ref()).await
                    }
                    Err(err) => reject(handle.as_ref(), err.to_string()),
                }
            }
            NodeConfig::PlatformEventSubscriber(c) => {
                let node_context = NodeContext::new(Arc::clone(context), id);
                match PlatformEventSubscriber::new(handle.clone(), c, node_context) {
                    Ok(node) => {
                        self.subscribers.push(node.clone());
                        self.attach(node, &c.connection, handle.as_ref()).await;
                    }
                    Err(err) => reject(handle.as_ref(), err.to_string()),
                }
            }
            NodeConfig::GenerateLoopKeys(c) => match GenerateLoopKeys::new(handle.clone(), c) {
                Ok(node) => {
                    self.inputs.insert(id.to_string(), node);
                }
                Err(err) => reject(handle.as_ref(), err.to_string()),
            },
        }
    }

    async fn add_session_node<T: SessionAware + FlowNode>(
        &mut self,
        id: &str,
        node: Arc<T>,
        connection: &str,
        handle: &dyn NodeHandle,
    ) {
        self.attach(node.clone(), connection, handle).await;
        self.inputs.insert(id.to_string(), node);
    }

    async fn attach<T: SessionAware>(&mut self, node: Arc<T>, connection: &str, handle: &dyn NodeHandle) {
        match listen_to_connection(node, &self.registry, connection).await {
            Ok(listener) => self.listeners.push(listener),
            Err(err) => handle.error(err.to_string()),
        }
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    pub fn holder(&self, connection: &str) -> Option<Arc<SessionHolder>> {
        self.registry.holder(connection)
    }

    /// Ids of nodes that accept input, sorted.
    pub fn input_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inputs.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Delivers `msg` to the node `node_id`.
    pub async fn inject(&self, node_id: &str, msg: FlowMessage) -> Result<()> {
        let node = self
            .inputs
            .get(node_id)
            .ok_or_else(|| anyhow!("no node '{}' accepts input", node_id))?;
        node.on_input(msg).await;
        Ok(())
    }

    /// Flow teardown: forced logout of every holder, then stop listening.
    pub async fn stop(self) {
        self.registry.close_all().await;
        for subscriber in &self.subscribers {
            subscriber.unsubscribe().await;
        }
        for listener in &self.listeners {
            listener.abort();
        }
        info!("Flow stopped");
    }
}

fn node_identity(config: &NodeConfig) -> (&str, &str) {
    match config {
        NodeConfig::Query(c) => (&c.id, &c.name),
        NodeConfig::Describe(c) => (&c.id, &c.name),
        NodeConfig::Http(c) => (&c.id, &c.name),
        NodeConfig::PlatformEventSubscriber(c) => (&c.id, &c.name),
        NodeConfig::PlatformEventPublisher(c) => (&c.id, &c.name),
        NodeConfig::GenerateLoopKeys(c) => (&c.id, &c.name),
    }
}

fn reject(handle: &dyn NodeHandle, message: String) {
    error!(node = %handle.id(), error = %message, "Node not started");
    handle.error(message);
}
