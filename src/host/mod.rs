//! Host-side contracts a node runs against.
//!
//! ```text
//!   inbound FlowMessage ──▶ node ──▶ NodeHandle::send   (downstream)
//!                            │  └──▶ NodeHandle::status (visual indicator)
//!                            │  └──▶ NodeHandle::error  (error channel)
//!                            └─────▶ NodeContext get/set (durable per-node values)
//! ```
//!
//! [`ChannelNode`] is the concrete handle used by the binary and the tests:
//! everything a node reports comes out of one mpsc receiver as
//! [`NodeOutput`].

use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tokio::sync::mpsc;

pub mod context;
pub mod message;
pub mod registry;

pub use context::{ContextStore, MemoryContext, NodeContext, SqliteContext};
pub use message::{FlowMessage, NodeProperty};
pub use registry::NodeRegistry;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusFill {
    Green,
    Red,
    Yellow,
    Grey,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusShape {
    Dot,
    Ring,
}

/// Visual health indicator shown next to a node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStatus {
    pub fill: StatusFill,
    pub shape: StatusShape,
    pub text: String,
}

impl NodeStatus {
    pub fn new(fill: StatusFill, shape: StatusShape, text: impl Into<String>) -> Self {
        Self {
            fill,
            shape,
            text: text.into(),
        }
    }
}

/// What a node can do towards its host.
pub trait NodeHandle: Send + Sync {
    fn id(&self) -> &str;
    fn name(&self) -> &str;
    fn status(&self, status: NodeStatus);
    /// Forwards one message downstream.
    fn send(&self, msg: FlowMessage);
    /// Reports a non-fatal node-level error.
    fn error(&self, message: String);
}

/// Everything a [`ChannelNode`] reports, tagged with the reporting node.
#[derive(Clone, Debug, PartialEq)]
pub enum NodeOutput {
    Status { node: String, status: NodeStatus },
    Message { node: String, msg: FlowMessage },
    Error { node: String, message: String },
}

impl NodeOutput {
    pub fn node(&self) -> &str {
        match self {
            NodeOutput::Status { node, .. }
            | NodeOutput::Message { node, .. }
            | NodeOutput::Error { node, .. } => node,
        }
    }
}

/// [`NodeHandle`] that forwards every report on an unbounded channel.
///
/// The latest status is also kept so it can be read back synchronously.
pub struct ChannelNode {
    id: String,
    name: String,
    tx: mpsc::UnboundedSender<NodeOutput>,
    last_status: Mutex<Option<NodeStatus>>,
}

impl ChannelNode {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        tx: mpsc::UnboundedSender<NodeOutput>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            tx,
            last_status: Mutex::new(None),
        }
    }

    /// Node with its own private output channel.
    pub fn detached(
        id: impl Into<String>,
        name: impl Into<String>,
    ) -> (Self, mpsc::UnboundedReceiver<NodeOutput>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(id, name, tx), rx)
    }

    pub fn last_status(&self) -> Option<NodeStatus> {
        self.last_status
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    fn emit(&self, output: NodeOutput) {
        // Receiver gone means the flow is shutting down.
        let _ = self.tx.send(output);
    }
}

impl NodeHandle for ChannelNode {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn status(&self, status: NodeStatus) {
        *self.last_status.lock().unwrap_or_else(|p| p.into_inner()) = Some(status.clone());
        self.emit(NodeOutput::Status {
            node: self.id.clone(),
            status,
        });
    }

    fn send(&self, msg: FlowMessage) {
        self.emit(NodeOutput::Message {
            node: self.id.clone(),
            msg,
        });
    }

    fn error(&self, message: String) {
        self.emit(NodeOutput::Error {
            node: self.id.clone(),
            message,
        });
    }
}
