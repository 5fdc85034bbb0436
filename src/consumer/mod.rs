//! Connection-dependent consumers.
//!
//! A node that needs a session composes a [`SessionConsumer`] and implements
//! [`SessionAware`]. [`listen_to_connection`] wires it to a Session Holder:
//!
//! ```text
//!   listen_to_connection(node, registry, "conn-1")
//!     │
//!     ├─ holder.attach() ──▶ (snapshot, receiver)
//!     │    snapshot = Some ─▶ node.on_session_established()   (before returning)
//!     │    snapshot = None ─▶ status DISCONNECTED
//!     │
//!     └─ spawn ─▶ loop receiver.recv()
//!                   NewConnection  ─▶ on_session_established
//!                   ConnectionLost ─▶ on_session_lost
//!                   Lagged         ─▶ resync from holder.current()
//!                   Closed         ─▶ exit (holder dropped)
//! ```

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::{Arc, RwLock, Weak};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::host::{NodeHandle, NodeRegistry, NodeStatus, StatusFill, StatusShape};
use crate::session::{Session, SessionEvent, SessionHolder};


#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
}

impl ConnectionStatus {
    pub fn indicator(self) -> NodeStatus {
        match self {
            ConnectionStatus::Connected => {
                NodeStatus::new(StatusFill::Green, StatusShape::Dot, "connected")
            }
            ConnectionStatus::Disconnected => {
                NodeStatus::new(StatusFill::Red, StatusShape::Ring, "disconnected")
            }
        }
    }
}

/// Session state shared by every session-dependent node.
///
/// The status is derived from the stored session, so it is `Connected`
/// exactly when a session is held.
pub struct SessionConsumer {
    node: Arc<dyn NodeHandle>,
    session: RwLock<Option<Session>>,
}

impl SessionConsumer {
    pub fn new(node: Arc<dyn NodeHandle>) -> Self {
        Self {
            node,
            session: RwLock::new(None),
        }
    }

    pub fn node(&self) -> &dyn NodeHandle {
        self.node.as_ref()
    }

    pub fn session(&self) -> Option<Session> {
        self.session
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn status(&self) -> ConnectionStatus {
        if self.session().is_some() {
            ConnectionStatus::Connected
        } else {
            ConnectionStatus::Disconnected
        }
    }

    /// Shows the indicator for `status` on the node.
    pub fn set_status(&self, status: ConnectionStatus) {
        self.node.status(status.indicator());
    }

    pub fn handle_new_connection(&self, session: Session) {
        debug!(node = %self.node.id(), session = %session.id(), "Session received");
        self.store(Some(session));
        self.set_status(ConnectionStatus::Connected);
    }

    pub fn handle_connection_lost(&self) {
        debug!(node = %self.node.id(), "Session lost");
        self.store(None);
        self.set_status(ConnectionStatus::Disconnected);
    }

    /// The current session, or an error on the node's error channel.
    pub fn require_session(&self) -> Option<Session> {
        let session = self.session();
        if session.is_none() {
            self.node.error("not connected".to_string());
        }
        session
    }

    fn store(&self, session: Option<Session>) {
        *self.session.write().unwrap_or_else(|p| p.into_inner()) = session;
    }
}

/// Hooks a node implements to react to its holder's lifecycle.
///
/// Overrides should call the matching [`SessionConsumer`] handler so the
/// stored session and status stay current.
#[async_trait]
pub trait SessionAware: Send + Sync + 'static {
    fn consumer(&self) -> &SessionConsumer;

    async fn on_session_established(&self, session: Session) {
        self.consumer().handle_new_connection(session);
    }

    async fn on_session_lost(&self, _session: Option<Session>) {
        self.consumer().handle_connection_lost();
    }
}

/// Attaches `node` to the holder registered as `holder_id`.
///
/// If the holder already has a session the node's established hook runs
/// before this returns. Later events are delivered by the returned task,
/// which ends when the holder is dropped or the handle is aborted.
pub async fn listen_to_connection<T: SessionAware>(
    node: Arc<T>,
    registry: &NodeRegistry,
    holder_id: &str,
) -> Result<JoinHandle<()>> {
    let consumer = node.consumer();
    let Some(holder) = registry.holder(holder_id) else {
        error!(node = %consumer.node().id(), holder = %holder_id, "No session holder found");
        consumer.set_status(ConnectionStatus::Disconnected);
        bail!("no session holder registered as '{}'", holder_id);
    };

    let (snapshot, mut events) = holder.attach();
    match snapshot {
        Some(session) => node.on_session_established(session).await,
        None => {
            debug!(node = %consumer.node().id(), holder = %holder_id, "No initial session");
            consumer.set_status(ConnectionStatus::Disconnected);
        }
    }

    let weak_holder: Weak<SessionHolder> = Arc::downgrade(&holder);
    drop(holder);

    Ok(tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(SessionEvent::NewConnection(session)) => {
                    node.on_session_established(session).await;
                }
                Ok(SessionEvent::ConnectionLost(session)) => {
                    node.on_session_lost(session).await;
                }
                Err(RecvError::Lagged(skipped)) => {
                    let Some(holder) = weak_holder.upgrade() else {
                        break;
                    };
                    warn!(
                        node = %node.consumer().node().id(),
                        skipped,
                        "Lifecycle events skipped, resyncing"
                    );
                    resync(node.as_ref(), &holder).await;
                }
                Err(RecvError::Closed) => break,
            }
        }
        debug!(node = %node.consumer().node().id(), "Stopped listening to connection");
    }))
}

async fn resync<T: SessionAware>(node: &T, holder: &SessionHolder) {
    let held = node.consumer().session();
    match (holder.current(), held) {
        (Some(current), Some(held)) if current == held => {}
        (Some(current), _) => node.on_session_established(current).await,
        (None, Some(_)) => node.on_session_lost(None).await,
        (None, None) => {}
    }
}
