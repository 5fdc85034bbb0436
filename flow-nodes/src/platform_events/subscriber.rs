use async_trait::async_trait;
use serde_json::Value;
use sfconn::client::StreamingMessage;
use sfconn::consumer::{SessionAware, SessionConsumer};
use sfconn::host::{FlowMessage, NodeContext, NodeHandle, NodeStatus, StatusFill, StatusShape};
use sfconn::session::Session;
use sfconn::validation::ValidationError;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::event_channel;
use super::replay::{offset_from_value, resolve_replay_id, REPLAY_CONTEXT_KEY};
use crate::config::SubscriberNodeConfig;

/// State shared with the forwarding task.
struct Stream {
    node: Arc<dyn NodeHandle>,
    channel: String,
    context: NodeContext,
    replay_id: AtomicI64,
}

impl Stream {
    fn replay_id(&self) -> i64 {
        self.replay_id.load(Ordering::SeqCst)
    }

    /// Records the position of an event on this channel.
    fn observe(&self, message: &StreamingMessage) {
        if message.channel() != self.channel {
            return;
        }
        let Some(replay_id) = message.replay_id() else {
            return;
        };
        self.replay_id.store(replay_id, Ordering::SeqCst);
        if let Err(err) = self.context.set(REPLAY_CONTEXT_KEY, &Value::from(replay_id)) {
            warn!(node = %self.node.id(), error = %err, "Failed to persist replay id");
        }
    }

    async fn forward(self: Arc<Self>, mut subscription: sfconn::client::StreamingSubscription) {
        while let Some(message) = subscription.next().await {
            self.observe(&message);
            match message {
                StreamingMessage::SubscribeAck {
                    successful: true, ..
                } => {
                    info!(node = %self.node.id(), channel = %self.channel, replay_id = self.replay_id(), "Subscribed");
                    self.node.status(NodeStatus::new(
                        StatusFill::Green,
                        StatusShape::Dot,
                        format!("connected [replayId:{}]", self.replay_id()),
                    ));
                }
                StreamingMessage::SubscribeAck { error, .. } => {
                    let reason = error.unwrap_or_else(|| "subscription rejected".to_string());
                    error!(node = %self.node.id(), channel = %self.channel, reason = %reason, "Subscribe failed");
                    self.node.status(NodeStatus::new(
                        StatusFill::Red,
                        StatusShape::Ring,
                        "subscribe failed",
                    ));
                    self.node.error(reason);
                }
                StreamingMessage::Event { data, .. } => {
                    self.node.send(FlowMessage::with_payload(data));
                }
            }
        }
        debug!(node = %self.node.id(), channel = %self.channel, "Subscription ended");
    }
}

/// Forwards every event published on `/event/<event_object>` and keeps the
/// last seen replay id in node context.
pub struct PlatformEventSubscriber {
    consumer: SessionConsumer,
    stream: Arc<Stream>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PlatformEventSubscriber {
    pub fn new(
        node: Arc<dyn NodeHandle>,
        config: &SubscriberNodeConfig,
        context: NodeContext,
    ) -> Result<Arc<Self>, ValidationError> {
        if config.event_object.trim().is_empty() {
            return Err(ValidationError::MissingEventObject);
        }

        let persisted = match context.get(REPLAY_CONTEXT_KEY) {
            Ok(value) => value.as_ref().and_then(offset_from_value),
            Err(err) => {
                warn!(node = %node.id(), error = %err, "Failed to read persisted replay id");
                None
            }
        };
        let replay_id = resolve_replay_id(persisted, config.replay());
        let channel = event_channel(config.event_object.trim());
        info!(
            node = %node.id(),
            channel = %channel,
            persisted = ?persisted,
            replay_id,
            "Platform event subscriber ready"
        );

        Ok(Arc::new(Self {
            consumer: SessionConsumer::new(Arc::clone(&node)),
            stream: Arc::new(Stream {
                node,
                channel,
                context,
                replay_id: AtomicI64::new(replay_id),
            }),
            task: Mutex::new(None),
        }))
    }

    pub fn channel(&self) -> &str {
        &self.stream.channel
    }

    pub fn replay_id(&self) -> i64 {
        self.stream.replay_id()
    }

    /// Stops forwarding events. A new session subscribes again.
    pub async fn unsubscribe(&self) {
        if let Some(task) = self.task.lock().await.take() {
            task.abort();
            debug!(node = %self.stream.node.id(), "Previous subscription cancelled");
        }
    }
}

#[async_trait]
impl SessionAware for PlatformEventSubscriber {
    fn consumer(&self) -> &SessionConsumer {
        &self.consumer
    }

    async fn on_session_established(&self, session: Session) {
        self.consumer.handle_new_connection(session.clone());

        let mut task = self.task.lock().await;
        if let Some(previous) = task.take() {
            previous.abort();
        }

        let replay_id = self.stream.replay_id();
        match session.api().subscribe(&self.stream.channel, replay_id).await {
            Ok(subscription) => {
                *task = Some(tokio::spawn(Arc::clone(&self.stream).forward(subscription)));
            }
            Err(err) => {
                error!(node = %self.stream.node.id(), channel = %self.stream.channel, error = %err, "Subscribe failed");
                self.stream.node.error(format!("subscribe failed: {}", err));
            }
        }
    }

    async fn on_session_lost(&self, _session: Option<Session>) {
        self.unsubscribe().await;
        self.consumer.handle_connection_lost();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform_events::replay::{ReplaySetting, DEFAULT_REPLAY_ID};
    use serde_json::json;
    use sfconn::client::mock::MockSession;
    use sfconn::host::{ChannelNode, ContextStore, MemoryContext, NodeOutput};
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn config(replay: ReplaySetting) -> SubscriberNodeConfig {
        SubscriberNodeConfig {
            id: "sub".into(),
            name: String::new(),
            connection: "conn".into(),
            event_object: "Order__e".into(),
            replay_id: replay,
            force_replay: false,
        }
    }

    fn subscriber(
        store: Arc<MemoryContext>,
        replay: ReplaySetting,
    ) -> (Arc<PlatformEventSubscriber>, mpsc::UnboundedReceiver<NodeOutput>) {
        let (handle, rx) = ChannelNode::detached("sub", "subscriber");
        let context = NodeContext::new(store, "sub");
        let node = PlatformEventSubscriber::new(Arc::new(handle), &config(replay), context).unwrap();
        (node, rx)
    }

    async fn next_output(rx: &mut mpsc::UnboundedReceiver<NodeOutput>) -> NodeOutput {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("no output")
            .expect("channel closed")
    }

    async fn next_message(rx: &mut mpsc::UnboundedReceiver<NodeOutput>) -> FlowMessage {
        loop {
            if let NodeOutput::Message { msg, .. } = next_output(rx).await {
                return msg;
            }
        }
    }

    #[test]
    fn test_requires_event_object() {
        let (handle, _rx) = ChannelNode::detached("sub", "subscriber");
        let mut cfg = config(ReplaySetting::default());
        cfg.event_object = " ".into();
        let result = PlatformEventSubscriber::new(
            Arc::new(handle),
            &cfg,
            NodeContext::new(Arc::new(MemoryContext::new()), "sub"),
        );
        assert!(matches!(result, Err(ValidationError::MissingEventObject)));
    }

    #[test]
    fn test_initial_offset_uses_persisted_value() {
        let store = Arc::new(MemoryContext::new());
        store.set("sub", REPLAY_CONTEXT_KEY, &json!(242)).unwrap();

        let (node, _rx) = subscriber(store.clone(), ReplaySetting::new(Some(12), false));
        assert_eq!(node.replay_id(), 242);
        assert_eq!(node.channel(), "/event/Order__e");

        let (forced, _rx) = subscriber(store, ReplaySetting::new(Some(12), true));
        assert_eq!(forced.replay_id(), 12);
    }

    #[test]
    fn test_initial_offset_defaults_to_sentinel() {
        let (node, _rx) = subscriber(Arc::new(MemoryContext::new()), ReplaySetting::default());
        assert_eq!(node.replay_id(), DEFAULT_REPLAY_ID);
    }

    #[tokio::test]
    async fn test_forwards_events_and_persists_offset() {
        let store = Arc::new(MemoryContext::new());
        let (node, mut rx) = subscriber(store.clone(), ReplaySetting::new(Some(5), false));
        let api = Arc::new(MockSession::new());

        node.on_session_established(Session::new("conn", api.clone())).await;
        assert_eq!(api.subscriptions(), vec![("/event/Order__e".to_string(), 5)]);

        let data = json!({"event": {"replayId": 6}, "payload": {"OrderId__c": "A1"}});
        assert_eq!(api.publish("/event/Order__e", data.clone()).await, 1);

        let msg = next_message(&mut rx).await;
        assert_eq!(msg.payload(), Some(&data));
        assert_eq!(node.replay_id(), 6);
        assert_eq!(store.get("sub", REPLAY_CONTEXT_KEY).unwrap(), Some(json!(6)));
    }

    #[tokio::test]
    async fn test_ack_shows_offset_in_status() {
        let (node, mut rx) = subscriber(Arc::new(MemoryContext::new()), ReplaySetting::new(Some(9), false));
        let api = Arc::new(MockSession::new());

        node.on_session_established(Session::new("conn", api)).await;

        loop {
            if let NodeOutput::Status { status, .. } = next_output(&mut rx).await {
                if status.text.contains("replayId") {
                    assert_eq!(status.text, "connected [replayId:9]");
                    break;
                }
            }
        }
    }

    #[tokio::test]
    async fn test_new_session_cancels_previous_subscription() {
        let store = Arc::new(MemoryContext::new());
        let (node, mut rx) = subscriber(store, ReplaySetting::default());
        let first = Arc::new(MockSession::new());
        let second = Arc::new(MockSession::new());

        node.on_session_established(Session::new("conn", first.clone())).await;
        first
            .publish("/event/Order__e", json!({"event": {"replayId": 30}}))
            .await;
        next_message(&mut rx).await;

        node.on_session_established(Session::new("conn", second.clone())).await;
        tokio::time::timeout(Duration::from_secs(2), async {
            while !first.subscriptions().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("old subscription still live");

        assert_eq!(second.subscriptions(), vec![("/event/Order__e".to_string(), 30)]);
    }

    #[tokio::test]
    async fn test_rejected_ack_reported_on_node() {
        let (node, mut rx) = subscriber(Arc::new(MemoryContext::new()), ReplaySetting::default());
        let api = Arc::new(MockSession::new());
        node.on_session_established(Session::new("conn", api.clone())).await;

        assert_eq!(
            api.reject_subscription("/event/Order__e", "403::Replay id unavailable")
                .await,
            1
        );

        loop {
            match next_output(&mut rx).await {
                NodeOutput::Status { status, .. } if status.text == "subscribe failed" => {
                    assert_eq!(status.fill, StatusFill::Red);
                }
                NodeOutput::Error { message, .. } => {
                    assert_eq!(message, "403::Replay id unavailable");
                    break;
                }
                _ => {}
            }
        }
    }

    #[tokio::test]
    async fn test_session_loss_cancels_subscription() {
        let (node, _rx) = subscriber(Arc::new(MemoryContext::new()), ReplaySetting::default());
        let api = Arc::new(MockSession::new());
        node.on_session_established(Session::new("conn", api.clone())).await;

        node.on_session_lost(None).await;

        tokio::time::timeout(Duration::from_secs(2), async {
            while !api.subscriptions().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("subscription still live");
        assert!(node.consumer().session().is_none());
    }

    #[tokio::test]
    async fn test_events_on_other_channels_do_not_move_offset() {
        let (node, _rx) = subscriber(Arc::new(MemoryContext::new()), ReplaySetting::new(Some(3), false));
        let message = StreamingMessage::Event {
            channel: "/event/Other__e".into(),
            data: json!({"event": {"replayId": 99}}),
        };
        node.stream.observe(&message);
        assert_eq!(node.replay_id(), 3);
    }
}
