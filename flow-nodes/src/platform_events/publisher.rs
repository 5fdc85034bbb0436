use async_trait::async_trait;
use serde_json::json;
use sfconn::consumer::{SessionAware, SessionConsumer};
use sfconn::host::{FlowMessage, NodeHandle};
use sfconn::validation::ValidationError;
use std::sync::Arc;
use tracing::{debug, error};

use crate::config::PublisherNodeConfig;
use crate::FlowNode;

/// Publishes `msg.payload` as a platform event record and forwards the
/// creation result in its place.
pub struct PlatformEventPublisher {
    consumer: SessionConsumer,
    event_object: String,
}

impl PlatformEventPublisher {
    pub fn new(
        node: Arc<dyn NodeHandle>,
        config: &PublisherNodeConfig,
    ) -> Result<Arc<Self>, ValidationError> {
        let event_object = config.event_object.trim();
        if event_object.is_empty() {
            return Err(ValidationError::MissingEventObject);
        }
        Ok(Arc::new(Self {
            consumer: SessionConsumer::new(node),
            event_object: event_object.to_string(),
        }))
    }

    pub fn event_object(&self) -> &str {
        &self.event_object
    }
}

impl SessionAware for PlatformEventPublisher {
    fn consumer(&self) -> &SessionConsumer {
        &self.consumer
    }
}

#[async_trait]
impl FlowNode for PlatformEventPublisher {
    fn id(&self) -> &str {
        self.consumer.node().id()
    }

    fn kind(&self) -> &'static str {
        "platform-event-publisher"
    }

    async fn on_input(&self, mut msg: FlowMessage) {
        let Some(session) = self.consumer.require_session() else {
            return;
        };
        let node = self.consumer.node();
        let record = msg.payload().cloned().unwrap_or_else(|| json!({}));
        if !record.is_object() {
            node.error(format!(
                "cannot publish {}: payload must be an object",
                self.event_object
            ));
            return;
        }

        match session.api().create_record(&self.event_object, &record).await {
            Ok(result) => {
                debug!(node = %node.id(), event = %self.event_object, "Event published");
                if let Err(err) = msg.set_property("payload", result) {
                    node.error(err.to_string());
                    return;
                }
                node.send(msg);
            }
            Err(err) => {
                error!(node = %node.id(), event = %self.event_object, error = %err, "Publish failed");
                node.error(
                    json!({ "status": "error", "event": self.event_object, "err": err.to_string() })
                        .to_string(),
                );
            }
        }
    }
}
