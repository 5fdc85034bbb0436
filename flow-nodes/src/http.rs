use async_trait::async_trait;
use serde_json::json;
use sfconn::consumer::{SessionAware, SessionConsumer};
use sfconn::host::{FlowMessage, NodeHandle, NodeProperty};
use sfconn::validation::ValidationError;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::HttpNodeConfig;
use crate::FlowNode;

/// Authenticated GET against the platform; writes `{url, response}` at the
/// target.
pub struct HttpNode {
    consumer: SessionConsumer,
    url: NodeProperty,
    target: String,
}

impl HttpNode {
    pub fn new(node: Arc<dyn NodeHandle>, config: &HttpNodeConfig) -> Arc<Self> {
        Arc::new(Self {
            consumer: SessionConsumer::new(node),
            url: config.url.clone(),
            target: config.target.clone(),
        })
    }
}

impl SessionAware for HttpNode {
    fn consumer(&self) -> &SessionConsumer {
        &self.consumer
    }
}

#[async_trait]
impl FlowNode for HttpNode {
    fn id(&self) -> &str {
        self.consumer.node().id()
    }

    fn kind(&self) -> &'static str {
        "http"
    }

    async fn on_input(&self, mut msg: FlowMessage) {
        let node = self.consumer.node();
        let Some(url) = self.url.evaluate_string(&msg) else {
            node.error(ValidationError::MissingUrl.to_string());
            return;
        };
        if self.target.trim().is_empty() {
            node.error(ValidationError::MissingTarget.to_string());
            return;
        }
        let Some(session) = self.consumer.require_session() else {
            return;
        };

        debug!(node = %node.id(), url = %url, "GET");
        match session.api().request_get(&url).await {
            Ok(response) => {
                let result = json!({ "url": url, "response": response });
                match msg.set_property(&self.target, result) {
                    Ok(()) => node.send(msg),
                    Err(err) => node.error(err.to_string()),
                }
            }
            Err(err) => {
                warn!(node = %node.id(), url = %url, error = %err, "Request failed");
                node.error(
                    json!({ "status": "error", "request": url, "err": err.to_string() })
                        .to_string(),
                );
            }
        }
    }
}
