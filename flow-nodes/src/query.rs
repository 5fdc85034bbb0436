use async_trait::async_trait;
use sfconn::consumer::{SessionAware, SessionConsumer};
use sfconn::host::{FlowMessage, NodeHandle, NodeProperty};
use sfconn::query::{QueryApi, QueryRequest};
use sfconn::validation::UnknownProcessor;
use std::sync::Arc;
use tracing::{debug, error};

use crate::config::QueryNodeConfig;
use crate::FlowNode;

/// Runs a query (SOQL or Tooling) per inbound message and writes every
/// page's records, combined, at the target.
pub struct QueryNode {
    consumer: SessionConsumer,
    api: QueryApi,
    query: NodeProperty,
    target: String,
}

impl QueryNode {
    pub fn new(
        node: Arc<dyn NodeHandle>,
        config: &QueryNodeConfig,
    ) -> Result<Arc<Self>, UnknownProcessor> {
        Ok(Arc::new(Self {
            consumer: SessionConsumer::new(node),
            api: config.api.parse()?,
            query: config.query.clone(),
            target: config.target.clone(),
        }))
    }

    pub fn api(&self) -> QueryApi {
        self.api
    }
}

impl SessionAware for QueryNode {
    fn consumer(&self) -> &SessionConsumer {
        &self.consumer
    }
}

#[async_trait]
impl FlowNode for QueryNode {
    fn id(&self) -> &str {
        self.consumer.node().id()
    }

    fn kind(&self) -> &'static str {
        "query"
    }

    async fn on_input(&self, mut msg: FlowMessage) {
        let node = self.consumer.node();
        let request = match QueryRequest::new(self.api, self.query.evaluate_string(&msg), &self.target)
        {
            Ok(request) => request,
            Err(err) => {
                node.error(err.to_string());
                return;
            }
        };
        let Some(session) = self.consumer.require_session() else {
            return;
        };

        debug!(node = %node.id(), api = ?self.api, query = %request.query, "Running query");
        match request.execute_into(session.api(), &mut msg).await {
            Ok(()) => node.send(msg),
            Err(err) => {
                error!(node = %node.id(), error = %err, "Query failed");
                node.error(err.to_string());
            }
        }
    }
}
