//! Describe node: global or per-object metadata through one of three APIs.

use async_trait::async_trait;
use serde_json::Value;
use sfconn::client::{ApiSession, ClientError};
use sfconn::consumer::{SessionAware, SessionConsumer};
use sfconn::host::{FlowMessage, NodeHandle, NodeProperty};
use sfconn::validation::{UnknownProcessor, ValidationError};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, error};

use crate::config::DescribeNodeConfig;
use crate::FlowNode;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DescribeApi {
    Soap,
    Tooling,
    Metadata,
}

impl FromStr for DescribeApi {
    type Err = UnknownProcessor;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "soap" => Ok(DescribeApi::Soap),
            "tooling" => Ok(DescribeApi::Tooling),
            "metadata" => Ok(DescribeApi::Metadata),
            other => Err(UnknownProcessor::new("describe", other)),
        }
    }
}

impl DescribeApi {
    /// `object` is `None` for a describe-all.
    pub async fn execute(
        self,
        session: &dyn ApiSession,
        object: Option<&str>,
    ) -> Result<Value, ClientError> {
        match (self, object) {
            (DescribeApi::Soap, None) => session.describe_global().await,
            (DescribeApi::Soap, Some(name)) => session.describe_sobject(name).await,
            (DescribeApi::Tooling, None) => session.tooling_describe_global().await,
            (DescribeApi::Tooling, Some(name)) => session.tooling_describe_sobject(name).await,
            (DescribeApi::Metadata, _) => session.metadata_describe().await,
        }
    }
}

/// Checks a describe request; returns the object to describe, if any.
pub fn validate_describe(
    describe_all: bool,
    object: Option<&str>,
    target: &str,
) -> Result<Option<String>, ValidationError> {
    let object = object.map(str::trim).filter(|o| !o.is_empty());
    match (describe_all, object) {
        (true, Some(name)) => return Err(ValidationError::DescribeConflict(name.to_string())),
        (false, None) => return Err(ValidationError::DescribeMissingObject),
        _ => {}
    }
    if target.trim().is_empty() {
        return Err(ValidationError::MissingTarget);
    }
    Ok(object.map(str::to_string))
}

pub struct DescribeNode {
    consumer: SessionConsumer,
    api: DescribeApi,
    describe_all: bool,
    object: Option<NodeProperty>,
    target: String,
}

impl DescribeNode {
    pub fn new(
        node: Arc<dyn NodeHandle>,
        config: &DescribeNodeConfig,
    ) -> Result<Arc<Self>, UnknownProcessor> {
        Ok(Arc::new(Self {
            consumer: SessionConsumer::new(node),
            api: config.api.parse()?,
            describe_all: config.describe_all,
            object: config.object.clone(),
            target: config.target.clone(),
        }))
    }
}

impl SessionAware for DescribeNode {
    fn consumer(&self) -> &SessionConsumer {
        &self.consumer
    }
}

#[async_trait]
impl FlowNode for DescribeNode {
    fn id(&self) -> &str {
        self.consumer.node().id()
    }

    fn kind(&self) -> &'static str {
        "describe"
    }

    async fn on_input(&self, mut msg: FlowMessage) {
        let node = self.consumer.node();
        let object = self.object.as_ref().and_then(|p| p.evaluate_string(&msg));
        let object = match validate_describe(self.describe_all, object.as_deref(), &self.target) {
            Ok(object) => object,
            Err(err) => {
                node.error(err.to_string());
                return;
            }
        };
        let Some(session) = self.consumer.require_session() else {
            return;
        };

        debug!(node = %node.id(), api = ?self.api, object = ?object, "Describing");
        match self.api.execute(session.api(), object.as_deref()).await {
            Ok(result) => match msg.set_property(&self.target, result) {
                Ok(()) => node.send(msg),
                Err(err) => node.error(err.to_string()),
            },
            Err(err) => {
                error!(node = %node.id(), error = %err, "Describe failed");
                node.error(format!("Error occurred:{}", err));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sfconn::client::mock::MockSession;
    use sfconn::host::{ChannelNode, NodeOutput};
    use sfconn::session::Session;

    #[test]
    fn test_api_from_str() {
        assert_eq!("metadata".parse::<DescribeApi>().unwrap(), DescribeApi::Metadata);
        assert_eq!(
            "rest".parse::<DescribeApi>().unwrap_err().to_string(),
            "Unknown describe processor type:rest"
        );
    }

    #[test]
    fn test_validation_rules() {
        assert_eq!(
            validate_describe(true, Some("Account"), "payload"),
            Err(ValidationError::DescribeConflict("Account".into()))
        );
        assert_eq!(
            validate_describe(false, Some(" "), "payload"),
            Err(ValidationError::DescribeMissingObject)
        );
        assert_eq!(
            validate_describe(true, None, ""),
            Err(ValidationError::MissingTarget)
        );
        assert_eq!(validate_describe(true, None, "payload"), Ok(None));
        assert_eq!(
            validate_describe(false, Some("Contact"), "payload"),
            Ok(Some("Contact".into()))
        );
    }

    #[tokio::test]
    async fn test_dispatch_per_api() {
        let session = MockSession::new();
        DescribeApi::Soap.execute(&session, None).await.unwrap();
        DescribeApi::Soap.execute(&session, Some("Account")).await.unwrap();
        DescribeApi::Tooling.execute(&session, None).await.unwrap();
        DescribeApi::Tooling.execute(&session, Some("ApexClass")).await.unwrap();
        DescribeApi::Metadata.execute(&session, Some("ignored")).await.unwrap();

        assert_eq!(
            session.calls(),
            vec![
                "describe_global",
                "describe_sobject:Account",
                "tooling_describe_global",
                "tooling_describe_sobject:ApexClass",
                "metadata_describe",
            ]
        );
    }

    #[tokio::test]
    async fn test_node_writes_result_at_target() {
        let (handle, mut rx) = ChannelNode::detached("d", "describe");
        let config = DescribeNodeConfig {
            id: "d".into(),
            name: String::new(),
            connection: "conn".into(),
            api: "soap".into(),
            describe_all: false,
            object: Some(NodeProperty::Msg("payload.object".into())),
            target: "describe".into(),
        };
        let node = DescribeNode::new(Arc::new(handle), &config).unwrap();
        node.on_session_established(Session::new("conn", Arc::new(MockSession::new())))
            .await;
        let _status = rx.try_recv().unwrap();

        node.on_input(FlowMessage::with_payload(json!({"object": "Account"})))
            .await;

        match rx.try_recv().unwrap() {
            NodeOutput::Message { msg, .. } => {
                assert_eq!(msg.get_property("describe.name"), Some(&json!("Account")));
            }
            other => panic!("unexpected output {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_describe_failure_reported() {
        let (handle, mut rx) = ChannelNode::detached("d", "describe");
        let config = DescribeNodeConfig {
            id: "d".into(),
            name: String::new(),
            connection: "conn".into(),
            api: "tooling".into(),
            describe_all: true,
            object: None,
            target: "payload".into(),
        };
        let node = DescribeNode::new(Arc::new(handle), &config).unwrap();
        let api = Arc::new(MockSession::new());
        api.fail_operation("tooling_describe_global", ClientError::Closed);
        node.on_session_established(Session::new("conn", api)).await;
        let _status = rx.try_recv().unwrap();

        node.on_input(FlowMessage::new()).await;

        assert_eq!(
            rx.try_recv().unwrap(),
            NodeOutput::Error {
                node: "d".into(),
                message: "Error occurred:session closed".into()
            }
        );
    }
}
