use async_trait::async_trait;
use serde_json::{json, Value};
use sfconn::host::message::value_at;
use sfconn::host::{FlowMessage, NodeHandle};
use sfconn::validation::ValidationError;
use std::sync::Arc;
use tracing::debug;

use crate::config::LoopKeysNodeConfig;
use crate::FlowNode;

/// Collects one key per element of an array in the message.
///
/// Elements without a value at `value_path` are reported individually and
/// skipped; the collected keys are always written and forwarded.
pub struct GenerateLoopKeys {
    node: Arc<dyn NodeHandle>,
    array_path: String,
    value_path: String,
    target_path: String,
}

impl GenerateLoopKeys {
    pub fn new(
        node: Arc<dyn NodeHandle>,
        config: &LoopKeysNodeConfig,
    ) -> Result<Arc<Self>, ValidationError> {
        if config.array_path.trim().is_empty() {
            return Err(ValidationError::MissingArrayPath);
        }
        if config.target_path.trim().is_empty() {
            return Err(ValidationError::MissingTarget);
        }
        Ok(Arc::new(Self {
            node,
            array_path: config.array_path.trim().to_string(),
            value_path: config.value_path.trim().to_string(),
            target_path: config.target_path.trim().to_string(),
        }))
    }

    fn key_of<'a>(&self, element: &'a Value) -> Option<&'a Value> {
        let value = if self.value_path.is_empty() {
            element
        } else {
            value_at(element, &self.value_path)?
        };
        (!value.is_null()).then_some(value)
    }

    fn report(&self, error: Value) {
        self.node.error(error.to_string());
    }
}

#[async_trait]
impl FlowNode for GenerateLoopKeys {
    fn id(&self) -> &str {
        self.node.id()
    }

    fn kind(&self) -> &'static str {
        "generate-loop-keys"
    }

    async fn on_input(&self, mut msg: FlowMessage) {
        let items = match msg.get_property(&self.array_path) {
            None | Some(Value::Null) => {
                self.report(json!({
                    "error": format!(
                        "unable to generate keys: array could not be found at:{}",
                        self.array_path
                    ),
                    "msg": msg,
                }));
                return;
            }
            Some(Value::Array(items)) => items.clone(),
            Some(other) => {
                self.report(json!({
                    "error": format!(
                        "unable to generate keys: not an array at path:{}",
                        self.array_path
                    ),
                    "array": other,
                    "msg": msg,
                }));
                return;
            }
        };

        let mut keys = Vec::with_capacity(items.len());
        for element in &items {
            match self.key_of(element) {
                Some(key) => keys.push(key.clone()),
                None => self.report(json!({
                    "error": format!(
                        "unable to generate keys: unable to find value at path:{}",
                        self.value_path
                    ),
                    "currentObject": element,
                    "valuePath": self.value_path,
                })),
            }
        }

        debug!(node = %self.node.id(), count = keys.len(), "Generated loop keys");
        if let Err(err) = msg.set_property(&self.target_path, Value::Array(keys)) {
            self.node.error(err.to_string());
            return;
        }
        self.node.send(msg);
    }
}
