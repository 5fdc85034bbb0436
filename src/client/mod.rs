//! Platform API client abstraction.
//!
//! The rest of the crate only talks to the platform through two traits:
//!
//! ```text
//! ┌──────────────────────────┐   login()    ┌──────────────────────────┐
//! │      Authenticator       │ ───────────▶ │   ApiSession (dyn, Arc)  │
//! │  - RestAuthenticator     │              │  - query / query_more    │
//! │  - MockAuthenticator     │              │  - describe / tooling    │
//! └──────────────────────────┘              │  - request_get / create  │
//!                                           │  - subscribe (streaming) │
//!                                           │  - logout                │
//!                                           └──────────────────────────┘
//! ```
//!
//! [`rest`] implements both against the REST API with reqwest, [`streaming`]
//! implements the long-polling event subscription, and [`mock`] provides a
//! scripted session for offline mode and tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

mod error;
pub mod mock;
pub mod rest;
pub mod streaming;

pub use error::ClientError;

/// One page of query results.
///
/// `next_records_url` is the continuation cursor; it is present whenever
/// `done` is false.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryPage {
    pub done: bool,
    #[serde(default)]
    pub total_size: u64,
    #[serde(default)]
    pub records: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_records_url: Option<String>,
}

impl QueryPage {
    /// Builds a page whose total size matches its record count.
    pub fn new(records: Vec<Value>, done: bool, next_records_url: Option<String>) -> Self {
        Self {
            done,
            total_size: records.len() as u64,
            records,
            next_records_url,
        }
    }
}

/// Message delivered on a streaming subscription.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamingMessage {
    /// Server answer to the subscribe request.
    SubscribeAck {
        channel: String,
        successful: bool,
        error: Option<String>,
    },
    /// Event published on a channel. `data` is forwarded untouched.
    Event { channel: String, data: Value },
}

impl StreamingMessage {
    pub fn channel(&self) -> &str {
        match self {
            StreamingMessage::SubscribeAck { channel, .. } => channel,
            StreamingMessage::Event { channel, .. } => channel,
        }
    }

    /// Position marker carried by an event (`data.event.replayId`).
    ///
    /// The platform sends it as a number, older API versions as a string.
    pub fn replay_id(&self) -> Option<i64> {
        let StreamingMessage::Event { data, .. } = self else {
            return None;
        };
        match data.get("event").and_then(|e| e.get("replayId"))? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

/// Live subscription to a streaming channel.
///
/// Messages arrive on an mpsc channel fed by a background task; dropping or
/// cancelling the subscription aborts that task.
pub struct StreamingSubscription {
    channel: String,
    messages: mpsc::Receiver<StreamingMessage>,
    task: Option<JoinHandle<()>>,
}

impl StreamingSubscription {
    pub fn new(
        channel: String,
        messages: mpsc::Receiver<StreamingMessage>,
        task: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            channel,
            messages,
            task,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Waits for the next message. `None` once the subscription has ended.
    pub async fn next(&mut self) -> Option<StreamingMessage> {
        self.messages.recv().await
    }

    /// Stops delivery. Idempotent.
    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.messages.close();
    }
}

impl Drop for StreamingSubscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// An authenticated session against the platform.
///
/// Implementations are shared read-only between every consumer of a
/// session holder, so all methods take `&self`.
#[async_trait]
pub trait ApiSession: Send + Sync {
    /// Instance the session is bound to (e.g. `https://na1.example.com`).
    fn instance_url(&self) -> &str;

    async fn query(&self, soql: &str) -> Result<QueryPage, ClientError>;

    async fn query_more(&self, next_records_url: &str) -> Result<QueryPage, ClientError>;

    async fn tooling_query(&self, soql: &str) -> Result<QueryPage, ClientError>;

    async fn tooling_query_more(&self, next_records_url: &str) -> Result<QueryPage, ClientError>;

    async fn describe_global(&self) -> Result<Value, ClientError>;

    async fn describe_sobject(&self, name: &str) -> Result<Value, ClientError>;

    async fn tooling_describe_global(&self) -> Result<Value, ClientError>;

    async fn tooling_describe_sobject(&self, name: &str) -> Result<Value, ClientError>;

    async fn metadata_describe(&self) -> Result<Value, ClientError>;

    /// GET an arbitrary path (relative to the instance) or absolute URL.
    async fn request_get(&self, url: &str) -> Result<Value, ClientError>;

    /// Creates a record of `sobject` type. Used to publish platform events.
    async fn create_record(&self, sobject: &str, record: &Value) -> Result<Value, ClientError>;

    /// Subscribes to `channel` starting after `replay_id`
    /// (`-1` = new events only, `-2` = all retained events).
    async fn subscribe(
        &self,
        channel: &str,
        replay_id: i64,
    ) -> Result<StreamingSubscription, ClientError>;

    async fn logout(&self) -> Result<(), ClientError>;
}

/// Produces sessions from credentials.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn login(
        &self,
        login_url: &str,
        username: &str,
        password: &str,
    ) -> Result<Arc<dyn ApiSession>, ClientError>;
}
