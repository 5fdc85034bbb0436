//! Scripted in-memory client.
//!
//! Backs offline mode (no network, every login succeeds) and the test
//! suites of both crates. Query pages are served from a queue; every call is
//! recorded so tests can assert on request order.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use super::{
    ApiSession, Authenticator, ClientError, QueryPage, StreamingMessage, StreamingSubscription,
};

pub const OFFLINE_INSTANCE_URL: &str = "https://offline.invalid";

struct MockSubscriber {
    channel: String,
    replay_id: i64,
    tx: mpsc::Sender<StreamingMessage>,
}

/// Session whose responses are scripted by the test.
pub struct MockSession {
    instance_url: String,
    pages: Mutex<VecDeque<Result<QueryPage, ClientError>>>,
    failures: Mutex<HashMap<String, ClientError>>,
    calls: Mutex<Vec<String>>,
    subscribers: Mutex<Vec<MockSubscriber>>,
    logouts: AtomicUsize,
}

impl MockSession {
    pub fn new() -> Self {
        Self::with_instance_url(OFFLINE_INSTANCE_URL)
    }

    pub fn with_instance_url(instance_url: &str) -> Self {
        Self {
            instance_url: instance_url.to_string(),
            pages: Mutex::new(VecDeque::new()),
            failures: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            subscribers: Mutex::new(Vec::new()),
            logouts: AtomicUsize::new(0),
        }
    }

    /// Queues the response for the next query/query-more call (either API).
    pub fn push_page(&self, page: QueryPage) {
        lock(&self.pages).push_back(Ok(page));
    }

    pub fn push_page_error(&self, err: ClientError) {
        lock(&self.pages).push_back(Err(err));
    }

    /// Makes every call of `operation` (e.g. `"describe_global"`) fail.
    pub fn fail_operation(&self, operation: &str, err: ClientError) {
        lock(&self.failures).insert(operation.to_string(), err);
    }

    /// Calls made so far, formatted as `operation` or `operation:argument`.
    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    pub fn logout_count(&self) -> usize {
        self.logouts.load(Ordering::SeqCst)
    }

    /// `(channel, replay_id)` for each live subscription.
    pub fn subscriptions(&self) -> Vec<(String, i64)> {
        lock(&self.subscribers)
            .iter()
            .filter(|s| !s.tx.is_closed())
            .map(|s| (s.channel.clone(), s.replay_id))
            .collect()
    }

    /// Delivers an event to every live subscriber of `channel`.
    /// Returns the number of subscribers reached.
    pub async fn publish(&self, channel: &str, data: Value) -> usize {
        let senders: Vec<mpsc::Sender<StreamingMessage>> = lock(&self.subscribers)
            .iter()
            .filter(|s| s.channel == channel && !s.tx.is_closed())
            .map(|s| s.tx.clone())
            .collect();

        let mut delivered = 0;
        for tx in senders {
            let message = StreamingMessage::Event {
                channel: channel.to_string(),
                data: data.clone(),
            };
            if tx.send(message).await.is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// Delivers an unsuccessful subscribe ack to every live subscriber of
    /// `channel`, as the server does when a resubscribe is refused.
    pub async fn reject_subscription(&self, channel: &str, error: &str) -> usize {
        let senders: Vec<mpsc::Sender<StreamingMessage>> = lock(&self.subscribers)
            .iter()
            .filter(|s| s.channel == channel && !s.tx.is_closed())
            .map(|s| s.tx.clone())
            .collect();

        let mut delivered = 0;
        for tx in senders {
            let ack = StreamingMessage::SubscribeAck {
                channel: channel.to_string(),
                successful: false,
                error: Some(error.to_string()),
            };
            if tx.send(ack).await.is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    fn record(&self, operation: &str, argument: Option<&str>) -> Result<(), ClientError> {
        let entry = match argument {
            Some(arg) => format!("{}:{}", operation, arg),
            None => operation.to_string(),
        };
        lock(&self.calls).push(entry);
        match lock(&self.failures).get(operation) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn next_page(&self) -> Result<QueryPage, ClientError> {
        lock(&self.pages)
            .pop_front()
            .unwrap_or_else(|| Ok(QueryPage::new(Vec::new(), true, None)))
    }
}

impl Default for MockSession {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl ApiSession for MockSession {
    fn instance_url(&self) -> &str {
        &self.instance_url
    }

    async fn query(&self, soql: &str) -> Result<QueryPage, ClientError> {
        self.record("query", Some(soql))?;
        self.next_page()
    }

    async fn query_more(&self, next_records_url: &str) -> Result<QueryPage, ClientError> {
        self.record("query_more", Some(next_records_url))?;
        self.next_page()
    }

    async fn tooling_query(&self, soql: &str) -> Result<QueryPage, ClientError> {
        self.record("tooling_query", Some(soql))?;
        self.next_page()
    }

    async fn tooling_query_more(&self, next_records_url: &str) -> Result<QueryPage, ClientError> {
        self.record("tooling_query_more", Some(next_records_url))?;
        self.next_page()
    }

    async fn describe_global(&self) -> Result<Value, ClientError> {
        self.record("describe_global", None)?;
        Ok(json!({ "operation": "describe_global", "sobjects": [] }))
    }

    async fn describe_sobject(&self, name: &str) -> Result<Value, ClientError> {
        self.record("describe_sobject", Some(name))?;
        Ok(json!({ "operation": "describe_sobject", "name": name }))
    }

    async fn tooling_describe_global(&self) -> Result<Value, ClientError> {
        self.record("tooling_describe_global", None)?;
        Ok(json!({ "operation": "tooling_describe_global", "sobjects": [] }))
    }

    async fn tooling_describe_sobject(&self, name: &str) -> Result<Value, ClientError> {
        self.record("tooling_describe_sobject", Some(name))?;
        Ok(json!({ "operation": "tooling_describe_sobject", "name": name }))
    }

    async fn metadata_describe(&self) -> Result<Value, ClientError> {
        self.record("metadata_describe", None)?;
        Ok(json!({ "operation": "metadata_describe", "metadataObjects": [] }))
    }

    async fn request_get(&self, url: &str) -> Result<Value, ClientError> {
        self.record("request_get", Some(url))?;
        Ok(json!({ "operation": "request_get", "url": url }))
    }

    async fn create_record(&self, sobject: &str, record: &Value) -> Result<Value, ClientError> {
        self.record("create_record", Some(sobject))?;
        Ok(json!({ "id": "e00000000000001", "success": true, "errors": [], "record": record }))
    }

    async fn subscribe(
        &self,
        channel: &str,
        replay_id: i64,
    ) -> Result<StreamingSubscription, ClientError> {
        self.record("subscribe", Some(channel))?;
        let (tx, rx) = mpsc::channel(64);
        tx.try_send(StreamingMessage::SubscribeAck {
            channel: channel.to_string(),
            successful: true,
            error: None,
        })
        .map_err(|_| ClientError::Closed)?;

        lock(&self.subscribers).push(MockSubscriber {
            channel: channel.to_string(),
            replay_id,
            tx,
        });
        Ok(StreamingSubscription::new(channel.to_string(), rx, None))
    }

    async fn logout(&self) -> Result<(), ClientError> {
        self.record("logout", None)?;
        self.logouts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Authenticator handing out a fresh [`MockSession`] per login.
pub struct MockAuthenticator {
    failure: Mutex<Option<ClientError>>,
    logins: Mutex<Vec<(String, String)>>,
    sessions: Mutex<Vec<Arc<MockSession>>>,
}

impl MockAuthenticator {
    pub fn new() -> Self {
        Self {
            failure: Mutex::new(None),
            logins: Mutex::new(Vec::new()),
            sessions: Mutex::new(Vec::new()),
        }
    }

    /// Every later login fails with `err` until [`Self::succeed`] is called.
    pub fn fail_with(&self, err: ClientError) {
        *lock(&self.failure) = Some(err);
    }

    pub fn succeed(&self) {
        *lock(&self.failure) = None;
    }

    /// `(login_url, username)` per login attempt.
    pub fn logins(&self) -> Vec<(String, String)> {
        lock(&self.logins).clone()
    }

    /// Sessions handed out so far, oldest first.
    pub fn sessions(&self) -> Vec<Arc<MockSession>> {
        lock(&self.sessions).clone()
    }

    pub fn last_session(&self) -> Option<Arc<MockSession>> {
        lock(&self.sessions).last().cloned()
    }
}

impl Default for MockAuthenticator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Authenticator for MockAuthenticator {
    async fn login(
        &self,
        login_url: &str,
        username: &str,
        _password: &str,
    ) -> Result<Arc<dyn ApiSession>, ClientError> {
        lock(&self.logins).push((login_url.to_string(), username.to_string()));
        if let Some(err) = lock(&self.failure).clone() {
            return Err(err);
        }
        let session = Arc::new(MockSession::new());
        lock(&self.sessions).push(Arc::clone(&session));
        Ok(session)
    }
}
