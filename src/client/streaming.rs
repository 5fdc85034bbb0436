//! Long-polling streaming client (Bayeux protocol).
//!
//! ```text
//! /meta/handshake ──▶ clientId
//! /meta/subscribe ──▶ ack (+ replay extension: channel → replayId)
//! /meta/connect   ──▶ events … (repeat; re-handshake on server advice)
//! ```

use reqwest::header::{HeaderValue, COOKIE, SET_COOKIE};
use reqwest::Client;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{ClientError, StreamingMessage, StreamingSubscription};

const CHANNEL_CAPACITY: usize = 256;
const RECONNECT_DELAY: Duration = Duration::from_secs(2);

pub(crate) struct StreamingEndpoint {
    pub url: String,
    pub access_token: String,
}

/// Handshakes, subscribes, and spawns the connect loop.
pub(crate) async fn subscribe(
    http_client: Client,
    endpoint: StreamingEndpoint,
    channel: &str,
    replay_id: i64,
) -> Result<StreamingSubscription, ClientError> {
    let mut client = BayeuxClient::new(http_client, endpoint);
    client.handshake().await?;
    let initial = client.subscribe(channel, replay_id).await?;
    if let Some(reason) = rejection(&initial) {
        return Err(ClientError::Api {
            status: 400,
            body: format!("subscribe to {} rejected: {}", channel, reason),
        });
    }

    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let mut replay_id = replay_id;
    for message in initial {
        if let Some(id) = message.replay_id() {
            replay_id = id;
        }
        let _ = tx.try_send(message);
    }

    let channel_name = channel.to_string();
    let task = tokio::spawn(async move {
        client.run(&channel_name, replay_id, tx).await;
    });

    Ok(StreamingSubscription::new(channel.to_string(), rx, Some(task)))
}

struct BayeuxClient {
    http_client: Client,
    endpoint: StreamingEndpoint,
    client_id: Option<String>,
    cookies: HashMap<String, String>,
}

impl BayeuxClient {
    fn new(http_client: Client, endpoint: StreamingEndpoint) -> Self {
        Self {
            http_client,
            endpoint,
            client_id: None,
            cookies: HashMap::new(),
        }
    }

    async fn handshake(&mut self) -> Result<(), ClientError> {
        let replies = self
            .send(json!([{
                "channel": "/meta/handshake",
                "version": "1.0",
                "minimumVersion": "1.0",
                "supportedConnectionTypes": ["long-polling"],
                "ext": { "replay": true }
            }]))
            .await?;

        let reply = find_meta(&replies, "/meta/handshake")
            .ok_or_else(|| ClientError::Decode("missing handshake reply".to_string()))?;
        if !is_successful(reply) {
            return Err(ClientError::Auth {
                message: format!("streaming handshake rejected: {}", error_text(reply)),
            });
        }
        let client_id = reply
            .get("clientId")
            .and_then(Value::as_str)
            .ok_or_else(|| ClientError::Decode("handshake reply without clientId".to_string()))?;

        debug!(client_id = %client_id, "Streaming handshake complete");
        self.client_id = Some(client_id.to_string());
        Ok(())
    }

    /// Subscribes and returns the acknowledgement plus any events that
    /// arrived in the same response. A rejected subscription is returned as
    /// an unsuccessful ack, not as an error.
    async fn subscribe(
        &mut self,
        channel: &str,
        replay_id: i64,
    ) -> Result<Vec<StreamingMessage>, ClientError> {
        let client_id = self.client_id.clone().ok_or(ClientError::Closed)?;
        let replies = self
            .send(json!([{
                "channel": "/meta/subscribe",
                "clientId": client_id,
                "subscription": channel,
                "ext": { "replay": { channel: replay_id } }
            }]))
            .await?;

        let ack = find_meta(&replies, "/meta/subscribe")
            .ok_or_else(|| ClientError::Decode("missing subscribe reply".to_string()))?;
        let successful = is_successful(ack);
        let mut messages = vec![StreamingMessage::SubscribeAck {
            channel: channel.to_string(),
            successful,
            error: (!successful).then(|| error_text(ack)),
        }];
        if successful {
            messages.extend(events_in(&replies));
        }
        Ok(messages)
    }

    /// Connect loop. Ends when the receiver is dropped or the server
    /// advises not to reconnect.
    async fn run(&mut self, channel: &str, mut replay_id: i64, tx: mpsc::Sender<StreamingMessage>) {
        loop {
            if tx.is_closed() {
                return;
            }
            let Some(client_id) = self.client_id.clone() else {
                return;
            };

            let replies = match self
                .send(json!([{
                    "channel": "/meta/connect",
                    "clientId": client_id,
                    "connectionType": "long-polling"
                }]))
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    warn!(channel = %channel, error = %e, "Streaming connect failed");
                    tokio::time::sleep(RECONNECT_DELAY).await;
                    continue;
                }
            };

            for event in events_in(&replies) {
                if let Some(id) = event.replay_id() {
                    replay_id = id;
                }
                if tx.send(event).await.is_err() {
                    return;
                }
            }

            let Some(connect) = find_meta(&replies, "/meta/connect") else {
                debug!(channel = %channel, "Connect reply without /meta/connect, backing off");
                tokio::time::sleep(RECONNECT_DELAY).await;
                continue;
            };
            if is_successful(connect) {
                continue;
            }

            match advice_reconnect(connect) {
                Some("none") => {
                    info!(channel = %channel, "Server advised not to reconnect, ending subscription");
                    return;
                }
                Some("handshake") | None => {
                    info!(channel = %channel, replay_id = replay_id, "Re-handshaking streaming client");
                    tokio::time::sleep(retry_delay(connect)).await;
                    let resubscribed = match self.handshake().await {
                        Ok(()) => self.subscribe(channel, replay_id).await,
                        Err(e) => Err(e),
                    };
                    match resubscribed {
                        Ok(messages) => {
                            let rejected = rejection(&messages);
                            for message in messages {
                                if tx.send(message).await.is_err() {
                                    return;
                                }
                            }
                            if let Some(reason) = rejected {
                                warn!(channel = %channel, reason = %reason, "Streaming resubscribe rejected, ending subscription");
                                return;
                            }
                        }
                        Err(e) => {
                            warn!(channel = %channel, error = %e, "Streaming resubscribe failed");
                        }
                    }
                }
                Some(_) => {
                    let delay = retry_delay(connect);
                    debug!(channel = %channel, delay_ms = delay.as_millis() as u64, "Retrying connect");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn send(&mut self, body: Value) -> Result<Vec<Value>, ClientError> {
        let mut request = self
            .http_client
            .post(&self.endpoint.url)
            .bearer_auth(&self.endpoint.access_token)
            .json(&body);
        if let Some(cookie) = self.cookie_header() {
            request = request.header(COOKIE, cookie);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ClientError::from_reqwest(e, &self.endpoint.url))?;

        for value in response.headers().get_all(SET_COOKIE) {
            self.remember_cookie(value);
        }

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Api {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<Vec<Value>>()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))
    }

    fn remember_cookie(&mut self, value: &HeaderValue) {
        let Ok(text) = value.to_str() else {
            return;
        };
        let pair = text.split(';').next().unwrap_or_default();
        if let Some((name, val)) = pair.split_once('=') {
            self.cookies
                .insert(name.trim().to_string(), val.trim().to_string());
        }
    }

    fn cookie_header(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        let mut pairs: Vec<String> = self
            .cookies
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        pairs.sort();
        Some(pairs.join("; "))
    }
}

fn find_meta<'a>(replies: &'a [Value], channel: &str) -> Option<&'a Value> {
    replies
        .iter()
        .find(|r| r.get("channel").and_then(Value::as_str) == Some(channel))
}

fn is_successful(reply: &Value) -> bool {
    reply
        .get("successful")
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

fn error_text(reply: &Value) -> String {
    reply
        .get("error")
        .and_then(Value::as_str)
        .unwrap_or("unknown error")
        .to_string()
}

fn advice_reconnect(reply: &Value) -> Option<&str> {
    reply
        .get("advice")
        .and_then(|a| a.get("reconnect"))
        .and_then(Value::as_str)
}

/// Wait before the next connect: the server's `advice.interval` (ms) when
/// it sends a positive one, otherwise [`RECONNECT_DELAY`].
fn retry_delay(reply: &Value) -> Duration {
    reply
        .get("advice")
        .and_then(|a| a.get("interval"))
        .and_then(Value::as_u64)
        .filter(|ms| *ms > 0)
        .map(Duration::from_millis)
        .unwrap_or(RECONNECT_DELAY)
}

/// Reason of an unsuccessful subscribe ack among `messages`, if any.
fn rejection(messages: &[StreamingMessage]) -> Option<String> {
    messages.iter().find_map(|m| match m {
        StreamingMessage::SubscribeAck {
            successful: false,
            error,
            ..
        } => Some(error.clone().unwrap_or_else(|| "unknown error".to_string())),
        _ => None,
    })
}

/// Non-meta messages carrying `data` are channel events.
fn events_in(replies: &[Value]) -> Vec<StreamingMessage> {
    replies
        .iter()
        .filter_map(|r| {
            let channel = r.get("channel").and_then(Value::as_str)?;
            if channel.starts_with("/meta/") {
                return None;
            }
            let data = r.get("data")?.clone();
            Some(StreamingMessage::Event {
                channel: channel.to_string(),
                data,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    #[test]
    fn test_events_in_skips_meta_messages() {
        let replies = vec![
            json!({"channel": "/meta/connect", "successful": true}),
            json!({"channel": "/event/Order__e", "data": {"event": {"replayId": 5}, "payload": {"a": 1}}}),
        ];
        let events = events_in(&replies);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].channel(), "/event/Order__e");
        assert_eq!(events[0].replay_id(), Some(5));
    }

    #[test]
    fn test_advice_reconnect() {
        let reply = json!({"channel": "/meta/connect", "successful": false,
                           "advice": {"reconnect": "handshake"}});
        assert_eq!(advice_reconnect(&reply), Some("handshake"));
        assert_eq!(advice_reconnect(&json!({})), None);
    }

    #[tokio::test]
    async fn test_subscribe_delivers_ack_and_events() {
        let mut server = Server::new_async().await;
        let _handshake = server
            .mock("POST", "/cometd/59.0")
            .match_body(Matcher::Regex("/meta/handshake".to_string()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_header("set-cookie", "BAYEUX_BROWSER=abc; Path=/")
            .with_body(r#"[{"channel": "/meta/handshake", "successful": true, "clientId": "c1"}]"#)
            .create_async()
            .await;
        let _subscribe = server
            .mock("POST", "/cometd/59.0")
            .match_body(Matcher::Regex("/meta/subscribe".to_string()))
            .match_header("cookie", "BAYEUX_BROWSER=abc")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"[{"channel": "/meta/subscribe", "successful": true, "subscription": "/event/Order__e"}]"#)
            .create_async()
            .await;
        let _connect = server
            .mock("POST", "/cometd/59.0")
            .match_body(Matcher::Regex("/meta/connect".to_string()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"[{"channel": "/event/Order__e", "data": {"event": {"replayId": 11}, "payload": {"Status__c": "New"}}},
                    {"channel": "/meta/connect", "successful": true}]"#,
            )
            .create_async()
            .await;

        let endpoint = StreamingEndpoint {
            url: format!("{}/cometd/59.0", server.url()),
            access_token: "token".to_string(),
        };
        let mut sub = subscribe(Client::new(), endpoint, "/event/Order__e", -1)
            .await
            .unwrap();

        match sub.next().await.unwrap() {
            StreamingMessage::SubscribeAck { successful, .. } => assert!(successful),
            other => panic!("expected ack, got {:?}", other),
        }
        let event = sub.next().await.unwrap();
        assert_eq!(event.replay_id(), Some(11));

        sub.cancel();
    }

    #[test]
    fn test_retry_delay_follows_advice() {
        let advised = json!({"successful": false, "advice": {"reconnect": "retry", "interval": 1000}});
        assert_eq!(retry_delay(&advised), Duration::from_millis(1000));
        let zero = json!({"successful": false, "advice": {"reconnect": "retry", "interval": 0}});
        assert_eq!(retry_delay(&zero), RECONNECT_DELAY);
        assert_eq!(retry_delay(&json!({"successful": false})), RECONNECT_DELAY);
    }

    /// Server whose handshake and subscribe succeed; the returned mocks must
    /// stay alive for the duration of the test.
    async fn subscribed_server(connect_body: &str) -> (mockito::ServerGuard, Vec<mockito::Mock>, mockito::Mock) {
        let mut server = Server::new_async().await;
        let handshake = server
            .mock("POST", "/cometd/59.0")
            .match_body(Matcher::Regex("/meta/handshake".to_string()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"[{"channel": "/meta/handshake", "successful": true, "clientId": "c1"}]"#)
            .create_async()
            .await;
        let subscribe = server
            .mock("POST", "/cometd/59.0")
            .match_body(Matcher::Regex("/meta/subscribe".to_string()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"[{"channel": "/meta/subscribe", "successful": true}]"#)
            .create_async()
            .await;
        let connect = server
            .mock("POST", "/cometd/59.0")
            .match_body(Matcher::Regex("/meta/connect".to_string()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(connect_body)
            .expect_at_least(1)
            .expect_at_most(2)
            .create_async()
            .await;
        (server, vec![handshake, subscribe], connect)
    }

    fn endpoint_for(server: &Server) -> StreamingEndpoint {
        StreamingEndpoint {
            url: format!("{}/cometd/59.0", server.url()),
            access_token: "token".to_string(),
        }
    }

    #[tokio::test]
    async fn test_retry_advice_waits_between_connects() {
        let (server, _mocks, connect) = subscribed_server(
            r#"[{"channel": "/meta/connect", "successful": false,
                 "advice": {"reconnect": "retry", "interval": 1000}}]"#,
        )
        .await;

        let mut sub = subscribe(Client::new(), endpoint_for(&server), "/event/Order__e", -1)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        sub.cancel();

        connect.assert_async().await;
    }

    #[tokio::test]
    async fn test_reply_without_connect_meta_waits() {
        let (server, _mocks, connect) = subscribed_server("[]").await;

        let mut sub = subscribe(Client::new(), endpoint_for(&server), "/event/Order__e", -1)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        sub.cancel();

        connect.assert_async().await;
    }

    #[tokio::test]
    async fn test_rejected_resubscribe_is_delivered() {
        let mut server = Server::new_async().await;
        let _handshake = server
            .mock("POST", "/cometd/59.0")
            .match_body(Matcher::Regex("/meta/handshake".to_string()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"[{"channel": "/meta/handshake", "successful": true, "clientId": "c1"}]"#)
            .create_async()
            .await;
        let _first = server
            .mock("POST", "/cometd/59.0")
            .match_body(Matcher::Regex(r#"/meta/subscribe.*"/event/Order__e":-1"#.to_string()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"[{"channel": "/meta/subscribe", "successful": true}]"#)
            .create_async()
            .await;
        let _again = server
            .mock("POST", "/cometd/59.0")
            .match_body(Matcher::Regex(r#"/meta/subscribe.*"/event/Order__e":11"#.to_string()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"[{"channel": "/meta/subscribe", "successful": false, "error": "403::Replay id unavailable"}]"#)
            .create_async()
            .await;
        let _connect = server
            .mock("POST", "/cometd/59.0")
            .match_body(Matcher::Regex("/meta/connect".to_string()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"[{"channel": "/event/Order__e", "data": {"event": {"replayId": 11}}},
                    {"channel": "/meta/connect", "successful": false,
                     "advice": {"reconnect": "handshake", "interval": 50}}]"#,
            )
            .create_async()
            .await;

        let mut sub = subscribe(Client::new(), endpoint_for(&server), "/event/Order__e", -1)
            .await
            .unwrap();

        let mut received = Vec::new();
        let drained = tokio::time::timeout(Duration::from_secs(2), async {
            while let Some(message) = sub.next().await {
                received.push(message);
            }
        })
        .await;
        assert!(drained.is_ok(), "subscription should end after the rejection");

        assert_eq!(received.len(), 3);
        assert_eq!(received[1].replay_id(), Some(11));
        assert_eq!(
            received[2],
            StreamingMessage::SubscribeAck {
                channel: "/event/Order__e".to_string(),
                successful: false,
                error: Some("403::Replay id unavailable".to_string()),
            }
        );
    }

    #[tokio::test]
    async fn test_handshake_rejected() {
        let mut server = Server::new_async().await;
        let _handshake = server
            .mock("POST", "/cometd/59.0")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"[{"channel": "/meta/handshake", "successful": false, "error": "403::Unknown client"}]"#)
            .create_async()
            .await;

        let endpoint = StreamingEndpoint {
            url: format!("{}/cometd/59.0", server.url()),
            access_token: "token".to_string(),
        };
        let result = subscribe(Client::new(), endpoint, "/event/Order__e", -1).await;
        match result {
            Err(ClientError::Auth { message }) => assert!(message.contains("Unknown client")),
            Err(other) => panic!("unexpected error: {:?}", other),
            Ok(_) => panic!("handshake should have been rejected"),
        }
    }
}
