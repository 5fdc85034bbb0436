use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

use super::streaming;
use super::{ApiSession, Authenticator, ClientError, QueryPage, StreamingSubscription};

pub const DEFAULT_API_VERSION: &str = "59.0";

const USER_AGENT: &str = "sfconn/0.1";

/// Token response from the username-password OAuth grant.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    instance_url: String,
}

fn build_http_client() -> Client {
    Client::builder()
        .user_agent(USER_AGENT)
        .build()
        .unwrap_or_else(|_| Client::new())
}

/// Logs in with the OAuth 2.0 username-password grant.
pub struct RestAuthenticator {
    http_client: Client,
    client_id: String,
    client_secret: String,
    api_version: String,
}

impl RestAuthenticator {
    pub fn new(client_id: String, client_secret: String, api_version: String) -> Self {
        Self {
            http_client: build_http_client(),
            client_id,
            client_secret,
            api_version,
        }
    }
}

#[async_trait]
impl Authenticator for RestAuthenticator {
    async fn login(
        &self,
        login_url: &str,
        username: &str,
        password: &str,
    ) -> Result<Arc<dyn ApiSession>, ClientError> {
        let token_url = format!("{}/services/oauth2/token", login_url.trim_end_matches('/'));
        debug!(url = %token_url, username = %username, "Requesting session token");

        let form = [
            ("grant_type", "password"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("username", username),
            ("password", password),
        ];

        let response = self
            .http_client
            .post(&token_url)
            .header("Accept", "application/json")
            .form(&form)
            .send()
            .await
            .map_err(|e| ClientError::from_reqwest(e, login_url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read body>".to_string());
            return Err(ClientError::Auth {
                message: format!("token request failed with status {}: {}", status, body),
            });
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))?;

        Ok(Arc::new(RestSession {
            http_client: self.http_client.clone(),
            instance_url: token.instance_url.trim_end_matches('/').to_string(),
            access_token: token.access_token,
            api_version: self.api_version.clone(),
        }))
    }
}

/// Session bound to one instance URL and bearer token.
pub struct RestSession {
    http_client: Client,
    instance_url: String,
    access_token: String,
    api_version: String,
}

impl RestSession {
    /// Wraps an already issued access token (e.g. from an external login).
    pub fn with_token(instance_url: String, access_token: String, api_version: String) -> Self {
        Self {
            http_client: build_http_client(),
            instance_url: instance_url.trim_end_matches('/').to_string(),
            access_token,
            api_version,
        }
    }

    fn data_url(&self) -> String {
        format!("{}/services/data/v{}", self.instance_url, self.api_version)
    }

    /// Resolves absolute URLs, instance-relative paths, and bare paths
    /// relative to the data API root.
    fn resolve(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else if url.starts_with('/') {
            format!("{}{}", self.instance_url, url)
        } else {
            format!("{}/{}", self.data_url(), url)
        }
    }

    /// Continuation cursors are either a `nextRecordsUrl` or a bare locator.
    fn continuation_url(&self, cursor: &str, query_path: &str) -> String {
        if cursor.starts_with('/') || cursor.starts_with("http") {
            self.resolve(cursor)
        } else {
            format!("{}/{}/{}", self.data_url(), query_path, cursor)
        }
    }

    async fn get_json(&self, url: &str) -> Result<Value, ClientError> {
        debug!(url = %url, "GET");
        let response = self
            .http_client
            .get(url)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| ClientError::from_reqwest(e, &self.instance_url))?;
        read_json(response).await
    }

    async fn get_page(&self, url: &str) -> Result<QueryPage, ClientError> {
        let body = self.get_json(url).await?;
        serde_json::from_value(body).map_err(|e| ClientError::Decode(e.to_string()))
    }
}

/// Maps the response status to a [`ClientError`] and decodes the JSON body.
///
/// - 401 → session expired or invalid
/// - other non-2xx → API error carrying the body
/// - 204 or an empty 2xx body → `null`
async fn read_json(response: reqwest::Response) -> Result<Value, ClientError> {
    let status = response.status();
    match status {
        StatusCode::UNAUTHORIZED => {
            let body = response.text().await.unwrap_or_default();
            Err(ClientError::Auth {
                message: format!("session expired or invalid: {}", body),
            })
        }
        StatusCode::NO_CONTENT => Ok(Value::Null),
        s if !s.is_success() => {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read body>".to_string());
            Err(ClientError::Api {
                status: s.as_u16(),
                body,
            })
        }
        _ => {
            let body = response
                .text()
                .await
                .map_err(|e| ClientError::Decode(e.to_string()))?;
            if body.trim().is_empty() {
                return Ok(Value::Null);
            }
            serde_json::from_str(&body).map_err(|e| ClientError::Decode(e.to_string()))
        }
    }
}

#[async_trait]
impl ApiSession for RestSession {
    fn instance_url(&self) -> &str {
        &self.instance_url
    }

    async fn query(&self, soql: &str) -> Result<QueryPage, ClientError> {
        let url = format!("{}/query?q={}", self.data_url(), urlencoding::encode(soql));
        self.get_page(&url).await
    }

    async fn query_more(&self, next_records_url: &str) -> Result<QueryPage, ClientError> {
        let url = self.continuation_url(next_records_url, "query");
        self.get_page(&url).await
    }

    async fn tooling_query(&self, soql: &str) -> Result<QueryPage, ClientError> {
        let url = format!(
            "{}/tooling/query?q={}",
            self.data_url(),
            urlencoding::encode(soql)
        );
        self.get_page(&url).await
    }

    async fn tooling_query_more(&self, next_records_url: &str) -> Result<QueryPage, ClientError> {
        let url = self.continuation_url(next_records_url, "tooling/query");
        self.get_page(&url).await
    }

    async fn describe_global(&self) -> Result<Value, ClientError> {
        self.get_json(&format!("{}/sobjects", self.data_url())).await
    }

    async fn describe_sobject(&self, name: &str) -> Result<Value, ClientError> {
        self.get_json(&format!("{}/sobjects/{}/describe", self.data_url(), name))
            .await
    }

    async fn tooling_describe_global(&self) -> Result<Value, ClientError> {
        self.get_json(&format!("{}/tooling/sobjects", self.data_url()))
            .await
    }

    async fn tooling_describe_sobject(&self, name: &str) -> Result<Value, ClientError> {
        self.get_json(&format!(
            "{}/tooling/sobjects/{}/describe",
            self.data_url(),
            name
        ))
        .await
    }

    /// Metadata describe is only offered over SOAP; the raw envelope is
    /// returned under `describeMetadataResponse`.
    async fn metadata_describe(&self) -> Result<Value, ClientError> {
        let url = format!("{}/services/Soap/m/{}", self.instance_url, self.api_version);
        let envelope = format!(
            concat!(
                r#"<?xml version="1.0" encoding="UTF-8"?>"#,
                r#"<soapenv:Envelope xmlns:soapenv="http://schemas.xmlsoap.org/soap/envelope/" "#,
                r#"xmlns:met="http://soap.sforce.com/2006/04/metadata">"#,
                r#"<soapenv:Header><met:SessionHeader><met:sessionId>{}</met:sessionId>"#,
                r#"</met:SessionHeader></soapenv:Header>"#,
                r#"<soapenv:Body><met:describeMetadata><met:asOfVersion>{}</met:asOfVersion>"#,
                r#"</met:describeMetadata></soapenv:Body></soapenv:Envelope>"#
            ),
            self.access_token, self.api_version
        );

        let response = self
            .http_client
            .post(&url)
            .header("Content-Type", "text/xml")
            .header("SOAPAction", "describeMetadata")
            .body(envelope)
            .send()
            .await
            .map_err(|e| ClientError::from_reqwest(e, &self.instance_url))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))?;
        if !status.is_success() {
            return Err(ClientError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(json!({ "describeMetadataResponse": body }))
    }

    async fn request_get(&self, url: &str) -> Result<Value, ClientError> {
        self.get_json(&self.resolve(url)).await
    }

    async fn create_record(&self, sobject: &str, record: &Value) -> Result<Value, ClientError> {
        let url = format!("{}/sobjects/{}/", self.data_url(), sobject);
        debug!(url = %url, "POST");
        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(record)
            .send()
            .await
            .map_err(|e| ClientError::from_reqwest(e, &self.instance_url))?;
        read_json(response).await
    }

    async fn subscribe(
        &self,
        channel: &str,
        replay_id: i64,
    ) -> Result<StreamingSubscription, ClientError> {
        let endpoint = streaming::StreamingEndpoint {
            url: format!("{}/cometd/{}", self.instance_url, self.api_version),
            access_token: self.access_token.clone(),
        };
        streaming::subscribe(self.http_client.clone(), endpoint, channel, replay_id).await
    }

    async fn logout(&self) -> Result<(), ClientError> {
        let url = format!("{}/services/oauth2/revoke", self.instance_url);
        let response = self
            .http_client
            .post(&url)
            .form(&[("token", self.access_token.as_str())])
            .send()
            .await
            .map_err(|e| ClientError::from_reqwest(e, &self.instance_url))?;
        read_json(response).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    fn session_for(server: &Server) -> RestSession {
        RestSession::with_token(server.url(), "token123".to_string(), "59.0".to_string())
    }

    #[tokio::test]
    async fn test_login_returns_session_for_instance() {
        let mut server = Server::new_async().await;
        let instance = server.url();
        let _mock = server
            .mock("POST", "/services/oauth2/token")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "password".into()),
                Matcher::UrlEncoded("username".into(), "user@example.com".into()),
                Matcher::UrlEncoded("password".into(), "pwTOKEN".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(format!(
                r#"{{"access_token": "00D!abc", "instance_url": "{}/"}}"#,
                instance
            ))
            .create_async()
            .await;

        let auth = RestAuthenticator::new("cid".into(), "secret".into(), "59.0".into());
        let session = auth
            .login(&server.url(), "user@example.com", "pwTOKEN")
            .await
            .unwrap();
        assert_eq!(session.instance_url(), instance);
    }

    #[tokio::test]
    async fn test_login_rejected_is_auth_error() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/services/oauth2/token")
            .with_status(400)
            .with_body(r#"{"error": "invalid_grant"}"#)
            .create_async()
            .await;

        let auth = RestAuthenticator::new("cid".into(), "secret".into(), "59.0".into());
        let err = auth.login(&server.url(), "u", "p").await.err().unwrap();
        assert!(matches!(err, ClientError::Auth { .. }));
        assert!(err.to_string().contains("invalid_grant"));
    }

    #[tokio::test]
    async fn test_query_and_query_more() {
        let mut server = Server::new_async().await;
        let _first = server
            .mock("GET", "/services/data/v59.0/query")
            .match_query(Matcher::UrlEncoded(
                "q".into(),
                "SELECT Id FROM Account".into(),
            ))
            .match_header("authorization", "Bearer token123")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"totalSize": 2, "done": false, "records": [{"Id": "1"}],
                    "nextRecordsUrl": "/services/data/v59.0/query/01gX-1"}"#,
            )
            .create_async()
            .await;
        let _second = server
            .mock("GET", "/services/data/v59.0/query/01gX-1")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"totalSize": 2, "done": true, "records": [{"Id": "2"}]}"#)
            .create_async()
            .await;

        let session = session_for(&server);
        let page = session.query("SELECT Id FROM Account").await.unwrap();
        assert!(!page.done);
        let cursor = page.next_records_url.unwrap();

        let page = session.query_more(&cursor).await.unwrap();
        assert!(page.done);
        assert_eq!(page.records[0]["Id"], "2");
    }

    #[tokio::test]
    async fn test_tooling_query_more_accepts_bare_locator() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/services/data/v59.0/tooling/query/01gY-2000")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"totalSize": 1, "done": true, "records": [{"Id": "7"}]}"#)
            .create_async()
            .await;

        let session = session_for(&server);
        let page = session.tooling_query_more("01gY-2000").await.unwrap();
        assert_eq!(page.records.len(), 1);
    }

    #[tokio::test]
    async fn test_describe_and_request_get_paths() {
        let mut server = Server::new_async().await;
        let _describe = server
            .mock("GET", "/services/data/v59.0/sobjects/Account/describe")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"name": "Account"}"#)
            .create_async()
            .await;
        let _limits = server
            .mock("GET", "/services/data/v59.0/limits")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"DailyApiRequests": {"Max": 15000}}"#)
            .create_async()
            .await;

        let session = session_for(&server);
        let describe = session.describe_sobject("Account").await.unwrap();
        assert_eq!(describe["name"], "Account");

        let relative = session.request_get("limits").await.unwrap();
        assert_eq!(relative["DailyApiRequests"]["Max"], 15000);

        let rooted = session
            .request_get("/services/data/v59.0/limits")
            .await
            .unwrap();
        assert_eq!(rooted, relative);
    }

    #[tokio::test]
    async fn test_error_status_mapping() {
        let mut server = Server::new_async().await;
        let _expired = server
            .mock("GET", "/services/data/v59.0/sobjects")
            .with_status(401)
            .with_body(r#"[{"errorCode": "INVALID_SESSION_ID"}]"#)
            .create_async()
            .await;
        let _bad = server
            .mock("GET", "/services/data/v59.0/query")
            .match_query(Matcher::Any)
            .with_status(400)
            .with_body(r#"[{"errorCode": "MALFORMED_QUERY"}]"#)
            .create_async()
            .await;

        let session = session_for(&server);
        let err = session.describe_global().await.unwrap_err();
        assert!(matches!(err, ClientError::Auth { .. }));

        let err = session.query("SELEC nothing").await.unwrap_err();
        match err {
            ClientError::Api { status, body } => {
                assert_eq!(status, 400);
                assert!(body.contains("MALFORMED_QUERY"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_create_record_posts_json() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/services/data/v59.0/sobjects/Order_Event__e/")
            .match_body(Matcher::Json(serde_json::json!({"Status__c": "Shipped"})))
            .with_status(201)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id": "e00x", "success": true, "errors": []}"#)
            .create_async()
            .await;

        let session = session_for(&server);
        let result = session
            .create_record("Order_Event__e", &serde_json::json!({"Status__c": "Shipped"}))
            .await
            .unwrap();
        assert_eq!(result["success"], true);
    }

    #[tokio::test]
    async fn test_logout_revokes_token() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/services/oauth2/revoke")
            .match_body(Matcher::UrlEncoded("token".into(), "token123".into()))
            .with_status(200)
            .with_body("")
            .create_async()
            .await;

        let session = session_for(&server);
        session.logout().await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_empty_success_body_reads_as_null() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/services/data/v59.0/limits")
            .with_status(200)
            .with_body("  ")
            .create_async()
            .await;

        let session = session_for(&server);
        assert_eq!(session.request_get("limits").await.unwrap(), Value::Null);
    }
}
