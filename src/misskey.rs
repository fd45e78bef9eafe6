use crate::config::{api_endpoint, MisskeyConfig};
use crate::error::{MisskeyError, NotepurgeError};
use crate::retry::RetryPolicy;
use crate::types::{ApiErrorDetail, Note, User};
use reqwest::{Response, StatusCode};
use serde::de::{DeserializeOwned, IgnoredAny};
use serde_json::{json, Map, Value};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, warn};
use url::Url;

/// Notes requested per `users/notes` page
pub const PAGE_SIZE: usize = 100;

/// Body field carrying the API token
const TOKEN_FIELD: &str = "i";

/// Operations the cleanup run needs from a Misskey server
#[allow(async_fn_in_trait)] // Internal trait for dependency injection in tests
pub trait MisskeyApi {
    async fn fetch_account(&self) -> Result<User, MisskeyError>;
    async fn unpin(&self, note_id: &str) -> Result<(), MisskeyError>;
    async fn delete(&self, note_id: &str) -> Result<(), MisskeyError>;
    async fn list_notes(&self, user_id: &str, offset: usize) -> Result<Vec<Note>, MisskeyError>;
}

/// Misskey HTTP API client. Every call is a JSON POST with the token in the body.
#[derive(Clone)]
pub struct MisskeyClient {
    endpoint: Url,
    token: String,
    http_client: reqwest::Client,
    retry_policy: RetryPolicy,
}

impl MisskeyClient {
    /// Create a client for `https://<host>/api/`
    pub fn new(config: MisskeyConfig, retry_policy: RetryPolicy) -> Result<Self, NotepurgeError> {
        let endpoint = api_endpoint(&config.host)?;
        Self::with_endpoint(endpoint, config.token, retry_policy)
    }

    /// Create a client for an explicit base endpoint, e.g. `http://127.0.0.1:3000/api/`
    pub fn with_endpoint(
        endpoint: Url,
        token: impl Into<String>,
        retry_policy: RetryPolicy,
    ) -> Result<Self, NotepurgeError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(format!("notepurge/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| MisskeyError::Network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            endpoint,
            token: token.into(),
            http_client,
            retry_policy,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Merge the token into an operation payload
    fn request_body(&self, payload: Value) -> Value {
        let mut body = match payload {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        body.insert(TOKEN_FIELD.to_string(), Value::String(self.token.clone()));
        Value::Object(body)
    }

    /// POST `payload` to `path`, logging any failure with the path it happened on
    async fn post<T>(&self, path: &str, payload: Value) -> Result<T, MisskeyError>
    where
        T: DeserializeOwned,
    {
        let result = self.post_with_retry(path, payload).await;
        if let Err(ref e) = result {
            error!("API request failed for {}: {}", path, e);
        }
        result
    }

    async fn post_with_retry<T>(&self, path: &str, payload: Value) -> Result<T, MisskeyError>
    where
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.endpoint, path);
        let body = self.request_body(payload);
        let mut attempt = 1;

        loop {
            debug!("POST {} (attempt {})", url, attempt);

            let response = self
                .http_client
                .post(&url)
                .json(&body)
                .send()
                .await
                .map_err(|e| MisskeyError::Network(format!("Request to {path} failed: {e}")))?;

            if response.status() != StatusCode::TOO_MANY_REQUESTS {
                return Self::handle_response(response).await;
            }

            let error_body = response.bytes().await.unwrap_or_default();
            let rate_limit = ApiErrorDetail::parse(&error_body).rate_limit_info();
            let wait = self.retry_policy.wait_for(rate_limit.as_ref(), attempt);

            if !self.retry_policy.should_retry(attempt) || !self.retry_policy.allows_wait(wait) {
                return Err(MisskeyError::RateLimitExceeded {
                    wait_ms: u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                    attempts: attempt,
                });
            }

            warn!(
                "Rate limited on {} (remaining: {:?}), waiting {} ms before retry {}/{}",
                path,
                rate_limit.as_ref().and_then(|info| info.remaining),
                wait.as_millis(),
                attempt + 1,
                self.retry_policy.max_attempts
            );
            sleep(wait).await;
            attempt += 1;
        }
    }

    /// Translate an HTTP response into a typed result or a `MisskeyError`
    async fn handle_response<T>(response: Response) -> Result<T, MisskeyError>
    where
        T: DeserializeOwned,
    {
        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| MisskeyError::Network(format!("Failed to read response: {e}")))?;

        if !status.is_success() {
            let detail = ApiErrorDetail::parse(&bytes);
            return Err(MisskeyError::ApiRequestFailed {
                status: status.as_u16(),
                message: detail.message_or_default(),
                code: detail.code,
            });
        }

        if status == StatusCode::NO_CONTENT || bytes.iter().all(u8::is_ascii_whitespace) {
            return serde_json::from_value(Value::Null).map_err(|e| {
                MisskeyError::InvalidResponse(format!("Expected a response body: {e}"))
            });
        }

        serde_json::from_slice(&bytes)
            .map_err(|e| MisskeyError::InvalidResponse(format!("JSON parsing failed: {e}")))
    }
}

impl MisskeyApi for MisskeyClient {
    async fn fetch_account(&self) -> Result<User, MisskeyError> {
        self.post("i", json!({})).await
    }

    async fn unpin(&self, note_id: &str) -> Result<(), MisskeyError> {
        self.post::<IgnoredAny>("notes/unpin", json!({ "noteId": note_id })).await?;
        Ok(())
    }

    async fn delete(&self, note_id: &str) -> Result<(), MisskeyError> {
        self.post::<IgnoredAny>("notes/delete", json!({ "noteId": note_id })).await?;
        Ok(())
    }

    async fn list_notes(&self, user_id: &str, offset: usize) -> Result<Vec<Note>, MisskeyError> {
        self.post(
            "users/notes",
            json!({
                "userId": user_id,
                "limit": PAGE_SIZE,
                "offset": offset,
            }),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            fallback_wait: Duration::from_millis(20),
            max_wait: Duration::from_millis(100),
        }
    }

    async fn client_for(server: &MockServer, policy: RetryPolicy) -> MisskeyClient {
        let endpoint = Url::parse(&format!("{}/api/", server.uri())).unwrap();
        MisskeyClient::with_endpoint(endpoint, "test_token", policy).unwrap()
    }

    fn rate_limited(reset_ms: u64) -> ResponseTemplate {
        ResponseTemplate::new(429).set_body_json(json!({
            "error": {
                "message": "Rate limit exceeded. Please try again later.",
                "code": "RATE_LIMIT_EXCEEDED",
                "id": "d5826d14-3982-4d2e-8011-b9e9f02499ef",
                "info": {"resetMs": reset_ms, "remaining": 0, "limit": 300}
            }
        }))
    }

    #[test]
    fn test_client_endpoint_from_host() {
        let client = MisskeyClient::new(
            MisskeyConfig {
                host: "misskey.io".to_string(),
                token: "token".to_string(),
            },
            RetryPolicy::default(),
        )
        .unwrap();
        assert_eq!(client.endpoint().as_str(), "https://misskey.io/api/");
    }

    #[test]
    fn test_client_rejects_host_with_scheme() {
        let result = MisskeyClient::new(
            MisskeyConfig {
                host: "https://misskey.io".to_string(),
                token: "token".to_string(),
            },
            RetryPolicy::default(),
        );
        assert!(matches!(result, Err(NotepurgeError::Config(_))));
    }

    #[test]
    fn test_request_body_carries_token() {
        let client = MisskeyClient::with_endpoint(
            Url::parse("https://misskey.io/api/").unwrap(),
            "secret",
            RetryPolicy::default(),
        )
        .unwrap();

        let body = client.request_body(json!({"noteId": "abc"}));
        assert_eq!(body, json!({"noteId": "abc", "i": "secret"}));

        let body = client.request_body(json!({}));
        assert_eq!(body, json!({"i": "secret"}));
    }

    #[tokio::test]
    async fn test_fetch_account_posts_token_as_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/i"))
            .and(header("content-type", "application/json"))
            .and(body_partial_json(json!({"i": "test_token"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "9abc",
                "username": "alice",
                "notesCount": 3,
                "pinnedNotes": []
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, fast_policy(3)).await;
        let user = client.fetch_account().await.unwrap();

        assert_eq!(user.id.as_deref(), Some("9abc"));
        assert_eq!(user.notes_count(), 3);
    }

    #[tokio::test]
    async fn test_list_notes_sends_paging_parameters() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/users/notes"))
            .and(body_partial_json(json!({
                "userId": "9abc",
                "limit": 100,
                "offset": 200,
                "i": "test_token"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"id": "n1", "createdAt": "2024-01-01T00:00:00.000Z", "text": "hello"},
                {"createdAt": "2024-01-01T00:00:00.000Z"}
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, fast_policy(3)).await;
        let notes = client.list_notes("9abc", 200).await.unwrap();

        assert_eq!(notes.len(), 2);
        assert_eq!(notes[0].id.as_deref(), Some("n1"));
        assert!(notes[1].id.is_none());
    }

    #[tokio::test]
    async fn test_delete_and_unpin_accept_empty_and_json_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/notes/delete"))
            .and(body_partial_json(json!({"noteId": "n1"})))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/notes/unpin"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "9abc"})))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, fast_policy(3)).await;
        client.delete("n1").await.unwrap();
        client.unpin("p1").await.unwrap();
    }

    #[tokio::test]
    async fn test_error_status_surfaces_server_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/i"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": {
                    "message": "invalid token",
                    "code": "AUTHENTICATION_FAILED",
                    "kind": "client"
                }
            })))
            .mount(&server)
            .await;

        let client = client_for(&server, fast_policy(3)).await;
        let error = client.fetch_account().await.unwrap_err();

        assert_eq!(
            error,
            MisskeyError::ApiRequestFailed {
                status: 401,
                message: "invalid token".to_string(),
                code: Some("AUTHENTICATION_FAILED".to_string()),
            }
        );
    }

    #[tokio::test]
    async fn test_error_status_without_message_uses_fallback() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("oops"))
            .mount(&server)
            .await;

        let client = client_for(&server, fast_policy(3)).await;
        let error = client.delete("n1").await.unwrap_err();

        assert_eq!(error.to_string(), "API request failed");
        assert_eq!(error.status(), Some(500));
    }

    #[tokio::test]
    async fn test_invalid_json_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/users/notes"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{not json"))
            .mount(&server)
            .await;

        let client = client_for(&server, fast_policy(3)).await;
        let error = client.list_notes("9abc", 0).await.unwrap_err();
        assert!(matches!(error, MisskeyError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_rate_limit_waits_reset_ms_and_retries_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/notes/delete"))
            .respond_with(rate_limited(300))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/notes/delete"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let policy = RetryPolicy {
            max_wait: Duration::from_secs(1),
            ..fast_policy(5)
        };
        let client = client_for(&server, policy).await;
        let started = Instant::now();
        client.delete("n1").await.unwrap();

        assert!(started.elapsed() >= Duration::from_millis(300));
        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].body, requests[1].body);
    }

    #[tokio::test]
    async fn test_rate_limit_without_reset_uses_fallback_wait() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(2)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        let client = client_for(&server, fast_policy(5)).await;
        let started = Instant::now();
        let notes = client.list_notes("9abc", 0).await.unwrap();

        assert!(notes.is_empty());
        // 20 ms then 40 ms of backoff
        assert!(started.elapsed() >= Duration::from_millis(60));
        assert_eq!(server.received_requests().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_rate_limit_gives_up_after_max_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(rate_limited(10))
            .mount(&server)
            .await;

        let client = client_for(&server, fast_policy(3)).await;
        let error = client.unpin("p1").await.unwrap_err();

        assert_eq!(
            error,
            MisskeyError::RateLimitExceeded {
                wait_ms: 10,
                attempts: 3
            }
        );
        assert_eq!(server.received_requests().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_rate_limit_hint_above_max_wait_fails_immediately() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(rate_limited(600_000))
            .mount(&server)
            .await;

        let client = client_for(&server, fast_policy(5)).await;
        let started = Instant::now();
        let error = client.delete("n1").await.unwrap_err();

        assert_eq!(
            error,
            MisskeyError::RateLimitExceeded {
                wait_ms: 600_000,
                attempts: 1
            }
        );
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unrepresentable_reset_sec_does_not_panic() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_json(json!({
                "error": {"code": "RATE_LIMIT_EXCEEDED", "info": {"resetSec": 1e20}}
            })))
            .mount(&server)
            .await;

        let client = client_for(&server, fast_policy(5)).await;
        let error = client.unpin("p1").await.unwrap_err();

        assert_eq!(
            error,
            MisskeyError::RateLimitExceeded {
                wait_ms: u64::MAX,
                attempts: 1
            }
        );
    }

    #[tokio::test]
    async fn test_network_failure_is_reported() {
        let endpoint = Url::parse("http://127.0.0.1:9/api/").unwrap();
        let client = MisskeyClient::with_endpoint(endpoint, "token", fast_policy(3)).unwrap();

        let error = client.fetch_account().await.unwrap_err();
        assert!(matches!(error, MisskeyError::Network(_)));
    }
}
