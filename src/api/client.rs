//! HTTP client for the VCF automation API.
//!
//! Handles bearer token resolution, proactive refresh, and a single retry on
//! 401. Status-code tolerance is left to callers.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use reqwest::{Method, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use super::token::{StoredToken, TokenStore};
use crate::config::Config;
use crate::error::VuoError;

/// Stateless request wrapper around a shared token store.
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    username: String,
    password: SecretString,
    store: Arc<dyn TokenStore>,
    refresh_lock: tokio::sync::Mutex<()>,
}

impl ApiClient {
    pub fn new(config: &Config, store: Arc<dyn TokenStore>) -> Result<Self, VuoError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout))
            // SDDC Manager ships with self-signed certificates.
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| VuoError::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: config.base_url.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
            store,
            refresh_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Send a request and decode the JSON response.
    ///
    /// Any 2xx status is success; an empty body decodes to `Value::Null`.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        query: &[(&str, &str)],
    ) -> Result<Value, VuoError> {
        let token = self.valid_token().await?;
        let response = self
            .send(method.clone(), path, body, query, &token)
            .await?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return Self::into_json(response).await;
        }

        warn!(path, "Unauthorized response, refreshing token and retrying once");
        let token = self.refresh_token().await?;
        let response = self.send(method, path, body, query, &token).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(VuoError::Auth(format!(
                "{path} still unauthorized after token refresh"
            )));
        }
        Self::into_json(response).await
    }

    pub async fn get(&self, path: &str, query: &[(&str, &str)]) -> Result<Value, VuoError> {
        self.request(Method::GET, path, None, query).await
    }

    pub async fn post(&self, path: &str, body: &Value) -> Result<Value, VuoError> {
        self.request(Method::POST, path, Some(body), &[]).await
    }

    pub async fn patch(&self, path: &str, body: &Value) -> Result<Value, VuoError> {
        self.request(Method::PATCH, path, Some(body), &[]).await
    }

    /// Obtain a fresh token from the token endpoint and persist it.
    ///
    /// The token is read from `accessToken` or `access_token`; expiry is one
    /// hour from now. Rejected credentials, a non-200 status or a missing
    /// token field are `Auth` errors and are not retried. Transport failures
    /// and gateway errors stay classified as unreachable.
    pub async fn refresh_token(&self) -> Result<SecretString, VuoError> {
        let _guard = self.refresh_lock.lock().await;
        self.fetch_token().await
    }

    async fn fetch_token(&self) -> Result<SecretString, VuoError> {
        let url = format!("{}/v1/tokens", self.base_url);
        debug!("Requesting API token from {}", url);

        let body = json!({
            "username": self.username,
            "password": self.password.expose_secret(),
        });
        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| VuoError::transport(&e))?;

        let status = response.status();
        if status != StatusCode::OK {
            let text = response.text().await.unwrap_or_default();
            // Gateway errors mean the manager is restarting, not that the
            // credentials are wrong.
            if matches!(status.as_u16(), 502..=504) {
                return Err(VuoError::Api {
                    status: status.as_u16(),
                    body: text,
                });
            }
            return Err(VuoError::Auth(format!(
                "Token endpoint returned {status}: {text}"
            )));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| VuoError::Auth(format!("Invalid token response: {e}")))?;
        let access_token = extract_access_token(&payload)
            .ok_or_else(|| VuoError::Auth("Token response has no access token".to_string()))?;

        let stored = StoredToken::issued_now(SecretString::from(access_token));
        let token = stored.access_token.clone();
        info!("Obtained API token (expires at {})", stored.expires_at);
        self.store.save(stored);
        Ok(token)
    }

    /// Current token, refreshed first if missing or about to expire.
    async fn valid_token(&self) -> Result<SecretString, VuoError> {
        if let Some(token) = self.stored_token() {
            return Ok(token);
        }
        let _guard = self.refresh_lock.lock().await;
        // A concurrent request may have refreshed while we waited.
        if let Some(token) = self.stored_token() {
            return Ok(token);
        }
        debug!("API token missing or expiring soon, refreshing");
        self.fetch_token().await
    }

    fn stored_token(&self) -> Option<SecretString> {
        self.store
            .load()
            .filter(|stored| !stored.needs_refresh(Utc::now()))
            .map(|stored| stored.access_token)
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        query: &[(&str, &str)],
        token: &SecretString,
    ) -> Result<Response, VuoError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("{} {}", method, url);

        let mut builder = self
            .http
            .request(method, &url)
            .bearer_auth(token.expose_secret());
        if !query.is_empty() {
            builder = builder.query(query);
        }
        if let Some(body) = body {
            builder = builder.json(body);
        }

        builder.send().await.map_err(|e| VuoError::transport(&e))
    }

    async fn into_json(response: Response) -> Result<Value, VuoError> {
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| VuoError::transport(&e))?;

        if !status.is_success() {
            return Err(VuoError::Api {
                status: status.as_u16(),
                body: text,
            });
        }

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| VuoError::Decode(e.to_string()))
    }
}

/// Read the access token from either field name the API has used.
fn extract_access_token(payload: &Value) -> Option<String> {
    ["accessToken", "access_token"]
        .iter()
        .find_map(|field| payload.get(*field).and_then(Value::as_str))
        .filter(|token| !token.is_empty())
        .map(ToString::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::token::MemoryTokenStore;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_with_store(server: &MockServer, store: Arc<MemoryTokenStore>) -> ApiClient {
        let config = Config::new_for_test(&server.uri());
        ApiClient::new(&config, store).unwrap()
    }

    fn stored(token: &str, minutes: i64) -> StoredToken {
        StoredToken {
            access_token: SecretString::from(token),
            expires_at: Utc::now() + chrono::Duration::minutes(minutes),
        }
    }

    async fn mount_token(server: &MockServer, body: Value) {
        Mock::given(method("POST"))
            .and(path("/v1/tokens"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(server)
            .await;
    }

    #[test]
    fn test_extract_access_token_field_names() {
        assert_eq!(
            extract_access_token(&json!({"accessToken": "abc"})).as_deref(),
            Some("abc")
        );
        assert_eq!(
            extract_access_token(&json!({"access_token": "abc"})).as_deref(),
            Some("abc")
        );
        assert!(extract_access_token(&json!({"refreshToken": "x"})).is_none());
        assert!(extract_access_token(&json!({"accessToken": ""})).is_none());
    }

    #[tokio::test]
    async fn test_refresh_token_alternate_field_name() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/tokens"))
            .and(body_json(json!({"username": "admin@local", "password": "secret"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": "abc"})))
            .expect(1)
            .mount(&server)
            .await;

        let store = Arc::new(MemoryTokenStore::new());
        let client = client_with_store(&server, store.clone());
        let token = client.refresh_token().await.unwrap();
        assert_eq!(token.expose_secret(), "abc");

        let saved = store.load().unwrap();
        assert_eq!(saved.access_token.expose_secret(), "abc");
        assert!(!saved.needs_refresh(Utc::now()));
    }

    #[tokio::test]
    async fn test_refresh_token_rejected_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/tokens"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad credentials"))
            .mount(&server)
            .await;

        let store = Arc::new(MemoryTokenStore::new());
        let client = client_with_store(&server, store.clone());
        let err = client.refresh_token().await.unwrap_err();
        assert!(matches!(err, VuoError::Auth(_)));
        assert!(store.load().is_none());
    }

    #[tokio::test]
    async fn test_refresh_token_missing_field() {
        let server = MockServer::start().await;
        mount_token(&server, json!({"refreshToken": {"id": "r"}})).await;

        let client = client_with_store(&server, Arc::new(MemoryTokenStore::new()));
        let err = client.refresh_token().await.unwrap_err();
        assert!(err.to_string().contains("no access token"));
    }

    #[tokio::test]
    async fn test_request_uses_stored_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/domains"))
            .and(header("authorization", "Bearer cached"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"elements": []})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/tokens"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"accessToken": "new"})))
            .expect(0)
            .mount(&server)
            .await;

        let store = Arc::new(MemoryTokenStore::with_token(stored("cached", 50)));
        let client = client_with_store(&server, store);
        let value = client.get("/v1/domains", &[]).await.unwrap();
        assert_eq!(value, json!({"elements": []}));
    }

    #[tokio::test]
    async fn test_request_refreshes_expiring_token() {
        let server = MockServer::start().await;
        mount_token(&server, json!({"accessToken": "fresh"})).await;
        Mock::given(method("GET"))
            .and(path("/v1/domains"))
            .and(header("authorization", "Bearer fresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"elements": []})))
            .expect(1)
            .mount(&server)
            .await;

        // Expires in 5 minutes: inside the 10 minute refresh window
        let store = Arc::new(MemoryTokenStore::with_token(stored("stale", 5)));
        let client = client_with_store(&server, store.clone());
        client.get("/v1/domains", &[]).await.unwrap();
        assert_eq!(store.load().unwrap().access_token.expose_secret(), "fresh");
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_one_token_fetch() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/tokens"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"accessToken": "fresh"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/domains"))
            .and(header("authorization", "Bearer fresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"elements": []})))
            .expect(3)
            .mount(&server)
            .await;

        let client = client_with_store(&server, Arc::new(MemoryTokenStore::new()));
        let (a, b, c) = tokio::join!(
            client.get("/v1/domains", &[]),
            client.get("/v1/domains", &[]),
            client.get("/v1/domains", &[])
        );
        assert!(a.is_ok() && b.is_ok() && c.is_ok());
    }

    #[tokio::test]
    async fn test_request_retries_once_after_401() {
        let server = MockServer::start().await;
        mount_token(&server, json!({"accessToken": "fresh"})).await;
        Mock::given(method("GET"))
            .and(path("/v1/domains"))
            .and(header("authorization", "Bearer revoked"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/domains"))
            .and(header("authorization", "Bearer fresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"elements": [{"id": "d-1"}]})))
            .expect(1)
            .mount(&server)
            .await;

        let store = Arc::new(MemoryTokenStore::with_token(stored("revoked", 50)));
        let client = client_with_store(&server, store);
        let value = client.get("/v1/domains", &[]).await.unwrap();
        assert_eq!(value["elements"][0]["id"], "d-1");
    }

    #[tokio::test]
    async fn test_second_401_is_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/tokens"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"accessToken": "fresh"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/domains"))
            .respond_with(ResponseTemplate::new(401))
            .expect(2)
            .mount(&server)
            .await;

        let store = Arc::new(MemoryTokenStore::with_token(stored("revoked", 50)));
        let client = client_with_store(&server, store);
        let err = client.get("/v1/domains", &[]).await.unwrap_err();
        assert!(matches!(err, VuoError::Auth(_)));
    }

    #[tokio::test]
    async fn test_error_status_carries_body() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/v1/releases/domains/d-1"))
            .respond_with(ResponseTemplate::new(409).set_body_string("target already set"))
            .mount(&server)
            .await;

        let store = Arc::new(MemoryTokenStore::with_token(stored("t", 50)));
        let client = client_with_store(&server, store);
        let err = client
            .patch("/v1/releases/domains/d-1", &json!({"targetVersion": "5.2.1.0"}))
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(409));
        assert!(err.is_conflict_tolerable());
        assert!(err.to_string().contains("target already set"));
    }

    #[tokio::test]
    async fn test_accepted_with_empty_body() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/v1/bundles/b-1"))
            .respond_with(ResponseTemplate::new(202))
            .mount(&server)
            .await;

        let store = Arc::new(MemoryTokenStore::with_token(stored("t", 50)));
        let client = client_with_store(&server, store);
        let value = client
            .patch("/v1/bundles/b-1", &json!({"bundleDownloadSpec": {"downloadNow": true}}))
            .await
            .unwrap();
        assert!(value.is_null());
    }

    #[tokio::test]
    async fn test_query_parameters_are_sent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/releases"))
            .and(query_param("domainId", "d-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"elements": []})))
            .expect(1)
            .mount(&server)
            .await;

        let store = Arc::new(MemoryTokenStore::with_token(stored("t", 50)));
        let client = client_with_store(&server, store);
        client
            .get("/v1/releases", &[("domainId", "d-1")])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_connection_refused_is_unreachable() {
        // Nothing listens on port 9 locally
        let config = Config::new_for_test("http://127.0.0.1:9");
        let store = Arc::new(MemoryTokenStore::with_token(stored("t", 50)));
        let client = ApiClient::new(&config, store).unwrap();
        let err = client.get("/v1/domains", &[]).await.unwrap_err();
        assert!(err.is_unreachable());
    }
}
