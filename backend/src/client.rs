use crate::config::BackendConfig;
use crate::gateway::{GatewayError, GatewayResult, RagGateway};
use crate::types::{AskExchange, UploadOutcome};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// HTTP statuses worth retrying, matching the shared gateway retry policy.
const RETRY_STATUS: [u16; 5] = [429, 500, 502, 503, 504];

type AskCacheKey = (String, String);

/// HTTP client for the RAG backend: reachability probe, multipart document
/// upload, and question answering with an in-process response cache.
///
/// The cache maps `(session_id, trimmed question)` to the raw response
/// value; hits return a clone, so callers can never mutate the cached
/// payload through their copy. Not thread-safe by contract: rows are
/// evaluated strictly in sequence.
pub struct BackendClient {
    http: reqwest::Client,
    config: BackendConfig,
    api_key: Option<String>,
    ask_cache: Mutex<HashMap<AskCacheKey, Value>>,
}

impl BackendClient {
    /// Build a client. The API key, if any, is attached as a bearer token to
    /// every request for this client's lifetime; reading it from the
    /// environment is the caller's concern.
    pub fn new(config: BackendConfig, api_key: Option<String>) -> GatewayResult<Self> {
        config
            .validate()
            .map_err(|message| GatewayError::InvalidConfig { message })?;

        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            http,
            config,
            api_key,
            ask_cache: Mutex::new(HashMap::new()),
        })
    }

    fn url(&self, endpoint: &str) -> String {
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            return endpoint.to_string();
        }
        let base = self.config.base_url.trim_end_matches('/');
        if endpoint.starts_with('/') {
            format!("{}{}", base, endpoint)
        } else {
            format!("{}/{}", base, endpoint)
        }
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    /// Send a request, retrying on connection failures and retryable HTTP
    /// statuses per the configured policy. The closure rebuilds the request
    /// for every attempt.
    async fn send_with_retry<F, Fut>(&self, mut send: F) -> GatewayResult<reqwest::Response>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<reqwest::Response, reqwest::Error>>,
    {
        let policy = self.config.retry_policy();
        let mut attempt = 0u32;

        loop {
            match send().await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    if RETRY_STATUS.contains(&status) && attempt < policy.max_retries {
                        let delay = policy.delay_for_attempt(attempt);
                        warn!(status, attempt, ?delay, "Retrying backend request");
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }
                    return Ok(response);
                }
                Err(err) => {
                    if attempt < policy.max_retries {
                        let delay = policy.delay_for_attempt(attempt);
                        warn!(error = %err, attempt, ?delay, "Retrying backend request");
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(GatewayError::Network(err));
                }
            }
        }
    }

    async fn error_for_status(response: reqwest::Response) -> GatewayResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(GatewayError::Http {
            status: status.as_u16(),
            message,
        })
    }

    fn cached_response(&self, key: &AskCacheKey) -> Option<Value> {
        let cache = self
            .ask_cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        cache.get(key).cloned()
    }

    fn store_response(&self, key: AskCacheKey, response: Value) {
        let mut cache = self
            .ask_cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        cache.insert(key, response);
    }
}

#[async_trait]
impl RagGateway for BackendClient {
    async fn check_reachable(&self) -> GatewayResult<()> {
        let candidates = [
            self.config.base_url.clone(),
            self.url("/docs"),
            self.url("/health"),
        ];

        let mut last_error = String::new();
        for candidate in &candidates {
            debug!(url = %candidate, "Probing backend");
            match self
                .send_with_retry(|| self.authorize(self.http.get(candidate)).send())
                .await
            {
                Ok(response) if response.status().as_u16() < 500 => {
                    info!(url = %candidate, "Backend is reachable");
                    return Ok(());
                }
                Ok(response) => {
                    last_error = format!("{} returned HTTP {}", candidate, response.status());
                }
                Err(err) => {
                    last_error = err.to_string();
                }
            }
        }

        Err(GatewayError::Unreachable {
            message: last_error,
        })
    }

    async fn upload_document(&self, path: &Path) -> GatewayResult<UploadOutcome> {
        if !path.exists() {
            return Err(GatewayError::DocumentNotFound {
                path: path.display().to_string(),
            });
        }

        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string());
        let bytes = tokio::fs::read(path).await?;
        let url = self.url(&self.config.upload_endpoint);

        debug!(path = %path.display(), "Uploading document");
        let response = self
            .send_with_retry(|| {
                let part = reqwest::multipart::Part::bytes(bytes.clone())
                    .file_name(file_name.clone());
                let form = reqwest::multipart::Form::new().part("file", part);
                self.authorize(self.http.post(&url)).multipart(form).send()
            })
            .await?;

        let response = Self::error_for_status(response).await?;
        let payload: Value = response.json().await?;

        let session_id = match payload.get("session_id") {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => return Err(GatewayError::MissingSessionId),
        };

        info!(session_id = %session_id, "Document uploaded");
        Ok(UploadOutcome {
            session_id,
            raw: payload,
        })
    }

    async fn ask_question(
        &self,
        session_id: &str,
        question: &str,
        use_cache: bool,
    ) -> GatewayResult<AskExchange> {
        let request = json!({
            "session_id": session_id,
            "question": question,
        });
        let cache_key = (session_id.to_string(), question.trim().to_string());

        if use_cache {
            if let Some(cached) = self.cached_response(&cache_key) {
                debug!(session_id, "Ask cache hit");
                return Ok(AskExchange {
                    request,
                    response: cached,
                });
            }
        }

        let url = self.url(&self.config.ask_endpoint);
        let response = self
            .send_with_retry(|| {
                self.authorize(self.http.post(&url)).json(&request).send()
            })
            .await?;

        let response = Self::error_for_status(response).await?;
        let payload: Value = response.json().await?;

        if use_cache {
            self.store_response(cache_key, payload.clone());
        }

        Ok(AskExchange {
            request,
            response: payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    fn test_config(base_url: &str) -> BackendConfig {
        BackendConfig::default()
            .with_base_url(base_url)
            .with_timeout(Duration::from_secs(5))
            .with_retries(0)
            .with_backoff(0.0)
    }

    #[tokio::test]
    async fn test_check_reachable_on_base_url() {
        let mut server = mockito::Server::new_async().await;
        let probe = server
            .mock("GET", "/")
            .with_status(200)
            .create_async()
            .await;

        let client = BackendClient::new(test_config(&server.url()), None).unwrap();
        client.check_reachable().await.unwrap();
        probe.assert_async().await;
    }

    #[tokio::test]
    async fn test_check_reachable_fails_when_all_candidates_error() {
        let mut server = mockito::Server::new_async().await;
        for path in ["/", "/docs", "/health"] {
            server
                .mock("GET", path)
                .with_status(500)
                .create_async()
                .await;
        }

        let client = BackendClient::new(test_config(&server.url()), None).unwrap();
        let err = client.check_reachable().await.unwrap_err();
        assert!(matches!(err, GatewayError::Unreachable { .. }));
    }

    #[tokio::test]
    async fn test_reachability_accepts_client_errors() {
        // 404 on the base URL is still "reachable": the server answered.
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/")
            .with_status(404)
            .create_async()
            .await;

        let client = BackendClient::new(test_config(&server.url()), None).unwrap();
        client.check_reachable().await.unwrap();
    }

    #[tokio::test]
    async fn test_upload_document_missing_file() {
        let client =
            BackendClient::new(test_config("http://localhost:1"), None).unwrap();
        let err = client
            .upload_document(Path::new("/nonexistent/report.pdf"))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::DocumentNotFound { .. }));
    }

    #[tokio::test]
    async fn test_upload_document_returns_session() {
        let mut server = mockito::Server::new_async().await;
        let upload = server
            .mock("POST", "/upload")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"session_id": "sess-1", "chunks": 12}"#)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let doc_path = dir.path().join("doc.txt");
        let mut file = std::fs::File::create(&doc_path).unwrap();
        writeln!(file, "some document text").unwrap();

        let client = BackendClient::new(test_config(&server.url()), None).unwrap();
        let outcome = client.upload_document(&doc_path).await.unwrap();

        assert_eq!(outcome.session_id, "sess-1");
        assert_eq!(outcome.raw["chunks"], 12);
        upload.assert_async().await;
    }

    #[tokio::test]
    async fn test_upload_without_session_id_fails() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/upload")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"status": "ok"}"#)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let doc_path = dir.path().join("doc.txt");
        std::fs::write(&doc_path, "text").unwrap();

        let client = BackendClient::new(test_config(&server.url()), None).unwrap();
        let err = client.upload_document(&doc_path).await.unwrap_err();
        assert!(matches!(err, GatewayError::MissingSessionId));
    }

    #[tokio::test]
    async fn test_ask_question_uses_cache() {
        let mut server = mockito::Server::new_async().await;
        let ask = server
            .mock("POST", "/ask")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"answer": "hello", "retrieval_context": ["chunk"]}"#)
            .expect(1)
            .create_async()
            .await;

        let client = BackendClient::new(test_config(&server.url()), None).unwrap();

        let first = client.ask_question("s1", "question?", true).await.unwrap();
        // Whitespace variations of the same question hit the same cache slot.
        let second = client
            .ask_question("s1", "  question?  ", true)
            .await
            .unwrap();

        assert_eq!(first.response, second.response);
        assert_eq!(second.answer(), "hello");
        ask.assert_async().await;
    }

    #[tokio::test]
    async fn test_ask_question_cache_disabled() {
        let mut server = mockito::Server::new_async().await;
        let ask = server
            .mock("POST", "/ask")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"answer": "hello"}"#)
            .expect(2)
            .create_async()
            .await;

        let client = BackendClient::new(test_config(&server.url()), None).unwrap();
        client.ask_question("s1", "q", false).await.unwrap();
        client.ask_question("s1", "q", false).await.unwrap();
        ask.assert_async().await;
    }

    #[tokio::test]
    async fn test_ask_question_retries_on_server_error() {
        let mut server = mockito::Server::new_async().await;
        let ask = server
            .mock("POST", "/ask")
            .with_status(503)
            .expect(2)
            .create_async()
            .await;

        let config = test_config(&server.url()).with_retries(1);
        let client = BackendClient::new(config, None).unwrap();
        let err = client.ask_question("s1", "q", false).await.unwrap_err();

        assert!(matches!(err, GatewayError::Http { status: 503, .. }));
        ask.assert_async().await;
    }

    #[tokio::test]
    async fn test_bearer_token_attached() {
        let mut server = mockito::Server::new_async().await;
        let probe = server
            .mock("GET", "/")
            .match_header("authorization", "Bearer secret-key")
            .with_status(200)
            .create_async()
            .await;

        let client = BackendClient::new(
            test_config(&server.url()),
            Some("secret-key".to_string()),
        )
        .unwrap();
        client.check_reachable().await.unwrap();
        probe.assert_async().await;
    }
}
