use crate::config::JudgeConfig;
use crate::gateway::{GatewayError, GatewayResult};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// OpenAI-compatible chat completion request.
#[derive(Debug, Clone, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatCompletionMessage>,
    temperature: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatCompletionMessage {
    role: String,
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatCompletionChoice>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatCompletionChoice {
    message: ChatCompletionMessage,
}

/// Minimal client for the LLM that scores metric test cases.
///
/// Metric rubrics are composed elsewhere; this client only delivers a
/// system/user message pair to an OpenAI-compatible `/chat/completions`
/// endpoint and hands back the first choice's content. Temperature is
/// pinned to 0.0 so verdicts stay as repeatable as the judge allows.
pub struct JudgeClient {
    http: reqwest::Client,
    config: JudgeConfig,
}

impl JudgeClient {
    pub fn new(config: JudgeConfig) -> GatewayResult<Self> {
        config
            .validate()
            .map_err(|message| GatewayError::InvalidConfig { message })?;

        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;

        Ok(Self { http, config })
    }

    /// The model name verdicts should be attributed to.
    pub fn model(&self) -> &str {
        &self.config.model
    }

    pub async fn complete(&self, system: &str, user: &str) -> GatewayResult<String> {
        let body = ChatCompletionRequest {
            model: self.config.model.clone(),
            messages: vec![
                ChatCompletionMessage {
                    role: "system".to_string(),
                    content: system.to_string(),
                },
                ChatCompletionMessage {
                    role: "user".to_string(),
                    content: user.to_string(),
                },
            ],
            temperature: 0.0,
        };

        let url = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );
        debug!(model = %self.config.model, "Requesting judge completion");

        let mut request = self.http.post(&url).json(&body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(GatewayError::Http {
                status: status.as_u16(),
                message,
            });
        }

        let payload: ChatCompletionResponse = response.json().await?;
        let content = payload
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .unwrap_or_default();

        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_complete_returns_first_choice() {
        let mut server = mockito::Server::new_async().await;
        let completion = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"choices": [{"message": {"role": "assistant", "content": "{\"score\": 0.9}"}}]}"#,
            )
            .create_async()
            .await;

        let config = JudgeConfig::default().with_base_url(server.url());
        let client = JudgeClient::new(config).unwrap();
        let content = client.complete("system", "user").await.unwrap();

        assert_eq!(content, r#"{"score": 0.9}"#);
        completion.assert_async().await;
    }

    #[tokio::test]
    async fn test_complete_surfaces_http_errors() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(401)
            .with_body("unauthorized")
            .create_async()
            .await;

        let config = JudgeConfig::default().with_base_url(server.url());
        let client = JudgeClient::new(config).unwrap();
        let err = client.complete("system", "user").await.unwrap_err();

        assert!(matches!(err, GatewayError::Http { status: 401, .. }));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = JudgeConfig::default().with_model("");
        assert!(JudgeClient::new(config).is_err());
    }
}
