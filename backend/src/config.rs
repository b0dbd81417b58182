use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Connection settings for the RAG backend under evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub base_url: String,
    pub upload_endpoint: String,
    pub ask_endpoint: String,
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
    pub retries: u32,
    pub backoff_s: f64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            upload_endpoint: "/upload".to_string(),
            ask_endpoint: "/ask".to_string(),
            timeout: Duration::from_secs(120),
            retries: 3,
            backoff_s: 1.0,
        }
    }
}

impl BackendConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_backoff(mut self, backoff_s: f64) -> Self {
        self.backoff_s = backoff_s;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.base_url.is_empty() {
            return Err("Base URL cannot be empty".to_string());
        }

        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err("Base URL must start with http:// or https://".to_string());
        }

        if self.timeout.is_zero() {
            return Err("Timeout must be greater than 0".to_string());
        }

        if self.backoff_s < 0.0 {
            return Err("Backoff must not be negative".to_string());
        }

        Ok(())
    }

    /// Retry policy derived from the configured retry count and backoff base.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.retries,
            base_delay: Duration::from_secs_f64(self.backoff_s.max(0.0)),
            max_delay: Duration::from_secs(30),
            jitter_factor: 0.1,
        }
    }
}

/// Exponential backoff schedule shared by all gateway HTTP calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_retries: u32,
    #[serde(with = "duration_secs")]
    pub base_delay: Duration,
    #[serde(with = "duration_secs")]
    pub max_delay: Duration,
    /// Jitter factor for randomizing retry delays (0.0 to 1.0)
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter_factor: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Calculate delay for a retry attempt with exponential backoff and jitter.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponential = self.base_delay * 2_u32.saturating_pow(attempt);
        let delay = exponential.min(self.max_delay);

        // Jitter prevents synchronized retries against a recovering backend
        if self.jitter_factor > 0.0 {
            let mut rng = rand::thread_rng();
            let jitter = rng.gen_range(0.0..=self.jitter_factor);
            let jitter_ms = (delay.as_millis() as f64 * jitter) as u64;
            delay + Duration::from_millis(jitter_ms)
        } else {
            delay
        }
    }
}

/// Settings for the LLM judge that scores metric test cases.
///
/// Points at any OpenAI-compatible chat-completions endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JudgeConfig {
    pub base_url: String,
    pub model: String,
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub api_key: Option<String>,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4.1-mini".to_string(),
            timeout: Duration::from_secs(120),
            api_key: None,
        }
    }
}

impl JudgeConfig {
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.base_url.is_empty() {
            return Err("Judge base URL cannot be empty".to_string());
        }

        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err("Judge base URL must start with http:// or https://".to_string());
        }

        if self.model.is_empty() {
            return Err("Judge model cannot be empty".to_string());
        }

        if self.timeout.is_zero() {
            return Err("Judge timeout must be greater than 0".to_string());
        }

        Ok(())
    }
}

/// Serialize durations as whole seconds so config files stay readable.
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BackendConfig::default();
        assert_eq!(config.base_url, "http://localhost:8000");
        assert_eq!(config.upload_endpoint, "/upload");
        assert_eq!(config.ask_endpoint, "/ask");
        assert_eq!(config.timeout, Duration::from_secs(120));
        assert_eq!(config.retries, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = BackendConfig::new()
            .with_base_url("https://rag.example.com")
            .with_timeout(Duration::from_secs(60))
            .with_retries(1)
            .with_backoff(0.5);

        assert_eq!(config.base_url, "https://rag.example.com");
        assert_eq!(config.timeout, Duration::from_secs(60));
        assert_eq!(config.retries, 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = BackendConfig::default();

        config.base_url = "".to_string();
        assert!(config.validate().is_err());

        config.base_url = "not-a-url".to_string();
        assert!(config.validate().is_err());

        config.base_url = "http://localhost:8000".to_string();
        config.timeout = Duration::from_secs(0);
        assert!(config.validate().is_err());

        config.timeout = Duration::from_secs(120);
        config.backoff_s = -1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_retry_delay_is_monotonic() {
        let policy = RetryPolicy {
            jitter_factor: 0.0,
            ..Default::default()
        };

        let d0 = policy.delay_for_attempt(0);
        let d1 = policy.delay_for_attempt(1);
        let d2 = policy.delay_for_attempt(2);

        assert!(d0 <= d1);
        assert!(d1 <= d2);
        assert!(d2 <= policy.max_delay);
    }

    #[test]
    fn test_retry_delay_caps_at_max() {
        let policy = RetryPolicy {
            base_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(15),
            jitter_factor: 0.0,
            max_retries: 8,
        };

        assert_eq!(policy.delay_for_attempt(6), Duration::from_secs(15));
    }

    #[test]
    fn test_judge_config_validation() {
        let config = JudgeConfig::default();
        assert!(config.validate().is_ok());

        let bad = JudgeConfig::default().with_model("");
        assert!(bad.validate().is_err());

        let bad = JudgeConfig::default().with_base_url("ftp://judge");
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_partial_config_fills_in_defaults() {
        let config: BackendConfig =
            serde_json::from_str(r#"{"base_url": "http://rag:9000"}"#).unwrap();
        assert_eq!(config.base_url, "http://rag:9000");
        assert_eq!(config.upload_endpoint, "/upload");
        assert_eq!(config.retries, 3);

        let config: JudgeConfig = serde_json::from_str(r#"{"model": "gpt-4o"}"#).unwrap();
        assert_eq!(config.model, "gpt-4o");
        assert_eq!(config.base_url, "https://api.openai.com/v1");
    }

    #[test]
    fn test_config_serialization() {
        let config = BackendConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: BackendConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config.base_url, deserialized.base_url);
        assert_eq!(config.timeout, deserialized.timeout);
    }
}
