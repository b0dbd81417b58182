use crate::error::{HarnessError, HarnessResult};
use backend::{BackendConfig, JudgeConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Pass/fail thresholds for the six supported metrics.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ThresholdsConfig {
    pub contextual_precision: f64,
    pub contextual_recall: f64,
    pub contextual_relevancy: f64,
    pub answer_relevancy: f64,
    pub faithfulness: f64,
    pub completeness: f64,
}

impl Default for ThresholdsConfig {
    fn default() -> Self {
        Self {
            contextual_precision: 0.70,
            contextual_recall: 0.70,
            contextual_relevancy: 0.70,
            answer_relevancy: 0.75,
            faithfulness: 0.75,
            completeness: 0.70,
        }
    }
}

/// How dataset rows map to the run's selected metrics.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MappingMode {
    /// Every row is scored by every selected metric.
    #[default]
    All,
    /// Row `i` is scored by `selected_metrics[i]`; requires equal counts,
    /// silently falls back to `All` otherwise.
    Positional,
    /// Each row names its metrics in `additional_metadata`.
    Row,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EvaluationConfig {
    pub cost_optimized: bool,
    pub include_reason: bool,
    pub max_retrieval_context_chunks: usize,
    pub max_retrieval_context_chars_per_chunk: usize,
    pub faithfulness_truths_extraction_limit: usize,
    pub cache_uploaded_documents: bool,
    pub cache_ask_responses: bool,
    pub fresh_session_per_question: bool,
    pub disable_context_trimming: bool,
    pub metric_question_mapping_mode: MappingMode,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            cost_optimized: true,
            include_reason: false,
            max_retrieval_context_chunks: 2,
            max_retrieval_context_chars_per_chunk: 700,
            faithfulness_truths_extraction_limit: 6,
            cache_uploaded_documents: true,
            cache_ask_responses: true,
            fresh_session_per_question: false,
            disable_context_trimming: false,
            metric_question_mapping_mode: MappingMode::All,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReportingConfig {
    pub keep_last_n_runs: usize,
}

impl Default for ReportingConfig {
    fn default() -> Self {
        Self { keep_last_n_runs: 5 }
    }
}

/// Full harness configuration, loadable from YAML with every field
/// defaultable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub backend: BackendConfig,
    pub judge: JudgeConfig,
    pub thresholds: ThresholdsConfig,
    pub evaluation: EvaluationConfig,
    pub reporting: ReportingConfig,
    /// Where run artifacts, indices, and trends are written.
    pub results_dir: PathBuf,
    /// Root for resolving relative dataset references.
    pub data_dir: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig::default(),
            judge: JudgeConfig::default(),
            thresholds: ThresholdsConfig::default(),
            evaluation: EvaluationConfig::default(),
            reporting: ReportingConfig::default(),
            results_dir: PathBuf::from("results"),
            data_dir: PathBuf::from("data"),
        }
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> HarnessResult<Self> {
        if !path.exists() {
            return Err(HarnessError::Config {
                message: format!("Config file not found: {}", path.display()),
            });
        }
        let raw = std::fs::read_to_string(path)?;
        let config: AppConfig = serde_yaml::from_str(&raw)?;
        Ok(config)
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn parse_usize(value: &str) -> Option<usize> {
    value.trim().parse().ok()
}

/// Layer already-parsed override pairs onto a base config, returning the
/// merged value. Reading the pairs from the environment happens at the
/// process boundary (`env_overrides`), never here, so business logic stays
/// free of process-global state.
pub fn apply_overrides(mut config: AppConfig, overrides: &HashMap<String, String>) -> AppConfig {
    if let Some(base_url) = overrides.get("BASE_URL") {
        if !base_url.is_empty() {
            config.backend.base_url = base_url.clone();
        }
    }

    if let Some(model) = overrides.get("MODEL") {
        if !model.is_empty() {
            config.judge.model = model.clone();
        }
    }

    if let Some(value) = overrides.get("RAG_EVAL_COST_OPTIMIZED") {
        config.evaluation.cost_optimized = parse_bool(value);
    }

    if let Some(value) = overrides.get("RAG_EVAL_INCLUDE_REASON") {
        config.evaluation.include_reason = parse_bool(value);
    }

    if let Some(value) = overrides
        .get("RAG_EVAL_MAX_CONTEXT_CHUNKS")
        .and_then(|v| parse_usize(v))
    {
        config.evaluation.max_retrieval_context_chunks = value;
    }

    if let Some(value) = overrides
        .get("RAG_EVAL_MAX_CONTEXT_CHARS_PER_CHUNK")
        .and_then(|v| parse_usize(v))
    {
        config.evaluation.max_retrieval_context_chars_per_chunk = value;
    }

    if let Some(value) = overrides
        .get("RAG_EVAL_FAITHFULNESS_TRUTHS_LIMIT")
        .and_then(|v| parse_usize(v))
    {
        config.evaluation.faithfulness_truths_extraction_limit = value;
    }

    if let Some(value) = overrides.get("RAG_EVAL_CACHE_UPLOADED_DOCUMENTS") {
        config.evaluation.cache_uploaded_documents = parse_bool(value);
    }

    if let Some(value) = overrides.get("RAG_EVAL_CACHE_ASK_RESPONSES") {
        config.evaluation.cache_ask_responses = parse_bool(value);
    }

    config
}

/// Override keys recognized by `apply_overrides`.
pub const OVERRIDE_KEYS: [&str; 9] = [
    "BASE_URL",
    "MODEL",
    "RAG_EVAL_COST_OPTIMIZED",
    "RAG_EVAL_INCLUDE_REASON",
    "RAG_EVAL_MAX_CONTEXT_CHUNKS",
    "RAG_EVAL_MAX_CONTEXT_CHARS_PER_CHUNK",
    "RAG_EVAL_FAITHFULNESS_TRUTHS_LIMIT",
    "RAG_EVAL_CACHE_UPLOADED_DOCUMENTS",
    "RAG_EVAL_CACHE_ASK_RESPONSES",
];

/// Snapshot the recognized override keys from the process environment.
/// Boundary-layer helper for `main`; library code takes the resulting map.
pub fn env_overrides() -> HashMap<String, String> {
    OVERRIDE_KEYS
        .iter()
        .filter_map(|key| std::env::var(key).ok().map(|value| (key.to_string(), value)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.thresholds.faithfulness, 0.75);
        assert_eq!(config.evaluation.max_retrieval_context_chunks, 2);
        assert_eq!(config.evaluation.metric_question_mapping_mode, MappingMode::All);
        assert_eq!(config.reporting.keep_last_n_runs, 5);
        assert!(config.evaluation.cache_ask_responses);
        assert!(!config.evaluation.fresh_session_per_question);
    }

    #[test]
    fn test_load_yaml_with_partial_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            concat!(
                "backend:\n",
                "  base_url: http://rag:9000\n",
                "thresholds:\n",
                "  faithfulness: 0.9\n",
                "evaluation:\n",
                "  metric_question_mapping_mode: row\n",
                "  include_reason: true\n",
            )
        )
        .unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.backend.base_url, "http://rag:9000");
        assert_eq!(config.thresholds.faithfulness, 0.9);
        assert_eq!(config.thresholds.completeness, 0.70);
        assert_eq!(config.evaluation.metric_question_mapping_mode, MappingMode::Row);
        assert!(config.evaluation.include_reason);
        // Untouched sections keep their defaults
        assert_eq!(config.reporting.keep_last_n_runs, 5);
    }

    #[test]
    fn test_load_missing_file() {
        let err = AppConfig::load(Path::new("/nonexistent/config.yaml")).unwrap_err();
        assert!(matches!(err, HarnessError::Config { .. }));
    }

    #[test]
    fn test_apply_overrides_merges() {
        let mut overrides = HashMap::new();
        overrides.insert("BASE_URL".to_string(), "http://other:8001".to_string());
        overrides.insert("MODEL".to_string(), "gpt-4o".to_string());
        overrides.insert("RAG_EVAL_INCLUDE_REASON".to_string(), "Yes".to_string());
        overrides.insert("RAG_EVAL_MAX_CONTEXT_CHUNKS".to_string(), "4".to_string());
        overrides.insert(
            "RAG_EVAL_CACHE_ASK_RESPONSES".to_string(),
            "off".to_string(),
        );

        let config = apply_overrides(AppConfig::default(), &overrides);
        assert_eq!(config.backend.base_url, "http://other:8001");
        assert_eq!(config.judge.model, "gpt-4o");
        assert!(config.evaluation.include_reason);
        assert_eq!(config.evaluation.max_retrieval_context_chunks, 4);
        assert!(!config.evaluation.cache_ask_responses);
    }

    #[test]
    fn test_apply_overrides_ignores_bad_ints_and_empty_urls() {
        let mut overrides = HashMap::new();
        overrides.insert("RAG_EVAL_MAX_CONTEXT_CHUNKS".to_string(), "lots".to_string());
        overrides.insert("BASE_URL".to_string(), "".to_string());

        let config = apply_overrides(AppConfig::default(), &overrides);
        assert_eq!(config.evaluation.max_retrieval_context_chunks, 2);
        assert_eq!(config.backend.base_url, "http://localhost:8000");
    }

    #[test]
    fn test_apply_overrides_is_pure() {
        let base = AppConfig::default();
        let overrides = HashMap::new();
        let merged = apply_overrides(base.clone(), &overrides);
        assert_eq!(merged.backend.base_url, base.backend.base_url);
    }
}
