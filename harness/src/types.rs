use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// One question from a dataset. Immutable once built; rows referencing a
/// nested dataset via `dataset_file` are replaced by that file's rows
/// during expansion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatasetRow {
    pub id: String,
    pub question: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_answer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_reference: Option<String>,
    /// Columns the loader did not recognize; consulted by row-driven metric
    /// assignment. Ordered map so serialized rows stay stable.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub additional_metadata: BTreeMap<String, Value>,
}

/// One metric's outcome for one question. Created once during evaluation,
/// never mutated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricResult {
    pub metric_name: String,
    pub threshold: f64,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub passed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation_model: Option<String>,
}

/// A question's full evaluation: the answer, the trimmed retrieval context,
/// every metric verdict, and the raw wire payloads for audit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuestionEvalResult {
    pub question_id: String,
    pub question: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_answer: Option<String>,
    pub actual_answer: String,
    #[serde(default)]
    pub retrieval_context: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_reference: Option<String>,
    #[serde(default)]
    pub metrics: Vec<MetricResult>,
    #[serde(default)]
    pub raw_request: Value,
    #[serde(default)]
    pub raw_response: Value,
}

/// Per-metric statistics for a run, derived once after all rows finish.
///
/// `count` equals the number of contributing `MetricResult`s;
/// `scored_count <= count` (scoring errors leave `score` empty) and
/// `pass_count + fail_count <= count` (undecided results count toward
/// neither).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricAggregate {
    pub metric_name: String,
    pub threshold: f64,
    pub count: usize,
    pub scored_count: usize,
    pub pass_count: usize,
    pub fail_count: usize,
    pub pass_rate: f64,
    #[serde(default)]
    pub avg_score: Option<f64>,
    #[serde(default)]
    pub min_score: Option<f64>,
    #[serde(default)]
    pub max_score: Option<f64>,
    #[serde(default)]
    pub std_dev: Option<f64>,
    #[serde(default)]
    pub p50: Option<f64>,
    #[serde(default)]
    pub p90: Option<f64>,
    #[serde(default)]
    pub score_distribution: Vec<f64>,
}

/// The top-level unit of persisted work. Immutable once evaluation
/// finishes; written to storage exactly once.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunResult {
    pub run_id: String,
    pub timestamp: String,
    pub feature: String,
    pub scenario: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub selected_metrics: Vec<String>,
    pub dataset_size: usize,
    #[serde(default)]
    pub question_results: Vec<QuestionEvalResult>,
    #[serde(default)]
    pub metric_aggregates: Vec<MetricAggregate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Lightweight pointer into a persisted run, stored newest-first in the
/// bounded recent index and the current-session index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunIndexEntry {
    pub run_id: String,
    pub timestamp: String,
    /// Path of the run file relative to the store's base directory.
    pub path: String,
    pub feature: String,
    pub scenario: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrendPoint {
    pub run_id: String,
    pub timestamp: String,
    #[serde(default)]
    pub avg_score: Option<f64>,
    #[serde(default)]
    pub pass_rate: Option<f64>,
    #[serde(default)]
    pub threshold: Option<f64>,
}

/// One metric's aggregate history, ordered oldest to newest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricTrend {
    pub metric_name: String,
    #[serde(default)]
    pub points: Vec<TrendPoint>,
}

/// Cross-run view over the recent index, recomputed on demand.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrendSummary {
    pub generated_at: String,
    pub keep_last_n: usize,
    #[serde(default)]
    pub metrics: Vec<MetricTrend>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_run() -> RunResult {
        RunResult {
            run_id: "20250101T000000Z_deadbeef".to_string(),
            timestamp: "2025-01-01T00:00:00+00:00".to_string(),
            feature: "layer2_answer_metrics".to_string(),
            scenario: "faithfulness holds on scores".to_string(),
            tags: vec!["layer2".to_string()],
            selected_metrics: vec!["faithfulness".to_string()],
            dataset_size: 1,
            question_results: vec![QuestionEvalResult {
                question_id: "Q1".to_string(),
                question: "What is the score?".to_string(),
                expected_answer: Some("Score is 200.".to_string()),
                actual_answer: "The score is 200.".to_string(),
                retrieval_context: vec!["chunk A".to_string()],
                category: None,
                source_reference: None,
                metrics: vec![MetricResult {
                    metric_name: "faithfulness".to_string(),
                    threshold: 0.75,
                    score: Some(0.9),
                    passed: Some(true),
                    reason: None,
                    error: None,
                    evaluation_model: Some("gpt-4.1-mini".to_string()),
                }],
                raw_request: json!({"session_id": "s1", "question": "What is the score?"}),
                raw_response: json!({"answer": "The score is 200."}),
            }],
            metric_aggregates: vec![MetricAggregate {
                metric_name: "faithfulness".to_string(),
                threshold: 0.75,
                count: 1,
                scored_count: 1,
                pass_count: 1,
                fail_count: 0,
                pass_rate: 100.0,
                avg_score: Some(0.9),
                min_score: Some(0.9),
                max_score: Some(0.9),
                std_dev: Some(0.0),
                p50: Some(0.9),
                p90: Some(0.9),
                score_distribution: vec![0.9],
            }],
            notes: None,
        }
    }

    #[test]
    fn test_run_result_round_trip() {
        let run = sample_run();
        let encoded = serde_json::to_string_pretty(&run).unwrap();
        let decoded: RunResult = serde_json::from_str(&encoded).unwrap();
        assert_eq!(run, decoded);
    }

    #[test]
    fn test_metric_result_optional_fields_default() {
        let decoded: MetricResult = serde_json::from_str(
            r#"{"metric_name": "faithfulness", "threshold": 0.75}"#,
        )
        .unwrap();
        assert_eq!(decoded.score, None);
        assert_eq!(decoded.passed, None);
        assert_eq!(decoded.error, None);
    }

    #[test]
    fn test_index_entry_round_trip() {
        let entry = RunIndexEntry {
            run_id: "r1".to_string(),
            timestamp: "t".to_string(),
            path: "runs/r1/results.json".to_string(),
            feature: "f".to_string(),
            scenario: "s".to_string(),
        };
        let encoded = serde_json::to_string(&entry).unwrap();
        let decoded: RunIndexEntry = serde_json::from_str(&encoded).unwrap();
        assert_eq!(entry, decoded);
    }
}
