use crate::config::ThresholdsConfig;
use crate::error::{HarnessError, HarnessResult};
use crate::types::DatasetRow;
use serde_json::Value;
use std::fmt;
use tracing::warn;

/// The six supported quality metrics.
///
/// A closed enum rather than free-form strings: scorer construction and
/// threshold lookup match exhaustively, so a new metric cannot be added
/// without the compiler pointing at every dispatch site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Metric {
    ContextualPrecision,
    ContextualRecall,
    ContextualRelevancy,
    AnswerRelevancy,
    Faithfulness,
    Completeness,
}

impl Metric {
    /// Fixed total order used everywhere metric lists are presented.
    pub const ORDER: [Metric; 6] = [
        Metric::ContextualPrecision,
        Metric::ContextualRecall,
        Metric::ContextualRelevancy,
        Metric::AnswerRelevancy,
        Metric::Faithfulness,
        Metric::Completeness,
    ];

    /// Context-quality metrics selected by the `layer1` tag.
    pub const LAYER1: [Metric; 3] = [
        Metric::ContextualPrecision,
        Metric::ContextualRecall,
        Metric::ContextualRelevancy,
    ];

    /// Answer-quality metrics selected by the `layer2` tag.
    pub const LAYER2: [Metric; 3] = [
        Metric::AnswerRelevancy,
        Metric::Faithfulness,
        Metric::Completeness,
    ];

    pub fn canonical_name(&self) -> &'static str {
        match self {
            Metric::ContextualPrecision => "contextual_precision",
            Metric::ContextualRecall => "contextual_recall",
            Metric::ContextualRelevancy => "contextual_relevancy",
            Metric::AnswerRelevancy => "answer_relevancy",
            Metric::Faithfulness => "faithfulness",
            Metric::Completeness => "completeness",
        }
    }

    /// Parse an already-canonical name. Returns `None` for anything else;
    /// callers decide whether that is an error or a silent skip.
    pub fn from_canonical(name: &str) -> Option<Metric> {
        match name {
            "contextual_precision" => Some(Metric::ContextualPrecision),
            "contextual_recall" => Some(Metric::ContextualRecall),
            "contextual_relevancy" => Some(Metric::ContextualRelevancy),
            "answer_relevancy" => Some(Metric::AnswerRelevancy),
            "faithfulness" => Some(Metric::Faithfulness),
            "completeness" => Some(Metric::Completeness),
            _ => None,
        }
    }

    pub fn threshold(&self, thresholds: &ThresholdsConfig) -> f64 {
        match self {
            Metric::ContextualPrecision => thresholds.contextual_precision,
            Metric::ContextualRecall => thresholds.contextual_recall,
            Metric::ContextualRelevancy => thresholds.contextual_relevancy,
            Metric::AnswerRelevancy => thresholds.answer_relevancy,
            Metric::Faithfulness => thresholds.faithfulness,
            Metric::Completeness => thresholds.completeness,
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical_name())
    }
}

/// Normalize a metric name: lowercase, trim, separators to underscores,
/// then resolve known aliases. Unknown names pass through unchanged so the
/// failure happens later, at threshold lookup, as a configuration error.
/// Idempotent: normalizing a canonical name is a no-op.
pub fn normalize_metric_name(name: &str) -> String {
    let key = name.trim().to_lowercase().replace(['-', ' '], "_");
    match key.as_str() {
        "context_precision" | "contextualprecision" => "contextual_precision".to_string(),
        "context_recall" | "contextualrecall" => "contextual_recall".to_string(),
        "context_relevance" | "contextualrelevancy" => "contextual_relevancy".to_string(),
        "answerrelevancy" => "answer_relevancy".to_string(),
        _ => key,
    }
}

/// Threshold for a possibly-aliased metric name. Unknown names are a
/// configuration error.
pub fn metric_threshold(name: &str, thresholds: &ThresholdsConfig) -> HarnessResult<f64> {
    let canonical = normalize_metric_name(name);
    Metric::from_canonical(&canonical)
        .map(|metric| metric.threshold(thresholds))
        .ok_or(HarnessError::UnknownMetric { name: canonical })
}

fn ordered(metrics: impl IntoIterator<Item = Metric>) -> Vec<Metric> {
    let selected: Vec<Metric> = metrics.into_iter().collect();
    Metric::ORDER
        .into_iter()
        .filter(|metric| selected.contains(metric))
        .collect()
}

/// Resolve the run-level metric set from scenario tags and optional explicit
/// overrides.
///
/// Explicit metrics win outright (tags ignored). Otherwise `layer1` /
/// `layer2` tags pick their groups, defaulting to all six; tags naming
/// specific metrics then narrow the base set. An empty intersection falls
/// back to the full base set, surprising but long-observed behavior, kept
/// as is and logged.
pub fn select_metrics(tags: &[String], explicit_metrics: &[String]) -> Vec<Metric> {
    if !explicit_metrics.is_empty() {
        return ordered(
            explicit_metrics
                .iter()
                .filter_map(|name| Metric::from_canonical(&normalize_metric_name(name))),
        );
    }

    let normalized_tags: Vec<String> = tags
        .iter()
        .map(|tag| normalize_metric_name(tag))
        .collect();

    let mut base: Vec<Metric> = Vec::new();
    if normalized_tags.iter().any(|tag| tag == "layer1") {
        base.extend(Metric::LAYER1);
    }
    if normalized_tags.iter().any(|tag| tag == "layer2") {
        base.extend(Metric::LAYER2);
    }
    if base.is_empty() {
        base.extend(Metric::ORDER);
    }

    let metric_tags: Vec<Metric> = normalized_tags
        .iter()
        .filter_map(|tag| Metric::from_canonical(tag))
        .collect();

    let selected: Vec<Metric> = if metric_tags.is_empty() {
        base
    } else {
        let intersection: Vec<Metric> = base
            .iter()
            .copied()
            .filter(|metric| metric_tags.contains(metric))
            .collect();
        if intersection.is_empty() {
            warn!(
                ?metric_tags,
                "Metric tags do not intersect the layer base set; falling back to the full base"
            );
            base
        } else {
            intersection
        }
    };

    ordered(selected)
}

/// Keys searched (case-insensitively) in row metadata for row-driven metric
/// assignment.
const ROW_METRIC_KEYS: [&str; 6] = [
    "metric",
    "metrics",
    "metric_name",
    "metric_names",
    "target_metric",
    "target_metrics",
];

/// Extract the metrics a row assigns to itself via `additional_metadata`.
///
/// Accepts a comma-separated string or a list value; names are normalized
/// and filtered to the known metric set, preserving first-seen order with
/// duplicates dropped. An empty result means the row has no usable
/// assignment and the caller falls back to the full selected set.
pub fn metrics_from_row(row: &DatasetRow) -> Vec<Metric> {
    let raw_value = row.additional_metadata.iter().find_map(|(key, value)| {
        let key = key.trim().to_lowercase();
        ROW_METRIC_KEYS
            .contains(&key.as_str())
            .then_some(value)
    });

    let Some(raw_value) = raw_value else {
        return Vec::new();
    };

    let parts: Vec<String> = match raw_value {
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => s.trim().to_string(),
                other => other.to_string(),
            })
            .collect(),
        Value::String(s) => s.split(',').map(|part| part.trim().to_string()).collect(),
        other => other
            .to_string()
            .split(',')
            .map(|part| part.trim().to_string())
            .collect(),
    };

    let mut mapped: Vec<Metric> = Vec::new();
    for part in parts {
        if part.is_empty() {
            continue;
        }
        if let Some(metric) = Metric::from_canonical(&normalize_metric_name(&part)) {
            if !mapped.contains(&metric) {
                mapped.push(metric);
            }
        }
    }
    mapped
}
