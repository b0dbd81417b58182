//! The evaluation runner: asks every dataset question through the gateway,
//! scores the answers metric by metric, and aggregates per-metric statistics
//! into an immutable `RunResult`.
//!
//! Execution is strictly sequential. Rows are processed in dataset order and
//! each row's metrics in canonical order, so retries and caches behave
//! deterministically and results are reproducible modulo judge variance.

use crate::config::{AppConfig, MappingMode};
use crate::error::{HarnessError, HarnessResult};
use crate::metrics::{self, Metric};
use crate::scorer::{EvalTestCase, ScorerFactory};
use crate::types::{DatasetRow, MetricAggregate, MetricResult, QuestionEvalResult, RunResult};
use backend::RagGateway;
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Nearest-rank percentile over an unsorted sample.
fn percentile(values: &[f64], pct: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut ordered = values.to_vec();
    ordered.sort_by(|a, b| a.total_cmp(b));
    let rank = ((pct / 100.0) * ordered.len() as f64).ceil() as isize - 1;
    let idx = rank.clamp(0, ordered.len() as isize - 1) as usize;
    ordered[idx]
}

fn population_std_dev(values: &[f64]) -> Option<f64> {
    match values.len() {
        0 => None,
        1 => Some(0.0),
        n => {
            let mean = values.iter().sum::<f64>() / n as f64;
            let variance =
                values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64;
            Some(variance.sqrt())
        }
    }
}

fn new_run_id() -> String {
    let stamp = Utc::now().format("%Y%m%dT%H%M%SZ");
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{stamp}_{}", &suffix[..8])
}

pub struct EvaluationRunner {
    gateway: Arc<dyn RagGateway>,
    scorers: Box<dyn ScorerFactory>,
    config: AppConfig,
}

impl EvaluationRunner {
    pub fn new(
        gateway: Arc<dyn RagGateway>,
        scorers: Box<dyn ScorerFactory>,
        config: AppConfig,
    ) -> Self {
        Self {
            gateway,
            scorers,
            config,
        }
    }

    /// Cap the retrieval context at the configured chunk and per-chunk
    /// character limits. Floors of 1 chunk / 100 chars keep a misconfigured
    /// zero from silently discarding all evidence.
    fn trim_retrieval_context(&self, retrieval_context: Vec<String>) -> Vec<String> {
        if self.config.evaluation.disable_context_trimming {
            return retrieval_context;
        }

        let chunks_limit = self.config.evaluation.max_retrieval_context_chunks.max(1);
        let chars_limit = self
            .config
            .evaluation
            .max_retrieval_context_chars_per_chunk
            .max(100);

        retrieval_context
            .into_iter()
            .take(chunks_limit)
            .map(|chunk| chunk.chars().take(chars_limit).collect())
            .collect()
    }

    /// Which metrics score this row. `row` mode consults the row's metadata
    /// and falls back to the run selection when it names none; `positional`
    /// requires the row and metric counts to match exactly and otherwise
    /// degrades to scoring every row with every metric.
    fn resolve_row_metrics(
        &self,
        row: &DatasetRow,
        selected_metrics: &[Metric],
        row_index: usize,
        total_rows: usize,
    ) -> Vec<Metric> {
        match self.config.evaluation.metric_question_mapping_mode {
            MappingMode::Row => {
                let mapped = metrics::metrics_from_row(row);
                if !mapped.is_empty() {
                    return mapped;
                }
                debug!(question_id = %row.id, "Row names no metrics; using the run selection");
                selected_metrics.to_vec()
            }
            MappingMode::Positional => {
                if total_rows == selected_metrics.len() {
                    vec![selected_metrics[row_index]]
                } else {
                    warn!(
                        rows = total_rows,
                        metrics = selected_metrics.len(),
                        "Positional mapping needs equal row and metric counts; scoring every row with every metric"
                    );
                    selected_metrics.to_vec()
                }
            }
            MappingMode::All => selected_metrics.to_vec(),
        }
    }

    pub async fn evaluate_dataset(
        &self,
        dataset_rows: &[DatasetRow],
        selected_metrics: &[Metric],
        session_id: Option<&str>,
        feature: &str,
        scenario: &str,
        tags: &[String],
        uploaded_documents: &[PathBuf],
    ) -> HarnessResult<RunResult> {
        let run_id = new_run_id();
        info!(
            run_id = %run_id,
            rows = dataset_rows.len(),
            metrics = selected_metrics.len(),
            "Starting evaluation run"
        );

        let mut question_results: Vec<QuestionEvalResult> = Vec::new();

        for (row_index, row) in dataset_rows.iter().enumerate() {
            let mut row_session_id = session_id.map(str::to_string);
            if self.config.evaluation.fresh_session_per_question {
                if let Some(document) = uploaded_documents.first() {
                    let outcome = self.gateway.upload_document(document).await?;
                    row_session_id = Some(outcome.session_id);
                }
            }
            let row_session_id = row_session_id
                .filter(|s| !s.is_empty())
                .ok_or(HarnessError::MissingSession)?;

            let exchange = self
                .gateway
                .ask_question(
                    &row_session_id,
                    &row.question,
                    self.config.evaluation.cache_ask_responses,
                )
                .await?;

            let answer = exchange.answer();
            let trimmed_context = self.trim_retrieval_context(exchange.retrieval_context());
            // Without an expected answer the actual answer stands in for it,
            // which makes recall-style comparisons self-referential.
            let expected_output = row
                .expected_answer
                .clone()
                .unwrap_or_else(|| answer.clone());

            let test_case = EvalTestCase {
                input: row.question.clone(),
                actual_output: answer.clone(),
                expected_output,
                retrieval_context: trimmed_context.clone(),
            };

            let row_metrics =
                self.resolve_row_metrics(row, selected_metrics, row_index, dataset_rows.len());

            let mut metric_results: Vec<MetricResult> = Vec::new();
            for metric in row_metrics {
                let threshold = metric.threshold(&self.config.thresholds);
                let scorer = self.scorers.build(metric);

                let result = match scorer.measure(&test_case).await {
                    Ok(verdict) => {
                        let passed = verdict.passed.or_else(|| {
                            verdict.score.map(|score| score >= threshold)
                        });
                        MetricResult {
                            metric_name: metric.canonical_name().to_string(),
                            threshold,
                            score: verdict.score,
                            passed,
                            reason: verdict.reason,
                            error: None,
                            evaluation_model: scorer.evaluation_model(),
                        }
                    }
                    // A failed measurement is data, not a run failure.
                    Err(err) => MetricResult {
                        metric_name: metric.canonical_name().to_string(),
                        threshold,
                        score: None,
                        passed: Some(false),
                        reason: None,
                        error: Some(err.to_string()),
                        evaluation_model: scorer.evaluation_model(),
                    },
                };
                metric_results.push(result);
            }

            question_results.push(QuestionEvalResult {
                question_id: row.id.clone(),
                question: row.question.clone(),
                expected_answer: row.expected_answer.clone(),
                actual_answer: answer,
                retrieval_context: trimmed_context,
                category: row.category.clone(),
                source_reference: row.source_reference.clone(),
                metrics: metric_results,
                raw_request: exchange.request,
                raw_response: exchange.response,
            });
        }

        let metric_aggregates = self.aggregate(&question_results, selected_metrics);

        Ok(RunResult {
            run_id,
            timestamp: Utc::now().to_rfc3339(),
            feature: feature.to_string(),
            scenario: scenario.to_string(),
            tags: tags.to_vec(),
            selected_metrics: selected_metrics
                .iter()
                .map(|m| m.canonical_name().to_string())
                .collect(),
            dataset_size: dataset_rows.len(),
            question_results,
            metric_aggregates,
            notes: None,
        })
    }

    fn aggregate(
        &self,
        question_results: &[QuestionEvalResult],
        selected_metrics: &[Metric],
    ) -> Vec<MetricAggregate> {
        selected_metrics
            .iter()
            .map(|metric| {
                let canonical_name = metric.canonical_name();
                let threshold = metric.threshold(&self.config.thresholds);

                let metric_results: Vec<&MetricResult> = question_results
                    .iter()
                    .flat_map(|question| question.metrics.iter())
                    .filter(|result| result.metric_name == canonical_name)
                    .collect();

                let scores: Vec<f64> =
                    metric_results.iter().filter_map(|m| m.score).collect();
                let count = metric_results.len();
                let pass_count = metric_results
                    .iter()
                    .filter(|m| m.passed == Some(true))
                    .count();
                let fail_count = metric_results
                    .iter()
                    .filter(|m| m.passed == Some(false))
                    .count();
                let pass_rate = if count > 0 {
                    pass_count as f64 / count as f64 * 100.0
                } else {
                    0.0
                };

                MetricAggregate {
                    metric_name: canonical_name.to_string(),
                    threshold,
                    count,
                    scored_count: scores.len(),
                    pass_count,
                    fail_count,
                    pass_rate,
                    avg_score: (!scores.is_empty())
                        .then(|| scores.iter().sum::<f64>() / scores.len() as f64),
                    min_score: scores.iter().copied().reduce(f64::min),
                    max_score: scores.iter().copied().reduce(f64::max),
                    std_dev: population_std_dev(&scores),
                    p50: (!scores.is_empty()).then(|| percentile(&scores, 50.0)),
                    p90: (!scores.is_empty()).then(|| percentile(&scores, 90.0)),
                    score_distribution: scores,
                }
            })
            .collect()
    }
}
