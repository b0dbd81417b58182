//! Metric scoring via an LLM judge.
//!
//! The evaluator depends only on the `MetricScorer` / `ScorerFactory` traits;
//! production wiring plugs in `JudgeScorer` (chat-completions judge), tests
//! plug in deterministic scorers.

use crate::config::{EvaluationConfig, ThresholdsConfig};
use crate::metrics::Metric;
use async_trait::async_trait;
use backend::{GatewayError, JudgeClient};
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Everything a metric needs to judge one question.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvalTestCase {
    pub input: String,
    pub actual_output: String,
    pub expected_output: String,
    pub retrieval_context: Vec<String>,
}

/// The judge's answer for one metric on one test case.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricVerdict {
    pub score: Option<f64>,
    pub passed: Option<bool>,
    pub reason: Option<String>,
}

#[derive(Error, Debug)]
pub enum ScorerError {
    #[error("Judge error: {0}")]
    Judge(#[from] GatewayError),

    #[error("Invalid judge verdict: {message}")]
    InvalidVerdict { message: String },
}

#[async_trait]
pub trait MetricScorer: Send + Sync {
    async fn measure(&self, test_case: &EvalTestCase) -> Result<MetricVerdict, ScorerError>;

    /// Identifier of the model that produced the verdict, when one exists.
    fn evaluation_model(&self) -> Option<String> {
        None
    }
}

/// Builds one scorer per metric. The single seam between metric selection
/// and scoring.
pub trait ScorerFactory: Send + Sync {
    fn build(&self, metric: Metric) -> Box<dyn MetricScorer>;
}

const JUDGE_SYSTEM_PROMPT: &str = "You are an impartial evaluation judge for \
retrieval-augmented question answering. Follow the evaluation steps exactly \
and respond with a single JSON object of the form \
{\"score\": <number between 0 and 1>, \"reason\": <short string>}. \
Respond with JSON only.";

/// Scores a single metric by prompting an OpenAI-compatible judge with a
/// metric-specific rubric and parsing a `{score, reason}` verdict.
pub struct JudgeScorer {
    client: Arc<JudgeClient>,
    metric: Metric,
    threshold: f64,
    include_reason: bool,
    cost_optimized: bool,
    truths_limit: usize,
}

impl JudgeScorer {
    fn evaluation_steps(&self) -> Vec<String> {
        let steps: Vec<&str> = match self.metric {
            Metric::ContextualPrecision => vec![
                "Review the user question, the expected answer, and the retrieval context.",
                "Judge whether the context chunks relevant to the expected answer are ranked above the irrelevant ones.",
                "Assign a score from 0 to 1 where 1 means relevant chunks are ranked first and 0 means they are buried.",
            ],
            Metric::ContextualRecall => vec![
                "Review the expected answer and the retrieval context.",
                "Judge whether every claim in the expected answer can be attributed to some chunk of the retrieval context.",
                "Assign a score from 0 to 1 where 1 means the context covers the full expected answer.",
            ],
            Metric::ContextualRelevancy if self.cost_optimized => vec![
                "Review the user question and the retrieval context.",
                "Decide whether the retrieval context is relevant to answering the question.",
                "Assign a score from 0 to 1 where 1 means highly relevant and 0 means irrelevant.",
            ],
            Metric::ContextualRelevancy => vec![
                "Review the user question and each chunk of the retrieval context in turn.",
                "For each chunk, decide whether it is relevant to answering the question.",
                "Assign a score from 0 to 1 reflecting the fraction of relevant chunks.",
            ],
            Metric::AnswerRelevancy => vec![
                "Review the user question and the actual response.",
                "Judge whether the response directly addresses what the question asks, ignoring correctness.",
                "Assign a score from 0 to 1 where 1 means fully on-topic and 0 means off-topic.",
            ],
            Metric::Faithfulness => vec![
                "Extract the factual claims made by the actual response.",
                "Check each claim against the retrieval context.",
                "Assign a score from 0 to 1 reflecting the fraction of claims supported by the context.",
            ],
            Metric::Completeness => vec![
                "Check whether the response answers all parts of the user question.",
                "Check whether important specifics asked in the question are present.",
                "Give a score from 0 to 1 where 1 means fully complete.",
            ],
        };

        let mut steps: Vec<String> = steps.into_iter().map(String::from).collect();
        if self.metric == Metric::Faithfulness {
            steps.insert(
                1,
                format!(
                    "Consider at most the {} most load-bearing claims.",
                    self.truths_limit.max(1)
                ),
            );
        }
        if self.include_reason {
            steps.push("Provide a short reason for the score.".to_string());
        } else {
            steps.push("Keep the reason to one sentence.".to_string());
        }
        steps
    }

    fn user_prompt(&self, test_case: &EvalTestCase) -> String {
        let mut sections = vec![format!("Metric: {}", self.metric.canonical_name())];

        let steps = self
            .evaluation_steps()
            .iter()
            .enumerate()
            .map(|(i, step)| format!("{}. {}", i + 1, step))
            .collect::<Vec<_>>()
            .join("\n");
        sections.push(format!("Evaluation steps:\n{steps}"));

        sections.push(format!("Question:\n{}", test_case.input));

        // Only feed the judge the fields the metric actually evaluates.
        match self.metric {
            Metric::ContextualPrecision | Metric::ContextualRecall => {
                sections.push(format!("Expected answer:\n{}", test_case.expected_output));
            }
            _ => {}
        }
        match self.metric {
            Metric::AnswerRelevancy | Metric::Faithfulness | Metric::Completeness => {
                sections.push(format!("Actual response:\n{}", test_case.actual_output));
            }
            _ => {}
        }
        match self.metric {
            Metric::AnswerRelevancy | Metric::Completeness => {}
            _ => {
                let context = test_case
                    .retrieval_context
                    .iter()
                    .enumerate()
                    .map(|(i, chunk)| format!("[{}] {}", i + 1, chunk))
                    .collect::<Vec<_>>()
                    .join("\n");
                sections.push(format!("Retrieval context:\n{context}"));
            }
        }

        sections.join("\n\n")
    }
}

#[derive(Deserialize)]
struct RawVerdict {
    score: f64,
    #[serde(default)]
    reason: Option<String>,
}

/// Parse the judge's reply into a verdict, tolerating markdown code fences
/// and prose around the JSON object.
fn parse_verdict(raw: &str) -> Result<(f64, Option<String>), ScorerError> {
    let trimmed = raw.trim();
    let candidate = match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        _ => trimmed,
    };
    let verdict: RawVerdict =
        serde_json::from_str(candidate).map_err(|e| ScorerError::InvalidVerdict {
            message: format!("{e}: {trimmed}"),
        })?;
    Ok((verdict.score.clamp(0.0, 1.0), verdict.reason))
}

#[async_trait]
impl MetricScorer for JudgeScorer {
    async fn measure(&self, test_case: &EvalTestCase) -> Result<MetricVerdict, ScorerError> {
        let prompt = self.user_prompt(test_case);
        debug!(metric = %self.metric, "Requesting judge verdict");
        let reply = self.client.complete(JUDGE_SYSTEM_PROMPT, &prompt).await?;
        let (score, reason) = parse_verdict(&reply)?;
        Ok(MetricVerdict {
            score: Some(score),
            passed: Some(score >= self.threshold),
            reason: if self.include_reason { reason } else { None },
        })
    }

    fn evaluation_model(&self) -> Option<String> {
        Some(self.client.model().to_string())
    }
}

/// Production factory: one `JudgeScorer` per metric, sharing a judge client.
pub struct JudgeScorerFactory {
    client: Arc<JudgeClient>,
    thresholds: ThresholdsConfig,
    evaluation: EvaluationConfig,
}

impl JudgeScorerFactory {
    pub fn new(
        client: Arc<JudgeClient>,
        thresholds: ThresholdsConfig,
        evaluation: EvaluationConfig,
    ) -> Self {
        Self {
            client,
            thresholds,
            evaluation,
        }
    }
}

impl ScorerFactory for JudgeScorerFactory {
    fn build(&self, metric: Metric) -> Box<dyn MetricScorer> {
        Box::new(JudgeScorer {
            client: Arc::clone(&self.client),
            metric,
            threshold: metric.threshold(&self.thresholds),
            include_reason: self.evaluation.include_reason,
            cost_optimized: self.evaluation.cost_optimized,
            truths_limit: self.evaluation.faithfulness_truths_extraction_limit,
        })
    }
}
