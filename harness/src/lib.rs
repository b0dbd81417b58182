pub mod config;
pub mod dataset;
pub mod error;
pub mod evaluator;
pub mod metrics;
pub mod scorer;
pub mod store;
pub mod types;

pub use config::{
    apply_overrides, env_overrides, AppConfig, EvaluationConfig, MappingMode, ReportingConfig,
    ThresholdsConfig, OVERRIDE_KEYS,
};
pub use dataset::{
    expand_dataset_references, load_dataset_file, load_dataset_records, load_inline_table,
    resolve_dataset_reference,
};
pub use error::{HarnessError, HarnessResult};
pub use evaluator::EvaluationRunner;
pub use metrics::{
    metric_threshold, metrics_from_row, normalize_metric_name, select_metrics, Metric,
};
pub use scorer::{
    EvalTestCase, JudgeScorer, JudgeScorerFactory, MetricScorer, MetricVerdict, ScorerError,
    ScorerFactory,
};
pub use store::ResultsStore;
pub use types::{
    DatasetRow, MetricAggregate, MetricResult, MetricTrend, QuestionEvalResult, RunIndexEntry,
    RunResult, TrendPoint, TrendSummary,
};
