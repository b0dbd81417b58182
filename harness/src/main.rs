use backend::prelude::*;
use clap::{Parser, Subcommand};
use harness::{
    apply_overrides, env_overrides, expand_dataset_references, load_dataset_file,
    resolve_dataset_reference, select_metrics, AppConfig, EvaluationRunner, JudgeScorerFactory,
    ResultsStore, RunResult,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "harness")]
#[command(about = "Behavior-driven evaluation harness for RAG backends")]
struct Cli {
    /// Path to the YAML config file (falls back to $RAG_EVAL_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that the backend under evaluation is reachable
    Health,
    /// Evaluate a dataset against the backend and save the run
    Run {
        /// Dataset reference: a path or a named dataset
        #[arg(long)]
        dataset: String,
        /// Documents to upload before asking questions
        #[arg(long)]
        documents: Vec<PathBuf>,
        /// Explicit metric names, overriding tag-based selection
        #[arg(long, value_delimiter = ',')]
        metrics: Vec<String>,
        /// Scenario tags driving metric selection (layer1, layer2, metric names)
        #[arg(long)]
        tags: Vec<String>,
        /// Feature name recorded on the run
        #[arg(long, default_value = "cli")]
        feature: String,
        /// Scenario name recorded on the run
        #[arg(long, default_value = "manual run")]
        scenario: String,
    },
    /// Rebuild trends over recent runs and print them
    Report,
    /// Clear the current-session run index
    ResetSession,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Health => {
            health_check(&config).await?;
        }
        Commands::Run {
            dataset,
            documents,
            metrics,
            tags,
            feature,
            scenario,
        } => {
            let run = run_evaluation(&config, &dataset, &documents, &metrics, &tags, &feature, &scenario)
                .await?;
            print_summary(&run);

            let below_threshold = run
                .metric_aggregates
                .iter()
                .any(|aggregate| aggregate.pass_rate < 100.0);
            if below_threshold {
                error!(run_id = %run.run_id, "One or more metrics fell below their thresholds");
                std::process::exit(1);
            }
        }
        Commands::Report => {
            report(&config)?;
        }
        Commands::ResetSession => {
            let store = open_store(&config)?;
            store.reset_current_session()?;
            println!("Current session cleared.");
        }
    }

    Ok(())
}

/// Resolve and load configuration. Env is read here, once, and handed down
/// as plain values.
fn load_config(explicit_path: Option<&Path>) -> Result<AppConfig, Box<dyn std::error::Error>> {
    let config = match explicit_path {
        Some(path) => AppConfig::load(path)?,
        None => match std::env::var("RAG_EVAL_CONFIG") {
            Ok(path) => AppConfig::load(Path::new(&path))?,
            Err(_) => AppConfig::default(),
        },
    };
    Ok(apply_overrides(config, &env_overrides()))
}

fn open_store(config: &AppConfig) -> Result<ResultsStore, Box<dyn std::error::Error>> {
    Ok(ResultsStore::new(
        &config.results_dir,
        config.reporting.keep_last_n_runs,
    )?)
}

fn backend_client(config: &AppConfig) -> Result<BackendClient, Box<dyn std::error::Error>> {
    let api_key = std::env::var("API_KEY").ok().filter(|key| !key.is_empty());
    Ok(BackendClient::new(config.backend.clone(), api_key)?)
}

async fn health_check(config: &AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let client = backend_client(config)?;
    println!("Checking backend at {}...", config.backend.base_url);

    match client.check_reachable().await {
        Ok(()) => {
            println!("Backend is reachable.");
            info!("Health check passed");
        }
        Err(e) => {
            println!("Backend is not reachable: {}", e);
            error!("Health check failed: {}", e);
            return Err(e.into());
        }
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn run_evaluation(
    config: &AppConfig,
    dataset_ref: &str,
    documents: &[PathBuf],
    explicit_metrics: &[String],
    tags: &[String],
    feature: &str,
    scenario: &str,
) -> Result<RunResult, Box<dyn std::error::Error>> {
    let dataset_path = resolve_dataset_reference(dataset_ref, &config.data_dir)?;
    let rows = load_dataset_file(&dataset_path)?;
    let rows = expand_dataset_references(rows, &config.data_dir)?;
    info!(dataset = %dataset_path.display(), rows = rows.len(), "Loaded dataset");

    let selected_metrics = select_metrics(tags, explicit_metrics);
    println!(
        "Evaluating {} question(s) with metrics: {}",
        rows.len(),
        selected_metrics
            .iter()
            .map(|m| m.canonical_name())
            .collect::<Vec<_>>()
            .join(", ")
    );

    let client = Arc::new(backend_client(config)?);
    client.check_reachable().await?;

    // The runner re-uploads per question in fresh-session mode, so the
    // shared upfront session is skipped entirely.
    let mut session_id: Option<String> = None;
    if !config.evaluation.fresh_session_per_question {
        let mut upload_sessions: HashMap<PathBuf, String> = HashMap::new();
        for document in documents {
            if config.evaluation.cache_uploaded_documents {
                if let Some(session) = upload_sessions.get(document) {
                    session_id = Some(session.clone());
                    continue;
                }
            }
            let outcome = client.upload_document(document).await?;
            println!("Uploaded {} -> session {}", document.display(), outcome.session_id);
            upload_sessions.insert(document.clone(), outcome.session_id.clone());
            session_id = Some(outcome.session_id);
        }
    }

    let judge = Arc::new(JudgeClient::new(config.judge.clone())?);
    let scorers = Box::new(JudgeScorerFactory::new(
        judge,
        config.thresholds.clone(),
        config.evaluation.clone(),
    ));

    let runner = EvaluationRunner::new(client, scorers, config.clone());
    let run = runner
        .evaluate_dataset(
            &rows,
            &selected_metrics,
            session_id.as_deref(),
            feature,
            scenario,
            tags,
            documents,
        )
        .await?;

    let store = open_store(config)?;
    let (run_dir, _) = store.save_run(&run)?;
    println!("Saved run {} to {}", run.run_id, run_dir.display());

    Ok(run)
}

fn print_summary(run: &RunResult) {
    println!("\nRun {} ({} / {})", run.run_id, run.feature, run.scenario);
    println!(
        "{:<24} {:>6} {:>6} {:>6} {:>9} {:>8}",
        "metric", "count", "pass", "fail", "pass_rate", "avg"
    );
    for aggregate in &run.metric_aggregates {
        println!(
            "{:<24} {:>6} {:>6} {:>6} {:>8.1}% {:>8}",
            aggregate.metric_name,
            aggregate.count,
            aggregate.pass_count,
            aggregate.fail_count,
            aggregate.pass_rate,
            aggregate
                .avg_score
                .map(|avg| format!("{avg:.3}"))
                .unwrap_or_else(|| "-".to_string()),
        );
    }
}

fn report(config: &AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(config)?;
    let trend_summary = store.refresh_trends()?;

    println!(
        "Trends over the last {} run(s), generated {}",
        trend_summary.keep_last_n, trend_summary.generated_at
    );
    if trend_summary.metrics.is_empty() {
        println!("No runs recorded yet.");
        return Ok(());
    }

    for trend in &trend_summary.metrics {
        println!("\n{}", trend.metric_name);
        for point in &trend.points {
            println!(
                "  {}  avg={}  pass_rate={}",
                point.run_id,
                point
                    .avg_score
                    .map(|avg| format!("{avg:.3}"))
                    .unwrap_or_else(|| "-".to_string()),
                point
                    .pass_rate
                    .map(|rate| format!("{rate:.1}%"))
                    .unwrap_or_else(|| "-".to_string()),
            );
        }
    }

    Ok(())
}
