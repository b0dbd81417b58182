//! Persistence for evaluation runs.
//!
//! Layout under the base directory:
//!
//! ```text
//! runs/<run_id>/results.json   full run artifact, written once
//! index.json                   recent runs, newest first, bounded
//! current_index.json           this session's runs, newest first, unbounded
//! trends/last5.json            cross-run trend summary over the recent index
//! ```
//!
//! Run files are never rewritten once saved; dropping off the bounded index
//! stops a run from feeding trends but leaves its artifact on disk. There is
//! no cross-process locking; concurrent writers can lose index entries.

use crate::error::HarnessResult;
use crate::types::{MetricTrend, RunIndexEntry, RunResult, TrendPoint, TrendSummary};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Serialize, Deserialize, Default)]
struct IndexFile {
    #[serde(default)]
    runs: Vec<RunIndexEntry>,
}

pub struct ResultsStore {
    base_dir: PathBuf,
    keep_last_n: usize,
    runs_dir: PathBuf,
    trends_dir: PathBuf,
    index_file: PathBuf,
    current_index_file: PathBuf,
}

impl ResultsStore {
    pub fn new(base_dir: &Path, keep_last_n: usize) -> HarnessResult<Self> {
        let store = Self {
            base_dir: base_dir.to_path_buf(),
            keep_last_n,
            runs_dir: base_dir.join("runs"),
            trends_dir: base_dir.join("trends"),
            index_file: base_dir.join("index.json"),
            current_index_file: base_dir.join("current_index.json"),
        };

        std::fs::create_dir_all(&store.runs_dir)?;
        std::fs::create_dir_all(&store.trends_dir)?;
        for index in [&store.index_file, &store.current_index_file] {
            if !index.exists() {
                store.write_index(index, &[])?;
            }
        }

        Ok(store)
    }

    /// Persist a finished run: write its artifact, update both indices, and
    /// rebuild the trend summary. Returns the run's directory and the fresh
    /// summary.
    pub fn save_run(&self, run_result: &RunResult) -> HarnessResult<(PathBuf, TrendSummary)> {
        let run_dir = self.runs_dir.join(&run_result.run_id);
        std::fs::create_dir_all(&run_dir)?;
        let results_file = run_dir.join("results.json");
        std::fs::write(&results_file, serde_json::to_string_pretty(run_result)?)?;

        let entry = RunIndexEntry {
            run_id: run_result.run_id.clone(),
            timestamp: run_result.timestamp.clone(),
            path: format!("runs/{}/results.json", run_result.run_id),
            feature: run_result.feature.clone(),
            scenario: run_result.scenario.clone(),
        };

        let mut recent = self.load_index(&self.index_file)?;
        recent.insert(0, entry.clone());
        recent.truncate(self.keep_last_n);
        self.write_index(&self.index_file, &recent)?;

        let mut current = self.load_index(&self.current_index_file)?;
        current.insert(0, entry);
        self.write_index(&self.current_index_file, &current)?;

        let trend_summary = self.build_trends(&recent)?;
        self.write_trends(&trend_summary)?;

        info!(run_id = %run_result.run_id, path = %run_dir.display(), "Saved evaluation run");
        Ok((run_dir, trend_summary))
    }

    /// Runs on the bounded recent index, newest first. Entries whose run
    /// file vanished or no longer parses are skipped, not errors.
    pub fn load_recent_run_results(&self) -> HarnessResult<Vec<RunResult>> {
        let entries = self.load_index(&self.index_file)?;
        Ok(self.load_entries(&entries))
    }

    /// Runs recorded since the last session reset, newest first.
    pub fn load_current_session_run_results(&self) -> HarnessResult<Vec<RunResult>> {
        let entries = self.load_index(&self.current_index_file)?;
        Ok(self.load_entries(&entries))
    }

    /// Forget this session's runs. The recent index, run artifacts, and
    /// trends are untouched.
    pub fn reset_current_session(&self) -> HarnessResult<()> {
        debug!("Clearing current-session index");
        self.write_index(&self.current_index_file, &[])
    }

    /// Rebuild and persist the trend summary from the recent index without
    /// saving a new run.
    pub fn refresh_trends(&self) -> HarnessResult<TrendSummary> {
        let entries = self.load_index(&self.index_file)?;
        let trend_summary = self.build_trends(&entries)?;
        self.write_trends(&trend_summary)?;
        Ok(trend_summary)
    }

    fn load_index(&self, path: &Path) -> HarnessResult<Vec<RunIndexEntry>> {
        let raw = std::fs::read_to_string(path)?;
        let index: IndexFile = if raw.trim().is_empty() {
            IndexFile::default()
        } else {
            serde_json::from_str(&raw)?
        };
        Ok(index.runs)
    }

    fn write_index(&self, path: &Path, entries: &[RunIndexEntry]) -> HarnessResult<()> {
        let payload = IndexFile {
            runs: entries.to_vec(),
        };
        std::fs::write(path, serde_json::to_string_pretty(&payload)?)?;
        Ok(())
    }

    fn load_entries(&self, entries: &[RunIndexEntry]) -> Vec<RunResult> {
        entries
            .iter()
            .filter_map(|entry| match self.load_run_file(entry) {
                Some(run) => Some(run),
                None => {
                    warn!(run_id = %entry.run_id, path = %entry.path, "Skipping unreadable run file");
                    None
                }
            })
            .collect()
    }

    fn load_run_file(&self, entry: &RunIndexEntry) -> Option<RunResult> {
        let raw = std::fs::read_to_string(self.base_dir.join(&entry.path)).ok()?;
        serde_json::from_str(&raw).ok()
    }

    /// Trend points run oldest to newest, the reverse of index order, so
    /// charts read left to right.
    fn build_trends(&self, entries: &[RunIndexEntry]) -> HarnessResult<TrendSummary> {
        let mut metric_map: BTreeMap<String, Vec<TrendPoint>> = BTreeMap::new();

        for entry in entries.iter().rev() {
            let Some(run_result) = self.load_run_file(entry) else {
                continue;
            };
            for aggregate in &run_result.metric_aggregates {
                metric_map
                    .entry(aggregate.metric_name.clone())
                    .or_default()
                    .push(TrendPoint {
                        run_id: run_result.run_id.clone(),
                        timestamp: run_result.timestamp.clone(),
                        avg_score: aggregate.avg_score,
                        pass_rate: Some(aggregate.pass_rate),
                        threshold: Some(aggregate.threshold),
                    });
            }
        }

        Ok(TrendSummary {
            generated_at: Utc::now().to_rfc3339(),
            keep_last_n: self.keep_last_n,
            metrics: metric_map
                .into_iter()
                .map(|(metric_name, points)| MetricTrend {
                    metric_name,
                    points,
                })
                .collect(),
        })
    }

    fn write_trends(&self, trend_summary: &TrendSummary) -> HarnessResult<()> {
        let trend_file = self.trends_dir.join("last5.json");
        std::fs::write(&trend_file, serde_json::to_string_pretty(trend_summary)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MetricAggregate;

    fn sample_run(run_id: &str, avg_score: f64) -> RunResult {
        RunResult {
            run_id: run_id.to_string(),
            timestamp: "2025-01-01T00:00:00+00:00".to_string(),
            feature: "layer2".to_string(),
            scenario: "faithfulness holds".to_string(),
            tags: vec![],
            selected_metrics: vec!["faithfulness".to_string()],
            dataset_size: 0,
            question_results: vec![],
            metric_aggregates: vec![MetricAggregate {
                metric_name: "faithfulness".to_string(),
                threshold: 0.75,
                count: 1,
                scored_count: 1,
                pass_count: 1,
                fail_count: 0,
                pass_rate: 100.0,
                avg_score: Some(avg_score),
                min_score: Some(avg_score),
                max_score: Some(avg_score),
                std_dev: Some(0.0),
                p50: Some(avg_score),
                p90: Some(avg_score),
                score_distribution: vec![avg_score],
            }],
            notes: None,
        }
    }

    #[test]
    fn test_save_run_writes_artifact_and_indices() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultsStore::new(dir.path(), 5).unwrap();

        let (run_dir, trend_summary) = store.save_run(&sample_run("r1", 0.9)).unwrap();
        assert!(run_dir.join("results.json").exists());
        assert_eq!(trend_summary.keep_last_n, 5);
        assert_eq!(trend_summary.metrics.len(), 1);

        let recent = store.load_recent_run_results().unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].run_id, "r1");
    }

    #[test]
    fn test_indices_are_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultsStore::new(dir.path(), 5).unwrap();
        store.save_run(&sample_run("r1", 0.8)).unwrap();
        store.save_run(&sample_run("r2", 0.9)).unwrap();

        let recent = store.load_recent_run_results().unwrap();
        assert_eq!(recent[0].run_id, "r2");
        assert_eq!(recent[1].run_id, "r1");

        let current = store.load_current_session_run_results().unwrap();
        assert_eq!(current[0].run_id, "r2");
    }

    #[test]
    fn test_keep_last_n_bounds_recent_but_not_current() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultsStore::new(dir.path(), 2).unwrap();
        store.save_run(&sample_run("r1", 0.7)).unwrap();
        store.save_run(&sample_run("r2", 0.8)).unwrap();
        store.save_run(&sample_run("r3", 0.9)).unwrap();

        let recent = store.load_recent_run_results().unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].run_id, "r3");
        assert_eq!(recent[1].run_id, "r2");

        // Evicted from the index, but the artifact stays on disk.
        assert!(dir.path().join("runs/r1/results.json").exists());

        let current = store.load_current_session_run_results().unwrap();
        assert_eq!(current.len(), 3);
    }

    #[test]
    fn test_reset_current_session_clears_only_current() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultsStore::new(dir.path(), 5).unwrap();
        store.save_run(&sample_run("r1", 0.9)).unwrap();

        store.reset_current_session().unwrap();
        assert!(store.load_current_session_run_results().unwrap().is_empty());
        assert_eq!(store.load_recent_run_results().unwrap().len(), 1);
    }

    #[test]
    fn test_missing_run_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultsStore::new(dir.path(), 5).unwrap();
        store.save_run(&sample_run("r1", 0.8)).unwrap();
        store.save_run(&sample_run("r2", 0.9)).unwrap();

        std::fs::remove_file(dir.path().join("runs/r1/results.json")).unwrap();

        let recent = store.load_recent_run_results().unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].run_id, "r2");

        let trend_summary = store.refresh_trends().unwrap();
        let points = &trend_summary.metrics[0].points;
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].run_id, "r2");
    }

    #[test]
    fn test_trend_points_run_oldest_to_newest() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultsStore::new(dir.path(), 5).unwrap();
        store.save_run(&sample_run("r1", 0.7)).unwrap();
        let (_, trend_summary) = store.save_run(&sample_run("r2", 0.9)).unwrap();

        let points = &trend_summary.metrics[0].points;
        assert_eq!(points[0].run_id, "r1");
        assert_eq!(points[0].avg_score, Some(0.7));
        assert_eq!(points[1].run_id, "r2");
        assert_eq!(points[1].avg_score, Some(0.9));
        assert_eq!(points[1].pass_rate, Some(100.0));
        assert_eq!(points[1].threshold, Some(0.75));
    }

    #[test]
    fn test_refresh_trends_is_idempotent_modulo_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultsStore::new(dir.path(), 5).unwrap();
        store.save_run(&sample_run("r1", 0.8)).unwrap();

        let first = store.refresh_trends().unwrap();
        let second = store.refresh_trends().unwrap();
        assert_eq!(first.metrics, second.metrics);
        assert_eq!(first.keep_last_n, second.keep_last_n);
        assert!(dir.path().join("trends/last5.json").exists());
    }

    #[test]
    fn test_empty_store_reads_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultsStore::new(dir.path(), 5).unwrap();
        assert!(store.load_recent_run_results().unwrap().is_empty());
        let trend_summary = store.refresh_trends().unwrap();
        assert!(trend_summary.metrics.is_empty());
    }
}
