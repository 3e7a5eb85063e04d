//! Request replay pipeline
//!
//! Executes a request corpus against two endpoints, persists both response
//! streams, classifies each pair by HTTP outcome, and feeds successes to the
//! structural engine and everything else to the raw-text differ.
//!
//! Concurrency is two-level: up to `max_concurrency` requests in flight per
//! job, and within each request the two POSTs run concurrently under one
//! shared deadline. The cancellation token is checked at every suspension
//! point; a cancelled job discards all partial results.

use crate::error::CompareError;
use crate::progress::{CancellationToken, JobPhase, JobProgress};
use crate::requests::{load_request_batch, merge_headers, sanitize_relative_path};
use crate::types::{ExecutionResult, FilePairResult, PairOutcome, RequestPair};
use crate::{assemble_result, ComparisonEngine, ComparisonRun};
use anyhow::{Context, Result};
use futures::StreamExt;
use log::{debug, warn};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant, SystemTime};
use tokio::io::AsyncWriteExt;

/// Default root for per-job response directories
pub fn default_jobs_root() -> PathBuf {
    std::env::temp_dir().join("ComparisonToolJobs")
}

/// Default root for uploaded request batches
pub fn default_requests_root() -> PathBuf {
    std::env::temp_dir().join("ComparisonToolRequests")
}

/// Configuration for one replay job
#[derive(Debug, Clone)]
pub struct ReplayJobConfig {
    pub endpoint_a: String,
    pub endpoint_b: String,
    /// Directory holding the request corpus
    pub batch_dir: PathBuf,
    /// Shared deadline for each request pair (both sends together)
    pub timeout: Duration,
    /// Maximum requests in flight
    pub max_concurrency: usize,
    /// Global headers sent to endpoint A (per-request sidecars override)
    pub headers_a: BTreeMap<String, String>,
    /// Global headers sent to endpoint B
    pub headers_b: BTreeMap<String, String>,
    /// Root under which the per-job directory is created
    pub jobs_root: PathBuf,
}

impl ReplayJobConfig {
    pub fn new(endpoint_a: &str, endpoint_b: &str, batch_dir: &Path) -> ReplayJobConfig {
        ReplayJobConfig {
            endpoint_a: endpoint_a.to_string(),
            endpoint_b: endpoint_b.to_string(),
            batch_dir: batch_dir.to_path_buf(),
            timeout: Duration::from_secs(30),
            max_concurrency: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            headers_a: BTreeMap::new(),
            headers_b: BTreeMap::new(),
            jobs_root: default_jobs_root(),
        }
    }
}

/// Deterministic on-disk locations for one request's two responses
pub fn response_paths(job_dir: &Path, relative_path: &str) -> (PathBuf, PathBuf) {
    let sanitized = sanitize_relative_path(relative_path);
    (
        job_dir.join("endpointA").join(&sanitized),
        job_dir.join("endpointB").join(&sanitized),
    )
}

/// Run a full replay job
///
/// Phases and progress ranges: parse 0-5, execute 5-75, classify at 75,
/// structural compare 75-95, raw-text compare 95-100.
pub async fn run_replay_job(
    config: &ReplayJobConfig,
    engine: &ComparisonEngine<'_>,
    job_id: &str,
    progress: &JobProgress<'_>,
    token: &CancellationToken,
) -> Result<ComparisonRun, CompareError> {
    progress.publish(JobPhase::Initializing, 0.0, "Preparing job", None, None, true);

    let job_dir = config.jobs_root.join(job_id);
    for sub in ["endpointA", "endpointB"] {
        fs::create_dir_all(job_dir.join(sub)).map_err(|e| {
            let err = CompareError::Input(format!("cannot create job directory: {}", e));
            progress.fail("Preparing job failed", &err.to_string());
            err
        })?;
    }
    if token.is_cancelled() {
        progress.cancelled();
        return Err(CompareError::Cancelled);
    }

    // Phase: parse request batch (0-5%)
    progress.publish(JobPhase::Parsing, 0.0, "Parsing request batch", None, None, true);
    let requests = load_request_batch(&config.batch_dir).map_err(|e| {
        let err = CompareError::Input(format!("{:#}", e));
        progress.fail("Parsing request batch failed", &err.to_string());
        err
    })?;
    if token.is_cancelled() {
        progress.cancelled();
        return Err(CompareError::Cancelled);
    }
    let total = requests.len();
    progress.publish(
        JobPhase::Parsing,
        5.0,
        "Request batch parsed",
        Some(total),
        Some(total),
        true,
    );

    // Phase: execute against both endpoints (5-75%)
    let client = reqwest::Client::builder()
        .timeout(config.timeout)
        .build()
        .map_err(|e| {
            let err = CompareError::Input(format!("cannot build HTTP client: {}", e));
            progress.fail("Executing failed", &err.to_string());
            err
        })?;

    let completed = AtomicUsize::new(0);
    let completed = &completed;
    let executions: Vec<ExecutionResult> = futures::stream::iter(requests.into_iter())
        .map(|request| {
            let client = client.clone();
            let job_dir = job_dir.clone();
            async move {
                let execution =
                    execute_request_pair(&client, config, &job_dir, request, token).await;
                let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
                let percent = 5.0 + 70.0 * done as f64 / total.max(1) as f64;
                progress.publish(
                    JobPhase::Executing,
                    percent,
                    "Executing requests",
                    Some(done),
                    Some(total),
                    false,
                );
                execution
            }
        })
        .buffer_unordered(config.max_concurrency.max(1))
        .collect()
        .await;

    if token.is_cancelled() {
        progress.cancelled();
        return Err(CompareError::Cancelled);
    }
    progress.publish(
        JobPhase::Executing,
        75.0,
        "Execution complete",
        Some(total),
        Some(total),
        true,
    );

    // Phase: classify outcomes (in-memory, no suspension, no cancel window)
    let mut structural: Vec<&ExecutionResult> = Vec::new();
    let mut raw: Vec<&ExecutionResult> = Vec::new();
    let mut failed: Vec<&ExecutionResult> = Vec::new();
    for execution in &executions {
        match execution.outcome() {
            PairOutcome::BothSuccess if engine.model_name.is_some() => {
                structural.push(execution)
            }
            PairOutcome::OneOrBothFailed => failed.push(execution),
            // Non-success outcomes and model-less successes fall back to raw
            _ => raw.push(execution),
        }
    }
    debug!(
        "job {}: {} structural, {} raw, {} failed",
        job_id,
        structural.len(),
        raw.len(),
        failed.len()
    );

    let mut results: Vec<FilePairResult> = Vec::new();

    // Phase: structural compare of successes (75-95%)
    progress.publish(
        JobPhase::Comparing,
        75.0,
        "Comparing responses",
        Some(0),
        Some(structural.len()),
        true,
    );
    let structural_total = structural.len();
    let structural_results: Vec<FilePairResult> = tokio::task::block_in_place(|| {
        use rayon::prelude::*;
        let done = AtomicUsize::new(0);
        structural
            .par_iter()
            .filter_map(|&execution| {
                if token.is_cancelled() {
                    return None;
                }
                let result = compare_execution_structural(engine, execution);
                let count = done.fetch_add(1, Ordering::Relaxed) + 1;
                let percent = 75.0 + 20.0 * count as f64 / structural_total.max(1) as f64;
                progress.publish(
                    JobPhase::Comparing,
                    percent,
                    "Comparing responses",
                    Some(count),
                    Some(structural_total),
                    false,
                );
                Some(result)
            })
            .collect()
    });
    if token.is_cancelled() {
        progress.cancelled();
        return Err(CompareError::Cancelled);
    }
    results.extend(structural_results);

    // Phase: raw-text compare of everything else (95-100%)
    progress.publish(
        JobPhase::Comparing,
        95.0,
        "Raw-text comparing non-success pairs",
        Some(0),
        Some(raw.len()),
        true,
    );
    for &execution in &raw {
        if token.is_cancelled() {
            progress.cancelled();
            return Err(CompareError::Cancelled);
        }
        results.push(compare_execution_raw(engine, execution));
    }

    for &execution in &failed {
        let name = execution.request.relative_path.clone();
        let error = CompareError::Transport(
            execution
                .error
                .clone()
                .unwrap_or_else(|| "request failed".to_string()),
        );
        let mut pair = FilePairResult::from_error(name.clone(), name, &error);
        pair.http_status_a = execution.status_a;
        pair.http_status_b = execution.status_b;
        pair.pair_outcome = Some(PairOutcome::OneOrBothFailed);
        results.push(pair);
    }

    // Stable order before aggregation
    results.sort_by(|a, b| a.file_a_name.as_bytes().cmp(b.file_a_name.as_bytes()));

    let analysis =
        crate::patterns::analyze_patterns(&results, &engine.settings, &engine.required_collections())?;

    let mut metadata = BTreeMap::new();
    metadata.insert(
        "endpoint_a".to_string(),
        serde_json::Value::String(config.endpoint_a.clone()),
    );
    metadata.insert(
        "endpoint_b".to_string(),
        serde_json::Value::String(config.endpoint_b.clone()),
    );
    metadata.insert("outcome_counts".to_string(), summarize_outcomes(&executions));
    if !failed.is_empty() {
        metadata.insert("failed_executions".to_string(), failed_executions_json(&failed));
    }
    let result = assemble_result(results, job_id, metadata);

    progress.publish(JobPhase::Completed, 100.0, "Complete", None, None, true);
    Ok(ComparisonRun { result, analysis })
}

/// Outcome counts for the run metadata
pub fn summarize_outcomes(executions: &[ExecutionResult]) -> serde_json::Value {
    let mut counts: BTreeMap<&'static str, usize> = BTreeMap::new();
    for execution in executions {
        let key = match execution.outcome() {
            PairOutcome::BothSuccess => "both_success",
            PairOutcome::StatusCodeMismatch => "status_code_mismatch",
            PairOutcome::BothNonSuccess => "both_non_success",
            PairOutcome::OneOrBothFailed => "one_or_both_failed",
        };
        *counts.entry(key).or_default() += 1;
    }
    serde_json::json!(counts)
}

fn failed_executions_json(failed: &[&ExecutionResult]) -> serde_json::Value {
    serde_json::Value::Array(
        failed
            .iter()
            .map(|execution| {
                serde_json::json!({
                    "request": execution.request.relative_path,
                    "error": execution.error,
                    "duration_ms": execution.duration_ms,
                })
            })
            .collect(),
    )
}

fn compare_execution_structural(
    engine: &ComparisonEngine<'_>,
    execution: &ExecutionResult,
) -> FilePairResult {
    let name = &execution.request.relative_path;
    let statuses = match (execution.status_a, execution.status_b) {
        (Some(a), Some(b)) => Some((a, b)),
        _ => None,
    };
    let mut result = match (&execution.resp_path_a, &execution.resp_path_b) {
        (Some(path_a), Some(path_b)) => {
            engine.compare_persisted(name, path_a, path_b, statuses)
        }
        _ => FilePairResult::from_error(
            name.clone(),
            name.clone(),
            &CompareError::Compare("response files missing".to_string()),
        ),
    };
    result.pair_outcome = Some(execution.outcome());
    result
}

fn compare_execution_raw(
    engine: &ComparisonEngine<'_>,
    execution: &ExecutionResult,
) -> FilePairResult {
    let name = &execution.request.relative_path;
    let statuses = match (execution.status_a, execution.status_b) {
        (Some(a), Some(b)) => Some((a, b)),
        _ => None,
    };
    let mut result = match (&execution.resp_path_a, &execution.resp_path_b) {
        (Some(path_a), Some(path_b)) => {
            engine.compare_raw_persisted(name, path_a, path_b, statuses)
        }
        _ => FilePairResult::from_error(
            name.clone(),
            name.clone(),
            &CompareError::Compare("response files missing".to_string()),
        ),
    };
    result.pair_outcome = Some(execution.outcome());
    result
}

/// Execute one request against both endpoints under a shared deadline
async fn execute_request_pair(
    client: &reqwest::Client,
    config: &ReplayJobConfig,
    job_dir: &Path,
    request: RequestPair,
    token: &CancellationToken,
) -> ExecutionResult {
    let started = Instant::now();
    let (path_a, path_b) = response_paths(job_dir, &request.relative_path);

    if token.is_cancelled() {
        return ExecutionResult {
            request,
            ok: false,
            status_a: None,
            status_b: None,
            resp_path_a: None,
            resp_path_b: None,
            duration_ms: 0,
            error: Some("cancelled".to_string()),
        };
    }

    let send_a = send_and_persist(
        client,
        &config.endpoint_a,
        &config.headers_a,
        &request,
        &path_a,
    );
    let send_b = send_and_persist(
        client,
        &config.endpoint_b,
        &config.headers_b,
        &request,
        &path_b,
    );

    // Both sends race one deadline; cancellation preempts both
    let outcome = tokio::select! {
        _ = token.wait_cancelled() => Err("cancelled".to_string()),
        joined = tokio::time::timeout(config.timeout, futures::future::join(send_a, send_b)) => {
            joined.map_err(|_| {
                format!("request pair timed out after {} ms", config.timeout.as_millis())
            })
        }
    };
    let duration_ms = started.elapsed().as_millis() as u64;

    match outcome {
        Ok((Ok(status_a), Ok(status_b))) => ExecutionResult {
            request,
            ok: true,
            status_a: Some(status_a),
            status_b: Some(status_b),
            resp_path_a: Some(path_a),
            resp_path_b: Some(path_b),
            duration_ms,
            error: None,
        },
        Ok((result_a, result_b)) => {
            // One or both sends failed: no response files survive
            discard_partial(&path_a, &path_b).await;
            let error = [&result_a, &result_b]
                .iter()
                .find_map(|r| r.as_ref().err().cloned())
                .unwrap_or_else(|| "request failed".to_string());
            ExecutionResult {
                request,
                ok: false,
                status_a: result_a.ok(),
                status_b: result_b.ok(),
                resp_path_a: None,
                resp_path_b: None,
                duration_ms,
                error: Some(error),
            }
        }
        Err(message) => {
            discard_partial(&path_a, &path_b).await;
            ExecutionResult {
                request,
                ok: false,
                status_a: None,
                status_b: None,
                resp_path_a: None,
                resp_path_b: None,
                duration_ms,
                error: Some(message),
            }
        }
    }
}

async fn discard_partial(path_a: &Path, path_b: &Path) {
    // A send that failed early never created its file; ignore that case
    for path in [path_a, path_b] {
        let _ = tokio::fs::remove_file(path).await;
    }
}

/// POST one request and stream the response body to disk
async fn send_and_persist(
    client: &reqwest::Client,
    endpoint: &str,
    global_headers: &BTreeMap<String, String>,
    request: &RequestPair,
    dest: &Path,
) -> Result<u16, String> {
    let mut builder = client.post(endpoint);
    let merged = merge_headers(global_headers, &request.per_request_headers);
    let mut has_content_type = false;
    for (name, value) in &merged {
        if name.eq_ignore_ascii_case("content-type") {
            has_content_type = true;
        }
        builder = builder.header(name.as_str(), value.as_str());
    }
    if !has_content_type {
        builder = builder.header("Content-Type", request.content_type.as_str());
    }

    let mut response = builder
        .body(request.body_bytes.clone())
        .send()
        .await
        .map_err(|e| e.to_string())?;
    let status = response.status().as_u16();

    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| format!("cannot create response directory: {}", e))?;
    }
    let mut file = tokio::fs::File::create(dest)
        .await
        .map_err(|e| format!("cannot create response file: {}", e))?;
    while let Some(chunk) = response.chunk().await.map_err(|e| e.to_string())? {
        file.write_all(&chunk)
            .await
            .map_err(|e| format!("cannot write response file: {}", e))?;
    }
    file.flush()
        .await
        .map_err(|e| format!("cannot flush response file: {}", e))?;

    Ok(status)
}

/// Remove job directories older than `max_age`
///
/// Cancelled jobs may leave responses behind; this reaper cleans them up on
/// a schedule owned by the host.
pub fn reap_old_jobs(jobs_root: &Path, max_age: Duration) -> Result<usize> {
    if !jobs_root.is_dir() {
        return Ok(0);
    }
    let cutoff = SystemTime::now()
        .checked_sub(max_age)
        .unwrap_or(SystemTime::UNIX_EPOCH);

    let mut removed = 0usize;
    for entry in fs::read_dir(jobs_root)
        .with_context(|| format!("cannot read jobs root {}", jobs_root.display()))?
    {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let modified = entry.metadata()?.modified()?;
        if modified < cutoff {
            match fs::remove_dir_all(entry.path()) {
                Ok(()) => removed += 1,
                Err(e) => warn!("Failed to reap job dir {}: {}", entry.path().display(), e),
            }
        }
    }
    Ok(removed)
}
