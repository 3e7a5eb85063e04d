//! StructCompare - batch structural comparison of service responses
//!
//! This library compares large batches of structured documents (XML and
//! JSON) pairwise and produces a ranked, semantically grouped explanation of
//! where and how they differ. It supports folder-against-folder comparison
//! and request replay against two live endpoints, sharing one comparison
//! engine between the CLI and any embedding host.

pub mod categorize;
pub mod classify;
pub mod compare_raw;
pub mod compare_structural;
pub mod error;
pub mod export;
pub mod index;
pub mod model;
pub mod patterns;
pub mod progress;
pub mod replay;
pub mod requests;
pub mod rules;
pub mod summary;
pub mod types;

use crate::compare_raw::{compare_raw_text, compile_mask_regex};
use crate::compare_structural::compare_trees;
use crate::error::CompareError;
use crate::index::{index_directory, pair_by_relative_path, FilePair};
use crate::model::{ContentKind, ModelRegistry};
use crate::patterns::analyze_patterns;
use crate::progress::{CancellationToken, JobPhase, JobProgress};
use crate::rules::CompiledRules;
use crate::summary::summarize;
use crate::types::{
    ComparisonSettings, FilePairResult, MultiFolderComparisonResult, PatternAnalysis,
    RulesDocument,
};
use anyhow::{Context, Result};
use chrono::Local;
use rayon::prelude::*;
use regex::Regex;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Options for a folder-against-folder comparison
#[derive(Debug, Clone, Default)]
pub struct FolderCompareOptions {
    /// Turn one-sided files into error pairs instead of skipping them
    pub include_all: bool,
    /// Glob patterns excluded from indexing
    pub exclude_patterns: Vec<String>,
}

/// Output of a completed comparison run
#[derive(Debug, Clone)]
pub struct ComparisonRun {
    pub result: MultiFolderComparisonResult,
    pub analysis: PatternAnalysis,
}

/// Core comparison engine shared by folder compare and request replay
///
/// Holds the per-run immutable state: compiled rules, settings, the model
/// registry, and the optional raw-text mask. Safe for concurrent reads.
pub struct ComparisonEngine<'a> {
    pub registry: &'a ModelRegistry,
    pub model_name: Option<&'a str>,
    pub settings: ComparisonSettings,
    pub rules: CompiledRules,
    mask: Option<Regex>,
}

impl<'a> ComparisonEngine<'a> {
    /// Build an engine for one run, failing fast on input-shape errors
    /// (unresolved model, malformed rule paths or patterns)
    pub fn new(
        registry: &'a ModelRegistry,
        model_name: Option<&'a str>,
        rules_document: &RulesDocument,
        mask_pattern: Option<&str>,
    ) -> Result<ComparisonEngine<'a>, CompareError> {
        if let Some(name) = model_name {
            if !registry.contains(name) {
                return Err(CompareError::Input(format!("unresolved model '{}'", name)));
            }
        }
        let settings = ComparisonSettings::from_document(rules_document);
        let rules = CompiledRules::compile(rules_document, &settings)?;
        let mask = mask_pattern.and_then(compile_mask_regex);
        Ok(ComparisonEngine {
            registry,
            model_name,
            settings,
            rules,
            mask,
        })
    }

    /// Field names of required collections for the configured model
    pub fn required_collections(&self) -> HashSet<String> {
        match self.model_name {
            Some(name) => self.registry.required_collections(name),
            None => HashSet::new(),
        }
    }

    /// Compare two in-memory documents
    ///
    /// With a configured model both sides are deserialized and structurally
    /// compared; a parse failure produces an error pair with no differences.
    /// Without a model the pair falls back to the raw-text differ.
    pub fn compare_bytes(
        &self,
        file_a_name: &str,
        file_b_name: &str,
        bytes_a: &[u8],
        bytes_b: &[u8],
        statuses: Option<(u16, u16)>,
    ) -> FilePairResult {
        match self.model_name {
            Some(model) => {
                let kind_a = ContentKind::infer(None, Some(file_a_name), bytes_a);
                let kind_b = ContentKind::infer(None, Some(file_b_name), bytes_b);
                let tree_a = self
                    .registry
                    .deserialize(model, bytes_a, kind_a, &self.settings);
                let tree_b = self
                    .registry
                    .deserialize(model, bytes_b, kind_b, &self.settings);
                let schema = match self.registry.schema_of(model) {
                    Ok(schema) => schema,
                    Err(e) => {
                        return FilePairResult::from_error(
                            file_a_name.to_string(),
                            file_b_name.to_string(),
                            &e,
                        )
                    }
                };
                match (tree_a, tree_b) {
                    (Ok(a), Ok(b)) => {
                        let differences =
                            compare_trees(&a, &b, schema, &self.rules, &self.settings);
                        let summary = summarize(&differences);
                        FilePairResult {
                            file_a_name: file_a_name.to_string(),
                            file_b_name: file_b_name.to_string(),
                            are_equal: differences.is_empty(),
                            differences,
                            error: None,
                            error_kind: None,
                            http_status_a: statuses.map(|(a, _)| a),
                            http_status_b: statuses.map(|(_, b)| b),
                            pair_outcome: None,
                            raw_text_diffs: None,
                            summary,
                        }
                    }
                    (Err(e), _) | (_, Err(e)) => {
                        let mut result = FilePairResult::from_error(
                            file_a_name.to_string(),
                            file_b_name.to_string(),
                            &e,
                        );
                        result.http_status_a = statuses.map(|(a, _)| a);
                        result.http_status_b = statuses.map(|(_, b)| b);
                        result
                    }
                }
            }
            None => {
                let raw = compare_raw_text(bytes_a, bytes_b, statuses, self.mask.as_ref());
                let are_equal = raw.entries.is_empty();
                FilePairResult {
                    file_a_name: file_a_name.to_string(),
                    file_b_name: file_b_name.to_string(),
                    are_equal,
                    differences: Vec::new(),
                    error: None,
                    error_kind: None,
                    http_status_a: statuses.map(|(a, _)| a),
                    http_status_b: statuses.map(|(_, b)| b),
                    pair_outcome: None,
                    raw_text_diffs: Some(raw),
                    summary: types::DifferenceSummary {
                        are_equal,
                        ..Default::default()
                    },
                }
            }
        }
    }

    /// Raw-text compare two persisted documents, honoring the engine's mask
    ///
    /// Used for pairs not eligible for structural comparison (non-success
    /// outcomes, no resolvable model). The per-side read budget and entry
    /// cap of the raw differ apply.
    pub fn compare_raw_persisted(
        &self,
        pair_name: &str,
        path_a: &Path,
        path_b: &Path,
        statuses: Option<(u16, u16)>,
    ) -> FilePairResult {
        match compare_raw::compare_raw_files(path_a, path_b, statuses, self.mask.as_ref()) {
            Ok(raw) => {
                let are_equal = raw.entries.is_empty();
                FilePairResult {
                    file_a_name: pair_name.to_string(),
                    file_b_name: pair_name.to_string(),
                    are_equal,
                    differences: Vec::new(),
                    error: None,
                    error_kind: None,
                    http_status_a: statuses.map(|(a, _)| a),
                    http_status_b: statuses.map(|(_, b)| b),
                    pair_outcome: None,
                    raw_text_diffs: Some(raw),
                    summary: types::DifferenceSummary {
                        are_equal,
                        ..Default::default()
                    },
                }
            }
            Err(e) => FilePairResult::from_error(
                pair_name.to_string(),
                pair_name.to_string(),
                &CompareError::Parse(format!("{:#}", e)),
            ),
        }
    }

    /// Compare two persisted documents by path
    pub fn compare_persisted(
        &self,
        pair_name: &str,
        path_a: &Path,
        path_b: &Path,
        statuses: Option<(u16, u16)>,
    ) -> FilePairResult {
        let read = |path: &Path| -> Result<Vec<u8>, CompareError> {
            fs::read(path)
                .map_err(|e| CompareError::Parse(format!("cannot read {}: {}", path.display(), e)))
        };
        match (read(path_a), read(path_b)) {
            (Ok(bytes_a), Ok(bytes_b)) => {
                self.compare_bytes(pair_name, pair_name, &bytes_a, &bytes_b, statuses)
            }
            (Err(e), _) | (_, Err(e)) => {
                FilePairResult::from_error(pair_name.to_string(), pair_name.to_string(), &e)
            }
        }
    }

    fn compare_pair(&self, pair: &FilePair) -> FilePairResult {
        match (&pair.path_a, &pair.path_b) {
            (Some(path_a), Some(path_b)) => {
                if pair.hash_equal {
                    return FilePairResult::equal(
                        pair.relative_path.clone(),
                        pair.relative_path.clone(),
                    );
                }
                self.compare_persisted(&pair.relative_path, path_a, path_b, None)
            }
            (Some(_), None) => FilePairResult::from_error(
                pair.relative_path.clone(),
                pair.relative_path.clone(),
                &CompareError::Input("file present only in folder A".to_string()),
            ),
            (None, Some(_)) => FilePairResult::from_error(
                pair.relative_path.clone(),
                pair.relative_path.clone(),
                &CompareError::Input("file present only in folder B".to_string()),
            ),
            (None, None) => FilePairResult::from_error(
                pair.relative_path.clone(),
                pair.relative_path.clone(),
                &CompareError::Fatal("pair with no sides".to_string()),
            ),
        }
    }

    /// Run the full folder-against-folder pipeline
    ///
    /// Index both roots, pair by relative path, compare pairs in parallel,
    /// then aggregate patterns and classify files. Cancellation discards all
    /// partial results.
    pub fn run_folder_compare(
        &self,
        dir_a: &Path,
        dir_b: &Path,
        options: &FolderCompareOptions,
        job_id: &str,
        progress: &JobProgress<'_>,
        token: &CancellationToken,
    ) -> Result<ComparisonRun, CompareError> {
        progress.publish(JobPhase::Parsing, 0.0, "Indexing folders", None, None, true);

        let files_a = index_directory(dir_a, &options.exclude_patterns)
            .map_err(|e| CompareError::Input(format!("{:#}", e)))?;
        let files_b = index_directory(dir_b, &options.exclude_patterns)
            .map_err(|e| CompareError::Input(format!("{:#}", e)))?;
        if token.is_cancelled() {
            progress.cancelled();
            return Err(CompareError::Cancelled);
        }

        let pairs = pair_by_relative_path(&files_a, &files_b, options.include_all);
        let total = pairs.len();
        progress.publish(
            JobPhase::Comparing,
            10.0,
            "Comparing pairs",
            Some(0),
            Some(total),
            true,
        );

        let completed = AtomicUsize::new(0);
        let mut results: Vec<FilePairResult> = pairs
            .par_iter()
            .filter_map(|pair| {
                if token.is_cancelled() {
                    return None;
                }
                let result = self.compare_pair(pair);
                let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
                let percent = 10.0 + 85.0 * done as f64 / total.max(1) as f64;
                progress.publish(
                    JobPhase::Comparing,
                    percent,
                    "Comparing pairs",
                    Some(done),
                    Some(total),
                    false,
                );
                Some(result)
            })
            .collect();

        if token.is_cancelled() {
            progress.cancelled();
            return Err(CompareError::Cancelled);
        }

        // Stable order before aggregation
        results.sort_by(|a, b| a.file_a_name.as_bytes().cmp(b.file_a_name.as_bytes()));

        let analysis =
            analyze_patterns(&results, &self.settings, &self.required_collections())?;
        let result = assemble_result(results, job_id, BTreeMap::new());

        progress.publish(JobPhase::Completed, 100.0, "Complete", None, None, true);
        Ok(ComparisonRun { result, analysis })
    }
}

/// Build the top-level result with its standard metadata
pub fn assemble_result(
    file_pair_results: Vec<FilePairResult>,
    job_id: &str,
    mut extra_metadata: BTreeMap<String, serde_json::Value>,
) -> MultiFolderComparisonResult {
    let total_pairs = file_pair_results.len();
    let all_equal = file_pair_results.iter().all(|r| r.are_equal);

    let equal = file_pair_results.iter().filter(|r| r.are_equal).count();
    let errors = file_pair_results.iter().filter(|r| r.is_error()).count();
    let different = total_pairs - equal - errors;

    let mut metadata = BTreeMap::new();
    metadata.insert(
        "job_id".to_string(),
        serde_json::Value::String(job_id.to_string()),
    );
    metadata.insert(
        "execution_outcome_summary".to_string(),
        serde_json::json!({
            "equal": equal,
            "different": different,
            "errors": errors,
        }),
    );
    metadata.append(&mut extra_metadata);

    MultiFolderComparisonResult {
        total_pairs,
        all_equal,
        file_pair_results,
        metadata,
    }
}

/// Generate a short job ID from the run scope
///
/// The scope is what the job compares (the two folder roots or the two
/// endpoint URLs), so concurrent jobs over different inputs get distinct
/// job directories even when they start in the same instant; the clock and
/// pid disambiguate repeated runs over the same scope.
pub fn generate_job_id(scope: &str) -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();

    let mut hasher = blake3::Hasher::new();
    hasher.update(scope.as_bytes());
    hasher.update(&now.as_nanos().to_le_bytes());
    hasher.update(&std::process::id().to_le_bytes());

    hasher.finalize().to_hex()[..12].to_string()
}

/// Ensure the results directory exists and create a unique run subfolder
///
/// Creates a subfolder with format `<YYYYMMDD_HHMMSS>_<job_id>`, keeping each
/// run isolated.
pub fn ensure_results_dir(base_path: &Path, job_id: &str) -> Result<PathBuf> {
    if !base_path.exists() {
        fs::create_dir_all(base_path).context("Failed to create base output directory")?;
    }

    let timestamp = Local::now().format("%Y%m%d_%H%M%S");
    let run_folder = base_path.join(format!("{}_{}", timestamp, job_id));
    fs::create_dir_all(&run_folder).context("Failed to create run directory")?;
    Ok(run_folder)
}
