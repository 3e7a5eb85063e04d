//! Result export
//!
//! Writes the run's outputs into the per-run results directory:
//! - `results.jsonl` - one pair result per line, for streaming consumers
//! - `result.json` - the full top-level result with metadata
//! - `patterns.json` - the cross-file pattern analysis

use crate::types::{FilePairResult, MultiFolderComparisonResult, PatternAnalysis};
use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Locations of the exported files for one run
#[derive(Debug, Clone)]
pub struct ExportPaths {
    pub jsonl: PathBuf,
    pub result_json: PathBuf,
    pub patterns_json: PathBuf,
}

/// Standard export file locations inside a run directory
pub fn export_paths(run_dir: &Path) -> ExportPaths {
    ExportPaths {
        jsonl: run_dir.join("results.jsonl"),
        result_json: run_dir.join("result.json"),
        patterns_json: run_dir.join("patterns.json"),
    }
}

/// Export every artifact for a completed run
pub fn export_all(
    result: &MultiFolderComparisonResult,
    analysis: &PatternAnalysis,
    run_dir: &Path,
) -> Result<ExportPaths> {
    let paths = export_paths(run_dir);
    export_jsonl(&result.file_pair_results, &paths.jsonl)?;
    export_json(result, &paths.result_json)?;
    export_json(analysis, &paths.patterns_json)?;
    Ok(paths)
}

/// Write pair results as JSONL (one JSON object per line)
pub fn export_jsonl(results: &[FilePairResult], path: &Path) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    for result in results {
        let line = serde_json::to_string(result).context("Failed to serialize pair result")?;
        writeln!(writer, "{}", line)?;
    }
    writer.flush()?;
    Ok(())
}

fn export_json<T: serde::Serialize>(value: &T, path: &Path) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value).context("Failed to serialize result")?;
    writer.flush()?;
    Ok(())
}

/// Load pair results back from a JSONL export
pub fn load_results_from_jsonl(path: &Path) -> Result<Vec<FilePairResult>> {
    let file =
        File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let reader = BufReader::new(file);

    let mut results = Vec::new();
    for (line_number, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let result: FilePairResult = serde_json::from_str(&line)
            .with_context(|| format!("Malformed result on line {}", line_number + 1))?;
        results.push(result);
    }
    Ok(results)
}
