//! File classification and coverage
//!
//! Partitions every differing file into exactly one of five buckets based on
//! the coverage groups of its difference categories. The partition is
//! verified after construction; a violation is a fatal bug, not a
//! recoverable error.

use crate::categorize::categorize;
use crate::error::CompareError;
use crate::types::{
    Category5, CoverageGroup, Difference, FileClassification, FilePairResult,
};
use std::collections::{BTreeMap, HashSet};

/// Classify one file's differences into its coverage bucket
pub fn classify_file(differences: &[Difference]) -> Category5 {
    let mut groups: HashSet<CoverageGroup> = HashSet::new();
    let mut has_uncategorized = false;

    for diff in differences {
        match categorize(diff).coverage_group() {
            CoverageGroup::Uncategorized => has_uncategorized = true,
            group => {
                groups.insert(group);
            }
        }
    }

    if groups.len() > 1 {
        return Category5::Mixed;
    }
    if has_uncategorized {
        // Uncategorized differences keep the file out of a pure bucket
        return Category5::Uncategorized;
    }
    match groups.iter().next() {
        Some(CoverageGroup::Value) => Category5::Value,
        Some(CoverageGroup::Missing) => Category5::Missing,
        Some(CoverageGroup::Order) => Category5::Order,
        _ => Category5::Uncategorized,
    }
}

/// Partition all differing files into the five buckets
///
/// Errored pairs and equal pairs are excluded. Every differing file lands in
/// exactly one bucket; the partition is re-verified and a violation aborts
/// the run as a fatal invariant failure.
pub fn classify_files(results: &[FilePairResult]) -> Result<FileClassification, CompareError> {
    let mut files_by_category: BTreeMap<Category5, Vec<String>> = BTreeMap::new();
    let mut differing = 0usize;

    for result in results {
        if result.is_error() || result.differences.is_empty() {
            continue;
        }
        differing += 1;
        let bucket = classify_file(&result.differences);
        files_by_category
            .entry(bucket)
            .or_default()
            .push(result.file_a_name.clone());
    }
    for files in files_by_category.values_mut() {
        files.sort();
    }

    let counts: BTreeMap<Category5, usize> = files_by_category
        .iter()
        .map(|(bucket, files)| (*bucket, files.len()))
        .collect();

    // Invariant: exactly one bucket per differing file
    let classified: usize = counts.values().sum();
    let mut seen: HashSet<&String> = HashSet::new();
    let mut disjoint = true;
    for files in files_by_category.values() {
        for file in files {
            if !seen.insert(file) {
                disjoint = false;
            }
        }
    }
    debug_assert!(classified == differing && disjoint);
    if classified != differing || !disjoint {
        return Err(CompareError::Fatal(format!(
            "file classification is not a partition: {} differing files, {} classified",
            differing, classified
        )));
    }

    Ok(FileClassification {
        files_by_category,
        counts,
        is_complete: true,
    })
}
