//! Directory indexing and pair formation
//!
//! Walks the two comparison roots, hashes file contents for the
//! identical-pair fast path, and pairs files by identical relative path.
//! One-sided files either become error pairs (`include_all`) or are skipped.

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use log::warn;
use rayon::prelude::*;
use std::fs;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// One indexed file with its content fingerprint
#[derive(Debug, Clone)]
pub struct IndexedFile {
    /// Absolute path on disk
    pub path: PathBuf,
    /// Path relative to the indexed root, `/`-separated
    pub relative_path: String,
    /// File size in bytes
    pub size: u64,
    /// Blake3 hash of file contents (hex), empty if hashing failed
    pub content_hash: String,
}

/// A pair of files matched by relative path
///
/// `path_a`/`path_b` are `None` for one-sided files (kept only when the
/// caller asked for them).
#[derive(Debug, Clone)]
pub struct FilePair {
    pub relative_path: String,
    pub path_a: Option<PathBuf>,
    pub path_b: Option<PathBuf>,
    /// True if both sides exist and their content hashes match
    pub hash_equal: bool,
}

/// Build a glob set from exclude patterns, failing fast on a bad pattern
pub fn build_exclude_set(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .with_context(|| format!("Invalid exclude pattern '{}'", pattern))?;
        builder.add(glob);
    }
    builder.build().context("Failed to build exclude set")
}

/// Index every file under `root`, excluding matches of `exclude_patterns`
///
/// Patterns match against the `/`-separated relative path and against the
/// bare file name, so `*.tmp` and `subdir/*.tmp` both behave as expected.
pub fn index_directory(root: &Path, exclude_patterns: &[String]) -> Result<Vec<IndexedFile>> {
    if !root.is_dir() {
        anyhow::bail!("'{}' is not a directory", root.display());
    }
    let excludes = build_exclude_set(exclude_patterns)?;

    let mut files: Vec<IndexedFile> = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.with_context(|| format!("Failed to walk {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/");
        let file_name = entry.file_name().to_string_lossy();
        if excludes.is_match(relative.as_str()) || excludes.is_match(file_name.as_ref()) {
            continue;
        }
        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        files.push(IndexedFile {
            path: entry.path().to_path_buf(),
            relative_path: relative,
            size,
            content_hash: String::new(),
        });
    }

    // Hash in parallel; a failed hash leaves the fast path disabled for
    // that file but does not fail indexing
    files.par_iter_mut().for_each(|file| {
        match hash_file(&file.path) {
            Ok(hash) => file.content_hash = hash,
            Err(e) => warn!("Failed to hash {}: {}", file.path.display(), e),
        }
    });

    files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(files)
}

/// Streaming blake3 hash with constant memory
fn hash_file(path: &Path) -> Result<String> {
    let file = fs::File::open(path)?;
    let mut reader = BufReader::new(file);
    let mut hasher = blake3::Hasher::new();
    let mut buffer = [0u8; 16384];
    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}

/// Pair two indexed sets by identical relative path
///
/// With `include_all`, one-sided files appear as pairs with one missing
/// side; otherwise they are skipped. Output is sorted byte-ordinal by
/// relative path.
pub fn pair_by_relative_path(
    files_a: &[IndexedFile],
    files_b: &[IndexedFile],
    include_all: bool,
) -> Vec<FilePair> {
    let mut pairs: Vec<FilePair> = Vec::new();
    let mut ia = 0usize;
    let mut ib = 0usize;

    // Both sides are sorted by relative path: a linear merge pairs them
    while ia < files_a.len() && ib < files_b.len() {
        let a = &files_a[ia];
        let b = &files_b[ib];
        match a.relative_path.cmp(&b.relative_path) {
            std::cmp::Ordering::Equal => {
                pairs.push(FilePair {
                    relative_path: a.relative_path.clone(),
                    path_a: Some(a.path.clone()),
                    path_b: Some(b.path.clone()),
                    hash_equal: !a.content_hash.is_empty()
                        && a.content_hash == b.content_hash,
                });
                ia += 1;
                ib += 1;
            }
            std::cmp::Ordering::Less => {
                if include_all {
                    pairs.push(FilePair {
                        relative_path: a.relative_path.clone(),
                        path_a: Some(a.path.clone()),
                        path_b: None,
                        hash_equal: false,
                    });
                }
                ia += 1;
            }
            std::cmp::Ordering::Greater => {
                if include_all {
                    pairs.push(FilePair {
                        relative_path: b.relative_path.clone(),
                        path_a: None,
                        path_b: Some(b.path.clone()),
                        hash_equal: false,
                    });
                }
                ib += 1;
            }
        }
    }
    if include_all {
        for a in &files_a[ia..] {
            pairs.push(FilePair {
                relative_path: a.relative_path.clone(),
                path_a: Some(a.path.clone()),
                path_b: None,
                hash_equal: false,
            });
        }
        for b in &files_b[ib..] {
            pairs.push(FilePair {
                relative_path: b.relative_path.clone(),
                path_a: None,
                path_b: Some(b.path.clone()),
                hash_equal: false,
            });
        }
    }

    pairs.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &Path, rel: &str, content: &str) {
        let path = dir.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_index_and_hash() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "a.json", r#"{"x": 1}"#);
        write(dir.path(), "sub/b.json", r#"{"y": 2}"#);

        let files = index_directory(dir.path(), &[]).unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].relative_path, "a.json");
        assert_eq!(files[1].relative_path, "sub/b.json");
        assert!(!files[0].content_hash.is_empty());
    }

    #[test]
    fn test_exclude_patterns() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "keep.json", "{}");
        write(dir.path(), "drop.tmp", "{}");

        let files = index_directory(dir.path(), &["*.tmp".to_string()]).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].relative_path, "keep.json");
    }

    #[test]
    fn test_missing_directory_fails() {
        assert!(index_directory(Path::new("/nonexistent/nope"), &[]).is_err());
    }

    #[test]
    fn test_pairing_identical_content() {
        let dir_a = TempDir::new().unwrap();
        let dir_b = TempDir::new().unwrap();
        write(dir_a.path(), "same.json", r#"{"x": 1}"#);
        write(dir_b.path(), "same.json", r#"{"x": 1}"#);
        write(dir_a.path(), "diff.json", r#"{"x": 1}"#);
        write(dir_b.path(), "diff.json", r#"{"x": 2}"#);

        let files_a = index_directory(dir_a.path(), &[]).unwrap();
        let files_b = index_directory(dir_b.path(), &[]).unwrap();
        let pairs = pair_by_relative_path(&files_a, &files_b, false);

        assert_eq!(pairs.len(), 2);
        let same = pairs.iter().find(|p| p.relative_path == "same.json").unwrap();
        assert!(same.hash_equal);
        let diff = pairs.iter().find(|p| p.relative_path == "diff.json").unwrap();
        assert!(!diff.hash_equal);
    }

    #[test]
    fn test_one_sided_files() {
        let dir_a = TempDir::new().unwrap();
        let dir_b = TempDir::new().unwrap();
        write(dir_a.path(), "only_a.json", "{}");
        write(dir_b.path(), "only_b.json", "{}");

        let files_a = index_directory(dir_a.path(), &[]).unwrap();
        let files_b = index_directory(dir_b.path(), &[]).unwrap();

        // Skipped by default
        let pairs = pair_by_relative_path(&files_a, &files_b, false);
        assert!(pairs.is_empty());

        // Included on request, each missing one side
        let pairs = pair_by_relative_path(&files_a, &files_b, true);
        assert_eq!(pairs.len(), 2);
        assert!(pairs[0].path_b.is_none());
        assert!(pairs[1].path_a.is_none());
    }

    #[test]
    fn test_empty_directories() {
        let dir_a = TempDir::new().unwrap();
        let dir_b = TempDir::new().unwrap();
        let files_a = index_directory(dir_a.path(), &[]).unwrap();
        let files_b = index_directory(dir_b.path(), &[]).unwrap();
        assert!(pair_by_relative_path(&files_a, &files_b, true).is_empty());
    }
}
