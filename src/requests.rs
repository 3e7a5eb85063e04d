//! Request batch loading
//!
//! Reads a directory of request payloads for the replay pipeline. Files
//! ending in `.headers.json` are per-request header sidecars, and files whose
//! name starts with `_` are batch metadata - neither is a payload. Persisted
//! response paths are sanitized so a hostile relative path can never escape
//! the job directory.

use crate::types::RequestPair;
use anyhow::{Context, Result};
use log::warn;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use walkdir::WalkDir;

/// Suffix marking a per-request header sidecar
pub const HEADERS_SIDECAR_SUFFIX: &str = ".headers.json";

/// Sidecar document: `{ "headers": { name: value } }`
#[derive(Debug, Deserialize)]
struct SidecarDocument {
    #[serde(default)]
    headers: BTreeMap<String, String>,
}

fn content_type_for(relative_path: &str) -> String {
    let lower = relative_path.to_ascii_lowercase();
    if lower.ends_with(".json") {
        "application/json".to_string()
    } else if lower.ends_with(".xml") {
        "application/xml".to_string()
    } else {
        "application/octet-stream".to_string()
    }
}

/// Load every request payload under `batch_dir`, sorted by relative path
pub fn load_request_batch(batch_dir: &Path) -> Result<Vec<RequestPair>> {
    if !batch_dir.is_dir() {
        anyhow::bail!("request batch '{}' is not a directory", batch_dir.display());
    }

    let mut requests = Vec::new();
    for entry in WalkDir::new(batch_dir).follow_links(false) {
        let entry =
            entry.with_context(|| format!("Failed to walk {}", batch_dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let file_name = entry.file_name().to_string_lossy();
        if file_name.starts_with('_') || file_name.ends_with(HEADERS_SIDECAR_SUFFIX) {
            continue;
        }

        let relative_path = entry
            .path()
            .strip_prefix(batch_dir)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/");
        let body_bytes = fs::read(entry.path())
            .with_context(|| format!("Failed to read request {}", entry.path().display()))?;

        let per_request_headers = load_sidecar_headers(entry.path());

        requests.push(RequestPair {
            content_type: content_type_for(&relative_path),
            relative_path,
            body_bytes,
            per_request_headers,
        });
    }

    requests.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(requests)
}

/// Read the `<request>.headers.json` sidecar, if present
///
/// A malformed sidecar is logged and treated as absent rather than failing
/// the batch.
fn load_sidecar_headers(request_path: &Path) -> BTreeMap<String, String> {
    let mut sidecar_name = request_path.as_os_str().to_os_string();
    sidecar_name.push(HEADERS_SIDECAR_SUFFIX);
    let sidecar_path = Path::new(&sidecar_name);
    if !sidecar_path.is_file() {
        return BTreeMap::new();
    }
    match fs::read(sidecar_path)
        .map_err(anyhow::Error::from)
        .and_then(|bytes| serde_json::from_slice::<SidecarDocument>(&bytes).map_err(Into::into))
    {
        Ok(doc) => doc.headers,
        Err(e) => {
            warn!(
                "Ignoring malformed header sidecar {}: {}",
                sidecar_path.display(),
                e
            );
            BTreeMap::new()
        }
    }
}

/// Merge global endpoint headers with per-request overrides
///
/// Header names compare case-insensitively; the per-request value wins and
/// keeps its own spelling.
pub fn merge_headers(
    global: &BTreeMap<String, String>,
    per_request: &BTreeMap<String, String>,
) -> Vec<(String, String)> {
    let mut merged: Vec<(String, String)> = Vec::new();
    for (name, value) in global {
        let overridden = per_request
            .keys()
            .any(|n| n.eq_ignore_ascii_case(name));
        if !overridden {
            merged.push((name.clone(), value.clone()));
        }
    }
    for (name, value) in per_request {
        merged.push((name.clone(), value.clone()));
    }
    merged
}

/// Sanitize a request's relative path for use as an on-disk response path
///
/// Separators are normalized, leading separators stripped, and every `..`
/// component replaced with `_`, so the joined path stays inside the job
/// root.
pub fn sanitize_relative_path(relative_path: &str) -> String {
    let normalized = relative_path.replace('\\', "/");
    let components: Vec<&str> = normalized
        .split('/')
        .filter(|c| !c.is_empty() && *c != ".")
        .map(|c| if c == ".." { "_" } else { c })
        .collect();
    if components.is_empty() {
        "_".to_string()
    } else {
        components.join("/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &Path, rel: &str, content: &str) {
        let path = dir.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_batch_loading_skips_sidecars_and_metadata() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "req1.json", r#"{"q": 1}"#);
        write(dir.path(), "req1.json.headers.json", r#"{"headers": {"X-Trace": "t1"}}"#);
        write(dir.path(), "_manifest.json", "{}");
        write(dir.path(), "sub/req2.xml", "<q/>");

        let batch = load_request_batch(dir.path()).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].relative_path, "req1.json");
        assert_eq!(batch[0].content_type, "application/json");
        assert_eq!(
            batch[0].per_request_headers.get("X-Trace").map(|s| s.as_str()),
            Some("t1")
        );
        assert_eq!(batch[1].relative_path, "sub/req2.xml");
        assert_eq!(batch[1].content_type, "application/xml");
        assert!(batch[1].per_request_headers.is_empty());
    }

    #[test]
    fn test_malformed_sidecar_is_ignored() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "req.json", "{}");
        write(dir.path(), "req.json.headers.json", "not json");

        let batch = load_request_batch(dir.path()).unwrap();
        assert_eq!(batch.len(), 1);
        assert!(batch[0].per_request_headers.is_empty());
    }

    #[test]
    fn test_missing_batch_dir_fails() {
        assert!(load_request_batch(Path::new("/nonexistent/batch")).is_err());
    }

    #[test]
    fn test_header_merge_case_insensitive_override() {
        let global: BTreeMap<String, String> = [
            ("Content-Type".to_string(), "application/json".to_string()),
            ("X-Api-Key".to_string(), "global".to_string()),
        ]
        .into_iter()
        .collect();
        let per_request: BTreeMap<String, String> =
            [("x-api-key".to_string(), "override".to_string())]
                .into_iter()
                .collect();

        let merged = merge_headers(&global, &per_request);
        assert_eq!(merged.len(), 2);
        assert!(merged
            .iter()
            .any(|(n, v)| n == "Content-Type" && v == "application/json"));
        assert!(merged.iter().any(|(n, v)| n == "x-api-key" && v == "override"));
        assert!(!merged.iter().any(|(_, v)| v == "global"));
    }

    #[test]
    fn test_sanitize_relative_path() {
        assert_eq!(sanitize_relative_path("a/b.json"), "a/b.json");
        assert_eq!(sanitize_relative_path("..\\..\\etc/passwd"), "_/_/etc/passwd");
        assert_eq!(sanitize_relative_path("/leading/slash"), "leading/slash");
        assert_eq!(sanitize_relative_path("a/./b"), "a/b");
        assert_eq!(sanitize_relative_path("../.."), "_/_");
        assert_eq!(sanitize_relative_path(""), "_");
    }

    #[test]
    fn test_sanitized_path_stays_under_root() {
        let root = Path::new("/tmp/job");
        for hostile in ["../../escape", "/abs/path", "..", "a/../../b"] {
            let joined = root.join(sanitize_relative_path(hostile));
            assert!(
                joined.starts_with(root),
                "{} escaped to {}",
                hostile,
                joined.display()
            );
        }
    }
}
