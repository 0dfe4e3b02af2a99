//! Source ingestion for one-shot generation prompts.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, instrument, warn};
use walkdir::{DirEntry, WalkDir};

/// Directory names never descended into.
const SKIPPED_DIRS: &[&str] = &["target", "node_modules"];

/// Bytes inspected when sniffing for binary content.
const SNIFF_BYTES: usize = 8192;

const TRUNCATED_NOTE: &str = "\n[truncated]";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceDocument {
    /// Display path (relative to the location it was found under).
    pub path: String,
    pub content: String,
    pub truncated: bool,
}

/// Sources embedded in a prompt, bounded by a byte budget.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SourceBundle {
    pub documents: Vec<SourceDocument>,
    /// Documents left out once the budget ran out.
    pub skipped: Vec<String>,
    pub total_bytes: usize,
}

/// Read every location in order. Directories are walked in sorted order,
/// skipping hidden entries, build output and binary files.
///
/// When the budget runs out the current document is truncated with a note and
/// every later document is listed in `skipped`. A document is skipped outright
/// when the remaining budget cannot hold the note, so `total_bytes` never
/// exceeds the budget.
#[instrument(skip_all, fields(locations = locations.len(), budget_bytes))]
pub fn ingest_sources(locations: &[PathBuf], budget_bytes: usize) -> Result<SourceBundle> {
    let mut bundle = SourceBundle::default();
    for location in locations {
        for (path, display) in collect_files(location)? {
            let bytes = fs::read(&path).with_context(|| format!("read source {}", path.display()))?;
            if is_binary(&bytes) {
                debug!(path = %path.display(), "skipping binary file");
                continue;
            }
            let content = String::from_utf8_lossy(&bytes).into_owned();
            push_within_budget(&mut bundle, display, content, budget_bytes);
        }
    }
    if !bundle.skipped.is_empty() {
        warn!(
            skipped = bundle.skipped.len(),
            budget_bytes, "source budget exhausted"
        );
    }
    debug!(
        documents = bundle.documents.len(),
        total_bytes = bundle.total_bytes,
        "ingested sources"
    );
    Ok(bundle)
}

fn push_within_budget(bundle: &mut SourceBundle, path: String, content: String, budget: usize) {
    let remaining = budget.saturating_sub(bundle.total_bytes);
    let exhausted = !bundle.skipped.is_empty()
        || bundle.documents.last().is_some_and(|doc| doc.truncated);
    if exhausted || remaining == 0 {
        bundle.skipped.push(path);
        return;
    }
    if content.len() <= remaining {
        bundle.total_bytes += content.len();
        bundle.documents.push(SourceDocument {
            path,
            content,
            truncated: false,
        });
        return;
    }
    if remaining <= TRUNCATED_NOTE.len() {
        bundle.skipped.push(path);
        return;
    }
    let mut keep = remaining - TRUNCATED_NOTE.len();
    while !content.is_char_boundary(keep) {
        keep -= 1;
    }
    let mut truncated = content[..keep].to_string();
    truncated.push_str(TRUNCATED_NOTE);
    bundle.total_bytes += truncated.len();
    bundle.documents.push(SourceDocument {
        path,
        content: truncated,
        truncated: true,
    });
}

/// Files under `location` with their display paths, in sorted order.
fn collect_files(location: &Path) -> Result<Vec<(PathBuf, String)>> {
    if location.is_file() {
        return Ok(vec![(location.to_path_buf(), location.display().to_string())]);
    }
    let mut files = Vec::new();
    let walker = WalkDir::new(location)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_skipped(entry));
    for entry in walker {
        let entry = entry.with_context(|| format!("walk {}", location.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(location)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/");
        files.push((entry.path().to_path_buf(), relative));
    }
    Ok(files)
}

fn is_skipped(entry: &DirEntry) -> bool {
    let name = entry.file_name().to_string_lossy();
    if name.starts_with('.') {
        return true;
    }
    entry.file_type().is_dir() && SKIPPED_DIRS.iter().any(|skip| name == *skip)
}

fn is_binary(bytes: &[u8]) -> bool {
    bytes[..bytes.len().min(SNIFF_BYTES)].contains(&0)
}
