//! Regex search across a directory tree.
//!
//! Files are enumerated recursively in file-name order with no ignore-file
//! filtering, optionally narrowed by file-name globs, and scanned line by
//! line. Results stop at the per-file cap and at the global cap, whichever
//! comes first.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::Instant;

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use regex::{Regex, RegexBuilder};
use steward_types::SearchMatch;

use crate::config::SearchSettings;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub root: PathBuf,
    pub pattern: String,
    /// File-name globs separated by `;` or `,` (e.g. `"*.v;*.vhd"`).
    pub file_glob: Option<String>,
    pub ignore_case: bool,
    pub max_results: usize,
    pub max_results_per_file: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("Root path does not exist: {}", .0.display())]
    RootNotFound(PathBuf),
    #[error("Invalid search pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
    #[error("Invalid file glob '{glob}': {source}")]
    InvalidGlob {
        glob: String,
        #[source]
        source: globset::Error,
    },
    #[error("Search timed out matching line {line} of {}", .file.display())]
    Timeout { file: PathBuf, line: usize },
    #[error("Search task failed: {0}")]
    Task(String),
}

/// Split a `;`/`,` separated glob list; blank entries are dropped.
#[must_use]
pub fn parse_globs(raw: Option<&str>) -> Vec<String> {
    raw.map(|raw| {
        raw.split([';', ','])
            .map(str::trim)
            .filter(|glob| !glob.is_empty())
            .map(str::to_owned)
            .collect()
    })
    .unwrap_or_default()
}

fn build_globs(globs: &[String]) -> Result<Option<GlobSet>, SearchError> {
    if globs.is_empty() {
        return Ok(None);
    }
    let mut builder = GlobSetBuilder::new();
    for glob in globs {
        let compiled = GlobBuilder::new(glob)
            .case_insensitive(true)
            .build()
            .map_err(|source| SearchError::InvalidGlob {
                glob: glob.clone(),
                source,
            })?;
        builder.add(compiled);
    }
    builder
        .build()
        .map(Some)
        .map_err(|source| SearchError::InvalidGlob {
            glob: globs.join(";"),
            source,
        })
}

fn build_regex(request: &SearchRequest, settings: &SearchSettings) -> Result<Regex, SearchError> {
    Ok(RegexBuilder::new(&request.pattern)
        .case_insensitive(request.ignore_case)
        .multi_line(true)
        .size_limit(settings.regex_size_limit)
        .build()?)
}

/// Run a search synchronously. Prefer [`search_files`] from async code.
pub fn search_files_blocking(
    request: &SearchRequest,
    settings: &SearchSettings,
) -> Result<Vec<SearchMatch>, SearchError> {
    if !request.root.is_dir() {
        return Err(SearchError::RootNotFound(request.root.clone()));
    }
    let regex = build_regex(request, settings)?;
    let globs = build_globs(&parse_globs(request.file_glob.as_deref()))?;

    let mut results = Vec::new();
    if request.max_results == 0 || request.max_results_per_file == 0 {
        return Ok(results);
    }

    let walker = WalkBuilder::new(&request.root)
        .standard_filters(false)
        .sort_by_file_name(|a, b| a.cmp(b))
        .build();

    for entry in walker {
        let Ok(entry) = entry else {
            continue;
        };
        if !entry.file_type().is_some_and(|ft| ft.is_file()) {
            continue;
        }
        if let Some(globs) = &globs
            && !globs.is_match(Path::new(entry.file_name()))
        {
            continue;
        }

        scan_file(entry.path(), &regex, request, settings, &mut results)?;
        if results.len() >= request.max_results {
            break;
        }
    }

    tracing::debug!(
        root = %request.root.display(),
        pattern = %request.pattern,
        matches = results.len(),
        "search finished"
    );
    Ok(results)
}

/// Search on the blocking pool.
pub async fn search_files(
    request: SearchRequest,
    settings: SearchSettings,
) -> Result<Vec<SearchMatch>, SearchError> {
    tokio::task::spawn_blocking(move || search_files_blocking(&request, &settings))
        .await
        .map_err(|e| SearchError::Task(e.to_string()))?
}

/// Scan one file, appending to `results`. Unreadable files contribute nothing
/// further from the point of failure.
fn scan_file(
    path: &Path,
    regex: &Regex,
    request: &SearchRequest,
    settings: &SearchSettings,
    results: &mut Vec<SearchMatch>,
) -> Result<(), SearchError> {
    let Ok(file) = File::open(path) else {
        return Ok(());
    };
    let mut reader = BufReader::new(file);
    let mut buf = Vec::new();
    let mut line_number = 0usize;
    let mut in_file = 0usize;

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) | Err(_) => return Ok(()),
            Ok(_) => {}
        }
        line_number += 1;
        while matches!(buf.last(), Some(b'\n' | b'\r')) {
            buf.pop();
        }
        let line = String::from_utf8_lossy(&buf);

        let started = Instant::now();
        for found in regex.find_iter(&line) {
            if started.elapsed() >= settings.line_budget {
                return Err(SearchError::Timeout {
                    file: path.to_path_buf(),
                    line: line_number,
                });
            }
            results.push(SearchMatch {
                file: path.to_path_buf(),
                line: line_number,
                column: line[..found.start()].chars().count() + 1,
                line_text: line.to_string(),
                matched: found.as_str().to_string(),
            });
            in_file += 1;
            if in_file >= request.max_results_per_file || results.len() >= request.max_results {
                return Ok(());
            }
        }
        if started.elapsed() >= settings.line_budget {
            return Err(SearchError::Timeout {
                file: path.to_path_buf(),
                line: line_number,
            });
        }
    }
}
