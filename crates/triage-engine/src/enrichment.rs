//! Repository context for analysis.
//!
//! Before an analysis is requested, the engine tries to attach the source
//! code the error points at. Code locations come from the record's file path
//! and from frames recognized in its stack trace. Each location is fetched
//! through a [`CodeContextProvider`] and rendered as a fenced snippet.
//!
//! Enrichment is best-effort. A failed fetch becomes a note in the context,
//! and no failure here ever aborts an analysis.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};
use triage_core::{ErrorContext, ErrorRecord, RepositoryScope, normalize_path};

use crate::code_context::CodeContextProvider;
use crate::config::EnrichmentConfig;

/// Context keys that may carry the deployed revision, in priority order.
pub const REVISION_KEYS: &[&str] = &[
    "git.commit.sha",
    "git.commit",
    "git.sha",
    "git.revision",
    "vcs.ref.head.revision",
    "vcs.revision",
    "vcs.revision.id",
    "revision",
    "commit",
];

/// Appended when the context reaches its size limit.
pub const TRUNCATION_NOTE: &str = "(Repository context truncated due to size limits.)";

/// Used when neither the record nor its stack trace names a source file.
pub const NO_LOCATIONS_NOTE: &str = "(No code locations found in the log/stack trace.)";

const SOURCE_EXTENSIONS: &str = "py|js|jsx|ts|tsx|java|go|rb|php|cs|c|cc|cpp|h|hpp|rs";

static REVISION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?i)[0-9a-f]{7,40}$").unwrap_or_else(|_| unreachable!()));

static STACK_FRAMES: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        // (path/to/file.ts:45:12)
        format!(r"\((?P<path>[^()]+?\.(?:{SOURCE_EXTENSIONS})):(?P<line>\d+):\d+\)"),
        // path/to/file.ts:45:12
        format!(r"(?P<path>[^\s()]+?\.(?:{SOURCE_EXTENSIONS})):(?P<line>\d+):\d+"),
        // path/to/file.go:45
        format!(r"(?P<path>[^\s()]+?\.(?:{SOURCE_EXTENSIONS})):(?P<line>\d+)"),
        // File "path/to/file.py", line 45
        r#"File ["'](?P<path>[^"']+?\.py)["'], line (?P<line>\d+)"#.to_string(),
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).unwrap_or_else(|_| unreachable!()))
    .collect()
});

/// A file and optional line the error points at.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CodeLocation {
    /// Repository-relative path.
    pub path: String,
    /// 1-based line number, when known.
    pub line: Option<u32>,
}

impl CodeLocation {
    /// Creates a location.
    pub fn new(path: impl Into<String>, line: Option<u32>) -> Self {
        Self {
            path: path.into(),
            line,
        }
    }

    /// The `[Snippet] path[:line]` heading for this location.
    pub fn heading(&self) -> String {
        match self.line {
            Some(line) => format!("[Snippet] {}:{line}", self.path),
            None => format!("[Snippet] {}", self.path),
        }
    }
}

/// Returns the first revision-looking value among [`REVISION_KEYS`].
///
/// A value qualifies if it is a string of 7 to 40 hex digits once trimmed.
pub fn extract_repository_ref(context: Option<&ErrorContext>) -> Option<String> {
    let context = context?;
    REVISION_KEYS.iter().find_map(|key| match context.get(*key) {
        Some(Value::String(value)) => {
            let value = value.trim();
            REVISION.is_match(value).then(|| value.to_string())
        }
        _ => None,
    })
}

/// Scans a stack trace for source frames, in pattern order.
///
/// Paths are returned as written; normalization happens in
/// [`extract_code_locations`].
pub fn extract_stack_locations(stack_trace: &str) -> Vec<CodeLocation> {
    let mut locations = Vec::new();
    for pattern in STACK_FRAMES.iter() {
        for caps in pattern.captures_iter(stack_trace) {
            let Some(path) = caps.name("path").map(|m| m.as_str().trim()) else {
                continue;
            };
            if path.is_empty() {
                continue;
            }
            let line = caps
                .name("line")
                .and_then(|m| m.as_str().parse::<u32>().ok());
            locations.push(CodeLocation::new(path, line));
        }
    }
    locations
}

/// Collects up to `max` distinct repository locations for a record.
///
/// The record's own file path comes first, then stack frames. Frames that
/// are not repository files (`<anonymous>`, `node:` and `internal/` modules)
/// are skipped.
pub fn extract_code_locations(record: &ErrorRecord, max: usize) -> Vec<CodeLocation> {
    let mut raw = Vec::new();
    if let Some(path) = record.file_path() {
        raw.push(CodeLocation::new(path, record.line_number()));
    }
    if let Some(trace) = record.stack_trace() {
        raw.extend(extract_stack_locations(trace));
    }

    let mut seen = HashSet::new();
    let mut locations = Vec::new();

    for location in raw {
        if locations.len() >= max {
            break;
        }

        let path = normalize_path(&location.path);
        if path.is_empty() || is_runtime_frame(&path) {
            continue;
        }

        let location = CodeLocation::new(path, location.line);
        if seen.insert(location.clone()) {
            locations.push(location);
        }
    }

    locations
}

fn is_runtime_frame(path: &str) -> bool {
    path.starts_with('<') || path.starts_with("node:") || path.starts_with("internal/")
}

/// Returns the fenced code block language for a file path.
pub fn guess_language(path: &str) -> &'static str {
    let lower = path.to_ascii_lowercase();
    let extension = lower.rsplit_once('.').map_or("", |(_, ext)| ext);
    match extension {
        "py" => "python",
        "ts" | "tsx" => "typescript",
        "js" | "jsx" => "javascript",
        "go" => "go",
        "java" => "java",
        "rb" => "ruby",
        "rs" => "rust",
        "php" => "php",
        "cs" => "csharp",
        "c" | "h" => "c",
        "cc" | "cpp" | "hpp" => "cpp",
        _ => "text",
    }
}

/// Builds the repository context passed to the analyzer.
#[derive(Debug, Clone, Default)]
pub struct ContextBuilder {
    config: EnrichmentConfig,
}

impl ContextBuilder {
    /// Creates a builder with the given limits.
    pub const fn new(config: EnrichmentConfig) -> Self {
        Self { config }
    }

    /// The limits in use.
    pub const fn config(&self) -> &EnrichmentConfig {
        &self.config
    }

    /// Renders the context for `record` in `scope`.
    ///
    /// Never fails. Locations whose code cannot be fetched get a failure
    /// note, and once the rendered size reaches the configured limit the
    /// remaining locations are dropped.
    pub async fn build<C: CodeContextProvider>(
        &self,
        provider: &C,
        scope: &RepositoryScope,
        record: &ErrorRecord,
    ) -> String {
        let header = format!(
            "Repository: {}\nRef: {}",
            scope.url,
            scope.revision_or_default()
        );

        let locations = extract_code_locations(record, self.config.max_locations);
        if locations.is_empty() {
            return format!("{header}\n{NO_LOCATIONS_NOTE}");
        }

        let mut parts = vec![header];
        let mut size = parts[0].len();

        for location in &locations {
            let part = match provider
                .fetch_snippet(scope, &location.path, location.line)
                .await
            {
                Ok(snippet) => format!(
                    "{}\n```{}\n{snippet}\n```",
                    location.heading(),
                    guess_language(&location.path)
                ),
                Err(err) => {
                    warn!(
                        repository = %scope.url,
                        path = %location.path,
                        error = %err,
                        "failed to fetch code context"
                    );
                    format!("{}\n(Failed to fetch code: {err})", location.heading())
                }
            };

            size += part.len();
            parts.push(part);

            if size >= self.config.max_context_chars {
                debug!(size, limit = self.config.max_context_chars, "truncating repository context");
                parts.push(TRUNCATION_NOTE.to_string());
                break;
            }
        }

        parts.join("\n\n")
    }
}
