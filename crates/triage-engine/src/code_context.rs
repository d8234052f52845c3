//! Source code lookup for enrichment.
//!
//! The engine asks a [`CodeContextProvider`] for a snippet around a code
//! location. [`FileSnippetProvider`] implements that on top of any
//! [`RepositoryFileSource`] that can return whole files, keeping fetched
//! files in a [`BoundedCache`] so repeated frames in the same file cost one
//! fetch.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use tracing::debug;
use triage_cache::{BoundedCache, CacheConfig, CacheStats, EvictionPolicy};
use triage_core::RepositoryScope;

use crate::config::EnrichmentConfig;
use crate::error::{EngineError, Result};

/// Minimum number of lines shown when no usable line number is known.
const MIN_HEAD_LINES: usize = 40;

/// Fetches a rendered snippet of source code.
///
/// Failures are never fatal to an analysis; the engine records them in the
/// enrichment context and carries on.
pub trait CodeContextProvider: Send + Sync {
    /// Returns a snippet of `path` in `scope`, centred on `line` if given.
    fn fetch_snippet(
        &self,
        scope: &RepositoryScope,
        path: &str,
        line: Option<u32>,
    ) -> impl Future<Output = Result<String>> + Send;
}

/// Fetches whole files from a repository.
pub trait RepositoryFileSource: Send + Sync {
    /// Returns the full contents of `path` at the scope's revision.
    fn fetch_file(
        &self,
        scope: &RepositoryScope,
        path: &str,
    ) -> impl Future<Output = Result<String>> + Send;
}

/// Provider used when no repository access is configured.
///
/// Every fetch fails, so enrichment degrades to failure notes.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCodeContext;

impl CodeContextProvider for NoCodeContext {
    async fn fetch_snippet(
        &self,
        _scope: &RepositoryScope,
        _path: &str,
        _line: Option<u32>,
    ) -> Result<String> {
        Err(EngineError::code_context("no code context provider configured"))
    }
}

/// Renders a line-numbered window of `content`.
///
/// With a line number inside the file, shows `context_lines` lines on each
/// side of it. Otherwise shows the head of the file. Numbers are
/// right-aligned to the widest number shown.
#[must_use]
pub fn extract_snippet(content: &str, line: Option<u32>, context_lines: usize) -> String {
    let lines: Vec<&str> = content.lines().collect();
    if lines.is_empty() {
        return String::new();
    }

    let total = lines.len();
    let (start, end) = match line.map(|l| l as usize) {
        Some(line) if (1..=total).contains(&line) => (
            line.saturating_sub(context_lines).max(1),
            line.saturating_add(context_lines).min(total),
        ),
        _ => (
            1,
            total.min(MIN_HEAD_LINES.max(context_lines.saturating_mul(2).saturating_add(1))),
        ),
    };

    let width = end.to_string().len();
    (start..=end)
        .map(|n| format!("{n:>width$} | {}", lines[n - 1]))
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct FileKey {
    scope: RepositoryScope,
    path: String,
}

/// [`CodeContextProvider`] that renders snippets from whole files.
#[derive(Debug)]
pub struct FileSnippetProvider<S> {
    source: S,
    files: BoundedCache<FileKey, Arc<str>>,
    context_lines: usize,
    file_ttl: Duration,
}

impl<S: RepositoryFileSource> FileSnippetProvider<S> {
    /// Creates a provider with the given enrichment limits.
    pub fn new(source: S, config: &EnrichmentConfig) -> Self {
        Self {
            source,
            files: BoundedCache::new(&CacheConfig::new(
                config.file_cache_entries,
                EvictionPolicy::Lru,
            )),
            context_lines: config.context_lines,
            file_ttl: config.file_cache_ttl(),
        }
    }

    /// The underlying file source.
    pub const fn source(&self) -> &S {
        &self.source
    }

    /// Statistics for the file cache.
    pub fn file_cache_stats(&self) -> CacheStats {
        self.files.stats()
    }

    /// Drops every cached file.
    pub fn clear_file_cache(&self) {
        self.files.clear();
    }

    async fn file(&self, scope: &RepositoryScope, path: &str) -> Result<Arc<str>> {
        let key = FileKey {
            scope: scope.clone(),
            path: path.to_string(),
        };

        if let Some(content) = self.files.get(&key) {
            return Ok(content);
        }

        let content: Arc<str> = self.source.fetch_file(scope, path).await?.into();
        debug!(
            repository = %scope.url,
            revision = scope.revision_or_default(),
            path,
            bytes = content.len(),
            "fetched repository file"
        );
        self.files.set(key, Arc::clone(&content), self.file_ttl);
        Ok(content)
    }
}

impl<S: RepositoryFileSource> CodeContextProvider for FileSnippetProvider<S> {
    async fn fetch_snippet(
        &self,
        scope: &RepositoryScope,
        path: &str,
        line: Option<u32>,
    ) -> Result<String> {
        let content = self.file(scope, path).await?;
        Ok(extract_snippet(&content, line, self.context_lines))
    }
}

/// An in-memory file source for testing.
///
/// Files are keyed by repository URL and path. A file registered for a
/// specific revision shadows the revision-less copy for that revision only.
#[derive(Debug, Clone, Default)]
pub struct InMemoryFileSource {
    files: Arc<RwLock<HashMap<(String, Option<String>, String), String>>>,
    fetches: Arc<AtomicUsize>,
}

impl InMemoryFileSource {
    /// Creates an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a file visible at every revision.
    #[must_use]
    pub fn with_file(
        self,
        repository: impl Into<String>,
        path: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        self.insert(repository, None, path, content);
        self
    }

    /// Adds a file visible only at `revision`.
    #[must_use]
    pub fn with_file_at(
        self,
        repository: impl Into<String>,
        revision: impl Into<String>,
        path: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        self.insert(repository, Some(revision.into()), path, content);
        self
    }

    /// Adds or replaces a file.
    pub fn insert(
        &self,
        repository: impl Into<String>,
        revision: Option<String>,
        path: impl Into<String>,
        content: impl Into<String>,
    ) {
        self.files
            .write()
            .insert((repository.into(), revision, path.into()), content.into());
    }

    /// Number of fetches served, including misses.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    fn lookup(&self, scope: &RepositoryScope, path: &str) -> Option<String> {
        let files = self.files.read();
        let pinned = scope.revision.as_ref().and_then(|rev| {
            files.get(&(scope.url.clone(), Some(rev.clone()), path.to_string()))
        });
        pinned
            .or_else(|| files.get(&(scope.url.clone(), None, path.to_string())))
            .cloned()
    }
}

impl RepositoryFileSource for InMemoryFileSource {
    async fn fetch_file(&self, scope: &RepositoryScope, path: &str) -> Result<String> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.lookup(scope, path).ok_or_else(|| {
            EngineError::code_context(format!("file not found: {path} in {}", scope.url))
        })
    }
}
