//! Core types for error triage.
//!
//! This module defines the records that flow through the triage pipeline:
//! the raw [`ErrorRecord`] and its [`ErrorEvent`] envelope, the derived
//! [`NormalizedError`] and [`Fingerprint`], the routing-aware [`CacheKey`],
//! and the [`AnalysisResult`] produced for each unique error.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::{Result, TriageError};

/// Structured context attached to an error record.
pub type ErrorContext = Map<String, Value>;

// ============================================================================
// ErrorRecord
// ============================================================================

/// A single error as reported by an upstream source.
///
/// Records are immutable once built. The message is required and must not be
/// blank; every other field is optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "ErrorRecordRepr")]
pub struct ErrorRecord {
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    file_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    line_number: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stack_trace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    context: Option<ErrorContext>,
}

impl ErrorRecord {
    /// Creates a builder for a record with the given message.
    #[must_use]
    pub fn builder(message: impl Into<String>) -> ErrorRecordBuilder {
        ErrorRecordBuilder::new(message)
    }

    /// Creates a record with only a message.
    ///
    /// # Errors
    ///
    /// Returns `TriageError::InvalidRecord` if the message is blank.
    pub fn new(message: impl Into<String>) -> Result<Self> {
        Self::builder(message).build()
    }

    /// The raw error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The error code, if any.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    /// The source file path, if any.
    #[must_use]
    pub fn file_path(&self) -> Option<&str> {
        self.file_path.as_deref()
    }

    /// The source line number, if any.
    #[must_use]
    pub const fn line_number(&self) -> Option<u32> {
        self.line_number
    }

    /// The raw stack trace, if any.
    #[must_use]
    pub fn stack_trace(&self) -> Option<&str> {
        self.stack_trace.as_deref()
    }

    /// The structured context, if any.
    #[must_use]
    pub const fn context(&self) -> Option<&ErrorContext> {
        self.context.as_ref()
    }
}

/// Builder for [`ErrorRecord`].
#[derive(Debug, Clone)]
pub struct ErrorRecordBuilder {
    message: String,
    code: Option<String>,
    file_path: Option<String>,
    line_number: Option<u32>,
    stack_trace: Option<String>,
    context: Option<ErrorContext>,
}

impl ErrorRecordBuilder {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            file_path: None,
            line_number: None,
            stack_trace: None,
            context: None,
        }
    }

    /// Sets the error code.
    #[must_use]
    pub fn code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Sets the source file path.
    #[must_use]
    pub fn file_path(mut self, path: impl Into<String>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    /// Sets the source line number.
    #[must_use]
    pub const fn line_number(mut self, line: u32) -> Self {
        self.line_number = Some(line);
        self
    }

    /// Sets the stack trace.
    #[must_use]
    pub fn stack_trace(mut self, trace: impl Into<String>) -> Self {
        self.stack_trace = Some(trace.into());
        self
    }

    /// Replaces the whole context map.
    #[must_use]
    pub fn context(mut self, context: ErrorContext) -> Self {
        self.context = Some(context);
        self
    }

    /// Adds a single context entry, overwriting an existing key.
    #[must_use]
    pub fn context_entry(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context
            .get_or_insert_with(Map::new)
            .insert(key.into(), value.into());
        self
    }

    /// Builds the record.
    ///
    /// # Errors
    ///
    /// Returns `TriageError::InvalidRecord` if the message is blank.
    pub fn build(self) -> Result<ErrorRecord> {
        if self.message.trim().is_empty() {
            return Err(TriageError::InvalidRecord {
                reason: "message must not be empty".to_string(),
            });
        }

        Ok(ErrorRecord {
            message: self.message,
            code: self.code,
            file_path: self.file_path,
            line_number: self.line_number,
            stack_trace: self.stack_trace,
            context: self.context,
        })
    }
}

/// Wire shape used to validate records on deserialization.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorRecordRepr {
    message: String,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    file_path: Option<String>,
    #[serde(default)]
    line_number: Option<u32>,
    #[serde(default)]
    stack_trace: Option<String>,
    #[serde(default)]
    context: Option<ErrorContext>,
}

impl TryFrom<ErrorRecordRepr> for ErrorRecord {
    type Error = TriageError;

    fn try_from(repr: ErrorRecordRepr) -> Result<Self> {
        ErrorRecordBuilder {
            message: repr.message,
            code: repr.code,
            file_path: repr.file_path,
            line_number: repr.line_number,
            stack_trace: repr.stack_trace,
            context: repr.context,
        }
        .build()
    }
}

// ============================================================================
// ErrorEvent
// ============================================================================

/// The canonical event handed to the engine by an upstream adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEvent {
    /// Identifier assigned by the upstream source.
    pub event_id: String,
    /// Event time in milliseconds since the Unix epoch.
    #[serde(rename = "timestamp", default)]
    pub timestamp_ms: i64,
    /// The reported error.
    #[serde(rename = "errorLog")]
    pub record: ErrorRecord,
    /// Repository the error originated from, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository_url: Option<String>,
}

impl ErrorEvent {
    /// Creates an event stamped with the current time.
    #[must_use]
    pub fn new(event_id: impl Into<String>, record: ErrorRecord) -> Self {
        Self {
            event_id: event_id.into(),
            timestamp_ms: Utc::now().timestamp_millis(),
            record,
            repository_url: None,
        }
    }

    /// Sets the repository URL.
    #[must_use]
    pub fn with_repository_url(mut self, url: impl Into<String>) -> Self {
        self.repository_url = Some(url.into());
        self
    }

    /// Sets the event timestamp.
    #[must_use]
    pub const fn with_timestamp_ms(mut self, timestamp_ms: i64) -> Self {
        self.timestamp_ms = timestamp_ms;
        self
    }

    /// Parses an event from JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed or the record is invalid.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

// ============================================================================
// NormalizedError
// ============================================================================

/// An error record with volatile details replaced by placeholders.
///
/// Purely derived from an [`ErrorRecord`]; it exists to feed hashing and to
/// give the analyzer a stable view of the error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedError {
    /// Message with literals and digit runs replaced.
    pub message: String,
    /// Error code, unchanged.
    pub code: Option<String>,
    /// Repository-relative file path.
    pub file_path: Option<String>,
    /// Line number, unchanged. Not part of the fingerprint.
    pub line_number: Option<u32>,
    /// Stack trace with positions and timings replaced.
    pub stack_trace: Option<String>,
    /// Context serialized with sorted keys. Not part of the fingerprint.
    pub context: Option<String>,
}

// ============================================================================
// Fingerprint
// ============================================================================

/// A SHA-256 digest identifying semantically equivalent errors.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Length of the hex representation.
    pub const HEX_LEN: usize = 64;

    /// Wraps raw digest bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Parses a 64 character hex string.
    ///
    /// # Errors
    ///
    /// Returns `TriageError::InvalidFingerprint` for malformed input.
    pub fn from_hex(s: &str) -> Result<Self> {
        if s.len() != Self::HEX_LEN {
            return Err(TriageError::InvalidFingerprint {
                reason: format!("expected {} hex characters, got {}", Self::HEX_LEN, s.len()),
            });
        }
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes).map_err(|e| TriageError::InvalidFingerprint {
            reason: e.to_string(),
        })?;
        Ok(Self(bytes))
    }

    /// Returns the raw digest bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Returns the lowercase hex representation.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Returns the first eight hex characters, for log lines.
    #[must_use]
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.short())
    }
}

impl FromStr for Fingerprint {
    type Err = TriageError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// Routing scope and cache key
// ============================================================================

/// The codebase an error is analyzed against.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepositoryScope {
    /// Repository URL.
    pub url: String,
    /// Commit or revision, when known.
    pub revision: Option<String>,
}

impl RepositoryScope {
    /// Creates a scope for the repository's default revision.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            revision: None,
        }
    }

    /// Pins the scope to a revision.
    #[must_use]
    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = Some(revision.into());
        self
    }

    /// The revision, or `"default"` when none is pinned.
    #[must_use]
    pub fn revision_or_default(&self) -> &str {
        self.revision.as_deref().unwrap_or("default")
    }
}

/// Identity under which analysis results are cached and deduplicated.
///
/// The same fingerprint analyzed against different repositories or revisions
/// yields different keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    fingerprint: Fingerprint,
    scope: Option<RepositoryScope>,
}

impl CacheKey {
    /// Creates an unscoped key.
    #[must_use]
    pub const fn new(fingerprint: Fingerprint) -> Self {
        Self {
            fingerprint,
            scope: None,
        }
    }

    /// Creates a key with an optional scope.
    #[must_use]
    pub const fn scoped(fingerprint: Fingerprint, scope: Option<RepositoryScope>) -> Self {
        Self { fingerprint, scope }
    }

    /// The error fingerprint.
    #[must_use]
    pub const fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    /// The routing scope, if any.
    #[must_use]
    pub const fn scope(&self) -> Option<&RepositoryScope> {
        self.scope.as_ref()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scope {
            Some(scope) => write!(
                f,
                "analysis:{}:{}:{}",
                scope.url,
                scope.revision_or_default(),
                self.fingerprint
            ),
            None => write!(f, "analysis:{}", self.fingerprint),
        }
    }
}

// ============================================================================
// AnalysisResult
// ============================================================================

/// Diagnostic analysis produced for a unique error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    /// Fingerprint of the analyzed error.
    pub fingerprint: Fingerprint,
    /// Free-form analysis text.
    pub analysis: String,
    /// Short root-cause statement, if extracted.
    pub root_cause: Option<String>,
    /// Suggested fix, if extracted.
    pub suggested_fix: Option<String>,
    /// Confidence from 0 to 100.
    pub confidence_score: u8,
    /// When the analysis was produced.
    pub analyzed_at: DateTime<Utc>,
}

impl AnalysisResult {
    /// Confidence used when the analyzer does not report one.
    pub const DEFAULT_CONFIDENCE: u8 = 75;

    /// Creates a result with default confidence, stamped now.
    #[must_use]
    pub fn new(fingerprint: Fingerprint, analysis: impl Into<String>) -> Self {
        Self {
            fingerprint,
            analysis: analysis.into(),
            root_cause: None,
            suggested_fix: None,
            confidence_score: Self::DEFAULT_CONFIDENCE,
            analyzed_at: Utc::now(),
        }
    }

    /// Sets the root cause.
    #[must_use]
    pub fn with_root_cause(mut self, root_cause: impl Into<String>) -> Self {
        self.root_cause = Some(root_cause.into());
        self
    }

    /// Sets the suggested fix.
    #[must_use]
    pub fn with_suggested_fix(mut self, fix: impl Into<String>) -> Self {
        self.suggested_fix = Some(fix.into());
        self
    }

    /// Sets the confidence score, clamped to 100.
    #[must_use]
    pub fn with_confidence(mut self, score: u8) -> Self {
        self.confidence_score = score.min(100);
        self
    }
}
