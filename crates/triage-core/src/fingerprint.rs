//! Error normalization and fingerprinting.
//!
//! Normalization strips details that vary between occurrences of the same
//! logical error (line numbers, quoted values, timings, checkout location) so
//! that repeated occurrences hash to the same [`Fingerprint`].
//!
//! Every function here is pure and total: absent fields stay absent and no
//! input can make normalization fail.

use std::fmt::Write as _;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::types::{ErrorContext, ErrorRecord, Fingerprint, NormalizedError};

/// Directory names treated as the start of the repository-relative path.
pub const SOURCE_ROOTS: &[&str] = &[
    "src", "lib", "app", "apps", "packages", "services", "modules",
];

/// Separator between fingerprint components. Never produced by normalization.
const FIELD_SEPARATOR: char = '\u{1f}';

static DRIVE_LETTER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z]:").unwrap_or_else(|_| unreachable!()));

static SOURCE_ROOT: Lazy<Regex> = Lazy::new(|| {
    let roots = SOURCE_ROOTS.join("|");
    Regex::new(&format!(r"(?:^|/)((?:{roots})/.+)$")).unwrap_or_else(|_| unreachable!())
});

static LINE_COLUMN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r":\d+:\d+").unwrap_or_else(|_| unreachable!()));

static TIMING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"at \d+ms").unwrap_or_else(|_| unreachable!()));

static SINGLE_QUOTED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"'[^']*'").unwrap_or_else(|_| unreachable!()));

static DOUBLE_QUOTED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""[^"]*""#).unwrap_or_else(|_| unreachable!()));

static DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").unwrap_or_else(|_| unreachable!()));

/// Reduces a file path to its repository-relative form.
///
/// Backslashes become forward slashes and a drive letter is dropped. If the
/// path contains one of [`SOURCE_ROOTS`] as a whole segment, everything
/// before the first such segment is removed; otherwise leading slashes are.
#[must_use]
pub fn normalize_path(path: &str) -> String {
    let unified = path.trim().replace('\\', "/");
    let without_drive = DRIVE_LETTER.replace(&unified, "");

    if let Some(caps) = SOURCE_ROOT.captures(&without_drive) {
        if let Some(rest) = caps.get(1) {
            return rest.as_str().to_string();
        }
    }

    without_drive.trim_start_matches('/').to_string()
}

/// Replaces `:line:column` pairs and `at <n>ms` timings with placeholders.
#[must_use]
pub fn normalize_stack_trace(trace: &str) -> String {
    let positions = LINE_COLUMN.replace_all(trace, ":X:X");
    TIMING.replace_all(&positions, "at Xms").into_owned()
}

/// Replaces quoted literals and digit runs in a message with placeholders.
#[must_use]
pub fn normalize_message(message: &str) -> String {
    let single = SINGLE_QUOTED.replace_all(message, "'X'");
    let double = DOUBLE_QUOTED.replace_all(&single, "\"X\"");
    DIGITS.replace_all(&double, "N").into_owned()
}

/// Serializes context as compact JSON with object keys sorted at every level.
#[must_use]
pub fn canonical_context(context: &ErrorContext) -> String {
    let mut out = String::new();
    write_object(context, &mut out);
    out
}

fn write_object(map: &ErrorContext, out: &mut String) {
    let mut keys: Vec<&String> = map.keys().collect();
    keys.sort();

    out.push('{');
    for (i, key) in keys.into_iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        let _ = write!(out, "{}:", Value::from(key.as_str()));
        if let Some(value) = map.get(key) {
            write_value(value, out);
        }
    }
    out.push('}');
}

fn write_value(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => write_object(map, out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(item, out);
            }
            out.push(']');
        }
        scalar => {
            let _ = write!(out, "{scalar}");
        }
    }
}

/// Normalizes a record. Never fails.
#[must_use]
pub fn normalize(record: &ErrorRecord) -> NormalizedError {
    NormalizedError {
        message: normalize_message(record.message()),
        code: record.code().map(str::to_string),
        file_path: record.file_path().map(normalize_path),
        line_number: record.line_number(),
        stack_trace: record.stack_trace().map(normalize_stack_trace),
        context: record.context().map(canonical_context),
    }
}

/// Computes the fingerprint of a normalized error.
///
/// Covers message, code, file path and stack trace. Line number and context
/// are not hashed.
#[must_use]
pub fn fingerprint(normalized: &NormalizedError) -> Fingerprint {
    let parts = [
        normalized.message.as_str(),
        normalized.code.as_deref().unwrap_or_default(),
        normalized.file_path.as_deref().unwrap_or_default(),
        normalized.stack_trace.as_deref().unwrap_or_default(),
    ];

    let mut hasher = Sha256::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            let mut buf = [0u8; 4];
            hasher.update(FIELD_SEPARATOR.encode_utf8(&mut buf).as_bytes());
        }
        hasher.update(part.as_bytes());
    }

    Fingerprint::from_bytes(hasher.finalize().into())
}

/// Normalizes and fingerprints a record in one step.
#[must_use]
pub fn hash_record(record: &ErrorRecord) -> (Fingerprint, NormalizedError) {
    let normalized = normalize(record);
    (fingerprint(&normalized), normalized)
}
