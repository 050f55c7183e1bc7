//! JSON Output Envelope Types
//!
//! Every `pkgdb` command writes exactly one envelope to stdout.
//!
//! # Output Contract
//! - Success: `{"ok": true, "command": "...", "data": {...}, "meta": {...}}`
//! - Error: `{"ok": false, "command": "...", "error": {"code": "...", "message": "..."}}`

use serde::{Deserialize, Serialize};

use crate::error::PkgDbError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessEnvelope<T> {
    /// Always true for success envelopes
    pub ok: bool,

    /// Command that was executed (`db create`, `db seed`, ...)
    pub command: String,

    pub data: T,

    pub meta: Metadata,
}

impl<T> SuccessEnvelope<T> {
    pub fn new(command: impl Into<String>, data: T, meta: Metadata) -> Self {
        Self { ok: true, command: command.into(), data, meta }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    /// Always false for error envelopes
    pub ok: bool,

    /// Command that was attempted, empty when arguments failed to load
    pub command: String,

    pub error: ErrorInfo,
}

impl ErrorEnvelope {
    pub fn new(command: impl Into<String>, error: ErrorInfo) -> Self {
        Self { ok: false, command: command.into(), error }
    }

    pub fn from_error(command: impl Into<String>, err: &PkgDbError) -> Self {
        Self::new(command, ErrorInfo::new(err.error_code(), err.message()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable error code (e.g., "UNKNOWN_CONNECTION", "NOT_CONNECTED")
    pub code: String,

    /// Human-readable error message, never contains passwords
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self { code: code.into(), message: message.into() }
    }
}

/// Execution metadata included in all success responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    pub execution_ms: u64,

    /// Number of distinct databases touched (None for listing commands)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partitions: Option<usize>,
}

impl Metadata {
    #[must_use]
    pub const fn new(execution_ms: u64) -> Self {
        Self { execution_ms, partitions: None }
    }

    #[must_use]
    pub const fn with_partitions(execution_ms: u64, partitions: usize) -> Self {
        Self { execution_ms, partitions: Some(partitions) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_envelope_serialization() {
        let envelope = SuccessEnvelope::new(
            "db create",
            serde_json::json!([{"dedup_key": "localhost:5432/app"}]),
            Metadata::with_partitions(42, 1),
        );

        let json = serde_json::to_string(&envelope).unwrap();
        assert!(json.contains(r#""ok":true"#));
        assert!(json.contains(r#""command":"db create"#));
        assert!(json.contains(r#""execution_ms":42"#));
        assert!(json.contains(r#""partitions":1"#));
    }

    #[test]
    fn test_error_envelope_from_pkgdb_error() {
        let err = PkgDbError::unknown_connection("wiki", vec!["app1".into()]);
        let envelope = ErrorEnvelope::from_error("db seed", &err);

        assert!(!envelope.ok);
        assert_eq!(envelope.command, "db seed");
        assert_eq!(envelope.error.code, "UNKNOWN_CONNECTION");
        assert!(envelope.error.message.contains("'wiki'"));
        assert!(envelope.error.message.contains("app1"));
    }

    #[test]
    fn test_metadata_without_partitions() {
        let json = serde_json::to_string(&Metadata::new(100)).unwrap();
        assert!(json.contains(r#""execution_ms":100"#));
        assert!(!json.contains("partitions"));
    }
}
