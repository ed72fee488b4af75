//! Error types for the spinsheet library.
//!
//! Three error types reflect three distinct failure sites:
//!
//! * [`SpinsheetError`]: **Fatal**: the request cannot produce a report
//!   (upstream refused the upload, no export link, malformed CSV row). The
//!   HTTP handler turns it into a `500` whose body is the error's `Display`.
//!
//! * [`DecodeError`]: a single CSV row could not be turned into a
//!   [`crate::record::ClassRecord`]. The decoder stops at the first one; the
//!   pipeline wraps it in [`SpinsheetError::Decode`].
//!
//! * [`RenderError`]: the presentation template could not be evaluated.
//!   By the time rendering starts the response status is already decided, so
//!   this one is logged rather than returned to the client.

use axum::http::StatusCode;
use thiserror::Error;

/// All fatal errors returned by the spinsheet pipeline.
#[derive(Debug, Error)]
pub enum SpinsheetError {
    // ── Request errors ────────────────────────────────────────────────────
    /// The incoming form had no `file` field.
    #[error("missing form field 'file'")]
    MissingUpload,

    /// The multipart body could not be read.
    #[error("could not read upload: {0}")]
    BadUpload(String),

    /// The request body is larger than `max_upload_bytes`.
    #[error("upload too large: {0}")]
    UploadTooLarge(String),

    // ── Upstream errors ───────────────────────────────────────────────────
    /// Network, DNS or timeout failure talking to the storage API.
    #[error("{stage} request failed: {reason}")]
    Transport { stage: &'static str, reason: String },

    /// The storage API answered with a non-success status.
    ///
    /// `Display` is the upstream body verbatim so the client sees exactly
    /// what the storage API said.
    #[error("{body}")]
    UpstreamStatus {
        stage: &'static str,
        status: u16,
        body: String,
    },

    /// The upload response was not `{ "id": ..., "exportLinks": {...} }`.
    #[error("unexpected upload response: {0}")]
    InvalidUploadResponse(String),

    /// The converted document offered no PDF export link to rewrite.
    #[error("no export link")]
    MissingExportLink,

    /// The credential provider could not produce a bearer token.
    #[error("could not obtain credentials: {0}")]
    Credentials(String),

    // ── Content errors ────────────────────────────────────────────────────
    /// A CSV row was malformed; decoding stopped there.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// A running total no longer fits in an `i64`.
    #[error("total {column} overflows after {records} records")]
    TotalOverflow { column: &'static str, records: u64 },

    /// The presentation template failed part-way.
    #[error(transparent)]
    Render(#[from] RenderError),

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error (task panic, closed channel).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SpinsheetError {
    /// HTTP status the upload handler answers with for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            SpinsheetError::MissingUpload | SpinsheetError::BadUpload(_) => {
                StatusCode::BAD_REQUEST
            }
            SpinsheetError::UploadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Build a transport error from a `reqwest` failure at `stage`.
    pub(crate) fn transport(stage: &'static str, err: reqwest::Error) -> Self {
        SpinsheetError::Transport {
            stage,
            reason: err.to_string(),
        }
    }
}

/// A CSV row that could not be decoded.
///
/// `line` is the 1-based line number in the CSV text (the header is line 1).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    /// The header row itself could not be read.
    #[error("CSV header unreadable: {detail}")]
    Header { detail: String },

    /// The row has a different number of cells than the header.
    #[error("CSV line {line}: expected {expected} fields, found {found}")]
    FieldCount {
        line: u64,
        expected: u64,
        found: u64,
    },

    /// A numeric column held text that is not a number.
    #[error("CSV line {line}: column '{column}' has non-numeric value {value:?}")]
    InvalidNumber {
        line: u64,
        column: String,
        value: String,
    },

    /// Low-level CSV syntax or I/O failure.
    #[error("CSV line {line}: {detail}")]
    Malformed { line: u64, detail: String },
}

/// The presentation template could not be evaluated.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RenderError {
    /// The template references a placeholder the renderer does not provide.
    #[error("template placeholder '{{{{{name}}}}}' is not defined")]
    UnknownPlaceholder { name: String },

    /// Serialising the report to JSON failed.
    #[error("could not serialise report: {0}")]
    Serialise(String),
}
