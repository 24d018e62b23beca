//! Error types for the sheetcap library.
//!
//! A single [`CaptureError`] covers every way a capture run can stop. Each
//! variant is raised at exactly one stage boundary and carries what the
//! operator needs to diagnose it. The orchestrator never propagates these
//! upward: it logs them and turns them into one chat reply via
//! [`CaptureError::user_message`].

use crate::capture::Stage;
use thiserror::Error;

/// All failures a capture run can end with.
#[derive(Debug, Error)]
pub enum CaptureError {
    // ── Config errors ─────────────────────────────────────────────────────
    /// A required environment value (credential, spreadsheet id) is absent.
    #[error("Configuration missing: {what}\nSet it in the environment and restart.")]
    ConfigurationMissing { what: String },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Spreadsheet errors ────────────────────────────────────────────────
    /// The named worksheet does not exist in the spreadsheet.
    #[error("Worksheet '{name}' not found")]
    WorksheetNotFound { name: String },

    /// The Sheets API rejected a cell write or metadata read.
    #[error("Spreadsheet API error (code {code:?}): {message}")]
    WriteFailed { code: Option<u16>, message: String },

    /// The remote service answered 403 for a write or an export.
    #[error("Permission denied by the spreadsheet service: {message}")]
    PermissionDenied { message: String },

    // ── Auth errors ───────────────────────────────────────────────────────
    /// No usable access token could be obtained.
    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    // ── Export errors ─────────────────────────────────────────────────────
    /// The export endpoint answered with a non-2xx status.
    #[error("PDF export failed with HTTP {status}: {snippet}")]
    ExportFailed { status: u16, snippet: String },

    /// The export request exceeded its timeout.
    #[error("PDF export timed out after {secs}s")]
    ExportTimeout { secs: u64 },

    /// The export endpoint answered 2xx with an empty body.
    #[error("Downloaded PDF is empty")]
    EmptyPayload,

    /// The downloaded document could not be rasterised.
    #[error("Could not decode the exported PDF: {0}")]
    DecodeFailed(String),

    // ── Pdfium binding errors ─────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium or install pdfium system-wide."
    )]
    PdfiumBindingFailed(String),

    // ── Transport errors ──────────────────────────────────────────────────
    /// A remote service could not be reached at all (connect, DNS, TLS).
    ///
    /// The display text names the service only; the cause is in `source`,
    /// rendered with [`error_chain`].
    #[error("Could not reach the {service}")]
    Unreachable {
        service: &'static str,
        #[source]
        source: reqwest::Error,
    },

    /// The chat transport could not deliver a reply or stay connected.
    #[error("Transport error: {0}")]
    Transport(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CaptureError {
    /// Whether this error stems from the remote service refusing access.
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, CaptureError::PermissionDenied { .. })
    }

    /// Render the single chat reply sent back when a run fails at `stage`.
    pub fn user_message(&self, stage: Stage) -> String {
        match self {
            CaptureError::ConfigurationMissing { what } => format!(
                "Error: the spreadsheet connection is not configured ({what}). Check the bot settings."
            ),
            CaptureError::WorksheetNotFound { name } => {
                format!("Error: worksheet '{name}' was not found ({stage}).")
            }
            CaptureError::PermissionDenied { message } => format!(
                "No permission to write to or read the spreadsheet. \
                 Check the sheet's sharing settings and that the API is enabled.\nError: {message}"
            ),
            CaptureError::WriteFailed { code: Some(code), message } => format!(
                "A spreadsheet API error occurred while {stage} (code: {code}): {message}"
            ),
            CaptureError::WriteFailed { code: None, message } => {
                format!("A spreadsheet API error occurred while {stage}: {message}")
            }
            CaptureError::AuthFailed(cause) => format!(
                "Could not authenticate with the spreadsheet service while {stage}: {cause}"
            ),
            CaptureError::ExportFailed { status, snippet } => format!(
                "Failed to generate the image: the export failed (HTTP {status}) while {stage}: {snippet}"
            ),
            CaptureError::ExportTimeout { secs } => format!(
                "Failed to generate the image: the export timed out after {secs}s while {stage}."
            ),
            CaptureError::EmptyPayload => format!(
                "Failed to generate the image: the exported PDF was empty ({stage})."
            ),
            CaptureError::DecodeFailed(cause) => format!(
                "Failed to generate the image: could not decode page 1 of the export: {cause}"
            ),
            CaptureError::PdfiumBindingFailed(cause) => format!(
                "Failed to generate the image: the PDF renderer is not available: {cause}"
            ),
            CaptureError::Unreachable { .. } => {
                format!("Error while {stage}: {}", error_chain(self))
            }
            other => format!("An unexpected error occurred while {stage}: {other}"),
        }
    }
}

/// Render `err` followed by every `source()` below it, joined with `: `.
///
/// reqwest's own display text stops at "error sending request"; the useful
/// part (connection refused, DNS, TLS) lives further down the chain.
pub fn error_chain(err: &dyn std::error::Error) -> String {
    let mut out = err.to_string();
    let mut next = err.source();
    while let Some(cause) = next {
        let text = cause.to_string();
        if !out.ends_with(&text) {
            out.push_str(": ");
            out.push_str(&text);
        }
        next = cause.source();
    }
    out
}

/// Map a reqwest transport error into the export taxonomy.
pub(crate) fn export_transport_error(e: reqwest::Error, timeout_secs: u64) -> CaptureError {
    if e.is_timeout() {
        CaptureError::ExportTimeout { secs: timeout_secs }
    } else if let Some(status) = e.status() {
        CaptureError::ExportFailed {
            status: status.as_u16(),
            snippet: error_chain(&e),
        }
    } else {
        CaptureError::Unreachable {
            service: "export endpoint",
            source: e,
        }
    }
}
