//! # sheetcap
//!
//! Turn chat messages into spreadsheet screenshots.
//!
//! When a message qualifies as a trigger (a `KCG-` deck code, or a deck list
//! with exactly 59 `/` separators), sheetcap writes it into a Google Sheet,
//! waits for the sheet's formulas to recompute, exports a fixed range as
//! PDF, rasterises the first page, trims the white margin and replies with
//! the PNG.
//!
//! ## Pipeline Overview
//!
//! ```text
//! message
//!  │
//!  ├─ 1. Classify  code form / list form / ignore
//!  ├─ 2. Write     label cell, then content cell (Sheets v4)
//!  ├─ 3. Settle    fixed delay while the sheet recalculates
//!  ├─ 4. Export    PDF export of the capture range (bearer token)
//!  ├─ 5. Render    page 1 → bitmap via pdfium (spawn_blocking)
//!  ├─ 6. Crop      bounding box of non-white pixels
//!  └─ 7. Deliver   PNG attachment, or a text notice on failure
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sheetcap::{CaptureConfig, CapturePipeline, CaptureRequest, DirectorySink};
//!
//! #[tokio::main]
//! async fn main() {
//!     // Reads GOOGLE_SHEETS_CREDENTIALS and SPREADSHEET_ID.
//!     let (pipeline, session) = CapturePipeline::from_env(CaptureConfig::default());
//!     let sink = DirectorySink::new("captures");
//!     let outcome = pipeline
//!         .handle(&CaptureRequest::new("KCG-ABCDEF", "stdin"), &sink)
//!         .await;
//!     println!("{outcome:?}");
//!     if let Some(session) = session {
//!         session.shutdown().await;
//!     }
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature   | Default | Description |
//! |-----------|---------|-------------|
//! | `cli`     | on      | Enables the `sheetcap` binary (clap + anyhow + tracing-subscriber) |
//! | `discord` | off     | Adds a Discord gateway transport (`sheetcap discord`) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod capture;
pub mod config;
pub mod delivery;
#[cfg(feature = "discord")]
pub mod discord;
pub mod error;
pub mod pipeline;
pub mod progress;
pub mod session;
pub mod sheets;
#[cfg(test)]
mod test_support;
pub mod trigger;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use capture::{Backend, CaptureOutcome, CapturePipeline, CaptureRequest, CaptureState, Stage};
pub use config::{CaptureConfig, CaptureConfigBuilder, RenderOptions};
pub use delivery::{DirectorySink, ReplySink};
pub use error::CaptureError;
pub use pipeline::crop::{auto_crop, BoundingBox};
pub use pipeline::encode::CapturedImage;
pub use pipeline::export::{ExportSpec, PdfExporter, RegionExporter};
pub use progress::{CaptureProgressCallback, NoopProgressCallback, ProgressCallback};
pub use session::{Credentials, Endpoints, Session};
pub use sheets::{GoogleSheets, SheetsApi};
pub use trigger::{classify, TriggerCategory, TriggerRules};
