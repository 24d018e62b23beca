//! Progress-callback trait for capture stage events.
//!
//! Inject an [`Arc<dyn CaptureProgressCallback>`] into
//! [`crate::capture::CapturePipeline::with_progress`] to observe a run as it
//! moves through its stages. The CLI uses this for its spinner; a chat
//! adapter could use it to show a typing indicator.
//!
//! # Example
//!
//! ```rust
//! use sheetcap::{CaptureProgressCallback, Stage};
//! use std::sync::{Arc, Mutex};
//!
//! struct StageLog(Mutex<Vec<Stage>>);
//!
//! impl CaptureProgressCallback for StageLog {
//!     fn on_stage_start(&self, stage: Stage) {
//!         self.0.lock().unwrap().push(stage);
//!     }
//! }
//!
//! let log = Arc::new(StageLog(Mutex::new(Vec::new())));
//! log.on_stage_start(Stage::Writing);
//! assert_eq!(log.0.lock().unwrap().len(), 1);
//! ```

use crate::capture::Stage;
use crate::trigger::TriggerCategory;
use std::sync::Arc;

/// Called by the capture pipeline as a run advances.
///
/// Runs for different messages may overlap, so implementations must be
/// `Send + Sync`. All methods default to no-ops.
pub trait CaptureProgressCallback: Send + Sync {
    /// Called once when a message has been classified as a trigger.
    fn on_capture_start(&self, category: TriggerCategory) {
        let _ = category;
    }

    /// Called when a stage begins.
    fn on_stage_start(&self, stage: Stage) {
        let _ = stage;
    }

    /// Called when a run stops at `stage`.
    ///
    /// # Arguments
    /// * `stage` — stage that failed
    /// * `error` — human-readable error description
    fn on_stage_failed(&self, stage: Stage, error: &str) {
        let _ = (stage, error);
    }

    /// Called once after the image was handed to the reply sink.
    ///
    /// # Arguments
    /// * `width`, `height` — final image size in pixels
    /// * `bytes`           — PNG size
    fn on_capture_complete(&self, width: u32, height: u32, bytes: usize) {
        let _ = (width, height, bytes);
    }
}

/// A no-op implementation; the default when no callback is configured.
pub struct NoopProgressCallback;

impl CaptureProgressCallback for NoopProgressCallback {}

/// Convenience alias for the type stored by the pipeline.
pub type ProgressCallback = Arc<dyn CaptureProgressCallback>;
