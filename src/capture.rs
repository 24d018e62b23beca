//! Capture orchestration: the per-message state machine.
//!
//! ```text
//! Idle ─▶ Classified ─▶ Written ─▶ Settled ─▶ Exported ─▶ Cropped ─▶ Delivered
//!              │            │          │          │           │
//!              └────────────┴──────────┴──────────┴───────────┴─▶ Failed(stage, error)
//! ```
//!
//! Messages that are not triggers never enter the machine. Every other run
//! ends with exactly one reply: the image on success, or a text notice
//! naming the failed stage. Errors are logged and converted here; nothing
//! escapes [`CapturePipeline::handle`].
//!
//! The settle step is a blind wait. The spreadsheet gives no signal when
//! dependent formulas have recomputed, and two triggers landing within one
//! settle interval both write the same cells, so the later write wins for
//! both exports.

use crate::config::CaptureConfig;
use crate::delivery::ReplySink;
use crate::error::{error_chain, CaptureError};
use crate::pipeline::encode::{self, CapturedImage};
use crate::pipeline::export::{ExportSpec, PdfExporter, RegionExporter};
use crate::progress::{NoopProgressCallback, ProgressCallback};
use crate::session::Session;
use crate::sheets::{self, CaptureCells, GoogleSheets, SheetsApi};
use crate::trigger::TriggerCategory;
use image::DynamicImage;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// A qualifying inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRequest {
    /// Message text, written to the content cell verbatim.
    pub raw_text: String,
    /// Opaque origin identifier (channel, user, line number) for logs.
    pub source_id: String,
}

impl CaptureRequest {
    pub fn new(raw_text: impl Into<String>, source_id: impl Into<String>) -> Self {
        Self {
            raw_text: raw_text.into(),
            source_id: source_id.into(),
        }
    }
}

/// The stage a run is in when it does work (and where it can fail).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Checking that the pipeline has credentials and a spreadsheet.
    Configuring,
    Writing,
    Settling,
    Exporting,
    Cropping,
    Delivering,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Configuring => "preparing the spreadsheet connection",
            Stage::Writing => "writing to the spreadsheet",
            Stage::Settling => "waiting for the spreadsheet to recalculate",
            Stage::Exporting => "exporting the spreadsheet image",
            Stage::Cropping => "cropping the image",
            Stage::Delivering => "sending the image",
        };
        f.write_str(s)
    }
}

/// Position of a run in the state machine.
#[derive(Debug)]
pub enum CaptureState {
    Classified(TriggerCategory),
    Written,
    Settled,
    Exported(DynamicImage),
    Cropped(CapturedImage),
    Delivered { width: u32, height: u32, bytes: usize, cropped: bool },
}

impl CaptureState {
    /// The stage that moves this state forward, or `None` when terminal.
    pub fn next_stage(&self) -> Option<Stage> {
        match self {
            CaptureState::Classified(_) => Some(Stage::Writing),
            CaptureState::Written => Some(Stage::Settling),
            CaptureState::Settled => Some(Stage::Exporting),
            CaptureState::Exported(_) => Some(Stage::Cropping),
            CaptureState::Cropped(_) => Some(Stage::Delivering),
            CaptureState::Delivered { .. } => None,
        }
    }
}

/// How a message was handled.
#[derive(Debug)]
pub enum CaptureOutcome {
    /// Not a trigger; nothing was done.
    Ignored,
    /// The image was delivered.
    Delivered {
        category: TriggerCategory,
        width: u32,
        height: u32,
        bytes: usize,
        cropped: bool,
    },
    /// The run stopped at `stage`; a text notice was sent.
    Failed { stage: Stage, error: CaptureError },
}

impl CaptureOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, CaptureOutcome::Delivered { .. })
    }
}

/// Spreadsheet-side collaborators of a configured pipeline.
#[derive(Clone)]
pub struct Backend {
    pub spreadsheet_id: String,
    pub sheets: Arc<dyn SheetsApi>,
    pub exporter: Arc<dyn RegionExporter>,
}

impl Backend {
    /// Production backend over a live session.
    pub fn google(session: Arc<Session>, config: &CaptureConfig) -> Self {
        Self {
            spreadsheet_id: session.spreadsheet_id().to_string(),
            sheets: Arc::new(GoogleSheets::new(Arc::clone(&session))),
            exporter: Arc::new(PdfExporter::new(
                session,
                config.dpi,
                config.export_timeout_secs,
            )),
        }
    }
}

/// Runs captures for inbound messages.
///
/// Cheap to share behind an `Arc`; [`handle`](Self::handle) takes `&self`
/// and runs for different messages may overlap.
pub struct CapturePipeline {
    config: CaptureConfig,
    backend: Result<Backend, String>,
    progress: ProgressCallback,
}

impl CapturePipeline {
    pub fn new(config: CaptureConfig, backend: Backend) -> Self {
        Self {
            config,
            backend: Ok(backend),
            progress: Arc::new(NoopProgressCallback),
        }
    }

    /// A pipeline that answers every trigger with a configuration error.
    pub fn unconfigured(config: CaptureConfig, missing: impl Into<String>) -> Self {
        Self {
            config,
            backend: Err(missing.into()),
            progress: Arc::new(NoopProgressCallback),
        }
    }

    /// Build from the environment, degrading to [`Self::unconfigured`] when
    /// credentials or the spreadsheet id are absent or unusable.
    pub fn from_env(config: CaptureConfig) -> (Self, Option<Arc<Session>>) {
        match Session::from_env() {
            Ok(session) => {
                let session = Arc::new(session);
                let backend = Backend::google(Arc::clone(&session), &config);
                (Self::new(config, backend), Some(session))
            }
            Err(e) => {
                warn!("Spreadsheet connection not initialised: {}", e);
                let missing = match e {
                    CaptureError::ConfigurationMissing { what } => what,
                    other => other.to_string(),
                };
                (Self::unconfigured(config, missing), None)
            }
        }
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = progress;
        self
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    pub fn is_configured(&self) -> bool {
        self.backend.is_ok()
    }

    /// Classify `request` and, if it is a trigger, run it to completion.
    pub async fn handle(&self, request: &CaptureRequest, reply: &dyn ReplySink) -> CaptureOutcome {
        let Some(category) = self.config.trigger.classify(&request.raw_text) else {
            debug!("Ignoring non-trigger message from {}", request.source_id);
            return CaptureOutcome::Ignored;
        };
        info!(
            "Trigger {:?} from {} ({} chars)",
            category,
            request.source_id,
            request.raw_text.chars().count()
        );
        self.progress.on_capture_start(category);

        let backend = match &self.backend {
            Ok(backend) => backend,
            Err(missing) => {
                let error = CaptureError::ConfigurationMissing {
                    what: missing.clone(),
                };
                return self.fail(request, reply, Stage::Configuring, error).await;
            }
        };

        let start = Instant::now();
        let mut state = CaptureState::Classified(category);
        while let Some(stage) = state.next_stage() {
            self.progress.on_stage_start(stage);
            debug!("{}: {}", request.source_id, stage);
            state = match self.advance(backend, request, reply, state).await {
                Ok(next) => next,
                Err(error) => return self.fail(request, reply, stage, error).await,
            };
        }

        let CaptureState::Delivered {
            width,
            height,
            bytes,
            cropped,
        } = state
        else {
            let error = CaptureError::Internal(format!("run stopped in state {state:?}"));
            return self.fail(request, reply, Stage::Delivering, error).await;
        };
        info!(
            "Capture for {} delivered: {}x{} px, {} bytes, {}ms",
            request.source_id,
            width,
            height,
            bytes,
            start.elapsed().as_millis()
        );
        self.progress.on_capture_complete(width, height, bytes);

        CaptureOutcome::Delivered {
            category,
            width,
            height,
            bytes,
            cropped,
        }
    }

    /// Apply the transition leaving `state`.
    async fn advance(
        &self,
        backend: &Backend,
        request: &CaptureRequest,
        reply: &dyn ReplySink,
        state: CaptureState,
    ) -> Result<CaptureState, CaptureError> {
        match state {
            CaptureState::Classified(category) => self.write(backend, category, request).await,
            CaptureState::Written => self.settle().await,
            CaptureState::Settled => self.export(backend).await,
            CaptureState::Exported(raw) => self.crop(raw),
            CaptureState::Cropped(captured) => self.deliver(reply, captured).await,
            CaptureState::Delivered { .. } => Err(CaptureError::Internal(
                "delivered run advanced again".into(),
            )),
        }
    }

    /// Classified → Written
    async fn write(
        &self,
        backend: &Backend,
        category: TriggerCategory,
        request: &CaptureRequest,
    ) -> Result<CaptureState, CaptureError> {
        let cells = CaptureCells {
            worksheet: &self.config.worksheet,
            label_cell: &self.config.label_cell,
            content_cell: &self.config.content_cell,
        };
        sheets::write_capture(backend.sheets.as_ref(), cells, category, &request.raw_text).await?;
        Ok(CaptureState::Written)
    }

    /// Written → Settled
    async fn settle(&self) -> Result<CaptureState, CaptureError> {
        tokio::time::sleep(self.config.settle_delay).await;
        Ok(CaptureState::Settled)
    }

    /// Settled → Exported
    async fn export(&self, backend: &Backend) -> Result<CaptureState, CaptureError> {
        let sheet_id = backend.sheets.sheet_id(&self.config.worksheet).await?;
        let spec = ExportSpec {
            spreadsheet_id: backend.spreadsheet_id.clone(),
            sheet_id,
            range: self.config.capture_range.clone(),
            options: self.config.render.clone(),
        };
        let raw = backend.exporter.export_region(&spec).await?;
        info!("Exported {} → {}x{} px", spec.range, raw.width(), raw.height());
        Ok(CaptureState::Exported(raw))
    }

    /// Exported → Cropped
    fn crop(&self, raw: DynamicImage) -> Result<CaptureState, CaptureError> {
        let captured = encode::finish_capture(raw, self.config.autocrop)?;
        if let Some(b) = captured.crop {
            debug!(
                "Cropped to ({}, {})–({}, {})",
                b.left, b.top, b.right, b.bottom
            );
        }
        Ok(CaptureState::Cropped(captured))
    }

    /// Cropped → Delivered
    async fn deliver(
        &self,
        reply: &dyn ReplySink,
        captured: CapturedImage,
    ) -> Result<CaptureState, CaptureError> {
        let (width, height, cropped) = (captured.width(), captured.height(), captured.was_cropped());
        let bytes = captured.png.len();
        reply
            .send_image(&self.config.attachment_name, captured.png)
            .await?;
        Ok(CaptureState::Delivered {
            width,
            height,
            bytes,
            cropped,
        })
    }

    /// Log `error`, tell the origin, and end the run.
    async fn fail(
        &self,
        request: &CaptureRequest,
        reply: &dyn ReplySink,
        stage: Stage,
        error: CaptureError,
    ) -> CaptureOutcome {
        let detail = error_chain(&error);
        error!(
            "Capture for {} failed while {}: {}\n{:#?}",
            request.source_id, stage, detail, error
        );
        self.progress.on_stage_failed(stage, &detail);

        let notice = error.user_message(stage);
        if let Err(e) = reply.send_text(&notice).await {
            error!(
                "Could not deliver failure notice to {}: {:?}",
                request.source_id, e
            );
        }
        CaptureOutcome::Failed { stage, error }
    }
}
