//! Configuration types for a capture run.
//!
//! Everything that shapes a run (trigger patterns, target cells, export
//! options, delays) lives in [`CaptureConfig`], built via its
//! [`CaptureConfigBuilder`]. Secrets are not part of it; they are read by
//! [`crate::session::Credentials::from_env`] and held by the session.

use crate::error::CaptureError;
use crate::trigger::TriggerRules;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the capture pipeline.
///
/// # Example
/// ```rust
/// use sheetcap::CaptureConfig;
/// use std::time::Duration;
///
/// let config = CaptureConfig::builder()
///     .worksheet("Display")
///     .capture_range("A1:H12")
///     .settle_delay(Duration::from_secs(2))
///     .build()
///     .unwrap();
/// assert_eq!(config.dpi, 200);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Patterns that decide whether a message is a trigger.
    pub trigger: TriggerRules,

    /// Worksheet (display name) that receives the writes and is exported.
    /// Default: `表示1`.
    pub worksheet: String,

    /// A1 address of the category label cell. Default: `C14`.
    pub label_cell: String,

    /// A1 address of the content cell. Default: `C15`.
    pub content_cell: String,

    /// Region rendered to the image. Default: `A1:H12`.
    pub capture_range: String,

    /// Blind wait between the writes and the export. Default: 1 s.
    ///
    /// The spreadsheet offers no signal when dependent formulas have
    /// finished recomputing, so a run that exports too early renders stale
    /// values. Raise this if captures show the previous input.
    pub settle_delay: Duration,

    /// Page layout parameters for the PDF export.
    pub render: RenderOptions,

    /// Rasterisation DPI for the exported page. Range: 72–600. Default: 200.
    pub dpi: u32,

    /// Timeout for the export download in seconds. Default: 30.
    pub export_timeout_secs: u64,

    /// Trim the uniform white margin off the rendered page. Default: true.
    pub autocrop: bool,

    /// File name of the delivered attachment. Default: `spreadsheet_capture.png`.
    pub attachment_name: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            trigger: TriggerRules::default(),
            worksheet: "表示1".to_string(),
            label_cell: "C14".to_string(),
            content_cell: "C15".to_string(),
            capture_range: "A1:H12".to_string(),
            settle_delay: Duration::from_secs(1),
            render: RenderOptions::default(),
            dpi: 200,
            export_timeout_secs: 30,
            autocrop: true,
            attachment_name: "spreadsheet_capture.png".to_string(),
        }
    }
}

impl CaptureConfig {
    /// Create a new builder for `CaptureConfig`.
    pub fn builder() -> CaptureConfigBuilder {
        CaptureConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`CaptureConfig`].
#[derive(Debug)]
pub struct CaptureConfigBuilder {
    config: CaptureConfig,
}

impl CaptureConfigBuilder {
    pub fn trigger(mut self, rules: TriggerRules) -> Self {
        self.config.trigger = rules;
        self
    }

    pub fn worksheet(mut self, name: impl Into<String>) -> Self {
        self.config.worksheet = name.into();
        self
    }

    pub fn label_cell(mut self, a1: impl Into<String>) -> Self {
        self.config.label_cell = a1.into();
        self
    }

    pub fn content_cell(mut self, a1: impl Into<String>) -> Self {
        self.config.content_cell = a1.into();
        self
    }

    pub fn capture_range(mut self, range: impl Into<String>) -> Self {
        self.config.capture_range = range.into();
        self
    }

    pub fn settle_delay(mut self, delay: Duration) -> Self {
        self.config.settle_delay = delay;
        self
    }

    pub fn render(mut self, options: RenderOptions) -> Self {
        self.config.render = options;
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 600);
        self
    }

    pub fn export_timeout_secs(mut self, secs: u64) -> Self {
        self.config.export_timeout_secs = secs.max(1);
        self
    }

    pub fn autocrop(mut self, v: bool) -> Self {
        self.config.autocrop = v;
        self
    }

    pub fn attachment_name(mut self, name: impl Into<String>) -> Self {
        self.config.attachment_name = name.into();
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<CaptureConfig, CaptureError> {
        let c = &self.config;
        if c.worksheet.trim().is_empty() {
            return Err(CaptureError::InvalidConfig(
                "Worksheet name must not be empty".into(),
            ));
        }
        for (what, cell) in [("label cell", &c.label_cell), ("content cell", &c.content_cell)] {
            if !is_a1_cell(cell) {
                return Err(CaptureError::InvalidConfig(format!(
                    "The {what} must be a single A1 address, got '{cell}'"
                )));
            }
        }
        if c.label_cell.eq_ignore_ascii_case(&c.content_cell) {
            return Err(CaptureError::InvalidConfig(
                "Label and content cells must differ".into(),
            ));
        }
        if !is_a1_range(&c.capture_range) {
            return Err(CaptureError::InvalidConfig(format!(
                "Capture range must look like A1:H12, got '{}'",
                c.capture_range
            )));
        }
        if c.trigger.code_prefix.is_empty() {
            return Err(CaptureError::InvalidConfig(
                "Trigger prefix must not be empty".into(),
            ));
        }
        if c.render.scale == 0 || c.render.scale > 4 {
            return Err(CaptureError::InvalidConfig(format!(
                "Export scale must be 1–4, got {}",
                c.render.scale
            )));
        }
        if c.render.margin_inches.is_nan() || c.render.margin_inches <= 0.0 {
            return Err(CaptureError::InvalidConfig(
                "Export margins must be positive; zero margins are ignored by the renderer".into(),
            ));
        }
        if c.attachment_name.trim().is_empty() {
            return Err(CaptureError::InvalidConfig(
                "Attachment name must not be empty".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Export layout ────────────────────────────────────────────────────────

/// Page layout parameters passed to the spreadsheet PDF export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderOptions {
    /// Landscape orientation. Default: true.
    pub landscape: bool,

    /// Export scale: 1 = normal, 2 = fit width, 3 = fit height, 4 = fit page.
    /// Default: 4.
    pub scale: u8,

    /// Draw cell gridlines. Default: true.
    pub gridlines: bool,

    /// Hide the document title, sheet name and page numbers. Default: true.
    pub suppress_furniture: bool,

    /// Page margins in inches on all four sides. Default: 0.00001.
    ///
    /// The export endpoint falls back to its default margins when given
    /// exactly zero, so the smallest positive value is used instead.
    pub margin_inches: f64,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            landscape: true,
            scale: 4,
            gridlines: true,
            suppress_furniture: true,
            margin_inches: 0.00001,
        }
    }
}

fn split_a1(cell: &str) -> Option<(&str, &str)> {
    let idx = cell.find(|c: char| c.is_ascii_digit())?;
    let (col, row) = cell.split_at(idx);
    Some((col, row))
}

/// `true` for a single A1 address such as `C14` or `$C$14`.
fn is_a1_cell(cell: &str) -> bool {
    let cell: String = cell.chars().filter(|&c| c != '$').collect();
    match split_a1(&cell) {
        Some((col, row)) => {
            !col.is_empty()
                && col.chars().all(|c| c.is_ascii_alphabetic())
                && !row.is_empty()
                && row.chars().all(|c| c.is_ascii_digit())
                && row != "0"
        }
        None => false,
    }
}

/// `true` for `A1:H12`-style ranges (or a single cell).
fn is_a1_range(range: &str) -> bool {
    match range.split_once(':') {
        Some((a, b)) => is_a1_cell(a) && is_a1_cell(b),
        None => is_a1_cell(range),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_build() {
        let config = CaptureConfig::builder().build().expect("defaults are valid");
        assert_eq!(config.worksheet, "表示1");
        assert_eq!(config.label_cell, "C14");
        assert_eq!(config.content_cell, "C15");
        assert_eq!(config.capture_range, "A1:H12");
        assert_eq!(config.settle_delay, Duration::from_secs(1));
        assert!(config.autocrop);
        assert!(config.render.margin_inches > 0.0);
    }

    #[test]
    fn dpi_is_clamped() {
        let config = CaptureConfig::builder().dpi(10).build().unwrap();
        assert_eq!(config.dpi, 72);
        let config = CaptureConfig::builder().dpi(5000).build().unwrap();
        assert_eq!(config.dpi, 600);
    }

    #[test]
    fn rejects_bad_cells() {
        assert!(CaptureConfig::builder().label_cell("14C").build().is_err());
        assert!(CaptureConfig::builder().content_cell("C0").build().is_err());
        assert!(CaptureConfig::builder().content_cell("$D$2").build().is_ok());
    }

    #[test]
    fn label_and_content_must_differ() {
        assert!(CaptureConfig::builder().content_cell("c14").build().is_err());
    }

    #[test]
    fn rejects_bad_range() {
        assert!(CaptureConfig::builder().capture_range("A1-H12").build().is_err());
        assert!(CaptureConfig::builder().capture_range("B2:K40").build().is_ok());
    }

    #[test]
    fn rejects_zero_margin() {
        let render = RenderOptions {
            margin_inches: 0.0,
            ..RenderOptions::default()
        };
        let err = CaptureConfig::builder().render(render).build().unwrap_err();
        assert!(err.to_string().contains("margins"));
    }

    #[test]
    fn rejects_empty_worksheet() {
        assert!(CaptureConfig::builder().worksheet("  ").build().is_err());
    }
}
