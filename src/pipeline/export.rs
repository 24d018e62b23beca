//! Region export: download a worksheet range as PDF and rasterise page one.
//!
//! The spreadsheet service only offers high-fidelity rendering through its
//! paginated PDF export, so a capture is a PDF round trip: build the export
//! URL, fetch it with the session's bearer token, then hand the bytes to
//! [`super::render`]. The capture range is laid out to fit one page, so only
//! the first page is ever rendered.

use crate::config::RenderOptions;
use crate::error::{export_transport_error, CaptureError};
use crate::pipeline::render;
use crate::session::Session;
use async_trait::async_trait;
use image::DynamicImage;
use reqwest::{StatusCode, Url};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Max characters of an error body kept for diagnostics.
const SNIPPET_CHARS: usize = 500;

/// Everything needed to export one region.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportSpec {
    pub spreadsheet_id: String,
    /// Numeric worksheet id (`gid`), not the display name.
    pub sheet_id: u64,
    /// A1 range such as `A1:H12`.
    pub range: String,
    pub options: RenderOptions,
}

impl ExportSpec {
    /// Build the export URL under `docs_root`.
    pub fn url(&self, docs_root: &str) -> Result<Url, CaptureError> {
        let base = format!(
            "{}/spreadsheets/d/{}/export",
            docs_root.trim_end_matches('/'),
            self.spreadsheet_id
        );
        let margin = format_margin(self.options.margin_inches);
        let furniture = (!self.options.suppress_furniture).to_string();

        let params: Vec<(&str, String)> = vec![
            ("format", "pdf".to_string()),
            ("gid", self.sheet_id.to_string()),
            ("range", self.range.clone()),
            ("portrait", (!self.options.landscape).to_string()),
            ("scale", self.options.scale.to_string()),
            ("gridlines", self.options.gridlines.to_string()),
            ("printtitle", furniture.clone()),
            ("sheetnames", furniture.clone()),
            ("pagenumbers", furniture),
            ("attachment", "false".to_string()),
            ("top_margin", margin.clone()),
            ("bottom_margin", margin.clone()),
            ("left_margin", margin.clone()),
            ("right_margin", margin),
        ];

        Url::parse_with_params(&base, &params)
            .map_err(|e| CaptureError::InvalidConfig(format!("export URL: {e}")))
    }
}

/// Render `f64` margins without exponent notation (`0.00001`, not `1e-5`).
fn format_margin(inches: f64) -> String {
    let s = format!("{inches:.5}");
    let s = s.trim_end_matches('0').trim_end_matches('.');
    if s.is_empty() || s == "0" {
        "0.00001".to_string()
    } else {
        s.to_string()
    }
}

/// Truncate a response body to a printable snippet.
pub(crate) fn snippet(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    let mut out: String = text.chars().take(SNIPPET_CHARS).collect();
    if text.chars().count() > SNIPPET_CHARS {
        out.push('\u{2026}');
    }
    out
}

/// Produces a raster image of a worksheet region.
#[async_trait]
pub trait RegionExporter: Send + Sync {
    async fn export_region(&self, spec: &ExportSpec) -> Result<DynamicImage, CaptureError>;
}

/// Production exporter: PDF export over HTTPS, rasterised with pdfium.
#[derive(Debug, Clone)]
pub struct PdfExporter {
    session: Arc<Session>,
    dpi: u32,
    timeout_secs: u64,
}

impl PdfExporter {
    pub fn new(session: Arc<Session>, dpi: u32, timeout_secs: u64) -> Self {
        Self {
            session,
            dpi,
            timeout_secs,
        }
    }

    /// Download the PDF bytes for `spec`.
    pub async fn download(&self, spec: &ExportSpec) -> Result<Vec<u8>, CaptureError> {
        let url = spec.url(&self.session.endpoints().docs)?;
        debug!("PDF export URL: {}", url);

        let token = self.session.access_token().await?;
        let result = fetch_pdf(self.session.http(), url, &token, self.timeout_secs).await;
        if let Err(CaptureError::ExportFailed { status: 401, .. }) = &result {
            self.session.invalidate_token().await;
        }
        result
    }
}

/// GET the export URL with a bearer token and validate the response.
pub async fn fetch_pdf(
    http: &reqwest::Client,
    url: Url,
    token: &str,
    timeout_secs: u64,
) -> Result<Vec<u8>, CaptureError> {
    let response = http
        .get(url)
        .bearer_auth(token)
        .timeout(Duration::from_secs(timeout_secs))
        .send()
        .await
        .map_err(|e| export_transport_error(e, timeout_secs))?;

    let status = response.status();
    let body = response
        .bytes()
        .await
        .map_err(|e| export_transport_error(e, timeout_secs))?;

    check_export_response(status, &body)?;
    info!("Downloaded PDF export: {} bytes", body.len());
    Ok(body.to_vec())
}

/// Classify an export response by status and body.
pub fn check_export_response(status: StatusCode, body: &[u8]) -> Result<(), CaptureError> {
    if status == StatusCode::FORBIDDEN {
        warn!("PDF export refused with HTTP 403");
        return Err(CaptureError::PermissionDenied {
            message: format!("HTTP 403 from the export endpoint: {}", snippet(body)),
        });
    }
    if !status.is_success() {
        let snippet = snippet(body);
        warn!("PDF export failed: HTTP {} body={}", status.as_u16(), snippet);
        return Err(CaptureError::ExportFailed {
            status: status.as_u16(),
            snippet,
        });
    }
    if body.is_empty() {
        return Err(CaptureError::EmptyPayload);
    }
    Ok(())
}

#[async_trait]
impl RegionExporter for PdfExporter {
    async fn export_region(&self, spec: &ExportSpec) -> Result<DynamicImage, CaptureError> {
        let pdf = self.download(spec).await?;
        render::render_first_page(pdf, self.dpi).await
    }
}
