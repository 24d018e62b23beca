//! PDF rasterisation: render the first page of an exported PDF via pdfium.
//!
//! pdfium wraps a C++ library with thread-local state, so all work happens
//! inside `tokio::task::spawn_blocking`. The library is bound per call:
//! `PDFIUM_LIB_PATH` (a file or the directory holding it) first, then the
//! system library search path.

use crate::error::CaptureError;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::PathBuf;
use tracing::{debug, info};

/// Rasterise page one of `pdf` at `dpi`.
pub async fn render_first_page(pdf: Vec<u8>, dpi: u32) -> Result<DynamicImage, CaptureError> {
    if !pdf.starts_with(b"%PDF") {
        let head: Vec<u8> = pdf.iter().take(4).copied().collect();
        return Err(CaptureError::DecodeFailed(format!(
            "payload is not a PDF (first bytes: {:?})",
            String::from_utf8_lossy(&head)
        )));
    }

    tokio::task::spawn_blocking(move || render_first_page_blocking(pdf, dpi))
        .await
        .map_err(|e| CaptureError::Internal(format!("Render task panicked: {}", e)))?
}

/// Locate and bind the pdfium shared library.
pub fn bind_pdfium() -> Result<Pdfium, CaptureError> {
    let bindings = match std::env::var_os("PDFIUM_LIB_PATH") {
        Some(path) => {
            let path = PathBuf::from(path);
            let lib = if path.is_dir() {
                Pdfium::pdfium_platform_library_name_at_path(&path)
            } else {
                path
            };
            debug!("Binding pdfium from {}", lib.display());
            Pdfium::bind_to_library(&lib)
        }
        None => Pdfium::bind_to_system_library(),
    }
    .map_err(|e| CaptureError::PdfiumBindingFailed(format!("{:?}", e)))?;

    Ok(Pdfium::new(bindings))
}

/// Blocking implementation of first-page rendering.
fn render_first_page_blocking(pdf: Vec<u8>, dpi: u32) -> Result<DynamicImage, CaptureError> {
    let pdfium = bind_pdfium()?;

    let document = pdfium
        .load_pdf_from_byte_vec(pdf, None)
        .map_err(|e| CaptureError::DecodeFailed(format!("{:?}", e)))?;

    let pages = document.pages();
    if pages.len() == 0 {
        return Err(CaptureError::DecodeFailed("document has no pages".into()));
    }
    info!("PDF loaded: {} pages, rendering page 1", pages.len());

    let page = pages
        .get(0)
        .map_err(|e| CaptureError::DecodeFailed(format!("{:?}", e)))?;

    let render_config = PdfRenderConfig::new().scale_page_by_factor(dpi as f32 / 72.0);

    let bitmap = page
        .render_with_config(&render_config)
        .map_err(|e| CaptureError::DecodeFailed(format!("{:?}", e)))?;

    let image = bitmap.as_image();
    debug!(
        "Rendered page 1 at {} DPI → {}x{} px",
        dpi,
        image.width(),
        image.height()
    );

    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn non_pdf_payload_is_rejected_before_pdfium() {
        let err = render_first_page(b"<html>login</html>".to_vec(), 200)
            .await
            .unwrap_err();
        match err {
            CaptureError::DecodeFailed(detail) => assert!(detail.contains("<htm")),
            other => panic!("unexpected {other:?}"),
        }
    }
}
