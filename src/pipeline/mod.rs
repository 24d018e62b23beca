//! Image-producing stages of a capture.
//!
//! Each submodule implements exactly one transformation step so each can be
//! tested without the network or pdfium.
//!
//! ## Data Flow
//!
//! ```text
//! export ──▶ render ──▶ crop ──▶ encode
//! (HTTPS PDF) (pdfium)  (bbox)   (PNG)
//! ```
//!
//! 1. [`export`] — build the PDF export URL and download it; the only stage
//!    with network I/O
//! 2. [`render`] — rasterise page one; runs in `spawn_blocking` because
//!    pdfium is not async-safe
//! 3. [`crop`]   — trim the white margin around the content
//! 4. [`encode`] — PNG-encode the final image

pub mod crop;
pub mod encode;
pub mod export;
pub mod render;
