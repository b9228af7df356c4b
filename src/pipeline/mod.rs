//! Pipeline stages for upload-to-table extraction.
//!
//! Each submodule implements exactly one transformation step, so each is
//! testable on its own and the external services (pdfium, the model, the
//! database) sit behind traits at the stage boundaries.
//!
//! ## Data Flow
//!
//! ```text
//! normalize ──▶ encode ──▶ llm ──▶ decode ──▶ mapper ──▶ persist
//! (files→pages)  (base64)   (VLM)   (text→records) (schema)  (store)
//!     │
//!     └─ render (pdfium, spawn_blocking)
//! ```
//!
//! 1. [`normalize`]: classify uploads; photos pass through, PDFs are
//!    rendered page by page via [`render`]
//! 2. [`encode`]: base64-wrap every page for the multimodal request
//! 3. [`llm`]: one model call per batch, with timeout and retry/backoff;
//!    the only stage with network I/O to the model
//! 4. [`decode`]: locate and parse JSON (or split positional lines)
//! 5. [`mapper`]: coerce loose values onto the schema's columns
//! 6. [`persist`]: one transaction per row, outcomes collected

pub mod decode;
pub mod encode;
pub mod llm;
pub mod mapper;
pub mod normalize;
pub mod persist;
pub mod render;
