//! Upload normalisation: turn a mixed batch of photos and PDFs into a flat,
//! ordered list of page images.
//!
//! ## Classification order
//!
//! 1. File extension (what the user's device called it)
//! 2. Declared MIME type (what the browser called it)
//! 3. Magic bytes (what it actually is)
//!
//! A PDF is only accepted when its first bytes are `%PDF`; a mislabelled
//! file is skipped rather than handed to pdfium. Anything unrecognised is
//! skipped with a warning, never an error, so one stray `.docx` in a batch
//! of photos does not cost the user the whole upload.
//!
//! ## Why a scratch directory?
//!
//! pdfium opens documents from a file-system path. Uploaded PDFs are written
//! into a `TempDir` owned by the returned [`NormalizedBatch`]; dropping the
//! batch removes the directory, on success and error paths alike.

use crate::error::LedgerError;
use crate::pipeline::encode::png_bytes;
use crate::pipeline::render::{render_document, PageRasterizer};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// One file from a multipart upload.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub filename: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl UploadedFile {
    pub fn new(
        filename: impl Into<String>,
        content_type: Option<&str>,
        bytes: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            filename: filename.into(),
            content_type: content_type.map(str::to_string),
            bytes: bytes.into(),
        }
    }
}

/// Every file received under the upload field, in request order.
#[derive(Debug, Clone, Default)]
pub struct UploadBatch {
    pub files: Vec<UploadedFile>,
    /// Whether the request carried the upload field at all.
    pub field_present: bool,
}

impl UploadBatch {
    pub fn new(files: Vec<UploadedFile>) -> Self {
        Self {
            field_present: true,
            files,
        }
    }

    /// Reject requests with no upload field, or only nameless files.
    pub fn validate(&self) -> Result<(), LedgerError> {
        if !self.field_present {
            warn!("No files in request");
            return Err(LedgerError::NoFilesUploaded);
        }
        if self.files.iter().all(|f| f.filename.trim().is_empty()) {
            warn!("Empty file list or no valid files");
            return Err(LedgerError::NoValidFiles);
        }
        Ok(())
    }
}

/// One raster image ready for the model.
#[derive(Debug, Clone)]
pub struct NormalizedPage {
    pub content: Vec<u8>,
    pub mime_type: String,
    pub source_filename: String,
    /// 0-based page within the source file (always 0 for photos).
    pub page_index: usize,
}

/// A file the normaliser dropped, and why.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SkippedFile {
    pub filename: String,
    pub reason: String,
}

/// The normaliser's output. Holds the scratch directory alive.
#[derive(Debug)]
pub struct NormalizedBatch {
    pub pages: Vec<NormalizedPage>,
    pub skipped: Vec<SkippedFile>,
    scratch: Option<TempDir>,
}

impl NormalizedBatch {
    /// Scratch directory, if any PDF needed one.
    pub fn scratch_dir(&self) -> Option<&Path> {
        self.scratch.as_ref().map(|d| d.path())
    }
}

/// What a file was recognised as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileClass {
    Image { mime_type: String },
    Pdf,
    Unsupported(String),
}

const IMAGE_EXTENSIONS: &[(&str, &str)] = &[
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("webp", "image/webp"),
    ("gif", "image/gif"),
    ("bmp", "image/bmp"),
    ("heic", "image/heic"),
    ("heif", "image/heif"),
];

/// Classify an upload by extension, declared MIME type, then magic bytes.
pub fn classify(file: &UploadedFile) -> FileClass {
    if file.bytes.is_empty() {
        return FileClass::Unsupported("empty file".into());
    }
    let is_pdf_magic = file.bytes.starts_with(b"%PDF");

    let ext = Path::new(&file.filename)
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase());
    let declared = file
        .content_type
        .as_deref()
        .map(|m| m.split(';').next().unwrap_or(m).trim().to_ascii_lowercase());

    let says_pdf = ext.as_deref() == Some("pdf") || declared.as_deref() == Some("application/pdf");
    if says_pdf {
        return if is_pdf_magic {
            FileClass::Pdf
        } else {
            FileClass::Unsupported("declared as PDF but does not start with %PDF".into())
        };
    }

    if let Some(mime) = ext.as_deref().and_then(|e| {
        IMAGE_EXTENSIONS
            .iter()
            .find(|(known, _)| *known == e)
            .map(|(_, mime)| *mime)
    }) {
        return FileClass::Image {
            mime_type: mime.to_string(),
        };
    }

    if let Some(mime) = declared.as_deref().filter(|m| {
        IMAGE_EXTENSIONS.iter().any(|(_, known)| known == m)
    }) {
        return FileClass::Image {
            mime_type: mime.to_string(),
        };
    }

    if is_pdf_magic {
        return FileClass::Pdf;
    }
    if let Ok(format) = image::guess_format(&file.bytes) {
        return FileClass::Image {
            mime_type: format.to_mime_type().to_string(),
        };
    }

    FileClass::Unsupported(format!(
        "unrecognised type (extension {:?}, content type {:?})",
        ext.unwrap_or_default(),
        declared.unwrap_or_default()
    ))
}

/// Normalise an upload batch into page images.
///
/// Photos pass through untouched; each PDF page becomes one PNG. Fails with
/// [`LedgerError::NoProcessableFiles`] when nothing usable remains.
pub async fn normalize(
    files: &[UploadedFile],
    rasterizer: Arc<dyn PageRasterizer>,
) -> Result<NormalizedBatch, LedgerError> {
    let mut pages = Vec::new();
    let mut skipped = Vec::new();
    let mut scratch: Option<TempDir> = None;

    for (file_idx, file) in files.iter().enumerate() {
        match classify(file) {
            FileClass::Image { mime_type } => {
                debug!("{}: image ({}, {} bytes)", file.filename, mime_type, file.bytes.len());
                pages.push(NormalizedPage {
                    content: file.bytes.clone(),
                    mime_type,
                    source_filename: file.filename.clone(),
                    page_index: 0,
                });
            }
            FileClass::Pdf => {
                let dir = match scratch {
                    Some(ref dir) => dir.path().to_path_buf(),
                    None => {
                        let dir = TempDir::new().map_err(|e| LedgerError::Internal(e.to_string()))?;
                        let path = dir.path().to_path_buf();
                        scratch = Some(dir);
                        path
                    }
                };
                // Indexed name: two uploads may share a filename.
                let pdf_path = dir.join(format!("upload-{file_idx}.pdf"));
                tokio::fs::write(&pdf_path, &file.bytes).await.map_err(|e| {
                    LedgerError::Internal(format!("Failed to write scratch file: {}", e))
                })?;

                let images = render_document(Arc::clone(&rasterizer), &pdf_path)
                    .await
                    .map_err(|e| match e {
                        LedgerError::RenderFailed { detail, .. } => LedgerError::RenderFailed {
                            filename: file.filename.clone(),
                            detail,
                        },
                        other => other,
                    })?;
                info!("{}: rendered {} pages", file.filename, images.len());

                for (page_index, img) in images.iter().enumerate() {
                    let content = png_bytes(img).map_err(|e| LedgerError::RenderFailed {
                        filename: file.filename.clone(),
                        detail: format!("page {}: PNG encoding failed: {}", page_index + 1, e),
                    })?;
                    pages.push(NormalizedPage {
                        content,
                        mime_type: "image/png".to_string(),
                        source_filename: file.filename.clone(),
                        page_index,
                    });
                }
            }
            FileClass::Unsupported(reason) => {
                warn!("Skipping {}: {}", file.filename, reason);
                skipped.push(SkippedFile {
                    filename: file.filename.clone(),
                    reason,
                });
            }
        }
    }

    if pages.is_empty() {
        return Err(LedgerError::NoProcessableFiles {
            skipped: skipped.len(),
        });
    }

    Ok(NormalizedBatch {
        pages,
        skipped,
        scratch,
    })
}
