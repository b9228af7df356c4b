//! Test doubles shared by the integration tests.
#![allow(dead_code)]

use edgequake_ledger::error::LedgerError;
use edgequake_ledger::mirror::{MirrorSink, SheetRow};
use edgequake_ledger::pipeline::llm::{ModelReply, VisionModel};
use edgequake_ledger::pipeline::render::PageRasterizer;
use edgequake_ledger::store::MemoryStore;
use edgequake_ledger::{IngestService, PipelineConfig, SchemaVariant, UploadBatch, UploadedFile};
use edgequake_llm::ImageData;
use futures::future::{self, BoxFuture};
use image::{DynamicImage, Rgba, RgbaImage};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const PNG_BYTES: &[u8] = b"\x89PNG\r\n\x1a\n-page-";
pub const PDF_BYTES: &[u8] = b"%PDF-1.4\n% fake document\n";

// ── Model ────────────────────────────────────────────────────────────────

/// Returns a canned reply (or failure) and counts calls.
pub struct ScriptedModel {
    reply: Result<String, String>,
    pub calls: AtomicUsize,
    pub images_seen: AtomicUsize,
}

impl ScriptedModel {
    pub fn replying(text: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Ok(text.to_string()),
            calls: AtomicUsize::new(0),
            images_seen: AtomicUsize::new(0),
        })
    }

    pub fn failing(detail: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Err(detail.to_string()),
            calls: AtomicUsize::new(0),
            images_seen: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl VisionModel for ScriptedModel {
    fn complete<'a>(
        &'a self,
        _instruction: &'a str,
        images: Vec<ImageData>,
    ) -> BoxFuture<'a, Result<ModelReply, LedgerError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.images_seen.store(images.len(), Ordering::SeqCst);
        let out = match &self.reply {
            Ok(text) => Ok(ModelReply {
                text: text.clone(),
                input_tokens: 1200,
                output_tokens: 80,
                ..Default::default()
            }),
            Err(detail) => Err(LedgerError::InferenceFailed {
                retries: 2,
                detail: detail.clone(),
            }),
        };
        Box::pin(future::ready(out))
    }
}

// ── Rasterizer ───────────────────────────────────────────────────────────

/// Pretends every PDF has a fixed number of pages.
pub struct FixedPages(pub usize);

impl PageRasterizer for FixedPages {
    fn rasterize(&self, _pdf_path: &Path) -> Result<Vec<DynamicImage>, LedgerError> {
        Ok((0..self.0)
            .map(|_| DynamicImage::ImageRgba8(RgbaImage::from_pixel(8, 8, Rgba([255, 255, 255, 255]))))
            .collect())
    }
}

// ── Mirror ───────────────────────────────────────────────────────────────

/// Records every call; optionally fails all of them.
#[derive(Default)]
pub struct RecordingMirror {
    pub fail: bool,
    pub appended: Mutex<Vec<SheetRow>>,
    pub replaced: Mutex<Option<(String, Vec<SheetRow>)>>,
    pub exported: Mutex<Vec<(String, Vec<SheetRow>)>>,
}

impl RecordingMirror {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            ..Default::default()
        })
    }

    fn outcome(&self) -> Result<(), LedgerError> {
        if self.fail {
            Err(LedgerError::SheetsFailed("HTTP 403: permission denied".into()))
        } else {
            Ok(())
        }
    }
}

impl MirrorSink for RecordingMirror {
    fn append<'a>(&'a self, rows: Vec<SheetRow>) -> BoxFuture<'a, Result<(), LedgerError>> {
        let out = self.outcome();
        if out.is_ok() {
            self.appended.lock().unwrap().extend(rows);
        }
        Box::pin(future::ready(out))
    }

    fn replace_all<'a>(
        &'a self,
        span: &'a str,
        rows: Vec<SheetRow>,
    ) -> BoxFuture<'a, Result<(), LedgerError>> {
        let out = self.outcome();
        if out.is_ok() {
            *self.replaced.lock().unwrap() = Some((span.to_string(), rows));
        }
        Box::pin(future::ready(out))
    }

    fn export_new<'a>(
        &'a self,
        title: &'a str,
        rows: Vec<SheetRow>,
    ) -> BoxFuture<'a, Result<String, LedgerError>> {
        let out = self.outcome().map(|()| {
            self.exported
                .lock()
                .unwrap()
                .push((title.to_string(), rows));
            "https://docs.google.com/spreadsheets/d/exported".to_string()
        });
        Box::pin(future::ready(out))
    }

    fn link(&self) -> Option<String> {
        Some("https://docs.google.com/spreadsheets/d/test/preview".to_string())
    }
}

// ── Service ──────────────────────────────────────────────────────────────

pub struct Harness {
    pub service: Arc<IngestService>,
    pub model: Arc<ScriptedModel>,
    pub store: Arc<MemoryStore>,
}

pub fn harness(
    config: PipelineConfig,
    model: Arc<ScriptedModel>,
    mirror: Arc<dyn MirrorSink>,
) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let service = IngestService::new(
        config,
        model.clone(),
        Arc::new(FixedPages(3)),
        store.clone(),
        mirror,
    );
    Harness {
        service: Arc::new(service),
        model,
        store,
    }
}

pub fn student_config() -> PipelineConfig {
    PipelineConfig::builder()
        .schema(SchemaVariant::Student)
        .build()
        .unwrap()
}

pub fn ledger_config() -> PipelineConfig {
    PipelineConfig::builder()
        .schema(SchemaVariant::Ledger)
        .build()
        .unwrap()
}

pub fn photo(name: &str) -> UploadedFile {
    UploadedFile::new(name, Some("image/png"), PNG_BYTES)
}

pub fn pdf(name: &str) -> UploadedFile {
    UploadedFile::new(name, Some("application/pdf"), PDF_BYTES)
}

pub fn batch(files: Vec<UploadedFile>) -> UploadBatch {
    UploadBatch::new(files)
}
