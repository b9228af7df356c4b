//! Request-level orchestration.
//!
//! [`IngestService`] owns the long-lived collaborators (model, rasteriser,
//! store, mirror) and runs one request start to finish:
//!
//! ```text
//! ingest:  validate ─▶ normalize ─▶ encode ─▶ model ─▶ decode ─▶ map ─▶ persist ─▶ mirror.append
//! update:  per-row update ─▶ list ─▶ mirror.replace_all
//! export:  header + rows ─▶ mirror.export_new
//! ```
//!
//! Everything up to and including decoding is all-or-nothing: a failure
//! there persists nothing. Persistence is per row. The mirror runs after
//! the store has committed, so a mirror failure is reported in the output
//! rather than returned as an error.

use crate::config::PipelineConfig;
use crate::error::LedgerError;
use crate::mirror::{MirrorSink, SheetRow};
use crate::output::{ExportOutput, IngestOutput, IngestStats, MirrorStatus, UpdateOutput};
use crate::pipeline::decode::decode;
use crate::pipeline::encode::encode_page;
use crate::pipeline::llm::{LlmVisionModel, VisionModel};
use crate::pipeline::mapper::map_extracted;
use crate::pipeline::normalize::{normalize, UploadBatch};
use crate::pipeline::persist::{persist_batch, update_rows};
use crate::pipeline::render::{PageRasterizer, PdfiumRasterizer};
use crate::prompts::default_instruction;
use crate::record::{MappedRecord, PersistedRow};
use crate::schema::Schema;
use crate::store::RecordStore;
use chrono::Local;
use edgequake_llm::ImageData;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Shared, read-only service handling every request.
pub struct IngestService {
    schema: Schema,
    config: PipelineConfig,
    instruction: String,
    model: Arc<dyn VisionModel>,
    rasterizer: Arc<dyn PageRasterizer>,
    store: Arc<dyn RecordStore>,
    mirror: Arc<dyn MirrorSink>,
}

impl IngestService {
    pub fn new(
        config: PipelineConfig,
        model: Arc<dyn VisionModel>,
        rasterizer: Arc<dyn PageRasterizer>,
        store: Arc<dyn RecordStore>,
        mirror: Arc<dyn MirrorSink>,
    ) -> Self {
        let schema = Schema::for_variant(config.schema);
        let instruction = config
            .instruction
            .clone()
            .unwrap_or_else(|| default_instruction(config.schema, config.decoder).to_string());
        Self {
            schema,
            config,
            instruction,
            model,
            rasterizer,
            store,
            mirror,
        }
    }

    /// Build with the production model and rasteriser from `config`.
    pub async fn from_config(
        config: PipelineConfig,
        store: Arc<dyn RecordStore>,
        mirror: Arc<dyn MirrorSink>,
    ) -> Result<Self, LedgerError> {
        let model = LlmVisionModel::from_config(&config).await?;
        let rasterizer = PdfiumRasterizer::new(
            config.dpi,
            config.max_rendered_pixels,
            config.pdfium_lib_dir.clone(),
        );
        Ok(Self::new(
            config,
            Arc::new(model),
            Arc::new(rasterizer),
            store,
            mirror,
        ))
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Provision the table. Idempotent; also done lazily by every operation.
    pub async fn ensure_schema(&self) -> Result<(), LedgerError> {
        self.store.ensure_schema(&self.schema).await?;
        Ok(())
    }

    /// Extract, persist and mirror one upload.
    pub async fn ingest(&self, batch: UploadBatch) -> Result<IngestOutput, LedgerError> {
        let total_start = Instant::now();
        batch.validate()?;
        info!(
            "Starting ingest: {} files into {}",
            batch.files.len(),
            self.schema.table
        );

        // ── Step 1: Normalise ───────────────────────────────────────────────
        let normalize_start = Instant::now();
        let normalized = normalize(&batch.files, Arc::clone(&self.rasterizer)).await?;
        let normalize_duration_ms = normalize_start.elapsed().as_millis() as u64;
        let page_count = normalized.pages.len();
        let skipped_files = normalized.skipped.clone();
        info!(
            "Normalised {} pages ({} files skipped) in {}ms",
            page_count,
            skipped_files.len(),
            normalize_duration_ms
        );

        // ── Step 2: Encode and extract ──────────────────────────────────────
        let images: Vec<ImageData> = normalized.pages.iter().map(encode_page).collect();
        // Scratch PDFs are no longer needed once pages are encoded.
        drop(normalized);

        let reply = self.model.complete(&self.instruction, images).await?;
        debug!("Model reply: {} chars", reply.text.len());

        // ── Step 3: Decode and map ──────────────────────────────────────────
        let extracted = decode(self.config.decoder, &reply.text, &self.schema)?;
        let today = Local::now().date_naive();
        let mapped: Vec<MappedRecord> = extracted
            .iter()
            .map(|record| map_extracted(&self.schema, record, today))
            .collect();
        info!("Extracted {} records", mapped.len());

        // ── Step 4: Persist ─────────────────────────────────────────────────
        let outcome = persist_batch(self.store.as_ref(), &self.schema, mapped).await?;

        // ── Step 5: Mirror ──────────────────────────────────────────────────
        let mirror = self.mirror_append(&outcome.rows).await;

        let stats = IngestStats {
            files_received: batch.files.len(),
            files_skipped: skipped_files.len(),
            pages: page_count,
            records_extracted: extracted.len(),
            rows_persisted: outcome.rows.len(),
            rows_failed: outcome.failures.len(),
            input_tokens: reply.input_tokens,
            output_tokens: reply.output_tokens,
            retries: reply.retries,
            normalize_duration_ms,
            llm_duration_ms: reply.duration_ms,
            total_duration_ms: total_start.elapsed().as_millis() as u64,
        };
        info!(
            "Ingest complete: {}/{} rows persisted, {}ms total",
            stats.rows_persisted, stats.records_extracted, stats.total_duration_ms
        );

        let message = if mirror.is_synced() {
            "Files processed and synced to Google Sheet"
        } else {
            "Files processed"
        };

        Ok(IngestOutput {
            message: message.to_string(),
            records: outcome
                .rows
                .iter()
                .map(|row| row.to_json(&self.schema))
                .collect(),
            failed_rows: outcome.failures,
            skipped_files,
            sheet_url: self.mirror.link(),
            mirror,
            stats,
        })
    }

    /// Every stored row, ordered by identity.
    pub async fn results(&self) -> Result<Vec<Map<String, Value>>, LedgerError> {
        self.store.ensure_schema(&self.schema).await?;
        let rows = self.store.list(&self.schema).await?;
        debug!("Listed {} rows from {}", rows.len(), self.schema.table);
        Ok(rows.iter().map(|row| row.to_json(&self.schema)).collect())
    }

    /// Apply full-row edits, then rewrite the mirror from the whole table.
    pub async fn update(&self, rows: Vec<Value>) -> Result<UpdateOutput, LedgerError> {
        let objects = into_objects(rows)?;
        let outcome = update_rows(self.store.as_ref(), &self.schema, &objects).await?;

        let mirror = if self.mirror.enabled() {
            let all = self.store.list(&self.schema).await?;
            let sheet_rows: Vec<SheetRow> = all.iter().map(PersistedRow::to_sheet_row).collect();
            let count = sheet_rows.len();
            match self
                .mirror
                .replace_all(&self.schema.sheet_span(), sheet_rows)
                .await
            {
                Ok(()) => MirrorStatus::Synced { rows: count },
                Err(e) => {
                    warn!("Mirror rewrite failed after update: {}", e);
                    MirrorStatus::Failed {
                        error: e.to_string(),
                    }
                }
            }
        } else {
            MirrorStatus::Disabled
        };

        Ok(UpdateOutput {
            message: "Data updated".to_string(),
            updated: outcome.updated,
            failed_rows: outcome.failures,
            mirror,
        })
    }

    /// Write the header plus `rows` into a newly created spreadsheet.
    pub async fn export(&self, rows: Vec<Value>) -> Result<ExportOutput, LedgerError> {
        let objects = into_objects(rows)?;
        let header = self.schema.header();

        let mut values: Vec<SheetRow> = Vec::with_capacity(objects.len() + 1);
        values.push(header.iter().cloned().map(Value::String).collect());
        values.extend(objects.iter().map(|object| {
            header
                .iter()
                .map(|column| object.get(column).cloned().unwrap_or(Value::Null))
                .collect::<SheetRow>()
        }));

        let title = export_title();
        info!("Exporting {} rows to new sheet '{}'", objects.len(), title);
        let link = self.mirror.export_new(&title, values).await?;

        Ok(ExportOutput {
            message: "Sheet created".to_string(),
            link,
        })
    }

    async fn mirror_append(&self, rows: &[PersistedRow]) -> MirrorStatus {
        if !self.mirror.enabled() {
            return MirrorStatus::Disabled;
        }
        if rows.is_empty() {
            return MirrorStatus::Synced { rows: 0 };
        }
        let sheet_rows: Vec<SheetRow> = rows.iter().map(PersistedRow::to_sheet_row).collect();
        match self.mirror.append(sheet_rows).await {
            Ok(()) => MirrorStatus::Synced { rows: rows.len() },
            Err(e) => {
                warn!(
                    "Mirror append failed; {} rows are committed but not mirrored: {}",
                    rows.len(),
                    e
                );
                MirrorStatus::Failed {
                    error: e.to_string(),
                }
            }
        }
    }
}

/// Title for exported spreadsheets, e.g. `Exported_Results_20250115_093012`.
pub fn export_title() -> String {
    format!("Exported_Results_{}", Local::now().format("%Y%m%d_%H%M%S"))
}

fn into_objects(rows: Vec<Value>) -> Result<Vec<Map<String, Value>>, LedgerError> {
    rows.into_iter()
        .enumerate()
        .map(|(i, row)| match row {
            Value::Object(object) => Ok(object),
            _ => Err(LedgerError::InvalidBody(format!(
                "element {i} is not a JSON object"
            ))),
        })
        .collect()
}
