//! HTTP server binary for edgequake-ledger.
//!
//! A thin shim over the library crate that maps flags and environment
//! variables to the service configs and serves the router.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_ledger::mirror::{MirrorSink, NullMirror, SheetsMirror};
use edgequake_ledger::server;
use edgequake_ledger::store::{PgStore, RecordStore};
use edgequake_ledger::{
    DatabaseConfig, IngestService, PipelineConfig, ResponseDecoder, SchemaVariant, SheetsConfig,
    SheetsCredentials,
};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const AFTER_HELP: &str = r#"ENVIRONMENT:
  GEMINI_API_KEY        Google Gemini API key (default provider)
  OPENAI_API_KEY        OpenAI API key (with --provider openai)
  GOOGLE_CREDS          Service-account key file for the Sheets mirror
  RUST_LOG              Log filter, overrides --verbose (e.g. edgequake_ledger=debug)

EXAMPLES:
  # Student register, JSON replies, local Postgres
  DB_PASSWORD=secret GEMINI_API_KEY=... ledger-server

  # Ledger schema with a Google Sheet mirror (service-account key)
  ledger-server --schema ledger --spreadsheet-id 1AbC... --google-creds credentials.json

  curl -F files=@page1.jpg -F files=@scan.pdf http://localhost:5000/upload

PDFIUM:
  PDF uploads need the pdfium shared library. Install it system-wide or
  point PDFIUM_LIB_PATH at the directory containing libpdfium.
"#;

/// Extract table rows from uploaded page images with Vision LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "ledger-server",
    version,
    about = "Extract ledger and register rows from page images with Vision LLMs",
    long_about = "HTTP service that accepts photos and PDFs of handwritten registers, extracts \
one row per entry with a Vision Language Model, stores the rows in PostgreSQL and mirrors them \
to a Google Sheet.",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Interface to bind.
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on.
    #[arg(long, env = "PORT", default_value_t = 5000)]
    port: u16,

    /// Table layout: student or ledger.
    #[arg(long, env = "LEDGER_SCHEMA", default_value = "student")]
    schema: SchemaVariant,

    /// Reply decoder: json or positional (student schema only).
    #[arg(long, env = "LEDGER_DECODER", default_value = "json")]
    decoder: ResponseDecoder,

    /// LLM provider: gemini, openai, anthropic, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER", default_value = "gemini")]
    provider: String,

    /// LLM model ID.
    #[arg(long, env = "EDGEQUAKE_MODEL", default_value = "gemini-2.0-flash")]
    model: String,

    /// Database name.
    #[arg(long, env = "DB_NAME", default_value = "student_data_from_image")]
    db_name: String,

    /// Database user.
    #[arg(long, env = "DB_USER", default_value = "postgres")]
    db_user: String,

    /// Database password.
    #[arg(long, env = "DB_PASSWORD", default_value = "", hide_env_values = true)]
    db_password: String,

    /// Database host.
    #[arg(long, env = "DB_HOST", default_value = "localhost")]
    db_host: String,

    /// Database port.
    #[arg(long, env = "DB_PORT", default_value_t = 5432)]
    db_port: u16,

    /// Maximum pooled database connections.
    #[arg(long, env = "DB_MAX_CONNECTIONS", default_value_t = 5)]
    db_max_connections: u32,

    /// Spreadsheet to mirror rows into. Mirroring is off when unset.
    #[arg(long, env = "SPREADSHEET_ID")]
    spreadsheet_id: Option<String>,

    /// Service-account key file for the Sheets API.
    #[arg(long, env = "GOOGLE_CREDS")]
    google_creds: Option<PathBuf>,

    /// Fixed OAuth2 access token; overrides --google-creds. Not refreshed.
    #[arg(long, env = "GOOGLE_SHEETS_TOKEN", hide_env_values = true)]
    sheets_token: Option<String>,

    /// Rendering DPI for PDF pages (72–400).
    #[arg(long, env = "LEDGER_DPI", default_value_t = 150,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: u32,

    /// Maximum output tokens per extraction call.
    #[arg(long, env = "LEDGER_MAX_TOKENS", default_value_t = 8192)]
    max_tokens: usize,

    /// Sampling temperature (0.0–2.0).
    #[arg(long, env = "LEDGER_TEMPERATURE", default_value_t = 0.0)]
    temperature: f32,

    /// Retries for a failed extraction call.
    #[arg(long, env = "LEDGER_MAX_RETRIES", default_value_t = 2)]
    max_retries: u32,

    /// Per-call extraction timeout in seconds.
    #[arg(long, env = "LEDGER_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,

    /// File holding a custom extraction instruction.
    #[arg(long, env = "LEDGER_INSTRUCTION")]
    instruction: Option<PathBuf>,

    /// Directory containing the pdfium shared library.
    #[arg(long, env = "PDFIUM_LIB_PATH")]
    pdfium_lib_path: Option<PathBuf>,

    /// Maximum request body size in MiB.
    #[arg(long, env = "LEDGER_MAX_UPLOAD_MB", default_value_t = 32)]
    max_upload_mb: usize,

    /// Debug-level logging.
    #[arg(short, long, env = "LEDGER_VERBOSE")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Build services ───────────────────────────────────────────────────
    let config = build_config(&cli).await?;
    info!("{:?}", config);

    let database = DatabaseConfig {
        name: cli.db_name.clone(),
        user: cli.db_user.clone(),
        password: cli.db_password.clone(),
        host: cli.db_host.clone(),
        port: cli.db_port,
        max_connections: cli.db_max_connections,
    };
    info!("{:?}", database);
    let store: Arc<dyn RecordStore> = Arc::new(PgStore::connect_lazy(&database));

    let mirror: Arc<dyn MirrorSink> = match sheets_config(&cli) {
        Some(sheets) => {
            info!("Mirroring rows to spreadsheet {}", sheets.spreadsheet_id);
            Arc::new(SheetsMirror::new(sheets).context("Failed to build the Sheets client")?)
        }
        None if cli.spreadsheet_id.is_some() => {
            warn!("SPREADSHEET_ID is set but neither GOOGLE_CREDS nor GOOGLE_SHEETS_TOKEN is; mirroring disabled");
            Arc::new(NullMirror)
        }
        None => {
            info!("No spreadsheet configured; mirroring disabled");
            Arc::new(NullMirror)
        }
    };

    let service = IngestService::from_config(config, store, mirror)
        .await
        .context("Failed to initialise the extraction service")?;

    // Requests provision the table again, so a failure here is only logged.
    if let Err(e) = service.ensure_schema().await {
        warn!("Could not provision table yet: {}", e);
    }

    // ── Serve ────────────────────────────────────────────────────────────
    let addr = format!("{}:{}", cli.host, cli.port);
    server::serve(
        Arc::new(service),
        &addr,
        cli.max_upload_mb.max(1) * 1024 * 1024,
    )
    .await
    .context("Server stopped with an error")?;

    Ok(())
}

/// Sheets settings when a spreadsheet and some credential are both given.
fn sheets_config(cli: &Cli) -> Option<SheetsConfig> {
    let id = cli.spreadsheet_id.as_deref().filter(|id| !id.is_empty())?;
    let credentials = match (&cli.sheets_token, &cli.google_creds) {
        (Some(token), _) if !token.is_empty() => SheetsCredentials::AccessToken(token.clone()),
        (_, Some(path)) => SheetsCredentials::ServiceAccountFile(path.clone()),
        _ => return None,
    };
    Some(SheetsConfig::with_credentials(id, credentials))
}

async fn build_config(cli: &Cli) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .schema(cli.schema)
        .decoder(cli.decoder)
        .provider_name(cli.provider.clone())
        .model(cli.model.clone())
        .dpi(cli.dpi)
        .max_tokens(cli.max_tokens)
        .temperature(cli.temperature)
        .max_retries(cli.max_retries)
        .api_timeout_secs(cli.api_timeout);

    if let Some(ref path) = cli.instruction {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read instruction file {}", path.display()))?;
        builder = builder.instruction(text);
    }
    if let Some(ref dir) = cli.pdfium_lib_path {
        builder = builder.pdfium_lib_dir(dir.clone());
    }

    builder.build().context("Invalid configuration")
}
