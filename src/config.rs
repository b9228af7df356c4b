//! Configuration types for the extraction pipeline and its collaborators.
//!
//! Pipeline behaviour is controlled through [`PipelineConfig`], built via its
//! [`PipelineConfigBuilder`]. The database and spreadsheet connections get
//! their own small structs ([`DatabaseConfig`], [`SheetsConfig`]) because
//! they are consumed by different components and carry secrets that must
//! never end up in a log line.
//!
//! All of these are created once at process start and are read-only after.

use crate::error::LedgerError;
use crate::schema::SchemaVariant;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

/// Upper bound for [`PipelineConfig::max_retries`].
pub const MAX_RETRIES: u32 = 10;

/// Configuration for the upload → extract → persist pipeline.
///
/// # Example
/// ```rust
/// use edgequake_ledger::{PipelineConfig, ResponseDecoder, SchemaVariant};
///
/// let config = PipelineConfig::builder()
///     .schema(SchemaVariant::Student)
///     .decoder(ResponseDecoder::Positional)
///     .dpi(200)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Which table layout this deployment persists. Default: student.
    pub schema: SchemaVariant,

    /// How the model reply is decoded. Default: [`ResponseDecoder::Json`].
    pub decoder: ResponseDecoder,

    /// Rendering DPI for PDF pages. Range: 72–400. Default: 150.
    ///
    /// Handwriting needs more pixels than print; 150 keeps pen strokes
    /// legible while a 10-page upload stays well below request size limits.
    pub dpi: u32,

    /// Maximum rendered image dimension (width or height) in pixels. Default: 2000.
    pub max_rendered_pixels: u32,

    /// LLM model identifier. If None, `gemini-2.0-flash`.
    pub model: Option<String>,

    /// LLM provider name (e.g. "gemini", "openai").
    /// If None along with `provider`, uses `ProviderFactory::from_env()`.
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature. Default: 0.0.
    ///
    /// Field extraction is transcription, not writing; any creativity shows
    /// up as invented names and digits.
    pub temperature: f32,

    /// Maximum tokens the model may generate for one batch. Default: 8192.
    ///
    /// A dense register page is ~40 rows of five fields; several pages in
    /// one call need room or the JSON array gets cut off mid-object.
    pub max_tokens: usize,

    /// Maximum retry attempts on a failed inference call. Default: 2.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds (exponential backoff). Default: 500.
    pub retry_backoff_ms: u64,

    /// Per-inference-call timeout in seconds. Default: 120.
    pub api_timeout_secs: u64,

    /// Custom extraction instruction. If None, the schema's built-in one.
    pub instruction: Option<String>,

    /// Directory holding the pdfium shared library. If None, the system library.
    pub pdfium_lib_dir: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            schema: SchemaVariant::default(),
            decoder: ResponseDecoder::default(),
            dpi: 150,
            max_rendered_pixels: 2000,
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.0,
            max_tokens: 8192,
            max_retries: 2,
            retry_backoff_ms: 500,
            api_timeout_secs: 120,
            instruction: None,
            pdfium_lib_dir: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("schema", &self.schema)
            .field("decoder", &self.decoder)
            .field("dpi", &self.dpi)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("instruction", &self.instruction.as_ref().map(|s| s.len()))
            .field("pdfium_lib_dir", &self.pdfium_lib_dir)
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn schema(mut self, variant: SchemaVariant) -> Self {
        self.config.schema = variant;
        self
    }

    pub fn decoder(mut self, decoder: ResponseDecoder) -> Self {
        self.config.decoder = decoder;
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 400);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    /// Retries after the first attempt, capped at [`MAX_RETRIES`].
    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n.min(MAX_RETRIES);
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn instruction(mut self, text: impl Into<String>) -> Self {
        self.config.instruction = Some(text.into());
        self
    }

    pub fn pdfium_lib_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.pdfium_lib_dir = Some(dir.into());
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, LedgerError> {
        let c = &self.config;
        if c.dpi < 72 || c.dpi > 400 {
            return Err(LedgerError::InvalidConfig(format!(
                "DPI must be 72–400, got {}",
                c.dpi
            )));
        }
        if c.max_tokens == 0 {
            return Err(LedgerError::InvalidConfig(
                "max_tokens must be ≥ 1".into(),
            ));
        }
        if c.api_timeout_secs == 0 {
            return Err(LedgerError::InvalidConfig(
                "api_timeout_secs must be ≥ 1".into(),
            ));
        }
        if c.decoder == ResponseDecoder::Positional
            && !crate::schema::Schema::for_variant(c.schema).allows_positional
        {
            return Err(LedgerError::InvalidConfig(format!(
                "the positional decoder is not available for the {} schema",
                c.schema
            )));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// How the model's text reply is turned into records.
///
/// | Decoder | Behaviour |
/// |---------|-----------|
/// | `Json` | Locate and parse a JSON object or array; anything else is an error |
/// | `Positional` | Split each line on commas and assign segments to fields by position |
///
/// `Positional` is a lossy heuristic for flat schemas only: a comma inside a
/// name shifts every later field. It is never used as a fallback for a
/// failed JSON parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseDecoder {
    #[default]
    Json,
    Positional,
}

impl FromStr for ResponseDecoder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(ResponseDecoder::Json),
            "positional" | "csv" => Ok(ResponseDecoder::Positional),
            other => Err(format!("unknown decoder '{other}' (expected json or positional)")),
        }
    }
}

// ── Collaborator configs ─────────────────────────────────────────────────

/// PostgreSQL connection parameters.
#[derive(Clone)]
pub struct DatabaseConfig {
    pub name: String,
    pub user: String,
    pub password: String,
    pub host: String,
    pub port: u16,
    /// Upper bound on pooled connections. Default: 5.
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            name: "student_data_from_image".to_string(),
            user: "postgres".to_string(),
            password: String::new(),
            host: "localhost".to_string(),
            port: 5432,
            max_connections: 5,
        }
    }
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("name", &self.name)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

/// Scope requested for service-account tokens.
pub const SHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";

/// How the Sheets client authenticates.
#[derive(Clone)]
pub enum SheetsCredentials {
    /// Fixed OAuth2 bearer token with the `spreadsheets` scope. Not refreshed.
    AccessToken(String),
    /// Service-account key file; tokens are minted and refreshed from it.
    ServiceAccountFile(PathBuf),
}

/// Google Sheets mirror parameters.
#[derive(Clone)]
pub struct SheetsConfig {
    pub spreadsheet_id: String,
    pub credentials: SheetsCredentials,
    /// API root. Overridable for tests and proxies.
    pub api_base: String,
    pub timeout_secs: u64,
}

impl SheetsConfig {
    /// Authenticate with a fixed access token.
    pub fn new(spreadsheet_id: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self::with_credentials(
            spreadsheet_id,
            SheetsCredentials::AccessToken(access_token.into()),
        )
    }

    /// Authenticate with a service-account key file (`GOOGLE_CREDS`).
    pub fn service_account(spreadsheet_id: impl Into<String>, key_path: impl Into<PathBuf>) -> Self {
        Self::with_credentials(
            spreadsheet_id,
            SheetsCredentials::ServiceAccountFile(key_path.into()),
        )
    }

    pub fn with_credentials(spreadsheet_id: impl Into<String>, credentials: SheetsCredentials) -> Self {
        Self {
            spreadsheet_id: spreadsheet_id.into(),
            credentials,
            api_base: "https://sheets.googleapis.com/v4".to_string(),
            timeout_secs: 30,
        }
    }

    pub fn api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into();
        self
    }
}

impl fmt::Debug for SheetsCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SheetsCredentials::AccessToken(_) => f.write_str("AccessToken(<redacted>)"),
            SheetsCredentials::ServiceAccountFile(path) => {
                f.debug_tuple("ServiceAccountFile").field(path).finish()
            }
        }
    }
}

impl fmt::Debug for SheetsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SheetsConfig")
            .field("spreadsheet_id", &self.spreadsheet_id)
            .field("credentials", &self.credentials)
            .field("api_base", &self.api_base)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}
