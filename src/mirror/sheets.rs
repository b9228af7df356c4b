//! Google Sheets v4 REST client.
//!
//! Only four endpoints are used:
//!
//! | Operation | Request |
//! |-----------|---------|
//! | append | `POST values/A1:append?valueInputOption=RAW` |
//! | clear | `POST values/{span}:clear` |
//! | write | `PUT values/A1?valueInputOption=RAW` |
//! | create | `POST /spreadsheets` |
//!
//! Requests carry a bearer token. With a service-account key file the token
//! is minted by `gcp_auth` and refreshed before it expires; a fixed access
//! token is sent as is.

use super::{MirrorSink, SheetRow};
use crate::config::{SheetsConfig, SheetsCredentials, SHEETS_SCOPE};
use crate::error::LedgerError;
use futures::future::BoxFuture;
use gcp_auth::{CustomServiceAccount, TokenProvider};
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const DOCS_BASE: &str = "https://docs.google.com/spreadsheets/d";

#[derive(Clone)]
enum Auth {
    Fixed(String),
    ServiceAccount(Arc<CustomServiceAccount>),
}

impl fmt::Debug for Auth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Auth::Fixed(_) => f.write_str("Fixed(<redacted>)"),
            Auth::ServiceAccount(_) => f.write_str("ServiceAccount"),
        }
    }
}

/// Mirror writing to one configured spreadsheet.
#[derive(Debug, Clone)]
pub struct SheetsMirror {
    client: reqwest::Client,
    auth: Auth,
    config: SheetsConfig,
}

impl SheetsMirror {
    /// Build the client. A service-account key file is read and parsed here,
    /// so a bad `GOOGLE_CREDS` fails at start-up rather than on first sync.
    pub fn new(config: SheetsConfig) -> Result<Self, LedgerError> {
        let auth = match &config.credentials {
            SheetsCredentials::AccessToken(token) => Auth::Fixed(token.clone()),
            SheetsCredentials::ServiceAccountFile(path) => {
                let account = CustomServiceAccount::from_file(path).map_err(|e| {
                    LedgerError::SheetsFailed(format!(
                        "credentials {}: {e}",
                        path.display()
                    ))
                })?;
                info!("Sheets: service account from {}", path.display());
                Auth::ServiceAccount(Arc::new(account))
            }
        };
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LedgerError::SheetsFailed(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            auth,
            config,
        })
    }

    /// Current bearer token. Service-account tokens are cached by `gcp_auth`
    /// and re-minted once expired.
    async fn bearer(&self) -> Result<String, LedgerError> {
        match &self.auth {
            Auth::Fixed(token) => Ok(token.clone()),
            Auth::ServiceAccount(account) => account
                .token(&[SHEETS_SCOPE])
                .await
                .map(|token| token.as_str().to_string())
                .map_err(|e| LedgerError::SheetsFailed(format!("token: {e}"))),
        }
    }

    fn values_url(&self, spreadsheet_id: &str, suffix: &str) -> String {
        format!(
            "{}/spreadsheets/{}/values/{}",
            self.config.api_base.trim_end_matches('/'),
            spreadsheet_id,
            suffix
        )
    }

    async fn send(&self, request: reqwest::RequestBuilder, what: &str) -> Result<Value, LedgerError> {
        let token = self.bearer().await?;
        let response = request
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LedgerError::SheetsFailed(format!(
                        "{what}: timed out after {}s",
                        self.config.timeout_secs
                    ))
                } else {
                    LedgerError::SheetsFailed(format!("{what}: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LedgerError::SheetsFailed(format!(
                "{what}: HTTP {status}: {}",
                api_message(&body)
            )));
        }

        // Clear and write return small JSON bodies; tolerate an empty one.
        let bytes = response
            .bytes()
            .await
            .map_err(|e| LedgerError::SheetsFailed(format!("{what}: {e}")))?;
        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&bytes)
            .map_err(|e| LedgerError::SheetsFailed(format!("{what}: invalid response: {e}")))
    }

    async fn append_rows(&self, rows: Vec<SheetRow>) -> Result<(), LedgerError> {
        let count = rows.len();
        let url = self.values_url(&self.config.spreadsheet_id, "A1:append");
        let request = self
            .client
            .post(url)
            .query(&[("valueInputOption", "RAW")])
            .json(&json!({ "values": rows }));
        self.send(request, "append").await?;
        debug!("Appended {} rows to sheet", count);
        Ok(())
    }

    async fn clear(&self, spreadsheet_id: &str, span: &str) -> Result<(), LedgerError> {
        let url = self.values_url(spreadsheet_id, &format!("{span}:clear"));
        self.send(self.client.post(url).json(&json!({})), "clear")
            .await?;
        Ok(())
    }

    async fn write_from_a1(&self, spreadsheet_id: &str, rows: Vec<SheetRow>) -> Result<(), LedgerError> {
        let url = self.values_url(spreadsheet_id, "A1");
        let request = self
            .client
            .put(url)
            .query(&[("valueInputOption", "RAW")])
            .json(&json!({ "range": "A1", "values": rows }));
        self.send(request, "write").await?;
        Ok(())
    }

    async fn replace(&self, span: &str, rows: Vec<SheetRow>) -> Result<(), LedgerError> {
        let count = rows.len();
        self.clear(&self.config.spreadsheet_id, span).await?;
        self.write_from_a1(&self.config.spreadsheet_id, rows).await?;
        info!("Rewrote sheet with {} rows", count);
        Ok(())
    }

    async fn create_and_write(&self, title: &str, rows: Vec<SheetRow>) -> Result<String, LedgerError> {
        let url = format!(
            "{}/spreadsheets",
            self.config.api_base.trim_end_matches('/')
        );
        let request = self
            .client
            .post(url)
            .json(&json!({ "properties": { "title": title } }));
        let created = self.send(request, "create").await?;
        let spreadsheet_id = created
            .get("spreadsheetId")
            .and_then(Value::as_str)
            .ok_or_else(|| LedgerError::SheetsFailed("create: response has no spreadsheetId".into()))?
            .to_string();

        self.write_from_a1(&spreadsheet_id, rows).await?;
        let link = format!("{DOCS_BASE}/{spreadsheet_id}");
        info!("Exported to new sheet: {}", link);
        Ok(link)
    }
}

impl MirrorSink for SheetsMirror {
    fn append<'a>(&'a self, rows: Vec<SheetRow>) -> BoxFuture<'a, Result<(), LedgerError>> {
        Box::pin(self.append_rows(rows))
    }

    fn replace_all<'a>(
        &'a self,
        span: &'a str,
        rows: Vec<SheetRow>,
    ) -> BoxFuture<'a, Result<(), LedgerError>> {
        Box::pin(self.replace(span, rows))
    }

    fn export_new<'a>(
        &'a self,
        title: &'a str,
        rows: Vec<SheetRow>,
    ) -> BoxFuture<'a, Result<String, LedgerError>> {
        Box::pin(self.create_and_write(title, rows))
    }

    fn link(&self) -> Option<String> {
        Some(format!("{DOCS_BASE}/{}/preview", self.config.spreadsheet_id))
    }
}

/// Pull `error.message` out of a Google API error body, else the raw body.
fn api_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mirror() -> SheetsMirror {
        SheetsMirror::new(SheetsConfig::new("abc123", "token")).unwrap()
    }

    #[test]
    fn preview_link() {
        assert_eq!(
            mirror().link().as_deref(),
            Some("https://docs.google.com/spreadsheets/d/abc123/preview")
        );
    }

    #[test]
    fn values_url_layout() {
        assert_eq!(
            mirror().values_url("abc123", "A1:F:clear"),
            "https://sheets.googleapis.com/v4/spreadsheets/abc123/values/A1:F:clear"
        );
    }

    #[test]
    fn unreadable_key_file_fails_at_construction() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("credentials.json");
        let err = SheetsMirror::new(SheetsConfig::service_account("abc123", &missing)).unwrap_err();
        assert!(err.to_string().contains("credentials.json"), "got: {err}");

        let garbage = dir.path().join("garbage.json");
        std::fs::write(&garbage, "{\"type\": \"service_account\"}").unwrap();
        assert!(SheetsMirror::new(SheetsConfig::service_account("abc123", &garbage)).is_err());
    }

    #[tokio::test]
    async fn fixed_token_is_sent_verbatim() {
        assert_eq!(mirror().bearer().await.unwrap(), "token");
    }

    #[test]
    fn api_message_prefers_error_message() {
        let body = r#"{"error": {"code": 403, "message": "The caller does not have permission"}}"#;
        assert_eq!(api_message(body), "The caller does not have permission");
        assert_eq!(api_message("  bad gateway "), "bad gateway");
    }
}
