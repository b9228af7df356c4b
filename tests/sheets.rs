//! Sheets client against a local stand-in for the Sheets v4 API.
//!
//! A catch-all axum handler records every request and answers with a canned
//! status and body, so the exact wire calls can be asserted.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header::AUTHORIZATION, HeaderMap, Method, StatusCode, Uri};
use axum::response::IntoResponse;
use axum::Router;
use edgequake_ledger::mirror::{MirrorSink, SheetsMirror};
use edgequake_ledger::SheetsConfig;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

#[derive(Debug, Clone)]
struct Seen {
    method: Method,
    /// Path and query.
    target: String,
    bearer: Option<String>,
    body: Value,
}

#[derive(Clone)]
struct FakeApi {
    seen: Arc<Mutex<Vec<Seen>>>,
    status: StatusCode,
    create_reply: Value,
    error_body: Option<String>,
}

impl FakeApi {
    fn ok() -> Self {
        Self {
            seen: Arc::default(),
            status: StatusCode::OK,
            create_reply: json!({"spreadsheetId": "NEW"}),
            error_body: None,
        }
    }

    fn seen(&self) -> Vec<Seen> {
        self.seen.lock().unwrap().clone()
    }
}

async fn record(
    State(api): State<FakeApi>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let target = uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_default();
    let bearer = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body = serde_json::from_slice(&body).unwrap_or(Value::Null);
    let is_create = method == Method::POST && uri.path() == "/v4/spreadsheets";
    api.seen.lock().unwrap().push(Seen {
        method,
        target,
        bearer,
        body,
    });

    if let Some(error) = &api.error_body {
        return (api.status, error.clone());
    }
    let reply = if is_create {
        api.create_reply.clone()
    } else {
        json!({})
    };
    (api.status, reply.to_string())
}

/// Serve `api` on an ephemeral port; returns a mirror pointed at it.
async fn mirror_against(api: FakeApi) -> SheetsMirror {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = Router::new().fallback(record).with_state(api);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    let config = SheetsConfig::new("SID", "test-token").api_base(format!("http://{addr}/v4"));
    SheetsMirror::new(config).unwrap()
}

#[tokio::test]
async fn append_posts_raw_values_with_bearer() {
    let api = FakeApi::ok();
    let mirror = mirror_against(api.clone()).await;

    mirror
        .append(vec![vec![json!(1), Value::Null, json!("Asha")]])
        .await
        .unwrap();

    let seen = api.seen();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].method, Method::POST);
    assert_eq!(
        seen[0].target,
        "/v4/spreadsheets/SID/values/A1:append?valueInputOption=RAW"
    );
    assert_eq!(seen[0].bearer.as_deref(), Some("Bearer test-token"));
    assert_eq!(seen[0].body, json!({"values": [[1, null, "Asha"]]}));
}

#[tokio::test]
async fn replace_all_clears_span_then_writes_from_a1() {
    let api = FakeApi::ok();
    let mirror = mirror_against(api.clone()).await;

    mirror
        .replace_all("A1:F", vec![vec![json!(1), json!("Asha")], vec![json!(2), json!("Ravi")]])
        .await
        .unwrap();

    let seen = api.seen();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].method, Method::POST);
    assert_eq!(seen[0].target, "/v4/spreadsheets/SID/values/A1:F:clear");
    assert_eq!(seen[1].method, Method::PUT);
    assert_eq!(
        seen[1].target,
        "/v4/spreadsheets/SID/values/A1?valueInputOption=RAW"
    );
    assert_eq!(seen[1].body["values"], json!([[1, "Asha"], [2, "Ravi"]]));
    assert!(seen
        .iter()
        .all(|s| s.bearer.as_deref() == Some("Bearer test-token")));
}

#[tokio::test]
async fn export_creates_titled_sheet_and_links_it() {
    let api = FakeApi::ok();
    let mirror = mirror_against(api.clone()).await;

    let link = mirror
        .export_new(
            "Exported_Results_20250115_093000",
            vec![vec![json!("id"), json!("party_name")], vec![json!(1), json!("Ramesh")]],
        )
        .await
        .unwrap();

    assert_eq!(link, "https://docs.google.com/spreadsheets/d/NEW");
    let seen = api.seen();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].method, Method::POST);
    assert_eq!(seen[0].target, "/v4/spreadsheets");
    assert_eq!(
        seen[0].body,
        json!({"properties": {"title": "Exported_Results_20250115_093000"}})
    );
    assert_eq!(seen[1].method, Method::PUT);
    assert_eq!(
        seen[1].target,
        "/v4/spreadsheets/NEW/values/A1?valueInputOption=RAW"
    );
    assert_eq!(seen[1].body["values"][0], json!(["id", "party_name"]));
}

#[tokio::test]
async fn http_error_surfaces_api_message() {
    let api = FakeApi {
        status: StatusCode::FORBIDDEN,
        error_body: Some(
            json!({"error": {"code": 403, "message": "The caller does not have permission"}})
                .to_string(),
        ),
        ..FakeApi::ok()
    };
    let mirror = mirror_against(api).await;

    let err = mirror.append(vec![vec![json!(1)]]).await.unwrap_err();

    let msg = err.to_string();
    assert!(msg.contains("403"), "got: {msg}");
    assert!(msg.contains("The caller does not have permission"), "got: {msg}");
}

#[tokio::test]
async fn create_without_spreadsheet_id_fails() {
    let api = FakeApi {
        create_reply: json!({"properties": {"title": "x"}}),
        ..FakeApi::ok()
    };
    let mirror = mirror_against(api.clone()).await;

    let err = mirror.export_new("x", Vec::new()).await.unwrap_err();

    assert!(err.to_string().contains("spreadsheetId"), "got: {err}");
    assert_eq!(api.seen().len(), 1, "no write after a failed create");
}
