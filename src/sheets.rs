//! Sheet writer: commit the trigger label and text to the worksheet.
//!
//! The pipeline talks to the spreadsheet through [`SheetsApi`], which has
//! just the two operations a capture needs: resolve a worksheet title to
//! its numeric id, and write one cell. [`GoogleSheets`] implements it over
//! the Sheets v4 REST API using the shared [`Session`].

use crate::error::{error_chain, CaptureError};
use crate::session::Session;
use crate::trigger::TriggerCategory;
use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// The spreadsheet operations the capture pipeline depends on.
#[async_trait]
pub trait SheetsApi: Send + Sync {
    /// Resolve a worksheet display name to its numeric sheet id (`gid`).
    ///
    /// Fails with [`CaptureError::WorksheetNotFound`] if no sheet has that name.
    async fn sheet_id(&self, worksheet: &str) -> Result<u64, CaptureError>;

    /// Write `value` to the single A1 address `cell` of `worksheet`.
    ///
    /// The value is interpreted as if typed into the cell by a user.
    async fn update_cell(&self, worksheet: &str, cell: &str, value: &str) -> Result<(), CaptureError>;
}

/// Where the two writes of a capture land.
#[derive(Debug, Clone, Copy)]
pub struct CaptureCells<'a> {
    pub worksheet: &'a str,
    pub label_cell: &'a str,
    pub content_cell: &'a str,
}

/// Write the category label, then the verbatim trigger text.
///
/// The label write must succeed before the content write is attempted.
pub async fn write_capture(
    api: &dyn SheetsApi,
    cells: CaptureCells<'_>,
    category: TriggerCategory,
    raw_text: &str,
) -> Result<(), CaptureError> {
    let label = category.label();
    api.update_cell(cells.worksheet, cells.label_cell, label).await?;
    debug!("Wrote label '{}' to {}!{}", label, cells.worksheet, cells.label_cell);

    api.update_cell(cells.worksheet, cells.content_cell, raw_text).await?;
    info!(
        "Wrote {} chars to {}!{}",
        raw_text.chars().count(),
        cells.worksheet,
        cells.content_cell
    );
    Ok(())
}

// ── Google Sheets v4 ─────────────────────────────────────────────────────

#[derive(Deserialize)]
struct SpreadsheetMeta {
    #[serde(default)]
    sheets: Vec<SheetEntry>,
}

#[derive(Deserialize)]
struct SheetEntry {
    properties: SheetProperties,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SheetProperties {
    sheet_id: u64,
    title: String,
}

#[derive(Deserialize)]
struct ApiErrorEnvelope {
    error: ApiErrorBody,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    code: Option<u16>,
    message: Option<String>,
}

/// Per-request timeout for Sheets API calls unless overridden.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Sheets v4 REST implementation of [`SheetsApi`].
#[derive(Debug, Clone)]
pub struct GoogleSheets {
    session: Arc<Session>,
    timeout: Duration,
}

impl GoogleSheets {
    pub fn new(session: Arc<Session>) -> Self {
        Self {
            session,
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Bound every metadata read and cell write by `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn url(&self, segments: &[&str]) -> Result<Url, CaptureError> {
        let mut url = Url::parse(&self.session.endpoints().sheets_api)
            .map_err(|e| CaptureError::InvalidConfig(format!("Sheets API URL: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| CaptureError::InvalidConfig("Sheets API URL cannot be a base".into()))?
            .pop_if_empty()
            .extend(["v4", "spreadsheets", self.session.spreadsheet_id()])
            .extend(segments);
        Ok(url)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Vec<u8>, CaptureError> {
        let token = self.session.access_token().await?;
        let response = request
            .bearer_auth(token)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        let body = response.bytes().await.map_err(|e| CaptureError::WriteFailed {
            code: Some(status.as_u16()),
            message: format!("unreadable response: {}", error_chain(&e)),
        })?;

        if status == StatusCode::UNAUTHORIZED {
            self.session.invalidate_token().await;
        }
        if !status.is_success() {
            return Err(api_error(status, &body));
        }
        Ok(body.to_vec())
    }

    fn transport_error(&self, e: reqwest::Error) -> CaptureError {
        if e.is_timeout() {
            CaptureError::WriteFailed {
                code: None,
                message: format!("request timed out after {}s", self.timeout.as_secs()),
            }
        } else {
            CaptureError::Unreachable {
                service: "spreadsheet API",
                source: e,
            }
        }
    }
}

/// Translate a Google API error response into the capture taxonomy.
fn api_error(status: StatusCode, body: &[u8]) -> CaptureError {
    let (code, message) = match serde_json::from_slice::<ApiErrorEnvelope>(body) {
        Ok(env) => (
            env.error.code.unwrap_or(status.as_u16()),
            env.error
                .message
                .unwrap_or_else(|| crate::pipeline::export::snippet(body)),
        ),
        Err(_) => (status.as_u16(), crate::pipeline::export::snippet(body)),
    };
    if code == 403 {
        CaptureError::PermissionDenied { message }
    } else {
        CaptureError::WriteFailed {
            code: Some(code),
            message,
        }
    }
}

/// Quote a worksheet title for use in an A1 range (`'My Sheet'!C14`).
fn a1_range(worksheet: &str, cell: &str) -> String {
    format!("'{}'!{}", worksheet.replace('\'', "''"), cell)
}

#[async_trait]
impl SheetsApi for GoogleSheets {
    async fn sheet_id(&self, worksheet: &str) -> Result<u64, CaptureError> {
        let mut url = self.url(&[])?;
        url.query_pairs_mut().append_pair("fields", "sheets.properties");
        let body = self.send(self.session.http().get(url)).await?;

        let meta: SpreadsheetMeta = serde_json::from_slice(&body).map_err(|e| {
            CaptureError::WriteFailed {
                code: None,
                message: format!("unexpected spreadsheet metadata: {e}"),
            }
        })?;

        meta.sheets
            .into_iter()
            .find(|s| s.properties.title == worksheet)
            .map(|s| s.properties.sheet_id)
            .ok_or_else(|| CaptureError::WorksheetNotFound {
                name: worksheet.to_string(),
            })
    }

    async fn update_cell(&self, worksheet: &str, cell: &str, value: &str) -> Result<(), CaptureError> {
        let range = a1_range(worksheet, cell);
        let mut url = self.url(&["values", range.as_str()])?;
        url.query_pairs_mut()
            .append_pair("valueInputOption", "USER_ENTERED");

        let payload = serde_json::json!({
            "range": range,
            "majorDimension": "ROWS",
            "values": [[value]],
        });

        match self.send(self.session.http().put(url).json(&payload)).await {
            Ok(_) => Ok(()),
            // The values endpoint reports an unknown sheet as a range parse error.
            Err(CaptureError::WriteFailed { code: Some(400), message })
                if message.contains("Unable to parse range") =>
            {
                Err(CaptureError::WorksheetNotFound {
                    name: worksheet.to_string(),
                })
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSheets {
        writes: Mutex<Vec<(String, String, String)>>,
        fail_on_cell: Option<&'static str>,
    }

    #[async_trait]
    impl SheetsApi for RecordingSheets {
        async fn sheet_id(&self, _worksheet: &str) -> Result<u64, CaptureError> {
            Ok(0)
        }

        async fn update_cell(&self, worksheet: &str, cell: &str, value: &str) -> Result<(), CaptureError> {
            if self.fail_on_cell == Some(cell) {
                return Err(CaptureError::PermissionDenied {
                    message: "read-only".into(),
                });
            }
            self.writes
                .lock()
                .unwrap()
                .push((worksheet.into(), cell.into(), value.into()));
            Ok(())
        }
    }

    const CELLS: CaptureCells<'static> = CaptureCells {
        worksheet: "表示1",
        label_cell: "C14",
        content_cell: "C15",
    };

    #[tokio::test]
    async fn writes_label_then_content() {
        let api = RecordingSheets::default();
        write_capture(&api, CELLS, TriggerCategory::CodeForm, "KCG-ABCDEF")
            .await
            .unwrap();
        let writes = api.writes.lock().unwrap();
        assert_eq!(
            *writes,
            vec![
                ("表示1".into(), "C14".into(), "デッキコード".into()),
                ("表示1".into(), "C15".into(), "KCG-ABCDEF".into()),
            ]
        );
    }

    #[tokio::test]
    async fn failed_label_write_skips_content() {
        let api = RecordingSheets {
            fail_on_cell: Some("C14"),
            ..Default::default()
        };
        let err = write_capture(&api, CELLS, TriggerCategory::ListForm, "a/b")
            .await
            .unwrap_err();
        assert!(err.is_permission_denied());
        assert!(api.writes.lock().unwrap().is_empty());
    }

    #[test]
    fn api_error_maps_403_to_permission_denied() {
        let body = br#"{"error":{"code":403,"message":"The caller does not have permission","status":"PERMISSION_DENIED"}}"#;
        let err = api_error(StatusCode::FORBIDDEN, body);
        assert!(err.is_permission_denied());
        assert!(err.to_string().contains("The caller does not have permission"));
    }

    #[test]
    fn api_error_keeps_code_and_message() {
        let body = br#"{"error":{"code":400,"message":"Unable to parse range: 'X'!C14"}}"#;
        match api_error(StatusCode::BAD_REQUEST, body) {
            CaptureError::WriteFailed { code, message } => {
                assert_eq!(code, Some(400));
                assert!(message.starts_with("Unable to parse range"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn api_error_tolerates_non_json() {
        match api_error(StatusCode::BAD_GATEWAY, b"<html>bad gateway</html>") {
            CaptureError::WriteFailed { code, message } => {
                assert_eq!(code, Some(502));
                assert!(message.contains("bad gateway"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn a1_range_quotes_titles() {
        assert_eq!(a1_range("表示1", "C14"), "'表示1'!C14");
        assert_eq!(a1_range("Bob's", "A1"), "'Bob''s'!A1");
    }

    // ── Sheets v4 over a local stub ──────────────────────────────────────

    use crate::session::{Credentials, Endpoints, ServiceAccountKey};
    use crate::test_support::{self, Recorded};

    const METADATA: &str = r#"{"sheets":[
        {"properties":{"sheetId":0,"title":"Sheet1","index":0}},
        {"properties":{"sheetId":1234,"title":"表示1","index":1}}
    ]}"#;

    fn session_at(base: &str, credentials: Credentials) -> Arc<Session> {
        let endpoints = Endpoints {
            sheets_api: base.to_string(),
            ..Endpoints::default()
        };
        Arc::new(Session::with_endpoints("sheet-1", credentials, endpoints).unwrap())
    }

    fn static_session(base: &str) -> Arc<Session> {
        session_at(base, Credentials::Static("test-token".into()))
    }

    #[tokio::test]
    async fn sheet_id_resolves_title() {
        let (base, server) = test_support::serve(vec![(200, METADATA)]).await;
        let sheets = GoogleSheets::new(static_session(&base));

        assert_eq!(sheets.sheet_id("表示1").await.unwrap(), 1234);

        let seen: Vec<Recorded> = server.await.unwrap();
        let line = seen[0].request_line();
        assert!(line.starts_with("GET /v4/spreadsheets/sheet-1?"), "got: {line}");
        assert!(line.contains("fields=sheets.properties"));
        assert!(seen[0].has_header("authorization", "Bearer test-token"));
    }

    #[tokio::test]
    async fn sheet_id_reports_missing_worksheet() {
        let (base, _server) = test_support::serve(vec![(200, METADATA)]).await;
        let sheets = GoogleSheets::new(static_session(&base));

        match sheets.sheet_id("Display").await {
            Err(CaptureError::WorksheetNotFound { name }) => assert_eq!(name, "Display"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn update_cell_puts_user_entered_value() {
        let (base, server) = test_support::serve(vec![(200, "{}")]).await;
        let sheets = GoogleSheets::new(static_session(&base));

        sheets.update_cell("表示1", "C15", "KCG-ABCDEF").await.unwrap();

        let seen = server.await.unwrap();
        let line = seen[0].request_line();
        assert!(line.starts_with("PUT /v4/spreadsheets/sheet-1/values/"), "got: {line}");
        assert!(line.contains("valueInputOption=USER_ENTERED"));
        assert!(line.contains("C15"));

        let payload: serde_json::Value = serde_json::from_str(&seen[0].body).unwrap();
        assert_eq!(payload["range"], "'表示1'!C15");
        assert_eq!(payload["values"][0][0], "KCG-ABCDEF");
    }

    #[tokio::test]
    async fn unparseable_range_means_missing_worksheet() {
        let body = r#"{"error":{"code":400,"message":"Unable to parse range: 'Display'!C14","status":"INVALID_ARGUMENT"}}"#;
        let (base, _server) = test_support::serve(vec![(400, body)]).await;
        let sheets = GoogleSheets::new(static_session(&base));

        match sheets.update_cell("Display", "C14", "x").await {
            Err(CaptureError::WorksheetNotFound { name }) => assert_eq!(name, "Display"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn unauthorized_drops_cached_token() {
        let key = ServiceAccountKey::from_json(
            r#"{"client_email":"capture@example.iam.gserviceaccount.com","private_key":"unused"}"#,
        )
        .unwrap();
        let body = r#"{"error":{"code":401,"message":"Request had invalid authentication credentials."}}"#;
        let (base, server) = test_support::serve(vec![(401, body)]).await;
        let session = session_at(&base, Credentials::ServiceAccount(key));
        session.seed_token("stale-token", Duration::from_secs(3600)).await;
        let sheets = GoogleSheets::new(Arc::clone(&session));

        let err = sheets.update_cell("表示1", "C14", "x").await.unwrap_err();
        assert!(
            matches!(err, CaptureError::WriteFailed { code: Some(401), .. }),
            "got {err:?}"
        );
        assert_eq!(session.cached_token().await, None);
        assert!(server.await.unwrap()[0].has_header("authorization", "Bearer stale-token"));
    }

    #[tokio::test]
    async fn hung_request_times_out() {
        let base = test_support::serve_silence().await;
        let sheets =
            GoogleSheets::new(static_session(&base)).with_timeout(Duration::from_secs(1));

        match sheets.update_cell("表示1", "C14", "x").await {
            Err(CaptureError::WriteFailed { code: None, message }) => {
                assert!(message.contains("timed out after 1s"), "got: {message}")
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn refused_connection_keeps_its_cause() {
        let base = test_support::closed_port().await;
        let sheets = GoogleSheets::new(static_session(&base));

        let err = sheets.update_cell("表示1", "C14", "x").await.unwrap_err();
        assert!(
            matches!(err, CaptureError::Unreachable { service: "spreadsheet API", .. }),
            "got {err:?}"
        );
        assert!(std::error::Error::source(&err).is_some());
        let detail = error_chain(&err).to_lowercase();
        assert!(detail.contains("refused"), "got: {detail}");
    }
}
