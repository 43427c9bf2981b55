//! In-process share server for end-to-end tests.
//!
//! Enough of the server contract to drive the client over real HTTP: storage,
//! download counting, delay, geo restriction by a settable client country,
//! receipts, revoke and validate. No persistence, no expiry sweeps.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::extract::{Multipart, Path, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Duration, Utc};
use serde_json::json;

use sealdrop_core::config::SealdropConfig;
use sealdrop_core::types::{FileInfo, OwnedFile, ValidateResponse};

const EEA: &[&str] = &[
    "AT", "BE", "BG", "CY", "CZ", "DE", "DK", "EE", "ES", "FI", "FR", "GR", "HR", "HU", "IE",
    "IS", "IT", "LI", "LT", "LU", "LV", "MT", "NL", "NO", "PL", "PT", "RO", "SE", "SI", "SK",
];
const GDPR_ALIGNED: &[&str] = &["CH", "GB", "JP", "KR", "NZ", "UY"];

#[derive(Debug, Clone)]
pub struct StoredUpload {
    pub kind: String,
    pub body: Vec<u8>,
    pub filename_header: String,
    pub count: u32,
    pub expires: DateTime<Utc>,
    pub available_at: DateTime<Utc>,
    pub ephemeral: u32,
    pub email: Option<String>,
    /// `None` means any country.
    pub allowed: Option<Vec<String>>,
    pub owner_token: String,
}

#[derive(Default)]
pub struct ServerState {
    pub files: HashMap<String, StoredUpload>,
    pub client_country: String,
    pub receipts: Vec<String>,
    pub fetches: usize,
    next_id: u32,
}

type Shared = Arc<Mutex<ServerState>>;

pub struct FakeServer {
    pub url: String,
    pub state: Shared,
    task: tokio::task::JoinHandle<()>,
}

impl FakeServer {
    pub async fn start() -> Self {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("sealdrop_client=debug")
            .with_test_writer()
            .try_init();

        let state: Shared = Arc::new(Mutex::new(ServerState {
            client_country: "DE".into(),
            ..Default::default()
        }));

        let app = Router::new()
            .route("/api/v1/files", post(upload))
            .route("/api/v1/files/validate", post(validate))
            .route(
                "/api/v1/files/{id}",
                get(download).post(confirm).delete(revoke),
            )
            .route("/api/v1/countries", get(countries))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind fake server");
        let addr = listener.local_addr().expect("local addr");
        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        FakeServer {
            url: format!("http://{addr}"),
            state,
            task,
        }
    }

    pub fn config(&self) -> SealdropConfig {
        let mut config = SealdropConfig::default();
        config.server.url = self.url.clone();
        config.viewer.tick_ms = 10;
        config.viewer.unblur_grace_ms = 20;
        config
    }

    pub fn set_country(&self, code: &str) {
        self.state.lock().unwrap().client_country = code.to_string();
    }

    pub fn stored(&self, id: &str) -> Option<StoredUpload> {
        self.state.lock().unwrap().files.get(id).cloned()
    }

    pub fn receipts(&self) -> Vec<String> {
        self.state.lock().unwrap().receipts.clone()
    }

    pub fn fetches(&self) -> usize {
        self.state.lock().unwrap().fetches
    }

    /// Wait for `n` receipt confirmations (they are fire-and-forget on the client).
    pub async fn wait_receipts(&self, n: usize) -> Vec<String> {
        for _ in 0..500 {
            let receipts = self.receipts();
            if receipts.len() >= n {
                return receipts;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("expected {n} receipts, got {:?}", self.receipts());
    }
}

impl Drop for FakeServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "message": message }))).into_response()
}

async fn upload(State(state): State<Shared>, mut form: Multipart) -> Response {
    let mut fields: HashMap<String, String> = HashMap::new();
    let mut body = Vec::new();
    while let Ok(Some(field)) = form.next_field().await {
        let name = field.name().unwrap_or_default().to_string();
        if name == "file" {
            match field.bytes().await {
                Ok(bytes) => body = bytes.to_vec(),
                Err(_) => return error(StatusCode::BAD_REQUEST, "unreadable file part"),
            }
        } else {
            match field.text().await {
                Ok(text) => {
                    fields.insert(name, text);
                }
                Err(_) => return error(StatusCode::BAD_REQUEST, "unreadable form field"),
            }
        }
    }

    let Some(kind) = fields.get("type").cloned() else {
        return error(StatusCode::BAD_REQUEST, "missing type");
    };
    let Some(filename_header) = fields.get("filename").cloned() else {
        return error(StatusCode::BAD_REQUEST, "missing filename");
    };
    let number = |name: &str, default: u32| -> u32 {
        fields
            .get(name)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    };
    let count = number("count", 1);
    let expiry = number("expiry", 7);
    let delay = number("delay", 0);
    let ephemeral = number("ephemeral", 0);
    if !(1..=15).contains(&count) || !(1..=14).contains(&expiry) {
        return error(StatusCode::BAD_REQUEST, "invalid count or expiry");
    }

    let allowed = if let Some(list) = fields.get("allowed-countries") {
        Some(list.split(',').map(str::to_string).collect())
    } else if fields.get("only-eea").map(String::as_str) == Some("true") {
        let mut codes: Vec<String> = EEA.iter().map(|c| c.to_string()).collect();
        if fields.get("include-other").map(String::as_str) == Some("true") {
            codes.extend(GDPR_ALIGNED.iter().map(|c| c.to_string()));
        }
        Some(codes)
    } else {
        None
    };

    let now = Utc::now();
    let mut state = state.lock().unwrap();
    state.next_id += 1;
    let id = format!("f{:05}", state.next_id);
    let owner_token = format!("tok{:05}", state.next_id);
    state.files.insert(
        id.clone(),
        StoredUpload {
            kind,
            body,
            filename_header,
            count,
            expires: now + Duration::days(i64::from(expiry)),
            available_at: now + Duration::minutes(i64::from(delay)),
            ephemeral,
            email: fields.get("email").cloned(),
            allowed,
            owner_token: owner_token.clone(),
        },
    );

    let mut headers = HeaderMap::new();
    if let Ok(location) = HeaderValue::from_str(&format!("/d/{id}")) {
        headers.insert(header::LOCATION, location);
    }
    (
        StatusCode::OK,
        headers,
        Json(json!({
            "message": "file uploaded",
            "fileId": id,
            "ownerToken": owner_token,
        })),
    )
        .into_response()
}

async fn download(State(state): State<Shared>, Path(id): Path<String>) -> Response {
    let mut state = state.lock().unwrap();
    state.fetches += 1;
    let country = state.client_country.clone();
    let Some(file) = state.files.get_mut(&id) else {
        return error(StatusCode::NOT_FOUND, "file not found");
    };
    if let Some(allowed) = &file.allowed {
        if !allowed.iter().any(|c| *c == country) {
            return error(StatusCode::FORBIDDEN, "download from this location forbidden");
        }
    }
    let now = Utc::now();
    if now < file.available_at {
        return error(StatusCode::FORBIDDEN, "file not yet available");
    }
    if file.count == 0 || now > file.expires {
        return error(StatusCode::NOT_FOUND, "download count expired");
    }
    file.count -= 1;

    let mut headers = HeaderMap::new();
    let mut put = |name: &'static str, value: &str| {
        if let Ok(v) = HeaderValue::from_str(value) {
            headers.insert(name, v);
        }
    };
    put("x-type", &file.kind);
    put("x-filename", &file.filename_header);
    if file.kind == "image" {
        put("x-ephemeral", &file.ephemeral.to_string());
    }
    (StatusCode::OK, headers, file.body.clone()).into_response()
}

async fn confirm(State(state): State<Shared>, Path(id): Path<String>) -> Response {
    let mut state = state.lock().unwrap();
    if !state.files.contains_key(&id) {
        return error(StatusCode::NOT_FOUND, "file not found");
    }
    state.receipts.push(id);
    StatusCode::OK.into_response()
}

async fn revoke(State(state): State<Shared>, Path(id): Path<String>, mut form: Multipart) -> Response {
    let mut token = None;
    while let Ok(Some(field)) = form.next_field().await {
        if field.name() == Some("ownerToken") {
            token = field.text().await.ok();
        }
    }

    let mut state = state.lock().unwrap();
    let Some(file) = state.files.get(&id) else {
        return error(StatusCode::NOT_FOUND, "file not found");
    };
    if token.as_deref() != Some(file.owner_token.as_str()) {
        return error(StatusCode::UNAUTHORIZED, "owner token mismatch");
    }
    state.files.remove(&id);
    (StatusCode::OK, Json(json!({ "message": "file deleted" }))).into_response()
}

async fn validate(State(state): State<Shared>, Json(owned): Json<Vec<OwnedFile>>) -> Response {
    let state = state.lock().unwrap();
    let file_info = owned
        .into_iter()
        .map(|o| {
            let info = match state.files.get(&o.file_id) {
                None => FileInfo {
                    expiry_date: DateTime::from_timestamp(-62_135_596_800, 0),
                    count: Some(0),
                    error: Some(String::new()),
                },
                Some(f) if f.owner_token != o.owner_token => FileInfo {
                    error: Some("Owner token mismatch".into()),
                    ..Default::default()
                },
                Some(f) => FileInfo {
                    expiry_date: Some(f.expires),
                    count: Some(i64::from(f.count)),
                    error: None,
                },
            };
            (o.file_id, info)
        })
        .collect();
    Json(ValidateResponse { file_info }).into_response()
}

async fn countries(State(state): State<Shared>) -> Response {
    let country = state.lock().unwrap().client_country.clone();
    Json(json!({
        "countries": [
            { "code": "DE", "name": "Germany" },
            { "code": "FR", "name": "France" },
            { "code": "CH", "name": "Switzerland" },
            { "code": "US", "name": "United States" },
        ],
        "groups": { "euEEA": EEA, "gdprAligned": GDPR_ALIGNED },
        "yourCountry": country,
    }))
    .into_response()
}
