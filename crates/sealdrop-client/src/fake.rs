//! In-memory [`ShareApi`] for unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{Duration, TimeZone, Utc};
use tokio::sync::Notify;

use sealdrop_core::types::{
    ContentKind, Countries, Country, CountryGroups, DownloadHeaders, DownloadResponse, FileInfo,
    OwnedFile, RevokeOutcome, UploadAccepted, ValidateResponse,
};
use sealdrop_core::{ShareError, ShareResult};

use crate::api::{ShareApi, UploadRequest};

#[derive(Debug, Clone)]
pub(crate) struct StoredFile {
    pub kind: ContentKind,
    pub body: Vec<u8>,
    pub filename_header: String,
    pub count: u8,
    pub ephemeral_seconds: u32,
    pub owner_token: String,
}

#[derive(Default)]
pub(crate) struct MemoryShareApi {
    files: Mutex<HashMap<String, StoredFile>>,
    last_upload: Mutex<Option<UploadRequest>>,
    gate: Mutex<Option<Arc<Notify>>>,
    pub fetches: AtomicUsize,
    pub uploads: AtomicUsize,
    pub receipts: AtomicUsize,
    receipt_signal: Notify,
}

impl MemoryShareApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, file_id: &str, file: StoredFile) {
        self.files.lock().unwrap().insert(file_id.to_string(), file);
    }

    pub fn stored(&self, file_id: &str) -> Option<StoredFile> {
        self.files.lock().unwrap().get(file_id).cloned()
    }

    pub fn last_upload(&self) -> Option<UploadRequest> {
        self.last_upload.lock().unwrap().clone()
    }

    /// Make uploads and fetches wait until the returned notify fires.
    pub fn hold(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    pub fn receipts(&self) -> usize {
        self.receipts.load(Ordering::SeqCst)
    }

    pub async fn next_receipt(&self) {
        self.receipt_signal.notified().await;
    }

    async fn pass_gate(&self) {
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
    }
}

impl ShareApi for MemoryShareApi {
    async fn upload(&self, request: &UploadRequest) -> ShareResult<UploadAccepted> {
        self.pass_gate().await;
        let n = self.uploads.fetch_add(1, Ordering::SeqCst) + 1;
        let file_id = format!("file{n:04}");
        let owner_token = format!("owner{n:04}");

        self.insert(
            &file_id,
            StoredFile {
                kind: request.content_type,
                body: request.encrypted_content.clone(),
                filename_header: request.encrypted_filename_b64.clone(),
                count: request.options.count,
                ephemeral_seconds: request.options.ephemeral_seconds.unwrap_or(0),
                owner_token: owner_token.clone(),
            },
        );
        *self.last_upload.lock().unwrap() = Some(request.clone());

        Ok(UploadAccepted {
            message: Some("file uploaded".into()),
            location: format!("/d/{file_id}"),
            file_id,
            owner_token,
        })
    }

    async fn fetch(&self, file_id: &str) -> ShareResult<DownloadResponse> {
        self.pass_gate().await;
        self.fetches.fetch_add(1, Ordering::SeqCst);

        let mut files = self.files.lock().unwrap();
        let file = files
            .get_mut(file_id)
            .ok_or_else(|| ShareError::server(404, "file not found"))?;
        if file.count < 1 {
            return Err(ShareError::server(404, "download count expired"));
        }
        file.count -= 1;

        let headers = DownloadHeaders {
            x_type: Some(file.kind.as_str().to_string()),
            x_filename: Some(file.filename_header.clone()),
            x_ephemeral: (file.kind == ContentKind::Image)
                .then(|| file.ephemeral_seconds.to_string()),
        };
        DownloadResponse::from_parts(&headers, file.body.clone())
    }

    async fn confirm_receipt(&self, _file_id: &str) -> ShareResult<()> {
        self.receipts.fetch_add(1, Ordering::SeqCst);
        self.receipt_signal.notify_one();
        Ok(())
    }

    async fn revoke(&self, file_id: &str, owner_token: &str) -> ShareResult<RevokeOutcome> {
        let mut files = self.files.lock().unwrap();
        match files.get(file_id) {
            None => Ok(RevokeOutcome::NotFound),
            Some(f) if f.owner_token != owner_token => {
                Err(ShareError::server(401, "owner token mismatch"))
            }
            Some(_) => {
                files.remove(file_id);
                Ok(RevokeOutcome::Deleted)
            }
        }
    }

    async fn validate(&self, owned: &[OwnedFile]) -> ShareResult<ValidateResponse> {
        let files = self.files.lock().unwrap();
        let file_info = owned
            .iter()
            .map(|o| {
                let info = match files.get(&o.file_id) {
                    None => FileInfo {
                        expiry_date: Utc.with_ymd_and_hms(1, 1, 1, 0, 0, 0).single(),
                        count: Some(0),
                        error: Some(String::new()),
                    },
                    Some(f) if f.owner_token != o.owner_token => FileInfo {
                        error: Some("Owner token mismatch".into()),
                        ..Default::default()
                    },
                    Some(f) => FileInfo {
                        expiry_date: Some(Utc::now() + Duration::days(7)),
                        count: Some(i64::from(f.count)),
                        error: None,
                    },
                };
                (o.file_id.clone(), info)
            })
            .collect();
        Ok(ValidateResponse { file_info })
    }

    async fn countries(&self) -> ShareResult<Countries> {
        Ok(Countries {
            countries: vec![
                Country {
                    code: "DE".into(),
                    name: "Germany".into(),
                },
                Country {
                    code: "CH".into(),
                    name: "Switzerland".into(),
                },
            ],
            groups: CountryGroups {
                eu_eea: vec!["DE".into()],
                gdpr_aligned: vec!["CH".into()],
            },
            your_country: Some("DE".into()),
        })
    }
}
