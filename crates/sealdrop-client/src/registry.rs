//! Local registry of uploaded files and their owner tokens.
//!
//! The whole registry lives in memory and is flushed atomically (temp file +
//! rename). Concurrent writers race with last-writer-wins; the server stays
//! authoritative on whether a file still exists.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use sealdrop_core::types::{FileInfo, OwnedFile, RevokeOutcome};
use sealdrop_core::{ShareError, ShareResult};

use crate::api::ShareApi;

/// One uploaded file, as remembered by the sender
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryEntry {
    /// Plaintext filename (never sent to the server unencrypted)
    pub filename: String,
    pub file_id: String,
    /// Secret that authorises revoke and validate
    pub owner_token: String,
    /// Full share URL, including the key fragment
    pub location: String,
    pub created_at: DateTime<Utc>,
}

/// Server-reported state of a registered file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileStatus {
    Active {
        downloads_left: i64,
        expires: DateTime<Utc>,
    },
    Expired,
    /// The server refused to report on this file (e.g. owner token mismatch).
    Error(String),
    /// The server did not mention this file at all.
    Unknown,
}

impl FileStatus {
    pub fn from_info(info: Option<&FileInfo>, now: DateTime<Utc>) -> Self {
        let Some(info) = info else {
            return FileStatus::Unknown;
        };
        if let Some(err) = info.error.as_deref().filter(|e| !e.is_empty()) {
            return FileStatus::Error(err.to_string());
        }
        let count = info.count.unwrap_or(0);
        match info.expiry_date {
            // a server that lost the file reports count 0 and year-1 expiry
            Some(expires) if count >= 1 && expires > now => {
                FileStatus::Active {
                    downloads_left: count,
                    expires,
                }
            }
            _ => FileStatus::Expired,
        }
    }

    pub fn is_expired(&self) -> bool {
        matches!(self, FileStatus::Expired)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegistryFile {
    #[serde(default)]
    files: BTreeMap<String, RegistryEntry>,
    #[serde(default)]
    last_email: Option<String>,
}

pub struct LocalRegistry {
    path: PathBuf,
    data: RegistryFile,
    dirty: bool,
}

impl LocalRegistry {
    /// Load or create a registry at the given path.
    /// If the file doesn't exist, starts empty.
    pub fn open(path: &Path) -> ShareResult<Self> {
        let data = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            serde_json::from_str(&content).map_err(|e| {
                ShareError::Config(format!("parsing registry {}: {e}", path.display()))
            })?
        } else {
            RegistryFile::default()
        };

        debug!(path = %path.display(), files = data.files.len(), "registry opened");
        Ok(LocalRegistry {
            path: path.to_path_buf(),
            data,
            dirty: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&mut self, entry: RegistryEntry) {
        self.data.files.insert(entry.file_id.clone(), entry);
        self.dirty = true;
    }

    pub fn remove(&mut self, file_id: &str) -> Option<RegistryEntry> {
        let removed = self.data.files.remove(file_id);
        if removed.is_some() {
            self.dirty = true;
        }
        removed
    }

    pub fn get(&self, file_id: &str) -> Option<&RegistryEntry> {
        self.data.files.get(file_id)
    }

    /// All entries, oldest first.
    pub fn list(&self) -> Vec<&RegistryEntry> {
        let mut entries: Vec<_> = self.data.files.values().collect();
        entries.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.file_id.cmp(&b.file_id))
        });
        entries
    }

    pub fn len(&self) -> usize {
        self.data.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.files.is_empty()
    }

    pub fn remember_email(&mut self, email: &str) {
        if self.data.last_email.as_deref() != Some(email) {
            self.data.last_email = Some(email.to_string());
            self.dirty = true;
        }
    }

    pub fn last_email(&self) -> Option<&str> {
        self.data.last_email.as_deref()
    }

    /// Flush dirty changes to disk using an atomic write (write then rename).
    pub fn flush(&mut self) -> ShareResult<()> {
        if !self.dirty {
            return Ok(());
        }

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let json = serde_json::to_string_pretty(&self.data)?;

        let tmp_path = self.path.with_extension("tmp");
        std::fs::write(&tmp_path, &json)?;
        std::fs::rename(&tmp_path, &self.path)?;

        self.dirty = false;
        Ok(())
    }

    fn owned_files(&self) -> Vec<OwnedFile> {
        self.data
            .files
            .values()
            .map(|e| OwnedFile {
                file_id: e.file_id.clone(),
                owner_token: e.owner_token.clone(),
            })
            .collect()
    }

    /// Ask the server about every registered file.
    pub async fn refresh<A: ShareApi>(
        &self,
        api: &A,
        now: DateTime<Utc>,
    ) -> ShareResult<Vec<(RegistryEntry, FileStatus)>> {
        let owned = self.owned_files();
        if owned.is_empty() {
            return Ok(Vec::new());
        }

        let response = api.validate(&owned).await?;
        let statuses = self
            .list()
            .into_iter()
            .map(|entry| {
                let status = FileStatus::from_info(response.file_info.get(&entry.file_id), now);
                (entry.clone(), status)
            })
            .collect();
        Ok(statuses)
    }

    /// Revoke a file on the server and forget it locally.
    ///
    /// A 404 also removes the local record: the file is already gone.
    pub async fn revoke<A: ShareApi>(&mut self, api: &A, file_id: &str) -> ShareResult<RevokeOutcome> {
        let owner_token = self
            .get(file_id)
            .map(|e| e.owner_token.clone())
            .ok_or_else(|| ShareError::Validation(format!("no owner token recorded for {file_id}")))?;

        let outcome = api.revoke(file_id, &owner_token).await?;
        self.remove(file_id);
        self.flush()?;
        info!(file_id, ?outcome, "file revoked");
        Ok(outcome)
    }
}

impl Drop for LocalRegistry {
    fn drop(&mut self) {
        if self.dirty {
            if let Err(e) = self.flush() {
                warn!("failed to flush registry on drop: {e}");
            }
        }
    }
}
