//! Upload pipeline: validate → strip → key → two envelopes → POST → share URL.
//!
//! Nothing is generated or encrypted until every option has been validated. The
//! key only ever leaves this module inside the returned share URL fragment.

use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use secrecy::SecretString;
use tracing::{debug, info, warn};

use sealdrop_core::types::{ContentKind, UploadOptions, MAX_FILENAME_HEADER_LEN};
use sealdrop_core::{ShareError, ShareResult};
use sealdrop_crypto::{
    derive_legacy_key, encode_key, encrypt, generate_key, generate_password, generate_salt,
    FilenameHeader, SymmetricKey,
};

use crate::api::{ShareApi, UploadRequest};
use crate::context::ShareContext;
use crate::registry::RegistryEntry;
use crate::strip::strip_or_passthrough;

/// Characters kept from a text message when naming it.
const TEXT_NAME_CHARS: usize = 21;

const MIN_TEXT_CHARS: usize = 3;

/// What to share.
#[derive(Debug, Clone)]
pub enum Content {
    File { name: String, bytes: Vec<u8> },
    Text(String),
    Image {
        name: String,
        bytes: Vec<u8>,
        /// Overrides `UploadOptions::ephemeral_seconds` when set.
        ephemeral_seconds: Option<u32>,
    },
}

impl Content {
    pub fn kind(&self) -> ContentKind {
        match self {
            Content::File { .. } => ContentKind::File,
            Content::Text(_) => ContentKind::Text,
            Content::Image { .. } => ContentKind::Image,
        }
    }

    fn len(&self) -> usize {
        match self {
            Content::File { bytes, .. } | Content::Image { bytes, .. } => bytes.len(),
            Content::Text(text) => text.len(),
        }
    }
}

/// How the content key is produced and handed to the recipient.
#[derive(Debug, Default)]
pub enum KeyMode {
    /// Random key, carried in the share URL fragment.
    #[default]
    Fragment,
    /// PBKDF2 key from a password. A password is generated when none is given.
    Legacy { password: Option<SecretString> },
}

#[derive(Debug)]
pub struct UploadReceipt {
    pub file_id: String,
    pub owner_token: String,
    /// Server-relative location, e.g. `/d/{fileId}`.
    pub location: String,
    /// Absolute URL to hand to the recipient.
    pub share_url: String,
    /// Plaintext filename as uploaded (after any image rename).
    pub filename: String,
    /// Legacy mode only; must reach the recipient separately.
    pub password: Option<SecretString>,
}

struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct UploadPipeline<A> {
    ctx: ShareContext<A>,
    busy: AtomicBool,
}

impl<A: ShareApi> UploadPipeline<A> {
    pub fn new(ctx: ShareContext<A>) -> Self {
        Self {
            ctx,
            busy: AtomicBool::new(false),
        }
    }

    pub fn context(&self) -> &ShareContext<A> {
        &self.ctx
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Encrypt and upload `content`.
    ///
    /// Returns `ShareError::Busy` without side effects while another submit on
    /// this pipeline is in flight.
    pub async fn submit(
        &self,
        content: Content,
        options: &UploadOptions,
        mode: KeyMode,
    ) -> ShareResult<UploadReceipt> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ShareError::Busy);
        }
        let _busy = BusyGuard(&self.busy);

        let kind = content.kind();
        let options = effective_options(&content, options);
        options.validate(kind)?;
        self.check_content(&content)?;

        let upload = &self.ctx.config.upload;
        let (filename, body) = match content {
            Content::File { name, bytes } => (name, bytes),
            Content::Text(text) => (text_filename(&text), text.into_bytes()),
            Content::Image { name, bytes, .. } => {
                let quality = upload.jpeg_quality;
                tokio::task::spawn_blocking(move || strip_or_passthrough(&name, bytes, quality))
                    .await
                    .map_err(|e| ShareError::Other(anyhow::anyhow!("strip task: {e}")))?
            }
        };

        let (key, header, password) = match mode {
            KeyMode::Fragment => {
                let key = generate_key(upload.key_length);
                let header = FilenameHeader::encode_modern(&filename, &key)?;
                (key, header, None)
            }
            KeyMode::Legacy { password } => {
                let password = password.unwrap_or_else(generate_password);
                let salt = generate_salt();
                let (key, password) = tokio::task::spawn_blocking(move || {
                    let key = derive_legacy_key(&password, &salt);
                    (key, password)
                })
                .await
                .map_err(|e| ShareError::Other(anyhow::anyhow!("key derivation task: {e}")))?;
                let header = FilenameHeader::encode_legacy(&filename, &key, &salt)?;
                (key, header, Some(password))
            }
        };

        if header.len() > MAX_FILENAME_HEADER_LEN {
            return Err(ShareError::Validation(format!(
                "filename too long: {} bytes once encrypted (max {MAX_FILENAME_HEADER_LEN})",
                header.len()
            )));
        }

        let encrypted_content = {
            let key = key.clone();
            tokio::task::spawn_blocking(move || encrypt(&body, &key))
                .await
                .map_err(|e| ShareError::Other(anyhow::anyhow!("encrypt task: {e}")))??
        };
        debug!(kind = %kind, size = encrypted_content.len(), "content sealed");

        let request = UploadRequest {
            content_type: kind,
            encrypted_content,
            encrypted_filename_b64: header,
            options,
        };
        let accepted = self.ctx.api.upload(&request).await?;

        let share_url = self.share_url(&accepted.location, &key, password.is_some());
        info!(file_id = %accepted.file_id, kind = %kind, "upload accepted");

        let receipt = UploadReceipt {
            file_id: accepted.file_id,
            owner_token: accepted.owner_token,
            location: accepted.location,
            share_url,
            filename,
            password,
        };
        self.remember(&receipt, request.options.email.as_deref()).await;
        Ok(receipt)
    }

    fn check_content(&self, content: &Content) -> ShareResult<()> {
        let upload = &self.ctx.config.upload;
        if content.len() as u64 > upload.max_file_size_bytes() {
            return Err(ShareError::Validation(format!(
                "content is {} bytes, the limit is {} MiB",
                content.len(),
                upload.max_file_size_mib
            )));
        }
        if let Content::Text(text) = content {
            let chars = text.chars().count();
            if !(MIN_TEXT_CHARS..=upload.content_max_length).contains(&chars) {
                return Err(ShareError::Validation(format!(
                    "text must be between {MIN_TEXT_CHARS} and {} characters, got {chars}",
                    upload.content_max_length
                )));
            }
        }
        Ok(())
    }

    fn share_url(&self, location: &str, key: &SymmetricKey, legacy: bool) -> String {
        let url = self.ctx.absolute_url(location);
        if legacy {
            url
        } else {
            format!("{url}#{}", encode_key(key))
        }
    }

    /// Record the upload locally. Failures are logged only.
    async fn remember(&self, receipt: &UploadReceipt, email: Option<&str>) {
        if !self.ctx.config.upload.save_files {
            return;
        }
        let Some(registry) = &self.ctx.registry else {
            return;
        };
        let mut registry = registry.lock().await;
        registry.record(RegistryEntry {
            filename: receipt.filename.clone(),
            file_id: receipt.file_id.clone(),
            owner_token: receipt.owner_token.clone(),
            location: receipt.share_url.clone(),
            created_at: Utc::now(),
        });
        if let Some(email) = email {
            registry.remember_email(email);
        }
        if let Err(e) = registry.flush() {
            warn!(file_id = %receipt.file_id, "failed to save upload to registry: {e}");
        }
    }
}

fn effective_options(content: &Content, options: &UploadOptions) -> UploadOptions {
    let mut options = options.clone();
    if let Content::Image {
        ephemeral_seconds: Some(seconds),
        ..
    } = content
    {
        options.ephemeral_seconds = Some(*seconds);
    }
    options
}

/// `hello/world\n...` → `hello_world_....txt`
pub fn text_filename(text: &str) -> String {
    let stem: String = text
        .chars()
        .take(TEXT_NAME_CHARS)
        .map(|c| match c {
            '/' | '\\' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    format!("{stem}.txt")
}
