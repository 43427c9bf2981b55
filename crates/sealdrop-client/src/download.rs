//! Download state machine: one fetch, one decrypt attempt, then hand-off.
//!
//! ```text
//! Idle ─┬─(fragment key / ?p=)──► Fetching ─► Decrypting ─┬─► TextReady ─────────► Successful
//!       │                                                 ├─► ImageReady ─► Viewing ─► Successful
//!       └─► AwaitingPassword ─(submit)─┘                  ├─► EphemeralPending ─► Viewing ─► Closed
//!                                                         ├─► FileReady ─(finish_file)─► Successful
//!                                                         └─► Failed
//! ```
//!
//! Every failure is terminal. An in-flight request is never cancelled; if the
//! session is unmounted meanwhile, its result is dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use secrecy::{ExposeSecret, SecretString};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use sealdrop_core::types::{ContentType, DownloadResponse};
use sealdrop_core::{ShareError, ShareResult};
use sealdrop_crypto::{decode_key, decrypt, derive_legacy_key, FilenameHeader, SymmetricKey};

use crate::api::ShareApi;
use crate::context::ShareContext;
use crate::link::{LinkSecret, ShareLink};
use crate::viewer::{EphemeralViewer, Surface, ViewerHandle};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadState {
    Idle,
    /// No key in the link; waiting for a manually entered password.
    AwaitingPassword,
    Fetching,
    Decrypting,
    TextReady,
    ImageReady,
    /// Ephemeral image decrypted but not yet revealed.
    EphemeralPending { seconds: u32 },
    Viewing,
    /// Ephemeral viewer closed, or the session was unmounted.
    Closed,
    FileReady,
    Successful,
    Failed(String),
}

impl DownloadState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DownloadState::Successful | DownloadState::Failed(_) | DownloadState::Closed
        )
    }
}

#[derive(Debug)]
pub struct TextDelivery {
    pub filename: String,
    pub text: Zeroizing<String>,
}

#[derive(Debug)]
pub struct ImageDelivery {
    pub filename: String,
    pub bytes: Zeroizing<Vec<u8>>,
    /// `None` for images without a viewing window.
    pub ephemeral_seconds: Option<u32>,
}

#[derive(Debug)]
pub struct FileDelivery {
    pub filename: String,
    pub bytes: Zeroizing<Vec<u8>>,
}

/// Decrypted content handed to the presenter.
#[derive(Debug)]
pub enum Delivery {
    Text(TextDelivery),
    Image(ImageDelivery),
    File(FileDelivery),
}

enum KeySource {
    Ready(SymmetricKey),
    Password(SecretString),
}

/// Resets the busy flag on every exit path.
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct DownloadSession<A> {
    ctx: ShareContext<A>,
    link: ShareLink,
    state: Arc<watch::Sender<DownloadState>>,
    busy: AtomicBool,
    attempted: AtomicBool,
    mounted: AtomicBool,
    receipts: Mutex<Vec<JoinHandle<()>>>,
}

impl<A: ShareApi> DownloadSession<A> {
    pub fn new(ctx: ShareContext<A>, link: ShareLink) -> Self {
        let (tx, _rx) = watch::channel(DownloadState::Idle);
        Self {
            ctx,
            link,
            state: Arc::new(tx),
            busy: AtomicBool::new(false),
            attempted: AtomicBool::new(false),
            mounted: AtomicBool::new(true),
            receipts: Mutex::new(Vec::new()),
        }
    }

    pub fn link(&self) -> &ShareLink {
        &self.link
    }

    pub fn subscribe(&self) -> watch::Receiver<DownloadState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> DownloadState {
        self.state.borrow().clone()
    }

    fn set(&self, next: DownloadState) {
        debug!(file_id = %self.link.file_id, state = ?next, "download state");
        self.state.send_replace(next);
    }

    /// Start the download if the link carries a key or password; otherwise
    /// move to `AwaitingPassword`. Returns `Ok(None)` when nothing was decrypted.
    pub async fn mount(&self) -> ShareResult<Option<Delivery>> {
        if self.state() != DownloadState::Idle {
            return Ok(None);
        }
        let source = match &self.link.secret {
            LinkSecret::Fragment(encoded) => match decode_key(encoded) {
                Ok(key) => KeySource::Ready(key),
                Err(e) => {
                    // malformed key: fail before consuming a download
                    self.attempted.store(true, Ordering::Release);
                    return Err(self.fail(e.into()));
                }
            },
            LinkSecret::QueryPassword(password) => {
                KeySource::Password(SecretString::from(password.expose_secret().to_owned()))
            }
            LinkSecret::None => {
                self.set(DownloadState::AwaitingPassword);
                return Ok(None);
            }
        };
        self.attempt(source).await
    }

    /// Skip the link's own secret and wait for a hand-entered password.
    /// Only possible before anything was fetched.
    pub fn await_password(&self) -> bool {
        self.state.send_if_modified(|state| {
            if *state == DownloadState::Idle {
                *state = DownloadState::AwaitingPassword;
                true
            } else {
                false
            }
        })
    }

    /// Legacy flow: decrypt with a hand-entered password.
    ///
    /// Only valid in `AwaitingPassword`, and only once.
    pub async fn submit_password(&self, password: SecretString) -> ShareResult<Option<Delivery>> {
        if self.state() != DownloadState::AwaitingPassword {
            return Ok(None);
        }
        self.attempt(KeySource::Password(password)).await
    }

    async fn attempt(&self, source: KeySource) -> ShareResult<Option<Delivery>> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ShareError::Busy);
        }
        let _busy = BusyGuard(&self.busy);

        if self.attempted.swap(true, Ordering::AcqRel) {
            return Ok(None);
        }

        self.set(DownloadState::Fetching);
        let fetched = self.ctx.api.fetch(&self.link.file_id).await;
        if !self.is_mounted() {
            debug!(file_id = %self.link.file_id, "session unmounted during fetch, discarding");
            return Ok(None);
        }
        let response = match fetched {
            Ok(r) => r,
            Err(e) => return Err(self.fail(e)),
        };

        self.set(DownloadState::Decrypting);
        let opened = open_response(response, source).await;
        if !self.is_mounted() {
            debug!(file_id = %self.link.file_id, "session unmounted during decrypt, discarding");
            return Ok(None);
        }
        let delivery = match opened {
            Ok(d) => d,
            Err(e) => return Err(self.fail(e)),
        };

        match &delivery {
            Delivery::Text(_) => {
                self.set(DownloadState::TextReady);
                self.spawn_receipt();
            }
            Delivery::Image(image) => match image.ephemeral_seconds {
                Some(seconds) => self.set(DownloadState::EphemeralPending { seconds }),
                None => {
                    self.set(DownloadState::ImageReady);
                    self.spawn_receipt();
                }
            },
            Delivery::File(_) => self.set(DownloadState::FileReady),
        }
        info!(file_id = %self.link.file_id, "download decrypted");
        Ok(Some(delivery))
    }

    fn fail(&self, err: ShareError) -> ShareError {
        warn!(file_id = %self.link.file_id, "download failed: {err}");
        self.set(DownloadState::Failed(err.to_string()));
        err
    }

    fn is_mounted(&self) -> bool {
        self.mounted.load(Ordering::Acquire)
    }

    /// Fire-and-forget `POST {files}/{id}`. Failures are only logged.
    fn spawn_receipt(&self) {
        let api = Arc::clone(&self.ctx.api);
        let file_id = self.link.file_id.clone();
        let task = tokio::spawn(async move {
            match api.confirm_receipt(&file_id).await {
                Ok(()) => debug!(file_id, "receipt confirmed"),
                Err(e) => warn!(file_id, "receipt confirmation failed: {e}"),
            }
        });
        self.receipts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(task);
    }

    /// Wait for outstanding receipt confirmations, e.g. before the process exits.
    pub async fn settle(&self) {
        let pending = std::mem::take(
            &mut *self
                .receipts
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        for task in pending {
            let _ = task.await;
        }
    }

    /// Show a decrypted image.
    ///
    /// Ephemeral images are revealed here: the receipt is confirmed now and the
    /// countdown starts. When the viewer closes the session moves to `Closed`
    /// (ephemeral) or `Successful`.
    pub fn open_viewer(
        &self,
        image: ImageDelivery,
        surface: Box<dyn Surface>,
    ) -> ShareResult<ViewerHandle> {
        let ephemeral = match (self.state(), image.ephemeral_seconds) {
            (DownloadState::EphemeralPending { .. }, Some(_)) => true,
            (DownloadState::ImageReady, None) => false,
            (state, _) => {
                return Err(ShareError::Validation(format!(
                    "no image ready to view (state: {state:?})"
                )))
            }
        };

        if ephemeral {
            self.spawn_receipt();
        }
        self.set(DownloadState::Viewing);

        let handle = EphemeralViewer::spawn(
            image.bytes,
            image.ephemeral_seconds,
            &self.ctx.config.viewer,
            surface,
        );

        let mut viewer_state = handle.subscribe();
        let state = Arc::clone(&self.state);
        let final_state = if ephemeral {
            DownloadState::Closed
        } else {
            DownloadState::Successful
        };
        tokio::spawn(async move {
            // returns Err once the viewer task is gone, which also means closed
            let _ = viewer_state.wait_for(|s| s.closed.is_some()).await;
            state.send_if_modified(|current| {
                if *current == DownloadState::Viewing {
                    *current = final_state;
                    true
                } else {
                    false
                }
            });
        });

        Ok(handle)
    }

    /// Close a text or non-ephemeral image presentation.
    pub fn dismiss(&self) {
        let current = self.state();
        if matches!(current, DownloadState::TextReady | DownloadState::ImageReady) {
            self.set(DownloadState::Successful);
        }
    }

    /// Report the outcome of saving a `FileReady` delivery.
    pub fn finish_file(&self, result: ShareResult<()>) -> DownloadState {
        if self.state() != DownloadState::FileReady {
            return self.state();
        }
        match result {
            Ok(()) => {
                self.spawn_receipt();
                self.set(DownloadState::Successful);
            }
            Err(e) => {
                self.fail(e);
            }
        }
        self.state()
    }

    /// Tear the session down. Results of in-flight requests are discarded.
    pub fn unmount(&self) {
        self.mounted.store(false, Ordering::Release);
        if !self.state().is_terminal() {
            self.set(DownloadState::Closed);
        }
    }
}

/// Decrypt the filename first, then the body.
async fn open_response(response: DownloadResponse, source: KeySource) -> ShareResult<Delivery> {
    let header = response.filename_header_b64.clone();
    let content_type = response.content_type;
    let body = response.body_envelope;

    let (filename, key) = match source {
        KeySource::Ready(key) => {
            let filename = FilenameHeader::decode_modern(&header, &key)?;
            (filename, key)
        }
        KeySource::Password(password) => {
            let (salt, envelope) = FilenameHeader::split_legacy(&header)?;
            let key = tokio::task::spawn_blocking(move || derive_legacy_key(&password, &salt))
                .await
                .map_err(|e| ShareError::Other(anyhow::anyhow!("key derivation task: {e}")))?;
            let filename = FilenameHeader::open(&envelope, &key)?;
            (filename, key)
        }
    };

    let plaintext = tokio::task::spawn_blocking(move || decrypt(&body, &key))
        .await
        .map_err(|e| ShareError::Other(anyhow::anyhow!("decrypt task: {e}")))??;
    let plaintext = Zeroizing::new(plaintext);

    Ok(match content_type {
        ContentType::Text => {
            let text = std::str::from_utf8(&plaintext)
                .map_err(|_| ShareError::Format("text content is not valid UTF-8".into()))?;
            Delivery::Text(TextDelivery {
                filename,
                text: Zeroizing::new(text.to_string()),
            })
        }
        ContentType::Image { ephemeral_seconds } => Delivery::Image(ImageDelivery {
            filename,
            bytes: plaintext,
            ephemeral_seconds: (ephemeral_seconds > 0).then_some(ephemeral_seconds),
        }),
        ContentType::File => Delivery::File(FileDelivery {
            filename,
            bytes: plaintext,
        }),
    })
}
