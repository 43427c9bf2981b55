//! Server seam: every request the share workflow makes

use std::future::Future;

use sealdrop_core::types::{
    ContentKind, Countries, DownloadResponse, OwnedFile, RevokeOutcome, UploadAccepted,
    UploadOptions, ValidateResponse,
};
use sealdrop_core::ShareResult;

/// An encrypted upload, ready for the wire. Holds no key material.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub content_type: ContentKind,
    pub encrypted_content: Vec<u8>,
    pub encrypted_filename_b64: String,
    pub options: UploadOptions,
}

/// Requests against `{server}{api_prefix}`.
///
/// Implementations never see keys: the upload body is already sealed and the
/// download body is returned still sealed.
pub trait ShareApi: Send + Sync + 'static {
    /// `POST {files}` multipart.
    fn upload(&self, request: &UploadRequest)
        -> impl Future<Output = ShareResult<UploadAccepted>> + Send;

    /// `GET {files}/{file_id}`. Each successful call consumes one download.
    fn fetch(&self, file_id: &str) -> impl Future<Output = ShareResult<DownloadResponse>> + Send;

    /// `POST {files}/{file_id}`: tell the server the content reached the recipient.
    fn confirm_receipt(&self, file_id: &str) -> impl Future<Output = ShareResult<()>> + Send;

    /// `DELETE {files}/{file_id}` with the owner token.
    fn revoke(
        &self,
        file_id: &str,
        owner_token: &str,
    ) -> impl Future<Output = ShareResult<RevokeOutcome>> + Send;

    /// `POST {files}/validate` with the owned files to check.
    fn validate(&self, files: &[OwnedFile])
        -> impl Future<Output = ShareResult<ValidateResponse>> + Send;

    /// `GET {api_prefix}/countries`.
    fn countries(&self) -> impl Future<Output = ShareResult<Countries>> + Send;
}
