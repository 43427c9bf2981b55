//! sealdrop-client: the share workflow on top of sealdrop-crypto
//!
//! Upload: validate options → strip image metadata → fresh key → encrypt filename and
//! content as two envelopes → multipart POST → share URL with the key in its fragment.
//!
//! Download: parse the share link → GET the body → decrypt the filename, then the body →
//! hand text, image, or file to the presenter. At most one decrypt attempt per session.
//!
//! All server access goes through the [`api::ShareApi`] trait; [`http::HttpShareApi`] is
//! the hyper-based production implementation.

pub mod api;
pub mod context;
pub mod download;
pub mod http;
pub mod link;
pub mod multipart;
pub mod registry;
pub mod strip;
pub mod upload;
pub mod viewer;

#[cfg(test)]
pub(crate) mod fake;

pub use api::{ShareApi, UploadRequest};
pub use context::ShareContext;
pub use download::{
    Delivery, DownloadSession, DownloadState, FileDelivery, ImageDelivery, TextDelivery,
};
pub use http::HttpShareApi;
pub use link::ShareLink;
pub use registry::{FileStatus, LocalRegistry, RegistryEntry};
pub use upload::{Content, KeyMode, UploadPipeline, UploadReceipt};
pub use viewer::{EphemeralViewer, Surface, ViewerControl, ViewerHandle, ViewerState};
