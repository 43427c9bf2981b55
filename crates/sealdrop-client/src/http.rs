//! hyper-based [`ShareApi`] implementation

use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::header::{HeaderMap, CONTENT_TYPE, LOCATION, USER_AGENT};
use hyper::{Method, Request, StatusCode};
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use tracing::debug;

use sealdrop_core::config::ServerConfig;
use sealdrop_core::types::{
    Countries, DownloadHeaders, DownloadResponse, OwnedFile, RevokeOutcome, UploadAccepted,
    ValidateResponse, HEADER_EPHEMERAL, HEADER_FILENAME, HEADER_TYPE,
};
use sealdrop_core::{ShareError, ShareResult};

use crate::api::{ShareApi, UploadRequest};
use crate::multipart::{revoke_form, upload_form};

type HttpClient = Client<HttpsConnector<HttpConnector>, Full<Bytes>>;

/// Talks to a sealdrop server over HTTP/1.1 (TLS via rustls).
#[derive(Clone)]
pub struct HttpShareApi {
    client: HttpClient,
    files_endpoint: String,
    countries_endpoint: String,
    user_agent: String,
    timeout: Duration,
}

struct RawResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl HttpShareApi {
    /// Build a client for the configured server.
    ///
    /// If `enforce_tls` is true and the server uses HTTP, this returns an error.
    /// Otherwise, a warning is logged for non-HTTPS servers.
    pub fn new(server: &ServerConfig) -> ShareResult<Self> {
        if server.url.starts_with("http://") {
            if server.enforce_tls {
                return Err(ShareError::Config(format!(
                    "server uses plaintext HTTP ({}), but enforce_tls is enabled. \
                     Use an HTTPS server or set server.enforce_tls = false for local development.",
                    server.url
                )));
            }
            tracing::warn!(
                url = %server.url,
                "server uses plaintext HTTP; ciphertext and owner tokens are visible on the wire"
            );
        } else if !server.url.starts_with("https://") {
            return Err(ShareError::Config(format!(
                "server url must start with http:// or https://, got {:?}",
                server.url
            )));
        }

        let https = hyper_rustls::HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .build();
        let client = Client::builder(TokioExecutor::new()).build(https);

        Ok(Self {
            client,
            files_endpoint: server.files_endpoint(),
            countries_endpoint: server.api_endpoint("/countries"),
            user_agent: server.user_agent.clone(),
            timeout: Duration::from_secs(server.timeout_secs.max(1)),
        })
    }

    pub fn files_endpoint(&self) -> &str {
        &self.files_endpoint
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        content_type: Option<String>,
        body: Vec<u8>,
    ) -> ShareResult<RawResponse> {
        let mut builder = Request::builder()
            .method(method.clone())
            .uri(url)
            .header(USER_AGENT, &self.user_agent);
        if let Some(ct) = content_type {
            builder = builder.header(CONTENT_TYPE, ct);
        }
        let request = builder
            .body(Full::new(Bytes::from(body)))
            .map_err(|e| ShareError::Transport(format!("building request for {url}: {e}")))?;

        let exchange = async {
            let response = self
                .client
                .request(request)
                .await
                .map_err(|e| ShareError::Transport(format!("{method} {url}: {e}")))?;

            let status = response.status();
            let headers = response.headers().clone();
            let body = response
                .into_body()
                .collect()
                .await
                .map_err(|e| ShareError::Transport(format!("reading response from {url}: {e}")))?
                .to_bytes();
            Ok::<_, ShareError>((status, headers, body))
        };
        let (status, headers, body) = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| {
                ShareError::Transport(format!(
                    "{method} {url}: no response within {}s",
                    self.timeout.as_secs()
                ))
            })??;

        debug!(%method, url, status = status.as_u16(), bytes = body.len(), "response");
        Ok(RawResponse {
            status,
            headers,
            body,
        })
    }

    fn file_url(&self, file_id: &str) -> String {
        format!("{}/{}", self.files_endpoint, encode_path_segment(file_id))
    }
}

/// Percent-encode everything outside the RFC 3986 unreserved set so an id
/// always stays a single path segment.
fn encode_path_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(char::from(byte))
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

impl RawResponse {
    fn error_for_status(self) -> ShareResult<Self> {
        if self.status.is_success() {
            Ok(self)
        } else {
            Err(ShareError::from_response_body(
                self.status.as_u16(),
                &self.body,
            ))
        }
    }

    fn header(&self, name: &str) -> Option<String> {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }
}

impl ShareApi for HttpShareApi {
    async fn upload(&self, request: &UploadRequest) -> ShareResult<UploadAccepted> {
        let form = upload_form(request);
        let content_type = form.content_type();
        let response = self
            .send(
                Method::POST,
                &self.files_endpoint,
                Some(content_type),
                form.finish(),
            )
            .await?
            .error_for_status()?;

        let mut accepted: UploadAccepted = serde_json::from_slice(&response.body)?;
        accepted.location = response
            .header(LOCATION.as_str())
            .unwrap_or_else(|| format!("/d/{}", accepted.file_id));
        Ok(accepted)
    }

    async fn fetch(&self, file_id: &str) -> ShareResult<DownloadResponse> {
        let response = self
            .send(Method::GET, &self.file_url(file_id), None, Vec::new())
            .await?
            .error_for_status()?;

        let headers = DownloadHeaders {
            x_type: response.header(HEADER_TYPE),
            x_filename: response.header(HEADER_FILENAME),
            x_ephemeral: response.header(HEADER_EPHEMERAL),
        };
        DownloadResponse::from_parts(&headers, response.body.to_vec())
    }

    async fn confirm_receipt(&self, file_id: &str) -> ShareResult<()> {
        self.send(Method::POST, &self.file_url(file_id), None, Vec::new())
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn revoke(&self, file_id: &str, owner_token: &str) -> ShareResult<RevokeOutcome> {
        let form = revoke_form(owner_token);
        let content_type = form.content_type();
        let response = self
            .send(
                Method::DELETE,
                &self.file_url(file_id),
                Some(content_type),
                form.finish(),
            )
            .await?;

        if response.status == StatusCode::NOT_FOUND {
            return Ok(RevokeOutcome::NotFound);
        }
        response.error_for_status()?;
        Ok(RevokeOutcome::Deleted)
    }

    async fn validate(&self, files: &[OwnedFile]) -> ShareResult<ValidateResponse> {
        let body = serde_json::to_vec(files)?;
        let response = self
            .send(
                Method::POST,
                &self.file_url("validate"),
                Some("application/json".into()),
                body,
            )
            .await?
            .error_for_status()?;
        Ok(serde_json::from_slice(&response.body)?)
    }

    async fn countries(&self) -> ShareResult<Countries> {
        let response = self
            .send(Method::GET, &self.countries_endpoint, None, Vec::new())
            .await?
            .error_for_status()?;
        Ok(serde_json::from_slice(&response.body)?)
    }
}
