//! `multipart/form-data` encoding for upload and revoke requests

use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::api::UploadRequest;

/// An in-memory multipart body. Parts are written in insertion order.
#[derive(Debug)]
pub struct MultipartForm {
    boundary: String,
    body: Vec<u8>,
}

impl Default for MultipartForm {
    fn default() -> Self {
        Self::new()
    }
}

impl MultipartForm {
    pub fn new() -> Self {
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(24)
            .map(char::from)
            .collect();
        Self::with_boundary(format!("sealdrop-{suffix}"))
    }

    pub fn with_boundary(boundary: impl Into<String>) -> Self {
        Self {
            boundary: boundary.into(),
            body: Vec::new(),
        }
    }

    pub fn text(&mut self, name: &str, value: &str) -> &mut Self {
        self.open_part();
        self.push(&format!(
            "Content-Disposition: form-data; name=\"{}\"\r\n\r\n",
            escape_quoted(name)
        ));
        self.body.extend_from_slice(value.as_bytes());
        self.body.extend_from_slice(b"\r\n");
        self
    }

    pub fn file(&mut self, name: &str, filename: &str, content_type: &str, bytes: &[u8]) -> &mut Self {
        self.open_part();
        self.push(&format!(
            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
            escape_quoted(name),
            escape_quoted(filename),
            content_type
        ));
        self.body.extend_from_slice(bytes);
        self.body.extend_from_slice(b"\r\n");
        self
    }

    /// Value for the request's `Content-Type` header.
    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    pub fn finish(mut self) -> Vec<u8> {
        let closing = format!("--{}--\r\n", self.boundary);
        self.push(&closing);
        self.body
    }

    fn open_part(&mut self) {
        let opening = format!("--{}\r\n", self.boundary);
        self.push(&opening);
    }

    fn push(&mut self, s: &str) {
        self.body.extend_from_slice(s.as_bytes());
    }
}

fn escape_quoted(value: &str) -> String {
    value
        .chars()
        .map(|c| match c {
            '"' => "%22".to_string(),
            '\r' => "%0D".to_string(),
            '\n' => "%0A".to_string(),
            other => other.to_string(),
        })
        .collect()
}

/// Upload body: type, file, filename, count, expiry, email, geo fields, delay, ephemeral.
pub fn upload_form(request: &UploadRequest) -> MultipartForm {
    let options = &request.options;
    let mut form = MultipartForm::new();

    form.text("type", request.content_type.as_str())
        .file(
            "file",
            &request.encrypted_filename_b64,
            "application/octet-stream",
            &request.encrypted_content,
        )
        .text("filename", &request.encrypted_filename_b64)
        .text("count", &options.count.to_string())
        .text("expiry", &options.expiry_days.to_string());

    if let Some(email) = &options.email {
        form.text("email", email);
    }
    for (name, value) in options.geo.form_fields() {
        form.text(name, &value);
    }
    if let Some(delay) = options.delay_minutes {
        form.text("delay", &delay.to_string());
    }
    if let Some(seconds) = options.ephemeral_seconds {
        form.text("ephemeral", &seconds.to_string());
    }
    form
}

/// Revoke body: the owner token alone.
pub fn revoke_form(owner_token: &str) -> MultipartForm {
    let mut form = MultipartForm::new();
    form.text("ownerToken", owner_token);
    form
}
