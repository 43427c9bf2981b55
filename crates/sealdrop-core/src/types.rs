use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ShareError, ShareResult};

/// Response header carrying the content kind.
pub const HEADER_TYPE: &str = "X-Type";
/// Response header carrying the base64 filename blob.
pub const HEADER_FILENAME: &str = "X-Filename";
/// Response header carrying the ephemeral window in seconds (images only).
pub const HEADER_EPHEMERAL: &str = "X-Ephemeral";

pub const MIN_COUNT: u8 = 1;
pub const MAX_COUNT: u8 = 15;
pub const MIN_EXPIRY_DAYS: u8 = 1;
pub const MAX_EXPIRY_DAYS: u8 = 14;
pub const MAX_EPHEMERAL_SECONDS: u32 = 3600;
pub const MAX_DELAY_MINUTES: u32 = 7 * 24 * 60;
pub const MIN_EMAIL_LEN: usize = 4;
pub const MAX_EMAIL_LEN: usize = 255;
/// Server-side column limit for the encrypted, base64-encoded filename.
pub const MAX_FILENAME_HEADER_LEN: usize = 1024;

/// Content kind as carried in the `type` form field and the `X-Type` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    File,
    Text,
    Image,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::File => "file",
            ContentKind::Text => "text",
            ContentKind::Image => "image",
        }
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentKind {
    type Err = ShareError;

    fn from_str(s: &str) -> ShareResult<Self> {
        match s.trim() {
            "file" => Ok(ContentKind::File),
            "text" => Ok(ContentKind::Text),
            "image" => Ok(ContentKind::Image),
            other => Err(ShareError::Format(format!("unknown content type: {other:?}"))),
        }
    }
}

/// Download-side content type. The ephemeral window only exists for images.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    File,
    Text,
    /// `ephemeral_seconds == 0` means the image is not ephemeral.
    Image { ephemeral_seconds: u32 },
}

impl ContentType {
    /// Parse `X-Type` and `X-Ephemeral`. A missing or empty `X-Ephemeral` means 0.
    pub fn from_headers(x_type: Option<&str>, x_ephemeral: Option<&str>) -> ShareResult<Self> {
        let kind: ContentKind = x_type
            .ok_or_else(|| ShareError::Format(format!("missing {HEADER_TYPE} header")))?
            .parse()?;

        Ok(match kind {
            ContentKind::File => ContentType::File,
            ContentKind::Text => ContentType::Text,
            ContentKind::Image => {
                let ephemeral_seconds = match x_ephemeral.map(str::trim) {
                    None | Some("") => 0,
                    Some(raw) => raw.parse::<u32>().map_err(|_| {
                        ShareError::Format(format!("invalid {HEADER_EPHEMERAL} header: {raw:?}"))
                    })?,
                };
                ContentType::Image { ephemeral_seconds }
            }
        })
    }

    pub fn kind(&self) -> ContentKind {
        match self {
            ContentType::File => ContentKind::File,
            ContentType::Text => ContentKind::Text,
            ContentType::Image { .. } => ContentKind::Image,
        }
    }

    /// The ephemeral viewing window, if any.
    pub fn ephemeral(&self) -> Option<Duration> {
        match self {
            ContentType::Image { ephemeral_seconds } if *ephemeral_seconds > 0 => {
                Some(Duration::from_secs(u64::from(*ephemeral_seconds)))
            }
            _ => None,
        }
    }
}

/// Raw download response headers as received, before validation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadHeaders {
    pub x_type: Option<String>,
    pub x_filename: Option<String>,
    pub x_ephemeral: Option<String>,
}

/// A validated download response: metadata headers plus the body envelope.
#[derive(Debug, Clone)]
pub struct DownloadResponse {
    pub content_type: ContentType,
    pub filename_header_b64: String,
    pub body_envelope: Vec<u8>,
}

impl DownloadResponse {
    pub fn from_parts(headers: &DownloadHeaders, body: Vec<u8>) -> ShareResult<Self> {
        let content_type =
            ContentType::from_headers(headers.x_type.as_deref(), headers.x_ephemeral.as_deref())?;
        let filename_header_b64 = headers
            .x_filename
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ShareError::Format(format!("missing {HEADER_FILENAME} header")))?
            .to_string();

        Ok(DownloadResponse {
            content_type,
            filename_header_b64,
            body_envelope: body,
        })
    }

    pub fn ephemeral_seconds(&self) -> u32 {
        match self.content_type {
            ContentType::Image { ephemeral_seconds } => ephemeral_seconds,
            _ => 0,
        }
    }
}

/// Where downloads are allowed from. Enforcement happens server-side.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GeoRestriction {
    None,
    /// EU member states plus Iceland, Norway, Liechtenstein.
    #[default]
    Eea,
    /// EEA plus countries with comparable data-protection law.
    GdprAligned,
    /// Explicit ISO 3166-1 alpha-2 allow-list.
    Custom(Vec<String>),
}

impl GeoRestriction {
    /// Multipart fields understood by the server.
    pub fn form_fields(&self) -> Vec<(&'static str, String)> {
        match self {
            GeoRestriction::None => vec![("only-eea", "false".into())],
            GeoRestriction::Eea => vec![
                ("only-eea", "true".into()),
                ("include-other", "false".into()),
            ],
            GeoRestriction::GdprAligned => vec![
                ("only-eea", "true".into()),
                ("include-other", "true".into()),
            ],
            GeoRestriction::Custom(codes) => vec![("allowed-countries", codes.join(","))],
        }
    }

    fn validate(&self) -> ShareResult<()> {
        if let GeoRestriction::Custom(codes) = self {
            if codes.is_empty() {
                return Err(ShareError::Validation(
                    "custom geo restriction needs at least one country code".into(),
                ));
            }
            if let Some(bad) = codes
                .iter()
                .find(|c| c.len() != 2 || !c.chars().all(|ch| ch.is_ascii_uppercase()))
            {
                return Err(ShareError::Validation(format!(
                    "invalid country code {bad:?} (expected ISO 3166-1 alpha-2, e.g. DE)"
                )));
            }
        }
        Ok(())
    }
}

impl FromStr for GeoRestriction {
    type Err = ShareError;

    fn from_str(s: &str) -> ShareResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(GeoRestriction::None),
            "eea" => Ok(GeoRestriction::Eea),
            "gdpr-aligned" | "gdpr" => Ok(GeoRestriction::GdprAligned),
            other => Err(ShareError::Validation(format!(
                "unknown geo restriction {other:?} (expected none, eea, gdpr-aligned)"
            ))),
        }
    }
}

/// Sender-chosen constraints for one upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOptions {
    /// Maximum number of downloads before the link expires.
    pub count: u8,
    /// Maximum days before the link expires.
    pub expiry_days: u8,
    /// Address notified on each download attempt.
    pub email: Option<String>,
    pub geo: GeoRestriction,
    /// Minutes after upload before the first download is allowed.
    pub delay_minutes: Option<u32>,
    /// Viewing window for images; `None` means not ephemeral.
    pub ephemeral_seconds: Option<u32>,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            count: 1,
            expiry_days: 7,
            email: None,
            geo: GeoRestriction::Eea,
            delay_minutes: None,
            ephemeral_seconds: None,
        }
    }
}

impl UploadOptions {
    /// Check ranges before any key is generated or byte encrypted.
    pub fn validate(&self, kind: ContentKind) -> ShareResult<()> {
        if !(MIN_COUNT..=MAX_COUNT).contains(&self.count) {
            return Err(ShareError::Validation(format!(
                "count must be between {MIN_COUNT} and {MAX_COUNT}, got {}",
                self.count
            )));
        }
        if !(MIN_EXPIRY_DAYS..=MAX_EXPIRY_DAYS).contains(&self.expiry_days) {
            return Err(ShareError::Validation(format!(
                "expiry must be between {MIN_EXPIRY_DAYS} and {MAX_EXPIRY_DAYS} days, got {}",
                self.expiry_days
            )));
        }
        if let Some(email) = &self.email {
            let len = email.chars().count();
            if !(MIN_EMAIL_LEN..=MAX_EMAIL_LEN).contains(&len) || !email.contains('@') {
                return Err(ShareError::Validation(format!("invalid email address: {email:?}")));
            }
        }
        if let Some(delay) = self.delay_minutes {
            if delay > MAX_DELAY_MINUTES {
                return Err(ShareError::Validation(format!(
                    "delay must be at most {MAX_DELAY_MINUTES} minutes, got {delay}"
                )));
            }
        }
        if let Some(seconds) = self.ephemeral_seconds {
            if kind != ContentKind::Image {
                return Err(ShareError::Validation(
                    "ephemeral viewing is only available for images".into(),
                ));
            }
            if !(1..=MAX_EPHEMERAL_SECONDS).contains(&seconds) {
                return Err(ShareError::Validation(format!(
                    "ephemeral window must be between 1 and {MAX_EPHEMERAL_SECONDS} seconds, got {seconds}"
                )));
            }
        }
        self.geo.validate()
    }
}

/// JSON body of a successful upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadAccepted {
    #[serde(default)]
    pub message: Option<String>,
    pub file_id: String,
    pub owner_token: String,
    /// Taken from the `Location` response header, not the body.
    #[serde(skip)]
    pub location: String,
}

/// Outcome of the public upload operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadResult {
    pub file_id: String,
    pub owner_token: String,
    pub location: String,
}

/// Result of an owner-initiated revoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevokeOutcome {
    Deleted,
    /// The server no longer knows the file; it expired or was already revoked.
    NotFound,
}

/// One entry of the `validate` request body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnedFile {
    pub file_id: String,
    pub owner_token: String,
}

/// Server view of one owned file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    #[serde(default)]
    pub expiry_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub count: Option<i64>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateResponse {
    #[serde(default)]
    pub file_info: HashMap<String, FileInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Country {
    pub code: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountryGroups {
    #[serde(rename = "euEEA", default)]
    pub eu_eea: Vec<String>,
    #[serde(rename = "gdprAligned", default)]
    pub gdpr_aligned: Vec<String>,
}

/// Country list served by `GET {apiPrefix}/countries`. Display and selection only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Countries {
    #[serde(default)]
    pub countries: Vec<Country>,
    #[serde(default)]
    pub groups: CountryGroups,
    #[serde(default)]
    pub your_country: Option<String>,
}

impl Countries {
    pub fn knows(&self, code: &str) -> bool {
        self.countries.iter().any(|c| c.code.eq_ignore_ascii_case(code))
    }

    pub fn name_of(&self, code: &str) -> Option<&str> {
        self.countries
            .iter()
            .find(|c| c.code.eq_ignore_ascii_case(code))
            .map(|c| c.name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_type_from_headers() {
        assert_eq!(
            ContentType::from_headers(Some("text"), None).unwrap(),
            ContentType::Text
        );
        assert_eq!(
            ContentType::from_headers(Some("image"), Some("")).unwrap(),
            ContentType::Image { ephemeral_seconds: 0 }
        );
        assert_eq!(
            ContentType::from_headers(Some("image"), Some("30")).unwrap(),
            ContentType::Image { ephemeral_seconds: 30 }
        );
        // X-Ephemeral is ignored for non-images
        assert_eq!(
            ContentType::from_headers(Some("file"), Some("30")).unwrap(),
            ContentType::File
        );
    }

    #[test]
    fn content_type_rejects_garbage() {
        assert!(matches!(
            ContentType::from_headers(Some("video"), None),
            Err(ShareError::Format(_))
        ));
        assert!(matches!(
            ContentType::from_headers(None, None),
            Err(ShareError::Format(_))
        ));
        assert!(matches!(
            ContentType::from_headers(Some("image"), Some("soon")),
            Err(ShareError::Format(_))
        ));
    }

    #[test]
    fn ephemeral_window() {
        assert_eq!(ContentType::Image { ephemeral_seconds: 0 }.ephemeral(), None);
        assert_eq!(
            ContentType::Image { ephemeral_seconds: 5 }.ephemeral(),
            Some(Duration::from_secs(5))
        );
        assert_eq!(ContentType::Text.ephemeral(), None);
    }

    #[test]
    fn download_response_requires_filename() {
        let headers = DownloadHeaders {
            x_type: Some("file".into()),
            x_filename: None,
            x_ephemeral: None,
        };
        assert!(matches!(
            DownloadResponse::from_parts(&headers, vec![1, 2, 3]),
            Err(ShareError::Format(_))
        ));
    }

    #[test]
    fn geo_form_fields() {
        assert_eq!(
            GeoRestriction::None.form_fields(),
            vec![("only-eea", "false".to_string())]
        );
        assert_eq!(
            GeoRestriction::GdprAligned.form_fields(),
            vec![
                ("only-eea", "true".to_string()),
                ("include-other", "true".to_string())
            ]
        );
        assert_eq!(
            GeoRestriction::Custom(vec!["DE".into(), "CH".into()]).form_fields(),
            vec![("allowed-countries", "DE,CH".to_string())]
        );
    }

    #[test]
    fn options_validation() {
        let ok = UploadOptions::default();
        assert!(ok.validate(ContentKind::File).is_ok());

        let too_many = UploadOptions { count: 16, ..Default::default() };
        assert!(matches!(
            too_many.validate(ContentKind::File),
            Err(ShareError::Validation(_))
        ));

        let zero_expiry = UploadOptions { expiry_days: 0, ..Default::default() };
        assert!(zero_expiry.validate(ContentKind::Text).is_err());

        let ephemeral_text = UploadOptions {
            ephemeral_seconds: Some(10),
            ..Default::default()
        };
        assert!(ephemeral_text.validate(ContentKind::Text).is_err());
        assert!(ephemeral_text.validate(ContentKind::Image).is_ok());

        let bad_email = UploadOptions {
            email: Some("nobody".into()),
            ..Default::default()
        };
        assert!(bad_email.validate(ContentKind::File).is_err());

        let empty_custom = UploadOptions {
            geo: GeoRestriction::Custom(vec![]),
            ..Default::default()
        };
        assert!(empty_custom.validate(ContentKind::File).is_err());

        let lower_custom = UploadOptions {
            geo: GeoRestriction::Custom(vec!["de".into()]),
            ..Default::default()
        };
        assert!(lower_custom.validate(ContentKind::File).is_err());
    }

    #[test]
    fn validate_response_parses_go_zero_time() {
        let json = r#"{"fileInfo":{
            "abc":{"expiryDate":"2026-10-20T10:00:00Z","count":2},
            "gone":{"expiryDate":"0001-01-01T00:00:00Z","count":0},
            "bad":{"error":"Owner token mismatch"}
        }}"#;
        let parsed: ValidateResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.file_info["abc"].count, Some(2));
        assert_eq!(
            parsed.file_info["bad"].error.as_deref(),
            Some("Owner token mismatch")
        );
        assert!(parsed.file_info["gone"].expiry_date.is_some());
    }

    #[test]
    fn countries_lookup() {
        let json = r#"{"countries":[{"code":"DE","name":"Germany"}],
            "groups":{"euEEA":["DE"],"gdprAligned":["CH"]},"yourCountry":"DE"}"#;
        let parsed: Countries = serde_json::from_str(json).unwrap();
        assert!(parsed.knows("de"));
        assert_eq!(parsed.name_of("DE"), Some("Germany"));
        assert_eq!(parsed.groups.gdpr_aligned, vec!["CH".to_string()]);
        assert_eq!(parsed.your_country.as_deref(), Some("DE"));
    }
}
