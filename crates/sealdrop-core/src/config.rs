use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level client configuration (loaded from config.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SealdropConfig {
    pub server: ServerConfig,
    pub upload: UploadConfig,
    pub viewer: ViewerConfig,
    pub registry: RegistryConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server origin, scheme + host + optional port (default: http://localhost:8080)
    pub url: String,
    /// API route prefix (default: /api/v1)
    pub api_prefix: String,
    /// Upload/download route under the prefix (default: /files)
    pub files_path: String,
    /// Refuse plain-HTTP origins instead of warning
    pub enforce_tls: bool,
    /// User-Agent sent with every request
    pub user_agent: String,
    /// Per-request deadline covering connect, headers and body (default: 60)
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Maximum plaintext size in MiB (default: 25)
    pub max_file_size_mib: u64,
    /// Maximum text message length in characters (default: 1024)
    pub content_max_length: usize,
    /// Symmetric key length in bytes; only 32 is accepted
    pub key_length: usize,
    /// Default download count (default: 1)
    pub default_count: u8,
    /// Default expiry in days (default: 7)
    pub default_expiry_days: u8,
    /// Default geo restriction: "none", "eea", or "gdpr-aligned"
    pub default_geo: String,
    /// Record uploads in the local registry (default: true)
    pub save_files: bool,
    /// Use the password-derived key scheme for new uploads
    pub legacy_mode: bool,
    /// JPEG quality for metadata-stripping re-encode (default: 92)
    pub jpeg_quality: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    /// How long the viewer stays blurred after the window regains focus
    pub unblur_grace_ms: u64,
    /// Countdown tick interval
    pub tick_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// JSON file holding owner tokens of uploaded files
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8080".into(),
            api_prefix: "/api/v1".into(),
            files_path: "/files".into(),
            enforce_tls: false,
            user_agent: format!("sealdrop/{}", env!("CARGO_PKG_VERSION")),
            timeout_secs: 60,
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_file_size_mib: 25,
            content_max_length: 1024,
            key_length: 32,
            default_count: 1,
            default_expiry_days: 7,
            default_geo: "eea".into(),
            save_files: true,
            legacy_mode: false,
            jpeg_quality: 92,
        }
    }
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            unblur_grace_ms: 1500,
            tick_ms: 1000,
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("~/.local/share/sealdrop/files.json"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl ServerConfig {
    /// `{url}{api_prefix}{files_path}` with duplicate slashes removed at the joins.
    pub fn files_endpoint(&self) -> String {
        format!(
            "{}{}{}",
            self.url.trim_end_matches('/'),
            normalize_segment(&self.api_prefix),
            normalize_segment(&self.files_path)
        )
    }

    pub fn api_endpoint(&self, route: &str) -> String {
        format!(
            "{}{}{}",
            self.url.trim_end_matches('/'),
            normalize_segment(&self.api_prefix),
            normalize_segment(route)
        )
    }
}

impl UploadConfig {
    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mib.saturating_mul(1024 * 1024)
    }
}

fn normalize_segment(segment: &str) -> String {
    let trimmed = segment.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{trimmed}")
    }
}

/// Expand `~` in path to the user's home directory
pub fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        let home = std::env::var("HOME").unwrap_or_default();
        PathBuf::from(home).join(rest)
    } else {
        path.to_path_buf()
    }
}

/// Default config location: `~/.config/sealdrop/config.toml`
pub fn default_config_path() -> PathBuf {
    expand_tilde(Path::new("~/.config/sealdrop/config.toml"))
}
