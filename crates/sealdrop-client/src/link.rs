//! Share link parsing: `{origin}{path}/d/{fileId}[?p=password][#key]`

use secrecy::SecretString;

use sealdrop_core::{ShareError, ShareResult};

/// How the recipient obtains the key.
#[derive(Debug)]
pub enum LinkSecret {
    /// base64url key from the URL fragment. Never sent to the server.
    Fragment(String),
    /// Legacy password from the `p` query parameter.
    QueryPassword(SecretString),
    /// Neither; the password has to be entered by hand.
    None,
}

#[derive(Debug)]
pub struct ShareLink {
    /// Scheme, host and port, e.g. `https://drop.example.org`.
    pub origin: String,
    /// Path in front of `/d/`, usually empty.
    pub base_path: String,
    pub file_id: String,
    pub secret: LinkSecret,
}

impl ShareLink {
    pub fn parse(url: &str) -> ShareResult<Self> {
        let url = url.trim();
        let invalid = |why: &str| ShareError::Validation(format!("invalid share link {url:?}: {why}"));

        let (rest, fragment) = match url.split_once('#') {
            Some((rest, fragment)) => (rest, Some(fragment)),
            None => (url, None),
        };
        let (rest, query) = match rest.split_once('?') {
            Some((rest, query)) => (rest, Some(query)),
            None => (rest, None),
        };

        let scheme_end = rest
            .find("://")
            .ok_or_else(|| invalid("missing http:// or https://"))?;
        let scheme = &rest[..scheme_end];
        if scheme != "http" && scheme != "https" {
            return Err(invalid("scheme must be http or https"));
        }
        let after_scheme = &rest[scheme_end + 3..];
        let path_start = after_scheme.find('/').unwrap_or(after_scheme.len());
        let host = &after_scheme[..path_start];
        if host.is_empty() {
            return Err(invalid("missing host"));
        }
        let origin = format!("{scheme}://{host}");
        let path = after_scheme[path_start..].trim_end_matches('/');

        let marker = path.rfind("/d/").ok_or_else(|| invalid("expected /d/{fileId}"))?;
        let base_path = path[..marker].to_string();
        let file_id = &path[marker + 3..];
        if file_id.is_empty() || file_id.contains('/') {
            return Err(invalid("expected /d/{fileId}"));
        }
        if !file_id.chars().all(|c| c.is_ascii_graphic()) {
            return Err(invalid("file id must be printable ASCII"));
        }

        let password = query.and_then(|q| {
            q.split('&').find_map(|pair| match pair.split_once('=') {
                Some(("p", value)) if !value.is_empty() => Some(percent_decode(value)),
                _ => None,
            })
        });

        let secret = match (fragment.filter(|f| !f.is_empty()), password) {
            (Some(key), _) => LinkSecret::Fragment(key.to_string()),
            (None, Some(password)) => {
                tracing::warn!(
                    file_id,
                    "share link carries its password in the query string; it has been sent to the server"
                );
                LinkSecret::QueryPassword(SecretString::from(password))
            }
            (None, None) => LinkSecret::None,
        };

        Ok(ShareLink {
            origin,
            base_path,
            file_id: file_id.to_string(),
            secret,
        })
    }

    pub fn has_fragment_key(&self) -> bool {
        matches!(self.secret, LinkSecret::Fragment(_))
    }
}

fn percent_decode(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < bytes.len() => match (hex(bytes[i + 1]), hex(bytes[i + 2])) {
                (Some(hi), Some(lo)) => {
                    out.push(hi << 4 | lo);
                    i += 3;
                }
                _ => {
                    out.push(b'%');
                    i += 1;
                }
            },
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex(b: u8) -> Option<u8> {
    (b as char).to_digit(16).map(|d| d as u8)
}
