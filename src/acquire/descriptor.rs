//! Source descriptor classification.
//!
//! Callers hand in an opaque string. Classification turns it into exactly one
//! `SourceDescriptor` before any acquisition strategy runs. Rules are tested in
//! order and the first match wins:
//!
//! 1. `rtsp://` prefix -> `RemoteStream`
//! 2. `http` prefix -> `RemoteHttp` when it is an `http://` or `https://` URL
//! 3. `data:` prefix -> `InlineData`
//! 4. existing regular file -> `LocalPath`
//! 5. anything else -> `Unrecognized`
//!
//! Markers are case-sensitive. A string claimed by rule 1 or 2 that is not a URL
//! with a host is `Unrecognized`; it never falls through to the filesystem rule, so
//! `http-backup.jpg` is never opened as a file. Stream URIs that could splice extra
//! elements into a media pipeline (whitespace, `!`, quotes, control characters) are
//! `Unrecognized` too.

use std::fmt;
use std::path::PathBuf;

use url::Url;

use super::file::FileSystem;

pub const STREAM_SCHEME: &str = "rtsp://";
pub const WEB_MARKER: &str = "http";
pub const HTTP_SCHEME: &str = "http://";
pub const HTTPS_SCHEME: &str = "https://";
pub const DATA_URL_PREFIX: &str = "data:";

/// Where an image comes from.
#[derive(Clone, PartialEq, Eq)]
pub enum SourceDescriptor {
    /// Streaming-protocol endpoint; one frame is grabbed.
    RemoteStream { uri: String },
    /// A single fetchable image resource.
    RemoteHttp { uri: String },
    /// A filesystem location.
    LocalPath { path: PathBuf },
    /// Embedded base64 payload, optionally carrying a `<metadata>,` prefix.
    InlineData { payload: String },
    /// Matched no rule. Always resolves to absence.
    Unrecognized,
}

impl SourceDescriptor {
    pub fn kind(&self) -> &'static str {
        match self {
            SourceDescriptor::RemoteStream { .. } => "remote_stream",
            SourceDescriptor::RemoteHttp { .. } => "remote_http",
            SourceDescriptor::LocalPath { .. } => "local_path",
            SourceDescriptor::InlineData { .. } => "inline_data",
            SourceDescriptor::Unrecognized => "unrecognized",
        }
    }

    pub fn is_stream(&self) -> bool {
        matches!(self, SourceDescriptor::RemoteStream { .. })
    }
}

// Inline payloads can be megabytes of base64; keep them out of logs.
impl fmt::Debug for SourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceDescriptor::RemoteStream { uri } => {
                f.debug_struct("RemoteStream").field("uri", uri).finish()
            }
            SourceDescriptor::RemoteHttp { uri } => {
                f.debug_struct("RemoteHttp").field("uri", uri).finish()
            }
            SourceDescriptor::LocalPath { path } => {
                f.debug_struct("LocalPath").field("path", path).finish()
            }
            SourceDescriptor::InlineData { payload } => f
                .debug_struct("InlineData")
                .field("len", &payload.len())
                .finish(),
            SourceDescriptor::Unrecognized => f.write_str("Unrecognized"),
        }
    }
}

/// Classify a raw source string.
pub fn classify(raw: &str, fs: &dyn FileSystem) -> SourceDescriptor {
    if raw.starts_with(STREAM_SCHEME) {
        if !is_safe_stream_uri(raw) {
            return SourceDescriptor::Unrecognized;
        }
        return match parse_with_host(raw) {
            Some(_) => SourceDescriptor::RemoteStream {
                uri: raw.to_string(),
            },
            None => SourceDescriptor::Unrecognized,
        };
    }
    if raw.starts_with(WEB_MARKER) {
        if !(raw.starts_with(HTTP_SCHEME) || raw.starts_with(HTTPS_SCHEME)) {
            return SourceDescriptor::Unrecognized;
        }
        return match parse_with_host(raw) {
            Some(_) => SourceDescriptor::RemoteHttp {
                uri: raw.to_string(),
            },
            None => SourceDescriptor::Unrecognized,
        };
    }
    if raw.starts_with(DATA_URL_PREFIX) {
        return SourceDescriptor::InlineData {
            payload: raw.to_string(),
        };
    }
    if raw.trim().is_empty() {
        return SourceDescriptor::Unrecognized;
    }
    let path = PathBuf::from(raw);
    if fs.is_file(&path) {
        return SourceDescriptor::LocalPath { path };
    }
    SourceDescriptor::Unrecognized
}

/// True when `raw` begins with the `rtsp://` scheme marker.
pub fn is_stream_uri(raw: &str) -> bool {
    raw.starts_with(STREAM_SCHEME)
}

/// False for URIs carrying characters a pipeline description would treat as syntax.
pub fn is_safe_stream_uri(uri: &str) -> bool {
    !uri.chars()
        .any(|c| c.is_whitespace() || c.is_control() || matches!(c, '!' | '"' | '\'' | '`'))
}

fn parse_with_host(raw: &str) -> Option<Url> {
    let url = Url::parse(raw).ok()?;
    match url.host_str() {
        Some(host) if !host.is_empty() => Some(url),
        _ => None,
    }
}
