//! Image acquisition.
//!
//! `Resolver::acquire` turns a `SourceDescriptor` into a `DecodedImage` or `Absence`.
//! Exactly one strategy runs per descriptor:
//! - RTSP streams (one fresh frame, connection always released)
//! - HTTP(S) resources (single bounded fetch, then decode)
//! - Inline base64 payloads (optional data-URL prefix)
//! - Local files
//!
//! Every internal failure is logged at debug level and collapsed into `Absence`.
//! Nothing panics or propagates past `acquire`.
//!
//! The resolver holds no mutable state. Each call owns whatever connection or file
//! handle it opens and releases it before returning, so concurrent calls from
//! independent requests are fine.

pub mod codec;
pub mod descriptor;
pub mod file;
pub mod http;
pub mod inline;
pub mod rtsp;

use anyhow::{anyhow, Context, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub use codec::{ImageCodec, ImageCrateCodec, FRAME_JPEG_QUALITY};
pub use descriptor::{classify, is_safe_stream_uri, is_stream_uri, SourceDescriptor};
pub use file::{BoundedFs, FileSystem, LocalFs};
pub use http::{HttpFetcher, UreqFetcher};
pub use inline::InlineError;
pub use rtsp::{
    DisabledStreamClient, StreamBackend, StreamClient, StreamHandle, StreamProbe,
    StreamSession, SyntheticStreamClient,
};

use crate::frame::DecodedImage;

/// Default bound on the HTTP fetch.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(5);
/// Default bound on opening a stream and on waiting for its frame.
pub const DEFAULT_STREAM_TIMEOUT: Duration = Duration::from_secs(5);
/// Default cap on encoded image size from any source.
pub const DEFAULT_MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;

/// The single failure outcome of acquisition. Carries no cause by design of the
/// contract; causes are logged where they happen.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Error)]
#[error("could not acquire image")]
pub struct Absence;

/// Acquisition outcome.
pub type Outcome = std::result::Result<DecodedImage, Absence>;

/// Tunables for the acquisition strategies.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AcquireSettings {
    pub http_timeout: Duration,
    pub stream_timeout: Duration,
    pub max_image_bytes: usize,
}

impl Default for AcquireSettings {
    fn default() -> Self {
        Self {
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            stream_timeout: DEFAULT_STREAM_TIMEOUT,
            max_image_bytes: DEFAULT_MAX_IMAGE_BYTES,
        }
    }
}

/// Image Acquisition Resolver.
#[derive(Clone)]
pub struct Resolver {
    settings: AcquireSettings,
    stream: Arc<dyn StreamClient>,
    http: Arc<dyn HttpFetcher>,
    codec: Arc<dyn ImageCodec>,
    fs: Arc<dyn FileSystem>,
}

impl Resolver {
    /// Resolver with the real HTTP, codec and filesystem capabilities and no stream
    /// backend. Use `with_stream_client` to enable RTSP.
    pub fn new(settings: AcquireSettings) -> Self {
        Self {
            settings,
            stream: Arc::new(DisabledStreamClient),
            http: Arc::new(UreqFetcher::new(settings.max_image_bytes)),
            codec: Arc::new(ImageCrateCodec),
            fs: Arc::new(BoundedFs::new(settings.max_image_bytes)),
        }
    }

    pub fn with_stream_client(mut self, client: Arc<dyn StreamClient>) -> Self {
        self.stream = client;
        self
    }

    pub fn with_http_fetcher(mut self, fetcher: Arc<dyn HttpFetcher>) -> Self {
        self.http = fetcher;
        self
    }

    pub fn with_codec(mut self, codec: Arc<dyn ImageCodec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_file_system(mut self, fs: Arc<dyn FileSystem>) -> Self {
        self.fs = fs;
        self
    }

    pub fn settings(&self) -> AcquireSettings {
        self.settings
    }

    pub fn stream_backend_name(&self) -> &'static str {
        self.stream.name()
    }

    /// Classify a raw source string against this resolver's filesystem.
    pub fn classify(&self, raw: &str) -> SourceDescriptor {
        classify(raw, self.fs.as_ref())
    }

    /// Resolve a descriptor to an image. Runs exactly one strategy.
    pub fn acquire(&self, descriptor: &SourceDescriptor) -> Outcome {
        let result = match descriptor {
            SourceDescriptor::RemoteStream { uri } => self.acquire_stream(uri),
            SourceDescriptor::RemoteHttp { uri } => self.acquire_http(uri),
            SourceDescriptor::InlineData { payload } => self.acquire_inline(payload),
            SourceDescriptor::LocalPath { path } => self.acquire_file(path),
            SourceDescriptor::Unrecognized => Err(anyhow!("source matched no acquisition rule")),
        };
        result.map_err(|err| {
            log::debug!("acquire {}: {:#}", descriptor.kind(), err);
            Absence
        })
    }

    /// Classify then acquire.
    pub fn acquire_source(&self, raw: &str) -> Outcome {
        self.acquire(&self.classify(raw))
    }

    /// Connectivity check for a stream URI. The connection is released before return.
    pub fn probe_stream(&self, uri: &str) -> StreamProbe {
        rtsp::probe(self.stream.as_ref(), uri, self.settings.stream_timeout)
    }

    /// Re-encode an acquired image as JPEG for display.
    pub fn encode_jpeg(&self, image: &DecodedImage, quality: u8) -> Result<Vec<u8>> {
        self.codec.encode_jpeg(image, quality)
    }

    fn acquire_stream(&self, uri: &str) -> Result<DecodedImage> {
        rtsp::grab_frame(self.stream.as_ref(), uri, self.settings.stream_timeout)
    }

    fn acquire_http(&self, uri: &str) -> Result<DecodedImage> {
        let bytes = self.http.fetch(uri, self.settings.http_timeout)?;
        self.codec.decode(&bytes)
    }

    fn acquire_inline(&self, payload: &str) -> Result<DecodedImage> {
        let bytes = inline::decode_payload(payload, self.settings.max_image_bytes)
            .context("decode inline payload")?;
        self.codec.decode(&bytes)
    }

    fn acquire_file(&self, path: &Path) -> Result<DecodedImage> {
        if !self.fs.is_file(path) {
            return Err(anyhow!("{} is not a regular file", path.display()));
        }
        let bytes = self.fs.read(path)?;
        self.codec.decode(&bytes)
    }
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new(AcquireSettings::default())
    }
}
