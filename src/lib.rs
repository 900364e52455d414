//! stream-detect
//!
//! Demo detection service. Accepts an image by RTSP URL, HTTP(S) URL, local path or
//! inline base64 payload, loads it into memory, and answers with a fixed set of
//! synthetic detections plus a gauge reading.
//!
//! # Module Structure
//!
//! - `acquire`: source classification and the Image Acquisition Resolver
//! - `frame`: `DecodedImage`, the owned raster every source produces
//! - `detect`: detector backend trait and the synthetic backend
//! - `api`: HTTP service (`/`, `/detect`, `/test_rtsp`)
//! - `config`: file + environment configuration
//!
//! Acquisition never fails loudly: every cause collapses into `acquire::Absence`
//! and is logged at debug level where it happens.

pub mod acquire;
pub mod api;
pub mod config;
pub mod detect;
pub mod frame;

pub use acquire::{
    classify, AcquireSettings, Absence, Outcome, Resolver, SourceDescriptor, StreamBackend,
};
pub use detect::{Detection, DetectionReport, DetectorBackend, SyntheticBackend};
pub use frame::DecodedImage;

use anyhow::Result;

/// Build the resolver described by a loaded configuration.
pub fn resolver_from_config(cfg: &config::ServerConfig) -> Result<Resolver> {
    let stream = cfg.stream_backend.client(cfg.acquire.stream_timeout)?;
    Ok(Resolver::new(cfg.acquire).with_stream_client(stream))
}
