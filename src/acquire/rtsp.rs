//! RTSP frame grabbing.
//!
//! A stream acquisition is a scoped open -> configure -> read-one -> close sequence.
//! `StreamSession` owns the opened handle and closes it on drop, so the connection
//! is released on success, on an empty read and on every error path.
//!
//! Clients:
//! - `GstreamerStreamClient` (feature `rtsp-gstreamer`): real decode via
//!   `rtspsrc ! decodebin ! videoconvert ! appsink`, with the URI set as an
//!   `rtspsrc` property rather than written into the pipeline description
//! - `SyntheticStreamClient`: generated gradient frames for demos and tests
//! - `DisabledStreamClient`: every open fails

use anyhow::{anyhow, Result};
#[cfg(feature = "rtsp-gstreamer")]
use anyhow::Context;
use serde::Deserialize;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::acquire::descriptor::is_safe_stream_uri;
use crate::frame::DecodedImage;

/// Frames retained by the client buffer. One means a read never returns a stale frame.
pub const STREAM_BUFFER_DEPTH: u32 = 1;

/// Streaming-video client capability.
pub trait StreamClient: Send + Sync {
    fn name(&self) -> &'static str;

    /// Connect to `uri`. Implementations must bound how long this can block.
    fn open(&self, uri: &str) -> Result<Box<dyn StreamHandle>>;
}

/// An opened stream connection.
pub trait StreamHandle: Send {
    /// Cap the number of decoded frames the client keeps queued.
    fn set_buffer_depth(&mut self, frames: u32) -> Result<()>;

    /// Read one frame. `Ok(None)` means the stream produced nothing within `timeout`.
    fn read_frame(&mut self, timeout: Duration) -> Result<Option<DecodedImage>>;

    /// Nominal frame rate when the stream reports one.
    fn fps(&self) -> Option<f64> {
        None
    }

    /// Release the connection. Called exactly once, by `StreamSession`.
    fn close(&mut self);
}

/// Scoped ownership of an opened stream handle.
pub struct StreamSession {
    handle: Box<dyn StreamHandle>,
}

impl StreamSession {
    /// Open `uri` through `client`. URIs with pipeline syntax are refused before the
    /// client sees them.
    pub fn open(client: &dyn StreamClient, uri: &str) -> Result<Self> {
        if !is_safe_stream_uri(uri) {
            return Err(anyhow!("refusing stream URI with pipeline syntax"));
        }
        let handle = client.open(uri)?;
        Ok(Self { handle })
    }

    pub fn set_buffer_depth(&mut self, frames: u32) -> Result<()> {
        self.handle.set_buffer_depth(frames)
    }

    pub fn read_frame(&mut self, timeout: Duration) -> Result<Option<DecodedImage>> {
        self.handle.read_frame(timeout)
    }

    pub fn fps(&self) -> Option<f64> {
        self.handle.fps()
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.handle.close();
    }
}

/// Open `uri`, read exactly one fresh frame, release the connection.
pub fn grab_frame(client: &dyn StreamClient, uri: &str, timeout: Duration) -> Result<DecodedImage> {
    let mut session = StreamSession::open(client, uri)?;
    session.set_buffer_depth(STREAM_BUFFER_DEPTH)?;
    session
        .read_frame(timeout)?
        .ok_or_else(|| anyhow!("stream produced no frame within {:?}", timeout))
}

/// Result of a connectivity check against a stream.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamProbe {
    Unreachable,
    NoFrames,
    Ready {
        fps: f64,
        width: u32,
        height: u32,
    },
}

/// Connect, read one frame, and report what the stream looks like.
pub fn probe(client: &dyn StreamClient, uri: &str, timeout: Duration) -> StreamProbe {
    let mut session = match StreamSession::open(client, uri) {
        Ok(session) => session,
        Err(err) => {
            log::debug!("stream probe: open failed: {:#}", err);
            return StreamProbe::Unreachable;
        }
    };
    if let Err(err) = session.set_buffer_depth(STREAM_BUFFER_DEPTH) {
        log::debug!("stream probe: buffer depth not applied: {:#}", err);
    }
    match session.read_frame(timeout) {
        Ok(Some(frame)) => StreamProbe::Ready {
            fps: session.fps().unwrap_or(0.0),
            width: frame.width(),
            height: frame.height(),
        },
        Ok(None) => StreamProbe::NoFrames,
        Err(err) => {
            log::debug!("stream probe: read failed: {:#}", err);
            StreamProbe::NoFrames
        }
    }
}

/// Which stream client the service runs with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamBackend {
    Gstreamer,
    Synthetic,
    Disabled,
}

impl Default for StreamBackend {
    fn default() -> Self {
        if cfg!(feature = "rtsp-gstreamer") {
            StreamBackend::Gstreamer
        } else {
            StreamBackend::Disabled
        }
    }
}

impl FromStr for StreamBackend {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "gstreamer" => Ok(StreamBackend::Gstreamer),
            "synthetic" => Ok(StreamBackend::Synthetic),
            "disabled" => Ok(StreamBackend::Disabled),
            other => Err(anyhow!(
                "unknown stream backend '{}'; expected gstreamer, synthetic or disabled",
                other
            )),
        }
    }
}

impl StreamBackend {
    pub fn client(self, open_timeout: Duration) -> Result<Arc<dyn StreamClient>> {
        match self {
            StreamBackend::Synthetic => Ok(Arc::new(SyntheticStreamClient::default())),
            StreamBackend::Disabled => Ok(Arc::new(DisabledStreamClient)),
            #[cfg(feature = "rtsp-gstreamer")]
            StreamBackend::Gstreamer => Ok(Arc::new(GstreamerStreamClient::new(open_timeout)?)),
            #[cfg(not(feature = "rtsp-gstreamer"))]
            StreamBackend::Gstreamer => {
                let _ = open_timeout;
                Err(anyhow!("RTSP requires the rtsp-gstreamer feature"))
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Disabled client
// ----------------------------------------------------------------------------

/// Stream client for builds without a video backend.
#[derive(Clone, Copy, Debug, Default)]
pub struct DisabledStreamClient;

impl StreamClient for DisabledStreamClient {
    fn name(&self) -> &'static str {
        "disabled"
    }

    fn open(&self, uri: &str) -> Result<Box<dyn StreamHandle>> {
        Err(anyhow!(
            "cannot open {}: no stream backend configured (RTSP requires the rtsp-gstreamer feature)",
            uri
        ))
    }
}

// ----------------------------------------------------------------------------
// Synthetic client
// ----------------------------------------------------------------------------

/// Produces deterministic gradient frames for any URI.
#[derive(Clone, Debug)]
pub struct SyntheticStreamClient {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
}

impl Default for SyntheticStreamClient {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            fps: 10.0,
        }
    }
}

impl StreamClient for SyntheticStreamClient {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn open(&self, uri: &str) -> Result<Box<dyn StreamHandle>> {
        log::info!("stream: connected to {} (synthetic)", uri);
        Ok(Box::new(SyntheticStreamHandle {
            width: self.width,
            height: self.height,
            fps: self.fps,
            frame_count: 0,
        }))
    }
}

struct SyntheticStreamHandle {
    width: u32,
    height: u32,
    fps: f64,
    frame_count: u64,
}

impl SyntheticStreamHandle {
    fn generate_pixels(&self) -> Vec<u8> {
        let pixel_count = (self.width as usize) * (self.height as usize) * 3;
        let mut pixels = vec![0u8; pixel_count];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 + self.frame_count) % 256) as u8;
        }
        pixels
    }
}

impl StreamHandle for SyntheticStreamHandle {
    fn set_buffer_depth(&mut self, _frames: u32) -> Result<()> {
        Ok(())
    }

    fn read_frame(&mut self, _timeout: Duration) -> Result<Option<DecodedImage>> {
        self.frame_count += 1;
        let frame = DecodedImage::from_raw_rgb(self.generate_pixels(), self.width, self.height)?;
        Ok(Some(frame))
    }

    fn fps(&self) -> Option<f64> {
        Some(self.fps)
    }

    fn close(&mut self) {}
}

// ----------------------------------------------------------------------------
// GStreamer client
// ----------------------------------------------------------------------------

#[cfg(feature = "rtsp-gstreamer")]
pub struct GstreamerStreamClient {
    open_timeout: Duration,
}

#[cfg(feature = "rtsp-gstreamer")]
impl GstreamerStreamClient {
    pub fn new(open_timeout: Duration) -> Result<Self> {
        gstreamer::init().context("initialize gstreamer")?;
        Ok(Self { open_timeout })
    }
}

#[cfg(feature = "rtsp-gstreamer")]
impl StreamClient for GstreamerStreamClient {
    fn name(&self) -> &'static str {
        "gstreamer"
    }

    fn open(&self, uri: &str) -> Result<Box<dyn StreamHandle>> {
        use gstreamer::prelude::*;

        let description = format!(
            "decodebin name=decode ! videoconvert ! video/x-raw,format=RGB ! \
             appsink name=appsink sync=false max-buffers={} drop=true",
            STREAM_BUFFER_DEPTH
        );
        let pipeline = gstreamer::parse::launch(&description)
            .context("build RTSP pipeline")?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| anyhow!("RTSP pipeline is not a Pipeline"))?;

        // The location only ever travels as a property value.
        let source = gstreamer::ElementFactory::make("rtspsrc")
            .name("source")
            .property("location", uri)
            .property("latency", 0u32)
            .build()
            .context("create rtspsrc element")?;
        pipeline
            .add(&source)
            .context("add rtspsrc to RTSP pipeline")?;
        let decode = pipeline
            .by_name("decode")
            .context("decodebin element missing from pipeline")?;
        let decode_weak = decode.downgrade();
        source.connect_pad_added(move |_, pad| {
            let Some(decode) = decode_weak.upgrade() else {
                return;
            };
            let Some(sink) = decode.static_pad("sink") else {
                return;
            };
            if sink.is_linked() {
                return;
            }
            if let Err(err) = pad.link(&sink) {
                log::debug!("stream: rtspsrc pad not linked: {:?}", err);
            }
        });

        let appsink = pipeline
            .by_name("appsink")
            .context("appsink element missing from pipeline")?
            .downcast::<gstreamer_app::AppSink>()
            .map_err(|_| anyhow!("appsink element has unexpected type"))?;
        let caps = gstreamer::Caps::builder("video/x-raw")
            .field("format", "RGB")
            .build();
        appsink.set_caps(Some(&caps));
        appsink.set_sync(false);

        // From here on the handle owns the pipeline and tears it down on failure.
        let mut handle = GstreamerStreamHandle {
            pipeline,
            appsink,
            fps: None,
            closed: false,
        };
        if let Err(err) = handle.start(self.open_timeout) {
            handle.close();
            return Err(err);
        }
        log::info!("stream: connected to {}", uri);
        Ok(Box::new(handle))
    }
}

#[cfg(feature = "rtsp-gstreamer")]
struct GstreamerStreamHandle {
    pipeline: gstreamer::Pipeline,
    appsink: gstreamer_app::AppSink,
    fps: Option<f64>,
    closed: bool,
}

#[cfg(feature = "rtsp-gstreamer")]
impl GstreamerStreamHandle {
    fn start(&mut self, timeout: Duration) -> Result<()> {
        use gstreamer::prelude::*;

        self.pipeline
            .set_state(gstreamer::State::Playing)
            .context("set RTSP pipeline to Playing")?;
        let (result, current, _pending) = self.pipeline.state(clock_time(timeout));
        match result.context("RTSP pipeline failed to start")? {
            gstreamer::StateChangeSuccess::Async => Err(anyhow!(
                "RTSP pipeline did not start within {:?} (state {:?})",
                timeout,
                current
            )),
            _ => Ok(()),
        }
    }
}

#[cfg(feature = "rtsp-gstreamer")]
impl StreamHandle for GstreamerStreamHandle {
    fn set_buffer_depth(&mut self, frames: u32) -> Result<()> {
        self.appsink.set_max_buffers(frames.into());
        self.appsink.set_drop(true);
        Ok(())
    }

    fn read_frame(&mut self, timeout: Duration) -> Result<Option<DecodedImage>> {
        let Some(sample) = self.appsink.try_pull_sample(clock_time(timeout)) else {
            return Ok(None);
        };
        let (pixels, width, height, fps) = sample_to_pixels(&sample)?;
        self.fps = fps;
        DecodedImage::from_raw_rgb(pixels, width, height).map(Some)
    }

    fn fps(&self) -> Option<f64> {
        self.fps
    }

    fn close(&mut self) {
        use gstreamer::prelude::*;

        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(err) = self.pipeline.set_state(gstreamer::State::Null) {
            log::warn!("stream: failed to stop RTSP pipeline: {}", err);
        }
    }
}

#[cfg(feature = "rtsp-gstreamer")]
fn clock_time(timeout: Duration) -> gstreamer::ClockTime {
    gstreamer::ClockTime::from_mseconds(timeout.as_millis() as u64)
}

#[cfg(feature = "rtsp-gstreamer")]
fn sample_to_pixels(sample: &gstreamer::Sample) -> Result<(Vec<u8>, u32, u32, Option<f64>)> {
    let buffer = sample.buffer().context("RTSP sample missing buffer")?;
    let caps = sample.caps().context("RTSP sample missing caps")?;
    let info =
        gstreamer_video::VideoInfo::from_caps(caps).context("parse RTSP caps as video info")?;

    let width = info.width();
    let height = info.height();
    let fps = {
        let rate = info.fps();
        if rate.denom() > 0 && rate.numer() > 0 {
            Some(rate.numer() as f64 / rate.denom() as f64)
        } else {
            None
        }
    };
    let row_bytes = (width as usize) * 3;
    let stride = info.stride()[0] as usize;

    let map = buffer.map_readable().context("map RTSP buffer")?;
    let data = map.as_slice();

    if stride == row_bytes {
        let len = row_bytes * height as usize;
        let pixels = data
            .get(..len)
            .context("RTSP buffer shorter than frame")?
            .to_vec();
        return Ok((pixels, width, height, fps));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .context("RTSP buffer row is out of bounds")?,
        );
    }

    Ok((pixels, width, height, fps))
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
