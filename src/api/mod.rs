//! Detection HTTP API.
//!
//! Minimal HTTP/1.1 server on a background thread. One connection is handled at a
//! time; each request gets its own acquisition call and nothing is shared between
//! requests except the (stateless) resolver and the detector backend.
//!
//! Routes:
//! - `GET /` health
//! - `POST /detect` acquire an image, return synthetic detections
//! - `POST /test_rtsp` check an RTSP source and report its geometry
//!
//! Every response carries permissive CORS headers; `OPTIONS` answers preflight.

use anyhow::{anyhow, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::acquire::{is_stream_uri, Resolver, SourceDescriptor, StreamProbe, FRAME_JPEG_QUALITY};
use crate::detect::{Detection, DetectorBackend, SyntheticBackend};
use crate::frame::DecodedImage;

const MAX_HEADER_BYTES: usize = 8192;
const READ_TIMEOUT: Duration = Duration::from_secs(10);
const SERVICE_STATUS: &str = "Detection server is running!";
const SERVICE_VERSION: &str = "1.0";

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
    pub max_request_bytes: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:5001".to_string(),
            max_request_bytes: 16 * 1024 * 1024,
        }
    }
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct ApiServer {
    cfg: ApiConfig,
    resolver: Resolver,
    detector: Box<dyn DetectorBackend>,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, resolver: Resolver) -> Self {
        Self {
            cfg,
            resolver,
            detector: Box::new(SyntheticBackend::new()),
        }
    }

    pub fn with_detector(mut self, detector: Box<dyn DetectorBackend>) -> Self {
        self.detector = detector;
        self
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let listener = TcpListener::bind(self.cfg.addr.as_str())?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let mut service = Service {
            resolver: self.resolver,
            detector: self.detector,
            max_request_bytes: self.cfg.max_request_bytes,
        };
        service.detector.warm_up()?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let join = std::thread::spawn(move || {
            if let Err(err) = run_api(listener, &mut service, shutdown_thread) {
                log::error!("detection api stopped: {}", err);
            }
        });

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

struct Service {
    resolver: Resolver,
    detector: Box<dyn DetectorBackend>,
    max_request_bytes: usize,
}

fn run_api(listener: TcpListener, service: &mut Service, shutdown: Arc<AtomicBool>) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, _)) => {
                if let Err(err) = handle_connection(stream, service) {
                    log::warn!("detection api request dropped: {}", err);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(20));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn handle_connection(mut stream: TcpStream, service: &mut Service) -> Result<()> {
    // Accepted sockets can inherit the listener's non-blocking mode on some platforms.
    stream.set_nonblocking(false)?;
    let request = match read_request(&mut stream, service.max_request_bytes)? {
        Incoming::Request(request) => request,
        Incoming::TooLarge => {
            log::info!("request body exceeds {} bytes", service.max_request_bytes);
            write_json_response(&mut stream, 413, r#"{"error":"payload_too_large"}"#)?;
            return Ok(());
        }
    };

    let (status, body) = route(&request, service);
    log::info!("{} {} -> {}", request.method, request.path, status);
    match body {
        Some(body) => write_response(&mut stream, status, "application/json", &body),
        None => write_response(&mut stream, status, "text/plain", &[]),
    }
}

fn route(request: &HttpRequest, service: &mut Service) -> (u16, Option<Vec<u8>>) {
    if request.method == "OPTIONS" {
        return (204, None);
    }
    let result = match (request.method.as_str(), request.path.as_str()) {
        ("GET", "/") => health(),
        ("POST", "/detect") => detect(service, &request.body),
        ("POST", "/test_rtsp") => test_rtsp(service, &request.body),
        (_, "/") | (_, "/detect") | (_, "/test_rtsp") => {
            return (405, Some(br#"{"error":"method_not_allowed"}"#.to_vec()))
        }
        _ => return (404, Some(br#"{"error":"not_found"}"#.to_vec())),
    };
    match result {
        Ok(body) => (200, Some(body)),
        Err(err) => {
            log::error!("{} {} failed: {:#}", request.method, request.path, err);
            (500, Some(br#"{"error":"internal_error"}"#.to_vec()))
        }
    }
}

// ----------------------------------------------------------------------------
// Handlers
// ----------------------------------------------------------------------------

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

fn health() -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(&HealthResponse {
        status: SERVICE_STATUS,
        version: SERVICE_VERSION,
    })?)
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DetectRequest {
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    image_data: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DetectSuccess {
    detections: Vec<Detection>,
    gauge_pct: f64,
    frame_w: u32,
    frame_h: u32,
    frame_data: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DetectFailure {
    detections: Vec<Detection>,
    gauge_pct: Option<f64>,
    error: &'static str,
}

impl DetectFailure {
    fn new(error: &'static str) -> Self {
        Self {
            detections: Vec::new(),
            gauge_pct: None,
            error,
        }
    }
}

fn detect(service: &mut Service, body: &[u8]) -> Result<Vec<u8>> {
    let request: DetectRequest = match serde_json::from_slice(body) {
        Ok(request) => request,
        Err(_) => return Ok(serde_json::to_vec(&DetectFailure::new("Invalid JSON payload"))?),
    };
    let source = request.source.unwrap_or_default();

    let mut acquired: Option<(DecodedImage, bool)> = None;
    if let Some(payload) = request.image_data.filter(|data| !data.is_empty()) {
        acquired = service
            .resolver
            .acquire(&SourceDescriptor::InlineData { payload })
            .ok()
            .map(|image| (image, false));
    }
    if acquired.is_none() && !source.is_empty() {
        let descriptor = service.resolver.classify(&source);
        log::debug!("detect: source classified as {}", descriptor.kind());
        let from_stream = descriptor.is_stream();
        acquired = service
            .resolver
            .acquire(&descriptor)
            .ok()
            .map(|image| (image, from_stream));
    }

    let Some((image, from_stream)) = acquired else {
        let error = if source.is_empty() {
            "No image data provided"
        } else {
            "Cannot read image from source"
        };
        return Ok(serde_json::to_vec(&DetectFailure::new(error))?);
    };

    let report = service.detector.detect(&image)?;
    let frame_data = if from_stream {
        match service.resolver.encode_jpeg(&image, FRAME_JPEG_QUALITY) {
            Ok(jpeg) => Some(STANDARD.encode(jpeg)),
            Err(err) => {
                log::debug!("detect: frame re-encode failed: {:#}", err);
                None
            }
        }
    } else {
        None
    };

    Ok(serde_json::to_vec(&DetectSuccess {
        detections: report.detections,
        gauge_pct: report.gauge_pct,
        frame_w: image.width(),
        frame_h: image.height(),
        frame_data,
    })?)
}

#[derive(Debug, Default, Deserialize)]
struct RtspTestRequest {
    #[serde(default)]
    source: Option<String>,
}

#[derive(Serialize)]
struct RtspTestResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    fps: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'static str>,
}

impl RtspTestResponse {
    fn failed(error: &'static str) -> Self {
        Self {
            success: false,
            error: Some(error),
            fps: None,
            width: None,
            height: None,
            message: None,
        }
    }
}

fn test_rtsp(service: &mut Service, body: &[u8]) -> Result<Vec<u8>> {
    let request: RtspTestRequest = match serde_json::from_slice(body) {
        Ok(request) => request,
        Err(_) => return Ok(serde_json::to_vec(&RtspTestResponse::failed("Invalid JSON payload"))?),
    };
    let source = request.source.unwrap_or_default();
    if !is_stream_uri(&source) {
        return Ok(serde_json::to_vec(&RtspTestResponse::failed("Not an RTSP URL"))?);
    }

    let response = match service.resolver.probe_stream(&source) {
        StreamProbe::Unreachable => RtspTestResponse::failed("Cannot connect to RTSP stream"),
        StreamProbe::NoFrames => RtspTestResponse::failed("Cannot read frames from stream"),
        StreamProbe::Ready { fps, width, height } => RtspTestResponse {
            success: true,
            error: None,
            fps: Some(fps),
            width: Some(width),
            height: Some(height),
            message: Some("RTSP connection successful"),
        },
    };
    Ok(serde_json::to_vec(&response)?)
}

// ----------------------------------------------------------------------------
// HTTP plumbing
// ----------------------------------------------------------------------------

enum Incoming {
    Request(HttpRequest),
    TooLarge,
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    headers: HashMap<String, String>,
    body: Vec<u8>,
}

impl HttpRequest {
    fn content_length(&self) -> Result<usize> {
        match self.headers.get("content-length") {
            Some(value) => value
                .parse()
                .map_err(|_| anyhow!("invalid content-length '{}'", value)),
            None => Ok(0),
        }
    }
}

fn read_request(stream: &mut TcpStream, max_body_bytes: usize) -> Result<Incoming> {
    stream.set_read_timeout(Some(READ_TIMEOUT))?;
    let mut buf = [0u8; 8192];
    let mut data = Vec::new();
    let header_end = loop {
        if let Some(pos) = find_header_end(&data) {
            break pos;
        }
        if data.len() > MAX_HEADER_BYTES {
            return Err(anyhow!("request headers too large"));
        }
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!("connection closed before end of headers"));
        }
        data.extend_from_slice(&buf[..n]);
    };

    let text = String::from_utf8_lossy(&data[..header_end]);
    let mut lines = text.split("\r\n");
    let request_line = lines.next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let mut headers = HashMap::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }
    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    let mut request = HttpRequest {
        method: method.to_ascii_uppercase(),
        path,
        headers,
        body: Vec::new(),
    };

    let content_length = request.content_length()?;
    if content_length > max_body_bytes {
        return Ok(Incoming::TooLarge);
    }
    let mut body = data.split_off(header_end + 4);
    while body.len() < content_length {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!("connection closed before end of body"));
        }
        body.extend_from_slice(&buf[..n]);
    }
    body.truncate(content_length);
    request.body = body;
    Ok(Incoming::Request(request))
}

fn find_header_end(data: &[u8]) -> Option<usize> {
    data.windows(4).position(|w| w == b"\r\n\r\n")
}

fn write_json_response(stream: &mut TcpStream, status: u16, body: &str) -> Result<()> {
    write_response(stream, status, "application/json", body.as_bytes())
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        204 => "HTTP/1.1 204 No Content",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        413 => "HTTP/1.1 413 Payload Too Large",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\n\
         Access-Control-Allow-Origin: *\r\n\
         Access-Control-Allow-Methods: GET, POST, OPTIONS\r\n\
         Access-Control-Allow-Headers: Content-Type\r\n\
         Cache-Control: no-store\r\nConnection: close\r\n\r\n",
        status_line = status_line,
        content_type = content_type,
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    stream.flush()?;
    Ok(())
}
