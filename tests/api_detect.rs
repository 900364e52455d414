use anyhow::Result;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{ImageFormat, RgbImage};
use serde_json::Value;
use std::io::{Cursor, Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use stream_detect::acquire::{
    DisabledStreamClient, StreamClient, StreamHandle, SyntheticStreamClient,
};
use stream_detect::api::{ApiConfig, ApiHandle, ApiServer};
use stream_detect::{AcquireSettings, DecodedImage, Resolver};

fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    RgbImage::from_pixel(width, height, image::Rgb([0, 120, 200]))
        .write_to(&mut out, ImageFormat::Png)
        .expect("encode test png");
    out.into_inner()
}

fn read_response(stream: &mut TcpStream) -> Result<(String, String)> {
    let mut response = String::new();
    stream.read_to_string(&mut response)?;
    let mut parts = response.splitn(2, "\r\n\r\n");
    let headers = parts.next().unwrap_or("").to_string();
    let body = parts.next().unwrap_or("").to_string();
    Ok((headers, body))
}

/// Connects to anything, never produces a frame, and records what it was asked.
#[derive(Default)]
struct SilentStream {
    opens: AtomicUsize,
    closes: Arc<AtomicUsize>,
    read_timeouts: Arc<Mutex<Vec<Duration>>>,
}

struct SilentHandle {
    closes: Arc<AtomicUsize>,
    read_timeouts: Arc<Mutex<Vec<Duration>>>,
}

impl StreamClient for SilentStream {
    fn name(&self) -> &'static str {
        "silent"
    }

    fn open(&self, _uri: &str) -> Result<Box<dyn StreamHandle>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SilentHandle {
            closes: self.closes.clone(),
            read_timeouts: self.read_timeouts.clone(),
        }))
    }
}

impl StreamHandle for SilentHandle {
    fn set_buffer_depth(&mut self, _frames: u32) -> Result<()> {
        Ok(())
    }

    fn read_frame(&mut self, timeout: Duration) -> Result<Option<DecodedImage>> {
        self.read_timeouts
            .lock()
            .expect("timeout log lock")
            .push(timeout);
        Ok(None)
    }

    fn close(&mut self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

fn short_stream_timeout() -> AcquireSettings {
    AcquireSettings {
        stream_timeout: Duration::from_millis(750),
        ..AcquireSettings::default()
    }
}

struct TestApi {
    api_handle: Option<ApiHandle>,
}

impl TestApi {
    fn new(stream_client: Arc<dyn StreamClient>) -> Result<Self> {
        Self::with_limit(stream_client, 1024 * 1024)
    }

    fn with_limit(stream_client: Arc<dyn StreamClient>, max_request_bytes: usize) -> Result<Self> {
        let resolver = Resolver::new(AcquireSettings::default()).with_stream_client(stream_client);
        Self::with_resolver(resolver, max_request_bytes)
    }

    fn with_resolver(resolver: Resolver, max_request_bytes: usize) -> Result<Self> {
        let api_config = ApiConfig {
            addr: "127.0.0.1:0".to_string(),
            max_request_bytes,
        };
        let api_handle = ApiServer::new(api_config, resolver).spawn()?;
        Ok(Self {
            api_handle: Some(api_handle),
        })
    }

    fn handle(&self) -> &ApiHandle {
        self.api_handle
            .as_ref()
            .expect("test API handle should be initialized")
    }

    fn post(&self, path: &str, body: &str) -> Result<(String, String)> {
        let mut stream = TcpStream::connect(self.handle().addr)?;
        let request = format!(
            "POST {path} HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{body}",
            body.len()
        );
        stream.write_all(request.as_bytes())?;
        read_response(&mut stream)
    }

    fn post_json(&self, path: &str, body: &str) -> Result<Value> {
        let (headers, body) = self.post(path, body)?;
        assert!(headers.contains("200 OK"), "unexpected headers: {headers}");
        Ok(serde_json::from_str(&body)?)
    }

    fn raw(&self, request: &str) -> Result<(String, String)> {
        let mut stream = TcpStream::connect(self.handle().addr)?;
        stream.write_all(request.as_bytes())?;
        read_response(&mut stream)
    }
}

impl Drop for TestApi {
    fn drop(&mut self) {
        if let Some(handle) = self.api_handle.take() {
            handle.stop().expect("failed to stop API server");
        }
    }
}

#[test]
fn health_endpoint_reports_running() -> Result<()> {
    let api = TestApi::new(Arc::new(DisabledStreamClient))?;
    let (headers, body) = api.raw("GET / HTTP/1.1\r\nHost: localhost\r\n\r\n")?;
    assert!(headers.contains("200 OK"));
    assert!(headers.contains("Access-Control-Allow-Origin: *"));
    let value: Value = serde_json::from_str(&body)?;
    assert_eq!(value["status"], "Detection server is running!");
    assert_eq!(value["version"], "1.0");
    Ok(())
}

#[test]
fn preflight_gets_cors_headers() -> Result<()> {
    let api = TestApi::new(Arc::new(DisabledStreamClient))?;
    let (headers, _body) = api.raw("OPTIONS /detect HTTP/1.1\r\nHost: localhost\r\n\r\n")?;
    assert!(headers.contains("204 No Content"));
    assert!(headers.contains("Access-Control-Allow-Methods: GET, POST, OPTIONS"));
    Ok(())
}

#[test]
fn detect_with_inline_data_url_returns_detections() -> Result<()> {
    let api = TestApi::new(Arc::new(DisabledStreamClient))?;
    let payload = format!("data:image/png;base64,{}", STANDARD.encode(png_bytes(320, 240)));
    let value = api.post_json("/detect", &format!(r#"{{"imageData":"{payload}"}}"#))?;

    assert_eq!(value["frameW"], 320);
    assert_eq!(value["frameH"], 240);
    assert!(value["frameData"].is_null());
    assert!(value.get("error").is_none());
    let detections = value["detections"].as_array().expect("detections array");
    assert_eq!(detections.len(), 10);
    assert_eq!(detections[0]["label"], "Water");
    assert_eq!(detections[0]["color"], "rgba(0,150,255,0.6)");
    let gauge = value["gaugePct"].as_f64().expect("gauge reading");
    assert!((15.0..=85.0).contains(&gauge));
    Ok(())
}

#[test]
fn detect_with_local_path_source() -> Result<()> {
    let api = TestApi::new(Arc::new(DisabledStreamClient))?;
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("frame.png");
    std::fs::write(&path, png_bytes(64, 48))?;
    let body = serde_json::json!({ "source": path.to_string_lossy() }).to_string();
    let value = api.post_json("/detect", &body)?;
    assert_eq!(value["frameW"], 64);
    assert_eq!(value["frameH"], 48);
    Ok(())
}

#[test]
fn detect_falls_back_to_source_when_inline_is_bad() -> Result<()> {
    let api = TestApi::new(Arc::new(DisabledStreamClient))?;
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("frame.png");
    std::fs::write(&path, png_bytes(10, 20))?;
    let body = serde_json::json!({
        "imageData": "data:image/png;base64,not-base64!",
        "source": path.to_string_lossy(),
    })
    .to_string();
    let value = api.post_json("/detect", &body)?;
    assert_eq!(value["frameW"], 10);
    assert_eq!(value["frameH"], 20);
    Ok(())
}

#[test]
fn detect_from_stream_includes_jpeg_frame() -> Result<()> {
    let client = SyntheticStreamClient {
        width: 160,
        height: 120,
        fps: 15.0,
    };
    let api = TestApi::new(Arc::new(client))?;
    let value = api.post_json("/detect", r#"{"source":"rtsp://camera.local/live"}"#)?;
    assert_eq!(value["frameW"], 160);
    assert_eq!(value["frameH"], 120);
    let frame = value["frameData"].as_str().expect("frame data for rtsp source");
    let jpeg = STANDARD.decode(frame)?;
    assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
    Ok(())
}

#[test]
fn detect_reports_unreadable_source() -> Result<()> {
    let api = TestApi::new(Arc::new(DisabledStreamClient))?;
    let value = api.post_json("/detect", r#"{"source":"rtsp://bad-host/stream"}"#)?;
    assert_eq!(value["error"], "Cannot read image from source");
    assert_eq!(value["detections"], serde_json::json!([]));
    assert!(value["gaugePct"].is_null());

    let value = api.post_json("/detect", r#"{"source":"/no/such/file.jpg"}"#)?;
    assert_eq!(value["error"], "Cannot read image from source");
    Ok(())
}

#[test]
fn detect_reports_missing_image() -> Result<()> {
    let api = TestApi::new(Arc::new(DisabledStreamClient))?;
    let value = api.post_json("/detect", "{}")?;
    assert_eq!(value["error"], "No image data provided");
    Ok(())
}

#[test]
fn detect_rejects_invalid_json() -> Result<()> {
    let api = TestApi::new(Arc::new(DisabledStreamClient))?;
    let value = api.post_json("/detect", "{not json")?;
    assert_eq!(value["error"], "Invalid JSON payload");
    assert!(value["gaugePct"].is_null());
    Ok(())
}

#[test]
fn test_rtsp_reports_stream_geometry() -> Result<()> {
    let client = SyntheticStreamClient {
        width: 64,
        height: 32,
        fps: 12.5,
    };
    let api = TestApi::new(Arc::new(client))?;
    let value = api.post_json("/test_rtsp", r#"{"source":"rtsp://camera.local/live"}"#)?;
    assert_eq!(value["success"], true);
    assert_eq!(value["width"], 64);
    assert_eq!(value["height"], 32);
    assert_eq!(value["fps"], 12.5);
    assert_eq!(value["message"], "RTSP connection successful");
    Ok(())
}

#[test]
fn test_rtsp_rejects_other_schemes_and_dead_streams() -> Result<()> {
    let api = TestApi::new(Arc::new(DisabledStreamClient))?;
    let value = api.post_json("/test_rtsp", r#"{"source":"http://camera.local/snap.jpg"}"#)?;
    assert_eq!(value["success"], false);
    assert_eq!(value["error"], "Not an RTSP URL");

    let value = api.post_json("/test_rtsp", r#"{"source":"rtsp://bad-host/stream"}"#)?;
    assert_eq!(value["success"], false);
    assert_eq!(value["error"], "Cannot connect to RTSP stream");
    Ok(())
}

#[test]
fn test_rtsp_reports_silent_stream_and_uses_stream_timeout() -> Result<()> {
    let stream = Arc::new(SilentStream::default());
    let resolver = Resolver::new(short_stream_timeout()).with_stream_client(stream.clone());
    let api = TestApi::with_resolver(resolver, 1024 * 1024)?;

    let value = api.post_json("/test_rtsp", r#"{"source":"rtsp://camera.local/live"}"#)?;
    assert_eq!(value["success"], false);
    assert_eq!(value["error"], "Cannot read frames from stream");
    assert_eq!(stream.opens.load(Ordering::SeqCst), 1);
    assert_eq!(stream.closes.load(Ordering::SeqCst), 1);
    assert_eq!(
        *stream.read_timeouts.lock().expect("timeout log lock"),
        vec![Duration::from_millis(750)]
    );
    Ok(())
}

#[test]
fn detect_on_silent_stream_is_unreadable_and_released() -> Result<()> {
    let stream = Arc::new(SilentStream::default());
    let resolver = Resolver::new(short_stream_timeout()).with_stream_client(stream.clone());
    let api = TestApi::with_resolver(resolver, 1024 * 1024)?;

    let value = api.post_json("/detect", r#"{"source":"rtsp://camera.local/live"}"#)?;
    assert_eq!(value["error"], "Cannot read image from source");
    assert!(value["frameData"].is_null());
    assert_eq!(stream.closes.load(Ordering::SeqCst), 1);
    assert_eq!(
        *stream.read_timeouts.lock().expect("timeout log lock"),
        vec![Duration::from_millis(750)]
    );
    Ok(())
}

#[test]
fn test_rtsp_rejects_invalid_json() -> Result<()> {
    let api = TestApi::new(Arc::new(DisabledStreamClient))?;
    let value = api.post_json("/test_rtsp", "{source:")?;
    assert_eq!(value["success"], false);
    assert_eq!(value["error"], "Invalid JSON payload");
    Ok(())
}

#[test]
fn stream_uri_with_pipeline_syntax_is_never_opened() -> Result<()> {
    let stream = Arc::new(SilentStream::default());
    let resolver = Resolver::default().with_stream_client(stream.clone());
    let api = TestApi::with_resolver(resolver, 1024 * 1024)?;
    let body = serde_json::json!({
        "source": "rtsp://cam/x ! multifilesink location=/tmp/out"
    })
    .to_string();

    let value = api.post_json("/test_rtsp", &body)?;
    assert_eq!(value["success"], false);
    assert_eq!(value["error"], "Cannot connect to RTSP stream");

    let value = api.post_json("/detect", &body)?;
    assert_eq!(value["error"], "Cannot read image from source");
    assert_eq!(stream.opens.load(Ordering::SeqCst), 0);
    Ok(())
}

#[test]
fn inline_image_with_rtsp_source_has_no_frame_data() -> Result<()> {
    let client = SyntheticStreamClient {
        width: 160,
        height: 120,
        fps: 15.0,
    };
    let api = TestApi::new(Arc::new(client))?;
    let body = serde_json::json!({
        "imageData": format!("data:image/png;base64,{}", STANDARD.encode(png_bytes(30, 20))),
        "source": "rtsp://camera.local/live",
    })
    .to_string();

    let value = api.post_json("/detect", &body)?;
    // The inline image wins; the stream is never read, so nothing is re-encoded.
    assert_eq!(value["frameW"], 30);
    assert_eq!(value["frameH"], 20);
    assert!(value["frameData"].is_null());
    Ok(())
}

#[test]
fn unknown_route_and_wrong_method() -> Result<()> {
    let api = TestApi::new(Arc::new(DisabledStreamClient))?;
    let (headers, body) = api.raw("GET /events HTTP/1.1\r\nHost: localhost\r\n\r\n")?;
    assert!(headers.contains("404 Not Found"));
    assert!(body.contains(r#""error":"not_found""#));

    let (headers, _body) = api.raw("GET /detect HTTP/1.1\r\nHost: localhost\r\n\r\n")?;
    assert!(headers.contains("405 Method Not Allowed"));
    Ok(())
}

#[test]
fn oversized_body_is_refused() -> Result<()> {
    let api = TestApi::with_limit(Arc::new(DisabledStreamClient), 16)?;
    let (headers, _body) = api.raw(
        "POST /detect HTTP/1.1\r\nHost: localhost\r\nContent-Length: 1000\r\n\r\n",
    )?;
    assert!(headers.contains("413 Payload Too Large"));
    Ok(())
}
