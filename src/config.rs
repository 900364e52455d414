use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::acquire::{AcquireSettings, StreamBackend, DEFAULT_MAX_IMAGE_BYTES};

const DEFAULT_ADDR: &str = "127.0.0.1:5001";
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 5;
const DEFAULT_STREAM_TIMEOUT_SECS: u64 = 5;
const DEFAULT_MAX_REQUEST_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Deserialize, Default)]
struct ServerConfigFile {
    addr: Option<String>,
    max_request_bytes: Option<usize>,
    acquire: Option<AcquireConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct AcquireConfigFile {
    http_timeout_secs: Option<u64>,
    stream_timeout_secs: Option<u64>,
    max_image_bytes: Option<usize>,
    stream_backend: Option<StreamBackend>,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: String,
    pub max_request_bytes: usize,
    pub acquire: AcquireSettings,
    pub stream_backend: StreamBackend,
}

impl ServerConfig {
    /// Load from `$DETECT_CONFIG` (if set), then apply `DETECT_*` env overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("DETECT_CONFIG").ok().map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    /// Load from an explicit file (if any), then apply `DETECT_*` env overrides.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => ServerConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ServerConfigFile) -> Self {
        let acquire = file.acquire.unwrap_or_default();
        Self {
            addr: file.addr.unwrap_or_else(|| DEFAULT_ADDR.to_string()),
            max_request_bytes: file.max_request_bytes.unwrap_or(DEFAULT_MAX_REQUEST_BYTES),
            acquire: AcquireSettings {
                http_timeout: Duration::from_secs(
                    acquire.http_timeout_secs.unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS),
                ),
                stream_timeout: Duration::from_secs(
                    acquire
                        .stream_timeout_secs
                        .unwrap_or(DEFAULT_STREAM_TIMEOUT_SECS),
                ),
                max_image_bytes: acquire.max_image_bytes.unwrap_or(DEFAULT_MAX_IMAGE_BYTES),
            },
            stream_backend: acquire.stream_backend.unwrap_or_default(),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(addr) = std::env::var("DETECT_ADDR") {
            if !addr.trim().is_empty() {
                self.addr = addr;
            }
        }
        if let Ok(secs) = std::env::var("DETECT_HTTP_TIMEOUT_SECS") {
            self.acquire.http_timeout = Duration::from_secs(parse_env_u64(
                "DETECT_HTTP_TIMEOUT_SECS",
                &secs,
            )?);
        }
        if let Ok(secs) = std::env::var("DETECT_STREAM_TIMEOUT_SECS") {
            self.acquire.stream_timeout = Duration::from_secs(parse_env_u64(
                "DETECT_STREAM_TIMEOUT_SECS",
                &secs,
            )?);
        }
        if let Ok(bytes) = std::env::var("DETECT_MAX_REQUEST_BYTES") {
            self.max_request_bytes = parse_env_u64("DETECT_MAX_REQUEST_BYTES", &bytes)? as usize;
        }
        if let Ok(backend) = std::env::var("DETECT_STREAM_BACKEND") {
            if !backend.trim().is_empty() {
                self.stream_backend = backend.parse()?;
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.acquire.http_timeout.is_zero() {
            return Err(anyhow!("http timeout must be greater than zero"));
        }
        if self.acquire.stream_timeout.is_zero() {
            return Err(anyhow!("stream timeout must be greater than zero"));
        }
        if self.max_request_bytes == 0 {
            return Err(anyhow!("max_request_bytes must be greater than zero"));
        }
        if self.acquire.max_image_bytes == 0 {
            return Err(anyhow!("max_image_bytes must be greater than zero"));
        }
        if self.stream_backend == StreamBackend::Gstreamer && !cfg!(feature = "rtsp-gstreamer") {
            return Err(anyhow!(
                "stream backend 'gstreamer' requires the rtsp-gstreamer feature"
            ));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<ServerConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let cfg = if is_toml {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn parse_env_u64(name: &str, value: &str) -> Result<u64> {
    value
        .trim()
        .parse()
        .map_err(|_| anyhow!("{} must be a non-negative integer", name))
}
