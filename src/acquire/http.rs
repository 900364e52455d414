//! Blocking HTTP fetch capability.
//!
//! One GET per acquisition, bounded by a wall-clock timeout. Redirects are followed
//! by the agent; any final status outside 2xx is an error.

use anyhow::{anyhow, Context, Result};
use std::io::Read;
use std::time::Duration;

/// Blocking HTTP fetch capability.
pub trait HttpFetcher: Send + Sync {
    fn fetch(&self, uri: &str, timeout: Duration) -> Result<Vec<u8>>;
}

/// `ureq`-backed fetcher.
#[derive(Clone, Debug)]
pub struct UreqFetcher {
    max_bytes: usize,
}

impl UreqFetcher {
    pub fn new(max_bytes: usize) -> Self {
        Self { max_bytes }
    }
}

impl HttpFetcher for UreqFetcher {
    fn fetch(&self, uri: &str, timeout: Duration) -> Result<Vec<u8>> {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        let response = agent
            .get(uri)
            .call()
            .with_context(|| format!("fetch image from {}", uri))?;
        let status = response.status();
        if !(200..300).contains(&status) {
            return Err(anyhow!("fetch image from {}: status {}", uri, status));
        }

        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(self.max_bytes as u64 + 1)
            .read_to_end(&mut bytes)
            .context("read image body")?;
        if bytes.len() > self.max_bytes {
            return Err(anyhow!("image body exceeds {} bytes", self.max_bytes));
        }
        if bytes.is_empty() {
            return Err(anyhow!("empty image body"));
        }
        Ok(bytes)
    }
}
