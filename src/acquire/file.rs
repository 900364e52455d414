//! Local filesystem capability.
//!
//! Acquisition only needs two things from the filesystem: "is this a regular file"
//! and "give me its bytes". Both sit behind `FileSystem` so tests can count calls.

use anyhow::{anyhow, Context, Result};
use std::io::Read;
use std::path::Path;

/// Filesystem existence/read capability.
pub trait FileSystem: Send + Sync {
    /// True only for an existing regular file (symlinks are followed).
    fn is_file(&self, path: &Path) -> bool;

    /// Read the whole file.
    fn read(&self, path: &Path) -> Result<Vec<u8>>;
}

/// The real filesystem.
#[derive(Clone, Copy, Debug, Default)]
pub struct LocalFs;

impl FileSystem for LocalFs {
    fn is_file(&self, path: &Path) -> bool {
        std::fs::metadata(path)
            .map(|meta| meta.is_file())
            .unwrap_or(false)
    }

    fn read(&self, path: &Path) -> Result<Vec<u8>> {
        std::fs::read(path).with_context(|| format!("read image file {}", path.display()))
    }
}

/// Filesystem view that refuses files above a size cap.
#[derive(Clone, Copy, Debug)]
pub struct BoundedFs {
    max_bytes: usize,
}

impl BoundedFs {
    pub fn new(max_bytes: usize) -> Self {
        Self { max_bytes }
    }
}

impl FileSystem for BoundedFs {
    fn is_file(&self, path: &Path) -> bool {
        LocalFs.is_file(path)
    }

    fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("open image file {}", path.display()))?;
        let mut bytes = Vec::new();
        file.take(self.max_bytes as u64 + 1)
            .read_to_end(&mut bytes)
            .with_context(|| format!("read image file {}", path.display()))?;
        if bytes.len() > self.max_bytes {
            return Err(anyhow!(
                "image file {} exceeds {} bytes",
                path.display(),
                self.max_bytes
            ));
        }
        Ok(bytes)
    }
}
