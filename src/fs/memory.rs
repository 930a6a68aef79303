//! In-memory file system for deterministic tests.

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::Result;
use crate::fs::FileSystem;

/// [`FileSystem`] held entirely in memory.
///
/// Same observable semantics as [`crate::fs::LocalFileSystem`]: positional
/// writes past the end zero-fill the gap, short reads happen at end of file.
#[derive(Debug, Default)]
pub struct MemoryFileSystem {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    files: HashMap<PathBuf, Vec<u8>>,
    directories: HashSet<PathBuf>,
}

impl MemoryFileSystem {
    pub fn new() -> Self {
        Self::default()
    }
}

fn not_found(path: &Path) -> crate::error::StorageError {
    io::Error::new(io::ErrorKind::NotFound, format!("{} not found", path.display())).into()
}

#[async_trait]
impl FileSystem for MemoryFileSystem {
    async fn directory_exists(&self, path: &Path) -> bool {
        self.inner.lock().directories.contains(path)
    }

    async fn create_directory(&self, path: &Path) -> Result<()> {
        self.inner.lock().directories.insert(path.to_path_buf());
        Ok(())
    }

    async fn file_exists(&self, path: &Path) -> bool {
        self.inner.lock().files.contains_key(path)
    }

    async fn file_length(&self, path: &Path) -> Result<u64> {
        let inner = self.inner.lock();
        let file = inner.files.get(path).ok_or_else(|| not_found(path))?;
        Ok(file.len() as u64)
    }

    async fn set_file_length(&self, path: &Path, length: u64) -> Result<()> {
        let mut inner = self.inner.lock();
        let file = inner.files.entry(path.to_path_buf()).or_default();
        file.resize(length as usize, 0);
        Ok(())
    }

    async fn read_at(&self, path: &Path, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let inner = self.inner.lock();
        let file = inner.files.get(path).ok_or_else(|| not_found(path))?;
        let offset = offset as usize;
        if offset >= file.len() {
            return Ok(0);
        }
        let available = file.len() - offset;
        let count = available.min(buf.len());
        buf[..count].copy_from_slice(&file[offset..offset + count]);
        Ok(count)
    }

    async fn write_at(&self, path: &Path, offset: u64, data: &[u8]) -> Result<()> {
        let mut inner = self.inner.lock();
        let file = inner.files.entry(path.to_path_buf()).or_default();
        let end = offset as usize + data.len();
        if file.len() < end {
            file.resize(end, 0);
        }
        file[offset as usize..end].copy_from_slice(data);
        Ok(())
    }

    async fn read_to_end(&self, path: &Path) -> Result<Vec<u8>> {
        let inner = self.inner.lock();
        inner
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| not_found(path))
    }

    async fn delete_file(&self, path: &Path) -> Result<()> {
        let mut inner = self.inner.lock();
        inner
            .files
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| not_found(path))
    }
}
