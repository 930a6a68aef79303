//! File system abstraction.
//!
//! Byte-addressable async file I/O behind a trait so the storage backend can
//! be swapped or mocked for tests. Only the disk manager and the catalog
//! bootstrap loader touch this interface; no file handle outlives a single
//! call.

mod local;
mod memory;

pub use local::LocalFileSystem;
pub use memory::MemoryFileSystem;

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::Result;

/// Abstract byte-addressable file I/O
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// Check whether a directory exists
    async fn directory_exists(&self, path: &Path) -> bool;

    /// Create a directory (and any missing parents)
    async fn create_directory(&self, path: &Path) -> Result<()>;

    /// Check whether a file exists
    async fn file_exists(&self, path: &Path) -> bool;

    /// Length of a file in bytes
    async fn file_length(&self, path: &Path) -> Result<u64>;

    /// Set a file's length, extending with zeroes or truncating.
    /// Creates the file if it does not exist.
    async fn set_file_length(&self, path: &Path, length: u64) -> Result<()>;

    /// Read up to `buf.len()` bytes at `offset`, returning the count read.
    /// A return shorter than `buf.len()` means end of file was reached.
    async fn read_at(&self, path: &Path, offset: u64, buf: &mut [u8]) -> Result<usize>;

    /// Write all of `data` at `offset`, creating or extending the file as
    /// needed.
    async fn write_at(&self, path: &Path, offset: u64, data: &[u8]) -> Result<()>;

    /// Read an entire file
    async fn read_to_end(&self, path: &Path) -> Result<Vec<u8>>;

    /// Delete a file
    async fn delete_file(&self, path: &Path) -> Result<()>;

    /// Join a file name onto a base path
    fn join(&self, base: &Path, name: &str) -> PathBuf {
        base.join(name)
    }
}
