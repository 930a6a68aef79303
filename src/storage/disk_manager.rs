//! Disk manager: page-granular I/O over per-table files.

use std::path::PathBuf;
use std::sync::Arc;

use log::warn;

use crate::error::{Result, StorageError};
use crate::fs::FileSystem;
use crate::storage::stripe::StripedMutexMap;
use crate::types::{PageId, PAGE_SIZE};

/// Maps `(table_id, page_index)` to byte offsets in `<table_id>.tbl` files
/// under a base directory.
///
/// Reads and writes are concurrency-safe at this interface; writer/reader
/// exclusion for one page is the buffer pool's job. Allocation for one table
/// runs in a critical section so indices are strictly increasing with no
/// gaps, and the file length is a page multiple after every successful call.
pub struct DiskManager {
    fs: Arc<dyn FileSystem>,
    base_dir: PathBuf,
    allocation_locks: StripedMutexMap,
}

impl DiskManager {
    /// Open a disk manager over `base_dir`, creating the directory if needed
    pub async fn open(fs: Arc<dyn FileSystem>, base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        if !fs.directory_exists(&base_dir).await {
            fs.create_directory(&base_dir).await?;
        }
        Ok(Self {
            fs,
            base_dir,
            allocation_locks: StripedMutexMap::default(),
        })
    }

    /// Path of a table's data file
    pub fn table_path(&self, table_id: i32) -> PathBuf {
        self.fs.join(&self.base_dir, &format!("{table_id}.tbl"))
    }

    /// Check whether the table's data file exists
    pub async fn table_file_exists(&self, table_id: i32) -> bool {
        self.fs.file_exists(&self.table_path(table_id)).await
    }

    /// Ensure the table's data file exists (possibly zero-length). Idempotent.
    pub async fn create_table_file(&self, table_id: i32) -> Result<()> {
        let path = self.table_path(table_id);
        if !self.fs.file_exists(&path).await {
            self.fs.set_file_length(&path, 0).await?;
        }
        Ok(())
    }

    /// Number of whole pages in the table's file; 0 when the file is missing
    pub async fn table_page_count(&self, table_id: i32) -> Result<i32> {
        let path = self.table_path(table_id);
        if !self.fs.file_exists(&path).await {
            return Ok(0);
        }
        let length = self.fs.file_length(&path).await?;
        Ok((length / PAGE_SIZE as u64) as i32)
    }

    /// Read one page into `buf`.
    ///
    /// `buf` must be exactly one page long (programmer error otherwise).
    /// Fewer than `PAGE_SIZE` bytes available at the page's offset is
    /// treated as corruption.
    pub async fn read_disk_page(&self, page_id: PageId, buf: &mut [u8]) -> Result<()> {
        assert_eq!(buf.len(), PAGE_SIZE, "page buffer must be {PAGE_SIZE} bytes");
        let path = self.table_path(page_id.table_id);
        let read = self
            .fs
            .read_at(&path, page_id.file_offset(PAGE_SIZE), buf)
            .await?;
        if read < PAGE_SIZE {
            return Err(StorageError::corruption(
                page_id,
                format!("short read: {read} of {PAGE_SIZE} bytes"),
            ));
        }
        Ok(())
    }

    /// Write one page at its offset, creating or extending the file as needed.
    ///
    /// `buf` must be exactly one page long (programmer error otherwise).
    pub async fn write_disk_page(&self, page_id: PageId, buf: &[u8]) -> Result<()> {
        assert_eq!(buf.len(), PAGE_SIZE, "page buffer must be {PAGE_SIZE} bytes");
        let path = self.table_path(page_id.table_id);
        self.fs
            .write_at(&path, page_id.file_offset(PAGE_SIZE), buf)
            .await
    }

    /// Allocate the next page of a table by extending its file.
    ///
    /// Critical section per table: concurrent calls for one table serialise
    /// and return strictly increasing indices starting at 0; calls for
    /// different tables proceed in parallel.
    pub async fn allocate_new_disk_page(&self, table_id: i32) -> Result<PageId> {
        let _guard = self.allocation_locks.lock(table_id).await;

        let path = self.table_path(table_id);
        let length = if self.fs.file_exists(&path).await {
            self.fs.file_length(&path).await?
        } else {
            self.fs.set_file_length(&path, 0).await?;
            0
        };

        if length % PAGE_SIZE as u64 != 0 {
            warn!(
                "table {table_id} file length {length} is not a multiple of {PAGE_SIZE}; \
                 allocating from the truncated page count"
            );
        }
        let next = (length / PAGE_SIZE as u64) as i32;
        self.fs
            .set_file_length(&path, (next as u64 + 1) * PAGE_SIZE as u64)
            .await?;
        Ok(PageId::new(table_id, next))
    }
}
