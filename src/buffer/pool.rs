//! Buffer pool manager.
//!
//! A fixed number of frames cache pages. Bookkeeping (frame map, LRU list,
//! in-flight markers) lives under one `parking_lot` mutex that is never held
//! across an `await`; disk I/O happens between bookkeeping steps, published
//! through `watch`-channel markers so that concurrent fetches of one page
//! coalesce into a single read and never observe a frame mid-flush.
//!
//! Pin discipline: a [`PageGuard`] pins its frame for its lifetime and
//! unpins on drop, so a cancelled task releases its pages. A pinned frame is
//! never evicted. Dirty flags are sticky until a successful flush.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use log::trace;
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::watch;

use crate::buffer::lru::LruCache;
use crate::error::{Result, StorageError};
use crate::page::Page;
use crate::storage::DiskManager;
use crate::types::PageId;

/// One cached page plus its bookkeeping
struct Frame {
    id: PageId,
    page: RwLock<Page>,
    pin_count: AtomicU32,
    dirty: AtomicBool,
}

impl Frame {
    fn new(page: Page, pin_count: u32, dirty: bool) -> Self {
        Self {
            id: page.id(),
            page: RwLock::new(page),
            pin_count: AtomicU32::new(pin_count),
            dirty: AtomicBool::new(dirty),
        }
    }
}

/// Bookkeeping shared by all operations; never held across an `await`
struct PoolInner {
    frames: HashMap<PageId, Arc<Frame>>,
    lru: LruCache,
    /// Pages with I/O in flight: a pending load, or a flush-before-evict.
    /// Dropping the sender wakes every waiting fetch.
    busy: HashMap<PageId, watch::Sender<()>>,
}

/// Decision taken under the bookkeeping lock; acted on outside it
enum Step {
    /// Frame resident and pinned for the caller
    Hit(Arc<Frame>),
    /// Somebody else is loading or flushing this page; wait and retry
    Wait(watch::Receiver<()>),
    /// A dirty victim was carved out; flush it, then retry
    FlushVictim(Arc<Frame>),
    /// Capacity reserved and the in-flight marker set; load from disk
    Load,
    /// Frame installed (new_page claims without I/O)
    Install(Arc<Frame>),
    /// Every frame is pinned
    Exhausted,
}

/// Fixed-size page cache over a [`DiskManager`]
pub struct BufferPoolManager {
    disk: Arc<DiskManager>,
    capacity: usize,
    inner: Mutex<PoolInner>,
}

impl BufferPoolManager {
    /// Create a pool holding at most `pool_size_in_pages` pages
    pub fn new(disk: Arc<DiskManager>, pool_size_in_pages: usize) -> Self {
        assert!(pool_size_in_pages > 0, "buffer pool size must be positive");
        Self {
            disk,
            capacity: pool_size_in_pages,
            inner: Mutex::new(PoolInner {
                frames: HashMap::with_capacity(pool_size_in_pages),
                lru: LruCache::new(pool_size_in_pages),
                busy: HashMap::new(),
            }),
        }
    }

    /// The configured frame count
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of resident frames right now
    pub fn resident_count(&self) -> usize {
        self.inner.lock().frames.len()
    }

    /// The disk manager this pool writes through
    pub fn disk(&self) -> &Arc<DiskManager> {
        &self.disk
    }

    /// Fetch a page, reading it from disk on a miss.
    ///
    /// The returned guard holds a pin. Concurrent fetches of one non-resident
    /// page perform exactly one disk read.
    pub async fn fetch_page(&self, page_id: PageId) -> Result<PageGuard<'_>> {
        loop {
            let step = {
                let mut inner = self.inner.lock();
                if let Some(frame) = inner.frames.get(&page_id) {
                    let frame = Arc::clone(frame);
                    frame.pin_count.fetch_add(1, Ordering::SeqCst);
                    inner.lru.access(page_id);
                    Step::Hit(frame)
                } else if let Some(tx) = inner.busy.get(&page_id) {
                    Step::Wait(tx.subscribe())
                } else {
                    self.reserve_slot(&mut inner, Some(page_id))
                }
            };

            match step {
                Step::Hit(frame) | Step::Install(frame) => {
                    return Ok(PageGuard { pool: self, frame })
                }
                Step::Wait(mut rx) => {
                    // Err means the sender is already gone; retry either way.
                    let _ = rx.changed().await;
                }
                Step::FlushVictim(victim) => self.flush_victim(victim).await?,
                Step::Load => return self.load_page(page_id).await,
                Step::Exhausted => return Err(StorageError::BufferPoolExhausted),
            }
        }
    }

    /// Allocate a fresh page on disk and install a zeroed frame for it.
    ///
    /// No disk read happens: a newly allocated page is all zeroes. The frame
    /// comes back pinned and dirty; its content is logically uninitialised
    /// until the caller lays out a slotted page in it.
    pub async fn new_page(&self, table_id: i32) -> Result<PageGuard<'_>> {
        let page_id = self.disk.allocate_new_disk_page(table_id).await?;
        trace!("allocated page {page_id}");
        loop {
            let step = {
                let mut inner = self.inner.lock();
                if inner.frames.len() + inner.busy.len() < self.capacity {
                    let frame = Arc::new(Frame::new(Page::new(page_id), 1, true));
                    inner.frames.insert(page_id, Arc::clone(&frame));
                    inner.lru.access(page_id);
                    Step::Install(frame)
                } else {
                    self.reserve_slot(&mut inner, None)
                }
            };

            match step {
                Step::Hit(frame) | Step::Install(frame) => {
                    return Ok(PageGuard { pool: self, frame })
                }
                Step::Wait(mut rx) => {
                    let _ = rx.changed().await;
                }
                Step::FlushVictim(victim) => self.flush_victim(victim).await?,
                Step::Load => unreachable!("new_page never claims a load marker"),
                Step::Exhausted => return Err(StorageError::BufferPoolExhausted),
            }
        }
    }

    /// Decrement a page's pin count, optionally marking it dirty first.
    ///
    /// Unpinning a page with pin count zero, or one that is not resident, is
    /// a programmer error.
    pub fn unpin_page(&self, page_id: PageId, dirty: bool) {
        let frame = self
            .inner
            .lock()
            .frames
            .get(&page_id)
            .cloned()
            .unwrap_or_else(|| panic!("unpin of non-resident page {page_id}"));
        if dirty {
            frame.dirty.store(true, Ordering::SeqCst);
        }
        self.unpin_frame(&frame);
    }

    /// Write a page back if it is resident and dirty, clearing its dirty flag
    pub async fn flush_page(&self, page_id: PageId) -> Result<()> {
        let frame = self.inner.lock().frames.get(&page_id).cloned();
        match frame {
            Some(frame) => self.write_frame(&frame).await,
            None => Ok(()),
        }
    }

    /// Flush every dirty resident frame
    pub async fn flush_all(&self) -> Result<()> {
        let frames: Vec<Arc<Frame>> = self.inner.lock().frames.values().cloned().collect();
        for frame in frames {
            self.write_frame(&frame).await?;
        }
        Ok(())
    }

    /// Flush everything and release all frames
    pub async fn dispose(&self) -> Result<()> {
        self.flush_all().await?;
        let mut inner = self.inner.lock();
        inner.frames.clear();
        inner.lru.clear();
        Ok(())
    }

    /// Make room for one more frame, under the bookkeeping lock.
    ///
    /// Pops clean unpinned victims outright; a dirty victim is removed from
    /// the map, published as busy, and handed back for flushing. When every
    /// frame is pinned but I/O is in flight, the caller waits instead of
    /// failing. With `claim` set, the load marker for that page is installed
    /// once capacity is available.
    fn reserve_slot(&self, inner: &mut PoolInner, claim: Option<PageId>) -> Step {
        while inner.frames.len() + inner.busy.len() >= self.capacity {
            match Self::select_victim(inner) {
                Some(victim) => {
                    if victim.dirty.load(Ordering::SeqCst) {
                        let (tx, _rx) = watch::channel(());
                        inner.busy.insert(victim.id, tx);
                        return Step::FlushVictim(victim);
                    }
                    trace!("evicted clean page {}", victim.id);
                }
                None => {
                    return match inner.busy.values().next() {
                        Some(tx) => Step::Wait(tx.subscribe()),
                        None => Step::Exhausted,
                    };
                }
            }
        }

        match claim {
            Some(page_id) => {
                let (tx, _rx) = watch::channel(());
                inner.busy.insert(page_id, tx);
                Step::Load
            }
            None => {
                // caller installs its own frame on the next loop pass
                Step::Wait(watch::channel(()).0.subscribe())
            }
        }
    }

    /// Pick an unpinned victim and remove it from the frame map.
    ///
    /// Scans from the cold end of the LRU list; pinned frames are rotated
    /// back to the hot end. Bounded by the list length so a fully pinned
    /// pool terminates with `None`.
    fn select_victim(inner: &mut PoolInner) -> Option<Arc<Frame>> {
        for _ in 0..inner.lru.len() {
            let candidate = inner.lru.pop_lru()?;
            let Some(frame) = inner.frames.get(&candidate).cloned() else {
                continue;
            };
            if frame.pin_count.load(Ordering::SeqCst) == 0 {
                inner.frames.remove(&candidate);
                return Some(frame);
            }
            inner.lru.access(candidate);
        }
        None
    }

    /// Flush an evicted dirty victim, reinstating it if the write fails or
    /// the task is cancelled mid-flight.
    async fn flush_victim(&self, victim: Arc<Frame>) -> Result<()> {
        let mut rollback = EvictRollback {
            pool: self,
            frame: Some(Arc::clone(&victim)),
        };
        self.write_frame(&victim).await?;
        rollback.frame = None;
        trace!("evicted dirty page {} after flush", victim.id);

        let mut inner = self.inner.lock();
        inner.busy.remove(&victim.id);
        Ok(())
    }

    /// Read a page from disk into a fresh pinned frame. The in-flight marker
    /// for `page_id` must already be set; it is removed on every exit path.
    async fn load_page(&self, page_id: PageId) -> Result<PageGuard<'_>> {
        let mut cleanup = LoadCleanup {
            pool: self,
            page_id,
            armed: true,
        };

        let mut page = Page::new(page_id);
        self.disk.read_disk_page(page_id, page.data_mut()).await?;
        trace!("loaded page {page_id} from disk");

        let frame = Arc::new(Frame::new(page, 1, false));
        {
            let mut inner = self.inner.lock();
            inner.busy.remove(&page_id);
            inner.frames.insert(page_id, Arc::clone(&frame));
            inner.lru.access(page_id);
        }
        cleanup.armed = false;

        Ok(PageGuard { pool: self, frame })
    }

    async fn write_frame(&self, frame: &Arc<Frame>) -> Result<()> {
        if !frame.dirty.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let bytes = frame.page.read().data().to_vec();
        match self.disk.write_disk_page(frame.id, &bytes).await {
            Ok(()) => Ok(()),
            Err(e) => {
                // keep the dirty flag sticky until a flush succeeds
                frame.dirty.store(true, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    fn unpin_frame(&self, frame: &Frame) {
        let previous = frame.pin_count.fetch_sub(1, Ordering::SeqCst);
        assert!(
            previous > 0,
            "unpin of page {} with pin count already zero",
            frame.id
        );
        self.inner.lock().lru.access(frame.id);
    }
}

/// Reinstates an evicted frame if its flush never completed
struct EvictRollback<'a> {
    pool: &'a BufferPoolManager,
    frame: Option<Arc<Frame>>,
}

impl Drop for EvictRollback<'_> {
    fn drop(&mut self) {
        if let Some(frame) = self.frame.take() {
            let mut inner = self.pool.inner.lock();
            inner.busy.remove(&frame.id);
            inner.lru.access(frame.id);
            inner.frames.insert(frame.id, frame);
        }
    }
}

/// Removes a load marker if the read never completed
struct LoadCleanup<'a> {
    pool: &'a BufferPoolManager,
    page_id: PageId,
    armed: bool,
}

impl Drop for LoadCleanup<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.pool.inner.lock().busy.remove(&self.page_id);
        }
    }
}

/// RAII pin on a cached page.
///
/// Reads and writes go through the frame's lock and must not be held across
/// an `await`; the guard itself may be. Taking a write lock marks the frame
/// dirty. Dropping the guard unpins.
pub struct PageGuard<'a> {
    pool: &'a BufferPoolManager,
    frame: Arc<Frame>,
}

impl std::fmt::Debug for PageGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageGuard").finish_non_exhaustive()
    }
}

impl PageGuard<'_> {
    /// Identity of the pinned page
    pub fn page_id(&self) -> PageId {
        self.frame.id
    }

    /// Lock the page for reading
    pub fn read(&self) -> RwLockReadGuard<'_, Page> {
        self.frame.page.read()
    }

    /// Lock the page for writing; the frame is marked dirty
    pub fn write(&self) -> RwLockWriteGuard<'_, Page> {
        let guard = self.frame.page.write();
        self.frame.dirty.store(true, Ordering::SeqCst);
        guard
    }

    /// Set the dirty flag without taking the write lock
    pub fn mark_dirty(&self) {
        self.frame.dirty.store(true, Ordering::SeqCst);
    }
}

impl Drop for PageGuard<'_> {
    fn drop(&mut self) {
        self.pool.unpin_frame(&self.frame);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::{FileSystem, MemoryFileSystem};
    use crate::page::slotted;
    use crate::types::{PageType, PAGE_SIZE};
    use async_trait::async_trait;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::AtomicUsize;

    async fn pool_with_capacity(capacity: usize) -> Arc<BufferPoolManager> {
        let fs = Arc::new(MemoryFileSystem::new());
        let disk = Arc::new(DiskManager::open(fs, "/data").await.unwrap());
        Arc::new(BufferPoolManager::new(disk, capacity))
    }

    #[tokio::test]
    async fn test_new_page_then_fetch() {
        let pool = pool_with_capacity(10).await;

        let page_id = {
            let guard = pool.new_page(1).await.unwrap();
            let mut page = guard.write();
            slotted::initialize(&mut page, PageType::Leaf);
            assert!(slotted::try_add_record(&mut page, b"hello", 0));
            page.id()
        };
        assert_eq!(page_id, PageId::new(1, 0));

        pool.flush_all().await.unwrap();

        let guard = pool.fetch_page(page_id).await.unwrap();
        let page = guard.read();
        assert_eq!(slotted::get_raw_record(&page, 0), b"hello");
    }

    #[tokio::test]
    async fn test_eviction_flushes_dirty_pages() {
        let pool = pool_with_capacity(2).await;

        // three dirty pages through a 2-frame pool forces an evict-flush
        for i in 0..3u8 {
            let guard = pool.new_page(1).await.unwrap();
            let mut page = guard.write();
            slotted::initialize(&mut page, PageType::Leaf);
            assert!(slotted::try_add_record(&mut page, &[i; 8], 0));
        }
        assert!(pool.resident_count() <= 2);

        // every page readable with its own contents, evicted ones from disk
        for i in 0..3u8 {
            let guard = pool.fetch_page(PageId::new(1, i as i32)).await.unwrap();
            let page = guard.read();
            assert_eq!(slotted::get_raw_record(&page, 0), &[i; 8]);
        }
    }

    #[tokio::test]
    async fn test_pinned_pages_are_never_evicted() {
        let pool = pool_with_capacity(1).await;

        let _held = pool.new_page(1).await.unwrap();
        let err = pool.new_page(1).await.unwrap_err();
        assert!(matches!(err, StorageError::BufferPoolExhausted));

        drop(_held);
        assert!(pool.new_page(1).await.is_ok());
    }

    #[tokio::test]
    async fn test_explicit_unpin_with_dirty_flag() {
        let pool = pool_with_capacity(4).await;
        let page_id = {
            let guard = pool.new_page(1).await.unwrap();
            slotted::initialize(&mut guard.write(), PageType::Leaf);
            guard.page_id()
        };
        pool.flush_all().await.unwrap();

        // fetch pins once more; unpin through the explicit API
        let guard = pool.fetch_page(page_id).await.unwrap();
        let frame = Arc::clone(&guard.frame);
        std::mem::forget(guard);
        assert_eq!(frame.pin_count.load(Ordering::SeqCst), 1);
        pool.unpin_page(page_id, true);
        assert_eq!(frame.pin_count.load(Ordering::SeqCst), 0);
        assert!(frame.dirty.load(Ordering::SeqCst));
    }

    #[tokio::test]
    #[should_panic(expected = "pin count already zero")]
    async fn test_unpin_at_zero_panics() {
        let pool = pool_with_capacity(4).await;
        let page_id = {
            let guard = pool.new_page(1).await.unwrap();
            guard.page_id()
        };
        // guard dropped: pin count is zero now
        pool.unpin_page(page_id, false);
    }

    /// Wraps a file system and counts positional reads
    struct CountingFs {
        inner: MemoryFileSystem,
        reads: AtomicUsize,
    }

    #[async_trait]
    impl FileSystem for CountingFs {
        async fn directory_exists(&self, path: &Path) -> bool {
            self.inner.directory_exists(path).await
        }
        async fn create_directory(&self, path: &Path) -> crate::error::Result<()> {
            self.inner.create_directory(path).await
        }
        async fn file_exists(&self, path: &Path) -> bool {
            self.inner.file_exists(path).await
        }
        async fn file_length(&self, path: &Path) -> crate::error::Result<u64> {
            self.inner.file_length(path).await
        }
        async fn set_file_length(&self, path: &Path, length: u64) -> crate::error::Result<()> {
            self.inner.set_file_length(path, length).await
        }
        async fn read_at(
            &self,
            path: &Path,
            offset: u64,
            buf: &mut [u8],
        ) -> crate::error::Result<usize> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.inner.read_at(path, offset, buf).await
        }
        async fn write_at(&self, path: &Path, offset: u64, data: &[u8]) -> crate::error::Result<()> {
            self.inner.write_at(path, offset, data).await
        }
        async fn read_to_end(&self, path: &Path) -> crate::error::Result<Vec<u8>> {
            self.inner.read_to_end(path).await
        }
        async fn delete_file(&self, path: &Path) -> crate::error::Result<()> {
            self.inner.delete_file(path).await
        }
        fn join(&self, base: &Path, name: &str) -> PathBuf {
            self.inner.join(base, name)
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_fetch_reads_disk_once() {
        let fs = Arc::new(CountingFs {
            inner: MemoryFileSystem::new(),
            reads: AtomicUsize::new(0),
        });
        let disk = Arc::new(DiskManager::open(Arc::clone(&fs) as _, "/data").await.unwrap());

        // seed one page straight through the disk manager
        let page_id = disk.allocate_new_disk_page(1).await.unwrap();
        disk.write_disk_page(page_id, &[0x5Au8; PAGE_SIZE])
            .await
            .unwrap();

        let pool = Arc::new(BufferPoolManager::new(disk, 8));
        let before = fs.reads.load(Ordering::SeqCst);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let pool = Arc::clone(&pool);
            handles.push(tokio::spawn(async move {
                let guard = pool.fetch_page(page_id).await.unwrap();
                assert_eq!(guard.read().data()[0], 0x5A);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(fs.reads.load(Ordering::SeqCst) - before, 1);
    }
}
