//! B+Tree operations: search, insert with splits, delete.
//!
//! Descent is iterative from page 0 (always the root), resolving children
//! through the buffer pool by page index. Writers serialise on a per-table
//! latch; readers share it. All node mutation happens under short
//! synchronous page locks between suspension points.
//!
//! Splits: leaves split at the byte-size median and keep their sibling
//! chain stitched; internal nodes split at the count median with the middle
//! separator promoted, never copied. When the root splits, both halves move
//! to freshly allocated pages and page 0 is rewritten as the new root, so
//! the root's page index never changes. Children moved to a new page get
//! their parent pointer rewritten. Deletes never rebalance; leaves may
//! shrink arbitrarily.

use std::sync::Arc;

use log::debug;
use tokio::sync::RwLock;

use crate::btree::node::{encode_entry, InternalNode, InternalNodeMut, LeafNode, LeafNodeMut};
use crate::btree::scan::{ScanBounds, TableScan};
use crate::buffer::{BufferPoolManager, PageGuard};
use crate::error::{Result, StorageError};
use crate::page::{slotted, Page, HEADER_SIZE, SLOT_SIZE};
use crate::record;
use crate::types::{Key, PageId, PageType, Record, TableDefinition, NO_PAGE, PAGE_SIZE};

/// A split propagating upward: `separator` now divides `left_child` from
/// `right_child` and must be inserted into their parent.
struct PendingSplit {
    separator: Vec<u8>,
    left_child: i32,
    right_child: i32,
}

/// One table's clustered B+Tree
pub struct BPlusTree<'a> {
    pool: &'a BufferPoolManager,
    table_id: i32,
    table: Arc<TableDefinition>,
    latch: Arc<RwLock<()>>,
}

impl<'a> BPlusTree<'a> {
    /// Bind a tree to its table's pages
    pub fn new(
        pool: &'a BufferPoolManager,
        table_id: i32,
        table: Arc<TableDefinition>,
        latch: Arc<RwLock<()>>,
    ) -> Self {
        Self {
            pool,
            table_id,
            table,
            latch,
        }
    }

    fn pid(&self, page_index: i32) -> PageId {
        PageId::new(self.table_id, page_index)
    }

    /// Point lookup by primary key
    pub async fn search(&self, key: &Key) -> Result<Option<Record>> {
        let _latch = self.latch.read().await;
        if self.pool.disk().table_page_count(self.table_id).await? == 0 {
            return Ok(None);
        }

        let mut current = 0i32;
        loop {
            let guard = self.pool.fetch_page(self.pid(current)).await?;
            let next = {
                let page = guard.read();
                match page.page_type() {
                    Some(PageType::Leaf) => {
                        let leaf = LeafNode::attach(&page, &self.table)?;
                        let slot = leaf.binary_search(key)?;
                        if slot < 0 {
                            return Ok(None);
                        }
                        let row = record::deserialize(self.table.columns(), leaf.record(slot as usize))?;
                        return Ok(Some(row));
                    }
                    Some(PageType::Internal) => {
                        InternalNode::attach(&page, &self.table)?.find_child(key)?
                    }
                    _ => {
                        return Err(StorageError::corruption(
                            page.id(),
                            "page is neither leaf nor internal",
                        ))
                    }
                }
            };
            current = next;
        }
    }

    /// Lazy forward range scan
    pub async fn scan(&self, bounds: ScanBounds) -> Result<TableScan<'a>> {
        TableScan::open(
            self.pool,
            self.table_id,
            Arc::clone(&self.table),
            Arc::clone(&self.latch),
            bounds,
        )
        .await
    }

    /// Insert one row; fails with a duplicate-key error when its primary key
    /// is already present, leaving the tree untouched.
    pub async fn insert(&self, row: &Record) -> Result<()> {
        let key = record::primary_key_of(&self.table, row)?;
        let bytes = record::serialize_row(&self.table, row)?;
        if bytes.len() > slotted::MAX_RECORD_SIZE {
            return Err(StorageError::RecordTooLarge {
                size: bytes.len(),
                max: slotted::MAX_RECORD_SIZE,
            });
        }

        let _latch = self.latch.write().await;

        if self.pool.disk().table_page_count(self.table_id).await? == 0 {
            let guard = self.pool.new_page(self.table_id).await?;
            assert_eq!(guard.page_id().page_index, 0, "first allocation is the root");
            slotted::initialize(&mut guard.write(), PageType::Leaf);
        }

        // descend, remembering the ancestor chain for split propagation
        let mut path: Vec<i32> = Vec::new();
        let mut current = 0i32;
        let leaf_guard = loop {
            let guard = self.pool.fetch_page(self.pid(current)).await?;
            let next = {
                let page = guard.read();
                match page.page_type() {
                    Some(PageType::Leaf) => None,
                    Some(PageType::Internal) => {
                        Some(InternalNode::attach(&page, &self.table)?.find_child(&key)?)
                    }
                    _ => {
                        return Err(StorageError::corruption(
                            page.id(),
                            "page is neither leaf nor internal",
                        ))
                    }
                }
            };
            match next {
                None => break guard,
                Some(child) => {
                    path.push(current);
                    current = child;
                }
            }
        };

        // plain insert when the leaf has room
        let insert_at = {
            let mut page = leaf_guard.write();
            let mut leaf = LeafNodeMut::attach(&mut page, &self.table)?;
            let slot = leaf.as_ref().binary_search(&key)?;
            if slot >= 0 {
                return Err(StorageError::DuplicateKey(key.to_string()));
            }
            let at = (!slot) as usize;
            if leaf.try_insert(at, &bytes) {
                return Ok(());
            }
            at
        };

        debug!("splitting leaf {} of table {}", current, self.table_id);
        self.split_leaf(leaf_guard, current, insert_at, bytes, &mut path)
            .await
    }

    /// Delete by primary key; `true` when a row was removed
    pub async fn delete(&self, key: &Key) -> Result<bool> {
        let _latch = self.latch.write().await;
        if self.pool.disk().table_page_count(self.table_id).await? == 0 {
            return Ok(false);
        }

        let mut current = 0i32;
        loop {
            let guard = self.pool.fetch_page(self.pid(current)).await?;
            let next = {
                let page = guard.read();
                match page.page_type() {
                    Some(PageType::Leaf) => {
                        let slot = LeafNode::attach(&page, &self.table)?.binary_search(key)?;
                        if slot < 0 {
                            return Ok(false);
                        }
                        drop(page);
                        let mut page = guard.write();
                        LeafNodeMut::attach(&mut page, &self.table)?.remove(slot as usize);
                        return Ok(true);
                    }
                    Some(PageType::Internal) => {
                        InternalNode::attach(&page, &self.table)?.find_child(key)?
                    }
                    _ => {
                        return Err(StorageError::corruption(
                            page.id(),
                            "page is neither leaf nor internal",
                        ))
                    }
                }
            };
            current = next;
        }
    }

    /// Split a full leaf, placing `row` at its sorted position, and push the
    /// separator into the parent chain.
    async fn split_leaf(
        &self,
        leaf_guard: PageGuard<'_>,
        leaf_index: i32,
        insert_at: usize,
        row: Vec<u8>,
        path: &mut Vec<i32>,
    ) -> Result<()> {
        // all rows in key order, with the new one in place
        let (mut rows, prev_index, next_index, parent_index) = {
            let page = leaf_guard.read();
            let leaf = LeafNode::attach(&page, &self.table)?;
            let rows: Vec<Vec<u8>> = (0..leaf.record_count())
                .map(|slot| leaf.record(slot).to_vec())
                .collect();
            (
                rows,
                page.prev_leaf_index(),
                page.next_leaf_index(),
                page.parent_page_index(),
            )
        };
        rows.insert(insert_at, row);

        let cut = choose_split(&rows)?;
        let (left_rows, right_rows) = rows.split_at(cut);
        let separator =
            record::serialize_key(&self.table, &record::deserialize_primary_key(&self.table, &right_rows[0])?)?;

        if leaf_index == 0 {
            // root split: both halves go to fresh pages, page 0 becomes the
            // one-separator internal root
            let left_guard = self.pool.new_page(self.table_id).await?;
            let right_guard = self.pool.new_page(self.table_id).await?;
            let left_index = left_guard.page_id().page_index;
            let right_index = right_guard.page_id().page_index;

            {
                let mut page = left_guard.write();
                fill_leaf(&mut page, left_rows);
                page.set_parent_page_index(0);
                page.set_prev_leaf_index(NO_PAGE);
                page.set_next_leaf_index(right_index);
            }
            {
                let mut page = right_guard.write();
                fill_leaf(&mut page, right_rows);
                page.set_parent_page_index(0);
                page.set_prev_leaf_index(left_index);
                page.set_next_leaf_index(NO_PAGE);
            }
            {
                let mut page = leaf_guard.write();
                slotted::initialize(&mut page, PageType::Internal);
                page.set_rightmost_child_index(right_index);
                let entry = encode_entry(left_index, &separator);
                assert!(slotted::try_add_record(&mut page, &entry, 0));
            }
            return Ok(());
        }

        let right_guard = self.pool.new_page(self.table_id).await?;
        let right_index = right_guard.page_id().page_index;

        {
            let mut page = leaf_guard.write();
            fill_leaf(&mut page, left_rows);
            page.set_parent_page_index(parent_index);
            page.set_prev_leaf_index(prev_index);
            page.set_next_leaf_index(right_index);
        }
        {
            let mut page = right_guard.write();
            fill_leaf(&mut page, right_rows);
            page.set_parent_page_index(parent_index);
            page.set_prev_leaf_index(leaf_index);
            page.set_next_leaf_index(next_index);
        }
        drop(right_guard);
        drop(leaf_guard);

        if next_index != NO_PAGE {
            let neighbor = self.pool.fetch_page(self.pid(next_index)).await?;
            neighbor.write().set_prev_leaf_index(right_index);
        }

        self.propagate_split(
            PendingSplit {
                separator,
                left_child: leaf_index,
                right_child: right_index,
            },
            path,
        )
        .await
    }

    /// Insert pending separators up the ancestor chain, splitting internal
    /// nodes (and finally the root) as needed.
    async fn propagate_split(&self, pending: PendingSplit, path: &mut Vec<i32>) -> Result<()> {
        let mut pending = pending;
        loop {
            let node_index = path
                .pop()
                .expect("split propagation above the root");
            let guard = self.pool.fetch_page(self.pid(node_index)).await?;
            let separator_key = record::deserialize_key(&self.table, &pending.separator)?;

            // fits-in-place attempt
            let insert_at = {
                let mut page = guard.write();
                let mut node = InternalNodeMut::attach(&mut page, &self.table)?;
                let slot = node.as_ref().binary_search(&separator_key)?;
                assert!(slot < 0, "separator already present in parent");
                let at = (!slot) as usize;
                debug_assert_eq!(node.as_ref().child_at(at), pending.left_child);
                if node.try_insert_entry(at, &pending.separator, pending.left_child) {
                    node.set_child_at(at + 1, pending.right_child);
                    return Ok(());
                }
                at
            };

            debug!(
                "splitting internal node {} of table {}",
                node_index, self.table_id
            );

            // full: collect entries with the pending insertion applied
            let (mut entries, mut rightmost, parent_index) = {
                let page = guard.read();
                let node = InternalNode::attach(&page, &self.table)?;
                (node.entries(), node.child_at(node.separator_count()), page.parent_page_index())
            };
            if insert_at == entries.len() {
                rightmost = pending.right_child;
            } else {
                entries[insert_at].0 = pending.right_child;
            }
            entries.insert(insert_at, (pending.left_child, pending.separator.clone()));

            // count-median split; the middle separator is promoted, its
            // child becomes the left half's rightmost
            let mid = entries.len() / 2;
            let promoted = entries[mid].1.clone();
            let left_rightmost = entries[mid].0;
            let left_entries: Vec<(i32, Vec<u8>)> = entries[..mid].to_vec();
            let right_entries: Vec<(i32, Vec<u8>)> = entries[mid + 1..].to_vec();
            let right_rightmost = rightmost;

            if node_index == 0 {
                assert!(path.is_empty(), "root with a recorded ancestor");
                let left_guard = self.pool.new_page(self.table_id).await?;
                let right_guard = self.pool.new_page(self.table_id).await?;
                let left_index = left_guard.page_id().page_index;
                let right_index = right_guard.page_id().page_index;

                {
                    let mut page = left_guard.write();
                    fill_internal(&mut page, &left_entries, left_rightmost);
                    page.set_parent_page_index(0);
                }
                {
                    let mut page = right_guard.write();
                    fill_internal(&mut page, &right_entries, right_rightmost);
                    page.set_parent_page_index(0);
                }
                drop(left_guard);
                drop(right_guard);

                for (child, _) in &left_entries {
                    self.set_parent(*child, left_index).await?;
                }
                self.set_parent(left_rightmost, left_index).await?;
                for (child, _) in &right_entries {
                    self.set_parent(*child, right_index).await?;
                }
                self.set_parent(right_rightmost, right_index).await?;

                let mut page = guard.write();
                slotted::initialize(&mut page, PageType::Internal);
                page.set_rightmost_child_index(right_index);
                let entry = encode_entry(left_index, &promoted);
                assert!(slotted::try_add_record(&mut page, &entry, 0));
                return Ok(());
            }

            let right_guard = self.pool.new_page(self.table_id).await?;
            let right_index = right_guard.page_id().page_index;

            {
                let mut page = guard.write();
                fill_internal(&mut page, &left_entries, left_rightmost);
                page.set_parent_page_index(parent_index);
            }
            {
                let mut page = right_guard.write();
                fill_internal(&mut page, &right_entries, right_rightmost);
                page.set_parent_page_index(parent_index);
            }
            drop(right_guard);
            drop(guard);

            for (child, _) in &right_entries {
                self.set_parent(*child, right_index).await?;
            }
            self.set_parent(right_rightmost, right_index).await?;

            pending = PendingSplit {
                separator: promoted,
                left_child: node_index,
                right_child: right_index,
            };
        }
    }

    async fn set_parent(&self, child_index: i32, parent_index: i32) -> Result<()> {
        let guard = self.pool.fetch_page(self.pid(child_index)).await?;
        guard.write().set_parent_page_index(parent_index);
        Ok(())
    }
}

/// Rebuild a page as a leaf holding `rows` in slot order
fn fill_leaf(page: &mut Page, rows: &[Vec<u8>]) {
    slotted::initialize(page, PageType::Leaf);
    for (slot, row) in rows.iter().enumerate() {
        assert!(
            slotted::try_add_record(page, row, slot),
            "split half exceeds page capacity"
        );
    }
}

/// Rebuild a page as an internal node holding `entries` and `rightmost`
fn fill_internal(page: &mut Page, entries: &[(i32, Vec<u8>)], rightmost: i32) {
    slotted::initialize(page, PageType::Internal);
    page.set_rightmost_child_index(rightmost);
    for (slot, (child, separator)) in entries.iter().enumerate() {
        let entry = encode_entry(*child, separator);
        assert!(
            slotted::try_add_record(page, &entry, slot),
            "split half exceeds page capacity"
        );
    }
}

/// Pick the cut index for a leaf split: the most byte-balanced cut where
/// both halves fit a page.
fn choose_split(rows: &[Vec<u8>]) -> Result<usize> {
    let capacity = PAGE_SIZE - HEADER_SIZE;
    let total: usize = rows.iter().map(|r| r.len() + SLOT_SIZE).sum();

    let mut best: Option<(usize, usize)> = None;
    let mut left = 0usize;
    for cut in 1..rows.len() {
        left += rows[cut - 1].len() + SLOT_SIZE;
        let right = total - left;
        if left <= capacity && right <= capacity {
            let imbalance = left.abs_diff(right);
            if best.map_or(true, |(b, _)| imbalance < b) {
                best = Some((imbalance, cut));
            }
        }
    }
    best.map(|(_, cut)| cut)
        .ok_or_else(|| StorageError::malformed("rows cannot be split across two pages"))
}
