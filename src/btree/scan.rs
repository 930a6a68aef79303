//! Lazy forward range scans.
//!
//! A scan descends once to the leaf containing the lower bound (or the
//! leftmost leaf), then follows the sibling chain, pinning exactly one leaf
//! at a time. The sequence is finite, forward-only, and not restartable;
//! dropping the scan releases its pin and its share of the table latch.

use std::cmp::Ordering;
use std::sync::Arc;

use tokio::sync::{OwnedRwLockReadGuard, RwLock};

use crate::btree::node::{InternalNode, LeafNode};
use crate::buffer::{BufferPoolManager, PageGuard};
use crate::error::{Result, StorageError};
use crate::record;
use crate::types::{compare_keys, Key, PageId, PageType, Record, TableDefinition, NO_PAGE};

/// Key-range bounds for a scan; either side may be open
#[derive(Debug, Clone, Default)]
pub struct ScanBounds {
    pub lower: Option<Key>,
    pub lower_inclusive: bool,
    pub upper: Option<Key>,
    pub upper_inclusive: bool,
}

impl ScanBounds {
    /// Scan everything
    pub fn all() -> Self {
        Self::default()
    }

    /// Scan between two optional bounds
    pub fn range(
        lower: Option<Key>,
        lower_inclusive: bool,
        upper: Option<Key>,
        upper_inclusive: bool,
    ) -> Self {
        Self {
            lower,
            lower_inclusive,
            upper,
            upper_inclusive,
        }
    }
}

enum Advance {
    Emit(Record),
    NextLeaf(i32),
    Finished,
}

/// A lazy cursor over one table's rows in key order
pub struct TableScan<'a> {
    pool: &'a BufferPoolManager,
    table_id: i32,
    table: Arc<TableDefinition>,
    _latch: OwnedRwLockReadGuard<()>,
    /// current pinned leaf and the next slot to read
    position: Option<(PageGuard<'a>, usize)>,
    upper: Option<Key>,
    upper_inclusive: bool,
}

impl<'a> TableScan<'a> {
    /// Descend to the starting leaf and position on the first candidate slot
    pub(crate) async fn open(
        pool: &'a BufferPoolManager,
        table_id: i32,
        table: Arc<TableDefinition>,
        latch: Arc<RwLock<()>>,
        bounds: ScanBounds,
    ) -> Result<Self> {
        let latch = latch.read_owned().await;
        let mut scan = Self {
            pool,
            table_id,
            table,
            _latch: latch,
            position: None,
            upper: bounds.upper,
            upper_inclusive: bounds.upper_inclusive,
        };

        if pool.disk().table_page_count(table_id).await? == 0 {
            return Ok(scan);
        }

        let mut current = 0i32;
        let (guard, start_slot) = loop {
            let guard = pool.fetch_page(PageId::new(table_id, current)).await?;
            let step = {
                let page = guard.read();
                match page.page_type() {
                    Some(PageType::Leaf) => {
                        let leaf = LeafNode::attach(&page, &scan.table)?;
                        let slot = match &bounds.lower {
                            None => 0,
                            Some(key) => {
                                let found = leaf.binary_search(key)?;
                                if found >= 0 {
                                    if bounds.lower_inclusive {
                                        found as usize
                                    } else {
                                        found as usize + 1
                                    }
                                } else {
                                    (!found) as usize
                                }
                            }
                        };
                        Some(slot)
                    }
                    Some(PageType::Internal) => {
                        let node = InternalNode::attach(&page, &scan.table)?;
                        current = match &bounds.lower {
                            Some(key) => node.find_child(key)?,
                            None => node.child_at(0),
                        };
                        None
                    }
                    _ => {
                        return Err(StorageError::corruption(
                            page.id(),
                            "page is neither leaf nor internal",
                        ))
                    }
                }
            };
            if let Some(slot) = step {
                break (guard, slot);
            }
        };

        scan.position = Some((guard, start_slot));
        Ok(scan)
    }

    /// The next row in key order, or `None` when the scan is exhausted
    pub async fn next(&mut self) -> Result<Option<Record>> {
        loop {
            let Some((guard, slot)) = self.position.as_ref() else {
                return Ok(None);
            };

            let advance = {
                let page = guard.read();
                let leaf = LeafNode::attach(&page, &self.table)?;
                if *slot < leaf.record_count() {
                    let bytes = leaf.record(*slot);
                    let beyond_upper = match &self.upper {
                        None => false,
                        Some(upper) => {
                            let key = record::deserialize_primary_key(&self.table, bytes)?;
                            match compare_keys(&key, upper)? {
                                Ordering::Greater => true,
                                Ordering::Equal => !self.upper_inclusive,
                                Ordering::Less => false,
                            }
                        }
                    };
                    if beyond_upper {
                        Advance::Finished
                    } else {
                        Advance::Emit(record::deserialize(self.table.columns(), bytes)?)
                    }
                } else {
                    Advance::NextLeaf(page.next_leaf_index())
                }
            };

            match advance {
                Advance::Emit(row) => {
                    if let Some((_, slot)) = self.position.as_mut() {
                        *slot += 1;
                    }
                    return Ok(Some(row));
                }
                Advance::NextLeaf(NO_PAGE) => {
                    self.position = None;
                    return Ok(None);
                }
                Advance::NextLeaf(next) => {
                    // release the current pin before fetching the sibling
                    self.position = None;
                    let guard = self.pool.fetch_page(PageId::new(self.table_id, next)).await?;
                    self.position = Some((guard, 0));
                }
                Advance::Finished => {
                    self.position = None;
                    return Ok(None);
                }
            }
        }
    }

    /// Drain the scan into a vector
    pub async fn collect_rows(mut self) -> Result<Vec<Record>> {
        let mut rows = Vec::new();
        while let Some(row) = self.next().await? {
            rows.push(row);
        }
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btree::BPlusTree;
    use crate::fs::MemoryFileSystem;
    use crate::storage::DiskManager;
    use crate::types::{
        ColumnDefinition, Constraint, DataTypeInfo, DataValue, PrimaryKeyConstraint,
    };

    async fn seeded_tree() -> (Arc<BufferPoolManager>, Arc<TableDefinition>, Arc<RwLock<()>>) {
        let fs = Arc::new(MemoryFileSystem::new());
        let disk = Arc::new(DiskManager::open(fs, "/data").await.unwrap());
        let pool = Arc::new(BufferPoolManager::new(disk, 32));
        let table = Arc::new(
            TableDefinition::new(
                "t",
                vec![
                    ColumnDefinition::new("id", DataTypeInfo::int(), false),
                    ColumnDefinition::new("data", DataTypeInfo::varchar(64), true),
                ],
                vec![Constraint::PrimaryKey(PrimaryKeyConstraint {
                    name: None,
                    column_names: vec!["id".into()],
                })],
            )
            .unwrap(),
        );
        let latch = Arc::new(RwLock::new(()));
        {
            let tree = BPlusTree::new(&pool, 1, Arc::clone(&table), Arc::clone(&latch));
            for id in [5, 1, 9, 3, 7] {
                tree.insert(&Record::new(vec![
                    DataValue::Int(id),
                    DataValue::Varchar(format!("v{id}")),
                ]))
                .await
                .unwrap();
            }
        }
        (pool, table, latch)
    }

    fn ids(rows: &[Record]) -> Vec<i32> {
        rows.iter()
            .map(|r| match r.value(0) {
                DataValue::Int(id) => *id,
                other => panic!("unexpected {other:?}"),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_unbounded_scan_is_sorted() {
        let (pool, table, latch) = seeded_tree().await;
        let tree = BPlusTree::new(&pool, 1, table, latch);
        let rows = tree
            .scan(ScanBounds::all())
            .await
            .unwrap()
            .collect_rows()
            .await
            .unwrap();
        assert_eq!(ids(&rows), vec![1, 3, 5, 7, 9]);
    }

    #[tokio::test]
    async fn test_bound_inclusivity() {
        let (pool, table, latch) = seeded_tree().await;
        let tree = BPlusTree::new(&pool, 1, table, latch);

        let key = |id| Key::single(DataValue::Int(id));

        let rows = tree
            .scan(ScanBounds::range(Some(key(3)), true, Some(key(7)), true))
            .await
            .unwrap()
            .collect_rows()
            .await
            .unwrap();
        assert_eq!(ids(&rows), vec![3, 5, 7]);

        let rows = tree
            .scan(ScanBounds::range(Some(key(3)), false, Some(key(7)), false))
            .await
            .unwrap()
            .collect_rows()
            .await
            .unwrap();
        assert_eq!(ids(&rows), vec![5]);

        // bounds that are not stored keys
        let rows = tree
            .scan(ScanBounds::range(Some(key(2)), true, Some(key(8)), true))
            .await
            .unwrap()
            .collect_rows()
            .await
            .unwrap();
        assert_eq!(ids(&rows), vec![3, 5, 7]);
    }

    #[tokio::test]
    async fn test_scan_on_empty_table() {
        let fs = Arc::new(MemoryFileSystem::new());
        let disk = Arc::new(DiskManager::open(fs, "/data").await.unwrap());
        let pool = Arc::new(BufferPoolManager::new(disk, 8));
        let table = Arc::new(
            TableDefinition::new(
                "t",
                vec![ColumnDefinition::new("id", DataTypeInfo::int(), false)],
                vec![Constraint::PrimaryKey(PrimaryKeyConstraint {
                    name: None,
                    column_names: vec!["id".into()],
                })],
            )
            .unwrap(),
        );
        let latch = Arc::new(RwLock::new(()));
        let tree = BPlusTree::new(&pool, 1, table, latch);
        let rows = tree
            .scan(ScanBounds::all())
            .await
            .unwrap()
            .collect_rows()
            .await
            .unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_dropping_scan_releases_pin() {
        let (pool, table, latch) = seeded_tree().await;
        let tree = BPlusTree::new(&pool, 1, Arc::clone(&table), Arc::clone(&latch));
        let mut scan = tree.scan(ScanBounds::all()).await.unwrap();
        let _ = scan.next().await.unwrap();
        drop(scan);

        // with the pin released, a writer can take the latch immediately
        assert!(latch.try_write().is_ok());
    }
}
