//! Leaf and internal node views over pinned pages.
//!
//! A view borrows a page (plus the owning table's definition, for key
//! decoding) and layers B+Tree semantics over the slotted layout:
//!
//! - **Leaf**: each slot holds one serialized row, slots in ascending key
//!   order.
//! - **Internal**: each slot holds a separator entry, `i32` child page index
//!   followed by the serialized separator key. The entry's child covers keys
//!   below its separator; keys at or above the last separator go to the
//!   rightmost child stored in the page header. `n` separators always have
//!   `n + 1` children.
//!
//! Binary searches return the slot on a hit and the bitwise complement of
//! the insertion index on a miss.

use std::cmp::Ordering;

use crate::error::{Result, StorageError};
use crate::page::{slotted, Page};
use crate::record;
use crate::types::{compare_keys, Key, PageType, TableDefinition};

/// Byte width of the child index prefix in an internal entry
const CHILD_INDEX_SIZE: usize = 4;

fn check_type(page: &Page, expected: PageType) -> Result<()> {
    if page.page_type() != Some(expected) {
        return Err(StorageError::corruption(
            page.id(),
            format!(
                "expected {:?} page, header says {:?}",
                expected,
                page.page_type()
            ),
        ));
    }
    Ok(())
}

/// Read-only view of a leaf page
pub struct LeafNode<'a> {
    page: &'a Page,
    table: &'a TableDefinition,
}

impl std::fmt::Debug for LeafNode<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeafNode").finish_non_exhaustive()
    }
}

impl<'a> LeafNode<'a> {
    /// Attach to a pinned page, verifying the stored page type
    pub fn attach(page: &'a Page, table: &'a TableDefinition) -> Result<Self> {
        check_type(page, PageType::Leaf)?;
        Ok(Self { page, table })
    }

    /// Number of rows in this leaf
    pub fn record_count(&self) -> usize {
        self.page.item_count()
    }

    /// Raw bytes of the row at `slot`
    pub fn record(&self, slot: usize) -> &'a [u8] {
        slotted::get_raw_record(self.page, slot)
    }

    /// Primary key of the row at `slot`
    pub fn key_at(&self, slot: usize) -> Result<Key> {
        record::deserialize_primary_key(self.table, self.record(slot))
    }

    /// Binary search by key: slot on a hit, `!insertion_index` on a miss
    pub fn binary_search(&self, key: &Key) -> Result<i32> {
        let mut low = 0i32;
        let mut high = self.record_count() as i32 - 1;
        while low <= high {
            let mid = low + (high - low) / 2;
            let mid_key = self.key_at(mid as usize)?;
            match compare_keys(key, &mid_key)? {
                Ordering::Less => high = mid - 1,
                Ordering::Greater => low = mid + 1,
                Ordering::Equal => return Ok(mid),
            }
        }
        Ok(!low)
    }
}

/// Mutable view of a leaf page
pub struct LeafNodeMut<'a> {
    page: &'a mut Page,
    table: &'a TableDefinition,
}

impl<'a> LeafNodeMut<'a> {
    /// Attach to a pinned page, verifying the stored page type
    pub fn attach(page: &'a mut Page, table: &'a TableDefinition) -> Result<Self> {
        check_type(page, PageType::Leaf)?;
        Ok(Self { page, table })
    }

    /// Read-only view of the same page
    pub fn as_ref(&self) -> LeafNode<'_> {
        LeafNode {
            page: self.page,
            table: self.table,
        }
    }

    /// Try to place a row at `slot`; `false` when the page is full
    pub fn try_insert(&mut self, slot: usize, row: &[u8]) -> bool {
        slotted::try_add_record(self.page, row, slot)
    }

    /// Remove the row at `slot`
    pub fn remove(&mut self, slot: usize) {
        slotted::delete_record(self.page, slot);
    }
}

/// Read-only view of an internal page
pub struct InternalNode<'a> {
    page: &'a Page,
    table: &'a TableDefinition,
}

impl<'a> InternalNode<'a> {
    /// Attach to a pinned page, verifying the stored page type
    pub fn attach(page: &'a Page, table: &'a TableDefinition) -> Result<Self> {
        check_type(page, PageType::Internal)?;
        Ok(Self { page, table })
    }

    /// Number of separator keys (children are one more)
    pub fn separator_count(&self) -> usize {
        self.page.item_count()
    }

    /// Child page index at `position`; `position == separator_count()` is
    /// the rightmost child.
    pub fn child_at(&self, position: usize) -> i32 {
        if position == self.separator_count() {
            self.page.rightmost_child_index()
        } else {
            let entry = slotted::get_raw_record(self.page, position);
            i32::from_le_bytes(entry[..CHILD_INDEX_SIZE].try_into().unwrap())
        }
    }

    /// Serialized separator key bytes at `position`
    pub fn separator_bytes(&self, position: usize) -> &'a [u8] {
        &slotted::get_raw_record(self.page, position)[CHILD_INDEX_SIZE..]
    }

    /// Decoded separator key at `position`
    pub fn separator_key(&self, position: usize) -> Result<Key> {
        record::deserialize_key(self.table, self.separator_bytes(position))
    }

    /// Binary search among separators: position on a hit, `!insertion_index`
    /// on a miss
    pub fn binary_search(&self, key: &Key) -> Result<i32> {
        let mut low = 0i32;
        let mut high = self.separator_count() as i32 - 1;
        while low <= high {
            let mid = low + (high - low) / 2;
            let mid_key = self.separator_key(mid as usize)?;
            match compare_keys(key, &mid_key)? {
                Ordering::Less => high = mid - 1,
                Ordering::Greater => low = mid + 1,
                Ordering::Equal => return Ok(mid),
            }
        }
        Ok(!low)
    }

    /// Page index of the child whose subtree covers `key`.
    ///
    /// Keys below the first separator go to child 0; keys at or above the
    /// last separator go to the rightmost child; a key equal to a separator
    /// belongs to the child on the separator's right.
    pub fn find_child(&self, key: &Key) -> Result<i32> {
        let slot = self.binary_search(key)?;
        let position = if slot >= 0 {
            slot as usize + 1
        } else {
            (!slot) as usize
        };
        Ok(self.child_at(position))
    }

    /// All `(child, separator bytes)` entries, slot order
    pub fn entries(&self) -> Vec<(i32, Vec<u8>)> {
        (0..self.separator_count())
            .map(|i| (self.child_at(i), self.separator_bytes(i).to_vec()))
            .collect()
    }
}

/// Mutable view of an internal page
pub struct InternalNodeMut<'a> {
    page: &'a mut Page,
    table: &'a TableDefinition,
}

impl<'a> InternalNodeMut<'a> {
    /// Attach to a pinned page, verifying the stored page type
    pub fn attach(page: &'a mut Page, table: &'a TableDefinition) -> Result<Self> {
        check_type(page, PageType::Internal)?;
        Ok(Self { page, table })
    }

    /// Read-only view of the same page
    pub fn as_ref(&self) -> InternalNode<'_> {
        InternalNode {
            page: self.page,
            table: self.table,
        }
    }

    /// Try to place a `(separator, left child)` entry at `position`; `false`
    /// when the page is full
    pub fn try_insert_entry(&mut self, position: usize, separator: &[u8], left_child: i32) -> bool {
        let entry = encode_entry(left_child, separator);
        slotted::try_add_record(self.page, &entry, position)
    }

    /// Repoint the child at `position`; `position == separator_count()` sets
    /// the rightmost child.
    pub fn set_child_at(&mut self, position: usize, child: i32) {
        if position == self.page.item_count() {
            self.page.set_rightmost_child_index(child);
        } else {
            let entry = slotted::get_raw_record_mut(self.page, position);
            entry[..CHILD_INDEX_SIZE].copy_from_slice(&child.to_le_bytes());
        }
    }
}

/// Encode an internal entry: child index then separator key bytes
pub fn encode_entry(child: i32, separator: &[u8]) -> Vec<u8> {
    let mut entry = Vec::with_capacity(CHILD_INDEX_SIZE + separator.len());
    entry.extend_from_slice(&child.to_le_bytes());
    entry.extend_from_slice(separator);
    entry
}
