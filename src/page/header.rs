//! Page header layout and typed accessors.
//!
//! The header occupies the first [`HEADER_SIZE`] bytes of every page:
//!
//! ```text
//! Offset  Size  Field
//! 0       8     PageLsn (reserved for write-ahead logging)
//! 8       4     ItemCount (live slots)
//! 12      4     DataStartOffset (lowest byte used by the record heap)
//! 16      4     ParentPageIndex (-1 for the root)
//! 20      1     PageType (0 invalid, 1 leaf, 2 internal)
//! 21      4     TypeSpecific1 (leaf: prev sibling; internal: rightmost child)
//! 25      4     TypeSpecific2 (leaf: next sibling; internal: unused)
//! 29      3     reserved, zero
//! ```
//!
//! Type-specific accessors assert the stored page type; calling a leaf
//! accessor on an internal page is a programmer error, not an I/O error.

use crate::page::Page;
use crate::types::{PageType, NO_PAGE};

/// Total header size; slots start right after
pub const HEADER_SIZE: usize = 32;

const LSN_OFFSET: usize = 0;
const ITEM_COUNT_OFFSET: usize = 8;
const DATA_START_OFFSET: usize = 12;
const PARENT_OFFSET: usize = 16;
const PAGE_TYPE_OFFSET: usize = 20;
const TYPE_SPECIFIC_1_OFFSET: usize = 21;
const TYPE_SPECIFIC_2_OFFSET: usize = 25;

impl Page {
    /// Reserved log sequence number; not interpreted by the engine
    pub fn lsn(&self) -> u64 {
        self.read_u64(LSN_OFFSET)
    }

    /// Set the reserved log sequence number
    pub fn set_lsn(&mut self, lsn: u64) {
        self.write_u64(LSN_OFFSET, lsn);
    }

    /// Number of live slots
    pub fn item_count(&self) -> usize {
        self.read_u32(ITEM_COUNT_OFFSET) as usize
    }

    pub(crate) fn set_item_count(&mut self, count: usize) {
        self.write_u32(ITEM_COUNT_OFFSET, count as u32);
    }

    /// Byte offset of the start of the record heap
    pub fn data_start_offset(&self) -> usize {
        self.read_u32(DATA_START_OFFSET) as usize
    }

    pub(crate) fn set_data_start_offset(&mut self, offset: usize) {
        self.write_u32(DATA_START_OFFSET, offset as u32);
    }

    /// Parent page index within the same table, `NO_PAGE` for the root
    pub fn parent_page_index(&self) -> i32 {
        self.read_i32(PARENT_OFFSET)
    }

    /// Set the parent page index
    pub fn set_parent_page_index(&mut self, index: i32) {
        self.write_i32(PARENT_OFFSET, index);
    }

    /// Decode the stored page type; `None` for a byte that is not a valid
    /// page type (corrupt page).
    pub fn page_type(&self) -> Option<PageType> {
        PageType::from_byte(self.read_u8(PAGE_TYPE_OFFSET))
    }

    pub(crate) fn set_page_type(&mut self, page_type: PageType) {
        self.write_u8(PAGE_TYPE_OFFSET, page_type as u8);
    }

    fn assert_type(&self, expected: PageType) {
        assert_eq!(
            self.page_type(),
            Some(expected),
            "page {} accessed as {:?}",
            self.id(),
            expected
        );
    }

    /// Previous sibling of a leaf, `NO_PAGE` if none
    pub fn prev_leaf_index(&self) -> i32 {
        self.assert_type(PageType::Leaf);
        self.read_i32(TYPE_SPECIFIC_1_OFFSET)
    }

    /// Set a leaf's previous sibling
    pub fn set_prev_leaf_index(&mut self, index: i32) {
        self.assert_type(PageType::Leaf);
        self.write_i32(TYPE_SPECIFIC_1_OFFSET, index);
    }

    /// Next sibling of a leaf, `NO_PAGE` if none
    pub fn next_leaf_index(&self) -> i32 {
        self.assert_type(PageType::Leaf);
        self.read_i32(TYPE_SPECIFIC_2_OFFSET)
    }

    /// Set a leaf's next sibling
    pub fn set_next_leaf_index(&mut self, index: i32) {
        self.assert_type(PageType::Leaf);
        self.write_i32(TYPE_SPECIFIC_2_OFFSET, index);
    }

    /// Rightmost child of an internal node (keys at or above the last
    /// separator)
    pub fn rightmost_child_index(&self) -> i32 {
        self.assert_type(PageType::Internal);
        self.read_i32(TYPE_SPECIFIC_1_OFFSET)
    }

    /// Set an internal node's rightmost child
    pub fn set_rightmost_child_index(&mut self, index: i32) {
        self.assert_type(PageType::Internal);
        self.write_i32(TYPE_SPECIFIC_1_OFFSET, index);
    }

    /// True when the header says this page is the root
    pub fn is_root(&self) -> bool {
        self.parent_page_index() == NO_PAGE
    }
}
