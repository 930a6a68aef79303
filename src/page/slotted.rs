//! Slotted-page record layout.
//!
//! Slots are `(offset: u16, length: u16)` pairs pointing into the record
//! heap. The slot array grows forward from the header; the heap grows
//! backward from the end of the page. Record bytes are opaque here; callers
//! decide slot positions (the B+Tree keeps them in key order).
//!
//! Deleting a record removes its slot and compacts the slot array, but the
//! heap bytes stay behind as garbage; pages are rewritten wholesale on
//! split, which reclaims the space.

use crate::page::{Page, HEADER_SIZE};
use crate::types::{PageType, NO_PAGE, PAGE_SIZE};

/// Size of one slot: u16 offset + u16 length
pub const SLOT_SIZE: usize = 4;

/// Largest record an empty page can hold
pub const MAX_RECORD_SIZE: usize = PAGE_SIZE - HEADER_SIZE - SLOT_SIZE;

const TYPE_SPECIFIC_1_OFFSET: usize = 21;
const TYPE_SPECIFIC_2_OFFSET: usize = 25;

/// Reset a page to an empty slotted page of the given type.
///
/// Clears the buffer, then writes the header: no items, heap starting at the
/// page end, no parent, both type-specific pointers `NO_PAGE`.
pub fn initialize(page: &mut Page, page_type: PageType) {
    page.clear();
    page.set_item_count(0);
    page.set_data_start_offset(PAGE_SIZE);
    page.set_parent_page_index(NO_PAGE);
    page.set_page_type(page_type);
    page.write_i32(TYPE_SPECIFIC_1_OFFSET, NO_PAGE);
    page.write_i32(TYPE_SPECIFIC_2_OFFSET, NO_PAGE);
}

/// Bytes available between the end of the slot array and the heap
pub fn free_space(page: &Page) -> usize {
    page.data_start_offset() - (HEADER_SIZE + page.item_count() * SLOT_SIZE)
}

/// Try to add a record at `slot_index`, shifting later slots forward.
///
/// Returns `false` without touching the page when free space cannot hold
/// the record bytes plus one slot. `slot_index` past the current item count
/// is a programmer error.
pub fn try_add_record(page: &mut Page, record: &[u8], slot_index: usize) -> bool {
    let count = page.item_count();
    assert!(
        slot_index <= count,
        "slot index {slot_index} out of range (count {count})"
    );

    if free_space(page) < record.len() + SLOT_SIZE {
        return false;
    }

    // Reserve heap space at the top and copy the record in.
    let record_offset = page.data_start_offset() - record.len();
    page.data_mut()[record_offset..record_offset + record.len()].copy_from_slice(record);

    // Shift the slot array right of the insertion point forward by one.
    for i in (slot_index..count).rev() {
        let (offset, length) = read_slot(page, i);
        write_slot(page, i + 1, offset, length);
    }
    write_slot(page, slot_index, record_offset as u16, record.len() as u16);

    page.set_item_count(count + 1);
    page.set_data_start_offset(record_offset);
    true
}

/// Remove the slot at `slot_index`, compacting the slot array left.
///
/// The record's heap bytes are left in place; `DataStartOffset` does not
/// move.
pub fn delete_record(page: &mut Page, slot_index: usize) {
    let count = page.item_count();
    assert!(
        slot_index < count,
        "slot index {slot_index} out of range (count {count})"
    );

    for i in slot_index..count - 1 {
        let (offset, length) = read_slot(page, i + 1);
        write_slot(page, i, offset, length);
    }
    page.set_item_count(count - 1);
}

/// Read-only view of the record bytes at `slot_index`
pub fn get_raw_record(page: &Page, slot_index: usize) -> &[u8] {
    let count = page.item_count();
    assert!(
        slot_index < count,
        "slot index {slot_index} out of range (count {count})"
    );
    let (offset, length) = read_slot(page, slot_index);
    &page.data()[offset as usize..offset as usize + length as usize]
}

/// Mutable view of the record bytes at `slot_index`.
///
/// In-place patches must keep the record's length; internal B+Tree nodes use
/// this to repoint a child without rewriting the entry.
pub fn get_raw_record_mut(page: &mut Page, slot_index: usize) -> &mut [u8] {
    let count = page.item_count();
    assert!(
        slot_index < count,
        "slot index {slot_index} out of range (count {count})"
    );
    let (offset, length) = read_slot(page, slot_index);
    &mut page.data_mut()[offset as usize..offset as usize + length as usize]
}

fn slot_offset(slot_index: usize) -> usize {
    HEADER_SIZE + slot_index * SLOT_SIZE
}

fn read_slot(page: &Page, slot_index: usize) -> (u16, u16) {
    let base = slot_offset(slot_index);
    (page.read_u16(base), page.read_u16(base + 2))
}

fn write_slot(page: &mut Page, slot_index: usize, offset: u16, length: u16) {
    let base = slot_offset(slot_index);
    page.write_u16(base, offset);
    page.write_u16(base + 2, length);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PageId;

    fn leaf() -> Page {
        let mut page = Page::new(PageId::new(1, 0));
        initialize(&mut page, PageType::Leaf);
        page
    }

    #[test]
    fn test_initialize_empty_page() {
        let page = leaf();
        assert_eq!(page.item_count(), 0);
        assert_eq!(free_space(&page), PAGE_SIZE - HEADER_SIZE);
    }

    #[test]
    fn test_add_and_get_records() {
        let mut page = leaf();
        assert!(try_add_record(&mut page, b"banana", 0));
        assert!(try_add_record(&mut page, b"apple", 0));
        assert!(try_add_record(&mut page, b"cherry", 2));

        assert_eq!(page.item_count(), 3);
        assert_eq!(get_raw_record(&page, 0), b"apple");
        assert_eq!(get_raw_record(&page, 1), b"banana");
        assert_eq!(get_raw_record(&page, 2), b"cherry");
    }

    #[test]
    fn test_free_space_accounting() {
        let mut page = leaf();
        let before = free_space(&page);
        assert!(try_add_record(&mut page, &[7u8; 100], 0));
        assert_eq!(free_space(&page), before - 100 - SLOT_SIZE);
    }

    #[test]
    fn test_delete_compacts_slots_but_not_heap() {
        let mut page = leaf();
        assert!(try_add_record(&mut page, b"aa", 0));
        assert!(try_add_record(&mut page, b"bb", 1));
        assert!(try_add_record(&mut page, b"cc", 2));

        let heap_start = page.data_start_offset();
        delete_record(&mut page, 1);

        assert_eq!(page.item_count(), 2);
        assert_eq!(get_raw_record(&page, 0), b"aa");
        assert_eq!(get_raw_record(&page, 1), b"cc");
        // heap bytes are garbage, not reclaimed
        assert_eq!(page.data_start_offset(), heap_start);
    }

    #[test]
    fn test_full_page_rejected_without_mutation() {
        let mut page = leaf();
        // 41 records of 195 bytes each consume 41 * (195 + 4) = 8159 of the
        // 8160 free bytes, leaving exactly one.
        let record = [0xABu8; 195];
        for i in 0..41 {
            assert!(try_add_record(&mut page, &record, i));
        }
        assert_eq!(free_space(&page), 1);

        let snapshot = page.data().to_vec();
        let too_big = [0xCDu8; 2];
        assert!(!try_add_record(&mut page, &too_big, 0));
        assert_eq!(page.data(), snapshot.as_slice());

        // even a zero-length record needs a slot
        assert!(!try_add_record(&mut page, &[], 0));
        assert_eq!(page.data(), snapshot.as_slice());
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_out_of_range_slot_panics() {
        let page = leaf();
        let _ = get_raw_record(&page, 0);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_add_past_count_panics() {
        let mut page = leaf();
        try_add_record(&mut page, b"x", 1);
    }
}
