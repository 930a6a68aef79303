//! Storage layer: per-table files and page-granular disk I/O.
//!
//! Each table lives in its own `<table_id>.tbl` file, a flat concatenation
//! of fixed-size pages. The disk manager maps `(table_id, page_index)` to
//! byte offsets and allocates pages by extending the file; a striped lock
//! map serialises allocation per table.

mod disk_manager;
mod stripe;

pub use disk_manager::DiskManager;
pub use stripe::{StripedMutexMap, DEFAULT_STRIPE_COUNT};
