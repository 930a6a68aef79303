//! # ArmDb Storage Engine
//!
//! The on-disk storage engine of the ArmDb educational relational database:
//! a page-oriented, file-per-table store in which every table is a B+Tree
//! clustered on its primary key.
//!
//! ## Architecture
//!
//! The engine is composed of modular layers, leaves first:
//!
//! - **File System** (`fs`): async byte-addressable file I/O behind a trait
//! - **Page Layer** (`page`): fixed-size pages with a slotted record layout
//! - **Record Layer** (`record`): binary row format and key projection
//! - **Storage Layer** (`storage`): per-table files and page allocation
//! - **Buffer Pool** (`buffer`): page cache with pin/unpin and LRU eviction
//! - **B+Tree Layer** (`btree`): search, insert with splits, delete, scans
//! - **Engine Façade** (`engine`): tables, catalog bootstrap, row operations
//!
//! ## Usage
//!
//! ```rust,ignore
//! use armdb_storage::{Config, LocalFileSystem, StorageEngine};
//!
//! let config = Config::new("/var/lib/armdb");
//! let engine = StorageEngine::open(config, Arc::new(LocalFileSystem::new())).await?;
//!
//! engine.create_table(db_id, table_definition).await?;
//! engine.insert_row("users", &row).await?;
//! let found = engine.find_row("users", &key).await?;
//!
//! let mut scan = engine.scan("users", ScanBounds::all()).await?;
//! while let Some(row) = scan.next().await? {
//!     println!("{row:?}");
//! }
//! ```

pub mod btree;
pub mod buffer;
pub mod engine;
pub mod error;
pub mod fs;
pub mod page;
pub mod record;
pub mod storage;
pub mod types;

pub use error::{Result, StorageError};
pub use types::{DataValue, Key, PageId, Record, TableDefinition, PAGE_SIZE};

// Re-export the main public API
pub use btree::{BPlusTree, ScanBounds, TableScan};
pub use buffer::BufferPoolManager;
pub use engine::StorageEngine;
pub use fs::{FileSystem, LocalFileSystem, MemoryFileSystem};
pub use storage::DiskManager;

use std::path::PathBuf;

/// Storage engine configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding the `<table_id>.tbl` files
    pub data_dir: PathBuf,
    /// Directory searched for catalog bootstrap JSON on first boot
    pub catalog_dir: PathBuf,
    /// Buffer pool capacity in pages (default: 1024)
    pub pool_size_in_pages: usize,
}

impl Config {
    /// Create a configuration with default settings rooted at `data_dir`
    pub fn new<P: Into<PathBuf>>(data_dir: P) -> Self {
        let data_dir = data_dir.into();
        Self {
            catalog_dir: data_dir.join("catalog"),
            data_dir,
            pool_size_in_pages: 1024,
        }
    }

    /// Set the catalog bootstrap directory
    pub fn catalog_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.catalog_dir = dir.into();
        self
    }

    /// Set the buffer pool capacity in pages
    pub fn pool_size_in_pages(mut self, pages: usize) -> Self {
        self.pool_size_in_pages = pages;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::catalog::MASTER_DATABASE_ID;
    use crate::types::{
        ColumnDefinition, Constraint, DataTypeInfo, PrimaryKeyConstraint,
    };
    use std::sync::Arc;

    #[test]
    fn test_config_defaults() {
        let config = Config::new("/tmp/armdb");
        assert_eq!(config.data_dir, PathBuf::from("/tmp/armdb"));
        assert_eq!(config.catalog_dir, PathBuf::from("/tmp/armdb/catalog"));
        assert_eq!(config.pool_size_in_pages, 1024);

        let config = Config::new("/tmp/armdb")
            .catalog_dir("/etc/armdb")
            .pool_size_in_pages(64);
        assert_eq!(config.catalog_dir, PathBuf::from("/etc/armdb"));
        assert_eq!(config.pool_size_in_pages, 64);
    }

    #[tokio::test]
    async fn test_engine_on_local_file_system() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::new(dir.path()).pool_size_in_pages(64);
        let engine = StorageEngine::open(config, Arc::new(LocalFileSystem::new()))
            .await
            .unwrap();

        let table = TableDefinition::new(
            "notes",
            vec![
                ColumnDefinition::new("id", DataTypeInfo::int(), false),
                ColumnDefinition::new("body", DataTypeInfo::varchar(200), true),
            ],
            vec![Constraint::PrimaryKey(PrimaryKeyConstraint {
                name: None,
                column_names: vec!["id".into()],
            })],
        )
        .unwrap();
        let table_id = engine
            .create_table(MASTER_DATABASE_ID, table)
            .await
            .unwrap();

        for id in 0..50 {
            engine
                .insert_row(
                    "notes",
                    &Record::new(vec![
                        DataValue::Int(id),
                        DataValue::Varchar(format!("note {id}")),
                    ]),
                )
                .await
                .unwrap();
        }
        engine.shutdown().await.unwrap();

        // the table file is page-aligned on disk
        let length = std::fs::metadata(dir.path().join(format!("{table_id}.tbl")))
            .unwrap()
            .len();
        assert!(length > 0);
        assert_eq!(length % PAGE_SIZE as u64, 0);

        // reopen and read back
        let engine = StorageEngine::open(
            Config::new(dir.path()).pool_size_in_pages(64),
            Arc::new(LocalFileSystem::new()),
        )
        .await
        .unwrap();
        let found = engine
            .find_row("notes", &Key::single(DataValue::Int(17)))
            .await
            .unwrap();
        assert_eq!(
            found,
            Some(Record::new(vec![
                DataValue::Int(17),
                DataValue::Varchar("note 17".into()),
            ]))
        );
    }
}
