//! Storage engine façade.
//!
//! Wires the file system, disk manager, buffer pool, and B+Tree together
//! behind table-name operations: create database, create table, insert,
//! point lookup, range scan. The system catalog lives in ordinary tables
//! managed by this same engine; on first boot it is bootstrapped from JSON
//! definitions (or compiled-in equivalents) and thereafter reconstructed
//! from the catalog tables themselves.

pub mod catalog;

use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use log::{debug, info};
use parking_lot::{Mutex, RwLock};
use tokio::sync::RwLock as AsyncRwLock;

use crate::btree::{BPlusTree, ScanBounds, TableScan};
use crate::buffer::BufferPoolManager;
use crate::engine::catalog::{
    MASTER_DATABASE_ID, MASTER_DATABASE_NAME, SYSTEM_TABLES, SYS_CONSTRAINTS_TABLE_ID,
};
use crate::error::{Result, StorageError};
use crate::fs::FileSystem;
use crate::page::slotted;
use crate::storage::DiskManager;
use crate::types::{Key, PageType, Record, TableDefinition};
use crate::Config;

/// A resolved table: its id and definition
#[derive(Clone)]
struct CatalogEntry {
    table_id: i32,
    definition: Arc<TableDefinition>,
}

/// The storage engine: every table a B+Tree clustered on its primary key
pub struct StorageEngine {
    fs: Arc<dyn FileSystem>,
    pool: Arc<BufferPoolManager>,
    config: Config,
    /// Resolved tables by lower-cased name
    tables: RwLock<HashMap<String, CatalogEntry>>,
    /// Per-table reader/writer latches for the B+Tree layer
    latches: Mutex<HashMap<i32, Arc<AsyncRwLock<()>>>>,
    next_database_id: AtomicI32,
    next_table_id: AtomicI32,
    next_column_id: AtomicI32,
    next_constraint_id: AtomicI32,
}

impl StorageEngine {
    /// Open the engine over a data directory, bootstrapping the catalog on
    /// the first boot.
    pub async fn open(config: Config, fs: Arc<dyn FileSystem>) -> Result<Self> {
        let disk = Arc::new(DiskManager::open(Arc::clone(&fs), config.data_dir.clone()).await?);
        let pool = Arc::new(BufferPoolManager::new(disk, config.pool_size_in_pages));

        let engine = Self {
            fs,
            pool,
            config,
            tables: RwLock::new(HashMap::new()),
            latches: Mutex::new(HashMap::new()),
            next_database_id: AtomicI32::new(MASTER_DATABASE_ID + 1),
            next_table_id: AtomicI32::new(SYS_CONSTRAINTS_TABLE_ID + 1),
            next_column_id: AtomicI32::new(1),
            next_constraint_id: AtomicI32::new(1),
        };

        let first_boot = !engine
            .pool
            .disk()
            .table_file_exists(catalog::SYS_TABLES_TABLE_ID)
            .await;
        if first_boot {
            engine.bootstrap_catalog().await?;
        } else {
            engine.load_catalog().await?;
        }
        Ok(engine)
    }

    /// Create a database; returns its id
    pub async fn create_database(&self, name: &str) -> Result<i32> {
        if name.trim().is_empty() {
            return Err(StorageError::invalid_definition("database name is empty"));
        }
        for row in self.scan_system(catalog::SYS_DATABASES_TABLE_ID).await? {
            let (_, existing) = catalog::database_from_row(&row)?;
            if existing.eq_ignore_ascii_case(name) {
                return Err(StorageError::invalid_definition(format!(
                    "database '{name}' already exists"
                )));
            }
        }

        let database_id = self.next_database_id.fetch_add(1, Ordering::SeqCst);
        let entry = self.system_entry(catalog::SYS_DATABASES_TABLE_ID);
        self.tree(&entry)
            .insert(&catalog::database_row(database_id, name))
            .await?;
        self.pool.flush_all().await?;
        info!("created database '{name}' with id {database_id}");
        Ok(database_id)
    }

    /// Create a table in a database: data file, empty root leaf, catalog rows
    pub async fn create_table(
        &self,
        database_id: i32,
        mut definition: TableDefinition,
    ) -> Result<i32> {
        definition.validate()?;
        if definition.primary_key().is_none() {
            return Err(StorageError::invalid_definition(format!(
                "table '{}' needs a primary key to be stored",
                definition.name()
            )));
        }

        let mut database_exists = false;
        for row in self.scan_system(catalog::SYS_DATABASES_TABLE_ID).await? {
            if catalog::database_from_row(&row)?.0 == database_id {
                database_exists = true;
                break;
            }
        }
        if !database_exists {
            return Err(StorageError::invalid_definition(format!(
                "unknown database id {database_id}"
            )));
        }

        match self.resolve(definition.name()).await {
            Ok(_) => {
                return Err(StorageError::invalid_definition(format!(
                    "table '{}' already exists",
                    definition.name()
                )))
            }
            Err(StorageError::UnknownTable(_)) => {}
            Err(e) => return Err(e),
        }

        let table_id = self.next_table_id.fetch_add(1, Ordering::SeqCst);
        self.pool.disk().create_table_file(table_id).await?;
        {
            let guard = self.pool.new_page(table_id).await?;
            assert_eq!(
                guard.page_id().page_index,
                0,
                "first allocation of a fresh table is its root"
            );
            slotted::initialize(&mut guard.write(), PageType::Leaf);
        }

        self.insert_catalog_rows(table_id, database_id, &definition)
            .await?;
        self.register(CatalogEntry {
            table_id,
            definition: Arc::new(definition),
        });
        self.pool.flush_all().await?;
        debug!("created table id {table_id}");
        Ok(table_id)
    }

    /// Look up a table definition by name, reading the catalog tables when
    /// it is not cached.
    pub async fn get_table_definition(&self, name: &str) -> Result<Arc<TableDefinition>> {
        Ok(self.resolve(name).await?.definition)
    }

    /// Insert one row into a named table
    pub async fn insert_row(&self, table: &str, row: &Record) -> Result<()> {
        let entry = self.resolve(table).await?;
        self.tree(&entry).insert(row).await
    }

    /// Point lookup by primary key
    pub async fn find_row(&self, table: &str, key: &Key) -> Result<Option<Record>> {
        let entry = self.resolve(table).await?;
        self.tree(&entry).search(key).await
    }

    /// Delete by primary key; `true` when a row was removed
    pub async fn delete_row(&self, table: &str, key: &Key) -> Result<bool> {
        let entry = self.resolve(table).await?;
        self.tree(&entry).delete(key).await
    }

    /// Lazy key-range scan over a named table
    pub async fn scan(&self, table: &str, bounds: ScanBounds) -> Result<TableScan<'_>> {
        let entry = self.resolve(table).await?;
        self.tree(&entry).scan(bounds).await
    }

    /// Write every dirty page back
    pub async fn flush_all(&self) -> Result<()> {
        self.pool.flush_all().await
    }

    /// Flush everything and release the buffer pool
    pub async fn shutdown(&self) -> Result<()> {
        self.pool.dispose().await
    }

    fn latch_for(&self, table_id: i32) -> Arc<AsyncRwLock<()>> {
        let mut latches = self.latches.lock();
        Arc::clone(
            latches
                .entry(table_id)
                .or_insert_with(|| Arc::new(AsyncRwLock::new(()))),
        )
    }

    fn tree(&self, entry: &CatalogEntry) -> BPlusTree<'_> {
        BPlusTree::new(
            &self.pool,
            entry.table_id,
            Arc::clone(&entry.definition),
            self.latch_for(entry.table_id),
        )
    }

    fn register(&self, entry: CatalogEntry) {
        self.tables
            .write()
            .insert(entry.definition.name().to_lowercase(), entry);
    }

    /// A system table's cache entry; always present after open
    fn system_entry(&self, table_id: i32) -> CatalogEntry {
        let name = SYSTEM_TABLES
            .iter()
            .find(|(id, _, _)| *id == table_id)
            .map(|(_, name, _)| *name)
            .expect("known system table id");
        self.tables
            .read()
            .get(name)
            .cloned()
            .expect("system tables are registered at open")
    }

    async fn scan_system(&self, table_id: i32) -> Result<Vec<Record>> {
        let entry = self.system_entry(table_id);
        self.tree(&entry)
            .scan(ScanBounds::all())
            .await?
            .collect_rows()
            .await
    }

    async fn resolve(&self, name: &str) -> Result<CatalogEntry> {
        if let Some(entry) = self.tables.read().get(&name.to_lowercase()).cloned() {
            return Ok(entry);
        }
        match self.lookup_table_in_catalog(name).await? {
            Some(entry) => {
                self.register(entry.clone());
                Ok(entry)
            }
            None => Err(StorageError::UnknownTable(name.to_string())),
        }
    }

    /// Reconstruct a table from `sys_tables`/`sys_columns`/`sys_constraints`
    async fn lookup_table_in_catalog(&self, name: &str) -> Result<Option<CatalogEntry>> {
        let mut found = None;
        for row in self.scan_system(catalog::SYS_TABLES_TABLE_ID).await? {
            let (table_id, _, table_name) = catalog::table_from_row(&row)?;
            if table_name.eq_ignore_ascii_case(name) {
                found = Some((table_id, table_name));
                break;
            }
        }
        let Some((table_id, table_name)) = found else {
            return Ok(None);
        };

        let mut columns: Vec<(usize, crate::types::ColumnDefinition)> = Vec::new();
        for row in self.scan_system(catalog::SYS_COLUMNS_TABLE_ID).await? {
            let (owner, ordinal, column) = catalog::column_from_row(&row)?;
            if owner == table_id {
                columns.push((ordinal, column));
            }
        }
        columns.sort_by_key(|(ordinal, _)| *ordinal);

        let mut constraints = Vec::new();
        for row in self.scan_system(catalog::SYS_CONSTRAINTS_TABLE_ID).await? {
            let (owner, constraint) = catalog::constraint_from_row(&row)?;
            if owner == table_id {
                constraints.push(constraint);
            }
        }

        let definition = TableDefinition::new(
            table_name,
            columns.into_iter().map(|(_, c)| c).collect(),
            constraints,
        )?;
        Ok(Some(CatalogEntry {
            table_id,
            definition: Arc::new(definition),
        }))
    }

    /// First boot: create the four system tables and describe them in
    /// themselves.
    async fn bootstrap_catalog(&self) -> Result<()> {
        info!("first boot: bootstrapping system catalog");

        let mut definitions = Vec::new();
        for (table_id, name, file) in SYSTEM_TABLES {
            let definition = match catalog::load_bootstrap_definition(
                self.fs.as_ref(),
                &self.config.catalog_dir,
                file,
            )
            .await?
            {
                Some(loaded) => {
                    if !loaded.name().eq_ignore_ascii_case(name) {
                        return Err(StorageError::InvalidCatalogFile {
                            file: file.to_string(),
                            reason: format!("defines '{}', expected '{name}'", loaded.name()),
                        });
                    }
                    loaded
                }
                None => catalog::builtin_definition(table_id),
            };
            definitions.push((table_id, definition));
        }

        for (table_id, definition) in &definitions {
            self.pool.disk().create_table_file(*table_id).await?;
            let guard = self.pool.new_page(*table_id).await?;
            assert_eq!(guard.page_id().page_index, 0);
            slotted::initialize(&mut guard.write(), PageType::Leaf);
            drop(guard);
            self.register(CatalogEntry {
                table_id: *table_id,
                definition: Arc::new(definition.clone()),
            });
        }

        let databases = self.system_entry(catalog::SYS_DATABASES_TABLE_ID);
        self.tree(&databases)
            .insert(&catalog::database_row(
                MASTER_DATABASE_ID,
                MASTER_DATABASE_NAME,
            ))
            .await?;

        for (table_id, definition) in &definitions {
            self.insert_catalog_rows(*table_id, MASTER_DATABASE_ID, definition)
                .await?;
        }

        self.pool.flush_all().await
    }

    /// Later boots: register the system tables and recover the id counters
    /// from the catalog's own rows. User tables load on first reference.
    async fn load_catalog(&self) -> Result<()> {
        info!("loading catalog from system tables");
        for (table_id, _, _) in SYSTEM_TABLES {
            self.register(CatalogEntry {
                table_id,
                definition: Arc::new(catalog::builtin_definition(table_id)),
            });
        }

        let mut max_database = MASTER_DATABASE_ID;
        for row in self.scan_system(catalog::SYS_DATABASES_TABLE_ID).await? {
            max_database = max_database.max(catalog::database_from_row(&row)?.0);
        }
        self.next_database_id
            .store(max_database + 1, Ordering::SeqCst);

        let mut max_table = SYS_CONSTRAINTS_TABLE_ID;
        for row in self.scan_system(catalog::SYS_TABLES_TABLE_ID).await? {
            max_table = max_table.max(catalog::table_from_row(&row)?.0);
        }
        self.next_table_id.store(max_table + 1, Ordering::SeqCst);

        let mut max_column = 0;
        for row in self.scan_system(catalog::SYS_COLUMNS_TABLE_ID).await? {
            if let crate::types::DataValue::Int(id) = row.value(0) {
                max_column = max_column.max(*id);
            }
        }
        self.next_column_id.store(max_column + 1, Ordering::SeqCst);

        let mut max_constraint = 0;
        for row in self.scan_system(catalog::SYS_CONSTRAINTS_TABLE_ID).await? {
            if let crate::types::DataValue::Int(id) = row.value(0) {
                max_constraint = max_constraint.max(*id);
            }
        }
        self.next_constraint_id
            .store(max_constraint + 1, Ordering::SeqCst);

        Ok(())
    }

    /// Describe a table in `sys_tables`, `sys_columns`, `sys_constraints`
    async fn insert_catalog_rows(
        &self,
        table_id: i32,
        database_id: i32,
        definition: &TableDefinition,
    ) -> Result<()> {
        let tables = self.system_entry(catalog::SYS_TABLES_TABLE_ID);
        self.tree(&tables)
            .insert(&catalog::table_row(table_id, database_id, definition.name()))
            .await?;

        let columns = self.system_entry(catalog::SYS_COLUMNS_TABLE_ID);
        for column in definition.columns() {
            let column_id = self.next_column_id.fetch_add(1, Ordering::SeqCst);
            self.tree(&columns)
                .insert(&catalog::column_row(column_id, table_id, column))
                .await?;
        }

        let constraints = self.system_entry(catalog::SYS_CONSTRAINTS_TABLE_ID);
        for constraint in definition.constraints() {
            let constraint_id = self.next_constraint_id.fetch_add(1, Ordering::SeqCst);
            self.tree(&constraints)
                .insert(&catalog::constraint_row(constraint_id, table_id, constraint))
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MemoryFileSystem;
    use crate::types::{
        ColumnDefinition, Constraint, DataTypeInfo, DataValue, PrimaryKeyConstraint,
    };

    async fn open_engine(fs: Arc<MemoryFileSystem>) -> StorageEngine {
        let config = Config::new("/data").pool_size_in_pages(128);
        StorageEngine::open(config, fs).await.unwrap()
    }

    fn simple_table(name: &str) -> TableDefinition {
        TableDefinition::new(
            name,
            vec![
                ColumnDefinition::new("id", DataTypeInfo::int(), false),
                ColumnDefinition::new("data", DataTypeInfo::varchar(64), true),
            ],
            vec![Constraint::PrimaryKey(PrimaryKeyConstraint {
                name: None,
                column_names: vec!["id".into()],
            })],
        )
        .unwrap()
    }

    fn row(id: i32, data: &str) -> Record {
        Record::new(vec![DataValue::Int(id), DataValue::Varchar(data.into())])
    }

    fn key(id: i32) -> Key {
        Key::single(DataValue::Int(id))
    }

    #[tokio::test]
    async fn test_bootstrap_creates_system_tables() {
        let fs = Arc::new(MemoryFileSystem::new());
        let engine = open_engine(fs).await;

        for (table_id, name, _) in SYSTEM_TABLES {
            assert!(engine.pool.disk().table_file_exists(table_id).await);
            let def = engine.get_table_definition(name).await.unwrap();
            assert_eq!(def.name(), name);
        }

        // the catalog describes itself
        let rows = engine
            .scan_system(catalog::SYS_TABLES_TABLE_ID)
            .await
            .unwrap();
        assert_eq!(rows.len(), 4);

        let dbs = engine
            .scan_system(catalog::SYS_DATABASES_TABLE_ID)
            .await
            .unwrap();
        assert_eq!(dbs.len(), 1);
        assert_eq!(
            catalog::database_from_row(&dbs[0]).unwrap(),
            (MASTER_DATABASE_ID, "master".to_string())
        );
    }

    #[tokio::test]
    async fn test_create_table_insert_and_lookup() {
        let fs = Arc::new(MemoryFileSystem::new());
        let engine = open_engine(fs).await;

        engine
            .create_table(MASTER_DATABASE_ID, simple_table("t"))
            .await
            .unwrap();

        engine.insert_row("t", &row(1, "a")).await.unwrap();
        engine.insert_row("t", &row(3, "c")).await.unwrap();
        engine.insert_row("t", &row(2, "b")).await.unwrap();

        assert_eq!(
            engine.find_row("t", &key(2)).await.unwrap(),
            Some(row(2, "b"))
        );
        assert_eq!(engine.find_row("t", &key(4)).await.unwrap(), None);

        // duplicate key leaves the first value intact
        let err = engine.insert_row("t", &row(2, "b")).await.unwrap_err();
        assert!(matches!(err, StorageError::DuplicateKey(_)));
        assert_eq!(
            engine.find_row("t", &key(2)).await.unwrap(),
            Some(row(2, "b"))
        );

        // delete then reinsert with new data
        assert!(engine.delete_row("t", &key(2)).await.unwrap());
        assert_eq!(engine.find_row("t", &key(2)).await.unwrap(), None);
        engine.insert_row("t", &row(2, "fresh")).await.unwrap();
        assert_eq!(
            engine.find_row("t", &key(2)).await.unwrap(),
            Some(row(2, "fresh"))
        );
    }

    #[tokio::test]
    async fn test_scan_through_engine() {
        let fs = Arc::new(MemoryFileSystem::new());
        let engine = open_engine(fs).await;
        engine
            .create_table(MASTER_DATABASE_ID, simple_table("t"))
            .await
            .unwrap();
        for id in [4, 1, 3, 2] {
            engine.insert_row("t", &row(id, "v")).await.unwrap();
        }

        let rows = engine
            .scan(
                "t",
                ScanBounds::range(Some(key(2)), true, Some(key(4)), false),
            )
            .await
            .unwrap()
            .collect_rows()
            .await
            .unwrap();
        let ids: Vec<i32> = rows
            .iter()
            .map(|r| match r.value(0) {
                DataValue::Int(id) => *id,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(ids, vec![2, 3]);
    }

    #[tokio::test]
    async fn test_unknown_table_is_a_validation_error() {
        let fs = Arc::new(MemoryFileSystem::new());
        let engine = open_engine(fs).await;
        let err = engine.find_row("missing", &key(1)).await.unwrap_err();
        assert!(matches!(err, StorageError::UnknownTable(_)));
    }

    #[tokio::test]
    async fn test_create_table_validations() {
        let fs = Arc::new(MemoryFileSystem::new());
        let engine = open_engine(fs).await;

        // no primary key
        let no_pk = TableDefinition::new(
            "bare",
            vec![ColumnDefinition::new("id", DataTypeInfo::int(), false)],
            vec![],
        )
        .unwrap();
        let err = engine
            .create_table(MASTER_DATABASE_ID, no_pk)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidDefinition(_)));

        // unknown database
        let err = engine
            .create_table(999, simple_table("t"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidDefinition(_)));

        // duplicate table name
        engine
            .create_table(MASTER_DATABASE_ID, simple_table("t"))
            .await
            .unwrap();
        let err = engine
            .create_table(MASTER_DATABASE_ID, simple_table("T"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidDefinition(_)));
    }

    #[tokio::test]
    async fn test_create_database_and_duplicates() {
        let fs = Arc::new(MemoryFileSystem::new());
        let engine = open_engine(fs).await;

        let id = engine.create_database("reports").await.unwrap();
        assert_eq!(id, MASTER_DATABASE_ID + 1);

        let err = engine.create_database("Reports").await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidDefinition(_)));

        // tables can live in the new database
        engine.create_table(id, simple_table("facts")).await.unwrap();
        engine.insert_row("facts", &row(1, "x")).await.unwrap();
    }

    #[tokio::test]
    async fn test_reboot_reads_catalog_tables() {
        let fs = Arc::new(MemoryFileSystem::new());

        let (table_id, db_id) = {
            let engine = open_engine(Arc::clone(&fs)).await;
            let db_id = engine.create_database("app").await.unwrap();
            let table_id = engine
                .create_table(
                    db_id,
                    TableDefinition::new(
                        "events",
                        vec![
                            ColumnDefinition::new("org", DataTypeInfo::varchar(20), false),
                            ColumnDefinition::new("seq", DataTypeInfo::int(), false),
                            ColumnDefinition::new("note", DataTypeInfo::varchar(100), true),
                        ],
                        vec![Constraint::PrimaryKey(PrimaryKeyConstraint {
                            name: None,
                            column_names: vec!["org".into(), "seq".into()],
                        })],
                    )
                    .unwrap(),
                )
                .await
                .unwrap();
            engine
                .insert_row(
                    "events",
                    &Record::new(vec![
                        DataValue::Varchar("acme".into()),
                        DataValue::Int(1),
                        DataValue::Varchar("first".into()),
                    ]),
                )
                .await
                .unwrap();
            engine.shutdown().await.unwrap();
            (table_id, db_id)
        };

        // a second boot over the same files rebuilds everything from the
        // catalog tables, not from bootstrap JSON
        let engine = open_engine(fs).await;
        let def = engine.get_table_definition("events").await.unwrap();
        assert_eq!(def.columns().len(), 3);
        assert_eq!(def.primary_key_ordinals(), &[0, 1]);

        let found = engine
            .find_row(
                "events",
                &Key::new(vec![DataValue::Varchar("acme".into()), DataValue::Int(1)]),
            )
            .await
            .unwrap();
        assert!(found.is_some());

        // id counters resume past the persisted maxima
        let next_db = engine.create_database("another").await.unwrap();
        assert!(next_db > db_id);
        let next_table = engine
            .create_table(next_db, simple_table("more"))
            .await
            .unwrap();
        assert!(next_table > table_id);
    }

    #[tokio::test]
    async fn test_bootstrap_prefers_catalog_json() {
        let fs = Arc::new(MemoryFileSystem::new());
        // seed one bootstrap file; the other three fall back to builtins
        let json = serde_json::to_vec(&catalog::sys_databases_definition()).unwrap();
        fs.write_at(
            std::path::Path::new("/data/catalog/sys_databases.json"),
            0,
            &json,
        )
        .await
        .unwrap();

        let engine = open_engine(fs).await;
        assert!(engine.get_table_definition("sys_databases").await.is_ok());
    }
}
