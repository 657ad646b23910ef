use crate::access::HeapFile;
use crate::config::StorageConfig;
use crate::storage::buffer::BufferPool;
use crate::storage::page::{HeapPageLayout, PageStore, TableId};
use crate::transaction::Transaction;
use anyhow::{bail, Context, Result};
use dashmap::DashMap;
use log::info;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const TABLE_FILE_EXTENSION: &str = "tbl";

/// A data directory of table files sharing one buffer pool.
///
/// Each table lives in `<data_dir>/<name>.tbl`. Row widths are not stored in
/// the file, so reopening a table needs the width it was created with.
pub struct Database {
    config: StorageConfig,
    data_dir: PathBuf,
    pool: BufferPool,
    tables: DashMap<String, Arc<HeapFile>>,
}

impl Database {
    /// Opens `data_dir`, creating it if needed.
    pub fn open(data_dir: &Path, config: StorageConfig) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create data directory {:?}", data_dir))?;
        let data_dir = data_dir
            .canonicalize()
            .with_context(|| format!("Failed to resolve {:?}", data_dir))?;
        let pool = BufferPool::from_config(&config)?;

        info!(
            "opened {} ({} byte pages, {} page pool)",
            data_dir.display(),
            config.page_size,
            config.pool_capacity
        );

        Ok(Self {
            config,
            data_dir,
            pool,
            tables: DashMap::new(),
        })
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn buffer_pool(&self) -> &BufferPool {
        &self.pool
    }

    pub fn begin(&self) -> Transaction {
        Transaction::begin(&self.pool)
    }

    /// Creates an empty table of `row_width` byte rows.
    pub fn create_table(&self, name: &str, row_width: usize) -> Result<Arc<HeapFile>> {
        let path = self.table_path(name);
        if self.tables.contains_key(name) || path.exists() {
            bail!("Table '{}' already exists", name);
        }

        let layout = HeapPageLayout::new(self.config.page_size, row_width)?;
        let table_id = self.table_id(name, &path)?;
        let file = HeapFile::create(&path, table_id, layout)
            .with_context(|| format!("Failed to create table file {:?}", path))?;

        info!("created table '{}' as {}", name, table_id);
        Ok(self.register(name, file))
    }

    /// Opens an existing table file created with `row_width` byte rows.
    pub fn open_table(&self, name: &str, row_width: usize) -> Result<Arc<HeapFile>> {
        if let Some(file) = self.table(name) {
            return Ok(file);
        }

        let path = self.table_path(name);
        if !path.exists() {
            bail!("Table '{}' does not exist", name);
        }

        let layout = HeapPageLayout::new(self.config.page_size, row_width)?;
        let table_id = self.table_id(name, &path)?;
        let file = HeapFile::open(&path, table_id, layout)
            .with_context(|| format!("Failed to open table file {:?}", path))?;

        Ok(self.register(name, file))
    }

    pub fn table(&self, name: &str) -> Option<Arc<HeapFile>> {
        self.tables.get(name).map(|file| Arc::clone(file.value()))
    }

    pub fn table_names(&self) -> Vec<String> {
        let mut names = self
            .tables
            .iter()
            .map(|entry| entry.key().clone())
            .collect::<Vec<_>>();
        names.sort();
        names
    }

    fn table_path(&self, name: &str) -> PathBuf {
        self.data_dir
            .join(format!("{}.{}", name, TABLE_FILE_EXTENSION))
    }

    fn table_id(&self, name: &str, path: &Path) -> Result<TableId> {
        let table_id = TableId::for_path(path);
        if self
            .tables
            .iter()
            .any(|entry| entry.key() != name && entry.value().table_id() == table_id)
        {
            bail!("Table '{}' collides with an existing {}", name, table_id);
        }
        Ok(table_id)
    }

    fn register(&self, name: &str, file: HeapFile) -> Arc<HeapFile> {
        let file = Arc::new(file);
        self.pool.register_store(file.clone());
        self.tables.insert(name.to_string(), Arc::clone(&file));
        file
    }
}
