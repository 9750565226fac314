//! Table metadata and the open file/index handles the executors work
//! against.
//!
//! Metadata is serde-derived and persisted with bincode to a sidecar file
//! on every DDL; heap files are reopened and index contents rebuilt from
//! the heaps when a catalog is reopened.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::debug;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use granite::index::Index;
use granite::{BufferPoolManager, RecordFile};

use crate::errors::{EngineError, EngineResult};

/// Column types: 4-byte scalars and fixed-width strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColType {
    Int,
    Float,
    Str,
}

/// One column of a table, with its placement inside the tuple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColMeta {
    pub table: String,
    pub name: String,
    pub ty: ColType,
    pub len: usize,
    pub offset: usize,
}

/// One index over an ordered list of columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexMeta {
    pub name: String,
    pub cols: Vec<ColMeta>,
    pub col_tot_len: usize,
}

/// A table: its columns in tuple order plus its indexes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableMeta {
    pub name: String,
    pub cols: Vec<ColMeta>,
    pub indexes: Vec<IndexMeta>,
}

impl TableMeta {
    pub fn record_size(&self) -> usize {
        self.cols.last().map_or(0, |col| col.offset + col.len)
    }

    pub fn col(&self, name: &str) -> Option<&ColMeta> {
        self.cols.iter().find(|col| col.name == name)
    }
}

/// A column definition handed to `create_table`.
#[derive(Debug, Clone)]
pub struct ColDef {
    pub name: String,
    pub ty: ColType,
    pub len: usize,
}

impl ColDef {
    pub fn int(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty: ColType::Int,
            len: 4,
        }
    }

    pub fn float(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty: ColType::Float,
            len: 4,
        }
    }

    pub fn string(name: impl Into<String>, len: usize) -> Self {
        Self {
            name: name.into(),
            ty: ColType::Str,
            len,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct CatalogFile {
    tables: Vec<TableMeta>,
}

const CATALOG_FILE: &str = "catalog.meta";

/// The schema registry plus the open heap-file and index handles.
pub struct Catalog {
    dir: PathBuf,
    bpm: Arc<BufferPoolManager>,
    tables: RwLock<HashMap<String, TableMeta>>,
    fhs: RwLock<HashMap<String, Arc<RecordFile>>>,
    ihs: RwLock<HashMap<String, Arc<Index>>>,
}

impl Catalog {
    /// Opens the catalog rooted at `dir`, reloading persisted metadata and
    /// rebuilding the index contents from the heaps.
    pub fn open<P: AsRef<Path>>(dir: P, bpm: Arc<BufferPoolManager>) -> EngineResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        let catalog = Self {
            dir,
            bpm,
            tables: RwLock::new(HashMap::new()),
            fhs: RwLock::new(HashMap::new()),
            ihs: RwLock::new(HashMap::new()),
        };

        let meta_path = catalog.dir.join(CATALOG_FILE);
        if meta_path.exists() {
            let bytes = fs::read(&meta_path)?;
            let file: CatalogFile = bincode::deserialize(&bytes)
                .map_err(|err| EngineError::Serialization(err.to_string()))?;
            for meta in file.tables {
                let fh = Arc::new(RecordFile::open(
                    Arc::clone(&catalog.bpm),
                    catalog.table_path(&meta.name),
                )?);
                catalog.fhs.write().insert(meta.name.clone(), Arc::clone(&fh));
                for index in &meta.indexes {
                    let ih = Arc::new(Index::new());
                    Self::backfill(&fh, index, &ih)?;
                    catalog.ihs.write().insert(index.name.clone(), ih);
                }
                catalog.tables.write().insert(meta.name.clone(), meta);
            }
        }
        Ok(catalog)
    }

    /// Creates a table and its heap file. Columns are laid out in
    /// definition order.
    pub fn create_table(&self, name: &str, defs: &[ColDef]) -> EngineResult<TableMeta> {
        if self.tables.read().contains_key(name) {
            return Err(EngineError::TableExists(name.to_string()));
        }
        if defs.is_empty() {
            return Err(EngineError::Internal(format!(
                "table '{name}' needs at least one column"
            )));
        }

        let mut cols = Vec::with_capacity(defs.len());
        let mut offset = 0;
        for def in defs {
            let len = match def.ty {
                ColType::Int | ColType::Float => 4,
                ColType::Str => def.len,
            };
            if len == 0 {
                return Err(EngineError::Internal(format!(
                    "column '{}' has zero width",
                    def.name
                )));
            }
            cols.push(ColMeta {
                table: name.to_string(),
                name: def.name.clone(),
                ty: def.ty,
                len,
                offset,
            });
            offset += len;
        }
        let meta = TableMeta {
            name: name.to_string(),
            cols,
            indexes: Vec::new(),
        };

        let fh = Arc::new(RecordFile::create(
            Arc::clone(&self.bpm),
            self.table_path(name),
            meta.record_size(),
        )?);
        self.fhs.write().insert(name.to_string(), fh);
        self.tables.write().insert(name.to_string(), meta.clone());
        self.save()?;
        debug!("catalog: created table '{name}' ({} bytes/row)", meta.record_size());
        Ok(meta)
    }

    /// Drops a table: its metadata, its indexes, its cached pages, its
    /// open file, and finally the file on disk.
    pub fn drop_table(&self, name: &str) -> EngineResult<()> {
        let meta = self
            .tables
            .write()
            .remove(name)
            .ok_or_else(|| EngineError::TableNotFound(name.to_string()))?;
        let fh = self.fhs.write().remove(name);
        for index in &meta.indexes {
            self.ihs.write().remove(&index.name);
        }
        if let Some(fh) = fh {
            self.bpm.drop_file(fh.file_id())?;
        }
        let _ = fs::remove_file(self.table_path(name));
        self.save()
    }

    /// Creates an index over `col_names` and backfills it from the heap.
    pub fn create_index(&self, table: &str, col_names: &[&str]) -> EngineResult<String> {
        let mut tables = self.tables.write();
        let meta = tables
            .get_mut(table)
            .ok_or_else(|| EngineError::TableNotFound(table.to_string()))?;

        let mut cols = Vec::with_capacity(col_names.len());
        for col_name in col_names {
            let col = meta
                .cols
                .iter()
                .find(|col| &col.name == col_name)
                .ok_or_else(|| EngineError::ColumnNotFound(col_name.to_string()))?;
            cols.push(col.clone());
        }
        let index_name = format!("{table}_{}_idx", col_names.join("_"));
        if meta.indexes.iter().any(|index| index.name == index_name) {
            return Err(EngineError::Internal(format!(
                "index '{index_name}' already exists"
            )));
        }
        let index_meta = IndexMeta {
            name: index_name.clone(),
            col_tot_len: cols.iter().map(|col| col.len).sum(),
            cols,
        };

        let fh = self.file_handle(table)?;
        let ih = Arc::new(Index::new());
        Self::backfill(&fh, &index_meta, &ih)?;

        meta.indexes.push(index_meta);
        let snapshot: Vec<TableMeta> = tables.values().cloned().collect();
        drop(tables);
        self.ihs.write().insert(index_name.clone(), ih);
        self.save_tables(snapshot)?;
        Ok(index_name)
    }

    pub fn get_table(&self, name: &str) -> EngineResult<TableMeta> {
        self.tables
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::TableNotFound(name.to_string()))
    }

    pub fn file_handle(&self, name: &str) -> EngineResult<Arc<RecordFile>> {
        self.fhs
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::TableNotFound(name.to_string()))
    }

    pub fn index_handle(&self, index_name: &str) -> EngineResult<Arc<Index>> {
        self.ihs
            .read()
            .get(index_name)
            .cloned()
            .ok_or_else(|| EngineError::IndexNotFound(index_name.to_string()))
    }

    /// Concatenates the index's column bytes out of a tuple.
    pub fn index_key(index: &IndexMeta, tuple: &[u8]) -> Vec<u8> {
        let mut key = Vec::with_capacity(index.col_tot_len);
        for col in &index.cols {
            key.extend_from_slice(&tuple[col.offset..col.offset + col.len]);
        }
        key
    }

    fn backfill(fh: &Arc<RecordFile>, index: &IndexMeta, ih: &Arc<Index>) -> EngineResult<()> {
        ih.clear();
        let mut scan = fh.scan()?;
        while !scan.is_end() {
            let rid = scan.rid();
            let record = fh.get(rid, None)?;
            ih.insert_entry(&Self::index_key(index, &record.data), rid, None)?;
            scan.next()?;
        }
        Ok(())
    }

    fn table_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.tbl"))
    }

    fn save(&self) -> EngineResult<()> {
        let snapshot: Vec<TableMeta> = self.tables.read().values().cloned().collect();
        self.save_tables(snapshot)
    }

    fn save_tables(&self, mut tables: Vec<TableMeta>) -> EngineResult<()> {
        tables.sort_by(|a, b| a.name.cmp(&b.name));
        let bytes = bincode::serialize(&CatalogFile { tables })
            .map_err(|err| EngineError::Serialization(err.to_string()))?;
        fs::write(self.dir.join(CATALOG_FILE), bytes)?;
        Ok(())
    }
}
