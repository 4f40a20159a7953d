//! Cache store (spec §4.9): a named set of typed in-memory tables, each
//! with per-row generation counters.
//!
//! Generalizes the teacher's `Storage` trait from an opaque append-only
//! frame log keyed by `(room_id, log_index)` to a typed, multi-table store
//! keyed by row primary keys, with the unit of ordering being the row
//! (`generation: u64`) rather than the whole table (`next_log_index`).
//!
//! This module carries no notification mechanism of its own: `Table::{
//! insert, merge, erase, clear}` return the affected [`Row`] (or `None` for
//! a no-op merge), and `crate::cluster::ClusterBus` — the only caller — is
//! what turns those return values into the `db.res.*` broadcasts subscribers
//! see, tagging each with the requesting peer's origin (spec §4.8's
//! self-echo suppression). Keeping that translation in the bus rather than
//! behind a callback here follows the teacher's `Sequencer::process_frame`
//! split: storage mutates and reports what changed, the dispatcher one
//! layer up decides who gets told.

#![allow(clippy::expect_used, reason = "mutex poisoning should cause a panic")]

pub mod redb_store;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::StoreError;

/// A single cell value in a cache-store row. Deliberately small: the
/// cluster bus only ever needs to move loosely-typed parameter maps
/// across the wire (spec §6, "length-prefixed self-describing object
/// stream").
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    /// UTF-8 text.
    Text(String),
    /// A signed integer.
    Int(i64),
    /// An unsigned integer (counters, generations, byte totals).
    Uint(u64),
    /// Raw bytes (OBIS codes, server-IDs, hex-encoded buffers per spec §6).
    Bytes(Vec<u8>),
    /// Boolean flag.
    Bool(bool),
}

/// A row's primary key: the first `pk_count` column values of the row,
/// concatenated into a stable, hashable representation.
pub type RowKey = Vec<CellValue>;

/// A row's non-key columns, keyed by column name.
pub type ParamMap = HashMap<String, CellValue>;

impl std::hash::Hash for CellValue {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        match self {
            CellValue::Text(s) => {
                0u8.hash(state);
                s.hash(state);
            }
            CellValue::Int(i) => {
                1u8.hash(state);
                i.hash(state);
            }
            CellValue::Uint(u) => {
                2u8.hash(state);
                u.hash(state);
            }
            CellValue::Bytes(b) => {
                3u8.hash(state);
                b.hash(state);
            }
            CellValue::Bool(b) => {
                4u8.hash(state);
                b.hash(state);
            }
        }
    }
}
impl Eq for CellValue {}

/// Column type tag, for `TableMeta::columns`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    /// UTF-8 text column.
    Text,
    /// Signed integer column.
    Int,
    /// Unsigned integer column.
    Uint,
    /// Raw byte buffer column.
    Bytes,
    /// Boolean column.
    Bool,
}

/// Static metadata describing a table's shape (spec §4.9).
#[derive(Debug, Clone)]
pub struct TableMeta {
    /// Table name, as used in `db.req.*` verbs.
    pub name: String,
    /// Ordered `(name, type)` column list. The first `pk_count` entries
    /// form the primary key.
    pub columns: Vec<(String, ColumnType)>,
    /// Number of leading columns that form the primary key.
    pub pk_count: usize,
}

/// A stored row: its key, its non-key columns, and the generation at
/// which it was last changed.
#[derive(Debug, Clone)]
pub struct Row {
    /// Primary key.
    pub key: RowKey,
    /// Non-key columns.
    pub data: ParamMap,
    /// Generation at which this row was last inserted/updated.
    pub generation: u64,
}

/// A single typed table: metadata, rows keyed by primary key, and a
/// monotone per-table generation counter used to timestamp changes and
/// (for auto-tables) mint fresh keys.
#[derive(Debug)]
pub struct Table {
    meta: TableMeta,
    rows: HashMap<RowKey, Row>,
    generation: u64,
    /// `Some` for an auto-table (sysMsg, uplink): the next key this table
    /// will mint on `insert_auto`.
    auto_key: Option<u64>,
}

impl Table {
    /// Create an empty table from its metadata.
    pub fn new(meta: TableMeta) -> Self {
        Self { meta, rows: HashMap::new(), generation: 0, auto_key: None }
    }

    /// Create an empty auto-table: one that maintains a monotone key
    /// generator for `insert_auto` (spec §4.9, "used for sysMsg and
    /// uplink tables").
    pub fn new_auto(meta: TableMeta) -> Self {
        Self { meta, rows: HashMap::new(), generation: 0, auto_key: Some(0) }
    }

    /// Table metadata.
    pub fn meta(&self) -> &TableMeta {
        &self.meta
    }

    /// Current rows, in no particular order.
    pub fn rows(&self) -> impl Iterator<Item = &Row> {
        self.rows.values()
    }

    /// Number of rows currently held.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the table holds no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn bump_generation(&mut self) -> u64 {
        self.generation = self.generation.wrapping_add(1);
        self.generation
    }

    /// Insert a row at an explicit key, overwriting any existing row.
    pub fn insert(&mut self, key: RowKey, data: ParamMap) -> Row {
        let generation = self.bump_generation();
        let row = Row { key: key.clone(), data, generation };
        self.rows.insert(key, row.clone());
        row
    }

    /// Insert a row using this table's monotone key generator. Only
    /// valid on an auto-table.
    pub fn insert_auto(&mut self, data: ParamMap) -> Result<Row, StoreError> {
        let Some(next) = self.auto_key else {
            return Err(StoreError::UnknownTable(format!(
                "{} is not an auto-table",
                self.meta.name
            )));
        };
        self.auto_key = Some(next.wrapping_add(1));
        Ok(self.insert(vec![CellValue::Uint(next)], data))
    }

    /// Merge `patch` into the row at `key` (partial update). If the
    /// merged row is value-equal to the existing row, this is a no-op:
    /// no generation bump, no row returned for notification (spec §8,
    /// "cache merge of an unchanged param-map is a no-op").
    pub fn merge(&mut self, key: &RowKey, patch: ParamMap) -> Result<Option<Row>, StoreError> {
        let existing = self.rows.get(key).ok_or_else(|| StoreError::RowNotFound {
            table: self.meta.name.clone(),
            key: format!("{key:?}"),
        })?;

        let mut merged_data = existing.data.clone();
        for (k, v) in &patch {
            merged_data.insert(k.clone(), v.clone());
        }

        if merged_data == existing.data {
            return Ok(None);
        }

        let generation = self.bump_generation();
        let row = Row { key: key.clone(), data: merged_data, generation };
        self.rows.insert(key.clone(), row.clone());
        Ok(Some(row))
    }

    /// Erase the row at `key`. Returns `true` if a row was present.
    pub fn erase(&mut self, key: &RowKey) -> bool {
        self.rows.remove(key).is_some()
    }

    /// Remove every row from this table.
    pub fn clear(&mut self) {
        self.rows.clear();
    }

    /// Look up a row by key.
    pub fn lookup(&self, key: &RowKey) -> Option<&Row> {
        self.rows.get(key)
    }

    /// Iterate all rows (the `loop` operation from spec §4.9, renamed
    /// since `loop` is a Rust keyword).
    pub fn loop_(&self) -> impl Iterator<Item = &Row> {
        self.rows.values()
    }
}

/// The cache store: a named collection of tables, accessed exclusively
/// through `with_table`/`with_table_ref` (spec §5's "access(read/write,
/// table...)" locking API).
///
/// `Clone` shares the same underlying tables via `Arc<Mutex<_>>`.
#[derive(Clone)]
pub struct CacheStore {
    inner: Arc<Mutex<HashMap<String, Table>>>,
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheStore {
    /// Create an empty store with no tables defined.
    pub fn new() -> Self {
        Self { inner: Arc::new(Mutex::new(HashMap::new())) }
    }

    /// Define a table. Replaces any existing table of the same name.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn define_table(&self, table: Table) {
        let mut inner = self.inner.lock().expect("CacheStore mutex poisoned");
        inner.insert(table.meta.name.clone(), table);
    }

    /// Run `f` with exclusive access to the named table.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn with_table<T>(
        &self,
        name: &str,
        f: impl FnOnce(&mut Table) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut inner = self.inner.lock().expect("CacheStore mutex poisoned");
        let table = inner
            .get_mut(name)
            .ok_or_else(|| StoreError::UnknownTable(name.to_owned()))?;
        f(table)
    }

    /// Run `f` with read access to the named table.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn with_table_ref<T>(
        &self,
        name: &str,
        f: impl FnOnce(&Table) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let inner = self.inner.lock().expect("CacheStore mutex poisoned");
        let table = inner
            .get(name)
            .ok_or_else(|| StoreError::UnknownTable(name.to_owned()))?;
        f(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(name: &str) -> TableMeta {
        TableMeta {
            name: name.to_owned(),
            columns: vec![
                ("id".to_owned(), ColumnType::Uint),
                ("value".to_owned(), ColumnType::Text),
            ],
            pk_count: 1,
        }
    }

    #[test]
    fn insert_then_lookup_roundtrips() {
        let mut table = Table::new(meta("device"));
        let key = vec![CellValue::Uint(1)];
        let mut data = ParamMap::new();
        data.insert("value".to_owned(), CellValue::Text("a".to_owned()));
        table.insert(key.clone(), data.clone());

        let row = table.lookup(&key).unwrap();
        assert_eq!(row.data, data);
        assert_eq!(row.generation, 1);
    }

    #[test]
    fn merge_unchanged_is_a_no_op() {
        let mut table = Table::new(meta("device"));
        let key = vec![CellValue::Uint(1)];
        let mut data = ParamMap::new();
        data.insert("value".to_owned(), CellValue::Text("a".to_owned()));
        table.insert(key.clone(), data.clone());
        let gen_before = table.lookup(&key).unwrap().generation;

        let result = table.merge(&key, data).unwrap();
        assert!(result.is_none());
        assert_eq!(table.lookup(&key).unwrap().generation, gen_before);
    }

    #[test]
    fn merge_changed_bumps_generation() {
        let mut table = Table::new(meta("device"));
        let key = vec![CellValue::Uint(1)];
        let mut data = ParamMap::new();
        data.insert("value".to_owned(), CellValue::Text("a".to_owned()));
        table.insert(key.clone(), data);
        let gen_before = table.lookup(&key).unwrap().generation;

        let mut patch = ParamMap::new();
        patch.insert("value".to_owned(), CellValue::Text("b".to_owned()));
        let row = table.merge(&key, patch).unwrap().unwrap();
        assert!(row.generation > gen_before);
    }

    #[test]
    fn auto_table_mints_monotone_keys() {
        let mut table = Table::new_auto(meta("sysmsg"));
        let row1 = table.insert_auto(ParamMap::new()).unwrap();
        let row2 = table.insert_auto(ParamMap::new()).unwrap();
        assert_eq!(row1.key, vec![CellValue::Uint(0)]);
        assert_eq!(row2.key, vec![CellValue::Uint(1)]);
    }

    #[test]
    fn insert_auto_on_plain_table_fails() {
        let mut table = Table::new(meta("device"));
        assert!(table.insert_auto(ParamMap::new()).is_err());
    }

    #[test]
    fn erase_and_clear() {
        let mut table = Table::new(meta("device"));
        let key = vec![CellValue::Uint(1)];
        table.insert(key.clone(), ParamMap::new());
        assert!(table.erase(&key));
        assert!(!table.erase(&key));

        table.insert(vec![CellValue::Uint(2)], ParamMap::new());
        table.insert(vec![CellValue::Uint(3)], ParamMap::new());
        table.clear();
        assert!(table.is_empty());
    }

    #[test]
    fn store_define_and_access_table() {
        let store = CacheStore::new();
        store.define_table(Table::new(meta("device")));
        store
            .with_table("device", |t| {
                t.insert(vec![CellValue::Uint(1)], ParamMap::new());
                Ok(())
            })
            .unwrap();
        let len = store.with_table_ref("device", |t| Ok(t.len())).unwrap();
        assert_eq!(len, 1);
    }

    #[test]
    fn unknown_table_access_fails() {
        let store = CacheStore::new();
        let err = store.with_table_ref("nope", |t| Ok(t.len()));
        assert!(matches!(err, Err(StoreError::UnknownTable(_))));
    }
}
