use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use ethereum_types::H256;
use rustc_hash::FxHashMap;
use tabrex_common::constants::USER_TABLE_FIELD_VALUE_MAX_LENGTH;
use tabrex_common::{Entry, EntryStatus, KeyCondition, TableSchema};
use tabrex_crypto::keccak256;
use tracing::trace;

use crate::backend::{Backend, DirtyRow, DirtySet};
use crate::error::StoreError;

/// Opaque, monotonically increasing rollback token. Consumed on
/// rollback; replay is an error.
pub type SavepointId = u64;

/// Read surface a layer needs from whatever sits below it: the durable
/// backend or another layer. Kept object-safe so layers stack freely.
#[async_trait]
pub trait StorageReader: Send + Sync {
    async fn read_row(&self, table: &str, key: &str) -> Result<Option<Entry>, StoreError>;

    async fn read_rows(
        &self,
        table: &str,
        keys: &[String],
    ) -> Result<Vec<Option<Entry>>, StoreError>;

    async fn read_primary_keys(
        &self,
        table: &str,
        condition: Option<&KeyCondition>,
    ) -> Result<Vec<String>, StoreError>;

    async fn read_schema(&self, name: &str) -> Result<Option<TableSchema>, StoreError>;
}

struct BackendReader(Arc<dyn Backend>);

#[async_trait]
impl StorageReader for BackendReader {
    async fn read_row(&self, table: &str, key: &str) -> Result<Option<Entry>, StoreError> {
        self.0.get_row(table, key).await
    }

    async fn read_rows(
        &self,
        table: &str,
        keys: &[String],
    ) -> Result<Vec<Option<Entry>>, StoreError> {
        self.0.get_rows(table, keys).await
    }

    async fn read_primary_keys(
        &self,
        table: &str,
        condition: Option<&KeyCondition>,
    ) -> Result<Vec<String>, StoreError> {
        self.0.get_primary_keys(table, condition).await
    }

    async fn read_schema(&self, name: &str) -> Result<Option<TableSchema>, StoreError> {
        self.0.open_table(name).await
    }
}

struct TableData {
    schema: TableSchema,
    created_here: bool,
    rows: FxHashMap<String, Entry>,
}

struct DirtyRecord {
    table: String,
    key: String,
    /// Local row before this write; `None` when the key had no local copy.
    prev: Option<Entry>,
}

#[derive(Default)]
struct Inner {
    tables: FxHashMap<String, TableData>,
    log: Vec<DirtyRecord>,
    /// `(token, log length)` pairs, ascending in both components.
    savepoints: Vec<(SavepointId, usize)>,
    next_savepoint: SavepointId,
    capacity: usize,
}

/// In-memory mutable overlay over a parent storage.
///
/// Reads resolve against the local dirty rows first and fall through to
/// the parent; parent hits (and misses, when read caching is on) are
/// copied into the layer. Writes never touch the parent: they flow out
/// through [`StateStorage::merge_into`] or the exported dirty set.
///
/// An entry with no fields and status `Normal` is the cached-miss
/// sentinel; schema-bound rows always carry at least one field.
pub struct StateStorage {
    parent: Arc<dyn StorageReader>,
    inner: RwLock<Inner>,
    cache_reads: bool,
}

impl StateStorage {
    pub fn with_backend(backend: Arc<dyn Backend>) -> Arc<Self> {
        Arc::new(Self {
            parent: Arc::new(BackendReader(backend)),
            inner: RwLock::new(Inner::default()),
            cache_reads: true,
        })
    }

    pub fn with_parent(parent: Arc<StateStorage>) -> Arc<Self> {
        Arc::new(Self {
            parent,
            inner: RwLock::new(Inner::default()),
            cache_reads: true,
        })
    }

    /// A layer over any read surface, e.g. an LRU-wrapped layer.
    pub fn with_reader(parent: Arc<dyn StorageReader>) -> Arc<Self> {
        Arc::new(Self {
            parent,
            inner: RwLock::new(Inner::default()),
            cache_reads: true,
        })
    }

    /// A layer that does not retain parent hits. DAG child layers use
    /// this so their dirty set stays exactly the set of writes.
    pub fn without_read_cache(parent: Arc<StateStorage>) -> Arc<Self> {
        Arc::new(Self {
            parent,
            inner: RwLock::new(Inner::default()),
            cache_reads: false,
        })
    }

    fn lock_read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_write(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Resolves the schema of `table` from the local catalog or the
    /// parent chain, caching it locally. `TableNotFound` if the table
    /// was never created anywhere in the stack.
    async fn ensure_table(&self, table: &str) -> Result<TableSchema, StoreError> {
        if let Some(data) = self.lock_read().tables.get(table) {
            return Ok(data.schema.clone());
        }
        let schema = self
            .parent
            .read_schema(table)
            .await?
            .ok_or_else(|| StoreError::TableNotFound(table.to_string()))?;
        let mut inner = self.lock_write();
        inner.tables.entry(table.to_string()).or_insert(TableData {
            schema: schema.clone(),
            created_here: false,
            rows: FxHashMap::default(),
        });
        Ok(schema)
    }

    /// Newest non-deleted entry visible for `(table, key)`.
    pub async fn get_row(&self, table: &str, key: &str) -> Result<Option<Entry>, StoreError> {
        self.ensure_table(table).await?;

        enum Local {
            Hit(Entry),
            Absent,
            FallThrough,
        }

        let local = {
            let inner = self.lock_read();
            match inner.tables.get(table).and_then(|t| t.rows.get(key)) {
                Some(entry) => match entry.status() {
                    EntryStatus::Deleted => Local::Absent,
                    EntryStatus::Purged => Local::FallThrough,
                    _ if entry.field_count() == 0 => Local::Absent,
                    _ => Local::Hit(entry.clone()),
                },
                None => Local::FallThrough,
            }
        };

        match local {
            Local::Hit(entry) => Ok(Some(entry)),
            Local::Absent => Ok(None),
            Local::FallThrough => {
                let fetched = self.parent.read_row(table, key).await?;
                let mut result = fetched;
                if let Some(entry) = result.as_mut() {
                    entry.set_status(EntryStatus::Normal);
                }
                if self.cache_reads {
                    self.cache_read(table, key, result.clone());
                }
                Ok(result)
            }
        }
    }

    /// Batched lookup; output order mirrors `keys`.
    pub async fn get_rows(
        &self,
        table: &str,
        keys: &[String],
    ) -> Result<Vec<Option<Entry>>, StoreError> {
        self.ensure_table(table).await?;

        let mut results: Vec<Option<Entry>> = vec![None; keys.len()];
        let mut missing: Vec<usize> = Vec::new();
        {
            let inner = self.lock_read();
            let rows = inner.tables.get(table).map(|t| &t.rows);
            for (i, key) in keys.iter().enumerate() {
                match rows.and_then(|r| r.get(key)) {
                    Some(entry) => match entry.status() {
                        EntryStatus::Deleted => {}
                        EntryStatus::Purged => missing.push(i),
                        _ if entry.field_count() == 0 => {}
                        _ => results[i] = Some(entry.clone()),
                    },
                    None => missing.push(i),
                }
            }
        }

        if !missing.is_empty() {
            let parent_keys: Vec<String> = missing.iter().map(|&i| keys[i].clone()).collect();
            let fetched = self.parent.read_rows(table, &parent_keys).await?;
            for (&i, mut entry) in missing.iter().zip(fetched) {
                if let Some(e) = entry.as_mut() {
                    e.set_status(EntryStatus::Normal);
                }
                if self.cache_reads {
                    self.cache_read(table, &keys[i], entry.clone());
                }
                results[i] = entry;
            }
        }

        Ok(results)
    }

    /// Copies a parent hit (or the miss sentinel) into the layer without
    /// touching the dirty log. Never clobbers a newer local write.
    fn cache_read(&self, table: &str, key: &str, entry: Option<Entry>) {
        let mut inner = self.lock_write();
        let inner = &mut *inner;
        let Some(data) = inner.tables.get_mut(table) else {
            return;
        };
        let cached = entry.unwrap_or_default();
        match data.rows.get(key) {
            Some(existing) if existing.status() != EntryStatus::Purged => {}
            _ => {
                let size = key.len() + cached.size();
                let old = data.rows.insert(key.to_string(), cached);
                let old_size = old.map(|e| key.len() + e.size()).unwrap_or(0);
                inner.capacity = (inner.capacity + size).saturating_sub(old_size);
            }
        }
    }

    /// Union of keys visible from the parents and this layer, minus keys
    /// whose local status is deleted or purged, sorted ascending. When a
    /// condition is given it filters by string comparison on the key;
    /// field-level filtering stays with the caller.
    pub async fn get_primary_keys(
        &self,
        table: &str,
        condition: Option<&KeyCondition>,
    ) -> Result<Vec<String>, StoreError> {
        self.ensure_table(table).await?;

        let parent_keys = self.parent.read_primary_keys(table, condition).await?;

        let mut keys: std::collections::BTreeSet<String> = parent_keys.into_iter().collect();
        {
            let inner = self.lock_read();
            if let Some(data) = inner.tables.get(table) {
                for (key, entry) in &data.rows {
                    match entry.status() {
                        EntryStatus::Deleted | EntryStatus::Purged => {
                            keys.remove(key);
                        }
                        _ if entry.field_count() == 0 => {}
                        _ => {
                            if condition.map(|c| c.matches(key)).unwrap_or(true) {
                                keys.insert(key.clone());
                            }
                        }
                    }
                }
            }
        }

        let mut keys: Vec<String> = keys.into_iter().collect();
        if let Some((offset, count)) = condition.and_then(|c| c.limit) {
            keys = keys.into_iter().skip(offset).take(count).collect();
        }
        Ok(keys)
    }

    /// Writes a local copy with status `Modified` (`Deleted` when the
    /// entry is a tombstone) and appends to the dirty log. A `Purged`
    /// entry instead evicts the local copy and is not logged.
    ///
    /// Field values over the persisted-layout budget are rejected
    /// before anything is retained.
    pub async fn set_row(&self, table: &str, key: &str, entry: Entry) -> Result<(), StoreError> {
        for (field, value) in entry.fields() {
            if value.len() > USER_TABLE_FIELD_VALUE_MAX_LENGTH {
                return Err(StoreError::FieldTooLong {
                    field: field.to_string(),
                    len: value.len(),
                    max: USER_TABLE_FIELD_VALUE_MAX_LENGTH,
                });
            }
        }
        self.ensure_table(table).await?;

        let mut inner = self.lock_write();
        let inner = &mut *inner;
        let Some(data) = inner.tables.get_mut(table) else {
            return Err(StoreError::TableNotFound(table.to_string()));
        };

        if entry.status() == EntryStatus::Purged {
            if let Some(existing) = data.rows.get(key) {
                if existing.status() == EntryStatus::Normal {
                    let freed = key.len() + existing.size();
                    data.rows.remove(key);
                    inner.capacity = inner.capacity.saturating_sub(freed);
                }
            }
            return Ok(());
        }

        let mut entry = entry;
        if entry.status() != EntryStatus::Deleted {
            entry.set_status(EntryStatus::Modified);
        }

        let new_size = key.len() + entry.size();
        let prev = data.rows.insert(key.to_string(), entry);
        let prev_size = prev.as_ref().map(|e| key.len() + e.size()).unwrap_or(0);
        inner.log.push(DirtyRecord {
            table: table.to_string(),
            key: key.to_string(),
            prev,
        });
        inner.capacity = (inner.capacity + new_size).saturating_sub(prev_size);
        Ok(())
    }

    /// Fails with `TableExists` if `name` exists anywhere in the stack.
    pub async fn create_table(
        &self,
        name: &str,
        schema: TableSchema,
    ) -> Result<(), StoreError> {
        {
            let inner = self.lock_read();
            if inner.tables.contains_key(name) {
                return Err(StoreError::TableExists(name.to_string()));
            }
        }
        if self.parent.read_schema(name).await?.is_some() {
            return Err(StoreError::TableExists(name.to_string()));
        }

        let mut inner = self.lock_write();
        if inner.tables.contains_key(name) {
            return Err(StoreError::TableExists(name.to_string()));
        }
        inner.tables.insert(
            name.to_string(),
            TableData {
                schema,
                created_here: true,
                rows: FxHashMap::default(),
            },
        );
        Ok(())
    }

    pub async fn open_table(&self, name: &str) -> Result<Option<TableSchema>, StoreError> {
        match self.ensure_table(name).await {
            Ok(schema) => Ok(Some(schema)),
            Err(StoreError::TableNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn savepoint(&self) -> SavepointId {
        let mut inner = self.lock_write();
        let token = inner.next_savepoint;
        inner.next_savepoint += 1;
        let len = inner.log.len();
        inner.savepoints.push((token, len));
        token
    }

    /// Truncates the dirty log back to `savepoint`, restoring the rows
    /// it shadowed. The token (and every later one) is consumed.
    pub fn rollback(&self, savepoint: SavepointId) -> Result<(), StoreError> {
        let mut inner = self.lock_write();
        let pos = inner
            .savepoints
            .iter()
            .position(|(token, _)| *token == savepoint)
            .ok_or(StoreError::SavepointReplay(savepoint))?;
        let (_, target_len) = inner.savepoints[pos];
        inner.savepoints.truncate(pos);

        let inner = &mut *inner;
        while inner.log.len() > target_len {
            let record = match inner.log.pop() {
                Some(r) => r,
                None => break,
            };
            if let Some(data) = inner.tables.get_mut(&record.table) {
                let key_len = record.key.len();
                let cur_size = data
                    .rows
                    .get(&record.key)
                    .map(|e| key_len + e.size())
                    .unwrap_or(0);
                let prev_size = record
                    .prev
                    .as_ref()
                    .map(|e| key_len + e.size())
                    .unwrap_or(0);
                match record.prev {
                    Some(prev) => {
                        data.rows.insert(record.key, prev);
                    }
                    None => {
                        data.rows.remove(&record.key);
                    }
                }
                inner.capacity = (inner.capacity + prev_size).saturating_sub(cur_size);
            }
        }
        trace!(savepoint, "rolled back storage layer");
        Ok(())
    }

    /// Deterministic digest over the dirty rows: ascending `(table, key)`
    /// byte order, fields in schema order, a marker byte in place of the
    /// fields for deleted rows. Purged rows never reach the log, so the
    /// digest depends only on the surviving mutation set.
    pub fn hash(&self) -> H256 {
        let inner = self.lock_read();
        let mut dirty: BTreeMap<(&str, &str), (&TableSchema, &Entry)> = BTreeMap::new();
        for (name, data) in &inner.tables {
            for (key, entry) in &data.rows {
                if matches!(entry.status(), EntryStatus::Modified | EntryStatus::Deleted) {
                    dirty.insert((name, key), (&data.schema, entry));
                }
            }
        }

        let mut digest_input = Vec::new();
        for ((table, key), (schema, entry)) in dirty {
            let mut row = Vec::new();
            row.extend_from_slice(table.as_bytes());
            row.push(0);
            row.extend_from_slice(key.as_bytes());
            row.push(0);
            if entry.status() == EntryStatus::Deleted {
                row.push(1);
            } else {
                for field in &schema.value_fields {
                    row.extend_from_slice(field.as_bytes());
                    row.extend_from_slice(entry.get_field(field).unwrap_or_default());
                }
            }
            digest_input.extend_from_slice(&keccak256(&row));
        }
        H256(keccak256(&digest_input))
    }

    /// Bytes currently retained by the layer, keys included.
    pub fn capacity(&self) -> usize {
        self.lock_read().capacity
    }

    /// Number of rows written (not merely cached) since creation or the
    /// last rollback.
    pub fn dirty_row_count(&self) -> usize {
        let inner = self.lock_read();
        inner
            .tables
            .values()
            .flat_map(|t| t.rows.values())
            .filter(|e| matches!(e.status(), EntryStatus::Modified | EntryStatus::Deleted))
            .count()
    }

    /// Serializes created tables plus dirty rows for two-phase commit,
    /// rows in ascending `(table, key)` order.
    pub fn export_dirty(&self) -> DirtySet {
        let inner = self.lock_read();
        let mut created_tables = Vec::new();
        let mut rows = Vec::new();
        for (name, data) in &inner.tables {
            if data.created_here {
                created_tables.push((name.clone(), data.schema.clone()));
            }
            for (key, entry) in &data.rows {
                if matches!(entry.status(), EntryStatus::Modified | EntryStatus::Deleted) {
                    rows.push(DirtyRow {
                        table: name.clone(),
                        key: key.clone(),
                        entry: entry.clone(),
                    });
                }
            }
        }
        created_tables.sort_by(|a, b| a.0.cmp(&b.0));
        rows.sort_by(|a, b| (&a.table, &a.key).cmp(&(&b.table, &b.key)));
        DirtySet {
            created_tables,
            rows,
        }
    }

    /// Replays this layer's table creations and dirty rows onto `target`.
    pub async fn merge_into(&self, target: &StateStorage) -> Result<(), StoreError> {
        let dirty = self.export_dirty();
        for (name, schema) in dirty.created_tables {
            match target.create_table(&name, schema).await {
                Ok(()) | Err(StoreError::TableExists(_)) => {}
                Err(e) => return Err(e),
            }
        }
        for row in dirty.rows {
            target.set_row(&row.table, &row.key, row.entry).await?;
        }
        Ok(())
    }

    /// Folds a committed dirty set into this layer as clean cache rows:
    /// modified rows become `Normal` copies, deleted rows are dropped.
    /// Used by a long-lived cache layer to stay coherent after the
    /// backend commits a block underneath it.
    pub fn absorb_committed(&self, dirty: &DirtySet) {
        let mut inner = self.lock_write();
        let inner = &mut *inner;
        for (name, schema) in &dirty.created_tables {
            inner.tables.entry(name.clone()).or_insert(TableData {
                schema: schema.clone(),
                created_here: false,
                rows: FxHashMap::default(),
            });
        }
        for row in &dirty.rows {
            let Some(data) = inner.tables.get_mut(&row.table) else {
                continue;
            };
            let key_len = row.key.len();
            let old_size = data
                .rows
                .get(&row.key)
                .map(|e| key_len + e.size())
                .unwrap_or(0);
            match row.entry.status() {
                EntryStatus::Deleted | EntryStatus::Purged => {
                    data.rows.remove(&row.key);
                    inner.capacity = inner.capacity.saturating_sub(old_size);
                }
                _ => {
                    let mut entry = row.entry.clone();
                    entry.set_status(EntryStatus::Normal);
                    let new_size = key_len + entry.size();
                    data.rows.insert(row.key.clone(), entry);
                    inner.capacity =
                        (inner.capacity + new_size).saturating_sub(old_size);
                }
            }
        }
    }

    /// Evicts a clean cached row; used by the LRU worker. Returns the
    /// bytes freed (0 when the row was absent or dirty).
    pub(crate) fn purge_row(&self, table: &str, key: &str) -> usize {
        let mut inner = self.lock_write();
        let inner = &mut *inner;
        let Some(data) = inner.tables.get_mut(table) else {
            return 0;
        };
        match data.rows.get(key) {
            Some(entry) if entry.status() == EntryStatus::Normal => {
                let freed = key.len() + entry.size();
                data.rows.remove(key);
                inner.capacity = inner.capacity.saturating_sub(freed);
                freed
            }
            _ => 0,
        }
    }
}

#[async_trait]
impl StorageReader for StateStorage {
    async fn read_row(&self, table: &str, key: &str) -> Result<Option<Entry>, StoreError> {
        self.get_row(table, key).await
    }

    async fn read_rows(
        &self,
        table: &str,
        keys: &[String],
    ) -> Result<Vec<Option<Entry>>, StoreError> {
        self.get_rows(table, keys).await
    }

    async fn read_primary_keys(
        &self,
        table: &str,
        condition: Option<&KeyCondition>,
    ) -> Result<Vec<String>, StoreError> {
        self.get_primary_keys(table, condition).await
    }

    async fn read_schema(&self, name: &str) -> Result<Option<TableSchema>, StoreError> {
        self.open_table(name).await
    }
}
