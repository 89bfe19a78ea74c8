//! # Versioned Tables
//!
//! A [`VersionedTable`] presents one logical table whose schema evolves
//! through immutable layout versions. Each version owns a data table; a
//! record lives in the data table of the version it was written under until
//! an update forces it forward. Readers at a newer version see older
//! records through header translation and default back-fill:
//!
//! ```text
//!  caller header (desired version ids)
//!        │ translate: id -> oid -> id, absent -> IGNORE
//!        ▼
//!  tuple-version header ──> data table of the record's version
//!        │ restore from scratch
//!        ▼
//!  caller header, missing positions filled from forward defaults
//! ```
//!
//! ## Migration
//!
//! An update whose delta touches a column the record's version does not
//! have cannot be applied in place. The record is migrated: materialized in
//! full at the desired version (defaults included), deleted from its old
//! data table, and re-inserted into the desired version's data table. The
//! delete precedes the insert so the record's version chains stay acyclic,
//! and both land in the transaction's write stream in that order. The
//! caller observes the fresh record id.
//!
//! ## Registry concurrency
//!
//! The version registry is a fixed-capacity slot array: readers snapshot
//! the version count with an acquire load and never lock; the single
//! catalog-serialized schema writer initializes a slot, then publishes the
//! new count with a release store.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use eyre::{bail, ensure, eyre, Result};
use hashbrown::HashMap;
use parking_lot::Mutex;
use smallvec::SmallVec;
use tracing::debug;

use crate::mvcc::transaction::{RedoRecord, Transaction};
use crate::records::layout::{build_layout, BlockLayout, ColumnMap, VARLEN_ATTR_SIZE};
use crate::records::projection::{
    ProjectedColumns, ProjectedColumnsInitializer, ProjectedRow, ProjectedRowInitializer,
    Projection, ProjectionMap, RowWriter, SlotAccess,
};
use crate::records::row::resize_low_order;
use crate::records::schema::{Schema, StoredExpr};
use crate::records::{ColumnId, ColumnOid, IGNORE_COLUMN_ID, VERSION_POINTER_COLUMN_ID};
use crate::storage::block::{BlockStore, RecordId};
use crate::storage::data_table::{AttrSizeMap, DataTable, SlotCursor};

/// Monotonically increasing layout version id; dense from zero.
pub type LayoutVersion = u16;

/// Fixed capacity of every table's version registry.
pub const MAX_LAYOUT_VERSIONS: usize = 64;

type MissingCols = SmallVec<[(usize, ColumnOid); 8]>;

/// Everything one layout version needs to reach its storage: the data
/// table, the block layout, the oid/id maps, and the declared defaults.
struct TableVersion {
    version: LayoutVersion,
    data_table: DataTable,
    layout: BlockLayout,
    column_map: ColumnMap,
    defaults: HashMap<ColumnOid, StoredExpr>,
    schema: Schema,
}

/// Table-level scan position: a layout version and a slot cursor within
/// that version's data table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanCursor {
    pub version: LayoutVersion,
    pub slots: SlotCursor,
}

impl ScanCursor {
    /// True once the cursor has passed the last data table a scan at
    /// `desired` would visit.
    pub fn is_done(&self, desired: LayoutVersion) -> bool {
        self.version > desired
    }
}

pub struct VersionedTable {
    store: Arc<BlockStore>,
    versions: Box<[OnceLock<TableVersion>]>,
    num_versions: AtomicUsize,
    schema_lock: Mutex<()>,
}

impl VersionedTable {
    /// Create the table with its initial schema as layout version 0.
    pub fn new(store: Arc<BlockStore>, schema: Schema) -> Result<Self> {
        let versions = (0..MAX_LAYOUT_VERSIONS)
            .map(|_| OnceLock::new())
            .collect::<Vec<_>>()
            .into_boxed_slice();
        let table = Self {
            store,
            versions,
            num_versions: AtomicUsize::new(0),
            schema_lock: Mutex::new(()),
        };
        table.register(schema, 0)?;
        Ok(table)
    }

    /// Register a fresh schema as the next layout version. Serialization of
    /// concurrent schema changes belongs to the catalog; the single winner
    /// calls this. Fails without side effects when the registry is full.
    pub fn update_schema(
        &self,
        txn: &Transaction<'_>,
        schema: Schema,
        version: LayoutVersion,
    ) -> Result<()> {
        debug!(txn = txn.id(), version, "schema update");
        self.register(schema, version)
    }

    pub fn version_count(&self) -> usize {
        self.num_versions.load(Ordering::Acquire)
    }

    pub fn latest_version(&self) -> LayoutVersion {
        (self.version_count() - 1) as LayoutVersion
    }

    pub fn oldest_version(&self) -> LayoutVersion {
        0
    }

    /// The layout version the record was physically written under.
    pub fn tuple_version(&self, record: RecordId) -> Result<LayoutVersion> {
        self.store.tuple_version(record)
    }

    /// Materialize one record into `out`, whose header is expressed in
    /// `version`'s column ids. Returns `false` when the record is not
    /// visible to `txn`.
    pub fn select(
        &self,
        txn: &Transaction<'_>,
        record: RecordId,
        out: &mut ProjectedRow,
        version: LayoutVersion,
    ) -> Result<bool> {
        let tuple_version = self.tuple_version(record)?;
        ensure!(
            tuple_version <= version,
            "version skew: record written under {tuple_version} read at {version}"
        );
        let desired = self.version_ref(version)?;
        if tuple_version == version {
            return desired.data_table.select(txn, record, out, None);
        }

        let tuple = self.version_ref(tuple_version)?;
        let mut scratch: SmallVec<[ColumnId; 16]> =
            SmallVec::from_elem(IGNORE_COLUMN_ID, out.num_columns());
        let (missing, size_map) = align_header(out, &mut scratch, tuple, desired)?;
        let visible = tuple.data_table.select(txn, record, out, Some(&size_map))?;
        restore_header(out, &scratch);
        if visible {
            self.fill_missing(out, &missing, tuple_version, version)?;
        }
        Ok(visible)
    }

    /// Apply the staged write (the redo buffer's last record) as an update.
    ///
    /// Returns the record's id after the operation: unchanged for an
    /// in-place update, fresh when the update migrated the record into
    /// `version`'s data table. `None` means the underlying store refused
    /// the write and the transaction is marked must-abort. The staged redo
    /// record is updated with the final id either way.
    pub fn update(
        &self,
        txn: &mut Transaction<'_>,
        version: LayoutVersion,
    ) -> Result<Option<RecordId>> {
        let (slot, mut delta) = txn.take_staged_write()?;
        let outcome = self.update_inner(txn, slot, &mut delta, version);
        match &outcome {
            Ok(Some(new_slot)) => txn.restage(*new_slot, delta),
            _ => txn.restage(slot, delta),
        }
        outcome
    }

    fn update_inner(
        &self,
        txn: &mut Transaction<'_>,
        slot: RecordId,
        delta: &mut ProjectedRow,
        version: LayoutVersion,
    ) -> Result<Option<RecordId>> {
        ensure!(slot.is_valid(), "staged update must name an existing record");
        let tuple_version = self.tuple_version(slot)?;
        ensure!(
            tuple_version <= version,
            "version skew: record written under {tuple_version} updated at {version}"
        );
        let desired = self.version_ref(version)?;
        if tuple_version == version {
            if !desired.data_table.update(txn, slot, delta)? {
                txn.set_must_abort();
                return Ok(None);
            }
            return Ok(Some(slot));
        }

        let tuple = self.version_ref(tuple_version)?;
        let mut scratch: SmallVec<[ColumnId; 16]> =
            SmallVec::from_elem(IGNORE_COLUMN_ID, delta.num_columns());
        let (missing, _size_map) = align_header(delta, &mut scratch, tuple, desired)?;

        if missing.is_empty() {
            // The delta only touches columns the record's version already
            // has; apply it in place in the old data table.
            let applied = tuple.data_table.update(txn, slot, delta)?;
            restore_header(delta, &scratch);
            if !applied {
                txn.set_must_abort();
                return Ok(None);
            }
            return Ok(Some(slot));
        }
        restore_header(delta, &scratch);

        // Migrate: materialize in full at the desired version, delete from
        // the old data table, overlay the delta, insert into the new one.
        let all_oids = desired.schema.oids();
        let (initializer, _) = self.initializer_for_projected_row(&all_oids, version)?;
        let mut full = initializer.init_row();
        if !self.select(txn, slot, &mut full, version)? {
            txn.set_must_abort();
            return Ok(None);
        }
        if !tuple.data_table.delete(txn, slot)? {
            txn.set_must_abort();
            return Ok(None);
        }
        for (pos, &id) in delta.col_ids().iter().enumerate() {
            let full_pos = full
                .col_ids()
                .binary_search(&id)
                .map_err(|_| eyre!("delta column id {id} missing from full projection"))?;
            match delta.value(pos) {
                Some(bytes) => full.set_value(full_pos, bytes),
                None => full.set_null(full_pos),
            }
        }
        let new_slot = desired.data_table.insert(txn, &full)?;
        Ok(Some(new_slot))
    }

    /// Apply the staged write as an insert into `version`'s data table.
    /// The staged record must not carry a record id yet; the assigned id is
    /// written back into it and returned.
    pub fn insert(&self, txn: &mut Transaction<'_>, version: LayoutVersion) -> Result<RecordId> {
        let (slot, delta) = txn.take_staged_write()?;
        if slot.is_valid() {
            txn.restage(slot, delta);
            bail!("staged insert must not carry a record id");
        }
        let desired = match self.version_ref(version) {
            Ok(v) => v,
            Err(err) => {
                txn.restage(slot, delta);
                return Err(err);
            }
        };
        match desired.data_table.insert(txn, &delta) {
            Ok(new_slot) => {
                txn.restage(new_slot, delta);
                Ok(new_slot)
            }
            Err(err) => {
                txn.restage(slot, delta);
                Err(err)
            }
        }
    }

    /// Delete the record named by the staged delete. Always targets the
    /// record's own version; the desired version plays no part.
    pub fn delete(&self, txn: &mut Transaction<'_>) -> Result<bool> {
        let slot = match txn.last_redo() {
            Some(RedoRecord::Delete { slot }) => *slot,
            _ => bail!("stage_delete must be called immediately before delete"),
        };
        ensure!(slot.is_valid(), "staged delete must name an existing record");
        let tuple_version = self.tuple_version(slot)?;
        let tuple = self.version_ref(tuple_version)?;
        let deleted = tuple.data_table.delete(txn, slot)?;
        if !deleted {
            txn.set_must_abort();
        }
        Ok(deleted)
    }

    /// A cursor at the first slot of the oldest data table.
    pub fn begin(&self) -> ScanCursor {
        ScanCursor {
            version: 0,
            slots: SlotCursor::default(),
        }
    }

    /// Fill `out` with visible records from the cursor onward, walking data
    /// tables in version order up to `version`. The batch is cleared first;
    /// the cursor ends one past the last record consumed.
    ///
    /// Records are delivered in (version, block order) order. A record that
    /// migrates mid-scan may be seen twice or not at all; scans that need a
    /// stable answer start from [`VersionedTable::begin`].
    pub fn scan(
        &self,
        txn: &Transaction<'_>,
        cursor: &mut ScanCursor,
        out: &mut ProjectedColumns,
        version: LayoutVersion,
    ) -> Result<()> {
        let desired = self.version_ref(version)?;
        out.reset();
        while cursor.version <= version {
            let v = cursor.version;
            let tuple = self.version_ref(v)?;
            if v == version {
                tuple.data_table.scan(txn, &mut cursor.slots, out, None)?;
            } else {
                let mut scratch: SmallVec<[ColumnId; 16]> =
                    SmallVec::from_elem(IGNORE_COLUMN_ID, out.num_columns());
                let first_new = out.num_tuples();
                let (missing, size_map) = align_header(out, &mut scratch, tuple, desired)?;
                tuple
                    .data_table
                    .scan(txn, &mut cursor.slots, out, Some(&size_map))?;
                restore_header(out, &scratch);
                if !missing.is_empty() {
                    for row in first_new..out.num_tuples() {
                        let mut writer = out.row_mut(row);
                        self.fill_missing(&mut writer, &missing, v, version)?;
                    }
                }
            }
            if out.is_full() {
                return Ok(());
            }
            cursor.version += 1;
            cursor.slots = SlotCursor::default();
        }
        Ok(())
    }

    /// Translate logical column oids into a row initializer over `version`'s
    /// physical ids, plus the oid-to-position map for the resulting shape.
    pub fn initializer_for_projected_row(
        &self,
        col_oids: &[ColumnOid],
        version: LayoutVersion,
    ) -> Result<(ProjectedRowInitializer, ProjectionMap)> {
        let tv = self.version_ref(version)?;
        let ids = col_ids_for_oids(tv, col_oids)?;
        let initializer = ProjectedRowInitializer::new(&tv.layout, ids)?;
        let map = projection_map_from_ids(tv, initializer.col_ids())?;
        Ok((initializer, map))
    }

    /// Batch counterpart of [`VersionedTable::initializer_for_projected_row`].
    pub fn initializer_for_projected_columns(
        &self,
        col_oids: &[ColumnOid],
        max_tuples: usize,
        version: LayoutVersion,
    ) -> Result<(ProjectedColumnsInitializer, ProjectionMap)> {
        let tv = self.version_ref(version)?;
        let ids = col_ids_for_oids(tv, col_oids)?;
        let initializer = ProjectedColumnsInitializer::new(&tv.layout, ids, max_tuples)?;
        let map = projection_map_from_ids(tv, initializer.col_ids())?;
        Ok((initializer, map))
    }

    pub fn projection_map_for_oids(
        &self,
        col_oids: &[ColumnOid],
        version: LayoutVersion,
    ) -> Result<ProjectionMap> {
        let tv = self.version_ref(version)?;
        let mut ids = col_ids_for_oids(tv, col_oids)?;
        ids.sort_unstable();
        projection_map_from_ids(tv, &ids)
    }

    pub fn block_layout(&self, version: LayoutVersion) -> Result<&BlockLayout> {
        Ok(&self.version_ref(version)?.layout)
    }

    pub fn column_oid_to_id_map(
        &self,
        version: LayoutVersion,
    ) -> Result<&HashMap<ColumnOid, ColumnId>> {
        Ok(self.version_ref(version)?.column_map.oid_to_id())
    }

    pub fn column_id_to_oid_map(
        &self,
        version: LayoutVersion,
    ) -> Result<&HashMap<ColumnId, ColumnOid>> {
        Ok(self.version_ref(version)?.column_map.id_to_oid())
    }

    pub fn schema(&self, version: LayoutVersion) -> Result<&Schema> {
        Ok(&self.version_ref(version)?.schema)
    }

    fn version_ref(&self, version: LayoutVersion) -> Result<&TableVersion> {
        let count = self.num_versions.load(Ordering::Acquire);
        ensure!(
            (version as usize) < count,
            "unknown layout version {version}"
        );
        self.versions[version as usize]
            .get()
            .ok_or_else(|| eyre!("layout version {version} not initialized"))
    }

    fn register(&self, schema: Schema, version: LayoutVersion) -> Result<()> {
        let _guard = self.schema_lock.lock();
        let count = self.num_versions.load(Ordering::Relaxed);
        ensure!(
            count < MAX_LAYOUT_VERSIONS,
            "layout version capacity ({MAX_LAYOUT_VERSIONS}) reached"
        );
        ensure!(
            version as usize == count,
            "layout version {version} is not the next version (expected {count})"
        );

        let (layout, column_map) = build_layout(&schema)?;
        let mut defaults = HashMap::new();
        for col in schema.columns() {
            if let Some(expr) = col.default() {
                defaults.insert(col.oid(), expr.clone());
            }
        }
        debug!(version, columns = schema.column_count(), "registered layout version");
        let data_table = DataTable::new(Arc::clone(&self.store), layout.clone(), version);
        let entry = TableVersion {
            version,
            data_table,
            layout,
            column_map,
            defaults,
            schema,
        };
        if self.versions[count].set(entry).is_err() {
            bail!("layout version slot {count} already initialized");
        }
        self.num_versions.store(count + 1, Ordering::Release);
        Ok(())
    }

    /// Fill positions absent from the record's version with the nearest
    /// forward default: the first version after the record's own, up to the
    /// desired one, that declares a default for the column. Positions with
    /// no such default stay NULL.
    fn fill_missing<W: RowWriter>(
        &self,
        out: &mut W,
        missing: &MissingCols,
        tuple_version: LayoutVersion,
        desired_version: LayoutVersion,
    ) -> Result<()> {
        if missing.is_empty() {
            return Ok(());
        }
        let desired = self.version_ref(desired_version)?;
        'columns: for &(pos, oid) in missing {
            for v in (tuple_version + 1)..=desired_version {
                let tv = self.version_ref(v)?;
                let Some(expr) = tv.defaults.get(&oid) else {
                    continue;
                };
                let StoredExpr::Constant(value) = expr else {
                    bail!("unsupported default for column oid {oid}: only constants can back-fill");
                };
                let column = tv
                    .schema
                    .column_by_oid(oid)
                    .ok_or_else(|| eyre!("default declared for unknown column oid {oid}"))?;
                match value.encode(column.data_type())? {
                    Some(bytes) => {
                        let id = desired
                            .column_map
                            .id_for(oid)
                            .ok_or_else(|| eyre!("missing column oid {oid} not in desired layout"))?;
                        let wanted = desired.layout.attr_size(id);
                        if wanted == VARLEN_ATTR_SIZE || bytes.len() == wanted as usize {
                            out.set_value(pos, &bytes);
                        } else {
                            out.set_value(pos, &resize_low_order(&bytes, wanted as usize));
                        }
                    }
                    None => out.set_null(pos),
                }
                continue 'columns;
            }
            out.set_null(pos);
        }
        Ok(())
    }
}

/// Rewrite the header from desired-version ids to tuple-version ids,
/// stashing the original in `scratch`. Returns the positions whose columns
/// the tuple's version lacks, and the width overrides for columns whose
/// stored width differs.
fn align_header<P: Projection>(
    out: &mut P,
    scratch: &mut [ColumnId],
    tuple: &TableVersion,
    desired: &TableVersion,
) -> Result<(MissingCols, AttrSizeMap)> {
    scratch.copy_from_slice(out.header());
    let mut missing = MissingCols::new();
    let mut size_map = AttrSizeMap::new();
    for pos in 0..out.header().len() {
        let id = out.header()[pos];
        ensure!(
            id != VERSION_POINTER_COLUMN_ID,
            "projection header must not name the version pointer column"
        );
        ensure!(
            id != IGNORE_COLUMN_ID,
            "projection header already contains an ignored position"
        );
        let oid = desired
            .column_map
            .oid_for(id)
            .ok_or_else(|| eyre!("column id {id} not in layout version {}", desired.version))?;
        match tuple.column_map.id_for(oid) {
            Some(tuple_id) => {
                out.header_mut()[pos] = tuple_id;
                let stored = tuple.layout.attr_size(tuple_id);
                let wanted = desired.layout.attr_size(id);
                if stored != wanted {
                    ensure!(
                        stored != VARLEN_ATTR_SIZE && wanted != VARLEN_ATTR_SIZE,
                        "column oid {oid} changed storage class between versions"
                    );
                    size_map.insert(tuple_id, wanted);
                }
            }
            None => {
                out.header_mut()[pos] = IGNORE_COLUMN_ID;
                missing.push((pos, oid));
            }
        }
    }
    Ok((missing, size_map))
}

fn restore_header<P: Projection>(out: &mut P, scratch: &[ColumnId]) {
    out.header_mut().copy_from_slice(scratch);
}

fn col_ids_for_oids(tv: &TableVersion, col_oids: &[ColumnOid]) -> Result<Vec<ColumnId>> {
    ensure!(!col_oids.is_empty(), "projection needs at least one column");
    let mut ids = Vec::with_capacity(col_oids.len());
    for &oid in col_oids {
        let id = tv.column_map.id_for(oid).ok_or_else(|| {
            eyre!(
                "column oid {oid} not present in layout version {}",
                tv.version
            )
        })?;
        ids.push(id);
    }
    let mut deduped = ids.clone();
    deduped.sort_unstable();
    deduped.dedup();
    ensure!(
        deduped.len() == ids.len(),
        "duplicate column oids in projection"
    );
    Ok(ids)
}

fn projection_map_from_ids(tv: &TableVersion, sorted_ids: &[ColumnId]) -> Result<ProjectionMap> {
    let mut map = ProjectionMap::with_capacity(sorted_ids.len());
    for (pos, &id) in sorted_ids.iter().enumerate() {
        let oid = tv.column_map.oid_for(id).ok_or_else(|| {
            eyre!("column id {id} has no oid in layout version {}", tv.version)
        })?;
        map.insert(oid, pos);
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mvcc::TransactionManager;
    use crate::records::schema::Column;
    use crate::records::types::DataType;
    use crate::types::Value;

    fn two_int_schema() -> Schema {
        Schema::new(vec![
            Column::new("a", 1, DataType::Int4),
            Column::new("b", 2, DataType::Int4),
        ])
        .unwrap()
    }

    fn setup() -> (Arc<BlockStore>, VersionedTable, TransactionManager) {
        let store = Arc::new(BlockStore::new());
        let table = VersionedTable::new(Arc::clone(&store), two_int_schema()).unwrap();
        let mgr = TransactionManager::new(Arc::clone(&store));
        (store, table, mgr)
    }

    #[test]
    fn registry_starts_with_version_zero() {
        let (_, table, _) = setup();
        assert_eq!(table.version_count(), 1);
        assert_eq!(table.oldest_version(), 0);
        assert_eq!(table.latest_version(), 0);
        assert!(table.block_layout(0).is_ok());
        assert!(table.block_layout(1).is_err());
    }

    #[test]
    fn register_rejects_gapped_versions() {
        let (_, table, mgr) = setup();
        let txn = mgr.begin();
        let err = table
            .update_schema(&txn, two_int_schema(), 5)
            .unwrap_err();
        assert!(err.to_string().contains("not the next version"));
        assert_eq!(table.version_count(), 1);
    }

    #[test]
    fn oid_id_maps_are_inverse_bijections() {
        let (_, table, _) = setup();
        let oid_to_id = table.column_oid_to_id_map(0).unwrap();
        let id_to_oid = table.column_id_to_oid_map(0).unwrap();
        assert_eq!(oid_to_id.len(), 2);
        for (&oid, &id) in oid_to_id {
            assert_eq!(id_to_oid.get(&id), Some(&oid));
        }
    }

    #[test]
    fn projection_map_orders_by_physical_id() {
        let (_, table, _) = setup();
        let map = table.projection_map_for_oids(&[2, 1], 0).unwrap();
        // Both int4 columns: ids follow schema order, so oid 1 sorts first.
        assert_eq!(map[&1], 0);
        assert_eq!(map[&2], 1);
    }

    #[test]
    fn initializer_rejects_unknown_and_duplicate_oids() {
        let (_, table, _) = setup();
        assert!(table.initializer_for_projected_row(&[9], 0).is_err());
        assert!(table.initializer_for_projected_row(&[1, 1], 0).is_err());
        assert!(table.initializer_for_projected_row(&[], 0).is_err());
    }

    #[test]
    fn header_translation_round_trips() {
        let (_, table, mgr) = setup();
        let txn = mgr.begin();
        let schema_v1 = Schema::new(vec![
            Column::new("a", 1, DataType::Int4),
            Column::new("b", 2, DataType::Int4),
            Column::new("c", 3, DataType::Int4).with_default_value(Value::Int(5)),
        ])
        .unwrap();
        table.update_schema(&txn, schema_v1, 1).unwrap();

        let (initializer, _) = table.initializer_for_projected_row(&[1, 2, 3], 1).unwrap();
        let mut row = initializer.init_row();
        let original = row.col_ids().to_vec();

        let tuple = table.version_ref(0).unwrap();
        let desired = table.version_ref(1).unwrap();
        let mut scratch: SmallVec<[ColumnId; 16]> =
            SmallVec::from_elem(IGNORE_COLUMN_ID, row.num_columns());
        let (missing, size_map) = align_header(&mut row, &mut scratch, tuple, desired).unwrap();

        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].1, 3);
        assert!(size_map.is_empty());
        assert!(row.col_ids().contains(&IGNORE_COLUMN_ID));

        restore_header(&mut row, &scratch);
        assert_eq!(row.col_ids(), original.as_slice());
    }

    #[test]
    fn capacity_refusal_leaves_registry_unchanged() {
        let (_, table, mgr) = setup();
        let txn = mgr.begin();
        for v in 1..MAX_LAYOUT_VERSIONS {
            table
                .update_schema(&txn, two_int_schema(), v as LayoutVersion)
                .unwrap();
        }
        assert_eq!(table.version_count(), MAX_LAYOUT_VERSIONS);

        let err = table
            .update_schema(&txn, two_int_schema(), MAX_LAYOUT_VERSIONS as LayoutVersion)
            .unwrap_err();
        assert!(err.to_string().contains("capacity"));
        assert_eq!(table.version_count(), MAX_LAYOUT_VERSIONS);
        assert_eq!(table.latest_version(), (MAX_LAYOUT_VERSIONS - 1) as LayoutVersion);
    }

    #[test]
    fn concurrent_readers_never_observe_torn_versions() {
        let (_, table, mgr) = setup();
        let txn = mgr.begin();
        std::thread::scope(|s| {
            let table = &table;
            let mut handles = Vec::new();
            for _ in 0..4 {
                handles.push(s.spawn(move || {
                    for _ in 0..1000 {
                        let latest = table.latest_version();
                        // Every published version must be fully usable.
                        table.block_layout(latest).unwrap();
                        table.column_oid_to_id_map(latest).unwrap();
                    }
                }));
            }
            for v in 1..MAX_LAYOUT_VERSIONS {
                table
                    .update_schema(&txn, two_int_schema(), v as LayoutVersion)
                    .unwrap();
            }
            for handle in handles {
                handle.join().unwrap();
            }
        });
        assert_eq!(table.version_count(), MAX_LAYOUT_VERSIONS);
    }

    #[test]
    fn update_schema_rejects_unsupported_widths() {
        let (_, table, mgr) = setup();
        let txn = mgr.begin();
        let schema = Schema::new(vec![Column::new("u", 1, DataType::Uuid)]).unwrap();
        let err = table.update_schema(&txn, schema, 1).unwrap_err();
        assert!(err.to_string().contains("unsupported attribute size"));
        assert_eq!(table.version_count(), 1);
    }
}
