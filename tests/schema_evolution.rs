//! # Schema Evolution Tests
//!
//! End-to-end coverage of reading, writing, scanning and migrating records
//! across layout versions:
//!
//! - columns added with defaults are visible on rows older than the column
//! - dropped columns disappear from newer layouts
//! - updates that touch a column the row's layout lacks migrate the row
//! - scans stitch every layout version together in version order
//! - conflicting writers are marked must-abort and roll back cleanly

use std::sync::Arc;

use strata::{
    BlockStore, Column, DataType, LayoutVersion, RecordId, Schema, SlotAccess, StoredExpr,
    Transaction, TransactionManager, Value, VersionedTable,
};

const A: u32 = 1;
const B: u32 = 2;
const C: u32 = 3;

fn schema_v0() -> Schema {
    Schema::new(vec![
        Column::new("a", A, DataType::Int4),
        Column::new("b", B, DataType::Int4),
    ])
    .unwrap()
}

fn schema_with_c_default(default: i64) -> Schema {
    Schema::new(vec![
        Column::new("a", A, DataType::Int4),
        Column::new("b", B, DataType::Int4),
        Column::new("c", C, DataType::Int4).with_default_value(Value::Int(default)),
    ])
    .unwrap()
}

fn setup() -> (VersionedTable, TransactionManager) {
    let store = Arc::new(BlockStore::new());
    let table = VersionedTable::new(Arc::clone(&store), schema_v0()).unwrap();
    let manager = TransactionManager::new(store);
    (table, manager)
}

fn insert_ab(table: &VersionedTable, txn: &mut Transaction<'_>, a: i32, b: i32) -> RecordId {
    let (init, map) = table.initializer_for_projected_row(&[A, B], 0).unwrap();
    let mut row = init.init_row();
    row.set_int4(map[&A], a);
    row.set_int4(map[&B], b);
    txn.stage_write(RecordId::INVALID, row);
    table.insert(txn, 0).unwrap()
}

fn select_abc(
    table: &VersionedTable,
    txn: &Transaction<'_>,
    record: RecordId,
    version: LayoutVersion,
) -> Option<(Option<i32>, Option<i32>, Option<i32>)> {
    let (init, map) = table
        .initializer_for_projected_row(&[A, B, C], version)
        .unwrap();
    let mut row = init.init_row();
    if !table.select(txn, record, &mut row, version).unwrap() {
        return None;
    }
    Some((
        row.get_int4(map[&A]),
        row.get_int4(map[&B]),
        row.get_int4(map[&C]),
    ))
}

#[test]
fn added_column_fills_from_default_on_old_rows() {
    let (table, manager) = setup();

    let mut writer = manager.begin();
    let records: Vec<RecordId> = (0..8)
        .map(|i| insert_ab(&table, &mut writer, i, i * 10))
        .collect();
    writer.commit().unwrap();

    let ddl = manager.begin();
    table
        .update_schema(&ddl, schema_with_c_default(15719), 1)
        .unwrap();
    ddl.commit().unwrap();

    let reader = manager.begin();
    for (i, &record) in records.iter().enumerate() {
        let (a, b, c) = select_abc(&table, &reader, record, 1).unwrap();
        assert_eq!(a, Some(i as i32));
        assert_eq!(b, Some(i as i32 * 10));
        assert_eq!(c, Some(15719));
    }
}

#[test]
fn added_column_without_default_reads_null() {
    let (table, manager) = setup();

    let mut writer = manager.begin();
    let record = insert_ab(&table, &mut writer, 1, 2);
    writer.commit().unwrap();

    let ddl = manager.begin();
    let schema = Schema::new(vec![
        Column::new("a", A, DataType::Int4),
        Column::new("b", B, DataType::Int4),
        Column::new("c", C, DataType::Int4),
    ])
    .unwrap();
    table.update_schema(&ddl, schema, 1).unwrap();
    ddl.commit().unwrap();

    let reader = manager.begin();
    let (a, b, c) = select_abc(&table, &reader, record, 1).unwrap();
    assert_eq!((a, b), (Some(1), Some(2)));
    assert_eq!(c, None);
}

#[test]
fn dropped_column_is_absent_from_newer_layouts() {
    let (table, manager) = setup();

    let mut writer = manager.begin();
    let record = insert_ab(&table, &mut writer, 7, 8);
    writer.commit().unwrap();

    let ddl = manager.begin();
    table
        .update_schema(&ddl, schema_with_c_default(15719), 1)
        .unwrap();
    // Version 2 drops c again.
    table.update_schema(&ddl, schema_v0(), 2).unwrap();
    ddl.commit().unwrap();

    assert!(!table.column_oid_to_id_map(2).unwrap().contains_key(&C));
    assert!(table.initializer_for_projected_row(&[C], 2).is_err());

    let reader = manager.begin();
    let (init, map) = table.initializer_for_projected_row(&[A, B], 2).unwrap();
    let mut row = init.init_row();
    assert!(table.select(&reader, record, &mut row, 2).unwrap());
    assert_eq!(row.get_int4(map[&A]), Some(7));
    assert_eq!(row.get_int4(map[&B]), Some(8));
}

#[test]
fn update_touching_new_column_migrates_the_record() {
    let (table, manager) = setup();

    let mut writer = manager.begin();
    let record = insert_ab(&table, &mut writer, 1, 2);
    writer.commit().unwrap();

    let ddl = manager.begin();
    table
        .update_schema(&ddl, schema_with_c_default(15719), 1)
        .unwrap();
    ddl.commit().unwrap();

    let mut updater = manager.begin();
    let (delta_init, delta_map) = table.initializer_for_projected_row(&[C], 1).unwrap();
    let mut delta = delta_init.init_row();
    delta.set_int4(delta_map[&C], 42);
    updater.stage_write(record, delta);
    let new_record = table.update(&mut updater, 1).unwrap().unwrap();
    assert_ne!(new_record, record);
    assert_eq!(updater.last_write_slot().unwrap(), new_record);
    updater.commit().unwrap();

    let reader = manager.begin();
    assert_eq!(
        select_abc(&table, &reader, new_record, 1),
        Some((Some(1), Some(2), Some(42)))
    );
    // The original record was deleted during migration.
    assert!(select_abc(&table, &reader, record, 1).is_none());
    assert_eq!(table.tuple_version(new_record).unwrap(), 1);
}

#[test]
fn update_of_existing_columns_stays_in_place_across_versions() {
    let (table, manager) = setup();

    let mut writer = manager.begin();
    let record = insert_ab(&table, &mut writer, 1, 2);
    writer.commit().unwrap();

    let ddl = manager.begin();
    table
        .update_schema(&ddl, schema_with_c_default(15719), 1)
        .unwrap();
    ddl.commit().unwrap();

    let mut updater = manager.begin();
    let (delta_init, delta_map) = table.initializer_for_projected_row(&[B], 1).unwrap();
    let mut delta = delta_init.init_row();
    delta.set_int4(delta_map[&B], 9);
    updater.stage_write(record, delta);
    let updated = table.update(&mut updater, 1).unwrap().unwrap();
    assert_eq!(updated, record);
    updater.commit().unwrap();

    let reader = manager.begin();
    assert_eq!(
        select_abc(&table, &reader, record, 1),
        Some((Some(1), Some(9), Some(15719)))
    );
    assert_eq!(table.tuple_version(record).unwrap(), 0);
}

#[test]
fn scan_stitches_versions_in_order() {
    let (table, manager) = setup();

    let mut writer = manager.begin();
    for i in 0..4 {
        insert_ab(&table, &mut writer, i, 0);
    }
    writer.commit().unwrap();

    let ddl = manager.begin();
    table
        .update_schema(&ddl, schema_with_c_default(1), 1)
        .unwrap();
    ddl.commit().unwrap();

    let mut writer = manager.begin();
    let (init, map) = table.initializer_for_projected_row(&[A, B, C], 1).unwrap();
    for i in 4..8 {
        let mut row = init.init_row();
        row.set_int4(map[&A], i);
        row.set_int4(map[&B], 0);
        row.set_int4(map[&C], i + 100);
        writer.stage_write(RecordId::INVALID, row);
        table.insert(&mut writer, 1).unwrap();
    }
    writer.commit().unwrap();

    // Scan at version 1 sees all eight rows; version-0 rows have the
    // default back-filled.
    let reader = manager.begin();
    let (batch_init, batch_map) = table
        .initializer_for_projected_columns(&[A, B, C], 3, 1)
        .unwrap();
    let mut batch = batch_init.init_columns();
    let mut cursor = table.begin();
    let mut seen = Vec::new();
    while !cursor.is_done(1) {
        table.scan(&reader, &mut cursor, &mut batch, 1).unwrap();
        for row in 0..batch.num_tuples() {
            let view = batch.row(row);
            seen.push((
                view.get_int4(batch_map[&A]).unwrap(),
                view.get_int4(batch_map[&C]).unwrap(),
            ));
        }
    }
    assert_eq!(seen.len(), 8);
    for (i, &(a, c)) in seen.iter().enumerate() {
        assert_eq!(a, i as i32);
        if i < 4 {
            assert_eq!(c, 1);
        } else {
            assert_eq!(c, i as i32 + 100);
        }
    }

    // Scan at version 0 sees only the four version-0 rows.
    let (batch_init, batch_map) = table
        .initializer_for_projected_columns(&[A, B], 16, 0)
        .unwrap();
    let mut batch = batch_init.init_columns();
    let mut cursor = table.begin();
    let mut count = 0;
    while !cursor.is_done(0) {
        table.scan(&reader, &mut cursor, &mut batch, 0).unwrap();
        for row in 0..batch.num_tuples() {
            assert!(batch.row(row).get_int4(batch_map[&A]).is_some());
            count += 1;
        }
    }
    assert_eq!(count, 4);
}

#[test]
fn nearest_forward_default_wins_over_later_redefault() {
    let (table, manager) = setup();

    let mut writer = manager.begin();
    let record = insert_ab(&table, &mut writer, 1, 2);
    writer.commit().unwrap();

    let ddl = manager.begin();
    table
        .update_schema(&ddl, schema_with_c_default(10), 1)
        .unwrap();
    table
        .update_schema(&ddl, schema_with_c_default(20), 2)
        .unwrap();
    ddl.commit().unwrap();

    let reader = manager.begin();
    let (_, _, c) = select_abc(&table, &reader, record, 2).unwrap();
    assert_eq!(c, Some(10));
}

#[test]
fn non_constant_default_surfaces_as_error() {
    let (table, manager) = setup();

    let mut writer = manager.begin();
    let record = insert_ab(&table, &mut writer, 1, 2);
    writer.commit().unwrap();

    let ddl = manager.begin();
    let schema = Schema::new(vec![
        Column::new("a", A, DataType::Int4),
        Column::new("b", B, DataType::Int4),
        Column::new("c", C, DataType::Timestamp)
            .with_default(StoredExpr::FunctionCall("now".into())),
    ])
    .unwrap();
    table.update_schema(&ddl, schema, 1).unwrap();
    ddl.commit().unwrap();

    let reader = manager.begin();
    let (init, _) = table.initializer_for_projected_row(&[A, B, C], 1).unwrap();
    let mut row = init.init_row();
    let err = table.select(&reader, record, &mut row, 1).unwrap_err();
    assert!(err.to_string().contains("unsupported default"));
}

#[test]
fn widened_column_reads_zero_extended() {
    let store = Arc::new(BlockStore::new());
    let narrow = Schema::new(vec![Column::new("a", A, DataType::Int2)]).unwrap();
    let table = VersionedTable::new(Arc::clone(&store), narrow).unwrap();
    let manager = TransactionManager::new(store);

    let mut writer = manager.begin();
    let (init, map) = table.initializer_for_projected_row(&[A], 0).unwrap();
    let mut row = init.init_row();
    row.set_int2(map[&A], 0x1234);
    writer.stage_write(RecordId::INVALID, row);
    let record = table.insert(&mut writer, 0).unwrap();
    writer.commit().unwrap();

    let ddl = manager.begin();
    let wide = Schema::new(vec![Column::new("a", A, DataType::Int4)]).unwrap();
    table.update_schema(&ddl, wide, 1).unwrap();
    ddl.commit().unwrap();

    let reader = manager.begin();
    let (init, map) = table.initializer_for_projected_row(&[A], 1).unwrap();
    let mut row = init.init_row();
    assert!(table.select(&reader, record, &mut row, 1).unwrap());
    assert_eq!(row.get_int4(map[&A]), Some(0x1234));
}

#[test]
fn conflicting_update_marks_must_abort_and_rolls_back() {
    let (table, manager) = setup();

    let mut writer = manager.begin();
    let record = insert_ab(&table, &mut writer, 1, 2);
    writer.commit().unwrap();

    let (delta_init, delta_map) = table.initializer_for_projected_row(&[B], 0).unwrap();

    let mut first = manager.begin();
    let mut delta = delta_init.init_row();
    delta.set_int4(delta_map[&B], 100);
    first.stage_write(record, delta);
    assert!(table.update(&mut first, 0).unwrap().is_some());

    let mut second = manager.begin();
    let mut delta = delta_init.init_row();
    delta.set_int4(delta_map[&B], 200);
    second.stage_write(record, delta);
    assert!(table.update(&mut second, 0).unwrap().is_none());
    assert!(second.must_abort());
    assert!(second.commit().is_err());

    first.commit().unwrap();
    let reader = manager.begin();
    let (init, map) = table.initializer_for_projected_row(&[A, B], 0).unwrap();
    let mut row = init.init_row();
    assert!(table.select(&reader, record, &mut row, 0).unwrap());
    assert_eq!(row.get_int4(map[&B]), Some(100));
}

#[test]
fn delete_via_staged_record_hides_row() {
    let (table, manager) = setup();

    let mut writer = manager.begin();
    let record = insert_ab(&table, &mut writer, 5, 6);
    writer.commit().unwrap();

    let mut deleter = manager.begin();
    deleter.stage_delete(record);
    assert!(table.delete(&mut deleter).unwrap());
    deleter.commit().unwrap();

    let reader = manager.begin();
    let (init, _) = table.initializer_for_projected_row(&[A, B], 0).unwrap();
    let mut row = init.init_row();
    assert!(!table.select(&reader, record, &mut row, 0).unwrap());
}

#[test]
fn transaction_reads_its_own_uncommitted_writes() {
    let (table, manager) = setup();

    let mut txn = manager.begin();
    let record = insert_ab(&table, &mut txn, 3, 4);

    let (init, map) = table.initializer_for_projected_row(&[A, B], 0).unwrap();
    let mut row = init.init_row();
    assert!(table.select(&txn, record, &mut row, 0).unwrap());
    assert_eq!(row.get_int4(map[&A]), Some(3));

    // Invisible to a concurrent snapshot.
    let other = manager.begin();
    let mut other_row = init.init_row();
    assert!(!table.select(&other, record, &mut other_row, 0).unwrap());
}

#[test]
fn aborted_insert_leaves_no_visible_record() {
    let (table, manager) = setup();

    let mut writer = manager.begin();
    let record = insert_ab(&table, &mut writer, 1, 1);
    writer.rollback().unwrap();

    let reader = manager.begin();
    let (init, _) = table.initializer_for_projected_row(&[A, B], 0).unwrap();
    let mut row = init.init_row();
    assert!(!table.select(&reader, record, &mut row, 0).unwrap());
}

#[test]
fn concurrent_writers_insert_into_disjoint_slots() {
    let (table, manager) = setup();

    std::thread::scope(|s| {
        let table = &table;
        let manager = &manager;
        let handles: Vec<_> = (0..4)
            .map(|t| {
                s.spawn(move || {
                    let mut txn = manager.begin();
                    let records: Vec<RecordId> = (0..25)
                        .map(|i| insert_ab(table, &mut txn, t, i))
                        .collect();
                    txn.commit().unwrap();
                    records
                })
            })
            .collect();

        let mut all: Vec<RecordId> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort_by_key(|r| (r.block, r.slot));
        all.dedup();
        assert_eq!(all.len(), 100);
    });

    let reader = manager.begin();
    let (batch_init, _) = table
        .initializer_for_projected_columns(&[A, B], 32, 0)
        .unwrap();
    let mut batch = batch_init.init_columns();
    let mut cursor = table.begin();
    let mut count = 0;
    while !cursor.is_done(0) {
        table.scan(&reader, &mut cursor, &mut batch, 0).unwrap();
        count += batch.num_tuples();
    }
    assert_eq!(count, 100);
}

#[test]
fn version_skew_is_a_caller_error() {
    let (table, manager) = setup();

    let ddl = manager.begin();
    table
        .update_schema(&ddl, schema_with_c_default(1), 1)
        .unwrap();
    ddl.commit().unwrap();

    let mut writer = manager.begin();
    let (init, map) = table.initializer_for_projected_row(&[A, B, C], 1).unwrap();
    let mut row = init.init_row();
    row.set_int4(map[&A], 1);
    writer.stage_write(RecordId::INVALID, row);
    let record = table.insert(&mut writer, 1).unwrap();
    writer.commit().unwrap();

    // Reading a version-1 record at version 0 is caller misbehavior.
    let reader = manager.begin();
    let (init, _) = table.initializer_for_projected_row(&[A, B], 0).unwrap();
    let mut row = init.init_row();
    let err = table.select(&reader, record, &mut row, 0).unwrap_err();
    assert!(err.to_string().contains("version skew"));
}
