//! # Projection Buffers
//!
//! A projection buffer is an ordered list of physical column ids (the
//! *header*) plus backing memory for the materialized values. The header is
//! built against one layout version; the storage layer rewrites it in place
//! to a tuple's actual version before delegating a read or write, then
//! restores it from a scratch copy.
//!
//! Two shapes exist:
//!
//! - [`ProjectedRow`] — a single tuple; also the delta format staged in redo
//!   records.
//! - [`ProjectedColumns`] — a batch of up to `max_tuples` tuples sharing one
//!   header, filled incrementally by scans.
//!
//! Values are owned, little-endian bytes. A position holding
//! [`IGNORE_COLUMN_ID`] is skipped by the record store and left NULL.

use eyre::{ensure, Result};
use hashbrown::HashMap;
use smallvec::SmallVec;

use crate::records::layout::BlockLayout;
use crate::records::{ColumnId, ColumnOid};

pub type ProjectionMap = HashMap<ColumnOid, usize>;

type Slot = SmallVec<[u8; 16]>;

/// Header access shared by both buffer shapes; the translator works through
/// this seam.
pub trait Projection {
    fn num_columns(&self) -> usize;
    fn header(&self) -> &[ColumnId];
    fn header_mut(&mut self) -> &mut [ColumnId];
}

/// Write access to one row's slots; the record store and the default filler
/// work through this seam.
pub trait RowWriter {
    fn header(&self) -> &[ColumnId];
    fn set_null(&mut self, pos: usize);
    fn set_value(&mut self, pos: usize, bytes: &[u8]);
}

/// Read access to one row's slots, with typed decoders.
pub trait SlotAccess {
    fn value(&self, pos: usize) -> Option<&[u8]>;

    fn is_null(&self, pos: usize) -> bool {
        self.value(pos).is_none()
    }

    fn get_bool(&self, pos: usize) -> Option<bool> {
        self.value(pos).map(|b| b != [0])
    }

    fn get_int2(&self, pos: usize) -> Option<i16> {
        self.value(pos)
            .and_then(|b| b.try_into().ok())
            .map(i16::from_le_bytes)
    }

    fn get_int4(&self, pos: usize) -> Option<i32> {
        self.value(pos)
            .and_then(|b| b.try_into().ok())
            .map(i32::from_le_bytes)
    }

    fn get_int8(&self, pos: usize) -> Option<i64> {
        self.value(pos)
            .and_then(|b| b.try_into().ok())
            .map(i64::from_le_bytes)
    }

    fn get_float4(&self, pos: usize) -> Option<f32> {
        self.value(pos)
            .and_then(|b| b.try_into().ok())
            .map(f32::from_le_bytes)
    }

    fn get_float8(&self, pos: usize) -> Option<f64> {
        self.value(pos)
            .and_then(|b| b.try_into().ok())
            .map(f64::from_le_bytes)
    }

    fn get_text(&self, pos: usize) -> Option<&str> {
        self.value(pos).and_then(|b| std::str::from_utf8(b).ok())
    }

    fn get_blob(&self, pos: usize) -> Option<&[u8]> {
        self.value(pos)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectedRow {
    col_ids: Vec<ColumnId>,
    nulls: Vec<bool>,
    values: Vec<Slot>,
}

impl ProjectedRow {
    fn new(col_ids: Vec<ColumnId>) -> Self {
        let n = col_ids.len();
        Self {
            col_ids,
            nulls: vec![true; n],
            values: vec![Slot::new(); n],
        }
    }

    pub fn num_columns(&self) -> usize {
        self.col_ids.len()
    }

    pub fn col_ids(&self) -> &[ColumnId] {
        &self.col_ids
    }

    pub fn col_ids_mut(&mut self) -> &mut [ColumnId] {
        &mut self.col_ids
    }

    pub fn set_null(&mut self, pos: usize) {
        self.nulls[pos] = true;
        self.values[pos].clear();
    }

    pub fn set_value(&mut self, pos: usize, bytes: &[u8]) {
        self.nulls[pos] = false;
        self.values[pos].clear();
        self.values[pos].extend_from_slice(bytes);
    }

    /// Reset every slot to NULL, keeping the header.
    pub fn reset(&mut self) {
        for pos in 0..self.num_columns() {
            self.set_null(pos);
        }
    }

    pub fn set_bool(&mut self, pos: usize, v: bool) {
        self.set_value(pos, &[v as u8]);
    }

    pub fn set_int2(&mut self, pos: usize, v: i16) {
        self.set_value(pos, &v.to_le_bytes());
    }

    pub fn set_int4(&mut self, pos: usize, v: i32) {
        self.set_value(pos, &v.to_le_bytes());
    }

    pub fn set_int8(&mut self, pos: usize, v: i64) {
        self.set_value(pos, &v.to_le_bytes());
    }

    pub fn set_float4(&mut self, pos: usize, v: f32) {
        self.set_value(pos, &v.to_le_bytes());
    }

    pub fn set_float8(&mut self, pos: usize, v: f64) {
        self.set_value(pos, &v.to_le_bytes());
    }

    pub fn set_text(&mut self, pos: usize, v: &str) {
        self.set_value(pos, v.as_bytes());
    }

    pub fn set_blob(&mut self, pos: usize, v: &[u8]) {
        self.set_value(pos, v);
    }
}

impl SlotAccess for ProjectedRow {
    fn value(&self, pos: usize) -> Option<&[u8]> {
        (!self.nulls[pos]).then(|| self.values[pos].as_slice())
    }
}

impl Projection for ProjectedRow {
    fn num_columns(&self) -> usize {
        self.col_ids.len()
    }

    fn header(&self) -> &[ColumnId] {
        &self.col_ids
    }

    fn header_mut(&mut self) -> &mut [ColumnId] {
        &mut self.col_ids
    }
}

impl RowWriter for ProjectedRow {
    fn header(&self) -> &[ColumnId] {
        &self.col_ids
    }

    fn set_null(&mut self, pos: usize) {
        ProjectedRow::set_null(self, pos);
    }

    fn set_value(&mut self, pos: usize, bytes: &[u8]) {
        ProjectedRow::set_value(self, pos, bytes);
    }
}

#[derive(Debug, Clone)]
pub struct ProjectedRowInitializer {
    col_ids: Vec<ColumnId>,
}

impl ProjectedRowInitializer {
    /// `col_ids` must be distinct and valid in `layout`; they are kept
    /// sorted ascending so a projection over the same set of columns always
    /// has one canonical shape.
    pub fn new(layout: &BlockLayout, mut col_ids: Vec<ColumnId>) -> Result<Self> {
        col_ids.sort_unstable();
        col_ids.dedup();
        for &id in &col_ids {
            ensure!(
                (id as usize) < layout.num_columns(),
                "column id {id} out of range for layout"
            );
            ensure!(
                id >= layout.num_reserved(),
                "column id {id} is reserved and cannot be projected"
            );
        }
        Ok(Self { col_ids })
    }

    pub fn col_ids(&self) -> &[ColumnId] {
        &self.col_ids
    }

    pub fn init_row(&self) -> ProjectedRow {
        ProjectedRow::new(self.col_ids.clone())
    }
}

#[derive(Debug, Clone)]
pub struct ProjectedColumns {
    col_ids: Vec<ColumnId>,
    max_tuples: usize,
    num_tuples: usize,
    nulls: Vec<bool>,
    values: Vec<Slot>,
}

impl ProjectedColumns {
    fn new(col_ids: Vec<ColumnId>, max_tuples: usize) -> Self {
        let slots = col_ids.len() * max_tuples;
        Self {
            col_ids,
            max_tuples,
            num_tuples: 0,
            nulls: vec![true; slots],
            values: vec![Slot::new(); slots],
        }
    }

    pub fn num_columns(&self) -> usize {
        self.col_ids.len()
    }

    pub fn col_ids(&self) -> &[ColumnId] {
        &self.col_ids
    }

    pub fn col_ids_mut(&mut self) -> &mut [ColumnId] {
        &mut self.col_ids
    }

    pub fn max_tuples(&self) -> usize {
        self.max_tuples
    }

    pub fn num_tuples(&self) -> usize {
        self.num_tuples
    }

    pub fn is_full(&self) -> bool {
        self.num_tuples == self.max_tuples
    }

    /// Clear all rows, keeping the header and capacity.
    pub fn reset(&mut self) {
        self.num_tuples = 0;
        self.nulls.fill(true);
        for v in &mut self.values {
            v.clear();
        }
    }

    /// Claim the next row slot; the new row starts all-NULL.
    pub fn append_row(&mut self) -> usize {
        debug_assert!(self.num_tuples < self.max_tuples);
        let row = self.num_tuples;
        self.num_tuples += 1;
        row
    }

    pub fn row(&self, row: usize) -> RowView<'_> {
        debug_assert!(row < self.num_tuples);
        RowView { cols: self, row }
    }

    pub fn row_mut(&mut self, row: usize) -> RowViewMut<'_> {
        debug_assert!(row < self.num_tuples);
        RowViewMut { cols: self, row }
    }

    fn slot_index(&self, row: usize, pos: usize) -> usize {
        row * self.col_ids.len() + pos
    }
}

impl Projection for ProjectedColumns {
    fn num_columns(&self) -> usize {
        self.col_ids.len()
    }

    fn header(&self) -> &[ColumnId] {
        &self.col_ids
    }

    fn header_mut(&mut self) -> &mut [ColumnId] {
        &mut self.col_ids
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RowView<'a> {
    cols: &'a ProjectedColumns,
    row: usize,
}

impl SlotAccess for RowView<'_> {
    fn value(&self, pos: usize) -> Option<&[u8]> {
        let idx = self.cols.slot_index(self.row, pos);
        (!self.cols.nulls[idx]).then(|| self.cols.values[idx].as_slice())
    }
}

#[derive(Debug)]
pub struct RowViewMut<'a> {
    cols: &'a mut ProjectedColumns,
    row: usize,
}

impl RowWriter for RowViewMut<'_> {
    fn header(&self) -> &[ColumnId] {
        &self.cols.col_ids
    }

    fn set_null(&mut self, pos: usize) {
        let idx = self.cols.slot_index(self.row, pos);
        self.cols.nulls[idx] = true;
        self.cols.values[idx].clear();
    }

    fn set_value(&mut self, pos: usize, bytes: &[u8]) {
        let idx = self.cols.slot_index(self.row, pos);
        self.cols.nulls[idx] = false;
        self.cols.values[idx].clear();
        self.cols.values[idx].extend_from_slice(bytes);
    }
}

#[derive(Debug, Clone)]
pub struct ProjectedColumnsInitializer {
    col_ids: Vec<ColumnId>,
    max_tuples: usize,
}

impl ProjectedColumnsInitializer {
    pub fn new(layout: &BlockLayout, col_ids: Vec<ColumnId>, max_tuples: usize) -> Result<Self> {
        ensure!(max_tuples > 0, "batch capacity must be non-zero");
        let row = ProjectedRowInitializer::new(layout, col_ids)?;
        Ok(Self {
            col_ids: row.col_ids,
            max_tuples,
        })
    }

    pub fn col_ids(&self) -> &[ColumnId] {
        &self.col_ids
    }

    pub fn init_columns(&self) -> ProjectedColumns {
        ProjectedColumns::new(self.col_ids.clone(), self.max_tuples)
    }
}
