//! # Block Layouts
//!
//! A [`BlockLayout`] is the physical shape of one layout version: the
//! attribute size and fixed-section byte offset of every physical column,
//! including the reserved prefix. Physical column ids are assigned by size
//! class in the order the schema enumerates its columns:
//!
//! ```text
//! id:      0            1..          ..           ..      ..      ..
//!       [reserved] [var-length] [8-byte] [4-byte] [2-byte] [1-byte]
//! ```
//!
//! Var-length columns occupy an 8-byte slot in the fixed section (an offset
//! and a length into the row's var heap), so slot widths are non-increasing
//! in id order and every fixed slot stays naturally aligned.
//!
//! The id assignment is what makes a physical id meaningless across layout
//! versions: dropping a 4-byte column shifts every later 4-, 2- and 1-byte
//! column down by one. The [`ColumnMap`] keeps the bijection between the
//! stable column oid and the per-layout id.

use eyre::{bail, ensure, Result};
use hashbrown::HashMap;

use crate::records::schema::Schema;
use crate::records::{ColumnId, ColumnOid, NUM_RESERVED_COLUMNS};

/// Attribute size recorded for a var-length column.
pub const VARLEN_ATTR_SIZE: u16 = u16::MAX;

/// Width of the fixed-section slot a var-length column occupies.
pub const VARLEN_SLOT_WIDTH: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockLayout {
    attr_sizes: Vec<u16>,
    offsets: Vec<u32>,
    fixed_size: u32,
    num_reserved: u16,
}

impl BlockLayout {
    fn new(attr_sizes: Vec<u16>, num_reserved: u16) -> Self {
        let mut offsets = Vec::with_capacity(attr_sizes.len());
        let mut offset = 0u32;
        for &size in &attr_sizes {
            offsets.push(offset);
            offset += slot_width_of(size) as u32;
        }
        Self {
            attr_sizes,
            offsets,
            fixed_size: offset,
            num_reserved,
        }
    }

    pub fn num_columns(&self) -> usize {
        self.attr_sizes.len()
    }

    pub fn num_reserved(&self) -> u16 {
        self.num_reserved
    }

    pub fn attr_size(&self, id: ColumnId) -> u16 {
        self.attr_sizes[id as usize]
    }

    pub fn is_varlen(&self, id: ColumnId) -> bool {
        self.attr_sizes[id as usize] == VARLEN_ATTR_SIZE
    }

    /// Byte offset of the column's slot within the fixed section.
    pub fn offset(&self, id: ColumnId) -> usize {
        self.offsets[id as usize] as usize
    }

    pub fn slot_width(&self, id: ColumnId) -> usize {
        slot_width_of(self.attr_sizes[id as usize])
    }

    pub fn fixed_section_size(&self) -> usize {
        self.fixed_size as usize
    }

    pub fn bitmap_bytes(&self) -> usize {
        self.attr_sizes.len().div_ceil(8)
    }

    /// Ids of the user columns, in id order (reserved prefix skipped).
    pub fn user_column_ids(&self) -> impl Iterator<Item = ColumnId> + '_ {
        (self.num_reserved as usize..self.attr_sizes.len()).map(|i| i as ColumnId)
    }
}

fn slot_width_of(attr_size: u16) -> usize {
    if attr_size == VARLEN_ATTR_SIZE {
        VARLEN_SLOT_WIDTH
    } else {
        attr_size as usize
    }
}

/// Bijection between column oids and one layout version's physical ids.
#[derive(Debug, Clone, Default)]
pub struct ColumnMap {
    oid_to_id: HashMap<ColumnOid, ColumnId>,
    id_to_oid: HashMap<ColumnId, ColumnOid>,
}

impl ColumnMap {
    fn insert(&mut self, oid: ColumnOid, id: ColumnId) {
        self.oid_to_id.insert(oid, id);
        self.id_to_oid.insert(id, oid);
    }

    pub fn id_for(&self, oid: ColumnOid) -> Option<ColumnId> {
        self.oid_to_id.get(&oid).copied()
    }

    pub fn oid_for(&self, id: ColumnId) -> Option<ColumnOid> {
        self.id_to_oid.get(&id).copied()
    }

    pub fn len(&self) -> usize {
        self.oid_to_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.oid_to_id.is_empty()
    }

    pub fn oid_to_id(&self) -> &HashMap<ColumnOid, ColumnId> {
        &self.oid_to_id
    }

    pub fn id_to_oid(&self) -> &HashMap<ColumnId, ColumnOid> {
        &self.id_to_oid
    }
}

/// Compute the block layout and column map for a schema.
///
/// Fails if any column's attribute size is outside the five classes.
pub fn build_layout(schema: &Schema) -> Result<(BlockLayout, ColumnMap)> {
    // Bucket user columns by size class, keeping schema enumeration order
    // within each class.
    let mut var_cols = Vec::new();
    let mut by_width: [Vec<ColumnOid>; 4] = Default::default(); // 8, 4, 2, 1
    for col in schema.columns() {
        match col.data_type().fixed_size() {
            None => var_cols.push(col.oid()),
            Some(8) => by_width[0].push(col.oid()),
            Some(4) => by_width[1].push(col.oid()),
            Some(2) => by_width[2].push(col.oid()),
            Some(1) => by_width[3].push(col.oid()),
            Some(n) => bail!(
                "unsupported attribute size {n} for column {:?}",
                col.name()
            ),
        }
    }

    let mut attr_sizes = Vec::with_capacity(NUM_RESERVED_COLUMNS + schema.column_count());
    for _ in 0..NUM_RESERVED_COLUMNS {
        attr_sizes.push(8);
    }

    let mut map = ColumnMap::default();
    let mut next_id = NUM_RESERVED_COLUMNS as ColumnId;
    for oid in var_cols {
        map.insert(oid, next_id);
        attr_sizes.push(VARLEN_ATTR_SIZE);
        next_id += 1;
    }
    for (bucket, width) in by_width.iter().zip([8u16, 4, 2, 1]) {
        for &oid in bucket {
            map.insert(oid, next_id);
            attr_sizes.push(width);
            next_id += 1;
        }
    }

    ensure!(
        map.len() == schema.column_count(),
        "layout build lost a column"
    );
    Ok((
        BlockLayout::new(attr_sizes, NUM_RESERVED_COLUMNS as u16),
        map,
    ))
}
