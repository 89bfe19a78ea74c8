//! # Row Images
//!
//! A stored tuple is a single contiguous byte image laid out per its layout
//! version:
//!
//! ```text
//! +-------------+---------------------------+------------------+
//! | null bitmap | fixed section             | var heap         |
//! | (1 bit/col) | (one slot per column at   | (bytes addressed |
//! |             |  the layout's offset)     |  by VarSlot)     |
//! +-------------+---------------------------+------------------+
//! ```
//!
//! A set bitmap bit means NULL. Fixed-class columns store their value bytes
//! directly in their slot; var-length columns store a [`VarSlot`] (offset and
//! length into the var heap). Reserved columns are never materialized and
//! read as NULL.
//!
//! Updates decode the image to per-column values, apply the delta, and
//! re-encode; the var heap is rebuilt rather than patched in place.

use eyre::{ensure, eyre, Result};
use zerocopy::little_endian::U32;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::records::layout::BlockLayout;
use crate::records::ColumnId;

/// Fixed-section slot of a var-length column.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub struct VarSlot {
    pub offset: U32,
    pub len: U32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowImage {
    bytes: Vec<u8>,
}

impl RowImage {
    /// An image with every column NULL and an empty var heap.
    pub fn vacant(layout: &BlockLayout) -> Self {
        let mut bytes = vec![0u8; layout.bitmap_bytes() + layout.fixed_section_size()];
        bytes[..layout.bitmap_bytes()].fill(0xFF);
        Self { bytes }
    }

    /// Encode per-column values into an image. `values` is indexed by
    /// physical column id over all layout columns; reserved entries must be
    /// `None`.
    pub fn encode(layout: &BlockLayout, values: &[Option<&[u8]>]) -> Result<Self> {
        ensure!(
            values.len() == layout.num_columns(),
            "value count {} does not match layout column count {}",
            values.len(),
            layout.num_columns()
        );

        let bitmap_bytes = layout.bitmap_bytes();
        let fixed_start = bitmap_bytes;
        let heap_start = fixed_start + layout.fixed_section_size();
        let mut bytes = vec![0u8; heap_start];
        bytes[..bitmap_bytes].fill(0xFF);

        for (idx, value) in values.iter().enumerate() {
            let id = idx as ColumnId;
            let Some(value) = value else { continue };
            ensure!(
                id >= layout.num_reserved(),
                "reserved column {id} cannot carry a value"
            );
            bytes[idx / 8] &= !(1 << (idx % 8));
            let slot_start = fixed_start + layout.offset(id);
            if layout.is_varlen(id) {
                let heap_offset = bytes.len() - heap_start;
                let slot = VarSlot {
                    offset: U32::new(heap_offset as u32),
                    len: U32::new(value.len() as u32),
                };
                bytes.extend_from_slice(value);
                let end = slot_start + layout.slot_width(id);
                bytes[slot_start..end].copy_from_slice(slot.as_bytes());
            } else {
                let width = layout.slot_width(id);
                ensure!(
                    value.len() == width,
                    "column {id} expects {width} bytes, got {}",
                    value.len()
                );
                bytes[slot_start..slot_start + width].copy_from_slice(value);
            }
        }
        Ok(Self { bytes })
    }

    pub fn is_null(&self, id: ColumnId) -> bool {
        let idx = id as usize;
        self.bytes[idx / 8] & (1 << (idx % 8)) != 0
    }

    /// The stored bytes of a column, or `None` when NULL.
    pub fn value(&self, layout: &BlockLayout, id: ColumnId) -> Result<Option<&[u8]>> {
        if self.is_null(id) {
            return Ok(None);
        }
        let fixed_start = layout.bitmap_bytes();
        let slot_start = fixed_start + layout.offset(id);
        if layout.is_varlen(id) {
            let slot_end = slot_start + layout.slot_width(id);
            let slot = VarSlot::read_from_bytes(&self.bytes[slot_start..slot_end])
                .map_err(|_| eyre!("truncated var slot for column {id}"))?;
            let heap_start = fixed_start + layout.fixed_section_size();
            let start = heap_start + slot.offset.get() as usize;
            let end = start + slot.len.get() as usize;
            ensure!(end <= self.bytes.len(), "var heap overrun for column {id}");
            Ok(Some(&self.bytes[start..end]))
        } else {
            let width = layout.slot_width(id);
            Ok(Some(&self.bytes[slot_start..slot_start + width]))
        }
    }

    /// Decode into per-column owned values, indexed by physical column id.
    pub fn decode(&self, layout: &BlockLayout) -> Result<Vec<Option<Vec<u8>>>> {
        let mut values = vec![None; layout.num_columns()];
        for id in layout.user_column_ids() {
            values[id as usize] = self.value(layout, id)?.map(|b| b.to_vec());
        }
        Ok(values)
    }
}

/// Copy `src` into a buffer of `width` bytes, keeping the low-order bytes
/// and zero-filling the remainder. This is the byte-level rule for reading
/// or writing a column at a width other than its stored width.
pub fn resize_low_order(src: &[u8], width: usize) -> Vec<u8> {
    let mut out = vec![0u8; width];
    let n = src.len().min(width);
    out[..n].copy_from_slice(&src[..n]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::layout::build_layout;
    use crate::records::schema::{Column, Schema};
    use crate::records::types::DataType;

    fn fixture() -> BlockLayout {
        let schema = Schema::new(vec![
            Column::new("t", 1, DataType::Text),
            Column::new("a", 2, DataType::Int8),
            Column::new("b", 3, DataType::Int4),
            Column::new("c", 4, DataType::Bool),
        ])
        .unwrap();
        build_layout(&schema).unwrap().0
    }

    #[test]
    fn vacant_image_is_all_null() {
        let layout = fixture();
        let image = RowImage::vacant(&layout);
        for id in layout.user_column_ids() {
            assert!(image.is_null(id));
            assert!(image.value(&layout, id).unwrap().is_none());
        }
    }

    #[test]
    fn encode_decode_round_trip() {
        let layout = fixture();
        let int8_bytes = 42i64.to_le_bytes();
        let values: Vec<Option<&[u8]>> = vec![
            None,                 // reserved
            Some(b"hello world"), // text
            Some(&int8_bytes),    // int8
            None,                 // int4 null
            Some(&[1u8]),         // bool
        ];
        let image = RowImage::encode(&layout, &values).unwrap();

        assert_eq!(image.value(&layout, 1).unwrap(), Some(b"hello world".as_slice()));
        assert_eq!(
            image.value(&layout, 2).unwrap(),
            Some(42i64.to_le_bytes().as_slice())
        );
        assert!(image.is_null(3));
        assert_eq!(image.value(&layout, 4).unwrap(), Some([1u8].as_slice()));

        let decoded = image.decode(&layout).unwrap();
        assert_eq!(decoded[1].as_deref(), Some(b"hello world".as_slice()));
        assert!(decoded[3].is_none());

        let values_again: Vec<Option<&[u8]>> =
            decoded.iter().map(|v| v.as_deref()).collect();
        let image_again = RowImage::encode(&layout, &values_again).unwrap();
        assert_eq!(image, image_again);
    }

    #[test]
    fn reserved_column_rejects_values() {
        let layout = fixture();
        let mut values: Vec<Option<&[u8]>> = vec![None; layout.num_columns()];
        values[0] = Some(&[0u8; 8]);
        assert!(RowImage::encode(&layout, &values).is_err());
    }

    #[test]
    fn wrong_fixed_width_is_rejected() {
        let layout = fixture();
        let mut values: Vec<Option<&[u8]>> = vec![None; layout.num_columns()];
        values[2] = Some(&[0u8; 4]); // int8 column
        assert!(RowImage::encode(&layout, &values).is_err());
    }

    #[test]
    fn resize_keeps_low_order_bytes() {
        assert_eq!(resize_low_order(&[1, 2, 3, 4], 2), vec![1, 2]);
        assert_eq!(resize_low_order(&[1, 2], 4), vec![1, 2, 0, 0]);
        assert_eq!(resize_low_order(&[], 2), vec![0, 0]);
    }

    #[test]
    fn empty_var_value_round_trips() {
        let layout = fixture();
        let values: Vec<Option<&[u8]>> = vec![None, Some(b""), None, None, None];
        let image = RowImage::encode(&layout, &values).unwrap();
        assert_eq!(image.value(&layout, 1).unwrap(), Some(b"".as_slice()));
    }
}
