use std::cmp::Ordering;
use std::ops::Range;

use tessera_schema::{ArraySchema, Order};

/// A batch of cells in little-endian columnar form: one interleaved coordinate buffer and one
/// value buffer per attribute of the schema.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct CellBatch {
    pub(crate) coords: Vec<u8>,
    pub(crate) attributes: Vec<Vec<u8>>,
    len: usize,
}

impl CellBatch {
    pub(crate) fn empty(schema: &ArraySchema) -> Self {
        Self {
            coords: Vec::new(),
            attributes: vec![Vec::new(); schema.attributes().len()],
            len: 0,
        }
    }

    /// Wrap buffers already known to hold `len` cells of `schema`.
    pub(crate) fn new(coords: Vec<u8>, attributes: Vec<Vec<u8>>, len: usize) -> Self {
        Self {
            coords,
            attributes,
            len,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub(crate) fn coord<'a>(&'a self, schema: &ArraySchema, idx: usize) -> &'a [u8] {
        let width = schema.domain().tuple_width();
        &self.coords[idx * width..(idx + 1) * width]
    }

    pub(crate) fn value<'a>(&'a self, schema: &ArraySchema, attr: usize, idx: usize) -> &'a [u8] {
        let width = schema.attributes()[attr].ptype().byte_width();
        &self.attributes[attr][idx * width..(idx + 1) * width]
    }

    /// Append cell `idx` of `other`.
    pub(crate) fn push_from(&mut self, schema: &ArraySchema, other: &CellBatch, idx: usize) {
        let values = (0..self.attributes.len())
            .map(|attr| other.value(schema, attr, idx))
            .collect::<Vec<_>>();
        self.push(other.coord(schema, idx), &values);
    }

    /// Append a cell from its raw parts.
    pub(crate) fn push(&mut self, coord: &[u8], values: &[&[u8]]) {
        self.coords.extend_from_slice(coord);
        for (column, value) in self.attributes.iter_mut().zip(values) {
            column.extend_from_slice(value);
        }
        self.len += 1;
    }

    /// Overwrite the attribute values of cell `idx` with those of cell `src` of `other`.
    #[allow(dead_code)]
    pub(crate) fn copy_values(
        &mut self,
        schema: &ArraySchema,
        idx: usize,
        other: &CellBatch,
        src: usize,
    ) {
        for (attr, values) in self.attributes.iter_mut().enumerate() {
            let width = schema.attributes()[attr].ptype().byte_width();
            values[idx * width..(idx + 1) * width]
                .copy_from_slice(other.value(schema, attr, src));
        }
    }

    /// A new batch holding the cells at `indices`, in that order.
    pub(crate) fn take(&self, schema: &ArraySchema, indices: &[usize]) -> CellBatch {
        let mut out = CellBatch::empty(schema);
        out.coords.reserve(indices.len() * schema.domain().tuple_width());
        for &idx in indices {
            out.push_from(schema, self, idx);
        }
        out
    }

    /// A new batch holding the cells in `range`.
    pub(crate) fn slice(&self, schema: &ArraySchema, range: Range<usize>) -> CellBatch {
        let width = schema.domain().tuple_width();
        let attributes = self
            .attributes
            .iter()
            .zip(schema.attributes())
            .map(|(values, attr)| {
                let width = attr.ptype().byte_width();
                values[range.start * width..range.end * width].to_vec()
            })
            .collect();
        CellBatch::new(
            self.coords[range.start * width..range.end * width].to_vec(),
            attributes,
            range.len(),
        )
    }

    /// Move the cells of `other` to the end of this batch.
    pub(crate) fn append(&mut self, mut other: CellBatch) {
        self.coords.append(&mut other.coords);
        for (column, mut values) in self.attributes.iter_mut().zip(other.attributes) {
            column.append(&mut values);
        }
        self.len += other.len;
    }

    /// The per-dimension tile indices of every cell.
    pub(crate) fn tile_coords(&self, schema: &ArraySchema) -> Vec<Vec<u64>> {
        (0..self.len)
            .map(|idx| schema.domain().tile_coords(self.coord(schema, idx)))
            .collect()
    }
}

/// Orders coordinate tuples of a schema by a cell order, optionally grouped by tile first.
pub(crate) struct CellComparator<'a> {
    schema: &'a ArraySchema,
    tiles: Option<(Order, Vec<Vec<u64>>)>,
    cell_order: Order,
}

impl<'a> CellComparator<'a> {
    /// Global order: tiles in the schema's tile order, cells inside a tile in its cell order.
    pub(crate) fn global(schema: &'a ArraySchema, cells: &CellBatch) -> Self {
        Self {
            schema,
            tiles: Some((schema.tile_order(), cells.tile_coords(schema))),
            cell_order: schema.cell_order(),
        }
    }

    /// Plain row-major or column-major order over the coordinates, ignoring tiles.
    pub(crate) fn cells(schema: &'a ArraySchema, order: Order) -> Self {
        Self {
            schema,
            tiles: None,
            cell_order: order,
        }
    }

    pub(crate) fn compare(&self, cells: &CellBatch, a: usize, b: usize) -> Ordering {
        if let Some((tile_order, tiles)) = &self.tiles {
            let ord = tile_order.compare_tiles(&tiles[a], &tiles[b]);
            if ord.is_ne() {
                return ord;
            }
        }
        let domain = self.schema.domain();
        domain.ptype().compare_tuples_le(
            cells.coord(self.schema, a),
            cells.coord(self.schema, b),
            self.cell_order.dim_order(domain.ndim()),
        )
    }

    /// The indices of `cells` in this order. Equal cells keep their relative order.
    pub(crate) fn sorted_indices(&self, cells: &CellBatch) -> Vec<usize> {
        let mut indices = (0..cells.len()).collect::<Vec<_>>();
        indices.sort_by(|&a, &b| self.compare(cells, a, b));
        indices
    }
}
