//! Splitting a read's subarray so the tiles loaded at once fit the memory budget.
//!
//! Partitions are cut so that every cell of one partition precedes every cell of the next in
//! the read layout. Reading them one after the other therefore produces the same cells in the
//! same order as a single pass.

use tessera_dtype::PValue;
use tessera_schema::{ArraySchema, Order};

use super::Layout;
use crate::Subarray;
use crate::estimate::tile_memory;
use crate::fragment::Fragment;

/// Hands out the partitions of a read subarray in layout order.
pub(super) struct Partitioner {
    layout: Layout,
    budget: u128,
    /// Partitions still to read with their tile memory, the next one last.
    pending: Vec<(Subarray, u128)>,
}

impl Partitioner {
    pub(super) fn new(
        schema: &ArraySchema,
        fragments: &[Fragment],
        subarray: Subarray,
        layout: Layout,
        budget: u64,
    ) -> Self {
        let memory = tile_memory(schema, fragments, &subarray);
        Self {
            layout,
            budget: u128::from(budget),
            pending: vec![(subarray, memory)],
        }
    }

    /// The next partition to read. Partitions above the budget are halved for as long as
    /// halving sheds tiles.
    pub(super) fn next_partition(
        &mut self,
        schema: &ArraySchema,
        fragments: &[Fragment],
    ) -> Option<Subarray> {
        let (mut subarray, mut memory) = self.pending.pop()?;
        while memory > self.budget {
            let halves = split_point(schema, self.layout, &subarray)
                .and_then(|(dim, at)| subarray.split_at(dim, at));
            let Some((first, second)) = halves else {
                log::warn!(
                    "read partition {} needs {} bytes, above the memory budget of {}",
                    subarray,
                    memory,
                    self.budget
                );
                break;
            };
            let first_memory = tile_memory(schema, fragments, &first);
            let second_memory = tile_memory(schema, fragments, &second);
            if first_memory >= memory && second_memory >= memory {
                log::warn!(
                    "read partition {} of {} bytes cannot be split below the budget of {}",
                    subarray,
                    memory,
                    self.budget
                );
                break;
            }
            log::trace!("split read partition {} into {} and {}", subarray, first, second);
            self.pending.push((second, second_memory));
            subarray = first;
            memory = first_memory;
        }
        Some(subarray)
    }
}

/// Where to cut `subarray` so that every cell up to the cut precedes every cell after it in
/// `layout`, as a dimension and the last value of the first half.
fn split_point(
    schema: &ArraySchema,
    layout: Layout,
    subarray: &Subarray,
) -> Option<(usize, PValue)> {
    match layout {
        Layout::RowMajor => split_by_value(subarray, Order::RowMajor),
        Layout::ColMajor => split_by_value(subarray, Order::ColMajor),
        Layout::GlobalOrder | Layout::Unordered => split_by_tile(schema, subarray)
            .or_else(|| split_by_value(subarray, schema.cell_order())),
    }
}

/// Halve the most significant dimension of `order` that holds more than one value.
fn split_by_value(subarray: &Subarray, order: Order) -> Option<(usize, PValue)> {
    order.dim_order(subarray.ndim()).find_map(|dim| {
        let (lo, hi) = subarray.bounds(dim)?;
        Some((dim, lo.midpoint(hi)?))
    })
}

/// Cut the most significant dimension of the tile order that spans more than one tile at a
/// tile boundary.
fn split_by_tile(schema: &ArraySchema, subarray: &Subarray) -> Option<(usize, PValue)> {
    let dims = schema.domain().dimensions();
    let (dim, first, last) = schema
        .tile_order()
        .dim_order(dims.len())
        .filter_map(|d| {
            let (lo, hi) = subarray.bounds(d)?;
            Some((d, dims[d].tile_of(lo), dims[d].tile_of(hi)))
        })
        .find(|&(_, first, last)| first < last)?;
    Some((dim, dims[dim].tile_upper_bound(first + (last - first) / 2)?))
}
