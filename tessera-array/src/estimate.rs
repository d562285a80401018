//! Result size estimation from fragment metadata.
//!
//! Estimates only consult the footers already loaded by a read handle; no data tile is read.

use tessera_error::{TesseraResult, tessera_err};
use tessera_schema::{ArraySchema, ArrayType};

use crate::fragment::Fragment;
use crate::{Array, Subarray};

/// An upper bound on the bytes a read of `field` over `subarray` produces through `array`.
///
/// For sparse arrays every tile whose bounding rectangle overlaps the subarray is counted in full,
/// so the bound never falls below the actual result. Dense reads produce exactly one value per
/// cell of the subarray.
pub fn estimate_max_buffer_size(
    array: &Array,
    field: &str,
    subarray: &Subarray,
) -> TesseraResult<usize> {
    let (schema, field) = array.resolve_field(field)?;
    let (_, fragments) = array.read_state()?;
    let subarray = subarray.resolve(schema.domain())?;
    let cells = match schema.array_type() {
        ArrayType::Dense => dense_cells(&schema, &subarray)?,
        ArrayType::Sparse => overlapping_tiles(fragments, &subarray)
            .map(|(tile_cells, _)| tile_cells)
            .sum(),
    };
    Ok(usize::try_from(cells)? * schema.cell_size(field))
}

/// A non-binding guess at the bytes a read of `field` over `subarray` produces.
///
/// Partially overlapping sparse tiles are prorated by the share of their volume inside the
/// subarray, assuming cells are spread uniformly.
pub fn estimate_result_size(
    array: &Array,
    field: &str,
    subarray: &Subarray,
) -> TesseraResult<usize> {
    let (schema, field) = array.resolve_field(field)?;
    let (_, fragments) = array.read_state()?;
    let subarray = subarray.resolve(schema.domain())?;
    let cells = match schema.array_type() {
        ArrayType::Dense => dense_cells(&schema, &subarray)?,
        ArrayType::Sparse => ceil_cells(
            overlapping_tiles(fragments, &subarray)
                .map(|(tile_cells, fraction)| tile_cells as f64 * fraction)
                .sum(),
        ),
    };
    Ok(usize::try_from(cells)? * schema.cell_size(field))
}

/// The bytes of tile data a read over `subarray` holds in memory at once through `array`.
///
/// Every tile overlapping the subarray is loaded whole with its coordinates and all attributes.
/// Unwritten dense cells are generated on demand and take no memory.
pub fn estimate_max_memory_size(array: &Array, subarray: &Subarray) -> TesseraResult<usize> {
    let (schema, fragments) = array.read_state()?;
    let subarray = subarray.resolve(schema.domain())?;
    Ok(usize::try_from(tile_memory(schema, fragments, &subarray))?)
}

/// The bytes of every tile overlapping `subarray`, counting each cell with all its fields.
pub(crate) fn tile_memory(
    schema: &ArraySchema,
    fragments: &[Fragment],
    subarray: &Subarray,
) -> u128 {
    let cell_width = schema.domain().tuple_width()
        + schema
            .attributes()
            .iter()
            .map(|attr| attr.ptype().byte_width())
            .sum::<usize>();
    overlapping_tiles(fragments, subarray)
        .map(|(cells, _)| cells * cell_width as u128)
        .sum()
}

// Bounded by the cell count of the overlapping tiles, which fits u128.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn ceil_cells(estimate: f64) -> u128 {
    estimate.ceil() as u128
}

fn dense_cells(schema: &ArraySchema, subarray: &Subarray) -> TesseraResult<u128> {
    subarray.cell_count().ok_or_else(|| {
        tessera_err!(InvalidState: "dense array {} has a non-integer domain", schema.domain())
    })
}

/// The cell count and overlap fraction of every tile overlapping `subarray`.
fn overlapping_tiles<'a>(
    fragments: &'a [Fragment],
    subarray: &'a Subarray,
) -> impl Iterator<Item = (u128, f64)> + 'a {
    fragments
        .iter()
        .filter(|fragment| subarray.overlaps(fragment.mbr()))
        .flat_map(|fragment| fragment.tiles())
        .filter(|tile| subarray.overlaps(tile.mbr()))
        .map(|tile| {
            (
                u128::from(tile.cell_count()),
                subarray.overlap_fraction(tile.mbr()),
            )
        })
}
