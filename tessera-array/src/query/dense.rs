use itertools::Itertools;
use tessera_dtype::{PType, PValue};
use tessera_error::{TesseraResult, tessera_err};
use tessera_schema::{ArraySchema, Order};

use super::Layout;
use crate::Subarray;
use crate::cells::CellBatch;
use crate::context::CancelToken;
use crate::subarray::merge_int_ranges;

/// Steps through the cells of a box of integer ranges, the last of `dims` varying fastest.
struct Odometer {
    axes: Vec<Vec<(i128, i128)>>,
    dims: Vec<usize>,
    position: Vec<(usize, i128)>,
    done: bool,
}

impl Odometer {
    fn new(axes: Vec<Vec<(i128, i128)>>, dims: Vec<usize>) -> Self {
        let done = axes.iter().any(Vec::is_empty);
        let position = axes
            .iter()
            .map(|ranges| (0, ranges.first().map_or(0, |r| r.0)))
            .collect();
        Self {
            axes,
            dims,
            position,
            done,
        }
    }

    fn exhausted() -> Self {
        Self {
            axes: Vec::new(),
            dims: Vec::new(),
            position: Vec::new(),
            done: true,
        }
    }

    fn value(&self, dim: usize) -> i128 {
        self.position[dim].1
    }

    fn advance(&mut self) {
        for &d in self.dims.iter().rev() {
            let ranges = &self.axes[d];
            let (range, value) = &mut self.position[d];
            if *value < ranges[*range].1 {
                *value += 1;
                return;
            }
            if *range + 1 < ranges.len() {
                *range += 1;
                *value = ranges[*range].0;
                return;
            }
            *range = 0;
            *value = ranges[0].0;
        }
        self.done = true;
    }
}

/// Tiles of a dense subarray in tile order.
struct TileWalk {
    tiles: Odometer,
    /// First coordinate and extent of the tiles of every dimension.
    geometry: Vec<(i128, i128)>,
    cell_dims: Vec<usize>,
}

impl TileWalk {
    /// The cells of `ranges` inside the current tile.
    fn cells(&self, ranges: &[Vec<(i128, i128)>]) -> Odometer {
        let axes = ranges
            .iter()
            .zip(&self.geometry)
            .enumerate()
            .map(|(d, (ranges, &(origin, extent)))| {
                let first = origin + self.tiles.value(d) * extent;
                let last = first + extent - 1;
                ranges
                    .iter()
                    .filter(|&&(lo, hi)| lo <= last && first <= hi)
                    .map(|&(lo, hi)| (lo.max(first), hi.min(last)))
                    .collect()
            })
            .collect();
        Odometer::new(axes, self.cell_dims.clone())
    }
}

/// The cells of an integer subarray in a layout order, produced one at a time.
pub(super) struct DenseCells {
    ptype: PType,
    ranges: Vec<Vec<(i128, i128)>>,
    tiles: Option<TileWalk>,
    cells: Odometer,
}

impl DenseCells {
    pub(super) fn new(
        schema: &ArraySchema,
        subarray: &Subarray,
        layout: Layout,
    ) -> TesseraResult<Self> {
        let domain = schema.domain();
        let ndim = domain.ndim();
        let ranges = (0..ndim)
            .map(|d| subarray.int_ranges(d))
            .try_collect::<_, Vec<_>, _>()?;
        let dims = |order: Order| order.dim_order(ndim).collect::<Vec<_>>();

        let (order, tile_order) = match layout {
            Layout::RowMajor => (Order::RowMajor, None),
            Layout::ColMajor => (Order::ColMajor, None),
            Layout::GlobalOrder | Layout::Unordered => {
                (schema.cell_order(), Some(schema.tile_order()))
            }
        };
        let Some(tile_order) = tile_order else {
            let cells = Odometer::new(ranges.clone(), dims(order));
            return Ok(Self {
                ptype: domain.ptype(),
                ranges,
                tiles: None,
                cells,
            });
        };

        let geometry = domain
            .dimensions()
            .iter()
            .map(|dim| {
                let (lo, hi) = dim.domain();
                let lo = lo.as_i128();
                let span = lo.zip(hi.as_i128()).map(|(lo, hi)| hi - lo + 1);
                let extent = dim.extent().map_or(span, PValue::as_i128);
                lo.zip(extent).ok_or_else(|| {
                    tessera_err!(InvalidState: "dense dimension {} is not integral", dim.name())
                })
            })
            .try_collect::<_, Vec<_>, _>()?;
        let tile_axes = ranges
            .iter()
            .zip(&geometry)
            .map(|(ranges, &(origin, extent))| {
                let tiles = ranges
                    .iter()
                    .map(|&(lo, hi)| ((lo - origin) / extent, (hi - origin) / extent))
                    .collect::<Vec<_>>();
                merge_int_ranges(&tiles)
            })
            .collect();
        let walk = TileWalk {
            tiles: Odometer::new(tile_axes, dims(tile_order)),
            geometry,
            cell_dims: dims(order),
        };
        let cells = if walk.tiles.done {
            Odometer::exhausted()
        } else {
            walk.cells(&ranges)
        };
        Ok(Self {
            ptype: domain.ptype(),
            ranges,
            tiles: Some(walk),
            cells,
        })
    }

    pub(super) fn is_exhausted(&self) -> bool {
        self.cells.done
    }

    /// Append the coordinates of the next cell to `out`. Returns `false` once every cell was
    /// produced.
    pub(super) fn next_into(&mut self, out: &mut Vec<u8>) -> TesseraResult<bool> {
        if self.cells.done {
            return Ok(false);
        }
        for d in 0..self.ranges.len() {
            PValue::try_from_i128(self.ptype, self.cells.value(d))?.write_le(out);
        }
        self.cells.advance();
        let Some(walk) = self.tiles.as_mut() else {
            return Ok(true);
        };
        if self.cells.done {
            walk.tiles.advance();
            if !walk.tiles.done {
                self.cells = walk.cells(&self.ranges);
            }
        }
        Ok(true)
    }

    /// The interleaved coordinates of every remaining cell.
    pub(super) fn collect(mut self, cancel: &CancelToken) -> TesseraResult<Vec<u8>> {
        let batch = cancel.batch_cells();
        let mut coords = Vec::new();
        let mut produced = 0usize;
        loop {
            if produced % batch == 0 {
                cancel.check()?;
            }
            if !self.next_into(&mut coords)? {
                return Ok(coords);
            }
            produced += 1;
        }
    }
}

/// Hands out the cells of a dense subarray in layout order, taking values from the written
/// cells where present and from the attribute fill values elsewhere.
///
/// Only the written cells are held in memory; unwritten cells are generated as they are taken.
pub(super) struct DenseCursor {
    cells: DenseCells,
    written: CellBatch,
    next_written: usize,
    fill: Vec<Vec<u8>>,
}

impl DenseCursor {
    /// `written` must hold the distinct written cells of `subarray` in `layout` order.
    pub(super) fn new(
        schema: &ArraySchema,
        subarray: &Subarray,
        layout: Layout,
        written: CellBatch,
    ) -> TesseraResult<Self> {
        log::debug!(
            "dense read of {} cells, {} written",
            subarray
                .cell_count()
                .map_or_else(|| "unknown".to_string(), |n| n.to_string()),
            written.len()
        );
        Ok(Self {
            cells: DenseCells::new(schema, subarray, layout)?,
            written,
            next_written: 0,
            fill: schema
                .attributes()
                .iter()
                .map(|attr| attr.fill_value().to_le_bytes())
                .collect(),
        })
    }

    pub(super) fn is_exhausted(&self) -> bool {
        self.cells.is_exhausted()
    }

    /// The next `limit` cells, or fewer once the subarray runs out.
    pub(super) fn take(
        &mut self,
        schema: &ArraySchema,
        limit: usize,
        cancel: &CancelToken,
    ) -> TesseraResult<CellBatch> {
        let fill = self.fill.iter().map(Vec::as_slice).collect::<Vec<_>>();
        let batch = cancel.batch_cells();
        let mut out = CellBatch::empty(schema);
        let mut coord = Vec::with_capacity(schema.domain().tuple_width());
        while out.len() < limit {
            if out.len() % batch == 0 {
                cancel.check()?;
            }
            coord.clear();
            if !self.cells.next_into(&mut coord)? {
                break;
            }
            let written = self.next_written < self.written.len()
                && self.written.coord(schema, self.next_written) == coord.as_slice();
            if written {
                out.push_from(schema, &self.written, self.next_written);
                self.next_written += 1;
            } else {
                out.push(&coord, &fill);
            }
        }
        Ok(out)
    }
}
