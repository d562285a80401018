use itertools::Itertools;
use tessera_error::{TesseraResult, tessera_bail};
use tessera_metrics::{INCOMPLETE_SUBMITS, READ_CELLS, READ_PARTITIONS, TILES_PRUNED};
use tessera_schema::{ArraySchema, ArrayType, Field};

use super::buffer::Binding;
use super::dense::DenseCursor;
use super::partition::Partitioner;
use super::{Layout, Query, QueryStatus, layout_comparator};
use crate::cells::CellBatch;
use crate::context::CancelToken;
use crate::fragment::read_tile;
use crate::{Array, Subarray};

/// The cells of one partition of a read.
enum Partition {
    /// Written cells in layout order and how many were handed out.
    Sparse { cells: CellBatch, next: usize },
    Dense(Box<DenseCursor>),
}

impl Partition {
    fn is_exhausted(&self) -> bool {
        match self {
            Partition::Sparse { cells, next } => *next == cells.len(),
            Partition::Dense(cursor) => cursor.is_exhausted(),
        }
    }

    fn take(
        &mut self,
        schema: &ArraySchema,
        limit: usize,
        cancel: &CancelToken,
    ) -> TesseraResult<CellBatch> {
        match self {
            Partition::Sparse { cells, next } => {
                let end = cells.len().min(*next + limit);
                let taken = cells.slice(schema, *next..end);
                *next = end;
                Ok(taken)
            }
            Partition::Dense(cursor) => cursor.take(schema, limit, cancel),
        }
    }
}

/// What a read draws its cells from.
struct ReadScope<'q> {
    array: &'q Array,
    schema: &'q ArraySchema,
    layout: Layout,
    cancel: &'q CancelToken,
}

impl ReadScope<'_> {
    fn load(&self, subarray: &Subarray) -> TesseraResult<Partition> {
        let written = collect_cells(self.array, self.schema, subarray, self.layout, self.cancel)?;
        Ok(match self.schema.array_type() {
            ArrayType::Sparse => Partition::Sparse {
                cells: written,
                next: 0,
            },
            ArrayType::Dense => Partition::Dense(Box::new(DenseCursor::new(
                self.schema,
                subarray,
                self.layout,
                written,
            )?)),
        })
    }
}

/// How far a read got: the partitions still to load and the one being handed out.
///
/// Only one partition is held in memory at a time.
pub(super) struct ReadCursor {
    partitions: Partitioner,
    current: Option<Partition>,
    produced: usize,
}

impl ReadCursor {
    fn new(scope: &ReadScope<'_>, subarray: Subarray) -> TesseraResult<Self> {
        let (_, fragments) = scope.array.read_state()?;
        let budget = scope.array.context().config().memory_budget();
        let mut cursor = Self {
            partitions: Partitioner::new(scope.schema, fragments, subarray, scope.layout, budget),
            current: None,
            produced: 0,
        };
        cursor.advance(scope)?;
        Ok(cursor)
    }

    /// Load the next partition holding any cells.
    fn advance(&mut self, scope: &ReadScope<'_>) -> TesseraResult<()> {
        self.current = None;
        let (_, fragments) = scope.array.read_state()?;
        let metrics = scope.array.context().metrics();
        while let Some(subarray) = self.partitions.next_partition(scope.schema, fragments) {
            metrics.counter(READ_PARTITIONS, scope.array.uri()).inc();
            let partition = scope.load(&subarray)?;
            if !partition.is_exhausted() {
                self.current = Some(partition);
                break;
            }
        }
        Ok(())
    }

    fn is_exhausted(&self) -> bool {
        self.current.is_none()
    }

    /// Up to `limit` cells, moving through the partitions as they run out.
    fn take(&mut self, scope: &ReadScope<'_>, limit: usize) -> TesseraResult<CellBatch> {
        let mut out = CellBatch::empty(scope.schema);
        while out.len() < limit {
            let Some(current) = self.current.as_mut() else {
                break;
            };
            out.append(current.take(scope.schema, limit - out.len(), scope.cancel)?);
            if current.is_exhausted() {
                self.advance(scope)?;
            }
        }
        self.produced += out.len();
        Ok(out)
    }
}

impl Query<'_> {
    pub(super) fn submit_read(&mut self) -> TesseraResult<QueryStatus> {
        if self.buffers.is_empty() {
            tessera_bail!(MalformedQuery: "read queries need at least one buffer");
        }
        let ndim = self.schema.domain().ndim();
        let per_cell = |field: Field| if field == Field::Coords { ndim } else { 1 };
        let scope = ReadScope {
            array: self.array,
            schema: &self.schema,
            layout: self.layout,
            cancel: &self.cancel,
        };
        let mut cursor = match self.cursor.take() {
            Some(cursor) => {
                log::debug!(
                    "resuming read of {} after {} cells",
                    self.array.uri(),
                    cursor.produced
                );
                cursor
            }
            None => ReadCursor::new(&scope, self.resolved_subarray()?)?,
        };

        let capacity = self
            .buffers
            .values()
            .map(|b| b.buffer.len() / per_cell(b.field))
            .min()
            .unwrap_or(0);
        let cells = cursor.take(&scope, capacity)?;
        for binding in self.buffers.values_mut() {
            fill_buffer(&self.schema, binding, &cells);
            binding.produced = cells.len() * per_cell(binding.field);
        }

        let metrics = self.array.context().metrics();
        metrics
            .counter(READ_CELLS, self.array.uri())
            .add(i64::try_from(cells.len())?);
        let status = if cursor.is_exhausted() {
            QueryStatus::Completed
        } else {
            metrics.counter(INCOMPLETE_SUBMITS, self.array.uri()).inc();
            if cells.is_empty() {
                let smallest = self
                    .buffers
                    .values()
                    .min_by_key(|b| b.buffer.len() / per_cell(b.field))
                    .map(|b| self.schema.field_name(b.field))
                    .unwrap_or_default();
                log::warn!(
                    "read buffer {} of {} cannot hold a single cell, resubmit with larger buffers",
                    smallest,
                    self.array.uri()
                );
            } else {
                log::debug!(
                    "read of {} incomplete after {} cells",
                    self.array.uri(),
                    cursor.produced
                );
            }
            QueryStatus::Incomplete
        };
        self.cursor = Some(cursor);
        Ok(status)
    }
}

/// Copy `cells` to the start of the buffer bound by `binding`.
fn fill_buffer(schema: &ArraySchema, binding: &mut Binding, cells: &CellBatch) {
    let ndim = schema.domain().ndim();
    let width = schema.domain().ptype().byte_width();
    for i in 0..cells.len() {
        match binding.field {
            Field::Coords => {
                let tuple = cells.coord(schema, i);
                for (d, coord) in tuple.chunks_exact(width).enumerate() {
                    binding.buffer.write_le_at(i * ndim + d, coord);
                }
            }
            Field::Dimension(d) => {
                let tuple = cells.coord(schema, i);
                binding
                    .buffer
                    .write_le_at(i, &tuple[d * width..(d + 1) * width]);
            }
            Field::Attribute(attr) => {
                binding.buffer.write_le_at(i, cells.value(schema, attr, i));
            }
        }
    }
}

/// Every distinct written cell inside `subarray` visible to the read handle, in `layout` order.
///
/// Tiles whose bounding rectangle misses the subarray are never read. When several cells share
/// coordinates the one written last wins.
fn collect_cells(
    array: &Array,
    schema: &ArraySchema,
    subarray: &Subarray,
    layout: Layout,
    cancel: &CancelToken,
) -> TesseraResult<CellBatch> {
    let (_, fragments) = array.read_state()?;
    let vfs = array.context().vfs().as_ref();
    let ptype = schema.domain().ptype();
    let batch = cancel.batch_cells();

    let mut all = CellBatch::empty(schema);
    let mut pruned = 0usize;
    let mut scanned = 0usize;
    for fragment in fragments {
        if !subarray.overlaps(fragment.mbr()) {
            log::trace!("skipping fragment {}", fragment.name());
            pruned += fragment.tiles().len();
            continue;
        }
        for (idx, tile) in fragment.tiles().iter().enumerate() {
            if !subarray.overlaps(tile.mbr()) {
                log::trace!("pruned tile {} of fragment {}", idx, fragment.name());
                pruned += 1;
                continue;
            }
            let cells = read_tile(vfs, schema, fragment, tile)?;
            let mut inside = Vec::with_capacity(cells.len());
            for i in 0..cells.len() {
                if scanned % batch == 0 {
                    cancel.check()?;
                }
                scanned += 1;
                if subarray.contains_tuple(ptype, cells.coord(schema, i)) {
                    inside.push(i);
                }
            }
            all.append(cells.take(schema, &inside));
        }
    }
    array
        .context()
        .metrics()
        .counter(TILES_PRUNED, array.uri())
        .add(i64::try_from(pruned)?);

    let order = layout_comparator(schema, layout, &all);
    let latest = order
        .sorted_indices(&all)
        .into_iter()
        .coalesce(|a, b| {
            if order.compare(&all, a, b).is_eq() {
                Ok(b)
            } else {
                Err((a, b))
            }
        })
        .collect::<Vec<_>>();
    log::debug!(
        "read {} cells of {} from {} fragments, {} tiles pruned",
        latest.len(),
        array.uri(),
        fragments.len(),
        pruned
    );
    Ok(all.take(schema, &latest))
}
