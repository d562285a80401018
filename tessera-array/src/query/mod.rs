//! Read and write queries over an open array.
//!
//! A [`Query`] is configured with a layout, an optional subarray and one buffer per field,
//! then submitted. Reads that do not fit the bound buffers end [`QueryStatus::Incomplete`] and
//! continue from where they stopped on the next [`Query::submit`].

use std::fmt::{Display, Formatter};
use std::sync::Arc;

use rustc_hash::FxHashMap;
use tessera_dtype::{NativePType, PValue};
use tessera_error::{TesseraResult, tessera_bail, tessera_err};
use tessera_metrics::SUBMIT_TIMER;
use tessera_schema::{ArraySchema, ArrayType, Field, Order};

use crate::cells::{CellBatch, CellComparator};
use crate::context::CancelToken;
use crate::{Array, Mode, Subarray};

mod buffer;
mod dense;
mod partition;
mod read;
mod write;

use buffer::Binding;
use read::ReadCursor;

/// The order cells are written in or produced in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Layout {
    /// Row-major over the coordinates, ignoring tiles.
    RowMajor,
    /// Column-major over the coordinates, ignoring tiles.
    ColMajor,
    /// Tiles in the tile order, cells inside a tile in the cell order.
    GlobalOrder,
    /// No particular order. Reads produce global order.
    Unordered,
}

impl Display for Layout {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Layout::RowMajor => write!(f, "row-major"),
            Layout::ColMajor => write!(f, "col-major"),
            Layout::GlobalOrder => write!(f, "global order"),
            Layout::Unordered => write!(f, "unordered"),
        }
    }
}

/// Where a query is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryStatus {
    /// Nothing has been configured yet.
    Created,
    /// At least one setter was called.
    Configured,
    /// A submission is running.
    InProgress,
    /// All results were produced, or the write was committed.
    Completed,
    /// The bound buffers filled up before the result was exhausted.
    Incomplete,
    /// A submission returned an error.
    Failed,
}

impl QueryStatus {
    /// Whether further submissions are refused.
    pub fn is_terminal(self) -> bool {
        matches!(self, QueryStatus::Completed | QueryStatus::Failed)
    }
}

/// A single read or write against an open [`Array`].
pub struct Query<'a> {
    array: &'a Array,
    mode: Mode,
    schema: Arc<ArraySchema>,
    layout: Layout,
    subarray: Option<Subarray>,
    buffers: FxHashMap<Field, Binding>,
    status: QueryStatus,
    cursor: Option<ReadCursor>,
    cancel: CancelToken,
}

impl<'a> Query<'a> {
    /// A query against `array`, which must be open in `mode`.
    pub fn new(array: &'a Array, mode: Mode) -> TesseraResult<Self> {
        let opened = array.mode()?;
        if opened != mode {
            tessera_bail!(Mode: "cannot {} array {} opened for {}", mode, array.uri(), opened);
        }
        let schema = array.schema()?;
        let layout = match (mode, schema.array_type()) {
            (Mode::Write, ArrayType::Sparse) => Layout::Unordered,
            _ => Layout::RowMajor,
        };
        Ok(Self {
            array,
            mode,
            schema,
            layout,
            subarray: None,
            buffers: FxHashMap::default(),
            status: QueryStatus::Created,
            cursor: None,
            cancel: array.context().cancel_token(),
        })
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn status(&self) -> QueryStatus {
        self.status
    }

    pub fn schema(&self) -> &ArraySchema {
        &self.schema
    }

    fn check_configurable(&self) -> TesseraResult<()> {
        if !matches!(self.status, QueryStatus::Created | QueryStatus::Configured) {
            tessera_bail!(
                InvalidArgument: "cannot reconfigure a query after it was submitted (status {})",
                self.status
            );
        }
        Ok(())
    }

    fn mark_configured(&mut self) {
        if self.status == QueryStatus::Created {
            self.status = QueryStatus::Configured;
        }
    }

    fn is_sparse_write(&self) -> bool {
        self.mode == Mode::Write && self.schema.array_type() == ArrayType::Sparse
    }

    fn is_dense_write(&self) -> bool {
        self.mode == Mode::Write && self.schema.array_type() == ArrayType::Dense
    }

    /// Choose the order cells are written in or produced in.
    pub fn set_layout(&mut self, layout: Layout) -> TesseraResult<&mut Self> {
        self.check_configurable()?;
        let supported = if self.is_sparse_write() {
            matches!(layout, Layout::Unordered | Layout::GlobalOrder)
        } else if self.is_dense_write() {
            layout != Layout::Unordered
        } else {
            true
        };
        if !supported {
            tessera_bail!(
                MalformedQuery: "{} layout is not supported by {} writes",
                layout,
                self.schema.array_type()
            );
        }
        self.layout = layout;
        self.mark_configured();
        Ok(self)
    }

    /// Restrict the query to one `[lo, hi]` range per dimension, given as
    /// `[lo0, hi0, lo1, hi1, ...]`.
    pub fn set_subarray<T>(&mut self, bounds: &[T]) -> TesseraResult<&mut Self>
    where
        T: NativePType + Into<PValue>,
    {
        self.set_subarray_ranges(Subarray::from_bounds(bounds)?)
    }

    /// Restrict the query to a subarray with any number of ranges per dimension.
    pub fn set_subarray_ranges(&mut self, subarray: Subarray) -> TesseraResult<&mut Self> {
        self.check_configurable()?;
        if self.is_sparse_write() {
            tessera_bail!(MalformedQuery: "sparse writes take their cells from the coordinates");
        }
        subarray.check_types(self.schema.domain())?;
        self.subarray = Some(subarray);
        self.mark_configured();
        Ok(self)
    }

    /// Bind an owned buffer to the field `name`.
    ///
    /// Write buffers hold the data to write. Read buffers are filled from the start on every
    /// submission and their length caps the number of cells produced.
    pub fn set_buffer<T: NativePType>(
        &mut self,
        name: &str,
        data: Vec<T>,
    ) -> TesseraResult<&mut Self> {
        if self.status.is_terminal() {
            tessera_bail!(InvalidArgument: "cannot bind buffers to a {} query", self.status);
        }
        let field = self.schema.field(name)?;
        let expected = self.schema.field_ptype(field);
        if T::PTYPE != expected {
            tessera_bail!(MismatchedTypes: expected, T::PTYPE);
        }
        if self.is_dense_write() && !matches!(field, Field::Attribute(_)) {
            tessera_bail!(
                MalformedQuery: "dense writes take coordinates from the subarray, not from {}",
                name
            );
        }
        self.buffers
            .insert(field, Binding::new(field, data, self.mode == Mode::Write));
        self.mark_configured();
        Ok(self)
    }

    fn binding(&self, name: &str) -> TesseraResult<&Binding> {
        let field = self.schema.field(name)?;
        self.buffers
            .get(&field)
            .ok_or_else(|| tessera_err!(NotFound: "no buffer bound to {}", name))
    }

    /// The elements produced into the buffer of `name` by the last submission.
    pub fn buffer<T: NativePType>(&self, name: &str) -> TesseraResult<&[T]> {
        self.binding(name)?.typed()
    }

    /// The bytes produced into the buffer of `name` by the last submission.
    pub fn buffer_size(&self, name: &str) -> TesseraResult<usize> {
        Ok(self.binding(name)?.size())
    }

    /// Unbind the buffer of `name` and hand it back whole.
    pub fn take_buffer<T: NativePType>(&mut self, name: &str) -> TesseraResult<Vec<T>> {
        let field = self.schema.field(name)?;
        let binding = self
            .buffers
            .remove(&field)
            .ok_or_else(|| tessera_err!(NotFound: "no buffer bound to {}", name))?;
        binding.into_typed()
    }

    /// Run the query.
    ///
    /// Writes commit all their cells as one fragment and complete. Reads fill the bound buffers
    /// and report [`QueryStatus::Incomplete`] while cells remain. On error the query moves to
    /// [`QueryStatus::Failed`] and the error is returned.
    pub fn submit(&mut self) -> TesseraResult<QueryStatus> {
        if self.status.is_terminal() {
            tessera_bail!(InvalidArgument: "query is already {}", self.status);
        }
        let timer = self
            .array
            .context()
            .metrics()
            .timer(SUBMIT_TIMER, self.array.uri());
        let _timing = timer.time();

        self.status = QueryStatus::InProgress;
        let result = self.cancel.check().and_then(|()| match self.mode {
            Mode::Read => self.submit_read(),
            Mode::Write => self.submit_write(),
        });
        match result {
            Ok(status) => {
                self.status = status;
                Ok(status)
            }
            Err(err) => {
                log::debug!("query on {} failed: {}", self.array.uri(), err);
                self.status = QueryStatus::Failed;
                Err(err)
            }
        }
    }

    fn submit_write(&mut self) -> TesseraResult<QueryStatus> {
        let ctx = self.array.context();
        let lock = ctx.writer_lock(self.array.uri());
        let _guard = lock.lock();
        match self.schema.array_type() {
            ArrayType::Sparse => self.write_sparse(),
            ArrayType::Dense => self.write_dense(),
        }
    }

    /// The subarray of the query with its bounds validated.
    fn resolved_subarray(&self) -> TesseraResult<Subarray> {
        match &self.subarray {
            Some(subarray) => subarray.resolve(self.schema.domain()),
            None => Ok(Subarray::full(self.schema.domain())),
        }
    }
}

impl Display for QueryStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            QueryStatus::Created => "created",
            QueryStatus::Configured => "configured",
            QueryStatus::InProgress => "in progress",
            QueryStatus::Completed => "completed",
            QueryStatus::Incomplete => "incomplete",
            QueryStatus::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// The comparator producing `layout` over `cells`.
fn layout_comparator<'s>(
    schema: &'s ArraySchema,
    layout: Layout,
    cells: &CellBatch,
) -> CellComparator<'s> {
    match layout {
        Layout::RowMajor => CellComparator::cells(schema, Order::RowMajor),
        Layout::ColMajor => CellComparator::cells(schema, Order::ColMajor),
        Layout::GlobalOrder | Layout::Unordered => CellComparator::global(schema, cells),
    }
}
