use itertools::Itertools;
use tessera_error::{TesseraError, TesseraResult, tessera_bail, tessera_err};
use tessera_metrics::{FRAGMENTS_COMMITTED, WRITE_CELLS};
use tessera_schema::Field;

use super::dense::DenseCells;
use super::{Layout, Query, QueryStatus};
use crate::cells::{CellBatch, CellComparator};
use crate::coords::zip_le;
use crate::fragment::{commit_fragment, decode_tuple};

impl Query<'_> {
    pub(super) fn write_sparse(&self) -> TesseraResult<QueryStatus> {
        let schema = self.schema.clone();
        let domain = schema.domain();
        let coords = self.gather_coords()?;
        let ncells = coords.len() / domain.tuple_width();
        let cells = CellBatch::new(coords, self.gather_attributes(ncells)?, ncells);

        let batch = self.cancel.batch_cells();
        for idx in 0..cells.len() {
            if idx % batch == 0 {
                self.cancel.check()?;
            }
            let coord = cells.coord(&schema, idx);
            if !domain.contains_tuple(coord) {
                let tuple = decode_tuple(&schema, coord)?;
                tessera_bail!(
                    MalformedQuery: "cell {} at ({}) lies outside the domain {}",
                    idx,
                    tuple.iter().format(", "),
                    domain
                );
            }
        }

        let order = CellComparator::global(&schema, &cells);
        if self.layout == Layout::GlobalOrder {
            let misplaced = (1..cells.len()).find(|&i| order.compare(&cells, i - 1, i).is_gt());
            if let Some(idx) = misplaced {
                tessera_bail!(
                    MalformedQuery: "cells {} and {} of a global order write are out of order",
                    idx - 1,
                    idx
                );
            }
        }
        let sorted = order.sorted_indices(&cells);
        let sorted = self.handle_duplicates(&cells, &order, sorted)?;
        self.commit(cells.take(&schema, &sorted))
    }

    pub(super) fn write_dense(&self) -> TesseraResult<QueryStatus> {
        let schema = self.schema.clone();
        let subarray = self.resolved_subarray()?;
        let dim = (0..subarray.ndim()).find(|&d| subarray.ranges(d).len() != 1);
        if let Some(dim) = dim {
            tessera_bail!(
                MalformedQuery: "dense writes need exactly one range on dimension {}",
                schema.domain().dimensions()[dim].name()
            );
        }
        let coords = DenseCells::new(&schema, &subarray, self.layout)?.collect(&self.cancel)?;
        let ncells = coords.len() / schema.domain().tuple_width();
        let attributes = self.gather_attributes(ncells)?;
        let cells = CellBatch::new(coords, attributes, ncells);

        let order = CellComparator::global(&schema, &cells);
        let sorted = order.sorted_indices(&cells);
        self.commit(cells.take(&schema, &sorted))
    }

    /// The interleaved coordinates of a sparse write, from the coordinates buffer or from one
    /// buffer per dimension.
    fn gather_coords(&self) -> TesseraResult<Vec<u8>> {
        let domain = self.schema.domain();
        let dims = (0..domain.ndim())
            .map(|d| self.buffers.get(&Field::Dimension(d)))
            .collect::<Vec<_>>();
        let bound_dims = dims.iter().flatten().count();

        match self.buffers.get(&Field::Coords) {
            Some(_) if bound_dims > 0 => Err(tessera_err!(
                MalformedQuery: "bind either the coordinates or the dimension buffers, not both"
            )),
            Some(coords) => {
                if coords.buffer.len() % domain.ndim() != 0 {
                    tessera_bail!(
                        MalformedQuery: "{} coordinate values do not divide into {} dimensions",
                        coords.buffer.len(),
                        domain.ndim()
                    );
                }
                Ok(coords.buffer.to_le_bytes())
            }
            None if bound_dims == 0 => Err(tessera_err!(
                MalformedQuery: "sparse writes need a coordinates buffer"
            )),
            None => {
                let columns = dims
                    .iter()
                    .zip(domain.dimensions())
                    .map(|(binding, dim)| match binding {
                        Some(binding) => Ok(binding.buffer.to_le_bytes()),
                        None => Err(missing_buffer(dim.name())),
                    })
                    .try_collect::<_, Vec<_>, _>()?;
                zip_le(&columns, domain.ptype().byte_width())
            }
        }
    }

    /// The little-endian values of every attribute, each holding exactly `ncells` cells.
    fn gather_attributes(&self, ncells: usize) -> TesseraResult<Vec<Vec<u8>>> {
        self.schema
            .attributes()
            .iter()
            .enumerate()
            .map(|(idx, attr)| {
                let Some(binding) = self.buffers.get(&Field::Attribute(idx)) else {
                    return Err(missing_buffer(attr.name()));
                };
                if binding.buffer.len() != ncells {
                    tessera_bail!(
                        MalformedQuery: "buffer {} holds {} cells, expected {}",
                        attr.name(),
                        binding.buffer.len(),
                        ncells
                    );
                }
                Ok(binding.buffer.to_le_bytes())
            })
            .collect()
    }

    /// Apply the duplicate policy to `sorted`, where equal coordinates are adjacent and in write
    /// order.
    fn handle_duplicates(
        &self,
        cells: &CellBatch,
        order: &CellComparator<'_>,
        sorted: Vec<usize>,
    ) -> TesseraResult<Vec<usize>> {
        let config = self.array.context().config();
        if config.dedup_coords() {
            let before = sorted.len();
            let kept = sorted
                .into_iter()
                .coalesce(|a, b| {
                    if order.compare(cells, a, b).is_eq() {
                        Ok(b)
                    } else {
                        Err((a, b))
                    }
                })
                .collect::<Vec<_>>();
            if kept.len() < before {
                log::debug!("dropped {} duplicate cells", before - kept.len());
            }
            return Ok(kept);
        }
        if config.check_coord_dups() {
            let duplicate = sorted
                .iter()
                .tuple_windows()
                .find(|&(&a, &b)| order.compare(cells, a, b).is_eq());
            if let Some((&a, _)) = duplicate {
                let tuple = decode_tuple(&self.schema, cells.coord(&self.schema, a))?;
                tessera_bail!(
                    MalformedQuery: "duplicate coordinates ({})",
                    tuple.iter().format(", ")
                );
            }
        }
        Ok(sorted)
    }

    fn commit(&self, cells: CellBatch) -> TesseraResult<QueryStatus> {
        let ctx = self.array.context();
        if cells.is_empty() {
            log::debug!("write to {} holds no cells, nothing to commit", self.array.uri());
            return Ok(QueryStatus::Completed);
        }
        let fragment = commit_fragment(ctx, self.array.uri(), &self.schema, &cells, &self.cancel)?;
        let uri = self.array.uri();
        ctx.metrics().counter(WRITE_CELLS, uri).add(i64::try_from(cells.len())?);
        ctx.metrics().counter(FRAGMENTS_COMMITTED, uri).inc();
        log::debug!(
            "wrote {} cells to {} as {}",
            cells.len(),
            self.array.uri(),
            fragment.name()
        );
        Ok(QueryStatus::Completed)
    }
}

fn missing_buffer(name: &str) -> TesseraError {
    tessera_err!(MalformedQuery: "no buffer bound to {}", name)
}
