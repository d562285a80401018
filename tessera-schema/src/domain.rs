use std::fmt::{Display, Formatter};

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tessera_dtype::PType;
use tessera_error::{TesseraResult, tessera_bail, tessera_err};

use crate::Dimension;

/// The coordinate space of an array: an ordered, non-empty list of dimensions sharing one
/// physical type.
///
/// The order of the dimensions is the order of the scalars inside every coordinate tuple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Domain {
    dimensions: Vec<Dimension>,
}

impl Domain {
    /// Start building a domain.
    pub fn builder() -> DomainBuilder {
        DomainBuilder::default()
    }

    pub(crate) fn validate(&self) -> TesseraResult<()> {
        let Some(first) = self.dimensions.first() else {
            tessera_bail!(Schema: "a domain needs at least one dimension");
        };
        for dim in &self.dimensions {
            dim.validate()?;
            if dim.ptype() != first.ptype() {
                tessera_bail!(
                    Schema: "dimension {} has type {} but the domain uses {}",
                    dim.name(),
                    dim.ptype(),
                    first.ptype()
                );
            }
        }
        if let Some(dup) = self.dimensions.iter().map(Dimension::name).duplicates().next() {
            tessera_bail!(Schema: "duplicate dimension name {}", dup);
        }
        Ok(())
    }

    /// The number of dimensions.
    pub fn ndim(&self) -> usize {
        self.dimensions.len()
    }

    /// The physical type shared by every dimension.
    pub fn ptype(&self) -> PType {
        self.dimensions[0].ptype()
    }

    /// The dimensions, in coordinate tuple order.
    pub fn dimensions(&self) -> &[Dimension] {
        &self.dimensions
    }

    /// Look up a dimension by name.
    pub fn dimension(&self, name: &str) -> Option<&Dimension> {
        self.dimensions.iter().find(|d| d.name() == name)
    }

    /// The position of the named dimension inside a coordinate tuple.
    pub fn dimension_index(&self, name: &str) -> Option<usize> {
        self.dimensions.iter().position(|d| d.name() == name)
    }

    /// The number of bytes of one coordinate tuple.
    pub fn tuple_width(&self) -> usize {
        self.ndim() * self.ptype().byte_width()
    }

    /// Whether every coordinate of the little-endian `tuple` lies inside its dimension.
    pub fn contains_tuple(&self, tuple: &[u8]) -> bool {
        let width = self.ptype().byte_width();
        tuple.len() == self.tuple_width()
            && self
                .dimensions
                .iter()
                .zip(tuple.chunks_exact(width))
                .all(|(dim, coord)| dim.contains_le(coord))
    }

    /// The per-dimension tile indices of an in-domain little-endian `tuple`.
    pub fn tile_coords(&self, tuple: &[u8]) -> Vec<u64> {
        let width = self.ptype().byte_width();
        self.dimensions
            .iter()
            .zip(tuple.chunks_exact(width))
            .map(|(dim, coord)| dim.tile_index(coord))
            .collect()
    }

    /// The number of cells in the domain, or `None` for float domains and domains too large to
    /// count.
    pub fn cell_count(&self) -> Option<u128> {
        self.dimensions
            .iter()
            .try_fold(1u128, |acc, d| acc.checked_mul(d.cell_count()?))
    }
}

impl Display for Domain {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{{}}}", self.dimensions.iter().format(", "))
    }
}

/// Incremental constructor for a [`Domain`].
#[derive(Debug, Default)]
pub struct DomainBuilder {
    dimensions: Vec<Dimension>,
}

impl DomainBuilder {
    /// Append a dimension.
    ///
    /// Fails if the name is already taken or the type differs from the earlier dimensions.
    pub fn add_dimension(mut self, dimension: Dimension) -> TesseraResult<Self> {
        if self.dimensions.iter().any(|d| d.name() == dimension.name()) {
            tessera_bail!(Schema: "duplicate dimension name {}", dimension.name());
        }
        if let Some(first) = self.dimensions.first() {
            if first.ptype() != dimension.ptype() {
                return Err(tessera_err!(
                    Schema: "dimension {} has type {} but the domain uses {}",
                    dimension.name(),
                    dimension.ptype(),
                    first.ptype()
                ));
            }
        }
        self.dimensions.push(dimension);
        Ok(self)
    }

    /// Finish the domain. Fails if no dimension was added.
    pub fn build(self) -> TesseraResult<Domain> {
        let domain = Domain {
            dimensions: self.dimensions,
        };
        domain.validate()?;
        Ok(domain)
    }
}
