use std::fmt::{Display, Formatter};

use itertools::Itertools;
use tessera_dtype::{NativePType, PType, PValue};
use tessera_error::{TesseraResult, tessera_bail, tessera_err};
use tessera_schema::Domain;

use crate::fragment::Mbr;

/// A region of an array's domain: one or more inclusive ranges per dimension.
///
/// A cell is inside the subarray when each of its coordinates falls into at least one range of
/// its dimension. Dimensions without any range cover their whole domain.
#[derive(Debug, Clone, PartialEq)]
pub struct Subarray {
    ranges: Vec<Vec<(PValue, PValue)>>,
}

impl Subarray {
    /// A subarray over `ndim` dimensions with no ranges yet.
    pub fn new(ndim: usize) -> Self {
        Self {
            ranges: vec![Vec::new(); ndim],
        }
    }

    /// A single range per dimension from `[lo0, hi0, lo1, hi1, ...]`.
    pub fn from_bounds<T>(bounds: &[T]) -> TesseraResult<Self>
    where
        T: NativePType + Into<PValue>,
    {
        if bounds.is_empty() || bounds.len() % 2 != 0 {
            tessera_bail!(
                MalformedQuery: "subarray bounds need a [lo, hi] pair per dimension, got {} values",
                bounds.len()
            );
        }
        Ok(Self {
            ranges: bounds
                .iter()
                .tuples()
                .map(|(lo, hi)| vec![((*lo).into(), (*hi).into())])
                .collect(),
        })
    }

    /// The whole domain.
    pub fn full(domain: &Domain) -> Self {
        Self {
            ranges: domain
                .dimensions()
                .iter()
                .map(|d| vec![d.domain()])
                .collect(),
        }
    }

    /// Add an inclusive range to dimension `dim`.
    pub fn add_range(
        &mut self,
        dim: usize,
        lo: impl Into<PValue>,
        hi: impl Into<PValue>,
    ) -> TesseraResult<()> {
        let ndim = self.ranges.len();
        let ranges = self
            .ranges
            .get_mut(dim)
            .ok_or_else(|| tessera_err!(OutOfBounds: dim, 0, ndim))?;
        ranges.push((lo.into(), hi.into()));
        Ok(())
    }

    /// Builder-style [`Subarray::add_range`].
    pub fn with_range(
        mut self,
        dim: usize,
        lo: impl Into<PValue>,
        hi: impl Into<PValue>,
    ) -> TesseraResult<Self> {
        self.add_range(dim, lo, hi)?;
        Ok(self)
    }

    /// The number of dimensions.
    pub fn ndim(&self) -> usize {
        self.ranges.len()
    }

    /// The ranges of dimension `dim`.
    pub fn ranges(&self, dim: usize) -> &[(PValue, PValue)] {
        &self.ranges[dim]
    }

    /// Check the arity and the value types against `domain`.
    pub(crate) fn check_types(&self, domain: &Domain) -> TesseraResult<()> {
        if self.ndim() != domain.ndim() {
            tessera_bail!(
                MalformedQuery: "subarray has {} dimensions but the domain has {}",
                self.ndim(),
                domain.ndim()
            );
        }
        let ptype = domain.ptype();
        for (lo, hi) in self.ranges.iter().flatten() {
            for value in [lo, hi] {
                if !value.is_instance_of(&ptype) {
                    tessera_bail!(MismatchedTypes: ptype, value.ptype());
                }
            }
        }
        Ok(())
    }

    /// Validate the bounds against `domain`, filling dimensions without ranges with their whole
    /// domain.
    pub(crate) fn resolve(&self, domain: &Domain) -> TesseraResult<Subarray> {
        self.check_types(domain)?;
        let mut resolved = self.clone();
        for (dim, ranges) in domain.dimensions().iter().zip(resolved.ranges.iter_mut()) {
            if ranges.is_empty() {
                ranges.push(dim.domain());
                continue;
            }
            for &(lo, hi) in ranges.iter() {
                if lo.is_nan() || hi.is_nan() {
                    tessera_bail!(MalformedQuery: "NaN bound on dimension {}", dim.name());
                }
                if lo > hi {
                    tessera_bail!(
                        MalformedQuery: "reversed range [{}, {}] on dimension {}",
                        lo,
                        hi,
                        dim.name()
                    );
                }
                if !dim.contains(lo) || !dim.contains(hi) {
                    let (dlo, dhi) = dim.domain();
                    tessera_bail!(
                        MalformedQuery: "range [{}, {}] of dimension {} leaves the domain [{}, {}]",
                        lo,
                        hi,
                        dim.name(),
                        dlo,
                        dhi
                    );
                }
            }
        }
        Ok(resolved)
    }

    /// Whether every coordinate of the little-endian `tuple` falls into a range of its dimension.
    pub(crate) fn contains_tuple(&self, ptype: PType, tuple: &[u8]) -> bool {
        tuple
            .chunks_exact(ptype.byte_width())
            .zip(&self.ranges)
            .all(|(coord, ranges)| {
                PValue::from_le_bytes(ptype, coord)
                    .is_ok_and(|v| ranges.iter().any(|&(lo, hi)| lo <= v && v <= hi))
            })
    }

    /// Whether any cell inside `mbr` may fall into the subarray.
    pub(crate) fn overlaps(&self, mbr: &Mbr) -> bool {
        self.ranges
            .iter()
            .zip(mbr.ranges())
            .all(|(ranges, &(min, max))| ranges.iter().any(|&(lo, hi)| lo <= max && min <= hi))
    }

    /// The share of the volume of `mbr` covered by the subarray, between 0 and 1.
    pub(crate) fn overlap_fraction(&self, mbr: &Mbr) -> f64 {
        self.ranges
            .iter()
            .zip(mbr.ranges())
            .map(|(ranges, &(min, max))| {
                match (min.as_i128(), max.as_i128()) {
                    (Some(min), Some(max)) => {
                        let covered: i128 = merge_int_ranges(ranges)
                            .into_iter()
                            .map(|(lo, hi)| (hi.min(max) - lo.max(min) + 1).max(0))
                            .sum();
                        covered as f64 / (max - min + 1) as f64
                    }
                    _ => {
                        let (min, max) = (min.to_f64_lossy(), max.to_f64_lossy());
                        if max == min {
                            let hit = ranges.iter().any(|(lo, hi)| {
                                lo.to_f64_lossy() <= min && min <= hi.to_f64_lossy()
                            });
                            return if hit { 1.0 } else { 0.0 };
                        }
                        let covered: f64 = ranges
                            .iter()
                            .map(|(lo, hi)| {
                                (hi.to_f64_lossy().min(max) - lo.to_f64_lossy().max(min)).max(0.0)
                            })
                            .sum();
                        (covered / (max - min)).min(1.0)
                    }
                }
            })
            .product()
    }

    /// The number of distinct cells of an integer subarray, or `None` for float domains.
    pub fn cell_count(&self) -> Option<u128> {
        self.ranges.iter().try_fold(1u128, |acc, ranges| {
            let ranges = ranges
                .iter()
                .map(|&(lo, hi)| Some((lo.as_i128()?, hi.as_i128()?)))
                .collect::<Option<Vec<_>>>()?;
            let count: u128 = merge_int_ranges(&ranges)
                .into_iter()
                .map(|(lo, hi)| u128::try_from(hi - lo + 1).unwrap_or(0))
                .sum();
            acc.checked_mul(count)
        })
    }

    /// The ranges of dimension `dim` sorted and coalesced, for integer domains.
    pub(crate) fn int_ranges(&self, dim: usize) -> TesseraResult<Vec<(i128, i128)>> {
        let ranges = self.ranges[dim]
            .iter()
            .map(|&(lo, hi)| match (lo.as_i128(), hi.as_i128()) {
                (Some(lo), Some(hi)) => Ok((lo, hi)),
                _ => Err(tessera_err!(MalformedQuery: "cannot enumerate float ranges")),
            })
            .try_collect::<_, Vec<_>, _>()?;
        Ok(merge_int_ranges(&ranges))
    }

    /// The lowest and highest bound over the ranges of dimension `dim`.
    pub(crate) fn bounds(&self, dim: usize) -> Option<(PValue, PValue)> {
        let mut ranges = self.ranges[dim].iter().copied();
        let first = ranges.next()?;
        Some(ranges.fold(first, |(lo, hi), (l, h)| {
            (if l < lo { l } else { lo }, if h > hi { h } else { hi })
        }))
    }

    /// Cut dimension `dim` after `at`: the first half keeps the values up to `at`, the second
    /// the values above it. `None` when either half would be empty.
    pub(crate) fn split_at(&self, dim: usize, at: PValue) -> Option<(Subarray, Subarray)> {
        let above = at.successor()?;
        let below = self.ranges[dim]
            .iter()
            .filter(|&&(lo, _)| lo <= at)
            .map(|&(lo, hi)| (lo, if hi > at { at } else { hi }))
            .collect::<Vec<_>>();
        let over = self.ranges[dim]
            .iter()
            .filter(|&&(_, hi)| hi > at)
            .map(|&(lo, hi)| (if lo < above { above } else { lo }, hi))
            .collect::<Vec<_>>();
        if below.is_empty() || over.is_empty() {
            return None;
        }
        let mut first = self.clone();
        first.ranges[dim] = below;
        let mut second = self.clone();
        second.ranges[dim] = over;
        Some((first, second))
    }
}

/// Sort and coalesce overlapping or adjacent integer ranges.
pub(crate) fn merge_int_ranges<R>(ranges: &[R]) -> Vec<(i128, i128)>
where
    R: IntRange,
{
    let mut sorted = ranges
        .iter()
        .filter_map(IntRange::bounds)
        .collect::<Vec<_>>();
    sorted.sort_unstable();
    let mut merged: Vec<(i128, i128)> = Vec::with_capacity(sorted.len());
    for (lo, hi) in sorted {
        match merged.last_mut() {
            Some(last) if lo <= last.1 + 1 => last.1 = last.1.max(hi),
            _ => merged.push((lo, hi)),
        }
    }
    merged
}

pub(crate) trait IntRange {
    fn bounds(&self) -> Option<(i128, i128)>;
}

impl IntRange for (i128, i128) {
    fn bounds(&self) -> Option<(i128, i128)> {
        Some(*self)
    }
}

impl IntRange for (PValue, PValue) {
    fn bounds(&self) -> Option<(i128, i128)> {
        Some((self.0.as_i128()?, self.1.as_i128()?))
    }
}

impl Display for Subarray {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            self.ranges
                .iter()
                .map(|ranges| ranges
                    .iter()
                    .map(|(lo, hi)| format!("[{}, {}]", lo, hi))
                    .join(" ∪ "))
                .format(" × ")
        )
    }
}
