use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use tessera_dtype::{NativePType, PType, PValue};
use tessera_error::{TesseraExpect, TesseraResult, tessera_bail};

use crate::TESSERA_COORDS;

/// A named, typed axis of an array's coordinate space.
///
/// Coordinates along the dimension fall into the inclusive range `[lo, hi]`. The range is cut
/// into tiles of `extent` coordinates each; a dimension without an extent is a single tile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dimension {
    name: String,
    ptype: PType,
    lo: PValue,
    hi: PValue,
    extent: Option<PValue>,
}

impl Dimension {
    /// Create a dimension over the inclusive `domain` with an optional tile `extent`.
    pub fn try_new<T>(
        name: impl Into<String>,
        domain: [T; 2],
        extent: Option<T>,
    ) -> TesseraResult<Self>
    where
        T: NativePType + Into<PValue>,
    {
        Self::try_from_values(
            name,
            T::PTYPE,
            domain[0].into(),
            domain[1].into(),
            extent.map(Into::into),
        )
    }

    /// Create a dimension from untyped bounds, validating that every value is of `ptype`.
    pub fn try_from_values(
        name: impl Into<String>,
        ptype: PType,
        lo: PValue,
        hi: PValue,
        extent: Option<PValue>,
    ) -> TesseraResult<Self> {
        let dim = Self {
            name: name.into(),
            ptype,
            lo,
            hi,
            extent,
        };
        dim.validate()?;
        Ok(dim)
    }

    pub(crate) fn validate(&self) -> TesseraResult<()> {
        if self.name.is_empty() {
            tessera_bail!(Schema: "dimension name must not be empty");
        }
        if self.name == TESSERA_COORDS {
            tessera_bail!(Schema: "dimension name {} is reserved", TESSERA_COORDS);
        }
        let bounds = [
            ("lower bound", Some(self.lo)),
            ("upper bound", Some(self.hi)),
            ("extent", self.extent),
        ];
        for (what, value) in bounds {
            let Some(value) = value else { continue };
            if !value.is_instance_of(&self.ptype) {
                tessera_bail!(
                    Schema: "dimension {} {} {} is not of type {}",
                    self.name,
                    what,
                    value,
                    self.ptype
                );
            }
            if !value.is_finite() {
                tessera_bail!(Schema: "dimension {} {} must be finite", self.name, what);
            }
        }
        if self.lo > self.hi {
            tessera_bail!(
                Schema: "dimension {} has lower bound {} above upper bound {}",
                self.name,
                self.lo,
                self.hi
            );
        }

        let Some(extent) = self.extent else {
            return Ok(());
        };
        if extent <= PValue::zero(self.ptype) {
            tessera_bail!(Schema: "dimension {} tile extent must be positive", self.name);
        }
        let fits = match (self.lo.as_i128(), self.hi.as_i128(), extent.as_i128()) {
            (Some(lo), Some(hi), Some(extent)) => extent <= hi - lo + 1,
            _ => {
                let span = self.hi.to_f64_lossy() - self.lo.to_f64_lossy();
                span == 0.0 || extent.to_f64_lossy() <= span
            }
        };
        if !fits {
            tessera_bail!(
                Schema: "dimension {} tile extent {} exceeds the domain [{}, {}]",
                self.name,
                extent,
                self.lo,
                self.hi
            );
        }
        Ok(())
    }

    /// The name of the dimension.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The physical type of the dimension's coordinates.
    pub fn ptype(&self) -> PType {
        self.ptype
    }

    /// The inclusive bounds of the dimension.
    pub fn domain(&self) -> (PValue, PValue) {
        (self.lo, self.hi)
    }

    /// The tile extent, or `None` when the whole domain is a single tile.
    pub fn extent(&self) -> Option<PValue> {
        self.extent
    }

    /// Whether `value` lies inside the dimension's domain.
    pub fn contains(&self, value: PValue) -> bool {
        !value.is_nan() && self.lo <= value && value <= self.hi
    }

    /// Whether the little-endian coordinate in `bytes` lies inside the dimension's domain.
    pub fn contains_le(&self, bytes: &[u8]) -> bool {
        PValue::from_le_bytes(self.ptype, bytes).is_ok_and(|v| self.contains(v))
    }

    /// The index of the tile holding the little-endian coordinate in `bytes`.
    ///
    /// The coordinate must lie inside the domain.
    #[allow(clippy::cast_possible_truncation)]
    pub fn tile_index(&self, bytes: &[u8]) -> u64 {
        let Some(extent) = self.extent else {
            return 0;
        };
        let value = PValue::from_le_bytes(self.ptype, bytes)
            .tessera_expect("coordinate must be wide enough for its dimension");
        match (value.as_i128(), self.lo.as_i128(), extent.as_i128()) {
            (Some(v), Some(lo), Some(extent)) => u64::try_from((v - lo) / extent)
                .tessera_expect("tile index of an in-domain coordinate is non-negative"),
            _ => {
                let offset = value.to_f64_lossy() - self.lo.to_f64_lossy();
                let index = (offset / extent.to_f64_lossy())
                    .floor()
                    .max(0.0);
                // float to int casts saturate
                index as u64
            }
        }
    }

    /// The index of the tile holding `value`, which must lie inside the domain.
    pub fn tile_of(&self, value: PValue) -> u64 {
        self.tile_index(&value.to_le_bytes())
    }

    /// The largest coordinate of the domain inside tile `tile`, or `None` past the last tile.
    ///
    /// Float boundaries are found by stepping from the arithmetic boundary to the last value
    /// [`Dimension::tile_index`] places in `tile`.
    #[allow(clippy::cast_possible_truncation)]
    pub fn tile_upper_bound(&self, tile: u64) -> Option<PValue> {
        let Some(extent) = self.extent else {
            return (tile == 0).then_some(self.hi);
        };
        if let (Some(lo), Some(hi), Some(extent)) =
            (self.lo.as_i128(), self.hi.as_i128(), extent.as_i128())
        {
            let first = lo + i128::from(tile) * extent;
            if first > hi {
                return None;
            }
            return PValue::try_from_i128(self.ptype, (first + extent - 1).min(hi)).ok();
        }

        let boundary = self.lo.to_f64_lossy() + (tile as f64 + 1.0) * extent.to_f64_lossy();
        let mut value = match self.ptype {
            PType::F32 => PValue::F32(boundary as f32),
            _ => PValue::F64(boundary),
        };
        if value < self.lo {
            value = self.lo;
        }
        if value > self.hi {
            value = self.hi;
        }
        while self.tile_of(value) > tile {
            value = value.predecessor()?;
        }
        while let Some(next) = value
            .successor()
            .filter(|next| self.contains(*next) && self.tile_of(*next) <= tile)
        {
            value = next;
        }
        (self.tile_of(value) == tile).then_some(value)
    }

    /// The number of coordinates in the domain, for integer dimensions.
    pub fn cell_count(&self) -> Option<u128> {
        let lo = self.lo.as_i128()?;
        let hi = self.hi.as_i128()?;
        u128::try_from(hi - lo + 1).ok()
    }
}

impl Display for Dimension {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}[{}, {}]", self.name, self.ptype, self.lo, self.hi)?;
        if let Some(extent) = self.extent {
            write!(f, " / {}", extent)?;
        }
        Ok(())
    }
}
