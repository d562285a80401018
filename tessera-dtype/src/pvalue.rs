use std::cmp::Ordering;
use std::fmt::{Display, Formatter};

use num_traits::{NumCast, ToPrimitive};
use paste::paste;
use serde::{Deserialize, Serialize};
use tessera_error::{TesseraError, TesseraExpect, TesseraResult, tessera_bail, tessera_err};

use crate::{NativePType, PType};

/// A single primitive value, tagged with its physical type.
///
/// Used wherever a scalar has to travel without its buffer: dimension bounds, tile extents,
/// fill values, and subarray ranges.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[allow(missing_docs)]
pub enum PValue {
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
}

impl PartialEq for PValue {
    fn eq(&self, other: &Self) -> bool {
        self.partial_cmp(other) == Some(Ordering::Equal)
    }
}

impl PartialOrd for PValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::U8(s), o) => Some((*s as u64).cmp(&o.as_u64()?)),
            (Self::U16(s), o) => Some((*s as u64).cmp(&o.as_u64()?)),
            (Self::U32(s), o) => Some((*s as u64).cmp(&o.as_u64()?)),
            (Self::U64(s), o) => Some((*s).cmp(&o.as_u64()?)),
            (Self::I8(s), o) => Some((*s as i64).cmp(&o.as_i64()?)),
            (Self::I16(s), o) => Some((*s as i64).cmp(&o.as_i64()?)),
            (Self::I32(s), o) => Some((*s as i64).cmp(&o.as_i64()?)),
            (Self::I64(s), o) => Some((*s).cmp(&o.as_i64()?)),
            (Self::F32(s), Self::F32(o)) => Some(s.total_compare(*o)),
            (Self::F64(s), Self::F64(o)) => Some(s.total_compare(*o)),
            (..) => None,
        }
    }
}

macro_rules! as_primitive {
    ($T:ty) => {
        paste! {
            #[doc = "Access PValue as `" $T "`, returning `None` if conversion is unsuccessful"]
            pub fn [<as_ $T>](self) -> Option<$T> {
                match self {
                    PValue::U8(v) => <$T as NumCast>::from(v),
                    PValue::U16(v) => <$T as NumCast>::from(v),
                    PValue::U32(v) => <$T as NumCast>::from(v),
                    PValue::U64(v) => <$T as NumCast>::from(v),
                    PValue::I8(v) => <$T as NumCast>::from(v),
                    PValue::I16(v) => <$T as NumCast>::from(v),
                    PValue::I32(v) => <$T as NumCast>::from(v),
                    PValue::I64(v) => <$T as NumCast>::from(v),
                    PValue::F32(v) => <$T as NumCast>::from(v),
                    PValue::F64(v) => <$T as NumCast>::from(v),
                }
            }
        }
    };
}

impl PValue {
    /// The physical type of the value.
    pub fn ptype(&self) -> PType {
        match self {
            Self::U8(_) => PType::U8,
            Self::U16(_) => PType::U16,
            Self::U32(_) => PType::U32,
            Self::U64(_) => PType::U64,
            Self::I8(_) => PType::I8,
            Self::I16(_) => PType::I16,
            Self::I32(_) => PType::I32,
            Self::I64(_) => PType::I64,
            Self::F32(_) => PType::F32,
            Self::F64(_) => PType::F64,
        }
    }

    /// Whether the value is of the given physical type.
    pub fn is_instance_of(&self, ptype: &PType) -> bool {
        &self.ptype() == ptype
    }

    /// Extract the value as the native type `T`, failing if the physical types differ.
    #[inline]
    pub fn as_primitive<T: NativePType + TryFrom<PValue, Error = TesseraError>>(
        &self,
    ) -> TesseraResult<T> {
        T::try_from(*self)
    }

    /// The zero value of the given physical type.
    pub fn zero(ptype: PType) -> Self {
        crate::match_each_native_ptype!(ptype, |$T| { PValue::from(<$T>::default()) })
    }

    /// Decode a value of `ptype` from the first bytes of `bytes`.
    pub fn from_le_bytes(ptype: PType, bytes: &[u8]) -> TesseraResult<Self> {
        if bytes.len() < ptype.byte_width() {
            tessera_bail!(
                Corrupted: "need {} bytes to decode a {} but got {}",
                ptype.byte_width(),
                ptype,
                bytes.len()
            );
        }
        Ok(crate::match_each_native_ptype!(ptype, |$T| {
            PValue::from(<$T as NativePType>::read_le(bytes))
        }))
    }

    /// Append the little-endian bytes of the value to `out`.
    pub fn write_le(&self, out: &mut Vec<u8>) {
        match self {
            PValue::U8(v) => v.write_le(out),
            PValue::U16(v) => v.write_le(out),
            PValue::U32(v) => v.write_le(out),
            PValue::U64(v) => v.write_le(out),
            PValue::I8(v) => v.write_le(out),
            PValue::I16(v) => v.write_le(out),
            PValue::I32(v) => v.write_le(out),
            PValue::I64(v) => v.write_le(out),
            PValue::F32(v) => v.write_le(out),
            PValue::F64(v) => v.write_le(out),
        }
    }

    /// The little-endian bytes of the value.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.ptype().byte_width());
        self.write_le(&mut out);
        out
    }

    /// Build a value of an integer `ptype` from an `i128`, failing if it does not fit.
    pub fn try_from_i128(ptype: PType, value: i128) -> TesseraResult<Self> {
        if !ptype.is_int() {
            tessera_bail!(MismatchedTypes: "integer", ptype);
        }
        crate::match_each_integer_ptype!(ptype, |$T| {
            <$T as NumCast>::from(value)
                .map(PValue::from)
                .ok_or_else(|| tessera_err!("{} does not fit into {}", value, ptype))
        })
    }

    /// The value widened to `i128`, for integer arithmetic on coordinates.
    ///
    /// Returns `None` for floating point values.
    pub fn as_i128(self) -> Option<i128> {
        match self {
            PValue::U8(v) => Some(v as i128),
            PValue::U16(v) => Some(v as i128),
            PValue::U32(v) => Some(v as i128),
            PValue::U64(v) => Some(v as i128),
            PValue::I8(v) => Some(v as i128),
            PValue::I16(v) => Some(v as i128),
            PValue::I32(v) => Some(v as i128),
            PValue::I64(v) => Some(v as i128),
            PValue::F32(_) | PValue::F64(_) => None,
        }
    }

    /// The value as `f64`. Integers wider than 53 bits may lose precision.
    pub fn to_f64_lossy(self) -> f64 {
        match self {
            PValue::U8(v) => v as f64,
            PValue::U16(v) => v as f64,
            PValue::U32(v) => v as f64,
            PValue::U64(v) => v.to_f64().tessera_expect("u64 always converts to f64"),
            PValue::I8(v) => v as f64,
            PValue::I16(v) => v as f64,
            PValue::I32(v) => v as f64,
            PValue::I64(v) => v.to_f64().tessera_expect("i64 always converts to f64"),
            PValue::F32(v) => v as f64,
            PValue::F64(v) => v,
        }
    }

    /// Whether the value is NaN. Always `false` for integers.
    pub fn is_nan(&self) -> bool {
        match self {
            PValue::F32(v) => v.is_nan(),
            PValue::F64(v) => v.is_nan(),
            _ => false,
        }
    }

    /// Whether the value is finite. Always `true` for integers.
    pub fn is_finite(&self) -> bool {
        match self {
            PValue::F32(v) => v.is_finite(),
            PValue::F64(v) => v.is_finite(),
            _ => true,
        }
    }

    /// The smallest value of the same type ordered after this one, or `None` at the top of the
    /// type. Floats step through the finite values in total order, so `-0.0` precedes `0.0`.
    pub fn successor(self) -> Option<Self> {
        match self {
            PValue::F32(v) => {
                let next = if v == 0.0 && v.is_sign_negative() { 0.0 } else { v.next_up() };
                next.is_finite().then_some(PValue::F32(next))
            }
            PValue::F64(v) => {
                let next = if v == 0.0 && v.is_sign_negative() { 0.0 } else { v.next_up() };
                next.is_finite().then_some(PValue::F64(next))
            }
            _ => PValue::try_from_i128(self.ptype(), self.as_i128()? + 1).ok(),
        }
    }

    /// The largest value of the same type ordered before this one, or `None` at the bottom of
    /// the type.
    pub fn predecessor(self) -> Option<Self> {
        match self {
            PValue::F32(v) => {
                let prev = if v == 0.0 && v.is_sign_positive() { -0.0 } else { v.next_down() };
                prev.is_finite().then_some(PValue::F32(prev))
            }
            PValue::F64(v) => {
                let prev = if v == 0.0 && v.is_sign_positive() { -0.0 } else { v.next_down() };
                prev.is_finite().then_some(PValue::F64(prev))
            }
            _ => PValue::try_from_i128(self.ptype(), self.as_i128()? - 1).ok(),
        }
    }

    /// A value of the same type near the middle of `[self, other)`.
    ///
    /// Returns `None` unless `self` orders strictly before `other`.
    pub fn midpoint(self, other: Self) -> Option<Self> {
        if self.partial_cmp(&other) != Some(Ordering::Less) {
            return None;
        }
        match (self, other) {
            (PValue::F32(lo), PValue::F32(hi)) => {
                let mid = lo / 2.0 + hi / 2.0;
                let inside = mid.total_cmp(&lo).is_ge() && mid.total_cmp(&hi).is_lt();
                Some(PValue::F32(if inside { mid } else { lo }))
            }
            (PValue::F64(lo), PValue::F64(hi)) => {
                let mid = lo / 2.0 + hi / 2.0;
                let inside = mid.total_cmp(&lo).is_ge() && mid.total_cmp(&hi).is_lt();
                Some(PValue::F64(if inside { mid } else { lo }))
            }
            _ => {
                let (lo, hi) = (self.as_i128()?, other.as_i128()?);
                PValue::try_from_i128(self.ptype(), lo + (hi - lo) / 2).ok()
            }
        }
    }

    as_primitive!(i8);
    as_primitive!(i16);
    as_primitive!(i32);
    as_primitive!(i64);
    as_primitive!(u8);
    as_primitive!(u16);
    as_primitive!(u32);
    as_primitive!(u64);
    as_primitive!(f32);
    as_primitive!(f64);
}

impl Display for PValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::U8(v) => write!(f, "{}u8", v),
            Self::U16(v) => write!(f, "{}u16", v),
            Self::U32(v) => write!(f, "{}u32", v),
            Self::U64(v) => write!(f, "{}u64", v),
            Self::I8(v) => write!(f, "{}i8", v),
            Self::I16(v) => write!(f, "{}i16", v),
            Self::I32(v) => write!(f, "{}i32", v),
            Self::I64(v) => write!(f, "{}i64", v),
            Self::F32(v) => write!(f, "{}f32", v),
            Self::F64(v) => write!(f, "{}f64", v),
        }
    }
}

macro_rules! pvalue_conversions {
    ($T:ty, $PT:tt) => {
        impl From<$T> for PValue {
            fn from(value: $T) -> Self {
                PValue::$PT(value)
            }
        }

        impl TryFrom<PValue> for $T {
            type Error = TesseraError;

            fn try_from(value: PValue) -> Result<Self, Self::Error> {
                match value {
                    PValue::$PT(v) => Ok(v),
                    other => Err(tessera_err!(MismatchedTypes: stringify!($T), other.ptype())),
                }
            }
        }
    };
}

pvalue_conversions!(u8, U8);
pvalue_conversions!(u16, U16);
pvalue_conversions!(u32, U32);
pvalue_conversions!(u64, U64);
pvalue_conversions!(i8, I8);
pvalue_conversions!(i16, I16);
pvalue_conversions!(i32, I32);
pvalue_conversions!(i64, I64);
pvalue_conversions!(f32, F32);
pvalue_conversions!(f64, F64);

#[cfg(test)]
mod test {
    use std::cmp::Ordering;

    use super::*;

    #[test]
    fn partial_ord_across_integer_widths() {
        assert_eq!(
            PValue::U8(10).partial_cmp(&PValue::U64(11)),
            Some(Ordering::Less)
        );
        assert_eq!(PValue::I32(-3), PValue::I64(-3));
        assert_eq!(PValue::F32(1.0).partial_cmp(&PValue::F64(1.0)), None);
    }

    #[test]
    fn le_bytes_round_trip() {
        for value in [
            PValue::I32(-17),
            PValue::U64(u64::MAX),
            PValue::F64(2.5),
            PValue::I8(i8::MIN),
        ] {
            let bytes = value.to_le_bytes();
            assert_eq!(bytes.len(), value.ptype().byte_width());
            assert_eq!(PValue::from_le_bytes(value.ptype(), &bytes).unwrap(), value);
        }
    }

    #[test]
    fn short_buffer_is_corrupted() {
        let err = PValue::from_le_bytes(PType::I64, &[0, 1, 2]).unwrap_err();
        assert!(matches!(err, TesseraError::Corrupted(..)));
    }

    #[test]
    fn i128_conversion_is_checked() {
        assert_eq!(
            PValue::try_from_i128(PType::U8, 200).unwrap(),
            PValue::U8(200)
        );
        assert!(PValue::try_from_i128(PType::U8, 256).is_err());
        assert!(PValue::try_from_i128(PType::F32, 1).is_err());
        assert_eq!(PValue::I16(-4).as_i128(), Some(-4));
        assert_eq!(PValue::F32(1.0).as_i128(), None);
    }

    #[test]
    fn try_from_requires_exact_type() {
        assert_eq!(i32::try_from(PValue::I32(4)).unwrap(), 4);
        assert!(i32::try_from(PValue::I64(4)).is_err());
        assert_eq!(PValue::I64(4).as_primitive::<i64>().unwrap(), 4);
    }

    #[test]
    fn neighbours() {
        assert_eq!(PValue::I32(4).successor(), Some(PValue::I32(5)));
        assert_eq!(PValue::U8(u8::MAX).successor(), None);
        assert_eq!(PValue::U8(0).predecessor(), None);
        assert_eq!(PValue::I64(-3).predecessor(), Some(PValue::I64(-4)));

        assert_eq!(PValue::F64(1.0).successor(), Some(PValue::F64(1.0f64.next_up())));
        assert_eq!(PValue::F32(f32::MAX).successor(), None);
        assert_eq!(PValue::F64(-0.0).successor(), Some(PValue::F64(0.0)));
        assert_eq!(PValue::F64(0.0).predecessor(), Some(PValue::F64(-0.0)));
        assert!(PValue::F64(-0.0) < PValue::F64(0.0));
    }

    #[test]
    fn midpoints() {
        assert_eq!(PValue::I32(1).midpoint(PValue::I32(4)), Some(PValue::I32(2)));
        assert_eq!(PValue::U8(3).midpoint(PValue::U8(4)), Some(PValue::U8(3)));
        assert_eq!(PValue::I32(4).midpoint(PValue::I32(4)), None);
        assert_eq!(PValue::F64(0.0).midpoint(PValue::F64(1.0)), Some(PValue::F64(0.5)));
        assert_eq!(
            PValue::F32(f32::MIN).midpoint(PValue::F32(f32::MAX)),
            Some(PValue::F32(0.0))
        );

        let lo = PValue::F64(1.0);
        let hi = lo.successor().unwrap();
        assert_eq!(lo.midpoint(hi), Some(lo));
    }

    #[test]
    fn zero_matches_ptype() {
        assert_eq!(PValue::zero(PType::F32).ptype(), PType::F32);
        assert_eq!(PValue::zero(PType::U16), PValue::U16(0));
    }
}
