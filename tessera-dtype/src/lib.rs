#![cfg(target_endian = "little")]
#![deny(missing_docs)]

//! Physical scalar types for Tessera
//!
//! Every coordinate and every fixed-size attribute value in a Tessera array is a single scalar of
//! one of the [`PType`]s defined here. Scalars are persisted little-endian.

pub use ptype::*;
pub use pvalue::*;

mod ptype;
mod pvalue;
