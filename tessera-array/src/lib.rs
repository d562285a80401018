//! Storage and query engine for Tessera arrays.
//!
//! An array lives in a directory holding its persisted schema and one immutable fragment file
//! per committed write:
//!
//! ```text
//! <uri>/__array_schema.json
//! <uri>/__fragments/__<timestamp>_<uuid>
//! ```
//!
//! Everything starts from a [`Context`], which owns the configuration, the storage backend and
//! the metrics of a session. Arrays are created with [`Array::create`], opened through an
//! [`Array`] handle and accessed with a [`Query`]. Reads open a snapshot of the fragments
//! committed at open time, so concurrent writers never disturb them.
//!
//! ```
//! use tessera_array::{Array, Context, Layout, Mode, Query, QueryStatus};
//! use tessera_dtype::PType;
//! use tessera_schema::{ArrayType, Attribute, Dimension, Domain, SchemaBuilder};
//!
//! # fn main() -> tessera_error::TesseraResult<()> {
//! let ctx = Context::from_config(tessera_array::Config::new().with("vfs.backend", "memory")?);
//! let schema = SchemaBuilder::new(ArrayType::Sparse)
//!     .with_domain(
//!         Domain::builder()
//!             .add_dimension(Dimension::try_new("rows", [1i32, 4], Some(4))?)?
//!             .add_dimension(Dimension::try_new("cols", [1i32, 4], Some(4))?)?
//!             .build()?,
//!     )?
//!     .add_attribute(Attribute::new("a", PType::I32))?
//!     .build()?;
//! Array::create(&ctx, "mem://doc", &schema)?;
//!
//! let mut array = Array::new(&ctx, "mem://doc");
//! array.open(Mode::Write)?;
//! let mut write = Query::new(&array, Mode::Write)?;
//! write
//!     .set_buffer("__coords", vec![1i32, 1, 2, 4])?
//!     .set_buffer("a", vec![10i32, 20])?;
//! assert_eq!(write.submit()?, QueryStatus::Completed);
//! array.close();
//!
//! array.open(Mode::Read)?;
//! let mut read = Query::new(&array, Mode::Read)?;
//! read.set_layout(Layout::RowMajor)?
//!     .set_subarray(&[1i32, 4, 1, 4])?
//!     .set_buffer("a", vec![0i32; 4])?;
//! assert_eq!(read.submit()?, QueryStatus::Completed);
//! assert_eq!(read.buffer::<i32>("a")?, &[10, 20]);
//! # Ok(())
//! # }
//! ```

pub use array::*;
pub use config::*;
pub use context::Context;
pub use estimate::*;
pub use fragment::{Fragment, Mbr, TileMetadata};
pub use query::{Layout, Query, QueryStatus};
pub use subarray::*;
pub use vfs::{LocalFs, MemFs, Vfs};

mod array;
mod cells;
mod config;
mod context;
pub mod coords;
mod estimate;
pub mod fragment;
mod query;
mod subarray;
#[cfg(test)]
mod tests;
pub mod vfs;
