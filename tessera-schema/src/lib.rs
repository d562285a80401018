#![deny(missing_docs)]

//! The logical model of a Tessera array.
//!
//! An [`ArraySchema`] binds a [`Domain`] (an ordered list of [`Dimension`]s describing the
//! coordinate space) to a list of [`Attribute`]s (the values stored in each cell), together
//! with the storage kind ([`ArrayType`]) and the cell and tile iteration [`Order`]s.
//!
//! Schemas are built once through [`SchemaBuilder`] and are immutable afterwards.

pub use attribute::*;
pub use dimension::*;
pub use domain::*;
pub use schema::*;

mod attribute;
mod dimension;
mod domain;
mod schema;

/// The reserved field name under which coordinate tuples are read and written.
///
/// No attribute or dimension may use this name.
pub const TESSERA_COORDS: &str = "__coords";
