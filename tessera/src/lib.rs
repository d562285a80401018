//! Sparse and dense multi-dimensional arrays, stored as immutable fragments and read back by
//! rectangular subarrays.
//!
//! This crate re-exports the engine from [`tessera_array`] together with the type, schema, error
//! and metrics crates it is built from. Most programs only need the [`prelude`].

pub use tessera_array::*;
pub use {
    tessera_dtype as dtype, tessera_error as error, tessera_metrics as metrics,
    tessera_schema as schema,
};

pub mod prelude {
    pub use tessera_array::{
        Array, Config, Context, Layout, Mode, ObjectType, Query, QueryStatus, Subarray,
        object_type,
    };
    pub use tessera_dtype::{PType, PValue};
    pub use tessera_error::{TesseraError, TesseraResult};
    pub use tessera_schema::{
        ArraySchema, ArrayType, Attribute, Dimension, Domain, Order, SchemaBuilder, TESSERA_COORDS,
    };
}
