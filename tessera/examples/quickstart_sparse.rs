//! Create a 4x4 sparse array, write three cells and read back the block of rows 1-2 and
//! columns 2-4.
//!
//! ```text
//! cargo run -p tessera --example quickstart_sparse [array path]
//! ```

use log::LevelFilter;
use simplelog::{ColorChoice, Config as LogConfig, TermLogger, TerminalMode};
use tessera::prelude::*;

fn create_array(ctx: &Context, uri: &str) -> TesseraResult<()> {
    let domain = Domain::builder()
        .add_dimension(Dimension::try_new("rows", [1i32, 4], Some(4))?)?
        .add_dimension(Dimension::try_new("cols", [1i32, 4], Some(4))?)?
        .build()?;
    let schema = SchemaBuilder::new(ArrayType::Sparse)
        .with_cell_order(Order::RowMajor)
        .with_tile_order(Order::RowMajor)
        .with_domain(domain)?
        .add_attribute(Attribute::new("a", PType::I32))?
        .build()?;
    Array::create(ctx, uri, &schema)
}

fn write_array(ctx: &Context, uri: &str) -> TesseraResult<()> {
    let mut array = Array::new(ctx, uri);
    array.open(Mode::Write)?;
    let mut query = Query::new(&array, Mode::Write)?;
    query
        .set_layout(Layout::Unordered)?
        .set_buffer("a", vec![1i32, 2, 3])?
        .set_buffer(TESSERA_COORDS, vec![1i32, 1, 2, 4, 2, 3])?;
    query.submit()?;
    Ok(())
}

fn read_array(ctx: &Context, uri: &str) -> TesseraResult<()> {
    let mut array = Array::new(ctx, uri);
    array.open(Mode::Read)?;
    let subarray = Subarray::from_bounds(&[1i32, 2, 2, 4])?;
    let data_size = array.max_buffer_size("a", &subarray)?;
    let coords_size = array.max_buffer_size(TESSERA_COORDS, &subarray)?;

    let mut query = Query::new(&array, Mode::Read)?;
    query
        .set_subarray_ranges(subarray)?
        .set_layout(Layout::RowMajor)?
        .set_buffer("a", vec![0i32; data_size / size_of::<i32>()])?
        .set_buffer(TESSERA_COORDS, vec![0i32; coords_size / size_of::<i32>()])?;
    let status = query.submit()?;
    log::info!("read of {} {}", uri, status);

    let coords = query.buffer::<i32>(TESSERA_COORDS)?;
    for (cell, value) in coords.chunks_exact(2).zip(query.buffer::<i32>("a")?) {
        println!("Cell ({}, {}) has data {}", cell[0], cell[1], value);
    }
    Ok(())
}

fn main() -> TesseraResult<()> {
    TermLogger::init(
        LevelFilter::Info,
        LogConfig::default(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    )
    .ok();

    let uri = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "quickstart_sparse".to_string());
    let ctx = Context::new();
    if object_type(&ctx, &uri)? != Some(ObjectType::Array) {
        create_array(&ctx, &uri)?;
        write_array(&ctx, &uri)?;
    }
    read_array(&ctx, &uri)
}
