use std::sync::Arc;
use std::thread;

use itertools::Itertools;
use rstest::rstest;
use tempfile::TempDir;
use tessera_dtype::{PType, PValue};
use tessera_error::{TesseraError, TesseraResult};
use tessera_metrics::{
    FRAGMENTS_COMMITTED, INCOMPLETE_SUBMITS, READ_CELLS, READ_PARTITIONS, TILES_PRUNED,
    WRITE_CELLS,
};
use tessera_schema::{
    ArraySchema, ArrayType, Attribute, Dimension, Domain, SchemaBuilder, TESSERA_COORDS,
};

use crate::*;

fn memory_ctx() -> Context {
    Context::from_config(Config::new().with(VFS_BACKEND, "memory").unwrap())
}

fn domain_4x4(extent: i32) -> Domain {
    Domain::builder()
        .add_dimension(Dimension::try_new("rows", [1i32, 4], Some(extent)).unwrap())
        .unwrap()
        .add_dimension(Dimension::try_new("cols", [1i32, 4], Some(extent)).unwrap())
        .unwrap()
        .build()
        .unwrap()
}

fn sparse_schema(capacity: u64) -> ArraySchema {
    SchemaBuilder::new(ArrayType::Sparse)
        .with_domain(domain_4x4(4))
        .unwrap()
        .add_attribute(Attribute::new("a", PType::I32))
        .unwrap()
        .with_capacity(capacity)
        .build()
        .unwrap()
}

fn dense_schema() -> ArraySchema {
    SchemaBuilder::new(ArrayType::Dense)
        .with_domain(domain_4x4(2))
        .unwrap()
        .add_attribute(Attribute::new("v", PType::I32).with_fill_value(-1i32).unwrap())
        .unwrap()
        .build()
        .unwrap()
}

fn write_sparse(
    ctx: &Context,
    uri: &str,
    coords: Vec<i32>,
    values: Vec<i32>,
) -> TesseraResult<QueryStatus> {
    let mut array = Array::new(ctx, uri);
    array.open(Mode::Write)?;
    let mut query = Query::new(&array, Mode::Write)?;
    query
        .set_buffer(TESSERA_COORDS, coords)?
        .set_buffer("a", values)?;
    query.submit()
}

fn open_read(ctx: &Context, uri: &str) -> Array {
    let mut array = Array::new(ctx, uri);
    array.open(Mode::Read).unwrap();
    array
}

/// Read the coordinates and `a` values of every cell of `subarray` in one submission.
fn read_sparse(array: &Array, layout: Layout, subarray: Subarray) -> (Vec<i32>, Vec<i32>) {
    let mut query = Query::new(array, Mode::Read).unwrap();
    query
        .set_layout(layout)
        .unwrap()
        .set_subarray_ranges(subarray)
        .unwrap()
        .set_buffer(TESSERA_COORDS, vec![0i32; 32])
        .unwrap()
        .set_buffer("a", vec![0i32; 16])
        .unwrap();
    assert_eq!(query.submit().unwrap(), QueryStatus::Completed);
    (
        query.buffer::<i32>(TESSERA_COORDS).unwrap().to_vec(),
        query.buffer::<i32>("a").unwrap().to_vec(),
    )
}

fn everything() -> Subarray {
    Subarray::from_bounds(&[1i32, 4, 1, 4]).unwrap()
}

/// Every cell of the 4x4 domain, valued `10 * row + col`.
fn write_full_grid(ctx: &Context, uri: &str) {
    let cells = (1..=4).cartesian_product(1..=4).collect::<Vec<(i32, i32)>>();
    let coords = cells.iter().flat_map(|&(r, c)| [r, c]).collect();
    let values = cells.iter().map(|&(r, c)| 10 * r + c).collect();
    write_sparse(ctx, uri, coords, values).unwrap();
}

struct Fixture {
    ctx: Context,
    uri: String,
    _dir: Option<TempDir>,
}

fn fixture(backend: VfsBackend) -> Fixture {
    match backend {
        VfsBackend::Memory => Fixture {
            ctx: memory_ctx(),
            uri: "mem://quickstart".to_string(),
            _dir: None,
        },
        VfsBackend::Local => {
            let dir = TempDir::new().unwrap();
            let uri = dir.path().join("quickstart").to_str().unwrap().to_string();
            Fixture {
                ctx: Context::new(),
                uri,
                _dir: Some(dir),
            }
        }
    }
}

#[rstest]
#[case::memory(VfsBackend::Memory)]
#[case::local(VfsBackend::Local)]
fn quickstart_round_trip(#[case] backend: VfsBackend) {
    let Fixture { ctx, uri, _dir } = fixture(backend);
    assert_eq!(object_type(&ctx, &uri).unwrap(), None);
    Array::create(&ctx, &uri, &sparse_schema(10_000)).unwrap();
    assert_eq!(object_type(&ctx, &uri).unwrap(), Some(ObjectType::Array));

    let status = write_sparse(&ctx, &uri, vec![1, 1, 2, 4, 2, 3], vec![1, 2, 3]).unwrap();
    assert_eq!(status, QueryStatus::Completed);

    let array = open_read(&ctx, &uri);
    let mut query = Query::new(&array, Mode::Read).unwrap();
    query
        .set_layout(Layout::RowMajor)
        .unwrap()
        .set_subarray(&[1i32, 2, 2, 4])
        .unwrap()
        .set_buffer(TESSERA_COORDS, vec![0i32; 6])
        .unwrap()
        .set_buffer("a", vec![0i32; 3])
        .unwrap();
    assert_eq!(query.submit().unwrap(), QueryStatus::Completed);
    assert_eq!(query.buffer::<i32>(TESSERA_COORDS).unwrap(), &[2, 3, 2, 4]);
    assert_eq!(query.buffer::<i32>("a").unwrap(), &[3, 2]);
    assert_eq!(query.buffer_size("a").unwrap(), 8);
    assert_eq!(query.buffer_size(TESSERA_COORDS).unwrap(), 16);

    let whole = query.take_buffer::<i32>("a").unwrap();
    assert_eq!(whole.len(), 3);
    assert!(matches!(
        query.buffer::<i32>("a"),
        Err(TesseraError::NotFound(..))
    ));
}

#[test]
fn cells_stay_bound_to_their_coordinates() {
    let ctx = memory_ctx();
    Array::create(&ctx, "mem://align", &sparse_schema(3)).unwrap();
    let cells = [(4, 1), (1, 3), (3, 3), (1, 1), (2, 2), (4, 4), (2, 1)];
    write_sparse(
        &ctx,
        "mem://align",
        cells.iter().flat_map(|&(r, c)| [r, c]).collect(),
        cells.iter().map(|&(r, c)| 10 * r + c).collect(),
    )
    .unwrap();

    let array = open_read(&ctx, "mem://align");
    for layout in [
        Layout::RowMajor,
        Layout::ColMajor,
        Layout::GlobalOrder,
        Layout::Unordered,
    ] {
        let (coords, values) = read_sparse(&array, layout, everything());
        assert_eq!(values.len(), cells.len());
        for (tuple, value) in coords.chunks_exact(2).zip(&values) {
            assert_eq!(10 * tuple[0] + tuple[1], *value, "{}", layout);
        }
    }

    let (_, row_major) = read_sparse(&array, Layout::RowMajor, everything());
    assert_eq!(row_major, vec![11, 13, 21, 22, 33, 41, 44]);
    let (_, col_major) = read_sparse(&array, Layout::ColMajor, everything());
    assert_eq!(col_major, vec![11, 21, 41, 22, 13, 33, 44]);
}

#[test]
fn per_dimension_buffers() {
    let ctx = memory_ctx();
    Array::create(&ctx, "mem://dims", &sparse_schema(10)).unwrap();
    let mut array = Array::new(&ctx, "mem://dims");
    array.open(Mode::Write).unwrap();
    let mut write = Query::new(&array, Mode::Write).unwrap();
    write
        .set_buffer("rows", vec![3i32, 1])
        .unwrap()
        .set_buffer("cols", vec![2i32, 4])
        .unwrap()
        .set_buffer("a", vec![32i32, 14])
        .unwrap();
    assert_eq!(write.submit().unwrap(), QueryStatus::Completed);
    array.close();

    array.open(Mode::Read).unwrap();
    let mut read = Query::new(&array, Mode::Read).unwrap();
    read.set_buffer("rows", vec![0i32; 4])
        .unwrap()
        .set_buffer("cols", vec![0i32; 4])
        .unwrap()
        .set_buffer("a", vec![0i32; 4])
        .unwrap();
    assert_eq!(read.submit().unwrap(), QueryStatus::Completed);
    assert_eq!(read.buffer::<i32>("rows").unwrap(), &[1, 3]);
    assert_eq!(read.buffer::<i32>("cols").unwrap(), &[4, 2]);
    assert_eq!(read.buffer::<i32>("a").unwrap(), &[14, 32]);
}

#[test]
fn coordinates_and_dimension_buffers_are_exclusive() {
    let ctx = memory_ctx();
    Array::create(&ctx, "mem://both", &sparse_schema(10)).unwrap();
    let mut array = Array::new(&ctx, "mem://both");
    array.open(Mode::Write).unwrap();
    let mut write = Query::new(&array, Mode::Write).unwrap();
    write
        .set_buffer(TESSERA_COORDS, vec![1i32, 1])
        .unwrap()
        .set_buffer("rows", vec![1i32])
        .unwrap()
        .set_buffer("a", vec![1i32])
        .unwrap();
    assert!(matches!(
        write.submit(),
        Err(TesseraError::MalformedQuery(..))
    ));
    assert_eq!(write.status(), QueryStatus::Failed);
}

#[rstest]
#[case::whole(&[1, 4, 1, 4])]
#[case::first_row(&[1, 1, 1, 4])]
#[case::corner(&[3, 4, 3, 4])]
#[case::column(&[1, 4, 2, 2])]
#[case::single_cell(&[2, 2, 3, 3])]
fn estimates_never_undershoot(#[case] bounds: &[i32]) {
    let ctx = memory_ctx();
    Array::create(&ctx, "mem://estimate", &sparse_schema(2)).unwrap();
    write_sparse(
        &ctx,
        "mem://estimate",
        vec![1, 1, 1, 2, 2, 3, 3, 3, 4, 4],
        vec![1, 2, 3, 4, 5],
    )
    .unwrap();
    write_sparse(&ctx, "mem://estimate", vec![1, 1, 4, 1], vec![6, 7]).unwrap();

    let array = open_read(&ctx, "mem://estimate");
    let subarray = Subarray::from_bounds(bounds).unwrap();
    let (coords, values) = read_sparse(&array, Layout::RowMajor, subarray.clone());

    let max_coords = array.max_buffer_size(TESSERA_COORDS, &subarray).unwrap();
    let max_values = array.max_buffer_size("a", &subarray).unwrap();
    assert!(max_coords >= coords.len() * 4);
    assert!(max_values >= values.len() * 4);
    assert_eq!(max_coords, 2 * max_values);
    assert_eq!(
        estimate_max_buffer_size(&array, "a", &subarray).unwrap(),
        max_values
    );

    let guess = array.est_result_size("a", &subarray).unwrap();
    assert!(guess <= max_values);
}

#[test]
fn estimation_errors() {
    let ctx = memory_ctx();
    Array::create(&ctx, "mem://estimate-errors", &sparse_schema(2)).unwrap();
    let array = open_read(&ctx, "mem://estimate-errors");
    assert_eq!(array.max_buffer_size("a", &everything()).unwrap(), 0);
    assert!(matches!(
        array.max_buffer_size("nope", &everything()),
        Err(TesseraError::NotFound(..))
    ));
    let reversed = Subarray::from_bounds(&[2i32, 1, 1, 4]).unwrap();
    assert!(matches!(
        array.max_buffer_size("a", &reversed),
        Err(TesseraError::MalformedQuery(..))
    ));
}

#[test]
fn estimation_uses_the_handle_snapshot() {
    let ctx = memory_ctx();
    Array::create(&ctx, "mem://snapshot", &sparse_schema(10)).unwrap();
    write_sparse(&ctx, "mem://snapshot", vec![1, 1], vec![1]).unwrap();

    let mut array = open_read(&ctx, "mem://snapshot");
    let before = array.max_buffer_size("a", &everything()).unwrap();
    write_sparse(&ctx, "mem://snapshot", vec![2, 2, 3, 3], vec![2, 3]).unwrap();

    assert_eq!(array.max_buffer_size("a", &everything()).unwrap(), before);
    assert_eq!(read_sparse(&array, Layout::RowMajor, everything()).1, vec![1]);

    array.reopen().unwrap();
    assert_eq!(array.fragment_count().unwrap(), 2);
    assert_eq!(array.max_buffer_size("a", &everything()).unwrap(), 12);
    assert_eq!(
        read_sparse(&array, Layout::RowMajor, everything()).1,
        vec![1, 2, 3]
    );
}

#[test]
fn repeated_reads_are_identical() {
    let ctx = memory_ctx();
    Array::create(&ctx, "mem://repeat", &sparse_schema(3)).unwrap();
    write_full_grid(&ctx, "mem://repeat");
    let array = open_read(&ctx, "mem://repeat");
    let subarray = Subarray::from_bounds(&[2i32, 3, 1, 4]).unwrap();
    let first = read_sparse(&array, Layout::GlobalOrder, subarray.clone());
    let second = read_sparse(&array, Layout::GlobalOrder, subarray);
    assert_eq!(first, second);
    assert_eq!(first.1.len(), 8);
}

#[rstest]
#[case::reversed_rows(&[3, 2, 1, 4])]
#[case::reversed_cols(&[1, 4, 4, 1])]
#[case::outside_domain(&[0, 2, 1, 4])]
fn bad_subarrays_fail_at_submit(#[case] bounds: &[i32]) {
    let ctx = memory_ctx();
    Array::create(&ctx, "mem://bounds", &sparse_schema(10)).unwrap();
    let array = open_read(&ctx, "mem://bounds");
    let mut query = Query::new(&array, Mode::Read).unwrap();
    query
        .set_subarray(bounds)
        .unwrap()
        .set_buffer("a", vec![0i32; 4])
        .unwrap();
    assert_eq!(query.status(), QueryStatus::Configured);

    let err = query.submit().unwrap_err();
    assert!(matches!(err, TesseraError::MalformedQuery(..)), "{err}");
    assert_eq!(query.status(), QueryStatus::Failed);
    assert!(query.submit().is_err());
    assert_eq!(query.status(), QueryStatus::Failed);
}

#[test]
fn subarray_arity_and_type_fail_immediately() {
    let ctx = memory_ctx();
    Array::create(&ctx, "mem://arity", &sparse_schema(10)).unwrap();
    let array = open_read(&ctx, "mem://arity");
    let mut query = Query::new(&array, Mode::Read).unwrap();
    assert!(matches!(
        query.set_subarray(&[1i32, 2]),
        Err(TesseraError::MalformedQuery(..))
    ));
    assert!(matches!(
        query.set_subarray(&[1u32, 2, 1, 2]),
        Err(TesseraError::MismatchedTypes(..))
    ));
    assert_eq!(query.status(), QueryStatus::Created);
}

#[test]
fn incomplete_reads_resume() {
    let ctx = memory_ctx();
    Array::create(&ctx, "mem://resume", &sparse_schema(4)).unwrap();
    write_full_grid(&ctx, "mem://resume");
    let array = open_read(&ctx, "mem://resume");
    let (expected_coords, expected_values) = read_sparse(&array, Layout::RowMajor, everything());

    let mut query = Query::new(&array, Mode::Read).unwrap();
    query
        .set_buffer(TESSERA_COORDS, vec![0i32; 10])
        .unwrap()
        .set_buffer("a", vec![0i32; 3])
        .unwrap();
    let (mut coords, mut values) = (Vec::new(), Vec::new());
    let mut submissions = 0;
    loop {
        let status = query.submit().unwrap();
        submissions += 1;
        let produced = query.buffer::<i32>("a").unwrap();
        assert!(!produced.is_empty());
        assert_eq!(query.buffer_size("a").unwrap(), produced.len() * 4);
        values.extend_from_slice(produced);
        coords.extend_from_slice(query.buffer::<i32>(TESSERA_COORDS).unwrap());
        if status == QueryStatus::Completed {
            break;
        }
        assert_eq!(status, QueryStatus::Incomplete);
        assert_eq!(query.buffer_size("a").unwrap(), 12);
    }
    assert_eq!(submissions, 6);
    assert_eq!(coords, expected_coords);
    assert_eq!(values, expected_values);
    assert_eq!(ctx.metrics().count(INCOMPLETE_SUBMITS), 5);
    assert!(query.submit().is_err());
}

#[test]
fn buffers_too_small_for_one_cell() {
    let ctx = memory_ctx();
    Array::create(&ctx, "mem://tiny", &sparse_schema(4)).unwrap();
    write_sparse(&ctx, "mem://tiny", vec![1, 1, 2, 2], vec![1, 2]).unwrap();
    let array = open_read(&ctx, "mem://tiny");

    let mut query = Query::new(&array, Mode::Read).unwrap();
    query
        .set_buffer(TESSERA_COORDS, vec![0i32; 1])
        .unwrap()
        .set_buffer("a", vec![0i32; 4])
        .unwrap();
    assert_eq!(query.submit().unwrap(), QueryStatus::Incomplete);
    assert_eq!(query.buffer_size("a").unwrap(), 0);
    assert_eq!(query.buffer_size(TESSERA_COORDS).unwrap(), 0);

    query.set_buffer(TESSERA_COORDS, vec![0i32; 4]).unwrap();
    assert_eq!(query.submit().unwrap(), QueryStatus::Completed);
    assert_eq!(query.buffer::<i32>("a").unwrap(), &[1, 2]);
}

#[test]
fn reads_need_a_buffer() {
    let ctx = memory_ctx();
    Array::create(&ctx, "mem://unbound", &sparse_schema(4)).unwrap();
    let array = open_read(&ctx, "mem://unbound");
    let mut query = Query::new(&array, Mode::Read).unwrap();
    assert!(matches!(
        query.submit(),
        Err(TesseraError::MalformedQuery(..))
    ));
}

#[test]
fn empty_reads_complete() {
    let ctx = memory_ctx();
    Array::create(&ctx, "mem://empty", &sparse_schema(4)).unwrap();
    let array = open_read(&ctx, "mem://empty");
    assert_eq!(array.non_empty_domain().unwrap(), None);
    let (coords, values) = read_sparse(&array, Layout::Unordered, everything());
    assert!(coords.is_empty() && values.is_empty());
}

#[test]
fn lifecycle_errors() {
    let ctx = memory_ctx();
    let schema = sparse_schema(10);
    Array::create(&ctx, "mem://life", &schema).unwrap();
    assert!(matches!(
        Array::create(&ctx, "mem://life", &schema),
        Err(TesseraError::AlreadyExists(..))
    ));

    let mut missing = Array::new(&ctx, "mem://missing");
    assert!(matches!(
        missing.open(Mode::Read),
        Err(TesseraError::NotFound(..))
    ));
    assert!(!missing.is_open());

    let mut array = Array::new(&ctx, "mem://life");
    assert!(matches!(array.schema(), Err(TesseraError::ClosedHandle(..))));
    assert!(matches!(
        Query::new(&array, Mode::Read),
        Err(TesseraError::ClosedHandle(..))
    ));

    array.open(Mode::Write).unwrap();
    assert_eq!(array.mode().unwrap(), Mode::Write);
    assert_eq!(*array.schema().unwrap(), schema);
    assert!(matches!(
        array.open(Mode::Read),
        Err(TesseraError::Mode(..))
    ));
    assert!(matches!(
        Query::new(&array, Mode::Read),
        Err(TesseraError::Mode(..))
    ));
    assert!(matches!(array.reopen(), Err(TesseraError::Mode(..))));
    assert!(matches!(
        array.non_empty_domain(),
        Err(TesseraError::Mode(..))
    ));

    array.close();
    array.close();
    assert!(matches!(array.mode(), Err(TesseraError::ClosedHandle(..))));
    assert!(matches!(
        array.open_at(Mode::Write, 0),
        Err(TesseraError::Mode(..))
    ));

    array.open(Mode::Read).unwrap();
    assert_eq!(array.fragment_count().unwrap(), 0);
    assert!(array.timestamp().unwrap() > 0);
}

#[test]
fn groups() {
    let ctx = memory_ctx();
    Group::create(&ctx, "mem://group").unwrap();
    assert_eq!(
        object_type(&ctx, "mem://group").unwrap(),
        Some(ObjectType::Group)
    );
    assert!(matches!(
        Group::create(&ctx, "mem://group"),
        Err(TesseraError::AlreadyExists(..))
    ));
    assert!(matches!(
        Array::create(&ctx, "mem://group", &sparse_schema(10)),
        Err(TesseraError::AlreadyExists(..))
    ));

    Array::create(&ctx, "mem://group/array", &sparse_schema(10)).unwrap();
    assert_eq!(
        object_type(&ctx, "mem://group/array").unwrap(),
        Some(ObjectType::Array)
    );
    assert!(matches!(
        Array::new(&ctx, "mem://group").open(Mode::Read),
        Err(TesseraError::NotFound(..))
    ));
}

#[test]
fn invalid_schemas_are_not_created() {
    let ctx = memory_ctx();
    let err = SchemaBuilder::new(ArrayType::Sparse)
        .with_domain(domain_4x4(4))
        .unwrap()
        .build()
        .unwrap_err();
    assert!(matches!(err, TesseraError::Schema(..)));
    assert_eq!(object_type(&ctx, "mem://invalid").unwrap(), None);
}

#[test]
fn query_configuration_errors() {
    let ctx = memory_ctx();
    Array::create(&ctx, "mem://config", &sparse_schema(10)).unwrap();
    let mut array = Array::new(&ctx, "mem://config");
    array.open(Mode::Write).unwrap();
    let mut write = Query::new(&array, Mode::Write).unwrap();
    assert_eq!(write.layout(), Layout::Unordered);

    assert!(matches!(
        write.set_layout(Layout::RowMajor),
        Err(TesseraError::MalformedQuery(..))
    ));
    assert!(matches!(
        write.set_subarray(&[1i32, 2, 1, 2]),
        Err(TesseraError::MalformedQuery(..))
    ));
    assert!(matches!(
        write.set_buffer("missing", vec![0i32]),
        Err(TesseraError::NotFound(..))
    ));
    assert!(matches!(
        write.set_buffer("a", vec![0f64]),
        Err(TesseraError::MismatchedTypes(..))
    ));
    assert!(matches!(
        write.set_buffer(TESSERA_COORDS, vec![0i64, 0]),
        Err(TesseraError::MismatchedTypes(..))
    ));

    write.set_buffer(TESSERA_COORDS, vec![1i32, 1, 2]).unwrap();
    write.set_buffer("a", vec![1i32]).unwrap();
    assert!(matches!(
        write.submit(),
        Err(TesseraError::MalformedQuery(..))
    ));
}

#[rstest]
#[case::missing_attribute(vec![1, 1], None)]
#[case::short_attribute(vec![1, 1, 2, 2], Some(vec![1]))]
#[case::outside_domain(vec![1, 5], Some(vec![1]))]
fn malformed_writes_commit_nothing(#[case] coords: Vec<i32>, #[case] values: Option<Vec<i32>>) {
    let ctx = memory_ctx();
    Array::create(&ctx, "mem://malformed", &sparse_schema(10)).unwrap();
    {
        let mut array = Array::new(&ctx, "mem://malformed");
        array.open(Mode::Write).unwrap();
        let mut write = Query::new(&array, Mode::Write).unwrap();
        write.set_buffer(TESSERA_COORDS, coords).unwrap();
        if let Some(values) = values {
            write.set_buffer("a", values).unwrap();
        }
        let err = write.submit().unwrap_err();
        assert!(matches!(err, TesseraError::MalformedQuery(..)), "{err}");
    }
    assert_eq!(open_read(&ctx, "mem://malformed").fragment_count().unwrap(), 0);
    assert_eq!(ctx.metrics().count(FRAGMENTS_COMMITTED), 0);
}

#[test]
fn global_order_writes_must_be_sorted() {
    let ctx = memory_ctx();
    Array::create(&ctx, "mem://global", &sparse_schema(10)).unwrap();
    let mut array = Array::new(&ctx, "mem://global");
    array.open(Mode::Write).unwrap();

    let mut unsorted = Query::new(&array, Mode::Write).unwrap();
    unsorted
        .set_layout(Layout::GlobalOrder)
        .unwrap()
        .set_buffer(TESSERA_COORDS, vec![2i32, 2, 1, 1])
        .unwrap()
        .set_buffer("a", vec![22i32, 11])
        .unwrap();
    assert!(matches!(
        unsorted.submit(),
        Err(TesseraError::MalformedQuery(..))
    ));

    let mut sorted = Query::new(&array, Mode::Write).unwrap();
    sorted
        .set_layout(Layout::GlobalOrder)
        .unwrap()
        .set_buffer(TESSERA_COORDS, vec![1i32, 1, 2, 2])
        .unwrap()
        .set_buffer("a", vec![11i32, 22])
        .unwrap();
    assert_eq!(sorted.submit().unwrap(), QueryStatus::Completed);
}

#[test]
fn duplicate_coordinates_are_rejected_by_default() {
    let ctx = memory_ctx();
    Array::create(&ctx, "mem://dups", &sparse_schema(10)).unwrap();
    let err = write_sparse(&ctx, "mem://dups", vec![1, 1, 2, 2, 1, 1], vec![1, 2, 3]).unwrap_err();
    assert!(matches!(err, TesseraError::MalformedQuery(..)), "{err}");
    assert_eq!(open_read(&ctx, "mem://dups").fragment_count().unwrap(), 0);
}

#[test]
fn duplicate_coordinates_can_be_dropped() {
    let ctx = Context::from_config(
        Config::new()
            .with(VFS_BACKEND, "memory")
            .unwrap()
            .with(DEDUP_COORDS, "true")
            .unwrap(),
    );
    Array::create(&ctx, "mem://dedup", &sparse_schema(10)).unwrap();
    write_sparse(&ctx, "mem://dedup", vec![1, 1, 2, 2, 1, 1], vec![1, 2, 3]).unwrap();
    let array = open_read(&ctx, "mem://dedup");
    assert_eq!(
        read_sparse(&array, Layout::RowMajor, everything()),
        (vec![1, 1, 2, 2], vec![3, 2])
    );
    assert_eq!(ctx.metrics().count(WRITE_CELLS), 2);
}

#[test]
fn unchecked_duplicates_collapse_on_read() {
    let ctx = Context::from_config(
        Config::new()
            .with(VFS_BACKEND, "memory")
            .unwrap()
            .with(CHECK_COORD_DUPS, "false")
            .unwrap(),
    );
    Array::create(&ctx, "mem://unchecked", &sparse_schema(10)).unwrap();
    write_sparse(&ctx, "mem://unchecked", vec![1, 1, 1, 1], vec![1, 2]).unwrap();
    let array = open_read(&ctx, "mem://unchecked");
    assert_eq!(array.fragments().unwrap()[0].cell_count(), 2);
    assert_eq!(read_sparse(&array, Layout::RowMajor, everything()).1, vec![2]);
}

#[test]
fn latest_fragment_wins() {
    let ctx = memory_ctx();
    Array::create(&ctx, "mem://latest", &sparse_schema(10)).unwrap();
    write_sparse(&ctx, "mem://latest", vec![1, 1, 3, 3], vec![1, 33]).unwrap();
    write_sparse(&ctx, "mem://latest", vec![1, 1], vec![5]).unwrap();
    let array = open_read(&ctx, "mem://latest");
    assert_eq!(
        read_sparse(&array, Layout::RowMajor, everything()),
        (vec![1, 1, 3, 3], vec![5, 33])
    );
}

#[test]
fn latest_write_wins_across_contexts() {
    let vfs: Arc<dyn Vfs> = Arc::new(MemFs::default());
    let first = Context::with_vfs(Config::new(), vfs.clone());
    let second = Context::with_vfs(Config::new(), vfs);
    Array::create(&first, "mem://shared", &sparse_schema(10)).unwrap();

    for value in 0..20 {
        let writer = if value % 2 == 0 { &first } else { &second };
        write_sparse(writer, "mem://shared", vec![1, 1], vec![value]).unwrap();
        for reader in [&first, &second] {
            let array = open_read(reader, "mem://shared");
            assert_eq!(
                read_sparse(&array, Layout::RowMajor, everything()),
                (vec![1, 1], vec![value])
            );
        }
    }
}

#[test]
fn multi_range_subarrays() {
    let ctx = memory_ctx();
    Array::create(&ctx, "mem://ranges", &sparse_schema(4)).unwrap();
    write_full_grid(&ctx, "mem://ranges");
    let array = open_read(&ctx, "mem://ranges");

    let disjoint = Subarray::new(2)
        .with_range(0, 1i32, 1i32)
        .unwrap()
        .with_range(0, 3i32, 4i32)
        .unwrap()
        .with_range(1, 2i32, 2i32)
        .unwrap();
    assert_eq!(
        read_sparse(&array, Layout::RowMajor, disjoint).1,
        vec![12, 32, 42]
    );

    let overlapping = Subarray::new(2)
        .with_range(0, 1i32, 2i32)
        .unwrap()
        .with_range(0, 2i32, 3i32)
        .unwrap()
        .with_range(1, 1i32, 1i32)
        .unwrap();
    assert_eq!(
        read_sparse(&array, Layout::RowMajor, overlapping).1,
        vec![11, 21, 31]
    );
}

#[test]
fn time_travel() {
    let ctx = memory_ctx();
    Array::create(&ctx, "mem://travel", &sparse_schema(10)).unwrap();
    write_sparse(&ctx, "mem://travel", vec![1, 1], vec![1]).unwrap();
    let first = open_read(&ctx, "mem://travel").fragments().unwrap()[0].timestamp();
    write_sparse(&ctx, "mem://travel", vec![1, 1, 2, 2], vec![2, 22]).unwrap();

    let mut array = Array::new(&ctx, "mem://travel");
    array.open_at(Mode::Read, first).unwrap();
    assert_eq!(array.timestamp().unwrap(), first);
    assert_eq!(array.fragment_count().unwrap(), 1);
    assert_eq!(read_sparse(&array, Layout::RowMajor, everything()).1, vec![1]);

    array.close();
    array.open_at(Mode::Read, first - 1).unwrap();
    assert_eq!(array.fragment_count().unwrap(), 0);

    array.close();
    array.open(Mode::Read).unwrap();
    assert_eq!(
        read_sparse(&array, Layout::RowMajor, everything()).1,
        vec![2, 22]
    );
    let fragments = array.fragments().unwrap();
    assert!(fragments[0].timestamp() < fragments[1].timestamp());
}

#[test]
fn non_empty_domain() {
    let ctx = memory_ctx();
    Array::create(&ctx, "mem://bounds-union", &sparse_schema(10)).unwrap();
    write_sparse(&ctx, "mem://bounds-union", vec![2, 3], vec![1]).unwrap();
    write_sparse(&ctx, "mem://bounds-union", vec![1, 4, 3, 2], vec![1, 2]).unwrap();
    let array = open_read(&ctx, "mem://bounds-union");
    let bounds = array.non_empty_domain().unwrap().unwrap();
    assert_eq!(
        bounds.ranges(),
        &[
            (PValue::I32(1), PValue::I32(3)),
            (PValue::I32(2), PValue::I32(4))
        ]
    );
}

#[test]
fn tiles_outside_the_subarray_are_pruned() {
    let ctx = memory_ctx();
    Array::create(&ctx, "mem://prune", &sparse_schema(2)).unwrap();
    write_sparse(
        &ctx,
        "mem://prune",
        vec![1, 1, 1, 2, 3, 3, 4, 4],
        vec![11, 12, 33, 44],
    )
    .unwrap();
    let array = open_read(&ctx, "mem://prune");
    assert_eq!(array.fragments().unwrap()[0].tiles().len(), 2);

    let first_row = Subarray::from_bounds(&[1i32, 1, 1, 4]).unwrap();
    assert_eq!(
        read_sparse(&array, Layout::RowMajor, first_row.clone()).1,
        vec![11, 12]
    );
    assert_eq!(ctx.metrics().count(TILES_PRUNED), 1);
    assert_eq!(array.max_buffer_size("a", &first_row).unwrap(), 8);
}

#[test]
fn dense_reads_fill_unwritten_cells() {
    let ctx = memory_ctx();
    Array::create(&ctx, "mem://dense", &dense_schema()).unwrap();
    let mut array = Array::new(&ctx, "mem://dense");
    array.open(Mode::Write).unwrap();

    let mut write = Query::new(&array, Mode::Write).unwrap();
    write
        .set_subarray(&[1i32, 2, 1, 2])
        .unwrap()
        .set_buffer("v", vec![1i32, 2, 3, 4])
        .unwrap();
    assert_eq!(write.submit().unwrap(), QueryStatus::Completed);

    let mut write = Query::new(&array, Mode::Write).unwrap();
    write
        .set_layout(Layout::ColMajor)
        .unwrap()
        .set_subarray(&[3i32, 4, 3, 4])
        .unwrap()
        .set_buffer("v", vec![5i32, 6, 7, 8])
        .unwrap();
    assert_eq!(write.submit().unwrap(), QueryStatus::Completed);
    array.close();

    array.open(Mode::Read).unwrap();
    let read = |layout: Layout, bounds: &[i32]| {
        let mut query = Query::new(&array, Mode::Read).unwrap();
        query
            .set_layout(layout)
            .unwrap()
            .set_subarray(bounds)
            .unwrap()
            .set_buffer(TESSERA_COORDS, vec![0i32; 32])
            .unwrap()
            .set_buffer("v", vec![0i32; 16])
            .unwrap();
        assert_eq!(query.submit().unwrap(), QueryStatus::Completed);
        (
            query.buffer::<i32>(TESSERA_COORDS).unwrap().to_vec(),
            query.buffer::<i32>("v").unwrap().to_vec(),
        )
    };

    let (coords, values) = read(Layout::RowMajor, &[1, 2, 1, 3]);
    assert_eq!(coords, vec![1, 1, 1, 2, 1, 3, 2, 1, 2, 2, 2, 3]);
    assert_eq!(values, vec![1, 2, -1, 3, 4, -1]);
    assert_eq!(read(Layout::ColMajor, &[1, 2, 1, 3]).1, vec![1, 3, 2, 4, -1, -1]);
    assert_eq!(read(Layout::RowMajor, &[3, 4, 3, 4]).1, vec![5, 7, 6, 8]);

    let subarray = Subarray::from_bounds(&[1i32, 2, 1, 3]).unwrap();
    assert_eq!(array.max_buffer_size("v", &subarray).unwrap(), 24);
    assert_eq!(array.est_result_size("v", &subarray).unwrap(), 24);
    assert_eq!(read(Layout::GlobalOrder, &[1, 4, 1, 4]).1.len(), 16);
}

#[test]
fn dense_write_errors() {
    let ctx = memory_ctx();
    Array::create(&ctx, "mem://dense-errors", &dense_schema()).unwrap();
    let mut array = Array::new(&ctx, "mem://dense-errors");
    array.open(Mode::Write).unwrap();

    let mut write = Query::new(&array, Mode::Write).unwrap();
    assert!(matches!(
        write.set_layout(Layout::Unordered),
        Err(TesseraError::MalformedQuery(..))
    ));
    assert!(matches!(
        write.set_buffer(TESSERA_COORDS, vec![1i32, 1]),
        Err(TesseraError::MalformedQuery(..))
    ));
    assert!(matches!(
        write.set_buffer("rows", vec![1i32]),
        Err(TesseraError::MalformedQuery(..))
    ));

    write
        .set_subarray(&[1i32, 2, 1, 2])
        .unwrap()
        .set_buffer("v", vec![1i32, 2, 3])
        .unwrap();
    assert!(matches!(
        write.submit(),
        Err(TesseraError::MalformedQuery(..))
    ));

    let mut multi = Query::new(&array, Mode::Write).unwrap();
    multi
        .set_subarray_ranges(
            Subarray::new(2)
                .with_range(0, 1i32, 1i32)
                .unwrap()
                .with_range(0, 3i32, 3i32)
                .unwrap(),
        )
        .unwrap()
        .set_buffer("v", vec![1i32; 8])
        .unwrap();
    assert!(matches!(
        multi.submit(),
        Err(TesseraError::MalformedQuery(..))
    ));
}

#[test]
fn cancelled_queries_fail() {
    let ctx = memory_ctx();
    Array::create(&ctx, "mem://cancel", &sparse_schema(10)).unwrap();
    {
        let mut array = Array::new(&ctx, "mem://cancel");
        array.open(Mode::Write).unwrap();
        let mut write = Query::new(&array, Mode::Write).unwrap();
        write
            .set_buffer(TESSERA_COORDS, vec![1i32, 1])
            .unwrap()
            .set_buffer("a", vec![1i32])
            .unwrap();
        ctx.cancel_tasks();
        assert!(matches!(write.submit(), Err(TesseraError::Cancelled(..))));
        assert_eq!(write.status(), QueryStatus::Failed);
    }
    assert_eq!(open_read(&ctx, "mem://cancel").fragment_count().unwrap(), 0);

    // Queries created after the cancellation are unaffected.
    write_sparse(&ctx, "mem://cancel", vec![1, 1], vec![1]).unwrap();
    let array = open_read(&ctx, "mem://cancel");
    let mut read = Query::new(&array, Mode::Read).unwrap();
    read.set_buffer("a", vec![0i32; 4]).unwrap();
    ctx.cancel_tasks();
    assert!(matches!(read.submit(), Err(TesseraError::Cancelled(..))));
}

#[test]
fn metrics_count_cells_and_fragments() {
    let ctx = memory_ctx();
    Array::create(&ctx, "mem://metrics", &sparse_schema(10)).unwrap();
    write_sparse(&ctx, "mem://metrics", vec![1, 1, 2, 2, 3, 3], vec![1, 2, 3]).unwrap();
    write_sparse(&ctx, "mem://metrics", vec![4, 4], vec![4]).unwrap();
    write_sparse(&ctx, "mem://metrics", vec![], vec![]).unwrap();
    assert_eq!(ctx.metrics().count(WRITE_CELLS), 4);
    assert_eq!(ctx.metrics().count(FRAGMENTS_COMMITTED), 2);

    let array = open_read(&ctx, "mem://metrics");
    read_sparse(&array, Layout::RowMajor, everything());
    assert_eq!(ctx.metrics().count(READ_CELLS), 4);
    assert!(ctx.metrics().snapshot().iter().count() >= 3);

    // Contexts keep separate registries.
    assert_eq!(memory_ctx().metrics().count(WRITE_CELLS), 0);
}

#[test]
fn metrics_are_kept_per_array() {
    let ctx = memory_ctx();
    for uri in ["mem://left", "mem://right"] {
        Array::create(&ctx, uri, &sparse_schema(10)).unwrap();
    }
    write_sparse(&ctx, "mem://left", vec![1, 1, 2, 2], vec![1, 2]).unwrap();
    write_sparse(&ctx, "mem://right", vec![3, 3], vec![3]).unwrap();
    write_sparse(&ctx, "mem://right", vec![4, 4], vec![4]).unwrap();
    read_sparse(&open_read(&ctx, "mem://right"), Layout::RowMajor, everything());

    let metrics = ctx.metrics();
    assert_eq!(metrics.array_count(WRITE_CELLS, "mem://left"), 2);
    assert_eq!(metrics.array_count(WRITE_CELLS, "mem://right"), 2);
    assert_eq!(metrics.array_count(FRAGMENTS_COMMITTED, "mem://right"), 2);
    assert_eq!(metrics.array_count(READ_CELLS, "mem://left"), 0);
    assert_eq!(metrics.array_count(READ_CELLS, "mem://right"), 2);
    assert_eq!(metrics.count(FRAGMENTS_COMMITTED), 3);
}

#[test]
fn concurrent_readers_see_the_same_cells() {
    let ctx = memory_ctx();
    Array::create(&ctx, "mem://readers", &sparse_schema(3)).unwrap();
    write_full_grid(&ctx, "mem://readers");
    let expected = read_sparse(&open_read(&ctx, "mem://readers"), Layout::RowMajor, everything());

    thread::scope(|s| {
        let readers = (0..4)
            .map(|_| {
                s.spawn(|| -> TesseraResult<(Vec<i32>, Vec<i32>)> {
                    let mut array = Array::new(&ctx, "mem://readers");
                    array.open(Mode::Read)?;
                    Ok(read_sparse(&array, Layout::RowMajor, everything()))
                })
            })
            .collect::<Vec<_>>();
        for reader in readers {
            assert_eq!(reader.join().unwrap().unwrap(), expected);
        }
    });
}

#[test]
fn concurrent_writers_commit_separate_fragments() {
    let ctx = memory_ctx();
    Array::create(&ctx, "mem://writers", &sparse_schema(10)).unwrap();

    thread::scope(|s| {
        for row in 1..=4 {
            let ctx = &ctx;
            s.spawn(move || {
                write_sparse(ctx, "mem://writers", vec![row, row], vec![row]).unwrap();
            });
        }
    });

    let array = open_read(&ctx, "mem://writers");
    assert_eq!(array.fragment_count().unwrap(), 4);
    let timestamps = array
        .fragments()
        .unwrap()
        .iter()
        .map(Fragment::timestamp)
        .collect::<Vec<_>>();
    assert!(timestamps.iter().tuple_windows().all(|(a, b)| a < b));
    assert_eq!(
        read_sparse(&array, Layout::RowMajor, everything()).1,
        vec![1, 2, 3, 4]
    );
}

fn float_schema() -> ArraySchema {
    SchemaBuilder::new(ArrayType::Sparse)
        .with_domain(
            Domain::builder()
                .add_dimension(Dimension::try_new("x", [0.0f64, 10.0], Some(5.0)).unwrap())
                .unwrap()
                .add_dimension(Dimension::try_new("y", [0.0f64, 10.0], Some(5.0)).unwrap())
                .unwrap()
                .build()
                .unwrap(),
        )
        .unwrap()
        .add_attribute(Attribute::new("a", PType::F64))
        .unwrap()
        .with_capacity(2)
        .build()
        .unwrap()
}

fn read_float(array: &Array, layout: Layout, subarray: Subarray) -> (Vec<f64>, Vec<f64>) {
    let mut query = Query::new(array, Mode::Read).unwrap();
    query
        .set_layout(layout)
        .unwrap()
        .set_subarray_ranges(subarray)
        .unwrap()
        .set_buffer(TESSERA_COORDS, vec![0f64; 12])
        .unwrap()
        .set_buffer("a", vec![0f64; 6])
        .unwrap();
    assert_eq!(query.submit().unwrap(), QueryStatus::Completed);
    (
        query.buffer::<f64>(TESSERA_COORDS).unwrap().to_vec(),
        query.buffer::<f64>("a").unwrap().to_vec(),
    )
}

#[test]
fn float_domains() {
    let ctx = memory_ctx();
    Array::create(&ctx, "mem://float", &float_schema()).unwrap();
    let mut array = Array::new(&ctx, "mem://float");
    array.open(Mode::Write).unwrap();
    let mut write = Query::new(&array, Mode::Write).unwrap();
    write
        .set_buffer(
            TESSERA_COORDS,
            vec![7.5f64, 8.25, 0.5, 0.5, 6.0, 1.0, 1.5, 2.5, 9.0, 9.0, 2.0, 7.0],
        )
        .unwrap()
        .set_buffer("a", vec![4.0f64, 1.0, 3.0, 2.0, 5.0, 6.0])
        .unwrap();
    assert_eq!(write.submit().unwrap(), QueryStatus::Completed);
    array.close();

    array.open(Mode::Read).unwrap();
    // global order puts (0.5, 0.5) (1.5, 2.5) | (2, 7) (6, 1) | (7.5, 8.25) (9, 9) in tiles
    assert_eq!(array.fragments().unwrap()[0].tiles().len(), 3);
    let whole = Subarray::from_bounds(&[0.0f64, 10.0, 0.0, 10.0]).unwrap();
    assert_eq!(
        read_float(&array, Layout::RowMajor, whole.clone()).1,
        vec![1.0, 2.0, 6.0, 3.0, 4.0, 5.0]
    );
    assert_eq!(
        read_float(&array, Layout::ColMajor, whole).1,
        vec![1.0, 3.0, 2.0, 6.0, 4.0, 5.0]
    );

    let corner = Subarray::from_bounds(&[0.0f64, 4.0, 0.0, 3.0]).unwrap();
    let pruned_before = ctx.metrics().array_count(TILES_PRUNED, "mem://float");
    assert_eq!(
        read_float(&array, Layout::RowMajor, corner.clone()),
        (vec![0.5, 0.5, 1.5, 2.5], vec![1.0, 2.0])
    );
    assert_eq!(
        ctx.metrics().array_count(TILES_PRUNED, "mem://float") - pruned_before,
        1
    );

    let max_values = array.max_buffer_size("a", &corner).unwrap();
    assert_eq!(max_values, 4 * 8);
    assert_eq!(array.max_buffer_size(TESSERA_COORDS, &corner).unwrap(), 4 * 16);
    let guess = array.est_result_size("a", &corner).unwrap();
    assert!((2 * 8..=max_values).contains(&guess));
    assert_eq!(array.max_memory_size(&corner).unwrap(), 4 * (16 + 8));

    let outside = Subarray::from_bounds(&[2.5f64, 5.5, 7.5, 10.0]).unwrap();
    assert!(read_float(&array, Layout::RowMajor, outside).1.is_empty());
}

#[test]
fn max_memory_size_counts_whole_tiles() {
    let ctx = memory_ctx();
    Array::create(&ctx, "mem://memory", &sparse_schema(2)).unwrap();
    let array = open_read(&ctx, "mem://memory");
    assert_eq!(array.max_memory_size(&everything()).unwrap(), 0);

    write_full_grid(&ctx, "mem://memory");
    let array = open_read(&ctx, "mem://memory");
    // coordinates and `a` of every cell of the eight two-cell tiles
    assert_eq!(array.max_memory_size(&everything()).unwrap(), 16 * 12);
    let cell = Subarray::from_bounds(&[2i32, 2, 3, 3]).unwrap();
    assert_eq!(array.max_memory_size(&cell).unwrap(), 2 * 12);
    assert_eq!(
        estimate_max_memory_size(&array, &cell).unwrap(),
        array.max_memory_size(&cell).unwrap()
    );
}

/// A context over `vfs` whose reads may hold at most `budget` bytes of tiles.
fn budgeted(vfs: &Arc<dyn Vfs>, budget: u64) -> Context {
    let config = Config::new()
        .with(MEMORY_BUDGET, &budget.to_string())
        .unwrap();
    Context::with_vfs(config, vfs.clone())
}

#[rstest]
#[case::row_major(Layout::RowMajor)]
#[case::col_major(Layout::ColMajor)]
#[case::global_order(Layout::GlobalOrder)]
fn partitioned_sparse_reads_match_single_pass(#[case] layout: Layout) {
    let vfs: Arc<dyn Vfs> = Arc::new(MemFs::default());
    let ctx = Context::with_vfs(Config::new(), vfs.clone());
    Array::create(&ctx, "mem://partitioned", &sparse_schema(2)).unwrap();
    write_full_grid(&ctx, "mem://partitioned");
    write_sparse(&ctx, "mem://partitioned", vec![2, 2, 4, 1], vec![-22, -41]).unwrap();
    let small = budgeted(&vfs, 24);

    let ranges = Subarray::new(2)
        .with_range(0, 1i32, 1i32)
        .unwrap()
        .with_range(0, 2i32, 4i32)
        .unwrap()
        .with_range(1, 1i32, 2i32)
        .unwrap()
        .with_range(1, 4i32, 4i32)
        .unwrap();
    for subarray in [everything(), ranges] {
        let expected = read_sparse(
            &open_read(&ctx, "mem://partitioned"),
            layout,
            subarray.clone(),
        );
        let array = open_read(&small, "mem://partitioned");
        assert_eq!(read_sparse(&array, layout, subarray), expected);
    }
    assert!(small.metrics().array_count(READ_PARTITIONS, "mem://partitioned") > 2);
    assert_eq!(ctx.metrics().array_count(READ_PARTITIONS, "mem://partitioned"), 2);
}

#[test]
fn incomplete_reads_resume_across_partitions() {
    let vfs: Arc<dyn Vfs> = Arc::new(MemFs::default());
    let ctx = Context::with_vfs(Config::new(), vfs.clone());
    Array::create(&ctx, "mem://resume-partitions", &sparse_schema(2)).unwrap();
    write_full_grid(&ctx, "mem://resume-partitions");
    let expected = read_sparse(
        &open_read(&ctx, "mem://resume-partitions"),
        Layout::ColMajor,
        everything(),
    );

    let small = budgeted(&vfs, 1);
    let array = open_read(&small, "mem://resume-partitions");
    let mut query = Query::new(&array, Mode::Read).unwrap();
    query
        .set_layout(Layout::ColMajor)
        .unwrap()
        .set_buffer(TESSERA_COORDS, vec![0i32; 6])
        .unwrap()
        .set_buffer("a", vec![0i32; 3])
        .unwrap();
    let (mut coords, mut values) = (Vec::new(), Vec::new());
    loop {
        let status = query.submit().unwrap();
        coords.extend_from_slice(query.buffer::<i32>(TESSERA_COORDS).unwrap());
        values.extend_from_slice(query.buffer::<i32>("a").unwrap());
        if status == QueryStatus::Completed {
            break;
        }
    }
    assert_eq!((coords, values), expected);
    assert!(small.metrics().count(READ_PARTITIONS) > 1);
}

#[rstest]
#[case::row_major(Layout::RowMajor)]
#[case::col_major(Layout::ColMajor)]
#[case::global_order(Layout::GlobalOrder)]
fn partitioned_dense_reads_match_single_pass(#[case] layout: Layout) {
    let vfs: Arc<dyn Vfs> = Arc::new(MemFs::default());
    let ctx = Context::with_vfs(Config::new(), vfs.clone());
    Array::create(&ctx, "mem://dense-partitioned", &dense_schema()).unwrap();
    let mut array = Array::new(&ctx, "mem://dense-partitioned");
    array.open(Mode::Write).unwrap();
    for (bounds, values) in [([1i32, 2, 1, 2], [1i32, 2, 3, 4]), ([3, 4, 2, 3], [5, 6, 7, 8])] {
        let mut write = Query::new(&array, Mode::Write).unwrap();
        write
            .set_subarray(&bounds)
            .unwrap()
            .set_buffer("v", values.to_vec())
            .unwrap();
        assert_eq!(write.submit().unwrap(), QueryStatus::Completed);
    }
    array.close();

    let read = |ctx: &Context| {
        let array = open_read(ctx, "mem://dense-partitioned");
        let mut query = Query::new(&array, Mode::Read).unwrap();
        query
            .set_layout(layout)
            .unwrap()
            .set_buffer(TESSERA_COORDS, vec![0i32; 32])
            .unwrap()
            .set_buffer("v", vec![0i32; 16])
            .unwrap();
        assert_eq!(query.submit().unwrap(), QueryStatus::Completed);
        (
            query.buffer::<i32>(TESSERA_COORDS).unwrap().to_vec(),
            query.buffer::<i32>("v").unwrap().to_vec(),
        )
    };
    let small = budgeted(&vfs, 1);
    let expected = read(&ctx);
    assert_eq!(expected.1.iter().filter(|&&v| v == -1).count(), 8);
    assert_eq!(read(&small), expected);
    assert!(small.metrics().count(READ_PARTITIONS) > 1);
}

#[test]
fn dense_reads_generate_cells_lazily() {
    let ctx = memory_ctx();
    let schema = SchemaBuilder::new(ArrayType::Dense)
        .with_domain(
            Domain::builder()
                .add_dimension(
                    Dimension::try_new("t", [0i64, 999_999_999_999], Some(1000)).unwrap(),
                )
                .unwrap()
                .build()
                .unwrap(),
        )
        .unwrap()
        .add_attribute(Attribute::new("v", PType::I64).with_fill_value(-1i64).unwrap())
        .unwrap()
        .build()
        .unwrap();
    Array::create(&ctx, "mem://huge", &schema).unwrap();
    let mut array = Array::new(&ctx, "mem://huge");
    array.open(Mode::Write).unwrap();
    let mut write = Query::new(&array, Mode::Write).unwrap();
    write
        .set_subarray(&[5i64, 7])
        .unwrap()
        .set_buffer("v", vec![50i64, 60, 70])
        .unwrap();
    assert_eq!(write.submit().unwrap(), QueryStatus::Completed);
    array.close();

    array.open(Mode::Read).unwrap();
    for layout in [Layout::RowMajor, Layout::GlobalOrder] {
        let mut query = Query::new(&array, Mode::Read).unwrap();
        query
            .set_layout(layout)
            .unwrap()
            .set_buffer(TESSERA_COORDS, vec![0i64; 10])
            .unwrap()
            .set_buffer("v", vec![0i64; 10])
            .unwrap();
        assert_eq!(query.submit().unwrap(), QueryStatus::Incomplete);
        assert_eq!(
            query.buffer::<i64>(TESSERA_COORDS).unwrap(),
            (0..10).collect::<Vec<i64>>().as_slice()
        );
        assert_eq!(
            query.buffer::<i64>("v").unwrap(),
            &[-1, -1, -1, -1, -1, 50, 60, 70, -1, -1]
        );
        assert_eq!(query.submit().unwrap(), QueryStatus::Incomplete);
        assert_eq!(query.buffer::<i64>(TESSERA_COORDS).unwrap()[0], 10);
        assert_eq!(query.buffer::<i64>("v").unwrap(), &[-1; 10]);
    }
    assert_eq!(array.max_memory_size(&Subarray::full(schema.domain())).unwrap(), 3 * 16);
}
