//! Call overhead benchmarks
//!
//! The six call-overhead downcalls in specialized and generic mode, plus a
//! direct Rust call of the same callee as the floor. Uses the C fixture
//! library when `build.rs` produced it, Rust `extern "C"` callees otherwise.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use downcall::{
    call_overhead_table, registry::point_layout, Address, DowncallResult, ExecMode, Library,
    Linker, LinkerOptions, NativeAddress, NativeRegion, Segment, TypedHandle,
};

#[repr(C)]
#[derive(Clone, Copy)]
struct Point {
    x: i64,
    y: i64,
}

extern "C" fn func() {}

extern "C" fn identity(x: i32) -> i32 {
    x
}

extern "C" fn identity_struct(p: Point) -> Point {
    p
}

extern "C" fn identity_memory_address(p: *mut u8) -> *mut u8 {
    p
}

extern "C" fn args5(_: i64, _: f64, _: i64, _: f64, _: i64) {}

#[allow(clippy::too_many_arguments)]
extern "C" fn args10(_: i64, _: f64, _: i64, _: f64, _: i64, _: f64, _: i64, _: f64, _: i64, _: f64) {}

type Args10 = (i64, f64, i64, f64, i64, f64, i64, f64, i64, f64);

struct Targets {
    func: TypedHandle<(), ()>,
    identity: TypedHandle<(i32,), i32>,
    identity_struct: TypedHandle<(Segment,), Segment>,
    identity_memory_address: TypedHandle<(Address,), Address>,
    args5: TypedHandle<(i64, f64, i64, f64, i64), ()>,
    args10: TypedHandle<Args10, ()>,
}

/// Bind the call-overhead table against the fixture library
fn fixture_targets(linker: &Linker) -> Option<DowncallResult<Targets>> {
    let library = Library::open(option_env!("DOWNCALL_FIXTURES")?).ok()?;
    Some(targets_from_table(&library, linker))
}

fn targets_from_table(library: &Library, linker: &Linker) -> DowncallResult<Targets> {
    let table = call_overhead_table()?;
    let bound = table.init(library, linker)?;
    let get = |name: &str| bound.get(name).expect("declared in call_overhead_table");
    Ok(Targets {
        func: get("func").typed()?,
        identity: get("identity").typed()?,
        identity_struct: get("identity_struct").typed()?,
        identity_memory_address: get("identity_memory_address").typed()?,
        args5: get("args5").typed()?,
        args10: get("args10").typed()?,
    })
}

/// Bind the same descriptors to the Rust callees above
fn rust_targets(linker: &Linker) -> DowncallResult<Targets> {
    let table = call_overhead_table()?;
    let address = |f: usize| unsafe { NativeAddress::from_raw(Address::new(f)) };
    let bind = |name: &str, f: usize| {
        let decl = table
            .declarations()
            .iter()
            .find(|d| d.name == name)
            .expect("declared in call_overhead_table");
        linker.downcall(address(f), &decl.descriptor)
    };
    Ok(Targets {
        func: bind("func", func as usize).typed()?,
        identity: bind("identity", identity as usize).typed()?,
        identity_struct: bind("identity_struct", identity_struct as usize).typed()?,
        identity_memory_address: bind("identity_memory_address", identity_memory_address as usize)
            .typed()?,
        args5: bind("args5", args5 as usize).typed()?,
        args10: bind("args10", args10 as usize).typed()?,
    })
}

fn bench_mode(c: &mut Criterion, mode: ExecMode) {
    let linker = Linker::with_options(LinkerOptions { mode });
    let targets = match fixture_targets(&linker) {
        Some(targets) => targets.expect("fixture library binds"),
        None => rust_targets(&linker).expect("rust callees bind"),
    };

    let point = point_layout().expect("point layout");
    let input = NativeRegion::allocate(&point).expect("input region");
    let mut output = NativeRegion::allocate(&point).expect("output region");

    let mut group = c.benchmark_group(format!("call_overhead/{}", mode));

    group.bench_function("blank", |b| b.iter(|| targets.func.call(())));
    group.bench_function("identity", |b| {
        b.iter(|| black_box(targets.identity.call((black_box(10),))))
    });
    group.bench_function("identity_struct", |b| {
        b.iter(|| targets.identity_struct.call_into((black_box(&input),), &mut output))
    });
    group.bench_function("identity_memory_address", |b| {
        b.iter(|| black_box(targets.identity_memory_address.call((black_box(Address::NULL),))))
    });
    group.bench_function("args5", |b| {
        b.iter(|| targets.args5.call(black_box((10, 11.0, 12, 13.0, 14))))
    });
    group.bench_function("args10", |b| {
        b.iter(|| {
            targets.args10.call(black_box((
                10, 11.0, 12, 13.0, 14, 15.0, 16, 17.0, 18, 19.0,
            )))
        })
    });

    group.finish();
}

fn bench_specialized(c: &mut Criterion) {
    bench_mode(c, ExecMode::Specialized);
}

fn bench_generic(c: &mut Criterion) {
    bench_mode(c, ExecMode::Generic);
}

/// Direct calls through Rust function pointers
fn bench_direct(c: &mut Criterion) {
    let mut group = c.benchmark_group("call_overhead/direct");
    let identity_fn: extern "C" fn(i32) -> i32 = black_box(identity);
    let args10_fn: extern "C" fn(i64, f64, i64, f64, i64, f64, i64, f64, i64, f64) =
        black_box(args10);

    group.bench_function("identity", |b| b.iter(|| black_box(identity_fn(black_box(10)))));
    group.bench_function("args10", |b| {
        b.iter(|| args10_fn(10, 11.0, 12, 13.0, 14, 15.0, 16, 17.0, 18, 19.0))
    });
    group.finish();
}

criterion_group!(benches, bench_direct, bench_specialized, bench_generic);
criterion_main!(benches);
