//! Integration Tests against the C Call Fixtures
//!
//! `build.rs` compiles `native/callfixtures.c` with the host C compiler.
//! When that worked, these tests load it through the resolver and bind the
//! call-overhead downcall table plus per-width identities; otherwise every
//! test returns early.

use downcall::{
    call_overhead_table, c, parse_signature, Address, Arg, CallDescriptor, DowncallError,
    ExecMode, Library, LibraryLoader, Linker, LinkerOptions, NativeRegion, Segment, Value,
};

fn fixtures() -> Option<Library> {
    let path = option_env!("DOWNCALL_FIXTURES")?;
    Some(Library::open(path).expect("fixture library was built but does not load"))
}

fn linkers() -> [Linker; 2] {
    [
        Linker::system(),
        Linker::with_options(LinkerOptions {
            mode: ExecMode::Generic,
        }),
    ]
}

#[test]
fn test_call_overhead_table() {
    let Some(lib) = fixtures() else {
        return;
    };

    for linker in linkers() {
        let table = call_overhead_table().unwrap();
        let bound = table.init(&lib, &linker).unwrap();
        assert_eq!(bound.len(), 6);
        assert!(std::ptr::eq(bound, table.init(&lib, &linker).unwrap()));

        let func = bound.get("func").unwrap().typed::<(), ()>().unwrap();
        func.call(());

        let identity = bound.get("identity").unwrap().typed::<(i32,), i32>().unwrap();
        assert_eq!(identity.call((-123,)), -123);

        let point = downcall::registry::point_layout().unwrap();
        let identity_struct = bound
            .get("identity_struct")
            .unwrap()
            .typed::<(Segment,), Segment>()
            .unwrap();
        for fill in [0x00u8, 0xff] {
            let mut input = NativeRegion::allocate(&point).unwrap();
            input.fill(fill);
            let mut output = NativeRegion::allocate(&point).unwrap();
            output.fill(!fill);
            identity_struct.call_into((&input,), &mut output);
            assert_eq!(output.as_bytes(), input.as_bytes());
        }

        let identity_address = bound
            .get("identity_memory_address")
            .unwrap()
            .typed::<(Address,), Address>()
            .unwrap();
        assert!(identity_address.call((Address::NULL,)).is_null());
        let target = Address::new(0x1000);
        assert_eq!(identity_address.call((target,)), target);

        let args5 = bound
            .get("args5")
            .unwrap()
            .typed::<(i64, f64, i64, f64, i64), ()>()
            .unwrap();
        args5.call((1, 2.0, 3, 4.0, 5));

        let args10 = bound.get("args10").unwrap();
        assert_eq!(args10.descriptor().argument_layouts().len(), 10);
        let words: Vec<Arg> = (0..10)
            .map(|i| {
                if i % 2 == 0 {
                    Arg::from(i as i64)
                } else {
                    Arg::from(i as f64)
                }
            })
            .collect();
        assert_eq!(unsafe { args10.invoke(&words, None) }, None);
    }
}

#[test]
fn test_scalar_width_identities() {
    let Some(lib) = fixtures() else {
        return;
    };

    let cases: &[(&str, &[Value])] = &[
        ("int8_t identity_i8(int8_t)", &[Value::I8(i8::MIN), Value::I8(-1), Value::I8(i8::MAX)]),
        ("int16_t identity_i16(int16_t)", &[Value::I16(i16::MIN), Value::I16(-2)]),
        ("int32_t identity_i32(int32_t)", &[Value::I32(i32::MIN), Value::I32(0)]),
        ("int64_t identity_i64(int64_t)", &[Value::I64(i64::MIN), Value::I64(-1)]),
        ("uint8_t identity_u8(uint8_t)", &[Value::U8(0), Value::U8(u8::MAX)]),
        ("uint16_t identity_u16(uint16_t)", &[Value::U16(u16::MAX)]),
        ("uint32_t identity_u32(uint32_t)", &[Value::U32(u32::MAX), Value::U32(0x8000_0000)]),
        ("uint64_t identity_u64(uint64_t)", &[Value::U64(u64::MAX)]),
        ("float identity_f32(float)", &[Value::F32(-0.0), Value::F32(3.0e38)]),
        ("double identity_f64(double)", &[Value::F64(f64::MIN_POSITIVE), Value::F64(-1e300)]),
    ];

    for linker in linkers() {
        for (sig, values) in cases {
            let parsed = parse_signature(sig).unwrap();
            let descriptor = CallDescriptor::for_function(&parsed.function).unwrap();
            let handle = linker.downcall(lib.lookup(&parsed.name).unwrap(), &descriptor);
            for value in *values {
                let out = unsafe { handle.invoke(&[Arg::from(*value)], None) }.unwrap();
                assert_eq!(out.to_word(), value.to_word(), "{} {}", sig, value);
                assert_eq!(out.leaf(), value.leaf());
            }
        }
    }
}

#[test]
fn test_mixed_argument_order() {
    let Some(lib) = fixtures() else {
        return;
    };

    for linker in linkers() {
        let sum5 = linker
            .downcall_typed::<(i64, f64, i64, f64, i64), f64>(
                lib.lookup("sum_args5").unwrap(),
                &parse_signature("double sum_args5(i64, f64, i64, f64, i64)")
                    .unwrap()
                    .function,
            )
            .unwrap();
        assert_eq!(sum5.call((1, 0.5, 2, 0.25, 3)), 6.75);

        let weigh = linker
            .downcall_typed::<(i64, f64, i64, f64, i64, f64, i64, f64, i64, f64), i64>(
                lib.lookup("weigh_args10").unwrap(),
                &parse_signature(
                    "long long weigh_args10(i64, f64, i64, f64, i64, f64, i64, f64, i64, f64)",
                )
                .unwrap()
                .function,
            )
            .unwrap();
        // 1*1 + 1*2 + ... + 1*10
        assert_eq!(
            weigh.call((1, 1.0, 1, 1.0, 1, 1.0, 1, 1.0, 1, 1.0)),
            55
        );
        assert_eq!(
            weigh.call((10, 0.0, 0, 0.0, 0, 0.0, 0, 0.0, 0, 2.0)),
            30
        );

        // Eight integers: two go to the stack on System V.
        let sum8 = linker
            .downcall_typed::<(i64, i64, i64, i64, i64, i64, i64, i64), i64>(
                lib.lookup("sum_i64x8").unwrap(),
                &parse_signature("i64 sum_i64x8(i64, i64, i64, i64, i64, i64, i64, i64)")
                    .unwrap()
                    .function,
            )
            .unwrap();
        assert_eq!(sum8.call((1, 2, 3, 4, 5, 6, 7, 8)), 36);
    }
}

#[test]
fn test_struct_shapes() {
    let Some(lib) = fixtures() else {
        return;
    };

    for linker in linkers() {
        // {double, int, int}: one SSE and one INTEGER eightbyte
        let mixed = parse_signature("struct{double, int, int} identity_mixed(struct{double, int, int})")
            .unwrap();
        let layout = mixed.function.return_layout().unwrap().clone();
        let handle = linker
            .downcall_typed::<(Segment,), Segment>(lib.lookup("identity_mixed").unwrap(), &mixed.function)
            .unwrap();
        let mut input = NativeRegion::allocate(&layout).unwrap();
        input.write(0, 2.5f64).unwrap();
        input.write(8, -4i32).unwrap();
        input.write(12, 9i32).unwrap();
        let mut output = NativeRegion::allocate(&layout).unwrap();
        handle.call_into((&input,), &mut output);
        assert_eq!(output.as_bytes(), input.as_bytes());

        // Three floats plus a float scalar
        let vec3 = parse_signature("struct{float, float, float} scale_vec3(struct{float, float, float}, float)")
            .unwrap();
        let layout = vec3.function.return_layout().unwrap().clone();
        let scale = linker
            .downcall_typed::<(Segment, f32), Segment>(lib.lookup("scale_vec3").unwrap(), &vec3.function)
            .unwrap();
        let mut input = NativeRegion::allocate(&layout).unwrap();
        input.write(0, 1.0f32).unwrap();
        input.write(4, -2.0f32).unwrap();
        input.write(8, 0.5f32).unwrap();
        let mut output = NativeRegion::allocate(&layout).unwrap();
        scale.call_into((&input, 4.0), &mut output);
        assert_eq!(output.read::<f32>(0).unwrap(), 4.0);
        assert_eq!(output.read::<f32>(4).unwrap(), -8.0);
        assert_eq!(output.read::<f32>(8).unwrap(), 2.0);

        // Short tail: {char, short} is four bytes
        let small = parse_signature("struct{char, short} identity_small(struct{char, short})").unwrap();
        let layout = small.function.return_layout().unwrap().clone();
        assert_eq!(layout.size(), 4);
        let handle = linker
            .downcall_typed::<(Segment,), Segment>(lib.lookup("identity_small").unwrap(), &small.function)
            .unwrap();
        let mut input = NativeRegion::allocate(&layout).unwrap();
        input.write(0, -3i8).unwrap();
        input.write(2, 1000i16).unwrap();
        let mut output = NativeRegion::allocate(&layout).unwrap();
        handle.call_into((&input,), &mut output);
        assert_eq!(output.read::<i8>(0).unwrap(), -3);
        assert_eq!(output.read::<i16>(2).unwrap(), 1000);

        // Memory-class struct
        let triple = parse_signature("struct{i64, i64, i64} identity_triple(struct{i64, i64, i64})").unwrap();
        let layout = triple.function.return_layout().unwrap().clone();
        let handle = linker
            .downcall_typed::<(Segment,), Segment>(lib.lookup("identity_triple").unwrap(), &triple.function)
            .unwrap();
        let mut input = NativeRegion::allocate(&layout).unwrap();
        input.fill(0xff);
        input.write(8, 42i64).unwrap();
        let mut output = NativeRegion::allocate(&layout).unwrap();
        handle.call_into((&input,), &mut output);
        assert_eq!(output.as_bytes(), input.as_bytes());

        // Struct and scalar together
        let point = downcall::registry::point_layout().unwrap();
        let sum = linker
            .downcall_typed::<(Segment,), i64>(
                lib.lookup("point_sum").unwrap(),
                &downcall::FunctionDescriptor::of(c::long_long(), [point.clone()]),
            )
            .unwrap();
        let mut p = NativeRegion::allocate(&point).unwrap();
        p.write(0, 40i64).unwrap();
        p.write(8, 2i64).unwrap();
        assert_eq!(sum.call((&p,)), 42);
    }
}

#[test]
fn test_loader_finds_by_name() {
    let Some(path) = option_env!("DOWNCALL_FIXTURES") else {
        return;
    };
    let path = std::path::Path::new(path);
    let (Some(dir), Some(file)) = (path.parent(), path.file_name()) else {
        return;
    };
    if file != downcall::library::library_filename("callfixtures").as_str() {
        return;
    }

    let mut loader = LibraryLoader::new();
    loader.add_search_path(dir);
    let first = loader.load("callfixtures").unwrap();
    let second = loader.load("callfixtures").unwrap();
    assert!(first.same_as(&second));
    assert!(first.lookup("identity").is_ok());

    match first.lookup("no_such_fixture") {
        Err(DowncallError::SymbolNotFound { symbol, .. }) => assert_eq!(symbol, "no_such_fixture"),
        other => panic!("unexpected {other:?}"),
    }
}
