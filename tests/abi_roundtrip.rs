use canon_abi::{
    bump_realloc, lift_flat, load, lower_flat, store, CallContext, CanonicalOptions,
    ComponentInstance, Cx, FlatIter, FlatValue, Memory, ValType, Value,
};
use canon_types::Case;
use proptest::prelude::*;

fn options() -> CanonicalOptions {
    let memory = Memory::new(64);
    CanonicalOptions::new(memory.clone()).with_realloc(bump_realloc(&memory, 64))
}

fn store_then_load(v: &Value, t: &ValType) -> Value {
    let mut call = CallContext::new(options());
    let mut inst = ComponentInstance::new();
    let mut cx = Cx::new(&mut call, &mut inst);
    store(&mut cx, v, t, 0).expect("store");
    load(&mut cx, 0, t).expect("load")
}

fn lower_then_lift(v: &Value, t: &ValType) -> (Vec<FlatValue>, Value) {
    let mut call = CallContext::new(options());
    let mut inst = ComponentInstance::new();
    let mut cx = Cx::new(&mut call, &mut inst);
    let flat = lower_flat(&mut cx, v, t).expect("lower");
    let mut it = FlatIter::new(&flat);
    let lifted = lift_flat(&mut cx, &mut it, t).expect("lift");
    assert_eq!(it.remaining(), 0);
    (flat, lifted)
}

#[test]
fn roundtrip_primitives() {
    let cases = vec![
        (Value::Bool(true), ValType::Bool),
        (Value::U8(250), ValType::U8),
        (Value::U16(65000), ValType::U16),
        (Value::U32(4_000_000_000), ValType::U32),
        (Value::U64(u64::MAX), ValType::U64),
        (Value::S8(-5), ValType::S8),
        (Value::S16(-32000), ValType::S16),
        (Value::S32(i32::MIN), ValType::S32),
        (Value::S64(-9_223_372_036_854_775_000), ValType::S64),
        (Value::F32(3.5), ValType::Float32),
        (Value::F64(-1.25), ValType::Float64),
        (Value::Char('z'), ValType::Char),
        (Value::Char('\u{10FFFF}'), ValType::Char),
        (Value::from("hello"), ValType::String),
    ];

    for (value, ty) in cases {
        assert_eq!(store_then_load(&value, &ty), value, "memory {ty:?}");
        assert_eq!(lower_then_lift(&value, &ty).1, value, "flat {ty:?}");
    }
}

#[test]
fn roundtrip_nested_values() {
    let ty = ValType::record([
        ("id", ValType::U8),
        ("tags", ValType::list(ValType::String)),
        ("parent", ValType::option(ValType::S64)),
        ("pair", ValType::Tuple(vec![ValType::Char, ValType::Float64])),
    ]);
    let value = Value::record([
        ("id", Value::U8(7)),
        ("tags", Value::from(vec!["a", "bc", ""])),
        ("parent", Value::some(Value::S64(-1))),
        ("pair", Value::tuple([Value::Char('é'), Value::F64(0.5)])),
    ]);

    assert_eq!(store_then_load(&value, &ty), value);
    assert_eq!(lower_then_lift(&value, &ty).1, value);
}

#[test]
fn roundtrip_list_of_records() {
    let point = ValType::record([("x", ValType::S16), ("y", ValType::S16)]);
    let ty = ValType::list(point);
    let value = Value::List(
        (0..10)
            .map(|i| Value::record([("x", Value::S16(i)), ("y", Value::S16(-i))]))
            .collect(),
    );
    assert_eq!(store_then_load(&value, &ty), value);
}

#[test]
fn roundtrip_variants() {
    let ty = ValType::result(Some(ValType::U32), Some(ValType::String));
    for value in [
        Value::ok(Some(Value::U32(9))),
        Value::err(Some(Value::from("boom"))),
    ] {
        assert_eq!(store_then_load(&value, &ty), value);
        assert_eq!(lower_then_lift(&value, &ty).1, value);
    }

    let ty = ValType::enumeration(["red", "green", "blue"]);
    let value = Value::enum_case("blue");
    assert_eq!(store_then_load(&value, &ty), value);
    assert_eq!(lower_then_lift(&value, &ty).0, vec![FlatValue::U32(2)]);
}

#[test]
fn roundtrip_flags() {
    let labels: Vec<String> = (0..40).map(|i| format!("f{i}")).collect();
    let ty = ValType::Flags(labels);
    let value = Value::flags(["f1", "f31", "f32", "f39"]);
    assert_eq!(store_then_load(&value, &ty), value);

    let (flat, lifted) = lower_then_lift(&value, &ty);
    assert_eq!(flat, vec![FlatValue::U32(0x8000_0002), FlatValue::U32(0x81)]);
    assert_eq!(lifted, value);
}

#[test]
fn flags_are_stored_in_declared_width() {
    let ty = ValType::flags((0..9).map(|i| format!("f{i}")));
    let memory = Memory::new(8);
    let mut call = CallContext::new(CanonicalOptions::new(memory.clone()));
    let mut inst = ComponentInstance::new();
    let mut cx = Cx::new(&mut call, &mut inst);

    memory.write(0, &[0xff; 8]).expect("fill");
    store(&mut cx, &Value::flags(["f0", "f8"]), &ty, 0).expect("store");
    assert_eq!(memory.read(0, 4).expect("read"), vec![0x01, 0x01, 0xff, 0xff]);
}

#[test]
fn record_fields_land_at_aligned_offsets() {
    let ty = ValType::record([("a", ValType::U8), ("b", ValType::U32)]);
    let memory = Memory::new(8);
    let mut call = CallContext::new(CanonicalOptions::new(memory.clone()));
    let mut inst = ComponentInstance::new();
    let mut cx = Cx::new(&mut call, &mut inst);

    let value = Value::record([("a", Value::U8(0xaa)), ("b", Value::U32(0x0102_0304))]);
    store(&mut cx, &value, &ty, 0).expect("store");
    assert_eq!(memory.read_uint(0, 1).expect("read"), 0xaa);
    assert_eq!(memory.read_uint(4, 4).expect("read"), 0x0102_0304);
}

#[test]
fn nan_is_canonicalized() {
    let nan32 = f32::from_bits(0x7fc0_0001);
    let Value::F32(loaded) = store_then_load(&Value::F32(nan32), &ValType::Float32) else {
        panic!("expected float32");
    };
    assert_eq!(loaded.to_bits(), 0x7fc0_0000);

    let nan64 = f64::from_bits(0xfff8_0000_0000_0001);
    let Value::F64(loaded) = store_then_load(&Value::F64(nan64), &ValType::Float64) else {
        panic!("expected float64");
    };
    assert_eq!(loaded.to_bits(), 0x7ff8_0000_0000_0000);

    let (flat, _) = lower_then_lift(&Value::F32(f32::from_bits(0xffc0_1234)), &ValType::Float32);
    let [FlatValue::F32(lowered)] = flat.as_slice() else {
        panic!("expected one float32 lane");
    };
    assert_eq!(lowered.to_bits(), 0x7fc0_0000);
}

#[test]
fn nan_bits_in_memory_are_canonicalized_on_load() {
    let memory = Memory::new(8);
    let mut call = CallContext::new(CanonicalOptions::new(memory.clone()));
    let mut inst = ComponentInstance::new();
    let mut cx = Cx::new(&mut call, &mut inst);

    memory.write_uint(0, 0x7fc0_0001, 4).expect("write");
    let Value::F32(f) = load(&mut cx, 0, &ValType::Float32).expect("load") else {
        panic!("expected float32");
    };
    assert_eq!(f.to_bits(), 0x7fc0_0000);
}

#[test]
fn joined_lanes_carry_payload_bits() {
    let ty = ValType::Variant(vec![
        Case::new("int", Some(ValType::U32)),
        Case::new("float", Some(ValType::Float32)),
    ]);
    let value = Value::variant("float", Some(Value::F32(1.5)));
    let (flat, lifted) = lower_then_lift(&value, &ty);
    assert_eq!(flat, vec![FlatValue::U32(1), FlatValue::U32(1.5f32.to_bits())]);
    assert_eq!(lifted, value);

    let ty = ValType::Variant(vec![
        Case::new("small", Some(ValType::U32)),
        Case::new("big", Some(ValType::U64)),
        Case::new("real", Some(ValType::Float64)),
        Case::new("empty", None),
    ]);
    for (value, lanes) in [
        (
            Value::variant("small", Some(Value::U32(7))),
            vec![FlatValue::U32(0), FlatValue::U64(7)],
        ),
        (
            Value::variant("real", Some(Value::F64(-2.0))),
            vec![FlatValue::U32(2), FlatValue::U64((-2.0f64).to_bits())],
        ),
        (
            Value::variant("empty", None),
            vec![FlatValue::U32(3), FlatValue::U64(0)],
        ),
    ] {
        let (flat, lifted) = lower_then_lift(&value, &ty);
        assert_eq!(flat, lanes);
        assert_eq!(lifted, value);
    }
}

#[test]
fn refinements_extend_the_case_label() {
    let refined = ValType::Variant(vec![
        Case::new("a", Some(ValType::U8)),
        Case::refining("b", Some(ValType::U8), "a"),
    ]);
    let value = Value::variant("b", Some(Value::U8(3)));
    let lifted = store_then_load(&value, &refined);
    assert_eq!(lifted, Value::variant("b|a", Some(Value::U8(3))));

    // the refined label still lowers into a type that only knows the parent
    let parent = ValType::Variant(vec![
        Case::new("x", None),
        Case::new("a", Some(ValType::U8)),
    ]);
    let (flat, _) = lower_then_lift(&lifted, &parent);
    assert_eq!(flat, vec![FlatValue::U32(1), FlatValue::U32(3)]);
}

#[test]
fn nonzero_bool_lifts_true() {
    let mut call = CallContext::new(options());
    let mut inst = ComponentInstance::new();
    let mut cx = Cx::new(&mut call, &mut inst);
    let flat = [FlatValue::U32(2)];
    let value = lift_flat(&mut cx, &mut FlatIter::new(&flat), &ValType::Bool).expect("lift");
    assert_eq!(value, Value::Bool(true));
}

proptest! {
    #[test]
    fn integers_roundtrip(a in any::<u64>(), b in any::<i64>(), c in any::<i16>(), d in any::<u8>()) {
        for (value, ty) in [
            (Value::U64(a), ValType::U64),
            (Value::S64(b), ValType::S64),
            (Value::S16(c), ValType::S16),
            (Value::U8(d), ValType::U8),
        ] {
            prop_assert_eq!(store_then_load(&value, &ty), value.clone());
            prop_assert_eq!(lower_then_lift(&value, &ty).1, value);
        }
    }

    #[test]
    fn chars_roundtrip(c in any::<char>()) {
        prop_assert_eq!(store_then_load(&Value::Char(c), &ValType::Char), Value::Char(c));
    }

    #[test]
    fn floats_roundtrip_bit_for_bit(f in any::<f64>().prop_filter("not nan", |f| !f.is_nan())) {
        let Value::F64(loaded) = store_then_load(&Value::F64(f), &ValType::Float64) else {
            panic!("expected float64");
        };
        prop_assert_eq!(loaded.to_bits(), f.to_bits());
    }

    #[test]
    fn strings_roundtrip(s in ".*") {
        prop_assert_eq!(store_then_load(&Value::from(s.as_str()), &ValType::String), Value::String(s));
    }
}
