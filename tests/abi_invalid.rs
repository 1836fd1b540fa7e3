use canon_abi::{
    bump_realloc, lift_flat, load, lower_flat, store, CallContext, CanonError, CanonicalOptions,
    ComponentInstance, Cx, FlatIter, FlatKind, FlatValue, Memory, Trap, ValType,
    ValidationError, Value,
};
use canon_types::Case;

struct Harness {
    memory: Memory,
    call: CallContext,
    inst: ComponentInstance,
}

impl Harness {
    fn new() -> Self {
        let memory = Memory::new(64);
        let opts = CanonicalOptions::new(memory.clone()).with_realloc(bump_realloc(&memory, 64));
        Self {
            memory,
            call: CallContext::new(opts),
            inst: ComponentInstance::new(),
        }
    }

    fn without_realloc() -> Self {
        let memory = Memory::new(64);
        Self {
            call: CallContext::new(CanonicalOptions::new(memory.clone())),
            memory,
            inst: ComponentInstance::new(),
        }
    }

    fn cx(&mut self) -> Cx<'_> {
        Cx::new(&mut self.call, &mut self.inst)
    }

    fn lift(&mut self, flat: &[FlatValue], t: &ValType) -> Result<Value, CanonError> {
        lift_flat(&mut self.cx(), &mut FlatIter::new(flat), t)
    }

    fn store(&mut self, v: &Value, t: &ValType) -> Result<(), CanonError> {
        store(&mut self.cx(), v, t, 0)
    }
}

fn trap_of(result: Result<Value, CanonError>) -> Trap {
    match result {
        Err(CanonError::Trap(trap)) => trap,
        other => panic!("expected trap, got {other:?}"),
    }
}

fn validation_of<T: std::fmt::Debug>(result: Result<T, CanonError>) -> ValidationError {
    match result {
        Err(CanonError::Validation(err)) => err,
        other => panic!("expected validation error, got {other:?}"),
    }
}

#[test]
fn invalid_chars_trap() {
    let mut h = Harness::new();
    for bad in [0xD800, 0xDFFF, 0x110000, 0xFFFF_FFFF] {
        let trap = trap_of(h.lift(&[FlatValue::U32(bad)], &ValType::Char));
        assert_eq!(trap, Trap::InvalidChar(bad));
    }
    let max = h
        .lift(&[FlatValue::U32(0x10FFFF)], &ValType::Char)
        .expect("max scalar");
    assert_eq!(max, Value::Char(char::MAX));
}

#[test]
fn invalid_char_in_memory_traps() {
    let mut h = Harness::new();
    h.memory.write_uint(0, 0xD800, 4).expect("write");
    let err = load(&mut h.cx(), 0, &ValType::Char).expect_err("surrogate");
    assert_eq!(err.as_trap(), Some(&Trap::InvalidChar(0xD800)));
}

#[test]
fn narrow_integers_truncate_on_lift() {
    let mut h = Harness::new();
    let lift = |h: &mut Harness, v: u32, t: ValType| h.lift(&[FlatValue::U32(v)], &t).expect("lift");
    assert_eq!(lift(&mut h, 256, ValType::U8), Value::U8(0));
    assert_eq!(lift(&mut h, 256, ValType::S8), Value::S8(0));
    assert_eq!(lift(&mut h, 4294967295, ValType::U8), Value::U8(255));
    assert_eq!(lift(&mut h, 4294967295, ValType::S8), Value::S8(-1));
    assert_eq!(lift(&mut h, 0x1_8000, ValType::S16), Value::S16(i16::MIN));
    assert_eq!(lift(&mut h, 4294967295, ValType::S32), Value::S32(-1));
}

#[test]
fn flat_iterator_enforces_kinds() {
    let mut h = Harness::new();
    let trap = trap_of(h.lift(&[FlatValue::U32(1)], &ValType::U64));
    assert_eq!(
        trap,
        Trap::FlatKindMismatch {
            expected: FlatKind::U64,
            found: FlatKind::U32
        }
    );
    let trap = trap_of(h.lift(&[FlatValue::U32(1)], &ValType::String));
    assert_eq!(trap, Trap::FlatExhausted);
}

#[test]
fn misaligned_list_traps() {
    let mut h = Harness::new();
    let flat = [FlatValue::U32(2), FlatValue::U32(1)];
    let trap = trap_of(h.lift(&flat, &ValType::list(ValType::U32)));
    assert_eq!(trap, Trap::Misaligned { ptr: 2, alignment: 4 });
}

#[test]
fn out_of_bounds_list_traps() {
    let mut h = Harness::new();
    let flat = [FlatValue::U32(60), FlatValue::U32(10)];
    let trap = trap_of(h.lift(&flat, &ValType::list(ValType::U8)));
    assert_eq!(
        trap,
        Trap::OutOfBounds {
            ptr: 60,
            len: 10,
            memory_size: 64
        }
    );
}

#[test]
fn out_of_bounds_load_traps() {
    let mut h = Harness::new();
    let err = load(&mut h.cx(), 62, &ValType::U32).expect_err("past the end");
    assert!(matches!(err.as_trap(), Some(Trap::OutOfBounds { ptr: 62, .. })));
}

#[test]
fn case_index_out_of_range_traps() {
    let mut h = Harness::new();
    let ty = ValType::enumeration(["a", "b", "c"]);
    let trap = trap_of(h.lift(&[FlatValue::U32(3)], &ty));
    assert_eq!(trap, Trap::InvalidCaseIndex { index: 3, cases: 3 });

    h.memory.write_uint(0, 7, 1).expect("write");
    let err = load(&mut h.cx(), 0, &ty).expect_err("bad discriminant");
    assert_eq!(err.as_trap(), Some(&Trap::InvalidCaseIndex { index: 7, cases: 3 }));
}

#[test]
fn store_rejects_mismatched_integers() {
    let mut h = Harness::new();
    assert_eq!(
        validation_of(h.store(&Value::S32(-1), &ValType::U32)),
        ValidationError::SignednessMismatch {
            expected: "u32",
            got: "s32"
        }
    );
    assert_eq!(
        validation_of(h.store(&Value::U32(300), &ValType::U8)),
        ValidationError::OutOfRange { value: 300, ty: "u8" }
    );
    assert!(matches!(
        validation_of(h.store(&Value::from("x"), &ValType::U32)),
        ValidationError::TypeMismatch { .. }
    ));
}

#[test]
fn store_rejects_mismatched_shapes() {
    let mut h = Harness::new();

    let record = ValType::record([("a", ValType::U8), ("b", ValType::U8)]);
    let err = validation_of(h.store(&Value::record([("a", Value::U8(1))]), &record));
    assert_eq!(err, ValidationError::MissingField("b".to_string()));

    let option = ValType::option(ValType::U8);
    let err = validation_of(h.store(&Value::variant("maybe", None), &option));
    assert_eq!(err, ValidationError::UnknownCase("maybe".to_string()));
    let err = validation_of(h.store(&Value::variant("some", None), &option));
    assert_eq!(err, ValidationError::PayloadMismatch("some".to_string()));

    let flags = ValType::flags(["read", "write"]);
    let err = validation_of(h.store(&Value::flags(["exec"]), &flags));
    assert_eq!(err, ValidationError::UnknownFlag("exec".to_string()));

    let err = validation_of(lower_flat(&mut h.cx(), &Value::Bool(true), &ValType::Float32));
    assert!(matches!(err, ValidationError::TypeMismatch { expected: "float32", got: "bool" }));
}

#[test]
fn validation_errors_are_recoverable() {
    let mut h = Harness::new();
    let err = h.store(&Value::S8(-1), &ValType::U8).expect_err("sign");
    assert!(!err.is_trap());

    // the harness is still usable afterwards
    h.store(&Value::U8(1), &ValType::U8).expect("store");
}

#[test]
fn invalid_utf8_traps() {
    let mut h = Harness::new();
    h.memory.write(0, &[0xff, 0xfe]).expect("write");
    let flat = [FlatValue::U32(0), FlatValue::U32(2)];
    let trap = trap_of(h.lift(&flat, &ValType::String));
    assert_eq!(trap, Trap::InvalidString("utf8"));
}

#[test]
fn storing_a_list_needs_realloc() {
    let mut h = Harness::without_realloc();
    let err = h
        .store(&Value::from(vec![1u8, 2, 3]), &ValType::list(ValType::U8))
        .expect_err("no realloc");
    assert_eq!(err.as_trap(), Some(&Trap::MissingRealloc));
}

#[test]
fn failing_realloc_surfaces_as_callee_error() {
    let memory = Memory::new(16);
    let opts = CanonicalOptions::new(memory)
        .with_realloc(std::rc::Rc::new(|_: u32, _: u32, _: u32, _: u32| -> anyhow::Result<u32> {
            anyhow::bail!("out of memory")
        }));
    let mut call = CallContext::new(opts);
    let mut inst = ComponentInstance::new();
    let err = lower_flat(&mut Cx::new(&mut call, &mut inst), &Value::from("hi"), &ValType::String)
        .expect_err("realloc failed");
    assert!(matches!(err, CanonError::Callee(_)));
    assert!(err.is_trap());
}

#[test]
fn misaligned_realloc_result_traps() {
    let memory = Memory::new(16);
    let opts = CanonicalOptions::new(memory).with_realloc(std::rc::Rc::new(|_: u32, _: u32, _: u32, _: u32| -> anyhow::Result<u32> { Ok(1) }));
    let mut call = CallContext::new(opts);
    let mut inst = ComponentInstance::new();
    let value = Value::from(vec![1u32]);
    let err = lower_flat(&mut Cx::new(&mut call, &mut inst), &value, &ValType::list(ValType::U32))
        .expect_err("misaligned");
    assert_eq!(err.as_trap(), Some(&Trap::Misaligned { ptr: 1, alignment: 4 }));
}

#[test]
fn variant_with_no_cases_cannot_be_lifted() {
    let mut h = Harness::new();
    let ty = ValType::Variant(Vec::<Case>::new());
    let trap = trap_of(h.lift(&[FlatValue::U32(0)], &ty));
    assert_eq!(trap, Trap::InvalidCaseIndex { index: 0, cases: 0 });
}

#[test]
fn huge_list_of_zero_sized_elements_traps() {
    let mut h = Harness::new();
    let ty = ValType::list(ValType::Record(vec![]));
    let trap = trap_of(h.lift(&[FlatValue::U32(0), FlatValue::U32(0x1000_0000)], &ty));
    assert_eq!(
        trap,
        Trap::ListLengthExceedsMemory {
            length: 0x1000_0000,
            memory_size: 64
        }
    );

    let small = h
        .lift(&[FlatValue::U32(0), FlatValue::U32(3)], &ty)
        .expect("fits in memory");
    assert_eq!(small, Value::List(vec![Value::Record(vec![]); 3]));
}
