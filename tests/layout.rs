use canon_types::{alignment, discriminant_type, size, Case, DiscriminantType, ValType};

#[test]
fn primitive_layout() {
    let table = [
        (ValType::Bool, 1, 1),
        (ValType::U8, 1, 1),
        (ValType::S16, 2, 2),
        (ValType::U32, 4, 4),
        (ValType::Float32, 4, 4),
        (ValType::Char, 4, 4),
        (ValType::S64, 8, 8),
        (ValType::Float64, 8, 8),
        (ValType::String, 4, 8),
        (ValType::list(ValType::U8), 4, 8),
    ];
    for (t, align, sz) in table {
        assert_eq!(alignment(&t), align, "alignment of {t:?}");
        assert_eq!(size(&t), sz, "size of {t:?}");
    }
}

#[test]
fn record_pads_fields_and_tail() {
    let t = ValType::record([("a", ValType::U8), ("b", ValType::U32)]);
    assert_eq!(size(&t), 8);
    assert_eq!(alignment(&t), 4);

    let t = ValType::record([("a", ValType::U32), ("b", ValType::U8)]);
    assert_eq!(size(&t), 8);

    let t = ValType::record([("a", ValType::U8), ("b", ValType::U16), ("c", ValType::U8)]);
    assert_eq!(size(&t), 6);
    assert_eq!(alignment(&t), 2);

    let empty = ValType::Record(vec![]);
    assert_eq!(size(&empty), 0);
    assert_eq!(alignment(&empty), 1);
}

#[test]
fn nested_record_layout() {
    let inner = ValType::record([("x", ValType::U8), ("y", ValType::U64)]);
    let outer = ValType::record([("flag", ValType::Bool), ("inner", inner)]);
    assert_eq!(alignment(&outer), 8);
    assert_eq!(size(&outer), 24);
}

#[test]
fn variant_layout() {
    let t = ValType::option(ValType::U32);
    assert_eq!(alignment(&t), 4);
    assert_eq!(size(&t), 8);

    let t = ValType::option(ValType::U8);
    assert_eq!(size(&t), 2);

    let t = ValType::result(Some(ValType::U64), None);
    assert_eq!(alignment(&t), 8);
    assert_eq!(size(&t), 16);

    let t = ValType::enumeration(["a", "b", "c"]);
    assert_eq!(alignment(&t), 1);
    assert_eq!(size(&t), 1);
}

#[test]
fn discriminant_grows_with_case_count() {
    let cases = |n: usize| -> Vec<Case> { (0..n).map(|i| Case::new(format!("c{i}"), None)).collect() };
    assert_eq!(discriminant_type(&cases(2)), DiscriminantType::U8);
    assert_eq!(discriminant_type(&cases(256)), DiscriminantType::U8);
    assert_eq!(discriminant_type(&cases(257)), DiscriminantType::U16);

    let wide = ValType::Variant(cases(300));
    assert_eq!(size(&wide), 2);
    assert_eq!(alignment(&wide), 2);
}

#[test]
fn flags_pack_into_minimum_width() {
    let flags = |n: usize| ValType::flags((0..n).map(|i| format!("f{i}")));
    assert_eq!(size(&flags(0)), 0);
    assert_eq!(size(&flags(8)), 1);
    assert_eq!(size(&flags(9)), 2);
    assert_eq!(alignment(&flags(9)), 2);
    assert_eq!(size(&flags(16)), 2);
    assert_eq!(size(&flags(17)), 4);
    assert_eq!(size(&flags(32)), 4);
    assert_eq!(size(&flags(33)), 8);
    assert_eq!(alignment(&flags(33)), 4);
}

#[test]
fn sugar_matches_structural_form() {
    let tuple = ValType::Tuple(vec![ValType::U8, ValType::U32]);
    let record = ValType::record([("0", ValType::U8), ("1", ValType::U32)]);
    assert_eq!(size(&tuple), size(&record));
    assert_eq!(alignment(&tuple), alignment(&record));
}
