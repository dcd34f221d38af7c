//! Descriptor grammar coverage, one family of tokens at a time

use nacre_layout::{
    parse, parse_signature, Addressee, DescriptorError, Endianness, GroupKind, Layout, ValueKind,
};

#[test]
fn scalar_tokens() {
    for (text, kind, bits) in [
        ("i8", ValueKind::SignedInt, 8),
        ("i64", ValueKind::SignedInt, 64),
        ("u16", ValueKind::UnsignedInt, 16),
        ("f32", ValueKind::Float, 32),
        ("f128", ValueKind::Float, 128),
    ] {
        let layout = parse(text).unwrap();
        let v = layout.as_value().unwrap();
        assert_eq!((v.kind, v.bits), (kind, bits), "{text}");
        assert_eq!(layout.to_string(), text);
    }
}

#[test]
fn endianness_prefix() {
    let big = parse(">u32").unwrap();
    assert_eq!(big.as_value().unwrap().endianness, Endianness::Big);
    let little = parse("<u32").unwrap();
    assert_eq!(little.as_value().unwrap().endianness, Endianness::Little);
    // The prefix is only meaningful before a scalar
    assert!(matches!(
        parse(">[i32]"),
        Err(DescriptorError::MisplacedEndianness { .. })
    ));
}

#[test]
fn pointer_tokens() {
    assert!(matches!(parse("p").unwrap(), Layout::Address(_)));

    let typed = parse("p:i32").unwrap();
    let Layout::Address(a) = &typed else {
        panic!("expected an address layout");
    };
    match a.addressee.as_deref() {
        Some(Addressee::Layout(inner)) => assert_eq!(inner, &Layout::int(32)),
        other => panic!("unexpected addressee: {other:?}"),
    }

    // Function pointer
    let fp = parse("p:(i32i32)i32").unwrap();
    let Layout::Address(a) = &fp else {
        panic!("expected an address layout");
    };
    assert!(matches!(
        a.addressee.as_deref(),
        Some(Addressee::Function(_))
    ));
    // The addressee never changes the pointer's own shape
    assert_eq!(fp.byte_size(), 8);
}

#[test]
fn group_tokens() {
    let s = parse("[i32i32f64]").unwrap();
    let g = s.as_group().unwrap();
    assert_eq!(g.kind, GroupKind::Struct);
    assert_eq!(g.elements.len(), 3);
    assert_eq!(s.byte_size(), 16);

    let u = parse("[i64|f64|p]").unwrap();
    let g = u.as_group().unwrap();
    assert_eq!(g.kind, GroupKind::Union);
    assert_eq!(u.byte_size(), 8);

    // Mixing separators within one group is malformed
    assert!(parse("[i32i32|f64]").is_err());

    // Empty struct is a zero-size aggregate
    assert_eq!(parse("[]").unwrap().byte_size(), 0);
}

#[test]
fn sequence_tokens() {
    let a = parse("4f32").unwrap();
    let s = a.as_sequence().unwrap();
    assert_eq!(s.count, 4);
    assert_eq!(a.byte_size(), 16);
    assert_eq!(parse("0i64").unwrap().byte_size(), 0);
    // Digits are greedy: one array of 23 elements, not nested arrays
    assert_eq!(parse("23i16").unwrap().as_sequence().unwrap().count, 23);

    // A suffix after the element token annotates the array itself
    let vec = parse("2f64(vector=1)").unwrap();
    assert!(vec.as_sequence().is_some());
    assert_eq!(vec.annotations().and_then(|a| a.get("vector")), Some("1"));
}

#[test]
fn padding_tokens() {
    let p = parse("x24").unwrap();
    assert!(p.is_padding());
    assert_eq!(p.bit_size(), 24);
    assert_eq!(p.byte_alignment(), 1);
}

#[test]
fn bitfield_suffix_keeps_container_size() {
    let b = parse("i32:5b").unwrap();
    assert_eq!(b.bit_size(), 32);
    assert_eq!(
        b.annotations().and_then(|a| a.get("bitfield")),
        Some("5")
    );
}

#[test]
fn annotation_suffixes() {
    let named = parse("i32(name=count)").unwrap();
    assert_eq!(named.name(), Some("count"));
    assert_eq!(named.byte_size(), 4);

    let accessors = parse("f64(get=get_x)(set=set_x)").unwrap();
    let a = accessors.annotations().unwrap();
    assert_eq!(a.get("get"), Some("get_x"));
    assert_eq!(a.get("set"), Some("set_x"));
}

#[test]
fn signature_tokens() {
    let sig = parse_signature("(i32p)i64").unwrap();
    assert_eq!(sig.argument_layouts().len(), 2);
    assert_eq!(sig.return_layout(), Some(&Layout::int(64)));
    assert!(!sig.is_variadic());

    let var = parse_signature("(p*)v").unwrap();
    assert!(var.is_variadic());
    assert_eq!(var.return_layout(), None);

    // Layouts after the `*` are the variadic actuals of one call
    let printf_like = parse_signature("(p*i32f64)i32").unwrap();
    assert_eq!(printf_like.fixed_argument_count(), 1);
    assert_eq!(printf_like.argument_layouts().len(), 3);
}

#[test]
fn errors_carry_positions() {
    match parse("i") {
        Err(DescriptorError::InvalidNumber { at }) => assert_eq!(at, 1),
        other => panic!("unexpected: {other:?}"),
    }
    match parse("i32zzz") {
        Err(DescriptorError::TrailingInput { at }) => assert_eq!(at, 3),
        other => panic!("unexpected: {other:?}"),
    }
    assert!(parse("[i32").is_err());
    assert!(parse("q").is_err());
}
