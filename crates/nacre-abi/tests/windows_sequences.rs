//! Windows x64 calling-sequence tests

use nacre_abi::{Abi, ArgRef, CallingSequence, CallingSequenceBuilder, StorageClass};
use nacre_layout::parse_signature;

fn sequence(descriptor: &str) -> CallingSequence {
    let sig = parse_signature(descriptor).unwrap();
    CallingSequenceBuilder::for_signature(Abi::Windows, &sig)
        .build()
        .unwrap()
}

#[test]
fn register_sized_aggregate_travels_by_value() {
    let seq = sequence("([f32f32])v");
    let b = seq.argument_bindings(ArgRef::Arg(0));
    assert_eq!(b.len(), 1);
    assert_eq!(b[0].storage.class, StorageClass::IntegerArgument);
    assert_eq!(b[0].storage.index, 0);
    assert!(!b[0].indirect);
}

#[test]
fn odd_sized_aggregate_travels_by_reference() {
    let seq = sequence("([u64u64u64])v");
    let b = seq.argument_bindings(ArgRef::Arg(0));
    assert_eq!(b.len(), 1);
    assert_eq!(b[0].storage.class, StorageClass::IntegerArgument);
    assert!(b[0].indirect);
}

#[test]
fn register_slots_are_shared_by_position() {
    // Slot index is tied to argument position: rcx, xmm1, r8, xmm3
    let seq = sequence("(i32f64i32f64)v");
    let indices: Vec<(StorageClass, u64)> = (0..4u32)
        .map(|i| {
            let b = seq.argument_bindings(ArgRef::Arg(i));
            (b[0].storage.class, b[0].storage.index)
        })
        .collect();
    assert_eq!(
        indices,
        vec![
            (StorageClass::IntegerArgument, 0),
            (StorageClass::VectorArgument, 1),
            (StorageClass::IntegerArgument, 2),
            (StorageClass::VectorArgument, 3),
        ]
    );
}

#[test]
fn fifth_argument_spills() {
    let seq = sequence("(i64i64i64i64i64)v");
    let b = seq.argument_bindings(ArgRef::Arg(4));
    assert_eq!(b[0].storage.class, StorageClass::Stack);
    assert_eq!(b[0].storage.index, 0);
    assert_eq!(
        seq.iter_bindings(StorageClass::IntegerArgument).count(),
        4
    );
}

#[test]
fn variadic_floats_shadow_the_integer_slot() {
    let seq = sequence("(f64f64*)v");
    // Each float occupies its vector slot and duplicates into the matching
    // GPR slot for the vararg callee
    assert_eq!(seq.iter_bindings(StorageClass::VectorArgument).count(), 2);
    let shadows: Vec<_> = seq
        .iter_bindings(StorageClass::IntegerArgument)
        .collect();
    assert_eq!(shadows.len(), 2);
    assert_eq!(shadows[0].storage.index, 0);
    assert_eq!(shadows[1].storage.index, 1);
    assert_eq!(shadows[0].argument, ArgRef::Arg(0));
}

#[test]
fn non_variadic_floats_do_not_shadow() {
    let seq = sequence("(f64f64)v");
    assert_eq!(seq.iter_bindings(StorageClass::IntegerArgument).count(), 0);
}

#[test]
fn large_return_uses_hidden_pointer() {
    let seq = sequence("(i32)[u64u64u64]");
    assert!(seq.returns_in_memory());
    let hidden = seq.hidden_return_binding().unwrap();
    assert_eq!(hidden.storage.index, 0);
    assert!(hidden.indirect);
    // The declared argument shifts to the second shared slot
    let arg0 = seq.argument_bindings(ArgRef::Arg(0));
    assert_eq!(arg0[0].storage.index, 1);
}

#[test]
fn extended_float_is_rejected() {
    let sig = parse_signature("(f128)v").unwrap();
    assert!(CallingSequenceBuilder::for_signature(Abi::Windows, &sig)
        .build()
        .is_err());
}
