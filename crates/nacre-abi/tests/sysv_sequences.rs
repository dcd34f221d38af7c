//! System V x86-64 calling-sequence tests, including the worked examples
//! from the AMD64 ABI supplement.

use nacre_abi::{
    Abi, ArgRef, CallingSequence, CallingSequenceBuilder, StorageClass,
};
use nacre_layout::parse_signature;

fn sequence(descriptor: &str) -> CallingSequence {
    let sig = parse_signature(descriptor).unwrap();
    CallingSequenceBuilder::for_signature(Abi::SysV, &sig)
        .build()
        .unwrap()
}

fn count(seq: &CallingSequence, class: StorageClass) -> usize {
    seq.iter_bindings(class).count()
}

#[test]
fn eight_int64_arguments_split_six_and_two() {
    let seq = sequence("(i64i64i64i64i64i64i64i64)v");

    assert_eq!(count(&seq, StorageClass::IntegerArgument), 6);
    assert_eq!(count(&seq, StorageClass::Stack), 2);
    assert!(!seq.returns_in_memory());

    // Args 0-5 in registers 0-5, args 6-7 at stack offsets 0 and 8
    for i in 0..6u32 {
        let b = seq.argument_bindings(ArgRef::Arg(i));
        assert_eq!(b.len(), 1);
        assert_eq!(b[0].storage.class, StorageClass::IntegerArgument);
        assert_eq!(b[0].storage.index, i as u64);
    }
    let six = seq.argument_bindings(ArgRef::Arg(6));
    let seven = seq.argument_bindings(ArgRef::Arg(7));
    assert_eq!(six[0].storage.index, 0);
    assert_eq!(seven[0].storage.index, 8);
    assert_eq!(seq.stack_bytes(), 16);
}

#[test]
fn amd64_abi_worked_example() {
    // m(int32 e, int32 f, struct{int32 a; int32 b; double d} s, int32 g,
    //   int32 h, long double ld, double m, double n, int32 i, int32 j,
    //   int32 k)
    let seq = sequence("(i32i32[i32i32f64]i32i32f128f64f64i32i32i32)v");

    // e, f, s.{a,b}, g, h, i in integer registers
    assert_eq!(count(&seq, StorageClass::IntegerArgument), 6);
    // s.d, m, n in vector registers
    assert_eq!(count(&seq, StorageClass::VectorArgument), 3);
    // ld spans two stack words; j and k spill after it
    assert_eq!(count(&seq, StorageClass::Stack), 4);

    // The struct owns one binding in each register file
    let s = seq.argument_bindings(ArgRef::Arg(2));
    assert_eq!(s.len(), 2);
    assert_eq!(s[0].storage.class, StorageClass::IntegerArgument);
    assert_eq!(s[0].offset, 0);
    assert_eq!(s[1].storage.class, StorageClass::VectorArgument);
    assert_eq!(s[1].offset, 8);

    // i lands in the last integer register, after g and h
    let arg_i = seq.argument_bindings(ArgRef::Arg(8));
    assert_eq!(arg_i[0].storage.index, 5);

    // ld occupies two stack words at 0 and 8
    let ld = seq.argument_bindings(ArgRef::Arg(5));
    assert_eq!(ld.len(), 2);
    assert_eq!((ld[0].storage.index, ld[1].storage.index), (0, 8));
    assert_eq!((ld[0].offset, ld[1].offset), (0, 8));
}

#[test]
fn three_uint64_struct_goes_to_the_stack() {
    let seq = sequence("([u64u64u64])v");

    assert_eq!(count(&seq, StorageClass::IntegerArgument), 0);
    assert_eq!(count(&seq, StorageClass::VectorArgument), 0);
    let b = seq.argument_bindings(ArgRef::Arg(0));
    assert_eq!(b.len(), 3);
    let offsets: Vec<u64> = b.iter().map(|x| x.storage.index).collect();
    assert_eq!(offsets, vec![0, 8, 16]);
}

#[test]
fn memory_classed_return_takes_a_hidden_pointer() {
    let seq = sequence("(i32)[u64u64u64]");

    assert!(seq.returns_in_memory());
    let hidden = seq.hidden_return_binding().unwrap();
    assert_eq!(hidden.storage.class, StorageClass::IntegerArgument);
    assert_eq!(hidden.storage.index, 0);
    assert!(hidden.indirect);
    assert_eq!(hidden.argument, ArgRef::Return);

    // The declared argument shifts to the second integer register
    let arg0 = seq.argument_bindings(ArgRef::Arg(0));
    assert_eq!(arg0[0].storage.index, 1);

    // The callee echoes the pointer back in the return register
    let ret = seq
        .bindings(StorageClass::IntegerReturn)
        .iter()
        .flatten()
        .next()
        .unwrap();
    assert!(ret.indirect);
}

#[test]
fn register_budgets_are_never_exceeded() {
    let signatures = [
        "(i64i64i64i64i64i64i64i64i64i64)v",
        "(f64f64f64f64f64f64f64f64f64f64)v",
        "([i32i32f64][i32i32f64][i32i32f64][i32i32f64][i32i32f64])v",
        "(i32f32i32f32i32f32i32f32i32f32i32f32i32f32)v",
    ];
    for descriptor in signatures {
        let seq = sequence(descriptor);
        assert!(count(&seq, StorageClass::IntegerArgument) <= 6, "{descriptor}");
        assert!(count(&seq, StorageClass::VectorArgument) <= 8, "{descriptor}");
    }
}

#[test]
fn stack_offsets_are_monotonic_and_aligned() {
    let seq = sequence("(i64i64i64i64i64i64f128[u64u64u64]i64i32)v");
    let mut last = 0u64;
    for b in seq.iter_bindings(StorageClass::Stack) {
        assert_eq!(b.storage.index % 8, 0);
        assert!(b.storage.index >= last);
        last = b.storage.index;
    }
}

#[test]
fn partial_register_fit_spills_the_whole_argument() {
    // Five integer registers used; the two-eightbyte struct needs two and
    // only one is free, so it spills entirely
    let seq = sequence("(i64i64i64i64i64[i64i64])v");
    let s = seq.argument_bindings(ArgRef::Arg(5));
    assert_eq!(s.len(), 2);
    assert!(s.iter().all(|b| b.storage.class == StorageClass::Stack));
    assert_eq!(count(&seq, StorageClass::IntegerArgument), 5);
}

#[test]
fn classification_failure_leaves_no_partial_sequence() {
    let sig = parse_signature("(p9u64(vector=1))v").unwrap();
    assert!(CallingSequenceBuilder::for_signature(Abi::SysV, &sig)
        .build()
        .is_err());
    // A later build of a well-formed signature is unaffected
    let seq = sequence("(i64)i64");
    assert_eq!(count(&seq, StorageClass::IntegerArgument), 1);
}

#[test]
fn building_twice_yields_identical_sequences() {
    let a = sequence("(i32i32[i32i32f64]i32i32f128f64f64i32i32i32)v");
    let b = sequence("(i32i32[i32i32f64]i32i32f128f64f64i32i32i32)v");
    for class in StorageClass::ALL {
        assert_eq!(a.bindings(class), b.bindings(class));
    }
    assert_eq!(a.stack_bytes(), b.stack_bytes());
}
