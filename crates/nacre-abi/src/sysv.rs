//! System V x86-64 classifier
//!
//! Pure, deterministic mapping from a layout to one `ArgumentClass` per
//! eightbyte. Aggregates are classified by walking members in declaration
//! order, aligning the running offset to each member's natural alignment and
//! merging the member's classes into the overlapping eightbyte slots, then
//! applying the post-classification fixups.

use crate::class::{check_vector_width, ArgumentClass, Classification};
use crate::error::{AbiError, AbiResult};
use nacre_layout::{GroupKind, Layout, ValueKind};

/// Integer argument registers: rdi, rsi, rdx, rcx, r8, r9
pub const INTEGER_ARGUMENT_REGISTERS: usize = 6;
/// Vector argument registers: xmm0-xmm7
pub const VECTOR_ARGUMENT_REGISTERS: usize = 8;
/// Integer return registers: rax, rdx
pub const INTEGER_RETURN_REGISTERS: usize = 2;
/// Vector return registers: xmm0, xmm1
pub const VECTOR_RETURN_REGISTERS: usize = 2;
/// x87 return registers: st0, st1
pub const X87_RETURN_REGISTERS: usize = 2;

/// Aggregates wider than this many eightbytes are always memory-classed
const MAX_AGGREGATE_EIGHTBYTES: u64 = 8;

/// Classify a layout for argument or return position.
///
/// x87 classes are only representable in return position; an extended float
/// argument is silently forced to memory instead.
pub fn classify(layout: &Layout, return_position: bool) -> AbiResult<Classification> {
    let classes = classify_layout(layout)?;
    let mut in_memory = classes.contains(&ArgumentClass::Memory);
    if !return_position
        && classes
            .iter()
            .any(|c| matches!(c, ArgumentClass::X87 | ArgumentClass::X87Up))
    {
        in_memory = true;
    }
    Ok(Classification {
        classes,
        in_memory,
        by_reference: false,
    })
}

fn classify_layout(layout: &Layout) -> AbiResult<Vec<ArgumentClass>> {
    match layout {
        Layout::Value(v) => Ok(scalar_classes(v.kind, v.bits as u64)),
        Layout::Address(_) => Ok(vec![ArgumentClass::Integer]),
        Layout::Group(g) if is_long_double_complex(layout) => {
            debug_assert_eq!(g.elements.len(), 2);
            Ok(vec![
                ArgumentClass::X87,
                ArgumentClass::X87Up,
                ArgumentClass::X87,
                ArgumentClass::X87Up,
            ])
        }
        Layout::Group(_) | Layout::Sequence(_) => classify_aggregate(layout),
        Layout::Padding(_) => Err(AbiError::unsupported(
            layout,
            "padding cannot appear in argument or return position",
        )),
    }
}

fn scalar_classes(kind: ValueKind, bits: u64) -> Vec<ArgumentClass> {
    match kind {
        ValueKind::Float if bits <= 64 => vec![ArgumentClass::Sse],
        // long double: one 80/128-bit x87 value spanning two eightbytes
        ValueKind::Float => vec![ArgumentClass::X87, ArgumentClass::X87Up],
        _ => vec![ArgumentClass::Integer; bits.div_ceil(64) as usize],
    }
}

/// The distinguished complex-long-double aggregate: a struct of exactly two
/// floats wider than 64 bits. Hard-coded to st0/st1 pairs.
fn is_long_double_complex(layout: &Layout) -> bool {
    let Some(g) = layout.as_group() else {
        return false;
    };
    g.kind == GroupKind::Struct
        && g.elements.len() == 2
        && g.elements.iter().all(|e| {
            e.as_value()
                .is_some_and(|v| v.kind == ValueKind::Float && v.bits > 64)
        })
}

fn classify_aggregate(layout: &Layout) -> AbiResult<Vec<ArgumentClass>> {
    let size = layout.byte_size();
    if size == 0 {
        // Zero-size aggregate: consumes no register or stack space
        return Ok(Vec::new());
    }
    let words = size.div_ceil(8) as usize;

    if is_vector(layout) {
        check_vector_width(layout, words)?;
        let mut classes = vec![ArgumentClass::SseUp; words];
        classes[0] = ArgumentClass::Sse;
        return Ok(classes);
    }

    if size > MAX_AGGREGATE_EIGHTBYTES * 8 {
        return Ok(vec![ArgumentClass::Memory; words]);
    }

    let mut slots = vec![ArgumentClass::NoClass; words];
    merge_members(layout, 0, &mut slots)?;

    // Post-classification fixups
    if slots.contains(&ArgumentClass::Memory) {
        return Ok(vec![ArgumentClass::Memory; words]);
    }
    for i in 0..slots.len() {
        let orphan = slots[i] == ArgumentClass::X87Up
            && (i == 0 || slots[i - 1] != ArgumentClass::X87);
        if orphan {
            return Ok(vec![ArgumentClass::Memory; words]);
        }
    }
    if slots.len() > 2 {
        let sse_chain = slots[0] == ArgumentClass::Sse
            && slots[1..].iter().all(|c| *c == ArgumentClass::SseUp);
        let x87_chain = slots
            .chunks(2)
            .all(|c| c == [ArgumentClass::X87, ArgumentClass::X87Up]);
        if !sse_chain && !x87_chain {
            return Ok(vec![ArgumentClass::Memory; words]);
        }
    }
    Ok(slots)
}

/// A layout explicitly marked as a hardware vector (`__m128`/`__m256`/...)
fn is_vector(layout: &Layout) -> bool {
    layout
        .annotations()
        .is_some_and(|a| a.get("vector").is_some())
}

/// Merge the classes of every member of an aggregate into `slots`.
///
/// `base` is the aggregate's byte offset within the outermost value. Padding
/// advances the offset without classifying; zero-size members are skipped.
fn merge_members(layout: &Layout, base: u64, slots: &mut [ArgumentClass]) -> AbiResult<()> {
    match layout {
        Layout::Group(g) => match g.kind {
            GroupKind::Struct => {
                let mut offset = base;
                for member in g.elements.iter() {
                    if let Layout::Padding(_) = member {
                        offset += member.byte_size();
                        continue;
                    }
                    if member.bit_size() == 0 {
                        continue;
                    }
                    offset = offset.next_multiple_of(member.byte_alignment());
                    merge_one(member, offset, slots)?;
                    offset += member.byte_size();
                }
                Ok(())
            }
            GroupKind::Union => {
                for member in g.elements.iter() {
                    if member.is_padding() || member.bit_size() == 0 {
                        continue;
                    }
                    merge_one(member, base, slots)?;
                }
                Ok(())
            }
        },
        Layout::Sequence(s) => {
            let element_size = s.element.byte_size();
            let mut offset = base;
            for _ in 0..s.count {
                merge_one(&s.element, offset, slots)?;
                offset += element_size;
            }
            Ok(())
        }
        _ => unreachable!("merge_members is only called on aggregates"),
    }
}

fn merge_one(member: &Layout, offset: u64, slots: &mut [ArgumentClass]) -> AbiResult<()> {
    if member.is_aggregate() {
        return merge_members(member, offset, slots);
    }
    let classes = classify_layout(member)?;
    for (k, class) in classes.iter().enumerate() {
        let slot = ((offset + k as u64 * 8) / 8) as usize;
        if let Some(s) = slots.get_mut(slot) {
            *s = s.merge(*class);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nacre_layout::parse;

    fn classes(descriptor: &str) -> Vec<ArgumentClass> {
        classify(&parse(descriptor).unwrap(), false).unwrap().classes
    }

    #[test]
    fn test_scalars() {
        use ArgumentClass::*;
        assert_eq!(classes("i32"), vec![Integer]);
        assert_eq!(classes("u64"), vec![Integer]);
        assert_eq!(classes("i128"), vec![Integer, Integer]);
        assert_eq!(classes("f32"), vec![Sse]);
        assert_eq!(classes("f64"), vec![Sse]);
        assert_eq!(classes("p"), vec![Integer]);
    }

    #[test]
    fn test_long_double_is_x87_pair() {
        assert_eq!(
            classes("f128"),
            vec![ArgumentClass::X87, ArgumentClass::X87Up]
        );
        // ...but is memory-forced in argument position
        let c = classify(&parse("f128").unwrap(), false).unwrap();
        assert!(c.in_memory);
        let r = classify(&parse("f128").unwrap(), true).unwrap();
        assert!(!r.in_memory);
    }

    #[test]
    fn test_long_double_complex_is_hard_coded() {
        use ArgumentClass::*;
        assert_eq!(classes("[f128f128]"), vec![X87, X87Up, X87, X87Up]);
    }

    #[test]
    fn test_small_mixed_struct() {
        use ArgumentClass::*;
        // struct { int32 a; int32 b; double d; }: a and b share an integer
        // eightbyte, d gets an SSE eightbyte
        assert_eq!(classes("[i32i32f64]"), vec![Integer, Sse]);
    }

    #[test]
    fn test_all_float_struct_is_sse() {
        use ArgumentClass::*;
        assert_eq!(classes("[f32f32f64]"), vec![Sse, Sse]);
    }

    #[test]
    fn test_integer_dominates_in_union() {
        use ArgumentClass::*;
        assert_eq!(classes("[i64|f64]"), vec![Integer]);
    }

    #[test]
    fn test_three_eightbyte_struct_is_memory() {
        use ArgumentClass::*;
        assert_eq!(classes("[u64u64u64]"), vec![Memory, Memory, Memory]);
    }

    #[test]
    fn test_oversized_aggregate_is_memory() {
        let c = classes("[u64u64u64u64u64u64u64u64u64]");
        assert_eq!(c.len(), 9);
        assert!(c.iter().all(|x| *x == ArgumentClass::Memory));
    }

    #[test]
    fn test_padding_advances_offset() {
        use ArgumentClass::*;
        // char at 0, padding to 8, double at 8
        assert_eq!(classes("[i8x56f64]"), vec![Integer, Sse]);
    }

    #[test]
    fn test_zero_size_members_are_skipped() {
        use ArgumentClass::*;
        assert_eq!(classes("[0i64f64f64]"), vec![Sse, Sse]);
        assert_eq!(classes("[]"), Vec::<ArgumentClass>::new());
    }

    #[test]
    fn test_nested_aggregates() {
        use ArgumentClass::*;
        // struct { struct { int32; int32 } inner; double d; }
        assert_eq!(classes("[[i32i32]f64]"), vec![Integer, Sse]);
        // array of 2 floats packs into one eightbyte
        assert_eq!(classes("[2f32f64]"), vec![Sse, Sse]);
    }

    #[test]
    fn test_vector_annotation() {
        use ArgumentClass::*;
        let v256 = parse("4f64(vector=1)").unwrap();
        assert_eq!(
            classify(&v256, false).unwrap().classes,
            vec![Sse, SseUp, SseUp, SseUp]
        );
    }

    #[test]
    fn test_oversized_vector_is_unsupported() {
        let v = parse("9u64(vector=1)").unwrap();
        assert!(matches!(
            classify(&v, false),
            Err(AbiError::UnsupportedLayout { .. })
        ));
    }

    #[test]
    fn test_classification_is_deterministic() {
        let l = parse("[i32i32f64]").unwrap();
        assert_eq!(classify(&l, false).unwrap(), classify(&l, false).unwrap());
    }
}
