//! Value marshalling
//!
//! Copies data between managed [`Value`]s and the register-shadow cells of a
//! [`CallFrame`], driven by the bindings of a built calling sequence.
//! `unbox` moves a value into the frame; `box_value` rebuilds one from it.
//! Size or kind disagreements surface as `LayoutMismatch` and are never
//! silently truncated.

use nacre_layout::{Endianness, Layout, ValueKind};

use crate::arena::CallArena;
use crate::error::{AbiError, AbiResult};
use crate::frame::CallFrame;
use crate::storage::ArgumentBinding;
use crate::value::{Address, Aggregate, Value};

/// Serialize a scalar or address value to its native byte image under the
/// given layout, byte-swapped when the layout's declared byte order differs
/// from the host's.
pub fn scalar_bytes(value: &Value, layout: &Layout) -> AbiResult<Vec<u8>> {
    let bytes = match (value, layout) {
        (Value::Address(a), Layout::Address(_)) => a.raw().to_ne_bytes().to_vec(),
        (value, Layout::Value(v)) => {
            check_scalar_kind(value, v.kind, v.bits)?;
            let native = match value {
                Value::Int8(x) => x.to_ne_bytes().to_vec(),
                Value::Int16(x) => x.to_ne_bytes().to_vec(),
                Value::Int32(x) => x.to_ne_bytes().to_vec(),
                Value::Int64(x) => x.to_ne_bytes().to_vec(),
                Value::UInt8(x) => x.to_ne_bytes().to_vec(),
                Value::UInt16(x) => x.to_ne_bytes().to_vec(),
                Value::UInt32(x) => x.to_ne_bytes().to_vec(),
                Value::UInt64(x) => x.to_ne_bytes().to_vec(),
                Value::Float32(x) => x.to_bits().to_ne_bytes().to_vec(),
                Value::Float64(x) => x.to_bits().to_ne_bytes().to_vec(),
                Value::Address(_) | Value::Aggregate(_) => unreachable!(),
            };
            swap_if_foreign(native, v.endianness)
        }
        _ => {
            return Err(AbiError::mismatch(
                format!("{layout}"),
                value.kind_name().to_string(),
            ))
        }
    };
    Ok(bytes)
}

/// Rebuild a scalar or address value from its native byte image.
pub fn scalar_from_bytes(layout: &Layout, bytes: &[u8]) -> AbiResult<Value> {
    match layout {
        Layout::Address(_) => {
            let raw = u64::from_ne_bytes(sized::<8>(layout, bytes)?);
            Ok(Value::Address(Address::new(raw)))
        }
        Layout::Value(v) => {
            let native = swap_if_foreign(bytes.to_vec(), v.endianness);
            let value = match (v.kind, v.bits) {
                (ValueKind::SignedInt, 8) => Value::Int8(i8::from_ne_bytes(sized(layout, &native)?)),
                (ValueKind::SignedInt, 16) => {
                    Value::Int16(i16::from_ne_bytes(sized(layout, &native)?))
                }
                (ValueKind::SignedInt, 32) => {
                    Value::Int32(i32::from_ne_bytes(sized(layout, &native)?))
                }
                (ValueKind::SignedInt, 64) => {
                    Value::Int64(i64::from_ne_bytes(sized(layout, &native)?))
                }
                (ValueKind::UnsignedInt, 8) => {
                    Value::UInt8(u8::from_ne_bytes(sized(layout, &native)?))
                }
                (ValueKind::UnsignedInt, 16) => {
                    Value::UInt16(u16::from_ne_bytes(sized(layout, &native)?))
                }
                (ValueKind::UnsignedInt, 32) => {
                    Value::UInt32(u32::from_ne_bytes(sized(layout, &native)?))
                }
                (ValueKind::UnsignedInt, 64) => {
                    Value::UInt64(u64::from_ne_bytes(sized(layout, &native)?))
                }
                (ValueKind::Float, 32) => {
                    Value::Float32(f32::from_bits(u32::from_ne_bytes(sized(layout, &native)?)))
                }
                (ValueKind::Float, 64) => {
                    Value::Float64(f64::from_bits(u64::from_ne_bytes(sized(layout, &native)?)))
                }
                _ => {
                    return Err(AbiError::mismatch(
                        "a scalar width with a value representation".to_string(),
                        format!("{layout}"),
                    ))
                }
            };
            Ok(value)
        }
        _ => Err(AbiError::mismatch(
            "a scalar or address layout".to_string(),
            format!("{layout}"),
        )),
    }
}

fn sized<const N: usize>(layout: &Layout, bytes: &[u8]) -> AbiResult<[u8; N]> {
    bytes
        .try_into()
        .map_err(|_| AbiError::mismatch(format!("{N} bytes for {layout}"), format!("{} bytes", bytes.len())))
}

fn swap_if_foreign(mut bytes: Vec<u8>, endianness: Endianness) -> Vec<u8> {
    if endianness != Endianness::host() {
        bytes.reverse();
    }
    bytes
}

fn check_scalar_kind(value: &Value, kind: ValueKind, bits: u32) -> AbiResult<()> {
    let (value_kind, value_bits) = match value {
        Value::Int8(_) => (ValueKind::SignedInt, 8),
        Value::Int16(_) => (ValueKind::SignedInt, 16),
        Value::Int32(_) => (ValueKind::SignedInt, 32),
        Value::Int64(_) => (ValueKind::SignedInt, 64),
        Value::UInt8(_) => (ValueKind::UnsignedInt, 8),
        Value::UInt16(_) => (ValueKind::UnsignedInt, 16),
        Value::UInt32(_) => (ValueKind::UnsignedInt, 32),
        Value::UInt64(_) => (ValueKind::UnsignedInt, 64),
        Value::Float32(_) => (ValueKind::Float, 32),
        Value::Float64(_) => (ValueKind::Float, 64),
        Value::Address(_) | Value::Aggregate(_) => {
            return Err(AbiError::mismatch(
                format!("{kind:?} of {bits} bits"),
                value.kind_name().to_string(),
            ))
        }
    };
    if value_kind != kind || value_bits != bits {
        return Err(AbiError::mismatch(
            format!("{kind:?} of {bits} bits"),
            format!("{value_kind:?} of {value_bits} bits"),
        ));
    }
    Ok(())
}

/// The full native byte image of a value under a layout.
pub fn value_bytes(value: &Value, layout: &Layout) -> AbiResult<Vec<u8>> {
    match value {
        Value::Aggregate(a) => {
            if a.len() as u64 != layout.byte_size() {
                return Err(AbiError::mismatch(
                    format!("{} bytes for {layout}", layout.byte_size()),
                    format!("{} bytes", a.len()),
                ));
            }
            Ok(a.bytes().to_vec())
        }
        _ => scalar_bytes(value, layout),
    }
}

/// Copy a managed value into the frame slots named by its bindings.
///
/// Indirect bindings receive the address of an arena-scoped copy of the
/// value; the arena frees it when the call completes.
pub fn unbox(
    value: &Value,
    layout: &Layout,
    bindings: &[&ArgumentBinding],
    frame: &mut CallFrame,
    arena: &mut CallArena,
) -> AbiResult<()> {
    if bindings.is_empty() {
        // Zero-size value
        return Ok(());
    }
    if bindings.len() == 1 && bindings[0].indirect {
        let bytes = value_bytes(value, layout)?;
        let scratch = arena.alloc_bytes(&bytes, layout.byte_alignment() as usize)?;
        return frame.write_u64(&bindings[0].storage, scratch.as_ptr() as u64);
    }
    let bytes = value_bytes(value, layout)?;
    for binding in bindings {
        let slot = frame.slot_mut(&binding.storage)?;
        let start = binding.offset as usize;
        let end = (start + slot.len()).min(bytes.len());
        if start > end {
            return Err(AbiError::mismatch(
                format!("bindings within {} bytes", bytes.len()),
                format!("binding at offset {start}"),
            ));
        }
        slot[..end - start].copy_from_slice(&bytes[start..end]);
    }
    Ok(())
}

/// Rebuild a managed value from the frame slots named by its bindings.
///
/// An indirect binding holds the address of the value's bytes; reading
/// through it is only sound while that memory is live, which the caller
/// guarantees for the duration of the call.
pub fn box_value(
    layout: &Layout,
    bindings: &[&ArgumentBinding],
    frame: &CallFrame,
) -> AbiResult<Value> {
    let size = layout.byte_size() as usize;
    if bindings.is_empty() {
        return Ok(Value::Aggregate(Aggregate::zeroed(size as u64)));
    }
    let mut bytes = vec![0u8; size];
    if bindings.len() == 1 && bindings[0].indirect {
        let addr = frame.read_u64(&bindings[0].storage)?;
        if addr == 0 {
            return Err(AbiError::Access(
                "indirect binding holds a null address".to_string(),
            ));
        }
        unsafe {
            std::ptr::copy_nonoverlapping(addr as *const u8, bytes.as_mut_ptr(), size);
        }
    } else {
        for binding in bindings {
            let slot = frame.slot(&binding.storage)?;
            let start = binding.offset as usize;
            let end = (start + slot.len()).min(size);
            if start > end {
                return Err(AbiError::mismatch(
                    format!("bindings within {size} bytes"),
                    format!("binding at offset {start}"),
                ));
            }
            bytes[start..end].copy_from_slice(&slot[..end - start]);
        }
    }
    if layout.is_aggregate() || !has_scalar_representation(layout) {
        // 128-bit scalars have no inline variant and travel as raw bytes
        Ok(Value::Aggregate(Aggregate::new(bytes)))
    } else {
        scalar_from_bytes(layout, &bytes)
    }
}

/// Whether a layout maps onto one of the inline scalar `Value` variants.
fn has_scalar_representation(layout: &Layout) -> bool {
    match layout {
        Layout::Address(_) => true,
        Layout::Value(v) => matches!(
            (v.kind, v.bits),
            (ValueKind::SignedInt | ValueKind::UnsignedInt, 8 | 16 | 32 | 64)
                | (ValueKind::Float, 32 | 64)
        ),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::Abi;
    use crate::builder::CallingSequenceBuilder;
    use crate::storage::ArgRef;
    use nacre_layout::parse_signature;

    fn round_trip(descriptor: &str, value: Value) {
        let sig = parse_signature(&format!("({descriptor})v")).unwrap();
        let seq = CallingSequenceBuilder::for_signature(Abi::SysV, &sig)
            .build()
            .unwrap();
        let layout = &seq.argument(0).unwrap().layout.clone();
        let bindings = seq.argument_bindings(ArgRef::Arg(0));
        let mut frame = CallFrame::for_sequence(&seq);
        let mut arena = CallArena::new();
        unbox(&value, layout, &bindings, &mut frame, &mut arena).unwrap();
        let back = box_value(layout, &bindings, &frame).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn test_scalar_round_trips_bit_for_bit() {
        round_trip("i8", Value::Int8(-5));
        round_trip("i16", Value::Int16(-3000));
        round_trip("i32", Value::Int32(i32::MIN));
        round_trip("i64", Value::Int64(i64::MAX));
        round_trip("u8", Value::UInt8(0xff));
        round_trip("u16", Value::UInt16(0xffee));
        round_trip("u32", Value::UInt32(0xdead_beef));
        round_trip("u64", Value::UInt64(u64::MAX));
        round_trip("f32", Value::Float32(f32::MIN_POSITIVE));
        round_trip("f64", Value::Float64(-0.0));
        round_trip("p", Value::Address(Address::new(0x7fff_0000_1234)));
    }

    #[test]
    fn test_register_aggregate_round_trip() {
        let mut agg = Aggregate::zeroed(16);
        agg.bytes_mut().copy_from_slice(&[
            1, 2, 3, 4, 0, 0, 0, 0, // a, b
            0, 0, 0, 0, 0, 0, 0x45, 0x40, // d = 42.0
        ]);
        round_trip("[i32i32f64]", Value::Aggregate(agg));
    }

    #[test]
    fn test_kind_mismatch_is_rejected() {
        let sig = parse_signature("(i32)v").unwrap();
        let seq = CallingSequenceBuilder::for_signature(Abi::SysV, &sig)
            .build()
            .unwrap();
        let layout = seq.argument(0).unwrap().layout.clone();
        let bindings = seq.argument_bindings(ArgRef::Arg(0));
        let mut frame = CallFrame::for_sequence(&seq);
        let mut arena = CallArena::new();
        let err = unbox(
            &Value::Float32(1.0),
            &layout,
            &bindings,
            &mut frame,
            &mut arena,
        );
        assert!(matches!(err, Err(AbiError::LayoutMismatch { .. })));
    }

    #[test]
    fn test_foreign_endianness_is_swapped() {
        let sig = parse_signature("(>u32)v").unwrap();
        let seq = CallingSequenceBuilder::for_signature(Abi::SysV, &sig)
            .build()
            .unwrap();
        let layout = seq.argument(0).unwrap().layout.clone();
        let bindings = seq.argument_bindings(ArgRef::Arg(0));
        let mut frame = CallFrame::for_sequence(&seq);
        let mut arena = CallArena::new();
        unbox(
            &Value::UInt32(0x0102_0304),
            &layout,
            &bindings,
            &mut frame,
            &mut arena,
        )
        .unwrap();
        let slot = frame.slot(&bindings[0].storage).unwrap();
        if cfg!(target_endian = "little") {
            assert_eq!(&slot[..4], &[1, 2, 3, 4]);
        }
        let back = box_value(&layout, &bindings, &frame).unwrap();
        assert_eq!(back, Value::UInt32(0x0102_0304));
    }
}
