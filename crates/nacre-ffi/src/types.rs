//! Layout to libffi type-descriptor conversion
//!
//! libffi describes types as trees of `ffi_type` nodes; the middle layer's
//! `Type` owns such a tree. Scalars map to the fixed tags, structs to member
//! arrays, sequences to repeated members. libffi has no union representation,
//! so unions are rejected on this path.

use libffi::middle::Type;
use libffi::raw;

use nacre_abi::{AbiError, AbiResult};
use nacre_layout::{AccessorTable, GroupKind, Layout, ValueKind};

/// Build the libffi type tree for a layout.
pub fn ffi_type_for(layout: &Layout) -> AbiResult<Type> {
    match layout {
        Layout::Value(v) => match (v.kind, v.bits) {
            (ValueKind::SignedInt, 8) => Ok(Type::i8()),
            (ValueKind::SignedInt, 16) => Ok(Type::i16()),
            (ValueKind::SignedInt, 32) => Ok(Type::i32()),
            (ValueKind::SignedInt, 64) => Ok(Type::i64()),
            (ValueKind::UnsignedInt, 8) => Ok(Type::u8()),
            (ValueKind::UnsignedInt, 16) => Ok(Type::u16()),
            (ValueKind::UnsignedInt, 32) => Ok(Type::u32()),
            (ValueKind::UnsignedInt, 64) => Ok(Type::u64()),
            (ValueKind::Float, 32) => Ok(Type::f32()),
            (ValueKind::Float, 64) => Ok(Type::f64()),
            (ValueKind::Float, _) => Err(AbiError::unsupported(
                layout,
                "extended floats have no libffi representation",
            )),
            _ => Err(AbiError::unsupported(
                layout,
                "scalar width has no libffi tag",
            )),
        },
        Layout::Address(_) => Ok(Type::pointer()),
        Layout::Group(g) => match g.kind {
            GroupKind::Struct => {
                let mut members = Vec::with_capacity(g.elements.len());
                for element in g.elements.iter() {
                    members.push(member_type(element)?);
                }
                Ok(Type::structure(members))
            }
            GroupKind::Union => Err(AbiError::unsupported(
                layout,
                "unions are not supported on the fallback path",
            )),
        },
        Layout::Sequence(s) => {
            // libffi has no array node; a struct of repeated members has the
            // same size and alignment
            let element = ffi_type_for(&s.element)?;
            Ok(Type::structure(
                std::iter::repeat_with(|| element.clone()).take(s.count as usize),
            ))
        }
        Layout::Padding(_) => Err(AbiError::unsupported(
            layout,
            "padding cannot appear in argument or return position",
        )),
    }
}

/// A struct member, where padding becomes an alignment-1 byte fill.
fn member_type(element: &Layout) -> AbiResult<Type> {
    if let Layout::Padding(p) = element {
        let bytes = p.bits.div_ceil(8) as usize;
        return Ok(Type::structure(
            std::iter::repeat_with(Type::u8).take(bytes),
        ));
    }
    ffi_type_for(element)
}

/// The libffi return type for an optional return layout (`void` when absent).
pub fn return_type_for(layout: Option<&Layout>) -> AbiResult<Type> {
    match layout {
        Some(layout) => ffi_type_for(layout),
        None => Ok(Type::void()),
    }
}

/// Cross-check libffi's computed member offsets for a struct layout against
/// the layout model's own accessor table. Disagreement means the two sides
/// would marshal the same struct differently, which must fail loudly.
pub fn verify_struct_offsets(layout: &Layout) -> AbiResult<()> {
    let group = layout
        .as_group()
        .filter(|g| g.kind == GroupKind::Struct)
        .ok_or_else(|| AbiError::unsupported(layout, "offset verification needs a struct"))?;

    let ty = ffi_type_for(layout)?;
    let mut offsets = vec![0usize; group.elements.len()];
    let status = unsafe {
        raw::ffi_get_struct_offsets(
            raw::ffi_abi_FFI_DEFAULT_ABI,
            ty.as_raw_ptr(),
            offsets.as_mut_ptr(),
        )
    };
    if status != raw::ffi_status_FFI_OK {
        return Err(AbiError::NativeCallSetup(format!(
            "ffi_get_struct_offsets returned status {status}"
        )));
    }

    let table = AccessorTable::for_group(group);
    let mut accessors = table.entries().iter();
    for (element, ffi_offset) in group.elements.iter().zip(offsets) {
        if element.is_padding() {
            continue;
        }
        let accessor = accessors.next().ok_or_else(|| {
            AbiError::mismatch(
                format!("an accessor per non-padding member of {layout}"),
                "fewer accessors than members".to_string(),
            )
        })?;
        if accessor.byte_offset != ffi_offset as u64 {
            return Err(AbiError::mismatch(
                format!("member offset {} for {}", accessor.byte_offset, element),
                format!("libffi offset {ffi_offset}"),
            ));
        }
    }
    Ok(())
}
