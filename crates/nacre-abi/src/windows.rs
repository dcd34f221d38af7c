//! Windows x64 classifier
//!
//! Much simpler than SysV and non-recursive: the first four arguments go in
//! four shared register slots (rcx/rdx/r8/r9 or xmm0-xmm3, slot index tied
//! to argument position). Aggregates whose size is exactly 1, 2, 4, or 8
//! bytes travel by value in an integer slot; every other aggregate is copied
//! to a temporary and passed by reference. Returns of such aggregates go
//! through a hidden caller-allocated buffer.

use crate::class::{ArgumentClass, Classification};
use crate::error::{AbiError, AbiResult};
use nacre_layout::{Layout, ValueKind};

/// Shared argument register slots: rcx/xmm0, rdx/xmm1, r8/xmm2, r9/xmm3
pub const ARGUMENT_REGISTERS: usize = 4;
/// Integer return register: rax
pub const INTEGER_RETURN_REGISTERS: usize = 1;
/// Vector return register: xmm0
pub const VECTOR_RETURN_REGISTERS: usize = 1;

/// Sizes at which an aggregate is passed as if it were an integer
fn is_register_aggregate(size: u64) -> bool {
    matches!(size, 1 | 2 | 4 | 8)
}

/// Classify a layout for argument or return position.
pub fn classify(layout: &Layout, return_position: bool) -> AbiResult<Classification> {
    match layout {
        Layout::Value(v) => {
            if v.kind == ValueKind::Float && v.bits > 64 {
                return Err(AbiError::unsupported(
                    layout,
                    "extended floats are not supported on Windows x64",
                ));
            }
            if v.bits as u64 > 64 {
                // 128-bit integers travel like a 16-byte aggregate
                return Ok(aggregate_classification(layout, return_position));
            }
            let class = if v.kind == ValueKind::Float {
                ArgumentClass::Sse
            } else {
                ArgumentClass::Integer
            };
            Ok(Classification::registers(vec![class]))
        }
        Layout::Address(_) => Ok(Classification::registers(vec![ArgumentClass::Integer])),
        Layout::Group(_) | Layout::Sequence(_) => {
            Ok(aggregate_classification(layout, return_position))
        }
        Layout::Padding(_) => Err(AbiError::unsupported(
            layout,
            "padding cannot appear in argument or return position",
        )),
    }
}

fn aggregate_classification(layout: &Layout, return_position: bool) -> Classification {
    let size = layout.byte_size();
    if size == 0 {
        return Classification::registers(Vec::new());
    }
    if is_register_aggregate(size) {
        // Packed into one GPR by value, even when it holds floats
        return Classification::registers(vec![ArgumentClass::Integer]);
    }
    if return_position {
        // Hidden caller-allocated return buffer
        Classification::memory(size.div_ceil(8) as usize)
    } else {
        // Caller copies to a temporary and passes its address
        Classification::reference()
    }
}
