//! Native entry points for managed callbacks
//!
//! An `UpcallStub` owns a libffi closure: executable memory that, when called
//! with the stub's signature, lands in a trampoline that boxes the raw native
//! arguments into `Value`s, invokes the managed target, and writes the result
//! into the native return slot. The closure is freed when the stub drops.

use std::ffi::c_void;
use std::ptr;

use libffi::raw;

use nacre_abi::{scalar_bytes, AbiError, AbiResult, Aggregate, UpcallTarget, Value};
use nacre_layout::{FunctionSignature, Layout};

use crate::bridge::{boxed_result, check_status, Cif};

struct UpcallContext {
    signature: FunctionSignature,
    target: UpcallTarget,
}

/// An owned native entry point dispatching to a managed callback.
pub struct UpcallStub {
    closure: *mut raw::ffi_closure,
    code: *mut c_void,
    // Referenced by the prepared closure for as long as it is callable
    _cif: Box<Cif>,
    _context: Box<UpcallContext>,
}

unsafe impl Send for UpcallStub {}
unsafe impl Sync for UpcallStub {}

impl UpcallStub {
    /// Allocate and prepare a native entry point for `target`.
    pub fn new(signature: &FunctionSignature, target: UpcallTarget) -> AbiResult<Self> {
        let cif = Box::new(Cif::prepare(signature)?);
        let context = Box::new(UpcallContext {
            signature: signature.clone(),
            target,
        });

        let mut code: *mut c_void = ptr::null_mut();
        let closure = unsafe {
            raw::ffi_closure_alloc(std::mem::size_of::<raw::ffi_closure>(), &mut code)
        } as *mut raw::ffi_closure;
        if closure.is_null() {
            return Err(AbiError::NativeCallSetup(
                "ffi_closure_alloc returned null".to_string(),
            ));
        }

        let status = unsafe {
            raw::ffi_prep_closure_loc(
                closure,
                cif.as_raw_ptr(),
                Some(upcall_trampoline),
                &*context as *const UpcallContext as *mut c_void,
                code,
            )
        };
        if let Err(e) = check_status(status, "ffi_prep_closure_loc") {
            unsafe { raw::ffi_closure_free(closure.cast()) };
            return Err(e);
        }

        Ok(Self {
            closure,
            code,
            _cif: cif,
            _context: context,
        })
    }

    /// The callable native entry point. Valid while the stub is alive.
    pub fn code(&self) -> *const c_void {
        self.code
    }
}

impl Drop for UpcallStub {
    fn drop(&mut self) {
        unsafe { raw::ffi_closure_free(self.closure.cast()) };
    }
}

unsafe extern "C" fn upcall_trampoline(
    _cif: *mut raw::ffi_cif,
    result: *mut c_void,
    args: *mut *mut c_void,
    userdata: *mut c_void,
) {
    let context = &*(userdata as *const UpcallContext);
    match dispatch(context, result, args) {
        Ok(()) => {}
        Err(_) => {
            // No error channel crosses the native boundary; hand back a
            // zeroed return slot instead of unwinding into C
            if let Some(ret) = context.signature.return_layout() {
                let size = (ret.byte_size() as usize).max(8);
                ptr::write_bytes(result as *mut u8, 0, size);
            }
        }
    }
}

unsafe fn dispatch(
    context: &UpcallContext,
    result: *mut c_void,
    args: *mut *mut c_void,
) -> AbiResult<()> {
    let layouts = context.signature.argument_layouts();
    let mut values = Vec::with_capacity(layouts.len());
    for (i, layout) in layouts.iter().enumerate() {
        let src = *args.add(i) as *const u8;
        let size = layout.byte_size() as usize;
        let mut bytes = vec![0u8; size];
        ptr::copy_nonoverlapping(src, bytes.as_mut_ptr(), size);
        values.push(boxed_result(layout, bytes)?);
    }

    let returned = (context.target)(&values)?;

    match (context.signature.return_layout(), returned) {
        (None, _) => Ok(()),
        (Some(layout), Some(value)) => {
            write_return(layout, &value, result as *mut u8)?;
            Ok(())
        }
        (Some(layout), None) => Err(AbiError::mismatch(
            format!("a {layout} return value"),
            "no value".to_string(),
        )),
    }
}

/// Write a managed return value into libffi's return slot. Integers narrower
/// than a machine word are widened to one, per the closure return contract.
unsafe fn write_return(layout: &Layout, value: &Value, slot: *mut u8) -> AbiResult<()> {
    if let Value::Aggregate(a) = value {
        if a.len() as u64 != layout.byte_size() {
            return Err(AbiError::mismatch(
                format!("{} bytes for {layout}", layout.byte_size()),
                format!("{} bytes", a.len()),
            ));
        }
        ptr::copy_nonoverlapping(a.bytes().as_ptr(), slot, a.len());
        return Ok(());
    }

    let widened = match value {
        Value::Int8(x) => Some(*x as i64 as u64),
        Value::Int16(x) => Some(*x as i64 as u64),
        Value::Int32(x) => Some(*x as i64 as u64),
        Value::UInt8(x) => Some(*x as u64),
        Value::UInt16(x) => Some(*x as u64),
        Value::UInt32(x) => Some(*x as u64),
        _ => None,
    };
    match widened {
        Some(word) => {
            // Kind agreement is still enforced against the layout
            scalar_bytes(value, layout)?;
            let bytes = word.to_ne_bytes();
            ptr::copy_nonoverlapping(bytes.as_ptr(), slot, bytes.len());
        }
        None => {
            let bytes = scalar_bytes(value, layout)?;
            ptr::copy_nonoverlapping(bytes.as_ptr(), slot, bytes.len());
        }
    }
    Ok(())
}
