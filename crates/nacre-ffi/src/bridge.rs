//! The fallback downcall path
//!
//! Prepares a libffi call interface (`cif`) once per signature, then performs
//! each call by writing arguments into call-scoped scratch slots and handing
//! the slot pointers to `ffi_call`. Everything a call allocates lives in one
//! `CallArena` and is released when the call returns, error paths included.

use std::ffi::c_void;
use std::ptr;

use libffi::middle::{CodePtr, Type};
use libffi::raw;

use nacre_abi::{
    scalar_from_bytes, value_bytes, AbiError, AbiResult, Aggregate, CallArena, RegionGuard, Value,
};
use nacre_layout::{FunctionSignature, Layout};

use crate::state::{clear_errno, read_errno, CapturedCallState};
use crate::types::{ffi_type_for, return_type_for};

/// libffi wants integer return slots at least one machine word wide
const MIN_RETURN_SLOT: usize = 8;

/// A prepared libffi call interface. Read-only after preparation, shareable
/// across threads.
pub struct Cif {
    raw: Box<raw::ffi_cif>,
    // The cif holds raw pointers into these; they must live as long as it
    _arg_types: Box<[Type]>,
    arg_ptrs: Box<[*mut raw::ffi_type]>,
    _ret_type: Type,
}

unsafe impl Send for Cif {}
unsafe impl Sync for Cif {}

impl Cif {
    /// Prepare a call interface for a signature.
    pub fn prepare(signature: &FunctionSignature) -> AbiResult<Self> {
        let arg_types: Box<[Type]> = signature
            .argument_layouts()
            .iter()
            .map(ffi_type_for)
            .collect::<AbiResult<Vec<_>>>()?
            .into_boxed_slice();
        let ret_type = return_type_for(signature.return_layout())?;
        let mut arg_ptrs: Box<[*mut raw::ffi_type]> =
            arg_types.iter().map(|t| t.as_raw_ptr()).collect();

        let mut cif: Box<raw::ffi_cif> = Box::default();
        let nargs = arg_ptrs.len() as u32;
        let status = unsafe {
            if signature.is_variadic() {
                // nfixed < ntotal when the signature carries variadic
                // actuals; some ABIs (Apple aarch64) pass the two groups
                // differently, so the split must reach libffi intact.
                raw::ffi_prep_cif_var(
                    cif.as_mut(),
                    raw::ffi_abi_FFI_DEFAULT_ABI,
                    signature.fixed_argument_count() as u32,
                    nargs,
                    ret_type.as_raw_ptr(),
                    arg_ptrs.as_mut_ptr(),
                )
            } else {
                raw::ffi_prep_cif(
                    cif.as_mut(),
                    raw::ffi_abi_FFI_DEFAULT_ABI,
                    nargs,
                    ret_type.as_raw_ptr(),
                    arg_ptrs.as_mut_ptr(),
                )
            }
        };
        check_status(status, "ffi_prep_cif")?;
        Ok(Self {
            raw: cif,
            _arg_types: arg_types,
            arg_ptrs,
            _ret_type: ret_type,
        })
    }

    pub(crate) fn as_raw_ptr(&self) -> *mut raw::ffi_cif {
        self.raw.as_ref() as *const raw::ffi_cif as *mut raw::ffi_cif
    }

    pub(crate) fn argument_count(&self) -> usize {
        self.arg_ptrs.len()
    }
}

pub(crate) fn check_status(status: raw::ffi_status, what: &str) -> AbiResult<()> {
    if status == raw::ffi_status_FFI_OK {
        return Ok(());
    }
    let name = match status {
        raw::ffi_status_FFI_BAD_TYPEDEF => "FFI_BAD_TYPEDEF",
        raw::ffi_status_FFI_BAD_ABI => "FFI_BAD_ABI",
        _ => "unknown status",
    };
    Err(AbiError::NativeCallSetup(format!("{what} failed: {name}")))
}

/// Calling mechanism for platforms without a dedicated classifier.
pub struct FallbackBridge {
    signature: FunctionSignature,
    cif: Cif,
}

impl FallbackBridge {
    /// Prepare the bridge for one signature. The result is cached by the
    /// caller and reused for every call to that signature.
    pub fn prepare(signature: &FunctionSignature) -> AbiResult<Self> {
        Ok(Self {
            signature: signature.clone(),
            cif: Cif::prepare(signature)?,
        })
    }

    pub fn signature(&self) -> &FunctionSignature {
        &self.signature
    }

    /// Perform one downcall.
    ///
    /// Region-backed address arguments stay pinned until this returns. When
    /// `state` is given, errno is cleared before the call and snapshotted
    /// right after it.
    pub fn call(
        &self,
        target: *const c_void,
        args: &[Value],
        state: Option<&mut CapturedCallState>,
    ) -> AbiResult<Option<Value>> {
        if target.is_null() {
            return Err(AbiError::Access("call target is null".to_string()));
        }
        if args.len() != self.cif.argument_count() {
            return Err(AbiError::mismatch(
                format!("{} argument(s)", self.cif.argument_count()),
                format!("{}", args.len()),
            ));
        }

        let _pins = pin_regions(args)?;
        let mut arena = CallArena::new();

        let mut avalues: Vec<*mut c_void> = Vec::with_capacity(args.len());
        for (value, layout) in args.iter().zip(self.signature.argument_layouts()) {
            let bytes = value_bytes(value, layout)?;
            let slot = arena.alloc_bytes(&bytes, layout.byte_alignment() as usize)?;
            avalues.push(slot.as_ptr().cast());
        }

        let ret_layout = self.signature.return_layout();
        let ret_size = ret_layout.map_or(0, |l| l.byte_size() as usize);
        let rvalue = arena.alloc(
            ret_size.max(MIN_RETURN_SLOT),
            ret_layout
                .map_or(MIN_RETURN_SLOT, |l| l.byte_alignment() as usize)
                .max(MIN_RETURN_SLOT),
        )?;

        let code = CodePtr(target as *mut c_void);
        if state.is_some() {
            clear_errno();
        }
        unsafe {
            raw::ffi_call(
                self.cif.as_raw_ptr(),
                Some(*code.as_safe_fun()),
                rvalue.as_ptr().cast(),
                avalues.as_mut_ptr(),
            );
        }
        if let Some(state) = state {
            state.errno = read_errno();
        }

        let result = match ret_layout {
            None => None,
            Some(layout) => {
                let mut bytes = vec![0u8; ret_size];
                unsafe {
                    ptr::copy_nonoverlapping(rvalue.as_ptr(), bytes.as_mut_ptr(), ret_size);
                }
                Some(boxed_result(layout, bytes)?)
            }
        };
        Ok(result)
    }
}

pub(crate) fn boxed_result(layout: &Layout, bytes: Vec<u8>) -> AbiResult<Value> {
    if layout.is_aggregate() {
        Ok(Value::Aggregate(Aggregate::new(bytes)))
    } else {
        scalar_from_bytes(layout, &bytes)
    }
}

fn pin_regions(args: &[Value]) -> AbiResult<Vec<RegionGuard>> {
    let mut pins = Vec::new();
    for value in args {
        if let Some(region) = value.region() {
            pins.push(region.acquire()?);
        }
    }
    Ok(pins)
}
