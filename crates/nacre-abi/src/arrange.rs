//! Downcall and upcall arrangement
//!
//! Ties the builder and marshaller together behind two entry points:
//! `arrange_downcall` produces a handle that marshals arguments into a frame,
//! hands the frame to a [`Trampoline`], and boxes the result back out;
//! `arrange_upcall` produces the inverse handler for native-to-managed
//! transfers. Built sequences are memoized per `(Abi, signature)` shape.

use std::sync::Arc;

use nacre_layout::FunctionSignature;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::abi::Abi;
use crate::arena::CallArena;
use crate::builder::CallingSequenceBuilder;
use crate::error::{AbiError, AbiResult};
use crate::frame::CallFrame;
use crate::marshal;
use crate::storage::{ArgRef, CallingSequence};
use crate::value::{RegionGuard, Value};

/// Performs the actual native transfer for one invocation.
///
/// The in-tree implementation is the fallback bridge; JIT-compiled stubs are
/// external collaborators that consume the same frame contract.
pub trait Trampoline: Send + Sync {
    fn invoke(&self, sequence: &CallingSequence, frame: &mut CallFrame) -> AbiResult<()>;
}

/// The managed target of an upcall.
pub type UpcallTarget = Arc<dyn Fn(&[Value]) -> AbiResult<Option<Value>> + Send + Sync>;

static SEQUENCE_CACHE: Lazy<RwLock<FxHashMap<(Abi, FunctionSignature), Arc<CallingSequence>>>> =
    Lazy::new(|| RwLock::new(FxHashMap::default()));

/// The memoized calling sequence for one `(abi, signature)` shape.
///
/// At most one build runs per shape; a failed build inserts nothing and
/// leaves previously cached sequences untouched.
pub fn cached_sequence(
    abi: Abi,
    signature: &FunctionSignature,
) -> AbiResult<Arc<CallingSequence>> {
    let key = (abi, signature.clone());
    if let Some(seq) = SEQUENCE_CACHE.read().get(&key) {
        return Ok(Arc::clone(seq));
    }
    let mut cache = SEQUENCE_CACHE.write();
    if let Some(seq) = cache.get(&key) {
        return Ok(Arc::clone(seq));
    }
    let seq = Arc::new(CallingSequenceBuilder::for_signature(abi, signature).build()?);
    cache.insert(key, Arc::clone(&seq));
    Ok(seq)
}

#[cfg(test)]
pub(crate) fn cache_contains(abi: Abi, signature: &FunctionSignature) -> bool {
    SEQUENCE_CACHE
        .read()
        .contains_key(&(abi, signature.clone()))
}

/// Arrange a managed-to-native call for a signature.
pub fn arrange_downcall(
    abi: Abi,
    signature: &FunctionSignature,
    trampoline: Arc<dyn Trampoline>,
) -> AbiResult<DowncallHandle> {
    Ok(DowncallHandle {
        sequence: cached_sequence(abi, signature)?,
        trampoline,
    })
}

/// Arrange a native-to-managed entry for a signature.
pub fn arrange_upcall(
    abi: Abi,
    signature: &FunctionSignature,
    target: UpcallTarget,
) -> AbiResult<UpcallHandler> {
    Ok(UpcallHandler {
        sequence: cached_sequence(abi, signature)?,
        target,
    })
}

/// An invocable native function with a fixed calling sequence.
pub struct DowncallHandle {
    sequence: Arc<CallingSequence>,
    trampoline: Arc<dyn Trampoline>,
}

impl DowncallHandle {
    pub fn sequence(&self) -> &CallingSequence {
        &self.sequence
    }

    /// Perform one call: pin region-backed arguments, marshal in, invoke,
    /// marshal out. Pins and scratch are released when this returns, on the
    /// error path included.
    pub fn call(&self, args: &[Value]) -> AbiResult<Option<Value>> {
        let seq = &self.sequence;
        if args.len() != seq.argument_count() {
            return Err(AbiError::mismatch(
                format!("{} argument(s)", seq.argument_count()),
                format!("{}", args.len()),
            ));
        }

        let _pins = pin_regions(args)?;
        let mut arena = CallArena::new();
        let mut frame = CallFrame::for_sequence(seq);

        for (i, value) in args.iter().enumerate() {
            let arg = match seq.argument(i) {
                Some(arg) => arg,
                None => break,
            };
            let bindings = seq.argument_bindings(ArgRef::Arg(i as u32));
            marshal::unbox(value, &arg.layout, &bindings, &mut frame, &mut arena)?;
        }

        // Memory-classed returns receive a scratch buffer through the hidden
        // pointer; the callee echoes that address back in the return slot.
        let mut return_scratch = None;
        if seq.returns_in_memory() {
            if let (Some(ret), Some(hidden)) = (seq.return_argument(), seq.hidden_return_binding())
            {
                let scratch = arena.alloc(
                    ret.layout.byte_size() as usize,
                    ret.layout.byte_alignment() as usize,
                )?;
                frame.write_u64(&hidden.storage, scratch.as_ptr() as u64)?;
                return_scratch = Some(scratch);
            }
        }

        self.trampoline.invoke(seq, &mut frame)?;

        let ret = match seq.return_argument() {
            None => None,
            Some(ret) => {
                if let Some(scratch) = return_scratch {
                    let mut bytes = vec![0u8; ret.layout.byte_size() as usize];
                    unsafe {
                        std::ptr::copy_nonoverlapping(
                            scratch.as_ptr(),
                            bytes.as_mut_ptr(),
                            bytes.len(),
                        );
                    }
                    Some(Value::Aggregate(crate::value::Aggregate::new(bytes)))
                } else {
                    let bindings = seq.return_bindings();
                    Some(marshal::box_value(&ret.layout, &bindings, &frame)?)
                }
            }
        };
        Ok(ret)
    }
}

/// The managed side of a native-to-managed entry point.
pub struct UpcallHandler {
    sequence: Arc<CallingSequence>,
    target: UpcallTarget,
}

impl UpcallHandler {
    pub fn sequence(&self) -> &CallingSequence {
        &self.sequence
    }

    /// Handle one incoming call: box every argument out of the frame, invoke
    /// the managed target, unbox its result into the return slots.
    pub fn handle(&self, frame: &mut CallFrame) -> AbiResult<()> {
        let seq = &self.sequence;
        let mut args = Vec::with_capacity(seq.argument_count());
        for i in 0..seq.argument_count() {
            let arg = match seq.argument(i) {
                Some(arg) => arg,
                None => break,
            };
            let bindings = seq.argument_bindings(ArgRef::Arg(i as u32));
            args.push(marshal::box_value(&arg.layout, &bindings, frame)?);
        }

        let result = (self.target)(&args)?;

        let mut arena = CallArena::new();
        match (seq.return_argument(), result) {
            (None, _) => Ok(()),
            (Some(ret), Some(value)) => {
                if seq.returns_in_memory() {
                    // The caller's hidden pointer names the destination
                    let hidden = seq.hidden_return_binding().ok_or_else(|| {
                        AbiError::Access("memory return without a hidden pointer".to_string())
                    })?;
                    let addr = frame.read_u64(&hidden.storage)?;
                    if addr == 0 {
                        return Err(AbiError::Access(
                            "hidden return pointer is null".to_string(),
                        ));
                    }
                    let bytes = marshal::value_bytes(&value, &ret.layout)?;
                    unsafe {
                        std::ptr::copy_nonoverlapping(
                            bytes.as_ptr(),
                            addr as *mut u8,
                            bytes.len(),
                        );
                    }
                    Ok(())
                } else {
                    let bindings = seq.return_bindings();
                    marshal::unbox(&value, &ret.layout, &bindings, frame, &mut arena)
                }
            }
            (Some(ret), None) => Err(AbiError::mismatch(
                format!("a {} return value", ret.layout),
                "no value".to_string(),
            )),
        }
    }
}

/// Pin every region-backed address argument for the call's duration.
fn pin_regions(args: &[Value]) -> AbiResult<Vec<RegionGuard>> {
    let mut pins = Vec::new();
    for value in args {
        if let Some(region) = value.region() {
            pins.push(region.acquire()?);
        }
    }
    Ok(pins)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Storage, StorageClass};
    use nacre_layout::parse_signature;

    /// Adds its two integer register arguments
    struct AddTrampoline;

    impl Trampoline for AddTrampoline {
        fn invoke(&self, seq: &CallingSequence, frame: &mut CallFrame) -> AbiResult<()> {
            let mut sum = 0u64;
            for b in seq.iter_bindings(StorageClass::IntegerArgument) {
                sum = sum.wrapping_add(frame.read_u64(&b.storage)?);
            }
            let ret = Storage {
                class: StorageClass::IntegerReturn,
                index: 0,
                bits: 64,
            };
            frame.write_u64(&ret, sum)
        }
    }

    #[test]
    fn test_downcall_round_trip() {
        let sig = parse_signature("(i64i64)i64").unwrap();
        let handle = arrange_downcall(Abi::SysV, &sig, Arc::new(AddTrampoline)).unwrap();
        let out = handle
            .call(&[Value::Int64(40), Value::Int64(2)])
            .unwrap();
        assert_eq!(out, Some(Value::Int64(42)));
    }

    #[test]
    fn test_arity_is_checked() {
        let sig = parse_signature("(i64i64)i64").unwrap();
        let handle = arrange_downcall(Abi::SysV, &sig, Arc::new(AddTrampoline)).unwrap();
        assert!(handle.call(&[Value::Int64(1)]).is_err());
    }

    #[test]
    fn test_sequences_are_memoized() {
        let sig = parse_signature("(f64f64f64)f64").unwrap();
        let a = cached_sequence(Abi::SysV, &sig).unwrap();
        let b = cached_sequence(Abi::SysV, &sig).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_failed_build_does_not_poison_cache() {
        let bad = parse_signature("(9u64(vector=1))v").unwrap();
        assert!(cached_sequence(Abi::SysV, &bad).is_err());
        assert!(!cache_contains(Abi::SysV, &bad));
        assert!(cached_sequence(Abi::SysV, &bad).is_err());
    }

    #[test]
    fn test_upcall_handler_round_trip() {
        let sig = parse_signature("(i32i32)i32").unwrap();
        let handler = arrange_upcall(
            Abi::SysV,
            &sig,
            Arc::new(|args: &[Value]| {
                let (Value::Int32(a), Value::Int32(b)) = (&args[0], &args[1]) else {
                    panic!("unexpected argument kinds");
                };
                Ok(Some(Value::Int32(a * b)))
            }),
        )
        .unwrap();

        let seq = handler.sequence();
        let mut frame = CallFrame::for_sequence(seq);
        let mut arena = CallArena::new();
        let args = seq.arguments().to_vec();
        for (i, arg) in args.iter().enumerate() {
            let bindings = seq.argument_bindings(ArgRef::Arg(i as u32));
            marshal::unbox(
                &Value::Int32(6 + i as i32),
                &arg.layout,
                &bindings,
                &mut frame,
                &mut arena,
            )
            .unwrap();
        }
        handler.handle(&mut frame).unwrap();
        let ret = seq.return_argument().unwrap();
        let out = marshal::box_value(&ret.layout, &seq.return_bindings(), &frame).unwrap();
        assert_eq!(out, Value::Int32(42));
    }
}
