//! Native call arrangement engine
//!
//! Turns a platform-neutral [`FunctionSignature`](nacre_layout::FunctionSignature)
//! into a concrete plan for one calling convention and executes the data
//! movement for one invocation:
//! - Per-ABI argument classifiers (`Abi::classify`) mapping layouts to
//!   eightbyte argument classes
//! - The calling-sequence builder assigning register indices and stack
//!   offsets under fixed budgets
//! - The value marshaller copying between managed `Value`s and a generic
//!   invocation frame
//! - Downcall/upcall arrangement with per-signature sequence memoization
//!
//! The fallback bridge for platforms without a dedicated classifier lives in
//! the `nacre-ffi` crate.

mod abi;
mod arena;
mod arrange;
mod builder;
mod class;
mod error;
mod frame;
mod marshal;
mod storage;
mod sysv;
mod value;
mod windows;

pub use abi::Abi;
pub use arena::CallArena;
pub use arrange::{
    arrange_downcall, arrange_upcall, cached_sequence, DowncallHandle, Trampoline, UpcallHandler,
    UpcallTarget,
};
pub use builder::CallingSequenceBuilder;
pub use class::{ArgumentClass, Classification};
pub use error::{AbiError, AbiResult};
pub use frame::CallFrame;
pub use marshal::{box_value, scalar_bytes, scalar_from_bytes, unbox, value_bytes};
pub use storage::{
    ArgRef, Argument, ArgumentBinding, CallingSequence, Storage, StorageClass,
    STORAGE_CLASS_COUNT,
};
pub use value::{Address, Aggregate, Region, RegionGuard, Value};
