//! Fallback calling bridge over libffi
//!
//! Where no dedicated fast-path classifier exists for the platform, calls go
//! through libffi instead: layouts become libffi type trees, a call interface
//! is prepared once per signature, and each invocation writes its arguments
//! into call-scoped scratch slots before one `ffi_call`. Upcalls run through
//! allocated closures dispatching back into managed callbacks.
//!
//! Unions have no libffi representation and are rejected on this path.

mod bridge;
mod state;
mod types;
mod upcall;

pub use bridge::{Cif, FallbackBridge};
pub use state::CapturedCallState;
pub use types::{ffi_type_for, return_type_for, verify_struct_offsets};
pub use upcall::UpcallStub;
