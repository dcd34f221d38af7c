//! Captured per-call native state
//!
//! errno is process-global, mutable state on the native side. Instead of
//! mirroring it globally, each call that asks for capture receives the value
//! in an explicit out-parameter snapshotted immediately after the native
//! function returns.

/// Native state captured around one call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CapturedCallState {
    /// The callee's errno, read immediately after the call returned
    pub errno: i32,
}

impl CapturedCallState {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn errno_location() -> *mut i32 {
    unsafe { libc::__errno_location() }
}

#[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
fn errno_location() -> *mut i32 {
    unsafe { libc::__error() }
}

#[cfg(any(
    target_os = "linux",
    target_os = "android",
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd"
))]
mod imp {
    pub(crate) fn clear_errno() {
        unsafe { *super::errno_location() = 0 };
    }

    pub(crate) fn read_errno() -> i32 {
        unsafe { *super::errno_location() }
    }
}

#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd"
)))]
mod imp {
    pub(crate) fn clear_errno() {}

    pub(crate) fn read_errno() -> i32 {
        0
    }
}

pub(crate) use imp::{clear_errno, read_errno};
