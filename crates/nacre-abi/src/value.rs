//! Invocation values
//!
//! `Value` is the managed side of a call: scalars carried inline, addresses
//! optionally tied to an owned native `Region`, aggregates as owned byte
//! buffers. Regions have explicit pin/close state so a call can hold memory
//! alive for exactly its own duration.

use std::alloc;
use std::ptr::NonNull;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{AbiError, AbiResult};

/// A managed value crossing the native boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    UInt8(u8),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),
    Float32(f32),
    Float64(f64),
    Address(Address),
    Aggregate(Aggregate),
}

impl Value {
    /// Short kind tag for diagnostics
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Int8(_) => "i8",
            Value::Int16(_) => "i16",
            Value::Int32(_) => "i32",
            Value::Int64(_) => "i64",
            Value::UInt8(_) => "u8",
            Value::UInt16(_) => "u16",
            Value::UInt32(_) => "u32",
            Value::UInt64(_) => "u64",
            Value::Float32(_) => "f32",
            Value::Float64(_) => "f64",
            Value::Address(_) => "address",
            Value::Aggregate(_) => "aggregate",
        }
    }

    /// The region backing this value, when it is a region-bound address
    pub fn region(&self) -> Option<&Arc<Region>> {
        match self {
            Value::Address(a) => a.region(),
            _ => None,
        }
    }
}

/// A native address, optionally backed by an owned [`Region`].
#[derive(Debug, Clone)]
pub struct Address {
    raw: u64,
    region: Option<Arc<Region>>,
}

impl PartialEq for Address {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Address {
    /// An unmanaged raw address (no lifetime tracking)
    pub fn new(raw: u64) -> Self {
        Self { raw, region: None }
    }

    /// The address of a region's first byte, keeping the region alive
    pub fn of_region(region: Arc<Region>) -> Self {
        Self {
            raw: region.base(),
            region: Some(region),
        }
    }

    pub fn raw(&self) -> u64 {
        self.raw
    }

    pub fn region(&self) -> Option<&Arc<Region>> {
        self.region.as_ref()
    }
}

/// An aggregate value: owned bytes matching some group or sequence layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aggregate {
    bytes: Box<[u8]>,
}

impl Aggregate {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes: bytes.into_boxed_slice(),
        }
    }

    /// Zero-filled bytes sized to a layout
    pub fn zeroed(byte_size: u64) -> Self {
        Self {
            bytes: vec![0u8; byte_size as usize].into_boxed_slice(),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}

// ============================================================================
// Regions
// ============================================================================

struct RegionState {
    pins: usize,
    closed: bool,
}

/// An owned, aligned native buffer with explicit pin/close state.
///
/// A call pins every region-backed address argument for its own duration via
/// [`acquire`](Region::acquire); `close` fails while any pin is held, so
/// shrinking a region's lifetime from another thread cannot free memory a
/// call is still using.
pub struct Region {
    ptr: NonNull<u8>,
    len: usize,
    align: usize,
    state: Mutex<RegionState>,
}

// The buffer is owned and only reachable through &self methods that bound
// their accesses; pin state is behind the mutex.
unsafe impl Send for Region {}
unsafe impl Sync for Region {}

impl std::fmt::Debug for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Region")
            .field("base", &self.base())
            .field("len", &self.len)
            .finish()
    }
}

impl Region {
    /// Allocate a zeroed native buffer.
    pub fn allocate(len: usize, align: usize) -> AbiResult<Arc<Region>> {
        let align = align.max(1).next_power_of_two();
        let layout = alloc::Layout::from_size_align(len.max(1), align)
            .map_err(|e| AbiError::Access(format!("invalid region shape: {e}")))?;
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(raw)
            .ok_or_else(|| AbiError::Access("native allocation failed".to_string()))?;
        Ok(Arc::new(Region {
            ptr,
            len,
            align,
            state: Mutex::new(RegionState {
                pins: 0,
                closed: false,
            }),
        }))
    }

    /// Address of the first byte
    pub fn base(&self) -> u64 {
        self.ptr.as_ptr() as u64
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Pin the region for the duration of the returned guard.
    pub fn acquire(self: &Arc<Self>) -> AbiResult<RegionGuard> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(AbiError::Access("region is closed".to_string()));
        }
        state.pins += 1;
        Ok(RegionGuard {
            region: Arc::clone(self),
        })
    }

    /// Mark the region closed. Fails while any call holds a pin.
    pub fn close(&self) -> AbiResult<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(AbiError::Access("region is already closed".to_string()));
        }
        if state.pins > 0 {
            return Err(AbiError::Access(format!(
                "region is pinned by {} in-flight call(s)",
                state.pins
            )));
        }
        state.closed = true;
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    fn check_range(&self, offset: usize, len: usize) -> AbiResult<()> {
        if self.state.lock().closed {
            return Err(AbiError::Access("region is closed".to_string()));
        }
        if offset.checked_add(len).is_none_or(|end| end > self.len) {
            return Err(AbiError::Access(format!(
                "range {offset}..{} outside region of {} bytes",
                offset + len,
                self.len
            )));
        }
        Ok(())
    }

    /// Copy bytes into the region at the given offset.
    pub fn write_bytes(&self, offset: usize, bytes: &[u8]) -> AbiResult<()> {
        self.check_range(offset, bytes.len())?;
        unsafe {
            std::ptr::copy_nonoverlapping(
                bytes.as_ptr(),
                self.ptr.as_ptr().add(offset),
                bytes.len(),
            );
        }
        Ok(())
    }

    /// Copy bytes out of the region at the given offset.
    pub fn read_bytes(&self, offset: usize, out: &mut [u8]) -> AbiResult<()> {
        self.check_range(offset, out.len())?;
        unsafe {
            std::ptr::copy_nonoverlapping(self.ptr.as_ptr().add(offset), out.as_mut_ptr(), out.len());
        }
        Ok(())
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        // from_size_align succeeded at allocation time
        if let Ok(layout) = alloc::Layout::from_size_align(self.len.max(1), self.align) {
            unsafe { alloc::dealloc(self.ptr.as_ptr(), layout) };
        }
    }
}

/// RAII pin on a [`Region`]; released on drop, including on error paths.
pub struct RegionGuard {
    region: Arc<Region>,
}

impl RegionGuard {
    pub fn region(&self) -> &Arc<Region> {
        &self.region
    }
}

impl Drop for RegionGuard {
    fn drop(&mut self) {
        let mut state = self.region.state.lock();
        state.pins -= 1;
    }
}
