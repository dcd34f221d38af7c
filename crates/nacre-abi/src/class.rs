//! Per-eightbyte argument classes
//!
//! Classification assigns one `ArgumentClass` to each 8-byte chunk of an
//! argument's storage, low to high address. The merge lattice below is the
//! SysV AMD64 rule set; the Windows classifier only ever produces single
//! `Integer`/`Sse` entries or memory/by-reference classifications.

use crate::error::{AbiError, AbiResult};
use nacre_layout::Layout;

/// Physical storage kind of one eightbyte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgumentClass {
    /// General-purpose register
    Integer,
    /// SSE vector register (low eightbyte)
    Sse,
    /// Continuation of the preceding SSE register
    SseUp,
    /// x87 register (low eightbyte of an extended float)
    X87,
    /// Continuation of the preceding x87 register
    X87Up,
    /// Not yet classified
    NoClass,
    /// Passed through memory
    Memory,
}

impl ArgumentClass {
    /// SysV merge rule for two classes occupying the same eightbyte.
    pub fn merge(self, other: ArgumentClass) -> ArgumentClass {
        use ArgumentClass::*;
        if self == other {
            return self;
        }
        match (self, other) {
            (NoClass, c) | (c, NoClass) => c,
            (Memory, _) | (_, Memory) => Memory,
            (Integer, _) | (_, Integer) => Integer,
            _ => Sse,
        }
    }
}

/// Result of classifying one argument or return layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    /// One class per eightbyte, low to high
    pub classes: Vec<ArgumentClass>,
    /// The whole value goes through memory (stack for arguments, a hidden
    /// pointer for returns)
    pub in_memory: bool,
    /// Windows: the value is copied to a temporary and its address passed in
    /// a single register slot
    pub by_reference: bool,
}

impl Classification {
    /// A register-passed classification
    pub fn registers(classes: Vec<ArgumentClass>) -> Self {
        Self {
            classes,
            in_memory: false,
            by_reference: false,
        }
    }

    /// A fully memory-passed classification of `eightbytes` chunks
    pub fn memory(eightbytes: usize) -> Self {
        Self {
            classes: vec![ArgumentClass::Memory; eightbytes],
            in_memory: true,
            by_reference: false,
        }
    }

    /// A by-reference classification (one pointer-carrying slot)
    pub fn reference() -> Self {
        Self {
            classes: vec![ArgumentClass::Integer],
            in_memory: false,
            by_reference: true,
        }
    }

    /// Number of integer registers this classification consumes
    pub fn integer_count(&self) -> usize {
        self.classes
            .iter()
            .filter(|c| **c == ArgumentClass::Integer)
            .count()
    }

    /// Number of vector registers this classification consumes
    pub fn vector_count(&self) -> usize {
        self.classes
            .iter()
            .filter(|c| **c == ArgumentClass::Sse)
            .count()
    }

    /// Number of x87 registers this classification consumes
    pub fn x87_count(&self) -> usize {
        self.classes
            .iter()
            .filter(|c| **c == ArgumentClass::X87)
            .count()
    }
}

/// Reject layouts wider than the largest single vector register (64 bytes).
pub(crate) fn check_vector_width(layout: &Layout, eightbytes: usize) -> AbiResult<()> {
    if eightbytes > 8 {
        return Err(AbiError::unsupported(
            layout,
            format!("vector of {eightbytes} eightbytes exceeds the 64-byte register limit"),
        ));
    }
    Ok(())
}
