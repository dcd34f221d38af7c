//! ABI selection
//!
//! A closed set of calling conventions dispatched through one enum — no
//! global singletons. `Fallback` has no fast-path classifier; calls on that
//! path are shaped by the external C ABI library through the bridge crate.

use crate::class::Classification;
use crate::error::{AbiError, AbiResult};
use crate::{sysv, windows};
use nacre_layout::Layout;

/// Calling convention selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Abi {
    /// System V x86-64 (Linux, macOS, BSD)
    SysV,
    /// Windows x64
    Windows,
    /// No dedicated classifier; handled by the libffi bridge
    Fallback,
}

impl Abi {
    /// The ABI of the platform this process runs on.
    pub fn host() -> Abi {
        if cfg!(all(target_arch = "x86_64", windows)) {
            Abi::Windows
        } else if cfg!(all(target_arch = "x86_64", unix)) {
            Abi::SysV
        } else {
            Abi::Fallback
        }
    }

    /// Classify one layout for argument or return position.
    pub fn classify(&self, layout: &Layout, return_position: bool) -> AbiResult<Classification> {
        match self {
            Abi::SysV => sysv::classify(layout, return_position),
            Abi::Windows => windows::classify(layout, return_position),
            Abi::Fallback => Err(AbiError::unsupported(
                layout,
                "the fallback ABI classifies through the external bridge",
            )),
        }
    }

    /// Integer register budget for the given pass
    pub(crate) fn integer_budget(&self, for_arguments: bool) -> usize {
        match (self, for_arguments) {
            (Abi::SysV, true) => sysv::INTEGER_ARGUMENT_REGISTERS,
            (Abi::SysV, false) => sysv::INTEGER_RETURN_REGISTERS,
            (Abi::Windows, true) => windows::ARGUMENT_REGISTERS,
            (Abi::Windows, false) => windows::INTEGER_RETURN_REGISTERS,
            (Abi::Fallback, _) => 0,
        }
    }

    /// Vector register budget for the given pass
    pub(crate) fn vector_budget(&self, for_arguments: bool) -> usize {
        match (self, for_arguments) {
            (Abi::SysV, true) => sysv::VECTOR_ARGUMENT_REGISTERS,
            (Abi::SysV, false) => sysv::VECTOR_RETURN_REGISTERS,
            (Abi::Windows, true) => windows::ARGUMENT_REGISTERS,
            (Abi::Windows, false) => windows::VECTOR_RETURN_REGISTERS,
            (Abi::Fallback, _) => 0,
        }
    }

    /// x87 return register budget
    pub(crate) fn x87_budget(&self) -> usize {
        match self {
            Abi::SysV => sysv::X87_RETURN_REGISTERS,
            _ => 0,
        }
    }

    /// Windows ties integer and vector slots to the argument position
    pub(crate) fn shared_register_slots(&self) -> bool {
        matches!(self, Abi::Windows)
    }

    /// Windows duplicates variadic float arguments into the shadow GPR
    pub(crate) fn variadic_float_shadow(&self) -> bool {
        matches!(self, Abi::Windows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budgets() {
        assert_eq!(Abi::SysV.integer_budget(true), 6);
        assert_eq!(Abi::SysV.vector_budget(true), 8);
        assert_eq!(Abi::Windows.integer_budget(true), 4);
        assert_eq!(Abi::Windows.vector_budget(true), 4);
    }

    #[test]
    fn test_fallback_refuses_classification() {
        let err = Abi::Fallback.classify(&Layout::int(32), false);
        assert!(matches!(err, Err(AbiError::UnsupportedLayout { .. })));
    }
}
