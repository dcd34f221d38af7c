//! Error taxonomy for the call arrangement engine
//!
//! Every error aborts only the construction or call it occurred in; cached
//! calling sequences and unrelated in-flight calls are never affected.

use thiserror::Error;

use nacre_layout::Layout;

/// Result type for ABI operations
pub type AbiResult<T> = Result<T, AbiError>;

/// Errors raised while classifying layouts, building calling sequences, or
/// marshalling values.
#[derive(Debug, Clone, Error)]
pub enum AbiError {
    /// The classifier cannot place this layout (oversized vector, padding in
    /// argument position, union on the fallback path, ...)
    #[error("Unsupported layout {layout}: {reason}")]
    UnsupportedLayout {
        /// Descriptor form of the offending layout
        layout: String,
        /// Why it cannot be placed
        reason: String,
    },

    /// A copy between a value and its destination where sizes or kinds
    /// disagree. Never silently truncated.
    #[error("Layout mismatch: expected {expected}, found {found}")]
    LayoutMismatch {
        /// What the layout called for
        expected: String,
        /// What was actually supplied
        found: String,
    },

    /// Memory that cannot be safely exposed (closed region, failed pin).
    /// Recoverable: the caller may pick another access path.
    #[error("Access error: {0}")]
    Access(String),

    /// The external C ABI library rejected a call-interface construction
    #[error("Native call setup failed: {0}")]
    NativeCallSetup(String),
}

impl AbiError {
    /// Unsupported-layout error for a concrete layout
    pub fn unsupported(layout: &Layout, reason: impl Into<String>) -> Self {
        AbiError::UnsupportedLayout {
            layout: layout.to_string(),
            reason: reason.into(),
        }
    }

    /// Size/kind disagreement between a layout and a supplied value
    pub fn mismatch(expected: impl Into<String>, found: impl Into<String>) -> Self {
        AbiError::LayoutMismatch {
            expected: expected.into(),
            found: found.into(),
        }
    }
}
