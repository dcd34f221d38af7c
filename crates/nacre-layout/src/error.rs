//! Error types for the layout descriptor grammar

use thiserror::Error;

/// Errors produced while parsing a layout descriptor string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DescriptorError {
    /// Input ended while a token was still expected
    #[error("Unexpected end of descriptor at byte {at}, expected {expected}")]
    UnexpectedEnd {
        /// Byte position where input ran out
        at: usize,
        /// What the parser was looking for
        expected: &'static str,
    },

    /// A byte that does not start or continue any token
    #[error("Unexpected character '{found}' at byte {at}, expected {expected}")]
    Unexpected {
        /// Byte position of the offending character
        at: usize,
        /// The character found
        found: char,
        /// What the parser was looking for
        expected: &'static str,
    },

    /// A size or count did not parse as a positive integer
    #[error("Invalid number at byte {at}")]
    InvalidNumber {
        /// Byte position where the number started
        at: usize,
    },

    /// Input remained after a complete layout was parsed
    #[error("Trailing input at byte {at}")]
    TrailingInput {
        /// Byte position of the first unconsumed character
        at: usize,
    },

    /// Annotation key or value text that is not valid UTF-8
    #[error("Invalid annotation text at byte {at}")]
    InvalidAnnotation {
        /// Byte position where the annotation text started
        at: usize,
    },

    /// An endianness override applied to a non-scalar layout
    #[error("Endianness override at byte {at} must precede a value layout")]
    MisplacedEndianness {
        /// Byte position of the override character
        at: usize,
    },
}
