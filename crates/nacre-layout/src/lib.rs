//! Bit-precise description of native memory layouts
//!
//! This crate is the leaf of the nacre workspace. It provides:
//! - The `Layout` sum type (scalars, pointers, groups, sequences, padding)
//! - `FunctionSignature` for describing native call shapes
//! - The textual descriptor grammar (`parse`, `parse_signature`)
//! - Typed field accessor tables for struct layouts (`AccessorTable`)
//!
//! Layouts are immutable value objects. They can be freely shared and hashed,
//! which is what allows calling sequences to be cached per signature shape.

mod accessor;
mod error;
mod layout;
mod parser;
mod signature;

pub use accessor::{AccessorTable, FieldAccessor};
pub use error::DescriptorError;
pub use layout::{
    Addressee, AddressLayout, Annotations, Endianness, GroupKind, GroupLayout, Layout,
    PaddingLayout, SequenceLayout, ValueKind, ValueLayout,
};
pub use parser::{parse, parse_signature};
pub use signature::FunctionSignature;
