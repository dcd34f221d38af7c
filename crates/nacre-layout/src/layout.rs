//! The layout sum type
//!
//! A `Layout` describes a native type bit-precisely: scalar values with
//! signedness and endianness, pointers (optionally typed), struct/union
//! groups, fixed-count sequences, and padding. Every concrete layout has a
//! deterministic size; group size is the sum (struct) or max (union) of its
//! element sizes.
//!
//! Layouts carry `Annotations` — opaque string metadata (name, accessor
//! hints) that never affects size or ABI classification.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::signature::FunctionSignature;

/// Scalar value kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// Two's-complement signed integer
    SignedInt,
    /// Unsigned integer
    UnsignedInt,
    /// IEEE (or x87 extended) floating point
    Float,
}

/// Byte order of a scalar value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endianness {
    /// Least significant byte first
    Little,
    /// Most significant byte first
    Big,
}

impl Endianness {
    /// The byte order of the machine this process runs on
    pub fn host() -> Self {
        if cfg!(target_endian = "big") {
            Endianness::Big
        } else {
            Endianness::Little
        }
    }
}

/// Struct or union
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupKind {
    /// Members laid out one after another, with natural-alignment padding
    Struct,
    /// Members overlaid at offset zero
    Union,
}

/// Opaque string metadata attached to a layout.
///
/// Annotations never affect size, alignment, or classification. Well-known
/// keys: `name`, `get`, `set`, `ptr`, `bitfield`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Annotations(BTreeMap<String, String>);

impl Annotations {
    /// Field or layout name
    pub const NAME: &'static str = "name";
    /// Getter accessor hint
    pub const GET: &'static str = "get";
    /// Setter accessor hint
    pub const SET: &'static str = "set";
    /// Pointer accessor hint
    pub const PTR: &'static str = "ptr";
    /// Declared bitfield width (the container scalar keeps its full size)
    pub const BITFIELD: &'static str = "bitfield";

    /// Look up an annotation value
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Set an annotation value, replacing any previous one
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// True when no annotations are attached
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Scalar integer or floating-point layout
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ValueLayout {
    /// Signedness / floatness
    pub kind: ValueKind,
    /// Width in bits
    pub bits: u32,
    /// Byte order
    pub endianness: Endianness,
    /// Opaque metadata
    pub annotations: Annotations,
}

/// What an address layout points at
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Addressee {
    /// Pointer to data of a known layout
    Layout(Layout),
    /// Pointer to a function with a known signature
    Function(FunctionSignature),
}

/// Pointer layout, optionally typed with its addressee
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AddressLayout {
    /// Pointer width in bits
    pub bits: u32,
    /// What the pointer addresses, when known
    pub addressee: Option<Arc<Addressee>>,
    /// Opaque metadata
    pub annotations: Annotations,
}

/// Struct or union layout
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupLayout {
    /// Struct or union
    pub kind: GroupKind,
    /// Members in declaration order
    pub elements: Arc<[Layout]>,
    /// Opaque metadata
    pub annotations: Annotations,
}

/// Fixed-count repetition of one element layout.
///
/// A sequence is a group specialization: a struct of `count` copies of the
/// element. Zero-count sequences are legal and have zero size.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SequenceLayout {
    /// The repeated element
    pub element: Arc<Layout>,
    /// Number of repetitions
    pub count: u64,
    /// Opaque metadata
    pub annotations: Annotations,
}

/// Padding bits, ignored by ABI classifiers but occupying space
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PaddingLayout {
    /// Width in bits
    pub bits: u64,
}

/// Immutable description of a native type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Layout {
    /// Scalar integer or float
    Value(ValueLayout),
    /// Pointer
    Address(AddressLayout),
    /// Struct or union
    Group(GroupLayout),
    /// Fixed-size array
    Sequence(SequenceLayout),
    /// Padding
    Padding(PaddingLayout),
}

impl Layout {
    /// Signed integer of `bits` bits, host byte order
    pub fn int(bits: u32) -> Layout {
        Layout::Value(ValueLayout {
            kind: ValueKind::SignedInt,
            bits,
            endianness: Endianness::host(),
            annotations: Annotations::default(),
        })
    }

    /// Unsigned integer of `bits` bits, host byte order
    pub fn unsigned(bits: u32) -> Layout {
        Layout::Value(ValueLayout {
            kind: ValueKind::UnsignedInt,
            bits,
            endianness: Endianness::host(),
            annotations: Annotations::default(),
        })
    }

    /// Floating point of `bits` bits, host byte order
    pub fn float(bits: u32) -> Layout {
        Layout::Value(ValueLayout {
            kind: ValueKind::Float,
            bits,
            endianness: Endianness::host(),
            annotations: Annotations::default(),
        })
    }

    /// Untyped 64-bit pointer
    pub fn pointer() -> Layout {
        Layout::Address(AddressLayout {
            bits: 64,
            addressee: None,
            annotations: Annotations::default(),
        })
    }

    /// 64-bit pointer to data of the given layout
    pub fn pointer_to(layout: Layout) -> Layout {
        Layout::Address(AddressLayout {
            bits: 64,
            addressee: Some(Arc::new(Addressee::Layout(layout))),
            annotations: Annotations::default(),
        })
    }

    /// 64-bit pointer to a function with the given signature
    pub fn pointer_to_function(signature: FunctionSignature) -> Layout {
        Layout::Address(AddressLayout {
            bits: 64,
            addressee: Some(Arc::new(Addressee::Function(signature))),
            annotations: Annotations::default(),
        })
    }

    /// Struct of the given members, in declaration order
    pub fn struct_of(elements: Vec<Layout>) -> Layout {
        Layout::Group(GroupLayout {
            kind: GroupKind::Struct,
            elements: elements.into(),
            annotations: Annotations::default(),
        })
    }

    /// Union of the given members
    pub fn union_of(elements: Vec<Layout>) -> Layout {
        Layout::Group(GroupLayout {
            kind: GroupKind::Union,
            elements: elements.into(),
            annotations: Annotations::default(),
        })
    }

    /// `count` repetitions of `element`
    pub fn sequence(count: u64, element: Layout) -> Layout {
        Layout::Sequence(SequenceLayout {
            element: Arc::new(element),
            count,
            annotations: Annotations::default(),
        })
    }

    /// `bits` bits of padding
    pub fn padding(bits: u64) -> Layout {
        Layout::Padding(PaddingLayout { bits })
    }

    /// Total size in bits. Deterministic for every concrete layout.
    pub fn bit_size(&self) -> u64 {
        match self {
            Layout::Value(v) => v.bits as u64,
            Layout::Address(a) => a.bits as u64,
            Layout::Group(g) => match g.kind {
                GroupKind::Struct => g.elements.iter().map(Layout::bit_size).sum(),
                GroupKind::Union => g.elements.iter().map(Layout::bit_size).max().unwrap_or(0),
            },
            Layout::Sequence(s) => s.element.bit_size() * s.count,
            Layout::Padding(p) => p.bits,
        }
    }

    /// Total size in whole bytes, rounding a partial byte up
    pub fn byte_size(&self) -> u64 {
        self.bit_size().div_ceil(8)
    }

    /// Natural alignment in bytes.
    ///
    /// Scalars align to their own size (capped at 16); groups and sequences
    /// align to their widest member; padding is byte-aligned.
    pub fn byte_alignment(&self) -> u64 {
        match self {
            Layout::Value(_) | Layout::Address(_) => {
                self.byte_size().next_power_of_two().clamp(1, 16)
            }
            Layout::Group(g) => g
                .elements
                .iter()
                .map(Layout::byte_alignment)
                .max()
                .unwrap_or(1),
            Layout::Sequence(s) => s.element.byte_alignment(),
            Layout::Padding(_) => 1,
        }
    }

    /// Attach a `name` annotation, consuming and returning the layout
    pub fn with_name(self, name: impl Into<String>) -> Layout {
        self.with_annotation(Annotations::NAME, name)
    }

    /// Attach an arbitrary annotation, consuming and returning the layout.
    ///
    /// Padding carries no metadata; annotating it is a no-op.
    pub fn with_annotation(mut self, key: &str, value: impl Into<String>) -> Layout {
        if let Some(a) = self.annotations_mut() {
            a.set(key, value);
        }
        self
    }

    /// The `name` annotation, if present
    pub fn name(&self) -> Option<&str> {
        self.annotations().and_then(|a| a.get(Annotations::NAME))
    }

    /// All annotations, if this layout kind carries any
    pub fn annotations(&self) -> Option<&Annotations> {
        match self {
            Layout::Value(v) => Some(&v.annotations),
            Layout::Address(a) => Some(&a.annotations),
            Layout::Group(g) => Some(&g.annotations),
            Layout::Sequence(s) => Some(&s.annotations),
            Layout::Padding(_) => None,
        }
    }

    fn annotations_mut(&mut self) -> Option<&mut Annotations> {
        match self {
            Layout::Value(v) => Some(&mut v.annotations),
            Layout::Address(a) => Some(&mut a.annotations),
            Layout::Group(g) => Some(&mut g.annotations),
            Layout::Sequence(s) => Some(&mut s.annotations),
            Layout::Padding(_) => None,
        }
    }

    /// Downcast to a group layout
    pub fn as_group(&self) -> Option<&GroupLayout> {
        match self {
            Layout::Group(g) => Some(g),
            _ => None,
        }
    }

    /// Downcast to a scalar value layout
    pub fn as_value(&self) -> Option<&ValueLayout> {
        match self {
            Layout::Value(v) => Some(v),
            _ => None,
        }
    }

    /// Downcast to a sequence layout
    pub fn as_sequence(&self) -> Option<&SequenceLayout> {
        match self {
            Layout::Sequence(s) => Some(s),
            _ => None,
        }
    }

    /// True for padding layouts
    pub fn is_padding(&self) -> bool {
        matches!(self, Layout::Padding(_))
    }

    /// True for struct/union/sequence layouts
    pub fn is_aggregate(&self) -> bool {
        matches!(self, Layout::Group(_) | Layout::Sequence(_))
    }
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Layout::Value(v) => {
                let tag = match v.kind {
                    ValueKind::SignedInt => 'i',
                    ValueKind::UnsignedInt => 'u',
                    ValueKind::Float => 'f',
                };
                write!(f, "{}{}", tag, v.bits)
            }
            Layout::Address(_) => write!(f, "p"),
            Layout::Group(g) => {
                let sep = match g.kind {
                    GroupKind::Struct => "",
                    GroupKind::Union => "|",
                };
                write!(f, "[")?;
                for (i, e) in g.elements.iter().enumerate() {
                    if i > 0 {
                        write!(f, "{sep}")?;
                    }
                    write!(f, "{e}")?;
                }
                write!(f, "]")
            }
            Layout::Sequence(s) => write!(f, "{}{}", s.count, s.element),
            Layout::Padding(p) => write!(f, "x{}", p.bits),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_sizes() {
        assert_eq!(Layout::int(32).bit_size(), 32);
        assert_eq!(Layout::int(32).byte_size(), 4);
        assert_eq!(Layout::float(64).byte_alignment(), 8);
        assert_eq!(Layout::float(128).byte_alignment(), 16);
        assert_eq!(Layout::pointer().byte_size(), 8);
    }

    #[test]
    fn test_struct_size_is_sum() {
        let s = Layout::struct_of(vec![Layout::int(32), Layout::int(32), Layout::float(64)]);
        assert_eq!(s.byte_size(), 16);
        assert_eq!(s.byte_alignment(), 8);
    }

    #[test]
    fn test_union_size_is_max() {
        let u = Layout::union_of(vec![Layout::int(32), Layout::float(64)]);
        assert_eq!(u.byte_size(), 8);
    }

    #[test]
    fn test_sequence_size() {
        let a = Layout::sequence(3, Layout::unsigned(64));
        assert_eq!(a.byte_size(), 24);
        assert_eq!(a.byte_alignment(), 8);
        assert_eq!(Layout::sequence(0, Layout::int(32)).bit_size(), 0);
    }

    #[test]
    fn test_annotations_do_not_affect_identity_of_size() {
        let plain = Layout::int(32);
        let named = Layout::int(32).with_name("x");
        assert_eq!(plain.byte_size(), named.byte_size());
        assert_eq!(named.name(), Some("x"));
        assert_ne!(plain, named);
    }

    #[test]
    fn test_display_round_trips_tokens() {
        let s = Layout::struct_of(vec![Layout::int(32), Layout::padding(32)]);
        assert_eq!(s.to_string(), "[i32x32]");
        let a = Layout::sequence(4, Layout::float(32));
        assert_eq!(a.to_string(), "4f32");
    }
}
