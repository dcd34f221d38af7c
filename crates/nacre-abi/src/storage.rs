//! Storage assignments and the finalized calling sequence
//!
//! A `CallingSequence` is the immutable plan for one function signature:
//! every eightbyte of every argument (and the return value) mapped to a
//! concrete register index or stack byte offset. Bindings live in flat
//! per-storage-class vectors and refer to their argument by index, so the
//! sequence can be cached and shared across threads without an object graph.

use nacre_layout::Layout;

use crate::abi::Abi;

/// Number of distinct storage classes
pub const STORAGE_CLASS_COUNT: usize = 6;

/// The kind of physical location a binding targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum StorageClass {
    /// Integer argument register (SysV: rdi..r9; Windows: rcx..r9)
    IntegerArgument = 0,
    /// Integer return register (rax, rdx)
    IntegerReturn = 1,
    /// Vector argument register (xmm0..)
    VectorArgument = 2,
    /// Vector return register (xmm0, xmm1)
    VectorReturn = 3,
    /// x87 return register (st0, st1)
    X87Return = 4,
    /// Stack argument slot
    Stack = 5,
}

impl StorageClass {
    /// All storage classes, in binding iteration order
    pub const ALL: [StorageClass; STORAGE_CLASS_COUNT] = [
        StorageClass::IntegerArgument,
        StorageClass::IntegerReturn,
        StorageClass::VectorArgument,
        StorageClass::VectorReturn,
        StorageClass::X87Return,
        StorageClass::Stack,
    ];

    /// Classes that carry argument values into a call
    pub const ARGUMENT: [StorageClass; 3] = [
        StorageClass::IntegerArgument,
        StorageClass::VectorArgument,
        StorageClass::Stack,
    ];

    /// Classes that carry the return value out of a call
    pub const RETURN: [StorageClass; 3] = [
        StorageClass::IntegerReturn,
        StorageClass::VectorReturn,
        StorageClass::X87Return,
    ];
}

/// One physical location: a register index or a stack byte offset, plus the
/// width of the data it carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Storage {
    /// Which register file or the stack
    pub class: StorageClass,
    /// Register index, or byte offset from the start of the outgoing
    /// stack argument area for `Stack`
    pub index: u64,
    /// Width of the slot's payload in bits
    pub bits: u32,
}

/// Which argument a binding belongs to. The return value is `Return`
/// (index -1 in diagnostic output).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgRef {
    /// The return value (or the hidden return pointer)
    Return,
    /// The n-th declared argument
    Arg(u32),
}

impl ArgRef {
    /// Diagnostic index: -1 for the return value
    pub fn index(self) -> i32 {
        match self {
            ArgRef::Return => -1,
            ArgRef::Arg(n) => n as i32,
        }
    }
}

/// One argument (or the return value) of an arranged signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Argument {
    /// Declaration index; -1 for the return value
    pub index: i32,
    /// The argument's layout
    pub layout: Layout,
    /// Optional declared name
    pub name: Option<String>,
}

/// Relates one eightbyte of an argument to one physical location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgumentBinding {
    /// Where the eightbyte lives
    pub storage: Storage,
    /// Which argument it belongs to
    pub argument: ArgRef,
    /// Byte offset of this eightbyte within the argument's value
    pub offset: u64,
    /// The slot holds the address of the value rather than its bytes
    /// (hidden return pointer, Windows by-reference aggregates)
    pub indirect: bool,
}

/// The finalized, immutable plan for one function signature.
#[derive(Debug, Clone)]
pub struct CallingSequence {
    pub(crate) abi: Abi,
    pub(crate) arguments: Vec<Argument>,
    pub(crate) return_argument: Option<Argument>,
    /// Indexed by `StorageClass as usize`; `None` entries are stack words
    /// skipped for alignment, kept so offsets stay a simple word count
    pub(crate) bindings: [Vec<Option<ArgumentBinding>>; STORAGE_CLASS_COUNT],
    pub(crate) returns_in_memory: bool,
    pub(crate) stack_bytes: u64,
}

impl CallingSequence {
    /// The ABI this sequence was built for
    pub fn abi(&self) -> Abi {
        self.abi
    }

    /// Number of declared arguments (the hidden return pointer not included)
    pub fn argument_count(&self) -> usize {
        self.arguments.len()
    }

    /// The n-th declared argument
    pub fn argument(&self, index: usize) -> Option<&Argument> {
        self.arguments.get(index)
    }

    /// All declared arguments
    pub fn arguments(&self) -> &[Argument] {
        &self.arguments
    }

    /// The return value description, if the function returns one
    pub fn return_argument(&self) -> Option<&Argument> {
        self.return_argument.as_ref()
    }

    /// Raw binding slots for one storage class, including alignment
    /// placeholders (`None`) in the stack class
    pub fn bindings(&self, class: StorageClass) -> &[Option<ArgumentBinding>] {
        &self.bindings[class as usize]
    }

    /// Occupied bindings of one storage class, in argument declaration order
    pub fn iter_bindings(&self, class: StorageClass) -> impl Iterator<Item = &ArgumentBinding> {
        self.bindings[class as usize].iter().flatten()
    }

    /// Every binding carrying the given argument into the call
    pub fn argument_bindings(&self, arg: ArgRef) -> Vec<&ArgumentBinding> {
        StorageClass::ARGUMENT
            .iter()
            .flat_map(|c| self.iter_bindings(*c))
            .filter(|b| b.argument == arg)
            .collect()
    }

    /// Every binding carrying the return value out of the call
    pub fn return_bindings(&self) -> Vec<&ArgumentBinding> {
        StorageClass::RETURN
            .iter()
            .flat_map(|c| self.iter_bindings(*c))
            .filter(|b| b.argument == ArgRef::Return)
            .collect()
    }

    /// The hidden return-pointer binding, present when the return value is
    /// memory-classed
    pub fn hidden_return_binding(&self) -> Option<&ArgumentBinding> {
        self.iter_bindings(StorageClass::IntegerArgument)
            .find(|b| b.argument == ArgRef::Return)
    }

    /// Whether the return value travels through caller-allocated memory
    pub fn returns_in_memory(&self) -> bool {
        self.returns_in_memory
    }

    /// Total bytes of outgoing stack argument area
    pub fn stack_bytes(&self) -> u64 {
        self.stack_bytes
    }
}
