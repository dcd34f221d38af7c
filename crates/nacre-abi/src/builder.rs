//! Calling-sequence construction
//!
//! Two independent passes — arguments, then the return value — each driven
//! by a `StorageCalculator` holding running register counts and a stack byte
//! offset. A memory-classed return synthesizes the hidden return-pointer
//! argument before the argument pass, so it consumes integer argument
//! register 0.

use nacre_layout::{FunctionSignature, Layout};

use crate::abi::Abi;
use crate::class::{ArgumentClass, Classification};
use crate::error::{AbiError, AbiResult};
use crate::storage::{
    ArgRef, Argument, ArgumentBinding, CallingSequence, Storage, StorageClass,
    STORAGE_CLASS_COUNT,
};

/// Builder accumulating a signature, finalized by [`build`](Self::build).
pub struct CallingSequenceBuilder {
    abi: Abi,
    arguments: Vec<Argument>,
    ret: Option<Argument>,
    variadic: bool,
}

impl CallingSequenceBuilder {
    /// Start a sequence for the given ABI
    pub fn new(abi: Abi) -> Self {
        Self {
            abi,
            arguments: Vec::new(),
            ret: None,
            variadic: false,
        }
    }

    /// Populate the builder from a function signature
    pub fn for_signature(abi: Abi, signature: &FunctionSignature) -> Self {
        let mut builder = Self::new(abi);
        if let Some(ret) = signature.return_layout() {
            builder = builder.returns(ret.clone());
        }
        for layout in signature.argument_layouts() {
            builder = builder.argument(layout.clone(), layout.name());
        }
        if signature.is_variadic() {
            builder = builder.variadic();
        }
        builder
    }

    /// Set the return layout
    pub fn returns(mut self, layout: Layout) -> Self {
        self.ret = Some(Argument {
            index: -1,
            layout,
            name: None,
        });
        self
    }

    /// Append one argument
    pub fn argument(mut self, layout: Layout, name: Option<&str>) -> Self {
        self.arguments.push(Argument {
            index: self.arguments.len() as i32,
            layout,
            name: name.map(str::to_string),
        });
        self
    }

    /// Mark the signature variadic
    pub fn variadic(mut self) -> Self {
        self.variadic = true;
        self
    }

    /// Classify every argument, assign storage, and finalize.
    ///
    /// Fails with `UnsupportedLayout` when any layout cannot be placed; a
    /// failed build leaves no shared state behind.
    pub fn build(self) -> AbiResult<CallingSequence> {
        let mut bindings: [Vec<Option<ArgumentBinding>>; STORAGE_CLASS_COUNT] =
            Default::default();

        // Classify the return value first: a memory-classed return injects
        // the hidden pointer ahead of every declared argument.
        let ret_classification = match &self.ret {
            Some(ret) => Some(self.abi.classify(&ret.layout, true)?),
            None => None,
        };
        let returns_in_memory = ret_classification
            .as_ref()
            .is_some_and(|c| c.in_memory);

        // Argument pass
        let mut calc = StorageCalculator::new(self.abi, true, self.variadic);
        if returns_in_memory {
            calc.alloc_hidden_return_pointer(&mut bindings);
        }
        for (i, arg) in self.arguments.iter().enumerate() {
            let classification = self.abi.classify(&arg.layout, false)?;
            calc.allocate(
                ArgRef::Arg(i as u32),
                &arg.layout,
                &classification,
                &mut bindings,
            )?;
        }
        let stack_bytes = calc.stack_offset;

        // Return pass
        if let (Some(ret), Some(classification)) = (&self.ret, ret_classification) {
            if returns_in_memory {
                // The callee hands the hidden pointer back in rax
                bindings[StorageClass::IntegerReturn as usize].push(Some(ArgumentBinding {
                    storage: Storage {
                        class: StorageClass::IntegerReturn,
                        index: 0,
                        bits: 64,
                    },
                    argument: ArgRef::Return,
                    offset: 0,
                    indirect: true,
                }));
            } else {
                let mut ret_calc = StorageCalculator::new(self.abi, false, false);
                ret_calc.allocate(ArgRef::Return, &ret.layout, &classification, &mut bindings)?;
            }
        }

        Ok(CallingSequence {
            abi: self.abi,
            arguments: self.arguments,
            return_argument: self.ret,
            bindings,
            returns_in_memory,
            stack_bytes,
        })
    }
}

/// Running storage state for one pass (arguments or return).
struct StorageCalculator {
    abi: Abi,
    for_arguments: bool,
    variadic: bool,
    n_integer: usize,
    n_vector: usize,
    n_x87: usize,
    stack_offset: u64,
}

impl StorageCalculator {
    fn new(abi: Abi, for_arguments: bool, variadic: bool) -> Self {
        Self {
            abi,
            for_arguments,
            variadic,
            n_integer: 0,
            n_vector: 0,
            n_x87: 0,
            stack_offset: 0,
        }
    }

    /// Assign storage for one classified argument.
    fn allocate(
        &mut self,
        arg: ArgRef,
        layout: &Layout,
        classification: &Classification,
        out: &mut [Vec<Option<ArgumentBinding>>; STORAGE_CLASS_COUNT],
    ) -> AbiResult<()> {
        if classification.classes.is_empty() {
            // Zero-size value: consumes nothing
            return Ok(());
        }
        if classification.by_reference {
            self.alloc_reference(arg, out);
            return Ok(());
        }
        if classification.in_memory || !self.fits(classification) {
            self.alloc_stack(arg, layout, out);
            return Ok(());
        }
        self.alloc_registers(arg, layout, classification, out)
    }

    fn fits(&self, classification: &Classification) -> bool {
        if self.abi.shared_register_slots() {
            let used = self.n_integer.max(self.n_vector);
            return used + 1 <= self.abi.integer_budget(self.for_arguments);
        }
        self.n_integer + classification.integer_count()
            <= self.abi.integer_budget(self.for_arguments)
            && self.n_vector + classification.vector_count()
                <= self.abi.vector_budget(self.for_arguments)
            && self.n_x87 + classification.x87_count() <= self.abi.x87_budget()
    }

    /// Next free integer register index, honoring Windows shared slots
    fn next_integer(&mut self) -> u64 {
        let idx = if self.abi.shared_register_slots() {
            let slot = self.n_integer.max(self.n_vector);
            self.n_vector = slot + 1;
            self.n_integer = slot + 1;
            slot
        } else {
            self.n_integer += 1;
            self.n_integer - 1
        };
        idx as u64
    }

    fn next_vector(&mut self) -> u64 {
        let idx = if self.abi.shared_register_slots() {
            let slot = self.n_integer.max(self.n_vector);
            self.n_vector = slot + 1;
            self.n_integer = slot + 1;
            slot
        } else {
            self.n_vector += 1;
            self.n_vector - 1
        };
        idx as u64
    }

    fn integer_class(&self) -> StorageClass {
        if self.for_arguments {
            StorageClass::IntegerArgument
        } else {
            StorageClass::IntegerReturn
        }
    }

    fn vector_class(&self) -> StorageClass {
        if self.for_arguments {
            StorageClass::VectorArgument
        } else {
            StorageClass::VectorReturn
        }
    }

    /// The hidden return pointer occupies the first integer argument register
    fn alloc_hidden_return_pointer(
        &mut self,
        out: &mut [Vec<Option<ArgumentBinding>>; STORAGE_CLASS_COUNT],
    ) {
        let idx = self.next_integer();
        out[StorageClass::IntegerArgument as usize].push(Some(ArgumentBinding {
            storage: Storage {
                class: StorageClass::IntegerArgument,
                index: idx,
                bits: 64,
            },
            argument: ArgRef::Return,
            offset: 0,
            indirect: true,
        }));
    }

    /// Windows by-reference aggregate: one pointer-carrying slot
    fn alloc_reference(
        &mut self,
        arg: ArgRef,
        out: &mut [Vec<Option<ArgumentBinding>>; STORAGE_CLASS_COUNT],
    ) {
        let fits = if self.abi.shared_register_slots() {
            self.n_integer.max(self.n_vector) < self.abi.integer_budget(self.for_arguments)
        } else {
            self.n_integer < self.abi.integer_budget(self.for_arguments)
        };
        if fits {
            let idx = self.next_integer();
            out[self.integer_class() as usize].push(Some(ArgumentBinding {
                storage: Storage {
                    class: self.integer_class(),
                    index: idx,
                    bits: 64,
                },
                argument: arg,
                offset: 0,
                indirect: true,
            }));
        } else {
            let offset = self.stack_offset;
            out[StorageClass::Stack as usize].push(Some(ArgumentBinding {
                storage: Storage {
                    class: StorageClass::Stack,
                    index: offset,
                    bits: 64,
                },
                argument: arg,
                offset: 0,
                indirect: true,
            }));
            self.stack_offset += 8;
        }
    }

    /// Spill the whole argument to the stack, one slot per eightbyte.
    fn alloc_stack(
        &mut self,
        arg: ArgRef,
        layout: &Layout,
        out: &mut [Vec<Option<ArgumentBinding>>; STORAGE_CLASS_COUNT],
    ) {
        let align = layout.byte_alignment().max(8);
        let aligned = self.stack_offset.next_multiple_of(align);
        while self.stack_offset < aligned {
            // Placeholder keeps stack slot offsets a plain word count
            out[StorageClass::Stack as usize].push(None);
            self.stack_offset += 8;
        }
        let total_bits = layout.bit_size();
        let words = layout.byte_size().div_ceil(8);
        for k in 0..words {
            let bits = (total_bits - k * 64).min(64) as u32;
            out[StorageClass::Stack as usize].push(Some(ArgumentBinding {
                storage: Storage {
                    class: StorageClass::Stack,
                    index: self.stack_offset + k * 8,
                    bits,
                },
                argument: arg,
                offset: k * 8,
                indirect: false,
            }));
        }
        self.stack_offset += words * 8;
    }

    /// Allocate one register per non-continuation class entry.
    fn alloc_registers(
        &mut self,
        arg: ArgRef,
        layout: &Layout,
        classification: &Classification,
        out: &mut [Vec<Option<ArgumentBinding>>; STORAGE_CLASS_COUNT],
    ) -> AbiResult<()> {
        let total_bits = layout.bit_size();
        for (k, class) in classification.classes.iter().enumerate() {
            let slot_bits = (total_bits.saturating_sub(k as u64 * 64)).min(64) as u32;
            match class {
                ArgumentClass::Integer => {
                    let idx = self.next_integer();
                    out[self.integer_class() as usize].push(Some(ArgumentBinding {
                        storage: Storage {
                            class: self.integer_class(),
                            index: idx,
                            bits: slot_bits,
                        },
                        argument: arg,
                        offset: k as u64 * 8,
                        indirect: false,
                    }));
                }
                ArgumentClass::Sse => {
                    let idx = self.next_vector();
                    out[self.vector_class() as usize].push(Some(ArgumentBinding {
                        storage: Storage {
                            class: self.vector_class(),
                            index: idx,
                            bits: slot_bits,
                        },
                        argument: arg,
                        offset: k as u64 * 8,
                        indirect: false,
                    }));
                    // Vararg floats are duplicated into the shadow GPR slot
                    if self.for_arguments && self.variadic && self.abi.variadic_float_shadow() {
                        out[StorageClass::IntegerArgument as usize].push(Some(ArgumentBinding {
                            storage: Storage {
                                class: StorageClass::IntegerArgument,
                                index: idx,
                                bits: slot_bits,
                            },
                            argument: arg,
                            offset: k as u64 * 8,
                            indirect: false,
                        }));
                    }
                }
                ArgumentClass::SseUp => {
                    self.widen_last(self.vector_class(), 512, layout, out)?;
                }
                ArgumentClass::X87 => {
                    let idx = self.n_x87 as u64;
                    self.n_x87 += 1;
                    out[StorageClass::X87Return as usize].push(Some(ArgumentBinding {
                        storage: Storage {
                            class: StorageClass::X87Return,
                            index: idx,
                            bits: slot_bits,
                        },
                        argument: arg,
                        offset: k as u64 * 8,
                        indirect: false,
                    }));
                }
                ArgumentClass::X87Up => {
                    self.widen_last(StorageClass::X87Return, 128, layout, out)?;
                }
                ArgumentClass::NoClass => {}
                ArgumentClass::Memory => {
                    unreachable!("memory classes are diverted to the stack before allocation")
                }
            }
        }
        Ok(())
    }

    /// Continuation classes widen the preceding binding instead of consuming
    /// a register of their own.
    fn widen_last(
        &mut self,
        class: StorageClass,
        max_bits: u32,
        layout: &Layout,
        out: &mut [Vec<Option<ArgumentBinding>>; STORAGE_CLASS_COUNT],
    ) -> AbiResult<()> {
        let binding = out[class as usize]
            .iter_mut()
            .rev()
            .find_map(|b| b.as_mut());
        match binding {
            Some(b) => {
                b.storage.bits += 64;
                if b.storage.bits > max_bits {
                    return Err(AbiError::unsupported(
                        layout,
                        "continuation classes exceed the register width limit",
                    ));
                }
                Ok(())
            }
            None => Err(AbiError::unsupported(
                layout,
                "continuation class without a preceding register",
            )),
        }
    }
}
