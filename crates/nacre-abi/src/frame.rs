//! Generic invocation frame
//!
//! A `CallFrame` is the register-shadow image of one call: fixed-width cells
//! per storage class plus the outgoing stack argument bytes. The marshaller
//! copies values between `Value`s and these cells; a trampoline moves the
//! cells into real registers (or, for the in-tree fallback path, the bridge
//! bypasses frames entirely).

use crate::error::{AbiError, AbiResult};
use crate::storage::{CallingSequence, Storage, StorageClass};

/// Bytes per vector register cell (up to 512-bit)
const VECTOR_CELL_BYTES: usize = 64;
/// Bytes per x87 register cell (80-bit value in a 16-byte slot)
const X87_CELL_BYTES: usize = 16;

/// Mutable register-shadow storage for one invocation.
pub struct CallFrame {
    integer_arguments: Vec<[u8; 8]>,
    integer_returns: Vec<[u8; 8]>,
    vector_arguments: Vec<[u8; VECTOR_CELL_BYTES]>,
    vector_returns: Vec<[u8; VECTOR_CELL_BYTES]>,
    x87_returns: Vec<[u8; X87_CELL_BYTES]>,
    stack: Vec<u8>,
}

impl CallFrame {
    /// A zeroed frame sized to hold every binding of a sequence.
    pub fn for_sequence(sequence: &CallingSequence) -> Self {
        let cells = |class: StorageClass| {
            sequence
                .iter_bindings(class)
                .map(|b| b.storage.index as usize + 1)
                .max()
                .unwrap_or(0)
        };
        Self {
            integer_arguments: vec![[0; 8]; cells(StorageClass::IntegerArgument)],
            integer_returns: vec![[0; 8]; cells(StorageClass::IntegerReturn)],
            vector_arguments: vec![[0; VECTOR_CELL_BYTES]; cells(StorageClass::VectorArgument)],
            vector_returns: vec![[0; VECTOR_CELL_BYTES]; cells(StorageClass::VectorReturn)],
            x87_returns: vec![[0; X87_CELL_BYTES]; cells(StorageClass::X87Return)],
            stack: vec![0; sequence.stack_bytes() as usize],
        }
    }

    fn cell(&self, storage: &Storage) -> AbiResult<&[u8]> {
        let index = storage.index as usize;
        let cell: Option<&[u8]> = match storage.class {
            StorageClass::IntegerArgument => self.integer_arguments.get(index).map(|c| &c[..]),
            StorageClass::IntegerReturn => self.integer_returns.get(index).map(|c| &c[..]),
            StorageClass::VectorArgument => self.vector_arguments.get(index).map(|c| &c[..]),
            StorageClass::VectorReturn => self.vector_returns.get(index).map(|c| &c[..]),
            StorageClass::X87Return => self.x87_returns.get(index).map(|c| &c[..]),
            StorageClass::Stack => {
                let len = Self::payload_len(storage);
                self.stack.get(index..index + len)
            }
        };
        cell.ok_or_else(|| storage_out_of_frame(storage))
    }

    fn cell_mut(&mut self, storage: &Storage) -> AbiResult<&mut [u8]> {
        let index = storage.index as usize;
        let cell: Option<&mut [u8]> = match storage.class {
            StorageClass::IntegerArgument => {
                self.integer_arguments.get_mut(index).map(|c| &mut c[..])
            }
            StorageClass::IntegerReturn => self.integer_returns.get_mut(index).map(|c| &mut c[..]),
            StorageClass::VectorArgument => {
                self.vector_arguments.get_mut(index).map(|c| &mut c[..])
            }
            StorageClass::VectorReturn => self.vector_returns.get_mut(index).map(|c| &mut c[..]),
            StorageClass::X87Return => self.x87_returns.get_mut(index).map(|c| &mut c[..]),
            StorageClass::Stack => {
                let len = Self::payload_len(storage);
                self.stack.get_mut(index..index + len)
            }
        };
        cell.ok_or_else(|| storage_out_of_frame(storage))
    }

    fn payload_len(storage: &Storage) -> usize {
        (storage.bits as usize).div_ceil(8)
    }

    /// The payload bytes of one storage slot.
    pub fn slot(&self, storage: &Storage) -> AbiResult<&[u8]> {
        let len = Self::payload_len(storage);
        let cell = self.cell(storage)?;
        cell.get(..len).ok_or_else(|| storage_out_of_frame(storage))
    }

    /// Mutable payload bytes of one storage slot.
    pub fn slot_mut(&mut self, storage: &Storage) -> AbiResult<&mut [u8]> {
        let len = Self::payload_len(storage);
        let cell = self.cell_mut(storage)?;
        cell.get_mut(..len)
            .ok_or_else(|| storage_out_of_frame(storage))
    }

    /// Read a slot as a little-endian u64 (address and integer slots)
    pub fn read_u64(&self, storage: &Storage) -> AbiResult<u64> {
        let bytes = self.slot(storage)?;
        let mut word = [0u8; 8];
        word[..bytes.len().min(8)].copy_from_slice(&bytes[..bytes.len().min(8)]);
        Ok(u64::from_le_bytes(word))
    }

    /// Write a u64 into a slot (address and integer slots)
    pub fn write_u64(&mut self, storage: &Storage, value: u64) -> AbiResult<()> {
        let bytes = self.slot_mut(storage)?;
        let word = value.to_le_bytes();
        let len = bytes.len().min(8);
        bytes[..len].copy_from_slice(&word[..len]);
        Ok(())
    }

    /// The outgoing stack argument bytes
    pub fn stack(&self) -> &[u8] {
        &self.stack
    }
}

fn storage_out_of_frame(storage: &Storage) -> AbiError {
    AbiError::Access(format!(
        "storage {:?}[{}] not present in this frame",
        storage.class, storage.index
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::Abi;
    use crate::builder::CallingSequenceBuilder;
    use nacre_layout::parse_signature;

    #[test]
    fn test_frame_sized_from_sequence() {
        let sig = parse_signature("(i64f64i64)i32").unwrap();
        let seq = CallingSequenceBuilder::for_signature(Abi::SysV, &sig)
            .build()
            .unwrap();
        let mut frame = CallFrame::for_sequence(&seq);

        let storage = Storage {
            class: StorageClass::IntegerArgument,
            index: 1,
            bits: 64,
        };
        frame.write_u64(&storage, 0xdead_beef).unwrap();
        assert_eq!(frame.read_u64(&storage).unwrap(), 0xdead_beef);

        let missing = Storage {
            class: StorageClass::IntegerArgument,
            index: 5,
            bits: 64,
        };
        assert!(frame.slot(&missing).is_err());
    }

    #[test]
    fn test_stack_slots_are_byte_addressed() {
        let sig = parse_signature("(i64i64i64i64i64i64i64i64)v").unwrap();
        let seq = CallingSequenceBuilder::for_signature(Abi::SysV, &sig)
            .build()
            .unwrap();
        assert_eq!(seq.stack_bytes(), 16);
        let mut frame = CallFrame::for_sequence(&seq);
        let storage = Storage {
            class: StorageClass::Stack,
            index: 8,
            bits: 64,
        };
        frame.write_u64(&storage, 42).unwrap();
        assert_eq!(&frame.stack()[8..16], &42u64.to_le_bytes());
    }
}
