use crate::opcode::EncodeError;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("transport: {0}")]
    Transport(#[from] luapeek_pine::Error),

    #[error("probe {probe} failed: 0x{address:08X} holds 0x{value:08X}")]
    NotSafe {
        probe: usize,
        address: u32,
        value: u32,
    },

    #[error("unknown type tag 0x{tag:X} at 0x{address:08X}")]
    UnknownTag { address: u32, tag: u32 },

    #[error("instruction encoding: {0}")]
    Encode(#[from] EncodeError),

    #[error("patch out of range: {start}+{len} exceeds {size} instructions")]
    PatchOutOfRange { start: u32, len: u32, size: u32 },

    #[error("constant k{index} out of range: prototype has {size}")]
    ConstantOutOfRange { index: u32, size: u32 },

    #[error("closure at 0x{address:08X} is native and has no bytecode")]
    NativeClosure { address: u32 },

    #[error("type mismatch at 0x{address:08X}: slot holds {slot}, value is {value}")]
    TypeMismatch {
        address: u32,
        slot: &'static str,
        value: &'static str,
    },

    #[error("{len} bytes do not fit in string at 0x{address:08X} of length {capacity}")]
    StringTooLong {
        address: u32,
        len: usize,
        capacity: u32,
    },

    #[error("handle {name:?} cannot be resolved in the current execution context")]
    HandleUnresolved { name: String },

    #[error("object at 0x{address:08X} is not a thread")]
    NotAThread { address: u32 },

    #[error("0x{address:08X} + 0x{offset:X} runs past the end of the address space")]
    AddressOverflow { address: u32, offset: u32 },
}

impl Error {
    /// Conditions that clear up on their own once the target settles, torn
    /// pointers included.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Transport(_)
                | Error::NotSafe { .. }
                | Error::HandleUnresolved { .. }
                | Error::NotAThread { .. }
                | Error::AddressOverflow { .. }
        )
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
