use std::io;

use crate::protocol::Opcode;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("i/o error talking to target: {0}")]
    Io(#[from] io::Error),

    #[error("{opcode:?} at 0x{address:08X} failed with status 0x{status:02X}")]
    Status {
        opcode: Opcode,
        address: u32,
        status: u8,
    },

    #[error("{opcode:?} reply carries {got} payload bytes, expected {expected}")]
    Malformed {
        opcode: Opcode,
        expected: usize,
        got: usize,
    },

    #[error("{opcode:?} string reply declares {declared} bytes but carries {got}")]
    StringLength {
        opcode: Opcode,
        declared: usize,
        got: usize,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
