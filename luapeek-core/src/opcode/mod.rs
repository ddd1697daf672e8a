//! Lua 5.0 instruction words.
//!
//! Layout (32 bits, least significant first):
//! - bits 0-5: opcode
//! - bits 6-14: C (9 bits)
//! - bits 15-23: B (9 bits)
//! - bits 24-31: A (8 bits)
//!
//! Bx spans B and C (bits 6-23, `B << 9 | C`); sBx is Bx with a bias of
//! [`OFFSET_SBX`].

use std::fmt;

mod disasm;

pub use disasm::disassemble;

const SIZE_OP: u32 = 6;
const SIZE_C: u32 = 9;
const SIZE_B: u32 = 9;
const SIZE_A: u32 = 8;
const SIZE_BX: u32 = SIZE_B + SIZE_C;

const POS_OP: u32 = 0;
const POS_C: u32 = POS_OP + SIZE_OP;
const POS_B: u32 = POS_C + SIZE_C;
const POS_A: u32 = POS_B + SIZE_B;
const POS_BX: u32 = POS_C;

const fn mask(n: u32) -> u32 {
    (1 << n) - 1
}

pub const MAX_A: u32 = mask(SIZE_A); // 255
pub const MAX_B: u32 = mask(SIZE_B); // 511
pub const MAX_C: u32 = mask(SIZE_C); // 511
pub const MAX_BX: u32 = mask(SIZE_BX); // 262143
pub const OFFSET_SBX: i32 = (MAX_BX >> 1) as i32; // 131071
pub const MIN_SBX: i32 = -OFFSET_SBX;
pub const MAX_SBX: i32 = MAX_BX as i32 - OFFSET_SBX; // 131072

/// Operand positions below this index registers (the VM's MAXSTACK).
pub const DEFAULT_REGISTERS: u32 = 250;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    Move = 0,
    LoadK,
    LoadBool,
    LoadNil,
    GetUpval,
    GetGlobal,
    GetTable,
    SetGlobal,
    SetUpval,
    SetTable,
    NewTable,
    Self_,
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Unm,
    Not,
    Concat,
    Jmp,
    Eq,
    Lt,
    Le,
    Test,
    Call,
    TailCall,
    Return,
    ForLoop,
    TForLoop,
    TForPrep,
    SetList,
    SetListO,
    Close,
    Closure,
}

/// How the operand bits after A are split.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Format {
    Abc,
    ABx,
    AsBx,
}

impl OpCode {
    pub const COUNT: u8 = OpCode::Closure as u8 + 1;

    pub fn from_u8(v: u8) -> Option<OpCode> {
        use OpCode::*;
        const ALL: [OpCode; OpCode::COUNT as usize] = [
            Move, LoadK, LoadBool, LoadNil, GetUpval, GetGlobal, GetTable, SetGlobal, SetUpval,
            SetTable, NewTable, Self_, Add, Sub, Mul, Div, Pow, Unm, Not, Concat, Jmp, Eq, Lt, Le,
            Test, Call, TailCall, Return, ForLoop, TForLoop, TForPrep, SetList, SetListO, Close,
            Closure,
        ];
        ALL.get(v as usize).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            OpCode::Move => "MOVE",
            OpCode::LoadK => "LOADK",
            OpCode::LoadBool => "LOADBOOL",
            OpCode::LoadNil => "LOADNIL",
            OpCode::GetUpval => "GETUPVAL",
            OpCode::GetGlobal => "GETGLOBAL",
            OpCode::GetTable => "GETTABLE",
            OpCode::SetGlobal => "SETGLOBAL",
            OpCode::SetUpval => "SETUPVAL",
            OpCode::SetTable => "SETTABLE",
            OpCode::NewTable => "NEWTABLE",
            OpCode::Self_ => "SELF",
            OpCode::Add => "ADD",
            OpCode::Sub => "SUB",
            OpCode::Mul => "MUL",
            OpCode::Div => "DIV",
            OpCode::Pow => "POW",
            OpCode::Unm => "UNM",
            OpCode::Not => "NOT",
            OpCode::Concat => "CONCAT",
            OpCode::Jmp => "JMP",
            OpCode::Eq => "EQ",
            OpCode::Lt => "LT",
            OpCode::Le => "LE",
            OpCode::Test => "TEST",
            OpCode::Call => "CALL",
            OpCode::TailCall => "TAILCALL",
            OpCode::Return => "RETURN",
            OpCode::ForLoop => "FORLOOP",
            OpCode::TForLoop => "TFORLOOP",
            OpCode::TForPrep => "TFORPREP",
            OpCode::SetList => "SETLIST",
            OpCode::SetListO => "SETLISTO",
            OpCode::Close => "CLOSE",
            OpCode::Closure => "CLOSURE",
        }
    }

    pub fn from_name(name: &str) -> Option<OpCode> {
        (0..OpCode::COUNT)
            .filter_map(OpCode::from_u8)
            .find(|op| op.name().eq_ignore_ascii_case(name))
    }

    pub fn format(self) -> Format {
        match self {
            OpCode::LoadK
            | OpCode::GetGlobal
            | OpCode::SetGlobal
            | OpCode::SetList
            | OpCode::SetListO
            | OpCode::Closure => Format::ABx,
            OpCode::Jmp | OpCode::ForLoop | OpCode::TForPrep => Format::AsBx,
            _ => Format::Abc,
        }
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Operands following A. B/C and Bx/sBx share bits, so an instruction names
/// exactly one of the three shapes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operands {
    Abc { b: u32, c: u32 },
    Bx(u32),
    SBx(i32),
}

#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
pub enum EncodeError {
    #[error("{field} = {value} does not fit (allowed {min}..={max})")]
    FieldOverflow {
        field: &'static str,
        value: i64,
        min: i64,
        max: i64,
    },

    #[error("{op} encoded as {word:08X} does not decode back to its fields")]
    RoundTrip { op: OpCode, word: u32 },
}

/// Every field of a word, decoded without regard to its opcode's format.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Fields {
    pub op: u8,
    pub a: u32,
    pub b: u32,
    pub c: u32,
    pub bx: u32,
    pub sbx: i32,
}

/// A 32-bit VM instruction.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Instruction(pub u32);

impl Instruction {
    pub fn decode(word: u32) -> Self {
        Instruction(word)
    }

    /// Packs `op`, `a` and `operands`, then decodes the result and checks it
    /// against the inputs.
    pub fn encode(op: OpCode, a: u32, operands: Operands) -> Result<Self, EncodeError> {
        check("A", a as i64, 0, MAX_A as i64)?;
        let base = (op as u32) << POS_OP | a << POS_A;
        let inst = match operands {
            Operands::Abc { b, c } => {
                check("B", b as i64, 0, MAX_B as i64)?;
                check("C", c as i64, 0, MAX_C as i64)?;
                Instruction(base | b << POS_B | c << POS_C)
            }
            Operands::Bx(bx) => {
                check("Bx", bx as i64, 0, MAX_BX as i64)?;
                Instruction(base | bx << POS_BX)
            }
            Operands::SBx(sbx) => {
                check("sBx", sbx as i64, MIN_SBX as i64, MAX_SBX as i64)?;
                Instruction(base | ((sbx + OFFSET_SBX) as u32) << POS_BX)
            }
        };

        let consistent = inst.opcode() == Some(op)
            && inst.a() == a
            && match operands {
                Operands::Abc { b, c } => inst.b() == b && inst.c() == c,
                Operands::Bx(bx) => inst.bx() == bx,
                Operands::SBx(sbx) => inst.sbx() == sbx,
            };
        if !consistent {
            return Err(EncodeError::RoundTrip { op, word: inst.0 });
        }
        Ok(inst)
    }

    pub fn abc(op: OpCode, a: u32, b: u32, c: u32) -> Result<Self, EncodeError> {
        Self::encode(op, a, Operands::Abc { b, c })
    }

    pub fn abx(op: OpCode, a: u32, bx: u32) -> Result<Self, EncodeError> {
        Self::encode(op, a, Operands::Bx(bx))
    }

    pub fn asbx(op: OpCode, a: u32, sbx: i32) -> Result<Self, EncodeError> {
        Self::encode(op, a, Operands::SBx(sbx))
    }

    pub fn raw_opcode(self) -> u8 {
        ((self.0 >> POS_OP) & mask(SIZE_OP)) as u8
    }

    pub fn opcode(self) -> Option<OpCode> {
        OpCode::from_u8(self.raw_opcode())
    }

    pub fn a(self) -> u32 {
        (self.0 >> POS_A) & mask(SIZE_A)
    }

    pub fn b(self) -> u32 {
        (self.0 >> POS_B) & mask(SIZE_B)
    }

    pub fn c(self) -> u32 {
        (self.0 >> POS_C) & mask(SIZE_C)
    }

    pub fn bx(self) -> u32 {
        (self.0 >> POS_BX) & mask(SIZE_BX)
    }

    pub fn sbx(self) -> i32 {
        self.bx() as i32 - OFFSET_SBX
    }

    pub fn fields(self) -> Fields {
        Fields {
            op: self.raw_opcode(),
            a: self.a(),
            b: self.b(),
            c: self.c(),
            bx: self.bx(),
            sbx: self.sbx(),
        }
    }
}

fn check(field: &'static str, value: i64, min: i64, max: i64) -> Result<(), EncodeError> {
    if value < min || value > max {
        return Err(EncodeError::FieldOverflow {
            field,
            value,
            min,
            max,
        });
    }
    Ok(())
}

impl fmt::Debug for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(op) = self.opcode() else {
            return write!(f, "<<invalid opcode: {:08X}>>", self.0);
        };
        match op.format() {
            Format::Abc => write!(f, "{} A={} B={} C={}", op, self.a(), self.b(), self.c()),
            Format::ABx => write!(f, "{} A={} Bx={}", op, self.a(), self.bx()),
            Format::AsBx => write!(f, "{} A={} sBx={}", op, self.a(), self.sbx()),
        }
    }
}

/// A decoded RK operand.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rk {
    Register(u32),
    Constant(u32),
}

impl Rk {
    pub fn decode(operand: u32, registers: u32) -> Rk {
        if operand < registers {
            Rk::Register(operand)
        } else {
            Rk::Constant(operand - registers)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_positions() {
        let inst = Instruction::abc(OpCode::Call, 3, 2, 1).unwrap();
        assert_eq!(inst.0, 0x0301_0059);
        assert_eq!(inst.opcode(), Some(OpCode::Call));
        assert_eq!((inst.a(), inst.b(), inst.c()), (3, 2, 1));
        assert_eq!(inst.bx(), 2 << 9 | 1);
    }

    #[test]
    fn decode_masks() {
        let word = 0xFFFF_FFFF;
        let fields = Instruction::decode(word).fields();
        assert_eq!(fields.op, 0x3F);
        assert_eq!(fields.a, 0xFF);
        assert_eq!(fields.b, 0x1FF);
        assert_eq!(fields.c, 0x1FF);
        assert_eq!(fields.bx, MAX_BX);
        assert_eq!(fields.sbx, MAX_SBX);
    }

    #[test]
    fn signed_bias() {
        assert_eq!(Instruction::asbx(OpCode::Jmp, 0, 0).unwrap().bx(), 131071);
        assert_eq!(Instruction::asbx(OpCode::Jmp, 0, -3).unwrap().sbx(), -3);
        assert_eq!(Instruction::asbx(OpCode::Jmp, 0, MIN_SBX).unwrap().bx(), 0);
        assert_eq!(Instruction::asbx(OpCode::Jmp, 0, MAX_SBX).unwrap().bx(), MAX_BX);
    }

    #[test]
    fn overflow_is_rejected() {
        assert!(matches!(
            Instruction::abc(OpCode::Move, 256, 0, 0),
            Err(EncodeError::FieldOverflow { field: "A", .. })
        ));
        assert!(matches!(
            Instruction::abc(OpCode::Move, 0, 512, 0),
            Err(EncodeError::FieldOverflow { field: "B", .. })
        ));
        assert!(matches!(
            Instruction::abx(OpCode::LoadK, 0, MAX_BX + 1),
            Err(EncodeError::FieldOverflow { field: "Bx", .. })
        ));
        assert!(matches!(
            Instruction::asbx(OpCode::Jmp, 0, MAX_SBX + 1),
            Err(EncodeError::FieldOverflow { field: "sBx", .. })
        ));
        assert!(Instruction::asbx(OpCode::Jmp, 0, MIN_SBX - 1).is_err());
    }

    #[test]
    fn opcode_table() {
        assert_eq!(OpCode::COUNT, 35);
        for v in 0..OpCode::COUNT {
            let op = OpCode::from_u8(v).unwrap();
            assert_eq!(op as u8, v);
            assert_eq!(OpCode::from_name(op.name()), Some(op));
        }
        assert_eq!(OpCode::from_u8(35), None);
        assert_eq!(OpCode::from_name("return"), Some(OpCode::Return));
    }

    #[test]
    fn rk_split() {
        assert_eq!(Rk::decode(0, DEFAULT_REGISTERS), Rk::Register(0));
        assert_eq!(Rk::decode(249, DEFAULT_REGISTERS), Rk::Register(249));
        assert_eq!(Rk::decode(250, DEFAULT_REGISTERS), Rk::Constant(0));
        assert_eq!(Rk::decode(300, DEFAULT_REGISTERS), Rk::Constant(50));
        assert_eq!(Rk::decode(10, 8), Rk::Constant(2));
    }

    #[test]
    fn debug_shows_named_fields() {
        let inst = Instruction::abc(OpCode::Return, 1, 2, 0).unwrap();
        assert_eq!(format!("{:?}", inst), "RETURN A=1 B=2 C=0");
        assert_eq!(format!("{:?}", Instruction(0x3F)), "<<invalid opcode: 0000003F>>");
    }
}
