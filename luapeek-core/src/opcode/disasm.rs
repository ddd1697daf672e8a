use super::{Instruction, OpCode, Rk};
use crate::value::Value;

/// Renders one instruction as a line of text.
///
/// `constants` is the owning prototype's constant pool and `registers` its RK
/// register limit. `pc` is the instruction's own index, used to print jump
/// targets as absolute positions. Constant indices outside the pool render as
/// `k{n} (?)`.
pub fn disassemble(inst: Instruction, constants: &[Value], registers: u32, pc: u32) -> String {
    let Some(op) = inst.opcode() else {
        return format!("<<invalid opcode: {:08X}>>", inst.0);
    };

    let (a, b, c) = (inst.a(), inst.b(), inst.c());
    let (ai, bi, ci) = (a as i64, b as i64, c as i64);
    let bx = inst.bx();
    let sbx = inst.sbx();
    let target = pc as i64 + sbx as i64 + 1;
    let kst = |index: u32| match constants.get(index as usize) {
        Some(value) => format!("k{} ({})", index, value),
        None => format!("k{} (?)", index),
    };
    let rk = |operand: u32| match Rk::decode(operand, registers) {
        Rk::Register(r) => format!("r{}", r),
        Rk::Constant(k) => kst(k),
    };

    let operands = match op {
        OpCode::Move => format!("r{} := r{}", a, b),
        OpCode::LoadK => format!("r{} := {}", a, kst(bx)),
        OpCode::LoadBool => {
            let skip = if c != 0 {
                format!(" ; br {}", pc + 2)
            } else {
                String::new()
            };
            format!("r{} := {}{}", a, b != 0, skip)
        }
        OpCode::LoadNil => format!("r{} ... r{}", a, b),
        OpCode::GetUpval => format!("r{} := u{}", a, b),
        OpCode::GetGlobal => format!("r{} := _G[{}]", a, kst(bx)),
        OpCode::GetTable => format!("r{} := r{}[{}]", a, b, rk(c)),
        OpCode::SetGlobal => format!("r{} ->> _G[{}]", a, kst(bx)),
        OpCode::SetUpval => format!("r{} ->> u{}", a, b),
        OpCode::SetTable => format!("{} ->> r{}[{}]", rk(c), a, rk(b)),
        OpCode::NewTable => format!("r{} := {{}} (#a={}, #h={})", a, b, c),
        OpCode::Self_ => format!("r{} := r{} ; r{} := r{}[{}]", a + 1, b, a, b, rk(c)),
        OpCode::Add | OpCode::Sub | OpCode::Mul | OpCode::Div | OpCode::Pow => {
            let sym = match op {
                OpCode::Add => "+",
                OpCode::Sub => "-",
                OpCode::Mul => "*",
                OpCode::Div => "/",
                _ => "^",
            };
            format!("r{} := {} {} {}", a, rk(b), sym, rk(c))
        }
        OpCode::Unm => format!("r{} := -r{}", a, b),
        OpCode::Not => format!("r{} := not r{}", a, b),
        OpCode::Concat => format!("r{} := r{} ... r{}", a, b, c),
        OpCode::Jmp => format!("{:+} ; {}", sbx, target),
        // A selects the sense of the comparison; a failed test skips the next
        // instruction.
        OpCode::Eq | OpCode::Lt | OpCode::Le => {
            let sym = match (op, a != 0) {
                (OpCode::Eq, true) => "==",
                (OpCode::Eq, false) => "!=",
                (OpCode::Lt, true) => "<",
                (OpCode::Lt, false) => ">=",
                (_, true) => "<=",
                (_, false) => ">",
            };
            format!("{} {} {} ; else br {}", rk(b), sym, rk(c), pc + 2)
        }
        OpCode::Test => format!(
            "{}r{} : r{} := r{}",
            if c != 0 { "" } else { "not " },
            b,
            a,
            b
        ),
        OpCode::Call => format!("r{} ({} args) => {} results", a, bi - 1, ci - 1),
        OpCode::TailCall => format!("r{} ({} args)", a, bi - 1),
        OpCode::Return => format!("r{} ... r{}", a, ai + bi - 2),
        OpCode::ForLoop => format!(
            "r{} := r{}; if r{} <= r{} JMP {:+} ; {}",
            a,
            a + 2,
            a,
            a + 1,
            sbx,
            target
        ),
        OpCode::TForLoop => format!(
            "r{} ... r{} := r{}(r{}, r{})",
            a + 2,
            ai + 2 + ci,
            a,
            a + 1,
            a + 2
        ),
        OpCode::TForPrep => format!("r{} ; JMP {:+} ; {}", a, sbx, target),
        OpCode::SetList | OpCode::SetListO => format!("r{} [{}]", a, bx),
        OpCode::Close => format!("r{} ...", a),
        OpCode::Closure => format!("r{} := closure({}, r{}...)", a, bx, a),
    };

    format!("{:>9} {}", op.name(), operands)
}
