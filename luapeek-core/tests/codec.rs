use luapeek_core::opcode::{
    disassemble, Instruction, OpCode, Operands, Rk, MAX_A, MAX_B, MAX_BX, MAX_C, MAX_SBX, MIN_SBX,
};
use luapeek_core::Value;
use pretty_assertions::assert_eq;

const REGISTERS: u32 = 250;

fn line(op: OpCode, a: u32, operands: Operands, constants: &[Value], pc: u32) -> anyhow::Result<String> {
    let inst = Instruction::encode(op, a, operands)?;
    Ok(disassemble(inst, constants, REGISTERS, pc))
}

#[test]
fn encode_decode_laws() -> anyhow::Result<()> {
    for v in 0..OpCode::COUNT {
        let op = OpCode::from_u8(v).unwrap();
        for a in [0, 1, 127, 255] {
            for (b, c) in [(0, 0), (1, 511), (511, 1), (250, 300)] {
                let inst = Instruction::abc(op, a, b, c)?;
                assert_eq!(inst.opcode(), Some(op));
                assert_eq!((inst.a(), inst.b(), inst.c()), (a, b, c));
                assert_eq!(inst.bx(), b << 9 | c);
            }
            for bx in [0, 1, 131071, MAX_BX] {
                let inst = Instruction::abx(op, a, bx)?;
                assert_eq!((inst.a(), inst.bx()), (a, bx));
            }
            for sbx in [MIN_SBX, -1, 0, 1, MAX_SBX] {
                let inst = Instruction::asbx(op, a, sbx)?;
                assert_eq!(inst.sbx(), sbx);
                assert_eq!(inst.bx() as i32, sbx + 131071);
            }
        }
    }
    Ok(())
}

#[test]
fn every_operand_value_survives_encoding() -> anyhow::Result<()> {
    for bx in 0..=MAX_BX {
        let inst = Instruction::abx(OpCode::LoadK, 7, bx)?;
        assert_eq!(inst.opcode(), Some(OpCode::LoadK));
        assert_eq!((inst.a(), inst.bx()), (7, bx));
    }
    for sbx in MIN_SBX..=MAX_SBX {
        let inst = Instruction::asbx(OpCode::Jmp, 0, sbx)?;
        assert_eq!(inst.opcode(), Some(OpCode::Jmp));
        assert_eq!(inst.sbx(), sbx);
    }
    for a in 0..=MAX_A {
        for b in [0, 1, 255, 256, MAX_B - 1, MAX_B] {
            for c in [0, 1, 255, 256, MAX_C - 1, MAX_C] {
                let inst = Instruction::abc(OpCode::Call, a, b, c)?;
                assert_eq!(inst.opcode(), Some(OpCode::Call));
                assert_eq!((inst.a(), inst.b(), inst.c()), (a, b, c));
            }
        }
    }

    assert!(Instruction::abx(OpCode::LoadK, 0, MAX_BX + 1).is_err());
    assert!(Instruction::asbx(OpCode::Jmp, 0, MIN_SBX - 1).is_err());
    assert!(Instruction::asbx(OpCode::Jmp, 0, MAX_SBX + 1).is_err());
    assert!(Instruction::abc(OpCode::Call, MAX_A + 1, 0, 0).is_err());
    assert!(Instruction::abc(OpCode::Call, 0, MAX_B + 1, 0).is_err());
    assert!(Instruction::abc(OpCode::Call, 0, 0, MAX_C + 1).is_err());
    Ok(())
}

#[test]
fn rk_operands_in_arithmetic() -> anyhow::Result<()> {
    assert_eq!(Rk::decode(3, REGISTERS), Rk::Register(3));
    assert_eq!(Rk::decode(252, REGISTERS), Rk::Constant(2));

    let constants = [Value::Number(1.0), Value::Number(2.0), Value::Number(0.5)];
    assert_eq!(
        line(OpCode::Add, 0, Operands::Abc { b: 3, c: 252 }, &constants, 0)?,
        "      ADD r0 := r3 + k2 (0.5)"
    );
    assert_eq!(
        line(OpCode::GetTable, 1, Operands::Abc { b: 0, c: 400 }, &constants, 0)?,
        " GETTABLE r1 := r0[k150 (?)]"
    );
    Ok(())
}

#[test]
fn disassembly_lines() -> anyhow::Result<()> {
    let constants = [Value::Boolean(true), Value::Number(42.0)];
    let cases = [
        (OpCode::Move, 1, Operands::Abc { b: 2, c: 0 }, 0, "     MOVE r1 := r2"),
        (OpCode::LoadK, 0, Operands::Bx(1), 0, "    LOADK r0 := k1 (42)"),
        (OpCode::LoadBool, 0, Operands::Abc { b: 1, c: 1 }, 5, " LOADBOOL r0 := true ; br 7"),
        (OpCode::LoadNil, 0, Operands::Abc { b: 3, c: 0 }, 0, "  LOADNIL r0 ... r3"),
        (OpCode::GetGlobal, 2, Operands::Bx(0), 0, "GETGLOBAL r2 := _G[k0 (true)]"),
        (OpCode::SetGlobal, 2, Operands::Bx(0), 0, "SETGLOBAL r2 ->> _G[k0 (true)]"),
        (OpCode::NewTable, 0, Operands::Abc { b: 2, c: 1 }, 0, " NEWTABLE r0 := {} (#a=2, #h=1)"),
        (OpCode::Jmp, 0, Operands::SBx(-3), 10, "      JMP -3 ; 8"),
        (OpCode::Jmp, 0, Operands::SBx(2), 10, "      JMP +2 ; 13"),
        (OpCode::Eq, 1, Operands::Abc { b: 0, c: 251 }, 4, "       EQ r0 == k1 (42) ; else br 6"),
        (OpCode::Lt, 0, Operands::Abc { b: 0, c: 1 }, 4, "       LT r0 >= r1 ; else br 6"),
        (OpCode::Test, 0, Operands::Abc { b: 1, c: 0 }, 0, "     TEST not r1 : r0 := r1"),
        (OpCode::Call, 0, Operands::Abc { b: 2, c: 1 }, 0, "     CALL r0 (1 args) => 0 results"),
        (OpCode::Return, 1, Operands::Abc { b: 2, c: 0 }, 0, "   RETURN r1 ... r1"),
        (OpCode::Closure, 3, Operands::Bx(0), 0, "  CLOSURE r3 := closure(0, r3...)"),
    ];

    for (op, a, operands, pc, expected) in cases {
        assert_eq!(line(op, a, operands, &constants, pc)?, expected);
    }
    Ok(())
}

#[test]
fn unknown_opcode_renders_raw_word() {
    assert_eq!(
        disassemble(Instruction::decode(0x0100_0023), &[], REGISTERS, 0),
        "<<invalid opcode: 01000023>>"
    );
}
