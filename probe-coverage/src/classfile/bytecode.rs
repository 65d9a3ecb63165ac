// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::BTreeSet;

use super::{ClassFormatError, Reader};

pub mod opcode {
    pub const IFEQ: u8 = 0x99;
    pub const IF_ACMPNE: u8 = 0xa6;
    pub const GOTO: u8 = 0xa7;
    pub const JSR: u8 = 0xa8;
    pub const RET: u8 = 0xa9;
    pub const TABLESWITCH: u8 = 0xaa;
    pub const LOOKUPSWITCH: u8 = 0xab;
    pub const IRETURN: u8 = 0xac;
    pub const RETURN: u8 = 0xb1;
    pub const INVOKEVIRTUAL: u8 = 0xb6;
    pub const INVOKESPECIAL: u8 = 0xb7;
    pub const INVOKESTATIC: u8 = 0xb8;
    pub const INVOKEINTERFACE: u8 = 0xb9;
    pub const ATHROW: u8 = 0xbf;
    pub const WIDE: u8 = 0xc4;
    pub const IINC: u8 = 0x84;
    pub const IFNULL: u8 = 0xc6;
    pub const IFNONNULL: u8 = 0xc7;
    pub const GOTO_W: u8 = 0xc8;
    pub const JSR_W: u8 = 0xc9;
}

/// Decoded bytecode instruction.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Insn {
    pub offset: u32,
    pub opcode: u8,
    pub kind: InsnKind,
}

/// Control-flow class of an instruction. Targets are absolute bytecode offsets.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum InsnKind {
    Plain,

    /// `invokevirtual`, `invokespecial`, `invokestatic` or `invokeinterface`.
    /// `invokedynamic` is `Plain`.
    Invoke,

    Return,
    Throw,

    /// Conditional jump, falls through when not taken.
    Jump { target: u32 },

    Goto { target: u32 },

    /// `targets` are in table order and may repeat.
    Switch { default: u32, targets: Vec<u32> },
}

impl InsnKind {
    /// Branch targets of this instruction, in encounter order.
    pub fn targets(&self) -> Vec<u32> {
        match self {
            InsnKind::Jump { target } | InsnKind::Goto { target } => vec![*target],
            InsnKind::Switch { default, targets } => {
                let mut all = vec![*default];
                all.extend(targets.iter().copied());
                all
            }
            _ => vec![],
        }
    }

    /// Returns `true` if execution can continue with the next instruction.
    pub fn falls_through(&self) -> bool {
        !matches!(
            self,
            InsnKind::Return | InsnKind::Throw | InsnKind::Goto { .. } | InsnKind::Switch { .. }
        )
    }
}

/// Length of fixed-size instructions, including the opcode byte.
fn fixed_length(opcode: u8) -> Option<usize> {
    let len = match opcode {
        0x00..=0x0f => 1,
        0x10 => 2,
        0x11 => 3,
        0x12 => 2,
        0x13 | 0x14 => 3,
        0x15..=0x19 => 2,
        0x1a..=0x35 => 1,
        0x36..=0x3a => 2,
        0x3b..=0x83 => 1,
        0x84 => 3,
        0x85..=0x98 => 1,
        0x99..=0xa8 => 3,
        0xa9 => 2,
        0xac..=0xb1 => 1,
        0xb2..=0xb8 => 3,
        0xb9 | 0xba => 5,
        0xbb => 3,
        0xbc => 2,
        0xbd => 3,
        0xbe | 0xbf => 1,
        0xc0 | 0xc1 => 3,
        0xc2 | 0xc3 => 1,
        0xc5 => 4,
        0xc6 | 0xc7 => 3,
        0xc8 | 0xc9 => 5,
        _ => return None,
    };

    Some(len)
}

pub fn decode(code: &[u8]) -> Result<Vec<Insn>, ClassFormatError> {
    use opcode::*;

    let mut reader = Reader::new(code);
    let mut insns = vec![];

    while reader.position() < code.len() {
        let offset = reader.position() as u32;
        let opcode = reader.u8()?;

        let kind = match opcode {
            JSR | JSR_W | RET => return Err(ClassFormatError::Subroutine(offset)),
            IFEQ..=IF_ACMPNE | IFNULL | IFNONNULL => {
                let target = branch_target(code, offset, reader.i16()? as i32)?;
                InsnKind::Jump { target }
            }
            GOTO => {
                let target = branch_target(code, offset, reader.i16()? as i32)?;
                InsnKind::Goto { target }
            }
            GOTO_W => {
                let target = branch_target(code, offset, reader.i32()?)?;
                InsnKind::Goto { target }
            }
            TABLESWITCH | LOOKUPSWITCH => {
                // Operands are 4-byte aligned relative to the start of the code.
                let padding = (4 - reader.position() % 4) % 4;
                reader.skip(padding)?;

                let default = branch_target(code, offset, reader.i32()?)?;
                let mut targets = vec![];

                if opcode == TABLESWITCH {
                    let low = reader.i32()? as i64;
                    let high = reader.i32()? as i64;
                    if high < low {
                        return Err(ClassFormatError::Truncated(reader.position()));
                    }

                    for _ in low..=high {
                        targets.push(branch_target(code, offset, reader.i32()?)?);
                    }
                } else {
                    let pairs = reader.i32()?;
                    if pairs < 0 {
                        return Err(ClassFormatError::Truncated(reader.position()));
                    }

                    for _ in 0..pairs {
                        let _key = reader.i32()?;
                        targets.push(branch_target(code, offset, reader.i32()?)?);
                    }
                }

                InsnKind::Switch { default, targets }
            }
            WIDE => {
                let modified = reader.u8()?;
                match modified {
                    RET => return Err(ClassFormatError::Subroutine(offset)),
                    IINC => reader.skip(4)?,
                    0x15..=0x19 | 0x36..=0x3a => reader.skip(2)?,
                    _ => {
                        return Err(ClassFormatError::UnknownOpcode {
                            opcode: modified,
                            offset,
                        })
                    }
                }
                InsnKind::Plain
            }
            _ => {
                let len = fixed_length(opcode)
                    .ok_or(ClassFormatError::UnknownOpcode { opcode, offset })?;
                reader.skip(len - 1)?;

                match opcode {
                    INVOKEVIRTUAL..=INVOKEINTERFACE => InsnKind::Invoke,
                    IRETURN..=RETURN => InsnKind::Return,
                    ATHROW => InsnKind::Throw,
                    _ => InsnKind::Plain,
                }
            }
        };

        insns.push(Insn {
            offset,
            opcode,
            kind,
        });
    }

    check_targets(&insns)?;

    Ok(insns)
}

fn branch_target(code: &[u8], offset: u32, relative: i32) -> Result<u32, ClassFormatError> {
    let target = offset as i64 + relative as i64;

    if target < 0 || target >= code.len() as i64 {
        return Err(ClassFormatError::InvalidBranchTarget { offset, target });
    }

    Ok(target as u32)
}

// Every target must be the start of an instruction.
fn check_targets(insns: &[Insn]) -> Result<(), ClassFormatError> {
    let starts: BTreeSet<u32> = insns.iter().map(|insn| insn.offset).collect();

    for insn in insns {
        for target in insn.kind.targets() {
            if !starts.contains(&target) {
                return Err(ClassFormatError::InvalidBranchTarget {
                    offset: insn.offset,
                    target: target as i64,
                });
            }
        }
    }

    Ok(())
}
