use strata_ir::{Arch, BasicBlock, IrInst, IrOp};
use tracing::debug;

use crate::{in_bounds, read_le, read_u8, BlockDecoder, BlockLimits, DecodeError};

/// Decoder for the variable-length native ISA (x86 subset).
///
/// Covers just enough of the 32-bit encoding space for block formation:
/// stack pushes, immediate moves, accumulator ALU forms, register-register
/// ADD/SUB, relative jumps/calls, and RET. Everything else lowers to a
/// one-byte no-op so decoding always makes progress.
#[derive(Debug, Default, Clone, Copy)]
pub struct X86Decoder;

impl BlockDecoder for X86Decoder {
    fn arch(&self) -> Arch {
        Arch::X86
    }

    fn decode_block(
        &self,
        buf: &[u8],
        offset: usize,
        address: u64,
        limits: BlockLimits,
    ) -> Result<BasicBlock, DecodeError> {
        let mut block = BasicBlock::empty(address);
        let mut off = offset;
        let mut addr = address;
        let mut terminated = false;

        while !terminated
            && off < buf.len()
            && block.insts.len() < limits.max_insts
            && (addr - address) < limits.max_bytes as u64
        {
            let id = block.insts.len() as u32;
            let opcode = buf[off];

            let inst = match opcode {
                0x90 => IrInst::new(id, IrOp::Nop, addr, 1),
                // PUSH imm8 / imm32.
                0x6a => match read_u8(buf, off + 1) {
                    Some(imm) => IrInst::new(id, IrOp::Push, addr, 2)
                        .with_operands(imm as i8 as i64 as u64, 0),
                    None => truncated(id, addr, buf.len() - off),
                },
                0x68 => match read_le(buf, off + 1, 4) {
                    Some(imm) => IrInst::new(id, IrOp::Push, addr, 5)
                        .with_operands(imm as u32 as i32 as i64 as u64, 0),
                    None => truncated(id, addr, buf.len() - off),
                },
                // PUSH/POP r32: the register operand is not a constant, so
                // these lower to stack traffic against the register file.
                0x50..=0x57 => {
                    IrInst::new(id, IrOp::Load, addr, 1).with_operands(u64::from(opcode - 0x50), 0)
                }
                0x58..=0x5f => {
                    IrInst::new(id, IrOp::Store, addr, 1).with_operands(u64::from(opcode - 0x58), 0)
                }
                // MOV r32, imm32.
                0xb8..=0xbf => match read_le(buf, off + 1, 4) {
                    Some(imm) => IrInst::new(id, IrOp::Mov, addr, 5)
                        .with_operands(u64::from(opcode - 0xb8), imm),
                    None => truncated(id, addr, buf.len() - off),
                },
                // ADD/SUB eax, imm32.
                0x05 | 0x2d => match read_le(buf, off + 1, 4) {
                    Some(imm) => {
                        let op = if opcode == 0x05 { IrOp::Add } else { IrOp::Sub };
                        IrInst::new(id, op, addr, 5).with_operands(0, imm)
                    }
                    None => truncated(id, addr, buf.len() - off),
                },
                // ADD/SUB r/m32, r32: register forms only; memory forms are
                // outside the subset and lower to a no-op of the right width.
                0x01 | 0x29 => match read_u8(buf, off + 1) {
                    Some(modrm) if modrm >> 6 == 0b11 => {
                        let op = if opcode == 0x01 { IrOp::Add } else { IrOp::Sub };
                        IrInst::new(id, op, addr, 2)
                            .with_operands(u64::from(modrm & 0x7), u64::from((modrm >> 3) & 0x7))
                    }
                    Some(_) => {
                        debug!(address = addr, opcode, "unsupported modrm form; lowering to nop");
                        IrInst::new(id, IrOp::Nop, addr, 2)
                    }
                    None => truncated(id, addr, buf.len() - off),
                },
                // JMP rel8 / rel32.
                0xeb => match read_u8(buf, off + 1) {
                    Some(rel) => {
                        let target = (addr + 2).wrapping_add(rel as i8 as i64 as u64);
                        terminated = true;
                        block.successors.insert(target);
                        IrInst::new(id, IrOp::Jump, addr, 2).with_operands(target, 0)
                    }
                    None => truncated(id, addr, buf.len() - off),
                },
                0xe9 => match read_le(buf, off + 1, 4) {
                    Some(rel) => {
                        let target = (addr + 5).wrapping_add(rel as u32 as i32 as i64 as u64);
                        terminated = true;
                        block.successors.insert(target);
                        IrInst::new(id, IrOp::Jump, addr, 5).with_operands(target, 0)
                    }
                    None => truncated(id, addr, buf.len() - off),
                },
                // JZ/JNZ rel8.
                0x74 | 0x75 => match read_u8(buf, off + 1) {
                    Some(rel) => {
                        let fall = addr + 2;
                        let target = fall.wrapping_add(rel as i8 as i64 as u64);
                        terminated = true;
                        block.successors.insert(target);
                        if in_bounds(buf, offset, address, fall) {
                            block.successors.insert(fall);
                        }
                        IrInst::new(id, IrOp::Branch, addr, 2).with_operands(target, fall)
                    }
                    None => truncated(id, addr, buf.len() - off),
                },
                // CALL rel32.
                0xe8 => match read_le(buf, off + 1, 4) {
                    Some(rel) => {
                        let ret = addr + 5;
                        let target = ret.wrapping_add(rel as u32 as i32 as i64 as u64);
                        terminated = true;
                        block.successors.insert(target);
                        if in_bounds(buf, offset, address, ret) {
                            block.successors.insert(ret);
                        }
                        IrInst::new(id, IrOp::Call, addr, 5).with_operands(target, ret)
                    }
                    None => truncated(id, addr, buf.len() - off),
                },
                0xc3 => {
                    terminated = true;
                    IrInst::new(id, IrOp::Ret, addr, 1)
                }
                // INT imm8: host service request, not a block terminator.
                0xcd => match read_u8(buf, off + 1) {
                    Some(vector) => {
                        IrInst::new(id, IrOp::Syscall, addr, 2).with_operands(u64::from(vector), 0)
                    }
                    None => truncated(id, addr, buf.len() - off),
                },
                _ => {
                    debug!(address = addr, opcode, "unrecognized opcode; lowering to nop");
                    IrInst::new(id, IrOp::Nop, addr, 1)
                }
            };

            off += usize::from(inst.size);
            addr = inst.next_address();
            block.insts.push(inst);
        }

        block.end_addr = addr;
        if !terminated && off < buf.len() {
            // Block ended on a limit, not a control transfer: execution falls
            // through to the next address.
            block.successors.insert(addr);
        }
        Ok(block)
    }
}

/// No-op covering the remaining bytes of a truncated instruction at buffer
/// end. The remainder is always shorter than one full encoding, so it fits a
/// `u8`.
fn truncated(id: u32, addr: u64, remaining: usize) -> IrInst {
    debug!(address = addr, remaining, "truncated instruction at buffer end; lowering to nop");
    IrInst::new(id, IrOp::Nop, addr, remaining as u8)
}
