use strata_ir::{Arch, BasicBlock, IrInst, IrOp};
use tracing::debug;

use crate::{in_bounds, read_le, read_u8, BlockDecoder, BlockLimits, DecodeError};

// Managed bytecode opcode space. One opcode byte, then 0-3 operand bytes
// (little-endian) depending on the opcode.
const OP_NOP: u8 = 0x00;
const OP_PUSH8: u8 = 0x01;
const OP_PUSH16: u8 = 0x02;
const OP_PUSH24: u8 = 0x03;
const OP_ADD: u8 = 0x10;
const OP_SUB: u8 = 0x11;
const OP_MUL: u8 = 0x12;
const OP_DIV: u8 = 0x13;
const OP_LOAD: u8 = 0x20;
const OP_STORE: u8 = 0x21;
const OP_JMP: u8 = 0x30;
const OP_BRZ: u8 = 0x31;
const OP_CALL: u8 = 0x32;
const OP_RET: u8 = 0x33;
const OP_SYS: u8 = 0x40;

/// Operand bytes following the opcode byte, or `None` for opcodes outside the
/// format.
fn operand_len(opcode: u8) -> Option<usize> {
    match opcode {
        OP_NOP | OP_ADD | OP_SUB | OP_MUL | OP_DIV | OP_RET => Some(0),
        OP_PUSH8 | OP_LOAD | OP_STORE | OP_SYS => Some(1),
        OP_PUSH16 | OP_JMP | OP_BRZ | OP_CALL => Some(2),
        OP_PUSH24 => Some(3),
        _ => None,
    }
}

/// Decoder for the managed stack-machine bytecode.
///
/// Addresses are logical bytecode offsets, not raw file offsets; branch
/// operands are relative to the following instruction, call operands are
/// absolute.
#[derive(Debug, Default, Clone, Copy)]
pub struct BytecodeDecoder;

impl BlockDecoder for BytecodeDecoder {
    fn arch(&self) -> Arch {
        Arch::Bytecode
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

            let Some(want) = operand_len(opcode) else {
                debug!(address = addr, opcode, "unrecognized bytecode op; lowering to nop");
                let inst = IrInst::new(id, IrOp::Nop, addr, 1);
                off += 1;
                addr = inst.next_address();
                block.insts.push(inst);
                continue;
            };

            let size = 1 + want as u8;
            let operand = if want == 0 {
                0
            } else {
                match read_le(buf, off + 1, want) {
                    Some(v) => v,
                    None => {
                        // Operand truncated at buffer end.
                        let remaining = buf.len() - off;
                        debug!(
                            address = addr,
                            opcode, remaining, "truncated bytecode operand; lowering to nop"
                        );
                        let inst = IrInst::new(id, IrOp::Nop, addr, remaining as u8);
                        addr = inst.next_address();
                        block.insts.push(inst);
                        off = buf.len();
                        break;
                    }
                }
            };

            let next = addr + u64::from(size);
            let inst = match opcode {
                OP_NOP => IrInst::new(id, IrOp::Nop, addr, size),
                OP_PUSH8 | OP_PUSH16 | OP_PUSH24 => {
                    IrInst::new(id, IrOp::Push, addr, size).with_operands(operand, 0)
                }
                OP_ADD => IrInst::new(id, IrOp::Add, addr, size),
                OP_SUB => IrInst::new(id, IrOp::Sub, addr, size),
                OP_MUL => IrInst::new(id, IrOp::Mul, addr, size),
                OP_DIV => IrInst::new(id, IrOp::Div, addr, size),
                OP_LOAD => IrInst::new(id, IrOp::Load, addr, size).with_operands(operand, 0),
                OP_STORE => IrInst::new(id, IrOp::Store, addr, size).with_operands(operand, 0),
                OP_JMP => {
                    let target = next.wrapping_add(operand as u16 as i16 as i64 as u64);
                    terminated = true;
                    block.successors.insert(target);
                    IrInst::new(id, IrOp::Jump, addr, size).with_operands(target, 0)
                }
                OP_BRZ => {
                    let target = next.wrapping_add(operand as u16 as i16 as i64 as u64);
                    terminated = true;
                    block.successors.insert(target);
                    if in_bounds(buf, offset, address, next) {
                        block.successors.insert(next);
                    }
                    IrInst::new(id, IrOp::Branch, addr, size).with_operands(target, next)
                }
                OP_CALL => {
                    terminated = true;
                    block.successors.insert(operand);
                    if in_bounds(buf, offset, address, next) {
                        block.successors.insert(next);
                    }
                    IrInst::new(id, IrOp::Call, addr, size).with_operands(operand, next)
                }
                OP_RET => {
                    terminated = true;
                    IrInst::new(id, IrOp::Ret, addr, size)
                }
                OP_SYS => IrInst::new(id, IrOp::Syscall, addr, size).with_operands(operand, 0),
                _ => unreachable!("operand_len covers the opcode space"),
            };

            off += usize::from(inst.size);
            addr = inst.next_address();
            block.insts.push(inst);
        }

        block.end_addr = addr;
        if !terminated && off < buf.len() {
            block.successors.insert(addr);
        }
        Ok(block)
    }
}
