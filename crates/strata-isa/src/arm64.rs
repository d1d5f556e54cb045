use strata_ir::{Arch, BasicBlock, IrInst, IrOp};
use tracing::debug;

use crate::{in_bounds, read_le, BlockDecoder, BlockLimits, DecodeError};

/// Decoder for the fixed-width native ISA (ARM64 subset).
///
/// Instructions are 4-byte little-endian words. The subset covers NOP, RET,
/// B/BL, CBZ/CBNZ, ADD/SUB (immediate) and MOVZ; any other word lowers to a
/// no-op.
#[derive(Debug, Default, Clone, Copy)]
pub struct Arm64Decoder;

const INST_BYTES: usize = 4;

impl BlockDecoder for Arm64Decoder {
    fn arch(&self) -> Arch {
        Arch::Arm64
    }

    fn decode_block(
        &self,
        buf: &[u8],
        offset: usize,
        address: u64,
        limits: BlockLimits,
    ) -> Result<BasicBlock, DecodeError> {
        if address % INST_BYTES as u64 != 0 {
            return Err(DecodeError::Misaligned {
                addr: address,
                align: INST_BYTES as u32,
            });
        }

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
            let Some(word) = read_le(buf, off, INST_BYTES) else {
                // Trailing partial word at buffer end.
                let remaining = buf.len() - off;
                debug!(address = addr, remaining, "truncated word at buffer end; lowering to nop");
                let inst = IrInst::new(id, IrOp::Nop, addr, remaining as u8);
                addr = inst.next_address();
                block.insts.push(inst);
                off = buf.len();
                break;
            };
            let word = word as u32;

            let inst = match word {
                0xd503_201f => IrInst::new(id, IrOp::Nop, addr, 4),
                0xd65f_03c0 => {
                    terminated = true;
                    IrInst::new(id, IrOp::Ret, addr, 4)
                }
                // B imm26.
                w if w & 0xfc00_0000 == 0x1400_0000 => {
                    let target = branch_target_26(addr, w);
                    terminated = true;
                    block.successors.insert(target);
                    IrInst::new(id, IrOp::Jump, addr, 4).with_operands(target, 0)
                }
                // BL imm26.
                w if w & 0xfc00_0000 == 0x9400_0000 => {
                    let target = branch_target_26(addr, w);
                    let ret = addr + 4;
                    terminated = true;
                    block.successors.insert(target);
                    if in_bounds(buf, offset, address, ret) {
                        block.successors.insert(ret);
                    }
                    IrInst::new(id, IrOp::Call, addr, 4).with_operands(target, ret)
                }
                // CBZ/CBNZ Xt|Wt, imm19.
                w if w & 0x7e00_0000 == 0x3400_0000 => {
                    let target = branch_target_19(addr, w);
                    let fall = addr + 4;
                    terminated = true;
                    block.successors.insert(target);
                    if in_bounds(buf, offset, address, fall) {
                        block.successors.insert(fall);
                    }
                    IrInst::new(id, IrOp::Branch, addr, 4).with_operands(target, fall)
                }
                // ADD/SUB Rd, Rn, #imm12.
                w if w & 0x7f80_0000 == 0x1100_0000 => {
                    IrInst::new(id, IrOp::Add, addr, 4)
                        .with_operands(u64::from(w & 0x1f), u64::from((w >> 10) & 0xfff))
                }
                w if w & 0x7f80_0000 == 0x5100_0000 => {
                    IrInst::new(id, IrOp::Sub, addr, 4)
                        .with_operands(u64::from(w & 0x1f), u64::from((w >> 10) & 0xfff))
                }
                // MOVZ Rd, #imm16 (, LSL #hw*16).
                w if w & 0x7f80_0000 == 0x5280_0000 => {
                    let hw = (w >> 21) & 0x3;
                    let imm = u64::from((w >> 5) & 0xffff) << (hw * 16);
                    IrInst::new(id, IrOp::Mov, addr, 4).with_operands(u64::from(w & 0x1f), imm)
                }
                w => {
                    debug!(address = addr, word = w, "unrecognized word; lowering to nop");
                    IrInst::new(id, IrOp::Nop, addr, 4)
                }
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

fn branch_target_26(addr: u64, word: u32) -> u64 {
    let imm26 = word & 0x03ff_ffff;
    // Sign-extend the 26-bit field, scale to bytes.
    let rel = ((imm26 << 6) as i32 >> 6) as i64 * 4;
    addr.wrapping_add(rel as u64)
}

fn branch_target_19(addr: u64, word: u32) -> u64 {
    let imm19 = (word >> 5) & 0x7_ffff;
    let rel = ((imm19 << 13) as i32 >> 13) as i64 * 4;
    addr.wrapping_add(rel as u64)
}
