//! Per-architecture instruction decoders.
//!
//! Every decoder implements the same contract: given a code buffer, an offset
//! into it, and the guest address that offset corresponds to, decode one basic
//! block and report its control-flow successors. Decoders are stateless and
//! reentrant; the only shared piece is the [`DecoderRegistry`] mapping an
//! architecture tag to its decoder instance.
//!
//! Decoders are deliberately forward-progressing: unrecognized or truncated
//! encodings lower to a no-op IR instruction and are logged, never raised as
//! fatal errors. A decoder only supports the subset of its ISA needed for
//! block formation and translation; it is **not** intended to be complete.

mod arm64;
mod bytecode;
mod x86;

pub use arm64::Arm64Decoder;
pub use bytecode::BytecodeDecoder;
pub use x86::X86Decoder;

use strata_ir::{Arch, BasicBlock};
use thiserror::Error;

/// Per-block decoding bounds: instruction count and byte length.
///
/// Blocks normally terminate at the first control-transfer instruction; the
/// limits bound pathological straight-line runs so a single block can never
/// swallow an entire image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockLimits {
    pub max_insts: usize,
    pub max_bytes: usize,
}

impl Default for BlockLimits {
    fn default() -> Self {
        Self {
            max_insts: 128,
            max_bytes: 512,
        }
    }
}

/// Decoder failure.
///
/// Almost all malformed input is handled in-band (no-op lowering); an error is
/// only returned when no block can be formed at all, e.g. a misaligned entry
/// on a fixed-width ISA.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    #[error("instruction address {addr:#x} is not {align}-byte aligned")]
    Misaligned { addr: u64, align: u32 },
}

/// A stateless single-block decoder for one guest architecture.
pub trait BlockDecoder: Send + Sync {
    fn arch(&self) -> Arch;

    /// Decode one basic block starting at `offset` into `buf`, where `offset`
    /// corresponds to guest address `address`.
    ///
    /// Returns an empty block (no instructions, no successors) when `offset`
    /// is at or past the end of `buf`; never reads out of bounds.
    fn decode_block(
        &self,
        buf: &[u8],
        offset: usize,
        address: u64,
        limits: BlockLimits,
    ) -> Result<BasicBlock, DecodeError>;
}

/// Lookup table of decoder instances keyed by architecture tag, built once at
/// startup and shared by every lift.
#[derive(Default)]
pub struct DecoderRegistry {
    x86: X86Decoder,
    arm64: Arm64Decoder,
    bytecode: BytecodeDecoder,
}

impl DecoderRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, arch: Arch) -> &dyn BlockDecoder {
        match arch {
            Arch::X86 => &self.x86,
            Arch::Arm64 => &self.arm64,
            Arch::Bytecode => &self.bytecode,
        }
    }
}

/// Reads one byte, or `None` at buffer end.
pub(crate) fn read_u8(buf: &[u8], offset: usize) -> Option<u8> {
    buf.get(offset).copied()
}

/// Reads a little-endian integer of `len` bytes, or `None` when truncated.
pub(crate) fn read_le(buf: &[u8], offset: usize, len: usize) -> Option<u64> {
    if len == 0 || buf.len() < offset.checked_add(len)? {
        return None;
    }
    let mut out = 0u64;
    for i in 0..len {
        out |= u64::from(buf[offset + i]) << (i * 8);
    }
    Some(out)
}

/// Whether guest address `target` falls inside the buffer a decode is walking,
/// given that `address` maps to `offset`.
pub(crate) fn in_bounds(buf: &[u8], offset: usize, address: u64, target: u64) -> bool {
    let buf_base = address - offset as u64;
    target >= buf_base && target < buf_base + buf.len() as u64
}
