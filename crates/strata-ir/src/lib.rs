//! Shared data model for the Strata dynamic binary translation pipeline.
//!
//! This crate is the interchange layer between the per-architecture decoders
//! (`strata-isa`), the lifter/code generator (`strata-jit`) and the tiered
//! execution engine (`strata-tier`): architecture tags, IR instructions,
//! basic blocks, lifted functions, and compiled-module metadata. It is a leaf
//! crate with no dependencies so every layer can speak these types.

mod block;
mod inst;
mod module;

pub use block::{BasicBlock, BlockError, FunctionIr, Signature, ValKind};
pub use inst::{IrInst, IrOp};
pub use module::{Assumption, BlockExit, CompiledModule, Tier};

use std::fmt;
use std::sync::Arc;

/// Guest architecture tag. Selects which decoder handles a code buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arch {
    /// Variable-length native ISA (x86 subset).
    X86,
    /// Fixed-width native ISA (ARM64 subset).
    Arm64,
    /// Managed stack-machine bytecode with per-opcode operand lengths.
    Bytecode,
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Arch::X86 => "x86",
            Arch::Arm64 => "arm64",
            Arch::Bytecode => "bytecode",
        };
        f.write_str(s)
    }
}

/// A loaded guest code region as handed over by the loader: raw code bytes
/// plus the address the region is mapped at.
///
/// The code buffer is reference-counted so the execution engine can share it
/// with a background compile worker without copying.
#[derive(Debug, Clone)]
pub struct GuestImage {
    pub arch: Arch,
    pub code: Arc<[u8]>,
    pub base: u64,
}

impl GuestImage {
    pub fn new(arch: Arch, code: impl Into<Arc<[u8]>>, base: u64) -> Self {
        Self {
            arch,
            code: code.into(),
            base,
        }
    }

    /// Translates a guest address into an offset into `code`, or `None` when
    /// the address falls outside the mapped region.
    #[must_use]
    pub fn offset_of(&self, addr: u64) -> Option<usize> {
        let off = addr.checked_sub(self.base)?;
        let off = usize::try_from(off).ok()?;
        (off < self.code.len()).then_some(off)
    }

    /// One-past-the-end guest address of the mapped region.
    #[must_use]
    pub fn end(&self) -> u64 {
        self.base + self.code.len() as u64
    }
}
