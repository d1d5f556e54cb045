use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;

use crate::inst::IrInst;

/// A maximal straight-line IR sequence with one entry and one exit.
///
/// Blocks are identified by their guest start address; successor edges hold
/// addresses rather than references, so cyclic control flow (loops) never
/// creates ownership cycles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicBlock {
    /// Block id. Always equal to `start_addr`.
    pub id: u64,
    pub start_addr: u64,
    /// One past the last byte covered by this block. `end_addr == start_addr`
    /// for an empty block.
    pub end_addr: u64,
    pub insts: Vec<IrInst>,
    /// Guest addresses reachable from this block by fall-through or branch.
    pub successors: BTreeSet<u64>,
}

impl BasicBlock {
    /// An empty block at `addr` with no instructions and no successors.
    #[must_use]
    pub fn empty(addr: u64) -> Self {
        Self {
            id: addr,
            start_addr: addr,
            end_addr: addr,
            insts: Vec::new(),
            successors: BTreeSet::new(),
        }
    }

    /// Number of guest code bytes covered by this block.
    #[must_use]
    pub fn byte_len(&self) -> u64 {
        self.end_addr - self.start_addr
    }

    pub fn is_empty(&self) -> bool {
        self.insts.is_empty()
    }

    /// The block's final instruction, if it is a control transfer.
    #[must_use]
    pub fn terminator(&self) -> Option<&IrInst> {
        self.insts
            .last()
            .filter(|inst| inst.op.is_control_transfer())
    }

    /// Checks the block invariants.
    pub fn validate(&self) -> Result<(), BlockError> {
        if self.id != self.start_addr {
            return Err(BlockError::IdMismatch {
                id: self.id,
                start_addr: self.start_addr,
            });
        }
        if self.end_addr < self.start_addr {
            return Err(BlockError::AddressRange {
                start_addr: self.start_addr,
                end_addr: self.end_addr,
            });
        }
        let mut seen = BTreeSet::new();
        for inst in &self.insts {
            if !seen.insert(inst.id) {
                return Err(BlockError::DuplicateInstId { id: inst.id });
            }
            if inst.address < self.start_addr || inst.address >= self.end_addr {
                return Err(BlockError::InstOutOfRange {
                    address: inst.address,
                });
            }
        }
        Ok(())
    }
}

/// Block invariant violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockError {
    IdMismatch { id: u64, start_addr: u64 },
    AddressRange { start_addr: u64, end_addr: u64 },
    DuplicateInstId { id: u32 },
    InstOutOfRange { address: u64 },
}

impl fmt::Display for BlockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IdMismatch { id, start_addr } => {
                write!(f, "block id {id:#x} != start address {start_addr:#x}")
            }
            Self::AddressRange {
                start_addr,
                end_addr,
            } => write!(
                f,
                "block end address {end_addr:#x} precedes start {start_addr:#x}"
            ),
            Self::DuplicateInstId { id } => write!(f, "duplicate instruction id {id}"),
            Self::InstOutOfRange { address } => {
                write!(f, "instruction address {address:#x} outside block range")
            }
        }
    }
}

impl std::error::Error for BlockError {}

/// WASM-level value kinds used in function signatures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValKind {
    I32,
    I64,
}

/// Parameter/return convention of a lifted function.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Signature {
    pub params: Vec<ValKind>,
    pub returns: Vec<ValKind>,
}

/// A lifted function: an arena of basic blocks keyed by start address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionIr {
    /// Derived from the entry address, e.g. `fn_00001000`.
    pub name: String,
    /// Start address of the entry block. Always present in `blocks`.
    pub entry: u64,
    pub blocks: BTreeMap<u64, BasicBlock>,
    pub signature: Signature,
}

impl FunctionIr {
    #[must_use]
    pub fn new(entry: u64) -> Self {
        Self {
            name: format!("fn_{entry:08x}"),
            entry,
            blocks: BTreeMap::new(),
            signature: Signature::default(),
        }
    }

    #[must_use]
    pub fn entry_block(&self) -> Option<&BasicBlock> {
        self.blocks.get(&self.entry)
    }

    /// Block addresses reachable from the entry, in BFS order.
    ///
    /// Uses a visited set, so cyclic graphs (loops) terminate. Successor
    /// edges pointing at undiscovered blocks (failed decodes) are skipped.
    #[must_use]
    pub fn reachable(&self) -> Vec<u64> {
        let mut order = Vec::new();
        let mut visited = BTreeSet::new();
        let mut queue = VecDeque::new();
        queue.push_back(self.entry);
        while let Some(addr) = queue.pop_front() {
            if !visited.insert(addr) {
                continue;
            }
            let Some(block) = self.blocks.get(&addr) else {
                continue;
            };
            order.push(addr);
            for &succ in &block.successors {
                if !visited.contains(&succ) {
                    queue.push_back(succ);
                }
            }
        }
        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inst::{IrInst, IrOp};

    fn block(start: u64, len: u64, succs: &[u64]) -> BasicBlock {
        let mut b = BasicBlock::empty(start);
        b.end_addr = start + len;
        b.insts.push(IrInst::new(0, IrOp::Nop, start, len as u8));
        b.successors = succs.iter().copied().collect();
        b
    }

    #[test]
    fn validate_rejects_id_mismatch() {
        let mut b = BasicBlock::empty(0x10);
        b.id = 0x20;
        assert!(matches!(b.validate(), Err(BlockError::IdMismatch { .. })));
    }

    #[test]
    fn validate_rejects_duplicate_inst_ids() {
        let mut b = block(0x10, 2, &[]);
        b.insts.push(IrInst::new(0, IrOp::Nop, 0x11, 1));
        assert!(matches!(
            b.validate(),
            Err(BlockError::DuplicateInstId { id: 0 })
        ));
    }

    #[test]
    fn reachable_terminates_on_cycles() {
        let mut f = FunctionIr::new(0x0);
        // 0x0 -> 0x4 -> 0x0 loop.
        f.blocks.insert(0x0, block(0x0, 4, &[0x4]));
        f.blocks.insert(0x4, block(0x4, 4, &[0x0]));
        assert_eq!(f.reachable(), vec![0x0, 0x4]);
    }

    #[test]
    fn reachable_tolerates_missing_successor_blocks() {
        let mut f = FunctionIr::new(0x0);
        f.blocks.insert(0x0, block(0x0, 4, &[0x100]));
        // 0x100 never decoded: the edge is a dead end, not a panic.
        assert_eq!(f.reachable(), vec![0x0]);
    }
}
