//! Recursive-descent control-flow discovery.

use std::collections::VecDeque;

use strata_ir::{Arch, BasicBlock, FunctionIr};
use strata_isa::{BlockDecoder, BlockLimits, DecoderRegistry};
use tracing::{debug, warn};

/// Discovery bounds for one lift call.
#[derive(Debug, Clone, Copy)]
pub struct LiftConfig {
    /// Per-block decoding limits.
    pub limits: BlockLimits,
    /// Cap on discovered blocks; discovery stops once it is reached.
    pub max_blocks: usize,
}

impl Default for LiftConfig {
    fn default() -> Self {
        Self {
            limits: BlockLimits::default(),
            max_blocks: 1024,
        }
    }
}

/// Drives the per-architecture decoders over a worklist of addresses and
/// assembles the discovered blocks into a [`FunctionIr`].
///
/// Lifts are synchronous and share no mutable state, so independent lifts can
/// run concurrently on separate lifters (or one lifter behind a shared
/// reference) without coordination.
pub struct Lifter {
    registry: DecoderRegistry,
    config: LiftConfig,
}

impl Default for Lifter {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifter {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(LiftConfig::default())
    }

    #[must_use]
    pub fn with_config(config: LiftConfig) -> Self {
        Self {
            registry: DecoderRegistry::new(),
            config,
        }
    }

    /// Lift starting at `entry`, treating guest addresses as offsets into
    /// `code`.
    #[must_use]
    pub fn lift(&self, code: &[u8], arch: Arch, entry: u64) -> FunctionIr {
        self.lift_with_base(code, arch, 0, entry)
    }

    /// Lift starting at `entry` from an image mapped at `base`.
    ///
    /// Worklist algorithm: pop an address, skip if already visited, decode a
    /// block there, record it, queue unvisited successors, repeat until the
    /// worklist drains. Per-address decode failures are logged and skipped;
    /// the failed address is simply absent from the result graph.
    #[must_use]
    pub fn lift_with_base(&self, code: &[u8], arch: Arch, base: u64, entry: u64) -> FunctionIr {
        debug!(%arch, base, entry, "lifting");
        let decoder = self.registry.get(arch);
        let mut func = FunctionIr::new(entry);
        let mut queue: VecDeque<u64> = VecDeque::new();
        let mut visited: std::collections::BTreeSet<u64> = std::collections::BTreeSet::new();
        queue.push_back(entry);

        while let Some(addr) = queue.pop_front() {
            if !visited.insert(addr) {
                continue;
            }
            if func.blocks.len() >= self.config.max_blocks {
                warn!(
                    addr,
                    max_blocks = self.config.max_blocks,
                    "block budget exhausted; stopping discovery"
                );
                break;
            }

            // A worklist address may land in the middle of an already-decoded
            // block (a jump into a block body). Split the enclosing block at
            // that boundary instead of decoding an overlapping twin.
            if let Some(owner) = enclosing_block(&func, addr) {
                if let Some(tail) = split_block(func.blocks.get_mut(&owner).expect("owner"), addr) {
                    func.blocks.insert(addr, tail);
                } else {
                    warn!(addr, owner, "jump target inside an instruction; keeping block intact");
                }
                continue;
            }

            let offset = match addr.checked_sub(base).and_then(|o| usize::try_from(o).ok()) {
                Some(o) if o <= code.len() => o,
                _ => {
                    warn!(addr, base, "address outside the code buffer; skipping block");
                    continue;
                }
            };

            let mut block = match decoder.decode_block(code, offset, addr, self.config.limits) {
                Ok(block) => block,
                Err(err) => {
                    warn!(addr, %err, "decode failed; skipping block");
                    continue;
                }
            };

            // If straight-line decoding ran into a block that already exists,
            // stop at its boundary and fall through to it.
            if let Some(next_start) = next_block_start(&func, block.start_addr, block.end_addr) {
                truncate_block(&mut block, next_start);
            }

            for &succ in &block.successors {
                if !visited.contains(&succ) {
                    queue.push_back(succ);
                }
            }
            func.blocks.insert(addr, block);
        }

        // The entry key is guaranteed present even when its decode failed, so
        // consumers can rely on the `entry ∈ blocks` invariant.
        func.blocks
            .entry(entry)
            .or_insert_with(|| BasicBlock::empty(entry));
        func
    }
}

/// The block whose address range strictly contains `addr`, if any.
fn enclosing_block(func: &FunctionIr, addr: u64) -> Option<u64> {
    let (&start, block) = func.blocks.range(..=addr).next_back()?;
    (start < addr && addr < block.end_addr).then_some(start)
}

/// The start address of the first existing block inside `(start, end)`.
fn next_block_start(func: &FunctionIr, start: u64, end: u64) -> Option<u64> {
    if end <= start {
        return None;
    }
    func.blocks.range(start + 1..end).map(|(&s, _)| s).next()
}

/// Splits `block` at instruction boundary `at`, returning the tail block.
///
/// Returns `None` when `at` does not fall on an instruction boundary
/// (overlapping misaligned decodes), in which case the block is left intact.
fn split_block(block: &mut BasicBlock, at: u64) -> Option<BasicBlock> {
    let pivot = block.insts.iter().position(|inst| inst.address == at)?;

    let mut tail = BasicBlock::empty(at);
    tail.end_addr = block.end_addr;
    tail.insts = block.insts.split_off(pivot);
    for (id, inst) in tail.insts.iter_mut().enumerate() {
        inst.id = id as u32;
    }
    tail.successors = std::mem::take(&mut block.successors);

    block.end_addr = at;
    block.successors.insert(at);
    Some(tail)
}

/// Drops the instructions of `block` from boundary `at` onward and records a
/// fall-through edge into the block that owns them.
fn truncate_block(block: &mut BasicBlock, at: u64) {
    let Some(pivot) = block.insts.iter().position(|inst| inst.address >= at) else {
        return;
    };
    let boundary = block.insts[pivot].address;
    block.insts.truncate(pivot);
    block.end_addr = boundary;
    block.successors.clear();
    block.successors.insert(boundary);
}
