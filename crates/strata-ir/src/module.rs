use std::fmt;

/// Compilation quality level assigned per code address.
///
/// The derived ordering is the promotion order: tiers only ever move upward
/// short of an explicit cache invalidation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Tier {
    Cold,
    Baseline,
    Optimized,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Tier::Cold => "cold",
            Tier::Baseline => "baseline",
            Tier::Optimized => "optimized",
        };
        f.write_str(s)
    }
}

/// How control leaves a compiled block, recorded at compile time so the
/// dispatcher and host schedulers can see the region's control shape without
/// re-decoding it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockExit {
    /// Straight-line block; execution resumes right after it.
    FallThrough { next: u64 },
    Jump { target: u64 },
    /// Conditional transfer; dispatch picks `taken` or `fallthrough` from the
    /// runtime outcome.
    Branch { taken: u64, fallthrough: u64 },
    /// Call; execution continues at the callee with a known return address.
    Call { target: u64, ret: u64 },
    Return,
}

/// An explicit bet an optimized compile was made under. Invalidating it at
/// runtime forces a deopt back to the baseline or interpreted path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Assumption {
    /// The conditional branch at `addr` was observed cold and compiled as
    /// never taken.
    BranchNotTaken { addr: u64 },
}

/// A compiled, portable WASM module covering one guest code region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledModule {
    /// Serialized WASM module bytes.
    pub wasm: Vec<u8>,
    /// Guest code bytes covered by the compiled region.
    pub code_len: u64,
    pub tier: Tier,
    /// Names of the optimization passes that were applied.
    pub optimizations: Vec<&'static str>,
    pub exit: BlockExit,
    /// Speculative assumptions this module was compiled under.
    pub assumptions: Vec<Assumption>,
}

impl CompiledModule {
    /// Byte length of the serialized module.
    #[must_use]
    pub fn len(&self) -> usize {
        self.wasm.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.wasm.is_empty()
    }
}
