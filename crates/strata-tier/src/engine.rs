//! The tiered execution engine.

use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use rustc_hash::{FxHashMap, FxHashSet};
use strata_ir::{Assumption, BasicBlock, CompiledModule, GuestImage, IrOp, Tier};
use strata_isa::{BlockDecoder, DecoderRegistry};
use strata_jit::backend::{BlockHandle, ModuleBackend};
use strata_jit::{compile_block_with_assumptions, LiftConfig, Lifter};
use tracing::{debug, warn};

use crate::interp::{BlockInterpreter, Next, VmState};

/// Sentinel next-address returned by [`TieredEngine::dispatch`] when the
/// guest has finished (return with an empty call stack, or no forward
/// progress is possible at the dispatched address).
pub const EXIT_ADDRESS: u64 = u64::MAX;

/// Engine tuning knobs.
#[derive(Debug, Clone, Copy)]
pub struct TierConfig {
    /// Executions of an address before a baseline compile is scheduled.
    pub baseline_threshold: u64,
    /// Executions before recompilation at the optimized tier.
    pub optimized_threshold: u64,
    /// Lift bounds used by the compile worker.
    pub lift: LiftConfig,
    /// Run compiles inline on the dispatch thread instead of the background
    /// worker. Intended for deterministic tests; the default keeps dispatch
    /// free of compilation work.
    pub inline_compile: bool,
    /// Allow assumption-driven speculative recompilation at the optimized
    /// tier.
    pub speculate: bool,
}

impl Default for TierConfig {
    fn default() -> Self {
        Self {
            baseline_threshold: 10,
            optimized_threshold: 100,
            lift: LiftConfig::default(),
            inline_compile: false,
            speculate: true,
        }
    }
}

/// Per-address execution counter plus the tier its cached code has reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HotnessRecord {
    pub count: u64,
    pub tier: Tier,
}

impl Default for HotnessRecord {
    fn default() -> Self {
        Self {
            count: 0,
            tier: Tier::Cold,
        }
    }
}

/// Dispatch/compile counters, mostly for tests and diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub interpreted_blocks: u64,
    pub compiled_blocks: u64,
    pub compiles_scheduled: u64,
    pub compiles_published: u64,
    pub compiles_rejected: u64,
    pub modules_discarded: u64,
    pub deopts: u64,
}

struct CompileJob {
    addr: u64,
    tier: Tier,
    assumptions: Vec<Assumption>,
    epoch: u64,
}

struct CompileResult {
    addr: u64,
    epoch: u64,
    /// `None` when no block could be formed at the address.
    outcome: Option<(CompiledModule, BasicBlock)>,
}

struct InstalledModule {
    module: Arc<CompiledModule>,
    handle: Option<BlockHandle>,
}

struct CacheEntry {
    block: BasicBlock,
    baseline: Option<InstalledModule>,
    optimized: Option<InstalledModule>,
}

#[derive(Debug, Clone, Copy, Default)]
struct BranchStats {
    taken: u64,
    not_taken: u64,
}

/// The tiered execution engine for one guest image.
///
/// Owns the hotness table and the compiled-module cache for the lifetime of
/// the emulated process; constructor-injected so multiple guests stay
/// isolated. Dispatch runs on the owning thread; compilation runs on a
/// background worker that publishes finished modules through a shared ready
/// queue, so a dispatch never waits on a compile.
pub struct TieredEngine<B: ModuleBackend> {
    image: GuestImage,
    config: TierConfig,
    backend: B,
    registry: DecoderRegistry,
    interp: BlockInterpreter,
    vm: VmState,

    hotness: FxHashMap<u64, HotnessRecord>,
    cache: FxHashMap<u64, CacheEntry>,
    rejected: FxHashSet<u64>,
    in_flight: FxHashSet<u64>,
    branch_profile: FxHashMap<u64, BranchStats>,
    stats: EngineStats,

    /// Bumped by invalidation; stale compile results are dropped on arrival.
    epoch: u64,

    ready: Arc<Mutex<Vec<CompileResult>>>,
    job_tx: Option<Sender<CompileJob>>,
    worker: Option<JoinHandle<()>>,
}

impl<B: ModuleBackend> TieredEngine<B> {
    pub fn new(image: GuestImage, config: TierConfig, backend: B) -> Self {
        let ready: Arc<Mutex<Vec<CompileResult>>> = Arc::new(Mutex::new(Vec::new()));

        let (job_tx, worker) = if config.inline_compile {
            (None, None)
        } else {
            let (tx, rx) = mpsc::channel::<CompileJob>();
            let worker_image = image.clone();
            let worker_ready = Arc::clone(&ready);
            let lift = config.lift;
            let handle = std::thread::spawn(move || {
                let lifter = Lifter::with_config(lift);
                while let Ok(job) = rx.recv() {
                    let result = run_compile_job(&lifter, &worker_image, job);
                    if let Ok(mut queue) = worker_ready.lock() {
                        queue.push(result);
                    }
                }
            });
            (Some(tx), Some(handle))
        };

        Self {
            image,
            config,
            backend,
            registry: DecoderRegistry::new(),
            interp: BlockInterpreter::new(),
            vm: VmState::new(),
            hotness: FxHashMap::default(),
            cache: FxHashMap::default(),
            rejected: FxHashSet::default(),
            in_flight: FxHashSet::default(),
            branch_profile: FxHashMap::default(),
            stats: EngineStats::default(),
            epoch: 0,
            ready,
            job_tx,
            worker,
        }
    }

    /// Current tier of `addr`.
    #[must_use]
    pub fn tier(&self, addr: u64) -> Tier {
        self.hotness.get(&addr).map_or(Tier::Cold, |r| r.tier)
    }

    /// Execution count of `addr`.
    #[must_use]
    pub fn hotness(&self, addr: u64) -> u64 {
        self.hotness.get(&addr).map_or(0, |r| r.count)
    }

    #[must_use]
    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    /// The diagnostic print stream produced so far, across both paths.
    #[must_use]
    pub fn diagnostics(&self) -> &[i64] {
        &self.vm.printed
    }

    #[must_use]
    pub fn vm(&self) -> &VmState {
        &self.vm
    }

    /// Count one execution of `addr` and schedule a tier promotion when a
    /// threshold is crossed. A promotion for an address already compiling is
    /// a no-op.
    pub fn record_execution(&mut self, addr: u64) {
        let record = self.hotness.entry(addr).or_default();
        record.count += 1;
        self.maybe_promote(addr);
    }

    /// Execute one step at `addr` and return the next guest address, or
    /// [`EXIT_ADDRESS`] when the guest is done.
    ///
    /// Dispatch prefers the highest cached tier; without a cached module it
    /// interprets the decoded unit at `addr` directly.
    pub fn dispatch(&mut self, addr: u64) -> u64 {
        self.drain_ready();
        self.record_execution(addr);
        match self.try_dispatch_compiled(addr) {
            Some(next) => next,
            None => self.dispatch_interpreted(addr),
        }
    }

    /// Drop cached modules, hotness, and rejection marks for every block
    /// overlapping `[start, end)`: the retranslation/self-modifying-code
    /// hook. In-flight compiles for the old bytes are dropped on arrival.
    pub fn invalidate_range(&mut self, start: u64, end: u64) {
        self.epoch += 1;
        self.cache
            .retain(|_, e| e.block.start_addr >= end || e.block.end_addr <= start);
        self.hotness.retain(|&a, _| a < start || a >= end);
        self.rejected.retain(|&a| a < start || a >= end);
        self.branch_profile.retain(|&a, _| a < start || a >= end);
        debug!(start, end, epoch = self.epoch, "invalidated address range");
    }

    fn dispatch_interpreted(&mut self, addr: u64) -> u64 {
        let Some(block) = self.decode_at(addr) else {
            warn!(addr, "no decodable unit at dispatch address; exiting");
            return EXIT_ADDRESS;
        };
        if block.is_empty() {
            warn!(addr, "empty block at dispatch address; exiting");
            return EXIT_ADDRESS;
        }
        self.stats.interpreted_blocks += 1;
        let next = self.interp.execute_block(&block, &mut self.vm, true);
        self.note_branch_outcome(&block, next);
        resolve_next(&block, next)
    }

    fn try_dispatch_compiled(&mut self, addr: u64) -> Option<u64> {
        loop {
            let (tier, module, handle) = {
                let entry = self.cache.get(&addr)?;
                let (tier, installed) = match (&entry.optimized, &entry.baseline) {
                    (Some(m), _) => (Tier::Optimized, m),
                    (None, Some(m)) => (Tier::Baseline, m),
                    (None, None) => return None,
                };
                (tier, Arc::clone(&installed.module), installed.handle)
            };

            let handle = match handle {
                Some(h) => h,
                None => match self.backend.instantiate(&module.wasm) {
                    Ok(h) => {
                        self.install_handle(addr, tier, h);
                        h
                    }
                    Err(err) => {
                        warn!(addr, %tier, %err, "module rejected by host; discarding");
                        self.discard_module(addr, tier);
                        continue;
                    }
                },
            };

            let printed = match self.backend.execute(handle) {
                Ok(printed) => printed,
                Err(err) => {
                    warn!(addr, %tier, %err, "compiled block failed; discarding");
                    self.discard_module(addr, tier);
                    continue;
                }
            };
            self.vm.printed.extend(printed);
            self.stats.compiled_blocks += 1;

            // Replay the block against guest state (prints suppressed; the
            // module already emitted them) to advance the logical instruction
            // pointer.
            let block = self.cache.get(&addr).expect("cache entry").block.clone();
            let next = self.interp.execute_block(&block, &mut self.vm, false);
            self.note_branch_outcome(&block, next);

            if assumptions_violated(&module.assumptions, &block, next) {
                self.deopt(addr);
            }

            return Some(resolve_next(&block, next));
        }
    }

    fn decode_at(&self, addr: u64) -> Option<BasicBlock> {
        let offset = self.image.offset_of(addr)?;
        self.registry
            .get(self.image.arch)
            .decode_block(&self.image.code, offset, addr, self.config.lift.limits)
            .ok()
    }

    fn maybe_promote(&mut self, addr: u64) {
        if self.rejected.contains(&addr) || self.in_flight.contains(&addr) {
            return;
        }
        let count = self.hotness.get(&addr).map_or(0, |r| r.count);
        let (has_baseline, has_optimized) = match self.cache.get(&addr) {
            Some(e) => (e.baseline.is_some() || e.optimized.is_some(), e.optimized.is_some()),
            None => (false, false),
        };

        if count >= self.config.optimized_threshold && has_baseline && !has_optimized {
            let assumptions = self.speculation_for(addr);
            self.schedule(addr, Tier::Optimized, assumptions);
        } else if count >= self.config.baseline_threshold && !has_baseline {
            self.schedule(addr, Tier::Baseline, Vec::new());
        }
    }

    /// Pick speculative assumptions for an optimized recompile from the
    /// branch profile observed so far.
    fn speculation_for(&self, addr: u64) -> Vec<Assumption> {
        if !self.config.speculate {
            return Vec::new();
        }
        let Some(entry) = self.cache.get(&addr) else {
            return Vec::new();
        };
        let Some(term) = entry.block.terminator() else {
            return Vec::new();
        };
        if term.op != IrOp::Branch {
            return Vec::new();
        }
        match self.branch_profile.get(&term.address) {
            Some(stats) if stats.taken == 0 && stats.not_taken > 0 => {
                vec![Assumption::BranchNotTaken { addr: term.address }]
            }
            _ => Vec::new(),
        }
    }

    fn schedule(&mut self, addr: u64, tier: Tier, assumptions: Vec<Assumption>) {
        self.in_flight.insert(addr);
        self.stats.compiles_scheduled += 1;
        debug!(addr, %tier, "scheduling compile");
        let job = CompileJob {
            addr,
            tier,
            assumptions,
            epoch: self.epoch,
        };

        if let Some(tx) = &self.job_tx {
            if tx.send(job).is_err() {
                warn!(addr, "compile worker gone; keeping address at current tier");
                self.in_flight.remove(&addr);
            }
        } else {
            let lifter = Lifter::with_config(self.config.lift);
            let result = run_compile_job(&lifter, &self.image, job);
            if let Ok(mut queue) = self.ready.lock() {
                queue.push(result);
            }
            self.drain_ready();
        }
    }

    fn drain_ready(&mut self) {
        let results = {
            let Ok(mut queue) = self.ready.lock() else {
                return;
            };
            std::mem::take(&mut *queue)
        };
        for result in results {
            self.in_flight.remove(&result.addr);
            if result.epoch != self.epoch {
                debug!(addr = result.addr, "dropping stale compile result");
                continue;
            }
            match result.outcome {
                Some((module, block)) => self.publish(result.addr, module, block),
                None => {
                    self.stats.compiles_rejected += 1;
                    self.rejected.insert(result.addr);
                }
            }
        }
    }

    /// Install a finished module. Replacement is atomic from the dispatcher's
    /// point of view: the cache slot swaps whole modules, never partial ones,
    /// and a late baseline result never displaces an optimized module.
    fn publish(&mut self, addr: u64, module: CompiledModule, block: BasicBlock) {
        let tier = module.tier;
        let installed = InstalledModule {
            module: Arc::new(module),
            handle: None,
        };
        let entry = self.cache.entry(addr).or_insert_with(|| CacheEntry {
            block: block.clone(),
            baseline: None,
            optimized: None,
        });
        entry.block = block;
        match tier {
            Tier::Optimized => entry.optimized = Some(installed),
            Tier::Baseline => {
                if entry.optimized.is_some() {
                    debug!(addr, "late baseline result superseded; dropping");
                    return;
                }
                entry.baseline = Some(installed);
            }
            Tier::Cold => unreachable!("cold modules are never compiled"),
        }
        self.stats.compiles_published += 1;
        let record = self.hotness.entry(addr).or_default();
        record.tier = record.tier.max(tier);
    }

    fn install_handle(&mut self, addr: u64, tier: Tier, handle: BlockHandle) {
        if let Some(entry) = self.cache.get_mut(&addr) {
            let slot = match tier {
                Tier::Optimized => &mut entry.optimized,
                _ => &mut entry.baseline,
            };
            if let Some(installed) = slot {
                installed.handle = Some(handle);
            }
        }
    }

    /// Drop one tier's module after the host rejected it (or it trapped).
    /// The address keeps dispatching on the remaining tier or the
    /// interpreted path; it is marked rejected when nothing is left so the
    /// engine does not retry indefinitely.
    fn discard_module(&mut self, addr: u64, tier: Tier) {
        self.stats.modules_discarded += 1;
        let Some(entry) = self.cache.get_mut(&addr) else {
            return;
        };
        match tier {
            Tier::Optimized => entry.optimized = None,
            _ => entry.baseline = None,
        }
        let remaining = if entry.optimized.is_some() {
            Tier::Optimized
        } else if entry.baseline.is_some() {
            Tier::Baseline
        } else {
            self.rejected.insert(addr);
            Tier::Cold
        };
        if let Some(record) = self.hotness.get_mut(&addr) {
            record.tier = remaining;
        }
    }

    /// Mandatory fallback after a speculative assumption was invalidated:
    /// drop the optimized module and fall back to the baseline module (or
    /// the interpreted path) for this address.
    fn deopt(&mut self, addr: u64) {
        self.stats.deopts += 1;
        let Some(entry) = self.cache.get_mut(&addr) else {
            return;
        };
        entry.optimized = None;
        let fallback = if entry.baseline.is_some() {
            Tier::Baseline
        } else {
            Tier::Cold
        };
        if let Some(record) = self.hotness.get_mut(&addr) {
            record.tier = fallback;
        }
        warn!(addr, %fallback, "speculative assumption invalidated; deoptimizing");
    }

    fn note_branch_outcome(&mut self, block: &BasicBlock, next: Next) {
        let Some(term) = block.terminator() else {
            return;
        };
        if term.op != IrOp::Branch {
            return;
        }
        let taken =
            matches!(next, Next::Jump(t) if t == term.operand1 && term.operand1 != term.operand2);
        let stats = self.branch_profile.entry(term.address).or_default();
        if taken {
            stats.taken += 1;
        } else {
            stats.not_taken += 1;
        }
    }
}

impl<B: ModuleBackend> Drop for TieredEngine<B> {
    fn drop(&mut self) {
        // Closing the channel ends the worker loop.
        self.job_tx = None;
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn run_compile_job(lifter: &Lifter, image: &GuestImage, job: CompileJob) -> CompileResult {
    let func = lifter.lift_with_base(&image.code, image.arch, image.base, job.addr);
    let outcome = func
        .blocks
        .get(&job.addr)
        .filter(|block| !block.is_empty())
        .map(|block| {
            (
                compile_block_with_assumptions(block, job.tier, job.assumptions),
                block.clone(),
            )
        });
    CompileResult {
        addr: job.addr,
        epoch: job.epoch,
        outcome,
    }
}

fn resolve_next(block: &BasicBlock, next: Next) -> u64 {
    match next {
        Next::Jump(target) => target,
        Next::Exit => EXIT_ADDRESS,
        Next::Continue => {
            if block.end_addr == block.start_addr {
                EXIT_ADDRESS
            } else {
                block.end_addr
            }
        }
    }
}

fn assumptions_violated(assumptions: &[Assumption], block: &BasicBlock, next: Next) -> bool {
    assumptions.iter().any(|assumption| match assumption {
        Assumption::BranchNotTaken { addr } => match block.terminator() {
            Some(term) if term.address == *addr => {
                matches!(next, Next::Jump(t) if t == term.operand1 && term.operand1 != term.operand2)
            }
            _ => false,
        },
    })
}
