#![cfg(not(target_arch = "wasm32"))]

use std::time::{Duration, Instant};

use strata_ir::{Arch, GuestImage, Tier};
use strata_jit::backend::{BackendError, BlockHandle, ModuleBackend, WasmtimeBackend};
use strata_tier::{TierConfig, TieredEngine, EXIT_ADDRESS};

/// Backend whose host always rejects modules.
struct RejectingBackend;

impl ModuleBackend for RejectingBackend {
    fn instantiate(&mut self, _wasm: &[u8]) -> Result<BlockHandle, BackendError> {
        Err(BackendError::Instantiate("rejected by test host".into()))
    }

    fn execute(&mut self, _handle: BlockHandle) -> Result<Vec<i64>, BackendError> {
        unreachable!("instantiation never succeeds")
    }
}

/// push8 0; brz -5: a one-block self loop that prints 0 every iteration.
const LOOP_PROGRAM: [u8; 5] = [0x01, 0x00, 0x31, 0xfb, 0xff];

fn loop_image() -> GuestImage {
    GuestImage::new(Arch::Bytecode, LOOP_PROGRAM.to_vec(), 0)
}

fn inline_config(baseline: u64, optimized: u64) -> TierConfig {
    TierConfig {
        baseline_threshold: baseline,
        optimized_threshold: optimized,
        inline_compile: true,
        ..TierConfig::default()
    }
}

#[test]
fn cold_addresses_interpret_without_compiling() {
    let mut engine = TieredEngine::new(loop_image(), inline_config(5, 10), WasmtimeBackend::new());
    for _ in 0..3 {
        assert_eq!(engine.dispatch(0), 0);
    }
    assert_eq!(engine.tier(0), Tier::Cold);
    assert_eq!(engine.hotness(0), 3);
    assert_eq!(engine.stats().compiles_scheduled, 0);
    assert_eq!(engine.diagnostics(), &[0, 0, 0]);
}

#[test]
fn tiers_promote_monotonically_with_identical_diagnostics() {
    let mut engine = TieredEngine::new(loop_image(), inline_config(5, 10), WasmtimeBackend::new());

    let mut last_tier = Tier::Cold;
    for i in 1..=12u64 {
        assert_eq!(engine.dispatch(0), 0);
        assert_eq!(engine.hotness(0), i);
        let tier = engine.tier(0);
        assert!(tier >= last_tier, "tier went backward: {last_tier} -> {tier}");
        last_tier = tier;
    }
    assert_eq!(engine.tier(0), Tier::Optimized);

    // The print stream is identical across the tier transitions.
    assert_eq!(engine.diagnostics(), vec![0i64; 12].as_slice());

    let stats = engine.stats();
    assert!(stats.interpreted_blocks > 0);
    assert!(stats.compiled_blocks > 0);
    assert_eq!(stats.compiles_published, 2);
    assert_eq!(stats.deopts, 0);
}

#[test]
fn promotion_requests_for_an_in_flight_address_are_no_ops() {
    // Background worker, no dispatching: results are never drained, so the
    // first request stays in flight while hotness keeps climbing.
    let config = TierConfig {
        baseline_threshold: 5,
        optimized_threshold: 10,
        ..TierConfig::default()
    };
    let mut engine = TieredEngine::new(loop_image(), config, WasmtimeBackend::new());
    for _ in 0..50 {
        engine.record_execution(0);
    }
    assert_eq!(engine.stats().compiles_scheduled, 1);
}

#[test]
fn dispatch_keeps_running_while_a_compile_is_in_flight() {
    let config = TierConfig {
        baseline_threshold: 3,
        optimized_threshold: 1_000_000,
        ..TierConfig::default()
    };
    let mut engine = TieredEngine::new(loop_image(), config, WasmtimeBackend::new());

    // Dispatch stays correct and non-blocking from cold through the
    // background compile landing.
    let deadline = Instant::now() + Duration::from_secs(30);
    while engine.tier(0) != Tier::Baseline {
        assert_eq!(engine.dispatch(0), 0);
        assert!(Instant::now() < deadline, "compile never landed");
        std::thread::sleep(Duration::from_millis(1));
    }

    let compiled_before = engine.stats().compiled_blocks;
    assert_eq!(engine.dispatch(0), 0);
    assert!(engine.stats().compiled_blocks > compiled_before);
}

#[test]
fn host_rejected_modules_fall_back_to_the_interpreter_without_retry() {
    let mut engine = TieredEngine::new(loop_image(), inline_config(2, 100), RejectingBackend);

    for _ in 0..6 {
        assert_eq!(engine.dispatch(0), 0);
    }
    // The module compiled, the host rejected it, and the address is pinned to
    // the interpreted path without endless recompiles.
    assert_eq!(engine.tier(0), Tier::Cold);
    let stats = engine.stats();
    assert_eq!(stats.compiles_scheduled, 1);
    assert_eq!(stats.compiles_published, 1);
    assert_eq!(stats.modules_discarded, 1);
    assert_eq!(stats.compiled_blocks, 0);
    assert_eq!(engine.diagnostics(), &[0, 0, 0, 0, 0, 0]);
}

// Branch driven by guest local 0:
//   0:  load l0; brz +2 (taken 7, fall-through 5)
//   5:  ret (fall-through path)
//   7:  ret (taken path)
//   8:  push8 1; store l0; ret   arms the branch's fall-through
//   13: push8 0; store l0; ret   flips it to taken
const BRANCHY_PROGRAM: [u8; 18] = [
    0x20, 0x00, 0x31, 0x02, 0x00, 0x33, 0x90, 0x33, 0x01, 0x01, 0x21, 0x00, 0x33, 0x01, 0x00,
    0x21, 0x00, 0x33,
];

#[test]
fn violated_speculation_deoptimizes_to_baseline() {
    let image = GuestImage::new(Arch::Bytecode, BRANCHY_PROGRAM.to_vec(), 0);
    let mut engine = TieredEngine::new(image, inline_config(3, 6), WasmtimeBackend::new());

    // Arm the branch: local 0 = 1, so the branch falls through.
    assert_eq!(engine.dispatch(8), EXIT_ADDRESS);

    // Heat the branch block until it reaches the optimized tier. Every
    // observed outcome is fall-through, so the optimized compile speculates
    // branch-not-taken.
    for _ in 0..6 {
        assert_eq!(engine.dispatch(0), 5);
    }
    assert_eq!(engine.tier(0), Tier::Optimized);
    assert_eq!(engine.stats().deopts, 0);

    // Flip the branch condition and dispatch the speculated block: the
    // assumption is invalidated, control still goes down the true (taken)
    // path, and the address deopts to its baseline module.
    assert_eq!(engine.dispatch(13), EXIT_ADDRESS);
    assert_eq!(engine.dispatch(0), 7);
    assert_eq!(engine.stats().deopts, 1);
    assert_eq!(engine.tier(0), Tier::Baseline);

    // The baseline module keeps handling both outcomes.
    assert_eq!(engine.dispatch(0), 7);
    assert_eq!(engine.dispatch(8), EXIT_ADDRESS);
    assert_eq!(engine.dispatch(0), 5);
}

#[test]
fn invalidation_resets_tier_hotness_and_cache() {
    let mut engine = TieredEngine::new(loop_image(), inline_config(2, 100), WasmtimeBackend::new());

    for _ in 0..3 {
        engine.dispatch(0);
    }
    assert_eq!(engine.tier(0), Tier::Baseline);

    engine.invalidate_range(0, 5);
    assert_eq!(engine.tier(0), Tier::Cold);
    assert_eq!(engine.hotness(0), 0);

    // The address re-heats and is re-translated.
    for _ in 0..2 {
        assert_eq!(engine.dispatch(0), 0);
    }
    assert_eq!(engine.tier(0), Tier::Baseline);
    assert_eq!(engine.stats().compiles_published, 2);
}

#[test]
fn invalidation_with_a_compile_in_flight_recovers() {
    let config = TierConfig {
        baseline_threshold: 3,
        optimized_threshold: 1_000_000,
        ..TierConfig::default()
    };
    let mut engine = TieredEngine::new(loop_image(), config, WasmtimeBackend::new());

    for _ in 0..3 {
        engine.record_execution(0);
    }
    assert_eq!(engine.stats().compiles_scheduled, 1);
    // The in-flight result belongs to the old code bytes now.
    engine.invalidate_range(0, 5);

    let deadline = Instant::now() + Duration::from_secs(30);
    while engine.tier(0) != Tier::Baseline {
        assert_eq!(engine.dispatch(0), 0);
        assert!(Instant::now() < deadline, "engine never re-promoted");
        std::thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn return_with_empty_call_stack_exits() {
    let image = GuestImage::new(Arch::X86, vec![0x90, 0xc3], 0x1000);
    let mut engine = TieredEngine::new(image, TierConfig::default(), WasmtimeBackend::new());
    assert_eq!(engine.dispatch(0x1000), EXIT_ADDRESS);
    assert_eq!(engine.dispatch(0x2000), EXIT_ADDRESS);
}
