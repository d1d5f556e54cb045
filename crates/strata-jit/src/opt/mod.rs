//! IR-level optimization passes applied at the optimized tier.
//!
//! Each pass reports whether it changed the instruction sequence; the driver
//! records the names of the passes that did, and those names travel with the
//! compiled module so the engine can report what a cached module was built
//! with.

pub mod passes;

/// Runs the default optimized-tier pipeline over `insts`, returning the names
/// of the passes that made a change.
pub fn run_default_passes(insts: &mut Vec<strata_ir::IrInst>) -> Vec<&'static str> {
    let mut applied = Vec::new();
    if passes::const_fold::run(insts) {
        applied.push(passes::const_fold::NAME);
    }
    if passes::nop_elim::run(insts) {
        applied.push(passes::nop_elim::NAME);
    }
    applied
}
