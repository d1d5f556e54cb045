//! Tiered execution: interpreter fallback, hotness tracking, and the
//! compiled-module cache.
//!
//! Per code address the engine walks `Cold → Baseline → Optimized`: cold
//! addresses are interpreted directly, hot addresses are compiled on a
//! background worker and dispatched through the module backend once the
//! compiled module lands in the cache. Interpretation is never blocked by a
//! compile in flight.

mod engine;
pub mod interp;

pub use engine::{EngineStats, HotnessRecord, TierConfig, TieredEngine, EXIT_ADDRESS};
pub use interp::{BlockInterpreter, Next, VmState};
