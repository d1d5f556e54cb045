//! Strata's translation pipeline: control-flow lifting, IR optimization, and
//! WASM code generation.
//!
//! The pipeline is split into explicit stages:
//! - [`lift`]: recursive-descent basic-block discovery over the per-arch
//!   decoders, producing a [`strata_ir::FunctionIr`].
//! - [`opt`]: IR-level optimization passes applied at the optimized tier.
//! - [`codegen`]: single-block WASM module emission plus the compile
//!   entry points used by the tiered engine.
//! - [`wasm`]: the emitted modules' import/export ABI.
//! - [`backend`]: native (non-wasm32) reference backend that instantiates and
//!   runs emitted modules under `wasmtime`.

pub mod codegen;
pub mod lift;
pub mod linker;
pub mod opt;
pub mod wasm;

pub mod backend;

pub use codegen::{compile_block, compile_block_with_assumptions, WasmCodegen};
pub use lift::{LiftConfig, Lifter};
pub use linker::ImportResolver;
