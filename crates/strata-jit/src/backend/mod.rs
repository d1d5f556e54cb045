//! Execution backends for emitted modules.
//!
//! The tiered engine talks to a backend through [`ModuleBackend`] so tests
//! can substitute failing or recording hosts; the default native backend is
//! [`WasmtimeBackend`].

use thiserror::Error;

#[cfg(not(target_arch = "wasm32"))]
mod wasmtime;

#[cfg(not(target_arch = "wasm32"))]
pub use wasmtime::WasmtimeBackend;

/// Opaque handle to an instantiated module, valid for the backend that
/// produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHandle(pub u32);

/// Backend failure. Instantiation errors are recoverable: the engine discards
/// the offending module and keeps dispatching interpreted.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("module rejected: {0}")]
    Instantiate(String),
    #[error("invalid block handle {0}")]
    InvalidHandle(u32),
    #[error("module trapped: {0}")]
    Trap(String),
}

/// A host able to instantiate and run Strata-emitted WASM modules.
///
/// The host must supply exactly the two imports named in [`crate::wasm::abi`]:
/// the shared linear memory and the diagnostic print hook.
pub trait ModuleBackend {
    /// Compile and instantiate `wasm`, returning a handle for later
    /// execution.
    fn instantiate(&mut self, wasm: &[u8]) -> Result<BlockHandle, BackendError>;

    /// Run a previously instantiated module's `start` export, returning the
    /// values it passed to the diagnostic import, in call order.
    fn execute(&mut self, handle: BlockHandle) -> Result<Vec<i64>, BackendError>;
}
