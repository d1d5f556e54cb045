use wasmtime::{Caller, Engine, Linker, Memory, MemoryType, Module, Store, TypedFunc};

use super::{BackendError, BlockHandle, ModuleBackend};
use crate::wasm::abi::{
    EXPORT_START_FN, IMPORT_MEMORY, IMPORT_MODULE, IMPORT_PRINT, MEMORY_MIN_PAGES,
};

/// Values passed to `env.print` during the current execution.
#[derive(Debug, Default)]
struct PrintLog {
    values: Vec<i64>,
}

/// Reference `wasmtime`-powered backend for executing emitted modules on
/// native targets.
///
/// A single linear memory is shared by all instantiated modules, and the
/// diagnostic import records its arguments so callers can observe what a
/// translated block did.
pub struct WasmtimeBackend {
    engine: Engine,
    store: Store<PrintLog>,
    linker: Linker<PrintLog>,
    blocks: Vec<TypedFunc<(), ()>>,
}

impl WasmtimeBackend {
    /// Create a backend with the minimum shared memory the ABI requires.
    #[must_use]
    pub fn new() -> Self {
        let engine = Engine::default();
        let mut store = Store::new(&engine, PrintLog::default());
        let mut linker = Linker::new(&engine);

        let memory = Memory::new(&mut store, MemoryType::new(MEMORY_MIN_PAGES as u32, None))
            .expect("create wasmtime memory");
        linker
            .define(&mut store, IMPORT_MODULE, IMPORT_MEMORY, memory)
            .expect("define env.memory import");

        linker
            .func_wrap(
                IMPORT_MODULE,
                IMPORT_PRINT,
                |mut caller: Caller<'_, PrintLog>, value: i64| {
                    caller.data_mut().values.push(value);
                },
            )
            .expect("define env.print import");

        Self {
            engine,
            store,
            linker,
            blocks: Vec::new(),
        }
    }
}

impl Default for WasmtimeBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleBackend for WasmtimeBackend {
    fn instantiate(&mut self, wasm: &[u8]) -> Result<BlockHandle, BackendError> {
        let module = Module::new(&self.engine, wasm)
            .map_err(|e| BackendError::Instantiate(e.to_string()))?;
        let instance = self
            .linker
            .instantiate(&mut self.store, &module)
            .map_err(|e| BackendError::Instantiate(e.to_string()))?;
        let func = instance
            .get_typed_func::<(), ()>(&mut self.store, EXPORT_START_FN)
            .map_err(|e| BackendError::Instantiate(e.to_string()))?;

        let idx = self.blocks.len() as u32;
        self.blocks.push(func);
        Ok(BlockHandle(idx))
    }

    fn execute(&mut self, handle: BlockHandle) -> Result<Vec<i64>, BackendError> {
        let func = self
            .blocks
            .get(handle.0 as usize)
            .cloned()
            .ok_or(BackendError::InvalidHandle(handle.0))?;

        self.store.data_mut().values.clear();
        func.call(&mut self.store, ())
            .map_err(|e| BackendError::Trap(e.to_string()))?;
        Ok(std::mem::take(&mut self.store.data_mut().values))
    }
}
