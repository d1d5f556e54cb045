//! WASM-level ABI shared between the code generator and module hosts.

pub mod abi;

pub use abi::{EXPORT_START_FN, IMPORT_MEMORY, IMPORT_MODULE, IMPORT_PRINT, MEMORY_MIN_PAGES};
