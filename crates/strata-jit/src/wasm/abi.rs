/// Module name for all imports required by Strata-generated WASM modules.
pub const IMPORT_MODULE: &str = "env";

/// Imported linear memory shared with the embedding host.
pub const IMPORT_MEMORY: &str = "memory";

/// Diagnostic print hook.
///
/// Signature: `env.print(value: i64) -> ()`. Generated code calls it for
/// every guest `push`, which makes a translation's actions observable without
/// touching guest memory.
pub const IMPORT_PRINT: &str = "print";

/// Export name of the generated entry point.
pub const EXPORT_START_FN: &str = "start";

/// Minimum size (in 64KiB pages) of the imported `env.memory`.
pub const MEMORY_MIN_PAGES: u64 = 1;
