//! Host-import resolution for generated modules.

/// Assigns WASM function-import indices to host imports.
///
/// Function imports occupy the front of a module's function index space in
/// declaration order; the resolver owns that ordering so the code generator
/// and any host gluing code agree on indices.
#[derive(Debug, Default, Clone)]
pub struct ImportResolver {
    imports: Vec<(&'static str, &'static str)>,
}

impl ImportResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of `module.field`, appending it to the import order on first
    /// use.
    pub fn resolve(&mut self, module: &'static str, field: &'static str) -> u32 {
        if let Some(idx) = self.index_of(module, field) {
            return idx;
        }
        self.imports.push((module, field));
        (self.imports.len() - 1) as u32
    }

    #[must_use]
    pub fn index_of(&self, module: &str, field: &str) -> Option<u32> {
        self.imports
            .iter()
            .position(|&(m, f)| m == module && f == field)
            .map(|i| i as u32)
    }

    /// Resolved function imports in index order.
    pub fn function_imports(&self) -> impl Iterator<Item = (&'static str, &'static str)> + '_ {
        self.imports.iter().copied()
    }

    /// Number of resolved function imports; also the index of the first
    /// locally defined function.
    #[must_use]
    pub fn len(&self) -> u32 {
        self.imports.len() as u32
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.imports.is_empty()
    }
}
