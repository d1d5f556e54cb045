//! Single-block WASM module emission.
//!
//! Every compiled module is standalone: it imports `env.memory` and
//! `env.print`, defines one function, and exports it as `start`. Section
//! bookkeeping (LEB128 size fields, exact payload lengths) is handled by
//! `wasm-encoder` at serialization time.

use strata_ir::{
    Assumption, BasicBlock, BlockExit, CompiledModule, IrInst, IrOp, Signature, Tier, ValKind,
};
use tracing::debug;
use wasm_encoder::{
    CodeSection, EntityType, ExportKind, ExportSection, Function, FunctionSection, ImportSection,
    Instruction, MemoryType, Module, TypeSection, ValType,
};

use crate::linker::ImportResolver;
use crate::opt;
use crate::wasm::abi::{
    EXPORT_START_FN, IMPORT_MEMORY, IMPORT_MODULE, IMPORT_PRINT, MEMORY_MIN_PAGES,
};

/// Index of the scratch local in the generated function (no parameters, so
/// locals start at 0).
const SCRATCH_LOCAL: u32 = 0;

/// Compile one block at `tier` into a [`CompiledModule`].
#[must_use]
pub fn compile_block(block: &BasicBlock, tier: Tier) -> CompiledModule {
    compile_block_with_assumptions(block, tier, Vec::new())
}

/// Compile one block at `tier` under explicit speculative `assumptions`.
///
/// A `BranchNotTaken` assumption on the block's terminator turns the recorded
/// exit into a plain fall-through; the dispatcher is responsible for
/// deoptimizing when the assumption is invalidated at runtime.
#[must_use]
pub fn compile_block_with_assumptions(
    block: &BasicBlock,
    tier: Tier,
    assumptions: Vec<Assumption>,
) -> CompiledModule {
    let mut insts = block.insts.clone();
    let optimizations = if tier == Tier::Optimized {
        opt::run_default_passes(&mut insts)
    } else {
        Vec::new()
    };
    let wasm = WasmCodegen::new().compile(&insts);
    CompiledModule {
        wasm,
        code_len: block.byte_len(),
        tier,
        optimizations,
        exit: block_exit(block, &assumptions),
        assumptions,
    }
}

fn block_exit(block: &BasicBlock, assumptions: &[Assumption]) -> BlockExit {
    match block.terminator() {
        Some(term) => match term.op {
            IrOp::Jump => BlockExit::Jump {
                target: term.operand1,
            },
            IrOp::Branch => {
                let speculate_not_taken = assumptions
                    .iter()
                    .any(|a| matches!(a, Assumption::BranchNotTaken { addr } if *addr == term.address));
                if speculate_not_taken {
                    BlockExit::FallThrough {
                        next: term.operand2,
                    }
                } else {
                    BlockExit::Branch {
                        taken: term.operand1,
                        fallthrough: term.operand2,
                    }
                }
            }
            IrOp::Call => BlockExit::Call {
                target: term.operand1,
                ret: term.operand2,
            },
            IrOp::Ret => BlockExit::Return,
            _ => unreachable!("terminator() only yields control transfers"),
        },
        None => BlockExit::FallThrough {
            next: block.end_addr,
        },
    }
}

/// WASM code generator for flattened IR instruction sequences.
#[derive(Debug, Default, Clone, Copy)]
pub struct WasmCodegen;

impl WasmCodegen {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Serialize `insts` into a structurally valid WASM module.
    ///
    /// The empty sequence still yields a well-formed module whose body makes
    /// one baseline diagnostic call, so downstream instantiation never fails
    /// on an empty function body.
    #[must_use]
    pub fn compile(&self, insts: &[IrInst]) -> Vec<u8> {
        let mut module = Module::new();

        // Parameter/return conventions of the diagnostic import and the
        // generated entry point.
        let print_sig = Signature {
            params: vec![ValKind::I64],
            returns: Vec::new(),
        };
        let start_sig = Signature::default();

        let mut types = TypeSection::new();
        let ty_print = types.len();
        types.ty().function(
            print_sig.params.iter().copied().map(val_type),
            print_sig.returns.iter().copied().map(val_type),
        );
        let ty_start = types.len();
        types.ty().function(
            start_sig.params.iter().copied().map(val_type),
            start_sig.returns.iter().copied().map(val_type),
        );
        module.section(&types);

        let mut resolver = ImportResolver::new();
        let print_fn = resolver.resolve(IMPORT_MODULE, IMPORT_PRINT);

        let mut imports = ImportSection::new();
        imports.import(
            IMPORT_MODULE,
            IMPORT_MEMORY,
            MemoryType {
                minimum: MEMORY_MIN_PAGES,
                maximum: None,
                memory64: false,
                shared: false,
                page_size_log2: None,
            },
        );
        for (module_name, field) in resolver.function_imports() {
            imports.import(module_name, field, EntityType::Function(ty_print));
        }
        module.section(&imports);

        let mut funcs = FunctionSection::new();
        funcs.function(ty_start);
        module.section(&funcs);

        // Reserved memory-section slot: the linear memory is imported, so no
        // memory section is emitted here.

        let start_fn = resolver.len();
        let mut exports = ExportSection::new();
        exports.export(EXPORT_START_FN, ExportKind::Func, start_fn);
        module.section(&exports);

        let mut body = Function::new([(1, ValType::I64)]);
        if insts.is_empty() {
            body.instruction(&Instruction::I64Const(0));
            body.instruction(&Instruction::Call(print_fn));
        }
        for inst in insts {
            lower_inst(&mut body, inst, print_fn);
        }
        body.instruction(&Instruction::End);

        let mut code = CodeSection::new();
        code.function(&body);
        module.section(&code);

        module.finish()
    }
}

fn val_type(kind: ValKind) -> ValType {
    match kind {
        ValKind::I32 => ValType::I32,
        ValKind::I64 => ValType::I64,
    }
}

fn lower_inst(body: &mut Function, inst: &IrInst, print_fn: u32) {
    match inst.op {
        IrOp::Push => {
            body.instruction(&Instruction::I64Const(inst.operand1 as i64));
            body.instruction(&Instruction::Call(print_fn));
        }
        IrOp::Add | IrOp::Sub | IrOp::Mul => {
            body.instruction(&Instruction::I64Const(inst.operand1 as i64));
            body.instruction(&Instruction::I64Const(inst.operand2 as i64));
            body.instruction(match inst.op {
                IrOp::Add => &Instruction::I64Add,
                IrOp::Sub => &Instruction::I64Sub,
                _ => &Instruction::I64Mul,
            });
            body.instruction(&Instruction::LocalSet(SCRATCH_LOCAL));
        }
        IrOp::Div => {
            // The divisor is an immediate, so the zero case is resolved at
            // compile time instead of trapping at runtime.
            if inst.operand2 == 0 {
                body.instruction(&Instruction::I64Const(0));
            } else {
                body.instruction(&Instruction::I64Const(inst.operand1 as i64));
                body.instruction(&Instruction::I64Const(inst.operand2 as i64));
                body.instruction(&Instruction::I64DivU);
            }
            body.instruction(&Instruction::LocalSet(SCRATCH_LOCAL));
        }
        IrOp::Mov => {
            body.instruction(&Instruction::I64Const(inst.operand2 as i64));
            body.instruction(&Instruction::LocalSet(SCRATCH_LOCAL));
        }
        IrOp::Nop => {
            body.instruction(&Instruction::Nop);
        }
        // Control flow belongs to the dispatcher and memory traffic needs
        // guest state; neither has a portable lowering here, so these emit no
        // bytes and the module stays structurally valid.
        IrOp::Load
        | IrOp::Store
        | IrOp::Jump
        | IrOp::Branch
        | IrOp::Call
        | IrOp::Ret
        | IrOp::Syscall => {
            debug!(op = %inst.op, address = inst.address, "no codegen lowering; skipping");
        }
    }
}
