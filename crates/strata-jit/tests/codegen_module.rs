use strata_ir::{Assumption, BasicBlock, BlockExit, IrInst, IrOp, Tier};
use strata_jit::wasm::{EXPORT_START_FN, IMPORT_MEMORY, IMPORT_MODULE, IMPORT_PRINT};
use strata_jit::{compile_block, compile_block_with_assumptions, WasmCodegen};
use wasmparser::{ExternalKind, Parser, Payload, TypeRef, Validator};

fn validate(bytes: &[u8]) {
    let mut validator = Validator::new();
    validator.validate_all(bytes).unwrap();
}

fn push(id: u32, addr: u64, value: u64) -> IrInst {
    IrInst::new(id, IrOp::Push, addr, 2).with_operands(value, 0)
}

#[test]
fn module_header_and_section_order() {
    let insts = [
        push(0, 0, 1337),
        push(1, 2, 5),
        IrInst::new(2, IrOp::Add, 4, 2).with_operands(1337, 5),
    ];
    let wasm = WasmCodegen::new().compile(&insts);
    validate(&wasm);

    // Fixed 8-byte magic/version header.
    assert_eq!(&wasm[..8], b"\0asm\x01\0\0\0");

    // Sections appear in the fixed order; no memory section is emitted (the
    // linear memory is imported).
    let mut order = Vec::new();
    for payload in Parser::new(0).parse_all(&wasm) {
        match payload.unwrap() {
            Payload::TypeSection(_) => order.push("type"),
            Payload::ImportSection(_) => order.push("import"),
            Payload::FunctionSection(_) => order.push("function"),
            Payload::MemorySection(_) => order.push("memory"),
            Payload::ExportSection(_) => order.push("export"),
            Payload::CodeSectionStart { .. } => order.push("code"),
            _ => {}
        }
    }
    assert_eq!(order, vec!["type", "import", "function", "export", "code"]);
}

#[test]
fn module_imports_exactly_memory_and_print() {
    let wasm = WasmCodegen::new().compile(&[push(0, 0, 1)]);
    validate(&wasm);

    let mut imports = Vec::new();
    for payload in Parser::new(0).parse_all(&wasm) {
        if let Payload::ImportSection(reader) = payload.unwrap() {
            for import in reader {
                let import = import.unwrap();
                imports.push((
                    import.module.to_string(),
                    import.name.to_string(),
                    matches!(import.ty, TypeRef::Memory(_)),
                ));
            }
        }
    }
    assert_eq!(imports.len(), 2);
    assert_eq!(imports[0].0, IMPORT_MODULE);
    assert_eq!(imports[0].1, IMPORT_MEMORY);
    assert!(imports[0].2);
    assert_eq!(imports[1].0, IMPORT_MODULE);
    assert_eq!(imports[1].1, IMPORT_PRINT);
    assert!(!imports[1].2);
}

#[test]
fn module_exports_single_start_entry_point() {
    let wasm = WasmCodegen::new().compile(&[]);
    validate(&wasm);

    let mut exports = Vec::new();
    for payload in Parser::new(0).parse_all(&wasm) {
        if let Payload::ExportSection(reader) = payload.unwrap() {
            for export in reader {
                let export = export.unwrap();
                exports.push((export.name.to_string(), export.kind));
            }
        }
    }
    assert_eq!(exports.len(), 1);
    assert_eq!(exports[0].0, EXPORT_START_FN);
    assert_eq!(exports[0].1, ExternalKind::Func);
}

#[test]
fn empty_instruction_sequence_still_emits_a_valid_module() {
    let wasm = WasmCodegen::new().compile(&[]);
    validate(&wasm);

    // The body still performs one baseline diagnostic call.
    let mut ops = Vec::new();
    for payload in Parser::new(0).parse_all(&wasm) {
        if let Payload::CodeSectionEntry(body) = payload.unwrap() {
            let mut reader = body.get_operators_reader().unwrap();
            while !reader.eof() {
                ops.push(format!("{:?}", reader.read().unwrap()));
            }
        }
    }
    assert_eq!(ops[0], "I64Const { value: 0 }");
    assert!(ops[1].starts_with("Call"));
}

#[test]
fn unsupported_opcodes_are_skipped_not_fatal() {
    let insts = [
        IrInst::new(0, IrOp::Syscall, 0, 2).with_operands(3, 0),
        push(1, 2, 9),
        IrInst::new(2, IrOp::Ret, 4, 1),
    ];
    let wasm = WasmCodegen::new().compile(&insts);
    validate(&wasm);

    // Only the push survives: one constant, one call, one end.
    let mut op_count = 0;
    for payload in Parser::new(0).parse_all(&wasm) {
        if let Payload::CodeSectionEntry(body) = payload.unwrap() {
            let mut reader = body.get_operators_reader().unwrap();
            while !reader.eof() {
                reader.read().unwrap();
                op_count += 1;
            }
        }
    }
    assert_eq!(op_count, 3);
}

#[test]
fn section_sizes_survive_multi_byte_leb_payloads() {
    // Enough pushes to grow the code section past the 1-byte (127) and
    // 2-byte (16383) LEB128 size boundaries; wasmparser re-derives every
    // section boundary from the declared sizes, so validation proves the
    // declared size equals the true payload length.
    for count in [32usize, 4096] {
        let insts: Vec<IrInst> = (0..count)
            .map(|i| push(i as u32, (i * 2) as u64, 0x0102_0304))
            .collect();
        let wasm = WasmCodegen::new().compile(&insts);
        validate(&wasm);

        let mut code_section_size = None;
        for payload in Parser::new(0).parse_all(&wasm) {
            if let Payload::CodeSectionStart { size, .. } = payload.unwrap() {
                code_section_size = Some(size);
            }
        }
        let size = code_section_size.unwrap();
        let boundary = if count == 32 { 127 } else { 16383 };
        assert!(size > boundary, "size {size} should exceed {boundary}");
    }
}

#[test]
fn compile_is_pure_and_deterministic() {
    let insts = [push(0, 0, 7), IrInst::new(1, IrOp::Add, 2, 2).with_operands(1, 2)];
    let a = WasmCodegen::new().compile(&insts);
    let b = WasmCodegen::new().compile(&insts);
    assert_eq!(a, b);
}

fn branch_block() -> BasicBlock {
    let mut block = BasicBlock::empty(0x10);
    block.end_addr = 0x14;
    block.insts = vec![
        push(0, 0x10, 3),
        IrInst::new(1, IrOp::Branch, 0x12, 2).with_operands(0x40, 0x14),
    ];
    block.successors = [0x40, 0x14].into_iter().collect();
    block
}

#[test]
fn compile_block_records_exit_and_tier() {
    let mut ret_block = BasicBlock::empty(0);
    ret_block.end_addr = 1;
    ret_block.insts = vec![IrInst::new(0, IrOp::Ret, 0, 1)];

    let module = compile_block(&ret_block, Tier::Baseline);
    assert_eq!(module.tier, Tier::Baseline);
    assert_eq!(module.exit, BlockExit::Return);
    assert_eq!(module.code_len, 1);
    assert!(module.optimizations.is_empty());
    assert!(module.assumptions.is_empty());
    validate(&module.wasm);

    let module = compile_block(&branch_block(), Tier::Baseline);
    assert_eq!(
        module.exit,
        BlockExit::Branch {
            taken: 0x40,
            fallthrough: 0x14
        }
    );
}

#[test]
fn optimized_tier_reports_applied_passes() {
    let mut block = BasicBlock::empty(0);
    block.end_addr = 6;
    block.insts = vec![
        IrInst::new(0, IrOp::Nop, 0, 1),
        IrInst::new(1, IrOp::Add, 1, 5).with_operands(1337, 5),
    ];

    let module = compile_block(&block, Tier::Optimized);
    assert_eq!(module.tier, Tier::Optimized);
    assert_eq!(
        module.optimizations,
        vec!["const-propagation", "dead-code-elimination"]
    );
    validate(&module.wasm);
}

#[test]
fn branch_not_taken_assumption_turns_exit_into_fall_through() {
    let assumptions = vec![Assumption::BranchNotTaken { addr: 0x12 }];
    let module = compile_block_with_assumptions(&branch_block(), Tier::Optimized, assumptions);
    assert_eq!(module.exit, BlockExit::FallThrough { next: 0x14 });
    assert_eq!(
        module.assumptions,
        vec![Assumption::BranchNotTaken { addr: 0x12 }]
    );
}
