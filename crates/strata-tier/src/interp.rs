//! Block interpreter: the tier-0 execution path.

use strata_ir::{BasicBlock, IrOp};

/// Number of addressable guest local slots.
pub const LOCAL_SLOTS: usize = 32;

/// Guest machine state shared by the interpreted and compiled paths.
///
/// `printed` mirrors the compiled modules' `env.print` stream: the
/// interpreter appends the same values a compiled block would pass to the
/// diagnostic import, so observable behavior is identical across tiers.
#[derive(Debug, Clone)]
pub struct VmState {
    pub stack: Vec<u64>,
    pub locals: [u64; LOCAL_SLOTS],
    pub call_stack: Vec<u64>,
    /// Mirror of the compiled modules' scratch local.
    pub scratch: u64,
    /// Diagnostic print stream, in call order.
    pub printed: Vec<i64>,
    /// Host service requests, in issue order.
    pub syscalls: Vec<u64>,
}

impl Default for VmState {
    fn default() -> Self {
        Self {
            stack: Vec::new(),
            locals: [0; LOCAL_SLOTS],
            call_stack: Vec::new(),
            scratch: 0,
            printed: Vec::new(),
            syscalls: Vec::new(),
        }
    }
}

impl VmState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

/// Control transfer out of one executed block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Next {
    /// Straight-line block: execution resumes at the block's end address.
    Continue,
    Jump(u64),
    /// Return with an empty call stack: the guest is done.
    Exit,
}

/// Executes one decoded block directly against a [`VmState`].
#[derive(Debug, Default, Clone, Copy)]
pub struct BlockInterpreter;

impl BlockInterpreter {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Run `block` to its control transfer.
    ///
    /// `emit` controls whether `push` values are appended to the diagnostic
    /// stream. The compiled dispatch path replays blocks with `emit = false`
    /// to advance guest state after the module has already printed.
    pub fn execute_block(&self, block: &BasicBlock, vm: &mut VmState, emit: bool) -> Next {
        for inst in &block.insts {
            match inst.op {
                IrOp::Nop => {}
                IrOp::Push => {
                    vm.stack.push(inst.operand1);
                    if emit {
                        vm.printed.push(inst.operand1 as i64);
                    }
                }
                IrOp::Mov => {
                    vm.locals[inst.operand1 as usize % LOCAL_SLOTS] = inst.operand2;
                    vm.scratch = inst.operand2;
                }
                IrOp::Load => {
                    vm.stack.push(vm.locals[inst.operand1 as usize % LOCAL_SLOTS]);
                }
                IrOp::Store => {
                    let value = vm.stack.pop().unwrap_or(0);
                    vm.locals[inst.operand1 as usize % LOCAL_SLOTS] = value;
                }
                IrOp::Add | IrOp::Sub | IrOp::Mul | IrOp::Div => {
                    // Same semantics as the compiled lowering: immediate
                    // operands, result into the scratch slot.
                    vm.scratch = match inst.op {
                        IrOp::Add => inst.operand1.wrapping_add(inst.operand2),
                        IrOp::Sub => inst.operand1.wrapping_sub(inst.operand2),
                        IrOp::Mul => inst.operand1.wrapping_mul(inst.operand2),
                        _ => {
                            if inst.operand2 == 0 {
                                0
                            } else {
                                inst.operand1 / inst.operand2
                            }
                        }
                    };
                }
                IrOp::Jump => return Next::Jump(inst.operand1),
                IrOp::Branch => {
                    // Branch-if-zero against the top of the operand stack.
                    let cond = vm.stack.pop().unwrap_or(0);
                    let target = if cond == 0 {
                        inst.operand1
                    } else {
                        inst.operand2
                    };
                    return Next::Jump(target);
                }
                IrOp::Call => {
                    vm.call_stack.push(inst.operand2);
                    return Next::Jump(inst.operand1);
                }
                IrOp::Ret => {
                    return match vm.call_stack.pop() {
                        Some(ret) => Next::Jump(ret),
                        None => Next::Exit,
                    };
                }
                IrOp::Syscall => {
                    // Syscalls have no compiled lowering, so they are
                    // recorded on both paths.
                    vm.syscalls.push(inst.operand1);
                }
            }
        }
        Next::Continue
    }
}

#[cfg(test)]
mod tests {
    use strata_ir::{BasicBlock, IrInst, IrOp};

    use super::*;

    fn block_of(insts: Vec<IrInst>) -> BasicBlock {
        let mut block = BasicBlock::empty(0);
        block.end_addr = insts.iter().map(|i| u64::from(i.size)).sum();
        block.insts = insts;
        block
    }

    #[test]
    fn push_prints_and_stacks() {
        let block = block_of(vec![
            IrInst::new(0, IrOp::Push, 0, 2).with_operands(7, 0),
            IrInst::new(1, IrOp::Push, 2, 2).with_operands(9, 0),
        ]);
        let mut vm = VmState::new();
        let next = BlockInterpreter::new().execute_block(&block, &mut vm, true);
        assert_eq!(next, Next::Continue);
        assert_eq!(vm.stack, vec![7, 9]);
        assert_eq!(vm.printed, vec![7, 9]);
    }

    #[test]
    fn replay_suppresses_prints_but_not_state() {
        let block = block_of(vec![IrInst::new(0, IrOp::Push, 0, 2).with_operands(7, 0)]);
        let mut vm = VmState::new();
        BlockInterpreter::new().execute_block(&block, &mut vm, false);
        assert_eq!(vm.stack, vec![7]);
        assert!(vm.printed.is_empty());
    }

    #[test]
    fn branch_pops_condition() {
        let block = block_of(vec![
            IrInst::new(0, IrOp::Push, 0, 2).with_operands(0, 0),
            IrInst::new(1, IrOp::Branch, 2, 3).with_operands(0x40, 0x05),
        ]);
        let mut vm = VmState::new();
        assert_eq!(
            BlockInterpreter::new().execute_block(&block, &mut vm, true),
            Next::Jump(0x40)
        );

        let block = block_of(vec![
            IrInst::new(0, IrOp::Push, 0, 2).with_operands(1, 0),
            IrInst::new(1, IrOp::Branch, 2, 3).with_operands(0x40, 0x05),
        ]);
        assert_eq!(
            BlockInterpreter::new().execute_block(&block, &mut vm, true),
            Next::Jump(0x05)
        );
    }

    #[test]
    fn call_and_ret_use_the_call_stack() {
        let interp = BlockInterpreter::new();
        let mut vm = VmState::new();

        let call = block_of(vec![IrInst::new(0, IrOp::Call, 0, 3).with_operands(0x30, 0x03)]);
        assert_eq!(interp.execute_block(&call, &mut vm, true), Next::Jump(0x30));

        let ret = block_of(vec![IrInst::new(0, IrOp::Ret, 0x30, 1)]);
        assert_eq!(interp.execute_block(&ret, &mut vm, true), Next::Jump(0x03));
        assert_eq!(interp.execute_block(&ret, &mut vm, true), Next::Exit);
    }

    #[test]
    fn locals_round_trip_through_load_and_store() {
        let interp = BlockInterpreter::new();
        let mut vm = VmState::new();
        let block = block_of(vec![
            IrInst::new(0, IrOp::Push, 0, 2).with_operands(11, 0),
            IrInst::new(1, IrOp::Store, 2, 2).with_operands(3, 0),
            IrInst::new(2, IrOp::Load, 4, 2).with_operands(3, 0),
        ]);
        interp.execute_block(&block, &mut vm, true);
        assert_eq!(vm.locals[3], 11);
        assert_eq!(vm.stack, vec![11]);
    }

    #[test]
    fn arithmetic_lands_in_scratch() {
        let interp = BlockInterpreter::new();
        let mut vm = VmState::new();
        let block = block_of(vec![
            IrInst::new(0, IrOp::Add, 0, 2).with_operands(1337, 5),
        ]);
        interp.execute_block(&block, &mut vm, true);
        assert_eq!(vm.scratch, 1342);

        let block = block_of(vec![IrInst::new(0, IrOp::Div, 0, 2).with_operands(9, 0)]);
        interp.execute_block(&block, &mut vm, true);
        assert_eq!(vm.scratch, 0);
    }
}
