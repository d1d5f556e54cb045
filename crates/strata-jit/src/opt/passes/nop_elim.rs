//! Dead-code elimination: drops no-ops from the emitted body.
//!
//! No-ops exist in the IR to keep source addresses covered (unrecognized
//! encodings, alignment padding); they contribute nothing to the compiled
//! module.

use strata_ir::{IrInst, IrOp};

pub const NAME: &str = "dead-code-elimination";

pub fn run(insts: &mut Vec<IrInst>) -> bool {
    let before = insts.len();
    insts.retain(|inst| inst.op != IrOp::Nop);
    insts.len() != before
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_only_nops() {
        let mut insts = vec![
            IrInst::new(0, IrOp::Nop, 0, 1),
            IrInst::new(1, IrOp::Push, 1, 2).with_operands(9, 0),
            IrInst::new(2, IrOp::Nop, 3, 1),
        ];
        assert!(run(&mut insts));
        assert_eq!(insts.len(), 1);
        assert_eq!(insts[0].op, IrOp::Push);
        assert!(!run(&mut insts));
    }
}
