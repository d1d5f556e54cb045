use std::fmt;

/// Architecture-neutral IR operations.
///
/// Decoders lower every recognized guest instruction to one of these; the code
/// generator and interpreter only ever see this set. Operations with no
/// portable lowering yet are still representable so lifting can stay
/// forward-progressing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IrOp {
    Nop,
    /// Push a constant onto the guest operand stack. `operand1` is the value.
    Push,
    /// Register/immediate move. `operand1` is the destination slot,
    /// `operand2` the source value.
    Mov,
    /// Push the value of guest slot `operand1` onto the operand stack.
    Load,
    /// Pop the operand stack into guest slot `operand1`.
    Store,
    /// Binary arithmetic over `operand1`/`operand2`.
    Add,
    Sub,
    Mul,
    Div,
    /// Unconditional transfer to `operand1`.
    Jump,
    /// Conditional transfer to `operand1`; falls through otherwise.
    Branch,
    /// Call to `operand1`; the return address is the following instruction.
    Call,
    Ret,
    /// Host service request. `operand1` is the service id.
    Syscall,
}

impl IrOp {
    /// Whether this operation ends a basic block.
    #[must_use]
    pub fn is_control_transfer(self) -> bool {
        matches!(self, Self::Jump | Self::Branch | Self::Call | Self::Ret)
    }
}

impl fmt::Display for IrOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Nop => "nop",
            Self::Push => "push",
            Self::Mov => "mov",
            Self::Load => "load",
            Self::Store => "store",
            Self::Add => "add",
            Self::Sub => "sub",
            Self::Mul => "mul",
            Self::Div => "div",
            Self::Jump => "jump",
            Self::Branch => "branch",
            Self::Call => "call",
            Self::Ret => "ret",
            Self::Syscall => "syscall",
        };
        f.write_str(s)
    }
}

/// One IR instruction, tagged with its origin in the guest binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IrInst {
    /// Sequence-local id, unique within the owning block.
    pub id: u32,
    pub op: IrOp,
    pub operand1: u64,
    pub operand2: u64,
    /// Guest address of the source instruction.
    pub address: u64,
    /// Encoded length in bytes of the source instruction.
    pub size: u8,
}

impl IrInst {
    #[must_use]
    pub fn new(id: u32, op: IrOp, address: u64, size: u8) -> Self {
        Self {
            id,
            op,
            operand1: 0,
            operand2: 0,
            address,
            size,
        }
    }

    #[must_use]
    pub fn with_operands(mut self, operand1: u64, operand2: u64) -> Self {
        self.operand1 = operand1;
        self.operand2 = operand2;
        self
    }

    /// Guest address of the instruction following this one.
    #[must_use]
    pub fn next_address(&self) -> u64 {
        self.address + u64::from(self.size)
    }
}
