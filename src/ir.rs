//! Program substrate consumed by the analysis
//!
//! A minimal typed SSA representation already in extended SSA form: branch
//! outcomes are materialized as sigma (gating) instructions in the successor
//! blocks. The analysis never parses source programs; consumers assemble
//! modules through the [`FunctionBuilder`].

use std::fmt;

/// Identifies an SSA value, unique within a [`Module`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub u32);

/// Identifies a basic block, unique within a [`Function`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId(pub u32);

/// Value type; only integers participate in the analysis
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ty {
    /// Signed integer of the given bit width
    Int(u32),
    /// Anything the analysis does not reason about
    Other,
}

impl Ty {
    /// Bit width for integer types
    pub fn bit_width(&self) -> Option<u32> {
        match self {
            Ty::Int(width) => Some(*width),
            Ty::Other => None,
        }
    }
}

/// Metadata of one SSA value
#[derive(Debug, Clone)]
pub struct ValueInfo {
    /// Human readable name, used by the seed file lookup
    pub name: String,
    /// Value type
    pub ty: Ty,
    /// Name of the owning function
    pub function: String,
}

/// An instruction operand
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    /// A reference to an SSA value
    Value(ValueId),
    /// An integer literal at a given bit width
    Const {
        /// Literal bits, interpreted as signed at `width`
        value: i128,
        /// Bit width of the literal
        width: u32,
    },
}

impl Operand {
    /// Integer literal operand
    pub fn const_int(value: i128, width: u32) -> Self {
        Operand::Const { value, width }
    }

    /// The referenced value, if any
    pub fn as_value(&self) -> Option<ValueId> {
        match self {
            Operand::Value(id) => Some(*id),
            Operand::Const { .. } => None,
        }
    }

    /// The literal, if any
    pub fn as_const(&self) -> Option<(i128, u32)> {
        match self {
            Operand::Const { value, width } => Some((*value, *width)),
            Operand::Value(_) => None,
        }
    }
}

/// Two-operand arithmetic and bitwise operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryAluOp {
    /// Addition
    Add,
    /// Subtraction
    Sub,
    /// Multiplication
    Mul,
    /// Unsigned division
    UDiv,
    /// Signed division
    SDiv,
    /// Unsigned remainder
    URem,
    /// Signed remainder
    SRem,
    /// Left shift
    Shl,
    /// Logical right shift
    Lshr,
    /// Arithmetic right shift
    Ashr,
    /// Bitwise AND
    And,
    /// Bitwise OR
    Or,
    /// Bitwise XOR
    Xor,
}

/// Width-changing and pass-through unary operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastOp {
    /// Truncation to a narrower width
    Trunc,
    /// Zero extension
    ZExt,
    /// Sign extension
    SExt,
    /// Reinterpretation without a value change
    BitCast,
}

/// Signed comparison predicates recognized on branches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpPredicate {
    /// Equal
    Eq,
    /// Not equal
    Ne,
    /// Signed less than
    Slt,
    /// Signed less than or equal
    Sle,
    /// Signed greater than
    Sgt,
    /// Signed greater than or equal
    Sge,
}

impl CmpPredicate {
    /// Logical negation, the predicate holding on the false edge
    pub fn inverse(self) -> Self {
        match self {
            CmpPredicate::Eq => CmpPredicate::Ne,
            CmpPredicate::Ne => CmpPredicate::Eq,
            CmpPredicate::Slt => CmpPredicate::Sge,
            CmpPredicate::Sle => CmpPredicate::Sgt,
            CmpPredicate::Sgt => CmpPredicate::Sle,
            CmpPredicate::Sge => CmpPredicate::Slt,
        }
    }

    /// The predicate with operands swapped: `a < b` becomes `b > a`
    pub fn swapped(self) -> Self {
        match self {
            CmpPredicate::Eq => CmpPredicate::Eq,
            CmpPredicate::Ne => CmpPredicate::Ne,
            CmpPredicate::Slt => CmpPredicate::Sgt,
            CmpPredicate::Sle => CmpPredicate::Sge,
            CmpPredicate::Sgt => CmpPredicate::Slt,
            CmpPredicate::Sge => CmpPredicate::Sle,
        }
    }
}

impl fmt::Display for CmpPredicate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let text = match self {
            CmpPredicate::Eq => "==",
            CmpPredicate::Ne => "!=",
            CmpPredicate::Slt => "<",
            CmpPredicate::Sle => "<=",
            CmpPredicate::Sgt => ">",
            CmpPredicate::Sge => ">=",
        };
        f.write_str(text)
    }
}

/// One SSA instruction
#[derive(Debug, Clone)]
pub enum Inst {
    /// Two-operand arithmetic
    Binary {
        /// Result value
        dest: ValueId,
        /// Operation
        op: BinaryAluOp,
        /// Left operand
        lhs: Operand,
        /// Right operand
        rhs: Operand,
    },
    /// Width change or reinterpretation
    Cast {
        /// Result value
        dest: ValueId,
        /// Cast kind
        op: CastOp,
        /// Source operand
        src: Operand,
    },
    /// Control-flow merge of multiple definitions
    Phi {
        /// Result value
        dest: ValueId,
        /// Incoming value per predecessor block
        incoming: Vec<(Operand, BlockId)>,
    },
    /// Gating instruction splitting a definition by a branch outcome.
    /// Lives in the branch successor block it gates.
    Sigma {
        /// Result value
        dest: ValueId,
        /// The value being gated
        src: ValueId,
    },
    /// Function call
    Call {
        /// Result value for non-void calls
        dest: Option<ValueId>,
        /// Callee name; unresolved names are treated as external
        callee: String,
        /// Argument operands
        args: Vec<Operand>,
    },
    /// Read from a named memory slot
    Load {
        /// Result value
        dest: ValueId,
        /// Slot name
        slot: String,
    },
    /// Write to a named memory slot
    Store {
        /// Slot name
        slot: String,
        /// Stored operand
        src: Operand,
    },
}

impl Inst {
    /// The value this instruction defines, if any
    pub fn dest(&self) -> Option<ValueId> {
        match self {
            Inst::Binary { dest, .. }
            | Inst::Cast { dest, .. }
            | Inst::Phi { dest, .. }
            | Inst::Sigma { dest, .. }
            | Inst::Load { dest, .. } => Some(*dest),
            Inst::Call { dest, .. } => *dest,
            Inst::Store { .. } => None,
        }
    }
}

/// Block terminator
#[derive(Debug, Clone)]
pub enum Terminator {
    /// Unconditional jump
    Jump(BlockId),
    /// Two-way branch on an integer comparison
    CondBr {
        /// Comparison predicate
        pred: CmpPredicate,
        /// Left comparison operand
        lhs: Operand,
        /// Right comparison operand
        rhs: Operand,
        /// Successor when the comparison holds
        on_true: BlockId,
        /// Successor when it does not
        on_false: BlockId,
    },
    /// Multi-way dispatch on an integer value
    Switch {
        /// Scrutinized operand
        on: Operand,
        /// Case label and destination pairs
        cases: Vec<(i128, BlockId)>,
        /// Fallback destination
        default: Option<BlockId>,
    },
    /// Function return
    Return(Option<Operand>),
    /// Unreachable exit
    Unreachable,
}

/// A basic block: straight-line instructions plus one terminator
#[derive(Debug, Clone)]
pub struct BasicBlock {
    /// Block label
    pub label: String,
    /// Instructions in program order
    pub insts: Vec<Inst>,
    /// Terminator, `Unreachable` until set
    pub terminator: Terminator,
}

/// A function in extended SSA form
#[derive(Debug, Clone)]
pub struct Function {
    /// Function name
    pub name: String,
    /// Parameter values in declaration order
    pub params: Vec<ValueId>,
    /// Blocks; index 0 is the entry
    pub blocks: Vec<BasicBlock>,
}

impl Function {
    /// Looks up a block by id
    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id.0 as usize]
    }

    /// All instructions of the function with their containing block
    pub fn insts(&self) -> impl Iterator<Item = (BlockId, &Inst)> {
        self.blocks.iter().enumerate().flat_map(|(index, block)| {
            block
                .insts
                .iter()
                .map(move |inst| (BlockId(index as u32), inst))
        })
    }

    /// The instruction defining `value`, if it is defined in this function
    pub fn defining_inst(&self, value: ValueId) -> Option<&Inst> {
        self.insts()
            .map(|(_, inst)| inst)
            .find(|inst| inst.dest() == Some(value))
    }
}

/// A whole program: a value table plus its functions
#[derive(Debug, Clone, Default)]
pub struct Module {
    /// All SSA values of the program
    pub values: Vec<ValueInfo>,
    /// All functions
    pub functions: Vec<Function>,
}

impl Module {
    /// Value metadata lookup
    pub fn value(&self, id: ValueId) -> &ValueInfo {
        &self.values[id.0 as usize]
    }

    /// Bit width of a value, `None` for non-integer values
    pub fn value_width(&self, id: ValueId) -> Option<u32> {
        self.value(id).ty.bit_width()
    }

    /// Function lookup by name
    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    /// The widest integer type observed in the program, the analysis width `W`
    pub fn max_bit_width(&self) -> u32 {
        self.values
            .iter()
            .filter_map(|info| info.ty.bit_width())
            .max()
            .unwrap_or(64)
    }

    /// Finds a value by function and name, used by the seed preload
    pub fn find_value(&self, function: &str, name: &str) -> Option<ValueId> {
        self.values
            .iter()
            .position(|info| info.function == function && info.name == name)
            .map(|index| ValueId(index as u32))
    }
}

/// Incremental construction of one function inside a module
pub struct FunctionBuilder<'a> {
    module: &'a mut Module,
    function: Function,
    current: BlockId,
}

impl<'a> FunctionBuilder<'a> {
    /// Starts a function with an implicit `entry` block
    pub fn new(module: &'a mut Module, name: &str) -> Self {
        let function = Function {
            name: name.to_string(),
            params: Vec::new(),
            blocks: vec![BasicBlock {
                label: "entry".to_string(),
                insts: Vec::new(),
                terminator: Terminator::Unreachable,
            }],
        };
        Self {
            module,
            function,
            current: BlockId(0),
        }
    }

    fn new_value(&mut self, name: &str, ty: Ty) -> ValueId {
        let id = ValueId(self.module.values.len() as u32);
        self.module.values.push(ValueInfo {
            name: name.to_string(),
            ty,
            function: self.function.name.clone(),
        });
        id
    }

    /// Declares an integer parameter
    pub fn int_param(&mut self, name: &str, width: u32) -> ValueId {
        let id = self.new_value(name, Ty::Int(width));
        self.function.params.push(id);
        id
    }

    /// Declares a non-integer parameter
    pub fn opaque_param(&mut self, name: &str) -> ValueId {
        let id = self.new_value(name, Ty::Other);
        self.function.params.push(id);
        id
    }

    /// The entry block id
    pub fn entry(&self) -> BlockId {
        BlockId(0)
    }

    /// Appends a new empty block
    pub fn block(&mut self, label: &str) -> BlockId {
        let id = BlockId(self.function.blocks.len() as u32);
        self.function.blocks.push(BasicBlock {
            label: label.to_string(),
            insts: Vec::new(),
            terminator: Terminator::Unreachable,
        });
        id
    }

    /// Selects the block receiving subsequent instructions
    pub fn switch_to(&mut self, block: BlockId) {
        self.current = block;
    }

    fn push(&mut self, inst: Inst) {
        self.function.blocks[self.current.0 as usize].insts.push(inst);
    }

    /// Emits a binary instruction
    pub fn binary(&mut self, name: &str, width: u32, op: BinaryAluOp, lhs: Operand, rhs: Operand) -> ValueId {
        let dest = self.new_value(name, Ty::Int(width));
        self.push(Inst::Binary { dest, op, lhs, rhs });
        dest
    }

    /// Emits a cast instruction
    pub fn cast(&mut self, name: &str, width: u32, op: CastOp, src: Operand) -> ValueId {
        let dest = self.new_value(name, Ty::Int(width));
        self.push(Inst::Cast { dest, op, src });
        dest
    }

    /// Emits a phi instruction
    pub fn phi(&mut self, name: &str, width: u32, incoming: Vec<(Operand, BlockId)>) -> ValueId {
        let dest = self.new_value(name, Ty::Int(width));
        self.push(Inst::Phi { dest, incoming });
        dest
    }

    /// Emits a sigma (gating) instruction in the current block
    pub fn sigma(&mut self, name: &str, src: ValueId) -> ValueId {
        let ty = self.module.value(src).ty;
        let dest = self.new_value(name, ty);
        self.push(Inst::Sigma { dest, src });
        dest
    }

    /// Emits a call with an integer result
    pub fn call(&mut self, name: &str, width: u32, callee: &str, args: Vec<Operand>) -> ValueId {
        let dest = self.new_value(name, Ty::Int(width));
        self.push(Inst::Call {
            dest: Some(dest),
            callee: callee.to_string(),
            args,
        });
        dest
    }

    /// Emits a call without a result
    pub fn call_void(&mut self, callee: &str, args: Vec<Operand>) {
        self.push(Inst::Call {
            dest: None,
            callee: callee.to_string(),
            args,
        });
    }

    /// Emits a load from a named memory slot
    pub fn load(&mut self, name: &str, width: u32, slot: &str) -> ValueId {
        let dest = self.new_value(name, Ty::Int(width));
        self.push(Inst::Load {
            dest,
            slot: slot.to_string(),
        });
        dest
    }

    /// Emits a store to a named memory slot
    pub fn store(&mut self, slot: &str, src: Operand) {
        self.push(Inst::Store {
            slot: slot.to_string(),
            src,
        });
    }

    fn terminate(&mut self, terminator: Terminator) {
        self.function.blocks[self.current.0 as usize].terminator = terminator;
    }

    /// Terminates the current block with an unconditional jump
    pub fn jump(&mut self, target: BlockId) {
        self.terminate(Terminator::Jump(target));
    }

    /// Terminates the current block with a conditional branch
    pub fn cond_br(
        &mut self,
        pred: CmpPredicate,
        lhs: Operand,
        rhs: Operand,
        on_true: BlockId,
        on_false: BlockId,
    ) {
        self.terminate(Terminator::CondBr {
            pred,
            lhs,
            rhs,
            on_true,
            on_false,
        });
    }

    /// Terminates the current block with a switch
    pub fn switch(&mut self, on: Operand, cases: Vec<(i128, BlockId)>, default: Option<BlockId>) {
        self.terminate(Terminator::Switch { on, cases, default });
    }

    /// Terminates the current block with a return
    pub fn ret(&mut self, value: Option<Operand>) {
        self.terminate(Terminator::Return(value));
    }

    /// Finishes the function and registers it in the module
    pub fn finish(self) {
        self.module.functions.push(self.function);
    }
}
