//! SSA-style IR
//!
//! Basic blocks of typed instructions over virtual registers, with explicit
//! stack slots for locals and structural field addressing. Every register is
//! assigned exactly once; mutable variables live in `Alloca` slots.

use std::fmt;

/// IR Module - contains all functions
#[derive(Debug, Clone, Default)]
pub struct IrModule {
    pub name: String,
    pub structs: Vec<IrStruct>,
    /// NUL-terminated string constants, referenced as `Value::Global`
    pub strings: Vec<IrString>,
    pub externs: Vec<IrExtern>,
    pub functions: Vec<IrFunction>,
}

impl IrModule {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    pub fn struct_def(&self, name: &str) -> Option<&IrStruct> {
        self.structs.iter().find(|s| s.name == name)
    }

    pub fn function(&self, name: &str) -> Option<&IrFunction> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn extern_decl(&self, name: &str) -> Option<&IrExtern> {
        self.externs.iter().find(|e| e.name == name)
    }

    /// Parameter and return types of a defined or declared function
    pub fn signature(&self, name: &str) -> Option<(Vec<IrType>, IrType)> {
        if let Some(f) = self.function(name) {
            return Some((f.params.iter().map(|(_, t)| t.clone()).collect(), f.ret.clone()));
        }
        self.extern_decl(name)
            .map(|e| (e.params.clone(), e.ret.clone()))
    }
}

/// Named aggregate type
#[derive(Debug, Clone, PartialEq)]
pub struct IrStruct {
    pub name: String,
    pub fields: Vec<IrType>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IrString {
    pub name: String,
    pub value: String,
}

/// External function declaration
#[derive(Debug, Clone, PartialEq)]
pub struct IrExtern {
    pub name: String,
    pub params: Vec<IrType>,
    pub ret: IrType,
}

/// IR Function
#[derive(Debug, Clone)]
pub struct IrFunction {
    pub name: String,
    pub params: Vec<(String, IrType)>,
    pub ret: IrType,
    /// `blocks[0]` is the entry block
    pub blocks: Vec<BasicBlock>,
    next_register: usize,
}

impl IrFunction {
    pub fn new(name: &str, params: Vec<(String, IrType)>, ret: IrType) -> Self {
        Self {
            name: name.to_string(),
            params,
            ret,
            blocks: Vec::new(),
            next_register: 0,
        }
    }

    pub fn add_block(&mut self, label: &str) -> BlockId {
        let id = BlockId(self.blocks.len());
        self.blocks.push(BasicBlock::new(id, label));
        id
    }

    pub fn block(&self, id: BlockId) -> Option<&BasicBlock> {
        self.blocks.get(id.0)
    }

    pub fn block_mut(&mut self, id: BlockId) -> Option<&mut BasicBlock> {
        self.blocks.get_mut(id.0)
    }

    pub fn alloc_register(&mut self) -> Register {
        let r = Register(self.next_register);
        self.next_register += 1;
        r
    }
}

/// Basic Block - a sequence of instructions with single entry/exit
#[derive(Debug, Clone)]
pub struct BasicBlock {
    pub id: BlockId,
    pub label: String,
    pub instructions: Vec<Instruction>,
    pub terminator: Option<Terminator>,
}

impl BasicBlock {
    pub fn new(id: BlockId, label: &str) -> Self {
        Self {
            id,
            label: label.to_string(),
            instructions: Vec::new(),
            terminator: None,
        }
    }

    pub fn push(&mut self, inst: Instruction) {
        self.instructions.push(inst);
    }

    pub fn set_terminator(&mut self, term: Terminator) {
        self.terminator = Some(term);
    }

    pub fn is_terminated(&self) -> bool {
        self.terminator.is_some()
    }
}

/// Block identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId(pub usize);

/// Virtual register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Register(pub usize);

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%r{}", self.0)
    }
}

/// IR Type
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IrType {
    Void,
    /// `bool`
    I1,
    I32,
    I64,
    F32,
    F64,
    /// Opaque pointer: strings, stack slots, extension receivers
    Ptr,
    Struct(String),
}

impl IrType {
    pub fn is_int(&self) -> bool {
        matches!(self, IrType::I1 | IrType::I32 | IrType::I64)
    }

    pub fn is_float(&self) -> bool {
        matches!(self, IrType::F32 | IrType::F64)
    }

    pub fn bits(&self) -> u32 {
        match self {
            IrType::I1 => 1,
            IrType::I32 | IrType::F32 => 32,
            IrType::I64 | IrType::F64 | IrType::Ptr => 64,
            IrType::Void | IrType::Struct(_) => 0,
        }
    }
}

impl fmt::Display for IrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IrType::Void => write!(f, "void"),
            IrType::I1 => write!(f, "i1"),
            IrType::I32 => write!(f, "i32"),
            IrType::I64 => write!(f, "i64"),
            IrType::F32 => write!(f, "float"),
            IrType::F64 => write!(f, "double"),
            IrType::Ptr => write!(f, "ptr"),
            IrType::Struct(name) => write!(f, "%{}", name),
        }
    }
}

/// IR Value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Register(Register),
    /// Integer constant of the given integer type
    ConstInt(i64, IrType),
    /// Float constant of the given float type
    ConstFloat(f64, IrType),
    /// All-zero value of any type
    Zero(IrType),
    /// Function parameter by position
    Param(usize),
    /// Address of a module-level string constant
    Global(String),
}

/// IR Instruction (non-terminating)
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    /// dest = alloca ty
    Alloca { dest: Register, ty: IrType },

    /// dest = load ty, ptr
    Load { dest: Register, ty: IrType, ptr: Value },

    /// store ty value, ptr
    Store { ty: IrType, value: Value, ptr: Value },

    /// dest = op ty left, right
    BinOp {
        dest: Register,
        op: BinOp,
        ty: IrType,
        left: Value,
        right: Value,
    },

    /// dest = cmp pred ty left, right (always i1)
    Cmp {
        dest: Register,
        pred: CmpPred,
        ty: IrType,
        left: Value,
        right: Value,
    },

    /// dest = op value from `from` to `to`
    Cast {
        dest: Register,
        op: CastOp,
        value: Value,
        from: IrType,
        to: IrType,
    },

    /// dest = address of field `index` of the struct at `base`
    FieldPtr {
        dest: Register,
        struct_name: String,
        base: Value,
        index: usize,
    },

    /// [dest =] call ret (params) func(args...)
    Call {
        dest: Option<Register>,
        func: String,
        ret: IrType,
        /// Parameter types of the declaration the call resolved to; an
        /// extern overload may differ from the one `declare` line
        params: Vec<IrType>,
        args: Vec<(IrType, Value)>,
    },
}

impl Instruction {
    /// Register assigned by this instruction, if any
    pub fn dest(&self) -> Option<Register> {
        match self {
            Instruction::Alloca { dest, .. }
            | Instruction::Load { dest, .. }
            | Instruction::BinOp { dest, .. }
            | Instruction::Cmp { dest, .. }
            | Instruction::Cast { dest, .. }
            | Instruction::FieldPtr { dest, .. } => Some(*dest),
            Instruction::Call { dest, .. } => *dest,
            Instruction::Store { .. } => None,
        }
    }
}

/// Block terminator
#[derive(Debug, Clone, PartialEq)]
pub enum Terminator {
    /// ret [ty value]
    Return { value: Option<(IrType, Value)> },

    /// br target
    Jump { target: BlockId },

    /// br cond, then_target, else_target
    Branch {
        cond: Value,
        then_target: BlockId,
        else_target: BlockId,
    },

    /// Control never reaches the end of this block
    Unreachable,
}

impl Terminator {
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Terminator::Jump { target } => vec![*target],
            Terminator::Branch {
                then_target,
                else_target,
                ..
            } => vec![*then_target, *else_target],
            Terminator::Return { .. } | Terminator::Unreachable => Vec::new(),
        }
    }
}

/// Binary operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    SDiv,
    SRem,
    FAdd,
    FSub,
    FMul,
    FDiv,
    And,
    Or,
    Xor,
    Shl,
    AShr,
}

impl BinOp {
    pub fn is_float(&self) -> bool {
        matches!(self, BinOp::FAdd | BinOp::FSub | BinOp::FMul | BinOp::FDiv)
    }
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinOp::Add => "add",
            BinOp::Sub => "sub",
            BinOp::Mul => "mul",
            BinOp::SDiv => "sdiv",
            BinOp::SRem => "srem",
            BinOp::FAdd => "fadd",
            BinOp::FSub => "fsub",
            BinOp::FMul => "fmul",
            BinOp::FDiv => "fdiv",
            BinOp::And => "and",
            BinOp::Or => "or",
            BinOp::Xor => "xor",
            BinOp::Shl => "shl",
            BinOp::AShr => "ashr",
        };
        write!(f, "{}", s)
    }
}

/// Comparison predicate; integer predicates are signed, float ones ordered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpPred {
    Eq,
    Ne,
    Slt,
    Sle,
    Sgt,
    Sge,
    Oeq,
    One,
    Olt,
    Ole,
    Ogt,
    Oge,
}

impl CmpPred {
    pub fn is_float(&self) -> bool {
        matches!(
            self,
            CmpPred::Oeq | CmpPred::One | CmpPred::Olt | CmpPred::Ole | CmpPred::Ogt | CmpPred::Oge
        )
    }
}

impl fmt::Display for CmpPred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CmpPred::Eq => "icmp eq",
            CmpPred::Ne => "icmp ne",
            CmpPred::Slt => "icmp slt",
            CmpPred::Sle => "icmp sle",
            CmpPred::Sgt => "icmp sgt",
            CmpPred::Sge => "icmp sge",
            CmpPred::Oeq => "fcmp oeq",
            CmpPred::One => "fcmp one",
            CmpPred::Olt => "fcmp olt",
            CmpPred::Ole => "fcmp ole",
            CmpPred::Ogt => "fcmp ogt",
            CmpPred::Oge => "fcmp oge",
        };
        write!(f, "{}", s)
    }
}

/// Conversion operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastOp {
    SExt,
    ZExt,
    Trunc,
    SIToFP,
    FPToSI,
    FPExt,
    FPTrunc,
}

impl fmt::Display for CastOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CastOp::SExt => "sext",
            CastOp::ZExt => "zext",
            CastOp::Trunc => "trunc",
            CastOp::SIToFP => "sitofp",
            CastOp::FPToSI => "fptosi",
            CastOp::FPExt => "fpext",
            CastOp::FPTrunc => "fptrunc",
        };
        write!(f, "{}", s)
    }
}
