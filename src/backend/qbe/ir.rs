//! Flat IR in the shape of QBE's intermediate language
//!
//! A function body is one instruction stream; labels are instructions and
//! every value is a `%`-temporary, a constant, or a `$`-global.

use std::fmt;

/// Value class of a temporary, or an aggregate passed by the ABI
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QType {
    /// `w`: i32, bool
    Word,
    /// `l`: i64, pointers, strings
    Long,
    /// `s`: f32
    Single,
    /// `d`: f64
    Double,
    /// `:Name`, only in signatures and call results; held in `l` temporaries
    Aggregate(String),
}

impl QType {
    pub fn is_float(&self) -> bool {
        matches!(self, QType::Single | QType::Double)
    }

    /// Class of a temporary holding a value of this type
    pub fn base(&self) -> QType {
        match self {
            QType::Aggregate(_) => QType::Long,
            other => other.clone(),
        }
    }
}

impl fmt::Display for QType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QType::Word => write!(f, "w"),
            QType::Long => write!(f, "l"),
            QType::Single => write!(f, "s"),
            QType::Double => write!(f, "d"),
            QType::Aggregate(name) => write!(f, ":{}", name),
        }
    }
}

/// Operand
#[derive(Debug, Clone, PartialEq)]
pub enum QValue {
    Temp(String),
    Const(i64),
    Single(f32),
    Double(f64),
    Global(String),
}

impl fmt::Display for QValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QValue::Temp(name) => write!(f, "%{}", name),
            QValue::Const(v) => write!(f, "{}", v),
            QValue::Single(v) => write!(f, "s_{:?}", v),
            QValue::Double(v) => write!(f, "d_{:?}", v),
            QValue::Global(name) => write!(f, "${}", name),
        }
    }
}

/// Comparison condition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cond {
    Eq,
    Ne,
    /// Signed integer orderings
    Slt,
    Sle,
    Sgt,
    Sge,
    /// Float orderings
    Lt,
    Le,
    Gt,
    Ge,
}

impl fmt::Display for Cond {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Cond::Eq => "eq",
            Cond::Ne => "ne",
            Cond::Slt => "slt",
            Cond::Sle => "sle",
            Cond::Sgt => "sgt",
            Cond::Sge => "sge",
            Cond::Lt => "lt",
            Cond::Le => "le",
            Cond::Gt => "gt",
            Cond::Ge => "ge",
        };
        write!(f, "{}", s)
    }
}

/// Opcode of a value-producing instruction
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    Shl,
    Sar,
    Neg,
    Copy,
    /// Stack allocation with the given alignment (4, 8, or 16)
    Alloc(usize),
    Load(QType),
    /// Compare operands of the given class; result is a word 0/1
    Cmp(Cond, QType),
    /// i32 to i64, signed
    Extsw,
    /// bool to i64
    Extuw,
    /// f32 to f64
    Exts,
    /// f64 to f32
    Truncd,
    /// f32 / f64 to integer
    Stosi,
    Dtosi,
    /// i32 / i64 to float
    Swtof,
    Sltof,
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Op::Add => write!(f, "add"),
            Op::Sub => write!(f, "sub"),
            Op::Mul => write!(f, "mul"),
            Op::Div => write!(f, "div"),
            Op::Rem => write!(f, "rem"),
            Op::And => write!(f, "and"),
            Op::Or => write!(f, "or"),
            Op::Xor => write!(f, "xor"),
            Op::Shl => write!(f, "shl"),
            Op::Sar => write!(f, "sar"),
            Op::Neg => write!(f, "neg"),
            Op::Copy => write!(f, "copy"),
            Op::Alloc(align) => write!(f, "alloc{}", align),
            Op::Load(ty) => write!(f, "load{}", ty),
            Op::Cmp(cond, ty) => write!(f, "c{}{}", cond, ty),
            Op::Extsw => write!(f, "extsw"),
            Op::Extuw => write!(f, "extuw"),
            Op::Exts => write!(f, "exts"),
            Op::Truncd => write!(f, "truncd"),
            Op::Stosi => write!(f, "stosi"),
            Op::Dtosi => write!(f, "dtosi"),
            Op::Swtof => write!(f, "swtof"),
            Op::Sltof => write!(f, "sltof"),
        }
    }
}

/// One line of a function body
#[derive(Debug, Clone, PartialEq)]
pub enum QInstr {
    Label(String),
    /// %dest =ty op args
    Assign {
        dest: String,
        ty: QType,
        op: Op,
        args: Vec<QValue>,
    },
    /// store{ty} value, addr
    Store {
        ty: QType,
        value: QValue,
        addr: QValue,
    },
    /// blit src, dst, size
    Blit {
        src: QValue,
        dst: QValue,
        size: usize,
    },
    /// [%dest =ty] call $func(args)
    Call {
        dest: Option<(String, QType)>,
        func: String,
        args: Vec<(QType, QValue)>,
    },
    Jmp(String),
    Jnz {
        cond: QValue,
        if_true: String,
        if_false: String,
    },
    Ret(Option<QValue>),
    /// Control cannot reach this point
    Hlt,
}

impl QInstr {
    pub fn is_jump(&self) -> bool {
        matches!(
            self,
            QInstr::Jmp(_) | QInstr::Jnz { .. } | QInstr::Ret(_) | QInstr::Hlt
        )
    }
}

/// `type :Name = align A { size }`
#[derive(Debug, Clone, PartialEq)]
pub struct QTypeDef {
    pub name: String,
    pub align: usize,
    pub size: usize,
}

/// NUL-terminated byte string
#[derive(Debug, Clone, PartialEq)]
pub struct QData {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QFunction {
    pub name: String,
    pub export: bool,
    pub params: Vec<(QType, String)>,
    pub ret: Option<QType>,
    pub body: Vec<QInstr>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QModule {
    pub types: Vec<QTypeDef>,
    pub data: Vec<QData>,
    pub functions: Vec<QFunction>,
}

impl QModule {
    pub fn function(&self, name: &str) -> Option<&QFunction> {
        self.functions.iter().find(|f| f.name == name)
    }

    #[cfg(test)]
    pub fn type_def(&self, name: &str) -> Option<&QTypeDef> {
        self.types.iter().find(|t| t.name == name)
    }
}
