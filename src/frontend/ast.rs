//! Abstract Syntax Tree definitions for Spezi
//!
//! The tree is immutable once parsed. Expressions, variable declarations
//! and blocks carry a [`NodeId`] so later passes can attach information
//! through side tables instead of mutating nodes.

use std::collections::HashMap;

use crate::types::Type;
use crate::utils::{Error, Result, Span};

/// Identity of a tree node, unique within one compilation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

/// Resolved types keyed by node, filled in by semantic analysis
#[derive(Debug, Clone, Default)]
pub struct TypeTable {
    types: HashMap<NodeId, Type>,
}

impl TypeTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: NodeId, ty: Type) {
        self.types.insert(id, ty);
    }

    pub fn get(&self, id: NodeId) -> Option<&Type> {
        self.types.get(&id)
    }

    /// Type of an expression; a missing entry is an internal error
    pub fn of(&self, expr: &Expr) -> Result<&Type> {
        self.types
            .get(&expr.id)
            .ok_or_else(|| Error::CodeGen(format!("expression {:?} has no type", expr.id)))
    }

    /// Effective type of a variable declaration
    pub fn of_decl(&self, decl: &VarDecl) -> Result<&Type> {
        self.types.get(&decl.id).ok_or_else(|| {
            Error::CodeGen(format!("variable '{}' has no type", decl.name))
        })
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NodeId, &Type)> {
        self.types.iter()
    }
}

/// A complete program (compilation unit)
#[derive(Debug, Clone, Default)]
pub struct Program {
    pub items: Vec<Item>,
}

impl Program {
    pub fn structs(&self) -> impl Iterator<Item = &StructDef> {
        self.items.iter().filter_map(|item| match item {
            Item::Struct(s) => Some(s),
            _ => None,
        })
    }

    pub fn functions(&self) -> impl Iterator<Item = &FnDef> {
        self.items.iter().filter_map(|item| match item {
            Item::Fn(f) => Some(f),
            _ => None,
        })
    }

    pub fn externs(&self) -> impl Iterator<Item = &ExternFnDef> {
        self.items.iter().filter_map(|item| match item {
            Item::Extern(e) => Some(e),
            _ => None,
        })
    }
}

/// Top-level items
#[derive(Debug, Clone)]
pub enum Item {
    /// `import a.b`; replaced by the imported items during module loading
    Import(ImportDecl),
    Struct(StructDef),
    Fn(FnDef),
    Extern(ExternFnDef),
}

#[derive(Debug, Clone)]
pub struct ImportDecl {
    /// Dotted path segments, e.g. `["std", "io"]`
    pub path: Vec<String>,
    pub span: Span,
}

impl ImportDecl {
    pub fn dotted(&self) -> String {
        self.path.join(".")
    }
}

/// Struct definition
#[derive(Debug, Clone)]
pub struct StructDef {
    pub name: String,
    pub fields: Vec<Field>,
    pub span: Span,
}

impl StructDef {
    pub fn field(&self, name: &str) -> Option<(usize, &Field)> {
        self.fields.iter().enumerate().find(|(_, f)| f.name == name)
    }
}

#[derive(Debug, Clone)]
pub struct Field {
    pub name: String,
    pub ty: Type,
    pub span: Span,
}

/// Function parameter
#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub ty: Type,
    pub span: Span,
}

/// Function definition
#[derive(Debug, Clone)]
pub struct FnDef {
    pub name: String,
    /// Dotted module the function was imported from; empty for the main file
    pub module: String,
    /// Receiver type of an extension method (`fn Vector.len()`)
    pub extension_of: Option<Type>,
    pub params: Vec<Param>,
    pub ret: Type,
    pub body: Block,
    pub span: Span,
}

impl FnDef {
    /// Parameter types as seen by a caller, receiver first for extensions
    pub fn call_signature(&self) -> Vec<Type> {
        self.extension_of
            .iter()
            .cloned()
            .chain(self.params.iter().map(|p| p.ty.clone()))
            .collect()
    }
}

/// Foreign function bound to the C calling convention
#[derive(Debug, Clone)]
pub struct ExternFnDef {
    pub name: String,
    pub params: Vec<Param>,
    pub ret: Type,
    pub span: Span,
}

impl ExternFnDef {
    pub fn param_types(&self) -> Vec<Type> {
        self.params.iter().map(|p| p.ty.clone()).collect()
    }
}

/// Code block
#[derive(Debug, Clone)]
pub struct Block {
    pub id: NodeId,
    pub stmts: Vec<Stmt>,
    pub span: Span,
}

/// `let [mut] name [: type] [= expr]`
#[derive(Debug, Clone)]
pub struct VarDecl {
    pub id: NodeId,
    pub name: String,
    pub ty: Option<Type>,
    pub mutable: bool,
    pub init: Option<Expr>,
    pub span: Span,
}

/// Statement
#[derive(Debug, Clone)]
pub enum Stmt {
    VarDecl(VarDecl),
    /// name = expr
    Assign {
        name: String,
        value: Expr,
        span: Span,
    },
    If {
        cond: Expr,
        then_block: Block,
        else_block: Option<Block>,
        span: Span,
    },
    /// return [expr]
    Return {
        value: Option<Expr>,
        span: Span,
    },
    /// Expression statement
    Expr(Expr),
}

impl Stmt {
    pub fn span(&self) -> Span {
        match self {
            Stmt::VarDecl(decl) => decl.span,
            Stmt::Assign { span, .. } => *span,
            Stmt::If { span, .. } => *span,
            Stmt::Return { span, .. } => *span,
            Stmt::Expr(expr) => expr.span,
        }
    }
}

/// Expression
#[derive(Debug, Clone)]
pub struct Expr {
    pub id: NodeId,
    pub kind: ExprKind,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    /// Integer literal; `long` when written with the `L` suffix
    Int { value: i64, long: bool },
    /// Float literal; `single` when written with the `f` suffix
    Float { value: f64, single: bool },
    Bool(bool),
    Str(String),
    VarRef(String),
    Unary {
        op: UnOp,
        expr: Box<Expr>,
    },
    Binary {
        left: Box<Expr>,
        op: BinOp,
        right: Box<Expr>,
    },
    /// expr as Type
    Cast {
        expr: Box<Expr>,
        ty: Type,
    },
    /// Free call or dotted method call; a method call carries its
    /// receiver as the first argument
    Call {
        name: String,
        args: Vec<Expr>,
    },
    /// new Name(args)
    Constructor {
        name: String,
        args: Vec<Expr>,
    },
    /// object.member
    Access {
        object: Box<Expr>,
        member: String,
    },
}

/// Binary operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    // Comparison
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    // Bitwise
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
}

impl BinOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::BitAnd => "&",
            BinOp::BitOr => "|",
            BinOp::BitXor => "^",
            BinOp::Shl => "<<",
            BinOp::Shr => ">>",
        }
    }

    pub fn is_equality(&self) -> bool {
        matches!(self, BinOp::Eq | BinOp::Ne)
    }

    pub fn is_ordering(&self) -> bool {
        matches!(self, BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge)
    }

    pub fn is_comparison(&self) -> bool {
        self.is_equality() || self.is_ordering()
    }

    /// Bitwise and shift operators
    pub fn is_bitwise(&self) -> bool {
        matches!(
            self,
            BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor | BinOp::Shl | BinOp::Shr
        )
    }
}

/// Unary operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    /// Negation (-)
    Neg,
    /// Logical not (!)
    Not,
    /// Bitwise not (~)
    BitNot,
}

impl UnOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            UnOp::Neg => "-",
            UnOp::Not => "!",
            UnOp::BitNot => "~",
        }
    }
}
