//! Semantic Analysis for Spezi
//!
//! Performs:
//! - Scope management for parameters and locals
//! - Type inference and checking of every expression
//! - Overload and extension method resolution
//!
//! The tree is not modified. Results go into an [`Analysis`]: a type per
//! expression and variable declaration, the declarations made directly in
//! each block, and the diagnostics. Every violated rule reports one
//! diagnostic and gives the offending node the type `Error`, which the
//! enclosing nodes accept silently so one mistake does not cascade.

use std::collections::{HashMap, HashSet};

use crate::frontend::ast::*;
use crate::frontend::scope::ScopeStack;
use crate::middle::mangle::{mangle_fn, ENTRY_POINT};
use crate::middle::symbols::{ResolveError, SymbolTables};
use crate::types::{is_valid_cast, Type};
use crate::utils::{Diagnostics, Level, Span};

/// Result of analysing a whole program
#[derive(Debug, Default)]
pub struct Analysis {
    pub types: TypeTable,
    /// Block id to the variable declarations made directly in that block,
    /// in source order
    pub declared_vars: HashMap<NodeId, Vec<NodeId>>,
    pub diagnostics: Diagnostics,
}

impl Analysis {
    pub fn has_errors(&self) -> bool {
        self.diagnostics.has_errors()
    }

    pub fn declared_in(&self, block: &Block) -> &[NodeId] {
        self.declared_vars
            .get(&block.id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// What the analyzer knows about a name in scope
#[derive(Debug, Clone)]
struct Binding {
    ty: Type,
    mutable: bool,
    /// `self` aliases the caller's variable
    receiver: bool,
}

/// The semantic analyzer
pub struct SemanticAnalyzer<'p> {
    program: &'p Program,
    symbols: SymbolTables<'p>,
    scopes: ScopeStack<Binding>,
    /// Blocks being checked, innermost last
    blocks: Vec<NodeId>,
    current_ret: Type,
    result: Analysis,
}

impl<'p> SemanticAnalyzer<'p> {
    pub fn new(program: &'p Program) -> Self {
        Self {
            program,
            symbols: SymbolTables::build(program),
            scopes: ScopeStack::new(),
            blocks: Vec::new(),
            current_ret: Type::Void,
            result: Analysis::default(),
        }
    }

    /// Check the whole program
    pub fn analyze(mut self) -> Analysis {
        let program = self.program;
        log::debug!("Analyzing {} items", program.items.len());

        let mut struct_names: HashSet<&str> = HashSet::new();
        for s in program.structs() {
            if !struct_names.insert(&s.name) {
                self.error(format!("Duplicate struct '{}'", s.name), s.span);
                continue;
            }
            self.check_struct(s);
        }
        for e in program.externs() {
            for param in &e.params {
                self.check_declared_type(&param.ty, param.span);
            }
            self.check_declared_type(&e.ret, e.span);
        }
        let mut linkage: HashSet<String> = HashSet::new();
        for f in program.functions() {
            self.check_function(f);
            if f.name == ENTRY_POINT {
                continue;
            }
            if !linkage.insert(mangle_fn(f)) {
                self.error(
                    format!("Function '{}' is already defined with the same parameters", f.name),
                    f.span,
                );
            }
        }

        let mains: Vec<&FnDef> = program
            .functions()
            .filter(|f| f.name == ENTRY_POINT)
            .collect();
        match mains.as_slice() {
            [] => self
                .result
                .diagnostics
                .report(Level::Error, "Missing main function", None),
            [_] => {}
            [_, rest @ ..] => {
                for extra in rest {
                    self.error("Duplicate main function", extra.span);
                }
            }
        }

        log::debug!(
            "Analysis finished with {} diagnostic(s)",
            self.result.diagnostics.len()
        );
        self.result
    }

    fn error(&mut self, message: impl Into<String>, span: Span) {
        self.result.diagnostics.error(message, span);
    }

    fn set_type(&mut self, id: NodeId, ty: Type) -> Type {
        self.result.types.insert(id, ty.clone());
        ty
    }

    // ==================== Declarations ====================

    /// Report a struct type that names no declared struct
    fn check_declared_type(&mut self, ty: &Type, span: Span) -> bool {
        match ty {
            Type::Struct(name) if self.symbols.struct_def(name).is_none() => {
                self.error(format!("Unknown struct '{}'", name), span);
                false
            }
            _ => true,
        }
    }

    fn check_struct(&mut self, s: &StructDef) {
        let mut seen: Vec<&str> = Vec::new();
        for field in &s.fields {
            if seen.contains(&field.name.as_str()) {
                self.error(
                    format!("Duplicate field '{}' in struct '{}'", field.name, s.name),
                    field.span,
                );
            }
            seen.push(&field.name);
            if field.ty == Type::Void {
                self.error(format!("Field '{}' cannot be void", field.name), field.span);
            }
            self.check_declared_type(&field.ty, field.span);
        }
        if self.holds_by_value(s, &s.name) {
            self.error(format!("Struct '{}' contains itself by value", s.name), s.span);
        }
    }

    /// Whether `target` is reachable from `s` through by-value fields
    fn holds_by_value(&self, s: &StructDef, target: &str) -> bool {
        let mut pending: Vec<&StructDef> = vec![s];
        let mut visited: HashSet<&str> = HashSet::new();
        while let Some(def) = pending.pop() {
            for field in &def.fields {
                let Some(name) = field.ty.struct_name() else { continue };
                if name == target {
                    return true;
                }
                if visited.insert(name) {
                    pending.extend(self.symbols.struct_def(name));
                }
            }
        }
        false
    }

    fn check_function(&mut self, f: &FnDef) {
        log::trace!("Checking function '{}'", f.name);
        self.scopes.clear();
        self.scopes.push();
        self.current_ret = f.ret.clone();
        self.check_declared_type(&f.ret, f.span);

        if let Some(receiver) = &f.extension_of {
            if self.check_declared_type(receiver, f.span) {
                self.scopes.define(
                    "self",
                    Binding {
                        ty: receiver.clone(),
                        mutable: false,
                        receiver: true,
                    },
                );
            }
        }

        let mut names: Vec<&str> = Vec::new();
        for param in &f.params {
            if names.contains(&param.name.as_str()) {
                self.error(format!("Duplicate parameter '{}'", param.name), param.span);
            }
            names.push(&param.name);
            let ty = if self.check_declared_type(&param.ty, param.span) {
                param.ty.clone()
            } else {
                Type::Error
            };
            self.scopes.define(
                param.name.clone(),
                Binding {
                    ty,
                    mutable: false,
                    receiver: false,
                },
            );
        }

        self.check_block(&f.body);
        self.scopes.pop();
    }

    // ==================== Statements ====================

    fn check_block(&mut self, block: &Block) {
        self.blocks.push(block.id);
        self.result.declared_vars.entry(block.id).or_default();
        for stmt in &block.stmts {
            self.check_stmt(stmt);
        }
        self.blocks.pop();
    }

    /// A branch body gets its own scope frame
    fn check_nested_block(&mut self, block: &Block) {
        self.scopes.push();
        self.check_block(block);
        self.scopes.pop();
    }

    fn check_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::VarDecl(decl) => self.check_var_decl(decl),
            Stmt::Assign { name, value, span } => self.check_assign(name, value, *span),
            Stmt::If {
                cond,
                then_block,
                else_block,
                ..
            } => {
                let cond_ty = self.infer(cond);
                if cond_ty != Type::Bool && !cond_ty.is_error() {
                    self.error(
                        format!("If condition must be bool, found {}", cond_ty),
                        cond.span,
                    );
                }
                self.check_nested_block(then_block);
                if let Some(else_block) = else_block {
                    self.check_nested_block(else_block);
                }
            }
            Stmt::Return { value, span } => {
                let ty = match value {
                    Some(expr) => self.infer(expr),
                    None => Type::Void,
                };
                if !ty.is_error() && ty != self.current_ret {
                    let expected = self.current_ret.clone();
                    self.error(
                        format!("Return type mismatch: expected {}, found {}", expected, ty),
                        *span,
                    );
                }
            }
            Stmt::Expr(expr) => {
                self.infer(expr);
            }
        }
    }

    fn check_var_decl(&mut self, decl: &VarDecl) {
        let inferred = decl.init.as_ref().map(|init| self.infer(init));

        let effective = match (&decl.ty, &inferred) {
            (Some(declared), _) if !self.check_declared_type(declared, decl.span) => Type::Error,
            (Some(declared), Some(init)) => {
                if !init.is_error() && init != declared {
                    self.error(
                        format!(
                            "Type mismatch: variable '{}' declared as {} but initialized with {}",
                            decl.name, declared, init
                        ),
                        decl.span,
                    );
                }
                declared.clone()
            }
            (Some(declared), None) => declared.clone(),
            (None, Some(init)) => init.clone(),
            (None, None) => Type::Unknown,
        };

        let effective = match effective {
            Type::Void | Type::Unknown => {
                self.error(
                    format!("Cannot infer type for variable '{}'", decl.name),
                    decl.span,
                );
                Type::Error
            }
            ty => ty,
        };

        self.set_type(decl.id, effective.clone());
        if let Some(block) = self.blocks.last() {
            self.result
                .declared_vars
                .entry(*block)
                .or_default()
                .push(decl.id);
        }
        self.scopes.define(
            decl.name.clone(),
            Binding {
                ty: effective,
                mutable: decl.mutable,
                receiver: false,
            },
        );
    }

    fn check_assign(&mut self, name: &str, value: &Expr, span: Span) {
        let target = self.scopes.lookup(name).cloned();
        let value_ty = self.infer(value);

        let Some(target) = target else {
            self.error(format!("Undefined variable '{}'", name), span);
            return;
        };

        if !target.ty.is_error() && !value_ty.is_error() && target.ty != value_ty {
            self.error(
                format!(
                    "Type mismatch in assignment to '{}': expected {}, found {}",
                    name, target.ty, value_ty
                ),
                span,
            );
        }
        if target.receiver {
            self.error(
                "Cannot assign to 'self'; the receiver is the caller's variable",
                span,
            );
        } else if !target.mutable {
            self.result
                .diagnostics
                .warn(format!("Assignment to immutable variable '{}'", name), span);
        }
    }

    // ==================== Expressions ====================

    /// Infer and record the type of an expression
    fn infer(&mut self, expr: &Expr) -> Type {
        let ty = self.infer_kind(expr);
        self.set_type(expr.id, ty)
    }

    fn infer_kind(&mut self, expr: &Expr) -> Type {
        match &expr.kind {
            ExprKind::Int { long, .. } => {
                if *long {
                    Type::I64
                } else {
                    Type::I32
                }
            }
            ExprKind::Float { single, .. } => {
                if *single {
                    Type::F32
                } else {
                    Type::F64
                }
            }
            ExprKind::Bool(_) => Type::Bool,
            ExprKind::Str(_) => Type::String,

            ExprKind::VarRef(name) => match self.scopes.lookup(name).map(|b| b.ty.clone()) {
                Some(ty) => ty,
                None => {
                    self.error(format!("Undefined variable '{}'", name), expr.span);
                    Type::Error
                }
            },

            ExprKind::Unary { op, expr: operand } => {
                let ty = self.infer(operand);
                if ty.is_error() {
                    return Type::Error;
                }
                let (ok, wanted) = match op {
                    UnOp::Not => (ty == Type::Bool, "bool"),
                    UnOp::Neg => (ty.is_number(), "a numeric type"),
                    UnOp::BitNot => (ty.is_int(), "an integer type"),
                };
                if ok {
                    ty
                } else {
                    self.error(
                        format!("Operator '{}' requires {}, found {}", op.symbol(), wanted, ty),
                        expr.span,
                    );
                    Type::Error
                }
            }

            ExprKind::Binary { left, op, right } => {
                let lt = self.infer(left);
                let rt = self.infer(right);
                if lt.is_error() || rt.is_error() {
                    return Type::Error;
                }
                if lt != rt {
                    self.error(
                        format!(
                            "Type mismatch in binary operation: {} {} {}",
                            lt,
                            op.symbol(),
                            rt
                        ),
                        expr.span,
                    );
                    return Type::Error;
                }
                self.check_binary_operands(*op, lt, expr.span)
            }

            ExprKind::Cast { expr: inner, ty } => {
                let from = self.infer(inner);
                if from.is_error() {
                    return Type::Error;
                }
                if &from == ty {
                    self.result.diagnostics.warn("Cast is redundant", expr.span);
                    ty.clone()
                } else if is_valid_cast(&from, ty) {
                    ty.clone()
                } else {
                    self.error(format!("Invalid cast from {} to {}", from, ty), expr.span);
                    Type::Error
                }
            }

            ExprKind::Call { name, args } => {
                let arg_types: Vec<Type> = args.iter().map(|a| self.infer(a)).collect();
                if arg_types.iter().any(Type::is_error) {
                    return Type::Error;
                }
                match self.symbols.resolve(name, &arg_types) {
                    Ok(callee) => callee.ret().clone(),
                    Err(ResolveError::NotFound) => {
                        self.error(format!("Function '{}' not found.", name), expr.span);
                        Type::Error
                    }
                    Err(ResolveError::NoMatch) => {
                        self.error(
                            format!(
                                "No matching overload for '{}' with args ({})",
                                name,
                                type_list(&arg_types)
                            ),
                            expr.span,
                        );
                        Type::Error
                    }
                }
            }

            ExprKind::Constructor { name, args } => {
                let arg_types: Vec<Type> = args.iter().map(|a| self.infer(a)).collect();
                let Some(def) = self.symbols.struct_def(name) else {
                    self.error(format!("Unknown struct '{}'", name), expr.span);
                    return Type::Error;
                };
                if arg_types.iter().any(Type::is_error) {
                    return Type::Error;
                }
                let fields: Vec<Type> = def.fields.iter().map(|f| f.ty.clone()).collect();
                if fields != arg_types {
                    self.error(
                        format!(
                            "Constructor of '{}' expects ({}), found ({})",
                            name,
                            type_list(&fields),
                            type_list(&arg_types)
                        ),
                        expr.span,
                    );
                    return Type::Error;
                }
                Type::Struct(name.clone())
            }

            ExprKind::Access { object, member } => {
                let ty = self.infer(object);
                if ty.is_error() {
                    return Type::Error;
                }
                let Some(struct_name) = ty.struct_name() else {
                    self.error(
                        format!("Cannot access member '{}' on non-struct type {}", member, ty),
                        expr.span,
                    );
                    return Type::Error;
                };
                match self.symbols.field(&ty, member) {
                    Some((_, field_ty)) => field_ty.clone(),
                    None => {
                        self.error(
                            format!("Struct '{}' has no field '{}'", struct_name, member),
                            expr.span,
                        );
                        Type::Error
                    }
                }
            }
        }
    }

    /// Operand rules once both sides are known to share `ty`
    fn check_binary_operands(&mut self, op: BinOp, ty: Type, span: Span) -> Type {
        let (ok, wanted, result) = if op.is_equality() {
            (ty == Type::Bool || ty.is_number(), "bool or numeric operands", Type::Bool)
        } else if op.is_ordering() {
            (ty.is_number(), "numeric operands", Type::Bool)
        } else if op == BinOp::Mod || op.is_bitwise() {
            (ty.is_int(), "integer operands", ty.clone())
        } else {
            (ty.is_number(), "numeric operands", ty.clone())
        };

        if ok {
            result
        } else {
            self.error(
                format!("Operator '{}' requires {}, found {}", op.symbol(), wanted, ty),
                span,
            );
            Type::Error
        }
    }
}

fn type_list(types: &[Type]) -> String {
    types
        .iter()
        .map(|t| t.name().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Analyze a program
pub fn analyze(program: &Program) -> Analysis {
    SemanticAnalyzer::new(program).analyze()
}
