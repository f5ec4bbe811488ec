//! QBE Generator - checked AST to flat IR
//!
//! Struct values live in memory and are handled through `l` pointers;
//! fields are reached by adding the byte offset from the shared layout.
//! Copies between struct storage use `blit`.

use std::collections::HashMap;

use crate::frontend::ast::{self, Block, Expr, ExprKind, FnDef, Program, Stmt, UnOp};
use crate::frontend::scope::ScopeStack;
use crate::frontend::semantic::Analysis;
use crate::middle::layout::Layouts;
use crate::middle::mangle::{mangle_fn, ENTRY_POINT};
use crate::middle::symbols::SymbolTables;
use crate::types::Type;
use crate::utils::{Error, Result};

use super::ir::{Cond, Op, QData, QFunction, QInstr, QModule, QType, QTypeDef, QValue};

/// Storage of a name in scope
#[derive(Debug, Clone)]
struct Binding {
    slot: String,
    ty: Type,
    /// The slot holds a pointer to the value rather than the value itself
    by_ref: bool,
}

pub struct QbeGenerator<'p> {
    analysis: &'p Analysis,
    symbols: SymbolTables<'p>,
    layouts: Layouts,
    module: QModule,
    /// Allocations hoisted to the start of the current function
    allocs: Vec<QInstr>,
    body: Vec<QInstr>,
    scopes: ScopeStack<Binding>,
    temp_counter: usize,
    label_counter: usize,
    strings: HashMap<String, String>,
}

impl<'p> QbeGenerator<'p> {
    pub fn new(program: &'p Program, analysis: &'p Analysis) -> Self {
        Self {
            analysis,
            symbols: SymbolTables::build(program),
            layouts: Layouts::compute(program),
            module: QModule::default(),
            allocs: Vec::new(),
            body: Vec::new(),
            scopes: ScopeStack::new(),
            temp_counter: 0,
            label_counter: 0,
            strings: HashMap::new(),
        }
    }

    pub fn generate(mut self, program: &Program) -> Result<QModule> {
        for layout in self.layouts.iter() {
            self.module.types.push(QTypeDef {
                name: layout.name.clone(),
                align: layout.align,
                size: layout.size,
            });
        }

        for f in program.functions() {
            self.generate_function(f)?;
        }

        log::debug!(
            "Generated QBE module ({} functions, {} strings)",
            self.module.functions.len(),
            self.module.data.len()
        );
        Ok(self.module)
    }

    // ==================== Helper Methods ====================

    fn new_temp(&mut self) -> String {
        let name = format!(".t{}", self.temp_counter);
        self.temp_counter += 1;
        name
    }

    fn new_label(&mut self) -> String {
        let name = format!(".L{}", self.label_counter);
        self.label_counter += 1;
        name
    }

    fn emit(&mut self, inst: QInstr) {
        self.body.push(inst);
    }

    fn assign(&mut self, ty: QType, op: Op, args: Vec<QValue>) -> QValue {
        let dest = self.new_temp();
        self.emit(QInstr::Assign {
            dest: dest.clone(),
            ty,
            op,
            args,
        });
        QValue::Temp(dest)
    }

    fn terminated(&self) -> bool {
        self.body.last().map_or(false, QInstr::is_jump)
    }

    fn lookup(&self, name: &str) -> Result<Binding> {
        self.scopes
            .lookup(name)
            .cloned()
            .ok_or_else(|| Error::UnboundVariable(name.to_string()))
    }

    fn type_of(&self, expr: &Expr) -> Result<Type> {
        self.analysis.types.of(expr).cloned()
    }

    fn size_of(&self, ty: &Type) -> usize {
        self.layouts.size_of(ty)
    }

    /// Stack slot hoisted to the start block
    fn alloc(&mut self, ty: &Type, hint: &str) -> Result<String> {
        let size = self.size_of(ty);
        let align = match ty {
            Type::Struct(name) => self.layouts.get(name)?.align,
            _ if size >= 8 => 8,
            _ => 4,
        };
        let slot = format!("{}.{}", hint, self.temp_counter);
        self.temp_counter += 1;
        self.allocs.push(QInstr::Assign {
            dest: slot.clone(),
            ty: QType::Long,
            op: Op::Alloc(align),
            args: vec![QValue::Const(size as i64)],
        });
        Ok(slot)
    }

    fn intern_string(&mut self, value: &str) -> QValue {
        if let Some(name) = self.strings.get(value) {
            return QValue::Global(name.clone());
        }
        let name = format!(".str{}", self.module.data.len());
        self.module.data.push(QData {
            name: name.clone(),
            value: value.to_string(),
        });
        self.strings.insert(value.to_string(), name.clone());
        QValue::Global(name)
    }

    // ==================== Functions ====================

    fn generate_function(&mut self, f: &FnDef) -> Result<()> {
        let name = mangle_fn(f);
        log::trace!("Lowering {} as ${}", f.name, name);

        self.allocs.clear();
        self.body.clear();
        self.scopes.clear();
        self.scopes.push();

        let mut params = Vec::new();
        if let Some(receiver) = &f.extension_of {
            let slot = self.alloc(&Type::I64, "self")?;
            self.emit(QInstr::Store {
                ty: QType::Long,
                value: QValue::Temp(".p.self".to_string()),
                addr: QValue::Temp(slot.clone()),
            });
            params.push((QType::Long, ".p.self".to_string()));
            self.scopes.define(
                "self",
                Binding {
                    slot,
                    ty: receiver.clone(),
                    by_ref: true,
                },
            );
        }
        for p in &f.params {
            let incoming = format!(".p.{}", p.name);
            let slot = self.alloc(&p.ty, &p.name)?;
            self.store_value(&p.ty, QValue::Temp(incoming.clone()), QValue::Temp(slot.clone()))?;
            params.push((abi_type(&p.ty)?, incoming));
            self.scopes.define(
                p.name.clone(),
                Binding {
                    slot,
                    ty: p.ty.clone(),
                    by_ref: false,
                },
            );
        }

        self.generate_block(&f.body)?;

        if !self.terminated() {
            if f.ret == Type::Void {
                self.emit(QInstr::Ret(None));
            } else {
                self.emit(QInstr::Hlt);
            }
        }

        let mut body = vec![QInstr::Label("start".to_string())];
        body.append(&mut self.allocs);
        body.append(&mut self.body);

        self.module.functions.push(QFunction {
            export: name == ENTRY_POINT,
            name,
            params,
            ret: match &f.ret {
                Type::Void => None,
                ty => Some(abi_type(ty)?),
            },
            body,
        });
        Ok(())
    }

    // ==================== Statements ====================

    fn generate_block(&mut self, block: &Block) -> Result<()> {
        for stmt in &block.stmts {
            if self.terminated() {
                // instructions after a jump need a block of their own
                let label = self.new_label();
                self.emit(QInstr::Label(label));
            }
            self.generate_stmt(stmt)?;
        }
        Ok(())
    }

    fn generate_stmt(&mut self, stmt: &Stmt) -> Result<()> {
        match stmt {
            Stmt::VarDecl(decl) => {
                let ty = self.analysis.types.of_decl(decl)?.clone();
                let slot = self.alloc(&ty, &decl.name)?;
                let addr = QValue::Temp(slot.clone());
                match &decl.init {
                    Some(init) => {
                        let value = self.generate_expr(init)?;
                        self.store_value(&ty, value, addr)?;
                    }
                    None => self.store_zero(&ty, addr)?,
                }
                self.scopes.define(
                    decl.name.clone(),
                    Binding {
                        slot,
                        ty,
                        by_ref: false,
                    },
                );
            }
            Stmt::Assign { name, value, .. } => {
                let binding = self.lookup(name)?;
                let v = self.generate_expr(value)?;
                let addr = self.binding_address(&binding);
                self.store_value(&binding.ty, v, addr)?;
            }
            Stmt::If {
                cond,
                then_block,
                else_block,
                ..
            } => {
                let c = self.generate_expr(cond)?;
                let then_label = self.new_label();
                let else_label = self.new_label();
                let end_label = self.new_label();

                self.emit(QInstr::Jnz {
                    cond: c,
                    if_true: then_label.clone(),
                    if_false: else_label.clone(),
                });

                self.emit(QInstr::Label(then_label));
                self.scopes.push();
                self.generate_block(then_block)?;
                self.scopes.pop();
                if !self.terminated() {
                    self.emit(QInstr::Jmp(end_label.clone()));
                }

                self.emit(QInstr::Label(else_label));
                if let Some(else_block) = else_block {
                    self.scopes.push();
                    self.generate_block(else_block)?;
                    self.scopes.pop();
                }
                if !self.terminated() {
                    self.emit(QInstr::Jmp(end_label.clone()));
                }

                self.emit(QInstr::Label(end_label));
            }
            Stmt::Return { value, .. } => {
                let v = match value {
                    Some(expr) => Some(self.generate_expr(expr)?),
                    None => None,
                };
                self.emit(QInstr::Ret(v));
            }
            Stmt::Expr(expr) => {
                self.generate_expr(expr)?;
            }
        }
        Ok(())
    }

    /// Write a value of type `ty` to memory; structs are copied
    fn store_value(&mut self, ty: &Type, value: QValue, addr: QValue) -> Result<()> {
        if ty.is_struct() {
            let size = self.size_of(ty);
            self.emit(QInstr::Blit {
                src: value,
                dst: addr,
                size,
            });
        } else {
            self.emit(QInstr::Store {
                ty: base_type(ty)?,
                value,
                addr,
            });
        }
        Ok(())
    }

    fn store_zero(&mut self, ty: &Type, addr: QValue) -> Result<()> {
        match ty {
            Type::Struct(_) => {
                for offset in (0..self.size_of(ty)).step_by(4) {
                    let at = if offset == 0 {
                        addr.clone()
                    } else {
                        self.assign(QType::Long, Op::Add, vec![addr.clone(), QValue::Const(offset as i64)])
                    };
                    self.emit(QInstr::Store {
                        ty: QType::Word,
                        value: QValue::Const(0),
                        addr: at,
                    });
                }
            }
            Type::F32 => self.emit(QInstr::Store {
                ty: QType::Single,
                value: QValue::Single(0.0),
                addr,
            }),
            Type::F64 => self.emit(QInstr::Store {
                ty: QType::Double,
                value: QValue::Double(0.0),
                addr,
            }),
            other => self.emit(QInstr::Store {
                ty: base_type(other)?,
                value: QValue::Const(0),
                addr,
            }),
        }
        Ok(())
    }

    // ==================== Expressions ====================

    fn generate_expr(&mut self, expr: &Expr) -> Result<QValue> {
        let ty = self.type_of(expr)?;

        match &expr.kind {
            ExprKind::Int { value, .. } => Ok(QValue::Const(if ty == Type::I32 {
                *value as i32 as i64
            } else {
                *value
            })),
            ExprKind::Float { value, .. } => Ok(if ty == Type::F32 {
                QValue::Single(*value as f32)
            } else {
                QValue::Double(*value)
            }),
            ExprKind::Bool(b) => Ok(QValue::Const(*b as i64)),
            ExprKind::Str(s) => Ok(self.intern_string(s)),

            ExprKind::VarRef(name) => {
                let binding = self.lookup(name)?;
                let addr = self.binding_address(&binding);
                self.load_value(&ty, addr)
            }

            ExprKind::Unary { op, expr: operand } => {
                let v = self.generate_expr(operand)?;
                let class = base_type(&ty)?;
                Ok(match op {
                    UnOp::Neg => self.assign(class, Op::Neg, vec![v]),
                    UnOp::Not => self.assign(class, Op::Xor, vec![v, QValue::Const(1)]),
                    UnOp::BitNot => self.assign(class, Op::Xor, vec![v, QValue::Const(-1)]),
                })
            }

            ExprKind::Binary { left, op, right } => {
                let operand_ty = self.type_of(left)?;
                let l = self.generate_expr(left)?;
                let r = self.generate_expr(right)?;
                let class = base_type(&operand_ty)?;
                if op.is_comparison() {
                    let cond = condition(*op, &operand_ty)?;
                    Ok(self.assign(QType::Word, Op::Cmp(cond, class), vec![l, r]))
                } else {
                    let qop = arith_op(*op, &operand_ty)?;
                    Ok(self.assign(class, qop, vec![l, r]))
                }
            }

            ExprKind::Cast { expr: inner, ty: target } => {
                let from = self.type_of(inner)?;
                let v = self.generate_expr(inner)?;
                self.generate_cast(v, &from, target)
            }

            ExprKind::Call { name, args } => self.generate_call(name, args),

            ExprKind::Constructor { name, args } => {
                let layout = self.layouts.get(name)?.clone();
                let slot = QValue::Temp(self.alloc(&ty, "new")?);
                for (field, arg) in layout.fields.iter().zip(args) {
                    let v = self.generate_expr(arg)?;
                    let addr = self.assign(
                        QType::Long,
                        Op::Add,
                        vec![slot.clone(), QValue::Const(field.offset as i64)],
                    );
                    self.store_value(&field.ty, v, addr)?;
                }
                Ok(slot)
            }

            ExprKind::Access { object, member } => {
                let addr = self.field_address(object, member)?;
                self.load_value(&ty, addr)
            }
        }
    }

    /// Scalars are loaded; a struct value is its address
    fn load_value(&mut self, ty: &Type, addr: QValue) -> Result<QValue> {
        if ty.is_struct() {
            return Ok(addr);
        }
        let class = base_type(ty)?;
        Ok(self.assign(class.clone(), Op::Load(class), vec![addr]))
    }

    fn generate_call(&mut self, name: &str, args: &[Expr]) -> Result<QValue> {
        let arg_types = args
            .iter()
            .map(|a| self.type_of(a))
            .collect::<Result<Vec<_>>>()?;
        let callee = self
            .symbols
            .resolve(name, &arg_types)
            .map_err(|_| Error::FunctionNotFound(name.to_string()))?;
        let func = callee.linkage_name();
        log::trace!("call {} -> ${}", name, func);

        let mut qargs = Vec::with_capacity(args.len());
        for (i, (arg, arg_ty)) in args.iter().zip(&arg_types).enumerate() {
            if i == 0 && callee.has_receiver() {
                qargs.push((QType::Long, self.address_of(arg)?));
            } else {
                let v = self.generate_expr(arg)?;
                qargs.push((abi_type(arg_ty)?, v));
            }
        }

        let ret = callee.ret();
        if *ret == Type::Void {
            self.emit(QInstr::Call {
                dest: None,
                func,
                args: qargs,
            });
            // never read: the analyzer rejects void in value positions
            return Ok(QValue::Const(0));
        }
        let dest = self.new_temp();
        self.emit(QInstr::Call {
            dest: Some((dest.clone(), abi_type(ret)?)),
            func,
            args: qargs,
        });
        Ok(QValue::Temp(dest))
    }

    fn generate_cast(&mut self, v: QValue, from: &Type, to: &Type) -> Result<QValue> {
        if from == to {
            return Ok(v);
        }
        let (class, op, args) = match (from, to) {
            (Type::Bool, Type::I32) => (QType::Word, Op::Copy, vec![v]),
            (Type::Bool, Type::I64) => (QType::Long, Op::Extuw, vec![v]),
            (f, Type::Bool) if f.is_int() => {
                (QType::Word, Op::Cmp(Cond::Ne, base_type(f)?), vec![v, QValue::Const(0)])
            }
            (Type::I32, Type::I64) => (QType::Long, Op::Extsw, vec![v]),
            (Type::I64, Type::I32) => (QType::Word, Op::Copy, vec![v]),
            (Type::I32, t) if t.is_float() => (base_type(t)?, Op::Swtof, vec![v]),
            (Type::I64, t) if t.is_float() => (base_type(t)?, Op::Sltof, vec![v]),
            (Type::F32, t) if t.is_int() => (base_type(t)?, Op::Stosi, vec![v]),
            (Type::F64, t) if t.is_int() => (base_type(t)?, Op::Dtosi, vec![v]),
            (Type::F32, Type::F64) => (QType::Double, Op::Exts, vec![v]),
            (Type::F64, Type::F32) => (QType::Single, Op::Truncd, vec![v]),
            _ => {
                return Err(Error::Unsupported(format!("cast from {} to {}", from, to)));
            }
        };
        Ok(self.assign(class, op, args))
    }

    // ==================== Addresses ====================

    fn binding_address(&mut self, binding: &Binding) -> QValue {
        let slot = QValue::Temp(binding.slot.clone());
        if binding.by_ref {
            self.assign(QType::Long, Op::Load(QType::Long), vec![slot])
        } else {
            slot
        }
    }

    /// `base + offsetOf(member)`
    fn field_address(&mut self, object: &Expr, member: &str) -> Result<QValue> {
        let object_ty = self.type_of(object)?;
        let struct_name = object_ty
            .struct_name()
            .ok_or_else(|| Error::Unsupported(format!("member access on {}", object_ty)))?;
        let offset = self
            .layouts
            .get(struct_name)?
            .offset_of(member)
            .ok_or_else(|| Error::UnknownStruct(format!("{}.{}", struct_name, member)))?;
        let base = self.address_of(object)?;
        Ok(self.assign(
            QType::Long,
            Op::Add,
            vec![base, QValue::Const(offset as i64)],
        ))
    }

    /// Address of an expression's value; scalars without storage are
    /// spilled to a fresh slot
    fn address_of(&mut self, expr: &Expr) -> Result<QValue> {
        match &expr.kind {
            ExprKind::VarRef(name) => {
                let binding = self.lookup(name)?;
                Ok(self.binding_address(&binding))
            }
            ExprKind::Access { object, member } => self.field_address(object, member),
            _ => {
                let ty = self.type_of(expr)?;
                let v = self.generate_expr(expr)?;
                if ty.is_struct() {
                    return Ok(v);
                }
                let slot = QValue::Temp(self.alloc(&ty, "spill")?);
                self.store_value(&ty, v, slot.clone())?;
                Ok(slot)
            }
        }
    }
}

/// Temporary class of a value type
pub fn base_type(ty: &Type) -> Result<QType> {
    Ok(match ty {
        Type::Bool | Type::I32 => QType::Word,
        Type::I64 | Type::String | Type::Struct(_) => QType::Long,
        Type::F32 => QType::Single,
        Type::F64 => QType::Double,
        Type::Void | Type::Unknown | Type::Error => {
            return Err(Error::Unsupported(format!("no QBE class for {}", ty)));
        }
    })
}

/// Type in a function signature or call
pub fn abi_type(ty: &Type) -> Result<QType> {
    match ty {
        Type::Struct(name) => Ok(QType::Aggregate(name.clone())),
        other => base_type(other),
    }
}

fn arith_op(op: ast::BinOp, ty: &Type) -> Result<Op> {
    let float = ty.is_float();
    Ok(match op {
        ast::BinOp::Add => Op::Add,
        ast::BinOp::Sub => Op::Sub,
        ast::BinOp::Mul => Op::Mul,
        ast::BinOp::Div => Op::Div,
        ast::BinOp::Mod if !float => Op::Rem,
        ast::BinOp::BitAnd if !float => Op::And,
        ast::BinOp::BitOr if !float => Op::Or,
        ast::BinOp::BitXor if !float => Op::Xor,
        ast::BinOp::Shl if !float => Op::Shl,
        ast::BinOp::Shr if !float => Op::Sar,
        other => {
            return Err(Error::Unsupported(format!(
                "operator '{}' on {}",
                other.symbol(),
                ty
            )));
        }
    })
}

fn condition(op: ast::BinOp, ty: &Type) -> Result<Cond> {
    let float = ty.is_float();
    Ok(match op {
        ast::BinOp::Eq => Cond::Eq,
        ast::BinOp::Ne => Cond::Ne,
        ast::BinOp::Lt if float => Cond::Lt,
        ast::BinOp::Le if float => Cond::Le,
        ast::BinOp::Gt if float => Cond::Gt,
        ast::BinOp::Ge if float => Cond::Ge,
        ast::BinOp::Lt => Cond::Slt,
        ast::BinOp::Le => Cond::Sle,
        ast::BinOp::Gt => Cond::Sgt,
        ast::BinOp::Ge => Cond::Sge,
        other => {
            return Err(Error::Unsupported(format!("comparison '{}'", other.symbol())));
        }
    })
}

/// Lower a checked program to a flat module
pub fn generate(program: &Program, analysis: &Analysis) -> Result<QModule> {
    QbeGenerator::new(program, analysis).generate(program)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::parser::parse_source;
    use crate::frontend::semantic::analyze;
    use pretty_assertions::assert_eq;

    fn lower(source: &str) -> QModule {
        let (program, _) = parse_source(source, 0, 0).unwrap();
        let analysis = analyze(&program);
        assert!(!analysis.has_errors(), "{:?}", analysis.diagnostics);
        generate(&program, &analysis).unwrap()
    }

    fn labels(f: &QFunction) -> Vec<&str> {
        f.body
            .iter()
            .filter_map(|i| match i {
                QInstr::Label(l) => Some(l.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_field_access_adds_offset() {
        let module = lower(
            "struct P { a: i32, b: i64, c: i32 }
             fn main() -> i32 { let p = new P(1, 2L, 3) return p.c }",
        );
        assert_eq!(
            module.types,
            vec![QTypeDef {
                name: "P".to_string(),
                align: 8,
                size: 16
            }]
        );
        let main = module.function("main").unwrap();
        let offsets: Vec<i64> = main
            .body
            .iter()
            .filter_map(|i| match i {
                QInstr::Assign {
                    op: Op::Add,
                    args,
                    ..
                } => match args[1] {
                    QValue::Const(c) => Some(c),
                    _ => None,
                },
                _ => None,
            })
            .collect();
        assert_eq!(offsets, vec![0, 4, 12, 12]);
        assert!(main.export);
    }

    #[test]
    fn test_if_uses_three_labels() {
        let module = lower("fn main() -> i32 { if 1 == 2 { return 1 } return 0 }");
        let main = module.function("main").unwrap();
        assert_eq!(labels(main), vec!["start", ".L0", ".L1", ".L2"]);
        assert!(main
            .body
            .iter()
            .any(|i| matches!(i, QInstr::Jmp(l) if l == ".L2")));
    }

    #[test]
    fn test_allocs_hoisted_to_start() {
        let module = lower(
            "fn main() -> i32 { let a = 1 if a == 1 { let b = 2 a = b } return a }",
        );
        let main = module.function("main").unwrap();
        let first_non_alloc = main.body[1..]
            .iter()
            .position(|i| !matches!(i, QInstr::Assign { op: Op::Alloc(_), .. }))
            .unwrap();
        assert_eq!(first_non_alloc, 2);
        let allocs = main
            .body
            .iter()
            .filter(|i| matches!(i, QInstr::Assign { op: Op::Alloc(_), .. }))
            .count();
        assert_eq!(allocs, 2);
    }

    #[test]
    fn test_struct_abi_and_receiver() {
        let module = lower(
            "struct V { x: i32, y: i32 }
             fn V.sum() -> i32 { return self.x + self.y }
             fn swap(v: V) -> V { return new V(v.y, v.x) }
             fn main() -> i32 { let v = swap(new V(1, 2)) return v.sum() }",
        );
        let sum = module.function("V_sum").unwrap();
        assert_eq!(sum.params, vec![(QType::Long, ".p.self".to_string())]);
        let swap = module.function("swap_V").unwrap();
        assert_eq!(swap.params[0].0, QType::Aggregate("V".into()));
        assert_eq!(swap.ret, Some(QType::Aggregate("V".into())));
        let main = module.function("main").unwrap();
        assert!(main
            .body
            .iter()
            .any(|i| matches!(i, QInstr::Blit { size: 8, .. })));
    }

    #[test]
    fn test_casts() {
        let module = lower(
            "fn main() -> i32 {
                 let a = 1 as i64
                 let b = 2.5 as i32
                 let c = true as i64
                 let d = 1.5f as f64
                 return b
             }",
        );
        let ops: Vec<String> = module
            .function("main")
            .unwrap()
            .body
            .iter()
            .filter_map(|i| match i {
                QInstr::Assign { op, .. } if !matches!(op, Op::Alloc(_)) => Some(op.to_string()),
                _ => None,
            })
            .collect();
        assert_eq!(ops, vec!["extsw", "dtosi", "extuw", "exts", "loadw"]);
    }

    #[test]
    fn test_temps_never_reused_across_functions() {
        let module = lower(
            "fn one() -> i32 { return 1 + 1 } fn main() -> i32 { return one() + 1 }",
        );
        let mut dests = Vec::new();
        for f in &module.functions {
            for i in &f.body {
                if let QInstr::Assign { dest, .. } | QInstr::Call { dest: Some((dest, _)), .. } = i {
                    dests.push(dest.clone());
                }
            }
        }
        let total = dests.len();
        dests.sort();
        dests.dedup();
        assert_eq!(dests.len(), total);
    }
}
