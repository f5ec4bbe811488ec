//! IR Generator - checked AST to SSA-style IR
//!
//! Every parameter and every variable declaration gets one stack slot,
//! allocated in the entry block. Reads and writes are loads and stores
//! against those slots; field access addresses fields by index.

use std::collections::HashMap;

use crate::frontend::ast::{self, Block, Expr, ExprKind, FnDef, NodeId, Program, Stmt, UnOp};
use crate::frontend::scope::ScopeStack;
use crate::frontend::semantic::Analysis;
use crate::middle::ir::{
    BinOp, BlockId, CastOp, CmpPred, Instruction, IrExtern, IrFunction, IrModule, IrString,
    IrStruct, IrType, Register, Terminator, Value,
};
use crate::middle::mangle::mangle_fn;
use crate::middle::symbols::SymbolTables;
use crate::types::Type;
use crate::utils::{Error, Result};

/// Storage of a name in scope
#[derive(Debug, Clone)]
struct Slot {
    ptr: Register,
    ty: Type,
    /// The slot holds a pointer to the value rather than the value itself
    by_ref: bool,
}

/// IR Generator
pub struct IrGenerator<'p> {
    analysis: &'p Analysis,
    symbols: SymbolTables<'p>,
    /// Current module being built
    module: IrModule,
    /// Current function being built
    current_fn: Option<IrFunction>,
    /// Current block ID
    current_block: BlockId,
    /// Allocas hoisted into the entry block of the current function
    entry_allocas: Vec<Instruction>,
    scopes: ScopeStack<Slot>,
    decl_slots: HashMap<NodeId, Register>,
    label_counter: usize,
    strings: HashMap<String, String>,
}

impl<'p> IrGenerator<'p> {
    pub fn new(module_name: &str, program: &'p Program, analysis: &'p Analysis) -> Self {
        Self {
            analysis,
            symbols: SymbolTables::build(program),
            module: IrModule::new(module_name),
            current_fn: None,
            current_block: BlockId(0),
            entry_allocas: Vec::new(),
            scopes: ScopeStack::new(),
            decl_slots: HashMap::new(),
            label_counter: 0,
            strings: HashMap::new(),
        }
    }

    /// Generate IR for a program
    pub fn generate(mut self, program: &Program) -> Result<IrModule> {
        for s in program.structs() {
            let fields = s
                .fields
                .iter()
                .map(|f| ir_type(&f.ty))
                .collect::<Result<Vec<_>>>()?;
            self.module.structs.push(IrStruct {
                name: s.name.clone(),
                fields,
            });
        }

        for e in program.externs() {
            // one `declare` per C symbol; calls to other overloads carry
            // their own function type
            if self.module.extern_decl(&e.name).is_some() {
                continue;
            }
            let params = e
                .params
                .iter()
                .map(|p| ir_type(&p.ty))
                .collect::<Result<Vec<_>>>()?;
            self.module.externs.push(IrExtern {
                name: e.name.clone(),
                params,
                ret: ir_type(&e.ret)?,
            });
        }

        for f in program.functions() {
            self.generate_function(f)?;
        }

        log::debug!(
            "Generated IR module '{}' ({} functions)",
            self.module.name,
            self.module.functions.len()
        );
        Ok(self.module)
    }

    // ==================== Functions ====================

    fn generate_function(&mut self, f: &FnDef) -> Result<()> {
        let mut params: Vec<(String, IrType, Type)> = Vec::new();
        if let Some(receiver) = &f.extension_of {
            params.push(("self".to_string(), IrType::Ptr, receiver.clone()));
        }
        for p in &f.params {
            params.push((p.name.clone(), ir_type(&p.ty)?, p.ty.clone()));
        }

        let ret = ir_type(&f.ret)?;
        let name = mangle_fn(f);
        log::trace!("Lowering {} as {}", f.name, name);

        let mut ir_func = IrFunction::new(
            &name,
            params.iter().map(|(n, t, _)| (n.clone(), t.clone())).collect(),
            ret.clone(),
        );

        // Reset state
        self.current_block = ir_func.add_block("entry");
        self.current_fn = Some(ir_func);
        self.entry_allocas.clear();
        self.decl_slots.clear();
        self.scopes.clear();
        self.scopes.push();
        self.label_counter = 0;

        for (i, (pname, pty, source_ty)) in params.into_iter().enumerate() {
            let slot = self.alloca(pty.clone())?;
            self.emit(Instruction::Store {
                ty: pty,
                value: Value::Param(i),
                ptr: Value::Register(slot),
            })?;
            let by_ref = i == 0 && f.extension_of.is_some();
            self.scopes.define(
                pname,
                Slot {
                    ptr: slot,
                    ty: source_ty,
                    by_ref,
                },
            );
        }

        self.hoist_declarations(&f.body)?;
        self.generate_block(&f.body)?;

        if !self.current_terminated()? {
            let term = if ret == IrType::Void {
                Terminator::Return { value: None }
            } else {
                Terminator::Unreachable
            };
            self.terminate(term)?;
        }

        let mut ir_func = self
            .current_fn
            .take()
            .ok_or_else(|| Error::CodeGen("no function being generated".to_string()))?;
        if let Some(entry) = ir_func.blocks.first_mut() {
            let body = std::mem::take(&mut entry.instructions);
            entry.instructions = std::mem::take(&mut self.entry_allocas);
            entry.instructions.extend(body);
        }
        self.module.functions.push(ir_func);
        Ok(())
    }

    /// One slot per variable declaration anywhere in the body
    fn hoist_declarations(&mut self, block: &Block) -> Result<()> {
        for id in self.analysis.declared_in(block) {
            let ty = self
                .analysis
                .types
                .get(*id)
                .ok_or_else(|| Error::CodeGen(format!("declaration {:?} has no type", id)))?;
            let slot = self.alloca(ir_type(ty)?)?;
            self.decl_slots.insert(*id, slot);
        }
        for stmt in &block.stmts {
            if let Stmt::If {
                then_block,
                else_block,
                ..
            } = stmt
            {
                self.hoist_declarations(then_block)?;
                if let Some(else_block) = else_block {
                    self.hoist_declarations(else_block)?;
                }
            }
        }
        Ok(())
    }

    // ==================== Helper Methods ====================

    fn func(&mut self) -> Result<&mut IrFunction> {
        self.current_fn
            .as_mut()
            .ok_or_else(|| Error::CodeGen("no function being generated".to_string()))
    }

    fn alloc_register(&mut self) -> Result<Register> {
        Ok(self.func()?.alloc_register())
    }

    fn alloca(&mut self, ty: IrType) -> Result<Register> {
        let dest = self.alloc_register()?;
        self.entry_allocas.push(Instruction::Alloca { dest, ty });
        Ok(dest)
    }

    fn emit(&mut self, inst: Instruction) -> Result<()> {
        let block = self.current_block;
        self.func()?
            .block_mut(block)
            .ok_or_else(|| Error::CodeGen(format!("missing block {:?}", block)))?
            .push(inst);
        Ok(())
    }

    /// Emit an instruction writing a fresh register
    fn emit_value(&mut self, build: impl FnOnce(Register) -> Instruction) -> Result<Value> {
        let dest = self.alloc_register()?;
        self.emit(build(dest))?;
        Ok(Value::Register(dest))
    }

    fn terminate(&mut self, term: Terminator) -> Result<()> {
        let block = self.current_block;
        self.func()?
            .block_mut(block)
            .ok_or_else(|| Error::CodeGen(format!("missing block {:?}", block)))?
            .set_terminator(term);
        Ok(())
    }

    fn current_terminated(&mut self) -> Result<bool> {
        let block = self.current_block;
        Ok(self
            .func()?
            .block(block)
            .map_or(false, |b| b.is_terminated()))
    }

    fn add_block(&mut self, label: String) -> Result<BlockId> {
        Ok(self.func()?.add_block(&label))
    }

    fn lookup(&self, name: &str) -> Result<Slot> {
        self.scopes
            .lookup(name)
            .cloned()
            .ok_or_else(|| Error::UnboundVariable(name.to_string()))
    }

    fn type_of(&self, expr: &Expr) -> Result<Type> {
        self.analysis.types.of(expr).cloned()
    }

    fn intern_string(&mut self, value: &str) -> String {
        if let Some(name) = self.strings.get(value) {
            return name.clone();
        }
        let name = format!(".str.{}", self.module.strings.len());
        self.module.strings.push(IrString {
            name: name.clone(),
            value: value.to_string(),
        });
        self.strings.insert(value.to_string(), name.clone());
        name
    }

    // ==================== Statements ====================

    fn generate_block(&mut self, block: &Block) -> Result<()> {
        for stmt in &block.stmts {
            if self.current_terminated()? {
                // code after a return still needs a block to live in
                let label = format!("dead.{}", self.label_counter);
                self.label_counter += 1;
                self.current_block = self.add_block(label)?;
            }
            self.generate_stmt(stmt)?;
        }
        Ok(())
    }

    fn generate_stmt(&mut self, stmt: &Stmt) -> Result<()> {
        match stmt {
            Stmt::VarDecl(decl) => {
                let slot = *self
                    .decl_slots
                    .get(&decl.id)
                    .ok_or_else(|| Error::UnboundVariable(decl.name.clone()))?;
                let ty = self.analysis.types.of_decl(decl)?.clone();
                let ir_ty = ir_type(&ty)?;
                let value = match &decl.init {
                    Some(init) => self.generate_expr(init)?,
                    None => Value::Zero(ir_ty.clone()),
                };
                self.emit(Instruction::Store {
                    ty: ir_ty,
                    value,
                    ptr: Value::Register(slot),
                })?;
                self.scopes.define(
                    decl.name.clone(),
                    Slot {
                        ptr: slot,
                        ty,
                        by_ref: false,
                    },
                );
            }
            Stmt::Assign { name, value, .. } => {
                let slot = self.lookup(name)?;
                let v = self.generate_expr(value)?;
                let ptr = self.slot_address(&slot)?;
                self.emit(Instruction::Store {
                    ty: ir_type(&slot.ty)?,
                    value: v,
                    ptr,
                })?;
            }
            Stmt::If {
                cond,
                then_block,
                else_block,
                ..
            } => self.generate_if(cond, then_block, else_block.as_ref())?,
            Stmt::Return { value, .. } => {
                let value = match value {
                    Some(expr) => {
                        let ty = ir_type(&self.type_of(expr)?)?;
                        Some((ty, self.generate_expr(expr)?))
                    }
                    None => None,
                };
                self.terminate(Terminator::Return { value })?;
            }
            Stmt::Expr(expr) => {
                self.generate_expr(expr)?;
            }
        }
        Ok(())
    }

    fn generate_if(&mut self, cond: &Expr, then_block: &Block, else_block: Option<&Block>) -> Result<()> {
        let c = self.generate_expr(cond)?;
        let test = self.emit_value(|dest| Instruction::Cmp {
            dest,
            pred: CmpPred::Ne,
            ty: IrType::I1,
            left: c,
            right: Value::ConstInt(0, IrType::I1),
        })?;

        let n = self.label_counter;
        self.label_counter += 1;
        let then_id = self.add_block(format!("then.{}", n))?;
        let else_id = self.add_block(format!("else.{}", n))?;
        let merge_id = self.add_block(format!("merge.{}", n))?;

        self.terminate(Terminator::Branch {
            cond: test,
            then_target: then_id,
            else_target: else_id,
        })?;

        self.current_block = then_id;
        self.scopes.push();
        self.generate_block(then_block)?;
        self.scopes.pop();
        if !self.current_terminated()? {
            self.terminate(Terminator::Jump { target: merge_id })?;
        }

        self.current_block = else_id;
        if let Some(else_block) = else_block {
            self.scopes.push();
            self.generate_block(else_block)?;
            self.scopes.pop();
        }
        if !self.current_terminated()? {
            self.terminate(Terminator::Jump { target: merge_id })?;
        }

        self.current_block = merge_id;
        Ok(())
    }

    // ==================== Expressions ====================

    fn generate_expr(&mut self, expr: &Expr) -> Result<Value> {
        let ty = self.type_of(expr)?;

        match &expr.kind {
            ExprKind::Int { value, .. } => {
                let ir_ty = ir_type(&ty)?;
                let value = if ir_ty == IrType::I32 {
                    *value as i32 as i64
                } else {
                    *value
                };
                Ok(Value::ConstInt(value, ir_ty))
            }
            ExprKind::Float { value, .. } => {
                let ir_ty = ir_type(&ty)?;
                let value = if ir_ty == IrType::F32 {
                    *value as f32 as f64
                } else {
                    *value
                };
                Ok(Value::ConstFloat(value, ir_ty))
            }
            ExprKind::Bool(b) => Ok(Value::ConstInt(*b as i64, IrType::I1)),
            ExprKind::Str(s) => Ok(Value::Global(self.intern_string(s))),

            ExprKind::VarRef(name) => {
                let slot = self.lookup(name)?;
                let ptr = self.slot_address(&slot)?;
                let ir_ty = ir_type(&ty)?;
                self.emit_value(|dest| Instruction::Load { dest, ty: ir_ty, ptr })
            }

            ExprKind::Unary { op, expr: operand } => {
                let v = self.generate_expr(operand)?;
                let ir_ty = ir_type(&ty)?;
                let (op, left, right) = match op {
                    UnOp::Neg if ir_ty.is_float() => {
                        (BinOp::FSub, Value::ConstFloat(-0.0, ir_ty.clone()), v)
                    }
                    UnOp::Neg => (BinOp::Sub, Value::ConstInt(0, ir_ty.clone()), v),
                    UnOp::Not => (BinOp::Xor, v, Value::ConstInt(1, IrType::I1)),
                    UnOp::BitNot => (BinOp::Xor, v, Value::ConstInt(-1, ir_ty.clone())),
                };
                self.emit_value(|dest| Instruction::BinOp {
                    dest,
                    op,
                    ty: ir_ty,
                    left,
                    right,
                })
            }

            ExprKind::Binary { left, op, right } => {
                let operand_ty = ir_type(&self.type_of(left)?)?;
                let l = self.generate_expr(left)?;
                let r = self.generate_expr(right)?;
                if op.is_comparison() {
                    let pred = cmp_pred(*op, &operand_ty)?;
                    self.emit_value(|dest| Instruction::Cmp {
                        dest,
                        pred,
                        ty: operand_ty,
                        left: l,
                        right: r,
                    })
                } else {
                    let ir_op = bin_op(*op, &operand_ty)?;
                    self.emit_value(|dest| Instruction::BinOp {
                        dest,
                        op: ir_op,
                        ty: operand_ty,
                        left: l,
                        right: r,
                    })
                }
            }

            ExprKind::Cast { expr: inner, ty: target } => {
                let from = self.type_of(inner)?;
                let v = self.generate_expr(inner)?;
                self.generate_cast(v, &from, target)
            }

            ExprKind::Call { name, args } => self.generate_call(name, args),

            ExprKind::Constructor { name, args } => {
                let ir_ty = IrType::Struct(name.clone());
                let tmp = self.alloca(ir_ty.clone())?;
                for (index, arg) in args.iter().enumerate() {
                    let field_ty = ir_type(&self.type_of(arg)?)?;
                    let v = self.generate_expr(arg)?;
                    let field = self.emit_value(|dest| Instruction::FieldPtr {
                        dest,
                        struct_name: name.clone(),
                        base: Value::Register(tmp),
                        index,
                    })?;
                    self.emit(Instruction::Store {
                        ty: field_ty,
                        value: v,
                        ptr: field,
                    })?;
                }
                self.emit_value(|dest| Instruction::Load {
                    dest,
                    ty: ir_ty,
                    ptr: Value::Register(tmp),
                })
            }

            ExprKind::Access { object, member } => {
                let ptr = self.field_address(object, member)?;
                let ir_ty = ir_type(&ty)?;
                self.emit_value(|dest| Instruction::Load { dest, ty: ir_ty, ptr })
            }
        }
    }

    fn generate_call(&mut self, name: &str, args: &[Expr]) -> Result<Value> {
        let arg_types = args
            .iter()
            .map(|a| self.type_of(a))
            .collect::<Result<Vec<_>>>()?;
        let callee = self
            .symbols
            .resolve(name, &arg_types)
            .map_err(|_| Error::FunctionNotFound(name.to_string()))?;
        let func = callee.linkage_name();
        log::trace!("call {} -> {}", name, func);

        let params = callee
            .signature()
            .iter()
            .enumerate()
            .map(|(i, ty)| {
                if i == 0 && callee.has_receiver() {
                    Ok(IrType::Ptr)
                } else {
                    ir_type(ty)
                }
            })
            .collect::<Result<Vec<_>>>()?;

        let mut ir_args = Vec::with_capacity(args.len());
        for (i, (arg, arg_ty)) in args.iter().zip(&arg_types).enumerate() {
            if i == 0 && callee.has_receiver() {
                ir_args.push((IrType::Ptr, self.address_of(arg)?));
            } else {
                let v = self.generate_expr(arg)?;
                ir_args.push((ir_type(arg_ty)?, v));
            }
        }

        let ret = ir_type(callee.ret())?;
        if ret == IrType::Void {
            self.emit(Instruction::Call {
                dest: None,
                func,
                ret,
                params,
                args: ir_args,
            })?;
            Ok(Value::Zero(IrType::Void))
        } else {
            self.emit_value(|dest| Instruction::Call {
                dest: Some(dest),
                func,
                ret,
                params,
                args: ir_args,
            })
        }
    }

    fn generate_cast(&mut self, value: Value, from: &Type, to: &Type) -> Result<Value> {
        if from == to {
            return Ok(value);
        }
        let from_ir = ir_type(from)?;
        let to_ir = ir_type(to)?;

        if from.is_int() && *to == Type::Bool {
            return self.emit_value(|dest| Instruction::Cmp {
                dest,
                pred: CmpPred::Ne,
                ty: from_ir.clone(),
                left: value,
                right: Value::ConstInt(0, from_ir),
            });
        }

        let op = match (from, to) {
            (Type::Bool, t) if t.is_int() => CastOp::ZExt,
            (f, t) if f.is_int() && t.is_int() => {
                if from_ir.bits() < to_ir.bits() {
                    CastOp::SExt
                } else {
                    CastOp::Trunc
                }
            }
            (f, t) if f.is_int() && t.is_float() => CastOp::SIToFP,
            (f, t) if f.is_float() && t.is_int() => CastOp::FPToSI,
            (Type::F32, Type::F64) => CastOp::FPExt,
            (Type::F64, Type::F32) => CastOp::FPTrunc,
            _ => {
                return Err(Error::Unsupported(format!("cast from {} to {}", from, to)));
            }
        };

        self.emit_value(|dest| Instruction::Cast {
            dest,
            op,
            value,
            from: from_ir,
            to: to_ir,
        })
    }

    // ==================== Addresses ====================

    /// Pointer to the value a slot stands for
    fn slot_address(&mut self, slot: &Slot) -> Result<Value> {
        if slot.by_ref {
            let ptr = Value::Register(slot.ptr);
            self.emit_value(|dest| Instruction::Load {
                dest,
                ty: IrType::Ptr,
                ptr,
            })
        } else {
            Ok(Value::Register(slot.ptr))
        }
    }

    /// Address of a struct field, addressed structurally by index
    fn field_address(&mut self, object: &Expr, member: &str) -> Result<Value> {
        let object_ty = self.type_of(object)?;
        let struct_name = object_ty
            .struct_name()
            .ok_or_else(|| Error::Unsupported(format!("member access on {}", object_ty)))?
            .to_string();
        let (index, _) = self
            .symbols
            .field(&object_ty, member)
            .ok_or_else(|| Error::UnknownStruct(struct_name.clone()))?;
        let base = self.address_of(object)?;
        self.emit_value(|dest| Instruction::FieldPtr {
            dest,
            struct_name,
            base,
            index,
        })
    }

    /// Address of an expression's value; values without storage are
    /// spilled to a fresh stack slot
    fn address_of(&mut self, expr: &Expr) -> Result<Value> {
        match &expr.kind {
            ExprKind::VarRef(name) => {
                let slot = self.lookup(name)?;
                self.slot_address(&slot)
            }
            ExprKind::Access { object, member } => self.field_address(object, member),
            _ => {
                let ir_ty = ir_type(&self.type_of(expr)?)?;
                let v = self.generate_expr(expr)?;
                let tmp = self.alloca(ir_ty.clone())?;
                self.emit(Instruction::Store {
                    ty: ir_ty,
                    value: v,
                    ptr: Value::Register(tmp),
                })?;
                Ok(Value::Register(tmp))
            }
        }
    }
}

/// Lower a source type
pub fn ir_type(ty: &Type) -> Result<IrType> {
    Ok(match ty {
        Type::Void => IrType::Void,
        Type::Bool => IrType::I1,
        Type::String => IrType::Ptr,
        Type::I32 => IrType::I32,
        Type::I64 => IrType::I64,
        Type::F32 => IrType::F32,
        Type::F64 => IrType::F64,
        Type::Struct(name) => IrType::Struct(name.clone()),
        Type::Unknown | Type::Error => {
            return Err(Error::Unsupported(format!("unresolved type {}", ty)));
        }
    })
}

fn bin_op(op: ast::BinOp, ty: &IrType) -> Result<BinOp> {
    let float = ty.is_float();
    let ir_op = match op {
        ast::BinOp::Add if float => BinOp::FAdd,
        ast::BinOp::Sub if float => BinOp::FSub,
        ast::BinOp::Mul if float => BinOp::FMul,
        ast::BinOp::Div if float => BinOp::FDiv,
        ast::BinOp::Add => BinOp::Add,
        ast::BinOp::Sub => BinOp::Sub,
        ast::BinOp::Mul => BinOp::Mul,
        ast::BinOp::Div => BinOp::SDiv,
        ast::BinOp::Mod if !float => BinOp::SRem,
        ast::BinOp::BitAnd if !float => BinOp::And,
        ast::BinOp::BitOr if !float => BinOp::Or,
        ast::BinOp::BitXor if !float => BinOp::Xor,
        ast::BinOp::Shl if !float => BinOp::Shl,
        ast::BinOp::Shr if !float => BinOp::AShr,
        other => {
            return Err(Error::Unsupported(format!(
                "operator '{}' on {}",
                other.symbol(),
                ty
            )));
        }
    };
    Ok(ir_op)
}

fn cmp_pred(op: ast::BinOp, ty: &IrType) -> Result<CmpPred> {
    let pred = if ty.is_float() {
        match op {
            ast::BinOp::Eq => CmpPred::Oeq,
            ast::BinOp::Ne => CmpPred::One,
            ast::BinOp::Lt => CmpPred::Olt,
            ast::BinOp::Le => CmpPred::Ole,
            ast::BinOp::Gt => CmpPred::Ogt,
            ast::BinOp::Ge => CmpPred::Oge,
            other => return Err(Error::Unsupported(format!("comparison '{}'", other.symbol()))),
        }
    } else if ty.is_int() {
        match op {
            ast::BinOp::Eq => CmpPred::Eq,
            ast::BinOp::Ne => CmpPred::Ne,
            ast::BinOp::Lt => CmpPred::Slt,
            ast::BinOp::Le => CmpPred::Sle,
            ast::BinOp::Gt => CmpPred::Sgt,
            ast::BinOp::Ge => CmpPred::Sge,
            other => return Err(Error::Unsupported(format!("comparison '{}'", other.symbol()))),
        }
    } else {
        return Err(Error::Unsupported(format!("comparison of {}", ty)));
    };
    Ok(pred)
}

/// Lower a checked program to an IR module
pub fn generate(module_name: &str, program: &Program, analysis: &Analysis) -> Result<IrModule> {
    IrGenerator::new(module_name, program, analysis).generate(program)
}
