//! Structural verification of the SSA IR
//!
//! Runs before a module is written out. A failure here means lowering
//! produced something malformed; it is never a user error.

use std::collections::{HashMap, HashSet};

use crate::middle::ir::{
    BasicBlock, BlockId, CastOp, Instruction, IrFunction, IrModule, IrType, Register, Terminator,
    Value,
};
use crate::utils::{Error, Result};

/// Verify the type definitions and every function of a module
pub fn verify_module(module: &IrModule) -> Result<()> {
    verify_structs(module)?;
    for func in &module.functions {
        FunctionVerifier::new(module, func).verify()?;
    }
    log::debug!("Verified IR module '{}'", module.name);
    Ok(())
}

/// Struct names are unique, field types are sized, and no struct holds
/// itself by value
fn verify_structs(module: &IrModule) -> Result<()> {
    let fail = |name: &str, msg: String| Error::Verification(format!("in type '%{}': {}", name, msg));

    let mut seen = HashSet::new();
    for s in &module.structs {
        if !seen.insert(s.name.as_str()) {
            return Err(fail(&s.name, "defined more than once".to_string()));
        }
        for field in &s.fields {
            match field {
                IrType::Void => return Err(fail(&s.name, "field of type void".to_string())),
                IrType::Struct(inner) if module.struct_def(inner).is_none() => {
                    return Err(fail(&s.name, format!("field of unknown type %{}", inner)));
                }
                _ => {}
            }
        }
    }

    // depth-first over by-value fields; a grey node reached again is a cycle
    fn visit<'a>(
        module: &'a IrModule,
        name: &'a str,
        grey: &mut Vec<&'a str>,
        done: &mut HashSet<&'a str>,
    ) -> Option<&'a str> {
        if done.contains(name) {
            return None;
        }
        if grey.contains(&name) {
            return Some(name);
        }
        grey.push(name);
        if let Some(def) = module.struct_def(name) {
            for field in &def.fields {
                if let IrType::Struct(inner) = field {
                    if let Some(cycle) = visit(module, inner, grey, done) {
                        return Some(cycle);
                    }
                }
            }
        }
        grey.pop();
        done.insert(name);
        None
    }

    let mut done = HashSet::new();
    for s in &module.structs {
        if let Some(name) = visit(module, &s.name, &mut Vec::new(), &mut done) {
            return Err(fail(name, "contains itself by value".to_string()));
        }
    }
    Ok(())
}

/// Where a register is defined: block and instruction index
type DefSite = (BlockId, usize);

struct FunctionVerifier<'m> {
    module: &'m IrModule,
    func: &'m IrFunction,
    types: HashMap<Register, IrType>,
    defs: HashMap<Register, DefSite>,
    /// `dominators[b]` holds every block dominating `b`
    dominators: Vec<HashSet<usize>>,
}

impl<'m> FunctionVerifier<'m> {
    fn new(module: &'m IrModule, func: &'m IrFunction) -> Self {
        Self {
            module,
            func,
            types: HashMap::new(),
            defs: HashMap::new(),
            dominators: Vec::new(),
        }
    }

    fn fail(&self, msg: impl std::fmt::Display) -> Error {
        Error::Verification(format!("in function '{}': {}", self.func.name, msg))
    }

    fn verify(mut self) -> Result<()> {
        if self.func.blocks.is_empty() {
            return Err(self.fail("function has no blocks"));
        }

        for (index, block) in self.func.blocks.iter().enumerate() {
            if block.id.0 != index {
                return Err(self.fail(format!("block '{}' has a stale id", block.label)));
            }
            let term = block
                .terminator
                .as_ref()
                .ok_or_else(|| self.fail(format!("block '{}' is not terminated", block.label)))?;
            for target in term.successors() {
                if self.func.block(target).is_none() {
                    return Err(self.fail(format!(
                        "block '{}' jumps to missing block {}",
                        block.label, target.0
                    )));
                }
            }
        }

        self.collect_definitions()?;
        self.compute_dominators();

        for block in &self.func.blocks {
            for (index, inst) in block.instructions.iter().enumerate() {
                self.check_instruction(block, index, inst)?;
            }
            if let Some(term) = &block.terminator {
                self.check_terminator(block, term)?;
            }
        }
        Ok(())
    }

    fn collect_definitions(&mut self) -> Result<()> {
        for block in &self.func.blocks {
            for (index, inst) in block.instructions.iter().enumerate() {
                let Some(dest) = inst.dest() else { continue };
                if self.defs.insert(dest, (block.id, index)).is_some() {
                    return Err(self.fail(format!("register {} is assigned twice", dest)));
                }
                let ty = match inst {
                    Instruction::Alloca { .. } | Instruction::FieldPtr { .. } => IrType::Ptr,
                    Instruction::Load { ty, .. } | Instruction::BinOp { ty, .. } => ty.clone(),
                    Instruction::Cmp { .. } => IrType::I1,
                    Instruction::Cast { to, .. } => to.clone(),
                    Instruction::Call { ret, .. } => ret.clone(),
                    Instruction::Store { .. } => continue,
                };
                self.types.insert(dest, ty);
            }
        }
        Ok(())
    }

    /// Iterative dataflow; blocks without predecessors other than the
    /// entry keep the full set, so anything dominates unreachable code
    fn compute_dominators(&mut self) {
        let n = self.func.blocks.len();
        let all: HashSet<usize> = (0..n).collect();
        let mut preds: Vec<Vec<usize>> = vec![Vec::new(); n];
        for block in &self.func.blocks {
            if let Some(term) = &block.terminator {
                for succ in term.successors() {
                    preds[succ.0].push(block.id.0);
                }
            }
        }

        let mut dom: Vec<HashSet<usize>> = vec![all; n];
        dom[0] = std::iter::once(0).collect();

        let mut changed = true;
        while changed {
            changed = false;
            for b in 1..n {
                if preds[b].is_empty() {
                    continue;
                }
                let mut next = preds[b]
                    .iter()
                    .map(|p| dom[*p].clone())
                    .reduce(|acc, set| acc.intersection(&set).copied().collect())
                    .unwrap_or_default();
                next.insert(b);
                if next != dom[b] {
                    dom[b] = next;
                    changed = true;
                }
            }
        }
        self.dominators = dom;
    }

    /// Type of an operand used at `(block, index)`
    fn operand(&self, value: &Value, block: &BasicBlock, index: usize) -> Result<IrType> {
        match value {
            Value::Register(r) => {
                let (def_block, def_index) = *self
                    .defs
                    .get(r)
                    .ok_or_else(|| self.fail(format!("use of undefined register {}", r)))?;
                let dominates = if def_block == block.id {
                    def_index < index
                } else {
                    self.dominators[block.id.0].contains(&def_block.0)
                };
                if !dominates {
                    return Err(self.fail(format!(
                        "register {} does not dominate its use in '{}'",
                        r, block.label
                    )));
                }
                self.types
                    .get(r)
                    .cloned()
                    .ok_or_else(|| self.fail(format!("register {} has no type", r)))
            }
            Value::ConstInt(_, ty) => {
                if !ty.is_int() {
                    return Err(self.fail(format!("integer constant of type {}", ty)));
                }
                Ok(ty.clone())
            }
            Value::ConstFloat(_, ty) => {
                if !ty.is_float() {
                    return Err(self.fail(format!("float constant of type {}", ty)));
                }
                Ok(ty.clone())
            }
            Value::Zero(IrType::Void) => Err(self.fail("void used as a value")),
            Value::Zero(ty) => Ok(ty.clone()),
            Value::Param(i) => self
                .func
                .params
                .get(*i)
                .map(|(_, ty)| ty.clone())
                .ok_or_else(|| self.fail(format!("parameter {} out of range", i))),
            Value::Global(name) => {
                if !self.module.strings.iter().any(|s| &s.name == name) {
                    return Err(self.fail(format!("unknown global @{}", name)));
                }
                Ok(IrType::Ptr)
            }
        }
    }

    fn expect_type(&self, what: &str, found: &IrType, expected: &IrType) -> Result<()> {
        if found != expected {
            return Err(self.fail(format!("{}: expected {}, found {}", what, expected, found)));
        }
        Ok(())
    }

    fn check_instruction(&self, block: &BasicBlock, index: usize, inst: &Instruction) -> Result<()> {
        match inst {
            Instruction::Alloca { ty, .. } => {
                if *ty == IrType::Void {
                    return Err(self.fail("alloca of void"));
                }
            }
            Instruction::Load { ty, ptr, .. } => {
                self.expect_type("load address", &self.operand(ptr, block, index)?, &IrType::Ptr)?;
                if *ty == IrType::Void {
                    return Err(self.fail("load of void"));
                }
            }
            Instruction::Store { ty, value, ptr } => {
                self.expect_type("store address", &self.operand(ptr, block, index)?, &IrType::Ptr)?;
                self.expect_type("stored value", &self.operand(value, block, index)?, ty)?;
            }
            Instruction::BinOp {
                op,
                ty,
                left,
                right,
                ..
            } => {
                self.expect_type("left operand", &self.operand(left, block, index)?, ty)?;
                self.expect_type("right operand", &self.operand(right, block, index)?, ty)?;
                let ok = if op.is_float() { ty.is_float() } else { ty.is_int() };
                if !ok {
                    return Err(self.fail(format!("'{}' applied to {}", op, ty)));
                }
            }
            Instruction::Cmp {
                pred,
                ty,
                left,
                right,
                ..
            } => {
                self.expect_type("left operand", &self.operand(left, block, index)?, ty)?;
                self.expect_type("right operand", &self.operand(right, block, index)?, ty)?;
                let ok = if pred.is_float() { ty.is_float() } else { ty.is_int() };
                if !ok {
                    return Err(self.fail(format!("'{}' applied to {}", pred, ty)));
                }
            }
            Instruction::Cast {
                op,
                value,
                from,
                to,
                ..
            } => {
                self.expect_type("cast operand", &self.operand(value, block, index)?, from)?;
                if !cast_is_well_formed(*op, from, to) {
                    return Err(self.fail(format!("invalid {} from {} to {}", op, from, to)));
                }
            }
            Instruction::FieldPtr {
                struct_name,
                base,
                index: field,
                ..
            } => {
                self.expect_type("field base", &self.operand(base, block, index)?, &IrType::Ptr)?;
                let def = self
                    .module
                    .struct_def(struct_name)
                    .ok_or_else(|| self.fail(format!("unknown struct %{}", struct_name)))?;
                if *field >= def.fields.len() {
                    return Err(self.fail(format!(
                        "field index {} out of range for %{}",
                        field, struct_name
                    )));
                }
            }
            Instruction::Call {
                dest,
                func,
                ret,
                params,
                args,
            } => {
                // a defined function must be called through its own type;
                // an extern only has to be declared under that name
                if let Some(def) = self.module.function(func) {
                    let def_params: Vec<IrType> = def.params.iter().map(|(_, t)| t.clone()).collect();
                    if def_params != *params {
                        return Err(self.fail(format!(
                            "call to '{}' does not match its definition",
                            func
                        )));
                    }
                    self.expect_type(&format!("return of '{}'", func), ret, &def.ret)?;
                } else if self.module.extern_decl(func).is_none() {
                    return Err(self.fail(format!("call to undeclared function '{}'", func)));
                }
                if params.len() != args.len() {
                    return Err(self.fail(format!(
                        "'{}' takes {} arguments, {} given",
                        func,
                        params.len(),
                        args.len()
                    )));
                }
                for (param, (ty, value)) in params.iter().zip(args) {
                    self.expect_type(&format!("argument to '{}'", func), ty, param)?;
                    self.expect_type(
                        &format!("argument to '{}'", func),
                        &self.operand(value, block, index)?,
                        param,
                    )?;
                }
                if dest.is_some() == (*ret == IrType::Void) {
                    return Err(self.fail(format!("result of '{}' does not match its type", func)));
                }
            }
        }
        Ok(())
    }

    fn check_terminator(&self, block: &BasicBlock, term: &Terminator) -> Result<()> {
        let index = block.instructions.len();
        match term {
            Terminator::Return { value: None } => {
                self.expect_type("return", &IrType::Void, &self.func.ret)
            }
            Terminator::Return {
                value: Some((ty, value)),
            } => {
                self.expect_type("return", ty, &self.func.ret)?;
                self.expect_type("returned value", &self.operand(value, block, index)?, ty)
            }
            Terminator::Branch { cond, .. } => {
                self.expect_type("branch condition", &self.operand(cond, block, index)?, &IrType::I1)
            }
            Terminator::Jump { .. } | Terminator::Unreachable => Ok(()),
        }
    }
}

fn cast_is_well_formed(op: CastOp, from: &IrType, to: &IrType) -> bool {
    match op {
        CastOp::SExt | CastOp::ZExt => from.is_int() && to.is_int() && from.bits() < to.bits(),
        CastOp::Trunc => from.is_int() && to.is_int() && from.bits() > to.bits(),
        CastOp::SIToFP => from.is_int() && to.is_float(),
        CastOp::FPToSI => from.is_float() && to.is_int(),
        CastOp::FPExt => *from == IrType::F32 && *to == IrType::F64,
        CastOp::FPTrunc => *from == IrType::F64 && *to == IrType::F32,
    }
}
