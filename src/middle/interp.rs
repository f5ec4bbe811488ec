//! Reference interpreter for the SSA IR, used by tests to observe what a
//! lowered program prints without invoking a native toolchain.

use std::collections::HashMap;

use crate::middle::ir::{
    BinOp, CastOp, CmpPred, Instruction, IrFunction, IrModule, IrType, Register, Terminator, Value,
};

const MAX_CALL_DEPTH: usize = 4096;

/// Runtime value
#[derive(Debug, Clone, PartialEq)]
pub enum RtValue {
    Int(i64),
    Float(f64),
    Ptr(Address),
    Agg(Vec<RtValue>),
    Null,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Base {
    Slot(usize),
    Global(String),
}

/// A stack slot or string constant, plus a field path into it
#[derive(Debug, Clone, PartialEq)]
pub struct Address {
    pub base: Base,
    pub path: Vec<usize>,
}

/// Printf argument as seen by the formatter
#[derive(Debug, Clone, PartialEq)]
pub enum FmtArg {
    Int(i64),
    Float(f64),
    Str(String),
}

/// Minimal printf: `%d %i %ld %s %f %c %%`
pub fn printf(fmt: &str, args: &[FmtArg]) -> Result<String, String> {
    let mut out = String::new();
    let mut args = args.iter();
    let mut chars = fmt.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        while matches!(chars.peek(), Some('l')) {
            chars.next();
        }
        let spec = chars.next().ok_or("dangling '%' in format")?;
        if spec == '%' {
            out.push('%');
            continue;
        }
        let arg = args
            .next()
            .ok_or_else(|| format!("missing argument for '%{}'", spec))?;
        match (spec, arg) {
            ('d' | 'i', FmtArg::Int(v)) => out.push_str(&v.to_string()),
            ('f', FmtArg::Float(v)) => out.push_str(&format!("{:.6}", v)),
            ('s', FmtArg::Str(s)) => out.push_str(s),
            ('c', FmtArg::Int(v)) => out.push(char::from(*v as u8)),
            (spec, arg) => return Err(format!("'%{}' does not accept {:?}", spec, arg)),
        }
    }
    Ok(out)
}

/// Wrap an integer to the width of its type
fn normalize(v: i64, ty: &IrType) -> i64 {
    match ty {
        IrType::I1 => v & 1,
        IrType::I32 => v as i32 as i64,
        _ => v,
    }
}

fn round_float(v: f64, ty: &IrType) -> f64 {
    if *ty == IrType::F32 {
        v as f32 as f64
    } else {
        v
    }
}

pub struct Interpreter<'m> {
    module: &'m IrModule,
    memory: Vec<RtValue>,
    output: String,
    depth: usize,
}

impl<'m> Interpreter<'m> {
    pub fn new(module: &'m IrModule) -> Self {
        Self {
            module,
            memory: Vec::new(),
            output: String::new(),
            depth: 0,
        }
    }

    /// Run `main`, returning its exit code and everything it printed
    pub fn run_main(mut self) -> Result<(i64, String), String> {
        let code = match self.call("main", Vec::new())? {
            Some(RtValue::Int(v)) => v,
            _ => 0,
        };
        Ok((code, self.output))
    }

    fn zero(&self, ty: &IrType) -> Result<RtValue, String> {
        Ok(match ty {
            IrType::I1 | IrType::I32 | IrType::I64 => RtValue::Int(0),
            IrType::F32 | IrType::F64 => RtValue::Float(0.0),
            IrType::Ptr | IrType::Void => RtValue::Null,
            IrType::Struct(name) => {
                let def = self
                    .module
                    .struct_def(name)
                    .ok_or_else(|| format!("unknown struct {}", name))?;
                RtValue::Agg(
                    def.fields
                        .iter()
                        .map(|f| self.zero(f))
                        .collect::<Result<_, _>>()?,
                )
            }
        })
    }

    fn read(&self, addr: &Address) -> Result<RtValue, String> {
        let mut value = match &addr.base {
            Base::Slot(i) => self.memory.get(*i).ok_or("dangling slot")?,
            Base::Global(name) => return Err(format!("load from constant @{}", name)),
        };
        for index in &addr.path {
            value = match value {
                RtValue::Agg(fields) => fields.get(*index).ok_or("field out of range")?,
                other => return Err(format!("field access on {:?}", other)),
            };
        }
        Ok(value.clone())
    }

    fn write(&mut self, addr: &Address, new: RtValue) -> Result<(), String> {
        let mut value = match &addr.base {
            Base::Slot(i) => self.memory.get_mut(*i).ok_or("dangling slot")?,
            Base::Global(name) => return Err(format!("store to constant @{}", name)),
        };
        for index in &addr.path {
            value = match value {
                RtValue::Agg(fields) => fields.get_mut(*index).ok_or("field out of range")?,
                other => return Err(format!("field access on {:?}", other)),
            };
        }
        *value = new;
        Ok(())
    }

    fn string_at(&self, value: &RtValue) -> Result<String, String> {
        match value {
            RtValue::Ptr(Address {
                base: Base::Global(name),
                ..
            }) => self
                .module
                .strings
                .iter()
                .find(|s| &s.name == name)
                .map(|s| s.value.clone())
                .ok_or_else(|| format!("unknown string @{}", name)),
            other => Err(format!("expected a string, found {:?}", other)),
        }
    }

    fn call(&mut self, name: &str, args: Vec<RtValue>) -> Result<Option<RtValue>, String> {
        if let Some(func) = self.module.function(name) {
            self.depth += 1;
            if self.depth > MAX_CALL_DEPTH {
                return Err("call depth exceeded".to_string());
            }
            let result = self.execute(func, args);
            self.depth -= 1;
            return result;
        }
        let ext = self
            .module
            .extern_decl(name)
            .ok_or_else(|| format!("call to unknown function '{}'", name))?;
        let printed = match name {
            "printf" => {
                let fmt = self.string_at(args.first().ok_or("printf without format")?)?;
                let rest = args[1..]
                    .iter()
                    .map(|a| match a {
                        RtValue::Int(v) => Ok(FmtArg::Int(*v)),
                        RtValue::Float(v) => Ok(FmtArg::Float(*v)),
                        ptr @ RtValue::Ptr(_) => self.string_at(ptr).map(FmtArg::Str),
                        other => Err(format!("cannot format {:?}", other)),
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                printf(&fmt, &rest)?
            }
            "puts" => format!("{}\n", self.string_at(args.first().ok_or("puts without string")?)?),
            other => return Err(format!("no runtime for extern '{}'", other)),
        };
        let count = printed.len() as i64;
        self.output.push_str(&printed);
        Ok(if ext.ret == IrType::Void {
            None
        } else {
            Some(RtValue::Int(count))
        })
    }

    fn execute(&mut self, func: &IrFunction, args: Vec<RtValue>) -> Result<Option<RtValue>, String> {
        let mut regs: HashMap<Register, RtValue> = HashMap::new();
        let mut block = 0usize;

        loop {
            let current = func.blocks.get(block).ok_or("jump to missing block")?;
            for inst in &current.instructions {
                self.step(inst, &mut regs, &args)?;
            }
            match current.terminator.as_ref().ok_or("fell off an unterminated block")? {
                Terminator::Return { value: None } => return Ok(None),
                Terminator::Return { value: Some((_, v)) } => {
                    return Ok(Some(self.eval(v, &regs, &args)?));
                }
                Terminator::Jump { target } => block = target.0,
                Terminator::Branch {
                    cond,
                    then_target,
                    else_target,
                } => {
                    block = match self.eval(cond, &regs, &args)? {
                        RtValue::Int(0) => else_target.0,
                        RtValue::Int(_) => then_target.0,
                        other => return Err(format!("branch on {:?}", other)),
                    };
                }
                Terminator::Unreachable => {
                    return Err(format!("reached unreachable in '{}'", func.name));
                }
            }
        }
    }

    fn eval(
        &self,
        value: &Value,
        regs: &HashMap<Register, RtValue>,
        args: &[RtValue],
    ) -> Result<RtValue, String> {
        Ok(match value {
            Value::Register(r) => regs.get(r).cloned().ok_or_else(|| format!("unset {}", r))?,
            Value::ConstInt(v, ty) => RtValue::Int(normalize(*v, ty)),
            Value::ConstFloat(v, ty) => RtValue::Float(round_float(*v, ty)),
            Value::Zero(ty) => self.zero(ty)?,
            Value::Param(i) => args.get(*i).cloned().ok_or("missing argument")?,
            Value::Global(name) => RtValue::Ptr(Address {
                base: Base::Global(name.clone()),
                path: Vec::new(),
            }),
        })
    }

    fn step(
        &mut self,
        inst: &Instruction,
        regs: &mut HashMap<Register, RtValue>,
        args: &[RtValue],
    ) -> Result<(), String> {
        match inst {
            Instruction::Alloca { dest, ty } => {
                let slot = self.memory.len();
                let initial = self.zero(ty)?;
                self.memory.push(initial);
                regs.insert(
                    *dest,
                    RtValue::Ptr(Address {
                        base: Base::Slot(slot),
                        path: Vec::new(),
                    }),
                );
            }
            Instruction::Load { dest, ptr, .. } => {
                let addr = as_address(self.eval(ptr, regs, args)?)?;
                regs.insert(*dest, self.read(&addr)?);
            }
            Instruction::Store { value, ptr, .. } => {
                let v = self.eval(value, regs, args)?;
                let addr = as_address(self.eval(ptr, regs, args)?)?;
                self.write(&addr, v)?;
            }
            Instruction::FieldPtr {
                dest, base, index, ..
            } => {
                let mut addr = as_address(self.eval(base, regs, args)?)?;
                addr.path.push(*index);
                regs.insert(*dest, RtValue::Ptr(addr));
            }
            Instruction::BinOp {
                dest,
                op,
                ty,
                left,
                right,
            } => {
                let l = self.eval(left, regs, args)?;
                let r = self.eval(right, regs, args)?;
                regs.insert(*dest, binary(*op, ty, l, r)?);
            }
            Instruction::Cmp {
                dest,
                pred,
                left,
                right,
                ..
            } => {
                let l = self.eval(left, regs, args)?;
                let r = self.eval(right, regs, args)?;
                regs.insert(*dest, RtValue::Int(compare(*pred, l, r)? as i64));
            }
            Instruction::Cast {
                dest,
                op,
                value,
                to,
                ..
            } => {
                let v = self.eval(value, regs, args)?;
                let out = match (op, v) {
                    (CastOp::SExt | CastOp::ZExt | CastOp::Trunc, RtValue::Int(i)) => {
                        RtValue::Int(normalize(i, to))
                    }
                    (CastOp::SIToFP, RtValue::Int(i)) => RtValue::Float(round_float(i as f64, to)),
                    (CastOp::FPToSI, RtValue::Float(f)) => RtValue::Int(normalize(f as i64, to)),
                    (CastOp::FPExt | CastOp::FPTrunc, RtValue::Float(f)) => {
                        RtValue::Float(round_float(f, to))
                    }
                    (op, v) => return Err(format!("{} applied to {:?}", op, v)),
                };
                regs.insert(*dest, out);
            }
            Instruction::Call {
                dest, func, args: call_args, ..
            } => {
                let values = call_args
                    .iter()
                    .map(|(_, v)| self.eval(v, regs, args))
                    .collect::<Result<Vec<_>, _>>()?;
                let result = self.call(func, values)?;
                if let (Some(dest), Some(result)) = (dest, result) {
                    regs.insert(*dest, result);
                }
            }
        }
        Ok(())
    }
}

fn as_address(value: RtValue) -> Result<Address, String> {
    match value {
        RtValue::Ptr(addr) => Ok(addr),
        other => Err(format!("expected a pointer, found {:?}", other)),
    }
}

fn binary(op: BinOp, ty: &IrType, l: RtValue, r: RtValue) -> Result<RtValue, String> {
    match (l, r) {
        (RtValue::Int(a), RtValue::Int(b)) => {
            let v = match op {
                BinOp::Add => a.wrapping_add(b),
                BinOp::Sub => a.wrapping_sub(b),
                BinOp::Mul => a.wrapping_mul(b),
                BinOp::SDiv | BinOp::SRem if b == 0 => return Err("division by zero".to_string()),
                BinOp::SDiv => a.wrapping_div(b),
                BinOp::SRem => a.wrapping_rem(b),
                BinOp::And => a & b,
                BinOp::Or => a | b,
                BinOp::Xor => a ^ b,
                BinOp::Shl => a.wrapping_shl(b as u32 % ty.bits().max(1)),
                BinOp::AShr => a.wrapping_shr(b as u32 % ty.bits().max(1)),
                other => return Err(format!("{} on integers", other)),
            };
            Ok(RtValue::Int(normalize(v, ty)))
        }
        (RtValue::Float(a), RtValue::Float(b)) => {
            let v = match op {
                BinOp::FAdd => a + b,
                BinOp::FSub => a - b,
                BinOp::FMul => a * b,
                BinOp::FDiv => a / b,
                other => return Err(format!("{} on floats", other)),
            };
            Ok(RtValue::Float(round_float(v, ty)))
        }
        (l, r) => Err(format!("{} on {:?} and {:?}", op, l, r)),
    }
}

fn compare(pred: CmpPred, l: RtValue, r: RtValue) -> Result<bool, String> {
    match (l, r) {
        (RtValue::Int(a), RtValue::Int(b)) => Ok(match pred {
            CmpPred::Eq => a == b,
            CmpPred::Ne => a != b,
            CmpPred::Slt => a < b,
            CmpPred::Sle => a <= b,
            CmpPred::Sgt => a > b,
            CmpPred::Sge => a >= b,
            other => return Err(format!("{} on integers", other)),
        }),
        (RtValue::Float(a), RtValue::Float(b)) => Ok(match pred {
            CmpPred::Oeq => a == b,
            CmpPred::One => a != b && !a.is_nan() && !b.is_nan(),
            CmpPred::Olt => a < b,
            CmpPred::Ole => a <= b,
            CmpPred::Ogt => a > b,
            CmpPred::Oge => a >= b,
            other => return Err(format!("{} on floats", other)),
        }),
        (l, r) => Err(format!("{} on {:?} and {:?}", pred, l, r)),
    }
}

/// Run a lowered module's `main`
pub fn run(module: &IrModule) -> Result<(i64, String), String> {
    Interpreter::new(module).run_main()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::parser::parse_source;
    use crate::frontend::semantic::analyze;
    use crate::middle::ir_gen::generate;
    use pretty_assertions::assert_eq;

    fn run_source(source: &str) -> (i64, String) {
        let (program, _) = parse_source(source, 0, 0).unwrap();
        let analysis = analyze(&program);
        assert!(!analysis.has_errors(), "{:?}", analysis.diagnostics);
        let module = generate("test", &program, &analysis).unwrap();
        run(&module).unwrap()
    }

    #[test]
    fn test_printf_formatting() {
        let out = printf(
            "%d|%ld|%s|%f|%c|%%",
            &[
                FmtArg::Int(-3),
                FmtArg::Int(1 << 40),
                FmtArg::Str("hi".into()),
                FmtArg::Float(1.5),
                FmtArg::Int(65),
            ],
        )
        .unwrap();
        assert_eq!(out, "-3|1099511627776|hi|1.500000|A|%");
        assert!(printf("%d", &[]).is_err());
    }

    #[test]
    fn test_exit_code_and_arithmetic() {
        let (code, _) = run_source("fn main() -> i32 { return (7 % 4) * 3 - (8 >> 1) }");
        assert_eq!(code, 5);
    }

    #[test]
    fn test_i32_wraps() {
        let (_, out) = run_source(
            "extern fn printf(f: string, v: i32) -> void
             fn main() -> i32 { let x = 2147483647 printf(\"%d\", x + 1) return 0 }",
        );
        assert_eq!(out, "-2147483648");
    }

    #[test]
    fn test_field_assignment_through_receiver() {
        let (code, _) = run_source(
            "struct Counter { n: i32 }
             fn Counter.get() -> i32 { return self.n }
             fn main() -> i32 {
                 let mut c = new Counter(41)
                 c = new Counter(c.get() + 1)
                 return c.get()
             }",
        );
        assert_eq!(code, 42);
    }

    #[test]
    fn test_uninitialized_declaration_is_zero() {
        let (code, _) = run_source("fn main() -> i32 { let mut x: i32 return x }");
        assert_eq!(code, 0);
    }
}
