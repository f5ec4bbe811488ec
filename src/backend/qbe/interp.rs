//! Reference interpreter for the flat IR over byte-addressed memory, used
//! by tests to observe what a lowered program prints.

use std::collections::HashMap;

use super::ir::{Cond, Op, QFunction, QInstr, QModule, QType, QValue};
use crate::middle::interp::{printf, FmtArg};

const DATA_BASE: u64 = 0x1000;
const STACK_BASE: u64 = 0x10_0000;
const MAX_CALL_DEPTH: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Val {
    Int(i64),
    Single(f32),
    Double(f64),
}

impl Val {
    fn int(self) -> Result<i64, String> {
        match self {
            Val::Int(v) => Ok(v),
            other => Err(format!("expected an integer, found {:?}", other)),
        }
    }

    fn float(self) -> Result<f64, String> {
        match self {
            Val::Single(v) => Ok(v as f64),
            Val::Double(v) => Ok(v),
            other => Err(format!("expected a float, found {:?}", other)),
        }
    }
}

/// Wrap to the class of the destination
fn fit(v: i64, ty: &QType) -> i64 {
    if *ty == QType::Word {
        v as i32 as i64
    } else {
        v
    }
}

fn float_val(v: f64, ty: &QType) -> Val {
    if *ty == QType::Single {
        Val::Single(v as f32)
    } else {
        Val::Double(v)
    }
}

pub struct Machine<'m> {
    module: &'m QModule,
    data: Vec<u8>,
    globals: HashMap<&'m str, u64>,
    stack: Vec<u8>,
    output: String,
    depth: usize,
}

impl<'m> Machine<'m> {
    pub fn new(module: &'m QModule) -> Self {
        let mut data = Vec::new();
        let mut globals = HashMap::new();
        for d in &module.data {
            globals.insert(d.name.as_str(), DATA_BASE + data.len() as u64);
            data.extend_from_slice(d.value.as_bytes());
            data.push(0);
        }
        Self {
            module,
            data,
            globals,
            stack: Vec::new(),
            output: String::new(),
            depth: 0,
        }
    }

    /// Run `main`, returning its exit code and everything it printed
    pub fn run_main(mut self) -> Result<(i64, String), String> {
        let code = match self.call("main", Vec::new())? {
            Some(Val::Int(v)) => v,
            _ => 0,
        };
        Ok((code, self.output))
    }

    // ==================== Memory ====================

    fn alloc(&mut self, size: usize, align: usize) -> u64 {
        while self.stack.len() % align.max(1) != 0 {
            self.stack.push(0);
        }
        let addr = STACK_BASE + self.stack.len() as u64;
        self.stack.resize(self.stack.len() + size.max(1), 0);
        addr
    }

    fn bytes(&self, addr: u64, len: usize) -> Result<&[u8], String> {
        let (region, base) = if addr >= STACK_BASE {
            (&self.stack, STACK_BASE)
        } else {
            (&self.data, DATA_BASE)
        };
        let start = addr
            .checked_sub(base)
            .ok_or_else(|| format!("bad address {:#x}", addr))? as usize;
        region
            .get(start..start + len)
            .ok_or_else(|| format!("out of bounds access at {:#x}", addr))
    }

    fn bytes_mut(&mut self, addr: u64, len: usize) -> Result<&mut [u8], String> {
        if addr < STACK_BASE {
            return Err(format!("write to read-only data at {:#x}", addr));
        }
        let start = (addr - STACK_BASE) as usize;
        self.stack
            .get_mut(start..start + len)
            .ok_or_else(|| format!("out of bounds access at {:#x}", addr))
    }

    fn load(&self, ty: &QType, addr: u64) -> Result<Val, String> {
        Ok(match ty {
            QType::Word => {
                let b = self.bytes(addr, 4)?;
                Val::Int(i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as i64)
            }
            QType::Long | QType::Aggregate(_) => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(self.bytes(addr, 8)?);
                Val::Int(i64::from_le_bytes(raw))
            }
            QType::Single => {
                let b = self.bytes(addr, 4)?;
                Val::Single(f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            }
            QType::Double => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(self.bytes(addr, 8)?);
                Val::Double(f64::from_le_bytes(raw))
            }
        })
    }

    fn store(&mut self, ty: &QType, value: Val, addr: u64) -> Result<(), String> {
        match ty {
            QType::Word => {
                let v = value.int()? as i32;
                self.bytes_mut(addr, 4)?.copy_from_slice(&v.to_le_bytes());
            }
            QType::Long | QType::Aggregate(_) => {
                let v = value.int()?;
                self.bytes_mut(addr, 8)?.copy_from_slice(&v.to_le_bytes());
            }
            QType::Single => {
                let v = value.float()? as f32;
                self.bytes_mut(addr, 4)?.copy_from_slice(&v.to_le_bytes());
            }
            QType::Double => {
                let v = value.float()?;
                self.bytes_mut(addr, 8)?.copy_from_slice(&v.to_le_bytes());
            }
        }
        Ok(())
    }

    fn copy(&mut self, src: u64, dst: u64, size: usize) -> Result<(), String> {
        let data = self.bytes(src, size)?.to_vec();
        self.bytes_mut(dst, size)?.copy_from_slice(&data);
        Ok(())
    }

    fn c_string(&self, addr: u64) -> Result<String, String> {
        let mut out = Vec::new();
        let mut at = addr;
        loop {
            let b = self.bytes(at, 1)?[0];
            if b == 0 {
                break;
            }
            out.push(b);
            at += 1;
        }
        String::from_utf8(out).map_err(|e| e.to_string())
    }

    fn aggregate_size(&self, name: &str) -> Result<usize, String> {
        self.module
            .type_def(name)
            .map(|t| t.size)
            .ok_or_else(|| format!("unknown type :{}", name))
    }

    // ==================== Execution ====================

    fn call(&mut self, name: &str, args: Vec<Val>) -> Result<Option<Val>, String> {
        let module = self.module;
        if let Some(func) = module.function(name) {
            self.depth += 1;
            if self.depth > MAX_CALL_DEPTH {
                return Err("call depth exceeded".to_string());
            }
            let result = self.execute(func, args);
            self.depth -= 1;
            return result;
        }

        let printed = match name {
            "printf" => {
                let fmt = self.c_string(args.first().ok_or("printf without format")?.int()? as u64)?;
                // a `%s` argument is an address; everything else is taken as is
                let mut rest = Vec::new();
                let mut specs = fmt.split('%').skip(1).filter(|s| !s.is_empty());
                for arg in &args[1..] {
                    let is_string = specs
                        .next()
                        .map_or(false, |s| s.trim_start_matches('l').starts_with('s'));
                    rest.push(match arg {
                        Val::Int(v) if is_string => FmtArg::Str(self.c_string(*v as u64)?),
                        Val::Int(v) => FmtArg::Int(*v),
                        Val::Single(v) => FmtArg::Float(*v as f64),
                        Val::Double(v) => FmtArg::Float(*v),
                    });
                }
                printf(&fmt, &rest)?
            }
            "puts" => {
                let s = self.c_string(args.first().ok_or("puts without string")?.int()? as u64)?;
                format!("{}\n", s)
            }
            other => return Err(format!("no runtime for extern '{}'", other)),
        };
        let count = printed.len() as i64;
        self.output.push_str(&printed);
        Ok(Some(Val::Int(count)))
    }

    fn eval(&self, value: &QValue, temps: &HashMap<String, Val>) -> Result<Val, String> {
        Ok(match value {
            QValue::Temp(name) => *temps
                .get(name)
                .ok_or_else(|| format!("unset temporary %{}", name))?,
            QValue::Const(v) => Val::Int(*v),
            QValue::Single(v) => Val::Single(*v),
            QValue::Double(v) => Val::Double(*v),
            QValue::Global(name) => Val::Int(
                *self
                    .globals
                    .get(name.as_str())
                    .ok_or_else(|| format!("unknown global ${}", name))? as i64,
            ),
        })
    }

    fn execute(&mut self, func: &QFunction, args: Vec<Val>) -> Result<Option<Val>, String> {
        if args.len() != func.params.len() {
            return Err(format!("'{}' called with {} arguments", func.name, args.len()));
        }

        let mut temps: HashMap<String, Val> = HashMap::new();
        for ((ty, name), arg) in func.params.iter().zip(args) {
            let value = match ty {
                // aggregates arrive as a pointer to the callee's own copy
                QType::Aggregate(agg) => {
                    let size = self.aggregate_size(agg)?;
                    let copy = self.alloc(size, 8);
                    self.copy(arg.int()? as u64, copy, size)?;
                    Val::Int(copy as i64)
                }
                _ => arg,
            };
            temps.insert(name.clone(), value);
        }

        let labels: HashMap<&str, usize> = func
            .body
            .iter()
            .enumerate()
            .filter_map(|(i, inst)| match inst {
                QInstr::Label(l) => Some((l.as_str(), i)),
                _ => None,
            })
            .collect();
        let jump = |label: &str| -> Result<usize, String> {
            labels
                .get(label)
                .copied()
                .ok_or_else(|| format!("jump to unknown label @{}", label))
        };

        let mut pc = 0;
        while let Some(inst) = func.body.get(pc) {
            pc += 1;
            match inst {
                QInstr::Label(_) => {}
                QInstr::Assign { dest, ty, op, args } => {
                    let values = args
                        .iter()
                        .map(|a| self.eval(a, &temps))
                        .collect::<Result<Vec<_>, _>>()?;
                    let result = self.apply(ty, op, &values)?;
                    temps.insert(dest.clone(), result);
                }
                QInstr::Store { ty, value, addr } => {
                    let v = self.eval(value, &temps)?;
                    let a = self.eval(addr, &temps)?.int()? as u64;
                    self.store(ty, v, a)?;
                }
                QInstr::Blit { src, dst, size } => {
                    let s = self.eval(src, &temps)?.int()? as u64;
                    let d = self.eval(dst, &temps)?.int()? as u64;
                    self.copy(s, d, *size)?;
                }
                QInstr::Call { dest, func: callee, args } => {
                    let values = args
                        .iter()
                        .map(|(_, a)| self.eval(a, &temps))
                        .collect::<Result<Vec<_>, _>>()?;
                    let result = self.call(callee, values)?;
                    if let Some((dest, ty)) = dest {
                        let mut value = result.ok_or_else(|| format!("'{}' returned nothing", callee))?;
                        if let QType::Aggregate(agg) = ty {
                            let size = self.aggregate_size(agg)?;
                            let copy = self.alloc(size, 8);
                            self.copy(value.int()? as u64, copy, size)?;
                            value = Val::Int(copy as i64);
                        }
                        temps.insert(dest.clone(), value);
                    }
                }
                QInstr::Jmp(label) => pc = jump(label)?,
                QInstr::Jnz {
                    cond,
                    if_true,
                    if_false,
                } => {
                    let c = self.eval(cond, &temps)?.int()?;
                    pc = jump(if c != 0 { if_true } else { if_false })?;
                }
                QInstr::Ret(value) => {
                    return match value {
                        Some(v) => Ok(Some(self.eval(v, &temps)?)),
                        None => Ok(None),
                    };
                }
                QInstr::Hlt => return Err(format!("hlt reached in '{}'", func.name)),
            }
        }
        Err(format!("fell off the end of '{}'", func.name))
    }

    fn apply(&mut self, ty: &QType, op: &Op, args: &[Val]) -> Result<Val, String> {
        let arg = |i: usize| -> Result<Val, String> {
            args.get(i).copied().ok_or_else(|| format!("{} is missing an operand", op))
        };

        Ok(match op {
            Op::Alloc(align) => {
                let size = arg(0)?.int()? as usize;
                Val::Int(self.alloc(size, *align) as i64)
            }
            Op::Load(class) => self.load(class, arg(0)?.int()? as u64)?,
            Op::Copy => match arg(0)? {
                Val::Int(v) => Val::Int(fit(v, ty)),
                other => other,
            },
            Op::Neg => match arg(0)? {
                Val::Int(v) => Val::Int(fit(v.wrapping_neg(), ty)),
                other => float_val(-other.float()?, ty),
            },
            Op::Cmp(cond, class) => {
                let (l, r) = (arg(0)?, arg(1)?);
                let result = if class.is_float() {
                    let (a, b) = (l.float()?, r.float()?);
                    match cond {
                        Cond::Eq => a == b,
                        Cond::Ne => a != b,
                        Cond::Lt => a < b,
                        Cond::Le => a <= b,
                        Cond::Gt => a > b,
                        Cond::Ge => a >= b,
                        other => return Err(format!("c{} on floats", other)),
                    }
                } else {
                    let (a, b) = (fit(l.int()?, class), fit(r.int()?, class));
                    match cond {
                        Cond::Eq => a == b,
                        Cond::Ne => a != b,
                        Cond::Slt => a < b,
                        Cond::Sle => a <= b,
                        Cond::Sgt => a > b,
                        Cond::Sge => a >= b,
                        other => return Err(format!("c{} on integers", other)),
                    }
                };
                Val::Int(result as i64)
            }
            Op::Extsw => Val::Int(arg(0)?.int()? as i32 as i64),
            Op::Extuw => Val::Int(arg(0)?.int()? as u32 as i64),
            Op::Exts => Val::Double(arg(0)?.float()?),
            Op::Truncd => Val::Single(arg(0)?.float()? as f32),
            Op::Stosi | Op::Dtosi => Val::Int(fit(arg(0)?.float()? as i64, ty)),
            Op::Swtof => float_val(arg(0)?.int()? as i32 as f64, ty),
            Op::Sltof => float_val(arg(0)?.int()? as f64, ty),
            binary => {
                let (l, r) = (arg(0)?, arg(1)?);
                if ty.is_float() {
                    let (a, b) = (l.float()?, r.float()?);
                    let v = match binary {
                        Op::Add => a + b,
                        Op::Sub => a - b,
                        Op::Mul => a * b,
                        Op::Div => a / b,
                        other => return Err(format!("{} on floats", other)),
                    };
                    float_val(v, ty)
                } else {
                    let (a, b) = (fit(l.int()?, ty), fit(r.int()?, ty));
                    let bits = if *ty == QType::Word { 32 } else { 64 };
                    let v = match binary {
                        Op::Add => a.wrapping_add(b),
                        Op::Sub => a.wrapping_sub(b),
                        Op::Mul => a.wrapping_mul(b),
                        Op::Div | Op::Rem if b == 0 => return Err("division by zero".to_string()),
                        Op::Div => a.wrapping_div(b),
                        Op::Rem => a.wrapping_rem(b),
                        Op::And => a & b,
                        Op::Or => a | b,
                        Op::Xor => a ^ b,
                        Op::Shl => a.wrapping_shl(b as u32 % bits),
                        Op::Sar => a.wrapping_shr(b as u32 % bits),
                        other => return Err(format!("{} on integers", other)),
                    };
                    Val::Int(fit(v, ty))
                }
            }
        })
    }
}

/// Run a lowered module's `main`
pub fn run(module: &QModule) -> Result<(i64, String), String> {
    Machine::new(module).run_main()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::qbe::codegen::generate;
    use crate::frontend::parser::parse_source;
    use crate::frontend::semantic::analyze;
    use pretty_assertions::assert_eq;

    fn run_source(source: &str) -> (i64, String) {
        let (program, _) = parse_source(source, 0, 0).unwrap();
        let analysis = analyze(&program);
        assert!(!analysis.has_errors(), "{:?}", analysis.diagnostics);
        run(&generate(&program, &analysis).unwrap()).unwrap()
    }

    #[test]
    fn test_struct_values_are_copied() {
        let (code, _) = run_source(
            "struct P { a: i32, b: i64 }
             fn P.first() -> i32 { return self.a }
             fn main() -> i32 {
                 let mut p = new P(1, 2L)
                 let q = p
                 p = new P(7, 8L)
                 return q.first() * 10 + p.first()
             }",
        );
        assert_eq!(code, 17);
    }

    #[test]
    fn test_struct_params_and_returns() {
        let (code, _) = run_source(
            "struct V { x: i32, y: i32 }
             fn swap(v: V) -> V { return new V(v.y, v.x) }
             fn main() -> i32 { let v = swap(new V(1, 2)) return v.x * 10 + v.y }",
        );
        assert_eq!(code, 21);
    }

    #[test]
    fn test_nested_struct_fields() {
        let (code, _) = run_source(
            "struct In { v: i32 }
             struct Out { pad: i64, inner: In }
             fn main() -> i32 { let o = new Out(5L, new In(9)) return o.inner.v }",
        );
        assert_eq!(code, 9);
    }

    #[test]
    fn test_float_and_string_printing() {
        let (_, out) = run_source(
            "extern fn printf(f: string, v: f64) -> void
             extern fn puts(s: string) -> i32
             fn main() -> i32 { printf(\"%f\", 1.5f as f64 * 2.0) puts(\"ok\") return 0 }",
        );
        assert_eq!(out, "3.000000ok\n");
    }

    #[test]
    fn test_zero_initialized_struct() {
        let (code, _) = run_source(
            "struct P { a: i32, b: f64 }
             fn main() -> i32 { let p: P return p.a + (p.b as i32) }",
        );
        assert_eq!(code, 0);
    }
}
