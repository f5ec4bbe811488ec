//! LLVM textual IR printer
//!
//! Renders an [`IrModule`] as a `.ll` file accepted by `clang`.

use std::fmt::{self, Write};

use crate::middle::ir::{
    BasicBlock, BlockId, Instruction, IrFunction, IrModule, IrType, Terminator, Value,
};

/// Display adapter producing LLVM assembly for a module
pub struct LlvmText<'m>(pub &'m IrModule);

impl fmt::Display for LlvmText<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let module = self.0;
        writeln!(f, "; ModuleID = '{}'", module.name)?;
        writeln!(f, "source_filename = \"{}\"", module.name)?;

        if !module.structs.is_empty() {
            writeln!(f)?;
        }
        for s in &module.structs {
            let fields: Vec<String> = s.fields.iter().map(|t| t.to_string()).collect();
            writeln!(f, "%{} = type {{ {} }}", s.name, fields.join(", "))?;
        }

        if !module.strings.is_empty() {
            writeln!(f)?;
        }
        for s in &module.strings {
            writeln!(
                f,
                "@{} = private unnamed_addr constant [{} x i8] c\"{}\\00\", align 1",
                s.name,
                s.value.len() + 1,
                escape_bytes(&s.value)
            )?;
        }

        if !module.externs.is_empty() {
            writeln!(f)?;
        }
        for e in &module.externs {
            let params: Vec<String> = e.params.iter().map(|t| t.to_string()).collect();
            writeln!(f, "declare {} @{}({})", e.ret, e.name, params.join(", "))?;
        }

        for func in &module.functions {
            writeln!(f)?;
            print_function(f, module, func)?;
        }
        Ok(())
    }
}

fn print_function(f: &mut impl Write, module: &IrModule, func: &IrFunction) -> fmt::Result {
    let params: Vec<String> = func
        .params
        .iter()
        .enumerate()
        .map(|(i, (_, ty))| format!("{} {}", ty, param_name(i)))
        .collect();
    writeln!(f, "define {} @{}({}) {{", func.ret, func.name, params.join(", "))?;

    for (i, block) in func.blocks.iter().enumerate() {
        if i > 0 {
            writeln!(f)?;
        }
        print_block(f, module, func, block)?;
    }

    writeln!(f, "}}")
}

fn print_block(
    f: &mut impl Write,
    module: &IrModule,
    func: &IrFunction,
    block: &BasicBlock,
) -> fmt::Result {
    writeln!(f, "{}:", block.label)?;
    for inst in &block.instructions {
        write!(f, "  ")?;
        print_instruction(f, module, inst)?;
        writeln!(f)?;
    }
    if let Some(term) = &block.terminator {
        write!(f, "  ")?;
        print_terminator(f, func, term)?;
        writeln!(f)?;
    }
    Ok(())
}

fn print_instruction(f: &mut impl Write, module: &IrModule, inst: &Instruction) -> fmt::Result {
    match inst {
        Instruction::Alloca { dest, ty } => write!(f, "{} = alloca {}", dest, ty),
        Instruction::Load { dest, ty, ptr } => {
            write!(f, "{} = load {}, ptr {}", dest, ty, operand(ptr))
        }
        Instruction::Store { ty, value, ptr } => {
            write!(f, "store {} {}, ptr {}", ty, operand(value), operand(ptr))
        }
        Instruction::BinOp {
            dest,
            op,
            ty,
            left,
            right,
        } => write!(f, "{} = {} {} {}, {}", dest, op, ty, operand(left), operand(right)),
        Instruction::Cmp {
            dest,
            pred,
            ty,
            left,
            right,
        } => write!(f, "{} = {} {} {}, {}", dest, pred, ty, operand(left), operand(right)),
        Instruction::Cast {
            dest,
            op,
            value,
            from,
            to,
        } => write!(f, "{} = {} {} {} to {}", dest, op, from, operand(value), to),
        Instruction::FieldPtr {
            dest,
            struct_name,
            base,
            index,
        } => write!(
            f,
            "{} = getelementptr inbounds %{}, ptr {}, i32 0, i32 {}",
            dest,
            struct_name,
            operand(base),
            index
        ),
        Instruction::Call {
            dest,
            func,
            ret,
            params,
            args,
        } => {
            if let Some(dest) = dest {
                write!(f, "{} = ", dest)?;
            }
            let args: Vec<String> = args
                .iter()
                .map(|(ty, v)| format!("{} {}", ty, operand(v)))
                .collect();
            // an overload other than the declared one is called through
            // its own function type
            let declared = module
                .signature(func)
                .map_or(false, |(p, r)| p == *params && r == *ret);
            if declared {
                write!(f, "call {} @{}({})", ret, func, args.join(", "))
            } else {
                let params: Vec<String> = params.iter().map(|t| t.to_string()).collect();
                write!(
                    f,
                    "call {} ({}) @{}({})",
                    ret,
                    params.join(", "),
                    func,
                    args.join(", ")
                )
            }
        }
    }
}

fn print_terminator(f: &mut impl Write, func: &IrFunction, term: &Terminator) -> fmt::Result {
    let label = |id: &BlockId| {
        func.block(*id)
            .map(|b| format!("%{}", b.label))
            .unwrap_or_else(|| format!("%bb{}", id.0))
    };
    match term {
        Terminator::Return { value: None } => write!(f, "ret void"),
        Terminator::Return {
            value: Some((ty, v)),
        } => write!(f, "ret {} {}", ty, operand(v)),
        Terminator::Jump { target } => write!(f, "br label {}", label(target)),
        Terminator::Branch {
            cond,
            then_target,
            else_target,
        } => write!(
            f,
            "br i1 {}, label {}, label {}",
            operand(cond),
            label(then_target),
            label(else_target)
        ),
        Terminator::Unreachable => write!(f, "unreachable"),
    }
}

fn param_name(index: usize) -> String {
    format!("%p{}", index)
}

/// Operand spelling without its type
fn operand(value: &Value) -> String {
    match value {
        Value::Register(r) => r.to_string(),
        Value::ConstInt(v, IrType::I1) => (if *v != 0 { "true" } else { "false" }).to_string(),
        Value::ConstInt(v, _) => v.to_string(),
        Value::ConstFloat(v, _) => float_literal(*v),
        Value::Zero(ty) => match ty {
            IrType::I1 => "false".to_string(),
            IrType::I32 | IrType::I64 => "0".to_string(),
            IrType::F32 | IrType::F64 => float_literal(0.0),
            IrType::Ptr => "null".to_string(),
            IrType::Struct(_) | IrType::Void => "zeroinitializer".to_string(),
        },
        Value::Param(i) => param_name(*i),
        Value::Global(name) => format!("@{}", name),
    }
}

/// LLVM spells float constants as the bit pattern of the equivalent double
fn float_literal(v: f64) -> String {
    format!("0x{:016X}", v.to_bits())
}

fn escape_bytes(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'"' | b'\\' => out.push_str(&format!("\\{:02X}", b)),
            0x20..=0x7e => out.push(b as char),
            _ => out.push_str(&format!("\\{:02X}", b)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::parser::parse_source;
    use crate::frontend::semantic::analyze;
    use crate::middle::ir_gen::generate;
    use pretty_assertions::assert_eq;

    fn ll(source: &str) -> String {
        let (program, _) = parse_source(source, 0, 0).unwrap();
        let analysis = analyze(&program);
        assert!(!analysis.has_errors(), "{:?}", analysis.diagnostics);
        LlvmText(&generate("demo", &program, &analysis).unwrap()).to_string()
    }

    #[test]
    fn test_escape_bytes() {
        assert_eq!(escape_bytes("a\"b\\c\n"), "a\\22b\\5Cc\\0A");
    }

    #[test]
    fn test_float_literal_is_hex_double() {
        assert_eq!(float_literal(1.5), "0x3FF8000000000000");
    }

    #[test]
    fn test_module_text() {
        let text = ll(
            "extern fn printf(f: string, v: i32) -> void
             struct Vector { x: i32, y: i32 }
             fn Vector.magSq() -> i32 { return (self.x * self.x) + (self.y * self.y) }
             fn main() -> i32 { let v = new Vector(3, 4) printf(\"%d\\n\", v.magSq()) return 0 }",
        );
        assert!(text.starts_with("; ModuleID = 'demo'\n"));
        assert!(text.contains("%Vector = type { i32, i32 }\n"));
        assert!(text.contains(
            "@.str.0 = private unnamed_addr constant [4 x i8] c\"%d\\0A\\00\", align 1\n"
        ));
        assert!(text.contains("declare void @printf(ptr, i32)\n"));
        assert!(text.contains("define i32 @Vector_magSq(ptr %p0) {\n"));
        assert!(text.contains("getelementptr inbounds %Vector, ptr"));
        assert!(text.contains("call void @printf(ptr @.str.0, i32 %r"));
        assert!(text.contains("define i32 @main() {\nentry:\n"));
    }

    #[test]
    fn test_extern_overload_called_through_its_type() {
        let text = ll(
            "extern fn printf(f: string, v: i32) -> void
             extern fn printf(f: string, v: f64) -> void
             fn main() -> i32 { printf(\"%d\", 3) printf(\"%f\", 2.5) return 0 }",
        );
        assert_eq!(text.matches("declare void @printf").count(), 1);
        assert!(text.contains("call void @printf(ptr @.str.0, i32 "));
        assert!(text.contains("call void (ptr, double) @printf(ptr @.str.1, double "));
    }

    #[test]
    fn test_branches_and_bools() {
        let text = ll("fn main() -> i32 { if true { return 1 } return 0 }");
        assert!(text.contains("icmp ne i1 true, false"));
        assert!(text.contains("br i1 %r0, label %then.0, label %else.0"));
        assert!(text.contains("else.0:\n  br label %merge.0\n"));
    }
}
