//! QBE IL text emission

use std::fmt::{self, Write};

use super::ir::{QData, QFunction, QInstr, QModule};

/// Display adapter producing QBE IL for a module
pub struct QbeText<'m>(pub &'m QModule);

impl fmt::Display for QbeText<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let module = self.0;
        for t in &module.types {
            writeln!(f, "type :{} = align {} {{ {} }}", t.name, t.align, t.size)?;
        }
        for d in &module.data {
            write_data(f, d)?;
        }
        for func in &module.functions {
            writeln!(f)?;
            write_function(f, func)?;
        }
        Ok(())
    }
}

fn write_data(f: &mut impl Write, data: &QData) -> fmt::Result {
    if data.value.is_empty() {
        return writeln!(f, "data ${} = {{ b 0 }}", data.name);
    }
    writeln!(
        f,
        "data ${} = {{ b \"{}\", b 0 }}",
        data.name,
        escape(&data.value)
    )
}

fn write_function(f: &mut impl Write, func: &QFunction) -> fmt::Result {
    if func.export {
        write!(f, "export ")?;
    }
    write!(f, "function ")?;
    if let Some(ret) = &func.ret {
        write!(f, "{} ", ret)?;
    }
    let params: Vec<String> = func
        .params
        .iter()
        .map(|(ty, name)| format!("{} %{}", ty, name))
        .collect();
    writeln!(f, "${}({}) {{", func.name, params.join(", "))?;

    for inst in &func.body {
        write_instr(f, inst)?;
    }
    writeln!(f, "}}")
}

fn write_instr(f: &mut impl Write, inst: &QInstr) -> fmt::Result {
    match inst {
        QInstr::Label(name) => writeln!(f, "@{}", name),
        QInstr::Assign { dest, ty, op, args } => {
            let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
            writeln!(f, "\t%{} ={} {} {}", dest, ty, op, args.join(", "))
        }
        QInstr::Store { ty, value, addr } => writeln!(f, "\tstore{} {}, {}", ty, value, addr),
        QInstr::Blit { src, dst, size } => writeln!(f, "\tblit {}, {}, {}", src, dst, size),
        QInstr::Call { dest, func, args } => {
            write!(f, "\t")?;
            if let Some((dest, ty)) = dest {
                write!(f, "%{} ={} ", dest, ty)?;
            }
            let args: Vec<String> = args.iter().map(|(ty, v)| format!("{} {}", ty, v)).collect();
            writeln!(f, "call ${}({})", func, args.join(", "))
        }
        QInstr::Jmp(label) => writeln!(f, "\tjmp @{}", label),
        QInstr::Jnz {
            cond,
            if_true,
            if_false,
        } => writeln!(f, "\tjnz {}, @{}, @{}", cond, if_true, if_false),
        QInstr::Ret(Some(v)) => writeln!(f, "\tret {}", v),
        QInstr::Ret(None) => writeln!(f, "\tret"),
        QInstr::Hlt => writeln!(f, "\thlt"),
    }
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\{:03o}", c as u32)),
            c => out.push(c),
        }
    }
    out
}
