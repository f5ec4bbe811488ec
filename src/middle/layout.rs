//! Struct layout
//!
//! Fields are packed in declaration order with no alignment padding. The
//! flat backend addresses fields by these byte offsets; the SSA backend only
//! needs field indices.

use std::collections::HashMap;

use crate::frontend::ast::{Program, StructDef};
use crate::types::Type;
use crate::utils::{Error, Result};

/// Size used for a struct whose own layout cannot be computed (unknown or
/// recursive by value)
pub const UNRESOLVED_STRUCT_SIZE: usize = 8;

#[derive(Debug, Clone, PartialEq)]
pub struct FieldLayout {
    pub name: String,
    pub ty: Type,
    pub offset: usize,
    pub size: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructLayout {
    pub name: String,
    pub size: usize,
    /// 8 when any field (transitively) is 8 bytes wide, otherwise 4
    pub align: usize,
    pub fields: Vec<FieldLayout>,
}

impl StructLayout {
    pub fn field(&self, name: &str) -> Option<(usize, &FieldLayout)> {
        self.fields.iter().enumerate().find(|(_, f)| f.name == name)
    }

    pub fn offset_of(&self, name: &str) -> Option<usize> {
        self.field(name).map(|(_, f)| f.offset)
    }
}

/// Layouts of every struct in a program
#[derive(Debug, Clone, Default)]
pub struct Layouts {
    structs: HashMap<String, StructLayout>,
    order: Vec<String>,
}

impl Layouts {
    pub fn compute(program: &Program) -> Self {
        let defs: HashMap<&str, &StructDef> =
            program.structs().map(|s| (s.name.as_str(), s)).collect();

        let mut layouts = Layouts::default();
        for def in program.structs() {
            let mut visiting = Vec::new();
            layouts.compute_one(def, &defs, &mut visiting);
        }
        layouts.order = program.structs().map(|s| s.name.clone()).collect();
        layouts
    }

    fn compute_one(
        &mut self,
        def: &StructDef,
        defs: &HashMap<&str, &StructDef>,
        visiting: &mut Vec<String>,
    ) -> (usize, usize) {
        if let Some(done) = self.structs.get(&def.name) {
            return (done.size, done.align);
        }
        if visiting.contains(&def.name) {
            return (UNRESOLVED_STRUCT_SIZE, 8);
        }
        visiting.push(def.name.clone());

        let mut offset = 0;
        let mut align = 4;
        let mut fields = Vec::with_capacity(def.fields.len());
        for field in &def.fields {
            let (size, field_align) = match &field.ty {
                Type::Struct(inner) => match defs.get(inner.as_str()) {
                    Some(inner_def) => self.compute_one(inner_def, defs, visiting),
                    None => (UNRESOLVED_STRUCT_SIZE, 8),
                },
                scalar => {
                    let size = scalar_size(scalar);
                    (size, size.max(4))
                }
            };
            align = align.max(field_align);
            fields.push(FieldLayout {
                name: field.name.clone(),
                ty: field.ty.clone(),
                offset,
                size,
            });
            offset += size;
        }

        visiting.pop();
        self.structs.insert(
            def.name.clone(),
            StructLayout {
                name: def.name.clone(),
                size: offset,
                align,
                fields,
            },
        );
        (offset, align)
    }

    pub fn get(&self, name: &str) -> Result<&StructLayout> {
        self.structs
            .get(name)
            .ok_or_else(|| Error::UnknownStruct(name.to_string()))
    }

    /// Byte size of a value of type `ty`
    pub fn size_of(&self, ty: &Type) -> usize {
        match ty {
            Type::Struct(name) => self
                .structs
                .get(name)
                .map_or(UNRESOLVED_STRUCT_SIZE, |l| l.size),
            other => scalar_size(other),
        }
    }

    /// Layouts in declaration order
    pub fn iter(&self) -> impl Iterator<Item = &StructLayout> {
        self.order.iter().filter_map(|name| self.structs.get(name))
    }
}

fn scalar_size(ty: &Type) -> usize {
    match ty {
        Type::I32 | Type::Bool | Type::F32 => 4,
        Type::I64 | Type::F64 | Type::String => 8,
        Type::Void => 0,
        _ => UNRESOLVED_STRUCT_SIZE,
    }
}
