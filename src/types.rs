//! Primitive type sizes and struct layout: a small closed type vocabulary
//! plus the tables that give it byte sizes, kept separate from the AST and
//! from codegen so layout rules live in exactly one place.

use std::collections::HashMap;

/// Byte size of a primitive type name, or `None` if `name` isn't primitive
/// (struct or pointer, both resolved elsewhere and always 8 bytes).
pub fn primitive_size(name: &str) -> Option<usize> {
    match name {
        "i8" | "u8" => Some(1),
        "i16" | "u16" => Some(2),
        "i32" | "u32" => Some(4),
        "i64" | "u64" => Some(8),
        _ => None,
    }
}

/// Size in bytes of any named type: primitive width, or 8 for anything else
/// (struct-by-value slots and pointers are both one machine word).
pub fn type_size(name: &str) -> usize {
    primitive_size(name).unwrap_or(8)
}

/// One field of a struct: name, byte offset, declared element type, and
/// whether that type is itself a pointer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructField {
    pub name: String,
    pub offset: usize,
    pub type_name: String,
    pub is_pointer: bool,
}

/// Layout of one struct type. Every field is an 8-byte slot regardless of
/// its declared element type; `size` is therefore always `8 * fields.len()`.
#[derive(Debug, Clone, Default)]
pub struct StructLayout {
    pub fields: Vec<StructField>,
}

impl StructLayout {
    pub fn size(&self) -> usize {
        8 * self.fields.len()
    }

    pub fn field(&self, name: &str) -> Option<&StructField> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_offset(&self, name: &str) -> Option<usize> {
        self.field(name).map(|f| f.offset)
    }
}

/// Struct name -> layout. Offsets are assigned once, at `add_field` time,
/// and are immutable afterward.
#[derive(Debug, Clone, Default)]
pub struct TypeTable {
    structs: HashMap<String, StructLayout>,
    /// Declaration order, so emission can walk structs deterministically.
    order: Vec<String>,
}

impl TypeTable {
    pub fn new() -> Self {
        TypeTable::default()
    }

    pub fn define_struct(&mut self, name: &str) {
        if !self.structs.contains_key(name) {
            self.order.push(name.to_string());
            self.structs.insert(name.to_string(), StructLayout::default());
        }
    }

    /// Append a field to a struct, assigning it the next 8-byte offset.
    pub fn add_field(&mut self, struct_name: &str, field_name: &str, type_name: &str, is_pointer: bool) {
        let layout = self.structs.entry(struct_name.to_string()).or_insert_with(|| {
            self.order.push(struct_name.to_string());
            StructLayout::default()
        });
        let offset = 8 * layout.fields.len();
        layout.fields.push(StructField {
            name: field_name.to_string(),
            offset,
            type_name: type_name.to_string(),
            is_pointer,
        });
    }

    pub fn get(&self, struct_name: &str) -> Option<&StructLayout> {
        self.structs.get(struct_name)
    }

    pub fn is_struct(&self, name: &str) -> bool {
        self.structs.contains_key(name)
    }

    pub fn field_offset(&self, struct_name: &str, field_name: &str) -> Option<usize> {
        self.get(struct_name).and_then(|l| l.field_offset(field_name))
    }

    pub fn size_of(&self, struct_name: &str) -> Option<usize> {
        self.get(struct_name).map(|l| l.size())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitive_sizes_are_byte_widths() {
        assert_eq!(type_size("i8"), 1);
        assert_eq!(type_size("u8"), 1);
        assert_eq!(type_size("i16"), 2);
        assert_eq!(type_size("u16"), 2);
        assert_eq!(type_size("i32"), 4);
        assert_eq!(type_size("u32"), 4);
        assert_eq!(type_size("i64"), 8);
        assert_eq!(type_size("u64"), 8);
        assert_eq!(type_size("MyStruct"), 8);
        assert_eq!(type_size("*i64"), 8);
    }

    #[test]
    fn field_offsets_are_eight_times_index() {
        let mut tt = TypeTable::new();
        tt.define_struct("P");
        tt.add_field("P", "x", "i64", false);
        tt.add_field("P", "y", "i64", false);
        assert_eq!(tt.field_offset("P", "x"), Some(0));
        assert_eq!(tt.field_offset("P", "y"), Some(8));
        assert_eq!(tt.size_of("P"), Some(16));
    }

    #[test]
    fn fields_are_immutable_once_the_next_struct_is_declared() {
        let mut tt = TypeTable::new();
        tt.define_struct("A");
        tt.add_field("A", "f0", "i64", false);
        tt.define_struct("B");
        tt.add_field("B", "g0", "i64", false);
        assert_eq!(tt.field_offset("A", "f0"), Some(0));
        assert_eq!(tt.field_offset("B", "g0"), Some(0));
    }
}
