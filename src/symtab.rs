//! Symbol and string tables.
//!
//! Three tables, each created once at compile start and read (never mutated
//! by codegen after the owning declaration is processed) until emission
//! ends.

use std::collections::HashMap;

use crate::ast::TypeSpec;
use crate::types::type_size;

/// A local variable, parameter, or array within the function currently
/// being generated.
#[derive(Debug, Clone)]
pub struct Local {
    /// Always negative: the rbp-relative displacement of this slot.
    pub offset: i64,
    /// Declared element type name (for sizing indices/loads).
    pub type_name: String,
    /// True if this local holds a pointer value (as opposed to an array or
    /// scalar/struct stored inline).
    pub is_pointer: bool,
    /// `Some(n)` for a `[T; n]` local; bounds checks compare against `n`.
    pub array_len: Option<usize>,
    /// True if `type_name` names a struct (so a bare `Ident` load should
    /// yield the struct's address, and field accesses are direct).
    pub is_struct: bool,
    /// Byte size of one element (or of the whole value, for a scalar).
    /// Stored rather than recomputed from `type_name` because a struct's
    /// real size (its field count times 8) isn't derivable from the name
    /// alone without the `TypeTable` that was in scope when this slot was
    /// reserved.
    size: usize,
}

impl Local {
    pub fn element_size(&self) -> usize {
        self.size
    }
}

/// Function-local symbol table. `stack_size` is the running absolute
/// displacement below `rbp`; a new slot's offset is `-stack_size` *after*
/// `stack_size` grows by the slot's size.
#[derive(Debug, Default)]
pub struct Locals {
    stack_size: i64,
    symbols: HashMap<String, Local>,
    order: Vec<String>,
    /// Name of the most recently added symbol, the one `ArrayLiteral` codegen
    /// writes into.
    last_added: Option<String>,
    /// Byte length of the string literal a local was directly initialized
    /// from, e.g. `let s = "abc";`. A plain scalar slot only ever holds the
    /// pointer; this side table is how `print`/`println` recover the
    /// length for a bare identifier argument.
    string_lens: HashMap<String, usize>,
}

/// Stack bytes reserved per frame for the `println` newline byte and the
/// `__print_int` conversion buffer.
pub const SCRATCH_BYTES: i64 = 1024;

impl Locals {
    pub fn new() -> Self {
        Locals::default()
    }

    pub fn get(&self, name: &str) -> Option<&Local> {
        self.symbols.get(name)
    }

    pub fn last_added_name(&self) -> Option<&str> {
        self.last_added.as_deref()
    }

    pub fn record_string_len(&mut self, name: &str, len: usize) {
        self.string_lens.insert(name.to_string(), len);
    }

    pub fn string_len(&self, name: &str) -> Option<usize> {
        self.string_lens.get(name).copied()
    }

    /// Reserve a scalar or `count`-element array slot of primitive elements.
    pub fn add(&mut self, name: &str, type_name: &str, count: usize) {
        self.add_sized(name, type_name, count, type_size(type_name).max(1), false);
    }

    /// Reserve a `count`-element array (or, for `count == 1`, a scalar)
    /// slot whose element size is given explicitly, since a struct
    /// element's real size can't be derived from its name alone.
    fn add_sized(&mut self, name: &str, type_name: &str, count: usize, elem_size: usize, is_struct_elem: bool) {
        let bytes = (elem_size.max(1) * count.max(1)) as i64;
        self.stack_size += bytes;
        let offset = -self.stack_size;
        self.symbols.insert(
            name.to_string(),
            Local {
                offset,
                type_name: type_name.to_string(),
                is_pointer: false,
                array_len: if count > 1 { Some(count) } else { None },
                is_struct: is_struct_elem && count <= 1,
                size: elem_size.max(1),
            },
        );
        self.order.push(name.to_string());
        self.last_added = Some(name.to_string());
    }

    pub fn add_pointer(&mut self, name: &str, pointee_type: &str) {
        self.stack_size += 8;
        let offset = -self.stack_size;
        self.symbols.insert(
            name.to_string(),
            Local {
                offset,
                type_name: pointee_type.to_string(),
                is_pointer: true,
                array_len: None,
                is_struct: false,
                size: 8,
            },
        );
        self.order.push(name.to_string());
        self.last_added = Some(name.to_string());
    }

    pub fn add_struct(&mut self, name: &str, struct_name: &str, size: usize) {
        self.add_sized(name, struct_name, 1, size, true);
    }

    /// Add a declared local from a parsed [`TypeSpec`], dispatching to the
    /// right slot kind. `is_struct` tells us whether `ty.base` names a
    /// struct; `struct_size` is that struct's real `TypeTable` size (8
    /// bytes per field), used whether the local is a lone struct value or
    /// an array of them.
    pub fn add_from_type(&mut self, name: &str, ty: &TypeSpec, is_struct_type: bool, struct_size: usize) {
        if ty.is_pointer {
            self.add_pointer(name, &ty.base);
        } else if let Some(n) = ty.array_len {
            let elem_size = if is_struct_type { struct_size } else { type_size(&ty.base).max(1) };
            self.add_sized(name, &ty.base, n, elem_size, is_struct_type);
        } else if is_struct_type {
            self.add_struct(name, &ty.base, struct_size);
        } else {
            self.add(name, &ty.base, 1);
        }
    }

    /// Element size for indexing/bounds-check purposes.
    pub fn element_size(&self, name: &str) -> Option<usize> {
        self.symbols.get(name).map(Local::element_size)
    }

    /// Total bytes reserved so far, before the scratch region and 16-byte
    /// rounding are applied.
    pub fn raw_stack_size(&self) -> i64 {
        self.stack_size
    }

    /// `sub rsp, N` operand: raw locals + scratch, rounded up to 16 (every
    /// prologue's N is a multiple of 16).
    pub fn frame_size(&self) -> i64 {
        let total = self.stack_size + SCRATCH_BYTES;
        (total + 15) / 16 * 16
    }
}

/// One initializer for a global array element, or a whole-array string
/// initializer (expanded byte-by-byte, null-terminated, zero-padded to the
/// declared count).
#[derive(Debug, Clone)]
pub enum GlobalInit {
    Scalar(i64),
    ArrayElems(Vec<i64>),
    ArrayString(Vec<u8>),
}

#[derive(Debug, Clone)]
pub struct GlobalVar {
    pub name: String,
    pub type_name: String,
    pub is_array: bool,
    pub array_count: usize,
    pub is_pointer: bool,
    pub is_mutable: bool,
    pub init: Option<GlobalInit>,
    /// Byte size of one element (or of the whole value if not an array).
    /// Explicit rather than derived from `type_name`, since a struct
    /// element's real size needs the `TypeTable` the caller had in scope.
    pub elem_size: usize,
}

impl GlobalVar {
    pub fn is_initialized(&self) -> bool {
        self.init.is_some()
    }

    pub fn element_size(&self) -> usize {
        self.elem_size
    }

    pub fn total_size(&self) -> usize {
        if self.is_pointer {
            8
        } else if self.is_array {
            self.element_size() * self.array_count
        } else {
            self.element_size()
        }
    }
}

#[derive(Debug, Default)]
pub struct Globals {
    vars: HashMap<String, GlobalVar>,
    order: Vec<String>,
}

impl Globals {
    pub fn new() -> Self {
        Globals::default()
    }

    pub fn define(&mut self, var: GlobalVar) {
        if !self.vars.contains_key(&var.name) {
            self.order.push(var.name.clone());
        }
        self.vars.insert(var.name.clone(), var);
    }

    pub fn get(&self, name: &str) -> Option<&GlobalVar> {
        self.vars.get(name)
    }

    /// Declaration order, for deterministic `.data`/`.bss` emission.
    pub fn in_order(&self) -> impl Iterator<Item = &GlobalVar> {
        self.order.iter().map(move |n| &self.vars[n])
    }
}

/// Interned string literal: a dense `str_N` label plus raw bytes.
#[derive(Debug, Clone)]
pub struct StringEntry {
    pub label: String,
    pub bytes: Vec<u8>,
}

/// String pool. Every user-visible literal gets a fresh label; dedup is
/// deliberately not performed for those. Compiler-generated constants that
/// are known to repeat -- the bounds-error message is the only one here --
/// go through [`Self::intern_shared`] instead.
#[derive(Debug, Default)]
pub struct StringPool {
    entries: Vec<StringEntry>,
    shared: HashMap<Vec<u8>, usize>,
}

impl StringPool {
    pub fn new() -> Self {
        StringPool::default()
    }

    pub fn intern_fresh(&mut self, bytes: Vec<u8>) -> String {
        let label = format!("str_{}", self.entries.len());
        self.entries.push(StringEntry { label: label.clone(), bytes });
        label
    }

    pub fn intern_shared(&mut self, bytes: &[u8]) -> String {
        if let Some(&idx) = self.shared.get(bytes) {
            return self.entries[idx].label.clone();
        }
        let label = self.intern_fresh(bytes.to_vec());
        self.shared.insert(bytes.to_vec(), self.entries.len() - 1);
        label
    }

    pub fn entries(&self) -> &[StringEntry] {
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locals_assign_negative_non_overlapping_offsets() {
        let mut locals = Locals::new();
        locals.add("a", "i64", 1);
        locals.add("b", "i32", 1);
        let a = locals.get("a").unwrap();
        let b = locals.get("b").unwrap();
        assert_eq!(a.offset, -8);
        assert_eq!(b.offset, -12);
        assert!(a.offset < 0 && b.offset < 0);
    }

    #[test]
    fn frame_size_is_multiple_of_sixteen() {
        let mut locals = Locals::new();
        locals.add("a", "i64", 1);
        assert_eq!(locals.frame_size() % 16, 0);
    }

    #[test]
    fn array_local_reserves_count_times_element_size() {
        let mut locals = Locals::new();
        locals.add("arr", "i32", 3);
        assert_eq!(locals.raw_stack_size(), 12);
        assert_eq!(locals.get("arr").unwrap().array_len, Some(3));
    }

    #[test]
    fn fresh_labels_are_dense_and_not_deduped() {
        let mut pool = StringPool::new();
        let a = pool.intern_fresh(b"hi".to_vec());
        let b = pool.intern_fresh(b"hi".to_vec());
        assert_eq!(a, "str_0");
        assert_eq!(b, "str_1");
        assert_ne!(a, b);
    }

    #[test]
    fn shared_labels_dedupe_identical_content() {
        let mut pool = StringPool::new();
        let a = pool.intern_shared(b"Array bounds error\n");
        let b = pool.intern_shared(b"Array bounds error\n");
        assert_eq!(a, b);
    }

    #[test]
    fn globals_preserve_declaration_order() {
        let mut globals = Globals::new();
        globals.define(GlobalVar {
            name: "b".into(),
            type_name: "i64".into(),
            is_array: false,
            array_count: 0,
            is_pointer: false,
            is_mutable: true,
            elem_size: 8,
            init: None,
        });
        globals.define(GlobalVar {
            name: "a".into(),
            type_name: "i64".into(),
            is_array: false,
            array_count: 0,
            is_pointer: false,
            is_mutable: true,
            elem_size: 8,
            init: None,
        });
        let names: Vec<_> = globals.in_order().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["b", "a"]);
    }
}
