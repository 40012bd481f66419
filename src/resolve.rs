//! Pre-codegen pass: walks the parsed program's top-level items once and
//! builds the [`TypeTable`] and [`Globals`] codegen reads from. Struct
//! layout and global storage both need every declaration visible before a
//! single instruction is emitted, so this runs as its own step between
//! parsing and codegen rather than being threaded through the AST walk.

use crate::ast::Node;
use crate::error::{CompileError, CompileResult, Pos};
use crate::lexer::unescape_string;
use crate::symtab::{GlobalInit, GlobalVar, Globals};
use crate::types::TypeTable;

/// Build the struct layout and global variable tables from a program's
/// top-level items. Order of declaration is preserved in both tables so
/// `.data`/`.bss` emission is deterministic.
pub fn collect_top_level(program: &Node) -> CompileResult<(TypeTable, Globals)> {
    let items = match program {
        Node::Program(items) => items,
        other => panic!("collect_top_level called on non-Program node: {other:?}"),
    };

    let mut types = TypeTable::new();
    for item in items {
        if let Node::StructDef { name, fields } = item {
            types.define_struct(name);
            for f in fields {
                types.add_field(name, &f.name, &f.ty.base, f.ty.is_pointer);
            }
        }
    }

    let mut globals = Globals::new();
    for item in items {
        if let Node::GlobalVar { name, ty, init, array_init } = item {
            let var = build_global(&types, name, ty, init, array_init)?;
            globals.define(var);
        }
    }

    Ok((types, globals))
}

fn build_global(
    types: &TypeTable,
    name: &str,
    ty: &crate::ast::TypeSpec,
    init: &Option<Box<Node>>,
    array_init: &Option<Vec<Node>>,
) -> CompileResult<GlobalVar> {
    let is_array = ty.array_len.is_some();
    let array_count = ty.array_len.unwrap_or(0);
    let elem_size = if ty.is_pointer {
        8
    } else if let Some(size) = types.size_of(&ty.base) {
        size
    } else {
        crate::types::type_size(&ty.base)
    };

    let resolved_init = if let Some(elems) = array_init {
        let mut values = Vec::with_capacity(elems.len());
        for e in elems {
            match e.as_number() {
                Some(n) => values.push(n),
                None => {
                    return Err(CompileError::parse(
                        Pos { line: 0, col: 0 },
                        format!("global '{name}' array initializer must be constant literals"),
                    ))
                }
            }
        }
        Some(GlobalInit::ArrayElems(values))
    } else if let Some(init_node) = init {
        match init_node.as_ref() {
            Node::Number(n) => Some(GlobalInit::Scalar(*n)),
            Node::Str(s) if is_array => {
                let mut bytes = unescape_string(s);
                bytes.push(0);
                if bytes.len() < array_count {
                    bytes.resize(array_count, 0);
                }
                Some(GlobalInit::ArrayString(bytes))
            }
            other => {
                return Err(CompileError::parse(
                    Pos { line: 0, col: 0 },
                    format!("global '{name}' has an unsupported initializer shape: {other:?}"),
                ))
            }
        }
    } else {
        None
    };

    Ok(GlobalVar {
        name: name.to_string(),
        type_name: ty.base.clone(),
        is_array,
        array_count,
        is_pointer: ty.is_pointer,
        is_mutable: true,
        elem_size,
        init: resolved_init,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::OptLevel;
    use crate::lexer::Lexer;
    use crate::parser::Parser;

    fn parse(src: &str) -> Node {
        let tokens = Lexer::new(src).tokenize().unwrap();
        Parser::new(tokens, OptLevel::O0).parse_program().unwrap()
    }

    #[test]
    fn struct_fields_get_sequential_offsets() {
        let prog = parse("struct P { x: i64, y: i64 } fn main() -> i32 { return 0; }");
        let (types, _) = collect_top_level(&prog).unwrap();
        assert_eq!(types.field_offset("P", "x"), Some(0));
        assert_eq!(types.field_offset("P", "y"), Some(8));
    }

    #[test]
    fn scalar_global_carries_its_literal() {
        let prog = parse("let counter: i64 = 5; fn main() -> i32 { return 0; }");
        let (_, globals) = collect_top_level(&prog).unwrap();
        let g = globals.get("counter").unwrap();
        assert!(matches!(g.init, Some(GlobalInit::Scalar(5))));
    }

    #[test]
    fn string_initialized_array_is_null_terminated_and_padded() {
        let prog = parse(r#"let msg: [u8; 6] = "hi"; fn main() -> i32 { return 0; }"#);
        let (_, globals) = collect_top_level(&prog).unwrap();
        let g = globals.get("msg").unwrap();
        match &g.init {
            Some(GlobalInit::ArrayString(bytes)) => {
                assert_eq!(bytes.len(), 6);
                assert_eq!(&bytes[..3], b"hi\0");
                assert_eq!(&bytes[3..], &[0, 0, 0]);
            }
            other => panic!("expected ArrayString, got {other:?}"),
        }
    }

    #[test]
    fn declaration_order_is_preserved_for_emission() {
        let prog = parse("let b: i64 = 1; let a: i64 = 2; fn main() -> i32 { return 0; }");
        let (_, globals) = collect_top_level(&prog).unwrap();
        let names: Vec<_> = globals.in_order().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["b", "a"]);
    }
}
