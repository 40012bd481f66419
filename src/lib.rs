//! Library entry point: wires the lexer, parser, top-level resolution pass,
//! code generator, and runtime helpers into one NASM text buffer per
//! compilation.

pub mod ast;
pub mod codegen;
pub mod config;
pub mod error;
pub mod lexer;
pub mod parser;
pub mod resolve;
pub mod runtime;
pub mod symtab;
pub mod types;

use std::fs;
use std::path::Path;

use ast::OptLevel;
use codegen::CodeGen;
use config::CompilerConfig;
use error::{CompileError, CompileResult};
use lexer::Lexer;
use parser::Parser;
use symtab::{GlobalInit, StringEntry};

/// Compile a source string to a complete NASM assembly listing.
pub fn compile_source_to_asm(source: &str, opt_level: OptLevel) -> CompileResult<String> {
    let tokens = Lexer::new(source).tokenize()?;
    let program = Parser::new(tokens, opt_level).parse_program()?;
    let (types, globals) = resolve::collect_top_level(&program)?;
    let codegen = CodeGen::new(opt_level, &types, &globals);
    let (text_body, strings) = codegen.emit_program(&program)?;
    Ok(assemble_sections(&globals, &strings, &text_body))
}

/// Read `path`, compile it per `config`, and write the resulting assembly
/// to `config.asm_out`.
pub fn compile_file(path: &Path, config: &CompilerConfig) -> CompileResult<()> {
    let source = fs::read_to_string(path).map_err(|e| CompileError::Io { path: path.to_path_buf(), source: e })?;
    let asm = compile_source_to_asm(&source, config.opt_level)?;
    fs::write(&config.asm_out, asm)
        .map_err(|e| CompileError::Io { path: config.asm_out.clone(), source: e })?;
    Ok(())
}

/// Assemble the final `.data` / `.bss` / `.text` layout: string literals
/// then initialized globals in `.data`, uninitialized globals in `.bss`
/// (the section is omitted entirely when there are none), and `_start`
/// followed by the runtime helpers followed by the user's functions in
/// `.text`.
fn assemble_sections(globals: &symtab::Globals, strings: &symtab::StringPool, text_body: &str) -> String {
    use std::fmt::Write as _;
    let mut out = String::new();

    writeln!(out, "section .data").unwrap();
    for entry in strings.entries() {
        emit_string_entry(&mut out, entry);
    }
    for g in globals.in_order() {
        if g.init.is_some() {
            emit_initialized_global(&mut out, g);
        }
    }
    writeln!(out).unwrap();

    let uninitialized: Vec<_> = globals.in_order().filter(|g| g.init.is_none()).collect();
    if !uninitialized.is_empty() {
        writeln!(out, "section .bss").unwrap();
        for g in uninitialized {
            writeln!(out, "{}: resb {}", g.name, g.total_size().max(1)).unwrap();
        }
        writeln!(out).unwrap();
    }

    writeln!(out, "section .text").unwrap();
    writeln!(out, "global _start").unwrap();
    writeln!(out).unwrap();
    out.push_str(runtime::entry_point());
    writeln!(out).unwrap();
    for helper in runtime::all_helpers() {
        out.push_str(helper);
        writeln!(out).unwrap();
    }
    out.push_str(text_body);

    out
}

fn emit_string_entry(out: &mut String, entry: &StringEntry) {
    use std::fmt::Write as _;
    write!(out, "{}: db ", entry.label).unwrap();
    write_byte_list(out, &entry.bytes);
}

/// NASM data directive for a declared element size, matching the widths
/// `emit_index_address` uses to scale global-array element access.
fn data_directive(elem_size: usize) -> &'static str {
    match elem_size {
        1 => "db",
        2 => "dw",
        4 => "dd",
        _ => "dq",
    }
}

fn emit_initialized_global(out: &mut String, g: &symtab::GlobalVar) {
    use std::fmt::Write as _;
    let name = &g.name;
    match g.init.as_ref().unwrap() {
        GlobalInit::Scalar(n) => {
            writeln!(out, "{name}: {} {n}", data_directive(g.element_size())).unwrap();
        }
        GlobalInit::ArrayElems(values) => {
            let rendered: Vec<String> = values.iter().map(|v| v.to_string()).collect();
            writeln!(out, "{name}: {} {}", data_directive(g.element_size()), rendered.join(", ")).unwrap();
        }
        GlobalInit::ArrayString(bytes) => {
            write!(out, "{name}: db ").unwrap();
            write_byte_list(out, bytes);
        }
    }
}

fn write_byte_list(out: &mut String, bytes: &[u8]) {
    use std::fmt::Write as _;
    if bytes.is_empty() {
        writeln!(out, "0").unwrap();
        return;
    }
    let rendered: Vec<String> = bytes.iter().map(|b| b.to_string()).collect();
    writeln!(out, "{}", rendered.join(", ")).unwrap();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_minimal_program_produces_a_start_and_main_in_text() {
        let asm = compile_source_to_asm("fn main() -> i32 { return 0; }", OptLevel::O0).unwrap();
        assert!(asm.contains("section .text"));
        assert!(asm.contains("_start:"));
        assert!(asm.contains("main:"));
        assert!(asm.contains("call main"));
    }

    #[test]
    fn uninitialized_global_lands_in_bss_with_no_matching_data_entry() {
        let asm = compile_source_to_asm("let counter: i64; fn main() -> i32 { return 0; }", OptLevel::O0).unwrap();
        assert!(asm.contains("section .bss"));
        assert!(asm.contains("counter: resb 8"));
    }

    #[test]
    fn program_with_no_uninitialized_globals_omits_bss_section() {
        let asm = compile_source_to_asm("fn main() -> i32 { return 0; }", OptLevel::O0).unwrap();
        assert!(!asm.contains("section .bss"));
    }

    #[test]
    fn initialized_i32_array_global_uses_dd_not_dq() {
        let asm = compile_source_to_asm(
            "let a: [i32; 3] = [10, 20, 30]; fn main() -> i32 { return 0; }",
            OptLevel::O0,
        )
        .unwrap();
        assert!(asm.contains("a: dd 10, 20, 30"));
        assert!(!asm.contains("a: dq"));
    }

    #[test]
    fn string_literal_is_emitted_as_a_byte_list_in_data() {
        let asm = compile_source_to_asm(r#"fn main() -> i32 { println("hi"); return 0; }"#, OptLevel::O0).unwrap();
        assert!(asm.contains("str_0: db"));
    }
}
