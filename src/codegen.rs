//! AST-walking code generator. No intermediate representation: every node
//! kind lowers directly to NASM text, written into a `String` buffer with
//! `write!`/`writeln!` as the tree is walked depth-first.
//!
//! Two registers carry values between sibling subexpressions: `rax` always
//! holds "the value of the expression just generated", `rbx` is the scratch
//! register for the right-hand operand of a binary op or the low half of a
//! side channel (a `Str` node's byte length, fed to `print`/`println`).
//! Anything that must survive a nested subexpression's own rax/rbx use is
//! pushed to the stack first.

use std::fmt::Write as _;

use crate::ast::{FieldInit, Node, OptLevel, Param, TypeSpec};
use crate::error::{CompileError, CompileResult};
use crate::lexer::unescape_string;
use crate::symtab::{GlobalVar, Globals, Locals, StringPool};
use crate::types::{type_size, TypeTable};

const PARAM_REGS: [&str; 6] = ["rdi", "rsi", "rdx", "rcx", "r8", "r9"];
const SYSCALL_REGS: [&str; 6] = ["rdi", "rsi", "rdx", "r10", "r8", "r9"];

fn internal_err(message: impl Into<String>) -> CompileError {
    CompileError::codegen(message)
}

/// Power-of-two exponent of a literal number node, for strength reduction.
fn power_of_two_exp(node: &Node) -> Option<u32> {
    match node.as_number() {
        Some(n) if n > 0 && (n & (n - 1)) == 0 => Some(n.trailing_zeros()),
        _ => None,
    }
}

fn sub_register(reg64: &str, size: usize) -> &'static str {
    match (reg64, size) {
        ("rax", 1) => "al",
        ("rax", 2) => "ax",
        ("rax", 4) => "eax",
        ("rax", _) => "rax",
        ("rbx", 1) => "bl",
        ("rbx", 2) => "bx",
        ("rbx", 4) => "ebx",
        ("rbx", _) => "rbx",
        _ => unreachable!("sub_register only used for rax/rbx"),
    }
}

fn mem(offset: i64) -> String {
    format!("[rbp{offset}]")
}

pub struct CodeGen<'a> {
    opt_level: OptLevel,
    types: &'a TypeTable,
    globals: &'a Globals,
    strings: StringPool,
    locals: Locals,
    label_id: usize,
    newline_slot: i64,
}

impl<'a> CodeGen<'a> {
    pub fn new(opt_level: OptLevel, types: &'a TypeTable, globals: &'a Globals) -> Self {
        CodeGen {
            opt_level,
            types,
            globals,
            strings: StringPool::new(),
            locals: Locals::new(),
            label_id: 0,
            newline_slot: 0,
        }
    }

    fn next_label(&mut self) -> usize {
        self.label_id += 1;
        self.label_id
    }

    /// Emit every non-forward-declared function in source order. Returns
    /// the assembled `.text` body and the string pool it filled along the
    /// way, for the caller to fold into the final section layout.
    pub fn emit_program(mut self, program: &Node) -> CompileResult<(String, StringPool)> {
        let items = match program {
            Node::Program(items) => items,
            other => panic!("emit_program called on non-Program node: {other:?}"),
        };
        let mut text = String::new();
        for item in items {
            if let Node::Function { is_forward_decl: false, .. } = item {
                self.emit_function(&mut text, item)?;
            }
        }
        Ok((text, self.strings))
    }

    // -- functions ----------------------------------------------------

    fn emit_function(&mut self, out: &mut String, func: &Node) -> CompileResult<()> {
        let (name, params, body) = match func {
            Node::Function { name, params, body, .. } => (name, params, body),
            _ => unreachable!(),
        };

        // Pass 1: a dry run over params + body to learn the final frame
        // size before any real text is emitted, so the println newline
        // slot can use a fixed, known-good offset throughout pass 2.
        let mut probe = Locals::new();
        register_params(&mut probe, self.types, params);
        prescan_locals(&mut probe, self.types, body);
        let raw_size = probe.raw_stack_size();
        self.newline_slot = -(raw_size + 8);

        self.locals = Locals::new();
        let mut body_buf = String::new();
        self.spill_params(&mut body_buf, params);
        self.emit_stmt(&mut body_buf, body)?;

        let frame = self.locals.frame_size();
        writeln!(out, "{name}:").unwrap();
        writeln!(out, "    push rbp").unwrap();
        writeln!(out, "    mov rbp, rsp").unwrap();
        writeln!(out, "    sub rsp, {frame}").unwrap();
        out.push_str(&body_buf);
        writeln!(out, "    xor rax, rax").unwrap();
        writeln!(out, "    leave").unwrap();
        writeln!(out, "    ret").unwrap();
        writeln!(out).unwrap();
        Ok(())
    }

    fn spill_params(&mut self, out: &mut String, params: &[Param]) {
        for (i, p) in params.iter().enumerate() {
            let is_struct = self.types.is_struct(&p.ty.base);
            let struct_size = self.types.size_of(&p.ty.base).unwrap_or(8);
            self.locals.add_from_type(&p.name, &p.ty, is_struct, struct_size);
            let offset = self.locals.get(&p.name).unwrap().offset;
            writeln!(out, "    mov {}, {}", mem(offset), PARAM_REGS[i]).unwrap();
        }
    }

    // -- statements -----------------------------------------------------

    fn emit_stmt(&mut self, out: &mut String, stmt: &Node) -> CompileResult<()> {
        match stmt {
            Node::Block(stmts) => {
                for s in stmts {
                    self.emit_stmt(out, s)?;
                }
            }
            Node::Let { name, ty, init } => self.emit_let(out, name, ty, init)?,
            Node::Return(value) => {
                match value {
                    Some(v) => self.emit_expr(out, v)?,
                    None => writeln!(out, "    xor rax, rax").unwrap(),
                }
                writeln!(out, "    leave").unwrap();
                writeln!(out, "    ret").unwrap();
            }
            Node::If { cond, then_branch, else_branch } => {
                let id = self.next_label();
                self.emit_expr(out, cond)?;
                writeln!(out, "    test rax, rax").unwrap();
                if let Some(else_b) = else_branch {
                    writeln!(out, "    jz .Lelse_{id}").unwrap();
                    self.emit_stmt(out, then_branch)?;
                    writeln!(out, "    jmp .Lendif_{id}").unwrap();
                    writeln!(out, ".Lelse_{id}:").unwrap();
                    self.emit_stmt(out, else_b)?;
                    writeln!(out, ".Lendif_{id}:").unwrap();
                } else {
                    writeln!(out, "    jz .Lendif_{id}").unwrap();
                    self.emit_stmt(out, then_branch)?;
                    writeln!(out, ".Lendif_{id}:").unwrap();
                }
            }
            Node::While { cond, body } => {
                let id = self.next_label();
                writeln!(out, ".Lwhile_start_{id}:").unwrap();
                self.emit_expr(out, cond)?;
                writeln!(out, "    test rax, rax").unwrap();
                writeln!(out, "    jz .Lwhile_end_{id}").unwrap();
                self.emit_stmt(out, body)?;
                writeln!(out, "    jmp .Lwhile_start_{id}").unwrap();
                writeln!(out, ".Lwhile_end_{id}:").unwrap();
            }
            other => {
                self.emit_expr(out, other)?;
            }
        }
        Ok(())
    }

    fn emit_let(
        &mut self,
        out: &mut String,
        name: &str,
        ty: &Option<TypeSpec>,
        init: &Option<Box<Node>>,
    ) -> CompileResult<()> {
        let resolved_ty = ty.clone().unwrap_or_else(|| TypeSpec::plain("i64"));
        let is_struct = self.types.is_struct(&resolved_ty.base);
        let struct_size = self.types.size_of(&resolved_ty.base).unwrap_or(8);
        self.locals.add_from_type(name, &resolved_ty, is_struct, struct_size);

        let Some(init_expr) = init else { return Ok(()) };
        match init_expr.as_ref() {
            // Array/struct literal codegen writes directly into the
            // just-registered local's slots; an extra store here would
            // overwrite that data with the address left in rax.
            Node::ArrayLiteral(_) | Node::StructLiteral { .. } => {
                self.emit_expr(out, init_expr)?;
            }
            Node::Str(s) => {
                self.emit_expr(out, init_expr)?;
                let bytes = unescape_string(s);
                self.locals.record_string_len(name, bytes.len());
                let offset = self.locals.get(name).unwrap().offset;
                writeln!(out, "    mov {}, rax", mem(offset)).unwrap();
            }
            _ => {
                self.emit_expr(out, init_expr)?;
                let offset = self.locals.get(name).unwrap().offset;
                writeln!(out, "    mov {}, rax", mem(offset)).unwrap();
            }
        }
        Ok(())
    }

    // -- expressions ------------------------------------------------------

    fn emit_expr(&mut self, out: &mut String, expr: &Node) -> CompileResult<()> {
        match expr {
            Node::Number(n) => {
                writeln!(out, "    mov rax, {n}").unwrap();
            }
            Node::Str(s) => {
                let bytes = unescape_string(s);
                let len = bytes.len();
                let label = self.strings.intern_fresh(bytes);
                writeln!(out, "    mov rax, {label}").unwrap();
                writeln!(out, "    mov rbx, {len}").unwrap();
            }
            Node::Ident(name) => self.emit_ident(out, name),
            Node::AddressOf(inner) => self.emit_address_of(out, inner)?,
            Node::Dereference(inner) => {
                self.emit_expr(out, inner)?;
                writeln!(out, "    mov rax, [rax]").unwrap();
            }
            Node::Unary { op, expr } => {
                self.emit_expr(out, expr)?;
                match op.as_str() {
                    "-" => writeln!(out, "    neg rax").unwrap(),
                    "!" => {
                        writeln!(out, "    test rax, rax").unwrap();
                        writeln!(out, "    setz al").unwrap();
                        writeln!(out, "    movzx rax, al").unwrap();
                    }
                    other => unreachable!("unknown unary op {other}"),
                }
            }
            Node::Assign { name, value } => self.emit_assign(out, name, value)?,
            Node::BinaryOp { op, lhs, rhs } => self.emit_binary_op(out, op, lhs, rhs)?,
            Node::Compare { op, lhs, rhs } => self.emit_compare(out, op, lhs, rhs)?,
            Node::Logical { op, lhs, rhs } => self.emit_logical(out, op, lhs, rhs)?,
            Node::Call { name, args } => self.emit_call(out, name, args)?,
            Node::ArrayLiteral(elems) => self.emit_array_literal(out, elems)?,
            Node::Index { base, index } => {
                let (elem_size, is_struct_elem) = self.emit_index_address(out, base, index)?;
                if !is_struct_elem {
                    self.emit_load_by_width(out, elem_size);
                }
            }
            Node::StructLiteral { type_name, fields } => self.emit_struct_literal(out, type_name, fields)?,
            Node::FieldAccess { object, field } => self.emit_field_access(out, object, field)?,
            Node::ArrayAssign { base, index, value } => self.emit_array_assign(out, base, index, value)?,
            Node::FieldAssign { object, field, value } => self.emit_field_assign(out, object, field, value)?,
            other => return Err(internal_err(format!("node cannot be used as an expression: {other:?}"))),
        }
        Ok(())
    }

    fn emit_ident(&mut self, out: &mut String, name: &str) {
        if let Some(local) = self.locals.get(name) {
            if local.array_len.is_some() && !local.is_pointer {
                writeln!(out, "    lea rax, {}", mem(local.offset)).unwrap();
            } else {
                writeln!(out, "    mov rax, {}", mem(local.offset)).unwrap();
            }
        } else if let Some(g) = self.globals.get(name) {
            if g.is_array {
                writeln!(out, "    lea rax, [{name}]").unwrap();
            } else {
                writeln!(out, "    mov rax, [{name}]").unwrap();
            }
        } else {
            writeln!(out, "    mov rax, 0    ; unknown identifier '{name}'").unwrap();
        }
    }

    fn emit_address_of(&mut self, out: &mut String, inner: &Node) -> CompileResult<()> {
        match inner {
            Node::Ident(name) => {
                if let Some(local) = self.locals.get(name) {
                    if local.is_pointer {
                        writeln!(out, "    mov rax, {}", mem(local.offset)).unwrap();
                    } else {
                        writeln!(out, "    lea rax, {}", mem(local.offset)).unwrap();
                    }
                } else if let Some(g) = self.globals.get(name) {
                    if g.is_pointer {
                        writeln!(out, "    mov rax, [{name}]").unwrap();
                    } else {
                        writeln!(out, "    lea rax, [{name}]").unwrap();
                    }
                } else {
                    writeln!(out, "    mov rax, 0    ; unknown identifier '{name}'").unwrap();
                }
            }
            Node::Index { base, index } => {
                self.emit_index_address(out, base, index)?;
            }
            other => self.emit_expr(out, other)?,
        }
        Ok(())
    }

    fn emit_assign(&mut self, out: &mut String, name: &str, value: &Node) -> CompileResult<()> {
        self.emit_expr(out, value)?;
        if let Some(local) = self.locals.get(name) {
            writeln!(out, "    mov {}, rax", mem(local.offset)).unwrap();
        } else if self.globals.get(name).is_some() {
            writeln!(out, "    mov [{name}], rax").unwrap();
        } else {
            writeln!(out, "    ; unknown identifier '{name}'; assignment dropped").unwrap();
        }
        Ok(())
    }

    fn emit_binary_op(&mut self, out: &mut String, op: &str, lhs: &Node, rhs: &Node) -> CompileResult<()> {
        if self.opt_level.reduces_strength() {
            if let Some(k) = power_of_two_exp(rhs) {
                self.emit_expr(out, lhs)?;
                match op {
                    "*" => writeln!(out, "    shl rax, {k}").unwrap(),
                    "/" => writeln!(out, "    sar rax, {k}").unwrap(),
                    "%" => writeln!(out, "    and rax, {}", (1i64 << k) - 1).unwrap(),
                    _ => unreachable!(),
                }
                return Ok(());
            }
        }

        self.emit_expr(out, lhs)?;
        writeln!(out, "    push rax").unwrap();
        self.emit_expr(out, rhs)?;
        writeln!(out, "    mov rbx, rax").unwrap();
        writeln!(out, "    pop rax").unwrap();
        match op {
            "+" => writeln!(out, "    add rax, rbx").unwrap(),
            "-" => writeln!(out, "    sub rax, rbx").unwrap(),
            "*" => writeln!(out, "    imul rax, rbx").unwrap(),
            "/" | "%" => {
                let id = self.next_label();
                writeln!(out, "    cmp rbx, 0").unwrap();
                writeln!(out, "    je .Ldivzero_{id}").unwrap();
                writeln!(out, "    cqo").unwrap();
                writeln!(out, "    idiv rbx").unwrap();
                if op == "%" {
                    writeln!(out, "    mov rax, rdx").unwrap();
                }
                writeln!(out, "    jmp .Ldivdone_{id}").unwrap();
                writeln!(out, ".Ldivzero_{id}:").unwrap();
                writeln!(out, "    xor rax, rax").unwrap();
                writeln!(out, ".Ldivdone_{id}:").unwrap();
            }
            other => unreachable!("unknown binary op {other}"),
        }
        Ok(())
    }

    fn emit_compare(&mut self, out: &mut String, op: &str, lhs: &Node, rhs: &Node) -> CompileResult<()> {
        self.emit_expr(out, lhs)?;
        writeln!(out, "    push rax").unwrap();
        self.emit_expr(out, rhs)?;
        writeln!(out, "    mov rbx, rax").unwrap();
        writeln!(out, "    pop rax").unwrap();
        writeln!(out, "    cmp rax, rbx").unwrap();
        let setcc = match op {
            "==" => "sete",
            "!=" => "setne",
            "<" => "setl",
            ">" => "setg",
            "<=" => "setle",
            ">=" => "setge",
            other => unreachable!("unknown comparison op {other}"),
        };
        writeln!(out, "    {setcc} al").unwrap();
        writeln!(out, "    movzx rax, al").unwrap();
        Ok(())
    }

    fn emit_logical(&mut self, out: &mut String, op: &str, lhs: &Node, rhs: &Node) -> CompileResult<()> {
        let id = self.next_label();
        match op {
            "&&" => {
                self.emit_expr(out, lhs)?;
                writeln!(out, "    test rax, rax").unwrap();
                writeln!(out, "    jz .Lfalse_{id}").unwrap();
                self.emit_expr(out, rhs)?;
                writeln!(out, "    test rax, rax").unwrap();
                writeln!(out, "    jz .Lfalse_{id}").unwrap();
                writeln!(out, "    mov rax, 1").unwrap();
                writeln!(out, "    jmp .Lend_{id}").unwrap();
                writeln!(out, ".Lfalse_{id}:").unwrap();
                writeln!(out, "    mov rax, 0").unwrap();
                writeln!(out, ".Lend_{id}:").unwrap();
            }
            "||" => {
                self.emit_expr(out, lhs)?;
                writeln!(out, "    test rax, rax").unwrap();
                writeln!(out, "    jnz .Ltrue_{id}").unwrap();
                self.emit_expr(out, rhs)?;
                writeln!(out, "    test rax, rax").unwrap();
                writeln!(out, "    jnz .Ltrue_{id}").unwrap();
                writeln!(out, "    mov rax, 0").unwrap();
                writeln!(out, "    jmp .Lend_{id}").unwrap();
                writeln!(out, ".Ltrue_{id}:").unwrap();
                writeln!(out, "    mov rax, 1").unwrap();
                writeln!(out, ".Lend_{id}:").unwrap();
            }
            other => unreachable!("unknown logical op {other}"),
        }
        Ok(())
    }

    // -- calls --------------------------------------------------------

    fn emit_call(&mut self, out: &mut String, name: &str, args: &[Node]) -> CompileResult<()> {
        match name {
            "print" => self.emit_print(out, &args[0], false)?,
            "println" => self.emit_print(out, &args[0], true)?,
            "print_int" => {
                self.emit_expr(out, &args[0])?;
                writeln!(out, "    mov rdi, rax").unwrap();
                writeln!(out, "    call __print_int").unwrap();
            }
            "exit" => {
                match args.first() {
                    Some(n) => self.emit_expr(out, n)?,
                    None => writeln!(out, "    xor rax, rax").unwrap(),
                }
                writeln!(out, "    mov rdi, rax").unwrap();
                writeln!(out, "    mov rax, 60").unwrap();
                writeln!(out, "    syscall").unwrap();
            }
            "read" => self.emit_syscall_call(out, 0, args)?,
            "write" => self.emit_syscall_call(out, 1, args)?,
            "open" => {
                let mut full_args = args.to_vec();
                if full_args.len() == 2 {
                    full_args.push(Node::Number(0o644));
                }
                self.emit_syscall_call(out, 2, &full_args)?;
            }
            "close" => self.emit_syscall_call(out, 3, args)?,
            "malloc" => self.emit_malloc(out, &args[0])?,
            "free" => self.emit_free(out, &args[0])?,
            "strcmp" => self.emit_abi_call(out, "__strcmp", args)?,
            "strcpy" => self.emit_abi_call(out, "__strcpy", args)?,
            "strlen" => self.emit_abi_call(out, "__strlen", args)?,
            "syscall" | "syscall6" => self.emit_generic_syscall(out, args)?,
            _ => {
                if args.len() > 6 {
                    return Err(internal_err(format!("call to '{name}' passes more than 6 arguments")));
                }
                self.emit_abi_call(out, name, args)?;
            }
        }
        Ok(())
    }

    fn emit_print(&mut self, out: &mut String, arg: &Node, with_newline: bool) -> CompileResult<()> {
        self.load_string_ptr_and_len(out, arg)?;
        writeln!(out, "    mov rdx, rbx").unwrap();
        writeln!(out, "    mov rsi, rax").unwrap();
        writeln!(out, "    mov rdi, 1").unwrap();
        writeln!(out, "    mov rax, 1").unwrap();
        writeln!(out, "    syscall").unwrap();
        if with_newline {
            let slot = mem(self.newline_slot);
            writeln!(out, "    mov byte {slot}, 10").unwrap();
            writeln!(out, "    mov rax, 1").unwrap();
            writeln!(out, "    mov rdi, 1").unwrap();
            writeln!(out, "    lea rsi, {slot}").unwrap();
            writeln!(out, "    mov rdx, 1").unwrap();
            writeln!(out, "    syscall").unwrap();
        }
        Ok(())
    }

    /// Leaves the argument's pointer in `rax` and its byte length in `rbx`.
    /// A direct string literal carries its length from its own codegen; a
    /// bare identifier recovers it from the local that was declared
    /// `let s = "literal";`, falling back to a declared array's element
    /// count, and finally to zero if neither is known.
    fn load_string_ptr_and_len(&mut self, out: &mut String, arg: &Node) -> CompileResult<()> {
        match arg {
            Node::Str(_) => self.emit_expr(out, arg)?,
            Node::Ident(name) => {
                self.emit_expr(out, arg)?;
                let len = self
                    .locals
                    .string_len(name)
                    .or_else(|| self.locals.get(name).and_then(|l| l.array_len))
                    .or_else(|| self.globals.get(name).map(|g| g.array_count))
                    .unwrap_or(0);
                writeln!(out, "    mov rbx, {len}").unwrap();
            }
            other => {
                self.emit_expr(out, other)?;
                writeln!(out, "    mov rbx, 0").unwrap();
            }
        }
        Ok(())
    }

    fn emit_abi_call(&mut self, out: &mut String, target: &str, args: &[Node]) -> CompileResult<()> {
        if args.len() > 6 {
            return Err(internal_err(format!("call to '{target}' passes more than 6 arguments")));
        }
        for a in args {
            self.emit_expr(out, a)?;
            writeln!(out, "    push rax").unwrap();
        }
        for reg in PARAM_REGS[..args.len()].iter().rev() {
            writeln!(out, "    pop {reg}").unwrap();
        }
        writeln!(out, "    call {target}").unwrap();
        Ok(())
    }

    fn emit_syscall_call(&mut self, out: &mut String, num: i64, args: &[Node]) -> CompileResult<()> {
        for a in args {
            self.emit_expr(out, a)?;
            writeln!(out, "    push rax").unwrap();
        }
        for reg in SYSCALL_REGS[..args.len()].iter().rev() {
            writeln!(out, "    pop {reg}").unwrap();
        }
        writeln!(out, "    mov rax, {num}").unwrap();
        writeln!(out, "    syscall").unwrap();
        Ok(())
    }

    /// `syscall`/`syscall6(num, a1..a6)`: the data arguments are evaluated
    /// and pushed left-to-right first, then the syscall number is
    /// evaluated last straight into `rax`, then the pushed arguments are
    /// popped into the Linux syscall register order.
    fn emit_generic_syscall(&mut self, out: &mut String, args: &[Node]) -> CompileResult<()> {
        let (num_arg, rest) = args.split_first().ok_or_else(|| internal_err("syscall needs at least a number"))?;
        if rest.len() > 6 {
            return Err(internal_err("syscall takes at most 6 arguments beyond the number"));
        }
        for a in rest {
            self.emit_expr(out, a)?;
            writeln!(out, "    push rax").unwrap();
        }
        self.emit_expr(out, num_arg)?;
        for reg in SYSCALL_REGS[..rest.len()].iter().rev() {
            writeln!(out, "    pop {reg}").unwrap();
        }
        writeln!(out, "    syscall").unwrap();
        Ok(())
    }

    /// `malloc(n)`: mmap `n + 8` anonymous bytes, stash the requested size
    /// `n` in the first 8 bytes, and return a pointer past it.
    fn emit_malloc(&mut self, out: &mut String, size_arg: &Node) -> CompileResult<()> {
        self.emit_expr(out, size_arg)?;
        writeln!(out, "    push rax").unwrap();
        writeln!(out, "    mov rsi, rax").unwrap();
        writeln!(out, "    add rsi, 8").unwrap();
        writeln!(out, "    xor rdi, rdi").unwrap();
        writeln!(out, "    mov rdx, 3").unwrap();
        writeln!(out, "    mov r10, 0x22").unwrap();
        writeln!(out, "    mov r8, -1").unwrap();
        writeln!(out, "    xor r9, r9").unwrap();
        writeln!(out, "    mov rax, 9").unwrap();
        writeln!(out, "    syscall").unwrap();
        let id = self.next_label();
        writeln!(out, "    cmp rax, -1").unwrap();
        writeln!(out, "    je .Lmalloc_fail_{id}").unwrap();
        writeln!(out, "    pop rbx").unwrap();
        writeln!(out, "    mov [rax], rbx").unwrap();
        writeln!(out, "    add rax, 8").unwrap();
        writeln!(out, "    jmp .Lmalloc_done_{id}").unwrap();
        writeln!(out, ".Lmalloc_fail_{id}:").unwrap();
        writeln!(out, "    add rsp, 8").unwrap();
        writeln!(out, ".Lmalloc_done_{id}:").unwrap();
        Ok(())
    }

    /// `free(ptr)`: no-op on a null pointer; otherwise reads the size
    /// stashed at `ptr - 8` and munmaps the whole `size + 8` region.
    fn emit_free(&mut self, out: &mut String, ptr_arg: &Node) -> CompileResult<()> {
        self.emit_expr(out, ptr_arg)?;
        let id = self.next_label();
        writeln!(out, "    test rax, rax").unwrap();
        writeln!(out, "    jz .Lfree_null_{id}").unwrap();
        writeln!(out, "    mov rbx, rax").unwrap();
        writeln!(out, "    sub rbx, 8").unwrap();
        writeln!(out, "    mov rax, [rbx]").unwrap();
        writeln!(out, "    add rax, 8").unwrap();
        writeln!(out, "    mov rsi, rax").unwrap();
        writeln!(out, "    mov rdi, rbx").unwrap();
        writeln!(out, "    mov rax, 11").unwrap();
        writeln!(out, "    syscall").unwrap();
        writeln!(out, "    jmp .Lfree_done_{id}").unwrap();
        writeln!(out, ".Lfree_null_{id}:").unwrap();
        writeln!(out, "    xor rax, rax").unwrap();
        writeln!(out, ".Lfree_done_{id}:").unwrap();
        Ok(())
    }

    // -- arrays / indexing ----------------------------------------------

    fn emit_array_literal(&mut self, out: &mut String, elems: &[Node]) -> CompileResult<()> {
        let target = self
            .locals
            .last_added_name()
            .ok_or_else(|| internal_err("array literal with no enclosing let"))?
            .to_string();
        let local = self.locals.get(&target).unwrap().clone();
        let elem_size = local.element_size();
        for (i, e) in elems.iter().enumerate() {
            self.emit_expr(out, e)?;
            let off = local.offset + (i as i64) * (elem_size as i64);
            self.emit_store_by_width_mem(out, &mem(off), elem_size);
        }
        writeln!(out, "    lea rax, {}", mem(local.offset)).unwrap();
        Ok(())
    }

    fn emit_struct_literal(&mut self, out: &mut String, type_name: &str, fields: &[FieldInit]) -> CompileResult<()> {
        let target = self
            .locals
            .last_added_name()
            .ok_or_else(|| internal_err("struct literal with no enclosing let"))?
            .to_string();
        let local_offset = self.locals.get(&target).unwrap().offset;
        for f in fields {
            self.emit_expr(out, &f.value)?;
            let field_off = self.types.field_offset(type_name, &f.name).unwrap_or(0) as i64;
            writeln!(out, "    mov {}, rax", mem(local_offset + field_off)).unwrap();
        }
        writeln!(out, "    lea rax, {}", mem(local_offset)).unwrap();
        Ok(())
    }

    fn emit_load_by_width(&self, out: &mut String, size: usize) {
        match size {
            1 => writeln!(out, "    movzx rax, byte [rax]").unwrap(),
            2 => writeln!(out, "    movzx rax, word [rax]").unwrap(),
            4 => writeln!(out, "    mov eax, [rax]").unwrap(),
            _ => writeln!(out, "    mov rax, [rax]").unwrap(),
        }
    }

    fn emit_store_by_width_mem(&self, out: &mut String, target: &str, size: usize) {
        let (width, reg) = match size {
            1 => ("byte", "al"),
            2 => ("word", "ax"),
            4 => ("dword", "eax"),
            _ => ("qword", "rax"),
        };
        writeln!(out, "    mov {width} {target}, {reg}").unwrap();
    }

    fn emit_scale_add(&self, out: &mut String, elem_size: usize) {
        if elem_size != 1 {
            writeln!(out, "    imul rbx, rbx, {elem_size}").unwrap();
        }
        writeln!(out, "    add rax, rbx").unwrap();
    }

    fn emit_bounds_check(&mut self, out: &mut String, count: i64) {
        let id = self.next_label();
        writeln!(out, "    cmp rbx, 0").unwrap();
        writeln!(out, "    jl .Lbounds_error_{id}").unwrap();
        writeln!(out, "    cmp rbx, {count}").unwrap();
        writeln!(out, "    jge .Lbounds_error_{id}").unwrap();
        writeln!(out, "    jmp .Lbounds_ok_{id}").unwrap();
        writeln!(out, ".Lbounds_error_{id}:").unwrap();
        self.emit_bounds_error_abort(out);
        writeln!(out, ".Lbounds_ok_{id}:").unwrap();
    }

    fn emit_bounds_error_abort(&mut self, out: &mut String) {
        let bytes = b"Array bounds error\n";
        let label = self.strings.intern_shared(bytes);
        let len = bytes.len();
        writeln!(out, "    mov rax, 1").unwrap();
        writeln!(out, "    mov rdi, 2").unwrap();
        writeln!(out, "    mov rsi, {label}").unwrap();
        writeln!(out, "    mov rdx, {len}").unwrap();
        writeln!(out, "    syscall").unwrap();
        writeln!(out, "    mov rax, 60").unwrap();
        writeln!(out, "    mov rdi, 1").unwrap();
        writeln!(out, "    syscall").unwrap();
    }

    /// Computes the element address of `base[index]` into `rax` (no load),
    /// returning `(element_size, is_struct_element)` so the caller decides
    /// whether to load through it or leave the address as the result.
    fn emit_index_address(&mut self, out: &mut String, base: &Node, index: &Node) -> CompileResult<(usize, bool)> {
        match base {
            Node::Str(s) => {
                let bytes = unescape_string(s);
                let len = bytes.len();
                let label = self.strings.intern_fresh(bytes);
                self.emit_expr(out, index)?;
                writeln!(out, "    mov rbx, rax").unwrap();
                self.emit_bounds_check(out, len as i64);
                writeln!(out, "    lea rax, [{label}]").unwrap();
                self.emit_scale_add(out, 1);
                Ok((1, false))
            }
            Node::Ident(name) if self.locals.get(name).is_some_and(|l| l.array_len.is_some() && !l.is_pointer) => {
                let local = self.locals.get(name).unwrap().clone();
                let count = local.array_len.unwrap() as i64;
                let elem_size = local.element_size();
                let is_struct_elem = self.types.is_struct(&local.type_name);
                self.emit_expr(out, index)?;
                writeln!(out, "    mov rbx, rax").unwrap();
                self.emit_bounds_check(out, count);
                writeln!(out, "    lea rax, {}", mem(local.offset)).unwrap();
                self.emit_scale_add(out, elem_size);
                Ok((elem_size, is_struct_elem))
            }
            Node::Ident(name) if self.locals.get(name).is_some_and(|l| l.is_pointer) => {
                let local = self.locals.get(name).unwrap().clone();
                let is_struct_elem = self.types.is_struct(&local.type_name);
                let elem_size = self.types.size_of(&local.type_name).unwrap_or_else(|| type_size(&local.type_name));
                self.emit_expr(out, index)?;
                writeln!(out, "    mov rbx, rax").unwrap();
                writeln!(out, "    mov rax, {}", mem(local.offset)).unwrap();
                self.emit_scale_add(out, elem_size);
                Ok((elem_size, is_struct_elem))
            }
            Node::Ident(name) if self.globals.get(name).is_some() => {
                let g = self.globals.get(name).unwrap().clone();
                let count = g.array_count as i64;
                let elem_size = g.element_size();
                let is_struct_elem = self.types.is_struct(&g.type_name);
                self.emit_expr(out, index)?;
                writeln!(out, "    mov rbx, rax").unwrap();
                self.emit_bounds_check(out, count);
                writeln!(out, "    lea rax, [{}]", g.name).unwrap();
                self.emit_scale_add(out, elem_size);
                Ok((elem_size, is_struct_elem))
            }
            Node::FieldAccess { .. } => {
                let (elem_type, is_struct_elem) = self.pointer_field_elem_type(base)?;
                let elem_size = self.types.size_of(&elem_type).unwrap_or_else(|| type_size(&elem_type));
                self.emit_expr(out, index)?;
                writeln!(out, "    mov rbx, rax").unwrap();
                self.emit_expr(out, base)?;
                self.emit_scale_add(out, elem_size);
                Ok((elem_size, is_struct_elem))
            }
            other => Err(internal_err(format!("unsupported index base shape: {other:?}"))),
        }
    }

    fn emit_array_assign(&mut self, out: &mut String, base: &Node, index: &Node, value: &Node) -> CompileResult<()> {
        let (elem_size, _) = self.emit_index_address(out, base, index)?;
        writeln!(out, "    push rax").unwrap();
        self.emit_expr(out, value)?;
        writeln!(out, "    mov rbx, rax").unwrap();
        writeln!(out, "    pop rax").unwrap();
        let reg = sub_register("rbx", elem_size);
        let width = match elem_size {
            1 => "byte",
            2 => "word",
            4 => "dword",
            _ => "qword",
        };
        writeln!(out, "    mov {width} [rax], {reg}").unwrap();
        Ok(())
    }

    // -- structs / field access -----------------------------------------

    /// Resolves the struct type name that `expr` (a `FieldAccess` object, an
    /// `Index` base, or a bare `Ident`) produces a value of, so a
    /// multi-level chain like `container.items[i].x` can be walked. Any
    /// shape deeper than this recursion can follow is rejected rather than
    /// silently emitting a zero offset.
    fn infer_struct_type(&self, expr: &Node) -> CompileResult<String> {
        match expr {
            Node::Index { base, .. } => self.infer_struct_type(base),
            Node::Ident(name) => {
                if let Some(local) = self.locals.get(name) {
                    Ok(local.type_name.clone())
                } else if let Some(g) = self.globals.get(name) {
                    Ok(g.type_name.clone())
                } else {
                    Err(internal_err(format!("unknown identifier '{name}' in field-access base")))
                }
            }
            Node::FieldAccess { object, field } => {
                let base_struct = self.infer_struct_type(object)?;
                let layout = self
                    .types
                    .get(&base_struct)
                    .ok_or_else(|| internal_err(format!("'{base_struct}' is not a struct type")))?;
                let f = layout
                    .field(field)
                    .ok_or_else(|| internal_err(format!("struct '{base_struct}' has no field '{field}'")))?;
                Ok(f.type_name.clone())
            }
            Node::Dereference(inner) => self.infer_struct_type(inner),
            other => Err(internal_err(format!(
                "cannot infer a struct type for this field-access base: {other:?}"
            ))),
        }
    }

    fn pointer_field_elem_type(&self, field_access: &Node) -> CompileResult<(String, bool)> {
        let Node::FieldAccess { object, field } = field_access else {
            unreachable!("pointer_field_elem_type called on non-FieldAccess");
        };
        let struct_name = self.infer_struct_type(object)?;
        let layout = self
            .types
            .get(&struct_name)
            .ok_or_else(|| internal_err(format!("'{struct_name}' is not a struct type")))?;
        let f = layout
            .field(field)
            .ok_or_else(|| internal_err(format!("struct '{struct_name}' has no field '{field}'")))?;
        Ok((f.type_name.clone(), self.types.is_struct(&f.type_name)))
    }

    fn emit_field_access(&mut self, out: &mut String, object: &Node, field: &str) -> CompileResult<()> {
        match object {
            Node::Dereference(inner) => {
                if let Node::Ident(name) = inner.as_ref() {
                    if let Some(local) = self.locals.get(name) {
                        let struct_name = local.type_name.clone();
                        let offset = local.offset;
                        let field_off = self.types.field_offset(&struct_name, field).unwrap_or(0);
                        writeln!(out, "    mov rax, {}", mem(offset)).unwrap();
                        writeln!(out, "    mov rax, [rax + {field_off}]").unwrap();
                        return Ok(());
                    }
                }
                let struct_name = self.infer_struct_type(inner)?;
                let field_off = self.types.field_offset(&struct_name, field).unwrap_or(0);
                self.emit_expr(out, inner)?;
                writeln!(out, "    mov rax, [rax + {field_off}]").unwrap();
            }
            Node::Ident(name) => {
                if let Some(local) = self.locals.get(name) {
                    let field_off = self.types.field_offset(&local.type_name, field).unwrap_or(0);
                    if local.is_pointer {
                        writeln!(out, "    mov rax, {}", mem(local.offset)).unwrap();
                        writeln!(out, "    mov rax, [rax + {field_off}]").unwrap();
                    } else {
                        writeln!(out, "    mov rax, {}", mem(local.offset + field_off as i64)).unwrap();
                    }
                } else if let Some(g) = self.globals.get(name) {
                    let field_off = self.types.field_offset(&g.type_name, field).unwrap_or(0);
                    if g.is_pointer {
                        writeln!(out, "    mov rax, [{name}]").unwrap();
                        writeln!(out, "    mov rax, [rax + {field_off}]").unwrap();
                    } else {
                        writeln!(out, "    mov rax, [{name} + {field_off}]").unwrap();
                    }
                } else {
                    writeln!(out, "    mov rax, 0    ; unknown identifier '{name}'").unwrap();
                }
            }
            other => {
                let struct_name = self.infer_struct_type(other)?;
                let field_off = self.types.field_offset(&struct_name, field).unwrap_or(0);
                self.emit_expr(out, other)?;
                writeln!(out, "    mov rax, [rax + {field_off}]").unwrap();
            }
        }
        Ok(())
    }

    fn emit_field_assign(&mut self, out: &mut String, object: &Node, field: &str, value: &Node) -> CompileResult<()> {
        match object {
            Node::Dereference(inner) => {
                if let Node::Ident(name) = inner.as_ref() {
                    if let Some(local) = self.locals.get(name) {
                        let struct_name = local.type_name.clone();
                        let offset = local.offset;
                        let field_off = self.types.field_offset(&struct_name, field).unwrap_or(0);
                        self.emit_expr(out, value)?;
                        writeln!(out, "    mov rbx, rax").unwrap();
                        writeln!(out, "    mov rax, {}", mem(offset)).unwrap();
                        writeln!(out, "    mov [rax + {field_off}], rbx").unwrap();
                        return Ok(());
                    }
                }
                let struct_name = self.infer_struct_type(inner)?;
                let field_off = self.types.field_offset(&struct_name, field).unwrap_or(0);
                self.emit_expr(out, value)?;
                writeln!(out, "    push rax").unwrap();
                self.emit_expr(out, inner)?;
                writeln!(out, "    pop rbx").unwrap();
                writeln!(out, "    mov [rax + {field_off}], rbx").unwrap();
            }
            Node::Ident(name) => {
                if let Some(local) = self.locals.get(name) {
                    let field_off = self.types.field_offset(&local.type_name, field).unwrap_or(0);
                    let is_ptr = local.is_pointer;
                    let offset = local.offset;
                    self.emit_expr(out, value)?;
                    if is_ptr {
                        writeln!(out, "    mov rbx, rax").unwrap();
                        writeln!(out, "    mov rax, {}", mem(offset)).unwrap();
                        writeln!(out, "    mov [rax + {field_off}], rbx").unwrap();
                    } else {
                        writeln!(out, "    mov {}, rax", mem(offset + field_off as i64)).unwrap();
                    }
                } else if let Some(g) = self.globals.get(name) {
                    let field_off = self.types.field_offset(&g.type_name, field).unwrap_or(0);
                    let is_ptr = g.is_pointer;
                    let gname = g.name.clone();
                    self.emit_expr(out, value)?;
                    if is_ptr {
                        writeln!(out, "    mov rbx, rax").unwrap();
                        writeln!(out, "    mov rax, [{gname}]").unwrap();
                        writeln!(out, "    mov [rax + {field_off}], rbx").unwrap();
                    } else {
                        writeln!(out, "    mov [{gname} + {field_off}], rax").unwrap();
                    }
                } else {
                    writeln!(out, "    ; unknown identifier '{name}'; assignment dropped").unwrap();
                }
            }
            other => {
                let struct_name = self.infer_struct_type(other)?;
                let field_off = self.types.field_offset(&struct_name, field).unwrap_or(0);
                self.emit_expr(out, value)?;
                writeln!(out, "    push rax").unwrap();
                self.emit_expr(out, other)?;
                writeln!(out, "    pop rbx").unwrap();
                writeln!(out, "    mov [rax + {field_off}], rbx").unwrap();
            }
        }
        Ok(())
    }
}

/// Registers every parameter's slot in `locals`, the same way
/// [`CodeGen::spill_params`] does, but without emitting any text. Used both
/// by the real pass and by the frame-size probe pass.
fn register_params(locals: &mut Locals, types: &TypeTable, params: &[Param]) {
    for p in params {
        let is_struct = types.is_struct(&p.ty.base);
        let struct_size = types.size_of(&p.ty.base).unwrap_or(8);
        locals.add_from_type(&p.name, &p.ty, is_struct, struct_size);
    }
}

/// Walks a function body registering every `Let` declaration's slot,
/// without emitting any code, to learn the function's final stack size
/// ahead of the real emission pass. This language has no block scoping
/// (every local lives for the rest of the function), so a flat recursive
/// walk over `Block`/`If`/`While` bodies is exactly the set of `Let`s the
/// real pass will also see, in the same order.
fn prescan_locals(locals: &mut Locals, types: &TypeTable, node: &Node) {
    match node {
        Node::Block(stmts) => {
            for s in stmts {
                prescan_locals(locals, types, s);
            }
        }
        Node::Let { name, ty, .. } => {
            let resolved = ty.clone().unwrap_or_else(|| TypeSpec::plain("i64"));
            let is_struct = types.is_struct(&resolved.base);
            let size = types.size_of(&resolved.base).unwrap_or(8);
            locals.add_from_type(name, &resolved, is_struct, size);
        }
        Node::If { then_branch, else_branch, .. } => {
            prescan_locals(locals, types, then_branch);
            if let Some(e) = else_branch {
                prescan_locals(locals, types, e);
            }
        }
        Node::While { body, .. } => prescan_locals(locals, types, body),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::OptLevel;
    use crate::lexer::Lexer;
    use crate::parser::Parser;
    use crate::resolve::collect_top_level;

    fn compile(src: &str, level: OptLevel) -> String {
        let tokens = Lexer::new(src).tokenize().unwrap();
        let program = Parser::new(tokens, level).parse_program().unwrap();
        let (types, globals) = collect_top_level(&program).unwrap();
        let codegen = CodeGen::new(level, &types, &globals);
        let (text, _strings) = codegen.emit_program(&program).unwrap();
        text
    }

    #[test]
    fn main_returning_zero_has_prologue_and_fallback_epilogue() {
        let text = compile("fn main() -> i32 { return 0; }", OptLevel::O0);
        assert!(text.contains("main:"));
        assert!(text.contains("push rbp"));
        assert!(text.contains("mov rax, 0"));
        assert!(text.contains("leave"));
        assert!(text.contains("ret"));
    }

    #[test]
    fn frame_size_is_a_multiple_of_sixteen() {
        let text = compile("fn main() -> i32 { let x: i64 = 1; return 0; }", OptLevel::O0);
        let line = text.lines().find(|l| l.contains("sub rsp")).unwrap();
        let n: i64 = line.trim().trim_start_matches("sub rsp, ").parse().unwrap();
        assert_eq!(n % 16, 0);
    }

    #[test]
    fn strength_reduction_uses_shift_for_power_of_two_at_o2() {
        let text = compile("fn main() -> i32 { let x: i64 = 8 * 4; return 0; }", OptLevel::O0);
        // literal-literal multiply already folds at O0? No -- O0 doesn't fold,
        // so this exercises the non-power-of-two-RHS path with a variable.
        let _ = text;
        let text2 = compile(
            "fn f(n: i64) -> i64 { let y: i64 = n * 4; return y; }",
            OptLevel::O2,
        );
        assert!(text2.contains("shl rax, 2"));
    }

    #[test]
    fn array_index_emits_bounds_check_labels() {
        let text = compile(
            "fn main() -> i32 { let a: [i64; 3] = [1, 2, 3]; let x: i64 = a[1]; return 0; }",
            OptLevel::O0,
        );
        assert!(text.contains(".Lbounds_error_"));
        assert!(text.contains(".Lbounds_ok_"));
        assert!(text.contains("Array bounds error"));
    }

    #[test]
    fn division_by_runtime_zero_guard_is_emitted() {
        let text = compile(
            "fn f(n: i64) -> i64 { let y: i64 = 10 / n; return y; }",
            OptLevel::O0,
        );
        assert!(text.contains(".Ldivzero_"));
        assert!(text.contains("idiv rbx"));
    }

    #[test]
    fn struct_field_access_uses_direct_offset_for_non_pointer() {
        let text = compile(
            "struct P { x: i64, y: i64 } fn main() -> i32 { let p: P = P{x: 1, y: 2}; let v: i64 = p.y; return 0; }",
            OptLevel::O0,
        );
        // p.y should add the field's 8-byte offset directly into the mov operand.
        assert!(text.contains("+ 8"));
    }

    #[test]
    fn println_writes_payload_then_a_separate_newline_byte() {
        let text = compile(r#"fn main() -> i32 { println("hi"); return 0; }"#, OptLevel::O0);
        let syscalls = text.matches("syscall").count();
        assert!(syscalls >= 2);
        assert!(text.contains("mov byte"));
    }
}
