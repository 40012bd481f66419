//! Hand-written runtime helpers: a handful of fixed NASM routines that
//! support the generated code but aren't themselves driven by the AST, so
//! they're plain string templates rather than anything built through
//! [`crate::symtab::Locals`].

/// Process entry point. Linux hands control here with `argc`/`argv`/`envp`
/// on the initial stack and no prior frame; it calls `main`, then exits
/// with `main`'s return value truncated to a byte by the kernel.
pub fn entry_point() -> &'static str {
    "_start:\n\
    \x20   call main\n\
    \x20   mov rdi, rax\n\
    \x20   mov rax, 60\n\
    \x20   syscall\n"
}

/// `__print_int(n: rdi) -> void`: writes the decimal (with leading `-` for
/// negatives) representation of `rdi` to stdout. Builds the digits
/// backwards into a 24-byte stack buffer, then writes them forward in one
/// syscall.
pub fn print_int() -> &'static str {
    "__print_int:\n\
    \x20   push rbp\n\
    \x20   mov rbp, rsp\n\
    \x20   sub rsp, 32\n\
    \x20   mov rax, rdi\n\
    \x20   mov byte [rbp-32], 0\n\
    \x20   lea rsi, [rbp-1]\n\
    \x20   mov rcx, 0\n\
    \x20   mov r8, 0\n\
    \x20   cmp rax, 0\n\
    \x20   jge .Lpi_notneg\n\
    \x20   mov r8, 1\n\
    \x20   neg rax\n\
    .Lpi_notneg:\n\
    \x20   mov r9, 10\n\
    .Lpi_digit:\n\
    \x20   xor rdx, rdx\n\
    \x20   div r9\n\
    \x20   add dl, '0'\n\
    \x20   dec rsi\n\
    \x20   mov [rsi], dl\n\
    \x20   inc rcx\n\
    \x20   test rax, rax\n\
    \x20   jnz .Lpi_digit\n\
    \x20   cmp r8, 0\n\
    \x20   je .Lpi_nosign\n\
    \x20   dec rsi\n\
    \x20   mov byte [rsi], '-'\n\
    \x20   inc rcx\n\
    .Lpi_nosign:\n\
    \x20   mov rax, 1\n\
    \x20   mov rdi, 1\n\
    \x20   mov rdx, rcx\n\
    \x20   syscall\n\
    \x20   leave\n\
    \x20   ret\n"
}

/// `__strlen(s: rdi) -> rax`: byte count up to (not including) the first
/// NUL.
pub fn strlen() -> &'static str {
    "__strlen:\n\
    \x20   xor rax, rax\n\
    .Lsl_loop:\n\
    \x20   cmp byte [rdi + rax], 0\n\
    \x20   je .Lsl_done\n\
    \x20   inc rax\n\
    \x20   jmp .Lsl_loop\n\
    .Lsl_done:\n\
    \x20   ret\n"
}

/// `__strcmp(a: rdi, b: rsi) -> rax`: `0` if equal, else the signed
/// byte-value difference at the first mismatching position (including a
/// trailing NUL in one string but not the other).
pub fn strcmp() -> &'static str {
    "__strcmp:\n\
    \x20   xor rcx, rcx\n\
    .Lsc_loop:\n\
    \x20   movzx rax, byte [rdi + rcx]\n\
    \x20   movzx rdx, byte [rsi + rcx]\n\
    \x20   cmp rax, rdx\n\
    \x20   jne .Lsc_diff\n\
    \x20   test rax, rax\n\
    \x20   jz .Lsc_equal\n\
    \x20   inc rcx\n\
    \x20   jmp .Lsc_loop\n\
    .Lsc_diff:\n\
    \x20   sub rax, rdx\n\
    \x20   ret\n\
    .Lsc_equal:\n\
    \x20   xor rax, rax\n\
    \x20   ret\n"
}

/// `__strcpy(dst: rdi, src: rsi) -> rax` (`rax` = `dst`): copies `src`
/// through its terminating NUL, inclusive.
pub fn strcpy() -> &'static str {
    "__strcpy:\n\
    \x20   mov rax, rdi\n\
    \x20   xor rcx, rcx\n\
    .Lscp_loop:\n\
    \x20   mov dl, [rsi + rcx]\n\
    \x20   mov [rdi + rcx], dl\n\
    \x20   test dl, dl\n\
    \x20   jz .Lscp_done\n\
    \x20   inc rcx\n\
    \x20   jmp .Lscp_loop\n\
    .Lscp_done:\n\
    \x20   ret\n"
}

/// Every helper's text, in the fixed order they're emitted after `_start`
/// and before user functions.
pub fn all_helpers() -> Vec<&'static str> {
    vec![print_int(), strlen(), strcmp(), strcpy()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_point_calls_main_and_exits_with_its_return_value() {
        let text = entry_point();
        assert!(text.contains("call main"));
        assert!(text.contains("mov rdi, rax"));
        assert!(text.contains("mov rax, 60"));
        assert!(text.contains("syscall"));
    }

    #[test]
    fn print_int_handles_the_negative_sign_branch() {
        let text = print_int();
        assert!(text.contains("neg rax"));
        assert!(text.contains("'-'"));
    }

    #[test]
    fn all_helpers_are_non_empty_and_self_labeled() {
        for h in all_helpers() {
            assert!(h.starts_with("__"));
            assert!(h.contains("ret"));
        }
    }
}
