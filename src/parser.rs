//! Recursive-descent parser: a single position cursor over the token
//! vector, `expect` consuming or raising a diagnostic. Desugaring and
//! constant folding both happen here, during parsing, not in codegen.

use crate::ast::{FieldInit, Node, OptLevel, Param, StructFieldDecl, TypeSpec};
use crate::error::{CompileError, CompileResult, Pos};
use crate::lexer::{Token, TokenKind};

pub struct Parser<'s> {
    tokens: Vec<Token<'s>>,
    pos: usize,
    opt_level: OptLevel,
}

impl<'s> Parser<'s> {
    pub fn new(tokens: Vec<Token<'s>>, opt_level: OptLevel) -> Self {
        Parser { tokens, pos: 0, opt_level }
    }

    // -- cursor plumbing -----------------------------------------------

    fn cur(&self) -> &Token<'s> {
        &self.tokens[self.pos]
    }

    fn kind(&self) -> TokenKind {
        self.cur().kind
    }

    fn kind_at(&self, offset: usize) -> TokenKind {
        self.tokens
            .get(self.pos + offset)
            .map(|t| t.kind)
            .unwrap_or(TokenKind::Eof)
    }

    fn check(&self, k: TokenKind) -> bool {
        self.kind() == k
    }

    fn advance(&mut self) -> Token<'s> {
        let t = self.tokens[self.pos];
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        t
    }

    fn expect(&mut self, k: TokenKind) -> CompileResult<Token<'s>> {
        if self.check(k) {
            Ok(self.advance())
        } else {
            let got = self.cur();
            Err(CompileError::parse(
                got.pos(),
                format!("expected {:?}, got {:?} ('{}')", k, got.kind, got.text),
            ))
        }
    }

    fn expect_ident(&mut self) -> CompileResult<String> {
        let t = self.expect(TokenKind::Ident)?;
        Ok(t.text.to_string())
    }

    fn err_here(&self, message: impl Into<String>) -> CompileError {
        CompileError::parse(self.cur().pos(), message)
    }

    // -- top level --------------------------------------------------------

    pub fn parse_program(&mut self) -> CompileResult<Node> {
        let mut items = Vec::new();
        while !self.check(TokenKind::Eof) {
            items.push(self.parse_item()?);
        }
        Ok(Node::Program(items))
    }

    fn parse_item(&mut self) -> CompileResult<Node> {
        match self.kind() {
            TokenKind::Struct => self.parse_struct_def(),
            TokenKind::Let => self.parse_global_let(),
            TokenKind::Fn => self.parse_function(),
            _ => Err(self.err_here("expected 'struct', 'let', or 'fn' at top level")),
        }
    }

    fn parse_struct_def(&mut self) -> CompileResult<Node> {
        self.expect(TokenKind::Struct)?;
        let name = self.expect_ident()?;
        self.expect(TokenKind::LBrace)?;
        let mut fields = Vec::new();
        while !self.check(TokenKind::RBrace) {
            let fname = self.expect_ident()?;
            self.expect(TokenKind::Colon)?;
            let ty = self.parse_type()?;
            fields.push(StructFieldDecl { name: fname, ty });
            if self.check(TokenKind::Comma) {
                self.advance();
            } else {
                break;
            }
        }
        self.expect(TokenKind::RBrace)?;
        Ok(Node::StructDef { name, fields })
    }

    fn parse_global_let(&mut self) -> CompileResult<Node> {
        self.expect(TokenKind::Let)?;
        let name = self.expect_ident()?;
        let ty = if self.check(TokenKind::Colon) {
            self.advance();
            self.parse_type()?
        } else {
            TypeSpec::plain("i64")
        };
        let (init, array_init) = if self.check(TokenKind::Eq) {
            self.advance();
            self.parse_global_initializer(&ty)?
        } else {
            (None, None)
        };
        self.expect(TokenKind::Semi)?;
        Ok(Node::GlobalVar { name, ty, init, array_init })
    }

    /// Globals only ever take a constant-literal initializer. Arrays take
    /// either an element list of literals or a string literal that is
    /// expanded byte-by-byte.
    fn parse_global_initializer(&mut self, ty: &TypeSpec) -> CompileResult<(Option<Box<Node>>, Option<Vec<Node>>)> {
        if ty.array_len.is_some() {
            if self.check(TokenKind::String) {
                let s = self.parse_string_literal()?;
                return Ok((Some(Box::new(s)), None));
            }
            self.expect(TokenKind::LBracket)?;
            let mut elems = Vec::new();
            while !self.check(TokenKind::RBracket) {
                elems.push(self.parse_literal_number()?);
                if self.check(TokenKind::Comma) {
                    self.advance();
                } else {
                    break;
                }
            }
            self.expect(TokenKind::RBracket)?;
            Ok((None, Some(elems)))
        } else {
            let n = self.parse_literal_number()?;
            Ok((Some(Box::new(n)), None))
        }
    }

    fn parse_literal_number(&mut self) -> CompileResult<Node> {
        if !self.check(TokenKind::Number) {
            return Err(self.err_here("global initializer must be a constant literal"));
        }
        let t = self.advance();
        let n: i64 = t.text.parse().map_err(|_| {
            CompileError::parse(t.pos(), format!("invalid integer literal '{}'", t.text))
        })?;
        Ok(Node::Number(n))
    }

    fn parse_string_literal(&mut self) -> CompileResult<Node> {
        let t = self.expect(TokenKind::String)?;
        let raw = &t.text[1..t.text.len() - 1];
        Ok(Node::Str(raw.to_string()))
    }

    /// `T`, `*T`, `*mut T`, `[T; N]`.
    fn parse_type(&mut self) -> CompileResult<TypeSpec> {
        if self.check(TokenKind::Star) {
            self.advance();
            let is_mutable = if self.check(TokenKind::Mut) {
                self.advance();
                true
            } else {
                false
            };
            let base = self.expect_ident()?;
            Ok(TypeSpec { base, is_pointer: true, is_mutable, array_len: None })
        } else if self.check(TokenKind::LBracket) {
            self.advance();
            let base = self.expect_ident()?;
            self.expect(TokenKind::Semi)?;
            let count_tok = self.expect(TokenKind::Number)?;
            let count: usize = count_tok.text.parse().map_err(|_| {
                CompileError::parse(count_tok.pos(), "invalid array length")
            })?;
            self.expect(TokenKind::RBracket)?;
            Ok(TypeSpec { base, is_pointer: false, is_mutable: false, array_len: Some(count) })
        } else {
            let base = self.expect_ident()?;
            Ok(TypeSpec::plain(base))
        }
    }

    fn parse_function(&mut self) -> CompileResult<Node> {
        self.expect(TokenKind::Fn)?;
        let name = self.expect_ident()?;
        self.expect(TokenKind::LParen)?;
        let mut params = Vec::new();
        while !self.check(TokenKind::RParen) {
            let pname = self.expect_ident()?;
            self.expect(TokenKind::Colon)?;
            let ty = self.parse_type()?;
            params.push(Param { name: pname, ty });
            if self.check(TokenKind::Comma) {
                self.advance();
            } else {
                break;
            }
        }
        self.expect(TokenKind::RParen)?;
        if params.len() > 6 {
            return Err(self.err_here(format!(
                "function '{name}' takes {} parameters; more than 6 is unsupported",
                params.len()
            )));
        }
        let ret = if self.check(TokenKind::Arrow) {
            self.advance();
            Some(self.parse_type()?)
        } else {
            None
        };
        if self.check(TokenKind::Semi) {
            self.advance();
            return Ok(Node::Function {
                name,
                params,
                ret,
                body: Box::new(Node::Block(Vec::new())),
                is_forward_decl: true,
            });
        }
        let body = self.parse_block()?;
        Ok(Node::Function { name, params, ret, body: Box::new(body), is_forward_decl: false })
    }

    // -- statements --------------------------------------------------------

    fn parse_block(&mut self) -> CompileResult<Node> {
        self.expect(TokenKind::LBrace)?;
        let mut stmts = Vec::new();
        while !self.check(TokenKind::RBrace) {
            stmts.push(self.parse_statement()?);
        }
        self.expect(TokenKind::RBrace)?;
        Ok(Node::Block(stmts))
    }

    fn parse_statement(&mut self) -> CompileResult<Node> {
        match self.kind() {
            TokenKind::Return => {
                self.advance();
                let value = if self.check(TokenKind::Semi) {
                    None
                } else {
                    Some(Box::new(self.parse_expr()?))
                };
                self.expect(TokenKind::Semi)?;
                Ok(Node::Return(value))
            }
            TokenKind::Let => self.parse_local_let(),
            TokenKind::If => self.parse_if(),
            TokenKind::While => self.parse_while(),
            TokenKind::For => self.parse_for(),
            _ => {
                let stmt = self.parse_simple_stmt()?;
                self.expect(TokenKind::Semi)?;
                Ok(stmt)
            }
        }
    }

    fn parse_local_let(&mut self) -> CompileResult<Node> {
        self.expect(TokenKind::Let)?;
        let name = self.expect_ident()?;
        let ty = if self.check(TokenKind::Colon) {
            self.advance();
            Some(self.parse_type()?)
        } else {
            None
        };
        let init = if self.check(TokenKind::Eq) {
            self.advance();
            Some(Box::new(self.parse_expr()?))
        } else {
            None
        };
        self.expect(TokenKind::Semi)?;
        Ok(Node::Let { name, ty, init })
    }

    fn parse_if(&mut self) -> CompileResult<Node> {
        self.expect(TokenKind::If)?;
        self.expect(TokenKind::LParen)?;
        let cond = self.parse_expr()?;
        self.expect(TokenKind::RParen)?;
        let then_branch = self.parse_block()?;
        let else_branch = if self.check(TokenKind::Else) {
            self.advance();
            if self.check(TokenKind::If) {
                Some(Box::new(self.parse_if()?))
            } else {
                Some(Box::new(self.parse_block()?))
            }
        } else {
            None
        };
        Ok(Node::If { cond: Box::new(cond), then_branch: Box::new(then_branch), else_branch })
    }

    fn parse_while(&mut self) -> CompileResult<Node> {
        self.expect(TokenKind::While)?;
        self.expect(TokenKind::LParen)?;
        let cond = self.parse_expr()?;
        self.expect(TokenKind::RParen)?;
        let body = self.parse_block()?;
        Ok(Node::While { cond: Box::new(cond), body: Box::new(body) })
    }

    /// `for (init; cond; inc) body` desugars to
    /// `{ init; while (cond) { body; inc; } }`.
    fn parse_for(&mut self) -> CompileResult<Node> {
        self.expect(TokenKind::For)?;
        self.expect(TokenKind::LParen)?;
        let init = if self.check(TokenKind::Let) {
            self.parse_local_let()?
        } else {
            let s = self.parse_simple_stmt()?;
            self.expect(TokenKind::Semi)?;
            s
        };
        let cond = self.parse_expr()?;
        self.expect(TokenKind::Semi)?;
        let inc = self.parse_simple_stmt()?;
        self.expect(TokenKind::RParen)?;
        let body = self.parse_block()?;

        let mut body_stmts = match body {
            Node::Block(stmts) => stmts,
            other => vec![other],
        };
        body_stmts.push(inc);
        let while_node = Node::While { cond: Box::new(cond), body: Box::new(Node::Block(body_stmts)) };
        Ok(Node::Block(vec![init, while_node]))
    }

    /// An identifier-led statement form: `x++`, `x--`, `x op= e`, or a
    /// plain expression (assignment, call, ...). These tokens don't occur
    /// anywhere in the expression grammar, so they must be recognized
    /// before falling back to `parse_expr`.
    fn parse_simple_stmt(&mut self) -> CompileResult<Node> {
        if self.kind() == TokenKind::Ident {
            let compound_op = match self.kind_at(1) {
                TokenKind::PlusPlus => Some(("+", true)),
                TokenKind::MinusMinus => Some(("-", true)),
                TokenKind::PlusEq => Some(("+", false)),
                TokenKind::MinusEq => Some(("-", false)),
                TokenKind::StarEq => Some(("*", false)),
                TokenKind::SlashEq => Some(("/", false)),
                TokenKind::PercentEq => Some(("%", false)),
                _ => None,
            };
            if let Some((op, is_incdec)) = compound_op {
                let name = self.advance().text.to_string();
                self.advance(); // the ++/--/op= token itself
                let rhs = if is_incdec {
                    Node::Number(1)
                } else {
                    self.parse_expr()?
                };
                let value = self.fold_binary(op, Node::Ident(name.clone()), rhs);
                return Ok(Node::Assign { name, value: Box::new(value) });
            }
        }
        self.parse_expr()
    }

    // -- expressions: precedence tower ---------------------------------------

    pub fn parse_expr(&mut self) -> CompileResult<Node> {
        self.parse_logical_or()
    }

    fn parse_logical_or(&mut self) -> CompileResult<Node> {
        let mut node = self.parse_logical_and()?;
        while self.check(TokenKind::OrOr) {
            self.advance();
            let rhs = self.parse_logical_and()?;
            node = Node::Logical { op: "||".into(), lhs: Box::new(node), rhs: Box::new(rhs) };
        }
        Ok(node)
    }

    fn parse_logical_and(&mut self) -> CompileResult<Node> {
        let mut node = self.parse_comparison()?;
        while self.check(TokenKind::AndAnd) {
            self.advance();
            let rhs = self.parse_comparison()?;
            node = Node::Logical { op: "&&".into(), lhs: Box::new(node), rhs: Box::new(rhs) };
        }
        Ok(node)
    }

    fn parse_comparison(&mut self) -> CompileResult<Node> {
        let mut node = self.parse_additive()?;
        loop {
            let op = match self.kind() {
                TokenKind::EqEq => "==",
                TokenKind::Neq => "!=",
                TokenKind::Lt => "<",
                TokenKind::Gt => ">",
                TokenKind::Lte => "<=",
                TokenKind::Gte => ">=",
                _ => break,
            };
            self.advance();
            let rhs = self.parse_additive()?;
            node = Node::Compare { op: op.into(), lhs: Box::new(node), rhs: Box::new(rhs) };
        }
        Ok(node)
    }

    fn parse_additive(&mut self) -> CompileResult<Node> {
        let mut node = self.parse_multiplicative()?;
        loop {
            let op = match self.kind() {
                TokenKind::Plus => "+",
                TokenKind::Minus => "-",
                _ => break,
            };
            self.advance();
            let rhs = self.parse_multiplicative()?;
            node = self.fold_binary(op, node, rhs);
        }
        Ok(node)
    }

    fn parse_multiplicative(&mut self) -> CompileResult<Node> {
        let mut node = self.parse_postfix()?;
        loop {
            let op = match self.kind() {
                TokenKind::Star => "*",
                TokenKind::Slash => "/",
                TokenKind::Percent => "%",
                _ => break,
            };
            self.advance();
            let rhs = self.parse_postfix()?;
            node = self.fold_binary(op, node, rhs);
        }
        Ok(node)
    }

    /// Fold `lhs op rhs` into a single `Number` when both sides are
    /// literals, `-O1` or higher is active, and the op isn't a div/mod by
    /// zero (folding is inhibited in that case so the runtime zero-check
    /// still applies to the un-folded tree).
    fn fold_binary(&self, op: &str, lhs: Node, rhs: Node) -> Node {
        if self.opt_level.folds_constants() {
            if let (Some(a), Some(b)) = (lhs.as_number(), rhs.as_number()) {
                let zero_div = (op == "/" || op == "%") && b == 0;
                if !zero_div {
                    let folded = match op {
                        "+" => a.wrapping_add(b),
                        "-" => a.wrapping_sub(b),
                        "*" => a.wrapping_mul(b),
                        "/" => a.wrapping_div(b),
                        "%" => a.wrapping_rem(b),
                        _ => unreachable!(),
                    };
                    return Node::Number(folded);
                }
            }
        }
        Node::BinaryOp { op: op.into(), lhs: Box::new(lhs), rhs: Box::new(rhs) }
    }

    fn postfix_target_starts_here(&self, offset: usize) -> bool {
        matches!(
            self.kind_at(offset),
            TokenKind::Ident | TokenKind::LParen | TokenKind::Star | TokenKind::Amp
        )
    }

    /// `postfix := postfix_base ( "[" expr "]" | "." IDENT | "->" IDENT )*`,
    /// plus assignment detection once the target shape is known: an
    /// `Ident`, `Index`, or `FieldAccess` immediately followed by `=`
    /// becomes `Assign`/`ArrayAssign`/`FieldAssign`.
    fn parse_postfix(&mut self) -> CompileResult<Node> {
        let mut node = self.parse_postfix_base()?;
        loop {
            match self.kind() {
                TokenKind::LBracket => {
                    self.advance();
                    let index = self.parse_expr()?;
                    self.expect(TokenKind::RBracket)?;
                    node = Node::Index { base: Box::new(node), index: Box::new(index) };
                }
                TokenKind::Dot => {
                    self.advance();
                    let field = self.expect_ident()?;
                    node = Node::FieldAccess { object: Box::new(node), field };
                }
                TokenKind::Arrow => {
                    self.advance();
                    let field = self.expect_ident()?;
                    // ptr->field => (*ptr).field
                    node = Node::FieldAccess { object: Box::new(Node::Dereference(Box::new(node))), field };
                }
                _ => break,
            }
        }

        if self.check(TokenKind::Eq) {
            match node {
                Node::Ident(name) => {
                    self.advance();
                    let value = self.parse_expr()?;
                    return Ok(Node::Assign { name, value: Box::new(value) });
                }
                Node::Index { base, index } => {
                    self.advance();
                    let value = self.parse_expr()?;
                    return Ok(Node::ArrayAssign { base, index, value: Box::new(value) });
                }
                Node::FieldAccess { object, field } => {
                    self.advance();
                    let value = self.parse_expr()?;
                    return Ok(Node::FieldAssign { object, field, value: Box::new(value) });
                }
                other => return Ok(other),
            }
        }
        Ok(node)
    }

    /// `postfix_base := "&" postfix | "*" postfix (lookahead) | unary`.
    fn parse_postfix_base(&mut self) -> CompileResult<Node> {
        match self.kind() {
            TokenKind::Amp => {
                self.advance();
                Ok(Node::AddressOf(Box::new(self.parse_postfix()?)))
            }
            TokenKind::Star if self.postfix_target_starts_here(1) => {
                self.advance();
                Ok(Node::Dereference(Box::new(self.parse_postfix()?)))
            }
            _ => self.parse_unary(),
        }
    }

    /// `unary := "-" unary | "!" unary | "&" unary | "*" unary (lookahead) | primary`.
    fn parse_unary(&mut self) -> CompileResult<Node> {
        match self.kind() {
            TokenKind::Minus => {
                self.advance();
                Ok(Node::Unary { op: "-".into(), expr: Box::new(self.parse_unary()?) })
            }
            TokenKind::Bang => {
                self.advance();
                Ok(Node::Unary { op: "!".into(), expr: Box::new(self.parse_unary()?) })
            }
            TokenKind::Amp => {
                self.advance();
                Ok(Node::AddressOf(Box::new(self.parse_unary()?)))
            }
            TokenKind::Star if self.postfix_target_starts_here(1) => {
                self.advance();
                Ok(Node::Dereference(Box::new(self.parse_unary()?)))
            }
            _ => self.parse_primary(),
        }
    }

    fn parse_primary(&mut self) -> CompileResult<Node> {
        match self.kind() {
            TokenKind::Number => {
                let t = self.advance();
                let n: i64 = t.text.parse().map_err(|_| {
                    CompileError::parse(t.pos(), format!("invalid integer literal '{}'", t.text))
                })?;
                Ok(Node::Number(n))
            }
            TokenKind::String => self.parse_string_literal(),
            TokenKind::LBracket => {
                self.advance();
                let mut elems = Vec::new();
                while !self.check(TokenKind::RBracket) {
                    elems.push(self.parse_expr()?);
                    if self.check(TokenKind::Comma) {
                        self.advance();
                    } else {
                        break;
                    }
                }
                self.expect(TokenKind::RBracket)?;
                Ok(Node::ArrayLiteral(elems))
            }
            TokenKind::LParen => {
                self.advance();
                let inner = self.parse_expr()?;
                self.expect(TokenKind::RParen)?;
                Ok(inner)
            }
            TokenKind::Ident => {
                let name = self.advance().text.to_string();
                if self.check(TokenKind::LBrace) {
                    self.parse_struct_literal(name)
                } else if self.check(TokenKind::LParen) {
                    self.parse_call(name)
                } else {
                    Ok(Node::Ident(name))
                }
            }
            _ => Err(self.err_here(format!("unexpected token '{}'", self.cur().text))),
        }
    }

    fn parse_struct_literal(&mut self, type_name: String) -> CompileResult<Node> {
        self.expect(TokenKind::LBrace)?;
        let mut fields = Vec::new();
        while !self.check(TokenKind::RBrace) {
            let name = self.expect_ident()?;
            self.expect(TokenKind::Colon)?;
            let value = self.parse_expr()?;
            fields.push(FieldInit { name, value });
            if self.check(TokenKind::Comma) {
                self.advance();
            } else {
                break;
            }
        }
        self.expect(TokenKind::RBrace)?;
        Ok(Node::StructLiteral { type_name, fields })
    }

    fn parse_call(&mut self, name: String) -> CompileResult<Node> {
        self.expect(TokenKind::LParen)?;
        let mut args = Vec::new();
        while !self.check(TokenKind::RParen) {
            args.push(self.parse_expr()?);
            if self.check(TokenKind::Comma) {
                self.advance();
            } else {
                break;
            }
        }
        self.expect(TokenKind::RParen)?;
        Ok(Node::Call { name, args })
    }
}

/// Helper for callers that only want the diagnostic's position, e.g. when
/// converting an out-of-range token error from a lower layer.
pub fn unexpected_eof(tokens: &[Token]) -> Pos {
    tokens.last().map(|t| t.pos()).unwrap_or(Pos { line: 1, col: 1 })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;

    fn parse(src: &str, level: OptLevel) -> Node {
        let tokens = Lexer::new(src).tokenize().unwrap();
        Parser::new(tokens, level).parse_program().unwrap()
    }

    #[test]
    fn parses_minimal_main() {
        let prog = parse("fn main() -> i32 { return 0; }", OptLevel::O0);
        match prog {
            Node::Program(items) => assert_eq!(items.len(), 1),
            _ => panic!("expected Program"),
        }
    }

    #[test]
    fn folds_constants_at_o1_but_not_o0() {
        let unfolded = parse("fn main() -> i32 { let x = 40 + 2; return 0; }", OptLevel::O0);
        let folded = parse("fn main() -> i32 { let x = 40 + 2; return 0; }", OptLevel::O1);

        fn let_init(p: &Node) -> &Node {
            match p {
                Node::Program(items) => match &items[0] {
                    Node::Function { body, .. } => match body.as_ref() {
                        Node::Block(stmts) => match &stmts[0] {
                            Node::Let { init, .. } => init.as_ref().unwrap(),
                            _ => panic!(),
                        },
                        _ => panic!(),
                    },
                    _ => panic!(),
                },
                _ => panic!(),
            }
        }

        assert!(matches!(let_init(&unfolded), Node::BinaryOp { .. }));
        assert_eq!(let_init(&folded), &Node::Number(42));
    }

    #[test]
    fn division_by_literal_zero_is_never_folded() {
        let prog = parse("fn main() -> i32 { let x = 1 / 0; return 0; }", OptLevel::O2);
        let init = match &prog {
            Node::Program(items) => match &items[0] {
                Node::Function { body, .. } => match body.as_ref() {
                    Node::Block(stmts) => match &stmts[0] {
                        Node::Let { init, .. } => init.clone().unwrap(),
                        _ => panic!(),
                    },
                    _ => panic!(),
                },
                _ => panic!(),
            },
            _ => panic!(),
        };
        assert!(matches!(*init, Node::BinaryOp { .. }));
    }

    #[test]
    fn desugars_increment_on_bare_identifier() {
        let prog = parse("fn main() -> i32 { let i = 0; i++; return 0; }", OptLevel::O0);
        let stmt = match &prog {
            Node::Program(items) => match &items[0] {
                Node::Function { body, .. } => match body.as_ref() {
                    Node::Block(stmts) => stmts[1].clone(),
                    _ => panic!(),
                },
                _ => panic!(),
            },
            _ => panic!(),
        };
        match stmt {
            Node::Assign { name, value } => {
                assert_eq!(name, "i");
                assert!(matches!(*value, Node::BinaryOp { .. }));
            }
            other => panic!("expected Assign, got {other:?}"),
        }
    }

    #[test]
    fn desugars_for_loop_into_block_with_while() {
        let prog = parse(
            "fn main() -> i32 { for (let i = 0; i < 5; i++) { } return 0; }",
            OptLevel::O0,
        );
        let for_stmt = match &prog {
            Node::Program(items) => match &items[0] {
                Node::Function { body, .. } => match body.as_ref() {
                    Node::Block(stmts) => stmts[0].clone(),
                    _ => panic!(),
                },
                _ => panic!(),
            },
            _ => panic!(),
        };
        match for_stmt {
            Node::Block(inner) => {
                assert_eq!(inner.len(), 2);
                assert!(matches!(inner[0], Node::Let { .. }));
                assert!(matches!(inner[1], Node::While { .. }));
            }
            other => panic!("expected desugared Block, got {other:?}"),
        }
    }

    #[test]
    fn desugars_arrow_into_deref_then_field_access() {
        let prog = parse(
            "struct P { x: i64 } fn main() -> i32 { let p: *P = 0; return p->x; }",
            OptLevel::O0,
        );
        let ret = match &prog {
            Node::Program(items) => match &items[1] {
                Node::Function { body, .. } => match body.as_ref() {
                    Node::Block(stmts) => stmts[1].clone(),
                    _ => panic!(),
                },
                _ => panic!(),
            },
            _ => panic!(),
        };
        match ret {
            Node::Return(Some(expr)) => match *expr {
                Node::FieldAccess { object, field } => {
                    assert_eq!(field, "x");
                    assert!(matches!(*object, Node::Dereference(_)));
                }
                other => panic!("expected FieldAccess, got {other:?}"),
            },
            other => panic!("expected Return, got {other:?}"),
        }
    }

    #[test]
    fn array_assign_and_field_assign_detected() {
        let prog = parse(
            "struct P { x: i64 } fn main() -> i32 { let a: [i64; 2] = [1, 2]; a[0] = 9; let p: P = P{x: 1}; p.x = 2; return 0; }",
            OptLevel::O0,
        );
        let stmts = match &prog {
            Node::Program(items) => match &items[1] {
                Node::Function { body, .. } => match body.as_ref() {
                    Node::Block(stmts) => stmts.clone(),
                    _ => panic!(),
                },
                _ => panic!(),
            },
            _ => panic!(),
        };
        assert!(matches!(stmts[1], Node::ArrayAssign { .. }));
        assert!(matches!(stmts[3], Node::FieldAssign { .. }));
    }

    #[test]
    fn forward_declaration_has_empty_body_flag_set() {
        let prog = parse("fn helper(x: i32) -> i32; fn main() -> i32 { return 0; }", OptLevel::O0);
        match &prog {
            Node::Program(items) => match &items[0] {
                Node::Function { is_forward_decl, body, .. } => {
                    assert!(*is_forward_decl);
                    assert!(matches!(body.as_ref(), Node::Block(v) if v.is_empty()));
                }
                _ => panic!(),
            },
            _ => panic!(),
        }
    }

    #[test]
    fn more_than_six_params_is_rejected() {
        let tokens = Lexer::new("fn f(a: i64, b: i64, c: i64, d: i64, e: i64, g: i64, h: i64) { }").tokenize().unwrap();
        let err = Parser::new(tokens, OptLevel::O0).parse_program().unwrap_err();
        assert!(matches!(err, CompileError::Parse { .. }));
    }
}
