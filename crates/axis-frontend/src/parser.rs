use crate::ast::*;
use crate::diag::{DiagKind, Diagnostic};
use crate::lexer::{Token, TokenKind};

/// Recursive descent over the token stream. One token of lookahead is enough;
/// INDENT/DEDENT from the lexer delimit blocks.
pub struct Parser<'a> {
    toks: &'a [Token],
    pos: usize,
    loop_depth: u32,
}

impl<'a> Parser<'a> {
    pub fn parse(toks: &'a [Token]) -> Result<Program, Diagnostic> {
        let mut p = Parser { toks, pos: 0, loop_depth: 0 };
        p.parse_program()
    }

    fn peek(&self) -> &Token {
        self.toks.get(self.pos).unwrap_or(self.toks.last().expect("token stream ends with EOF"))
    }

    fn kind(&self) -> &TokenKind {
        &self.peek().kind
    }

    fn span(&self) -> Span {
        let t = self.peek();
        Span { line: t.line, col: t.col }
    }

    fn bump(&mut self) -> Token {
        let t = self.peek().clone();
        if self.pos < self.toks.len() - 1 {
            self.pos += 1;
        }
        t
    }

    fn at(&self, kind: &TokenKind) -> bool {
        self.kind() == kind
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.at(kind) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind, what: &str) -> Result<Token, Diagnostic> {
        if self.at(kind) {
            Ok(self.bump())
        } else {
            Err(self.error_here(format!("expected {what}, got {}", describe(self.kind()))))
        }
    }

    fn error_here(&self, msg: impl Into<String>) -> Diagnostic {
        let t = self.peek();
        Diagnostic::new(DiagKind::Parse, t.line, t.col, msg)
    }

    fn skip_newlines(&mut self) {
        while self.eat(&TokenKind::Newline) {}
    }

    /// Consume a statement terminator: NEWLINE, or the end of the enclosing
    /// block / file.
    fn end_of_stmt(&mut self) -> Result<(), Diagnostic> {
        if self.eat(&TokenKind::Newline) {
            self.skip_newlines();
            return Ok(());
        }
        if matches!(self.kind(), TokenKind::Dedent | TokenKind::Eof) {
            return Ok(());
        }
        Err(self.error_here(format!("expected newline, got {}", describe(self.kind()))))
    }

    fn parse_program(&mut self) -> Result<Program, Diagnostic> {
        self.skip_newlines();

        let mut mode = Mode::Compile;
        if self.eat(&TokenKind::Mode) {
            match self.kind().clone() {
                TokenKind::Ident(name) if name == "compile" => {
                    self.bump();
                }
                TokenKind::Ident(name) if name == "script" => {
                    self.bump();
                    mode = Mode::Script;
                }
                other => {
                    return Err(self.error_here(format!(
                        "expected 'script' or 'compile' after 'mode', got {}",
                        describe(&other)
                    )))
                }
            }
            self.end_of_stmt()?;
        }

        // Script sources are interpreted by the outer tooling; this core only
        // records the mode so the driver can refuse them.
        if mode == Mode::Script {
            return Ok(Program { mode, funcs: Vec::new() });
        }

        let mut funcs = Vec::new();
        while !self.at(&TokenKind::Eof) {
            if self.at(&TokenKind::Func) {
                funcs.push(self.parse_function()?);
            } else {
                return Err(self.error_here(format!(
                    "expected 'func' at top level, got {}",
                    describe(self.kind())
                )));
            }
            self.skip_newlines();
        }

        Ok(Program { mode, funcs })
    }

    fn parse_function(&mut self) -> Result<FuncDecl, Diagnostic> {
        let span = self.span();
        self.expect(&TokenKind::Func, "'func'")?;
        let name = self.parse_ident("function name")?;

        self.expect(&TokenKind::LParen, "'('")?;
        let mut params = Vec::new();
        if !self.eat(&TokenKind::RParen) {
            loop {
                let pname = self.parse_ident("parameter name")?;
                self.expect(&TokenKind::Colon, "':'")?;
                let ty = self.parse_type()?;
                params.push((pname, ty));
                if self.eat(&TokenKind::RParen) {
                    break;
                }
                self.expect(&TokenKind::Comma, "','")?;
            }
        }

        let ret = if self.eat(&TokenKind::Arrow) { self.parse_type()? } else { Ty::Void };

        self.expect(&TokenKind::Colon, "':'")?;
        self.end_of_stmt()?;
        let body = self.parse_block()?;

        Ok(FuncDecl { name, params, ret, body, span })
    }

    fn parse_ident(&mut self, what: &str) -> Result<String, Diagnostic> {
        match self.kind().clone() {
            TokenKind::Ident(s) => {
                self.bump();
                Ok(s)
            }
            other => Err(self.error_here(format!("expected {what}, got {}", describe(&other)))),
        }
    }

    fn parse_type(&mut self) -> Result<Ty, Diagnostic> {
        match self.kind().clone() {
            TokenKind::Ident(s) => match Ty::from_name(&s) {
                Some(ty) => {
                    self.bump();
                    Ok(ty)
                }
                None => Err(self.error_here(format!("expected type, got '{s}'"))),
            },
            other => Err(self.error_here(format!("expected type, got {}", describe(&other)))),
        }
    }

    fn parse_block(&mut self) -> Result<Block, Diagnostic> {
        self.expect(&TokenKind::Indent, "indented block")?;
        let mut stmts = Vec::new();
        while !self.at(&TokenKind::Dedent) {
            if self.at(&TokenKind::Eof) {
                return Err(self.error_here("unexpected end of file in block"));
            }
            if self.eat(&TokenKind::Newline) {
                continue;
            }
            stmts.push(self.parse_statement()?);
        }
        self.expect(&TokenKind::Dedent, "end of block")?;
        Ok(Block { stmts })
    }

    fn parse_statement(&mut self) -> Result<Stmt, Diagnostic> {
        let span = self.span();

        // `name: type = expr` declares; lookahead separates it from `name = expr`.
        if matches!(self.kind(), TokenKind::Ident(_))
            && matches!(self.toks.get(self.pos + 1).map(|t| &t.kind), Some(TokenKind::Colon))
        {
            return self.parse_var_decl(span);
        }

        match self.kind().clone() {
            TokenKind::Give => self.parse_return(span),
            TokenKind::When => self.parse_when(span),
            TokenKind::While => self.parse_while(span),
            TokenKind::Loop | TokenKind::Repeat => self.parse_loop(span),
            TokenKind::Break => {
                self.bump();
                if self.loop_depth == 0 {
                    return Err(Diagnostic::new(
                        DiagKind::Parse,
                        span.line,
                        span.col,
                        "break outside of loop",
                    ));
                }
                self.end_of_stmt()?;
                Ok(Stmt { kind: StmtKind::Break, span })
            }
            TokenKind::Continue => {
                self.bump();
                if self.loop_depth == 0 {
                    return Err(Diagnostic::new(
                        DiagKind::Parse,
                        span.line,
                        span.col,
                        "continue outside of loop",
                    ));
                }
                self.end_of_stmt()?;
                Ok(Stmt { kind: StmtKind::Continue, span })
            }
            TokenKind::Ident(name)
                if (name == "write" || name == "writeln")
                    && matches!(
                        self.toks.get(self.pos + 1).map(|t| &t.kind),
                        Some(TokenKind::LParen)
                    ) =>
            {
                self.parse_write(span, name == "writeln")
            }
            _ => {
                let expr = self.parse_expression()?;
                if self.eat(&TokenKind::Assign) {
                    let name = match expr.kind {
                        ExprKind::Ident(name) => name,
                        _ => {
                            return Err(Diagnostic::new(
                                DiagKind::Parse,
                                expr.span.line,
                                expr.span.col,
                                "assignment target must be an identifier",
                            ))
                        }
                    };
                    let value = self.parse_expression()?;
                    self.end_of_stmt()?;
                    // Reads are typed by their destination; route them to the
                    // dedicated statement.
                    if let ExprKind::Builtin(kind) = value.kind {
                        if kind != BuiltinKind::ReadFailed {
                            return Ok(Stmt { kind: StmtKind::ReadTo { name, kind }, span });
                        }
                    }
                    return Ok(Stmt { kind: StmtKind::Assign { name, value }, span });
                }
                self.end_of_stmt()?;
                Ok(Stmt { kind: StmtKind::Expr(expr), span })
            }
        }
    }

    fn parse_var_decl(&mut self, span: Span) -> Result<Stmt, Diagnostic> {
        let name = self.parse_ident("variable name")?;
        self.expect(&TokenKind::Colon, "':'")?;
        let ty = self.parse_type()?;
        self.expect(&TokenKind::Assign, "'=' (declarations require an initializer)")?;
        let init = self.parse_expression()?;
        self.end_of_stmt()?;
        Ok(Stmt { kind: StmtKind::VarDecl { name, ty, init }, span })
    }

    fn parse_return(&mut self, span: Span) -> Result<Stmt, Diagnostic> {
        self.expect(&TokenKind::Give, "'give'")?;
        let value = if matches!(self.kind(), TokenKind::Newline | TokenKind::Dedent | TokenKind::Eof)
        {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.end_of_stmt()?;
        Ok(Stmt { kind: StmtKind::Return(value), span })
    }

    fn parse_when(&mut self, span: Span) -> Result<Stmt, Diagnostic> {
        self.expect(&TokenKind::When, "'when'")?;
        let cond = self.parse_expression()?;
        self.expect(&TokenKind::Colon, "':'")?;
        self.end_of_stmt()?;
        let then_block = self.parse_block()?;

        let mut else_block = None;
        if self.eat(&TokenKind::Else) {
            if self.at(&TokenKind::When) {
                let chained_span = self.span();
                let chained = self.parse_when(chained_span)?;
                else_block = Some(Block { stmts: vec![chained] });
            } else {
                self.expect(&TokenKind::Colon, "':'")?;
                self.end_of_stmt()?;
                else_block = Some(self.parse_block()?);
            }
        }

        Ok(Stmt { kind: StmtKind::If { cond, then_block, else_block }, span })
    }

    fn parse_while(&mut self, span: Span) -> Result<Stmt, Diagnostic> {
        self.expect(&TokenKind::While, "'while'")?;
        let cond = self.parse_expression()?;
        self.expect(&TokenKind::Colon, "':'")?;
        self.end_of_stmt()?;
        self.loop_depth += 1;
        let body = self.parse_block();
        self.loop_depth -= 1;
        Ok(Stmt { kind: StmtKind::While { cond, body: body? }, span })
    }

    fn parse_loop(&mut self, span: Span) -> Result<Stmt, Diagnostic> {
        self.bump(); // `loop` or `repeat`
        self.expect(&TokenKind::Colon, "':'")?;
        self.end_of_stmt()?;
        self.loop_depth += 1;
        let body = self.parse_block();
        self.loop_depth -= 1;
        Ok(Stmt { kind: StmtKind::Loop { body: body? }, span })
    }

    fn parse_write(&mut self, span: Span, newline: bool) -> Result<Stmt, Diagnostic> {
        self.bump(); // `write` / `writeln`
        self.expect(&TokenKind::LParen, "'('")?;
        let value = self.parse_expression()?;
        self.expect(&TokenKind::RParen, "')'")?;
        self.end_of_stmt()?;
        Ok(Stmt { kind: StmtKind::Write { value, newline }, span })
    }

    fn parse_expression(&mut self) -> Result<Expr, Diagnostic> {
        self.parse_comparison()
    }

    /// Comparisons sit at the lowest precedence and do not chain.
    fn parse_comparison(&mut self) -> Result<Expr, Diagnostic> {
        let lhs = self.parse_bit_or()?;
        let op = match self.kind() {
            TokenKind::Eq => BinOp::Eq,
            TokenKind::Ne => BinOp::Ne,
            TokenKind::Lt => BinOp::Lt,
            TokenKind::Le => BinOp::Le,
            TokenKind::Gt => BinOp::Gt,
            TokenKind::Ge => BinOp::Ge,
            _ => return Ok(lhs),
        };
        let op_span = self.span();
        self.bump();
        let rhs = self.parse_bit_or()?;
        if matches!(
            self.kind(),
            TokenKind::Eq | TokenKind::Ne | TokenKind::Lt | TokenKind::Le | TokenKind::Gt | TokenKind::Ge
        ) {
            return Err(self.error_here("comparison operators cannot be chained"));
        }
        Ok(Expr {
            kind: ExprKind::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) },
            span: op_span,
        })
    }

    fn parse_bit_or(&mut self) -> Result<Expr, Diagnostic> {
        let mut node = self.parse_bit_xor()?;
        while self.at(&TokenKind::Pipe) {
            let span = self.span();
            self.bump();
            let rhs = self.parse_bit_xor()?;
            node = binary(BinOp::BitOr, node, rhs, span);
        }
        Ok(node)
    }

    fn parse_bit_xor(&mut self) -> Result<Expr, Diagnostic> {
        let mut node = self.parse_bit_and()?;
        while self.at(&TokenKind::Caret) {
            let span = self.span();
            self.bump();
            let rhs = self.parse_bit_and()?;
            node = binary(BinOp::BitXor, node, rhs, span);
        }
        Ok(node)
    }

    fn parse_bit_and(&mut self) -> Result<Expr, Diagnostic> {
        let mut node = self.parse_shift()?;
        while self.at(&TokenKind::Amp) {
            let span = self.span();
            self.bump();
            let rhs = self.parse_shift()?;
            node = binary(BinOp::BitAnd, node, rhs, span);
        }
        Ok(node)
    }

    fn parse_shift(&mut self) -> Result<Expr, Diagnostic> {
        let mut node = self.parse_additive()?;
        loop {
            let op = match self.kind() {
                TokenKind::Shl => BinOp::Shl,
                TokenKind::Shr => BinOp::Shr,
                _ => break,
            };
            let span = self.span();
            self.bump();
            let rhs = self.parse_additive()?;
            node = binary(op, node, rhs, span);
        }
        Ok(node)
    }

    fn parse_additive(&mut self) -> Result<Expr, Diagnostic> {
        let mut node = self.parse_multiplicative()?;
        loop {
            let op = match self.kind() {
                TokenKind::Plus => BinOp::Add,
                TokenKind::Minus => BinOp::Sub,
                _ => break,
            };
            let span = self.span();
            self.bump();
            let rhs = self.parse_multiplicative()?;
            node = binary(op, node, rhs, span);
        }
        Ok(node)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, Diagnostic> {
        let mut node = self.parse_unary()?;
        loop {
            let op = match self.kind() {
                TokenKind::Star => BinOp::Mul,
                TokenKind::Slash => BinOp::Div,
                TokenKind::Percent => BinOp::Rem,
                _ => break,
            };
            let span = self.span();
            self.bump();
            let rhs = self.parse_unary()?;
            node = binary(op, node, rhs, span);
        }
        Ok(node)
    }

    fn parse_unary(&mut self) -> Result<Expr, Diagnostic> {
        let span = self.span();
        if self.eat(&TokenKind::Minus) {
            let operand = self.parse_unary()?;
            return Ok(Expr { kind: ExprKind::Unary { op: UnOp::Neg, operand: Box::new(operand) }, span });
        }
        if self.eat(&TokenKind::Bang) {
            let operand = self.parse_unary()?;
            return Ok(Expr { kind: ExprKind::Unary { op: UnOp::Not, operand: Box::new(operand) }, span });
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, Diagnostic> {
        let span = self.span();
        match self.kind().clone() {
            TokenKind::Int { value, radix } => {
                self.bump();
                Ok(Expr { kind: ExprKind::Int { value, radix }, span })
            }
            TokenKind::Str(bytes) => {
                self.bump();
                Ok(Expr { kind: ExprKind::Str(bytes), span })
            }
            TokenKind::True => {
                self.bump();
                Ok(Expr { kind: ExprKind::Bool(true), span })
            }
            TokenKind::False => {
                self.bump();
                Ok(Expr { kind: ExprKind::Bool(false), span })
            }
            TokenKind::LParen => {
                self.bump();
                let e = self.parse_expression()?;
                self.expect(&TokenKind::RParen, "')'")?;
                Ok(e)
            }
            TokenKind::Ident(name) => {
                self.bump();
                if self.at(&TokenKind::LParen) {
                    if let Some(kind) = builtin_kind(&name) {
                        self.bump();
                        self.expect(&TokenKind::RParen, "')'")?;
                        return Ok(Expr { kind: ExprKind::Builtin(kind), span });
                    }
                    self.bump();
                    let mut args = Vec::new();
                    if !self.eat(&TokenKind::RParen) {
                        loop {
                            args.push(self.parse_expression()?);
                            if self.eat(&TokenKind::RParen) {
                                break;
                            }
                            self.expect(&TokenKind::Comma, "','")?;
                        }
                    }
                    return Ok(Expr { kind: ExprKind::Call { name, args }, span });
                }
                Ok(Expr { kind: ExprKind::Ident(name), span })
            }
            other => {
                Err(self.error_here(format!("unexpected token in expression: {}", describe(&other))))
            }
        }
    }
}

fn binary(op: BinOp, lhs: Expr, rhs: Expr, span: Span) -> Expr {
    Expr { kind: ExprKind::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) }, span }
}

fn builtin_kind(name: &str) -> Option<BuiltinKind> {
    Some(match name {
        "read" => BuiltinKind::Read,
        "readln" => BuiltinKind::Readln,
        "readchar" => BuiltinKind::Readchar,
        "read_failed" => BuiltinKind::ReadFailed,
        _ => return None,
    })
}

fn describe(kind: &TokenKind) -> String {
    match kind {
        TokenKind::Ident(s) => format!("identifier '{s}'"),
        TokenKind::Int { value, .. } => format!("integer {value}"),
        TokenKind::Str(_) => "string literal".to_string(),
        TokenKind::Newline => "newline".to_string(),
        TokenKind::Indent => "indent".to_string(),
        TokenKind::Dedent => "dedent".to_string(),
        TokenKind::Eof => "end of file".to_string(),
        TokenKind::Func => "'func'".to_string(),
        TokenKind::Give => "'give'".to_string(),
        TokenKind::When => "'when'".to_string(),
        TokenKind::Else => "'else'".to_string(),
        TokenKind::While => "'while'".to_string(),
        TokenKind::Loop => "'loop'".to_string(),
        TokenKind::Repeat => "'repeat'".to_string(),
        TokenKind::Break => "'break'".to_string(),
        TokenKind::Continue => "'continue'".to_string(),
        TokenKind::Mode => "'mode'".to_string(),
        TokenKind::True => "'True'".to_string(),
        TokenKind::False => "'False'".to_string(),
        TokenKind::Plus => "'+'".to_string(),
        TokenKind::Minus => "'-'".to_string(),
        TokenKind::Star => "'*'".to_string(),
        TokenKind::Slash => "'/'".to_string(),
        TokenKind::Percent => "'%'".to_string(),
        TokenKind::Amp => "'&'".to_string(),
        TokenKind::Pipe => "'|'".to_string(),
        TokenKind::Caret => "'^'".to_string(),
        TokenKind::Shl => "'<<'".to_string(),
        TokenKind::Shr => "'>>'".to_string(),
        TokenKind::Eq => "'=='".to_string(),
        TokenKind::Ne => "'!='".to_string(),
        TokenKind::Lt => "'<'".to_string(),
        TokenKind::Le => "'<='".to_string(),
        TokenKind::Gt => "'>'".to_string(),
        TokenKind::Ge => "'>='".to_string(),
        TokenKind::Bang => "'!'".to_string(),
        TokenKind::Assign => "'='".to_string(),
        TokenKind::Arrow => "'->'".to_string(),
        TokenKind::Colon => "':'".to_string(),
        TokenKind::LParen => "'('".to_string(),
        TokenKind::RParen => "')'".to_string(),
        TokenKind::Comma => "','".to_string(),
    }
}
