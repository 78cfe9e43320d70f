//! Name resolution, type checking and frame layout.
//!
//! The analyzer walks the parse tree once and produces a checked program:
//! every expression carries its type, every variable is a frame offset, and
//! string literals live in a deduplicated per-module table. The backend never
//! sees names of locals again.

use std::collections::HashMap;

use crate::ast::{self, BinOp, BuiltinKind, Span, Ty, UnOp};
use crate::diag::{DiagKind, Diagnostic};

#[derive(Debug, Clone)]
pub struct CheckedProgram {
    pub funcs: Vec<CheckedFunc>,
    /// String literal bytes, indexed by `TExprKind::Str`. Labels are assigned
    /// by the backend as `.L.str.N`.
    pub strings: Vec<Vec<u8>>,
}

#[derive(Debug, Clone)]
pub struct CheckedFunc {
    pub name: String,
    pub params: Vec<Slot>,
    pub ret: Ty,
    /// Stack frame size, always a multiple of 16.
    pub frame_size: u32,
    pub body: Vec<TStmt>,
}

/// A parameter or local pinned to a negative rbp offset.
#[derive(Debug, Clone)]
pub struct Slot {
    pub name: String,
    pub ty: Ty,
    pub offset: i32,
}

#[derive(Debug, Clone)]
pub enum TStmt {
    Assign { offset: i32, ty: Ty, value: TExpr },
    If { cond: TExpr, then_body: Vec<TStmt>, else_body: Option<Vec<TStmt>> },
    While { cond: TExpr, body: Vec<TStmt> },
    Loop { body: Vec<TStmt> },
    Break,
    Continue,
    Return(Option<TExpr>),
    Expr(TExpr),
    Write { value: TExpr, newline: bool },
}

#[derive(Debug, Clone)]
pub struct TExpr {
    pub kind: TExprKind,
    pub ty: Ty,
}

#[derive(Debug, Clone)]
pub enum TExprKind {
    Int(i64),
    Bool(bool),
    Str(usize),
    Local { offset: i32 },
    Unary { op: UnOp, operand: Box<TExpr> },
    Binary { op: BinOp, lhs: Box<TExpr>, rhs: Box<TExpr> },
    Call { name: String, args: Vec<TExpr> },
    /// read()/readln()/readchar(); `ty` is the destination type.
    Read(BuiltinKind),
    ReadFailed,
}

struct FuncSig {
    params: Vec<Ty>,
    ret: Ty,
    span: Span,
}

struct Scope {
    symbols: HashMap<String, Slot>,
}

pub fn analyze(program: &ast::Program) -> Result<CheckedProgram, Diagnostic> {
    let mut funcs: HashMap<String, FuncSig> = HashMap::new();
    for f in &program.funcs {
        if funcs.contains_key(&f.name) {
            return Err(err(DiagKind::Name, f.span, format!("duplicate function definition: {}", f.name)));
        }
        if f.params.len() > 6 {
            return Err(err(
                DiagKind::Arity,
                f.span,
                format!("function '{}' has more than 6 parameters", f.name),
            ));
        }
        funcs.insert(
            f.name.clone(),
            FuncSig { params: f.params.iter().map(|(_, t)| *t).collect(), ret: f.ret, span: f.span },
        );
    }

    match funcs.get("main") {
        None => {
            return Err(Diagnostic::new(
                DiagKind::Name,
                1,
                1,
                "compile mode requires a 'func main()' definition",
            ))
        }
        Some(sig) => {
            if !sig.params.is_empty() || sig.ret != Ty::I32 {
                return Err(err(DiagKind::Type, sig.span, "'main' must take no parameters and give i32"));
            }
        }
    }

    let mut an = Analyzer { funcs, scopes: Vec::new(), frame_top: 0, ret: Ty::Void, strings: Vec::new() };
    let mut checked = Vec::new();
    for f in &program.funcs {
        checked.push(an.check_function(f)?);
    }
    log::debug!("checked {} functions, {} string literals", checked.len(), an.strings.len());
    Ok(CheckedProgram { funcs: checked, strings: an.strings })
}

struct Analyzer {
    funcs: HashMap<String, FuncSig>,
    scopes: Vec<Scope>,
    /// Bytes of frame consumed so far (positive; slot offsets are negated).
    frame_top: u32,
    ret: Ty,
    strings: Vec<Vec<u8>>,
}

fn err(kind: DiagKind, span: Span, msg: impl Into<String>) -> Diagnostic {
    Diagnostic::new(kind, span.line, span.col, msg)
}

fn align_to(offset: u32, alignment: u32) -> u32 {
    (offset + alignment - 1) / alignment * alignment
}

impl Analyzer {
    fn check_function(&mut self, f: &ast::FuncDecl) -> Result<CheckedFunc, Diagnostic> {
        self.frame_top = 0;
        self.ret = f.ret;
        self.scopes.clear();
        self.scopes.push(Scope { symbols: HashMap::new() });

        let mut params = Vec::new();
        for (name, ty) in &f.params {
            if *ty == Ty::Void {
                return Err(err(DiagKind::Type, f.span, format!("parameter '{name}' cannot be void")));
            }
            let slot = self.define(name, *ty, f.span)?;
            params.push(slot);
        }

        let body = self.check_block(&f.body)?;
        self.scopes.pop();

        let frame_size = align_to(self.frame_top, 16);
        Ok(CheckedFunc { name: f.name.clone(), params, ret: f.ret, frame_size, body })
    }

    fn define(&mut self, name: &str, ty: Ty, span: Span) -> Result<Slot, Diagnostic> {
        let scope = self.scopes.last_mut().expect("scope stack is never empty");
        if scope.symbols.contains_key(name) {
            return Err(err(DiagKind::Name, span, format!("'{name}' is already defined in this scope")));
        }
        let align = ty.size().min(8);
        self.frame_top = align_to(self.frame_top, align) + ty.size();
        let slot = Slot { name: name.to_string(), ty, offset: -(self.frame_top as i32) };
        scope.symbols.insert(name.to_string(), slot.clone());
        Ok(slot)
    }

    fn lookup(&self, name: &str, span: Span) -> Result<&Slot, Diagnostic> {
        for scope in self.scopes.iter().rev() {
            if let Some(slot) = scope.symbols.get(name) {
                return Ok(slot);
            }
        }
        Err(err(DiagKind::Name, span, format!("undefined variable: {name}")))
    }

    fn intern(&mut self, bytes: &[u8]) -> usize {
        if let Some(idx) = self.strings.iter().position(|s| s == bytes) {
            return idx;
        }
        self.strings.push(bytes.to_vec());
        self.strings.len() - 1
    }

    fn check_block(&mut self, block: &ast::Block) -> Result<Vec<TStmt>, Diagnostic> {
        self.scopes.push(Scope { symbols: HashMap::new() });
        let mut out = Vec::new();
        for stmt in &block.stmts {
            out.push(self.check_stmt(stmt)?);
        }
        self.scopes.pop();
        Ok(out)
    }

    fn check_stmt(&mut self, stmt: &ast::Stmt) -> Result<TStmt, Diagnostic> {
        let span = stmt.span;
        match &stmt.kind {
            ast::StmtKind::VarDecl { name, ty, init } => {
                if *ty == Ty::Void {
                    return Err(err(DiagKind::Type, span, format!("variable '{name}' cannot be void")));
                }
                let value = self.check_expr(init, Some(*ty))?;
                if value.ty != *ty {
                    return Err(err(
                        DiagKind::Type,
                        span,
                        format!("type mismatch in '{name}': expected {}, got {}", ty.name(), value.ty.name()),
                    ));
                }
                let slot = self.define(name, *ty, span)?;
                Ok(TStmt::Assign { offset: slot.offset, ty: *ty, value })
            }
            ast::StmtKind::Assign { name, value } => {
                let (offset, ty) = {
                    let slot = self.lookup(name, span)?;
                    (slot.offset, slot.ty)
                };
                let value = self.check_expr(value, Some(ty))?;
                if value.ty != ty {
                    return Err(err(
                        DiagKind::Type,
                        span,
                        format!(
                            "type mismatch in assignment to '{name}': expected {}, got {}",
                            ty.name(),
                            value.ty.name()
                        ),
                    ));
                }
                Ok(TStmt::Assign { offset, ty, value })
            }
            ast::StmtKind::ReadTo { name, kind } => {
                let (offset, ty) = {
                    let slot = self.lookup(name, span)?;
                    (slot.offset, slot.ty)
                };
                let read_ty = self.read_result_ty(*kind, Some(ty), span)?;
                Ok(TStmt::Assign {
                    offset,
                    ty,
                    value: TExpr { kind: TExprKind::Read(*kind), ty: read_ty },
                })
            }
            ast::StmtKind::If { cond, then_block, else_block } => {
                let cond = self.check_cond(cond, "when")?;
                let then_body = self.check_block(then_block)?;
                let else_body = match else_block {
                    Some(b) => Some(self.check_block(b)?),
                    None => None,
                };
                Ok(TStmt::If { cond, then_body, else_body })
            }
            ast::StmtKind::While { cond, body } => {
                let cond = self.check_cond(cond, "while")?;
                let body = self.check_block(body)?;
                Ok(TStmt::While { cond, body })
            }
            ast::StmtKind::Loop { body } => Ok(TStmt::Loop { body: self.check_block(body)? }),
            ast::StmtKind::Break => Ok(TStmt::Break),
            ast::StmtKind::Continue => Ok(TStmt::Continue),
            ast::StmtKind::Return(value) => match value {
                Some(e) => {
                    if self.ret == Ty::Void {
                        return Err(err(DiagKind::Type, span, "void function cannot give a value"));
                    }
                    let value = self.check_expr(e, Some(self.ret))?;
                    if value.ty != self.ret {
                        return Err(err(
                            DiagKind::Type,
                            span,
                            format!("give type mismatch: expected {}, got {}", self.ret.name(), value.ty.name()),
                        ));
                    }
                    Ok(TStmt::Return(Some(value)))
                }
                None => {
                    if self.ret != Ty::Void {
                        return Err(err(
                            DiagKind::Type,
                            span,
                            format!("function must give a value of type {}", self.ret.name()),
                        ));
                    }
                    Ok(TStmt::Return(None))
                }
            },
            ast::StmtKind::Expr(e) => {
                // Statement position is the one place a void call is legal.
                if let ast::ExprKind::Call { name, args } = &e.kind {
                    let call = self.check_call(name, args, e.span, true)?;
                    return Ok(TStmt::Expr(call));
                }
                Ok(TStmt::Expr(self.check_expr(e, None)?))
            }
            ast::StmtKind::Write { value, newline } => {
                let value = self.check_expr(value, None)?;
                if !(value.ty.is_integer() || value.ty == Ty::Bool || value.ty == Ty::Str) {
                    return Err(err(
                        DiagKind::Type,
                        span,
                        format!("cannot write value of type {}", value.ty.name()),
                    ));
                }
                Ok(TStmt::Write { value, newline: *newline })
            }
        }
    }

    fn check_cond(&mut self, cond: &ast::Expr, stmt: &str) -> Result<TExpr, Diagnostic> {
        let c = self.check_expr(cond, None)?;
        if c.ty != Ty::Bool {
            return Err(err(
                DiagKind::Type,
                cond.span,
                format!("condition of '{stmt}' must be bool, got {}", c.ty.name()),
            ));
        }
        Ok(c)
    }

    /// Type an expression. `expected` lets bare integer literals adopt the
    /// type the context demands (declarations, the other operand of a binary
    /// op, call arguments, give values, shift counts).
    fn check_expr(&mut self, expr: &ast::Expr, expected: Option<Ty>) -> Result<TExpr, Diagnostic> {
        let span = expr.span;
        match &expr.kind {
            ast::ExprKind::Int { value, .. } => {
                let ty = match expected {
                    Some(t) if t.is_integer() => t,
                    _ => Ty::I32,
                };
                if !literal_fits(*value, ty) {
                    return Err(err(
                        DiagKind::Range,
                        span,
                        format!("literal {value} is out of range for {}", ty.name()),
                    ));
                }
                Ok(TExpr { kind: TExprKind::Int(*value as i64), ty })
            }
            ast::ExprKind::Bool(b) => Ok(TExpr { kind: TExprKind::Bool(*b), ty: Ty::Bool }),
            ast::ExprKind::Str(bytes) => {
                let idx = self.intern(bytes);
                Ok(TExpr { kind: TExprKind::Str(idx), ty: Ty::Str })
            }
            ast::ExprKind::Ident(name) => {
                let slot = self.lookup(name, span)?;
                Ok(TExpr { kind: TExprKind::Local { offset: slot.offset }, ty: slot.ty })
            }
            ast::ExprKind::Unary { op: UnOp::Neg, operand } => {
                // `-literal` folds so the negative range of each width stays
                // reachable.
                if let ast::ExprKind::Int { value, .. } = &operand.kind {
                    let ty = match expected {
                        Some(t) if t.is_signed() => t,
                        _ => Ty::I32,
                    };
                    let limit = 1u64 << (ty.size() * 8 - 1);
                    if *value > limit {
                        return Err(err(
                            DiagKind::Range,
                            span,
                            format!("literal -{value} is out of range for {}", ty.name()),
                        ));
                    }
                    let v = (*value as i128).wrapping_neg() as i64;
                    return Ok(TExpr { kind: TExprKind::Int(v), ty });
                }
                let operand = self.check_expr(operand, expected.filter(|t| t.is_signed()))?;
                if !operand.ty.is_signed() {
                    return Err(err(
                        DiagKind::Type,
                        span,
                        format!("unary minus requires a signed integer, got {}", operand.ty.name()),
                    ));
                }
                let ty = operand.ty;
                Ok(TExpr { kind: TExprKind::Unary { op: UnOp::Neg, operand: Box::new(operand) }, ty })
            }
            ast::ExprKind::Unary { op: UnOp::Not, operand } => {
                let operand = self.check_expr(operand, None)?;
                if operand.ty != Ty::Bool {
                    return Err(err(
                        DiagKind::Type,
                        span,
                        format!("unary '!' requires bool, got {}", operand.ty.name()),
                    ));
                }
                Ok(TExpr { kind: TExprKind::Unary { op: UnOp::Not, operand: Box::new(operand) }, ty: Ty::Bool })
            }
            ast::ExprKind::Binary { op, lhs, rhs } => self.check_binary(*op, lhs, rhs, span, expected),
            ast::ExprKind::Call { name, args } => {
                let call = self.check_call(name, args, span, false)?;
                Ok(call)
            }
            ast::ExprKind::Builtin(BuiltinKind::ReadFailed) => {
                Ok(TExpr { kind: TExprKind::ReadFailed, ty: Ty::Bool })
            }
            ast::ExprKind::Builtin(kind) => {
                let ty = self.read_result_ty(*kind, expected, span)?;
                Ok(TExpr { kind: TExprKind::Read(*kind), ty })
            }
        }
    }

    fn check_binary(
        &mut self,
        op: BinOp,
        lhs: &ast::Expr,
        rhs: &ast::Expr,
        span: Span,
        expected: Option<Ty>,
    ) -> Result<TExpr, Diagnostic> {
        if matches!(op, BinOp::Shl | BinOp::Shr) {
            let lhs = self.check_expr(lhs, expected.filter(|t| t.is_integer()))?;
            if !lhs.ty.is_integer() {
                return Err(err(
                    DiagKind::Type,
                    span,
                    format!("shift operator '{}' requires integer types, got {}", op.symbol(), lhs.ty.name()),
                ));
            }
            let rhs = self.check_expr(rhs, Some(Ty::U8))?;
            if !rhs.ty.is_unsigned() {
                return Err(err(
                    DiagKind::Type,
                    span,
                    format!("shift amount must be unsigned, got {}", rhs.ty.name()),
                ));
            }
            let ty = lhs.ty;
            return Ok(TExpr {
                kind: TExprKind::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) },
                ty,
            });
        }

        // Check the rigid side first so a bare literal can adopt its type.
        let (lhs, rhs) = if is_flexible_literal(lhs) && !is_flexible_literal(rhs) {
            let r = self.check_expr(rhs, expected)?;
            let l = self.check_expr(lhs, Some(r.ty))?;
            (l, r)
        } else {
            let l = self.check_expr(lhs, expected)?;
            let r = self.check_expr(rhs, Some(l.ty))?;
            (l, r)
        };

        if lhs.ty != rhs.ty {
            return Err(err(
                DiagKind::Type,
                span,
                format!("type mismatch in '{}': {} vs {}", op.symbol(), lhs.ty.name(), rhs.ty.name()),
            ));
        }

        if op.is_comparison() {
            if !(lhs.ty.is_integer() || lhs.ty == Ty::Bool) {
                return Err(err(
                    DiagKind::Type,
                    span,
                    format!("comparison '{}' requires integer or bool types, got {}", op.symbol(), lhs.ty.name()),
                ));
            }
            return Ok(TExpr {
                kind: TExprKind::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) },
                ty: Ty::Bool,
            });
        }

        if !lhs.ty.is_integer() {
            return Err(err(
                DiagKind::Type,
                span,
                format!("operator '{}' requires integer types, got {}", op.symbol(), lhs.ty.name()),
            ));
        }
        let ty = lhs.ty;
        Ok(TExpr { kind: TExprKind::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) }, ty })
    }

    fn check_call(
        &mut self,
        name: &str,
        args: &[ast::Expr],
        span: Span,
        stmt_position: bool,
    ) -> Result<TExpr, Diagnostic> {
        let (param_tys, ret) = match self.funcs.get(name) {
            Some(sig) => (sig.params.clone(), sig.ret),
            None => return Err(err(DiagKind::Name, span, format!("undefined function: {name}"))),
        };
        if args.len() != param_tys.len() {
            return Err(err(
                DiagKind::Arity,
                span,
                format!("function '{name}' expects {} arguments, got {}", param_tys.len(), args.len()),
            ));
        }
        let mut targs = Vec::new();
        for (i, (arg, want)) in args.iter().zip(&param_tys).enumerate() {
            let t = self.check_expr(arg, Some(*want))?;
            if t.ty != *want {
                return Err(err(
                    DiagKind::Type,
                    arg.span,
                    format!(
                        "argument {} to '{name}': expected {}, got {}",
                        i + 1,
                        want.name(),
                        t.ty.name()
                    ),
                ));
            }
            targs.push(t);
        }
        if ret == Ty::Void && !stmt_position {
            return Err(err(DiagKind::Type, span, format!("void function '{name}' used in expression")));
        }
        Ok(TExpr { kind: TExprKind::Call { name: name.to_string(), args: targs }, ty: ret })
    }

    fn read_result_ty(
        &self,
        kind: BuiltinKind,
        expected: Option<Ty>,
        span: Span,
    ) -> Result<Ty, Diagnostic> {
        match kind {
            BuiltinKind::Readchar => match expected {
                Some(Ty::Str) => {
                    Err(err(DiagKind::Type, span, "readchar() cannot target str, use read() or readln()"))
                }
                Some(t) if t != Ty::I32 => {
                    Err(err(DiagKind::Type, span, format!("readchar() gives i32, not {}", t.name())))
                }
                _ => Ok(Ty::I32),
            },
            BuiltinKind::Read | BuiltinKind::Readln => match expected {
                None => Ok(Ty::Str),
                Some(t) if t.is_integer() || t == Ty::Str => Ok(t),
                Some(t) => {
                    let name = if kind == BuiltinKind::Read { "read" } else { "readln" };
                    Err(err(
                        DiagKind::Type,
                        span,
                        format!("{name}() can only target integer or str types, not {}", t.name()),
                    ))
                }
            },
            BuiltinKind::ReadFailed => Ok(Ty::Bool),
        }
    }
}

fn is_flexible_literal(e: &ast::Expr) -> bool {
    match &e.kind {
        ast::ExprKind::Int { .. } => true,
        ast::ExprKind::Unary { op: UnOp::Neg, operand } => {
            matches!(operand.kind, ast::ExprKind::Int { .. })
        }
        _ => false,
    }
}

fn literal_fits(value: u64, ty: Ty) -> bool {
    match ty {
        Ty::I8 => value <= i8::MAX as u64,
        Ty::I16 => value <= i16::MAX as u64,
        Ty::I32 => value <= i32::MAX as u64,
        Ty::I64 => value <= i64::MAX as u64,
        Ty::U8 => value <= u8::MAX as u64,
        Ty::U16 => value <= u16::MAX as u64,
        Ty::U32 => value <= u32::MAX as u64,
        Ty::U64 => true,
        _ => false,
    }
}
