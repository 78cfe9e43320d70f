//! Lowering from the checked AST to abstract x86-64 instructions.
//!
//! Calling convention is System V AMD64: integer arguments in rdi, rsi, rdx,
//! rcx, r8, r9, return value in rax. Expression results always land in the
//! sized accumulator (al/ax/eax/rax); binary operators save the left side on
//! the machine stack while the right side evaluates, so no statement ever
//! leaks stack space.

use axis_frontend::ast::{BinOp, BuiltinKind, Ty, UnOp};
use axis_frontend::sema::{CheckedFunc, CheckedProgram, TExpr, TExprKind, TStmt};

use crate::insn::{AbsSource, AluOp, Cond, Inst, Mem, Reg, ShiftOp, Width};

pub const READ_FAILED_SYM: &str = "_read_failed";

const ARG_REGS: [Reg; 6] = [Reg::Rdi, Reg::Rsi, Reg::Rdx, Reg::Rcx, Reg::R8, Reg::R9];

#[derive(Debug)]
pub struct Lowered {
    pub insts: Vec<Inst>,
    /// Ordered (label, bytes) pairs; every entry is null-terminated.
    pub rodata: Vec<(String, Vec<u8>)>,
    pub needs_read_failed: bool,
}

pub fn lower(program: &CheckedProgram) -> Lowered {
    let mut lw = Lower {
        insts: Vec::new(),
        strings: program.strings.clone(),
        fn_name: String::new(),
        label_counter: 0,
        loop_stack: Vec::new(),
        needs_read_failed: false,
    };

    lw.emit_start_stub();
    for f in &program.funcs {
        lw.lower_function(f);
    }

    let rodata = lw
        .strings
        .iter()
        .enumerate()
        .map(|(i, s)| {
            let mut bytes = s.clone();
            bytes.push(0);
            (str_label(i), bytes)
        })
        .collect();

    Lowered { insts: lw.insts, rodata, needs_read_failed: lw.needs_read_failed }
}

pub fn str_label(index: usize) -> String {
    format!(".L.str.{index}")
}

struct Lower {
    insts: Vec<Inst>,
    strings: Vec<Vec<u8>>,
    fn_name: String,
    label_counter: u32,
    /// (continue target, break target) per enclosing loop.
    loop_stack: Vec<(String, String)>,
    needs_read_failed: bool,
}

/// Width the value of a type occupies in its stack slot.
fn store_width(ty: Ty) -> Width {
    Width::from_size(ty.size())
}

/// Width arithmetic on a type happens at: everything at or below 32 bits is
/// computed in eax.
fn op_width(ty: Ty) -> Width {
    if ty.size() == 8 {
        Width::Qword
    } else {
        Width::Dword
    }
}

impl Lower {
    fn emit(&mut self, inst: Inst) {
        self.insts.push(inst);
    }

    fn label(&mut self, name: String) {
        self.insts.push(Inst::Label(name));
    }

    fn fresh(&mut self, hint: &str) -> String {
        let n = self.label_counter;
        self.label_counter += 1;
        format!(".L{}_{}_{}", self.fn_name, hint, n)
    }

    fn intern(&mut self, bytes: &[u8]) -> String {
        if let Some(idx) = self.strings.iter().position(|s| s == bytes) {
            return str_label(idx);
        }
        self.strings.push(bytes.to_vec());
        str_label(self.strings.len() - 1)
    }

    /// The 16-byte entry stub: exit(main()).
    fn emit_start_stub(&mut self) {
        self.label("_start".to_string());
        self.emit(Inst::Alu { op: AluOp::Xor, size: Width::Dword, dst: Reg::Rdi, src: Reg::Rdi });
        self.emit(Inst::Call("main".to_string()));
        self.emit(Inst::MovRR { size: Width::Dword, dst: Reg::Rdi, src: Reg::Rax });
        self.emit(Inst::MovRI { size: Width::Dword, dst: Reg::Rax, imm: 60 });
        self.emit(Inst::Syscall);
    }

    fn epilogue_label(&self) -> String {
        format!(".L{}_epilogue", self.fn_name)
    }

    fn lower_function(&mut self, f: &CheckedFunc) {
        self.fn_name = f.name.clone();
        self.label_counter = 0;

        self.label(f.name.clone());
        self.emit(Inst::Push(Reg::Rbp));
        self.emit(Inst::MovRR { size: Width::Qword, dst: Reg::Rbp, src: Reg::Rsp });
        if f.frame_size > 0 {
            self.emit(Inst::AluImm {
                op: AluOp::Sub,
                size: Width::Qword,
                dst: Reg::Rsp,
                imm: f.frame_size as i32,
            });
        }

        // Spill register-passed parameters into their slots.
        for (i, p) in f.params.iter().enumerate() {
            self.emit(Inst::Store {
                size: store_width(p.ty),
                dst: Mem::rbp(p.offset),
                src: ARG_REGS[i],
            });
        }

        for stmt in &f.body {
            self.lower_stmt(stmt);
        }

        self.label(self.epilogue_label());
        self.emit(Inst::MovRR { size: Width::Qword, dst: Reg::Rsp, src: Reg::Rbp });
        self.emit(Inst::Pop(Reg::Rbp));
        self.emit(Inst::Ret);
    }

    fn lower_stmt(&mut self, stmt: &TStmt) {
        match stmt {
            TStmt::Assign { offset, ty, value } => {
                self.lower_expr(value);
                self.emit(Inst::Store { size: store_width(*ty), dst: Mem::rbp(*offset), src: Reg::Rax });
            }
            TStmt::If { cond, then_body, else_body } => {
                let end = self.fresh("end");
                self.lower_expr(cond);
                self.emit(Inst::Test { size: Width::Byte, lhs: Reg::Rax, rhs: Reg::Rax });
                match else_body {
                    None => {
                        self.emit(Inst::Jcc { cc: Cond::E, target: end.clone() });
                        for s in then_body {
                            self.lower_stmt(s);
                        }
                    }
                    Some(else_body) => {
                        let els = self.fresh("else");
                        self.emit(Inst::Jcc { cc: Cond::E, target: els.clone() });
                        for s in then_body {
                            self.lower_stmt(s);
                        }
                        self.emit(Inst::Jmp(end.clone()));
                        self.label(els);
                        for s in else_body {
                            self.lower_stmt(s);
                        }
                    }
                }
                self.label(end);
            }
            TStmt::While { cond, body } => {
                let start = self.fresh("while");
                let end = self.fresh("end");
                self.loop_stack.push((start.clone(), end.clone()));
                self.label(start.clone());
                self.lower_expr(cond);
                self.emit(Inst::Test { size: Width::Byte, lhs: Reg::Rax, rhs: Reg::Rax });
                self.emit(Inst::Jcc { cc: Cond::E, target: end.clone() });
                for s in body {
                    self.lower_stmt(s);
                }
                self.emit(Inst::Jmp(start));
                self.label(end);
                self.loop_stack.pop();
            }
            TStmt::Loop { body } => {
                let start = self.fresh("loop");
                let end = self.fresh("end");
                self.loop_stack.push((start.clone(), end.clone()));
                self.label(start.clone());
                for s in body {
                    self.lower_stmt(s);
                }
                self.emit(Inst::Jmp(start));
                self.label(end);
                self.loop_stack.pop();
            }
            TStmt::Break => {
                let target = self.loop_stack.last().expect("sema rejects stray break").1.clone();
                self.emit(Inst::Jmp(target));
            }
            TStmt::Continue => {
                let target = self.loop_stack.last().expect("sema rejects stray continue").0.clone();
                self.emit(Inst::Jmp(target));
            }
            TStmt::Return(value) => {
                if let Some(v) = value {
                    self.lower_expr(v);
                }
                let target = self.epilogue_label();
                self.emit(Inst::Jmp(target));
            }
            TStmt::Expr(e) => self.lower_expr(e),
            TStmt::Write { value, newline } => self.lower_write(value, *newline),
        }
    }

    fn lower_expr(&mut self, e: &TExpr) {
        match &e.kind {
            TExprKind::Int(v) => {
                if e.ty.size() == 8 {
                    self.emit(Inst::MovAbs { dst: Reg::Rax, src: AbsSource::Imm(*v) });
                } else {
                    self.emit(Inst::MovRI { size: Width::Dword, dst: Reg::Rax, imm: *v });
                }
            }
            TExprKind::Bool(b) => {
                self.emit(Inst::MovRI { size: Width::Dword, dst: Reg::Rax, imm: *b as i64 });
            }
            TExprKind::Str(idx) => {
                self.emit(Inst::MovAbs { dst: Reg::Rax, src: AbsSource::Sym(str_label(*idx)) });
            }
            TExprKind::Local { offset } => self.load_local(*offset, e.ty),
            TExprKind::Unary { op: UnOp::Neg, operand } => {
                self.lower_expr(operand);
                self.emit(Inst::Neg { size: op_width(e.ty), reg: Reg::Rax });
            }
            TExprKind::Unary { op: UnOp::Not, operand } => {
                self.lower_expr(operand);
                self.emit(Inst::AluImm { op: AluOp::Xor, size: Width::Dword, dst: Reg::Rax, imm: 1 });
            }
            TExprKind::Binary { op, lhs, rhs } => self.lower_binary(*op, lhs, rhs),
            TExprKind::Call { name, args } => {
                for arg in args {
                    self.lower_expr(arg);
                    self.emit(Inst::Push(Reg::Rax));
                }
                for i in (0..args.len()).rev() {
                    self.emit(Inst::Pop(ARG_REGS[i]));
                }
                self.emit(Inst::Call(name.clone()));
            }
            TExprKind::Read(kind) => self.lower_read(*kind, e.ty),
            TExprKind::ReadFailed => {
                self.needs_read_failed = true;
                self.emit(Inst::MovAbs {
                    dst: Reg::R11,
                    src: AbsSource::Sym(READ_FAILED_SYM.to_string()),
                });
                self.emit(Inst::MovzxMem { from: Width::Byte, dst: Reg::Rax, src: Mem::at(Reg::R11) });
            }
        }
    }

    fn load_local(&mut self, offset: i32, ty: Ty) {
        let mem = Mem::rbp(offset);
        match ty {
            Ty::I8 => self.emit(Inst::MovsxMem { from: Width::Byte, dst: Reg::Rax, src: mem }),
            Ty::U8 | Ty::Bool => self.emit(Inst::MovzxMem { from: Width::Byte, dst: Reg::Rax, src: mem }),
            Ty::I16 => self.emit(Inst::MovsxMem { from: Width::Word, dst: Reg::Rax, src: mem }),
            Ty::U16 => self.emit(Inst::MovzxMem { from: Width::Word, dst: Reg::Rax, src: mem }),
            Ty::I32 | Ty::U32 => self.emit(Inst::Load { size: Width::Dword, dst: Reg::Rax, src: mem }),
            Ty::I64 | Ty::U64 | Ty::Str | Ty::Ptr => {
                self.emit(Inst::Load { size: Width::Qword, dst: Reg::Rax, src: mem })
            }
            Ty::Void => unreachable!("void locals are rejected by sema"),
        }
    }

    fn lower_binary(&mut self, op: BinOp, lhs: &TExpr, rhs: &TExpr) {
        self.lower_expr(lhs);
        self.emit(Inst::Push(Reg::Rax));
        self.lower_expr(rhs);
        self.emit(Inst::MovRR { size: Width::Qword, dst: Reg::Rcx, src: Reg::Rax });
        self.emit(Inst::Pop(Reg::Rax));

        let ty = lhs.ty;
        let w = op_width(ty);
        match op {
            BinOp::Add => self.emit(Inst::Alu { op: AluOp::Add, size: w, dst: Reg::Rax, src: Reg::Rcx }),
            BinOp::Sub => self.emit(Inst::Alu { op: AluOp::Sub, size: w, dst: Reg::Rax, src: Reg::Rcx }),
            BinOp::BitAnd => self.emit(Inst::Alu { op: AluOp::And, size: w, dst: Reg::Rax, src: Reg::Rcx }),
            BinOp::BitOr => self.emit(Inst::Alu { op: AluOp::Or, size: w, dst: Reg::Rax, src: Reg::Rcx }),
            BinOp::BitXor => self.emit(Inst::Alu { op: AluOp::Xor, size: w, dst: Reg::Rax, src: Reg::Rcx }),
            BinOp::Mul => self.emit(Inst::Imul { size: w, dst: Reg::Rax, src: Reg::Rcx }),
            BinOp::Div | BinOp::Rem => {
                if ty.is_signed() {
                    self.emit(if w == Width::Qword { Inst::Cqo } else { Inst::Cdq });
                    self.emit(Inst::Idiv { size: w, reg: Reg::Rcx });
                } else {
                    self.emit(Inst::Alu {
                        op: AluOp::Xor,
                        size: Width::Dword,
                        dst: Reg::Rdx,
                        src: Reg::Rdx,
                    });
                    self.emit(Inst::Div { size: w, reg: Reg::Rcx });
                }
                if op == BinOp::Rem {
                    self.emit(Inst::MovRR { size: w, dst: Reg::Rax, src: Reg::Rdx });
                }
            }
            BinOp::Shl => self.emit(Inst::Shift { op: ShiftOp::Shl, size: w, reg: Reg::Rax }),
            BinOp::Shr => {
                let op = if ty.is_signed() { ShiftOp::Sar } else { ShiftOp::Shr };
                self.emit(Inst::Shift { op, size: w, reg: Reg::Rax });
            }
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                self.emit(Inst::Alu { op: AluOp::Cmp, size: w, dst: Reg::Rax, src: Reg::Rcx });
                let cc = condition(op, ty.is_signed());
                self.emit(Inst::Setcc { cc, reg: Reg::Rax });
                self.emit(Inst::MovzxReg { from: Width::Byte, dst: Reg::Rax, src: Reg::Rax });
            }
        }
    }

    // ---- write/writeln ----

    fn lower_write(&mut self, value: &TExpr, newline: bool) {
        match value.ty {
            Ty::Str => {
                // Literals have a known label and length; anything else is a
                // null-terminated pointer measured at run time.
                if let TExprKind::Str(idx) = value.kind {
                    let len = self.strings[idx].len() as i64;
                    let label = str_label(idx);
                    self.emit(Inst::Lea { dst: Reg::Rsi, sym: label });
                    self.emit(Inst::MovRI { size: Width::Dword, dst: Reg::Rdx, imm: len });
                    self.emit_write_syscall();
                } else {
                    self.lower_expr(value);
                    self.write_strlen_and_print();
                }
                if newline {
                    self.emit_newline();
                }
            }
            Ty::Bool => {
                self.lower_expr(value);
                self.write_bool();
                if newline {
                    self.emit_newline();
                }
            }
            _ => {
                self.lower_expr(value);
                self.write_integer(value.ty, newline);
            }
        }
    }

    /// write(1, rsi, rdx)
    fn emit_write_syscall(&mut self) {
        self.emit(Inst::MovRI { size: Width::Dword, dst: Reg::Rax, imm: 1 });
        self.emit(Inst::MovRI { size: Width::Dword, dst: Reg::Rdi, imm: 1 });
        self.emit(Inst::Syscall);
    }

    fn emit_newline(&mut self) {
        let label = self.intern(b"\n");
        self.emit(Inst::Lea { dst: Reg::Rsi, sym: label });
        self.emit(Inst::MovRI { size: Width::Dword, dst: Reg::Rdx, imm: 1 });
        self.emit_write_syscall();
    }

    /// Pointer in rax: find the NUL, then print.
    fn write_strlen_and_print(&mut self) {
        let loop_l = self.fresh("strlen");
        let done_l = self.fresh("strlen_done");
        self.emit(Inst::MovRR { size: Width::Qword, dst: Reg::Rsi, src: Reg::Rax });
        self.emit(Inst::MovRR { size: Width::Qword, dst: Reg::Rcx, src: Reg::Rax });
        self.emit(Inst::Alu { op: AluOp::Xor, size: Width::Dword, dst: Reg::Rdx, src: Reg::Rdx });
        self.label(loop_l.clone());
        self.emit(Inst::MovzxMem { from: Width::Byte, dst: Reg::Rax, src: Mem::at(Reg::Rcx) });
        self.emit(Inst::Test { size: Width::Byte, lhs: Reg::Rax, rhs: Reg::Rax });
        self.emit(Inst::Jcc { cc: Cond::E, target: done_l.clone() });
        self.emit(Inst::Inc { size: Width::Qword, reg: Reg::Rcx });
        self.emit(Inst::Inc { size: Width::Qword, reg: Reg::Rdx });
        self.emit(Inst::Jmp(loop_l));
        self.label(done_l);
        self.emit_write_syscall();
    }

    /// Bool in al: print "True" or "False".
    fn write_bool(&mut self) {
        let true_label = self.intern(b"True");
        let false_label = self.intern(b"False");
        let false_l = self.fresh("false");
        let done_l = self.fresh("bool_done");
        self.emit(Inst::Test { size: Width::Byte, lhs: Reg::Rax, rhs: Reg::Rax });
        self.emit(Inst::Jcc { cc: Cond::E, target: false_l.clone() });
        self.emit(Inst::Lea { dst: Reg::Rsi, sym: true_label });
        self.emit(Inst::MovRI { size: Width::Dword, dst: Reg::Rdx, imm: 4 });
        self.emit(Inst::Jmp(done_l.clone()));
        self.label(false_l);
        self.emit(Inst::Lea { dst: Reg::Rsi, sym: false_label });
        self.emit(Inst::MovRI { size: Width::Dword, dst: Reg::Rdx, imm: 5 });
        self.label(done_l);
        self.emit_write_syscall();
    }

    /// Integer in the accumulator: convert to decimal in a 32-byte stack
    /// buffer (digits filled from the end) and print with one syscall.
    fn write_integer(&mut self, ty: Ty, newline: bool) {
        let signed = ty.is_signed();

        // Widen to the full register.
        match ty {
            Ty::I8 => self.emit(Inst::MovsxReg {
                from: Width::Byte,
                size: Width::Qword,
                dst: Reg::Rax,
                src: Reg::Rax,
            }),
            Ty::I16 => self.emit(Inst::MovsxReg {
                from: Width::Word,
                size: Width::Qword,
                dst: Reg::Rax,
                src: Reg::Rax,
            }),
            Ty::I32 => self.emit(Inst::Movsxd { dst: Reg::Rax, src: Reg::Rax }),
            // Unsigned values below 64 bits already sit zero-extended in eax.
            _ => {}
        }

        self.emit(Inst::AluImm { op: AluOp::Sub, size: Width::Qword, dst: Reg::Rsp, imm: 32 });
        self.emit(Inst::MovRR { size: Width::Qword, dst: Reg::Rsi, src: Reg::Rsp });
        self.emit(Inst::AluImm { op: AluOp::Add, size: Width::Qword, dst: Reg::Rsi, imm: 32 });
        if newline {
            self.emit(Inst::Dec { size: Width::Qword, reg: Reg::Rsi });
            self.emit(Inst::StoreImm8 { dst: Mem::at(Reg::Rsi), imm: b'\n' });
        }
        self.emit(Inst::MovRI { size: Width::Dword, dst: Reg::R8, imm: 10 });

        if signed {
            let skip = self.fresh("skip_neg");
            self.emit(Inst::Alu { op: AluOp::Xor, size: Width::Dword, dst: Reg::R9, src: Reg::R9 });
            self.emit(Inst::Test { size: Width::Qword, lhs: Reg::Rax, rhs: Reg::Rax });
            self.emit(Inst::Jcc { cc: Cond::Ns, target: skip.clone() });
            self.emit(Inst::MovRI { size: Width::Dword, dst: Reg::R9, imm: 1 });
            self.emit(Inst::Neg { size: Width::Qword, reg: Reg::Rax });
            self.label(skip);
        }

        let conv = self.fresh("convert");
        self.label(conv.clone());
        self.emit(Inst::Alu { op: AluOp::Xor, size: Width::Dword, dst: Reg::Rdx, src: Reg::Rdx });
        self.emit(Inst::Div { size: Width::Qword, reg: Reg::R8 });
        self.emit(Inst::AluImm { op: AluOp::Add, size: Width::Byte, dst: Reg::Rdx, imm: b'0' as i32 });
        self.emit(Inst::Dec { size: Width::Qword, reg: Reg::Rsi });
        self.emit(Inst::Store { size: Width::Byte, dst: Mem::at(Reg::Rsi), src: Reg::Rdx });
        self.emit(Inst::Test { size: Width::Qword, lhs: Reg::Rax, rhs: Reg::Rax });
        self.emit(Inst::Jcc { cc: Cond::Ne, target: conv });

        if signed {
            let nosign = self.fresh("skip_minus");
            self.emit(Inst::Test { size: Width::Dword, lhs: Reg::R9, rhs: Reg::R9 });
            self.emit(Inst::Jcc { cc: Cond::E, target: nosign.clone() });
            self.emit(Inst::Dec { size: Width::Qword, reg: Reg::Rsi });
            self.emit(Inst::StoreImm8 { dst: Mem::at(Reg::Rsi), imm: b'-' });
            self.label(nosign);
        }

        // length = buffer end - first digit
        self.emit(Inst::MovRR { size: Width::Qword, dst: Reg::Rdx, src: Reg::Rsp });
        self.emit(Inst::AluImm { op: AluOp::Add, size: Width::Qword, dst: Reg::Rdx, imm: 32 });
        self.emit(Inst::Alu { op: AluOp::Sub, size: Width::Qword, dst: Reg::Rdx, src: Reg::Rsi });
        self.emit_write_syscall();
        self.emit(Inst::AluImm { op: AluOp::Add, size: Width::Qword, dst: Reg::Rsp, imm: 32 });
    }

    // ---- read builtins ----

    fn set_read_failed(&mut self, value: u8) {
        self.needs_read_failed = true;
        self.emit(Inst::MovAbs { dst: Reg::R11, src: AbsSource::Sym(READ_FAILED_SYM.to_string()) });
        self.emit(Inst::StoreImm8 { dst: Mem::at(Reg::R11), imm: value });
    }

    fn set_read_failed_from_al(&mut self) {
        self.needs_read_failed = true;
        self.emit(Inst::MovAbs { dst: Reg::R11, src: AbsSource::Sym(READ_FAILED_SYM.to_string()) });
        self.emit(Inst::Store { size: Width::Byte, dst: Mem::at(Reg::R11), src: Reg::Rax });
    }

    /// mmap(0, 4096, PROT_READ|PROT_WRITE, MAP_PRIVATE|MAP_ANONYMOUS, -1, 0).
    /// One fresh page per read; the MVP accepts the leak.
    fn emit_mmap_page(&mut self) {
        self.emit(Inst::MovRI { size: Width::Dword, dst: Reg::Rax, imm: 9 });
        self.emit(Inst::Alu { op: AluOp::Xor, size: Width::Dword, dst: Reg::Rdi, src: Reg::Rdi });
        self.emit(Inst::MovRI { size: Width::Dword, dst: Reg::Rsi, imm: 4096 });
        self.emit(Inst::MovRI { size: Width::Dword, dst: Reg::Rdx, imm: 3 });
        self.emit(Inst::MovRI { size: Width::Dword, dst: Reg::R10, imm: 0x22 });
        self.emit(Inst::MovRI { size: Width::Qword, dst: Reg::R8, imm: -1 });
        self.emit(Inst::Alu { op: AluOp::Xor, size: Width::Dword, dst: Reg::R9, src: Reg::R9 });
        self.emit(Inst::Syscall);
    }

    /// read(0, rsi, rdx) with buffer/count preloaded by the caller.
    fn emit_read_syscall(&mut self) {
        self.emit(Inst::Alu { op: AluOp::Xor, size: Width::Dword, dst: Reg::Rax, src: Reg::Rax });
        self.emit(Inst::Alu { op: AluOp::Xor, size: Width::Dword, dst: Reg::Rdi, src: Reg::Rdi });
        self.emit(Inst::Syscall);
    }

    fn lower_read(&mut self, kind: BuiltinKind, ty: Ty) {
        match kind {
            BuiltinKind::Readchar => self.read_char(),
            BuiltinKind::Read => {
                if ty == Ty::Str {
                    self.read_str_until_eof();
                } else {
                    self.read_integer(ty);
                }
            }
            BuiltinKind::Readln => {
                if ty == Ty::Str {
                    self.readln_str();
                } else {
                    self.read_integer(ty);
                }
            }
            BuiltinKind::ReadFailed => unreachable!("read_failed lowers as a flag load"),
        }
    }

    /// One byte from stdin; -1 on EOF.
    fn read_char(&mut self) {
        let eof_l = self.fresh("readchar_eof");
        let done_l = self.fresh("readchar_done");
        self.emit(Inst::AluImm { op: AluOp::Sub, size: Width::Qword, dst: Reg::Rsp, imm: 8 });
        self.emit(Inst::MovRR { size: Width::Qword, dst: Reg::Rsi, src: Reg::Rsp });
        self.emit(Inst::MovRI { size: Width::Dword, dst: Reg::Rdx, imm: 1 });
        self.emit_read_syscall();
        self.emit(Inst::Test { size: Width::Qword, lhs: Reg::Rax, rhs: Reg::Rax });
        self.emit(Inst::Jcc { cc: Cond::Le, target: eof_l.clone() });
        self.emit(Inst::MovzxMem { from: Width::Byte, dst: Reg::Rax, src: Mem::at(Reg::Rsp) });
        self.set_read_failed(0);
        self.emit(Inst::Jmp(done_l.clone()));
        self.label(eof_l);
        self.emit(Inst::MovRI { size: Width::Dword, dst: Reg::Rax, imm: -1 });
        self.set_read_failed(1);
        self.label(done_l);
        self.emit(Inst::AluImm { op: AluOp::Add, size: Width::Qword, dst: Reg::Rsp, imm: 8 });
    }

    /// Whole stdin into one mapped page; pointer in rax.
    fn read_str_until_eof(&mut self) {
        let loop_l = self.fresh("read");
        let done_l = self.fresh("read_done");
        self.emit(Inst::Push(Reg::R12));
        self.emit(Inst::Push(Reg::R13));
        self.emit(Inst::Push(Reg::R14));
        self.emit_mmap_page();
        self.emit(Inst::MovRR { size: Width::Qword, dst: Reg::R12, src: Reg::Rax });
        self.emit(Inst::MovRR { size: Width::Qword, dst: Reg::R13, src: Reg::Rax });
        self.emit(Inst::MovRI { size: Width::Dword, dst: Reg::R14, imm: 4095 });
        self.label(loop_l.clone());
        self.emit(Inst::MovRR { size: Width::Qword, dst: Reg::Rsi, src: Reg::R13 });
        self.emit(Inst::MovRR { size: Width::Qword, dst: Reg::Rdx, src: Reg::R14 });
        self.emit_read_syscall();
        self.emit(Inst::Test { size: Width::Qword, lhs: Reg::Rax, rhs: Reg::Rax });
        self.emit(Inst::Jcc { cc: Cond::Le, target: done_l.clone() });
        self.emit(Inst::Alu { op: AluOp::Add, size: Width::Qword, dst: Reg::R13, src: Reg::Rax });
        self.emit(Inst::Alu { op: AluOp::Sub, size: Width::Qword, dst: Reg::R14, src: Reg::Rax });
        self.emit(Inst::Test { size: Width::Qword, lhs: Reg::R14, rhs: Reg::R14 });
        self.emit(Inst::Jcc { cc: Cond::Ne, target: loop_l });
        self.label(done_l);
        self.emit(Inst::StoreImm8 { dst: Mem::at(Reg::R13), imm: 0 });
        // Empty input sets the failure flag.
        self.emit(Inst::Alu { op: AluOp::Cmp, size: Width::Qword, dst: Reg::R13, src: Reg::R12 });
        self.emit(Inst::Setcc { cc: Cond::E, reg: Reg::Rax });
        self.set_read_failed_from_al();
        self.emit(Inst::MovRR { size: Width::Qword, dst: Reg::Rax, src: Reg::R12 });
        self.emit(Inst::Pop(Reg::R14));
        self.emit(Inst::Pop(Reg::R13));
        self.emit(Inst::Pop(Reg::R12));
    }

    /// One line from stdin, newline stripped; pointer in rax.
    fn readln_str(&mut self) {
        let loop_l = self.fresh("readln");
        let eof_l = self.fresh("readln_eof");
        let nl_l = self.fresh("readln_nl");
        let fin_l = self.fresh("readln_fin");
        self.emit(Inst::Push(Reg::R12));
        self.emit(Inst::Push(Reg::R13));
        self.emit_mmap_page();
        self.emit(Inst::MovRR { size: Width::Qword, dst: Reg::R12, src: Reg::Rax });
        self.emit(Inst::MovRR { size: Width::Qword, dst: Reg::R13, src: Reg::Rax });
        self.label(loop_l.clone());
        self.emit(Inst::MovRR { size: Width::Qword, dst: Reg::Rsi, src: Reg::R13 });
        self.emit(Inst::MovRI { size: Width::Dword, dst: Reg::Rdx, imm: 1 });
        self.emit_read_syscall();
        self.emit(Inst::Test { size: Width::Qword, lhs: Reg::Rax, rhs: Reg::Rax });
        self.emit(Inst::Jcc { cc: Cond::Le, target: eof_l.clone() });
        self.emit(Inst::MovzxMem { from: Width::Byte, dst: Reg::Rax, src: Mem::at(Reg::R13) });
        self.emit(Inst::AluImm { op: AluOp::Cmp, size: Width::Dword, dst: Reg::Rax, imm: b'\n' as i32 });
        self.emit(Inst::Jcc { cc: Cond::E, target: nl_l.clone() });
        self.emit(Inst::Inc { size: Width::Qword, reg: Reg::R13 });
        self.emit(Inst::Jmp(loop_l));
        self.label(eof_l);
        // EOF before a newline: failed only when nothing was read at all.
        self.emit(Inst::Alu { op: AluOp::Cmp, size: Width::Qword, dst: Reg::R13, src: Reg::R12 });
        self.emit(Inst::Setcc { cc: Cond::E, reg: Reg::Rax });
        self.set_read_failed_from_al();
        self.emit(Inst::Jmp(fin_l.clone()));
        self.label(nl_l);
        self.set_read_failed(0);
        self.label(fin_l);
        self.emit(Inst::StoreImm8 { dst: Mem::at(Reg::R13), imm: 0 });
        self.emit(Inst::MovRR { size: Width::Qword, dst: Reg::Rax, src: Reg::R12 });
        self.emit(Inst::Pop(Reg::R13));
        self.emit(Inst::Pop(Reg::R12));
    }

    /// One line into a 64-byte stack buffer, parsed as a decimal integer.
    /// Result in rax; `_read_failed` set on empty input or a stray character.
    fn read_integer(&mut self, ty: Ty) {
        let signed = ty.is_signed();
        let rd_l = self.fresh("rdint");
        let eof_l = self.fresh("rdint_eof");
        let parse_l = self.fresh("rdint_parse");
        let dig_l = self.fresh("rdint_digit");
        let bad_l = self.fresh("rdint_bad");
        let fin_l = self.fresh("rdint_fin");
        let out_l = self.fresh("rdint_out");

        self.emit(Inst::Push(Reg::R12));
        self.emit(Inst::Push(Reg::R13));
        self.emit(Inst::Push(Reg::R14));
        self.emit(Inst::AluImm { op: AluOp::Sub, size: Width::Qword, dst: Reg::Rsp, imm: 64 });
        self.emit(Inst::MovRR { size: Width::Qword, dst: Reg::R12, src: Reg::Rsp });
        self.emit(Inst::MovRR { size: Width::Qword, dst: Reg::R13, src: Reg::Rsp });
        self.emit(Inst::Alu { op: AluOp::Xor, size: Width::Dword, dst: Reg::R14, src: Reg::R14 });

        self.label(rd_l.clone());
        self.emit(Inst::MovRR { size: Width::Qword, dst: Reg::Rsi, src: Reg::R13 });
        self.emit(Inst::MovRI { size: Width::Dword, dst: Reg::Rdx, imm: 1 });
        self.emit_read_syscall();
        self.emit(Inst::Test { size: Width::Qword, lhs: Reg::Rax, rhs: Reg::Rax });
        self.emit(Inst::Jcc { cc: Cond::Le, target: eof_l.clone() });
        self.emit(Inst::MovzxMem { from: Width::Byte, dst: Reg::Rax, src: Mem::at(Reg::R13) });
        self.emit(Inst::AluImm { op: AluOp::Cmp, size: Width::Dword, dst: Reg::Rax, imm: b'\n' as i32 });
        self.emit(Inst::Jcc { cc: Cond::E, target: parse_l.clone() });
        self.emit(Inst::Inc { size: Width::Qword, reg: Reg::R13 });
        self.emit(Inst::Inc { size: Width::Qword, reg: Reg::R14 });
        self.emit(Inst::AluImm { op: AluOp::Cmp, size: Width::Qword, dst: Reg::R14, imm: 63 });
        self.emit(Inst::Jcc { cc: Cond::L, target: rd_l });
        self.emit(Inst::Jmp(parse_l.clone()));

        self.label(eof_l);
        self.emit(Inst::Test { size: Width::Qword, lhs: Reg::R14, rhs: Reg::R14 });
        self.emit(Inst::Jcc { cc: Cond::Ne, target: parse_l.clone() });
        self.emit(Inst::Alu { op: AluOp::Xor, size: Width::Dword, dst: Reg::Rax, src: Reg::Rax });
        self.set_read_failed(1);
        self.emit(Inst::Jmp(out_l.clone()));

        self.label(parse_l);
        self.emit(Inst::StoreImm8 { dst: Mem::at(Reg::R13), imm: 0 });
        self.emit(Inst::Alu { op: AluOp::Xor, size: Width::Dword, dst: Reg::Rax, src: Reg::Rax });
        self.emit(Inst::MovRI { size: Width::Dword, dst: Reg::R8, imm: 10 });
        self.emit(Inst::MovRR { size: Width::Qword, dst: Reg::R13, src: Reg::R12 });

        // Skip leading spaces; the current byte stays in ecx for the sign
        // check below.
        let ws_l = self.fresh("rdint_ws");
        let ws_done = self.fresh("rdint_ws_done");
        self.label(ws_l.clone());
        self.emit(Inst::MovzxMem { from: Width::Byte, dst: Reg::Rcx, src: Mem::at(Reg::R13) });
        self.emit(Inst::AluImm { op: AluOp::Cmp, size: Width::Dword, dst: Reg::Rcx, imm: b' ' as i32 });
        self.emit(Inst::Jcc { cc: Cond::Ne, target: ws_done.clone() });
        self.emit(Inst::Inc { size: Width::Qword, reg: Reg::R13 });
        self.emit(Inst::Jmp(ws_l));
        self.label(ws_done);

        if signed {
            let plus_l = self.fresh("rdint_plus");
            let nosign = self.fresh("rdint_nosign");
            self.emit(Inst::Alu { op: AluOp::Xor, size: Width::Dword, dst: Reg::R9, src: Reg::R9 });
            self.emit(Inst::AluImm { op: AluOp::Cmp, size: Width::Dword, dst: Reg::Rcx, imm: b'-' as i32 });
            self.emit(Inst::Jcc { cc: Cond::Ne, target: plus_l.clone() });
            self.emit(Inst::MovRI { size: Width::Dword, dst: Reg::R9, imm: 1 });
            self.emit(Inst::Inc { size: Width::Qword, reg: Reg::R13 });
            self.emit(Inst::Jmp(dig_l.clone()));
            self.label(plus_l);
            self.emit(Inst::AluImm { op: AluOp::Cmp, size: Width::Dword, dst: Reg::Rcx, imm: b'+' as i32 });
            self.emit(Inst::Jcc { cc: Cond::Ne, target: nosign.clone() });
            self.emit(Inst::Inc { size: Width::Qword, reg: Reg::R13 });
            self.label(nosign);
        }

        self.label(dig_l.clone());
        self.emit(Inst::MovzxMem { from: Width::Byte, dst: Reg::Rcx, src: Mem::at(Reg::R13) });
        self.emit(Inst::Test { size: Width::Byte, lhs: Reg::Rcx, rhs: Reg::Rcx });
        self.emit(Inst::Jcc { cc: Cond::E, target: fin_l.clone() });
        self.emit(Inst::AluImm { op: AluOp::Cmp, size: Width::Dword, dst: Reg::Rcx, imm: b'\r' as i32 });
        self.emit(Inst::Jcc { cc: Cond::E, target: fin_l.clone() });
        self.emit(Inst::AluImm { op: AluOp::Sub, size: Width::Dword, dst: Reg::Rcx, imm: b'0' as i32 });
        self.emit(Inst::AluImm { op: AluOp::Cmp, size: Width::Dword, dst: Reg::Rcx, imm: 9 });
        self.emit(Inst::Jcc { cc: Cond::A, target: bad_l.clone() });
        self.emit(Inst::Imul { size: Width::Qword, dst: Reg::Rax, src: Reg::R8 });
        self.emit(Inst::Alu { op: AluOp::Add, size: Width::Qword, dst: Reg::Rax, src: Reg::Rcx });
        self.emit(Inst::Inc { size: Width::Qword, reg: Reg::R13 });
        self.emit(Inst::Jmp(dig_l));

        self.label(bad_l.clone());
        self.emit(Inst::Alu { op: AluOp::Xor, size: Width::Dword, dst: Reg::Rax, src: Reg::Rax });
        self.set_read_failed(1);
        self.emit(Inst::Jmp(out_l.clone()));

        self.label(fin_l);
        self.emit(Inst::Alu { op: AluOp::Cmp, size: Width::Qword, dst: Reg::R13, src: Reg::R12 });
        self.emit(Inst::Jcc { cc: Cond::E, target: bad_l });
        if signed {
            let pos = self.fresh("rdint_pos");
            self.emit(Inst::Test { size: Width::Dword, lhs: Reg::R9, rhs: Reg::R9 });
            self.emit(Inst::Jcc { cc: Cond::E, target: pos.clone() });
            self.emit(Inst::Neg { size: Width::Qword, reg: Reg::Rax });
            self.label(pos);
        }
        self.set_read_failed(0);

        self.label(out_l);
        self.emit(Inst::AluImm { op: AluOp::Add, size: Width::Qword, dst: Reg::Rsp, imm: 64 });
        self.emit(Inst::Pop(Reg::R14));
        self.emit(Inst::Pop(Reg::R13));
        self.emit(Inst::Pop(Reg::R12));
    }
}

fn condition(op: BinOp, signed: bool) -> Cond {
    match op {
        BinOp::Eq => Cond::E,
        BinOp::Ne => Cond::Ne,
        BinOp::Lt => {
            if signed {
                Cond::L
            } else {
                Cond::B
            }
        }
        BinOp::Le => {
            if signed {
                Cond::Le
            } else {
                Cond::Be
            }
        }
        BinOp::Gt => {
            if signed {
                Cond::G
            } else {
                Cond::A
            }
        }
        BinOp::Ge => {
            if signed {
                Cond::Ge
            } else {
                Cond::Ae
            }
        }
        _ => unreachable!("not a comparison"),
    }
}
