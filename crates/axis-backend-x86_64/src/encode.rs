//! Two-pass byte encoder with label resolution and jump relaxation.
//!
//! Pass 1 lays labels out under the current instruction sizes, assuming the
//! short form for every conditional jump. Any short jump whose displacement
//! no longer fits in an i8 is widened to the near form; widening is monotone,
//! so the loop reaches a fixed point in O(jumps) iterations. Pass 2 emits the
//! final bytes and the relocation records for `.rodata`/`.bss` references.

use std::collections::{HashMap, HashSet};

use thiserror::Error;

use crate::insn::{AbsSource, Inst, Mem, Reg, Width};

/// A bug in the code generator surfaced by the assembler. Never a user error.
#[derive(Debug, Error)]
pub enum AsmError {
    #[error("InternalAssemblerError in {function}: undefined label '{label}'")]
    UndefinedLabel { function: String, label: String },
    #[error("InternalAssemblerError in {function}: duplicate label '{label}'")]
    DuplicateLabel { function: String, label: String },
    #[error("InternalAssemblerError in {function}: unknown symbol '{symbol}'")]
    UnknownSymbol { function: String, symbol: String },
    #[error("InternalAssemblerError in {function}: displacement overflow at offset {offset:#x}")]
    DisplacementOverflow { function: String, offset: usize },
    #[error("InternalAssemblerError in {function}: immediate {imm} does not fit at offset {offset:#x}")]
    ImmediateOverflow { function: String, imm: i64, offset: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocKind {
    /// 8-byte absolute address (the immediate of `movabs`).
    Abs64,
    /// 4-byte PC-relative displacement (`lea r, [rip+sym]`).
    Pc32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionRef {
    Rodata,
    Bss,
}

/// One patch site in `.text`, resolved by the output writers once section
/// addresses are fixed.
#[derive(Debug, Clone)]
pub struct Reloc {
    pub offset: usize,
    pub section: SectionRef,
    pub sym_offset: u32,
    pub kind: RelocKind,
}

/// Where the static symbols live; built from the lowered rodata/bss tables.
#[derive(Debug, Default)]
pub struct SymTab {
    pub rodata: HashMap<String, u32>,
    pub bss: HashMap<String, u32>,
}

#[derive(Debug)]
pub struct Assembled {
    pub text: Vec<u8>,
    pub relocs: Vec<Reloc>,
    pub labels: HashMap<String, usize>,
}

pub fn assemble(insts: &[Inst], symtab: &SymTab) -> Result<Assembled, AsmError> {
    let mut near: HashSet<usize> = HashSet::new();
    let mut labels: HashMap<String, usize> = HashMap::new();

    // Fixed point: place labels, then widen every short jump that cannot
    // reach its target.
    let mut iterations = 0;
    loop {
        iterations += 1;
        labels.clear();
        let mut offset = 0usize;
        let mut function = String::from("_start");
        for (i, inst) in insts.iter().enumerate() {
            if let Inst::Label(name) = inst {
                if !name.starts_with('.') {
                    function = name.clone();
                }
                if labels.insert(name.clone(), offset).is_some() {
                    return Err(AsmError::DuplicateLabel { function, label: name.clone() });
                }
            }
            offset += inst_size(inst, near.contains(&i));
        }

        let mut changed = false;
        let mut offset = 0usize;
        let mut function = String::from("_start");
        for (i, inst) in insts.iter().enumerate() {
            if let Inst::Label(name) = inst {
                if !name.starts_with('.') {
                    function = name.clone();
                }
            }
            let size = inst_size(inst, near.contains(&i));
            if let Inst::Jcc { target, .. } = inst {
                if !near.contains(&i) {
                    let dest = *labels.get(target).ok_or_else(|| AsmError::UndefinedLabel {
                        function: function.clone(),
                        label: target.clone(),
                    })?;
                    let disp = dest as i64 - (offset + size) as i64;
                    if !(-128..=127).contains(&disp) {
                        near.insert(i);
                        changed = true;
                    }
                }
            }
            offset += size;
        }

        if !changed {
            break;
        }
    }
    log::debug!("jump relaxation settled after {iterations} iteration(s), {} near jcc", near.len());

    // Final encoding.
    let mut enc = Encoder {
        labels: &labels,
        symtab,
        near: &near,
        text: Vec::new(),
        relocs: Vec::new(),
        function: String::from("_start"),
    };
    for (i, inst) in insts.iter().enumerate() {
        enc.encode(i, inst)?;
    }
    Ok(Assembled { text: enc.text, relocs: enc.relocs, labels })
}

fn rex(w: bool, r: bool, x: bool, b: bool) -> u8 {
    0x40 | (w as u8) << 3 | (r as u8) << 2 | (x as u8) << 1 | b as u8
}

fn modrm(mode: u8, reg: u8, rm: u8) -> u8 {
    (mode & 0x3) << 6 | (reg & 0x7) << 3 | (rm & 0x7)
}

/// ModRM + optional SIB + displacement for `[base + disp]`. Returns the
/// REX.B requirement of the base register.
fn mem_operand(reg_field: u8, mem: &Mem, out: &mut Vec<u8>) -> bool {
    let base = mem.base.num();
    let rm = base & 7;
    // rbp/r13 as base require an explicit displacement; rsp/r12 require SIB.
    let (mode, disp_len) = if mem.disp == 0 && rm != 5 {
        (0b00, 0)
    } else if (-128..=127).contains(&mem.disp) {
        (0b01, 1)
    } else {
        (0b10, 4)
    };
    out.push(modrm(mode, reg_field, rm));
    if rm == 4 {
        out.push(0x24);
    }
    match disp_len {
        1 => out.push(mem.disp as u8),
        4 => out.extend_from_slice(&mem.disp.to_le_bytes()),
        _ => {}
    }
    base >= 8
}

/// Size in bytes of one encoded instruction. Conditional jumps depend on the
/// chosen form; everything else is fixed.
fn inst_size(inst: &Inst, jcc_near: bool) -> usize {
    match inst {
        Inst::Label(_) => 0,
        Inst::Jcc { .. } => {
            if jcc_near {
                6
            } else {
                2
            }
        }
        Inst::Jmp(_) | Inst::Call(_) => 5,
        other => {
            // The fixed-size encodings are cheap to produce; reuse the
            // encoder with unresolved displacements so sizes can never drift
            // from the real byte table.
            let mut tmp = Vec::new();
            encode_fixed(other, &mut tmp, &mut |_sym| (SectionRef::Rodata, 0), &mut Vec::new(), 0)
                .expect("fixed-size instructions always encode");
            tmp.len()
        }
    }
}

struct Encoder<'a> {
    labels: &'a HashMap<String, usize>,
    symtab: &'a SymTab,
    near: &'a HashSet<usize>,
    text: Vec<u8>,
    relocs: Vec<Reloc>,
    function: String,
}

impl<'a> Encoder<'a> {
    fn resolve(&self, label: &str) -> Result<usize, AsmError> {
        self.labels.get(label).copied().ok_or_else(|| AsmError::UndefinedLabel {
            function: self.function.clone(),
            label: label.to_string(),
        })
    }

    fn encode(&mut self, index: usize, inst: &Inst) -> Result<(), AsmError> {
        match inst {
            Inst::Label(name) => {
                if !name.starts_with('.') {
                    self.function = name.clone();
                }
                Ok(())
            }
            Inst::Jmp(target) => {
                let dest = self.resolve(target)?;
                let disp = dest as i64 - (self.text.len() + 5) as i64;
                let disp = i32::try_from(disp).map_err(|_| AsmError::DisplacementOverflow {
                    function: self.function.clone(),
                    offset: self.text.len(),
                })?;
                self.text.push(0xE9);
                self.text.extend_from_slice(&disp.to_le_bytes());
                Ok(())
            }
            Inst::Call(target) => {
                let dest = self.resolve(target)?;
                let disp = dest as i64 - (self.text.len() + 5) as i64;
                let disp = i32::try_from(disp).map_err(|_| AsmError::DisplacementOverflow {
                    function: self.function.clone(),
                    offset: self.text.len(),
                })?;
                self.text.push(0xE8);
                self.text.extend_from_slice(&disp.to_le_bytes());
                Ok(())
            }
            Inst::Jcc { cc, target } => {
                let dest = self.resolve(target)?;
                if self.near.contains(&index) {
                    let disp = dest as i64 - (self.text.len() + 6) as i64;
                    let disp = i32::try_from(disp).map_err(|_| AsmError::DisplacementOverflow {
                        function: self.function.clone(),
                        offset: self.text.len(),
                    })?;
                    self.text.push(0x0F);
                    self.text.push(0x80 + cc.code());
                    self.text.extend_from_slice(&disp.to_le_bytes());
                } else {
                    let disp = dest as i64 - (self.text.len() + 2) as i64;
                    if !(-128..=127).contains(&disp) {
                        return Err(AsmError::DisplacementOverflow {
                            function: self.function.clone(),
                            offset: self.text.len(),
                        });
                    }
                    self.text.push(0x70 + cc.code());
                    self.text.push(disp as i8 as u8);
                }
                Ok(())
            }
            other => {
                let offset = self.text.len();
                let function = self.function.clone();
                let symtab = self.symtab;
                let mut missing: Option<String> = None;
                let mut lookup = |sym: &str| -> (SectionRef, u32) {
                    if let Some(off) = symtab.rodata.get(sym) {
                        (SectionRef::Rodata, *off)
                    } else if let Some(off) = symtab.bss.get(sym) {
                        (SectionRef::Bss, *off)
                    } else {
                        missing = Some(sym.to_string());
                        (SectionRef::Rodata, 0)
                    }
                };
                let mut bytes = Vec::new();
                encode_fixed(other, &mut bytes, &mut lookup, &mut self.relocs, offset).map_err(
                    |imm| AsmError::ImmediateOverflow { function: function.clone(), imm, offset },
                )?;
                if let Some(symbol) = missing {
                    return Err(AsmError::UnknownSymbol { function, symbol });
                }
                self.text.extend_from_slice(&bytes);
                Ok(())
            }
        }
    }
}

/// Encode every fixed-size instruction. This match is the instruction table:
/// opcode bytes, REX rules, 66 prefix, ModRM construction and immediate
/// widths all live here and nowhere else.
fn encode_fixed(
    inst: &Inst,
    out: &mut Vec<u8>,
    sym_lookup: &mut dyn FnMut(&str) -> (SectionRef, u32),
    relocs: &mut Vec<Reloc>,
    text_offset: usize,
) -> Result<(), i64> {
    match inst {
        Inst::Label(_) | Inst::Jmp(_) | Inst::Call(_) | Inst::Jcc { .. } => {
            unreachable!("variable-size instructions are encoded by the caller")
        }

        Inst::Push(r) => {
            let n = r.num();
            if n >= 8 {
                out.push(0x41);
            }
            out.push(0x50 + (n & 7));
        }
        Inst::Pop(r) => {
            let n = r.num();
            if n >= 8 {
                out.push(0x41);
            }
            out.push(0x58 + (n & 7));
        }

        Inst::MovRR { size, dst, src } => {
            // 88/89 /r, r/m from dst.
            encode_rr(*size, if *size == Width::Byte { 0x88 } else { 0x89 }, src, dst, out);
        }

        Inst::MovRI { size, dst, imm } => {
            let n = dst.num();
            match size {
                Width::Byte => {
                    if !(-128..=255).contains(imm) {
                        return Err(*imm);
                    }
                    if n >= 4 {
                        out.push(rex(false, false, false, n >= 8));
                    }
                    out.push(0xB0 + (n & 7));
                    out.push(*imm as u8);
                }
                Width::Word => {
                    if !(-32768..=65535).contains(imm) {
                        return Err(*imm);
                    }
                    out.push(0x66);
                    if n >= 8 {
                        out.push(0x41);
                    }
                    out.push(0xB8 + (n & 7));
                    out.extend_from_slice(&(*imm as u16).to_le_bytes());
                }
                Width::Dword => {
                    if !(-(1i64 << 31)..(1i64 << 32)).contains(imm) {
                        return Err(*imm);
                    }
                    if n >= 8 {
                        out.push(0x41);
                    }
                    out.push(0xB8 + (n & 7));
                    out.extend_from_slice(&(*imm as u32).to_le_bytes());
                }
                Width::Qword => {
                    // REX.W C7 /0 imm32, sign-extended.
                    let v = i32::try_from(*imm).map_err(|_| *imm)?;
                    out.push(rex(true, false, false, n >= 8));
                    out.push(0xC7);
                    out.push(modrm(0b11, 0, n & 7));
                    out.extend_from_slice(&v.to_le_bytes());
                }
            }
        }

        Inst::MovAbs { dst, src } => {
            let n = dst.num();
            out.push(rex(true, false, false, n >= 8));
            out.push(0xB8 + (n & 7));
            match src {
                AbsSource::Imm(v) => out.extend_from_slice(&v.to_le_bytes()),
                AbsSource::Sym(sym) => {
                    let (section, sym_offset) = sym_lookup(sym);
                    relocs.push(Reloc {
                        offset: text_offset + out.len(),
                        section,
                        sym_offset,
                        kind: RelocKind::Abs64,
                    });
                    out.extend_from_slice(&[0u8; 8]);
                }
            }
        }

        Inst::Load { size, dst, src } => {
            encode_rm(*size, if *size == Width::Byte { 0x8A } else { 0x8B }, dst, src, out);
        }
        Inst::Store { size, dst, src } => {
            encode_rm(*size, if *size == Width::Byte { 0x88 } else { 0x89 }, src, dst, out);
        }
        Inst::StoreImm8 { dst, imm } => {
            let mut tail = Vec::new();
            let rex_b = mem_operand(0, dst, &mut tail);
            if rex_b {
                out.push(rex(false, false, false, true));
            }
            out.push(0xC6);
            out.extend_from_slice(&tail);
            out.push(*imm);
        }

        Inst::MovsxMem { from, dst, src } => {
            let op = if *from == Width::Byte { 0xBE } else { 0xBF };
            encode_rm_0f(Width::Dword, op, dst, src, out);
        }
        Inst::MovzxMem { from, dst, src } => {
            let op = if *from == Width::Byte { 0xB6 } else { 0xB7 };
            encode_rm_0f(Width::Dword, op, dst, src, out);
        }
        Inst::MovsxReg { from, size, dst, src } => {
            let op = if *from == Width::Byte { 0xBE } else { 0xBF };
            let (d, s) = (dst.num(), src.num());
            let w = *size == Width::Qword;
            if w || d >= 8 || s >= 8 || (*from == Width::Byte && s >= 4) {
                out.push(rex(w, d >= 8, false, s >= 8));
            }
            out.push(0x0F);
            out.push(op);
            out.push(modrm(0b11, d & 7, s & 7));
        }
        Inst::MovzxReg { from, dst, src } => {
            let op = if *from == Width::Byte { 0xB6 } else { 0xB7 };
            let (d, s) = (dst.num(), src.num());
            if d >= 8 || s >= 8 || (*from == Width::Byte && s >= 4) {
                out.push(rex(false, d >= 8, false, s >= 8));
            }
            out.push(0x0F);
            out.push(op);
            out.push(modrm(0b11, d & 7, s & 7));
        }
        Inst::Movsxd { dst, src } => {
            let (d, s) = (dst.num(), src.num());
            out.push(rex(true, d >= 8, false, s >= 8));
            out.push(0x63);
            out.push(modrm(0b11, d & 7, s & 7));
        }

        Inst::Lea { dst, sym } => {
            let d = dst.num();
            out.push(rex(true, d >= 8, false, false));
            out.push(0x8D);
            out.push(modrm(0b00, d & 7, 0b101)); // rip-relative
            let (section, sym_offset) = sym_lookup(sym);
            relocs.push(Reloc {
                offset: text_offset + out.len(),
                section,
                sym_offset,
                kind: RelocKind::Pc32,
            });
            out.extend_from_slice(&[0u8; 4]);
        }

        Inst::Alu { op, size, dst, src } => {
            let base = op.digit() * 8 + if *size == Width::Byte { 0x00 } else { 0x01 };
            encode_rr(*size, base, src, dst, out);
        }
        Inst::AluImm { op, size, dst, imm } => {
            let n = dst.num();
            match size {
                Width::Byte => {
                    if !(-128..=255).contains(imm) {
                        return Err(*imm as i64);
                    }
                    if n >= 4 {
                        out.push(rex(false, false, false, n >= 8));
                    }
                    out.push(0x80);
                    out.push(modrm(0b11, op.digit(), n & 7));
                    out.push(*imm as u8);
                }
                Width::Word => {
                    out.push(0x66);
                    if n >= 8 {
                        out.push(0x41);
                    }
                    if (-128..=127).contains(imm) {
                        out.push(0x83);
                        out.push(modrm(0b11, op.digit(), n & 7));
                        out.push(*imm as u8);
                    } else {
                        out.push(0x81);
                        out.push(modrm(0b11, op.digit(), n & 7));
                        out.extend_from_slice(&(*imm as u16).to_le_bytes());
                    }
                }
                Width::Dword | Width::Qword => {
                    let w = *size == Width::Qword;
                    if w || n >= 8 {
                        out.push(rex(w, false, false, n >= 8));
                    }
                    if (-128..=127).contains(imm) {
                        out.push(0x83);
                        out.push(modrm(0b11, op.digit(), n & 7));
                        out.push(*imm as u8);
                    } else {
                        out.push(0x81);
                        out.push(modrm(0b11, op.digit(), n & 7));
                        out.extend_from_slice(&imm.to_le_bytes());
                    }
                }
            }
        }

        Inst::Shift { op, size, reg } => {
            encode_group(*size, 0xD3, 0xD2, op.digit(), reg, out);
        }
        Inst::Neg { size, reg } => encode_group(*size, 0xF7, 0xF6, 3, reg, out),
        Inst::Not { size, reg } => encode_group(*size, 0xF7, 0xF6, 2, reg, out),
        Inst::Idiv { size, reg } => encode_group(*size, 0xF7, 0xF6, 7, reg, out),
        Inst::Div { size, reg } => encode_group(*size, 0xF7, 0xF6, 6, reg, out),
        Inst::Inc { size, reg } => encode_group(*size, 0xFF, 0xFE, 0, reg, out),
        Inst::Dec { size, reg } => encode_group(*size, 0xFF, 0xFE, 1, reg, out),

        Inst::Imul { size, dst, src } => {
            let (d, s) = (dst.num(), src.num());
            let w = *size == Width::Qword;
            if w || d >= 8 || s >= 8 {
                out.push(rex(w, d >= 8, false, s >= 8));
            }
            out.push(0x0F);
            out.push(0xAF);
            out.push(modrm(0b11, d & 7, s & 7));
        }

        Inst::Cdq => out.push(0x99),
        Inst::Cqo => {
            out.push(0x48);
            out.push(0x99);
        }

        Inst::Test { size, lhs, rhs } => {
            encode_rr(*size, if *size == Width::Byte { 0x84 } else { 0x85 }, rhs, lhs, out);
        }

        Inst::Setcc { cc, reg } => {
            let n = reg.num();
            if n >= 4 {
                out.push(rex(false, false, false, n >= 8));
            }
            out.push(0x0F);
            out.push(0x90 + cc.code());
            out.push(modrm(0b11, 0, n & 7));
        }

        Inst::Ret => out.push(0xC3),
        Inst::Syscall => {
            out.push(0x0F);
            out.push(0x05);
        }
    }
    Ok(())
}

/// reg-to-reg form: `opcode /r` with `reg` in the reg field and `rm` in r/m.
fn encode_rr(size: Width, opcode: u8, reg: &Reg, rm: &Reg, out: &mut Vec<u8>) {
    let (r, m) = (reg.num(), rm.num());
    if size == Width::Word {
        out.push(0x66);
    }
    let w = size == Width::Qword;
    let byte_rex = size == Width::Byte && (r >= 4 || m >= 4);
    if w || r >= 8 || m >= 8 || byte_rex {
        out.push(rex(w, r >= 8, false, m >= 8));
    }
    out.push(opcode);
    out.push(modrm(0b11, r & 7, m & 7));
}

/// reg-with-memory form: `opcode /r` against `[base+disp]`.
fn encode_rm(size: Width, opcode: u8, reg: &Reg, mem: &Mem, out: &mut Vec<u8>) {
    let r = reg.num();
    let mut tail = Vec::new();
    let rex_b = mem_operand(r & 7, mem, &mut tail);
    if size == Width::Word {
        out.push(0x66);
    }
    let w = size == Width::Qword;
    let byte_rex = size == Width::Byte && r >= 4;
    if w || r >= 8 || rex_b || byte_rex {
        out.push(rex(w, r >= 8, false, rex_b));
    }
    out.push(opcode);
    out.extend_from_slice(&tail);
}

/// Two-byte-opcode memory form (`0F op /r`), used by movsx/movzx loads.
fn encode_rm_0f(_size: Width, opcode: u8, reg: &Reg, mem: &Mem, out: &mut Vec<u8>) {
    let r = reg.num();
    let mut tail = Vec::new();
    let rex_b = mem_operand(r & 7, mem, &mut tail);
    if r >= 8 || rex_b {
        out.push(rex(false, r >= 8, false, rex_b));
    }
    out.push(0x0F);
    out.push(opcode);
    out.extend_from_slice(&tail);
}

/// Single-operand opcode-extension group (`F7 /digit` and friends).
fn encode_group(size: Width, op_full: u8, op_byte: u8, digit: u8, reg: &Reg, out: &mut Vec<u8>) {
    let n = reg.num();
    if size == Width::Word {
        out.push(0x66);
    }
    let w = size == Width::Qword;
    let byte_rex = size == Width::Byte && n >= 4;
    if w || n >= 8 || byte_rex {
        out.push(rex(w, false, false, n >= 8));
    }
    out.push(if size == Width::Byte { op_byte } else { op_full });
    out.push(modrm(0b11, digit, n & 7));
}
