use axis_backend_x86_64::encode::{assemble, AsmError, SymTab};
use axis_backend_x86_64::insn::{AbsSource, AluOp, Cond, Inst, Mem, Reg, ShiftOp, Width};

fn bytes_of(insts: Vec<Inst>) -> Vec<u8> {
    assemble(&insts, &SymTab::default()).expect("assemble ok").text
}

#[test]
fn mov_imm_and_ret() {
    let text = bytes_of(vec![
        Inst::MovRI { size: Width::Dword, dst: Reg::Rax, imm: 42 },
        Inst::Ret,
    ]);
    assert_eq!(text, vec![0xB8, 0x2A, 0x00, 0x00, 0x00, 0xC3]);
}

#[test]
fn prologue_sequence() {
    let text = bytes_of(vec![
        Inst::Push(Reg::Rbp),
        Inst::MovRR { size: Width::Qword, dst: Reg::Rbp, src: Reg::Rsp },
        Inst::AluImm { op: AluOp::Sub, size: Width::Qword, dst: Reg::Rsp, imm: 16 },
    ]);
    assert_eq!(text, vec![0x55, 0x48, 0x89, 0xE5, 0x48, 0x83, 0xEC, 0x10]);
}

#[test]
fn extended_register_push_pop() {
    let text = bytes_of(vec![Inst::Push(Reg::R12), Inst::Pop(Reg::R12)]);
    assert_eq!(text, vec![0x41, 0x54, 0x41, 0x5C]);
}

#[test]
fn sized_stores_against_rbp() {
    let text = bytes_of(vec![
        Inst::Store { size: Width::Byte, dst: Mem::rbp(-1), src: Reg::Rax },
        Inst::Store { size: Width::Word, dst: Mem::rbp(-4), src: Reg::Rax },
        Inst::Store { size: Width::Dword, dst: Mem::rbp(-8), src: Reg::Rax },
        Inst::Store { size: Width::Qword, dst: Mem::rbp(-16), src: Reg::Rax },
    ]);
    assert_eq!(
        text,
        vec![
            0x88, 0x45, 0xFF, // mov byte [rbp-1], al
            0x66, 0x89, 0x45, 0xFC, // mov word [rbp-4], ax
            0x89, 0x45, 0xF8, // mov dword [rbp-8], eax
            0x48, 0x89, 0x45, 0xF0, // mov qword [rbp-16], rax
        ]
    );
}

#[test]
fn wide_displacement_uses_disp32() {
    let text = bytes_of(vec![Inst::Load { size: Width::Dword, dst: Reg::Rax, src: Mem::rbp(-256) }]);
    assert_eq!(text, vec![0x8B, 0x85, 0x00, 0xFF, 0xFF, 0xFF]);
}

#[test]
fn sign_and_zero_extending_loads() {
    let text = bytes_of(vec![
        Inst::MovsxMem { from: Width::Byte, dst: Reg::Rax, src: Mem::rbp(-1) },
        Inst::MovzxMem { from: Width::Word, dst: Reg::Rax, src: Mem::rbp(-4) },
        Inst::MovzxReg { from: Width::Byte, dst: Reg::Rax, src: Reg::Rax },
        Inst::Movsxd { dst: Reg::Rax, src: Reg::Rax },
    ]);
    assert_eq!(
        text,
        vec![
            0x0F, 0xBE, 0x45, 0xFF, // movsx eax, byte [rbp-1]
            0x0F, 0xB7, 0x45, 0xFC, // movzx eax, word [rbp-4]
            0x0F, 0xB6, 0xC0, // movzx eax, al
            0x48, 0x63, 0xC0, // movsxd rax, eax
        ]
    );
}

#[test]
fn rsp_and_r13_bases_get_sib_and_zero_disp() {
    let text = bytes_of(vec![
        Inst::MovzxMem { from: Width::Byte, dst: Reg::Rax, src: Mem::at(Reg::Rsp) },
        Inst::StoreImm8 { dst: Mem::at(Reg::R13), imm: 0 },
        Inst::Store { size: Width::Byte, dst: Mem::at(Reg::R11), src: Reg::Rax },
    ]);
    assert_eq!(
        text,
        vec![
            0x0F, 0xB6, 0x04, 0x24, // movzx eax, byte [rsp]
            0x41, 0xC6, 0x45, 0x00, 0x00, // mov byte [r13+0], 0
            0x41, 0x88, 0x03, // mov byte [r11], al
        ]
    );
}

#[test]
fn alu_division_and_shift_encodings() {
    let text = bytes_of(vec![
        Inst::Alu { op: AluOp::Add, size: Width::Dword, dst: Reg::Rax, src: Reg::Rcx },
        Inst::Cdq,
        Inst::Idiv { size: Width::Dword, reg: Reg::Rcx },
        Inst::Cqo,
        Inst::Div { size: Width::Qword, reg: Reg::Rcx },
        Inst::Shift { op: ShiftOp::Sar, size: Width::Dword, reg: Reg::Rax },
        Inst::Shift { op: ShiftOp::Shl, size: Width::Dword, reg: Reg::Rax },
        Inst::Shift { op: ShiftOp::Shr, size: Width::Qword, reg: Reg::Rax },
        Inst::Neg { size: Width::Dword, reg: Reg::Rax },
        Inst::Imul { size: Width::Qword, dst: Reg::Rax, src: Reg::R8 },
    ]);
    assert_eq!(
        text,
        vec![
            0x01, 0xC8, // add eax, ecx
            0x99, // cdq
            0xF7, 0xF9, // idiv ecx
            0x48, 0x99, // cqo
            0x48, 0xF7, 0xF1, // div rcx
            0xD3, 0xF8, // sar eax, cl
            0xD3, 0xE0, // shl eax, cl
            0x48, 0xD3, 0xE8, // shr rax, cl
            0xF7, 0xD8, // neg eax
            0x49, 0x0F, 0xAF, 0xC0, // imul rax, r8
        ]
    );
}

#[test]
fn setcc_and_test() {
    let text = bytes_of(vec![
        Inst::Test { size: Width::Byte, lhs: Reg::Rax, rhs: Reg::Rax },
        Inst::Setcc { cc: Cond::L, reg: Reg::Rax },
        Inst::Setcc { cc: Cond::B, reg: Reg::Rax },
    ]);
    assert_eq!(text, vec![0x84, 0xC0, 0x0F, 0x9C, 0xC0, 0x0F, 0x92, 0xC0]);
}

#[test]
fn syscall_and_movabs_immediate() {
    let text = bytes_of(vec![
        Inst::MovAbs { dst: Reg::Rax, src: AbsSource::Imm(0x1122334455667788) },
        Inst::Syscall,
    ]);
    assert_eq!(
        text,
        vec![0x48, 0xB8, 0x88, 0x77, 0x66, 0x55, 0x44, 0x33, 0x22, 0x11, 0x0F, 0x05]
    );
}

#[test]
fn backward_conditional_jump_is_short() {
    let text = bytes_of(vec![
        Inst::Label("top".into()),
        Inst::Jcc { cc: Cond::E, target: "top".into() },
    ]);
    assert_eq!(text, vec![0x74, 0xFE]);
}

#[test]
fn forward_jump_is_always_near() {
    let text = bytes_of(vec![
        Inst::Jmp("end".into()),
        Inst::Ret,
        Inst::Label("end".into()),
        Inst::Ret,
    ]);
    assert_eq!(text[..5], [0xE9, 0x01, 0x00, 0x00, 0x00]);
}

#[test]
fn call_displacement_is_relative_to_next_instruction() {
    let text = bytes_of(vec![
        Inst::Call("f".into()),
        Inst::Ret,
        Inst::Label("f".into()),
        Inst::Ret,
    ]);
    // call is 5 bytes, ret is 1: f sits at 6, so rel32 = 6 - 5 = 1.
    assert_eq!(text[..5], [0xE8, 0x01, 0x00, 0x00, 0x00]);
}

#[test]
fn short_jcc_widens_when_the_target_is_far() {
    let mut insts = vec![Inst::Jcc { cc: Cond::E, target: "far".into() }];
    for _ in 0..30 {
        insts.push(Inst::MovRI { size: Width::Dword, dst: Reg::Rax, imm: 0 });
    }
    insts.push(Inst::Label("far".into()));
    insts.push(Inst::Ret);
    let text = bytes_of(insts);
    // 30 x 5 = 150 bytes of padding cannot be reached with rel8.
    assert_eq!(text[0], 0x0F);
    assert_eq!(text[1], 0x84);
    let disp = i32::from_le_bytes(text[2..6].try_into().unwrap());
    assert_eq!(disp, 150);
}

#[test]
fn near_jcc_within_range_stays_short() {
    let mut insts = vec![Inst::Jcc { cc: Cond::E, target: "near".into() }];
    for _ in 0..10 {
        insts.push(Inst::MovRI { size: Width::Dword, dst: Reg::Rax, imm: 0 });
    }
    insts.push(Inst::Label("near".into()));
    insts.push(Inst::Ret);
    let text = bytes_of(insts);
    assert_eq!(text[0], 0x74);
    assert_eq!(text[1] as i8, 50);
}

#[test]
fn undefined_label_is_an_internal_error() {
    let err = assemble(
        &[Inst::Label("main".into()), Inst::Jmp("nowhere".into())],
        &SymTab::default(),
    )
    .unwrap_err();
    match err {
        AsmError::UndefinedLabel { function, label } => {
            assert_eq!(function, "main");
            assert_eq!(label, "nowhere");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn duplicate_label_is_an_internal_error() {
    let err = assemble(
        &[Inst::Label("x".into()), Inst::Label("x".into())],
        &SymTab::default(),
    )
    .unwrap_err();
    assert!(matches!(err, AsmError::DuplicateLabel { .. }));
}

#[test]
fn unknown_symbol_is_an_internal_error() {
    let err = assemble(
        &[Inst::MovAbs { dst: Reg::Rax, src: AbsSource::Sym("ghost".into()) }],
        &SymTab::default(),
    )
    .unwrap_err();
    assert!(matches!(err, AsmError::UnknownSymbol { .. }));
}

#[test]
fn movabs_symbol_emits_an_abs64_relocation() {
    use axis_backend_x86_64::encode::{RelocKind, SectionRef};
    let mut symtab = SymTab::default();
    symtab.rodata.insert(".L.str.0".into(), 6);
    let out = assemble(
        &[Inst::MovAbs { dst: Reg::Rax, src: AbsSource::Sym(".L.str.0".into()) }],
        &symtab,
    )
    .expect("assemble ok");
    assert_eq!(out.relocs.len(), 1);
    let r = &out.relocs[0];
    assert_eq!(r.offset, 2);
    assert_eq!(r.sym_offset, 6);
    assert_eq!(r.kind, RelocKind::Abs64);
    assert_eq!(r.section, SectionRef::Rodata);
}

#[test]
fn lea_emits_a_pc_relative_relocation() {
    use axis_backend_x86_64::encode::RelocKind;
    let mut symtab = SymTab::default();
    symtab.rodata.insert("msg".into(), 0);
    let out = assemble(&[Inst::Lea { dst: Reg::Rsi, sym: "msg".into() }], &symtab)
        .expect("assemble ok");
    assert_eq!(out.text[..3], [0x48, 0x8D, 0x35]);
    assert_eq!(out.relocs[0].offset, 3);
    assert_eq!(out.relocs[0].kind, RelocKind::Pc32);
}

#[test]
fn labels_have_stable_offsets() {
    let out = assemble(
        &[
            Inst::Label("_start".into()),
            Inst::Ret,
            Inst::Label("main".into()),
            Inst::MovRI { size: Width::Dword, dst: Reg::Rax, imm: 0 },
            Inst::Label(".Lmain_epilogue".into()),
            Inst::Ret,
        ],
        &SymTab::default(),
    )
    .expect("assemble ok");
    assert_eq!(out.labels["_start"], 0);
    assert_eq!(out.labels["main"], 1);
    assert_eq!(out.labels[".Lmain_epilogue"], 6);
}
