//! ELF64 executable writer.
//!
//! One PT_LOAD segment mapping the whole file R|X at 0x400000. Code starts at
//! file offset 0x1000 so the entry point is always 0x401000; `.rodata`
//! follows `.text` directly and `.bss` is embedded as file zeros, keeping
//! `p_filesz == p_memsz`.

use crate::encode::{Reloc, RelocKind, SectionRef};

pub const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];
pub const ELFCLASS64: u8 = 2;
pub const ELFDATA2LSB: u8 = 1;
pub const EV_CURRENT: u8 = 1;
pub const ELFOSABI_SYSV: u8 = 0;
pub const ET_EXEC: u16 = 2;
pub const EM_X86_64: u16 = 0x3e;

pub const PT_LOAD: u32 = 1;
pub const PF_X: u32 = 0x1;
pub const PF_R: u32 = 0x4;

pub const BASE_VADDR: u64 = 0x400000;
pub const PAGE_SIZE: u64 = 0x1000;

const EHDR_SIZE: usize = 64;
const PHDR_SIZE: usize = 56;

/// Final section addresses for one image, used both for ELF output and for
/// patching the raw blob (where the base address is simply zero).
pub struct Layout {
    pub text_vaddr: u64,
    pub rodata_vaddr: u64,
    pub bss_vaddr: u64,
}

impl Layout {
    pub fn section_vaddr(&self, section: SectionRef) -> u64 {
        match section {
            SectionRef::Rodata => self.rodata_vaddr,
            SectionRef::Bss => self.bss_vaddr,
        }
    }
}

/// Rewrite every relocation site in `text` with final virtual addresses.
pub fn apply_relocs(text: &mut [u8], relocs: &[Reloc], layout: &Layout) {
    for reloc in relocs {
        let target = layout.section_vaddr(reloc.section) + reloc.sym_offset as u64;
        match reloc.kind {
            RelocKind::Abs64 => {
                text[reloc.offset..reloc.offset + 8].copy_from_slice(&target.to_le_bytes());
            }
            RelocKind::Pc32 => {
                let site = layout.text_vaddr + reloc.offset as u64;
                let disp = target as i64 - (site as i64 + 4);
                text[reloc.offset..reloc.offset + 4]
                    .copy_from_slice(&(disp as i32).to_le_bytes());
            }
        }
    }
}

/// Build the complete executable image.
pub fn write_executable(text: &[u8], rodata: &[u8], bss_size: u64, relocs: &[Reloc]) -> Vec<u8> {
    let code_offset = PAGE_SIZE;
    let layout = Layout {
        text_vaddr: BASE_VADDR + code_offset,
        rodata_vaddr: BASE_VADDR + code_offset + text.len() as u64,
        bss_vaddr: BASE_VADDR + code_offset + text.len() as u64 + rodata.len() as u64,
    };

    let mut patched = text.to_vec();
    apply_relocs(&mut patched, relocs, &layout);

    let total_size = code_offset + text.len() as u64 + rodata.len() as u64 + bss_size;
    let entry = layout.text_vaddr;

    let mut image = Vec::with_capacity(total_size as usize);
    image.extend_from_slice(&elf_header(entry));
    image.extend_from_slice(&program_header(total_size));
    image.resize(code_offset as usize, 0);
    image.extend_from_slice(&patched);
    image.extend_from_slice(rodata);
    image.resize(total_size as usize, 0);

    log::debug!(
        "elf image: {} bytes text, {} bytes rodata, {} bytes bss, entry {entry:#x}",
        text.len(),
        rodata.len(),
        bss_size
    );
    image
}

fn elf_header(entry: u64) -> [u8; EHDR_SIZE] {
    let mut h = [0u8; EHDR_SIZE];
    h[0..4].copy_from_slice(&ELF_MAGIC);
    h[4] = ELFCLASS64;
    h[5] = ELFDATA2LSB;
    h[6] = EV_CURRENT;
    h[7] = ELFOSABI_SYSV;
    h[16..18].copy_from_slice(&ET_EXEC.to_le_bytes());
    h[18..20].copy_from_slice(&EM_X86_64.to_le_bytes());
    h[20..24].copy_from_slice(&(EV_CURRENT as u32).to_le_bytes());
    h[24..32].copy_from_slice(&entry.to_le_bytes());
    h[32..40].copy_from_slice(&(EHDR_SIZE as u64).to_le_bytes()); // e_phoff
    // e_shoff stays 0: no section headers.
    h[52..54].copy_from_slice(&(EHDR_SIZE as u16).to_le_bytes());
    h[54..56].copy_from_slice(&(PHDR_SIZE as u16).to_le_bytes());
    h[56..58].copy_from_slice(&1u16.to_le_bytes()); // e_phnum
    h
}

fn program_header(total_size: u64) -> [u8; PHDR_SIZE] {
    let mut h = [0u8; PHDR_SIZE];
    h[0..4].copy_from_slice(&PT_LOAD.to_le_bytes());
    h[4..8].copy_from_slice(&(PF_R | PF_X).to_le_bytes());
    // p_offset = 0: the segment maps the file from byte zero.
    h[16..24].copy_from_slice(&BASE_VADDR.to_le_bytes());
    h[24..32].copy_from_slice(&BASE_VADDR.to_le_bytes());
    h[32..40].copy_from_slice(&total_size.to_le_bytes());
    h[40..48].copy_from_slice(&total_size.to_le_bytes());
    h[48..56].copy_from_slice(&PAGE_SIZE.to_le_bytes());
    h
}
