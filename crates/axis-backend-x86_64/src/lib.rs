pub mod elf;
pub mod encode;
pub mod insn;
pub mod lower;

use anyhow::Result;
use axis_codegen::{CodeGenerator, OutputFormat, Target, TargetArch, TargetOs};
use axis_frontend::sema::CheckedProgram;

use encode::SymTab;

/// The whole back half of the pipeline: lowering, encoding and packaging for
/// Linux x86-64, producing either a bootable ELF64 image or the raw
/// `[_start || code || rodata]` blob.
pub struct X86_64LinuxBackend {
    target: Target,
    format: OutputFormat,
    listing: String,
}

impl X86_64LinuxBackend {
    pub fn new_elf() -> Self {
        Self {
            target: Target { arch: TargetArch::X86_64, os: TargetOs::Linux },
            format: OutputFormat::Elf,
            listing: String::new(),
        }
    }

    pub fn new_raw() -> Self {
        Self {
            target: Target { arch: TargetArch::X86_64, os: TargetOs::Linux },
            format: OutputFormat::Raw,
            listing: String::new(),
        }
    }
}

impl CodeGenerator for X86_64LinuxBackend {
    fn target(&self) -> &Target {
        &self.target
    }

    fn generate(&mut self, program: &CheckedProgram) -> Result<Vec<u8>> {
        let lowered = lower::lower(program);
        self.listing = insn::listing(&lowered.insts);
        log::debug!("lowered to {} instructions", lowered.insts.len());

        let mut symtab = SymTab::default();
        let mut rodata_bytes = Vec::new();
        for (label, bytes) in &lowered.rodata {
            symtab.rodata.insert(label.clone(), rodata_bytes.len() as u32);
            rodata_bytes.extend_from_slice(bytes);
        }
        let bss_size = if lowered.needs_read_failed {
            symtab.bss.insert(lower::READ_FAILED_SYM.to_string(), 0);
            1
        } else {
            0
        };

        let assembled = encode::assemble(&lowered.insts, &symtab)?;
        log::debug!(
            "assembled {} bytes of text, {} bytes of rodata, {} relocations",
            assembled.text.len(),
            rodata_bytes.len(),
            assembled.relocs.len()
        );

        match self.format {
            OutputFormat::Elf => {
                Ok(elf::write_executable(&assembled.text, &rodata_bytes, bss_size, &assembled.relocs))
            }
            OutputFormat::Raw => {
                // Raw blobs are laid out [text || rodata]; relocations are
                // patched as if the blob were loaded at address zero, so
                // absolute references hold plain blob offsets.
                let mut text = assembled.text;
                let layout = elf::Layout {
                    text_vaddr: 0,
                    rodata_vaddr: text.len() as u64,
                    bss_vaddr: (text.len() + rodata_bytes.len()) as u64,
                };
                elf::apply_relocs(&mut text, &assembled.relocs, &layout);
                text.extend_from_slice(&rodata_bytes);
                Ok(text)
            }
        }
    }

    fn listing(&self) -> &str {
        &self.listing
    }
}

// Re-exported so callers can format internal failures without reaching into
// the encoder module.
pub use encode::AsmError;
