use anyhow::Result;
use axis_frontend::sema::CheckedProgram;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetArch {
    X86_64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetOs {
    Linux,
}

#[derive(Debug, Clone)]
pub struct Target {
    pub arch: TargetArch,
    pub os: TargetOs,
}

impl Target {
    pub fn triple(&self) -> &'static str {
        match (self.arch, self.os) {
            (TargetArch::X86_64, TargetOs::Linux) => "x86_64-unknown-linux-none",
        }
    }
}

/// What the backend hands back: a bootable ELF64 image, or the bare
/// `[_start || code || rodata]` byte blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Raw,
    Elf,
}

pub trait CodeGenerator {
    fn target(&self) -> &Target;
    fn generate(&mut self, program: &CheckedProgram) -> Result<Vec<u8>>;
    /// Human-readable assembly listing of the last `generate` call, for `-v`.
    fn listing(&self) -> &str;
}
