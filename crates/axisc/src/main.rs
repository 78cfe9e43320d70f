use anyhow::{Context, Result};
use clap::Parser;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use axis_backend_x86_64::X86_64LinuxBackend;
use axis_codegen::CodeGenerator;
use axis_frontend::ast::Mode;
use axis_frontend::diag::Diagnostic;

#[derive(Parser, Debug)]
#[command(name = "axisc")]
#[command(about = "AXIS compiler for Linux x86-64", long_about = None)]
struct Cli {
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// Output path; defaults to the input file stem.
    #[arg(short, long, value_name = "FILE")]
    out: Option<PathBuf>,

    /// Emit a complete ELF64 executable instead of a raw code blob.
    #[arg(long)]
    elf: bool,

    /// Stop after semantic analysis; report diagnostics, write nothing.
    #[arg(long)]
    check: bool,

    /// Dump the generated assembly listing to stdout.
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();
    match run(&cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("axisc: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn report(cli: &Cli, d: &Diagnostic) -> ExitCode {
    eprintln!("axis: {} at {}:{}:{}: {}", d.kind, cli.input.display(), d.line, d.col, d.message);
    ExitCode::FAILURE
}

fn run(cli: &Cli) -> Result<ExitCode> {
    let src = fs::read_to_string(&cli.input)
        .with_context(|| format!("cannot read {}", cli.input.display()))?;

    let program = match axis_frontend::parse_source(&src) {
        Ok(p) => p,
        Err(d) => return Ok(report(cli, &d)),
    };
    if program.mode == Mode::Script {
        anyhow::bail!("script mode is interpreted by the outer tooling, not compiled");
    }

    let checked = match axis_frontend::sema::analyze(&program) {
        Ok(c) => c,
        Err(d) => return Ok(report(cli, &d)),
    };
    if cli.check {
        log::info!("check passed: {} functions", checked.funcs.len());
        return Ok(ExitCode::SUCCESS);
    }

    let mut backend = if cli.elf { X86_64LinuxBackend::new_elf() } else { X86_64LinuxBackend::new_raw() };
    let image = backend.generate(&checked)?;

    if cli.verbose {
        print!("{}", backend.listing());
    }

    let out = match &cli.out {
        Some(p) => p.clone(),
        None => PathBuf::from(cli.input.file_stem().unwrap_or_default()),
    };
    fs::write(&out, &image).with_context(|| format!("cannot write {}", out.display()))?;

    if cli.elf {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = fs::metadata(&out)?.permissions();
            perms.set_mode(perms.mode() | 0o755);
            fs::set_permissions(&out, perms)?;
        }
    }

    println!("Wrote {} ({} bytes)", out.display(), image.len());
    Ok(ExitCode::SUCCESS)
}
