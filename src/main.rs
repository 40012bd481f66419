//! CLI entry point: parse arguments, compile the given source file to NASM
//! assembly, then shell out to `nasm` and `ld` to produce a native binary.

use std::path::PathBuf;
use std::process::{Command, ExitCode};

use clap::Parser as ClapParser;

use chronos::ast::OptLevel;
use chronos::config::CompilerConfig;
use chronos::error::CompileError;

#[derive(ClapParser, Debug)]
#[command(name = "chronos", version, about = "Compiles chronos source to a native x86-64 Linux binary")]
struct Cli {
    /// Source file to compile.
    input: PathBuf,

    /// Optimization level: 0 (none), 1 (constant folding), 2 (+ strength reduction).
    #[arg(short = 'O', value_name = "LEVEL", default_value = "0")]
    opt_level: u8,

    /// Where to write the generated assembly.
    #[arg(long, value_name = "PATH")]
    emit_asm: Option<PathBuf>,

    /// Output binary path.
    #[arg(short = 'o', value_name = "PATH")]
    output: Option<PathBuf>,

    /// Stop after emitting assembly; skip invoking nasm/ld.
    #[arg(long)]
    asm_only: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("chronos: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<(), CompileError> {
    let opt_level = match cli.opt_level {
        0 => OptLevel::O0,
        1 => OptLevel::O1,
        _ => OptLevel::O2,
    };

    let stem = cli.input.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_else(|| "output".to_string());
    let asm_path = cli.emit_asm.clone().unwrap_or_else(|| PathBuf::from(format!("{stem}.asm")));

    let config = CompilerConfig::new().with_opt_level(opt_level).with_asm_out(asm_path.clone());
    chronos::compile_file(&cli.input, &config)?;

    if cli.asm_only {
        return Ok(());
    }

    let obj_path = PathBuf::from(format!("{stem}.o"));
    let bin_path = cli.output.clone().unwrap_or_else(|| PathBuf::from(stem.clone()));

    run_tool("nasm", &["-f", "elf64", "-o", &path_str(&obj_path), &path_str(&asm_path)])?;
    run_tool("ld", &["-o", &path_str(&bin_path), &path_str(&obj_path)])?;

    Ok(())
}

fn path_str(p: &PathBuf) -> String {
    p.to_string_lossy().into_owned()
}

fn run_tool(tool: &str, args: &[&str]) -> Result<(), CompileError> {
    let output = Command::new(tool)
        .args(args)
        .output()
        .map_err(|e| CompileError::tool(tool, format!("failed to spawn: {e}")))?;
    if !output.status.success() {
        return Err(CompileError::tool(tool, String::from_utf8_lossy(&output.stderr).into_owned()));
    }
    Ok(())
}
