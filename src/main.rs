use std::path::Path;
use std::path::PathBuf;
use std::process::Command;
use std::process::ExitCode;

use clap::Parser;

use fasterbasic::compiler::CompileOptions;
use fasterbasic::compiler::compile_source;
use fasterbasic::logger;

/// FasterBASIC compiler driver: BASIC source to QBE IL, assembly, or a
/// linked executable.
#[derive(Clone, Debug, Parser)]
#[command(name = "fbc")]
struct Args {
    /// BASIC source file (.bas)
    input: PathBuf,
    /// output path for the final artifact
    #[arg(short = 'o')]
    output: Option<PathBuf>,
    /// emit QBE IL and stop
    #[arg(short = 'i')]
    emit_il: bool,
    /// compile to assembly and stop
    #[arg(short = 'c')]
    compile_only: bool,
    /// dump the control-flow graphs to stderr and stop
    #[arg(short = 'G')]
    dump_cfg: bool,
    /// target passed through to the backend
    #[arg(short = 't')]
    target: Option<String>,
    /// backend debug categories; also raises the driver's log level
    #[arg(short = 'd')]
    debug: Option<String>,
    /// let the backend fuse multiply-adds
    #[arg(long, overrides_with = "disable_madd_fusion")]
    enable_madd_fusion: bool,
    #[arg(long)]
    disable_madd_fusion: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();
    if args.debug.is_some() {
        logger::init_logger_debug();
    } else {
        logger::init_logger();
    }
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("fbc: {message}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<(), String> {
    let extension = args
        .input
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("");
    if !extension.eq_ignore_ascii_case("bas") {
        return Err(format!(
            "{}: not a BASIC source file (.bas expected)",
            args.input.display()
        ));
    }
    let source = std::fs::read_to_string(&args.input)
        .map_err(|e| format!("{}: {e}", args.input.display()))?;

    let options = CompileOptions {
        dump_cfg: args.dump_cfg,
    };
    let output = compile_source(&source, &options).map_err(|e| e.to_string())?;
    for diag in output.diagnostics.iter() {
        eprintln!("fbc: {diag}");
    }

    if args.dump_cfg {
        eprint!("{}", output.cfg_dump.unwrap_or_default());
        return Ok(());
    }

    let stem = args
        .input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("out");

    if args.emit_il {
        let il_path = args
            .output
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("{stem}.ssa")));
        std::fs::write(&il_path, &output.il)
            .map_err(|e| format!("{}: {e}", il_path.display()))?;
        return Ok(());
    }

    // assemble via the backend, then hand the assembly to the C compiler
    let il_path = std::env::temp_dir().join(format!("fbc_{stem}.ssa"));
    std::fs::write(&il_path, &output.il).map_err(|e| format!("{}: {e}", il_path.display()))?;

    let asm_path = if args.compile_only {
        args.output
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("{stem}.s")))
    } else {
        std::env::temp_dir().join(format!("fbc_{stem}.s"))
    };
    run_backend(args, &il_path, &asm_path)?;
    if args.compile_only {
        return Ok(());
    }

    let exe_path = args.output.clone().unwrap_or_else(|| PathBuf::from(stem));
    link(&asm_path, &exe_path)
}

fn run_backend(args: &Args, il: &Path, asm: &Path) -> Result<(), String> {
    let mut cmd = Command::new("qbe");
    if let Some(target) = &args.target {
        cmd.arg("-t").arg(target);
    }
    if let Some(flags) = &args.debug {
        cmd.arg("-d").arg(flags);
    }
    if args.enable_madd_fusion {
        cmd.env("QBE_MADD_FUSION", "1");
    } else if args.disable_madd_fusion {
        cmd.env("QBE_MADD_FUSION", "0");
    }
    let status = cmd
        .arg(il)
        .arg("-o")
        .arg(asm)
        .status()
        .map_err(|e| format!("running qbe: {e}"))?;
    if !status.success() {
        return Err(format!("qbe failed with status {status}"));
    }
    Ok(())
}

fn link(asm: &Path, exe: &Path) -> Result<(), String> {
    let status = Command::new("cc")
        .arg(asm)
        .arg("-o")
        .arg(exe)
        .arg("-lfbrt")
        .arg("-lm")
        .status()
        .map_err(|e| format!("running cc: {e}"))?;
    if !status.success() {
        return Err(format!("cc failed with status {status}"));
    }
    Ok(())
}
