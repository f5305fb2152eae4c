//! Fin Compiler driver
//!
//! Compiles one source file and writes the product of the requested stage.

use anyhow::Context;
use clap::{Parser, ValueEnum};
use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use finc::utils::diagnostic;
use finc::{CompileOptions, Compiler, Output, Stage};

/// Fin Compiler
#[derive(Parser, Debug)]
#[command(name = "finc")]
#[command(version = "0.1.0")]
#[command(about = "finc - compiler core for the Fin expression language")]
struct Cli {
    /// Input source file
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Output file (defaults to the input with a .fo extension)
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Module name the file is compiled as
    #[arg(short = 'n', long = "name", default_value = "main")]
    name: String,

    /// Stop after this stage and dump its result
    #[arg(short, long, value_enum, default_value_t = StageArg::Exec)]
    stage: StageArg,

    /// Runtime named in the object's #! line
    #[arg(long, default_value = "finvm")]
    runtime: String,

    /// Return errors to the caller instead of printing diagnostics
    #[arg(short, long)]
    debug: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum StageArg {
    Lex,
    Parse,
    Ast,
    Asm,
    Exec,
}

impl From<StageArg> for Stage {
    fn from(stage: StageArg) -> Self {
        match stage {
            StageArg::Lex => Stage::Lex,
            StageArg::Parse => Stage::Parse,
            StageArg::Ast => Stage::Ast,
            StageArg::Asm => Stage::Asm,
            StageArg::Exec => Stage::Exec,
        }
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let source = fs::read_to_string(&cli.input)
        .with_context(|| format!("cannot read {}", cli.input.display()))?;

    let options = CompileOptions { module_name: cli.name.clone(), runtime: cli.runtime.clone() };
    let mut compiler = Compiler::new(options);
    log::info!("compiling {} as {}", cli.input.display(), compiler.options().module_name);

    let output = match compiler.run(&source, cli.stage.into()) {
        Ok(output) => output,
        Err(err) if cli.debug => {
            return Err(err).with_context(|| format!("compiling {}", cli.input.display()));
        }
        Err(err) => {
            eprintln!("{}", diagnostic::render(&err, &source));
            process::exit(1);
        }
    };

    match output {
        Output::Text(text) => match &cli.output {
            Some(path) => write_output(path, text.as_bytes())?,
            None => println!("{}", text),
        },
        Output::Binary(bytes) => {
            let path = cli.output.clone().unwrap_or_else(|| cli.input.with_extension("fo"));
            write_output(&path, &bytes)?;
            log::info!("wrote {} bytes to {}", bytes.len(), path.display());
        }
    }
    Ok(())
}

fn write_output(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    fs::write(path, bytes).with_context(|| format!("cannot write {}", path.display()))
}
