use std::{fs, path::PathBuf, process::ExitCode};

use anyhow::{Context, Result};
use clap::Parser;

use mml::{compile_module, printer};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Source file to compile.
    file: PathBuf,

    /// Override the module name derived from the file stem.
    #[arg(long)]
    module_name: Option<String>,

    /// Dump the analyzed module as JSON.
    #[arg(long)]
    emit_ast: bool,

    /// Render the analyzed module back to source.
    #[arg(long)]
    emit_source: bool,

    /// Increase log verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    simple_logger::SimpleLogger::new().with_level(level).init()?;

    let source = fs::read_to_string(&cli.file)
        .with_context(|| format!("failed to read {}", cli.file.display()))?;

    let module_name = cli.module_name.clone().unwrap_or_else(|| {
        cli.file
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_else(|| "main".to_string())
    });

    let (module, errors) = match compile_module(&module_name, &source) {
        Ok(result) => result,
        Err(e) => {
            eprintln!("{e}");
            return Ok(ExitCode::FAILURE);
        }
    };

    if cli.emit_ast {
        println!("{}", serde_json::to_string_pretty(&module)?);
    }

    if cli.emit_source {
        println!("{}", printer::print_module(&module, false));
    }

    for error in &errors {
        eprintln!("[{}] {error}\n", error.phase());
    }

    if errors.is_empty() {
        log::info!("{module_name}: {} members, no errors", module.members.len());
        Ok(ExitCode::SUCCESS)
    } else {
        eprintln!("{}: {} error(s)", module_name, errors.len());
        Ok(ExitCode::FAILURE)
    }
}
