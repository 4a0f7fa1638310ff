//! scorch: compile text notation to a Standard MIDI File.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{debug, info};

use scorch::{Compiler, CompilerConfig};

#[derive(Parser)]
#[command(name = "scorch")]
#[command(about = "Compile text music notation to MIDI", version)]
struct Cli {
    /// Inline notation; joined with spaces
    notation: Vec<String>,

    /// Read notation from a file instead
    #[arg(short, long, conflicts_with = "notation")]
    file: Option<PathBuf>,

    /// Output MIDI file
    #[arg(short, long, default_value = "output.mid")]
    output: PathBuf,

    /// Gas budget (overrides ~/.scorch/config.yaml)
    #[arg(long)]
    gas: Option<u64>,

    /// Print note timing as JSON instead of writing MIDI
    #[arg(long)]
    timeline: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();
    let cli = Cli::parse();

    let source = match &cli.file {
        Some(path) => match std::fs::read_to_string(path) {
            Ok(source) => source,
            Err(e) => {
                eprintln!("failed to read {}: {e}", path.display());
                return ExitCode::FAILURE;
            }
        },
        None if cli.notation.is_empty() => {
            eprintln!("nothing to compile: pass notation or --file");
            return ExitCode::FAILURE;
        }
        None => cli.notation.join(" "),
    };

    let mut config = CompilerConfig::load().unwrap_or_default();
    if let Some(gas) = cli.gas {
        config.gas = gas;
    }
    debug!(gas = config.gas, "configuration");
    let compiler = Compiler::new(config);

    if cli.timeline {
        return match compiler.compute_timeline(&source) {
            Ok(highlights) => match serde_json::to_string_pretty(&highlights) {
                Ok(json) => {
                    println!("{json}");
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    eprintln!("failed to encode timeline: {e}");
                    ExitCode::FAILURE
                }
            },
            Err(e) => report(&e, &source),
        };
    }

    let bytes = match compiler.compile(&source) {
        Ok(bytes) => bytes,
        Err(e) => return report(&e, &source),
    };
    if let Err(e) = std::fs::write(&cli.output, &bytes) {
        eprintln!("failed to write {}: {e}", cli.output.display());
        return ExitCode::FAILURE;
    }
    info!(bytes = bytes.len(), output = %cli.output.display(), "written");
    ExitCode::SUCCESS
}

fn report(error: &scorch::CompileError, source: &str) -> ExitCode {
    eprintln!("{error}");
    eprintln!("{}", error.excerpt(source));
    ExitCode::FAILURE
}
