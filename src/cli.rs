//! Command-line argument parsing for the `fjp` binary.

use std::path::PathBuf;

use clap::Parser;

/// A single-pass compiler and stack virtual machine for a small PL/0-style
/// teaching language.
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to the source file to compile.
    #[arg(index = 1)]
    pub input: PathBuf,

    /// Write `tokens.json`, `code.pl0-asm`, and `stacktrace.txt` alongside the current directory.
    #[arg(short = 'd', long = "debug")]
    pub debug: bool,

    /// Execute the compiled program after a successful compile.
    #[arg(short = 'r', long = "run")]
    pub run: bool,
}

impl Cli {
    pub fn init() -> Self {
        Cli::parse()
    }
}
