use std::path::PathBuf;

use palc::Parser;

use crate::config::{Options, Trace};

#[derive(Parser, Debug)]
#[command(
    name = "tau",
    after_long_help = "Without a PATH, tau starts an interactive session."
)]
pub struct Cli {
    /// Program to compile into an executable
    pub path: Option<PathBuf>,

    /// Print the token stream of every line
    #[arg(long)]
    pub debug_lexer: bool,

    /// Print the tree of every expression
    #[arg(long)]
    pub debug_ast: bool,

    /// Print the IR of every unit
    #[arg(long)]
    pub debug_ir: bool,

    /// Report allocations and frees as they are emitted
    #[arg(long)]
    pub debug_memory: bool,

    /// Executable to write [default: a.out]
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Skip the interactive banner
    #[arg(short, long)]
    pub quiet: bool,
}

impl Cli {
    pub fn options(&self) -> Options {
        let defaults = Options::default();
        Options {
            trace: Trace {
                lexer: self.debug_lexer,
                ast: self.debug_ast,
                ir: self.debug_ir,
                memory: self.debug_memory,
            },
            quiet: self.quiet,
            output: self.output.clone().unwrap_or(defaults.output),
        }
    }
}
