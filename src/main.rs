use taulang::cli::Cli;
use taulang::codegen::aot;
use taulang::codegen::jit::JitBackend;
use taulang::config::Options;
use taulang::driver::{self, INDENT, LineSource, SourceBuffer, StrSource};
use taulang::error::CompileError;
use taulang::repl::Repl;
use taulang::session::Session;

use anyhow::Context as _;
use inkwell::context::Context;
use palc::Parser;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use yansi::Paint;

use std::fs;
use std::path::Path;
use std::process::ExitCode;

/// Reads lines from the terminal, pre-filling the indentation of the block
/// being entered.
struct Prompt {
    editor: DefaultEditor,
}

impl LineSource for Prompt {
    fn read_line(&mut self, level: usize) -> Option<String> {
        let prompt = if level == 0 { "Tau> " } else { "---> " };
        let indent = " ".repeat(level * INDENT);
        match self.editor.readline_with_initial(prompt, (&indent, "")) {
            Ok(line) => {
                if !line.trim().is_empty() {
                    let _ = self.editor.add_history_entry(line.as_str());
                }
                Some(line)
            }
            // abandons the block being typed
            Err(ReadlineError::Interrupted) => Some(String::new()),
            Err(ReadlineError::Eof) => None,
            Err(e) => {
                eprintln!("{} {}", "repl error:".red(), e);
                None
            }
        }
    }

    fn is_interactive(&self) -> bool {
        true
    }
}

fn history_path() -> Option<String> {
    let home = std::env::var("HOME").ok()?;
    Some(format!("{}/.tauhistory", home))
}

fn run_repl(options: Options) -> anyhow::Result<()> {
    let context = Context::create();
    let backend = JitBackend::new(&context)?;
    let mut repl = Repl::new(Session::new(options), backend);

    let mut editor = DefaultEditor::new().context("failed to open the terminal")?;
    let history = history_path();
    if let Some(path) = &history {
        let _ = editor.load_history(path);
    }

    let mut source = SourceBuffer::new(Prompt { editor });
    repl.run(&mut source);

    if let Some(path) = &history {
        let _ = source.source_mut().editor.save_history(path);
    }
    Ok(())
}

fn compile_file(path: &Path, options: Options) -> anyhow::Result<()> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;

    let mut session = Session::new(options);
    let mut source = SourceBuffer::new(StrSource::new(&text));
    let unit = driver::compile_program(&mut session, &mut source)?;
    aot::build_executable(&unit, &session.options.output)
        .with_context(|| format!("failed to build {}", session.options.output.display()))?;
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let options = cli.options();

    let (result, file) = match &cli.path {
        Some(path) => (compile_file(path, options), path.display().to_string()),
        None => (run_repl(options), taulang::repl::STDIN.to_string()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            match e.downcast_ref::<CompileError>() {
                Some(compile) => compile.eprint(&file),
                None => eprintln!("{} {:#}", "error:".red().bold(), e),
            }
            ExitCode::FAILURE
        }
    }
}
