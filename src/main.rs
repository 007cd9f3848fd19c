use clap::Parser;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use krait::{InterpretError, RuntimeConfig, VM};

// sysexits-style codes, so scripts can tell the failure domains apart.
const EX_DATAERR: u8 = 65;
const EX_SOFTWARE: u8 = 70;

#[derive(Parser)]
#[command(name = "krait")]
#[command(about = "A small scripting language with a bytecode VM", long_about = None)]
struct Cli {
    /// Script to run; omit to start the REPL
    script: Option<PathBuf>,

    /// Trace execution: print the stack and each instruction as it runs
    #[arg(long)]
    trace: bool,

    /// Disassemble each function after it is compiled
    #[arg(long)]
    dump: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = RuntimeConfig {
        trace_execution: cli.trace,
        print_code: cli.dump,
    };

    match cli.script {
        Some(path) => run_file(&path, config),
        None => repl(config),
    }
}

fn run_file(path: &Path, config: RuntimeConfig) -> ExitCode {
    let source = match std::fs::read_to_string(path) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("error: could not read file '{}': {}", path.display(), e);
            return ExitCode::FAILURE;
        }
    };

    let mut vm = VM::with_config(config);
    match vm.interpret(&source) {
        Ok(()) => ExitCode::SUCCESS,
        Err(InterpretError::Compile) => ExitCode::from(EX_DATAERR),
        Err(InterpretError::Runtime) => ExitCode::from(EX_SOFTWARE),
    }
}

/// Each line is an independent program against the same VM, so globals and
/// interned strings carry over between lines.
fn repl(config: RuntimeConfig) -> ExitCode {
    let mut editor = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let mut vm = VM::with_config(config);
    loop {
        match editor.readline("> ") {
            Ok(line) => {
                if line.trim().is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(&line);
                // A failed line is already reported; the session goes on.
                let _ = vm.interpret(&line);
            }
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("error: {}", e);
                return ExitCode::FAILURE;
            }
        }
    }
    ExitCode::SUCCESS
}
