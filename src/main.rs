// src/main.rs

// Linaro
// A small dynamically-typed scripting language compiled to bytecode for a stack VM.

use clap::Parser as ClapParser;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use linaro::{interpret, Config, InterpretStatus, VM};

#[derive(ClapParser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Script to run. Starts the REPL when omitted.
    file: Option<PathBuf>,

    /// Run this source text instead of a file.
    #[arg(short = 'e', long = "eval", value_name = "SOURCE", conflicts_with = "file")]
    eval: Option<String>,

    /// Raise log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Log every executed instruction (needs -vvv to be visible).
    #[arg(long)]
    trace: bool,

    /// Print the compiled bytecode to stderr before running.
    #[arg(long)]
    disassemble: bool,

    /// Maximum number of nested calls.
    #[arg(long, value_name = "N")]
    max_call_depth: Option<usize>,
}

const EXIT_COMPILE_ERROR: u8 = 65;
const EXIT_RUNTIME_ERROR: u8 = 70;

fn show_examples() {
    println!("\n--- Linaro Examples ---\n");

    let examples = [
        ("Arithmetic", "print 1 + 2 * 3"),
        ("Globals", "x = 10; print x ^ 2"),
        ("Arrays", "a = [1, 2, 3]; a[1] = \"two\"; print a"),
        ("Recursion", "fn fib(n) { if n < 2 { ret n } ret fib(n - 1) + fib(n - 2) }; print fib(10)"),
        ("Closures", "fn make(x) { ret fn() { ret x } }; print make(5)()"),
        ("Counter", "fn counter() { n = 0; ret fn() { n = n + 1; ret n } }; c = counter(); c(); print c()"),
    ];

    for (description, code) in examples.iter() {
        println!("// {}", description);
        println!("{}\n", code);
    }
    println!("-----------------------------\n");
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt().with_max_level(level).with_writer(std::io::stderr).init();
}

// Simple REPL. Every line is its own program.
fn repl(config: &Config) {
    println!("Linaro REPL");
    println!("Enter statements, 'quit', or ':examples'");

    let stdin = std::io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("> ");
        if std::io::stdout().flush().is_err() {
            break;
        }
        let Some(Ok(input)) = lines.next() else { break };
        let input_str = input.trim();

        if input_str == "quit" || input_str == "exit" { break; }
        if input_str.is_empty() { continue; }
        if input_str == ":examples" {
            show_examples();
            continue;
        }

        let mut vm = VM::new(config.clone());
        interpret(&mut vm, input_str, "<repl>");
    }
}

/// Reads and runs one script; an unreadable file is reported separately from script errors.
fn run_script(path: &Path, config: &Config) -> Result<InterpretStatus, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read file '{}': {}", path.display(), e))?;
    Ok(run_source(&content, &path.display().to_string(), config))
}

fn run_source(source: &str, file: &str, config: &Config) -> InterpretStatus {
    let mut vm = VM::new(config.clone());
    interpret(&mut vm, source, file)
}

fn exit_code(status: InterpretStatus) -> ExitCode {
    match status {
        InterpretStatus::Success => ExitCode::SUCCESS,
        InterpretStatus::CompileError => ExitCode::from(EXIT_COMPILE_ERROR),
        InterpretStatus::RuntimeError => ExitCode::from(EXIT_RUNTIME_ERROR),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = Config::new().with_trace_execution(cli.trace).with_disassemble(cli.disassemble);
    if let Some(depth) = cli.max_call_depth {
        config = config.with_max_call_depth(depth);
    }

    if let Some(source) = &cli.eval {
        return exit_code(run_source(source, "<eval>", &config));
    }

    let Some(path) = cli.file else {
        repl(&config);
        return ExitCode::SUCCESS;
    };
    match run_script(&path, &config) {
        Ok(status) => exit_code(status),
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
