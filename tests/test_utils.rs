// tests/test_utils.rs

use linaro::vm::SharedOutput;
use linaro::{compile_source, Config, RuntimeError, VM};

/// Compiles and runs `source`, returning everything it printed. Panics on any error.
#[allow(dead_code)]
pub fn run_ok(source: &str) -> String {
    run_with_config(source, Config::default()).unwrap_or_else(|(err, out)| {
        panic!("runtime error: {}\noutput so far:\n{}", err, out)
    })
}

/// Runs `source` and returns the runtime error together with the output produced before it.
#[allow(dead_code)]
pub fn run_err(source: &str) -> (RuntimeError, String) {
    match run_with_config(source, Config::default()) {
        Ok(out) => panic!("expected a runtime error, program printed:\n{}", out),
        Err(failure) => failure,
    }
}

#[allow(dead_code)]
pub fn run_with_config(source: &str, config: Config) -> Result<String, (RuntimeError, String)> {
    let function = match compile_source(source, "test.lin") {
        Ok(function) => function,
        Err(err) => panic!("compile error: {:?}", err.diagnostics),
    };
    let output = SharedOutput::new();
    let mut vm = VM::with_output(config, Box::new(output.clone()));
    match vm.run(function) {
        Ok(()) => Ok(output.contents()),
        Err(err) => Err((err, output.contents())),
    }
}

/// The rendered compile diagnostics for a program expected not to compile.
#[allow(dead_code)]
pub fn compile_errors(source: &str) -> Vec<String> {
    match compile_source(source, "test.lin") {
        Ok(_) => panic!("expected compile errors for:\n{}", source),
        Err(err) => err.diagnostics.iter().map(|d| d.to_string()).collect(),
    }
}

/// Output lines of a successful run.
#[allow(dead_code)]
pub fn lines(source: &str) -> Vec<String> {
    run_ok(source).lines().map(str::to_string).collect()
}
