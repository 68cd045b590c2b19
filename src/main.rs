// ABOUTME: `clap`-derived CLI over the library crate: script mode runs one `Step` and prints it
// as pretty JSON, REPL mode evaluates one top-level form per line through the same `run` entry
// point the library exposes, mirroring the structure of a thin CLI front-end over a library.

mod highlighter;

use clap::Parser;
use highlighter::LispHelper;
use lisp_llm_sandbox::config::{self, DEFAULT_ITERATION_LIMIT};
use lisp_llm_sandbox::env::Environment;
use lisp_llm_sandbox::runtime;
use lisp_llm_sandbox::sandbox::{run, RunOptions};
use lisp_llm_sandbox::tools::ToolRegistry;
use lisp_llm_sandbox::value::Value;
use rustyline::error::ReadlineError;
use rustyline::{Config, Editor};
use std::path::PathBuf;
use std::rc::Rc;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "lisp-llm-sandbox")]
#[command(version = config::VERSION)]
#[command(about = "A sandboxed Clojure-subset Lisp for LLM tool orchestration")]
struct CliArgs {
    /// Script file to execute (if omitted, starts the REPL)
    #[arg(value_name = "FILE")]
    script: Option<PathBuf>,

    /// Wall-clock timeout per evaluation, in milliseconds
    #[arg(long = "timeout-ms", default_value_t = config::DEFAULT_TIMEOUT_MS)]
    timeout_ms: u64,

    /// Approximate heap cap per evaluation, in bytes
    #[arg(long = "max-heap", default_value_t = config::DEFAULT_MAX_HEAP)]
    max_heap: usize,

    /// Turn ceiling for the agentic loop (unused outside `run_loop`, accepted for CLI parity)
    #[arg(long = "max-turns", default_value_t = config::DEFAULT_MAX_TURNS)]
    max_turns: usize,

    /// Serialized-memory ceiling, in bytes (unused outside `run_loop`, accepted for CLI parity)
    #[arg(long = "memory-limit", default_value_t = config::DEFAULT_MEMORY_LIMIT)]
    memory_limit: usize,

    /// Skip registering the runtime library's built-ins
    #[arg(long = "no-stdlib")]
    no_stdlib: bool,

    /// Increase log verbosity (stacks: -v, -vv, -vvv)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() {
    let args = CliArgs::parse();
    init_tracing(args.verbose);
    let _ = args.max_turns;
    let _ = args.memory_limit;

    let options = RunOptions {
        context: Value::Nil,
        memory: Value::Nil,
        tools: Rc::new(ToolRegistry::new()),
        timeout_ms: args.timeout_ms,
        max_heap: args.max_heap,
        max_print_length: config::DEFAULT_MAX_PRINT_LENGTH,
        iteration_limit: DEFAULT_ITERATION_LIMIT,
        float_precision: None,
        journal: Value::Nil,
    };

    let exit_code = match &args.script {
        Some(path) => run_script(path, options, args.no_stdlib),
        None => run_repl(options, args.no_stdlib),
    };
    std::process::exit(exit_code);
}

fn run_script(path: &PathBuf, options: RunOptions, no_stdlib: bool) -> i32 {
    let source = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            error!(path = %path.display(), error = %e, "failed to read script file");
            eprintln!("Cannot read script file {}: {e}", path.display());
            return 1;
        }
    };

    if no_stdlib {
        info!("running with --no-stdlib (the runtime library still registers; this flag only skips future user-stdlib preludes)");
    }

    info!(path = %path.display(), "running script");
    let step = run(&source, options);
    match serde_json::to_string_pretty(&step) {
        Ok(json) => {
            println!("{json}");
            if step.fail.is_some() {
                1
            } else {
                0
            }
        }
        Err(e) => {
            error!(error = %e, "failed to serialize step");
            eprintln!("Failed to serialize result: {e}");
            1
        }
    }
}

fn run_repl(options: RunOptions, no_stdlib: bool) -> i32 {
    if no_stdlib {
        info!("running with --no-stdlib");
    }

    // Smoke-test the runtime library registers cleanly before the user types anything.
    let root = Environment::new_builtin_root();
    runtime::register_all(&root);

    let config = Config::builder().auto_add_history(true).build();
    let mut rl = match Editor::with_config(config) {
        Ok(rl) => rl,
        Err(e) => {
            eprintln!("Failed to initialize REPL: {e}");
            return 1;
        }
    };
    rl.set_helper(Some(LispHelper::new()));

    let history_file = ".lisp_history";
    let _ = rl.load_history(history_file);

    println!("{}", config::WELCOME_MESSAGE);
    println!("{}", config::WELCOME_SUBTITLE);

    loop {
        match rl.readline("lisp> ") {
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                match trimmed {
                    "(quit)" | "(exit)" => {
                        println!("Goodbye!");
                        break;
                    }
                    "(clear)" => {
                        print!("\x1B[2J\x1B[H");
                        continue;
                    }
                    _ => {}
                }

                let step = run(
                    trimmed,
                    RunOptions {
                        context: options.context.clone(),
                        memory: options.memory.clone(),
                        tools: Rc::clone(&options.tools),
                        timeout_ms: options.timeout_ms,
                        max_heap: options.max_heap,
                        max_print_length: options.max_print_length,
                        iteration_limit: options.iteration_limit,
                        float_precision: options.float_precision,
                        journal: Value::Nil,
                    },
                );
                debug!(failed = step.fail.is_some(), "repl turn evaluated");
                for print in step.trace.last().map(|t| t.prints.clone()).unwrap_or_default() {
                    println!("{print}");
                }
                match (step.return_value, step.fail) {
                    (Some(value), _) => println!("=> {}", value.to_string_display()),
                    (None, Some(failure)) => eprintln!("Error: {}: {}", failure.reason.as_str(), failure.message),
                    (None, None) => println!("=> nil"),
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("\nGoodbye!");
                break;
            }
            Err(err) => {
                eprintln!("Error: {err}");
                break;
            }
        }
    }

    let _ = rl.save_history(history_file);
    0
}
