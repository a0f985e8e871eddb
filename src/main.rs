//! Lox CLI: run scripts, evaluate code, start the REPL or run the test suite.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use std::str::FromStr;

use colored::Colorize;
use log::{Level, LevelFilter, Log, Metadata, Record};

use loxlang::error::LoxError;
use loxlang::lexer::{Scanner, TokenKind};
use loxlang::test::{discover, run_tests, TestConfig, TestReporter};
use loxlang::vm::{Vm, VmOptions};

const VERSION: &str = env!("CARGO_PKG_VERSION");

const EX_USAGE: i32 = 64;
const EX_SOFTWARE: i32 = 70;
const EX_IOERR: i32 = 74;

/// CLI command to execute.
enum Command {
    /// Run a script file
    Run { file: String },
    /// Evaluate a string
    Eval { code: String },
    /// Start the REPL
    Repl,
    /// Run the `.lox` expectation suite
    Test { path: Option<String>, jobs: usize },
    Help,
}

/// CLI options parsed from arguments.
struct Options {
    command: Command,
    disassemble: bool,
    tokens: bool,
    log_level: Option<LevelFilter>,
    vm: VmOptions,
}

fn print_usage() {
    eprintln!("Lox {} - bytecode virtual machine", VERSION);
    eprintln!();
    eprintln!("Usage: lox [options] [script.lox]");
    eprintln!("       lox [options] -e <code>");
    eprintln!("       lox test [path] [--jobs N]");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  test [path]        Run .lox expectation tests (default: tests/programs)");
    eprintln!("  -e <code>          Evaluate code");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --disassemble      Print bytecode before running");
    eprintln!("  --tokens           Print the token stream and exit");
    eprintln!("  --trace            Log every executed instruction");
    eprintln!("  --verbose          Log compiler and VM diagnostics");
    eprintln!("  --no-stack-trace   Omit the call stack from runtime errors");
    eprintln!("  --jobs N           Number of parallel test workers (default: CPU cores)");
    eprintln!("  --help, -h         Show this help message");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  LOX_LOG            Log level (error, warn, info, debug, trace)");
    eprintln!("  LOX_TRACE          Same as --trace when set to 1");
    eprintln!("  LOX_MAX_FRAMES     Call depth limit (default: 64)");
}

fn usage_error(message: &str) -> ! {
    eprintln!("{}", message);
    print_usage();
    process::exit(EX_USAGE);
}

fn parse_args() -> Options {
    let args: Vec<String> = env::args().skip(1).collect();
    let mut options = Options {
        command: Command::Repl,
        disassemble: false,
        tokens: false,
        log_level: None,
        vm: VmOptions::from_env(),
    };

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "test" => {
                i += 1;
                let mut path = None;
                let mut jobs = TestConfig::default().workers;
                while i < args.len() {
                    let arg = args[i].as_str();
                    if arg == "--jobs" || arg == "-j" {
                        i += 1;
                        let value = args.get(i).map(String::as_str).unwrap_or("");
                        jobs = parse_jobs(value);
                    } else if let Some(value) = arg.strip_prefix("--jobs=") {
                        jobs = parse_jobs(value);
                    } else if arg == "--verbose" {
                        options.log_level = Some(LevelFilter::Info);
                    } else if arg.starts_with('-') {
                        usage_error(&format!("Unknown option for test command: {}", arg));
                    } else if path.is_none() {
                        path = Some(arg.to_string());
                    } else {
                        usage_error(&format!("Unexpected argument: {}", arg));
                    }
                    i += 1;
                }
                options.command = Command::Test { path, jobs };
                return options;
            }
            "-e" => {
                i += 1;
                let Some(code) = args.get(i) else {
                    usage_error("-e requires code to evaluate");
                };
                options.command = Command::Eval { code: code.clone() };
            }
            "--disassemble" => options.disassemble = true,
            "--tokens" => options.tokens = true,
            "--trace" => {
                options.vm.trace_execution = true;
                options.log_level = Some(LevelFilter::Trace);
            }
            "--verbose" => {
                if options.log_level.is_none() {
                    options.log_level = Some(LevelFilter::Debug);
                }
            }
            "--no-stack-trace" => options.vm.stack_trace = false,
            "--help" | "-h" => {
                options.command = Command::Help;
                return options;
            }
            arg if arg.starts_with('-') => usage_error(&format!("Unknown option: {}", arg)),
            file => {
                if !matches!(options.command, Command::Repl) {
                    usage_error(&format!("Unexpected argument: {}", file));
                }
                options.command = Command::Run {
                    file: file.to_string(),
                };
            }
        }
        i += 1;
    }

    options
}

fn parse_jobs(value: &str) -> usize {
    match value.parse::<usize>() {
        Ok(jobs) if jobs > 0 => jobs,
        _ => usage_error(&format!("Invalid number of jobs: {}", value)),
    }
}

/// Coloured `level: message` lines on stderr.
struct StderrLogger {
    level: LevelFilter,
}

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let label = match record.level() {
            Level::Error => "error".red().bold(),
            Level::Warn => "warn".yellow().bold(),
            Level::Info => "info".green(),
            Level::Debug => "debug".blue(),
            Level::Trace => "trace".dimmed(),
        };
        eprintln!("{}: {}", label, record.args());
    }

    fn flush(&self) {}
}

fn init_logger(level: Option<LevelFilter>) {
    let level = level
        .or_else(|| {
            env::var("LOX_LOG")
                .ok()
                .and_then(|value| LevelFilter::from_str(value.trim()).ok())
        })
        .unwrap_or(LevelFilter::Warn);

    let logger = Box::new(StderrLogger { level });
    if log::set_boxed_logger(logger).is_ok() {
        log::set_max_level(level);
    }
}

fn main() {
    let options = parse_args();
    init_logger(options.log_level);

    match &options.command {
        Command::Help => print_usage(),
        Command::Repl => run_repl(&options),
        Command::Run { file } => run_file(file, &options),
        Command::Eval { code } => run_source(code, None, &options),
        Command::Test { path, jobs } => run_test(path.as_deref(), *jobs),
    }
}

fn run_repl(options: &Options) {
    if let Err(err) = loxlang::repl::run_repl(options.vm.clone()) {
        eprintln!("Error: {}", err);
        process::exit(EX_IOERR);
    }
}

fn run_file(path: &str, options: &Options) {
    let source = match fs::read_to_string(path) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("Could not read file \"{}\": {}", path, err);
            process::exit(EX_IOERR);
        }
    };
    run_source(&source, Some(path), options);
}

fn run_source(source: &str, file_name: Option<&str>, options: &Options) {
    if options.tokens {
        print_tokens(source);
        return;
    }

    if options.disassemble {
        match loxlang::compiler::compile(source, file_name) {
            Ok(function) => {
                print!("{}", loxlang::bytecode::disassemble(&function));
                println!("---");
            }
            Err(err) => exit_with(&LoxError::Compile(err)),
        }
    }

    let mut vm = Vm::with_options(options.vm.clone());
    if let Err(err) = vm.interpret(source, file_name) {
        exit_with(&err);
    }
}

fn exit_with(err: &LoxError) -> ! {
    match err {
        LoxError::Runtime(runtime) => eprintln!("{}", runtime.report()),
        other => eprintln!("{}", other),
    }
    process::exit(err.exit_code());
}

fn print_tokens(source: &str) {
    let mut scanner = Scanner::new(source);
    let mut line = 0;
    loop {
        let token = scanner.scan_token();
        if token.line != line {
            print!("{:4} ", token.line);
            line = token.line;
        } else {
            print!("   | ");
        }
        println!("{:<14} '{}'", token.kind.to_string(), token.lexeme);
        if token.kind == TokenKind::Eof {
            break;
        }
    }
}

fn run_test(path: Option<&str>, jobs: usize) {
    let root = match path {
        Some(p) => PathBuf::from(p),
        None => PathBuf::from("tests").join("programs"),
    };

    if !root.exists() {
        eprintln!("Error: Test path '{}' does not exist", root.display());
        process::exit(EX_IOERR);
    }

    let discovered = discover(&root);
    let config = TestConfig::new()
        .with_workers(jobs)
        .with_verbose(log::log_enabled!(Level::Info));

    let mut reporter = TestReporter::new(config.clone());
    reporter.report_start(discovered.files.len());
    let base = if root.is_file() {
        root.parent().unwrap_or(Path::new("")).to_path_buf()
    } else {
        root.clone()
    };
    let outcomes = run_tests(discovered.files, &base, &config);
    reporter.report_outcomes(&outcomes);
    let summary = reporter.report_end(&outcomes, discovered.skipped);

    if !summary.success() {
        process::exit(EX_SOFTWARE);
    }
}
