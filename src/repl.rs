//! Interactive read-eval-print loop.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use colored::Colorize;

use crate::error::LoxError;
use crate::vm::{Vm, VmOptions};

const HISTORY_FILE: &str = ".lox_history";
const MAX_HISTORY: usize = 1000;

/// What the loop should do after a line of input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// A complete entry ready to run.
    Complete(String),
    /// Inside an unbalanced block; keep reading.
    Continue,
    /// A `.command`.
    Command(String),
    Empty,
}

pub struct Repl {
    vm: Vm,
    options: VmOptions,
    history: Vec<String>,
    history_file: PathBuf,
    buffer: String,
    brace_balance: i32,
}

impl Repl {
    pub fn new(options: VmOptions) -> Self {
        let mut repl = Self {
            vm: Vm::with_options(options.clone()),
            options,
            history: Vec::new(),
            history_file: Self::history_path(),
            buffer: String::new(),
            brace_balance: 0,
        };
        repl.load_history();
        repl
    }

    fn history_path() -> PathBuf {
        match dirs::home_dir() {
            Some(home) => home.join(HISTORY_FILE),
            None => PathBuf::from(HISTORY_FILE),
        }
    }

    fn load_history(&mut self) {
        if let Ok(content) = std::fs::read_to_string(&self.history_file) {
            self.history = content
                .lines()
                .filter(|line| !line.trim().is_empty())
                .map(str::to_string)
                .collect();
        }
    }

    fn save_history(&self) {
        let start = self.history.len().saturating_sub(MAX_HISTORY);
        let content = self.history[start..].join("\n");
        if let Err(err) = std::fs::write(&self.history_file, content) {
            log::debug!("could not save history to {}: {}", self.history_file.display(), err);
        }
    }

    pub fn run(&mut self) -> io::Result<()> {
        println!("Lox REPL");
        println!("Type .help for available commands.\n");

        let stdin = io::stdin();
        let mut lines = stdin.lock().lines();

        loop {
            print!("{}", self.prompt());
            io::stdout().flush()?;

            let Some(line) = lines.next() else {
                println!();
                break;
            };
            let line = line?;

            match self.feed(&line) {
                Input::Empty | Input::Continue => {}
                Input::Command(command) => {
                    if !self.command(&command) {
                        break;
                    }
                }
                Input::Complete(source) => {
                    self.history.push(source.replace('\n', " "));
                    self.execute(&source);
                }
            }
        }

        self.save_history();
        Ok(())
    }

    fn prompt(&self) -> &'static str {
        if self.buffer.is_empty() {
            "> "
        } else {
            "... "
        }
    }

    /// Accumulate a line, returning a complete entry once braces balance.
    pub fn feed(&mut self, line: &str) -> Input {
        let trimmed = line.trim();
        if self.buffer.is_empty() {
            if trimmed.is_empty() {
                return Input::Empty;
            }
            if trimmed.starts_with('.') {
                return Input::Command(trimmed.to_string());
            }
        } else if trimmed == ".break" {
            self.buffer.clear();
            self.brace_balance = 0;
            return Input::Empty;
        }

        if !self.buffer.is_empty() {
            self.buffer.push('\n');
        }
        self.buffer.push_str(line);
        self.brace_balance += count_braces(line);

        if self.brace_balance > 0 {
            return Input::Continue;
        }
        self.brace_balance = 0;
        Input::Complete(std::mem::take(&mut self.buffer))
    }

    /// Run a `.command`. Returns false when the REPL should exit.
    fn command(&mut self, command: &str) -> bool {
        match command {
            ".exit" | ".quit" => return false,
            ".help" => print_help(),
            ".clear" => {
                self.vm = Vm::with_options(self.options.clone());
                println!("Environment reset.");
            }
            ".history" => {
                for (i, entry) in self.history.iter().enumerate() {
                    println!("{:4}  {}", i + 1, entry);
                }
            }
            _ => println!(
                "Unknown command: {}. Type .help for available commands.",
                command
            ),
        }
        true
    }

    fn execute(&mut self, source: &str) {
        match self.vm.interpret(source, None) {
            Ok(()) => {}
            Err(LoxError::Runtime(err)) => eprintln!("{}", err.report().red()),
            Err(err) => eprintln!("{}", err.to_string().red()),
        }
    }
}

impl Default for Repl {
    fn default() -> Self {
        Self::new(VmOptions::default())
    }
}

fn print_help() {
    println!();
    println!("Lox REPL Commands");
    println!();
    println!(".help     - Show this help message");
    println!(".history  - Show command history");
    println!(".clear    - Reset all globals");
    println!(".break    - Cancel multi-line input");
    println!(".exit     - Exit the REPL (or Ctrl+D)");
    println!();
}

/// Net `{` minus `}` outside string literals and comments.
fn count_braces(line: &str) -> i32 {
    let mut balance = 0;
    let mut in_string = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' => in_string = !in_string,
            '/' if !in_string && chars.peek() == Some(&'/') => break,
            '{' if !in_string => balance += 1,
            '}' if !in_string => balance -= 1,
            _ => {}
        }
    }
    balance
}

pub fn run_repl(options: VmOptions) -> io::Result<()> {
    Repl::new(options).run()
}
