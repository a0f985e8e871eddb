//! Test runner with parallel execution support.

use std::path::{Path, PathBuf};
use std::thread;
use std::time::Instant;

use crossbeam::channel;
use walkdir::WalkDir;

use crate::error::LoxError;
use crate::test::{TestCase, TestConfig, TestOutcome, TestResult};
use crate::vm::{Vm, VmOptions};

/// Files found under a test root.
#[derive(Debug, Default)]
pub struct Discovered {
    pub files: Vec<PathBuf>,
    /// Files whose name starts with `-`.
    pub skipped: usize,
}

/// Collect every `.lox` file below `root`, sorted by path. `root` may also be a single file.
pub fn discover(root: &Path) -> Discovered {
    let mut discovered = Discovered::default();

    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                log::warn!("skipping unreadable entry: {}", err);
                continue;
            }
        };
        let path = entry.path();
        if !entry.file_type().is_file() || path.extension().map_or(true, |ext| ext != "lox") {
            continue;
        }
        let hidden = entry.file_name().to_string_lossy().starts_with('-');
        if hidden {
            discovered.skipped += 1;
        } else {
            discovered.files.push(path.to_path_buf());
        }
    }

    discovered
}

/// Run test files on `config.workers` threads. Outcomes come back in input order.
pub fn run_tests(files: Vec<PathBuf>, root: &Path, config: &TestConfig) -> Vec<TestOutcome> {
    let total = files.len();
    let (job_tx, job_rx) = channel::bounded::<(usize, PathBuf)>(total.max(1));
    let (result_tx, result_rx) = channel::bounded::<(usize, TestOutcome)>(total.max(1));

    for job in files.into_iter().enumerate() {
        let _ = job_tx.send(job);
    }
    drop(job_tx);

    let mut workers = Vec::new();
    for worker_id in 0..config.workers.min(total.max(1)) {
        let job_rx = job_rx.clone();
        let result_tx = result_tx.clone();
        let root = root.to_path_buf();
        let verbose = config.verbose;

        let worker = thread::Builder::new()
            .name(format!("test-worker-{}", worker_id))
            .spawn(move || {
                for (index, path) in job_rx.iter() {
                    let name = display_name(&path, &root);
                    if verbose {
                        log::info!("running {}", name);
                    }
                    let started = Instant::now();
                    let result = match TestCase::load(&path) {
                        Ok(case) => run_case(&case),
                        Err(err) => TestResult::Error(err.to_string()),
                    };
                    let outcome = TestOutcome {
                        name,
                        result,
                        duration: started.elapsed(),
                    };
                    if result_tx.send((index, outcome)).is_err() {
                        break;
                    }
                }
            });

        match worker {
            Ok(handle) => workers.push(handle),
            Err(err) => log::error!("failed to spawn worker {}: {}", worker_id, err),
        }
    }
    drop(result_tx);

    let mut outcomes: Vec<(usize, TestOutcome)> = result_rx.iter().collect();
    for worker in workers {
        let _ = worker.join();
    }

    outcomes.sort_by_key(|(index, _)| *index);
    outcomes.into_iter().map(|(_, outcome)| outcome).collect()
}

/// Run one test in a fresh VM and compare what it produced with its expectations.
pub fn run_case(case: &TestCase) -> TestResult {
    let actual = produce(&case.source);
    if actual == case.expected {
        TestResult::Passed
    } else {
        TestResult::Failed {
            expected: case.expected.clone(),
            actual,
        }
    }
}

/// Printed lines followed by the compile diagnostics or the runtime error.
pub fn produce(source: &str) -> Vec<String> {
    let mut vm = Vm::with_options(VmOptions::new().stack_trace(false));
    vm.capture_output();
    let result = vm.interpret(source, None);

    let mut lines = vm.take_output();
    match result {
        Ok(()) => {}
        Err(LoxError::Compile(err)) => lines.extend(
            err.diagnostics
                .iter()
                .map(|d| format!("[line {}] {}", d.line, d.describe())),
        ),
        Err(LoxError::Runtime(err)) => {
            lines.push(err.message());
            lines.push(format!("[line {}]", err.line));
        }
        Err(err @ LoxError::Io(_)) => lines.push(err.to_string()),
    }
    lines
}

fn display_name(path: &Path, root: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    if relative.as_os_str().is_empty() {
        path.display().to_string()
    } else {
        relative.display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_produce_output_then_runtime_error() {
        let lines = produce("print 1;\nprint -nil;");
        assert_eq!(lines, vec!["1", "Operand must be a number.", "[line 2]"]);
    }

    #[test]
    fn test_produce_compile_errors() {
        let lines = produce("print 1\nprint 2;");
        assert_eq!(lines, vec!["[line 2] Error at 'print': Expect ';' after value."]);
    }

    #[test]
    fn test_run_case_passes_and_fails() {
        let ok = TestCase::parse(PathBuf::from("a.lox"), "print 2; // expect: 2".to_string());
        assert_eq!(run_case(&ok), TestResult::Passed);

        let bad = TestCase::parse(PathBuf::from("b.lox"), "print 3; // expect: 2".to_string());
        assert_eq!(
            run_case(&bad),
            TestResult::Failed {
                expected: vec!["2".to_string()],
                actual: vec!["3".to_string()],
            }
        );
    }

    #[test]
    fn test_display_name() {
        let root = Path::new("tests/programs");
        assert_eq!(
            display_name(Path::new("tests/programs/closures/counter.lox"), root),
            Path::new("closures/counter.lox").display().to_string()
        );
        let single = Path::new("one.lox");
        assert_eq!(display_name(single, single), "one.lox");
    }
}
