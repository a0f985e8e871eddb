//! Expectation-based test runner for `.lox` programs.
//!
//! A test is a Lox file whose comments state what running it must produce:
//!
//! ```text
//! print 1 + 2; // expect: 3
//! print nil.x; // expect runtime error: Only instances have properties.
//! var = 1;     // Error at '=': Expect variable name.
//! ```

pub mod reporter;
pub mod runner;

use std::path::{Path, PathBuf};
use std::time::Duration;

pub use reporter::{format_failure, TestReporter};
pub use runner::{discover, run_tests};

const EXPECT_OUTPUT: &str = "// expect: ";
const EXPECT_RUNTIME_ERROR: &str = "// expect runtime error: ";

/// A parsed test file.
#[derive(Debug, Clone, PartialEq)]
pub struct TestCase {
    pub path: PathBuf,
    pub source: String,
    /// Lines the run must produce, in order: printed output, then diagnostics.
    pub expected: Vec<String>,
}

impl TestCase {
    /// Read a file and parse its expectations.
    pub fn load(path: &Path) -> std::io::Result<Self> {
        let source = std::fs::read_to_string(path)?;
        Ok(Self::parse(path.to_path_buf(), source))
    }

    pub fn parse(path: PathBuf, source: String) -> Self {
        let mut output = Vec::new();
        let mut errors = Vec::new();

        for (index, line) in source.lines().enumerate() {
            let line_number = index + 1;

            if let Some(pos) = line.find(EXPECT_OUTPUT) {
                output.push(line[pos + EXPECT_OUTPUT.len()..].trim_end().to_string());
            } else if let Some(pos) = line.find(EXPECT_RUNTIME_ERROR) {
                errors.push(line[pos + EXPECT_RUNTIME_ERROR.len()..].trim_end().to_string());
                errors.push(format!("[line {}]", line_number));
            } else if let Some(pos) = line.find("// [line ") {
                errors.push(line[pos + 3..].trim_end().to_string());
            } else if let Some(pos) = line.find("// Error") {
                errors.push(format!("[line {}] {}", line_number, line[pos + 3..].trim_end()));
            }
        }

        output.extend(errors);
        Self {
            path,
            source,
            expected: output,
        }
    }
}

/// Outcome of one test file.
#[derive(Debug, Clone, PartialEq)]
pub enum TestResult {
    Passed,
    /// Produced lines did not match.
    Failed {
        expected: Vec<String>,
        actual: Vec<String>,
    },
    /// The file could not be read.
    Error(String),
}

impl TestResult {
    pub fn is_passed(&self) -> bool {
        matches!(self, TestResult::Passed)
    }
}

/// Result of a single file together with timing.
#[derive(Debug, Clone)]
pub struct TestOutcome {
    pub name: String,
    pub result: TestResult,
    pub duration: Duration,
}

/// Test configuration.
#[derive(Debug, Clone)]
pub struct TestConfig {
    pub workers: usize,
    pub verbose: bool,
}

impl Default for TestConfig {
    fn default() -> Self {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            workers,
            verbose: false,
        }
    }
}

impl TestConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }
}

/// Totals for a finished run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Summary {
    pub skipped: usize,
    pub passed: usize,
    pub failed: usize,
}

impl Summary {
    pub fn from_outcomes(outcomes: &[TestOutcome], skipped: usize) -> Self {
        let passed = outcomes.iter().filter(|o| o.result.is_passed()).count();
        Self {
            skipped,
            passed,
            failed: outcomes.len() - passed,
        }
    }

    pub fn run(&self) -> usize {
        self.passed + self.failed
    }

    pub fn success(&self) -> bool {
        self.failed == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> Vec<String> {
        TestCase::parse(PathBuf::from("t.lox"), source.to_string()).expected
    }

    #[test]
    fn test_parse_output_expectations() {
        let expected = parse("print 1; // expect: 1\nprint \"a\"; // expect: a\n");
        assert_eq!(expected, vec!["1", "a"]);
    }

    #[test]
    fn test_parse_runtime_error() {
        let expected = parse("print 1; // expect: 1\n\nnil(); // expect runtime error: Can only call functions and classes.\n");
        assert_eq!(
            expected,
            vec!["1", "Can only call functions and classes.", "[line 3]"]
        );
    }

    #[test]
    fn test_parse_compile_errors() {
        let expected = parse("var = 1; // Error at '=': Expect variable name.\n// [line 3] Error at end: Expect '}' after block.\n{\n");
        assert_eq!(
            expected,
            vec![
                "[line 1] Error at '=': Expect variable name.",
                "[line 3] Error at end: Expect '}' after block.",
            ]
        );
    }

    #[test]
    fn test_summary() {
        let outcomes = vec![
            TestOutcome {
                name: "a".into(),
                result: TestResult::Passed,
                duration: Duration::ZERO,
            },
            TestOutcome {
                name: "b".into(),
                result: TestResult::Error("missing".into()),
                duration: Duration::ZERO,
            },
        ];
        let summary = Summary::from_outcomes(&outcomes, 2);
        assert_eq!(summary.run(), 2);
        assert_eq!(summary.passed, 1);
        assert!(!summary.success());
    }
}
