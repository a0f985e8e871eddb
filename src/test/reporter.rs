//! Test result reporter with formatted output.

use std::fmt::Write as _;
use std::time::{Duration, Instant};

use colored::Colorize;

use crate::test::{Summary, TestConfig, TestOutcome, TestResult};

/// Prints per-file results and the final summary.
pub struct TestReporter {
    config: TestConfig,
    start_time: Instant,
    pub total_duration: Duration,
}

impl TestReporter {
    pub fn new(config: TestConfig) -> Self {
        Self {
            config,
            start_time: Instant::now(),
            total_duration: Duration::ZERO,
        }
    }

    /// Report test run start.
    pub fn report_start(&self, test_count: usize) {
        println!("Running {} tests...\n", test_count);
    }

    /// Report every outcome. Passing files are listed only in verbose mode.
    pub fn report_outcomes(&self, outcomes: &[TestOutcome]) {
        for outcome in outcomes {
            match &outcome.result {
                TestResult::Passed => {
                    if self.config.verbose {
                        println!(
                            "  {} {} ({:.3}s)",
                            "✓".green(),
                            outcome.name,
                            outcome.duration.as_secs_f64()
                        );
                    }
                }
                TestResult::Failed { .. } | TestResult::Error(_) => {
                    print!("{}", format_failure(outcome));
                }
            }
        }
    }

    /// Report test run completion and return the totals.
    pub fn report_end(&mut self, outcomes: &[TestOutcome], skipped: usize) -> Summary {
        self.total_duration = self.start_time.elapsed();
        let summary = Summary::from_outcomes(outcomes, skipped);

        println!();
        let headline = format!("{} tests, {} failures", summary.run(), summary.failed);
        if summary.success() {
            println!("{}", headline.green());
        } else {
            println!("{}", headline.red());
        }
        println!(
            "{} passed, {} failed, {} skipped",
            summary.passed, summary.failed, summary.skipped
        );
        println!("Duration: {:.3}s", self.total_duration.as_secs_f64());
        println!("Workers: {}", self.config.workers);

        summary
    }
}

/// Failure block for one file: which expected lines were missing and what was produced instead.
pub fn format_failure(outcome: &TestOutcome) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "  {} {}", "✗".red(), outcome.name.bold());

    match &outcome.result {
        TestResult::Passed => {}
        TestResult::Error(message) => {
            let _ = writeln!(out, "    Error: {}", message);
        }
        TestResult::Failed { expected, actual } => {
            let len = expected.len().max(actual.len());
            for i in 0..len {
                match (expected.get(i), actual.get(i)) {
                    (Some(e), Some(a)) if e == a => {}
                    (Some(e), Some(a)) => {
                        let _ = writeln!(out, "    expected: {}", e.green());
                        let _ = writeln!(out, "    got:      {}", a.red());
                    }
                    (Some(e), None) => {
                        let _ = writeln!(out, "    missing:  {}", e.green());
                    }
                    (None, Some(a)) => {
                        let _ = writeln!(out, "    extra:    {}", a.red());
                    }
                    (None, None) => {}
                }
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_failure_lists_mismatches() {
        colored::control::set_override(false);
        let outcome = TestOutcome {
            name: "math.lox".to_string(),
            result: TestResult::Failed {
                expected: vec!["1".into(), "2".into(), "3".into()],
                actual: vec!["1".into(), "5".into()],
            },
            duration: Duration::ZERO,
        };
        assert_eq!(
            format_failure(&outcome),
            "  ✗ math.lox\n    expected: 2\n    got:      5\n    missing:  3\n"
        );
    }
}
