// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::time::{Duration, Instant};

use acc_tests::acc_testcase::{Framework, TestCase, TestOutcome};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::RunOptions;
use crate::fixtures::TestFixtures;

/// Statistics returned after executing a set of tests.
#[derive(Default)]
pub struct ExecutionStats {
    /// The number of tests that passed.
    pub tests_passed: u32,

    /// The number of tests that failed.
    pub tests_failed: u32,

    /// The number of tests that marked themselves as skipped.
    pub tests_skipped: u32,

    /// The number of tests that the runner decided not to run (e.g. because of
    /// a failure in a fixture or an interrupt).
    pub tests_not_run: u32,

    /// The total time spent running tests and fixtures.
    pub duration: Duration,

    /// A collection of test cases that returned a failed result.
    pub failed_test_cases: Vec<&'static TestCase>,

    /// Set when a setup or cleanup fixture failed, including a leaked
    /// vCenter session.
    pub fixture_failed: bool,
}

impl ExecutionStats {
    /// True if every selected test ran, none failed, and every fixture
    /// succeeded.
    pub fn succeeded(&self) -> bool {
        self.tests_failed == 0
            && !self.fixture_failed
            && self.tests_not_run == 0
    }

    /// The process exit code for this run: the number of failed tests, or
    /// at least 1 if the run did not succeed for any other reason.
    pub fn exit_code(&self) -> i32 {
        let failed = i32::try_from(self.tests_failed).unwrap_or(i32::MAX);
        if self.succeeded() {
            0
        } else {
            failed.max(1)
        }
    }

    fn record(&mut self, tc: &'static TestCase, outcome: &TestOutcome) {
        match outcome {
            TestOutcome::Passed => self.tests_passed += 1,
            TestOutcome::Failed(_) => {
                self.tests_failed += 1;
                self.failed_test_cases.push(tc);
            }
            TestOutcome::Skipped(_) => self.tests_skipped += 1,
        }
    }
}

/// Executes the selected tests one at a time using the supplied test context.
pub async fn run_tests_with_ctx(
    ctx: &Framework,
    mut fixtures: TestFixtures,
    run_opts: &RunOptions,
) -> ExecutionStats {
    let executions: Vec<&'static TestCase> =
        acc_tests::acc_testcase::filtered_test_cases(
            &run_opts.include_filter,
            &run_opts.exclude_filter,
        )
        .collect();

    let mut stats = ExecutionStats {
        tests_not_run: executions.len() as u32,
        ..Default::default()
    };

    if executions.is_empty() {
        info!("No tests selected for execution");
        return stats;
    }

    let sigint_rx = set_sigint_handler();
    info!("Running {} test(s)", executions.len());
    let start_time = Instant::now();

    // Failure to run a fixture is fatal to the rest of the run, but it's
    // still possible to report results, so stop gracefully instead of
    // panicking.
    if let Err(e) = fixtures.execution_setup() {
        error!("Error running execution setup fixture: {:#}", e);
        stats.fixture_failed = true;
        stats.duration = start_time.elapsed();
        return stats;
    }

    for tc in executions {
        if *sigint_rx.borrow() {
            info!("Test run interrupted by SIGINT");
            break;
        }

        info!("Starting test {}", tc.fully_qualified_name());
        if let Err(e) = fixtures.test_setup() {
            error!("Error running test setup fixture: {:#}", e);
            stats.fixture_failed = true;
            break;
        }

        stats.tests_not_run -= 1;
        let test_outcome = tc.run(ctx).await;

        info!(
            "test {} ... {}{}",
            tc.fully_qualified_name(),
            match test_outcome {
                TestOutcome::Passed => "ok",
                TestOutcome::Failed(_) => "FAILED: ",
                TestOutcome::Skipped(_) => "skipped: ",
            },
            match &test_outcome {
                TestOutcome::Failed(Some(s))
                | TestOutcome::Skipped(Some(s)) => s,
                TestOutcome::Failed(None) | TestOutcome::Skipped(None) =>
                    "[no message]",
                _ => "",
            }
        );
        stats.record(tc, &test_outcome);

        if let Err(e) = fixtures.test_cleanup().await {
            error!("Error running cleanup fixture: {:#}", e);
            stats.fixture_failed = true;
            break;
        }
    }

    if let Err(e) = fixtures.execution_cleanup() {
        error!("Error running execution cleanup fixture: {:#}", e);
        stats.fixture_failed = true;
    }

    stats.duration = start_time.elapsed();
    stats
}

/// Sets a global handler for SIGINT and hands the resulting signal channel over
/// to a task that handles this signal. Returns a receiver to which the signal
/// handler task publishes `true` to the channel when SIGINT is received.
fn set_sigint_handler() -> watch::Receiver<bool> {
    let (sigint_tx, sigint_rx) = watch::channel(false);
    let mut sigint = match signal(SignalKind::interrupt()) {
        Ok(sigint) => sigint,
        Err(e) => {
            warn!(error = %e, "failed to set SIGINT handler");
            return sigint_rx;
        }
    };

    tokio::spawn(async move {
        loop {
            sigint.recv().await;

            // A second SIGINT exits immediately with the customary exit code
            // (130 is 128 + SIGINT), without running destructors.
            if *sigint_tx.borrow() {
                error!(
                    "SIGINT received while shutting down, rudely terminating"
                );
                error!("some VMs and sessions may have been leaked!");
                std::process::exit(130);
            }

            warn!("SIGINT received, finishing the current test");
            let _ = sigint_tx.send(true);
        }
    });

    sigint_rx
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use camino::Utf8PathBuf;

    use super::*;

    fn lab() -> vsphere_builder_config::LabConfig {
        vsphere_builder_config::lab::parse(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/../lab.toml"
        ))
        .unwrap()
    }

    fn run_opts() -> RunOptions {
        RunOptions {
            lab: Utf8PathBuf::from("lab.toml"),
            tmp_directory: None,
            include_filter: vec![],
            exclude_filter: vec![],
        }
    }

    #[test]
    fn exit_code_reflects_failures_and_fixtures() {
        let clean = ExecutionStats { tests_passed: 5, ..Default::default() };
        assert!(clean.succeeded());
        assert_eq!(clean.exit_code(), 0);

        let failed = ExecutionStats { tests_failed: 2, ..Default::default() };
        assert_eq!(failed.exit_code(), 2);

        let leaked = ExecutionStats {
            tests_passed: 5,
            fixture_failed: true,
            ..Default::default()
        };
        assert!(!leaked.succeeded());
        assert_eq!(leaked.exit_code(), 1);

        let aborted = ExecutionStats { tests_not_run: 3, ..Default::default() };
        assert_eq!(aborted.exit_code(), 1);
    }

    #[tokio::test]
    async fn failed_execution_setup_fails_the_run() {
        let ctx = Arc::new(
            Framework::simulated(
                lab(),
                Some(Utf8PathBuf::from("/proc/no-such-dir/acc-runner")),
            )
            .unwrap(),
        );
        let fixtures = TestFixtures::new(ctx.clone());

        let stats = run_tests_with_ctx(&ctx, fixtures, &run_opts()).await;
        assert!(stats.fixture_failed);
        assert_eq!(stats.tests_passed, 0);
        assert!(stats.tests_not_run > 0);
        assert_ne!(stats.exit_code(), 0);
    }

    #[tokio::test]
    async fn registered_cases_pass_against_the_sample_lab() {
        let ctx = Arc::new(Framework::simulated(lab(), None).unwrap());
        let fixtures = TestFixtures::new(ctx.clone());

        let stats = run_tests_with_ctx(&ctx, fixtures, &run_opts()).await;
        assert!(stats.tests_passed > 0);
        assert!(!stats.fixture_failed);
        assert_eq!(stats.exit_code(), 0);
    }
}
