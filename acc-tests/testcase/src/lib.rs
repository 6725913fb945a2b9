// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

pub use acc_framework;
pub use acc_testcase_macros::*;
pub use anyhow::{Context, Result};
pub use futures::future::BoxFuture;
pub use futures::FutureExt;
pub use inventory::submit as inventory_submit;
use thiserror::Error;

pub use acc_framework::Framework;
pub use acc_framework::FrameworkParameters;

/// The context test case bodies receive.
pub type TestCtx = Framework;

#[derive(Debug, Error)]
pub enum TestSkippedError {
    #[error("Test skipped: {0:?}")]
    TestSkipped(Option<String>),
}

/// Ends the running test case with a [`TestOutcome::Skipped`] outcome,
/// optionally with a message.
#[macro_export]
macro_rules! acc_skip {
    () => {
        return Err($crate::TestSkippedError::TestSkipped(None).into())
    };
    ($msg:expr) => {
        return Err($crate::TestSkippedError::TestSkipped(Some(
            $msg.to_string(),
        ))
        .into())
    };
}

/// The outcome from executing a specific test case.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum TestOutcome {
    /// The test passed.
    Passed,

    /// The test failed.
    Failed(Option<String>),

    /// The test chose to be skipped, i.e. it detected a condition of the lab
    /// that makes a pass/fail outcome meaningless. The payload is an optional
    /// message.
    Skipped(Option<String>),
}

impl TestOutcome {
    /// Converts the result of a test body into an outcome. Errors that are a
    /// [`TestSkippedError`] become skips; everything else is a failure.
    pub fn from_result(result: anyhow::Result<()>) -> Self {
        match result {
            Ok(()) => TestOutcome::Passed,
            Err(e) => match e.downcast_ref::<TestSkippedError>() {
                Some(TestSkippedError::TestSkipped(msg)) => {
                    TestOutcome::Skipped(msg.clone())
                }
                None => TestOutcome::Failed(Some(format!("{e:#}"))),
            },
        }
    }
}

/// A wrapper for test functions. This is needed to allow [`TestCase`] to have a
/// `const` constructor for the inventory crate.
pub struct TestFunction {
    pub f: fn(&TestCtx) -> BoxFuture<'_, TestOutcome>,
}

/// A description of a single test case.
pub struct TestCase {
    /// The path to the module containing the test case. This is generally
    /// derived from the `module_path!()` macro, which the `#[acc_testcase]`
    /// attribute macro uses when constructing the test case's inventory entry.
    pub(crate) module_path: &'static str,

    /// The name of this test case, which is generally its function name.
    pub(crate) name: &'static str,

    /// The test function to execute to run this test.
    pub(crate) function: TestFunction,
}

impl TestCase {
    pub const fn new(
        module_path: &'static str,
        name: &'static str,
        function: TestFunction,
    ) -> Self {
        Self { module_path, name, function }
    }

    /// Returns the test case's fully qualified name, i.e. `module_path::name`.
    pub fn fully_qualified_name(&self) -> String {
        format!("{}::{}", self.module_path, self.name)
    }

    pub fn name(&self) -> &str {
        self.name
    }

    /// Runs the test case's body with the supplied test context and returns its
    /// outcome.
    pub async fn run(&self, ctx: &TestCtx) -> TestOutcome {
        (self.function.f)(ctx).await
    }
}

inventory::collect!(TestCase);

pub fn all_test_cases() -> impl Iterator<Item = &'static TestCase> {
    inventory::iter::<TestCase>.into_iter()
}

/// Returns an iterator over the subset of tests for which (a) the fully
/// qualified name of the test includes every string in `must_include`, and (b)
/// the fully qualified name does not include any strings in `must_exclude`.
pub fn filtered_test_cases<'rule>(
    must_include: &'rule [String],
    must_exclude: &'rule [String],
) -> impl Iterator<Item = &'static TestCase> + 'rule {
    all_test_cases().filter(|tc| {
        let name = tc.fully_qualified_name();
        must_include.iter().all(|inc| name.contains(inc))
            && must_exclude.iter().all(|exc| !name.contains(exc))
    })
}

#[cfg(test)]
mod test {
    use super::*;

    fn skips_quietly() -> Result<()> {
        acc_skip!();
    }

    fn skips_with_reason() -> Result<()> {
        acc_skip!("no linked-clone template in this lab");
    }

    fn fails() -> Result<()> {
        Err(anyhow::anyhow!("not a root resource pool"))
            .context("verifying test-1")
    }

    #[test]
    fn results_map_to_outcomes() {
        assert_eq!(TestOutcome::from_result(Ok(())), TestOutcome::Passed);
        assert_eq!(
            TestOutcome::from_result(skips_quietly()),
            TestOutcome::Skipped(None)
        );
        assert_eq!(
            TestOutcome::from_result(skips_with_reason()),
            TestOutcome::Skipped(Some(
                "no linked-clone template in this lab".to_owned()
            ))
        );
        assert_eq!(
            TestOutcome::from_result(fails()),
            TestOutcome::Failed(Some(
                "verifying test-1: not a root resource pool".to_owned()
            ))
        );
    }

    fn noop(_ctx: &TestCtx) -> BoxFuture<'_, TestOutcome> {
        async { TestOutcome::Passed }.boxed()
    }

    inventory::submit! {
        TestCase::new(
            module_path!(),
            "registry_sees_noop",
            TestFunction { f: noop }
        )
    }

    #[test]
    fn filters_match_on_fully_qualified_names() {
        let all = |inc: &[&str], exc: &[&str]| {
            let inc: Vec<String> = inc.iter().map(|s| s.to_string()).collect();
            let exc: Vec<String> = exc.iter().map(|s| s.to_string()).collect();
            filtered_test_cases(&inc, &exc)
                .map(|tc| tc.fully_qualified_name())
                .collect::<Vec<_>>()
        };

        let expected = "acc_testcase::test::registry_sees_noop".to_owned();
        assert!(all(&[], &[]).contains(&expected));
        assert!(all(&["registry", "noop"], &[]).contains(&expected));
        assert!(!all(&["registry", "linked"], &[]).contains(&expected));
        assert!(!all(&[], &["noop"]).contains(&expected));
    }
}
