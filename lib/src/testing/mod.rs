//! Test toolkit shared by every crate in the workspace.
//!
//! Test bodies are plain functions returning [`TestResult`]; the assertion
//! macros in [`assertions`] log the failure reason through klog and return
//! early.  [`define_test_suite!`](crate::define_test_suite) wraps a list of
//! such functions into host `#[test]` items.

mod assertions;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TestResult {
    Pass,
    Fail,
    Skipped,
}

impl TestResult {
    #[inline]
    pub fn is_pass(&self) -> bool {
        matches!(self, Self::Pass)
    }

    #[inline]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Fail)
    }
}

#[macro_export]
macro_rules! pass {
    () => {
        $crate::testing::TestResult::Pass
    };
}

#[macro_export]
macro_rules! skip {
    ($msg:expr) => {{
        $crate::klog_info!("TEST SKIP: {}", $msg);
        $crate::testing::TestResult::Skipped
    }};
}

#[macro_export]
macro_rules! fail {
    () => {
        $crate::testing::TestResult::Fail
    };
    ($msg:expr) => {{
        $crate::klog_error!("TEST FAIL: {}", $msg);
        $crate::testing::TestResult::Fail
    }};
    ($fmt:expr, $($arg:tt)*) => {{
        $crate::klog_error!(concat!("TEST FAIL: ", $fmt), $($arg)*);
        $crate::testing::TestResult::Fail
    }};
}

/// Register a list of `fn() -> TestResult` functions as host tests.
///
/// Expands to a `<suite>_suite` module holding one `#[test]` per function.
/// Each wrapper routes klog to stderr before running the body so assertion
/// messages show up in the test output.
#[macro_export]
macro_rules! define_test_suite {
    ($suite_name:ident, [$($test_fn:ident),* $(,)?]) => {
        $crate::paste::paste! {
            mod [<$suite_name _suite>] {
                $(
                    #[test]
                    fn $test_fn() {
                        $crate::klog::klog_register_backend(|args| ::std::eprintln!("{}", args));
                        let result = super::$test_fn();
                        assert!(
                            !result.is_failure(),
                            "{}::{} returned {:?}",
                            stringify!($suite_name),
                            stringify!($test_fn),
                            result
                        );
                    }
                )*
            }
        }
    };
}
