//! Assertion macros that return `TestResult::Fail` instead of panicking.
//!
//! Every failure line carries the source location of the assertion.

#[macro_export]
macro_rules! assert_test {
    ($cond:expr) => {{
        if !$cond {
            $crate::klog_error!("ASSERT {}:{}: {}", file!(), line!(), stringify!($cond));
            return $crate::testing::TestResult::Fail;
        }
    }};
    ($cond:expr, $msg:expr) => {{
        if !$cond {
            $crate::klog_error!("ASSERT {}:{}: {}", file!(), line!(), $msg);
            return $crate::testing::TestResult::Fail;
        }
    }};
    ($cond:expr, $fmt:expr, $($arg:tt)*) => {{
        if !$cond {
            $crate::klog_error!(
                "ASSERT {}:{}: {}",
                file!(),
                line!(),
                ::core::format_args!($fmt, $($arg)*)
            );
            return $crate::testing::TestResult::Fail;
        }
    }};
}

#[macro_export]
macro_rules! assert_eq_test {
    ($left:expr, $right:expr) => {{
        let left = $left;
        let right = $right;
        if left != right {
            $crate::klog_error!(
                "ASSERT_EQ {}:{}: expected {:?}, got {:?}",
                file!(),
                line!(),
                right,
                left
            );
            return $crate::testing::TestResult::Fail;
        }
    }};
    ($left:expr, $right:expr, $msg:expr) => {{
        let left = $left;
        let right = $right;
        if left != right {
            $crate::klog_error!(
                "ASSERT_EQ {}:{}: {} (expected {:?}, got {:?})",
                file!(),
                line!(),
                $msg,
                right,
                left
            );
            return $crate::testing::TestResult::Fail;
        }
    }};
}

#[macro_export]
macro_rules! assert_ok {
    ($result:expr) => {{
        match $result {
            Ok(v) => v,
            Err(e) => {
                $crate::klog_error!("ASSERT_OK {}:{}: got Err({:?})", file!(), line!(), e);
                return $crate::testing::TestResult::Fail;
            }
        }
    }};
    ($result:expr, $msg:expr) => {{
        match $result {
            Ok(v) => v,
            Err(e) => {
                $crate::klog_error!(
                    "ASSERT_OK {}:{}: {} (got Err({:?}))",
                    file!(),
                    line!(),
                    $msg,
                    e
                );
                return $crate::testing::TestResult::Fail;
            }
        }
    }};
}

/// Expect `Err(pattern)`; anything else fails the test.
#[macro_export]
macro_rules! assert_err {
    ($result:expr, $pat:pat) => {{
        match $result {
            Err($pat) => {}
            Err(e) => {
                $crate::klog_error!(
                    "ASSERT_ERR {}:{}: expected {}, got Err({:?})",
                    file!(),
                    line!(),
                    stringify!($pat),
                    e
                );
                return $crate::testing::TestResult::Fail;
            }
            Ok(_) => {
                $crate::klog_error!(
                    "ASSERT_ERR {}:{}: expected {}, got Ok",
                    file!(),
                    line!(),
                    stringify!($pat)
                );
                return $crate::testing::TestResult::Fail;
            }
        }
    }};
}

/// Unwrap an `Option`, failing the test on `None`.
#[macro_export]
macro_rules! assert_some {
    ($opt:expr) => {{
        match $opt {
            Some(v) => v,
            None => {
                $crate::klog_error!("ASSERT_SOME {}:{}: {} is None", file!(), line!(), stringify!($opt));
                return $crate::testing::TestResult::Fail;
            }
        }
    }};
    ($opt:expr, $msg:expr) => {{
        match $opt {
            Some(v) => v,
            None => {
                $crate::klog_error!("ASSERT_SOME {}:{}: {}", file!(), line!(), $msg);
                return $crate::testing::TestResult::Fail;
            }
        }
    }};
}
