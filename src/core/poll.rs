use std::time::{Duration, Instant};

use crate::collector::LogCollector;
use crate::error::Result;

/// Bounded polling: invoke `probe` every `period` until it yields `expected`
/// or `timeout` elapses.
///
/// Probe errors are swallowed and logged — a connection refused while a VM
/// is still booting is "not yet satisfied", never a reason to abort the
/// wait. This is the single polling primitive for SSH reachability, power
/// state and exit-status waits; call sites must not roll their own loops.
pub fn wait_until<T, F>(
    mut probe: F,
    expected: &T,
    timeout: Duration,
    period: Duration,
    error_msg: &str,
    logs: &LogCollector,
) -> bool
where
    T: PartialEq,
    F: FnMut() -> Result<T>,
{
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        match probe() {
            Ok(value) if value == *expected => return true,
            Ok(_) => {}
            Err(e) => logs.log(format!("{error_msg}: {e}")),
        }
        std::thread::sleep(period);
    }

    logs.log(format!("{error_msg}: timeout"));
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn succeeds_on_third_attempt_with_three_invocations() {
        let logs = LogCollector::new();
        let mut calls = 0;
        let satisfied = wait_until(
            || {
                calls += 1;
                Ok(calls >= 3)
            },
            &true,
            Duration::from_millis(500),
            Duration::from_millis(10),
            "Impossible to wait",
            &logs,
        );
        assert!(satisfied);
        assert_eq!(calls, 3);
    }

    #[test]
    fn always_erroring_probe_times_out_and_swallows_errors() {
        let logs = LogCollector::new();
        let mut calls = 0;
        let satisfied = wait_until(
            || -> crate::error::Result<bool> {
                calls += 1;
                Err(Error::Other("boom".into()))
            },
            &true,
            Duration::from_millis(200),
            Duration::from_millis(20),
            "Impossible to wait",
            &logs,
        );
        assert!(!satisfied);
        assert!(calls >= 5, "expected repeated attempts, got {calls}");
        assert!(logs.contains_ignore_case("boom"));
        assert!(logs.contains_ignore_case("timeout"));
    }

    #[test]
    fn wrong_value_counts_as_not_yet_satisfied() {
        let logs = LogCollector::new();
        let satisfied = wait_until(
            || Ok(false),
            &true,
            Duration::from_millis(50),
            Duration::from_millis(10),
            "Impossible to wait",
            &logs,
        );
        assert!(!satisfied);
        assert_eq!(logs.contents(), "Impossible to wait: timeout");
    }
}
