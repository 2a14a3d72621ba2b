//! Stage progress reporting.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use log;

/// Progress callback. Receives the completed fraction of a stage in `[0.0, 1.0]`.
pub type ProgressHandler = Arc<dyn Fn(f64) + Send + Sync>;

/// Reports `done / total` to the handler if there is one.
///
/// Reporting is best-effort: a handler that panics is logged and otherwise ignored.
pub(crate) fn report(handler: Option<&ProgressHandler>, stage: &str, done: usize, total: usize) {
    let handler = match handler {
        Some(handler) => handler,
        None => return,
    };

    let fraction = if total == 0 {
        1.0
    } else {
        (done as f64 / total as f64).min(1.0)
    };

    if panic::catch_unwind(AssertUnwindSafe(|| handler(fraction))).is_err() {
        log::warn!("{} progress handler failed, ignoring", stage);
    }
}

#[cfg(test)]
mod test {
    use std::sync::{Arc, Mutex};

    use rstest::*;

    use super::{report, ProgressHandler};

    #[rstest]
    #[case(1, 4, 0.25)]
    #[case(4, 4, 1.0)]
    #[case(5, 4, 1.0)]
    #[case(0, 0, 1.0)]
    fn test_report(#[case] done: usize, #[case] total: usize, #[case] expected: f64) {
        let reported = Arc::new(Mutex::new(None));
        let handler: ProgressHandler = {
            let reported = reported.clone();
            Arc::new(move |value: f64| *reported.lock().unwrap() = Some(value))
        };

        report(Some(&handler), "test", done, total);

        assert_eq!(*reported.lock().unwrap(), Some(expected));
    }

    #[test]
    fn test_report_survives_failing_handler() {
        let handler: ProgressHandler = Arc::new(|_: f64| panic!("handler failure"));
        report(Some(&handler), "test", 1, 2);
        report(None, "test", 1, 2);
    }
}
