//! The reporting sink consumed by the leak and size assertions.

use std::{fmt, sync::Mutex};

/// A test-harness sink for assertion failures. Failures are non-fatal so a
/// single assertion call can enumerate every leak instead of aborting at
/// the first one.
pub trait Reporter {
    /// Record one formatted failure.
    fn errorf(&self, args: fmt::Arguments<'_>);

    /// Mark the calling helper as test plumbing. A no-op unless the sink
    /// has a notion of helper frames.
    fn helper(&self) {}
}

impl<R> Reporter for &R
where
    R: Reporter + ?Sized,
{
    fn errorf(&self, args: fmt::Arguments<'_>) {
        (**self).errorf(args)
    }

    fn helper(&self) {
        (**self).helper()
    }
}

/// Routes failures to `log::error!`.
pub struct LogReporter;

impl Reporter for LogReporter {
    fn errorf(&self, args: fmt::Arguments<'_>) {
        log::error!("{args}");
    }
}

/// Buffers failures for later inspection. The default sink in tests.
#[derive(Default)]
pub struct CollectingReporter {
    failures: Mutex<Vec<String>>,
}

impl CollectingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failures(&self) -> Vec<String> {
        self.failures.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.failures.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Reporter for CollectingReporter {
    fn errorf(&self, args: fmt::Arguments<'_>) {
        self.failures.lock().unwrap().push(args.to_string());
    }
}
