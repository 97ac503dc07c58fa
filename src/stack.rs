//! The stack-introspection adapter: a narrow seam over the platform
//! backtrace machinery so the checked allocator never touches it directly.
//!
//! Capture is split from resolution on purpose. Grabbing raw program
//! counters is cheap enough to sit on the allocation path; turning them
//! into function names and lines is not, so symbolization is deferred to
//! report time.

use backtrace::{Backtrace, BacktraceFrame};

/// One resolved caller frame. A frame with `line == 0` is the sentinel that
/// terminates diagnostic printing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameInfo {
    pub function: String,
    pub line: u32,
}

impl FrameInfo {
    pub(crate) fn sentinel() -> Self {
        Self {
            function: String::new(),
            line: 0,
        }
    }

    pub fn is_sentinel(&self) -> bool {
        self.line == 0
    }
}

/// The call site an allocation came from, plus the further caller frames
/// retained for printing.
#[derive(Clone, Debug)]
pub struct ResolvedStack {
    pub call_site: FrameInfo,
    pub retained: Vec<FrameInfo>,
}

/// An unresolved stack capture taken at allocation time. `skip` counts the
/// frames between the capture point and the frame to report as the call
/// site (tuned by [`FrameSkip`](crate::FrameSkip)).
#[derive(Clone)]
pub struct StackCapture {
    trace: Backtrace,
    skip: usize,
}

impl StackCapture {
    pub fn capture(skip: usize) -> Self {
        Self {
            trace: Backtrace::new_unresolved(),
            skip,
        }
    }

    /// Symbolize and return the call site plus up to `retain` further caller
    /// frames. Missing frames resolve to the sentinel, so callers can print
    /// until the first `line == 0` without bounds checks.
    pub fn resolve(&self, retain: usize) -> ResolvedStack {
        let mut trace = self.trace.clone();
        trace.resolve();
        let mut frames = trace.frames().iter().skip(self.skip);
        let call_site = frames.next().map(frame_info).unwrap_or_else(FrameInfo::sentinel);
        let retained = frames.take(retain).map(frame_info).collect();
        ResolvedStack {
            call_site,
            retained,
        }
    }
}

fn frame_info(frame: &BacktraceFrame) -> FrameInfo {
    let Some(symbol) = frame.symbols().first() else {
        return FrameInfo::sentinel();
    };
    FrameInfo {
        function: symbol
            .name()
            .map(|name| name.to_string())
            .unwrap_or_default(),
        line: symbol.lineno().unwrap_or(0),
    }
}
