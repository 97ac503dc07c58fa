//! Manual memory allocation for columnar buffers, with a debug/test-only
//! checked decorator that keeps exact books on every live allocation.
//!
//! The [`CheckedAllocator`] wraps any [`Allocator`] and tracks a running
//! total of live bytes plus a registry of outstanding allocations, each
//! annotated with the call site that produced it. At the end of a test,
//! [`CheckedAllocator::assert_size`] enumerates every leak with its captured
//! stack and flags any disagreement between the tracked total and the
//! expected value.

pub mod alloc;
pub mod report;
pub mod stack;

pub use alloc::{
    Allocator, CheckedAllocator, CheckedAllocatorScope, FrameSkip, Mallocator, RawBuf,
};
pub use report::{CollectingReporter, LogReporter, Reporter};
