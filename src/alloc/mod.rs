//! The allocator capability and its implementations.
//!
//! Buffers are handed out as [`RawBuf`] handles with no RAII -- you must
//! return every buffer to the allocator that issued it, exactly once.

mod checked;
mod frames;
mod malloc;
mod rawbuf;

pub use checked::{CheckedAllocator, CheckedAllocatorScope};
pub use frames::{FrameSkip, ENV_ALLOC_FRAMES, ENV_MAX_RETAINED_FRAMES, ENV_REALLOC_FRAMES};
pub use malloc::Mallocator;
pub use rawbuf::RawBuf;

/// The three-operation allocation capability. [`CheckedAllocator`] both
/// consumes this (the wrapped inner allocator) and implements it, so it can
/// be composed wherever an allocator is expected.
///
/// Implementations are assumed thread-safe; concurrent calls that mutate the
/// *same* buffer (free racing a reallocate, say) are the caller's bug, as
/// with any manual allocator.
pub trait Allocator: Send + Sync {
    /// Allocate a zeroed buffer of `size` bytes.
    fn allocate(&self, size: usize) -> RawBuf;

    /// Resize `buf` to `size` bytes, preserving its contents up to the
    /// shorter of the two lengths. `buf` must have been issued by this
    /// allocator, or have length 0. The returned buffer replaces `buf`,
    /// which must not be used again.
    fn reallocate(&self, size: usize, buf: RawBuf) -> RawBuf;

    /// Return `buf` to the allocator. `buf` must not be used again.
    fn free(&self, buf: RawBuf);
}

impl<A> Allocator for &A
where
    A: Allocator + ?Sized,
{
    fn allocate(&self, size: usize) -> RawBuf {
        (**self).allocate(size)
    }

    fn reallocate(&self, size: usize, buf: RawBuf) -> RawBuf {
        (**self).reallocate(size, buf)
    }

    fn free(&self, buf: RawBuf) {
        (**self).free(buf)
    }
}
