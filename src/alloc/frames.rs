use std::env;

use once_cell::sync::Lazy;

/// Env var overriding how many frames to skip when recording allocate call
/// sites.
pub const ENV_ALLOC_FRAMES: &str = "COLMEM_CHECKED_ALLOC_FRAMES";
/// Env var overriding how many frames to skip when recording reallocate call
/// sites.
pub const ENV_REALLOC_FRAMES: &str = "COLMEM_CHECKED_REALLOC_FRAMES";
/// Env var overriding how many caller frames to retain for leak reports.
pub const ENV_MAX_RETAINED_FRAMES: &str = "COLMEM_CHECKED_MAX_RETAINED_FRAMES";

// Allocations typically happen inside the buffer layer, not by consumers
// calling allocate/reallocate directly, so the recorded call site skips the
// buffer internals to land on whoever triggered the resize. Reallocate sits
// one call level shallower than allocate, hence the smaller default.
const DEF_ALLOC_FRAMES: usize = 4;
const DEF_REALLOC_FRAMES: usize = 3;
const DEF_MAX_RETAINED_FRAMES: usize = 0;

static GLOBAL: Lazy<FrameSkip> = Lazy::new(FrameSkip::from_env);

/// How many stack frames the checked allocator skips when recording call
/// sites, and how many further caller frames it retains for leak reports.
///
/// [`CheckedAllocator::new`](super::CheckedAllocator::new) uses the
/// process-wide [`FrameSkip::global`] value; pass an explicit one via
/// [`CheckedAllocator::with_frame_skip`](super::CheckedAllocator::with_frame_skip)
/// to avoid ambient state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameSkip {
    pub alloc_frames: usize,
    pub realloc_frames: usize,
    pub max_retained_frames: usize,
}

impl Default for FrameSkip {
    fn default() -> Self {
        Self {
            alloc_frames: DEF_ALLOC_FRAMES,
            realloc_frames: DEF_REALLOC_FRAMES,
            max_retained_frames: DEF_MAX_RETAINED_FRAMES,
        }
    }
}

impl FrameSkip {
    /// The process-wide configuration: defaults overridden by the env vars
    /// above, read once on first use and immutable after that.
    pub fn global() -> FrameSkip {
        *GLOBAL
    }

    /// Read the configuration from the process environment. Unset or
    /// unparsable variables keep their defaults, silently.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &str, def: usize| {
            lookup(name)
                .and_then(|val| val.trim().parse().ok())
                .unwrap_or(def)
        };
        Self {
            alloc_frames: read(ENV_ALLOC_FRAMES, DEF_ALLOC_FRAMES),
            realloc_frames: read(ENV_REALLOC_FRAMES, DEF_REALLOC_FRAMES),
            max_retained_frames: read(ENV_MAX_RETAINED_FRAMES, DEF_MAX_RETAINED_FRAMES),
        }
    }
}
