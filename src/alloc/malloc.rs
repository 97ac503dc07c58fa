use std::{
    alloc::{handle_alloc_error, Layout},
    ffi::c_void,
    ptr::NonNull,
};

use super::{Allocator, RawBuf};

/// The default inner allocator, backed by the C heap. New bytes are zeroed,
/// including the grown tail on reallocate.
pub struct Mallocator;

#[cold]
#[inline(never)]
fn oom(size: usize) -> ! {
    // fallback keeps Layout construction infallible for absurd sizes
    let layout = Layout::from_size_align(size, 1).unwrap_or_else(|_| Layout::new::<u8>());
    handle_alloc_error(layout)
}

impl Allocator for Mallocator {
    fn allocate(&self, size: usize) -> RawBuf {
        if size == 0 {
            return RawBuf::empty();
        }
        let data = unsafe { libc::malloc(size) };
        let Some(data) = NonNull::new(data as *mut u8) else {
            oom(size)
        };
        // SAFETY: `malloc()` returned at least `size` bytes at `data`, and
        // nobody else holds the pointer yet.
        unsafe {
            data.as_ptr().write_bytes(0, size);
            RawBuf::new(data, size)
        }
    }

    fn reallocate(&self, size: usize, buf: RawBuf) -> RawBuf {
        if size == 0 {
            self.free(buf);
            return RawBuf::empty();
        }
        if buf.is_empty() {
            return self.allocate(size);
        }
        let data = unsafe { libc::realloc(buf.as_ptr() as *mut c_void, size) };
        let Some(data) = NonNull::new(data as *mut u8) else {
            oom(size)
        };
        if size > buf.len() {
            // SAFETY: the region is `size` bytes long and the tail past the
            // old length is ours to initialize.
            unsafe {
                data.as_ptr().add(buf.len()).write_bytes(0, size - buf.len());
            }
        }
        // SAFETY: `realloc()` returned at least `size` bytes at `data`.
        unsafe { RawBuf::new(data, size) }
    }

    fn free(&self, buf: RawBuf) {
        if buf.is_empty() {
            return;
        }
        // SAFETY: the handle was issued by `allocate`/`reallocate` above, so
        // the pointer came from the C heap. Double frees are the caller's
        // contract violation, same as with `libc::free` itself.
        unsafe { libc::free(buf.as_ptr() as *mut c_void) }
    }
}
