use std::{ptr::NonNull, slice};

/// A non-owning handle to an allocated region: pointer plus requested length.
/// There is no RAII -- whoever holds the handle is responsible for returning
/// it to the allocator that issued it.
///
/// The handle is `Copy`; copying it does not duplicate the allocation, so
/// the usual manual-allocator discipline applies (one free per allocation,
/// no use after free).
#[derive(Clone, Copy, Debug)]
pub struct RawBuf {
    data: NonNull<u8>,
    len: usize,
}

// SAFETY: `RawBuf` is a bare handle. Which thread frees or reads through it
// is caller discipline, exactly as it would be for the raw pointer itself.
unsafe impl Send for RawBuf {}
unsafe impl Sync for RawBuf {}

impl RawBuf {
    /// The zero-length buffer. Its pointer is dangling, so it has no unique
    /// identity and must never be dereferenced.
    pub const fn empty() -> Self {
        Self {
            data: NonNull::dangling(),
            len: 0,
        }
    }

    /// # Safety
    ///
    /// `data` must point to an allocation of at least `len` bytes, valid for
    /// reads and writes until the buffer is freed.
    pub const unsafe fn new(data: NonNull<u8>, len: usize) -> Self {
        Self { data, len }
    }

    pub const fn len(&self) -> usize {
        self.len
    }

    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub const fn as_ptr(&self) -> *mut u8 {
        self.data.as_ptr()
    }

    /// The address of the first byte -- the identity under which the checked
    /// allocator registers this buffer.
    pub fn addr(&self) -> usize {
        self.data.as_ptr() as usize
    }

    /// # Safety
    ///
    /// The buffer must still be live, and no other caller may be writing to
    /// it for the duration of the borrow.
    pub unsafe fn as_slice(&self) -> &[u8] {
        slice::from_raw_parts(self.data.as_ptr(), self.len)
    }

    /// # Safety
    ///
    /// The buffer must still be live, and this must be the only access to it
    /// for the duration of the borrow.
    pub unsafe fn as_mut_slice(&mut self) -> &mut [u8] {
        slice::from_raw_parts_mut(self.data.as_ptr(), self.len)
    }
}
