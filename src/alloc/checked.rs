//! A decorator over any [`Allocator`] that keeps exact books on live
//! allocations, for leak hunting in tests. Not a production allocator.

use std::{
    fmt::Write as _,
    sync::atomic::{AtomicI64, Ordering},
};

use dashmap::DashMap;
use log::{debug, trace};

use super::{frames::FrameSkip, Allocator, RawBuf};
use crate::{report::Reporter, stack::StackCapture};

/// One outstanding allocation: its size and where it came from. Keyed in the
/// registry by the address of the buffer's first byte.
struct AllocRecord {
    size: usize,
    stack: StackCapture,
}

/// Wraps an inner [`Allocator`] and tracks every allocation passing through:
/// a running signed total of live bytes, and a registry of outstanding
/// allocations annotated with their captured call stacks.
///
/// Content is passed through untouched; only the bookkeeping is added. Call
/// [`assert_size`](Self::assert_size) at the end of a test to enumerate
/// every leak and check the total.
pub struct CheckedAllocator<A>
where
    A: Allocator,
{
    inner: A,
    size: AtomicI64,
    allocs: DashMap<usize, AllocRecord>,
    frame_skip: FrameSkip,
}

/// Frees the buffer when dropped, so the inner free runs on every exit path
/// out of [`CheckedAllocator::free`].
struct DeferredFree<'a, A>
where
    A: Allocator,
{
    inner: &'a A,
    buf: RawBuf,
}

impl<A> Drop for DeferredFree<'_, A>
where
    A: Allocator,
{
    fn drop(&mut self) {
        self.inner.free(self.buf);
    }
}

impl<A> CheckedAllocator<A>
where
    A: Allocator,
{
    /// Wrap `inner`, using the process-wide [`FrameSkip::global`]
    /// configuration.
    pub fn new(inner: A) -> Self {
        Self::with_frame_skip(inner, FrameSkip::global())
    }

    /// Wrap `inner` with an explicit frame-skip configuration, bypassing the
    /// ambient env-derived one.
    pub fn with_frame_skip(inner: A, frame_skip: FrameSkip) -> Self {
        Self {
            inner,
            size: AtomicI64::new(0),
            allocs: DashMap::new(),
            frame_skip,
        }
    }

    /// The wrapped inner allocator.
    pub fn inner(&self) -> &A {
        &self.inner
    }

    /// Net live bytes right now. Non-blocking; safe to call concurrently
    /// with any other operation.
    pub fn current_alloc(&self) -> i64 {
        self.size.load(Ordering::SeqCst)
    }

    /// Report every outstanding allocation as a leak, then report a size
    /// mismatch if the live-byte total differs from `expected`.
    ///
    /// The registry walk is best-effort: concurrent mutation during the walk
    /// is tolerated, not snapshotted. Nothing is cleared or reset -- this is
    /// a read-only diagnostic, meant to run once at the end of a test.
    pub fn assert_size<R>(&self, reporter: &R, expected: i64)
    where
        R: Reporter + ?Sized,
    {
        let mut outstanding = 0usize;
        for entry in self.allocs.iter() {
            outstanding += 1;
            let record = entry.value();
            let resolved = record.stack.resolve(self.frame_skip.max_retained_frames);
            let mut callers = String::new();
            for frame in &resolved.retained {
                if frame.is_sentinel() {
                    break;
                }
                let _ = writeln!(callers, "\t{} line {}", frame.function, frame.line);
            }
            reporter.errorf(format_args!(
                "LEAK of {} bytes FROM {} line {}\n{}",
                record.size, resolved.call_site.function, resolved.call_site.line, callers
            ));
        }
        if outstanding > 0 {
            debug!("leak check found {outstanding} outstanding allocations");
        }

        let current = self.size.load(Ordering::SeqCst);
        if current != expected {
            reporter.helper();
            reporter.errorf(format_args!(
                "invalid memory size exp={expected}, got={current}"
            ));
        }
    }
}

impl<A> Allocator for CheckedAllocator<A>
where
    A: Allocator,
{
    fn allocate(&self, size: usize) -> RawBuf {
        self.size.fetch_add(size as i64, Ordering::SeqCst);
        let out = self.inner.allocate(size);
        if size == 0 {
            // a zero-length region has no unique identity to register
            return out;
        }
        trace!("allocate {} bytes at {:#x}", size, out.addr());
        self.allocs.insert(
            out.addr(),
            AllocRecord {
                size,
                stack: StackCapture::capture(self.frame_skip.alloc_frames),
            },
        );
        out
    }

    fn reallocate(&self, size: usize, buf: RawBuf) -> RawBuf {
        self.size
            .fetch_add(size as i64 - buf.len() as i64, Ordering::SeqCst);
        let old = buf.addr();
        let out = self.inner.reallocate(size, buf);
        if size == 0 {
            // the old record, if any, is intentionally left untouched here
            return out;
        }
        trace!("reallocate {} bytes, {:#x} -> {:#x}", size, old, out.addr());
        self.allocs.remove(&old);
        self.allocs.insert(
            out.addr(),
            AllocRecord {
                size,
                stack: StackCapture::capture(self.frame_skip.realloc_frames),
            },
        );
        out
    }

    fn free(&self, buf: RawBuf) {
        self.size.fetch_sub(buf.len() as i64, Ordering::SeqCst);
        // scheduled before the early return so the inner free always runs
        let _release = DeferredFree {
            inner: &self.inner,
            buf,
        };
        if buf.is_empty() {
            return;
        }
        trace!("free {} bytes at {:#x}", buf.len(), buf.addr());
        self.allocs.remove(&buf.addr());
    }
}

/// A nested measurement window over the live-byte total: snapshot on
/// construction, compare on [`check_size`](Self::check_size). Independent of
/// the leak registry.
pub struct CheckedAllocatorScope<'a, A>
where
    A: Allocator,
{
    alloc: &'a CheckedAllocator<A>,
    size: i64,
}

impl<'a, A> CheckedAllocatorScope<'a, A>
where
    A: Allocator,
{
    pub fn new(alloc: &'a CheckedAllocator<A>) -> Self {
        Self {
            alloc,
            size: alloc.current_alloc(),
        }
    }

    /// Report a size mismatch if the live-byte total has moved since this
    /// scope was created.
    pub fn check_size<R>(&self, reporter: &R)
    where
        R: Reporter + ?Sized,
    {
        let current = self.alloc.current_alloc();
        if self.size != current {
            reporter.helper();
            reporter.errorf(format_args!(
                "invalid memory size exp={}, got={}",
                self.size, current
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use rand::Rng;

    use super::*;
    use crate::{alloc::Mallocator, report::CollectingReporter};

    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn checked() -> CheckedAllocator<Mallocator> {
        init_logging();
        CheckedAllocator::with_frame_skip(Mallocator, FrameSkip::default())
    }

    /// Counts calls through to the wrapped allocator.
    struct CountingAllocator {
        allocs: AtomicUsize,
        reallocs: AtomicUsize,
        frees: AtomicUsize,
    }

    impl CountingAllocator {
        fn new() -> Self {
            Self {
                allocs: AtomicUsize::new(0),
                reallocs: AtomicUsize::new(0),
                frees: AtomicUsize::new(0),
            }
        }
    }

    impl Allocator for CountingAllocator {
        fn allocate(&self, size: usize) -> RawBuf {
            self.allocs.fetch_add(1, Ordering::SeqCst);
            Mallocator.allocate(size)
        }

        fn reallocate(&self, size: usize, buf: RawBuf) -> RawBuf {
            self.reallocs.fetch_add(1, Ordering::SeqCst);
            Mallocator.reallocate(size, buf)
        }

        fn free(&self, buf: RawBuf) {
            self.frees.fetch_add(1, Ordering::SeqCst);
            Mallocator.free(buf)
        }
    }

    #[test]
    fn allocate_then_free_balances() {
        let a = checked();
        let buf = a.allocate(100);
        assert_eq!(a.current_alloc(), 100);
        a.free(buf);
        assert_eq!(a.current_alloc(), 0);

        let t = CollectingReporter::new();
        a.assert_size(&t, 0);
        assert!(t.is_empty(), "unexpected failures: {:?}", t.failures());
    }

    #[test]
    fn unmatched_allocation_reports_one_leak_and_one_mismatch() {
        let a = checked();
        let buf = a.allocate(50);

        let t = CollectingReporter::new();
        a.assert_size(&t, 0);
        let failures = t.failures();
        assert_eq!(failures.len(), 2);
        assert!(failures[0].starts_with("LEAK of 50 bytes FROM "));
        assert_eq!(failures[1], "invalid memory size exp=0, got=50");

        a.free(buf);
    }

    #[test]
    fn assert_size_is_read_only() {
        let a = checked();
        let buf = a.allocate(50);

        let t = CollectingReporter::new();
        a.assert_size(&t, 0);
        a.assert_size(&t, 0);
        // both passes see the same leak and the same mismatch
        assert_eq!(t.len(), 4);
        assert_eq!(a.current_alloc(), 50);

        a.free(buf);
    }

    #[test]
    fn reallocate_moves_the_record_to_the_new_identity() {
        let a = checked();
        let buf = a.allocate(10);
        let old = buf.addr();
        let grown = a.reallocate(20, buf);

        assert_eq!(a.current_alloc(), 20);
        assert_eq!(a.allocs.len(), 1);
        assert!(a.allocs.contains_key(&grown.addr()));
        if grown.addr() != old {
            assert!(!a.allocs.contains_key(&old));
        }
        assert_eq!(a.allocs.get(&grown.addr()).unwrap().size, 20);

        a.free(grown);
        let t = CollectingReporter::new();
        a.assert_size(&t, 0);
        assert!(t.is_empty());
    }

    #[test]
    fn reallocate_shrink_tracks_the_delta() {
        let a = checked();
        let buf = a.allocate(100);
        let shrunk = a.reallocate(40, buf);
        assert_eq!(a.current_alloc(), 40);
        a.free(shrunk);
        assert_eq!(a.current_alloc(), 0);
    }

    #[test]
    fn reallocate_to_zero_leaves_the_old_record() {
        let a = checked();
        let buf = a.allocate(10);
        let old = buf.addr();
        let empty = a.reallocate(0, buf);

        assert!(empty.is_empty());
        assert_eq!(a.current_alloc(), 0);
        // zero-size reallocate skips registry cleanup entirely
        assert!(a.allocs.contains_key(&old));

        a.allocs.clear();
        a.free(empty);
    }

    #[test]
    fn scope_detects_a_net_delta() {
        let a = checked();
        let baseline = a.allocate(64);

        let scope = CheckedAllocatorScope::new(&a);
        let leaked = a.allocate(30);

        let t = CollectingReporter::new();
        scope.check_size(&t);
        assert_eq!(t.failures(), vec!["invalid memory size exp=64, got=94"]);

        let t = CollectingReporter::new();
        a.assert_size(&t, 64);
        let leaks: Vec<_> = t
            .failures()
            .into_iter()
            .filter(|msg| msg.starts_with("LEAK of 30 bytes"))
            .collect();
        assert_eq!(leaks.len(), 1);

        a.free(leaked);
        a.free(baseline);
    }

    #[test]
    fn balanced_scope_is_quiet() {
        let a = checked();
        let scope = CheckedAllocatorScope::new(&a);
        let buf = a.allocate(16);
        a.free(buf);

        let t = CollectingReporter::new();
        scope.check_size(&t);
        assert!(t.is_empty());
    }

    #[test]
    fn zero_size_allocate_skips_the_registry() {
        init_logging();
        let a = CheckedAllocator::with_frame_skip(CountingAllocator::new(), FrameSkip::default());
        let buf = a.allocate(0);
        assert!(buf.is_empty());
        assert_eq!(a.current_alloc(), 0);
        assert_eq!(a.allocs.len(), 0);

        a.free(buf);
        // the inner free still runs exactly once on the early-return path
        assert_eq!(a.inner().frees.load(Ordering::SeqCst), 1);
        assert_eq!(a.current_alloc(), 0);
    }

    #[test]
    fn free_of_a_foreign_buffer_is_a_registry_no_op() {
        let a = checked();
        let ours = a.allocate(8);
        let foreign = Mallocator.allocate(8);
        a.free(foreign);
        // the size delta still applied; the registry was untouched
        assert_eq!(a.current_alloc(), 0);
        assert_eq!(a.allocs.len(), 1);
        a.free(ours);
    }

    #[test]
    fn current_alloc_is_idempotent() {
        let a = checked();
        let buf = a.allocate(24);
        let first = a.current_alloc();
        assert_eq!(first, a.current_alloc());
        assert_eq!(first, a.current_alloc());
        a.free(buf);
    }

    #[test]
    fn stale_record_at_a_reused_identity_is_overwritten() {
        let a = checked();
        let buf = a.allocate(32);
        let addr = buf.addr();
        // simulate an identity reused while a stale record still sits there
        a.allocs.get_mut(&addr).unwrap().size = 999;
        a.free(buf);
        let again = a.allocate(32);
        if again.addr() == addr {
            assert_eq!(a.allocs.get(&addr).unwrap().size, 32);
        }
        a.free(again);
    }

    #[test]
    fn leak_report_retains_frames_up_to_the_sentinel() {
        init_logging();
        let cfg = FrameSkip {
            alloc_frames: 0,
            realloc_frames: 0,
            max_retained_frames: 8,
        };
        let a = CheckedAllocator::with_frame_skip(Mallocator, cfg);
        let buf = a.allocate(12);

        let t = CollectingReporter::new();
        a.assert_size(&t, 12);
        let failures = t.failures();
        assert_eq!(failures.len(), 1);
        assert!(failures[0].starts_with("LEAK of 12 bytes FROM "));
        // every retained frame prints as a tab-indented "function line N"
        for caller in failures[0].lines().skip(1) {
            assert!(caller.starts_with('\t'));
            assert!(caller.contains(" line "));
        }

        a.free(buf);
    }

    #[test]
    fn concurrent_allocate_free_storm_balances() {
        let a = checked();
        crossbeam::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|_| {
                    let mut rng = rand::thread_rng();
                    for _ in 0..200 {
                        let size = rng.gen_range(1..=256);
                        let buf = a.allocate(size);
                        let buf = if size % 3 == 0 {
                            a.reallocate(size * 2, buf)
                        } else {
                            buf
                        };
                        a.free(buf);
                    }
                });
            }
        })
        .unwrap();

        assert_eq!(a.current_alloc(), 0);
        assert_eq!(a.allocs.len(), 0);
        let t = CollectingReporter::new();
        a.assert_size(&t, 0);
        assert!(t.is_empty(), "unexpected failures: {:?}", t.failures());
    }

    #[test]
    fn buffers_freed_on_another_thread_still_balance() {
        let a = checked();
        let (tx, rx) = crossbeam::channel::unbounded::<RawBuf>();
        crossbeam::thread::scope(|s| {
            for _ in 0..4 {
                let tx = tx.clone();
                s.spawn(|_| {
                    let tx = tx;
                    let mut rng = rand::thread_rng();
                    for _ in 0..100 {
                        tx.send(a.allocate(rng.gen_range(1..=128))).unwrap();
                    }
                });
            }
            drop(tx);
            s.spawn(|_| {
                for buf in rx.iter() {
                    a.free(buf);
                }
            });
        })
        .unwrap();

        assert_eq!(a.current_alloc(), 0);
        assert_eq!(a.allocs.len(), 0);
    }
}
