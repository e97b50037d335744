//! Periodic flattening signal.
//!
//! A background timer samples the process's allocation footprint; when it
//! has doubled since the last flatten it raises a shared flag. The
//! evaluator drains the flag between reduction steps and collapses the
//! lazy structures it currently retains. Purely advisory — correctness
//! never depends on it.
//!
//! The footprint comes from a counting wrapper around the system
//! allocator. Only the binary installs the wrapper; in library builds the
//! counter stays at zero and the flag never rises.

use std::alloc::{GlobalAlloc, Layout, System};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

static ALLOCATED: AtomicUsize = AtomicUsize::new(0);

/// System allocator wrapper that tracks live bytes. Install with
/// `#[global_allocator]`.
pub struct CountingAlloc;

// SAFETY: delegates entirely to `System`; only the byte counter is added.
unsafe impl GlobalAlloc for CountingAlloc {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let ptr = System.alloc(layout);
        if !ptr.is_null() {
            ALLOCATED.fetch_add(layout.size(), Ordering::Relaxed);
        }
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        System.dealloc(ptr, layout);
        ALLOCATED.fetch_sub(layout.size(), Ordering::Relaxed);
    }
}

/// Live heap bytes as seen by the counting allocator.
pub fn allocated_bytes() -> usize {
    ALLOCATED.load(Ordering::Relaxed)
}

const SAMPLE_INTERVAL: Duration = Duration::from_millis(100);

/// The background sampler. Dropping it shuts the worker down by closing
/// its channel.
pub struct Flattener {
    shutdown: Option<mpsc::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl Flattener {
    /// Spawn the sampler; `flag` is typically `Context::flatten_flag`.
    pub fn spawn(flag: Arc<AtomicBool>) -> Self {
        let (tx, rx) = mpsc::channel::<()>();
        let handle = thread::spawn(move || {
            let mut last = allocated_bytes().max(1);
            loop {
                match rx.recv_timeout(SAMPLE_INTERVAL) {
                    Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => return,
                    Err(mpsc::RecvTimeoutError::Timeout) => {}
                }
                let current = allocated_bytes();
                if current > 2 * last {
                    tracing::trace!(bytes = current, "allocation footprint doubled");
                    last = current;
                    flag.store(true, Ordering::Relaxed);
                } else if current < last {
                    last = current.max(1);
                }
            }
        });
        Flattener {
            shutdown: Some(tx),
            handle: Some(handle),
        }
    }
}

impl Drop for Flattener {
    fn drop(&mut self) {
        drop(self.shutdown.take());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
