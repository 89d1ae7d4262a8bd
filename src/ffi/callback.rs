//! Foreign-callable completion callbacks
//!
//! A C function pointer carries no user data, so every call gets its own
//! libffi closure: a freshly allocated code pointer that dispatches to a
//! one-shot handler. Nothing is pooled, so the number of calls in flight is
//! bounded only by memory.
//!
//! A closure stays allocated until the native side has invoked it, because
//! the native side may still hold its pointer. After it fires it is retired
//! and freed on a later sweep, never from inside its own invocation.

use std::collections::HashMap;
use std::ffi::c_void;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use libffi::high::Closure1;
use parking_lot::Mutex;

use super::types::CompletionCallback;

/// Handler run exactly once when the native side invokes an armed callback.
pub type CallbackHandler = Box<dyn FnOnce(*const c_void) + Send>;

/// An armed callback: the function pointer to hand to the native side.
#[derive(Debug, Clone, Copy)]
pub struct ArmedCallback {
    pub id: u64,
    pub callback: CompletionCallback,
}

/// A libffi closure together with the Rust callback it dispatches to.
struct ForeignCallback {
    // Declared first so it drops before the callback it borrows.
    closure: Closure1<'static, *const c_void, ()>,
    _target: Box<dyn Send + Sync>,
}

// SAFETY: the closure is executable memory plus a pointer into `_target`,
// which is itself Send + Sync. Neither is tied to the creating thread.
unsafe impl Send for ForeignCallback {}

impl ForeignCallback {
    fn new<F>(target: F) -> Self
    where
        F: Fn(*const c_void) + Send + Sync + 'static,
    {
        let target = Box::new(target);
        // SAFETY: the box is never moved out of and outlives `closure`.
        let borrowed: &'static F = unsafe { &*(target.as_ref() as *const F) };
        Self {
            closure: Closure1::new(borrowed),
            _target: target,
        }
    }

    fn code_ptr(&self) -> CompletionCallback {
        // SAFETY: `FnPtr1` is `#[repr(transparent)]` over exactly this fn
        // pointer type; the closure outlives every use of the pointer.
        unsafe {
            std::mem::transmute::<libffi::high::FnPtr1<'_, *const c_void, ()>, CompletionCallback>(
                *self.closure.code_ptr(),
            )
        }
    }
}

/// Closures belonging to one bridge.
///
/// Cloning shares the same arena.
#[derive(Clone)]
pub struct CallbackArena {
    inner: Arc<ArenaInner>,
}

struct ArenaInner {
    label: &'static str,
    next_id: AtomicU64,
    armed: AtomicUsize,
    live: Mutex<HashMap<u64, ForeignCallback>>,
    /// Fired since the last sweep.
    fired: Mutex<Vec<u64>>,
    /// Retired on the last sweep, freed on the next.
    cooling: Mutex<Vec<ForeignCallback>>,
}

impl CallbackArena {
    pub fn new(label: &'static str) -> Self {
        Self {
            inner: Arc::new(ArenaInner {
                label,
                next_id: AtomicU64::new(1),
                armed: AtomicUsize::new(0),
                live: Mutex::new(HashMap::new()),
                fired: Mutex::new(Vec::new()),
                cooling: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Allocate a closure that runs `handler` on its first invocation.
    pub fn arm(&self, handler: CallbackHandler) -> ArmedCallback {
        self.sweep();

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let arena = Arc::downgrade(&self.inner);
        let label = self.inner.label;
        let handler = Mutex::new(Some(handler));

        let foreign = ForeignCallback::new(move |arg| fire(&arena, label, id, &handler, arg));
        let callback = foreign.code_ptr();

        self.inner.armed.fetch_add(1, Ordering::SeqCst);
        self.inner.live.lock().insert(id, foreign);

        ArmedCallback { id, callback }
    }

    /// Free closures retired on the previous sweep and retire those fired since.
    pub fn sweep(&self) {
        let expired = std::mem::take(&mut *self.inner.cooling.lock());
        drop(expired);

        let fired = std::mem::take(&mut *self.inner.fired.lock());
        if fired.is_empty() {
            return;
        }

        let retired: Vec<ForeignCallback> = {
            let mut live = self.inner.live.lock();
            fired.iter().filter_map(|id| live.remove(id)).collect()
        };
        self.inner.cooling.lock().extend(retired);
    }

    /// Callbacks handed out whose native completion has not arrived yet
    pub fn armed(&self) -> usize {
        self.inner.armed.load(Ordering::SeqCst)
    }

    /// Closures still allocated, fired or not
    pub fn allocated(&self) -> usize {
        self.inner.live.lock().len() + self.inner.cooling.lock().len()
    }

    /// Arena label used in diagnostics
    pub fn label(&self) -> &'static str {
        self.inner.label
    }
}

impl std::fmt::Debug for CallbackArena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackArena")
            .field("label", &self.inner.label)
            .field("armed", &self.armed())
            .finish()
    }
}

impl Drop for ArenaInner {
    fn drop(&mut self) {
        // The native side may still call a closure that has not fired, and a
        // closure that just fired may still be returning. Keep both alive.
        for (_, foreign) in self.live.get_mut().drain() {
            std::mem::forget(foreign);
        }
    }
}

fn fire(
    arena: &Weak<ArenaInner>,
    label: &'static str,
    id: u64,
    handler: &Mutex<Option<CallbackHandler>>,
    arg: *const c_void,
) {
    let Some(handler) = handler.lock().take() else {
        tracing::debug!(target: "native_bridge::callback", arena = label, id, "repeated callback ignored");
        return;
    };

    // Never unwind into the native caller.
    if catch_unwind(AssertUnwindSafe(|| handler(arg))).is_err() {
        tracing::error!(target: "native_bridge::callback", arena = label, id, "completion handler panicked");
    }

    if let Some(inner) = arena.upgrade() {
        inner.armed.fetch_sub(1, Ordering::SeqCst);
        inner.fired.lock().push(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting(hits: &Arc<AtomicUsize>) -> CallbackHandler {
        let hits = Arc::clone(hits);
        Box::new(move |_| {
            hits.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_fire_runs_handler_once() {
        let arena = CallbackArena::new("test");
        let hits = Arc::new(AtomicUsize::new(0));

        let armed = arena.arm(counting(&hits));
        assert_eq!(arena.armed(), 1);

        (armed.callback)(std::ptr::null());
        (armed.callback)(std::ptr::null());

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(arena.armed(), 0);
    }

    #[test]
    fn test_handler_receives_argument() {
        let arena = CallbackArena::new("test");
        let seen = Arc::new(Mutex::new(0usize));
        let sink = Arc::clone(&seen);

        let armed = arena.arm(Box::new(move |arg| *sink.lock() = arg as usize));
        (armed.callback)(0x1234 as *const c_void);

        assert_eq!(*seen.lock(), 0x1234);
    }

    #[test]
    fn test_handler_panic_is_contained() {
        let arena = CallbackArena::new("test");
        let armed = arena.arm(Box::new(|_| panic!("boom")));
        (armed.callback)(std::ptr::null());
        assert_eq!(arena.armed(), 0);
    }

    #[test]
    fn test_no_fixed_capacity() {
        let arena = CallbackArena::new("test");
        let hits = Arc::new(AtomicUsize::new(0));

        let armed: Vec<ArmedCallback> = (0..500).map(|_| arena.arm(counting(&hits))).collect();
        assert_eq!(arena.armed(), 500);

        for callback in &armed {
            (callback.callback)(std::ptr::null());
        }
        assert_eq!(hits.load(Ordering::SeqCst), 500);
        assert_eq!(arena.armed(), 0);
    }

    #[test]
    fn test_code_pointers_are_distinct() {
        let arena = CallbackArena::new("test");
        let a = arena.arm(Box::new(|_| {}));
        let b = arena.arm(Box::new(|_| {}));
        assert_ne!(a.id, b.id);
        assert_ne!(a.callback as usize, b.callback as usize);
        (a.callback)(std::ptr::null());
        (b.callback)(std::ptr::null());
    }

    #[test]
    fn test_fired_closures_are_freed_after_two_sweeps() {
        let arena = CallbackArena::new("test");
        let armed = arena.arm(Box::new(|_| {}));
        let _unfired = arena.arm(Box::new(|_| {}));

        (armed.callback)(std::ptr::null());
        assert_eq!(arena.allocated(), 2);

        arena.sweep();
        assert_eq!(arena.allocated(), 2);

        arena.sweep();
        assert_eq!(arena.allocated(), 1);
        assert_eq!(arena.armed(), 1);
    }

    #[test]
    fn test_callback_outlives_dropped_arena() {
        let arena = CallbackArena::new("test");
        let hits = Arc::new(AtomicUsize::new(0));
        let armed = arena.arm(counting(&hits));

        drop(arena);
        (armed.callback)(std::ptr::null());

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
