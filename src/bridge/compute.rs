//! Compute call bridge
//!
//! The compute library keeps a single process-wide callback and reports
//! completion through whichever function was registered last. Each call here
//! arms its own closure, and calls are serialised: the registration gate is
//! held by the armed closure and released only when the native side calls
//! back, even if the caller stopped waiting long before. No deadline applies:
//! a native call that never completes keeps its caller waiting, so inputs the
//! native side never completes for are rejected before dispatch.

use std::ffi::{c_char, c_void, CStr};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;

use super::pending::{PendingCall, PendingTable};
use crate::error::{BridgeError, BridgeResult, LoadError};
use crate::ffi::{CallId, CallbackArena, ComputeSymbols, NativeLibrary};

/// A native compute operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputeOp {
    /// Bounded computation over one input
    Fibonacci(u32),
    /// Timed wait in seconds
    Sleep(u64),
}

impl ComputeOp {
    /// Reject inputs the native side never calls back for.
    pub fn validate(self) -> BridgeResult<()> {
        match self {
            ComputeOp::Fibonacci(0) => Err(BridgeError::InvalidArgument {
                what: "fibonacci input",
                reason: "must be at least 1",
            }),
            _ => Ok(()),
        }
    }

    /// Run the native entry point. May block for the duration of the work.
    ///
    /// The callback message is the call's result; the value `fibonacci`
    /// returns directly is only logged.
    fn dispatch(self, symbols: &ComputeSymbols) {
        match self {
            ComputeOp::Fibonacci(n) => {
                let value = unsafe { (symbols.fibonacci)(n) };
                debug!(target: "native_bridge::compute", n, value, "fibonacci returned");
            }
            ComputeOp::Sleep(seconds) => unsafe { (symbols.sleep)(seconds) },
        }
    }
}

/// Adapter over the compute library.
pub struct ComputeBridge {
    symbols: ComputeSymbols,
    /// Held from arming until the native side calls back.
    registration: Arc<AsyncMutex<()>>,
    pending: Arc<PendingTable<String>>,
    callbacks: CallbackArena,
    next_id: AtomicI64,
}

impl ComputeBridge {
    pub fn new(symbols: ComputeSymbols) -> Self {
        Self {
            symbols,
            registration: Arc::new(AsyncMutex::new(())),
            pending: Arc::new(PendingTable::new()),
            callbacks: CallbackArena::new("compute"),
            next_id: AtomicI64::new(1),
        }
    }

    /// Resolve the compute entry points from a loaded library.
    pub fn load(library: &Arc<NativeLibrary>) -> Result<Self, LoadError> {
        Ok(Self::new(ComputeSymbols::resolve(library)?))
    }

    /// Compute the n-th Fibonacci number natively; resolves with the native message.
    pub async fn fibonacci(&self, n: u32) -> BridgeResult<String> {
        self.invoke(ComputeOp::Fibonacci(n)).await
    }

    /// Sleep natively for `seconds`; resolves with the native message.
    pub async fn sleep(&self, seconds: u64) -> BridgeResult<String> {
        self.invoke(ComputeOp::Sleep(seconds)).await
    }

    /// Arm a completion closure, dispatch `op`, and wait for its message.
    pub async fn invoke(&self, op: ComputeOp) -> BridgeResult<String> {
        op.validate()?;
        let registration = Arc::clone(&self.registration).lock_owned().await;

        let call_id = CallId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (call, rx) = PendingCall::issue(None);

        let handler = {
            let call = Arc::clone(&call);
            let pending = Arc::clone(&self.pending);
            move |arg: *const c_void| {
                let message = unsafe { read_message(arg as *const c_char) };
                if call.complete(message) {
                    pending.retire(&call);
                } else {
                    debug!(target: "native_bridge::compute", call_id = ?call.id(), "late callback ignored");
                }
                drop(registration);
            }
        };

        let armed = self.callbacks.arm(Box::new(handler));
        self.pending.register(call_id, &call);
        let _abandon = AbandonOnDrop {
            call: &call,
            pending: &self.pending,
        };

        unsafe { (self.symbols.set_callback)(armed.callback) };

        let symbols = self.symbols.clone();
        tokio::task::spawn_blocking(move || op.dispatch(&symbols));
        debug!(target: "native_bridge::compute", %call_id, ?op, callback = armed.id, "compute dispatched");

        let message = rx.await.map_err(|_| BridgeError::Disconnected { call_id })?;
        debug!(target: "native_bridge::compute", %call_id, "compute completed");
        Ok(message)
    }

    /// Number of compute calls still awaiting completion
    pub fn pending_calls(&self) -> usize {
        self.pending.len()
    }

    /// Compute callbacks the native side has not invoked yet
    pub fn armed_callbacks(&self) -> usize {
        self.callbacks.armed()
    }
}

/// Settles the call as expired if the caller stops waiting.
struct AbandonOnDrop<'a> {
    call: &'a Arc<PendingCall<String>>,
    pending: &'a PendingTable<String>,
}

impl Drop for AbandonOnDrop<'_> {
    fn drop(&mut self) {
        if self.call.abandon(self.pending) {
            debug!(target: "native_bridge::compute", call_id = ?self.call.id(), "compute abandoned");
        }
    }
}

/// Copy the NUL-terminated message the native side passed to the callback.
///
/// # Safety
///
/// `ptr` must be null or point to a NUL-terminated string that stays valid
/// for the duration of this call.
unsafe fn read_message(ptr: *const c_char) -> String {
    if ptr.is_null() {
        return String::new();
    }
    CStr::from_ptr(ptr).to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;

    #[test]
    fn test_read_message() {
        let message = CString::new("Fibonacci(3) = 2 ").unwrap();
        assert_eq!(unsafe { read_message(message.as_ptr()) }, "Fibonacci(3) = 2 ");
        assert_eq!(unsafe { read_message(std::ptr::null()) }, "");
    }

    #[test]
    fn test_fibonacci_zero_is_rejected() {
        let err = ComputeOp::Fibonacci(0).validate().unwrap_err();
        assert!(matches!(err, BridgeError::InvalidArgument { what: "fibonacci input", .. }));
        assert!(ComputeOp::Fibonacci(1).validate().is_ok());
        assert!(ComputeOp::Sleep(0).validate().is_ok());
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let bytes = CString::new(vec![b'o', b'k', 0xff]).unwrap();
        assert_eq!(unsafe { read_message(bytes.as_ptr()) }, "ok\u{fffd}");
    }
}

impl std::fmt::Debug for ComputeBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputeBridge").finish_non_exhaustive()
    }
}
