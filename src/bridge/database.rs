//! Database call bridge
//!
//! Wraps the connection-oriented entry points of the encrypted database
//! library. `execute` is multiplexed: each call arms its own completion
//! closure, is tracked in the pending table under the identifier the native side
//! returns, and settles exactly once, either when the native completion
//! arrives or when the 30 second deadline passes. A call that timed out keeps
//! only enough state to release its result block if the native side still
//! calls back.

use std::ffi::c_void;
use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;

use super::decode::{self, SqlResult};
use super::pending::{PendingCall, PendingTable};
use crate::error::{BridgeError, BridgeResult, LoadError};
use crate::ffi::{
    to_c_buffer, CallId, CallbackArena, ConnectionHandle, DatabaseSymbols, NativeLibrary, RawSqlResult,
    OPEN_FAILED,
};

/// Deadline applied to every execute call.
pub const EXECUTE_TIMEOUT: Duration = Duration::from_secs(30);

/// Adapter over the encrypted database library.
pub struct DatabaseBridge {
    symbols: DatabaseSymbols,
    pending: Arc<PendingTable<SqlResult>>,
    callbacks: CallbackArena,
}

impl DatabaseBridge {
    pub fn new(symbols: DatabaseSymbols) -> Self {
        Self {
            symbols,
            pending: Arc::new(PendingTable::new()),
            callbacks: CallbackArena::new("database"),
        }
    }

    /// Resolve the database entry points from a loaded library.
    pub fn load(library: &Arc<NativeLibrary>) -> Result<Self, LoadError> {
        Ok(Self::new(DatabaseSymbols::resolve(library)?))
    }

    /// Open an encrypted database connection
    pub fn open(&self, path: &str, credential: &str) -> BridgeResult<ConnectionHandle> {
        let path_buf = to_c_buffer("path", path)?;
        let credential_buf = to_c_buffer("credential", credential)?;

        let raw = unsafe { (self.symbols.open)(path_buf.as_ptr(), credential_buf.as_ptr()) };

        if raw == OPEN_FAILED {
            tracing::warn!(target: "native_bridge::database", path, "open failed");
            return Err(BridgeError::OpenFailed {
                path: path.to_string(),
            });
        }

        let handle = ConnectionHandle::new(raw);
        tracing::info!(target: "native_bridge::database", path, %handle, "database opened");
        Ok(handle)
    }

    /// Dispatch a statement and return its in-flight execution.
    ///
    /// Dispatch is synchronous; await the returned [`Execution`] for the
    /// result. Completions may arrive in any order across executions.
    pub fn execute(&self, handle: &ConnectionHandle, statement: &str) -> BridgeResult<Execution> {
        let sql = to_c_buffer("statement", statement)?;
        let deadline = Instant::now() + EXECUTE_TIMEOUT;
        let (call, rx) = PendingCall::issue(Some(deadline));

        let handler = {
            let call = Arc::clone(&call);
            let pending = Arc::clone(&self.pending);
            // Holds the library loaded until the native side has called back.
            let symbols = self.symbols.clone();
            move |arg: *const c_void| {
                let result = unsafe { decode::decode_result(arg as *mut RawSqlResult, symbols.free) };
                if call.complete(result) {
                    pending.retire(&call);
                    tracing::debug!(target: "native_bridge::database", call_id = ?call.id(), "execute completed");
                } else {
                    tracing::debug!(target: "native_bridge::database", call_id = ?call.id(), "late callback ignored");
                }
            }
        };

        let armed = self.callbacks.arm(Box::new(handler));
        let call_id = CallId(unsafe { (self.symbols.execute)(handle.raw(), sql.as_ptr(), armed.callback) });
        self.pending.register(call_id, &call);

        tracing::debug!(target: "native_bridge::database", %call_id, %handle, callback = armed.id, "execute dispatched");

        Ok(Execution {
            call_id,
            deadline,
            call,
            rx,
            pending: Arc::clone(&self.pending),
        })
    }

    /// Dispatch a statement and wait for its result.
    pub async fn execute_sql(&self, handle: &ConnectionHandle, statement: &str) -> BridgeResult<SqlResult> {
        self.execute(handle, statement)?.await
    }

    /// Close a connection. Outstanding executions on it are not cancelled.
    pub fn close(&self, handle: ConnectionHandle) -> bool {
        let closed = unsafe { (self.symbols.close)(handle.raw()) };
        tracing::info!(target: "native_bridge::database", %handle, closed, "database closed");
        closed
    }

    /// Whether the file at `path` is unreadable without a credential
    pub fn verify_encryption(&self, path: &str) -> BridgeResult<bool> {
        let path_buf = to_c_buffer("path", path)?;
        Ok(unsafe { (self.symbols.verify)(path_buf.as_ptr()) })
    }

    /// Number of executions still awaiting completion or expiry
    pub fn pending_calls(&self) -> usize {
        self.pending.len()
    }

    /// Completion callbacks the native side has not invoked yet, timed-out calls included
    pub fn armed_callbacks(&self) -> usize {
        self.callbacks.armed()
    }
}

/// An execute call in flight.
///
/// Await it (or call [`Execution::wait`]) for the result. Dropping it
/// without awaiting settles the call as expired.
pub struct Execution {
    call_id: CallId,
    deadline: Instant,
    call: Arc<PendingCall<SqlResult>>,
    rx: oneshot::Receiver<SqlResult>,
    pending: Arc<PendingTable<SqlResult>>,
}

impl Execution {
    /// Identifier the native side assigned to this call
    pub fn call_id(&self) -> CallId {
        self.call_id
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Wait for completion, or fail with [`BridgeError::Timeout`] at the deadline.
    pub async fn wait(mut self) -> BridgeResult<SqlResult> {
        let call_id = self.call_id;

        match tokio::time::timeout_at(self.deadline, &mut self.rx).await {
            Ok(received) => received.map_err(|_| BridgeError::Disconnected { call_id }),
            Err(_) if self.call.abandon(&self.pending) => {
                tracing::warn!(target: "native_bridge::database", %call_id, "execute timed out");
                Err(BridgeError::Timeout {
                    call_id,
                    after: EXECUTE_TIMEOUT,
                })
            }
            // The completion won the race right at the deadline.
            Err(_) => (&mut self.rx)
                .await
                .map_err(|_| BridgeError::Disconnected { call_id }),
        }
    }
}

impl IntoFuture for Execution {
    type Output = BridgeResult<SqlResult>;
    type IntoFuture = Pin<Box<dyn Future<Output = Self::Output> + Send>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.wait())
    }
}

impl Drop for Execution {
    fn drop(&mut self) {
        if self.call.abandon(&self.pending) {
            tracing::debug!(target: "native_bridge::database", call_id = %self.call_id, "execution abandoned");
        }
    }
}

impl std::fmt::Debug for Execution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Execution")
            .field("call_id", &self.call_id)
            .field("phase", &self.call.phase())
            .finish()
    }
}

impl std::fmt::Debug for DatabaseBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseBridge").finish_non_exhaustive()
    }
}
