//! Call bridges
//!
//! Adapters that turn the callback-style native entry points into awaitable
//! operations.
//!
//! ```text
//! caller ──execute──► DatabaseBridge ──arm closure──► execute_sql_async(handle, sql, cb)
//!    ▲                     │                                    │
//!    │               PendingTable[call id]               (native thread)
//!    │                     │                                    │
//!    └──── SqlResult ◄── decode ◄──── libffi closure(result block)
//! ```
//!
//! Every dispatched call settles exactly once: on completion, on expiry at
//! its deadline, or when the caller stops waiting.

mod compute;
mod database;
pub mod decode;
mod pending;

pub use compute::{ComputeBridge, ComputeOp};
pub use database::{DatabaseBridge, Execution, EXECUTE_TIMEOUT};
pub use decode::{SqlOutcome, SqlResult};
pub use pending::{CallPhase, PendingCall, PendingTable};
