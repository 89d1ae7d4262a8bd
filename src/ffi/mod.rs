//! FFI Module for native-bridge
//!
//! Loads the native libraries and exposes their entry points to the call
//! bridges.
//!
//! # Architecture
//!
//! ```text
//! BridgeRegistry::database("crypto-db")
//!       │
//!       ▼
//! Dynamic Loader (libloading)
//!   <libs-root>/crypto-db/target/release/libcrypto_db.so
//!       │
//!       ▼
//! DatabaseSymbols / ComputeSymbols (typed extern "C" pointers)
//!       │
//!       ▼
//! Native call ──completion──► libffi closure ──► bridge handler
//! ```
//!
//! # Example
//!
//! ```ignore
//! let registry = BridgeRegistry::new("./libs");
//! let db = registry.database("crypto-db")?;
//! let conn = db.open("app.db", "secret")?;
//! let result = db.execute(&conn, "SELECT 1")?.await?;
//! ```

mod callback;
mod loader;
mod registry;
mod symbols;
mod types;

pub use callback::{ArmedCallback, CallbackArena, CallbackHandler};
pub use loader::{library_dir, library_filename, library_path, NativeLibrary};
pub use registry::{global, install_global, BridgeRegistry};
pub use symbols::{ComputeSymbols, DatabaseSymbols};
pub use types::{
    layout, to_c_buffer, CallId, CloseDatabaseFn, CompletionCallback, ConnectionHandle,
    ExecuteSqlFn, FibonacciFn, FreeResultFn, OpenDatabaseFn, RawSqlResult, SetCallbackFn,
    SleepFn, VerifyEncryptionFn, OPEN_FAILED,
};
