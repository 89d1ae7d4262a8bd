//! native-bridge - Awaitable calls into callback-driven native libraries
//!
//! Loads an encrypted database library and a compute library at runtime and
//! turns their completion-callback entry points into futures.
//!
//! # Features
//!
//! - **Library loading**: platform filename resolution under a configured root
//! - **Registry**: one load per library, shared bridges, explicit shutdown
//! - **Database bridge**: multiplexed `execute` with a 30 second deadline
//! - **Compute bridge**: serialised calls over a single global callback
//! - **Result decoding**: fixed-layout result blocks released exactly once
//!
//! # Example
//!
//! ```no_run
//! use native_bridge::BridgeRegistry;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = BridgeRegistry::new("./libs");
//! let db = registry.database("crypto-db")?;
//!
//! let conn = db.open("./app.db", "secret")?;
//! let result = db.execute(&conn, "SELECT id FROM users")?.await?;
//! println!("{:?}", result.rows());
//! db.close(conn);
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │ BridgeRegistry  │  one NativeLibrary per name
//! └────────┬────────┘
//!          │
//!     ┌────┴─────┐
//!     ▼          ▼
//! ┌────────┐  ┌─────────┐
//! │Database│  │ Compute │  pending table + callback arena
//! └───┬────┘  └────┬────┘
//!     │            │
//!     ▼            ▼
//! ┌─────────────────┐
//! │  native code    │  completes on its own threads
//! └─────────────────┘
//! ```

pub mod bridge;
pub mod config;
pub mod error;
pub mod ffi;

pub use bridge::{
    ComputeBridge, ComputeOp, DatabaseBridge, Execution, SqlOutcome, SqlResult, EXECUTE_TIMEOUT,
};
pub use config::{BridgeConfig, ConfigError};
pub use error::{BridgeError, BridgeResult, LoadError};
pub use ffi::{BridgeRegistry, CallId, ConnectionHandle, NativeLibrary};

/// Process-wide registry access.
pub mod registry {
    pub use crate::ffi::{global, install_global, BridgeRegistry};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
