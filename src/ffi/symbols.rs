//! Typed entry-point tables.
//!
//! Each bridge calls through one of these tables. A table resolved from a
//! [`NativeLibrary`] keeps that library alive for as long as any copy of the
//! table exists, so completion handlers still holding a table can release
//! result memory after the registry has dropped the library.

use std::sync::Arc;

use super::loader::NativeLibrary;
use super::types::{
    CloseDatabaseFn, ExecuteSqlFn, FibonacciFn, FreeResultFn, OpenDatabaseFn, SetCallbackFn,
    SleepFn, VerifyEncryptionFn,
};
use crate::error::LoadError;

/// Entry points of the encrypted database library.
#[derive(Clone)]
pub struct DatabaseSymbols {
    pub open: OpenDatabaseFn,
    pub execute: ExecuteSqlFn,
    pub close: CloseDatabaseFn,
    pub free: FreeResultFn,
    pub verify: VerifyEncryptionFn,
    _library: Option<Arc<NativeLibrary>>,
}

impl DatabaseSymbols {
    /// Resolve every database entry point, failing on the first missing one.
    pub fn resolve(library: &Arc<NativeLibrary>) -> Result<Self, LoadError> {
        // Safety: the types below mirror the exported signatures of the
        // database library ABI.
        unsafe {
            Ok(Self {
                open: library.symbol::<OpenDatabaseFn>("open_encrypted_database")?,
                execute: library.symbol::<ExecuteSqlFn>("execute_sql_async")?,
                close: library.symbol::<CloseDatabaseFn>("close_database_connection")?,
                free: library.symbol::<FreeResultFn>("free_sql_result")?,
                verify: library.symbol::<VerifyEncryptionFn>("verify_database_encryption")?,
                _library: Some(Arc::clone(library)),
            })
        }
    }

    /// Build a table from functions linked into this process.
    pub fn in_process(
        open: OpenDatabaseFn,
        execute: ExecuteSqlFn,
        close: CloseDatabaseFn,
        free: FreeResultFn,
        verify: VerifyEncryptionFn,
    ) -> Self {
        Self {
            open,
            execute,
            close,
            free,
            verify,
            _library: None,
        }
    }
}

/// Entry points of the compute library.
#[derive(Clone)]
pub struct ComputeSymbols {
    pub fibonacci: FibonacciFn,
    pub sleep: SleepFn,
    pub set_callback: SetCallbackFn,
    _library: Option<Arc<NativeLibrary>>,
}

impl ComputeSymbols {
    /// Resolve every compute entry point.
    pub fn resolve(library: &Arc<NativeLibrary>) -> Result<Self, LoadError> {
        // Safety: the types below mirror the exported signatures of the
        // compute library ABI.
        unsafe {
            Ok(Self {
                fibonacci: library.symbol::<FibonacciFn>("fibonacci")?,
                sleep: library.symbol::<SleepFn>("sleep")?,
                set_callback: library.symbol::<SetCallbackFn>("set_callback")?,
                _library: Some(Arc::clone(library)),
            })
        }
    }

    /// Build a table from functions linked into this process.
    pub fn in_process(fibonacci: FibonacciFn, sleep: SleepFn, set_callback: SetCallbackFn) -> Self {
        Self {
            fibonacci,
            sleep,
            set_callback,
            _library: None,
        }
    }
}
