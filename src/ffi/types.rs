//! FFI Type System
//!
//! Defines the ABI shared with the native libraries: entry-point
//! signatures, the result block layout, and the handle types that cross
//! the boundary.

use std::ffi::{c_char, c_void, CString};
use std::fmt;

use crate::error::BridgeError;

/// Completion function handed to the native side.
///
/// Both the database callback (`*const SQLResult`) and the compute callback
/// (`*const c_char`) take a single pointer, so one closure signature serves both.
pub type CompletionCallback = extern "C" fn(*const c_void);

/// `open_encrypted_database(path, credential) -> handle`
pub type OpenDatabaseFn = unsafe extern "C" fn(*const c_char, *const c_char) -> i64;
/// `execute_sql_async(handle, statement, callback) -> call id`
pub type ExecuteSqlFn = unsafe extern "C" fn(i64, *const c_char, CompletionCallback) -> i64;
/// `close_database_connection(handle) -> bool`
pub type CloseDatabaseFn = unsafe extern "C" fn(i64) -> bool;
/// `free_sql_result(result)`
pub type FreeResultFn = unsafe extern "C" fn(*mut RawSqlResult);
/// `verify_database_encryption(path) -> bool`
pub type VerifyEncryptionFn = unsafe extern "C" fn(*const c_char) -> bool;
/// `fibonacci(n) -> u32`
pub type FibonacciFn = unsafe extern "C" fn(u32) -> u32;
/// `sleep(seconds)`
pub type SleepFn = unsafe extern "C" fn(u64);
/// `set_callback(callback)`
pub type SetCallbackFn = unsafe extern "C" fn(CompletionCallback);

/// Sentinel returned by `open_encrypted_database` on failure.
pub const OPEN_FAILED: i64 = -1;

/// Byte offsets of the result block fields.
pub mod layout {
    /// Pointer to the JSON payload (may be null).
    pub const JSON: usize = 0;
    /// Pointer to the error string (may be null).
    pub const ERROR: usize = 8;
    /// One-byte success flag, nonzero = success.
    pub const SUCCESS: usize = 16;
    /// Signed 64-bit rows-affected counter.
    pub const ROWS_AFFECTED: usize = 24;
    /// Total block length.
    pub const LEN: usize = 32;
}

/// Result block as laid out by the native database library.
#[repr(C)]
#[derive(Debug)]
pub struct RawSqlResult {
    pub json_data: *mut c_char,
    pub error_message: *mut c_char,
    pub success: bool,
    pub rows_affected: i64,
}

const _: () = assert!(std::mem::size_of::<RawSqlResult>() == layout::LEN);

/// Opaque identifier of a live native database session.
///
/// Deliberately neither `Clone` nor `Copy`: closing consumes the handle, so
/// a closed session cannot be used again.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct ConnectionHandle(i64);

impl ConnectionHandle {
    pub(crate) fn new(raw: i64) -> Self {
        Self(raw)
    }

    /// The raw value passed to the native side
    pub fn raw(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Token correlating a dispatched call with its completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallId(pub i64);

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "call#{}", self.0)
    }
}

/// Encode a string as UTF-8 bytes followed by a single NUL terminator.
pub fn to_c_buffer(what: &'static str, value: &str) -> Result<CString, BridgeError> {
    CString::new(value).map_err(|_| BridgeError::InvalidArgument {
        what,
        reason: "contains an interior NUL byte",
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_block_offsets_match_struct() {
        let raw = RawSqlResult {
            json_data: std::ptr::null_mut(),
            error_message: std::ptr::null_mut(),
            success: true,
            rows_affected: 0,
        };
        let base = &raw as *const RawSqlResult as usize;
        assert_eq!(&raw.json_data as *const _ as usize - base, layout::JSON);
        assert_eq!(&raw.error_message as *const _ as usize - base, layout::ERROR);
        assert_eq!(&raw.success as *const _ as usize - base, layout::SUCCESS);
        assert_eq!(
            &raw.rows_affected as *const _ as usize - base,
            layout::ROWS_AFFECTED
        );
    }

    #[test]
    fn test_c_buffer_is_nul_terminated() {
        let buf = to_c_buffer("path", "./t.db").unwrap();
        assert_eq!(buf.as_bytes_with_nul(), b"./t.db\0");
    }

    #[test]
    fn test_c_buffer_rejects_interior_nul() {
        let err = to_c_buffer("statement", "SELECT 1\0; DROP").unwrap_err();
        assert!(matches!(err, BridgeError::InvalidArgument { what: "statement", .. }));
    }
}
