//! Result decoding
//!
//! Turns a native result block into a [`SqlResult`]. Field extraction works
//! on a byte span with explicit offsets, so it can be exercised with
//! synthetic blocks; [`ResultBlock`] owns the native memory and releases it
//! exactly once on every path out of the decoder.

use std::ffi::{c_char, CStr};
use std::ptr::NonNull;
use std::str::Utf8Error;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::ffi::{layout, FreeResultFn, RawSqlResult};

/// Message used when the native side hands back a null result pointer.
pub const INVALID_RESULT_POINTER: &str = "invalid result pointer";

/// Message used when the native side reports failure without an error string.
pub const UNKNOWN_NATIVE_ERROR: &str = "native call failed without an error message";

/// Decoded outcome of one SQL execution.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlOutcome {
    /// Query-style success.
    Rows { rows: Vec<Value>, count: u64 },
    /// Mutation-style success.
    Changes { last_insert_rowid: Option<i64> },
    /// Native-reported or decode-time failure.
    Failure { message: String },
}

/// Structured result of an execute call.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlResult {
    pub outcome: SqlOutcome,
    /// Rows-affected counter from the result block, present on every branch.
    pub rows_affected: i64,
}

impl SqlResult {
    pub fn failure(message: impl Into<String>, rows_affected: i64) -> Self {
        Self {
            outcome: SqlOutcome::Failure {
                message: message.into(),
            },
            rows_affected,
        }
    }

    pub fn is_success(&self) -> bool {
        !matches!(self.outcome, SqlOutcome::Failure { .. })
    }

    /// Rows of a query-style result
    pub fn rows(&self) -> Option<&[Value]> {
        match &self.outcome {
            SqlOutcome::Rows { rows, .. } => Some(rows),
            _ => None,
        }
    }

    /// Row count of a query-style result
    pub fn count(&self) -> Option<u64> {
        match &self.outcome {
            SqlOutcome::Rows { count, .. } => Some(*count),
            _ => None,
        }
    }

    pub fn last_insert_rowid(&self) -> Option<i64> {
        match &self.outcome {
            SqlOutcome::Changes { last_insert_rowid } => *last_insert_rowid,
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            SqlOutcome::Failure { message } => Some(message),
            _ => None,
        }
    }

    pub fn rows_affected(&self) -> i64 {
        self.rows_affected
    }
}

/// Decode-time failures. Always downgraded into [`SqlOutcome::Failure`].
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("result block truncated: {len} bytes, expected {}", layout::LEN)]
    Truncated { len: usize },

    #[error("Failed to parse JSON result: payload is not UTF-8: {0}")]
    InvalidUtf8(#[from] Utf8Error),

    #[error("Failed to parse JSON result: {0}")]
    Json(#[from] serde_json::Error),
}

/// Raw field values read from a result block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockFields {
    /// Address of the JSON payload, 0 when null
    pub json: usize,
    /// Address of the error string, 0 when null
    pub error: usize,
    pub success: bool,
    pub rows_affected: i64,
}

/// Read the four fields at their fixed offsets.
pub fn read_fields(span: &[u8]) -> Result<BlockFields, DecodeError> {
    if span.len() < layout::LEN {
        return Err(DecodeError::Truncated { len: span.len() });
    }

    let word = |offset: usize| {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&span[offset..offset + 8]);
        bytes
    };

    Ok(BlockFields {
        json: u64::from_le_bytes(word(layout::JSON)) as usize,
        error: u64::from_le_bytes(word(layout::ERROR)) as usize,
        success: span[layout::SUCCESS] != 0,
        rows_affected: i64::from_le_bytes(word(layout::ROWS_AFFECTED)),
    })
}

#[derive(Deserialize)]
struct Payload {
    #[serde(default)]
    rows: Option<Vec<Value>>,
    #[serde(default)]
    count: Option<u64>,
    #[serde(default)]
    last_insert_rowid: Option<i64>,
}

fn parse_payload(json: &[u8]) -> Result<SqlOutcome, DecodeError> {
    let text = std::str::from_utf8(json)?;
    let payload: Payload = serde_json::from_str(text)?;

    Ok(match payload.rows {
        Some(rows) => {
            let count = payload.count.unwrap_or(rows.len() as u64);
            SqlOutcome::Rows { rows, count }
        }
        None => SqlOutcome::Changes {
            last_insert_rowid: payload.last_insert_rowid,
        },
    })
}

/// Build a result from already-extracted fields and strings.
///
/// `json` is only consulted on success and `error` only on failure. A
/// failure whose message is absent or empty is reported with
/// [`UNKNOWN_NATIVE_ERROR`] on purpose, so a failure never carries a blank
/// message.
pub fn decode_fields(fields: &BlockFields, json: Option<&[u8]>, error: Option<&[u8]>) -> SqlResult {
    let outcome = if fields.success {
        match json {
            Some(json) => parse_payload(json).unwrap_or_else(|e| {
                tracing::warn!(target: "native_bridge::database", error = %e, "result payload rejected");
                SqlOutcome::Failure {
                    message: e.to_string(),
                }
            }),
            None => SqlOutcome::Changes {
                last_insert_rowid: None,
            },
        }
    } else {
        let message = match error {
            Some(bytes) if !bytes.is_empty() => String::from_utf8_lossy(bytes).into_owned(),
            _ => UNKNOWN_NATIVE_ERROR.to_string(),
        };
        SqlOutcome::Failure { message }
    };

    SqlResult {
        outcome,
        rows_affected: fields.rows_affected,
    }
}

/// Bytes of the NUL-terminated string at `addr`, if non-null.
///
/// # Safety
///
/// `addr` must be 0 or the address of a live NUL-terminated string.
unsafe fn c_bytes<'a>(addr: usize) -> Option<&'a [u8]> {
    if addr == 0 {
        None
    } else {
        Some(CStr::from_ptr(addr as *const c_char).to_bytes())
    }
}

/// Decode a result block given as a byte span.
///
/// # Safety
///
/// The pointer fields inside `span` must be null or point to live
/// NUL-terminated strings.
pub unsafe fn decode_span(span: &[u8]) -> SqlResult {
    let fields = match read_fields(span) {
        Ok(fields) => fields,
        Err(e) => return SqlResult::failure(e.to_string(), 0),
    };

    let json = if fields.success { c_bytes(fields.json) } else { None };
    let error = if fields.success { None } else { c_bytes(fields.error) };

    decode_fields(&fields, json, error)
}

/// Native result memory owned by the bridge until released.
pub struct ResultBlock {
    ptr: NonNull<RawSqlResult>,
    free: FreeResultFn,
}

impl ResultBlock {
    /// Take ownership of a block handed over by a completion callback.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or point to a live result block that `free`
    /// releases, and ownership must not be claimed twice.
    pub unsafe fn from_raw(ptr: *mut RawSqlResult, free: FreeResultFn) -> Option<Self> {
        NonNull::new(ptr).map(|ptr| Self { ptr, free })
    }

    /// Copy the defined bytes of the block, leaving struct padding zeroed.
    pub fn snapshot(&self) -> [u8; layout::LEN] {
        let mut span = [0u8; layout::LEN];
        let base = self.ptr.as_ptr() as *const u8;
        // Safety: the block is live for as long as `self` exists, and every
        // range copied lies within an initialised field.
        unsafe {
            for (offset, len) in [
                (layout::JSON, 8),
                (layout::ERROR, 8),
                (layout::SUCCESS, 1),
                (layout::ROWS_AFFECTED, 8),
            ] {
                std::ptr::copy_nonoverlapping(base.add(offset), span.as_mut_ptr().add(offset), len);
            }
        }
        span
    }

    /// Hand the block back to the native allocator.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for ResultBlock {
    fn drop(&mut self) {
        // Safety: ownership was transferred in `from_raw` and drop runs once.
        unsafe { (self.free)(self.ptr.as_ptr()) }
    }
}

/// Decode a block delivered by the native side and release it.
///
/// # Safety
///
/// Same contract as [`ResultBlock::from_raw`].
pub unsafe fn decode_result(ptr: *mut RawSqlResult, free: FreeResultFn) -> SqlResult {
    let Some(block) = ResultBlock::from_raw(ptr, free) else {
        return SqlResult::failure(INVALID_RESULT_POINTER, 0);
    };

    let span = block.snapshot();
    let result = decode_span(&span);
    block.release();
    result
}
