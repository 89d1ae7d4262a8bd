//! In-process native doubles
//!
//! `extern "C"` functions with the same ABI as the encrypted database and
//! compute libraries, so the bridges can be driven without building the
//! native crates. The database double runs statements on `rusqlite` and
//! completes them on its own threads, like the real library.

#![allow(dead_code)]

use std::collections::HashMap;
use std::ffi::{c_char, c_void, CStr, CString};
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use native_bridge::ffi::{CompletionCallback, ComputeSymbols, DatabaseSymbols, RawSqlResult};
use native_bridge::{ComputeBridge, DatabaseBridge};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use serde_json::{json, Map, Value};

/// Header written to credentialed database files.
pub const CIPHER_HEADER: &[u8] = b"MOCKCIPHER\0\0\0\0\0\0";

const SQLITE_HEADER: &[u8] = b"SQLite format 3\0";

/// Statements with this prefix complete only on [`release_held`].
pub const HOLD: &str = "/* hold */ ";

/// Statements with this prefix complete before `execute_sql_async` returns.
pub const SYNC: &str = "/* sync */ ";

// =============================================================================
// Database double
// =============================================================================

#[derive(Default)]
struct DbState {
    connections: HashMap<i64, Connection>,
    /// call id -> (handle, statement, callback)
    held: HashMap<i64, (i64, String, CompletionCallback)>,
    /// live block address -> handle
    live: HashMap<usize, i64>,
    /// handle -> blocks released
    freed: HashMap<i64, usize>,
    /// releases of unknown or already released blocks
    bad_frees: usize,
}

static DB: Lazy<Mutex<DbState>> = Lazy::new(|| Mutex::new(DbState::default()));
static NEXT_HANDLE: AtomicI64 = AtomicI64::new(1);
static NEXT_CALL: AtomicI64 = AtomicI64::new(1);

pub fn database_bridge() -> DatabaseBridge {
    DatabaseBridge::new(DatabaseSymbols::in_process(
        open_encrypted_database,
        execute_sql_async,
        close_database_connection,
        free_sql_result,
        verify_database_encryption,
    ))
}

unsafe fn c_str(ptr: *const c_char) -> String {
    if ptr.is_null() {
        return String::new();
    }
    CStr::from_ptr(ptr).to_string_lossy().into_owned()
}

unsafe extern "C" fn open_encrypted_database(path: *const c_char, credential: *const c_char) -> i64 {
    let path = c_str(path);
    let credential = c_str(credential);

    let parent_ok = Path::new(&path)
        .parent()
        .map_or(true, |p| p.as_os_str().is_empty() || p.is_dir());
    if path.is_empty() || !parent_ok {
        return -1;
    }

    let connection = if credential.is_empty() {
        Connection::open(&path)
    } else {
        if std::fs::write(&path, CIPHER_HEADER).is_err() {
            return -1;
        }
        Connection::open_in_memory()
    };

    match connection {
        Ok(connection) => {
            let handle = NEXT_HANDLE.fetch_add(1, Ordering::SeqCst);
            DB.lock().connections.insert(handle, connection);
            handle
        }
        Err(_) => -1,
    }
}

unsafe extern "C" fn execute_sql_async(handle: i64, sql: *const c_char, callback: CompletionCallback) -> i64 {
    let statement = c_str(sql);
    let call_id = NEXT_CALL.fetch_add(1, Ordering::SeqCst);

    if let Some(statement) = statement.strip_prefix(HOLD) {
        DB.lock()
            .held
            .insert(call_id, (handle, statement.to_string(), callback));
    } else if let Some(statement) = statement.strip_prefix(SYNC) {
        complete(handle, statement, callback);
    } else {
        let delay = Duration::from_millis((call_id as u64 * 7919) % 20);
        std::thread::spawn(move || {
            std::thread::sleep(delay);
            complete(handle, &statement, callback);
        });
    }

    call_id
}

unsafe extern "C" fn close_database_connection(handle: i64) -> bool {
    DB.lock().connections.remove(&handle).is_some()
}

unsafe extern "C" fn free_sql_result(result: *mut RawSqlResult) {
    if result.is_null() {
        return;
    }

    {
        let mut db = DB.lock();
        match db.live.remove(&(result as usize)) {
            Some(handle) => *db.freed.entry(handle).or_default() += 1,
            None => {
                db.bad_frees += 1;
                return;
            }
        }
    }

    let block = Box::from_raw(result);
    if !block.json_data.is_null() {
        drop(CString::from_raw(block.json_data));
    }
    if !block.error_message.is_null() {
        drop(CString::from_raw(block.error_message));
    }
}

unsafe extern "C" fn verify_database_encryption(path: *const c_char) -> bool {
    let Ok(bytes) = std::fs::read(c_str(path)) else {
        return false;
    };
    !bytes.is_empty() && !bytes.starts_with(SQLITE_HEADER)
}

/// Run `statement` and hand the result block to `callback`.
fn complete(handle: i64, statement: &str, callback: CompletionCallback) {
    let block = run_statement(handle, statement);
    callback(block as *const c_void);
}

fn run_statement(handle: i64, statement: &str) -> *mut RawSqlResult {
    let mut db = DB.lock();

    let outcome = match db.connections.get(&handle) {
        None => Err("Invalid connection ID".to_string()),
        Some(conn) => {
            let lowered = statement.trim_start().to_lowercase();
            if ["select", "with", "pragma"].iter().any(|k| lowered.starts_with(k)) {
                query(conn, statement)
            } else {
                mutate(conn, statement)
            }
        }
    };

    let block = match outcome {
        Ok((payload, rows_affected)) => RawSqlResult {
            json_data: into_c(payload.to_string()),
            error_message: std::ptr::null_mut(),
            success: true,
            rows_affected,
        },
        Err(message) => RawSqlResult {
            json_data: std::ptr::null_mut(),
            error_message: into_c(message),
            success: false,
            rows_affected: 0,
        },
    };

    let ptr = Box::into_raw(Box::new(block));
    db.live.insert(ptr as usize, handle);
    ptr
}

fn query(conn: &Connection, statement: &str) -> Result<(Value, i64), String> {
    let mut stmt = conn
        .prepare(statement)
        .map_err(|e| format!("Query prepare error: {e}"))?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

    let mut rows = Vec::new();
    let mut cursor = stmt.query([]).map_err(|e| format!("Query error: {e}"))?;
    while let Some(row) = cursor.next().map_err(|e| format!("Row error: {e}"))? {
        let mut object = Map::new();
        for (i, column) in columns.iter().enumerate() {
            let value = match row.get_ref(i).map_err(|e| format!("Row error: {e}"))? {
                ValueRef::Null => Value::Null,
                ValueRef::Integer(n) => json!(n),
                ValueRef::Real(f) => json!(f),
                ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
                ValueRef::Blob(b) => json!(b.len()),
            };
            object.insert(column.clone(), value);
        }
        rows.push(Value::Object(object));
    }

    let count = rows.len() as i64;
    Ok((json!({ "rows": rows, "count": count }), count))
}

fn mutate(conn: &Connection, statement: &str) -> Result<(Value, i64), String> {
    let changed = conn
        .execute(statement, [])
        .map_err(|e| format!("Execution error: {e}"))? as i64;
    let payload = json!({
        "rows_affected": changed,
        "last_insert_rowid": conn.last_insert_rowid(),
    });
    Ok((payload, changed))
}

fn into_c(s: String) -> *mut c_char {
    CString::new(s.replace('\0', " "))
        .map(CString::into_raw)
        .unwrap_or(std::ptr::null_mut())
}

/// Complete a held call now, on the calling thread.
pub fn release_held(call_id: i64) -> bool {
    let held = DB.lock().held.remove(&call_id);
    match held {
        Some((handle, statement, callback)) => {
            complete(handle, &statement, callback);
            true
        }
        None => false,
    }
}

/// Result blocks handed out on `handle` and not yet released
pub fn outstanding(handle: i64) -> usize {
    DB.lock().live.values().filter(|h| **h == handle).count()
}

/// Result blocks released on `handle`
pub fn freed(handle: i64) -> usize {
    DB.lock().freed.get(&handle).copied().unwrap_or(0)
}

/// Releases of blocks that were never handed out or already released
pub fn bad_frees() -> usize {
    DB.lock().bad_frees
}

// =============================================================================
// Compute double
// =============================================================================

static CALLBACK: Lazy<Mutex<Option<CompletionCallback>>> = Lazy::new(|| Mutex::new(None));

/// Serialises tests that share the compute double's global callback.
pub static COMPUTE_SERIAL: Lazy<tokio::sync::Mutex<()>> = Lazy::new(|| tokio::sync::Mutex::new(()));

pub fn compute_bridge() -> ComputeBridge {
    ComputeBridge::new(ComputeSymbols::in_process(fibonacci, sleep, set_callback))
}

fn notify(message: String) {
    let callback = *CALLBACK.lock();
    if let Some(callback) = callback {
        if let Ok(message) = CString::new(message) {
            callback(message.as_ptr() as *const c_void);
        }
    }
}

fn fib(n: u32) -> u32 {
    let (mut a, mut b) = (0u32, 1u32);
    for _ in 0..n {
        (a, b) = (b, a.wrapping_add(b));
    }
    a
}

/// Calls back only for `n > 0`.
unsafe extern "C" fn fibonacci(n: u32) -> u32 {
    if n == 0 {
        return 0;
    }
    let value = fib(n);
    notify(format!("Fibonacci({n}) = {value} "));
    value
}

/// Sleeps ten milliseconds per requested second.
unsafe extern "C" fn sleep(seconds: u64) {
    std::thread::sleep(Duration::from_millis(seconds * 10));
    notify(format!("Woke up after sleeping for {seconds} seconds"));
}

unsafe extern "C" fn set_callback(callback: CompletionCallback) {
    *CALLBACK.lock() = Some(callback);
}
