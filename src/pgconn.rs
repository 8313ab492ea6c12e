//! Safe wrapper around the `libpq-sys` connection handle
//!
//! Narrow surface: connect, run a query expecting either a row set or
//! command-complete, drive the copy-both protocol, and escape identifiers
//! and literals for building replication commands. No decoding of
//! replication payload contents happens here.

use libpq_sys::*;
use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int};
use std::os::unix::io::RawFd;

use crate::errors::ReplicationError;

pub struct PgConnection {
    raw: *mut PGconn,
}

unsafe impl Send for PgConnection {}

impl PgConnection {
    pub fn connect(conninfo: &str) -> Result<Self, ReplicationError> {
        let c_conninfo =
            CString::new(conninfo).map_err(|e| ReplicationError::InitFailure(e.to_string()))?;
        let raw = unsafe { PQconnectdb(c_conninfo.as_ptr()) };
        if raw.is_null() {
            return Err(ReplicationError::InitFailure(
                "PQconnectdb returned a null connection".to_string(),
            ));
        }
        let conn = PgConnection { raw };
        if unsafe { PQstatus(raw) } != ConnStatusType::CONNECTION_OK {
            return Err(ReplicationError::InitFailure(conn.error_message()));
        }
        Ok(conn)
    }

    pub fn error_message(&self) -> String {
        unsafe {
            let ptr = PQerrorMessage(self.raw);
            if ptr.is_null() {
                String::new()
            } else {
                CStr::from_ptr(ptr).to_string_lossy().trim_end().to_string()
            }
        }
    }

    pub fn socket(&self) -> Result<RawFd, ReplicationError> {
        let fd = unsafe { PQsocket(self.raw) };
        if fd < 0 {
            return Err(ReplicationError::InitFailure(
                "connection has no socket".to_string(),
            ));
        }
        Ok(fd as RawFd)
    }

    /// Run a query expected to return a row set or command-complete status;
    /// callers distinguish outcomes on the returned [`PgResult`].
    pub fn exec(&self, query: &str) -> Result<PgResult, ReplicationError> {
        let c_query =
            CString::new(query).map_err(|e| ReplicationError::InitFailure(e.to_string()))?;
        let raw = unsafe { PQexec(self.raw, c_query.as_ptr()) };
        if raw.is_null() {
            return Err(ReplicationError::InitFailure(self.error_message()));
        }
        Ok(PgResult { raw })
    }

    /// Escape an identifier (slot name, plugin name, option key) per
    /// `PQescapeIdentifier`, wrapping it in the quoting the server expects.
    pub fn escape_identifier(&self, value: &str) -> Result<String, ReplicationError> {
        let c_value =
            CString::new(value).map_err(|e| ReplicationError::InitFailure(e.to_string()))?;
        let escaped = unsafe {
            PQescapeIdentifier(self.raw, c_value.as_ptr(), value.len())
        };
        if escaped.is_null() {
            return Err(ReplicationError::InitFailure(self.error_message()));
        }
        let result = unsafe { CStr::from_ptr(escaped).to_string_lossy().into_owned() };
        unsafe { PQfreemem(escaped as *mut _) };
        Ok(result)
    }

    /// Escape a literal (plugin option value) per `PQescapeLiteral`.
    pub fn escape_literal(&self, value: &str) -> Result<String, ReplicationError> {
        let c_value =
            CString::new(value).map_err(|e| ReplicationError::InitFailure(e.to_string()))?;
        let escaped = unsafe { PQescapeLiteral(self.raw, c_value.as_ptr(), value.len()) };
        if escaped.is_null() {
            return Err(ReplicationError::InitFailure(self.error_message()));
        }
        let result = unsafe { CStr::from_ptr(escaped).to_string_lossy().into_owned() };
        unsafe { PQfreemem(escaped as *mut _) };
        Ok(result)
    }

    /// Non-blocking read of one `CopyData` message. `Ok(None)` means no data
    /// is currently available (would block); `Ok(Some(&[]))` never occurs.
    /// A return of `Ok(Some(vec))` with `vec` empty distinguishes nothing
    /// from this call directly — callers use `Err(StreamClosed)` for EOF.
    pub fn get_copy_data(&self) -> Result<CopyDataOutcome, ReplicationError> {
        let mut buffer: *mut c_char = std::ptr::null_mut();
        let n = unsafe { PQgetCopyData(self.raw, &mut buffer, 1) };

        match n {
            0 => Ok(CopyDataOutcome::WouldBlock),
            -1 => {
                // COPY is done; PQgetResult drains the final command-complete status.
                let final_result = unsafe { PQgetResult(self.raw) };
                if !final_result.is_null() {
                    unsafe { PQclear(final_result) };
                }
                Ok(CopyDataOutcome::StreamClosed)
            }
            -2 => Err(ReplicationError::ServerError(self.error_message())),
            n if n > 0 => {
                let slice =
                    unsafe { std::slice::from_raw_parts(buffer as *const u8, n as usize) };
                let data = slice.to_vec();
                unsafe { PQfreemem(buffer as *mut _) };
                Ok(CopyDataOutcome::Data(data))
            }
            other => Err(ReplicationError::ServerError(format!(
                "unexpected PQgetCopyData return value {other}"
            ))),
        }
    }

    pub fn put_copy_data(&self, data: &[u8]) -> Result<(), ReplicationError> {
        let rc = unsafe {
            PQputCopyData(self.raw, data.as_ptr() as *const c_char, data.len() as c_int)
        };
        if rc < 0 {
            return Err(ReplicationError::ServerError(self.error_message()));
        }
        self.flush()
    }

    pub fn flush(&self) -> Result<(), ReplicationError> {
        if unsafe { PQflush(self.raw) } < 0 {
            return Err(ReplicationError::ServerError(self.error_message()));
        }
        Ok(())
    }

    pub fn consume_input(&self) -> Result<(), ReplicationError> {
        if unsafe { PQconsumeInput(self.raw) } == 0 {
            return Err(ReplicationError::ServerError(self.error_message()));
        }
        Ok(())
    }
}

impl Drop for PgConnection {
    fn drop(&mut self) {
        unsafe { PQfinish(self.raw) };
    }
}

pub enum CopyDataOutcome {
    Data(Vec<u8>),
    WouldBlock,
    StreamClosed,
}

pub struct PgResult {
    raw: *mut PGresult,
}

impl PgResult {
    pub fn status(&self) -> ExecStatusType {
        unsafe { PQresultStatus(self.raw) }
    }

    pub fn is_copy_both(&self) -> bool {
        self.status() == ExecStatusType::PGRES_COPY_BOTH
    }

    pub fn is_tuples_ok(&self) -> bool {
        self.status() == ExecStatusType::PGRES_TUPLES_OK
    }

    pub fn is_command_ok(&self) -> bool {
        self.status() == ExecStatusType::PGRES_COMMAND_OK
    }

    pub fn ntuples(&self) -> i32 {
        unsafe { PQntuples(self.raw) }
    }

    pub fn getvalue(&self, row: i32, col: i32) -> String {
        unsafe {
            let ptr = PQgetvalue(self.raw, row, col);
            if ptr.is_null() {
                String::new()
            } else {
                CStr::from_ptr(ptr).to_string_lossy().into_owned()
            }
        }
    }

    pub fn error_message(&self) -> String {
        unsafe {
            let ptr = PQresultErrorMessage(self.raw);
            if ptr.is_null() {
                String::new()
            } else {
                CStr::from_ptr(ptr).to_string_lossy().trim_end().to_string()
            }
        }
    }
}

impl Drop for PgResult {
    fn drop(&mut self) {
        unsafe { PQclear(self.raw) };
    }
}
