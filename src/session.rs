//! Replication session
//!
//! Issues the initial identification query, starts the copy-both
//! replication stream at a starting LSN, and — in poll mode — inspects slot
//! availability and optionally creates a slot. Emits only typed status
//! outcomes; no event-loop logic lives here.

use std::thread;
use std::time::Duration;

use tracing::debug;

use crate::errors::ReplicationError;
use crate::pgconn::PgConnection;
use crate::wire::Lsn;

#[derive(Debug, Clone)]
pub struct IdentifySystemInfo {
    pub system_id: String,
    pub timeline: i32,
    pub xlogpos: Lsn,
    pub dbname: Option<String>,
}

pub fn identify(conn: &PgConnection) -> Result<IdentifySystemInfo, ReplicationError> {
    let result = conn.exec("IDENTIFY_SYSTEM")?;
    if !result.is_tuples_ok() || result.ntuples() < 1 {
        return Err(ReplicationError::InitFailure(format!(
            "IDENTIFY_SYSTEM did not return a row: {}",
            result.error_message()
        )));
    }

    let system_id = result.getvalue(0, 0);
    let timeline: i32 = result
        .getvalue(0, 1)
        .parse()
        .map_err(|_| ReplicationError::InitFailure("malformed timeline in IDENTIFY_SYSTEM".into()))?;
    let xlogpos = parse_lsn(&result.getvalue(0, 2))?;
    let dbname = {
        let v = result.getvalue(0, 3);
        if v.is_empty() { None } else { Some(v) }
    };

    debug!(system_id, timeline, %xlogpos, ?dbname, "identified system");

    Ok(IdentifySystemInfo {
        system_id,
        timeline,
        xlogpos,
        dbname,
    })
}

/// Issue `START_REPLICATION SLOT "<slot>" LOGICAL <lsn> (<options>)` and
/// confirm the server enters copy-both mode. Identifiers and literals are
/// escaped through the connection, never hand-quoted.
pub fn start_replication(
    conn: &PgConnection,
    slot: &str,
    start_lsn: Lsn,
    plugin_params: &[(String, String)],
) -> Result<(), ReplicationError> {
    let escaped_slot = conn.escape_identifier(slot)?;

    let mut options = String::new();
    for (i, (key, value)) in plugin_params.iter().enumerate() {
        if i > 0 {
            options.push_str(", ");
        }
        let escaped_key = conn.escape_identifier(key)?;
        let escaped_value = conn.escape_literal(value)?;
        options.push_str(&escaped_key);
        options.push(' ');
        options.push_str(&escaped_value);
    }

    let query = if options.is_empty() {
        format!("START_REPLICATION SLOT {escaped_slot} LOGICAL {start_lsn}")
    } else {
        format!("START_REPLICATION SLOT {escaped_slot} LOGICAL {start_lsn} ({options})")
    };

    let result = conn.exec(&query)?;
    if result.is_copy_both() {
        return Ok(());
    }

    let msg = result.error_message();
    if msg.contains("does not exist") {
        return Err(ReplicationError::SlotNotExist);
    }
    if msg.contains("is active for PID") || msg.contains("already active") {
        return Err(ReplicationError::SlotInUse);
    }
    Err(ReplicationError::InitFailure(msg))
}

/// Issue `CREATE_REPLICATION_SLOT "<slot>" LOGICAL "<plugin>"`. A
/// duplicate-object server error is treated as a successful no-op.
pub fn create_slot(conn: &PgConnection, slot: &str, plugin: &str) -> Result<(), ReplicationError> {
    let escaped_slot = conn.escape_identifier(slot)?;
    let escaped_plugin = conn.escape_identifier(plugin)?;
    let query = format!("CREATE_REPLICATION_SLOT {escaped_slot} LOGICAL {escaped_plugin}");

    let result = conn.exec(&query)?;
    if result.is_tuples_ok() || result.is_command_ok() {
        return Ok(());
    }

    let msg = result.error_message();
    if msg.contains("already exists") {
        return Ok(());
    }
    Err(ReplicationError::InitFailure(msg))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Success,
    SlotNotExist,
    SlotInUse,
}

/// Poll `pg_replication_slots` until the slot exists and is inactive, or
/// `deadline` elapses. May create the slot once, on the first probe, if
/// `allow_create_once` and the slot did not exist yet.
pub fn poll_slot(
    conn: &PgConnection,
    slot: &str,
    plugin: &str,
    interval: Duration,
    deadline: Option<Duration>,
    allow_create_once: bool,
) -> Result<PollOutcome, ReplicationError> {
    let started = std::time::Instant::now();
    let mut created = false;

    loop {
        let escaped_slot = conn.escape_literal(slot)?;
        let query = format!(
            "SELECT active FROM pg_replication_slots WHERE slot_name = {escaped_slot}"
        );
        let result = conn.exec(&query)?;
        if !result.is_tuples_ok() {
            return Err(ReplicationError::InitFailure(result.error_message()));
        }

        if result.ntuples() == 0 {
            if allow_create_once && !created {
                create_slot(conn, slot, plugin)?;
                created = true;
            } else if let Some(deadline) = deadline {
                if started.elapsed() >= deadline {
                    return Ok(PollOutcome::SlotNotExist);
                }
            }
        } else {
            let active = result.getvalue(0, 0) == "t";
            if !active {
                return Ok(PollOutcome::Success);
            }
            if let Some(deadline) = deadline {
                if started.elapsed() >= deadline {
                    return Ok(PollOutcome::SlotInUse);
                }
            }
        }

        if let Some(deadline) = deadline {
            if started.elapsed() >= deadline {
                return Ok(PollOutcome::SlotNotExist);
            }
        }

        thread::sleep(interval);
    }
}

fn parse_lsn(text: &str) -> Result<Lsn, ReplicationError> {
    let (hi, lo) = text
        .split_once('/')
        .ok_or_else(|| ReplicationError::InitFailure(format!("malformed LSN: {text}")))?;
    let hi = u32::from_str_radix(hi, 16)
        .map_err(|_| ReplicationError::InitFailure(format!("malformed LSN: {text}")))?;
    let lo = u32::from_str_radix(lo, 16)
        .map_err(|_| ReplicationError::InitFailure(format!("malformed LSN: {text}")))?;
    Ok(Lsn(((hi as u64) << 32) | lo as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_lsn_accepts_hex_pair() {
        assert_eq!(parse_lsn("0/16B3760").unwrap(), Lsn(0x16B3760));
        assert_eq!(parse_lsn("1/0").unwrap(), Lsn(0x1_0000_0000));
    }

    #[test]
    fn parse_lsn_rejects_malformed_input() {
        assert!(parse_lsn("not-an-lsn").is_err());
        assert!(parse_lsn("zz/11").is_err());
    }
}
