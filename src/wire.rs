//! Wire codec for the streaming-replication copy-both sub-protocol
//!
//! Encodes and decodes the three fixed-layout messages exchanged once a
//! connection has entered `COPY BOTH` mode: primary keepalive (`k`), XLogData
//! (`w`), and standby status update (`r`). All integers are big-endian.
//!
//! Reference: <https://www.postgresql.org/docs/current/protocol-replication.html>

use crate::errors::ProtocolError;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds from the Unix epoch (1970-01-01) to the PostgreSQL epoch (2000-01-01).
const PG_EPOCH_OFFSET_SECS: i64 = 946_684_800;

/// A 64-bit write-ahead log position.
///
/// Zero is the sentinel "unset" value. Ordering is the natural unsigned
/// ordering of the wrapped integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Lsn(pub u64);

impl Lsn {
    pub const INVALID: Lsn = Lsn(0);

    pub fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for Lsn {
    /// Renders as two uppercase-hex halves separated by `/`, e.g. `0/16B3760`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:X}/{:X}", self.0 >> 32, self.0 & 0xFFFF_FFFF)
    }
}

impl From<u64> for Lsn {
    fn from(v: u64) -> Self {
        Lsn(v)
    }
}

/// A decoded message read from the copy-both stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    /// Primary keepalive message.
    Keepalive {
        wal_end: Lsn,
        send_time: i64,
        reply_requested: bool,
    },
    /// XLogData: a chunk of the logical decoding output, treated as opaque.
    XLogData {
        data_start: Lsn,
        wal_end: Lsn,
        send_time: i64,
        payload: Vec<u8>,
    },
}

const KEEPALIVE_MIN_LEN: usize = 1 + 8 + 8 + 1;
const XLOGDATA_MIN_LEN: usize = 1 + 8 + 8 + 8;
const STANDBY_STATUS_LEN: usize = 1 + 8 + 8 + 8 + 8 + 1;

/// Decode one `CopyData` payload from the server into a [`ServerMessage`].
pub fn decode_message(data: &[u8]) -> Result<ServerMessage, ProtocolError> {
    if data.is_empty() {
        return Err(ProtocolError::TooShort { len: 0, min: 1 });
    }

    match data[0] {
        b'k' => {
            if data.len() < KEEPALIVE_MIN_LEN {
                return Err(ProtocolError::TooShort {
                    len: data.len(),
                    min: KEEPALIVE_MIN_LEN,
                });
            }
            let wal_end = Lsn(read_u64(&data[1..9]));
            let send_time = read_i64(&data[9..17]);
            let reply_requested = data[17] != 0;
            Ok(ServerMessage::Keepalive {
                wal_end,
                send_time,
                reply_requested,
            })
        }
        b'w' => {
            if data.len() < XLOGDATA_MIN_LEN {
                return Err(ProtocolError::TooShort {
                    len: data.len(),
                    min: XLOGDATA_MIN_LEN,
                });
            }
            let data_start = Lsn(read_u64(&data[1..9]));
            let wal_end = Lsn(read_u64(&data[9..17]));
            let send_time = read_i64(&data[17..25]);
            let payload = data[25..].to_vec();
            Ok(ServerMessage::XLogData {
                data_start,
                wal_end,
                send_time,
                payload,
            })
        }
        other => Err(ProtocolError::UnknownTag(other as char, data.len())),
    }
}

/// Encode a standby status update ("feedback") message: tag `r` followed by
/// write/flush/apply LSNs, the client send time, and a reply-requested flag.
/// Always exactly 34 bytes.
pub fn encode_standby_status(
    write_lsn: Lsn,
    flush_lsn: Lsn,
    apply_lsn: Lsn,
    send_time: i64,
    reply_requested: bool,
) -> [u8; STANDBY_STATUS_LEN] {
    let mut buf = [0u8; STANDBY_STATUS_LEN];
    buf[0] = b'r';
    buf[1..9].copy_from_slice(&write_lsn.0.to_be_bytes());
    buf[9..17].copy_from_slice(&flush_lsn.0.to_be_bytes());
    buf[17..25].copy_from_slice(&apply_lsn.0.to_be_bytes());
    buf[25..33].copy_from_slice(&send_time.to_be_bytes());
    buf[33] = reply_requested as u8;
    buf
}

/// Current wall time expressed as microseconds since midnight UTC on
/// 2000-01-01, the server's replication-protocol epoch.
pub fn server_timestamp_now() -> i64 {
    system_time_to_server_timestamp(SystemTime::now())
}

pub fn system_time_to_server_timestamp(time: SystemTime) -> i64 {
    let since_unix = time
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the Unix epoch");
    let unix_micros = since_unix.as_secs() as i64 * 1_000_000 + since_unix.subsec_micros() as i64;
    unix_micros - PG_EPOCH_OFFSET_SECS * 1_000_000
}

fn read_u64(bytes: &[u8]) -> u64 {
    u64::from_be_bytes(bytes.try_into().expect("slice is exactly 8 bytes"))
}

fn read_i64(bytes: &[u8]) -> i64 {
    i64::from_be_bytes(bytes.try_into().expect("slice is exactly 8 bytes"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lsn_renders_as_two_hex_halves() {
        assert_eq!(Lsn(0x0000_0000_016B_3760).to_string(), "0/16B3760");
        assert_eq!(Lsn(0x1_0000_0000).to_string(), "1/0");
        assert_eq!(Lsn::INVALID.to_string(), "0/0");
    }

    #[test]
    fn decode_keepalive_roundtrip() {
        let mut msg = vec![b'k'];
        msg.extend_from_slice(&0x1000u64.to_be_bytes());
        msg.extend_from_slice(&42i64.to_be_bytes());
        msg.push(1);

        let decoded = decode_message(&msg).unwrap();
        assert_eq!(
            decoded,
            ServerMessage::Keepalive {
                wal_end: Lsn(0x1000),
                send_time: 42,
                reply_requested: true,
            }
        );
    }

    #[test]
    fn decode_keepalive_too_short_is_protocol_error() {
        let msg = vec![b'k', 0, 0, 0];
        assert!(matches!(
            decode_message(&msg),
            Err(ProtocolError::TooShort { .. })
        ));
    }

    #[test]
    fn decode_xlogdata_roundtrip_zero_payload() {
        let mut msg = vec![b'w'];
        msg.extend_from_slice(&0x16B3760u64.to_be_bytes());
        msg.extend_from_slice(&0x16B3800u64.to_be_bytes());
        msg.extend_from_slice(&7i64.to_be_bytes());

        let decoded = decode_message(&msg).unwrap();
        assert_eq!(
            decoded,
            ServerMessage::XLogData {
                data_start: Lsn(0x16B3760),
                wal_end: Lsn(0x16B3800),
                send_time: 7,
                payload: Vec::new(),
            }
        );
    }

    #[test]
    fn decode_xlogdata_with_payload() {
        let mut msg = vec![b'w'];
        msg.extend_from_slice(&0x16B3760u64.to_be_bytes());
        msg.extend_from_slice(&0x16B3800u64.to_be_bytes());
        msg.extend_from_slice(&7i64.to_be_bytes());
        msg.extend_from_slice(b"abc");

        let decoded = decode_message(&msg).unwrap();
        assert_eq!(
            decoded,
            ServerMessage::XLogData {
                data_start: Lsn(0x16B3760),
                wal_end: Lsn(0x16B3800),
                send_time: 7,
                payload: b"abc".to_vec(),
            }
        );
    }

    #[test]
    fn decode_unknown_tag_is_protocol_error() {
        let msg = vec![b'z', 1, 2, 3];
        assert!(matches!(
            decode_message(&msg),
            Err(ProtocolError::UnknownTag('z', 4))
        ));
    }

    #[test]
    fn encode_standby_status_is_always_34_bytes() {
        let buf = encode_standby_status(Lsn(1), Lsn(2), Lsn(0), 99, false);
        assert_eq!(buf.len(), 34);
        assert_eq!(buf[0], b'r');
        assert_eq!(&buf[1..9], &1u64.to_be_bytes());
        assert_eq!(&buf[9..17], &2u64.to_be_bytes());
        assert_eq!(&buf[17..25], &0u64.to_be_bytes());
        assert_eq!(&buf[25..33], &99i64.to_be_bytes());
        assert_eq!(buf[33], 0);
    }

    #[test]
    fn server_timestamp_offset_matches_pg_epoch() {
        // 2000-01-01T00:00:00Z is exactly PG_EPOCH_OFFSET_SECS after the Unix epoch.
        let pg_epoch = UNIX_EPOCH + std::time::Duration::from_secs(PG_EPOCH_OFFSET_SECS as u64);
        assert_eq!(system_time_to_server_timestamp(pg_epoch), 0);
    }
}
