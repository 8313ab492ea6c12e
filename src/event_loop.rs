//! Replication event loop
//!
//! The heart of the client: coordinates draining the server copy stream,
//! draining the command channel, sending feedback when due, flushing
//! output before blocking, and multiplexing readiness with `select` under a
//! bounded timeout. Single-threaded, cooperative, no worker threads.

use std::io::{self, Write};
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::command::{Command, CommandBuffer};
use crate::errors::ReplicationError;
use crate::feedback::{self, FeedbackConfig, FeedbackState};
use crate::nonblocking::DescriptorSetup;
use crate::output::OutputWriter;
use crate::pgconn::{CopyDataOutcome, PgConnection};
use crate::wire::{self, Lsn, ServerMessage};

pub struct LoopConfig {
    pub auto_feedback: bool,
    pub feedback: FeedbackConfig,
}

/// Exit status returned by a completed event-loop run, carrying the same
/// distinctions as the process exit code table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    Success,
    ServerClosed,
    CommandClosed,
}

impl LoopExit {
    pub fn exit_code(self) -> i32 {
        match self {
            LoopExit::Success => 0,
            LoopExit::ServerClosed => 3,
            LoopExit::CommandClosed => 4,
        }
    }
}

pub fn run<W: Write>(
    conn: &PgConnection,
    cmd_fd: RawFd,
    descriptor_setup: DescriptorSetup,
    mut out: OutputWriter<W>,
    cfg: LoopConfig,
    abort: Arc<AtomicBool>,
) -> Result<LoopExit, ReplicationError> {
    let server_fd = conn.socket()?;

    let mut received_lsn = Lsn::INVALID;
    let mut next_feedback_lsn = Lsn::INVALID;
    let mut last_sent_feedback_lsn = Lsn::INVALID;
    let mut last_feedback_sent_at: i64 = 0;
    let mut feedback_requested = false;
    let mut quit_requested = false;

    let mut pq_ready = true;
    let mut cmd_ready = false;
    let mut cmd_buf = CommandBuffer::new();

    loop {
        let now = wire::server_timestamp_now();

        let state = FeedbackState {
            feedback_requested,
            next_feedback_lsn,
            last_sent_feedback_lsn,
            last_feedback_sent_at,
        };

        if feedback::feedback_needed(now, &state, &cfg.feedback) {
            let write_lsn = std::cmp::max(received_lsn, next_feedback_lsn);
            let buf =
                wire::encode_standby_status(write_lsn, next_feedback_lsn, Lsn::INVALID, now, false);
            conn.put_copy_data(&buf)?;
            last_feedback_sent_at = now;
            last_sent_feedback_lsn = next_feedback_lsn;
            feedback_requested = false;
        }

        if abort.load(Ordering::SeqCst) {
            info!("abort signal received, exiting");
            out.flush()?;
            return Ok(LoopExit::Success);
        }
        if quit_requested {
            info!("quit command processed, exiting");
            out.flush()?;
            return Ok(LoopExit::Success);
        }

        if pq_ready {
            loop {
                match conn.get_copy_data()? {
                    CopyDataOutcome::Data(data) => {
                        match wire::decode_message(&data).map_err(ReplicationError::from)? {
                            ServerMessage::Keepalive {
                                wal_end,
                                reply_requested,
                                ..
                            } => {
                                if cfg.auto_feedback && wal_end > next_feedback_lsn {
                                    next_feedback_lsn = wal_end;
                                }
                                // A keepalive can only be acknowledged via a feedback
                                // message, so an otherwise-unset LSN is seeded from the
                                // keepalive's own walEnd even without auto-feedback —
                                // the alternative is a keepalive reply request that can
                                // never be honored.
                                if !next_feedback_lsn.is_valid() {
                                    next_feedback_lsn = wal_end;
                                }
                                if reply_requested {
                                    feedback_requested = true;
                                }
                            }
                            ServerMessage::XLogData {
                                data_start,
                                wal_end,
                                payload,
                                ..
                            } => {
                                if data_start > received_lsn {
                                    received_lsn = data_start;
                                }
                                if cfg.auto_feedback && wal_end > next_feedback_lsn {
                                    next_feedback_lsn = wal_end;
                                }
                                out.emit(data_start, &payload)?;
                            }
                        }
                    }
                    CopyDataOutcome::WouldBlock => {
                        pq_ready = false;
                        break;
                    }
                    CopyDataOutcome::StreamClosed => {
                        warn!("replication stream closed by server");
                        out.flush()?;
                        return Ok(LoopExit::ServerClosed);
                    }
                }
            }
        }

        if cmd_ready {
            let spare = cmd_buf.spare_capacity();
            if spare == 0 {
                // Buffer is full; draining may free space (if a command line completes
                // at the very end) or raise `LineTooLong` (if it never does).
                for command in cmd_buf.drain_commands().map_err(ReplicationError::from)? {
                    apply_command(
                        command,
                        &mut next_feedback_lsn,
                        &mut quit_requested,
                        &mut feedback_requested,
                    );
                }
            }
            let spare = cmd_buf.spare_capacity();

            if descriptor_setup.per_read_rearm {
                crate::nonblocking::rearm_before_read(cmd_fd)?;
            }
            let mut scratch = vec![0u8; spare];
            let read_result = read_fd(cmd_fd, &mut scratch);
            if descriptor_setup.per_read_rearm {
                crate::nonblocking::restore_after_read(cmd_fd)?;
            }

            match read_result {
                Ok(0) => {
                    info!("command channel closed");
                    out.flush()?;
                    return Ok(LoopExit::CommandClosed);
                }
                Ok(n) => {
                    cmd_buf.spare_slice()[..n].copy_from_slice(&scratch[..n]);
                    cmd_buf.commit(n);
                    for command in cmd_buf.drain_commands().map_err(ReplicationError::from)? {
                        apply_command(
                            command,
                            &mut next_feedback_lsn,
                            &mut quit_requested,
                            &mut feedback_requested,
                        );
                    }
                }
                Err(e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::Interrupted =>
                {
                    cmd_ready = false;
                }
                Err(e) => {
                    error!(error = %e, "command channel read error");
                    return Err(ReplicationError::CommandError(e.to_string()));
                }
            }
        }

        if !pq_ready && !cmd_ready && !feedback_requested {
            out.flush()?;

            let now = wire::server_timestamp_now();
            let state = FeedbackState {
                feedback_requested,
                next_feedback_lsn,
                last_sent_feedback_lsn,
                last_feedback_sent_at,
            };
            let timeout_ms = feedback::wait_timeout_ms(now, &state, &cfg.feedback);

            match wait_for_readiness(server_fd, cmd_fd, timeout_ms) {
                Ok(Readiness {
                    server_readable,
                    cmd_readable,
                }) => {
                    if server_readable {
                        conn.consume_input()?;
                        pq_ready = true;
                    }
                    if cmd_readable {
                        cmd_ready = true;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(ReplicationError::from(e)),
            }
        }
    }
}

fn apply_command(
    command: Command,
    next_feedback_lsn: &mut Lsn,
    quit_requested: &mut bool,
    feedback_requested: &mut bool,
) {
    match command {
        Command::Noop => {}
        Command::SetFeedbackLsn(lsn) => {
            if lsn > *next_feedback_lsn {
                *next_feedback_lsn = lsn;
            }
        }
        Command::Quit => {
            *quit_requested = true;
            *feedback_requested = true;
        }
    }
}

fn read_fd(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(n as usize)
}

struct Readiness {
    server_readable: bool,
    cmd_readable: bool,
}

fn wait_for_readiness(server_fd: RawFd, cmd_fd: RawFd, timeout_ms: u64) -> io::Result<Readiness> {
    unsafe {
        let mut read_fds: libc::fd_set = std::mem::zeroed();
        libc::FD_ZERO(&mut read_fds);
        libc::FD_SET(server_fd, &mut read_fds);
        libc::FD_SET(cmd_fd, &mut read_fds);

        let mut timeout = libc::timeval {
            tv_sec: (timeout_ms / 1000) as libc::time_t,
            tv_usec: ((timeout_ms % 1000) * 1000) as libc::suseconds_t,
        };

        let nfds = server_fd.max(cmd_fd) + 1;
        let rc = libc::select(
            nfds,
            &mut read_fds,
            std::ptr::null_mut(),
            std::ptr::null_mut(),
            &mut timeout,
        );

        if rc < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(Readiness {
            server_readable: libc::FD_ISSET(server_fd, &read_fds),
            cmd_readable: libc::FD_ISSET(cmd_fd, &read_fds),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quit_command_requests_feedback_before_exit() {
        let mut next_feedback_lsn = Lsn(0xABCD);
        let mut quit_requested = false;
        let mut feedback_requested = false;

        apply_command(
            Command::Quit,
            &mut next_feedback_lsn,
            &mut quit_requested,
            &mut feedback_requested,
        );

        assert!(quit_requested);
        assert!(feedback_requested);
        assert_eq!(next_feedback_lsn, Lsn(0xABCD));
    }

    #[test]
    fn set_feedback_lsn_only_advances_forward() {
        let mut next_feedback_lsn = Lsn(0x2000);
        let mut quit_requested = false;
        let mut feedback_requested = false;

        apply_command(
            Command::SetFeedbackLsn(Lsn(0x1000)),
            &mut next_feedback_lsn,
            &mut quit_requested,
            &mut feedback_requested,
        );
        assert_eq!(next_feedback_lsn, Lsn(0x2000));

        apply_command(
            Command::SetFeedbackLsn(Lsn(0x3000)),
            &mut next_feedback_lsn,
            &mut quit_requested,
            &mut feedback_requested,
        );
        assert_eq!(next_feedback_lsn, Lsn(0x3000));
        assert!(!quit_requested);
        assert!(!feedback_requested);
    }

    #[test]
    fn noop_command_changes_nothing() {
        let mut next_feedback_lsn = Lsn(0x10);
        let mut quit_requested = false;
        let mut feedback_requested = false;

        apply_command(
            Command::Noop,
            &mut next_feedback_lsn,
            &mut quit_requested,
            &mut feedback_requested,
        );

        assert_eq!(next_feedback_lsn, Lsn(0x10));
        assert!(!quit_requested);
        assert!(!feedback_requested);
    }
}
