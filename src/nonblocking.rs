//! Non-blocking descriptor setup
//!
//! The output descriptor must be blocking (so `write()` never returns
//! partial results the output writer would have to retry) and the command
//! descriptor must be non-blocking (so the event loop can poll it without
//! stalling). On some platforms the two share backing flags — e.g. both
//! descriptors point at the same pty or socket — so setting one affects the
//! other. This module detects that case and arranges a per-read re-arm
//! instead of relying on a persistent flag.

use std::io;
use std::os::unix::io::RawFd;

fn get_flags(fd: RawFd) -> io::Result<libc::c_int> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(flags)
}

fn set_flags(fd: RawFd, flags: libc::c_int) -> io::Result<()> {
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn set_nonblocking(fd: RawFd, nonblocking: bool) -> io::Result<()> {
    let flags = get_flags(fd)?;
    let new_flags = if nonblocking {
        flags | libc::O_NONBLOCK
    } else {
        flags & !libc::O_NONBLOCK
    };
    if new_flags != flags {
        set_flags(fd, new_flags)?;
    }
    Ok(())
}

fn is_nonblocking(fd: RawFd) -> io::Result<bool> {
    Ok(get_flags(fd)? & libc::O_NONBLOCK != 0)
}

/// Result of [`configure`]: whether the command descriptor needs its
/// non-blocking flag re-armed immediately before each read (and cleared
/// again immediately after) because it shares backing state with the
/// output descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorSetup {
    pub per_read_rearm: bool,
}

/// Configure the output and command descriptors per the module contract.
/// Call once at session start, before the event loop begins.
pub fn configure(out_fd: RawFd, cmd_fd: RawFd) -> io::Result<DescriptorSetup> {
    set_nonblocking(out_fd, false)?;
    set_nonblocking(cmd_fd, true)?;

    if is_nonblocking(out_fd)? {
        set_nonblocking(out_fd, false)?;
        Ok(DescriptorSetup {
            per_read_rearm: true,
        })
    } else {
        Ok(DescriptorSetup {
            per_read_rearm: false,
        })
    }
}

/// Arm non-blocking mode on the command descriptor immediately before a
/// read, when [`DescriptorSetup::per_read_rearm`] is set.
pub fn rearm_before_read(cmd_fd: RawFd) -> io::Result<()> {
    set_nonblocking(cmd_fd, true)
}

/// Restore blocking mode on the shared descriptor immediately after a read,
/// when [`DescriptorSetup::per_read_rearm`] is set.
pub fn restore_after_read(cmd_fd: RawFd) -> io::Result<()> {
    set_nonblocking(cmd_fd, false)
}
