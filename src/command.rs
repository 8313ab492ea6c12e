//! Command channel parser
//!
//! Line-oriented ASCII commands read from the control descriptor: set the
//! feedback LSN, request quit, or no-op. Owns the fixed-capacity ring buffer
//! the event loop reads into.

use crate::errors::CommandError;
use crate::wire::Lsn;

pub const BUFFER_CAPACITY: usize = 4096;

/// One parsed command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Noop,
    SetFeedbackLsn(Lsn),
    Quit,
}

/// Fixed-capacity ring of unparsed command channel bytes.
///
/// Bytes are appended at the tail and parsed lines are consumed from the
/// head; unconsumed bytes are compacted to the front after each parse pass.
/// Never resizes: a read that would require more than [`BUFFER_CAPACITY`]
/// bytes without completing a line is a [`CommandError::LineTooLong`].
pub struct CommandBuffer {
    buf: [u8; BUFFER_CAPACITY],
    len: usize,
}

impl CommandBuffer {
    pub fn new() -> Self {
        CommandBuffer {
            buf: [0u8; BUFFER_CAPACITY],
            len: 0,
        }
    }

    /// Bytes of spare capacity available for the next read.
    pub fn spare_capacity(&self) -> usize {
        BUFFER_CAPACITY - self.len
    }

    /// The writable tail slice for the next read into the buffer.
    pub fn spare_slice(&mut self) -> &mut [u8] {
        &mut self.buf[self.len..]
    }

    /// Record that `n` freshly read bytes now occupy the tail of the buffer.
    pub fn commit(&mut self, n: usize) {
        self.len += n;
    }

    /// Parse every complete `\n`-terminated line currently buffered,
    /// compacting any trailing partial line to the front.
    ///
    /// Returns an error, without consuming anything, if the buffer fills
    /// completely without ever completing a line.
    pub fn drain_commands(&mut self) -> Result<Vec<Command>, CommandError> {
        let mut commands = Vec::new();
        let mut consumed = 0;

        while let Some(nl) = self.buf[consumed..self.len]
            .iter()
            .position(|&b| b == b'\n')
        {
            let line_end = consumed + nl;
            let line = std::str::from_utf8(&self.buf[consumed..line_end])
                .map_err(|_| CommandError::Malformed("non-UTF-8 command line".to_string()))?;
            commands.push(parse_line(line)?);
            consumed = line_end + 1;
        }

        if consumed > 0 {
            self.buf.copy_within(consumed..self.len, 0);
            self.len -= consumed;
        } else if self.len == BUFFER_CAPACITY {
            return Err(CommandError::LineTooLong(BUFFER_CAPACITY));
        }

        Ok(commands)
    }
}

impl Default for CommandBuffer {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_line(line: &str) -> Result<Command, CommandError> {
    if line.is_empty() || line.starts_with('#') {
        return Ok(Command::Noop);
    }

    if line == "q" {
        return Ok(Command::Quit);
    }

    if let Some(rest) = line.strip_prefix("F ") {
        return parse_feedback_lsn(rest).map(Command::SetFeedbackLsn);
    }

    Err(CommandError::Malformed(line.to_string()))
}

fn parse_feedback_lsn(text: &str) -> Result<Lsn, CommandError> {
    let (hi, lo) = text
        .split_once('/')
        .ok_or_else(|| CommandError::Malformed(text.to_string()))?;
    let hi = u32::from_str_radix(hi, 16).map_err(|_| CommandError::Malformed(text.to_string()))?;
    let lo = u32::from_str_radix(lo, 16).map_err(|_| CommandError::Malformed(text.to_string()))?;
    Ok(Lsn(((hi as u64) << 32) | lo as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(cb: &mut CommandBuffer, data: &[u8]) {
        let n = data.len().min(cb.spare_capacity());
        cb.spare_slice()[..n].copy_from_slice(&data[..n]);
        cb.commit(n);
    }

    #[test]
    fn empty_and_comment_lines_are_noop() {
        let mut cb = CommandBuffer::new();
        feed(&mut cb, b"\n# a comment\n");
        let cmds = cb.drain_commands().unwrap();
        assert_eq!(cmds, vec![Command::Noop, Command::Noop]);
    }

    #[test]
    fn quit_command_parses() {
        let mut cb = CommandBuffer::new();
        feed(&mut cb, b"q\n");
        assert_eq!(cb.drain_commands().unwrap(), vec![Command::Quit]);
    }

    #[test]
    fn feedback_lsn_parses_hex_pair() {
        let mut cb = CommandBuffer::new();
        feed(&mut cb, b"F 0/2000\n");
        assert_eq!(
            cb.drain_commands().unwrap(),
            vec![Command::SetFeedbackLsn(Lsn(0x2000))]
        );
    }

    #[test]
    fn unrecognized_line_is_malformed_error() {
        let mut cb = CommandBuffer::new();
        feed(&mut cb, b"bogus\n");
        assert!(matches!(
            cb.drain_commands(),
            Err(CommandError::Malformed(_))
        ));
    }

    #[test]
    fn partial_line_is_retained_across_reads() {
        let mut cb = CommandBuffer::new();
        feed(&mut cb, b"F 0/20");
        assert_eq!(cb.drain_commands().unwrap(), vec![]);
        feed(&mut cb, b"00\n");
        assert_eq!(
            cb.drain_commands().unwrap(),
            vec![Command::SetFeedbackLsn(Lsn(0x2000))]
        );
    }

    #[test]
    fn chunk_boundaries_do_not_affect_result() {
        // Same total command stream, split at different points, yields the same
        // sequence of commands regardless of chunk boundaries.
        let whole = b"F 0/1000\nF 0/2000\nq\n";

        let mut one_shot = CommandBuffer::new();
        feed(&mut one_shot, whole);
        let a = one_shot.drain_commands().unwrap();

        let mut chunked = CommandBuffer::new();
        feed(&mut chunked, &whole[..5]);
        let mut b = chunked.drain_commands().unwrap();
        feed(&mut chunked, &whole[5..14]);
        b.extend(chunked.drain_commands().unwrap());
        feed(&mut chunked, &whole[14..]);
        b.extend(chunked.drain_commands().unwrap());

        assert_eq!(a, b);
        assert_eq!(
            a,
            vec![
                Command::SetFeedbackLsn(Lsn(0x1000)),
                Command::SetFeedbackLsn(Lsn(0x2000)),
                Command::Quit,
            ]
        );
    }

    #[test]
    fn buffer_full_without_newline_is_line_too_long() {
        let mut cb = CommandBuffer::new();
        let filler = vec![b'x'; BUFFER_CAPACITY];
        feed(&mut cb, &filler);
        assert!(matches!(
            cb.drain_commands(),
            Err(CommandError::LineTooLong(BUFFER_CAPACITY))
        ));
    }
}
