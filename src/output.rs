//! Buffered output writer
//!
//! Emits decoded payloads to the output descriptor with an optional
//! per-record ASCII header and optional trailing newline. The event loop
//! must call [`OutputWriter::flush`] before every blocking readiness wait.

use crate::wire::Lsn;
use std::io::{self, BufWriter, Write};

const WRITER_BUF_CAPACITY: usize = 32 * 1024;

pub struct OutputWriter<W: Write> {
    inner: BufWriter<W>,
    write_header: bool,
    write_nl: bool,
}

impl<W: Write> OutputWriter<W> {
    pub fn new(sink: W, write_header: bool, write_nl: bool) -> Self {
        OutputWriter {
            inner: BufWriter::with_capacity(WRITER_BUF_CAPACITY, sink),
            write_header,
            write_nl,
        }
    }

    /// Write one record: optional `w <hi>/<lo> <len>\n` header, the payload,
    /// then an optional trailing `\n`. Atomic from the consumer's
    /// perspective since there is exactly one writer and one thread.
    pub fn emit(&mut self, lsn: Lsn, payload: &[u8]) -> io::Result<()> {
        if self.write_header {
            let len = payload.len() + if self.write_nl { 1 } else { 0 };
            write!(self.inner, "w {} {}\n", lsn, len)?;
        }
        self.inner.write_all(payload)?;
        if self.write_nl {
            self.inner.write_all(b"\n")?;
        }
        Ok(())
    }

    /// Flush barrier; must be called before any blocking wait.
    pub fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emits_header_and_trailing_newline() {
        let mut out = OutputWriter::new(Vec::new(), true, true);
        out.emit(Lsn(0x16B3760), b"abc").unwrap();
        out.flush().unwrap();
        assert_eq!(out.inner.get_ref(), b"w 0/16B3760 4\nabc\n");
    }

    #[test]
    fn header_length_excludes_newline_when_disabled() {
        let mut out = OutputWriter::new(Vec::new(), true, false);
        out.emit(Lsn(0x16B3760), b"abc").unwrap();
        out.flush().unwrap();
        assert_eq!(out.inner.get_ref(), b"w 0/16B3760 3\nabc");
    }

    #[test]
    fn no_header_no_newline_is_raw_payload() {
        let mut out = OutputWriter::new(Vec::new(), false, false);
        out.emit(Lsn(0x1), b"abc").unwrap();
        out.flush().unwrap();
        assert_eq!(out.inner.get_ref(), b"abc");
    }

    #[test]
    fn zero_length_payload_with_header_reports_zero_or_one() {
        let mut out = OutputWriter::new(Vec::new(), true, true);
        out.emit(Lsn(0x16B3760), b"").unwrap();
        out.flush().unwrap();
        assert_eq!(out.inner.get_ref(), b"w 0/16B3760 1\n\n");
    }
}
