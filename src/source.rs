//! Positionable byte-source abstraction. Seekable, length-known stores
//! unlock size-to-end-of-stream boxes and window-mapped media regions;
//! streaming sources fall back to buffering media data in memory.

use std::io::{self, Read, Seek, SeekFrom};

pub trait ByteSource {
    /// Current absolute read position.
    fn position(&self) -> u64;

    /// Total source length, when known (seekable stores).
    fn len(&self) -> Option<u64>;

    /// Bytes from the current position to the end, when the length is known.
    fn remaining(&self) -> Option<u64> {
        self.len().map(|l| l.saturating_sub(self.position()))
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()>;

    /// Read up to `buf.len()` bytes; `Ok(0)` signals end of source. Used for
    /// clean-end detection at box boundaries.
    fn read_some(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    fn skip(&mut self, n: u64) -> io::Result<()>;
}

/// Source over a seekable reader with a known total length.
pub struct SeekSource<R: Read + Seek> {
    inner: R,
    len: u64,
    pos: u64,
}

impl<R: Read + Seek> SeekSource<R> {
    pub fn new(mut inner: R) -> io::Result<Self> {
        let len = inner.seek(SeekFrom::End(0))?;
        inner.seek(SeekFrom::Start(0))?;
        Ok(Self { inner, len, pos: 0 })
    }
}

impl<R: Read + Seek> ByteSource for SeekSource<R> {
    fn position(&self) -> u64 {
        self.pos
    }

    fn len(&self) -> Option<u64> {
        Some(self.len)
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        self.inner.read_exact(buf)?;
        self.pos += buf.len() as u64;
        Ok(())
    }

    fn read_some(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.pos += n as u64;
        Ok(n)
    }

    fn skip(&mut self, n: u64) -> io::Result<()> {
        self.pos = self.inner.seek(SeekFrom::Start(self.pos + n))?;
        Ok(())
    }
}

/// Forward-only source with unknown length. Skipping reads and discards.
pub struct StreamSource<R: Read> {
    inner: R,
    pos: u64,
}

impl<R: Read> StreamSource<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, pos: 0 }
    }
}

impl<R: Read> ByteSource for StreamSource<R> {
    fn position(&self) -> u64 {
        self.pos
    }

    fn len(&self) -> Option<u64> {
        None
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        self.inner.read_exact(buf)?;
        self.pos += buf.len() as u64;
        Ok(())
    }

    fn read_some(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.pos += n as u64;
        Ok(n)
    }

    fn skip(&mut self, n: u64) -> io::Result<()> {
        let mut left = n;
        let mut scratch = [0u8; 8192];
        while left > 0 {
            let want = left.min(scratch.len() as u64) as usize;
            let got = self.inner.read(&mut scratch[..want])?;
            if got == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "skip past end of stream",
                ));
            }
            left -= got as u64;
        }
        self.pos += n;
        Ok(())
    }
}
