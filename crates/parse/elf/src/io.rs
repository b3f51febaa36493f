//! Random-access byte sources.
//!
//! The loader never holds a whole object file in memory. It reads the pieces
//! it needs through [`ByteSource::pread`], which may be backed by external
//! flash, EEPROM, a file system, or a network buffer.

use core::fmt;

use crate::header::ElfError;

/// Errors reported by a [`ByteSource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoError {
    /// The requested offset lies past the end of the source.
    OutOfRange,
    /// The underlying device failed with a driver-specific code.
    Device(i32),
}

impl fmt::Display for IoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfRange => write!(f, "read offset out of range"),
            Self::Device(code) => write!(f, "device read failed (code {code})"),
        }
    }
}

impl core::error::Error for IoError {}

/// A random-access, read-only byte source.
///
/// Reads may overlap or repeat; implementations must not assume any access
/// pattern.
pub trait ByteSource {
    /// Reads up to `buf.len()` bytes starting at `offset`.
    ///
    /// Returns the number of bytes read. A short count means the end of the
    /// source was reached (or the device delivers data in smaller chunks).
    ///
    /// # Errors
    ///
    /// Returns [`IoError`] if the offset is invalid or the device fails.
    fn pread(&mut self, buf: &mut [u8], offset: u64) -> Result<usize, IoError>;

    /// Returns the total length of the source, if it is known.
    ///
    /// The parser uses this to check that every section lies inside the file.
    fn total_len(&self) -> Option<u64> {
        None
    }

    /// Fills `buf` completely from `offset`, retrying short reads.
    ///
    /// # Errors
    ///
    /// Returns [`ElfError::Truncated`] if the source ends first, or
    /// [`ElfError::Io`] if the source fails.
    fn read_exact(&mut self, buf: &mut [u8], offset: u64) -> Result<(), ElfError> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self
                .pread(&mut buf[filled..], offset + filled as u64)
                .map_err(ElfError::Io)?;
            if n == 0 {
                return Err(ElfError::Truncated);
            }
            filled += n;
        }
        Ok(())
    }
}

impl ByteSource for &[u8] {
    fn pread(&mut self, buf: &mut [u8], offset: u64) -> Result<usize, IoError> {
        let start = usize::try_from(offset).map_err(|_| IoError::OutOfRange)?;
        if start > self.len() {
            return Err(IoError::OutOfRange);
        }
        let n = buf.len().min(self.len() - start);
        buf[..n].copy_from_slice(&self[start..start + n]);
        Ok(n)
    }

    fn total_len(&self) -> Option<u64> {
        Some(self.len() as u64)
    }
}

impl<S: ByteSource + ?Sized> ByteSource for &mut S {
    fn pread(&mut self, buf: &mut [u8], offset: u64) -> Result<usize, IoError> {
        (**self).pread(buf, offset)
    }

    fn total_len(&self) -> Option<u64> {
        (**self).total_len()
    }
}
