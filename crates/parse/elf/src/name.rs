//! Fixed-size name scratch buffer.

use core::fmt;

use crate::header::ElfError;
use crate::io::ByteSource;

/// Capacity of a [`SymbolName`] in bytes.
pub const NAME_LEN: usize = 30;

/// A section or symbol name read from an object's string table.
///
/// Names are copied into a fixed buffer so that parsing and relocation never
/// allocate; longer names are truncated to [`NAME_LEN`] bytes. The same type
/// carries the offending name in link errors.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SymbolName {
    bytes: [u8; NAME_LEN],
    len: u8,
}

impl SymbolName {
    /// An empty name.
    pub const EMPTY: Self = Self {
        bytes: [0; NAME_LEN],
        len: 0,
    };

    /// Reads a NUL-terminated name at `offset` in `source`.
    ///
    /// A short read (name close to the end of the file) or a missing NUL
    /// terminator is not an error; the name simply ends where the data does.
    ///
    /// # Errors
    ///
    /// Returns [`ElfError::Io`] if the source fails.
    pub fn read<S: ByteSource + ?Sized>(source: &mut S, offset: u64) -> Result<Self, ElfError> {
        let mut bytes = [0u8; NAME_LEN];
        let n = source.pread(&mut bytes, offset)?;
        let len = bytes[..n].iter().position(|&b| b == 0).unwrap_or(n);
        bytes[len..].fill(0);
        Ok(Self::from_raw(bytes, len))
    }

    #[expect(clippy::cast_possible_truncation, reason = "len <= NAME_LEN < 256")]
    fn from_raw(bytes: [u8; NAME_LEN], len: usize) -> Self {
        Self {
            bytes,
            len: len as u8,
        }
    }

    /// Returns the name bytes without the terminator.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..usize::from(self.len)]
    }

    /// Returns the name as a string slice, or `None` if it is not UTF-8.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        core::str::from_utf8(self.as_bytes()).ok()
    }

    /// Returns the length of the name in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        usize::from(self.len)
    }

    /// Returns `true` if the name is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns `true` if the name begins with `prefix`.
    #[must_use]
    pub fn starts_with(&self, prefix: &[u8]) -> bool {
        self.as_bytes().starts_with(prefix)
    }
}

impl Default for SymbolName {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl From<&str> for SymbolName {
    /// Copies `name`, truncating it to [`NAME_LEN`] bytes.
    fn from(name: &str) -> Self {
        let mut bytes = [0u8; NAME_LEN];
        let len = name.len().min(NAME_LEN);
        bytes[..len].copy_from_slice(&name.as_bytes()[..len]);
        Self::from_raw(bytes, len)
    }
}

impl PartialEq<&str> for SymbolName {
    fn eq(&self, other: &&str) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl fmt::Display for SymbolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_bytes().escape_ascii())
    }
}

impl fmt::Debug for SymbolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SymbolName(\"{self}\")")
    }
}
