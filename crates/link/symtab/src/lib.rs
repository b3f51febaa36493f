//! Firmware-resident symbol table.
//!
//! The firmware exports the addresses modules may link against as two
//! name-sorted arrays baked in at build time: one for functions, one for data
//! objects. Lookups are binary searches over the raw name bytes and never
//! allocate.
//!
//! Function addresses are stored the way the target's linker emits them. On
//! Harvard targets that address code in words (AVR), [`SymbolTable::code_scale`]
//! converts them to byte addresses; [`SymbolTable::lookup_function`] is the
//! only place that scaling happens.
//!
//! ```
//! use kiln_symtab::{Symbol, SymbolTable, is_sorted};
//!
//! const FUNCTIONS: [Symbol; 2] = [Symbol::new("memcpy", 0x0200), Symbol::new("printf", 0x0340)];
//! const OBJECTS: [Symbol; 1] = [Symbol::new("errno", 0x0100)];
//! const _: () = assert!(is_sorted(&FUNCTIONS) && is_sorted(&OBJECTS));
//!
//! let table = SymbolTable::new(&FUNCTIONS, &OBJECTS).with_code_scale(2);
//! assert_eq!(table.lookup_function(b"printf"), Some(0x0680));
//! assert_eq!(table.lookup_object(b"errno"), Some(0x0100));
//! ```

#![cfg_attr(not(test), no_std)]
#![forbid(unsafe_code)]

use core::cmp::Ordering;

/// One exported firmware symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Symbol {
    /// Symbol name.
    pub name: &'static str,
    /// Address; in code units for functions, in bytes for objects.
    pub addr: u32,
}

impl Symbol {
    /// Creates a symbol entry.
    #[must_use]
    pub const fn new(name: &'static str, addr: u32) -> Self {
        Self { name, addr }
    }
}

/// The firmware's exported symbols.
#[derive(Debug, Clone, Copy)]
pub struct SymbolTable<'a> {
    functions: &'a [Symbol],
    objects: &'a [Symbol],
    code_scale: u32,
}

impl<'a> SymbolTable<'a> {
    /// Creates a table over two name-sorted arrays, with a code scale of 1.
    ///
    /// Unsorted input makes lookups miss; check with [`is_sorted`].
    #[must_use]
    pub const fn new(functions: &'a [Symbol], objects: &'a [Symbol]) -> Self {
        Self {
            functions,
            objects,
            code_scale: 1,
        }
    }

    /// An empty table.
    #[must_use]
    pub const fn empty() -> Self {
        Self::new(&[], &[])
    }

    /// Sets the factor that turns stored function addresses into byte
    /// addresses (2 on AVR).
    #[must_use]
    pub const fn with_code_scale(mut self, scale: u32) -> Self {
        self.code_scale = scale;
        self
    }

    /// Returns the code scale.
    #[must_use]
    pub const fn code_scale(&self) -> u32 {
        self.code_scale
    }

    /// Looks up a function, returning its byte address.
    #[must_use]
    pub fn lookup_function(&self, name: &[u8]) -> Option<u32> {
        search(self.functions, name).map(|addr| addr.wrapping_mul(self.code_scale))
    }

    /// Looks up a data object, falling back to the function table.
    #[must_use]
    pub fn lookup_object(&self, name: &[u8]) -> Option<u32> {
        search(self.objects, name).or_else(|| self.lookup_function(name))
    }

    /// Looks up any symbol: functions first, then objects.
    #[must_use]
    pub fn lookup(&self, name: &[u8]) -> Option<u32> {
        self.lookup_function(name).or_else(|| search(self.objects, name))
    }

    /// Total number of exported symbols.
    #[must_use]
    pub fn len(&self) -> usize {
        self.functions.len() + self.objects.len()
    }

    /// Returns `true` if nothing is exported.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn search(symbols: &[Symbol], name: &[u8]) -> Option<u32> {
    symbols
        .binary_search_by(|s| s.name.as_bytes().cmp(name))
        .ok()
        .map(|i| symbols[i].addr)
}

/// Returns `true` if `symbols` is strictly sorted by name bytes.
///
/// Usable in constant context, so the firmware can reject an unsorted table
/// at compile time:
///
/// ```
/// # use kiln_symtab::{Symbol, is_sorted};
/// const BAD: [Symbol; 2] = [Symbol::new("b", 0), Symbol::new("a", 0)];
/// const _: () = assert!(!is_sorted(&BAD));
/// ```
#[must_use]
pub const fn is_sorted(symbols: &[Symbol]) -> bool {
    let mut i = 1;
    while i < symbols.len() {
        if !matches!(
            cmp_bytes(symbols[i - 1].name.as_bytes(), symbols[i].name.as_bytes()),
            Ordering::Less
        ) {
            return false;
        }
        i += 1;
    }
    true
}

const fn cmp_bytes(a: &[u8], b: &[u8]) -> Ordering {
    let mut i = 0;
    while i < a.len() && i < b.len() {
        if a[i] < b[i] {
            return Ordering::Less;
        }
        if a[i] > b[i] {
            return Ordering::Greater;
        }
        i += 1;
    }
    if a.len() < b.len() {
        Ordering::Less
    } else if a.len() > b.len() {
        Ordering::Greater
    } else {
        Ordering::Equal
    }
}
