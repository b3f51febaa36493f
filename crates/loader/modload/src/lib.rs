//! Loading and unloading of ELF32 modules on flat-memory microcontrollers.
//!
//! A [`ModuleLoader`] takes a relocatable object from any
//! [`ByteSource`](kiln_elf::ByteSource), places its segments in a
//! [`CompactHeap`](kiln_heap::CompactHeap) (and optionally program flash),
//! links it against itself and the firmware's
//! [`SymbolTable`](kiln_symtab::SymbolTable), and starts it, either by
//! calling its `_init` or by handing its task descriptor to the scheduler.
//! Firmware services are reached through the traits in [`platform`].
//!
//! The loader keeps a fixed number of module slots. Each slot moves
//! through the states of [`ModuleState`]; a failed load always leaves the
//! slot empty with its memory returned.

#![cfg_attr(not(test), no_std)]
#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod module;
pub mod platform;

pub use config::{DEFAULT_FLASH_PAGE, DEFAULT_TASK_SYMBOLS, ExecMode, FLASH_CHUNK, LoaderConfig};
pub use error::LoadError;
pub use module::{EntryPoint, LoadedModule, ModuleLoader, ModuleState, UnloadStatus};
pub use platform::{Executor, Flash, Platform, PlatformError, Scheduler, TaskId};
