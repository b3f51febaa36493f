//! Module slots and the loader that fills them.

mod loader;

use kiln_heap::RawHandle;
use kiln_reloc::SegmentBases;
use planck_noalloc::vec::ArrayVec;

use crate::platform::TaskId;

pub use loader::ModuleLoader;

/// Lifecycle of a module slot.
///
/// `load` walks a slot from `Empty` to `Running` in one call; any failure on
/// the way returns it to `Empty`. `unload` goes through `Finalizing` back to
/// `Empty`, and may stop in `Finalizing` while a task winds down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleState {
    /// No module.
    Empty,
    /// Section metadata read.
    Parsed,
    /// Memory reserved.
    Allocated,
    /// Code copied and linked.
    TextRelocated,
    /// Initialised data copied and linked.
    DataRelocated,
    /// Zero-initialised data cleared.
    BssZeroed,
    /// Constructor called or task started.
    Running,
    /// Being shut down.
    Finalizing,
}

/// Outcome of [`ModuleLoader::unload`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnloadStatus {
    /// The slot is empty and its memory returned to the heap.
    Done,
    /// The module's task has not exited yet; call `unload` again later.
    Pending,
}

/// How a module is started and stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryPoint {
    /// Constructor and optional destructor, called through the executor.
    Init {
        /// Constructor address.
        init: u32,
        /// Destructor address.
        fini: Option<u32>,
    },
    /// A task descriptor handed to the scheduler.
    Task {
        /// Descriptor address.
        descriptor: u32,
        /// The started task, once the scheduler accepted it.
        task: Option<TaskId>,
    },
}

/// A module slot.
#[derive(Debug)]
pub struct LoadedModule {
    state: ModuleState,
    /// Code allocation first (RAM execution), then data and bss.
    allocations: ArrayVec<RawHandle, 2>,
    bases: SegmentBases,
    entry: Option<EntryPoint>,
}

impl LoadedModule {
    fn empty() -> Self {
        Self {
            state: ModuleState::Empty,
            allocations: ArrayVec::new(),
            bases: SegmentBases::default(),
            entry: None,
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ModuleState {
        self.state
    }

    /// Target addresses of the module's segments.
    #[must_use]
    pub fn bases(&self) -> SegmentBases {
        self.bases
    }

    /// How the module was started.
    #[must_use]
    pub fn entry(&self) -> Option<EntryPoint> {
        self.entry
    }

    /// Heap blocks owned by the module.
    #[must_use]
    pub fn allocations(&self) -> &[RawHandle] {
        self.allocations.as_slice()
    }
}
