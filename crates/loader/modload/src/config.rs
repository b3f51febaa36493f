//! Loader configuration.

/// Bytes written to flash per `pwrite` call.
pub const FLASH_CHUNK: usize = 32;

/// Flash erase page size used when a [`Flash`](crate::Flash) does not
/// report its own.
pub const DEFAULT_FLASH_PAGE: u32 = 512;

/// Symbol names tried, in order, for a task descriptor.
pub const DEFAULT_TASK_SYMBOLS: &[&str] = &["autostart_processes", "process_load"];

/// Where module code runs from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecMode {
    /// Code runs from its heap allocation.
    Ram,
    /// Code is staged in RAM, linked for and written to a reserved flash area.
    ///
    /// Each slot owns an equal, page-aligned share of the area.
    Flash {
        /// Target address of the reserved area, past the firmware image.
        base: u32,
        /// Size of the reserved area in bytes.
        size: u32,
    },
}

/// Settings for a [`ModuleLoader`](crate::ModuleLoader).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoaderConfig {
    /// Execution mode.
    pub mode: ExecMode,
    /// Target address of offset 0 of the heap region.
    pub ram_base: u32,
    /// Largest accepted `.text` plus `.rodata`, in bytes.
    pub max_text: u32,
    /// Largest accepted `.data`, in bytes.
    pub max_data: u32,
    /// Largest accepted `.bss`, in bytes.
    pub max_bss: u32,
    /// Constructor symbol.
    pub init_symbol: &'static str,
    /// Destructor symbol, looked up only when the constructor exists.
    pub fini_symbol: &'static str,
    /// Task descriptor symbols, tried in order when there is no constructor.
    pub task_symbols: &'static [&'static str],
}

impl LoaderConfig {
    /// RAM execution, heap at target address 0, no size limits.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            mode: ExecMode::Ram,
            ram_base: 0,
            max_text: u32::MAX,
            max_data: u32::MAX,
            max_bss: u32::MAX,
            init_symbol: "_init",
            fini_symbol: "_fini",
            task_symbols: DEFAULT_TASK_SYMBOLS,
        }
    }

    /// Sets the execution mode.
    #[must_use]
    pub const fn with_mode(mut self, mode: ExecMode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets the target address of the heap region.
    #[must_use]
    pub const fn with_ram_base(mut self, base: u32) -> Self {
        self.ram_base = base;
        self
    }

    /// Sets the per-segment size limits.
    #[must_use]
    pub const fn with_limits(mut self, text: u32, data: u32, bss: u32) -> Self {
        self.max_text = text;
        self.max_data = data;
        self.max_bss = bss;
        self
    }

    /// Sets the constructor and destructor symbol names.
    #[must_use]
    pub const fn with_entry_symbols(mut self, init: &'static str, fini: &'static str) -> Self {
        self.init_symbol = init;
        self.fini_symbol = fini;
        self
    }

    /// Sets the task descriptor symbol names.
    #[must_use]
    pub const fn with_task_symbols(mut self, names: &'static [&'static str]) -> Self {
        self.task_symbols = names;
        self
    }
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self::new()
    }
}
