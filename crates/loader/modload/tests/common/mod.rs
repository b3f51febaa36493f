//! Shared fixtures: a recording platform, a small firmware symbol table and
//! synthetic modules.

#![allow(dead_code)]

use kiln_elf::builder::{ObjectBuilder, SymbolSection};
use kiln_heap::{CompactHeap, HeapConfig};
use kiln_loader::{
    Executor, Flash, LoaderConfig, ModuleLoader, PlatformError, Scheduler, TaskId,
};
use kiln_reloc::AvrBackend;
use kiln_reloc::avr::{R_AVR_16, R_AVR_16_PM, R_AVR_CALL};
use kiln_symtab::{Symbol, SymbolTable};

/// Target address of the heap region.
pub const RAM_BASE: u32 = 0x0200;
/// Firmware global the sentinel module stores into.
pub const SENTINEL_ADDR: u32 = 0x0060;
/// Word address of the firmware function the sentinel module calls.
pub const LOG_WORD_ADDR: u32 = 0x0800;
/// Start of the flash area reserved for modules.
pub const FLASH_BASE: u32 = 0x8000;
/// Size of that area.
pub const FLASH_SIZE: u32 = 0x0800;

pub const FUNCTIONS: [Symbol; 1] = [Symbol::new("firmware_log", LOG_WORD_ADDR)];
pub const OBJECTS: [Symbol; 1] = [Symbol::new("module_sentinel", SENTINEL_ADDR)];

pub static FIRMWARE: SymbolTable<'static> =
    SymbolTable::new(&FUNCTIONS, &OBJECTS).with_code_scale(AvrBackend::CODE_SCALE);

pub type TestLoader<'r> = ModuleLoader<'r, AvrBackend, MockPlatform, 2, 4>;

/// Records every request the loader makes of the firmware.
#[derive(Debug)]
pub struct MockPlatform {
    pub calls: Vec<u32>,
    pub flash: Vec<u8>,
    pub erased: Vec<u32>,
    pub fail_flash: bool,
    pub started: Vec<u32>,
    pub stopped: Vec<TaskId>,
    pub task_exited: bool,
    pub refuse_tasks: bool,
}

impl Default for MockPlatform {
    fn default() -> Self {
        Self {
            calls: Vec::new(),
            flash: vec![0xff; FLASH_SIZE as usize],
            erased: Vec::new(),
            fail_flash: false,
            started: Vec::new(),
            stopped: Vec::new(),
            task_exited: false,
            refuse_tasks: false,
        }
    }
}

impl MockPlatform {
    /// `len` bytes of the reserved flash area starting at `addr`.
    pub fn flash_at(&self, addr: u32, len: usize) -> &[u8] {
        let start = (addr - FLASH_BASE) as usize;
        &self.flash[start..start + len]
    }
}

impl Flash for MockPlatform {
    fn erase(&mut self, addr: u32, len: u32) -> Result<(), PlatformError> {
        if self.fail_flash {
            return Err(PlatformError::Device(-5));
        }
        self.erased.push(addr);
        let start = (addr - FLASH_BASE) as usize;
        let end = (start + len as usize).min(self.flash.len());
        self.flash[start..end].fill(0xff);
        Ok(())
    }

    fn pwrite(&mut self, addr: u32, data: &[u8]) -> Result<(), PlatformError> {
        let start = (addr - FLASH_BASE) as usize;
        self.flash[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }
}

impl Scheduler for MockPlatform {
    fn start_task(&mut self, descriptor: u32) -> Result<TaskId, PlatformError> {
        if self.refuse_tasks {
            return Err(PlatformError::Device(-16));
        }
        self.started.push(descriptor);
        Ok(TaskId(7))
    }

    fn stop_task(&mut self, task: TaskId) -> Result<(), PlatformError> {
        self.stopped.push(task);
        Ok(())
    }

    fn task_exited(&mut self, _task: TaskId) -> bool {
        self.task_exited
    }
}

impl Executor for MockPlatform {
    fn call(&mut self, entry: u32) {
        self.calls.push(entry);
    }
}

/// A loader over `region` in RAM execution mode.
pub fn make_loader(region: &mut [u8]) -> TestLoader<'_> {
    make_loader_with(region, LoaderConfig::new().with_ram_base(RAM_BASE))
}

pub fn make_loader_with(region: &mut [u8], config: LoaderConfig) -> TestLoader<'_> {
    ModuleLoader::new(
        CompactHeap::new(region, HeapConfig::new()),
        &FIRMWARE,
        AvrBackend,
        MockPlatform::default(),
        config,
    )
}

// ---------------------------------------------------------------------------
// Modules
// ---------------------------------------------------------------------------

/// `_init`: `sts module_sentinel, r24`, `call firmware_log`, `ret`.
/// `_fini`: `ret`.
pub const SENTINEL_TEXT: [u8; 12] = [
    0x80, 0x93, 0x00, 0x00, // sts
    0x0e, 0x94, 0x00, 0x00, // call
    0x08, 0x95, // ret
    0x08, 0x95, // _fini: ret
];
/// Offset of `_fini` in [`SENTINEL_TEXT`].
pub const FINI_OFFSET: u32 = 10;

/// A module with `_init` and `_fini`, a `.data` word holding a pointer to
/// `_fini`, and four bytes of `.bss`.
pub fn sentinel_module() -> ObjectBuilder {
    let mut obj = ObjectBuilder::default()
        .text(&SENTINEL_TEXT)
        .data(&[0, 0])
        .bss(4);
    obj.symbol("_init", SymbolSection::Text, 0);
    let fini = obj.symbol("_fini", SymbolSection::Text, FINI_OFFSET);
    obj.symbol("counter", SymbolSection::Bss, 0);
    let sentinel = obj.symbol("module_sentinel", SymbolSection::Undefined, 0);
    let log = obj.symbol("firmware_log", SymbolSection::Undefined, 0);
    obj.text_reloc(2, sentinel, R_AVR_16, 0);
    obj.text_reloc(4, log, R_AVR_CALL, 0);
    obj.data_reloc(0, fini, R_AVR_16_PM, 0);
    obj
}

/// A module whose only entry is a task descriptor in `.data`.
pub fn task_module() -> ObjectBuilder {
    let mut obj = ObjectBuilder::default()
        .text(&[0x08, 0x95])
        .data(&[0, 0, 0, 0]);
    let thread = obj.symbol("thread", SymbolSection::Text, 0);
    obj.symbol("autostart_processes", SymbolSection::Data, 0);
    obj.data_reloc(0, thread, R_AVR_16_PM, 0);
    obj
}

/// A module that calls a function the firmware does not have.
pub fn undefined_module() -> ObjectBuilder {
    let mut obj = ObjectBuilder::default().text(&[0x0e, 0x94, 0x00, 0x00, 0x08, 0x95]);
    obj.symbol("_init", SymbolSection::Text, 0);
    let missing = obj.symbol("does_not_exist", SymbolSection::Undefined, 0);
    obj.text_reloc(0, missing, R_AVR_CALL, 0);
    obj
}
