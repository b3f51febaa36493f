//! The module loader.

use kiln_elf::{ByteSource, ElfError, ObjectMetadata, Section, SegmentKind};
use kiln_heap::{CompactHeap, RawHandle};
use kiln_reloc::{ModuleSymbols, RelocationBackend, Relocator, SegmentBases};
use kiln_symtab::SymbolTable;
use log::{debug, info, warn};

use super::{EntryPoint, LoadedModule, ModuleState, UnloadStatus};
use crate::config::{ExecMode, LoaderConfig};
use crate::error::LoadError;
use crate::platform::{self, Platform};

/// Byte sizes of a module's memory image.
#[derive(Debug, Clone, Copy)]
struct Footprint {
    text: usize,
    /// `.text` plus `.rodata`.
    code: usize,
    data: usize,
    bss: usize,
    /// `.data` plus `.bss`.
    vars: usize,
}

/// Where a module's image lives in the heap.
#[derive(Debug, Clone, Copy)]
struct Placement {
    /// Holds `.text` then `.rodata`.
    code: RawHandle,
    /// Holds `.bss` then `.data`. Same block as `code` when executing from
    /// flash.
    vars: RawHandle,
    bases: SegmentBases,
}

fn len(size: u32, err: LoadError) -> Result<usize, LoadError> {
    usize::try_from(size).map_err(|_| err)
}

fn read_section<S: ByteSource + ?Sized>(
    source: &mut S,
    file_offset: u64,
    section: Option<Section>,
    dst: &mut [u8],
) -> Result<(), ElfError> {
    match section {
        Some(section) => source.read_exact(dst, file_offset + u64::from(section.offset)),
        None => Ok(()),
    }
}

/// Loads, links, starts and unloads modules.
///
/// The loader owns the heap that module images live in, a fixed table of
/// `MODULES` slots, and the firmware services in `P`. Module images are
/// locked blocks; other users of [`heap_mut`](Self::heap_mut) may keep
/// unlocked blocks, which are compacted before every load.
pub struct ModuleLoader<'a, B, P, const MODULES: usize, const HANDLES: usize> {
    heap: CompactHeap<'a, HANDLES>,
    symbols: &'a SymbolTable<'a>,
    backend: B,
    platform: P,
    config: LoaderConfig,
    modules: [LoadedModule; MODULES],
}

impl<'a, B, P, const MODULES: usize, const HANDLES: usize> ModuleLoader<'a, B, P, MODULES, HANDLES>
where
    B: RelocationBackend,
    P: Platform,
{
    /// Creates a loader with every slot empty.
    #[must_use]
    pub fn new(
        heap: CompactHeap<'a, HANDLES>,
        symbols: &'a SymbolTable<'a>,
        backend: B,
        platform: P,
        config: LoaderConfig,
    ) -> Self {
        Self {
            heap,
            symbols,
            backend,
            platform,
            config,
            modules: core::array::from_fn(|_| LoadedModule::empty()),
        }
    }

    /// The heap module images are allocated from.
    #[must_use]
    pub fn heap(&self) -> &CompactHeap<'a, HANDLES> {
        &self.heap
    }

    /// Mutable access to the heap, for the firmware's own allocations.
    pub fn heap_mut(&mut self) -> &mut CompactHeap<'a, HANDLES> {
        &mut self.heap
    }

    /// The firmware services.
    #[must_use]
    pub fn platform(&self) -> &P {
        &self.platform
    }

    /// Mutable access to the firmware services.
    pub fn platform_mut(&mut self) -> &mut P {
        &mut self.platform
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// State of `slot`, or `None` if it is out of range.
    #[must_use]
    pub fn state(&self, slot: usize) -> Option<ModuleState> {
        self.modules.get(slot).map(LoadedModule::state)
    }

    /// The module in `slot`, or `None` if it is out of range.
    #[must_use]
    pub fn module(&self, slot: usize) -> Option<&LoadedModule> {
        self.modules.get(slot)
    }

    // -----------------------------------------------------------------------
    // Loading
    // -----------------------------------------------------------------------

    /// Loads the object at `file_offset` in `source` into `slot` and starts
    /// it.
    ///
    /// On failure everything allocated for the module is freed and the slot
    /// is `Empty` again.
    ///
    /// # Errors
    ///
    /// - [`LoadError::BadSlot`] or [`LoadError::ModuleBusy`] if `slot`
    ///   cannot take a module; nothing is read in that case.
    /// - Any parse, limit, allocation, link, flash or start failure.
    pub fn load<S: ByteSource + ?Sized>(
        &mut self,
        slot: usize,
        source: &mut S,
        file_offset: u64,
    ) -> Result<(), LoadError> {
        let module = self.modules.get(slot).ok_or(LoadError::BadSlot(slot))?;
        if module.state != ModuleState::Empty {
            return Err(LoadError::ModuleBusy);
        }

        match self
            .link(slot, source, file_offset)
            .and_then(|()| self.start(slot))
        {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!("modload: slot {slot}: load failed: {e}");
                self.release(slot);
                Err(e)
            }
        }
    }

    /// Loads into the first empty slot and returns its index.
    ///
    /// # Errors
    ///
    /// [`LoadError::ModuleBusy`] if every slot is taken, otherwise as
    /// [`load`](Self::load).
    pub fn load_any<S: ByteSource + ?Sized>(
        &mut self,
        source: &mut S,
        file_offset: u64,
    ) -> Result<usize, LoadError> {
        let slot = self
            .modules
            .iter()
            .position(|m| m.state == ModuleState::Empty)
            .ok_or(LoadError::ModuleBusy)?;
        self.load(slot, source, file_offset)?;
        Ok(slot)
    }

    /// Runs every load step up to, but not including, starting the module.
    fn link<S: ByteSource + ?Sized>(
        &mut self,
        slot: usize,
        source: &mut S,
        file_offset: u64,
    ) -> Result<(), LoadError> {
        let meta = kiln_elf::parse(source, file_offset)?;
        self.modules[slot].state = ModuleState::Parsed;
        if meta.machine != B::MACHINE {
            warn!(
                "modload: object machine {} differs from back-end machine {}",
                meta.machine,
                B::MACHINE
            );
        }

        let size = self.footprint(slot, &meta)?;
        self.heap.compact_all();
        let placement = self.reserve(slot, &meta, size)?;
        let bases = placement.bases;
        self.modules[slot].bases = bases;
        self.modules[slot].state = ModuleState::Allocated;
        debug!(
            "modload: slot {slot}: text {:#x} rodata {:?} data {:?} bss {:?}",
            bases.text, bases.rodata, bases.data, bases.bss
        );

        let relocator = Relocator::new(&meta, self.symbols, &self.backend, bases);

        let image = &mut self.heap.bytes_mut(placement.code)[..size.code];
        let (text, rodata) = image.split_at_mut(size.text);
        read_section(source, file_offset, Some(meta.text), text)?;
        read_section(source, file_offset, meta.rodata, rodata)?;
        if let Some(table) = meta.relocs(SegmentKind::Text) {
            relocator.relocate(source, file_offset, text, bases.text, &table)?;
        }
        if let (Some(table), Some(base)) = (meta.relocs(SegmentKind::Rodata), bases.rodata) {
            relocator.relocate(source, file_offset, rodata, base, &table)?;
        }
        self.modules[slot].state = ModuleState::TextRelocated;

        if let Some((base, _)) = self.flash_region(slot) {
            let image = &self.heap.bytes(placement.code)[..size.code];
            platform::program(&mut self.platform, base, image).map_err(LoadError::Flash)?;
            debug!("modload: slot {slot}: wrote {} code bytes to flash at {base:#x}", size.code);
        }

        let image = &mut self.heap.bytes_mut(placement.vars)[..size.vars];
        let (bss, data) = image.split_at_mut(size.bss);
        read_section(source, file_offset, meta.data, data)?;
        if let (Some(table), Some(base)) = (meta.relocs(SegmentKind::Data), bases.data) {
            relocator.relocate(source, file_offset, data, base, &table)?;
        }
        self.modules[slot].state = ModuleState::DataRelocated;
        bss.fill(0);
        self.modules[slot].state = ModuleState::BssZeroed;

        let entry = self.find_entry(&relocator.module_symbols(), source, file_offset)?;
        self.modules[slot].entry = Some(entry);
        info!(
            "modload: slot {slot}: linked {} code bytes at {:#x}, {} data bytes, {} bss bytes",
            size.code, bases.text, size.data, size.bss
        );
        Ok(())
    }

    /// Checks the segment sizes against the configured limits.
    fn footprint(&self, slot: usize, meta: &ObjectMetadata) -> Result<Footprint, LoadError> {
        let text = meta.size_of(SegmentKind::Text);
        let code = text
            .checked_add(meta.size_of(SegmentKind::Rodata))
            .ok_or(LoadError::TextTooLarge)?;
        let data = meta.size_of(SegmentKind::Data);
        let bss = meta.size_of(SegmentKind::Bss);

        if code > self.config.max_text {
            return Err(LoadError::TextTooLarge);
        }
        if let Some((_, size)) = self.flash_region(slot) {
            if code > size {
                return Err(LoadError::TextTooLarge);
            }
        }
        if data > self.config.max_data {
            return Err(LoadError::DataTooLarge);
        }
        if bss > self.config.max_bss {
            return Err(LoadError::BssTooLarge);
        }
        let vars = data.checked_add(bss).ok_or(LoadError::DataTooLarge)?;

        Ok(Footprint {
            text: len(text, LoadError::TextTooLarge)?,
            code: len(code, LoadError::TextTooLarge)?,
            data: len(data, LoadError::DataTooLarge)?,
            bss: len(bss, LoadError::BssTooLarge)?,
            vars: len(vars, LoadError::DataTooLarge)?,
        })
    }

    /// Allocates the module image and decides where each segment goes.
    ///
    /// From RAM, code and variables get a block each. From flash, a single
    /// block first stages the code and then holds the variables. Variables
    /// are laid out with `.bss` at the base and `.data` after it.
    fn reserve(
        &mut self,
        slot: usize,
        meta: &ObjectMetadata,
        size: Footprint,
    ) -> Result<Placement, LoadError> {
        let (code, vars, text_base) = match self.flash_region(slot) {
            None => {
                let code = self.allocate(slot, size.code, LoadError::TextTooLarge)?;
                let vars = self.allocate(slot, size.vars, LoadError::DataTooLarge)?;
                (code, vars, self.address_of(code)?)
            }
            Some((base, _)) => {
                let err = if size.code >= size.vars {
                    LoadError::TextTooLarge
                } else {
                    LoadError::DataTooLarge
                };
                let buf = self.allocate(slot, size.code.max(size.vars), err)?;
                (buf, buf, base)
            }
        };

        let vars_base = self.address_of(vars)?;
        let bases = SegmentBases {
            text: text_base,
            rodata: meta
                .rodata
                .map(|_| text_base.wrapping_add(meta.size_of(SegmentKind::Text))),
            data: meta
                .data
                .map(|_| vars_base.wrapping_add(meta.size_of(SegmentKind::Bss))),
            bss: meta.bss.map(|_| vars_base),
        };
        Ok(Placement { code, vars, bases })
    }

    /// Base and size of the flash area `slot` executes from, or `None`
    /// when modules run from RAM.
    ///
    /// The configured area is split into `MODULES` equal shares, each a
    /// whole number of flash pages.
    fn flash_region(&self, slot: usize) -> Option<(u32, u32)> {
        let ExecMode::Flash { base, size } = self.config.mode else {
            return None;
        };
        let page = platform::page_size(&self.platform);
        let slots = u32::try_from(MODULES).unwrap_or(u32::MAX).max(1);
        let share = size / slots / page * page;
        #[expect(clippy::cast_possible_truncation, reason = "slot < MODULES")]
        let index = slot as u32;
        Some((base.wrapping_add(index.wrapping_mul(share)), share))
    }

    fn allocate(&mut self, slot: usize, size: usize, err: LoadError) -> Result<RawHandle, LoadError> {
        let handle = self.heap.allocate(size).map_err(|_| err)?;
        self.modules[slot].allocations.push(handle);
        Ok(handle)
    }

    /// Target address of a heap block's payload.
    fn address_of(&self, handle: RawHandle) -> Result<u32, LoadError> {
        let offset = u32::try_from(handle.offset()).map_err(|_| LoadError::OutOfMemory)?;
        Ok(self.config.ram_base.wrapping_add(offset))
    }

    /// Looks up the module's constructor, destructor and task descriptor.
    fn find_entry<S: ByteSource + ?Sized>(
        &self,
        symbols: &ModuleSymbols<'_>,
        source: &mut S,
        file_offset: u64,
    ) -> Result<EntryPoint, LoadError> {
        let init = symbols.find(source, file_offset, self.config.init_symbol.as_bytes())?;

        let mut descriptor = None;
        for name in self.config.task_symbols {
            descriptor = symbols.find(source, file_offset, name.as_bytes())?;
            if descriptor.is_some() {
                break;
            }
        }

        match (init, descriptor) {
            (Some(init), descriptor) => {
                if descriptor.is_some() {
                    let name = self.config.init_symbol;
                    warn!("modload: module has both {name} and a task descriptor, using {name}");
                }
                let fini = symbols.find(source, file_offset, self.config.fini_symbol.as_bytes())?;
                Ok(EntryPoint::Init { init, fini })
            }
            (None, Some(descriptor)) => Ok(EntryPoint::Task {
                descriptor,
                task: None,
            }),
            (None, None) => Err(LoadError::NoStartpoint),
        }
    }

    /// Calls the constructor or starts the task.
    fn start(&mut self, slot: usize) -> Result<(), LoadError> {
        let module = &mut self.modules[slot];
        match module.entry {
            Some(EntryPoint::Init { init, .. }) => {
                debug!("modload: slot {slot}: calling constructor at {init:#x}");
                self.platform.call(init);
            }
            Some(EntryPoint::Task { descriptor, .. }) => {
                let task = self
                    .platform
                    .start_task(descriptor)
                    .map_err(LoadError::Scheduler)?;
                debug!("modload: slot {slot}: started task {} from {descriptor:#x}", task.0);
                module.entry = Some(EntryPoint::Task {
                    descriptor,
                    task: Some(task),
                });
            }
            None => return Err(LoadError::NoStartpoint),
        }
        module.state = ModuleState::Running;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Unloading
    // -----------------------------------------------------------------------

    /// Stops the module in `slot` and frees its memory.
    ///
    /// Calls the destructor if there is one, or asks the scheduler to stop
    /// the module's task. While the task has not exited the slot stays
    /// `Finalizing` and [`UnloadStatus::Pending`] is returned; call again
    /// to poll. Unloading an empty slot does nothing.
    ///
    /// # Errors
    ///
    /// [`LoadError::BadSlot`], or [`LoadError::Scheduler`] if the stop
    /// request fails (the module keeps running).
    pub fn unload(&mut self, slot: usize) -> Result<UnloadStatus, LoadError> {
        let module = self.modules.get_mut(slot).ok_or(LoadError::BadSlot(slot))?;
        match (module.state, module.entry) {
            (ModuleState::Empty, _) => return Ok(UnloadStatus::Done),
            (ModuleState::Running, Some(EntryPoint::Init { fini, .. })) => {
                module.state = ModuleState::Finalizing;
                if let Some(fini) = fini {
                    debug!("modload: slot {slot}: calling destructor at {fini:#x}");
                    self.platform.call(fini);
                }
            }
            (ModuleState::Running, Some(EntryPoint::Task { task: Some(task), .. })) => {
                self.platform.stop_task(task).map_err(LoadError::Scheduler)?;
                module.state = ModuleState::Finalizing;
            }
            _ => {}
        }

        if let Some(EntryPoint::Task { task: Some(task), .. }) = module.entry {
            if !self.platform.task_exited(task) {
                debug!("modload: slot {slot}: waiting for task {} to exit", task.0);
                return Ok(UnloadStatus::Pending);
            }
        }

        self.release(slot);
        info!("modload: slot {slot}: unloaded");
        Ok(UnloadStatus::Done)
    }

    /// Frees the slot's memory and resets it to `Empty`.
    fn release(&mut self, slot: usize) {
        let module = &mut self.modules[slot];
        for &handle in module.allocations.as_slice() {
            self.heap.free(handle);
        }
        *module = LoadedModule::empty();
    }
}
