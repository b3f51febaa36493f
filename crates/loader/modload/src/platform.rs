//! Services the loader needs from the firmware.
//!
//! The loader never touches hardware or the task system directly. A
//! firmware image implements [`Flash`], [`Scheduler`] and [`Executor`] on one
//! type; anything implementing all three is a [`Platform`]. Flash and
//! scheduler methods default to [`PlatformError::Unsupported`] so a RAM-only
//! firmware without tasks implements just [`Executor`] plus two empty impls.

use core::fmt;

use crate::config::DEFAULT_FLASH_PAGE;

/// Errors reported by platform services.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformError {
    /// The platform does not provide this service.
    Unsupported,
    /// The service failed with a driver-specific code.
    Device(i32),
}

impl fmt::Display for PlatformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unsupported => write!(f, "service not supported"),
            Self::Device(code) => write!(f, "device error (code {code})"),
        }
    }
}

impl core::error::Error for PlatformError {}

/// Identifier the scheduler assigns to a started task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(pub u16);

/// Program flash.
pub trait Flash {
    /// Erases `len` bytes starting at the page-aligned address `addr`.
    ///
    /// # Errors
    ///
    /// Returns [`PlatformError`] if the erase fails.
    fn erase(&mut self, addr: u32, len: u32) -> Result<(), PlatformError> {
        let _ = (addr, len);
        Err(PlatformError::Unsupported)
    }

    /// Writes `data` at `addr`, which has been erased.
    ///
    /// # Errors
    ///
    /// Returns [`PlatformError`] if the write fails.
    fn pwrite(&mut self, addr: u32, data: &[u8]) -> Result<(), PlatformError> {
        let _ = (addr, data);
        Err(PlatformError::Unsupported)
    }

    /// Erase granularity in bytes.
    fn page_size(&self) -> u32 {
        DEFAULT_FLASH_PAGE
    }
}

/// The firmware's task scheduler.
pub trait Scheduler {
    /// Starts the task described by the structure at target address
    /// `descriptor`.
    ///
    /// # Errors
    ///
    /// Returns [`PlatformError`] if the task cannot be started.
    fn start_task(&mut self, descriptor: u32) -> Result<TaskId, PlatformError> {
        let _ = descriptor;
        Err(PlatformError::Unsupported)
    }

    /// Asks a running task to exit.
    ///
    /// # Errors
    ///
    /// Returns [`PlatformError`] if the request cannot be delivered.
    fn stop_task(&mut self, task: TaskId) -> Result<(), PlatformError> {
        let _ = task;
        Err(PlatformError::Unsupported)
    }

    /// Returns `true` once a stopped task has exited and no longer runs code
    /// from the module.
    fn task_exited(&mut self, task: TaskId) -> bool {
        let _ = task;
        true
    }
}

/// Runs module code.
pub trait Executor {
    /// Calls the function at target byte address `entry` and returns when
    /// it does.
    fn call(&mut self, entry: u32);
}

/// Everything the loader needs from the firmware.
pub trait Platform: Flash + Scheduler + Executor {}

impl<T: Flash + Scheduler + Executor> Platform for T {}

/// The flash erase unit, with a zero page size read as
/// [`DEFAULT_FLASH_PAGE`].
pub(crate) fn page_size<F: Flash + ?Sized>(flash: &F) -> u32 {
    match flash.page_size() {
        0 => DEFAULT_FLASH_PAGE,
        page => page,
    }
}

/// Writes `image` to flash at `base` in [`FLASH_CHUNK`](crate::FLASH_CHUNK)
/// pieces, erasing each page before the first write into it.
///
/// A page is erased when its start address falls inside the image, so
/// `base` should be page-aligned.
pub(crate) fn program<F: Flash + ?Sized>(
    flash: &mut F,
    base: u32,
    image: &[u8],
) -> Result<(), PlatformError> {
    let page = page_size(flash);
    let mut addr = base;
    for chunk in image.chunks(crate::config::FLASH_CHUNK) {
        #[expect(clippy::cast_possible_truncation, reason = "chunk len <= FLASH_CHUNK")]
        let end = addr.wrapping_add(chunk.len() as u32);
        let mut erase_at = addr.next_multiple_of(page);
        while erase_at < end {
            flash.erase(erase_at, page)?;
            erase_at += page;
        }
        flash.pwrite(addr, chunk)?;
        addr = end;
    }
    Ok(())
}
