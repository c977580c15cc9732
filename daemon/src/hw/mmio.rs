//! Register window mapped from physical memory.
//!
//! The window is mapped with `MAP_SHARED` over `/dev/mem` (or any file that
//! exposes physical memory) and unmapped on drop, so every exit path that
//! drops the window also releases the mapping.

use std::ffi::c_void;
use std::fs::OpenOptions;
use std::num::NonZeroUsize;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::ptr::{self, NonNull};

use mux_core::registers::RegisterWindow;
use nix::fcntl::OFlag;
use nix::libc::off_t;
use nix::sys::mman::{MapFlags, ProtFlags, mmap, munmap};

use crate::error::DaemonError;

/// Mapping granularity on Cherry Trail class hardware.
const PAGE_SIZE: usize = 4096;

pub struct MmioWindow {
    mapping: NonNull<c_void>,
    mapping_len: usize,
    registers: NonNull<u8>,
    size: usize,
}

impl MmioWindow {
    /// Maps `size` bytes starting at physical address `base`.
    ///
    /// `base` need not be page aligned; the mapping is widened to whole pages
    /// and register offsets stay relative to `base`.
    pub fn map(path: &Path, base: u64, size: usize) -> Result<Self, DaemonError> {
        let page_mask = PAGE_SIZE as u64 - 1;
        let page_start = base & !page_mask;
        let lead = usize::try_from(base - page_start)
            .map_err(|_| DaemonError::Usage(format!("--base {base:#x} is not addressable")))?;
        let mapping_len = lead
            .checked_add(size)
            .map(|len| len.next_multiple_of(PAGE_SIZE))
            .and_then(NonZeroUsize::new)
            .ok_or_else(|| DaemonError::Usage(format!("--size {size:#x} is not mappable")))?;
        let offset = off_t::try_from(page_start)
            .map_err(|_| DaemonError::Usage(format!("--base {base:#x} is out of range")))?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(OFlag::O_SYNC.bits())
            .open(path)
            .map_err(|source| DaemonError::io(format!("open {}", path.display()), source))?;

        // SAFETY: a fresh shared mapping at a kernel-chosen address; nothing
        // else in this process aliases it.
        let mapping = unsafe {
            mmap(
                None,
                mapping_len,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
                &file,
                offset,
            )
        }
        .map_err(DaemonError::Map)?;

        // SAFETY: `lead` is smaller than a page and the mapping spans at least
        // `lead + size` bytes.
        let registers = unsafe { NonNull::new_unchecked(mapping.as_ptr().cast::<u8>().add(lead)) };

        log::debug!(
            "mapped {:#x}..{:#x} from {}",
            base,
            base + size as u64,
            path.display()
        );

        Ok(Self {
            mapping,
            mapping_len: mapping_len.get(),
            registers,
            size,
        })
    }

    fn register(&self, offset: usize) -> *mut u32 {
        assert!(
            offset % 4 == 0 && offset + 4 <= self.size,
            "register offset {offset:#x} outside {:#x}-byte window",
            self.size
        );
        // SAFETY: bounds and alignment checked above.
        unsafe { self.registers.as_ptr().add(offset).cast::<u32>() }
    }
}

impl RegisterWindow for MmioWindow {
    fn read32(&self, offset: usize) -> u32 {
        // SAFETY: `register` only returns aligned pointers inside the mapping.
        unsafe { ptr::read_volatile(self.register(offset)) }
    }

    fn write32(&mut self, offset: usize, value: u32) {
        // SAFETY: as for `read32`; `&mut self` keeps writes exclusive.
        unsafe { ptr::write_volatile(self.register(offset), value) }
    }

    fn size(&self) -> usize {
        self.size
    }
}

impl Drop for MmioWindow {
    fn drop(&mut self) {
        // SAFETY: the mapping was created in `map` and is not used after drop.
        if let Err(errno) = unsafe { munmap(self.mapping, self.mapping_len) } {
            log::warn!("munmap of register window failed: {errno}");
        }
    }
}
