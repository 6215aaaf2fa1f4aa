use std::{ptr::NonNull, slice};

use snafu::OptionExt;

use crate::{
    error::{AllocError, OutOfMemorySnafu},
    source::HeapSource,
    utils::{align, checked_align},
};

/// Marker type for the platform specific memory syscalls.
struct Kernel;

/// This trait provides an abstraction to handle low level memory operations
/// and syscalls. As the allocator, our top level view of this has nothing to
/// do with the concrete implementations / APIs offered by each kernel.
trait PlatformMemory {
    /// Reserves `len` bytes of address space without making them accessible.
    /// It returns a pointer to the reservation or `None` if the underlying
    /// syscall fails.
    unsafe fn reserve(len: usize) -> Option<NonNull<u8>>;

    /// Makes `len` bytes starting at the page aligned `addr` readable and
    /// writable. Returns `false` if the kernel refuses.
    unsafe fn commit(addr: *mut u8, len: usize) -> bool;

    /// Returns the whole reservation of size `len` starting from `addr` back
    /// to the kernel.
    unsafe fn release(addr: *mut u8, len: usize);

    /// Returns the virtual memory page size of the computer in bytes.
    fn page_size() -> usize;
}

#[cfg(unix)]
mod unix {
    use super::{Kernel, PlatformMemory};

    use libc::{mmap, mprotect, munmap, off_t, size_t};

    use std::{
        os::raw::{c_int, c_void},
        ptr::{self, NonNull},
    };

    impl PlatformMemory for Kernel {
        unsafe fn reserve(len: usize) -> Option<NonNull<u8>> {
            // mmap parameters. Nothing is accessible until it is committed.
            const ADDR: *mut c_void = ptr::null_mut::<c_void>();
            const PROT: c_int = libc::PROT_NONE;
            const FLAGS: c_int = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;
            const FD: c_int = -1;
            const OFFSET: off_t = 0;

            let addr = unsafe { mmap(ADDR, len as size_t, PROT, FLAGS, FD, OFFSET) };

            if addr == libc::MAP_FAILED {
                None
            } else {
                NonNull::new(addr.cast::<u8>())
            }
        }

        unsafe fn commit(addr: *mut u8, len: usize) -> bool {
            const PROT: c_int = libc::PROT_READ | libc::PROT_WRITE;

            unsafe { mprotect(addr.cast::<c_void>(), len as size_t, PROT) == 0 }
        }

        unsafe fn release(addr: *mut u8, len: usize) {
            unsafe {
                munmap(addr.cast::<c_void>(), len as size_t);
            }
        }

        fn page_size() -> usize {
            unsafe { libc::sysconf(libc::_SC_PAGE_SIZE) as usize }
        }
    }
}

#[cfg(windows)]
mod windows {
    use std::{mem::MaybeUninit, os::raw::c_void, ptr::NonNull};

    use super::{Kernel, PlatformMemory};

    use windows::Win32::System::{Memory, SystemInformation};

    impl PlatformMemory for Kernel {
        unsafe fn reserve(len: usize) -> Option<NonNull<u8>> {
            let addr = unsafe {
                Memory::VirtualAlloc(None, len, Memory::MEM_RESERVE, Memory::PAGE_NOACCESS)
            };

            NonNull::new(addr.cast())
        }

        unsafe fn commit(addr: *mut u8, len: usize) -> bool {
            let addr = unsafe {
                Memory::VirtualAlloc(
                    Some(addr.cast_const().cast::<c_void>()),
                    len,
                    Memory::MEM_COMMIT,
                    Memory::PAGE_READWRITE,
                )
            };

            !addr.is_null()
        }

        unsafe fn release(addr: *mut u8, _len: usize) {
            let _ = unsafe { Memory::VirtualFree(addr.cast::<c_void>(), 0, Memory::MEM_RELEASE) };
        }

        fn page_size() -> usize {
            unsafe {
                let mut system_info = MaybeUninit::uninit();
                SystemInformation::GetSystemInfo(system_info.as_mut_ptr());

                system_info.assume_init().dwPageSize as usize
            }
        }
    }
}

/// Heap source backed by address space reserved from the operating system.
///
/// The whole `max_heap` range is reserved up front so the heap stays
/// contiguous, but pages only become accessible as the break moves past
/// them, which is what `sbrk` would give us without fighting the system
/// allocator over the real program break.
///
/// ```text
///  base                 brk          committed                  reserved
///   +--------------------+---------------+---------------------------+
///   |   heap (in use)    |  accessible   |     reserved, no access   |
///   +--------------------+---------------+---------------------------+
/// ```
pub struct OsHeap {
    base: NonNull<u8>,
    reserved: usize,
    committed: usize,
    brk: usize,
    page_size: usize,
}

impl OsHeap {
    /// Reserves `max_heap` bytes (rounded up to whole pages) of address space.
    pub fn reserve(max_heap: usize) -> Result<Self, AllocError> {
        let page_size = Kernel::page_size();
        let reserved = checked_align(max_heap.max(1), page_size)
            .context(OutOfMemorySnafu { bytes: max_heap })?;

        let base = unsafe { Kernel::reserve(reserved) }.context(OutOfMemorySnafu { bytes: reserved })?;

        log::debug!("reserved {reserved} bytes of address space at {base:p}");

        Ok(Self {
            base,
            reserved,
            committed: 0,
            brk: 0,
            page_size,
        })
    }

    /// Size of the reservation, the most this heap can ever grow to.
    pub fn reserved(&self) -> usize {
        self.reserved
    }
}

impl HeapSource for OsHeap {
    fn grow(&mut self, bytes: usize) -> Option<usize> {
        let old_brk = self.brk;
        let new_brk = old_brk
            .checked_add(bytes)
            .filter(|&brk| brk <= self.reserved)?;

        if new_brk > self.committed {
            // `reserved` is page aligned, so this never runs past it.
            let committed = align(new_brk, self.page_size);
            let start = unsafe { self.base.as_ptr().add(self.committed) };

            if !unsafe { Kernel::commit(start, committed - self.committed) } {
                return None;
            }

            self.committed = committed;
        }

        self.brk = new_brk;
        Some(old_brk)
    }

    fn memory(&self) -> &[u8] {
        // Everything below `brk` is committed and owned by us.
        unsafe { slice::from_raw_parts(self.base.as_ptr(), self.brk) }
    }

    fn memory_mut(&mut self) -> &mut [u8] {
        unsafe { slice::from_raw_parts_mut(self.base.as_ptr(), self.brk) }
    }

    fn size(&self) -> usize {
        self.brk
    }
}

impl Drop for OsHeap {
    fn drop(&mut self) {
        unsafe { Kernel::release(self.base.as_ptr(), self.reserved) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_size_is_a_power_of_two() {
        assert!(Kernel::page_size().is_power_of_two());
    }

    #[test]
    fn reservation_is_page_rounded() {
        let heap = OsHeap::reserve(10_000).unwrap();

        assert_eq!(heap.reserved() % Kernel::page_size(), 0);
        assert!(heap.reserved() >= 10_000);
        assert_eq!(heap.size(), 0);
    }

    #[test]
    fn grow_commits_pages_on_demand() {
        let mut heap = OsHeap::reserve(1 << 20).unwrap();

        assert_eq!(heap.grow(16), Some(0));
        assert_eq!(heap.grow(8000), Some(16));
        assert_eq!(heap.memory().as_ptr() as usize % 16, 0);

        let mem = heap.memory_mut();
        let last = mem.len() - 1;
        mem[0] = 1;
        mem[last] = 2;

        assert_eq!(heap.memory()[0], 1);
        assert_eq!(heap.memory()[8015], 2);
    }

    #[test]
    fn huge_reservation_is_an_error() {
        assert_eq!(
            OsHeap::reserve(usize::MAX).err(),
            Some(AllocError::OutOfMemory { bytes: usize::MAX })
        );
    }

    #[test]
    fn grow_fails_past_reservation() {
        let mut heap = OsHeap::reserve(4096).unwrap();
        let reserved = heap.reserved();

        assert_eq!(heap.grow(reserved), Some(0));
        assert_eq!(heap.grow(16), None);
    }
}
