// Huge page backing store and the line stress primitive

use nix::sys::mman::{mmap, munmap, MapFlags, ProtFlags};
use std::fs::File;
use std::num::NonZeroUsize;
use std::os::fd::BorrowedFd;
use std::os::unix::fs::FileExt;
use std::ptr::NonNull;

use crate::error::{Result, SliceMapError};

pub const HUGE_PAGE_SIZE: usize = 2 * 1024 * 1024;
pub const CACHE_LINE_SIZE: usize = 64;

const BASE_PAGE_SIZE: u64 = 4096;
const PAGEMAP_PRESENT: u64 = 1 << 63;
const PAGEMAP_PFN_MASK: u64 = 0x007F_FFFF_FFFF_FFFF;

/// Page index -> physical base address of each 2MiB page under test
pub trait PageInfoProvider {
    fn page_count(&self) -> usize;
    fn physical_base(&self, page: usize) -> u64;
}

/// Generates one coherence fill per repetition for a single cache line
pub trait LineStressor {
    /// Load, fence, flush, fence `repetitions` times; returns the sum of the loaded values
    fn stress(&mut self, page: usize, line: usize, repetitions: u32) -> Result<f64>;
}

/// Byte offset of `line` in `page` within a region of `len` bytes
fn line_offset(len: usize, page: usize, line: usize) -> Result<usize> {
    let lines_per_page = HUGE_PAGE_SIZE / CACHE_LINE_SIZE;
    let offset = page
        .checked_mul(HUGE_PAGE_SIZE)
        .and_then(|base| base.checked_add(line.checked_mul(CACHE_LINE_SIZE)?));
    match offset {
        Some(offset) if line < lines_per_page && offset < len => Ok(offset),
        _ => Err(SliceMapError::InvalidConfiguration(format!(
            "line {line} of page {page} outside a {len}-byte region"
        ))),
    }
}

/// Anonymous mapping of `MAP_HUGETLB` pages with their physical addresses
pub struct HugePageRegion {
    base: NonNull<f64>,
    len: usize,
    physical: Vec<u64>,
}

impl HugePageRegion {
    pub fn allocate(num_pages: usize) -> Result<Self> {
        if !cfg!(target_arch = "x86_64") {
            return Err(SliceMapError::UnsupportedArchitecture(
                "line flushing is only implemented for x86_64".to_string(),
            ));
        }

        let len = num_pages
            .checked_mul(HUGE_PAGE_SIZE)
            .and_then(NonZeroUsize::new)
            .ok_or_else(|| {
                SliceMapError::AllocationError(format!("invalid page count {num_pages}"))
            })?;

        // SAFETY: fresh anonymous mapping, no existing memory is aliased
        let ptr = unsafe {
            mmap(
                None,
                len,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_PRIVATE | MapFlags::MAP_ANONYMOUS | MapFlags::MAP_HUGETLB,
                None::<BorrowedFd>,
                0,
            )
        }
        .map_err(|e| {
            SliceMapError::AllocationError(format!(
                "mmap of {num_pages} 2MiB huge pages failed: {e} (check vm.nr_hugepages)"
            ))
        })?;

        let base = NonNull::new(ptr as *mut f64)
            .ok_or_else(|| SliceMapError::AllocationError("mmap returned null".to_string()))?;
        let mut region = Self {
            base,
            len: len.get(),
            physical: Vec::with_capacity(num_pages),
        };

        // Fault every page in before asking for its frame number
        // SAFETY: the mapping is len bytes, readable and writable, and owned by region
        let count = region.len / std::mem::size_of::<f64>();
        let elements = unsafe { std::slice::from_raw_parts_mut(region.base.as_ptr(), count) };
        elements.fill(1.0);

        region.physical = region.resolve_physical(num_pages)?;
        tracing::info!(
            "Allocated {} huge pages ({} MiB)",
            num_pages,
            region.len >> 20
        );
        Ok(region)
    }

    fn resolve_physical(&self, num_pages: usize) -> Result<Vec<u64>> {
        let pagemap = File::open("/proc/self/pagemap").map_err(|e| {
            SliceMapError::AllocationError(format!("Failed to open /proc/self/pagemap: {e}"))
        })?;

        let mut physical = Vec::with_capacity(num_pages);
        for page in 0..num_pages {
            let va = self.base.as_ptr() as u64 + (page * HUGE_PAGE_SIZE) as u64;
            let mut entry = [0u8; 8];
            pagemap
                .read_exact_at(&mut entry, va / BASE_PAGE_SIZE * 8)
                .map_err(|e| {
                    SliceMapError::AllocationError(format!(
                        "Failed to read pagemap entry for 0x{va:x}: {e}"
                    ))
                })?;
            let entry = u64::from_le_bytes(entry);

            let pfn = entry & PAGEMAP_PFN_MASK;
            if entry & PAGEMAP_PRESENT == 0 || pfn == 0 {
                return Err(SliceMapError::AllocationError(format!(
                    "page {page} at 0x{va:x} has no visible frame (pagemap entry 0x{entry:x}); \
                     reading frame numbers requires CAP_SYS_ADMIN"
                )));
            }

            let paddr = pfn * BASE_PAGE_SIZE;
            if paddr % HUGE_PAGE_SIZE as u64 != 0 {
                tracing::warn!(
                    "page {} base physical address 0x{:x} is not 2MiB-aligned",
                    page,
                    paddr
                );
            }
            physical.push(paddr);
        }
        Ok(physical)
    }

    fn line_ptr(&self, page: usize, line: usize) -> Result<*const f64> {
        let offset = line_offset(self.len, page, line)?;
        // SAFETY: line_offset keeps the offset inside the mapping
        Ok(unsafe { (self.base.as_ptr() as *const u8).add(offset) as *const f64 })
    }
}

impl PageInfoProvider for HugePageRegion {
    fn page_count(&self) -> usize {
        self.physical.len()
    }

    fn physical_base(&self, page: usize) -> u64 {
        self.physical[page]
    }
}

impl LineStressor for HugePageRegion {
    fn stress(&mut self, page: usize, line: usize, repetitions: u32) -> Result<f64> {
        let ptr = self.line_ptr(page, line)?;
        let mut sum = 0.0;
        for _ in 0..repetitions {
            // SAFETY: ptr points into the live mapping owned by self
            sum += unsafe { touch_and_evict(ptr) };
        }
        Ok(sum)
    }
}

impl Drop for HugePageRegion {
    fn drop(&mut self) {
        // SAFETY: base/len describe the mapping created in allocate
        if let Err(e) = unsafe { munmap(self.base.as_ptr() as *mut _, self.len) } {
            tracing::warn!("munmap of huge page region failed: {}", e);
        }
    }
}

/// Load the line, then flush it from every cache level, fenced on both sides
///
/// The fences keep consecutive iterations from merging into one fill.
#[cfg(target_arch = "x86_64")]
#[inline(always)]
unsafe fn touch_and_evict(ptr: *const f64) -> f64 {
    use std::arch::x86_64::{_mm_clflush, _mm_lfence, _mm_mfence};

    let value = std::ptr::read_volatile(ptr);
    _mm_mfence();
    _mm_lfence();
    _mm_clflush(ptr as *const u8);
    _mm_mfence();
    _mm_lfence();
    value
}

// Other architectures need their own flush instruction; allocate() refuses them.
#[cfg(not(target_arch = "x86_64"))]
#[inline(always)]
unsafe fn touch_and_evict(ptr: *const f64) -> f64 {
    use std::sync::atomic::{fence, Ordering};

    let value = std::ptr::read_volatile(ptr);
    fence(Ordering::SeqCst);
    value
}
