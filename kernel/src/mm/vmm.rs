//! The virtual memory manager.
//!
//! Four pools (kernel/user x physical/virtual) behind one coarse
//! recursive lock. An allocation reserves a run of virtual pages, works
//! out how many fresh page tables the run needs, verifies the physical
//! side can cover data plus tables, and only then installs PTEs. Any
//! shortage rolls the virtual reservation back and returns `None`.
//!
//! PTE installation goes through the [`PageMapper`] trait: the bare-metal
//! implementation walks the recursive window (see [`super::paging`]),
//! host tests substitute a recording fake. Page-table frames always come
//! from the kernel physical pool: the kernel owns the paging structures
//! even for user mappings.

use super::paging::{self, EntryFlags};
use super::pool::PagePool;
use super::{PhysAddr, VirtAddr, PAGE_SIZE};

/// Which address space an allocation serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Space {
    Kernel,
    User,
}

/// Kernel virtual addresses start here.
pub const KERNEL_VIRT_BASE: u32 = 0xC000_0000;

/// User virtual addresses start here.
pub const USER_VIRT_BASE: u32 = 0x0100_0000;

/// Kernel virtual span: up to the recursive-mapping window.
pub const KERNEL_VIRT_SPAN: u32 = paging::PTE_WINDOW - KERNEL_VIRT_BASE;

/// User virtual span: up to the kernel base.
pub const USER_VIRT_SPAN: u32 = KERNEL_VIRT_BASE - USER_VIRT_BASE;

/// Physical memory below this belongs to the loader, the boot page tables
/// and the low identity mapping; the pools never manage it.
pub const BOOTSTRAP_PHYS_END: u32 = 0x0040_0000;

/// Fixed low-memory bitmap buffers, 4 KiB each (1024 words).
pub const KERNEL_PHYS_BITMAP: u32 = 0x0800;
pub const KERNEL_VIRT_BITMAP: u32 = 0x1800;
pub const USER_PHYS_BITMAP: u32 = 0x2800;
pub const USER_VIRT_BITMAP: u32 = 0x3800;
pub const BITMAP_WORDS: usize = 1024;

/// Where installed PTEs come from.
pub trait PageMapper {
    /// Whether the page table covering `va` is installed.
    fn table_present(&self, va: VirtAddr) -> bool;

    /// Install `table` as the page table covering `va` and zero it.
    fn install_table(&mut self, va: VirtAddr, table: PhysAddr);

    /// Point `va` at `frame` with `flags`.
    fn map(&mut self, va: VirtAddr, frame: PhysAddr, flags: EntryFlags);
}

pub struct MemoryManager {
    kernel_phys: PagePool,
    kernel_virt: PagePool,
    user_phys: PagePool,
    user_virt: PagePool,
}

impl MemoryManager {
    pub const fn new() -> MemoryManager {
        MemoryManager {
            kernel_phys: PagePool::new(),
            kernel_virt: PagePool::new(),
            user_phys: PagePool::new(),
            user_virt: PagePool::new(),
        }
    }

    /// Allocate `count` mapped pages in `space`.
    ///
    /// Data frames come from the space's physical pool; page-table frames
    /// always come from the kernel physical pool. On any shortage the
    /// virtual reservation is rolled back and the call returns `None`
    /// with every pool back in its prior state.
    pub fn alloc_in(
        &mut self,
        mapper: &mut dyn PageMapper,
        space: Space,
        count: usize,
    ) -> Option<VirtAddr> {
        if count == 0 {
            return None;
        }

        let virt_pool = match space {
            Space::Kernel => &mut self.kernel_virt,
            Space::User => &mut self.user_virt,
        };
        let va = virt_pool.alloc(count)?;
        let missing = missing_tables(mapper, VirtAddr::new(va), count);

        let covered = match space {
            Space::Kernel => self.kernel_phys.free_page_count() >= count + missing,
            Space::User => {
                self.user_phys.free_page_count() >= count
                    && self.kernel_phys.free_page_count() >= missing
            }
        };
        if !covered {
            self.virt_pool(space).free(va, count);
            return None;
        }

        let data = match space {
            Space::Kernel => self.kernel_phys.alloc(count),
            Space::User => self.user_phys.alloc(count),
        };
        let Some(pa) = data else {
            // Enough free frames but no contiguous run.
            self.virt_pool(space).free(va, count);
            return None;
        };

        let flags = match space {
            Space::Kernel => EntryFlags::PRESENT | EntryFlags::WRITABLE,
            Space::User => EntryFlags::PRESENT | EntryFlags::WRITABLE | EntryFlags::USER,
        };
        for index in 0..count {
            let page = VirtAddr::new(va + (index * PAGE_SIZE) as u32);
            if !mapper.table_present(page) {
                // Cannot fail: the free count was verified above and a
                // single page never fragments.
                let table = self
                    .kernel_phys
                    .alloc(1)
                    .expect("page-table frame vanished under the VM lock");
                mapper.install_table(page, PhysAddr::new(table));
            }
            mapper.map(page, PhysAddr::new(pa + (index * PAGE_SIZE) as u32), flags);
        }
        Some(VirtAddr::new(va))
    }

    /// Hand out unmapped kernel physical frames (for callers that install
    /// their own mappings or drive devices).
    pub fn alloc_phys(&mut self, count: usize) -> Option<PhysAddr> {
        self.kernel_phys.alloc(count).map(PhysAddr::new)
    }

    fn virt_pool(&mut self, space: Space) -> &mut PagePool {
        match space {
            Space::Kernel => &mut self.kernel_virt,
            Space::User => &mut self.user_virt,
        }
    }

    pub fn free_virt_pages(&self, space: Space) -> usize {
        match space {
            Space::Kernel => self.kernel_virt.free_page_count(),
            Space::User => self.user_virt.free_page_count(),
        }
    }

    pub fn free_phys_pages(&self, space: Space) -> usize {
        match space {
            Space::Kernel => self.kernel_phys.free_page_count(),
            Space::User => self.user_phys.free_page_count(),
        }
    }
}

impl Default for MemoryManager {
    fn default() -> MemoryManager {
        MemoryManager::new()
    }
}

/// How many 4 MiB spans of `[va, va + count pages)` still lack a page
/// table.
fn missing_tables(mapper: &dyn PageMapper, va: VirtAddr, count: usize) -> usize {
    let start = u64::from(paging::span_base(va).as_u32());
    let end = u64::from(va.as_u32()) + (count * PAGE_SIZE) as u64;
    let mut missing = 0;
    let mut span = start;
    while span < end {
        if !mapper.table_present(VirtAddr::new(span as u32)) {
            missing += 1;
        }
        span += u64::from(paging::TABLE_SPAN);
    }
    missing
}

// ---------------------------------------------------------------------------
// Global manager
// ---------------------------------------------------------------------------

#[cfg(target_os = "none")]
struct VmCell(core::cell::UnsafeCell<MemoryManager>);

// SAFETY: all post-boot access happens under VM_LOCK; `init` runs once
// before any other thread exists.
#[cfg(target_os = "none")]
unsafe impl Sync for VmCell {}

#[cfg(target_os = "none")]
static VM: VmCell = VmCell(core::cell::UnsafeCell::new(MemoryManager::new()));

#[cfg(target_os = "none")]
static VM_LOCK: crate::sync::RecursiveLock = crate::sync::RecursiveLock::new();

/// Allocate `count` mapped pages in `space` from the global manager.
pub fn alloc(space: Space, count: usize) -> Option<VirtAddr> {
    #[cfg(not(target_os = "none"))]
    {
        // The host build has no live page tables; unit tests drive
        // MemoryManager directly with a fake mapper.
        let _ = (space, count);
        None
    }
    #[cfg(target_os = "none")]
    {
        VM_LOCK.acquire();
        // SAFETY: VM_LOCK serializes every access to the manager.
        let vm = unsafe { &mut *VM.0.get() };
        let result = vm.alloc_in(&mut RecursiveMapper, space, count);
        VM_LOCK.release();
        result
    }
}

/// Allocate unmapped kernel physical frames from the global manager.
pub fn alloc_phys(count: usize) -> Option<PhysAddr> {
    #[cfg(not(target_os = "none"))]
    {
        let _ = count;
        None
    }
    #[cfg(target_os = "none")]
    {
        VM_LOCK.acquire();
        // SAFETY: VM_LOCK serializes every access to the manager.
        let vm = unsafe { &mut *VM.0.get() };
        let result = vm.alloc_phys(count);
        VM_LOCK.release();
        result
    }
}

// ---------------------------------------------------------------------------
// Bare-metal bring-up and the recursive mapper
// ---------------------------------------------------------------------------

/// The real mapper: reads and writes paging entries through the recursive
/// window. Usable only once paging is on with the self-referencing PDE in
/// place, which the loader guarantees before kernel entry.
#[cfg(target_os = "none")]
pub struct RecursiveMapper;

#[cfg(target_os = "none")]
impl PageMapper for RecursiveMapper {
    fn table_present(&self, va: VirtAddr) -> bool {
        // SAFETY: the PDE window is always mapped; reading an entry has no
        // side effects.
        let pde = unsafe {
            core::ptr::read_volatile(paging::pde_va(va).as_usize() as *const paging::Entry)
        };
        pde.is_present()
    }

    fn install_table(&mut self, va: VirtAddr, table: PhysAddr) {
        let pde = paging::pde_va(va).as_usize() as *mut paging::Entry;
        let window =
            (paging::PTE_WINDOW + (paging::pde_index(va) * PAGE_SIZE) as u32) as *mut u32;
        // SAFETY: the PDE window is always mapped. Once the PDE is
        // written, the new table becomes visible at `window`, where it is
        // zeroed before any PTE in it can be used.
        unsafe {
            core::ptr::write_volatile(
                pde,
                paging::Entry::new(table, EntryFlags::PRESENT | EntryFlags::WRITABLE),
            );
            for slot in 0..paging::ENTRY_COUNT {
                core::ptr::write_volatile(window.add(slot), 0);
            }
        }
    }

    fn map(&mut self, va: VirtAddr, frame: PhysAddr, flags: EntryFlags) {
        let pte = paging::pte_va(va).as_usize() as *mut paging::Entry;
        // SAFETY: install_table ran for this span (the allocator checks),
        // so the PTE window address is backed by a real table.
        unsafe { core::ptr::write_volatile(pte, paging::Entry::new(frame, flags)) };
    }
}

/// Translate a virtual address by walking the live paging structures.
#[cfg(target_os = "none")]
pub fn v2p(va: VirtAddr) -> Option<PhysAddr> {
    if !RecursiveMapper.table_present(va) {
        return None;
    }
    // SAFETY: the covering table exists, so the PTE window address is
    // backed; reading it has no side effects.
    let pte =
        unsafe { core::ptr::read_volatile(paging::pte_va(va).as_usize() as *const paging::Entry) };
    if !pte.is_present() {
        return None;
    }
    Some(PhysAddr::new(pte.frame().as_u32() | (va.as_u32() & 0xFFF)))
}

/// Discover physical memory, wire the four pools to their fixed bitmap
/// buffers, and pin the bootstrap mappings.
#[cfg(target_os = "none")]
pub fn init() {
    // SAFETY: boot flow, single-threaded, before any other VM access.
    let vm = unsafe { &mut *VM.0.get() };

    let (region_base, region_len) = {
        // SAFETY: the loader handoff at 0x0800 is still intact; the slice
        // dies at the end of this block, before the same scratch area is
        // recycled as bitmap storage below.
        let regions = unsafe { super::bootinfo::boot_regions() };
        super::bootinfo::largest_usable(regions).expect("no usable memory in the boot map")
    };
    let page_mask = PAGE_SIZE as u32 - 1;
    let start = (region_base.max(BOOTSTRAP_PHYS_END) + page_mask) & !page_mask;
    let region_end = u64::from(region_base) + u64::from(region_len);
    assert!(
        u64::from(start) < region_end,
        "usable memory ends inside the bootstrap area"
    );
    let len = (region_end - u64::from(start)) as u32;
    let kernel_len = (len / 2) & !page_mask;
    let user_len = (len - kernel_len) & !page_mask;

    // SAFETY: the loader reserves 0x0800..0x4800 for exactly these four
    // buffers; the E820 data that lived there was consumed above.
    let (kp_buf, kv_buf, up_buf, uv_buf) = unsafe {
        (
            core::slice::from_raw_parts_mut(KERNEL_PHYS_BITMAP as *mut u32, BITMAP_WORDS),
            core::slice::from_raw_parts_mut(KERNEL_VIRT_BITMAP as *mut u32, BITMAP_WORDS),
            core::slice::from_raw_parts_mut(USER_PHYS_BITMAP as *mut u32, BITMAP_WORDS),
            core::slice::from_raw_parts_mut(USER_VIRT_BITMAP as *mut u32, BITMAP_WORDS),
        )
    };

    vm.kernel_phys.reset(kp_buf, start, kernel_len as usize);
    vm.user_phys
        .reset(up_buf, start + kernel_len, user_len as usize);
    vm.kernel_virt
        .reset(kv_buf, KERNEL_VIRT_BASE, KERNEL_VIRT_SPAN as usize);
    vm.user_virt
        .reset(uv_buf, USER_VIRT_BASE, USER_VIRT_SPAN as usize);

    // The loader maps the first 4 MiB span at the kernel base (and
    // identity-maps low memory, which sits below our physical pools by
    // construction). Pin those virtual pages so nothing lands on them.
    vm.kernel_virt
        .reserve(KERNEL_VIRT_BASE, paging::TABLE_SPAN as usize / PAGE_SIZE);

    log::info!(
        target: "mm",
        "phys {:#010x}..{:#010x}: {} kernel + {} user pages",
        start,
        u64::from(start) + u64::from(kernel_len) + u64::from(user_len),
        vm.kernel_phys.free_page_count(),
        vm.user_phys.free_page_count(),
    );
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;
    use std::boxed::Box;
    use std::collections::BTreeSet;
    use std::vec;
    use std::vec::Vec;

    /// Records installs and mappings instead of touching page tables.
    struct FakeMapper {
        tables: BTreeSet<u32>,
        mappings: Vec<(u32, u32, EntryFlags)>,
    }

    impl FakeMapper {
        fn new() -> FakeMapper {
            FakeMapper {
                tables: BTreeSet::new(),
                mappings: Vec::new(),
            }
        }
    }

    impl PageMapper for FakeMapper {
        fn table_present(&self, va: VirtAddr) -> bool {
            self.tables.contains(&paging::span_base(va).as_u32())
        }

        fn install_table(&mut self, va: VirtAddr, _table: PhysAddr) {
            self.tables.insert(paging::span_base(va).as_u32());
        }

        fn map(&mut self, va: VirtAddr, frame: PhysAddr, flags: EntryFlags) {
            self.mappings.push((va.as_u32(), frame.as_u32(), flags));
        }
    }

    fn words(n: usize) -> &'static mut [u32] {
        Box::leak(vec![0u32; n].into_boxed_slice())
    }

    /// A manager with `kernel_phys_pages` kernel frames, 64 user frames,
    /// and 1024-page virtual pools on the architectural bases.
    fn manager(kernel_phys_pages: usize) -> MemoryManager {
        let mut vm = MemoryManager::new();
        vm.kernel_phys
            .reset(words(32), 0x0040_0000, kernel_phys_pages * PAGE_SIZE);
        vm.user_phys.reset(words(2), 0x0400_0000, 64 * PAGE_SIZE);
        vm.kernel_virt
            .reset(words(32), KERNEL_VIRT_BASE, 1024 * PAGE_SIZE);
        vm.user_virt
            .reset(words(32), USER_VIRT_BASE, 1024 * PAGE_SIZE);
        vm
    }

    #[test]
    fn kernel_alloc_maps_every_page_writable() {
        let mut vm = manager(64);
        let mut mapper = FakeMapper::new();
        let va = vm
            .alloc_in(&mut mapper, Space::Kernel, 4)
            .expect("4 pages from a 64-frame pool");
        assert_eq!(va.as_u32(), KERNEL_VIRT_BASE);
        assert_eq!(mapper.mappings.len(), 4);
        // One fresh table covers the whole run; the data frames were
        // taken first, so they sit at the pool base contiguously.
        assert_eq!(mapper.tables.len(), 1);
        for (index, (page, frame, flags)) in mapper.mappings.iter().enumerate() {
            assert_eq!(*page, KERNEL_VIRT_BASE + (index * PAGE_SIZE) as u32);
            assert_eq!(*frame, 0x0040_0000 + (index * PAGE_SIZE) as u32);
            assert!(flags.contains(EntryFlags::PRESENT | EntryFlags::WRITABLE));
            assert!(!flags.contains(EntryFlags::USER));
        }
        // 4 data frames + 1 page-table frame left the kernel pool.
        assert_eq!(vm.free_phys_pages(Space::Kernel), 64 - 5);
        assert_eq!(vm.free_virt_pages(Space::Kernel), 1024 - 4);
    }

    #[test]
    fn phys_shortage_rolls_back_the_virtual_reservation() {
        let mut vm = manager(2);
        let mut mapper = FakeMapper::new();
        let virt_before = vm.free_virt_pages(Space::Kernel);
        let phys_before = vm.free_phys_pages(Space::Kernel);

        assert_eq!(vm.alloc_in(&mut mapper, Space::Kernel, 4), None);

        assert_eq!(vm.free_virt_pages(Space::Kernel), virt_before);
        assert_eq!(vm.free_phys_pages(Space::Kernel), phys_before);
        assert!(mapper.mappings.is_empty());
        assert!(mapper.tables.is_empty());
    }

    #[test]
    fn table_frames_count_against_the_shortage_check() {
        // 4 frames free, 4 requested: the run also needs a page table, so
        // the request must fail and leave everything untouched.
        let mut vm = manager(4);
        let mut mapper = FakeMapper::new();
        assert_eq!(vm.alloc_in(&mut mapper, Space::Kernel, 4), None);
        assert_eq!(vm.free_phys_pages(Space::Kernel), 4);
        assert_eq!(vm.free_virt_pages(Space::Kernel), 1024);
    }

    #[test]
    fn present_tables_are_not_recounted() {
        let mut vm = manager(64);
        let mut mapper = FakeMapper::new();
        vm.alloc_in(&mut mapper, Space::Kernel, 2)
            .expect("first run");
        let tables_after_first = mapper.tables.len();
        vm.alloc_in(&mut mapper, Space::Kernel, 2)
            .expect("second run in the same 4 MiB span");
        assert_eq!(mapper.tables.len(), tables_after_first);
    }

    #[test]
    fn user_alloc_sets_the_user_bit_and_borrows_kernel_tables() {
        let mut vm = manager(64);
        let mut mapper = FakeMapper::new();
        let kernel_before = vm.free_phys_pages(Space::Kernel);
        let va = vm
            .alloc_in(&mut mapper, Space::User, 3)
            .expect("3 user pages");
        assert_eq!(va.as_u32(), USER_VIRT_BASE);
        for (_, _, flags) in &mapper.mappings {
            assert!(flags.contains(EntryFlags::USER));
        }
        // Data frames came from the user pool, the table frame from the
        // kernel pool.
        assert_eq!(vm.free_phys_pages(Space::User), 64 - 3);
        assert_eq!(vm.free_phys_pages(Space::Kernel), kernel_before - 1);
    }

    #[test]
    fn user_phys_shortage_also_rolls_back() {
        let mut vm = manager(64);
        let mut mapper = FakeMapper::new();
        let virt_before = vm.free_virt_pages(Space::User);
        assert_eq!(vm.alloc_in(&mut mapper, Space::User, 65), None);
        assert_eq!(vm.free_virt_pages(Space::User), virt_before);
        assert_eq!(vm.free_phys_pages(Space::User), 64);
    }

    #[test]
    fn spans_crossing_a_table_boundary_need_two_tables() {
        let mapper = FakeMapper::new();
        // 1024 pages per table: a 3-page run starting 2 pages below the
        // boundary touches two spans.
        let va = VirtAddr::new(KERNEL_VIRT_BASE + paging::TABLE_SPAN - 2 * PAGE_SIZE as u32);
        assert_eq!(missing_tables(&mapper, va, 3), 2);
        assert_eq!(missing_tables(&mapper, va, 2), 1);
    }

    #[test]
    fn zero_page_requests_are_refused() {
        let mut vm = manager(64);
        let mut mapper = FakeMapper::new();
        assert_eq!(vm.alloc_in(&mut mapper, Space::Kernel, 0), None);
    }
}
