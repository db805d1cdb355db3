//! 32-bit paging structures and the recursive-mapping address math.
//!
//! The page directory's last entry points at the directory's own frame.
//! That self-reference is what makes every paging structure addressable in
//! virtual space once paging is on: the directory appears at
//! [`PDE_WINDOW`] and the 1024 page tables appear consecutively from
//! [`PTE_WINDOW`]. It is the only mechanism the kernel uses to reach PDEs
//! and PTEs; no physical address is ever dereferenced after boot.

use bitflags::bitflags;

use super::{PhysAddr, VirtAddr, PAGE_SIZE};

/// Entries per page directory or page table.
pub const ENTRY_COUNT: usize = 1024;

/// Virtual span covered by one page-directory entry (4 MiB).
pub const TABLE_SPAN: u32 = (ENTRY_COUNT * PAGE_SIZE) as u32;

/// Index of the self-referencing directory entry.
pub const SELF_REF_INDEX: usize = ENTRY_COUNT - 1;

/// Where the page directory itself is visible through the self-reference.
pub const PDE_WINDOW: u32 = 0xFFFF_F000;

/// Where the page-table array is visible through the self-reference.
pub const PTE_WINDOW: u32 = 0xFFC0_0000;

const FRAME_MASK: u32 = 0xFFFF_F000;

bitflags! {
    /// Bit fields shared by page-directory and page-table entries.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EntryFlags: u32 {
        const PRESENT = 1 << 0;
        const WRITABLE = 1 << 1;
        const USER = 1 << 2;
        const WRITE_THROUGH = 1 << 3;
        const NO_CACHE = 1 << 4;
        const ACCESSED = 1 << 5;
        /// Dirty on a PTE; page-size on a PDE when CR4.PSE is set.
        const DIRTY = 1 << 6;
        const PAT = 1 << 7;
        const GLOBAL = 1 << 8;
    }
}

/// One 32-bit PDE or PTE: a 20-bit frame number plus the flag bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct Entry(u32);

impl Entry {
    pub const fn empty() -> Entry {
        Entry(0)
    }

    pub fn new(frame: PhysAddr, flags: EntryFlags) -> Entry {
        assert!(
            frame.as_u32() & !FRAME_MASK == 0,
            "entry frame must be page-aligned"
        );
        Entry(frame.as_u32() | flags.bits())
    }

    pub fn is_present(self) -> bool {
        self.flags().contains(EntryFlags::PRESENT)
    }

    pub fn flags(self) -> EntryFlags {
        EntryFlags::from_bits_truncate(self.0)
    }

    pub fn frame(self) -> PhysAddr {
        PhysAddr::new(self.0 & FRAME_MASK)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }
}

/// Directory slot covering `va`.
pub fn pde_index(va: VirtAddr) -> usize {
    (va.as_u32() >> 22) as usize
}

/// Table slot covering `va` within its table.
pub fn pte_index(va: VirtAddr) -> usize {
    ((va.as_u32() >> 12) & 0x3FF) as usize
}

/// Base of the 4 MiB span containing `va`.
pub fn span_base(va: VirtAddr) -> VirtAddr {
    VirtAddr::new(va.as_u32() & !(TABLE_SPAN - 1))
}

/// Virtual address of the PDE covering `va`, through the self-reference.
pub fn pde_va(va: VirtAddr) -> VirtAddr {
    VirtAddr::new(PDE_WINDOW + (pde_index(va) as u32) * 4)
}

/// Virtual address of the PTE covering `va`, through the self-reference.
pub fn pte_va(va: VirtAddr) -> VirtAddr {
    let raw = va.as_u32();
    VirtAddr::new(PTE_WINDOW + ((raw & 0xFFC0_0000) >> 10) + ((raw & 0x003F_F000) >> 10))
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn entry_packs_frame_and_flags() {
        let entry = Entry::new(
            PhysAddr::new(0x0012_3000),
            EntryFlags::PRESENT | EntryFlags::WRITABLE,
        );
        assert!(entry.is_present());
        assert_eq!(entry.frame().as_u32(), 0x0012_3000);
        assert_eq!(entry.raw(), 0x0012_3003);
        assert!(!entry.flags().contains(EntryFlags::USER));
        assert!(!Entry::empty().is_present());
    }

    #[test]
    fn index_math_splits_the_address() {
        let va = VirtAddr::new(0xC07F_3123);
        assert_eq!(pde_index(va), 0x301);
        assert_eq!(pte_index(va), 0x3F3);
        assert_eq!(span_base(va).as_u32(), 0xC040_0000);
    }

    #[test]
    fn pde_window_address() {
        assert_eq!(pde_va(VirtAddr::new(0)).as_u32(), 0xFFFF_F000);
        assert_eq!(pde_va(VirtAddr::new(0xC000_0000)).as_u32(), 0xFFFF_FC00);
        assert_eq!(
            pde_va(VirtAddr::new(0xFFC0_0000)).as_u32(),
            0xFFFF_FFFC,
            "the self-reference slot is the last directory entry"
        );
    }

    #[test]
    fn pte_window_address() {
        assert_eq!(pte_va(VirtAddr::new(0)).as_u32(), 0xFFC0_0000);
        assert_eq!(pte_va(VirtAddr::new(0xC000_0000)).as_u32(), 0xFFF0_0000);
        assert_eq!(pte_va(VirtAddr::new(0xC000_1000)).as_u32(), 0xFFF0_0004);
        // Entry addresses advance by 4 per page and by 4096 per 4 MiB span.
        assert_eq!(pte_va(VirtAddr::new(0x0040_0000)).as_u32(), 0xFFC0_1000);
    }
}
