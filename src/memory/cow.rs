//! Fork/COW engine: clones an address space by sharing frames read-only and
//! deferring the copy until either side writes.

use crate::memory::address_space::AddressSpace;
use crate::memory::error::MemResult;
use crate::memory::frame::PFA;
use crate::memory::pte::PteFlags;
use crate::memory::region::RegionFlags;

/// Clone `src` into `dst` (assumed freshly created, empty). Every mapped
/// user page in `src` gets the COW bit set and the write bit cleared in
/// both address spaces and its frame refcount bumped; kernel mappings and
/// read-only file-backed mappings are shared without COW since neither
/// side can observe a private write to them.
///
/// Invariant established: afterward both ASes see identical user memory
/// contents and every shared frame has refcount >= 2.
pub fn clone_cow(dst: &mut AddressSpace, src: &mut AddressSpace) -> MemResult<()> {
    for region in src.regions() {
        dst.add_region(region.start, region.length, region.flags, region.file)?;
    }

    let shared_readonly_file = |flags: RegionFlags| flags.contains(RegionFlags::FILE) && !flags.contains(RegionFlags::WRITABLE);

    for region in src.regions() {
        if shared_readonly_file(region.flags) {
            // Share the same frames without COW: neither side can write
            // through this mapping, so there's nothing to copy-on-write.
            let mut vaddr = region.start;
            while vaddr < region.end() {
                if let Some(paddr) = src.translate(vaddr) {
                    let frame = crate::memory::frame::Frame::from_addr(paddr);
                    if let Some(flags) = src.pte_flags(vaddr) {
                        PFA.lock().inc_ref(frame);
                        dst.map_page(vaddr, frame, flags)?;
                    }
                }
                vaddr += crate::config::PAGE_SIZE as u64;
            }
            continue;
        }

        let mut vaddr = region.start;
        while vaddr < region.end() {
            if let Some(paddr) = src.translate(vaddr) {
                let frame = crate::memory::frame::Frame::from_addr(paddr);
                if let Some(flags) = src.pte_flags(vaddr) {
                    let cow_flags = (flags | PteFlags::COW) & !PteFlags::WRITABLE;
                    PFA.lock().inc_ref(frame);
                    dst.map_page(vaddr, frame, cow_flags)?;
                    src.set_pte_flags(vaddr, cow_flags);
                }
            }
            vaddr += crate::config::PAGE_SIZE as u64;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::address_space::{AddressSpace, FaultAccess};

    #[test]
    fn clone_cow_shares_frames_with_refcount_two() {
        PFA.lock().add_region(0, 4096 * 16);
        let mut parent = AddressSpace::create(1);
        parent
            .add_region(0x1000_0000, 4096, RegionFlags::ANON | RegionFlags::WRITABLE | RegionFlags::USER, None)
            .unwrap();
        parent
            .handle_fault(0x1000_0000, FaultAccess { write: true, user: true, present: false }, &[])
            .unwrap();

        let mut child = AddressSpace::create(2);
        clone_cow(&mut child, &mut parent).unwrap();

        let paddr = parent.translate(0x1000_0000).unwrap();
        let frame = crate::memory::frame::Frame::from_addr(paddr);
        assert!(PFA.lock().refcount(frame) >= 2);
        assert_eq!(child.translate(0x1000_0000), Some(paddr));
        assert!(!parent.pte_flags(0x1000_0000).unwrap().contains(PteFlags::WRITABLE));
    }
}
