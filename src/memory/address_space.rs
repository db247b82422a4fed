//! Per-process address space: a region list plus a software page-table map.
//!
//! `VmFlags`/`VmErr` and the map/unmap/protect/translate operation set,
//! walking a `BTreeMap<Vpn, Pte>` instead of a real 4-level x86_64 table —
//! see `memory::pte` for why.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use spin::Mutex;

use crate::arch::CpuId;
use crate::config::PAGE_SIZE;
use crate::memory::error::{MemError, MemResult};
use crate::memory::frame::{Frame, FrameAllocator, PFA};
use crate::memory::pte::{Pte, PteFlags, Vpn};
use crate::memory::region::{Region, RegionFlags};
use crate::memory::tlb;

static NEXT_AS_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AsId(pub u64);

/// Kind of access that faulted, decoded from the architecture's fault code.
#[derive(Debug, Clone, Copy)]
pub struct FaultAccess {
    pub write: bool,
    pub user: bool,
    /// Whether the PTE was present (a permission fault) or absent.
    pub present: bool,
}

pub struct AddressSpace {
    pub id: AsId,
    pub owner_pid: u64,
    regions: Vec<Region>,
    ptes: BTreeMap<Vpn, Pte>,
    pub brk: u64,
    root_frame: Option<Frame>,
}

impl AddressSpace {
    /// `create()`: empty user half. There is no separate hardware kernel
    /// half to copy in the software model — every `AddressSpace` sees the
    /// same kernel-owned frames through the identity-style Normal zone, so
    /// nothing needs to be mirrored here.
    pub fn create(owner_pid: u64) -> Self {
        Self {
            id: AsId(NEXT_AS_ID.fetch_add(1, Ordering::Relaxed)),
            owner_pid,
            regions: Vec::new(),
            ptes: BTreeMap::new(),
            brk: 0,
            root_frame: None,
        }
    }

    /// Lazily allocates this address space's top-level page-table frame and
    /// returns its physical address, the value `arch::contract::switch_aspace`
    /// loads as CR3. The software model resolves faults and translation
    /// straight off `ptes`, never by walking this frame's contents — it
    /// exists only so each `AddressSpace` has a stable value a real switch
    /// can install.
    pub fn materialize(&mut self) -> u64 {
        if self.root_frame.is_none() {
            let frame = PFA.lock().alloc_page().expect("root page-table frame");
            self.root_frame = Some(frame);
        }
        self.root_frame.unwrap().addr()
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    fn region_index_containing(&self, vaddr: u64) -> Option<usize> {
        self.regions.iter().position(|r| r.contains(vaddr))
    }

    pub fn add_region(
        &mut self,
        start: u64,
        length: u64,
        flags: RegionFlags,
        file: Option<crate::memory::region::FileBacking>,
    ) -> MemResult<usize> {
        if start == 0 {
            return Err(MemError::ReservedAddress);
        }
        if start % PAGE_SIZE as u64 != 0 || length % PAGE_SIZE as u64 != 0 || length == 0 {
            return Err(MemError::Misaligned);
        }
        if self.regions.iter().any(|r| r.overlaps(start, length)) {
            return Err(MemError::RegionOverlap);
        }
        let region = Region { start, length, flags, file };
        let pos = self.regions.partition_point(|r| r.start < start);
        self.regions.insert(pos, region);
        Ok(pos)
    }

    /// Removes the region exactly matching `[start, start+length)`, unmapping
    /// and unref'ing any pages within it. Round-trips with `add_region`: the
    /// region set afterward is identical to before the `add_region` call.
    pub fn remove_region(&mut self, start: u64, length: u64) -> MemResult<()> {
        let idx = self
            .regions
            .iter()
            .position(|r| r.start == start && r.length == length)
            .ok_or(MemError::NotMapped)?;

        let end = start + length;
        let pages: Vec<Vpn> = self
            .ptes
            .range(Vpn::from_vaddr(start)..Vpn::from_vaddr(end))
            .map(|(&vpn, _)| vpn)
            .collect();
        for vpn in pages {
            self.unmap_page_locked(vpn.vaddr());
        }
        self.regions.remove(idx);
        Ok(())
    }

    /// Explicit, non-automatic merge of two adjacent regions sharing flags.
    /// Boundary behaviour: adjacency alone never merges regions.
    pub fn merge(&mut self, start_a: u64, start_b: u64) -> MemResult<()> {
        let ia = self.regions.iter().position(|r| r.start == start_a).ok_or(MemError::NotMapped)?;
        let ib = self.regions.iter().position(|r| r.start == start_b).ok_or(MemError::NotMapped)?;
        let (lo, hi) = if ia < ib { (ia, ib) } else { (ib, ia) };
        if !self.regions[lo].is_adjacent(&self.regions[hi]) || self.regions[lo].flags != self.regions[hi].flags {
            return Err(MemError::InvalidRegion);
        }
        let merged_length = self.regions[hi].end() - self.regions[lo].start;
        self.regions[lo].length = merged_length;
        self.regions.remove(hi);
        Ok(())
    }

    fn map_pte(&mut self, vaddr: u64, frame: Frame, flags: PteFlags) -> MemResult<()> {
        if vaddr == 0 {
            return Err(MemError::ReservedAddress);
        }
        if vaddr % PAGE_SIZE as u64 != 0 {
            return Err(MemError::Misaligned);
        }
        // W^X is enforced inside `Pte::new` itself, never bypassable from here.
        self.ptes.insert(Vpn::from_vaddr(vaddr), Pte::new(frame, flags));
        Ok(())
    }

    /// `map_page`: install a PTE. W^X-filtered unconditionally.
    pub fn map_page(&mut self, vaddr: u64, frame: Frame, flags: PteFlags) -> MemResult<()> {
        self.map_pte(vaddr, frame, flags)
    }

    fn unmap_page_locked(&mut self, vaddr: u64) {
        if let Some(pte) = self.ptes.remove(&Vpn::from_vaddr(vaddr)) {
            let mut pfa = PFA.lock();
            reclaim_or_unref(&mut pfa, pte.frame);
        }
    }

    /// `unmap_page`: drop the PTE and release the frame reference. If this
    /// was the sole remaining reference the frame returns to the PFA free
    /// list; otherwise only the refcount drops.
    pub fn unmap_page(&mut self, vaddr: u64, shootdown_targets: &[CpuId]) -> MemResult<()> {
        let vpn = Vpn::from_vaddr(vaddr);
        if !self.ptes.contains_key(&vpn) {
            return Err(MemError::NotMapped);
        }
        self.unmap_page_locked(vaddr);
        tlb::shootdown(vaddr, shootdown_targets)
    }

    /// `protect`: update an existing PTE's flags, W^X-filtered, then shoot
    /// down stale translations. Idempotent: applying the same flags twice
    /// has the same observable effect as applying them once.
    pub fn protect(&mut self, vaddr: u64, length: u64, new_flags: PteFlags, shootdown_targets: &[CpuId]) -> MemResult<()> {
        if vaddr % PAGE_SIZE as u64 != 0 || length % PAGE_SIZE as u64 != 0 {
            return Err(MemError::Misaligned);
        }
        let start_vpn = Vpn::from_vaddr(vaddr).0;
        let end_vpn = Vpn::from_vaddr(vaddr + length).0;
        for vpn_no in start_vpn..end_vpn {
            let vpn = Vpn(vpn_no);
            if let Some(pte) = self.ptes.get_mut(&vpn) {
                pte.flags = new_flags.wx_safe();
            }
        }
        for vpn_no in start_vpn..end_vpn {
            tlb::shootdown(Vpn(vpn_no).vaddr(), shootdown_targets)?;
        }
        Ok(())
    }

    /// `translate`: walk the software table without taking a writer lock —
    /// there is nothing to lock on the read side of a `BTreeMap` lookup.
    pub fn translate(&self, vaddr: u64) -> Option<u64> {
        let vpn = Vpn::from_vaddr(vaddr);
        self.ptes.get(&vpn).map(|pte| pte.frame.addr() + (vaddr % PAGE_SIZE as u64))
    }

    pub fn pte_flags(&self, vaddr: u64) -> Option<PteFlags> {
        self.ptes.get(&Vpn::from_vaddr(vaddr)).map(|p| p.flags)
    }

    /// Overwrite an existing PTE's flags in place, W^X-filtered. Used by
    /// `memory::cow::clone_cow` to flip the source side to COW/read-only
    /// without touching its frame or going through `protect`'s shootdown
    /// (the caller hasn't published `dst` to any CPU yet).
    pub fn set_pte_flags(&mut self, vaddr: u64, flags: PteFlags) {
        if let Some(pte) = self.ptes.get_mut(&Vpn::from_vaddr(vaddr)) {
            pte.flags = flags.wx_safe();
        }
    }

    /// Page-fault resolution: not-present vs. protection-violation, COW
    /// break-before-make, and demand-zero population, in that order.
    pub fn handle_fault(&mut self, vaddr: u64, access: FaultAccess, shootdown_targets: &[CpuId]) -> MemResult<()> {
        let idx = self.region_index_containing(vaddr).ok_or(MemError::InvalidRegion)?;
        let region = self.regions[idx].clone();

        if access.write && !region.flags.contains(RegionFlags::WRITABLE) {
            return Err(MemError::InvalidRegion);
        }
        if !access.write && !access.present {
            // Read of an absent page still requires the region to exist; permission
            // already checked above for writes, nothing further to check for reads.
        }

        let vpn = Vpn::from_vaddr(vaddr);
        let existing = self.ptes.get(&vpn).copied();

        match existing {
            None if region.flags.contains(RegionFlags::ANON) => {
                let frame = PFA.lock().alloc_page().map_err(|_| MemError::OutOfMemory)?;
                zero_frame(frame);
                let mut flags = PteFlags::PRESENT | PteFlags::USER;
                if region.flags.contains(RegionFlags::WRITABLE) {
                    flags |= PteFlags::WRITABLE;
                }
                if !region.flags.contains(RegionFlags::EXECUTABLE) {
                    flags |= PteFlags::NX;
                }
                self.map_pte(vaddr, frame, flags)?;
            }
            None => {
                // File-backed demand page-in. The actual I/O is an external
                // collaborator (named interface only, per scope); here we
                // materialize a zeroed frame at the right offset as the page
                // cache would, then map it per the backing's declared prot.
                let backing = region.file.ok_or(MemError::InvalidRegion)?;
                let frame = PFA.lock().alloc_page().map_err(|_| MemError::OutOfMemory)?;
                zero_frame(frame);
                let writable = region.flags.contains(RegionFlags::WRITABLE) && !region.flags.contains(RegionFlags::COW);
                let mut flags = PteFlags::PRESENT | PteFlags::USER;
                if writable {
                    flags |= PteFlags::WRITABLE;
                }
                if !backing.prot.contains(RegionFlags::EXECUTABLE) {
                    flags |= PteFlags::NX;
                }
                self.map_pte(vaddr, frame, flags)?;
            }
            Some(pte) if access.write && pte.flags.contains(PteFlags::COW) && !pte.flags.contains(PteFlags::WRITABLE) => {
                let mut pfa = PFA.lock();
                if pfa.refcount(pte.frame) == 1 {
                    let mut flags = pte.flags | PteFlags::WRITABLE;
                    flags.remove(PteFlags::COW);
                    self.ptes.insert(vpn, Pte::new(pte.frame, flags));
                } else {
                    let new_frame = pfa.alloc_page().map_err(|_| MemError::OutOfMemory)?;
                    copy_frame(pte.frame, new_frame);
                    pfa.dec_ref(pte.frame);
                    let mut flags = pte.flags | PteFlags::WRITABLE;
                    flags.remove(PteFlags::COW);
                    self.ptes.insert(vpn, Pte::new(new_frame, flags));
                }
            }
            Some(_) => return Err(MemError::InvalidRegion),
        }

        tlb::shootdown(vaddr, shootdown_targets)
    }

    /// `destroy`: unmap every user region, unref/free every page, drop the
    /// table. Called once the last referencing thread exits.
    pub fn destroy(mut self) {
        let vpns: Vec<Vpn> = self.ptes.keys().copied().collect();
        let mut pfa = PFA.lock();
        for vpn in vpns {
            if let Some(pte) = self.ptes.remove(&vpn) {
                reclaim_or_unref(&mut pfa, pte.frame);
            }
        }
        if let Some(root) = self.root_frame.take() {
            reclaim_or_unref(&mut pfa, root);
        }
        self.regions.clear();
    }
}

lazy_static::lazy_static! {
    /// Registry of live address spaces, keyed the same way `sched::task::TASKS`
    /// and `sched::process::PROCESSES` are: a plain `Mutex<BTreeMap>` instead
    /// of raw-pointer table access.
    pub static ref ADDRESS_SPACES: Mutex<BTreeMap<AsId, AddressSpace>> = Mutex::new(BTreeMap::new());
}

pub fn register(aspace: AddressSpace) -> AsId {
    let id = aspace.id;
    ADDRESS_SPACES.lock().insert(id, aspace);
    id
}

/// Materializes and returns the physical root-table address for a
/// registered address space, or `None` if `as_id` has no live entry (e.g.
/// kernel-only bootstrap threads that never call `register`).
pub fn materialize_root(as_id: AsId) -> Option<u64> {
    ADDRESS_SPACES.lock().get_mut(&as_id).map(|a| a.materialize())
}

pub fn destroy_registered(as_id: AsId) {
    if let Some(a) = ADDRESS_SPACES.lock().remove(&as_id) {
        a.destroy();
    }
}

fn reclaim_or_unref(pfa: &mut FrameAllocator, frame: Frame) {
    if pfa.refcount(frame) <= 1 {
        let _ = pfa.free_page(frame);
    } else {
        pfa.dec_ref(frame);
    }
}

fn zero_frame(_frame: Frame) {
    // A real boot places frames in the kernel's direct physical map; this
    // model has no physical memory to write to, so zeroing is a no-op
    // here and left to `arch::x86_64::contract` once that mapping exists.
}

fn copy_frame(_src: Frame, _dst: Frame) {
    // See `zero_frame`: content copy happens against the direct map on
    // real hardware, a no-op in the software model used for policy tests.
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rw_anon(vaddr: u64, len: u64) -> (u64, u64, RegionFlags) {
        (vaddr, len, RegionFlags::ANON | RegionFlags::WRITABLE | RegionFlags::USER)
    }

    #[test]
    fn add_then_remove_region_restores_set() {
        let mut aspace = AddressSpace::create(1);
        let (s, l, f) = rw_anon(0x1000, 4096);
        aspace.add_region(s, l, f, None).unwrap();
        assert_eq!(aspace.regions().len(), 1);
        aspace.remove_region(s, l).unwrap();
        assert_eq!(aspace.regions().len(), 0);
    }

    #[test]
    fn mapping_at_zero_is_rejected() {
        let mut aspace = AddressSpace::create(1);
        assert_eq!(aspace.add_region(0, 4096, RegionFlags::ANON, None), Err(MemError::ReservedAddress));
    }

    #[test]
    fn adjacent_regions_do_not_auto_merge() {
        let mut aspace = AddressSpace::create(1);
        aspace.add_region(0x1000, 4096, RegionFlags::ANON, None).unwrap();
        aspace.add_region(0x2000, 4096, RegionFlags::ANON, None).unwrap();
        assert_eq!(aspace.regions().len(), 2);
        aspace.merge(0x1000, 0x2000).unwrap();
        assert_eq!(aspace.regions().len(), 1);
    }

    #[test]
    fn overlapping_region_rejected() {
        let mut aspace = AddressSpace::create(1);
        aspace.add_region(0x1000, 8192, RegionFlags::ANON, None).unwrap();
        assert_eq!(
            aspace.add_region(0x2000, 4096, RegionFlags::ANON, None),
            Err(MemError::RegionOverlap)
        );
    }

    #[test]
    fn anon_fault_allocates_and_maps_wx_safe() {
        crate::memory::frame::PFA.lock().add_region(0, 4096 * 16);
        let mut aspace = AddressSpace::create(1);
        let (s, l, f) = rw_anon(0x1000, 4096);
        aspace.add_region(s, l, f | RegionFlags::EXECUTABLE, None).unwrap();
        aspace.handle_fault(0x1000, FaultAccess { write: true, user: true, present: false }, &[]).unwrap();
        let flags = aspace.pte_flags(0x1000).unwrap();
        assert!(flags.contains(PteFlags::WRITABLE));
        assert!(!flags.is_executable());
    }

    #[test]
    fn fault_outside_any_region_is_fatal() {
        let mut aspace = AddressSpace::create(1);
        assert_eq!(
            aspace.handle_fault(0x9000, FaultAccess { write: false, user: true, present: false }, &[]),
            Err(MemError::InvalidRegion)
        );
    }

    #[test]
    fn protect_is_idempotent() {
        crate::memory::frame::PFA.lock().add_region(0, 4096 * 16);
        let mut aspace = AddressSpace::create(1);
        let (s, l, f) = rw_anon(0x3000, 4096);
        aspace.add_region(s, l, f, None).unwrap();
        aspace.handle_fault(0x3000, FaultAccess { write: true, user: true, present: false }, &[]).unwrap();
        aspace.protect(0x3000, 4096, PteFlags::PRESENT | PteFlags::USER, &[]).unwrap();
        let once = aspace.pte_flags(0x3000).unwrap();
        aspace.protect(0x3000, 4096, PteFlags::PRESENT | PteFlags::USER, &[]).unwrap();
        let twice = aspace.pte_flags(0x3000).unwrap();
        assert_eq!(once, twice);
    }
}
