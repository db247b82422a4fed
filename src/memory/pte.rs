//! Software page-table-entry model.
//!
//! Grounded on `oro-mem`'s `no_std`-but-host-testable split: the policy
//! layer (W^X enforcement, COW bookkeeping, fault resolution) is expressed
//! here over a plain `BTreeMap<Vpn, Pte>` per `AddressSpace` rather than by
//! walking real 4-level hardware page tables. The x86_64 table format that
//! `arch::x86_64::contract::switch_aspace` ultimately installs is built from
//! this map only at the point a CPU actually needs to run the address
//! space — see `memory::address_space::AddressSpace::materialize` — so the
//! scheduler/VMM policy is exercisable on the host without a hardware MMU.

use bitflags::bitflags;

use crate::memory::frame::Frame;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Vpn(pub u64);

impl Vpn {
    pub fn from_vaddr(vaddr: u64) -> Self {
        Vpn(vaddr / crate::config::PAGE_SIZE as u64)
    }

    pub fn vaddr(self) -> u64 {
        self.0 * crate::config::PAGE_SIZE as u64
    }
}

bitflags! {
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    pub struct PteFlags: u32 {
        const PRESENT  = 1 << 0;
        const WRITABLE = 1 << 1;
        const USER     = 1 << 2;
        const NX       = 1 << 3;
        const COW      = 1 << 4;
        const DIRTY    = 1 << 5;
    }
}

impl PteFlags {
    /// The W^X invariant held on every installed PTE: never both writable
    /// and executable (absence of `NX` means executable here).
    pub fn wx_safe(self) -> Self {
        if self.contains(PteFlags::WRITABLE) {
            self | PteFlags::NX
        } else {
            self
        }
    }

    pub fn is_executable(self) -> bool {
        !self.contains(PteFlags::NX)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pte {
    pub frame: Frame,
    pub flags: PteFlags,
}

impl Pte {
    pub fn new(frame: Frame, flags: PteFlags) -> Self {
        Self { frame, flags: flags.wx_safe() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wx_safe_clears_exec_when_writable() {
        let f = PteFlags::PRESENT | PteFlags::WRITABLE;
        assert!(!f.wx_safe().is_executable());
    }

    #[test]
    fn read_only_keeps_exec_bit() {
        let f = PteFlags::PRESENT;
        assert!(f.wx_safe().is_executable());
    }
}
