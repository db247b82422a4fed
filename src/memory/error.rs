//! Error taxonomy for the memory subsystem. Hand-rolled `Display` rather
//! than `thiserror`, since `std`-oriented derive crates don't fit a
//! `no_std` kernel; follows the same pattern as `memory/virt.rs`'s `VmErr`.

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemError {
    /// PFA exhausted. Fatal for the fault path: the caller terminates the
    /// faulting thread with an OOM signal rather than retrying.
    OutOfMemory,
    /// Faulting address is unmapped, or the access type exceeds the
    /// containing region's permissions.
    InvalidRegion,
    /// `add_region` target overlaps an existing region.
    RegionOverlap,
    /// Virtual address or length isn't page-aligned.
    Misaligned,
    /// Mapping address 0, or any other reserved range.
    ReservedAddress,
    /// `map_page`/`protect` would produce a writable+executable PTE.
    WxViolation,
    /// No region, or no PTE, at the queried address.
    NotMapped,
    /// `free_page` on a frame whose refcount != 1.
    FrameInUse,
    /// A TLB shootdown IPI was not acknowledged within the configured bound.
    /// Surfaced as a panic: an unacknowledged shootdown is a kernel
    /// invariant violation, not a recoverable condition.
    IpiLost,
}

impl fmt::Display for MemError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MemError::OutOfMemory => "out of memory",
            MemError::InvalidRegion => "invalid region or permission mismatch",
            MemError::RegionOverlap => "region overlaps an existing mapping",
            MemError::Misaligned => "address or length not page-aligned",
            MemError::ReservedAddress => "address is reserved",
            MemError::WxViolation => "mapping would be writable and executable",
            MemError::NotMapped => "address is not mapped",
            MemError::FrameInUse => "frame still referenced",
            MemError::IpiLost => "tlb shootdown IPI not acknowledged in time",
        };
        f.write_str(s)
    }
}

pub type MemResult<T> = Result<T, MemError>;
