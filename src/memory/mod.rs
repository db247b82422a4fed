//! Virtual Memory Manager: physical frame allocation, per-process address
//! spaces, fork/COW, and TLB maintenance.

pub mod address_space;
pub mod cow;
pub mod error;
pub mod frame;
pub mod heap;
pub mod pte;
pub mod region;
pub mod tlb;

pub use address_space::{register, destroy_registered, materialize_root, AddressSpace, AsId, FaultAccess};
pub use error::{MemError, MemResult};
pub use frame::{Frame, FrameAllocator, PFA};
pub use region::{Region, RegionFlags};
