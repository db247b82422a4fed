//! Physical Frame Allocator: zone-segmented buddy allocator over 4 KiB
//! frames with per-frame reference counting.
//!
//! A bump allocator with no free path and no refcounting would be fine for
//! a RAM-resident capsule runtime that never frees, but is useless for
//! fork/COW. Keeps the familiar shape (a `Mutex`-guarded struct behind a
//! `lazy_static` singleton, `add_region` fed from the boot memory map) and
//! uses a buddy system instead of a bump strategy, which is what
//! `alloc_pages(n, align)` and refcounted `free_page` actually require.

use alloc::vec::Vec;

use bitflags::bitflags;
use hashbrown::HashMap;
use spin::Mutex;

use crate::config::PAGE_SIZE;
use crate::memory::error::{MemError, MemResult};

pub const MAX_ORDER: usize = 10;

bitflags! {
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct FrameFlags: u32 {
        const PINNED = 1 << 0;
        const DIRTY_TRACKED = 1 << 1;
    }
}

/// Identifies one physical 4 KiB page by frame number (`paddr / PAGE_SIZE`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Frame(pub u64);

impl Frame {
    pub fn addr(self) -> u64 {
        self.0 * PAGE_SIZE as u64
    }

    pub fn from_addr(addr: u64) -> Self {
        Frame(addr / PAGE_SIZE as u64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Zone {
    /// < 16 MiB, reserved for legacy ISA DMA.
    Dma,
    /// < 4 GiB, reachable by 32-bit-only DMA engines.
    Dma32,
    /// Everything else. The only zone populated on a > 4 GiB system unless
    /// the boot memory map reports low memory too (open question in spec:
    /// "implementers may use a single Normal zone" — we still honor real
    /// DMA/DMA32 boundaries when the memory map has frames there).
    Normal,
}

const DMA_LIMIT: u64 = 16 * 1024 * 1024;
const DMA32_LIMIT: u64 = 4u64 * 1024 * 1024 * 1024;

fn zone_of(addr: u64) -> Zone {
    if addr < DMA_LIMIT {
        Zone::Dma
    } else if addr < DMA32_LIMIT {
        Zone::Dma32
    } else {
        Zone::Normal
    }
}

struct FrameMeta {
    refcount: u32,
    flags: FrameFlags,
}

struct ZoneState {
    /// free_blocks[order] = base frame numbers of free buddy blocks of that order.
    free_blocks: [Vec<u64>; MAX_ORDER + 1],
    /// base frame number -> order, for buddy lookups. Only free blocks appear.
    free_index: HashMap<u64, usize>,
}

impl ZoneState {
    fn empty() -> Self {
        Self {
            free_blocks: Default::default(),
            free_index: HashMap::new(),
        }
    }

    fn insert_free(&mut self, base: u64, order: usize) {
        self.free_blocks[order].push(base);
        self.free_index.insert(base, order);
    }

    fn take_free(&mut self, base: u64, order: usize) {
        if let Some(pos) = self.free_blocks[order].iter().position(|&f| f == base) {
            self.free_blocks[order].swap_remove(pos);
        }
        self.free_index.remove(&base);
    }

    /// Insert a free block, coalescing with its buddy as long as possible.
    fn release(&mut self, mut base: u64, mut order: usize) {
        while order < MAX_ORDER {
            let buddy = base ^ (1u64 << order);
            match self.free_index.get(&buddy) {
                Some(&buddy_order) if buddy_order == order => {
                    self.take_free(buddy, order);
                    base = base.min(buddy);
                    order += 1;
                }
                _ => break,
            }
        }
        self.insert_free(base, order);
    }

    fn alloc_order(&mut self, order: usize) -> Option<u64> {
        for cur in order..=MAX_ORDER {
            if let Some(base) = self.free_blocks[cur].pop() {
                self.free_index.remove(&base);
                // Split down to the requested order, releasing the high halves.
                let mut b = base;
                let mut o = cur;
                while o > order {
                    o -= 1;
                    let upper = b + (1u64 << o);
                    self.insert_free(upper, o);
                }
                return Some(b);
            }
        }
        None
    }
}

pub struct FrameAllocator {
    zones: [ZoneState; 3],
    metas: HashMap<u64, FrameMeta>,
}

fn zone_idx(z: Zone) -> usize {
    match z {
        Zone::Dma => 0,
        Zone::Dma32 => 1,
        Zone::Normal => 2,
    }
}

impl FrameAllocator {
    pub fn new() -> Self {
        Self {
            zones: [ZoneState::empty(), ZoneState::empty(), ZoneState::empty()],
            metas: HashMap::new(),
        }
    }

    /// Feed a usable physical range (inclusive frame numbers `[start,end)`)
    /// from the boot memory map into the allocator, splitting across zone
    /// boundaries and at max-order-aligned chunks.
    pub fn add_region(&mut self, start_addr: u64, end_addr: u64) {
        let mut addr = start_addr & !(PAGE_SIZE as u64 - 1);
        let end = end_addr & !(PAGE_SIZE as u64 - 1);
        while addr < end {
            let zone = zone_of(addr);
            let zone_end = match zone {
                Zone::Dma => DMA_LIMIT,
                Zone::Dma32 => DMA32_LIMIT,
                Zone::Normal => u64::MAX,
            }
            .min(end);

            let mut frame = addr / PAGE_SIZE as u64;
            let frame_end = zone_end / PAGE_SIZE as u64;
            while frame < frame_end {
                let align_order = frame.trailing_zeros().min(MAX_ORDER as u32) as usize;
                let remaining = frame_end - frame;
                let mut order = align_order;
                while order > 0 && (1u64 << order) > remaining {
                    order -= 1;
                }
                self.zones[zone_idx(zone)].release(frame, order);
                for f in frame..frame + (1u64 << order) {
                    self.metas.insert(f, FrameMeta { refcount: 0, flags: FrameFlags::empty() });
                }
                frame += 1u64 << order;
            }
            addr = zone_end;
        }
    }

    fn alloc_in_order(&mut self, order: usize) -> MemResult<Frame> {
        for z in [Zone::Dma, Zone::Dma32, Zone::Normal] {
            if let Some(base) = self.zones[zone_idx(z)].alloc_order(order) {
                for f in base..base + (1u64 << order) {
                    self.metas.entry(f).or_insert(FrameMeta { refcount: 0, flags: FrameFlags::empty() }).refcount = 1;
                }
                return Ok(Frame(base));
            }
        }
        Err(MemError::OutOfMemory)
    }

    pub fn alloc_page(&mut self) -> MemResult<Frame> {
        self.alloc_in_order(0)
    }

    /// Allocate `n` contiguous pages aligned to `align` pages. Both rounded
    /// up to the smallest buddy order that covers them.
    pub fn alloc_pages(&mut self, n: u64, align: u64) -> MemResult<Frame> {
        let need = n.max(align).next_power_of_two();
        let order = need.trailing_zeros() as usize;
        if order > MAX_ORDER {
            return Err(MemError::OutOfMemory);
        }
        self.alloc_in_order(order)
    }

    /// Returns a single frame to the allocator. Fails unless its refcount is
    /// exactly 1 (the caller is the sole owner).
    pub fn free_page(&mut self, frame: Frame) -> MemResult<()> {
        match self.metas.get(&frame.0) {
            Some(meta) if meta.refcount == 1 => {}
            Some(_) => return Err(MemError::FrameInUse),
            None => return Err(MemError::NotMapped),
        }
        self.metas.get_mut(&frame.0).unwrap().refcount = 0;
        let zone = zone_idx(zone_of(frame.addr()));
        self.zones[zone].release(frame.0, 0);
        Ok(())
    }

    pub fn refcount(&self, frame: Frame) -> u32 {
        self.metas.get(&frame.0).map(|m| m.refcount).unwrap_or(0)
    }

    pub fn inc_ref(&mut self, frame: Frame) -> u32 {
        let meta = self.metas.entry(frame.0).or_insert(FrameMeta { refcount: 0, flags: FrameFlags::empty() });
        meta.refcount += 1;
        meta.refcount
    }

    pub fn dec_ref(&mut self, frame: Frame) -> u32 {
        if let Some(meta) = self.metas.get_mut(&frame.0) {
            meta.refcount = meta.refcount.saturating_sub(1);
            meta.refcount
        } else {
            0
        }
    }

    pub fn set_flags(&mut self, frame: Frame, flags: FrameFlags) {
        if let Some(meta) = self.metas.get_mut(&frame.0) {
            meta.flags = flags;
        }
    }

    pub fn get_flags(&self, frame: Frame) -> FrameFlags {
        self.metas.get(&frame.0).map(|m| m.flags).unwrap_or(FrameFlags::empty())
    }
}

impl Default for FrameAllocator {
    fn default() -> Self {
        Self::new()
    }
}

lazy_static::lazy_static! {
    pub static ref PFA: Mutex<FrameAllocator> = Mutex::new(FrameAllocator::new());
}
