// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Buddy allocator over an arbitrary-size memory region.
//!
//! Classic buddy allocators require the managed region to be a power of two
//! so that every split yields two equal halves. This one does not: a block
//! of `n` alignment units splits into `ceil(n/2)` and `floor(n/2)` units,
//! which for odd `n` are *unequal* buddies. The set of block sizes that can
//! ever exist is then fixed by the root size alone, and is precomputed as a
//! [`BuddyTable`]; see that module for the shape of the resulting
//! coefficient tree and the meaning of the Unique/Frequent/Rare roles.
//!
//! At runtime the allocator keeps one free list per table slot, plus the
//! block descriptors themselves, which form a binary tree through
//! pair/parent links. An allocation:
//!
//! 1. finds the table slot whose coefficient best fits the request,
//! 2. walks *up* from that slot until it reaches a slot with a free block,
//!    recording one left/right selection bit per level on a [route
//!    stack](route), and
//! 3. replays the route downward, splitting the free block level by level;
//!    each split's unused half goes onto its own free list.
//!
//! The role tags steer step 2: a rare right slot is served through the
//! (one-unit-larger) slot before it rather than split for specifically, a
//! frequent slot may be produced by either slot of its parent pair and
//! prefers claiming a rare parent, and a rare slot of an A1B3 pair can only
//! descend from the first slot of its parent level.
//!
//! Freeing reverses step 3: a block whose buddy is also free merges with it
//! immediately, recursively up the tree, so the region always returns to a
//! single free root once every allocation is released.
//!
//! Two allocation interfaces exist. [`BuddySystem::allocate`] hides the
//! bookkeeping by stowing a descriptor pointer in the first bytes of the
//! block (the user pointer points just past it); [`PortableBuddySystem`]
//! keeps the mapping in a side table instead, so the full block is usable
//! and the prefix bytes are not sacrificed.
//!
//! Nothing here is thread-safe; callers serialize externally.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

mod route;
pub mod table;

mod portable;

pub use portable::PortableBuddySystem;
pub use table::BuddyTable;

use crate::route::RouteStack;
use crate::table::EntryFlags;
use alloc::vec::Vec;
use core::ptr::NonNull;
use objpool::UnorderedObjectPool;

/// A raw memory region, given to the allocator at construction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Region {
    pub base: NonNull<u8>,
    pub len: usize,
}

impl Region {
    pub fn new(base: NonNull<u8>, len: usize) -> Self {
        Self { base, len }
    }
}

/// Descriptor of one block in the allocation tree.
///
/// Exposed only as an opaque handle (see
/// [`BuddySystem::allocate_block`]); all fields are managed internally.
pub struct BuddyBlock {
    /// Size in alignment units.
    cof: usize,
    /// Table slot this block belongs to.
    blkidx: usize,
    rgn: Region,
    /// The sibling this block was split off with; `None` only for the root.
    pair: Option<NonNull<BuddyBlock>>,
    parent: Option<NonNull<BuddyBlock>>,
    in_use: bool,
    /// Whether the block currently sits on a free list. At rest, exactly
    /// one of `in_use` / `linked` holds.
    linked: bool,
    free_prev: Option<NonNull<BuddyBlock>>,
    free_next: Option<NonNull<BuddyBlock>>,
}

/// Intrusive doubly-linked list of free blocks, one per table slot.
///
/// Linking through the descriptors keeps arbitrary removal O(1), which the
/// merge path needs when it claims a buddy out of the middle of its list.
struct FreeList {
    head: Option<NonNull<BuddyBlock>>,
    tail: Option<NonNull<BuddyBlock>>,
}

impl FreeList {
    const fn new() -> Self {
        Self {
            head: None,
            tail: None,
        }
    }

    fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// # Safety
    ///
    /// `b` must be a live descriptor not currently on any list.
    unsafe fn push_front(&mut self, mut b: NonNull<BuddyBlock>) {
        let head = self.head;
        unsafe {
            let bm = b.as_mut();
            debug_assert!(!bm.linked);
            bm.free_prev = None;
            bm.free_next = head;
            bm.linked = true;
            match head {
                Some(mut h) => h.as_mut().free_prev = Some(b),
                None => self.tail = Some(b),
            }
        }
        self.head = Some(b);
    }

    /// # Safety
    ///
    /// `b` must be a live descriptor not currently on any list.
    unsafe fn push_back(&mut self, mut b: NonNull<BuddyBlock>) {
        let tail = self.tail;
        unsafe {
            let bm = b.as_mut();
            debug_assert!(!bm.linked);
            bm.free_prev = tail;
            bm.free_next = None;
            bm.linked = true;
            match tail {
                Some(mut t) => t.as_mut().free_next = Some(b),
                None => self.head = Some(b),
            }
        }
        self.tail = Some(b);
    }

    /// # Safety
    ///
    /// The list must only contain live descriptors.
    unsafe fn pop_front(&mut self) -> Option<NonNull<BuddyBlock>> {
        let mut b = self.head?;
        unsafe {
            let bm = b.as_mut();
            self.head = bm.free_next;
            match bm.free_next {
                Some(mut n) => n.as_mut().free_prev = None,
                None => self.tail = None,
            }
            bm.free_next = None;
            bm.linked = false;
        }
        Some(b)
    }

    /// # Safety
    ///
    /// `b` must be a live descriptor currently on *this* list.
    unsafe fn remove(&mut self, mut b: NonNull<BuddyBlock>) {
        unsafe {
            let bm = b.as_mut();
            debug_assert!(bm.linked);
            let (prev, next) = (bm.free_prev, bm.free_next);
            match prev {
                Some(mut p) => p.as_mut().free_next = next,
                None => self.head = next,
            }
            match next {
                Some(mut n) => n.as_mut().free_prev = prev,
                None => self.tail = prev,
            }
            bm.free_prev = None;
            bm.free_next = None;
            bm.linked = false;
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        let mut n = 0;
        let mut cur = self.head;
        while let Some(b) = cur {
            n += 1;
            cur = unsafe { b.as_ref() }.free_next;
        }
        n
    }
}

/// Operation counters, readable via [`BuddySystem::stats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BuddyStats {
    pub total_allocated: u64,
    pub total_deallocated: u64,
    /// Bytes currently held by callers, counted in whole blocks.
    pub allocated_bytes: usize,
}

pub struct BuddySystem {
    rgn: Region,
    align: usize,
    max_blk_size: usize,
    tbl: BuddyTable,
    flist: Vec<FreeList>,
    route: RouteStack,
    block_pool: UnorderedObjectPool<BuddyBlock>,
    stats: BuddyStats,
}

impl BuddySystem {
    /// Bytes reserved at the front of every [`Self::allocate`] block for
    /// the descriptor back-pointer.
    pub const PREFIX_SIZE: usize = core::mem::size_of::<*mut BuddyBlock>();

    /// Creates an allocator owning `rgn`, carving blocks in units of
    /// `align` bytes and refusing to split below `min_cof` units.
    ///
    /// # Panics
    ///
    /// Panics if `align` or `min_cof` is zero, if `rgn.base` is not aligned
    /// to `align`, or if the region is smaller than one alignment unit.
    ///
    /// # Safety
    ///
    /// `rgn` must be valid for reads and writes for the allocator's whole
    /// lifetime, and nothing else may access it except through pointers
    /// returned by this allocator.
    pub unsafe fn new(rgn: Region, align: usize, min_cof: usize) -> Self {
        assert!(align > 0);
        assert!(min_cof > 0);
        assert!(rgn.base.as_ptr() as usize % align == 0);
        let root_cof = rgn.len / align;
        assert!(root_cof > 0, "region smaller than one alignment unit");

        let tbl = BuddyTable::new(root_cof, align, min_cof);
        let mut block_pool = UnorderedObjectPool::new();
        let root = block_pool.construct(BuddyBlock {
            cof: root_cof,
            blkidx: 0,
            rgn,
            pair: None,
            parent: None,
            in_use: false,
            linked: false,
            free_prev: None,
            free_next: None,
        });
        let mut flist: Vec<FreeList> =
            (0..tbl.len()).map(|_| FreeList::new()).collect();
        unsafe { flist[0].push_front(root) };

        let mut route = RouteStack::new();
        route.reserve(tbl.max_level() as usize + 1);

        log::debug!(
            "buddy system online: base {:p}, {} bytes",
            rgn.base,
            rgn.len
        );

        Self {
            rgn,
            align,
            max_blk_size: root_cof * align,
            tbl,
            flist,
            route,
            block_pool,
            stats: BuddyStats::default(),
        }
    }

    /// Allocates at least `size` usable bytes.
    ///
    /// The underlying block additionally holds the descriptor back-pointer
    /// in front of the returned pointer; do not write below the returned
    /// address. Returns `None` when no block can be carved out.
    pub fn allocate(&mut self, size: usize) -> Option<NonNull<u8>> {
        let total = size.checked_add(Self::PREFIX_SIZE)?;
        let block = self.allocate_block(total)?;
        let base = unsafe { block.as_ref() }.rgn.base.as_ptr();
        // The block base is only guaranteed `align`-aligned, which can be
        // less than pointer alignment.
        unsafe {
            base.cast::<*mut BuddyBlock>().write_unaligned(block.as_ptr());
            Some(NonNull::new_unchecked(base.add(Self::PREFIX_SIZE)))
        }
    }

    /// Frees a pointer returned by [`Self::allocate`].
    ///
    /// # Safety
    ///
    /// `p` must have come from `allocate` on this allocator, must not have
    /// been freed already, and the prefix bytes in front of it must be
    /// intact.
    pub unsafe fn deallocate(&mut self, p: NonNull<u8>) {
        let block = unsafe {
            p.as_ptr()
                .sub(Self::PREFIX_SIZE)
                .cast::<*mut BuddyBlock>()
                .read_unaligned()
        };
        let block =
            NonNull::new(block).expect("allocation prefix clobbered");
        unsafe { self.deallocate_block(block) };
    }

    /// Allocates a raw block of at least `size` bytes and returns its
    /// descriptor; the usable memory is the descriptor's whole region.
    ///
    /// This is the prefix-free variant backing [`PortableBuddySystem`];
    /// the caller is responsible for remembering the descriptor.
    pub fn allocate_block(
        &mut self,
        size: usize,
    ) -> Option<NonNull<BuddyBlock>> {
        if size > self.max_blk_size {
            return None;
        }
        debug_assert!(self.route.is_empty());

        let seed = self.tbl.best_fit(size)?;
        #[cfg(feature = "prevent-root-alloc")]
        if seed == 0 {
            return None;
        }

        let Some(hit) = self.create_route(seed) else {
            self.route.clear();
            return None;
        };

        let mut block = unsafe { self.flist[hit].pop_front() }
            .expect("routing hit an empty free list");

        // The top bit belongs to the hit slot itself; the rest replay the
        // descent, one split per level.
        self.route.pop();
        while let Some(bit) = self.route.pop() {
            let (left, right) =
                split_block(&self.tbl, &mut self.block_pool, block);
            unsafe { block.as_mut().in_use = true };
            let (target, spare) =
                if bit { (right, left) } else { (left, right) };
            let spare_idx = unsafe { spare.as_ref() }.blkidx;
            debug_assert!(
                self.flist[unsafe { target.as_ref() }.blkidx].is_empty()
            );
            unsafe { self.flist[spare_idx].push_front(spare) };
            block = target;
        }

        let cof = {
            let b = unsafe { block.as_mut() };
            debug_assert!(!b.in_use);
            b.in_use = true;
            b.cof
        };
        debug_assert!(size <= cof * self.align);
        self.stats.total_allocated += 1;
        self.stats.allocated_bytes += cof * self.align;
        Some(block)
    }

    /// Frees a block by descriptor, merging with its buddy as far up the
    /// tree as possible.
    ///
    /// # Safety
    ///
    /// `block` must be an in-use descriptor from this allocator, and its
    /// memory must no longer be referenced.
    pub unsafe fn deallocate_block(&mut self, block: NonNull<BuddyBlock>) {
        {
            let b = unsafe { block.as_ref() };
            debug_assert!(b.in_use);
            debug_assert!(!b.linked);
            self.stats.allocated_bytes -= b.cof * self.align;
        }
        self.stats.total_deallocated += 1;

        let mut block = block;
        loop {
            let (pair, parent, idx) = unsafe {
                let b = block.as_mut();
                b.in_use = false;
                (b.pair, b.parent, b.blkidx)
            };

            let buddy = match pair {
                Some(p) if !unsafe { p.as_ref() }.in_use => p,
                // Root, or buddy still busy: the block rests on its free
                // list and the merge stops here.
                _ => {
                    unsafe { self.flist[idx].push_back(block) };
                    return;
                }
            };

            let bidx = unsafe { buddy.as_ref() }.blkidx;
            unsafe { self.flist[bidx].remove(buddy) };
            let parent = parent.expect("paired block without a parent");
            unsafe {
                self.block_pool.deallocate(block);
                self.block_pool.deallocate(buddy);
            }
            block = parent;
        }
    }

    pub fn region(&self) -> Region {
        self.rgn
    }

    pub fn align(&self) -> usize {
        self.align
    }

    /// Largest request [`Self::allocate_block`] can ever satisfy.
    pub fn max_alloc(&self) -> usize {
        self.max_blk_size
    }

    pub fn stats(&self) -> BuddyStats {
        self.stats
    }

    pub fn table(&self) -> &BuddyTable {
        &self.tbl
    }

    /// Walks up from `seed` to the first slot with a free block, recording
    /// one selection bit per level. Returns the slot that will supply the
    /// block, or `None` (with bits left on the route) if even the root is
    /// taken.
    ///
    /// See the module docs for how the role tags steer this.
    fn create_route(&mut self, seed: usize) -> Option<usize> {
        let mut index = seed;
        loop {
            // Direct hit at the current candidate slot.
            if !self.flist[index].is_empty() {
                let off = self.tbl.property(index).offset;
                self.route.push(off == 1);
                return Some(index);
            }
            let prop = self.tbl.property(index);

            if prop.flags.contains(EntryFlags::RARE | EntryFlags::A3B1)
                && prop.offset == 1
            {
                // Degenerate right slot: nothing ever splits into it on
                // demand. The slot before it is one unit larger and covers
                // the request, so route through that instead.
                index -= 1;
                continue;
            }
            if index == 0 {
                // Root level and the root is taken.
                return None;
            }
            self.route.push(prop.offset == 1);

            let base = index - prop.dist;
            if prop.flags.contains(EntryFlags::FREQUENT) {
                // A frequent slot descends from either slot of its parent
                // pair. Claim a rare parent if one is free (frequent ones
                // are better kept whole), otherwise climb through the
                // frequent parent.
                let (rare, freq) = if self
                    .tbl
                    .property(base)
                    .flags
                    .contains(EntryFlags::A3B1)
                {
                    (base + 1, base)
                } else {
                    (base, base + 1)
                };
                if !self.flist[rare].is_empty() {
                    let off = self.tbl.property(rare).offset;
                    self.route.push(off == 1);
                    return Some(rare);
                }
                index = freq;
            } else {
                // Unique slots, rare A1B3 slots, and the degenerate left
                // slot each have exactly one useful parent: the first slot
                // of the parent level.
                index = base;
            }
        }
    }

    #[cfg(test)]
    fn free_list_len(&self, index: usize) -> usize {
        self.flist[index].len()
    }

    /// True when the allocator is back in its freshly-initialized state:
    /// one free root and nothing else.
    #[cfg(test)]
    fn is_pristine(&self) -> bool {
        self.flist[0].len() == 1
            && self.flist[1..].iter().all(|l| l.is_empty())
    }
}

impl Drop for BuddySystem {
    fn drop(&mut self) {
        // The root can only be back on its list if every allocation was
        // returned and merged.
        if self.flist[0].is_empty() {
            log::warn!(
                "buddy system torn down with {} bytes still allocated",
                self.stats.allocated_bytes
            );
        }
    }
}

/// Splits `parent` into its two children, allocating fresh descriptors.
/// The parent keeps its descriptor (marked busy by the caller) so the pair
/// can merge back into it later.
fn split_block(
    tbl: &BuddyTable,
    pool: &mut UnorderedObjectPool<BuddyBlock>,
    parent: NonNull<BuddyBlock>,
) -> (NonNull<BuddyBlock>, NonNull<BuddyBlock>) {
    let (pcof, prgn, pidx) = {
        let p = unsafe { parent.as_ref() };
        debug_assert!(!p.in_use);
        (p.cof, p.rgn, p.blkidx)
    };
    let prop = tbl.property(pidx);
    let base = pidx - prop.offset;
    let odd = pcof % 2 == 1;

    // Which table slots the children land in is fully determined by the
    // parent's slot and parity: a unique parent feeds the next level's
    // first slot(s); an odd binary parent feeds both slots of the next
    // level; an even binary parent's equal children both land in the slot
    // matching the parent's own offset.
    let (lidx, ridx) = if prop.flags.contains(EntryFlags::UNIQUE) {
        (base + 1, base + 1 + usize::from(odd))
    } else if odd {
        (base + 2, base + 3)
    } else {
        let i = base + 2 + usize::from(prop.offset != 0);
        (i, i)
    };

    let lcof = pcof.div_ceil(2);
    let rcof = pcof - lcof;
    let llen = lcof * tbl.align();
    let left_rgn = Region::new(prgn.base, llen);
    let right_rgn = Region::new(
        unsafe { NonNull::new_unchecked(prgn.base.as_ptr().add(llen)) },
        prgn.len - llen,
    );

    let mut left = pool.construct(BuddyBlock {
        cof: lcof,
        blkidx: lidx,
        rgn: left_rgn,
        pair: None,
        parent: Some(parent),
        in_use: false,
        linked: false,
        free_prev: None,
        free_next: None,
    });
    let right = pool.construct(BuddyBlock {
        cof: rcof,
        blkidx: ridx,
        rgn: right_rgn,
        pair: Some(left),
        parent: Some(parent),
        in_use: false,
        linked: false,
        free_prev: None,
        free_next: None,
    });
    unsafe { left.as_mut().pair = Some(right) };
    (left, right)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    /// An 8-aligned backing buffer of `units` alignment units.
    fn backing(units: usize) -> Vec<u64> {
        vec![0u64; units]
    }

    fn region_of(buf: &mut [u64]) -> Region {
        Region::new(
            NonNull::new(buf.as_mut_ptr().cast::<u8>()).unwrap(),
            buf.len() * 8,
        )
    }

    fn system(buf: &mut [u64], min_cof: usize) -> BuddySystem {
        unsafe { BuddySystem::new(region_of(buf), 8, min_cof) }
    }

    /// First allocations out of the worked root-232 tree: a 4-unit block
    /// is carved by splitting all the way down the left spine, and the
    /// 3-unit spare produced on the way serves the next small request
    /// without any further splitting.
    #[test]
    fn basic_allocation_carves_expected_blocks() {
        let mut buf = backing(232);
        let mut sys = system(&mut buf, 3);

        // 24 usable bytes + 8 prefix = 32 = 4 units from slot 8.
        let a = sys.allocate(24).unwrap();
        assert_eq!(sys.stats().allocated_bytes, 32);

        // Splitting left a spare on every level walked through:
        // 116, 58, 29, 14, 8, and the 3-unit buddy of our block.
        for (idx, count) in
            [(0, 0), (1, 1), (2, 1), (3, 1), (4, 0), (5, 1), (6, 1), (7, 0), (8, 0), (9, 1)]
        {
            assert_eq!(sys.free_list_len(idx), count, "free list {idx}");
        }

        // 16 usable bytes + 8 prefix = 24 = 3 units: cache hit on the
        // spare at slot 9.
        let b = sys.allocate(16).unwrap();
        assert_eq!(sys.stats().allocated_bytes, 32 + 24);
        assert_eq!(sys.free_list_len(9), 0);

        assert_ne!(a, b);
        unsafe {
            sys.deallocate(a);
            sys.deallocate(b);
        }
    }

    /// Freeing everything merges all the way back up to a single free
    /// root, in either release order.
    #[test]
    fn coalescing_restores_initial_state() {
        for reverse in [false, true] {
            let mut buf = backing(232);
            let mut sys = system(&mut buf, 3);

            let a = sys.allocate(24).unwrap();
            let b = sys.allocate(16).unwrap();
            unsafe {
                if reverse {
                    sys.deallocate(b);
                    sys.deallocate(a);
                } else {
                    sys.deallocate(a);
                    sys.deallocate(b);
                }
            }
            assert!(sys.is_pristine(), "reverse={reverse}");
            assert_eq!(sys.stats().allocated_bytes, 0);
        }
    }

    /// Whole-region allocation consumes the root; nothing else fits until
    /// it is returned.
    #[test]
    fn exhaustion_returns_none() {
        let mut buf = backing(2);
        let rgn = region_of(&mut buf);
        let mut sys = unsafe { BuddySystem::new(rgn, 1, 1) };
        assert_eq!(sys.max_alloc(), 16);

        let blk = sys.allocate_block(16).unwrap();
        assert!(sys.allocate_block(1).is_none());

        unsafe { sys.deallocate_block(blk) };
        assert!(sys.is_pristine());
        let blk = sys.allocate_block(1).unwrap();
        unsafe { sys.deallocate_block(blk) };
    }

    #[test]
    fn oversized_request_fails_fast() {
        let mut buf = backing(16);
        let mut sys = system(&mut buf, 1);
        assert!(sys.allocate_block(16 * 8 + 1).is_none());
        assert!(sys.allocate(16 * 8).is_none());
        assert!(sys.is_pristine());
    }

    /// A failed route must not poison the next attempt.
    #[test]
    fn failed_allocation_clears_route_state() {
        let mut buf = backing(16);
        let mut sys = system(&mut buf, 1);

        let blk = sys.allocate_block(128).unwrap();
        assert!(sys.allocate_block(8).is_none());
        assert!(sys.allocate_block(8).is_none());
        unsafe { sys.deallocate_block(blk) };
        let blk = sys.allocate_block(8).unwrap();
        unsafe { sys.deallocate_block(blk) };
        assert!(sys.is_pristine());
    }

    /// The prefix mechanism survives the caller writing every usable byte.
    #[test]
    fn user_bytes_do_not_clobber_bookkeeping() {
        let mut buf = backing(232);
        let mut sys = system(&mut buf, 3);

        let sizes = [24usize, 16, 100, 7, 320];
        let ptrs: Vec<_> = sizes
            .iter()
            .map(|&s| {
                let p = sys.allocate(s).unwrap();
                unsafe {
                    core::ptr::write_bytes(p.as_ptr(), 0xAB, s);
                }
                p
            })
            .collect();
        for p in ptrs {
            unsafe { sys.deallocate(p) };
        }
        assert!(sys.is_pristine());
    }

    /// Small allocations tile the region: with 1-unit minimum blocks, a
    /// 16-unit root serves 16 one-unit raw blocks, all disjoint.
    #[test]
    fn full_tiling_with_unit_blocks() {
        let mut buf = backing(2);
        let rgn = region_of(&mut buf);
        let mut sys = unsafe { BuddySystem::new(rgn, 1, 1) };

        let mut seen = std::collections::BTreeSet::new();
        let blocks: Vec<_> =
            (0..16).map(|_| sys.allocate_block(1).unwrap()).collect();
        for b in &blocks {
            let base = unsafe { b.as_ref() }.rgn.base.as_ptr() as usize;
            assert!(seen.insert(base), "duplicate block base");
        }
        assert!(sys.allocate_block(1).is_none());
        assert_eq!(sys.stats().allocated_bytes, 16);

        for b in blocks {
            unsafe { sys.deallocate_block(b) };
        }
        assert!(sys.is_pristine());
    }

    #[cfg(feature = "prevent-root-alloc")]
    #[test]
    fn root_requests_fail_when_prevented() {
        let mut buf = backing(16);
        let mut sys = system(&mut buf, 1);
        // Anything that best-fits the root slot is refused...
        assert!(sys.allocate_block(16 * 8).is_none());
        // ...but smaller requests still split the root block.
        let blk = sys.allocate_block(8 * 8).unwrap();
        unsafe { sys.deallocate_block(blk) };
    }

    proptest! {
        /// Any interleaving of allocations and frees ends where it began:
        /// one free root, zero outstanding bytes, and every block handed
        /// out along the way was in bounds, disjoint from the others, and
        /// within one unit of the best-fitting table coefficient.
        #[test]
        fn alloc_free_sequences_restore_initial_state(
            ops in prop::collection::vec(
                (1usize..600, any::<bool>()),
                1..48,
            ),
        ) {
            let mut buf = backing(232);
            let base = buf.as_ptr() as usize;
            let mut sys = system(&mut buf, 3);
            let tbl = BuddyTable::new(232, 8, 3);

            // (user pointer, requested size, block span)
            let mut live: Vec<(NonNull<u8>, usize, (usize, usize))> =
                Vec::new();

            for (size, free_first) in ops {
                if free_first && !live.is_empty() {
                    let (p, _, _) = live.remove(0);
                    unsafe { sys.deallocate(p) };
                }

                let before = sys.stats().allocated_bytes;
                if let Some(p) = sys.allocate(size) {
                    let got = sys.stats().allocated_bytes - before;

                    let fit = tbl
                        .cof(tbl.best_fit(size + BuddySystem::PREFIX_SIZE)
                        .unwrap());
                    prop_assert!(got == fit * 8 || got == (fit + 1) * 8);
                    prop_assert!(got >= size + BuddySystem::PREFIX_SIZE);

                    let start = p.as_ptr() as usize
                        - BuddySystem::PREFIX_SIZE;
                    prop_assert!(start >= base);
                    prop_assert!(start + got <= base + 232 * 8);
                    for &(_, _, (s, l)) in &live {
                        prop_assert!(
                            start + got <= s || s + l <= start,
                            "overlapping blocks"
                        );
                    }
                    live.push((p, size, (start, got)));
                }
            }

            for (p, _, _) in live {
                unsafe { sys.deallocate(p) };
            }
            prop_assert!(sys.is_pristine());
            prop_assert_eq!(sys.stats().allocated_bytes, 0);
            let s = sys.stats();
            prop_assert_eq!(s.total_allocated, s.total_deallocated);
        }
    }
}
