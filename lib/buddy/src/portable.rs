// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Buddy allocation without the in-block back-pointer.
//!
//! [`BuddySystem::allocate`] spends the first pointer-size bytes of every
//! block on a descriptor back-pointer, which shrinks the usable size and
//! makes block bases unusable as, say, DMA targets. This wrapper keeps the
//! pointer-to-descriptor association in a side map instead: callers get the
//! block's true base address and the whole block is theirs.

use crate::{BuddySystem, Region};
use alloc::collections::BTreeMap;
use core::ptr::NonNull;

pub struct PortableBuddySystem {
    buddy: BuddySystem,
    blocks: BTreeMap<usize, NonNull<crate::BuddyBlock>>,
}

impl PortableBuddySystem {
    /// See [`BuddySystem::new`].
    ///
    /// # Safety
    ///
    /// Same contract as [`BuddySystem::new`].
    pub unsafe fn new(rgn: Region, align: usize, min_cof: usize) -> Self {
        Self {
            buddy: unsafe { BuddySystem::new(rgn, align, min_cof) },
            blocks: BTreeMap::new(),
        }
    }

    /// Allocates a block of at least `size` bytes and returns its base.
    pub fn allocate(&mut self, size: usize) -> Option<NonNull<u8>> {
        let block = self.buddy.allocate_block(size)?;
        let base = unsafe { block.as_ref() }.rgn.base;
        let prev = self.blocks.insert(base.as_ptr() as usize, block);
        debug_assert!(prev.is_none(), "block base handed out twice");
        Some(base)
    }

    /// Frees a pointer returned by [`Self::allocate`].
    ///
    /// # Panics
    ///
    /// Panics if `p` is not currently allocated here; a foreign or stale
    /// pointer is a caller bug.
    ///
    /// # Safety
    ///
    /// The block at `p` must no longer be referenced.
    pub unsafe fn deallocate(&mut self, p: NonNull<u8>) {
        let block = self
            .blocks
            .remove(&(p.as_ptr() as usize))
            .expect("pointer not allocated by this buddy system");
        unsafe { self.buddy.deallocate_block(block) };
    }

    pub fn region(&self) -> Region {
        self.buddy.region()
    }

    pub fn max_alloc(&self) -> usize {
        self.buddy.max_alloc()
    }

    pub fn stats(&self) -> crate::BuddyStats {
        self.buddy.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn system(buf: &mut [u64], align: usize, min_cof: usize) -> PortableBuddySystem {
        let rgn = Region::new(
            NonNull::new(buf.as_mut_ptr().cast::<u8>()).unwrap(),
            buf.len() * 8,
        );
        unsafe { PortableBuddySystem::new(rgn, align, min_cof) }
    }

    /// The whole region is allocatable in one piece: no prefix is taken
    /// out of the block.
    #[test]
    fn whole_region_fits() {
        let mut buf = vec![0u64; 2];
        let mut sys = system(&mut buf, 1, 1);
        assert_eq!(sys.max_alloc(), 16);

        let p = sys.allocate(16).unwrap();
        assert_eq!(p.as_ptr(), buf.as_mut_ptr().cast::<u8>());
        assert!(sys.allocate(1).is_none());

        unsafe { sys.deallocate(p) };
        let p = sys.allocate(1).unwrap();
        unsafe { sys.deallocate(p) };
        assert_eq!(sys.stats().allocated_bytes, 0);
    }

    #[test]
    fn pointers_round_trip_through_the_map() {
        let mut buf = vec![0u64; 232];
        let mut sys = system(&mut buf, 8, 3);

        let ptrs: Vec<_> = (0..6)
            .map(|i| sys.allocate(24 + i * 8).unwrap())
            .collect();
        // Distinct bases, all inside the region.
        for (i, p) in ptrs.iter().enumerate() {
            for q in &ptrs[..i] {
                assert_ne!(p, q);
            }
        }
        for p in ptrs {
            unsafe { sys.deallocate(p) };
        }
        assert_eq!(sys.stats().allocated_bytes, 0);
    }

    #[test]
    #[should_panic]
    fn foreign_pointer_panics() {
        let mut buf = vec![0u64; 16];
        let mut sys = system(&mut buf, 8, 1);
        let mut other = [0u8; 8];
        let p = NonNull::new(other.as_mut_ptr()).unwrap();
        unsafe { sys.deallocate(p) };
    }
}
