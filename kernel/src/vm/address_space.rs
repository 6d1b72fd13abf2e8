/*
 * Copyright 2024 Luc Lenôtre
 *
 * This file is part of Maestro.
 *
 * Maestro is free software: you can redistribute it and/or modify it under the
 * terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or (at your option) any later
 * version.
 *
 * Maestro is distributed in the hope that it will be useful, but WITHOUT ANY
 * WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR
 * A PARTICULAR PURPOSE. See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * Maestro. If not, see <https://www.gnu.org/licenses/>.
 */

//! A process's address space: its page table, its region list and the loading flag that relaxes
//! write permission while a program image is laid down.

use crate::vm::{
	frame::FrameAllocator,
	page_table::{PageTable, DIRTY, FRAME_SHIFT, PTE_FLAGS_MASK, VALID},
	region::{Region, RegionList},
	tlb::Tlb,
};
use utils::errno::{self, EResult};

/// The first address past the end of user-accessible space. Everything at or above this
/// belongs to the kernel and is never represented in a [`PageTable`] here.
pub const USERSPACE_TOP: u32 = 0x8000_0000;

/// Number of pages reserved for the initial user stack, placed at the top of user space.
pub const STACK_PAGES: usize = 16;

const PAGE_SIZE: usize = crate::vm::frame::FRAME_SIZE;

/// A process's virtual address space.
pub struct AddressSpace {
	page_table: PageTable,
	regions: RegionList,
	/// While set, every region in [`regions`](Self::regions) is treated as writable regardless
	/// of its own permissions — a program loader writing pages it will later mark read-only
	/// needs this, and toggles it off once loading completes.
	loading: bool,
}

impl AddressSpace {
	/// Creates a new, empty address space with no mapped pages and no regions.
	pub fn create() -> EResult<Self> {
		Ok(Self {
			page_table: PageTable::new().map_err(|_| errno::ENOMEM)?,
			regions: RegionList::new(),
			loading: false,
		})
	}

	/// Deep-copies `self`: every mapped page is duplicated into a freshly allocated frame, and
	/// every region is replayed in its original relative order. The new address space is fully
	/// independent — freeing a frame in one never affects the other.
	pub fn copy(&self, frames: &dyn FrameAllocator) -> EResult<Self> {
		let mut new_as = Self::create()?;
		let leaves = self.page_table.leaves().map_err(|_| errno::ENOMEM)?;
		for (vaddr, pte) in leaves {
			let old_frame = pte >> FRAME_SHIFT;
			let Some(new_frame) = frames.alloc() else {
				new_as.destroy(frames);
				return Err(errno::ENOMEM);
			};
			let mut buf = [0u8; PAGE_SIZE];
			frames.read(old_frame, &mut buf);
			frames.write(new_frame, &buf);
			let new_pte = (new_frame << FRAME_SHIFT) | (pte & PTE_FLAGS_MASK);
			if new_as.page_table.insert(vaddr, new_pte).is_err() {
				frames.free(new_frame);
				new_as.destroy(frames);
				return Err(errno::ENOMEM);
			}
		}
		// `regions` holds the most-recently-defined region first; replaying it in reverse
		// restores that same relative order in `new_as` instead of reversing it.
		for region in self.regions.iter().collect::<alloc::vec::Vec<_>>().into_iter().rev() {
			if new_as
				.define_region(
					region.base(),
					region.size(),
					region.readable(),
					region.writeable(),
					region.executable(),
				)
				.is_err()
			{
				new_as.destroy(frames);
				return Err(errno::ENOMEM);
			}
		}
		Ok(new_as)
	}

	/// Frees every physical frame still mapped in `self`, then drops it. Must be the last thing
	/// done with an address space: there is no way back from here.
	pub fn destroy(self, frames: &dyn FrameAllocator) {
		if let Ok(leaves) = self.page_table.leaves() {
			for (_, pte) in leaves {
				if pte & VALID != 0 {
					frames.free(pte >> FRAME_SHIFT);
				}
			}
		}
	}

	/// Makes `self` the one the TLB is primed for. On this software-TLB model, both activation
	/// and deactivation reduce to invalidating every stale entry.
	pub fn activate(&self, tlb: &mut dyn Tlb) {
		tlb.flush();
	}

	/// Marks `self` as no longer the active address space.
	pub fn deactivate(&self, tlb: &mut dyn Tlb) {
		tlb.flush();
	}

	/// Adds a region spanning `[vaddr, vaddr + size)` with the given permissions.
	///
	/// Unlike the allocator this is modelled on, there is no `EFAULT`-for-null-address-space
	/// case: `&mut self` already guarantees one exists.
	pub fn define_region(
		&mut self,
		vaddr: u32,
		size: usize,
		readable: bool,
		writeable: bool,
		executable: bool,
	) -> EResult<()> {
		let top = (vaddr as u64) + (size as u64);
		if top > USERSPACE_TOP as u64 {
			return Err(errno::ENOMEM);
		}
		self.regions
			.push_front(Region::new(vaddr, size, readable, writeable, executable))
			.map_err(|_| errno::ENOMEM)
	}

	/// Reserves the fixed-size stack region at the top of user space, returning its base
	/// address.
	pub fn define_stack(&mut self) -> EResult<u32> {
		let size = STACK_PAGES * PAGE_SIZE;
		let base = USERSPACE_TOP - size as u32;
		self.define_region(base, size, true, true, false)?;
		Ok(base)
	}

	/// Sets the loading flag and flushes the TLB, so that a stale read-only entry from before
	/// loading started cannot mask the relaxed permission.
	pub fn prepare_load(&mut self, tlb: &mut dyn Tlb) {
		self.loading = true;
		tlb.flush();
	}

	/// Clears the loading flag and flushes the TLB, re-enforcing each region's real
	/// permissions from the next fault onward.
	pub fn complete_load(&mut self, tlb: &mut dyn Tlb) {
		self.loading = false;
		tlb.flush();
	}

	/// Returns the DIRTY bit to OR into a freshly built PTE, honoring the loading flag.
	pub(crate) fn loading_bits(&self) -> u32 {
		if self.loading {
			DIRTY
		} else {
			0
		}
	}

	pub(crate) fn page_table(&self) -> &PageTable {
		&self.page_table
	}

	pub(crate) fn page_table_mut(&mut self) -> &mut PageTable {
		&mut self.page_table
	}

	pub(crate) fn regions(&self) -> &RegionList {
		&self.regions
	}

	pub(crate) fn is_loading(&self) -> bool {
		self.loading
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::vm::{frame::test::TestFrameAllocator, tlb::test::TestTlb};

	#[test]
	fn define_region_rejects_spans_past_userspace_top() {
		let mut as_ = AddressSpace::create().unwrap();
		let err = as_
			.define_region(USERSPACE_TOP - 0x1000, 0x2000, true, true, false)
			.unwrap_err();
		assert_eq!(err, errno::ENOMEM);
	}

	#[test]
	fn stack_sits_at_the_top_of_userspace() {
		let mut as_ = AddressSpace::create().unwrap();
		let base = as_.define_stack().unwrap();
		assert_eq!(base + (STACK_PAGES * PAGE_SIZE) as u32, USERSPACE_TOP);
		assert!(as_.regions().find(USERSPACE_TOP - 1).unwrap().writeable());
	}

	#[test]
	fn copy_duplicates_frames_independently() {
		let frames = TestFrameAllocator::default();
		let mut as_a = AddressSpace::create().unwrap();
		as_a.define_region(0x1000, PAGE_SIZE, true, true, false).unwrap();
		let frame = frames.alloc().unwrap();
		as_a.page_table_mut()
			.insert(0x1000, (frame << FRAME_SHIFT) | VALID | DIRTY)
			.unwrap();
		frames.write(frame, &[0xAB; PAGE_SIZE]);

		let as_b = as_a.copy(&frames).unwrap();
		let pte_b = as_b.page_table().lookup(0x1000);
		assert_ne!(pte_b >> FRAME_SHIFT, frame, "copy must allocate a distinct frame");
		let mut buf = [0u8; PAGE_SIZE];
		frames.read(pte_b >> FRAME_SHIFT, &mut buf);
		assert_eq!(buf, [0xAB; PAGE_SIZE]);

		as_a.destroy(&frames);
		as_b.destroy(&frames);
	}

	#[test]
	fn activate_and_deactivate_flush_the_tlb() {
		let as_ = AddressSpace::create().unwrap();
		let mut tlb = TestTlb::new(4);
		tlb.write_random(0x1000, VALID);
		as_.activate(&mut tlb);
		assert_eq!(tlb.translate(0x1000), None);
	}
}
