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

//! The TLB-refill fault handler.
//!
//! Every user memory access that misses the TLB traps here. The handler either re-primes the
//! TLB from an existing, valid page table entry, or — on a genuine first touch of a page inside
//! a defined region — allocates and zeroes a frame, builds the entry, and primes the TLB with
//! it. Anything else (a write to a read-only region, a fault outside every region, an
//! out-of-memory condition) is reported as an error for the caller to turn into a signal.

use crate::vm::{
	address_space::AddressSpace,
	frame::FrameAllocator,
	page_table::{DIRTY, FRAME_SHIFT, VALID},
	tlb::Tlb,
};
use utils::errno::{self, EResult, Errno};

/// The kind of access that faulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultType {
	/// A read access.
	Read,
	/// A write access.
	Write,
	/// A fault reported against a read-only TLB entry. Always invalid: a read-only entry can
	/// only ever be installed for a page this handler itself decided was at most readable, so
	/// a fault of this kind reaching here means the caller itself raced or misused the
	/// hardware interface.
	ReadOnly,
}

impl TryFrom<u32> for FaultType {
	type Error = Errno;

	/// Converts a raw hardware trap code into a [`FaultType`], rejecting anything the
	/// architecture did not document as one of the three kinds above.
	fn try_from(code: u32) -> EResult<Self> {
		match code {
			0 => Ok(FaultType::ReadOnly),
			1 => Ok(FaultType::Read),
			2 => Ok(FaultType::Write),
			_ => Err(errno::EINVAL),
		}
	}
}

/// Services a TLB-refill fault at `vaddr` in `as_`, of kind `fault_type`.
///
/// `as_` is `None` when the fault is taken with no address space active (e.g. early boot); that
/// is always an error, mirroring the allocator this is modelled on rather than panicking, since
/// the caller may still want to report it as a normal fault to whatever triggered it.
pub fn vm_fault(
	as_: Option<&mut AddressSpace>,
	frames: &dyn FrameAllocator,
	tlb: &mut dyn Tlb,
	fault_type: FaultType,
	vaddr: u32,
) -> EResult<()> {
	if fault_type == FaultType::ReadOnly {
		return Err(errno::EFAULT);
	}
	let as_ = as_.ok_or(errno::EFAULT)?;
	// The page table and the TLB both operate on whole pages; a mid-page fault address is
	// rounded down before either is touched, so that a fault anywhere in a page always hits
	// the same entry.
	let vaddr = vaddr & !(crate::vm::frame::FRAME_SIZE as u32 - 1);

	let pte = as_.page_table().lookup(vaddr);
	if pte & VALID != 0 {
		if fault_type == FaultType::Write && pte & DIRTY == 0 && !as_.is_loading() {
			return Err(errno::EFAULT);
		}
		tlb.write_random(vaddr, pte | as_.loading_bits());
		return Ok(());
	}

	let region = as_.regions().find(vaddr).ok_or(errno::EFAULT)?.clone();
	if fault_type == FaultType::Write && !region.writeable() && !as_.is_loading() {
		return Err(errno::EFAULT);
	}

	let frame = frames.alloc().ok_or(errno::ENOMEM)?;
	frames.zero(frame);
	let mut new_pte = frame << FRAME_SHIFT;
	if region.readable() || region.writeable() || region.executable() {
		new_pte |= VALID;
	}
	if region.writeable() {
		new_pte |= DIRTY;
	}
	if let Err(e) = as_.page_table_mut().insert(vaddr, new_pte) {
		frames.free(frame);
		return Err(e.into());
	}
	tlb.write_random(vaddr, new_pte | as_.loading_bits());
	Ok(())
}

/// Entry point for a raw hardware trap: converts `fault_type_code` before delegating to
/// [`vm_fault`].
pub fn vm_fault_raw(
	as_: Option<&mut AddressSpace>,
	frames: &dyn FrameAllocator,
	tlb: &mut dyn Tlb,
	fault_type_code: u32,
	vaddr: u32,
) -> EResult<()> {
	let fault_type = FaultType::try_from(fault_type_code)?;
	vm_fault(as_, frames, tlb, fault_type, vaddr)
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::vm::{frame::test::TestFrameAllocator, tlb::test::TestTlb};

	fn env() -> (AddressSpace, TestFrameAllocator, TestTlb) {
		(AddressSpace::create().unwrap(), TestFrameAllocator::default(), TestTlb::new(8))
	}

	#[test]
	fn first_touch_allocates_zeroed_frame_and_primes_tlb() {
		let (mut as_, frames, mut tlb) = env();
		as_.define_region(0x1000, 0x1000, true, true, false).unwrap();
		vm_fault(Some(&mut as_), &frames, &mut tlb, FaultType::Write, 0x1050).unwrap();
		let pte = as_.page_table().lookup(0x1000);
		assert_ne!(pte & VALID, 0);
		assert_ne!(pte & DIRTY, 0);
		assert_eq!(tlb.translate(0x1000), Some(pte));
		let mut buf = [0u8; 4096];
		frames.read(pte >> FRAME_SHIFT, &mut buf);
		assert_eq!(buf, [0u8; 4096]);
	}

	#[test]
	fn fault_outside_every_region_is_efault() {
		let (mut as_, frames, mut tlb) = env();
		let err = vm_fault(Some(&mut as_), &frames, &mut tlb, FaultType::Read, 0x9000).unwrap_err();
		assert_eq!(err, errno::EFAULT);
	}

	#[test]
	fn write_to_read_only_region_is_efault() {
		let (mut as_, frames, mut tlb) = env();
		as_.define_region(0x1000, 0x1000, true, false, false).unwrap();
		let err = vm_fault(Some(&mut as_), &frames, &mut tlb, FaultType::Write, 0x1000).unwrap_err();
		assert_eq!(err, errno::EFAULT);
	}

	#[test]
	fn loading_flag_permits_write_to_read_only_region() {
		let (mut as_, frames, mut tlb) = env();
		as_.define_region(0x1000, 0x1000, true, false, false).unwrap();
		as_.prepare_load(&mut tlb);
		vm_fault(Some(&mut as_), &frames, &mut tlb, FaultType::Write, 0x1000).unwrap();
	}

	#[test]
	fn revisiting_a_valid_readonly_entry_just_reprimes_the_tlb() {
		let (mut as_, frames, mut tlb) = env();
		as_.define_region(0x1000, 0x1000, true, false, false).unwrap();
		vm_fault(Some(&mut as_), &frames, &mut tlb, FaultType::Read, 0x1000).unwrap();
		tlb.flush();
		vm_fault(Some(&mut as_), &frames, &mut tlb, FaultType::Read, 0x1000).unwrap();
		assert!(tlb.translate(0x1000).is_some());
	}

	#[test]
	fn write_to_valid_readonly_entry_after_loading_ends_is_efault() {
		let (mut as_, frames, mut tlb) = env();
		as_.define_region(0x1000, 0x1000, true, false, false).unwrap();
		as_.prepare_load(&mut tlb);
		vm_fault(Some(&mut as_), &frames, &mut tlb, FaultType::Write, 0x1000).unwrap();
		as_.complete_load(&mut tlb);
		let err = vm_fault(Some(&mut as_), &frames, &mut tlb, FaultType::Write, 0x1000).unwrap_err();
		assert_eq!(err, errno::EFAULT);
	}

	#[test]
	fn readonly_fault_type_is_always_rejected() {
		let (mut as_, frames, mut tlb) = env();
		let err =
			vm_fault(Some(&mut as_), &frames, &mut tlb, FaultType::ReadOnly, 0x1000).unwrap_err();
		assert_eq!(err, errno::EFAULT);
	}

	#[test]
	fn no_address_space_is_efault() {
		let (frames, mut tlb) = (TestFrameAllocator::default(), TestTlb::new(4));
		let err = vm_fault(None, &frames, &mut tlb, FaultType::Read, 0x1000).unwrap_err();
		assert_eq!(err, errno::EFAULT);
	}

	#[test]
	fn unknown_trap_code_is_einval() {
		let (mut as_, frames, mut tlb) = env();
		let err = vm_fault_raw(Some(&mut as_), &frames, &mut tlb, 9, 0x1000).unwrap_err();
		assert_eq!(err, errno::EINVAL);
	}

	#[test]
	fn region_with_no_permissions_gets_a_frame_but_an_invalid_entry() {
		let (mut as_, frames, mut tlb) = env();
		as_.define_region(0x1000, 0x1000, false, false, false).unwrap();
		vm_fault(Some(&mut as_), &frames, &mut tlb, FaultType::Read, 0x1000).unwrap();
		let pte = as_.page_table().lookup(0x1000);
		assert_eq!(pte & VALID, 0, "a region with no permissions must not produce a valid PTE");
		assert_eq!(pte & DIRTY, 0);
	}
}
