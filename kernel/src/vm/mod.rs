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

//! Per-process virtual memory: address spaces backed by a three-level software page table, and
//! the TLB-refill fault handler that keeps a software TLB consistent with it.
//!
//! ```text
//! AddressSpace ──┬── PageTable (3-level, sparse)  ──► physical frames (via FrameAllocator)
//!                └── RegionList (permissions for addresses with no page table entry yet)
//!
//! vm_fault(as, frame_allocator, tlb, fault_type, vaddr) -> EResult<()>
//! ```
//!
//! Booting, the scheduler, the physical frame allocator and the hardware TLB itself live
//! outside this crate; [`frame::FrameAllocator`] and [`tlb::Tlb`] are the traits the fault
//! handler consumes instead of talking to hardware directly.

pub mod address_space;
pub mod fault;
pub mod frame;
pub mod page_table;
pub mod region;
pub mod tlb;

pub use address_space::AddressSpace;
pub use fault::{vm_fault, vm_fault_raw, FaultType};
