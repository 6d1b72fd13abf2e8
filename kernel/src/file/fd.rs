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

//! Per-process file descriptor table.
//!
//! The table is a fixed-length array of [`limits::OPEN_MAX`] slots plus a `next` hint used to
//! speed up allocation. The hint is *not* POSIX's "lowest available descriptor" rule: it is
//! only ever set to the index that was just freed or the index found by the last scan, so it
//! can point at a descriptor higher than some other, still-free, lower one. This matches the
//! allocator it is modelled on rather than `dup`'s POSIX-mandated minimality, and is called out
//! as a deliberate, documented departure rather than a bug.

use crate::file::{registry::OpenFileRegistry, OpenFile};
use utils::{
	collections::vec::Vec,
	errno::{self, EResult},
	limits::OPEN_MAX,
	lock::Mutex,
	ptr::arc::Arc,
};

/// The file descriptors stdio is bootstrapped onto.
const STDOUT_FD: usize = 1;
const STDERR_FD: usize = 2;

const O_WRONLY: i32 = 0o1;

/// Where a newly duplicated descriptor should land.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NewFdConstraint {
	/// Any descriptor `>= min` is acceptable; the table picks the lowest free one (`fcntl`
	/// `F_DUPFD` semantics).
	Min(u32),
	/// The descriptor must be exactly `fd` (`dup2` semantics).
	Fixed(u32),
}

/// A process's table of open file descriptors.
pub struct DescriptorTable {
	slots: Vec<Option<Arc<Mutex<OpenFile>>>>,
	/// The lowest descriptor the next allocation is known to be able to use, or `None` if the
	/// table is known to be full.
	next: Option<usize>,
}

impl DescriptorTable {
	/// Creates a table with file descriptors 1 and 2 bound to the console, opened through `vfs`.
	///
	/// Descriptor 0 is deliberately left unbound, matching this kernel's historical choice; a
	/// process wanting stdin has to `open` it itself.
	///
	/// Failure to open the console is treated as fatal: a process cannot run without stdio, the
	/// same way the kernel cannot boot without being able to reach its root filesystem.
	pub fn create(registry: &OpenFileRegistry, vfs: &dyn crate::file::vfs::Vfs) -> Self {
		let mut slots = Vec::with_len(OPEN_MAX, None).expect("out of memory during fd bootstrap");
		for fd in [STDOUT_FD, STDERR_FD] {
			let vnode = vfs
				.open("con:", O_WRONLY, 0)
				.expect("unable to open the console for stdio");
			let node = registry
				.add(OpenFile::new(vnode, O_WRONLY))
				.expect("out of memory during fd bootstrap");
			slots[fd] = Some(node);
		}
		Self {
			slots,
			next: Some(STDERR_FD + 1),
		}
	}

	/// Returns whether every slot is occupied.
	pub fn is_full(&self) -> bool {
		self.next.is_none()
	}

	/// Returns the lowest bound descriptor, if any, at or above `fd`.
	fn scan_from(&self, fd: usize) -> Option<usize> {
		(fd..self.slots.len()).find(|&i| self.slots[i].is_none())
	}

	/// Consumes the current hint and advances it, for use once the caller has checked
	/// [`is_full`](Self::is_full).
	fn take_next(&mut self) -> usize {
		let fd = self.next.expect("descriptor table is full");
		self.next = self.scan_from(fd + 1);
		fd
	}

	/// Lowers the hint to `fd` if `fd` is free and lower than the current hint (or the table was
	/// full). Used to undo a tentative allocation when the open that was going to fill it
	/// failed, instead of leaking the slot until the next full scan.
	fn release_hint(&mut self, fd: usize) {
		match self.next {
			Some(next) if fd < next => self.next = Some(fd),
			None => self.next = Some(fd),
			_ => {}
		}
	}

	/// Unconditionally points the hint at `fd`, mirroring what closing a descriptor does.
	fn reuse_hint(&mut self, fd: usize) {
		self.next = Some(fd);
	}

	/// Returns whether `fd` is a valid index bound to an open file.
	pub fn validate(&self, fd: i32) -> bool {
		fd >= 0 && (fd as usize) < self.slots.len() && self.slots[fd as usize].is_some()
	}

	/// Returns the open file bound to `fd`, if any.
	pub fn get(&self, fd: i32) -> Option<Arc<Mutex<OpenFile>>> {
		if fd < 0 {
			return None;
		}
		self.slots.get(fd as usize).and_then(|s| s.clone())
	}

	/// Reserves the lowest free descriptor for `open` to bind once the vnode has been resolved.
	///
	/// On failure the caller must call [`release`](Self::release) with the returned descriptor
	/// instead of [`bind`](Self::bind)ing it, to avoid leaking the hint past this call (the one
	/// documented concurrency/bookkeeping bug this table fixes relative to the allocator it is
	/// modelled on).
	pub fn reserve(&mut self) -> EResult<usize> {
		if self.is_full() {
			return Err(errno::EMFILE);
		}
		Ok(self.take_next())
	}

	/// Releases a descriptor reserved by [`reserve`](Self::reserve) whose open ultimately
	/// failed.
	pub fn release(&mut self, fd: usize) {
		self.release_hint(fd);
	}

	/// Binds `fd` to `node`. `fd` must have come from [`reserve`](Self::reserve) or be a slot
	/// about to be overwritten by `dup2`.
	pub fn bind(&mut self, fd: usize, node: Arc<Mutex<OpenFile>>) {
		self.slots[fd] = Some(node);
	}

	/// Closes `fd`, decrementing the underlying open file's reference count through `registry`
	/// and freeing the slot.
	pub fn close(&mut self, fd: usize, registry: &OpenFileRegistry) {
		if let Some(node) = self.slots[fd].take() {
			registry.close_node(&node);
		}
		self.reuse_hint(fd);
	}

	/// Implements `dup2`/`fcntl(F_DUPFD)`: binds `oldfd`'s open file at a descriptor chosen
	/// according to `constraint`, returning the new descriptor.
	pub fn duplicate(
		&mut self,
		oldfd: i32,
		constraint: NewFdConstraint,
		registry: &OpenFileRegistry,
	) -> EResult<i32> {
		let node = self.get(oldfd).ok_or(errno::EBADF)?;
		let newfd = match constraint {
			NewFdConstraint::Fixed(fd) => fd as usize,
			NewFdConstraint::Min(min) => {
				self.scan_from(min as usize).unwrap_or(self.slots.len())
			}
		};
		if newfd >= self.slots.len() {
			return Err(errno::EBADF);
		}
		if oldfd as usize == newfd {
			return Ok(newfd as i32);
		}
		if self.slots[newfd].is_some() {
			self.close(newfd, registry);
			// `close` just retargeted the hint at `newfd`, which is about to be bound again
			// below: advance past it so the hint still names a genuinely free slot, the same
			// extra scan the allocator this is modelled on performs before rebinding.
			if self.next == Some(newfd) {
				self.next = self.scan_from(newfd + 1);
			}
		}
		node.lock().inc_ref();
		self.bind(newfd, node);
		Ok(newfd as i32)
	}

	/// Closes every bound descriptor, tearing the table down alongside its process.
	pub fn destroy(mut self, registry: &OpenFileRegistry) {
		for fd in 0..self.slots.len() {
			if self.slots[fd].is_some() {
				self.close(fd, registry);
			}
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::file::vfs::test::TestVfs;

	fn table() -> (DescriptorTable, OpenFileRegistry, TestVfs) {
		let registry = OpenFileRegistry::create();
		let vfs = TestVfs::default();
		let table = DescriptorTable::create(&registry, &vfs);
		(table, registry, vfs)
	}

	#[test]
	fn bootstrap_binds_stdio() {
		let (table, _registry, _vfs) = table();
		assert!(!table.validate(0), "fd 0 is left unbound by this kernel");
		assert!(table.validate(1));
		assert!(table.validate(2));
		assert!(!table.validate(3));
	}

	#[test]
	fn reserve_picks_lowest_free() {
		let (mut table, registry, vfs) = table();
		let fd = table.reserve().unwrap();
		assert_eq!(fd, 3);
		let node = registry
			.add(OpenFile::new(vfs.open("/a", 0o100, 0).unwrap(), 0))
			.unwrap();
		table.bind(fd, node);
		let fd = table.reserve().unwrap();
		assert_eq!(fd, 4);
		table.release(fd);
		let fd = table.reserve().unwrap();
		assert_eq!(fd, 4);
	}

	#[test]
	fn close_reuses_hint_even_if_it_regresses() {
		let (mut table, registry, vfs) = table();
		let fd_a = table.reserve().unwrap();
		table.bind(
			fd_a,
			registry
				.add(OpenFile::new(vfs.open("/a", 0o100, 0).unwrap(), 0))
				.unwrap(),
		);
		let fd_b = table.reserve().unwrap();
		table.bind(
			fd_b,
			registry
				.add(OpenFile::new(vfs.open("/b", 0o100, 0).unwrap(), 0))
				.unwrap(),
		);
		assert!(fd_b > fd_a);
		table.close(fd_b, &registry);
		// closing the higher fd still moves the hint down to it, matching the allocator's
		// documented (not POSIX-minimal) behaviour.
		let fd = table.reserve().unwrap();
		assert_eq!(fd, fd_b);
	}

	#[test]
	fn dup2_shares_the_open_file_and_bumps_refcount() {
		let (mut table, registry, vfs) = table();
		let fd = table.reserve().unwrap();
		let node = registry
			.add(OpenFile::new(vfs.open("/a", 0o100, 0).unwrap(), 0))
			.unwrap();
		table.bind(fd, node.clone());
		table
			.duplicate(fd as i32, NewFdConstraint::Fixed(10), &registry)
			.unwrap();
		assert_eq!(node.lock().reference_count(), 2);
		assert!(table.validate(10));
	}

	#[test]
	fn dup2_onto_self_is_a_no_op() {
		let (mut table, registry, _vfs) = table();
		let newfd = table.duplicate(1, NewFdConstraint::Fixed(1), &registry).unwrap();
		assert_eq!(newfd, 1);
	}

	#[test]
	fn dup2_onto_an_occupied_fd_does_not_leave_the_hint_pointing_at_it() {
		let (mut table, registry, vfs) = table();
		let fd_a = table.reserve().unwrap();
		table.bind(
			fd_a,
			registry
				.add(OpenFile::new(vfs.open("/a", 0o100, 0).unwrap(), 0))
				.unwrap(),
		);
		let fd_b = table.reserve().unwrap();
		table.bind(
			fd_b,
			registry
				.add(OpenFile::new(vfs.open("/b", 0o100, 0).unwrap(), 0))
				.unwrap(),
		);
		// dup2(fd_a, fd_b): fd_b was occupied, so it gets closed and rebound to fd_a's file.
		table.duplicate(fd_a as i32, NewFdConstraint::Fixed(fd_b as u32), &registry).unwrap();
		// The hint must not be left pointing at fd_b, which is occupied again: reserving a
		// fresh descriptor must not collide with (and silently clobber) it.
		let fd_c = table.reserve().unwrap();
		assert_ne!(fd_c, fd_b, "reserve must never hand out an already-bound descriptor");
		table.bind(
			fd_c,
			registry
				.add(OpenFile::new(vfs.open("/c", 0o100, 0).unwrap(), 0))
				.unwrap(),
		);
		assert!(table.validate(fd_b));
	}

	#[test]
	fn destroy_closes_every_descriptor() {
		let (mut table, registry, vfs) = table();
		let fd = table.reserve().unwrap();
		table.bind(
			fd,
			registry
				.add(OpenFile::new(vfs.open("/a", 0o100, 0).unwrap(), 0))
				.unwrap(),
		);
		table.destroy(&registry);
		assert_eq!(registry.len(), 0);
	}
}
