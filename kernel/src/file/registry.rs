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

//! The process-wide table of currently-open files.
//!
//! One registry is created per process and torn down with it: this crate does not keep a
//! system-wide open-file table keyed by vnode identity. That makes the registry's only
//! invariant easy to state and to test: it holds exactly one strong reference per `OpenFile`
//! whose [`reference_count`](super::OpenFile::reference_count) is still above zero, and that
//! reference is dropped in the same step that count reaches zero.

use crate::file::OpenFile;
use utils::{
	collections::vec::Vec,
	errno::AllocResult,
	lock::Mutex,
	ptr::arc::Arc,
};

/// A process's bookkeeping list of open files, used to enumerate and tear them down in one
/// place without relying on ambient global state.
pub struct OpenFileRegistry {
	files: Mutex<Vec<Arc<Mutex<OpenFile>>>>,
}

impl OpenFileRegistry {
	/// Creates a new, empty registry.
	pub fn create() -> Self {
		Self {
			files: Mutex::new(Vec::new()),
		}
	}

	/// Registers `open_file`, returning the shared handle to store in a descriptor-table slot.
	pub fn add(&self, open_file: OpenFile) -> AllocResult<Arc<Mutex<OpenFile>>> {
		let node = Arc::new(Mutex::new(open_file))?;
		let mut files = self.files.lock();
		files.push(node.clone())?;
		Ok(node)
	}

	/// Decrements `node`'s reference count and, if it reaches zero, unlinks it from the
	/// registry. The `OpenFile` and its vnode are actually dropped once every strong reference
	/// to it — the registry's and any remaining descriptor-table slot's — is gone.
	pub fn close_node(&self, node: &Arc<Mutex<OpenFile>>) {
		let reached_zero = {
			let mut file = node.lock();
			file.dec_ref() == 0
		};
		if reached_zero {
			let mut files = self.files.lock();
			if let Some(pos) = files.iter().position(|f| Arc::ptr_eq(f, node)) {
				files.remove(pos);
			}
		}
	}

	/// Returns the number of files currently tracked by the registry.
	pub fn len(&self) -> usize {
		self.files.lock().len()
	}

	/// Tears down the registry.
	///
	/// Well-behaved teardown closes every descriptor first (see
	/// [`DescriptorTable::destroy`](crate::file::DescriptorTable::destroy)), which empties the
	/// registry as a side effect; this only exists to give process teardown an explicit,
	/// symmetrical counterpart to [`create`](Self::create) to call.
	pub fn destroy(self) {
		debug_assert_eq!(self.files.into_inner().len(), 0);
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::file::vfs::test::Console;
	use alloc::boxed::Box;

	#[test]
	fn add_and_close_drops_at_zero() {
		let registry = OpenFileRegistry::create();
		let node = registry.add(OpenFile::new(Box::new(Console), 0)).unwrap();
		assert_eq!(registry.len(), 1);
		assert_eq!(node.lock().reference_count(), 1);
		registry.close_node(&node);
		assert_eq!(registry.len(), 0);
	}

	#[test]
	fn dup_keeps_entry_until_last_close() {
		let registry = OpenFileRegistry::create();
		let node = registry.add(OpenFile::new(Box::new(Console), 0)).unwrap();
		node.lock().inc_ref();
		registry.close_node(&node);
		assert_eq!(registry.len(), 1, "first close must not drop a file with refs remaining");
		registry.close_node(&node);
		assert_eq!(registry.len(), 0);
	}
}
