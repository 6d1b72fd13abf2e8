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

//! The boundary between the file-descriptor layer and the virtual filesystem.
//!
//! The VFS proper (path resolution, mount points, on-disk formats) lives outside this crate.
//! [`Vnode`] and [`Vfs`] are the two traits [`open`](crate::file::syscall::open) and its
//! siblings consume; anything implementing them can back a file descriptor.

use utils::errno::EResult;

/// An open, already-resolved file-like object: a regular file, a console, a pipe, ...
///
/// This stands in for `VOP_READ`/`VOP_WRITE`/`VOP_STAT`/`VOP_ISSEEKABLE` on a resolved vnode.
/// Offsets are supplied by the caller on every call; a `Vnode` does not track its own read/write
/// position, that is [`OpenFile`](crate::file::OpenFile)'s job, so that two descriptors sharing
/// one `Vnode` through a VFS-level cache (not modelled here) would not corrupt each other's
/// cursor.
pub trait Vnode: Send {
	/// Reads up to `buf.len()` bytes starting at `offset`, returning the number of bytes
	/// actually transferred.
	fn read(&mut self, offset: u64, buf: &mut [u8]) -> EResult<usize>;

	/// Writes `buf` starting at `offset`, returning the number of bytes actually transferred.
	fn write(&mut self, offset: u64, buf: &[u8]) -> EResult<usize>;

	/// Returns the current size of the backing object, consulted for `O_APPEND` and
	/// `SEEK_END`.
	fn size(&self) -> EResult<u64>;

	/// Returns whether the vnode supports seeking. Console and pipe vnodes do not.
	fn is_seekable(&self) -> bool;
}

/// The boundary resolving a path into an open [`Vnode`], standing in for `vfs_open`.
pub trait Vfs: Send + Sync {
	/// Resolves `path` and opens it, honoring `flags` (`O_CREAT`, `O_TRUNC`, ...) and `mode`
	/// (the permission bits used if the call creates a file).
	fn open(&self, path: &str, flags: i32, mode: u32) -> EResult<alloc::boxed::Box<dyn Vnode>>;
}
