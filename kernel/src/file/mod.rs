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

//! Per-process file I/O: descriptor tables, the process-wide open-file registry and the POSIX
//! syscalls built on top of them.
//!
//! ```text
//! fd 1 ──┐
//! fd 2 ──┼──► DescriptorTable ──► Arc<Mutex<OpenFile>> ──► Box<dyn Vnode>
//! fd 3 ──┘         (per process)        (shared by dup2)      (the VFS)
//! ```
//!
//! (fd 0 is left unbound at bootstrap, a historical quirk this kernel preserves; see
//! [`DescriptorTable::create`](fd::DescriptorTable::create).)
//!
//! A descriptor table never holds an `OpenFile` directly; it holds a reference-counted handle
//! shared with every other descriptor `dup2` pointed at the same open instance, and with the
//! process's [`OpenFileRegistry`], which exists purely so that a process's open files can be
//! enumerated and torn down in one place.

mod fd;
mod open_file;
mod registry;
pub mod syscall;
pub mod vfs;

pub use fd::{DescriptorTable, NewFdConstraint};
pub use open_file::OpenFile;
pub use registry::OpenFileRegistry;
