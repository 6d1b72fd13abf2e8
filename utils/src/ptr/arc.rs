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

//! Atomically reference-counted pointer.
//!
//! This wraps [`alloc::sync::Arc`] behind a fallible constructor, so that call sites thread
//! allocation failure through [`AllocResult`] the same way the rest of the kernel's collections
//! do, instead of aborting on OOM at an arbitrary clone site.

use crate::errno::AllocResult;
use core::{
	fmt,
	ops::Deref,
};

extern crate alloc as alloc_crate;

/// A reference-counted pointer to a heap-allocated `T`.
pub struct Arc<T: ?Sized>(alloc_crate::sync::Arc<T>);

impl<T> Arc<T> {
	/// Allocates `data` on the heap and wraps it in a new `Arc`.
	pub fn new(data: T) -> AllocResult<Self> {
		Ok(Self(alloc_crate::sync::Arc::new(data)))
	}

	/// Returns the inner value if `this` is the only strong reference, consuming `this`
	/// otherwise returning it unchanged.
	pub fn into_inner(this: Self) -> Option<T> {
		alloc_crate::sync::Arc::into_inner(this.0)
	}
}

impl<T: ?Sized> Arc<T> {
	/// Returns the number of strong references to the pointee.
	pub fn strong_count(this: &Self) -> usize {
		alloc_crate::sync::Arc::strong_count(&this.0)
	}

	/// Returns `true` if the two pointers point to the same allocation.
	pub fn ptr_eq(a: &Self, b: &Self) -> bool {
		alloc_crate::sync::Arc::ptr_eq(&a.0, &b.0)
	}
}

impl<T: ?Sized> Clone for Arc<T> {
	fn clone(&self) -> Self {
		Self(self.0.clone())
	}
}

impl<T: ?Sized> Deref for Arc<T> {
	type Target = T;

	fn deref(&self) -> &Self::Target {
		&self.0
	}
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for Arc<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		fmt::Debug::fmt(&self.0, f)
	}
}
