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

//! Mutual exclusion primitives based on a spinlock.
//!
//! [`Spin`] protects its wrapped data from concurrent access. In a kernel, concurrency does not
//! only come from other cores: an interrupt handler running on the same core can observe the
//! lock too. The `INT` generic parameter tells whether interrupts stay enabled while the lock is
//! held: [`Mutex`] leaves them enabled, [`IntMutex`] masks them for the duration of the critical
//! section.
//!
//! Masking interrupts is architecture-specific and is therefore left to the
//! [`InterruptControl`] boundary, which a freestanding kernel wires up to its own `cli`/`sti`
//! instructions. Outside of that context (as in this crate's tests), the default implementation
//! is a no-op: there is no interrupt controller to mask.

use core::{
	cell::UnsafeCell,
	fmt,
	fmt::Formatter,
	hint,
	ops::{Deref, DerefMut},
	sync::atomic::{AtomicBool, Ordering::{Acquire, Release}},
};

/// Boundary for masking and restoring interrupts around an [`IntMutex`] critical section.
///
/// A freestanding build supplies this via its own architecture backend; the default
/// implementation below is a no-op suitable for hosted tests.
pub trait InterruptControl {
	/// Returns whether interrupts are currently enabled.
	fn is_enabled() -> bool;
	/// Disables interrupts.
	fn disable();
	/// Enables interrupts.
	fn enable();
}

/// [`InterruptControl`] implementation used when no architecture backend is plugged in.
pub struct NoInterruptControl;

impl InterruptControl for NoInterruptControl {
	fn is_enabled() -> bool {
		true
	}

	fn disable() {}

	fn enable() {}
}

#[inline(always)]
fn spin(lock: &AtomicBool) {
	while lock.swap(true, Acquire) {
		hint::spin_loop();
	}
}

/// Wraps a value accessed by only one context at a time.
///
/// The `INT` generic parameter tells whether interrupts are allowed while locked. The default
/// value is `true` (interrupts stay enabled).
pub struct Spin<T: ?Sized, const INT: bool = true> {
	locked: AtomicBool,
	data: UnsafeCell<T>,
}

impl<T, const INT: bool> Spin<T, INT> {
	/// Creates a new instance wrapping `data`.
	pub const fn new(data: T) -> Self {
		Self {
			locked: AtomicBool::new(false),
			data: UnsafeCell::new(data),
		}
	}

	/// Consumes the lock, returning the inner value.
	pub fn into_inner(self) -> T {
		self.data.into_inner()
	}
}

impl<T: Default, const INT: bool> Default for Spin<T, INT> {
	fn default() -> Self {
		Self::new(Default::default())
	}
}

impl<T: ?Sized, const INT: bool> Spin<T, INT> {
	/// Acquires the lock, busy-waiting until it becomes available.
	///
	/// Returns a [`SpinGuard`] which releases the lock, and restores the prior interrupt state
	/// if `INT` is `false`, when dropped.
	pub fn lock(&self) -> SpinGuard<T, INT> {
		let int_state = if !INT {
			let enabled = NoInterruptControl::is_enabled();
			NoInterruptControl::disable();
			enabled
		} else {
			false
		};
		spin(&self.locked);
		SpinGuard {
			lock: self,
			int_state,
		}
	}
}

unsafe impl<T: ?Sized + Send, const INT: bool> Sync for Spin<T, INT> {}
unsafe impl<T: ?Sized + Send, const INT: bool> Send for Spin<T, INT> {}

impl<T: ?Sized + fmt::Debug, const INT: bool> fmt::Debug for Spin<T, INT> {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		fmt::Debug::fmt(&*self.lock(), f)
	}
}

/// RAII guard releasing the associated [`Spin`] on drop.
pub struct SpinGuard<'m, T: ?Sized, const INT: bool> {
	lock: &'m Spin<T, INT>,
	/// Interrupt state prior to locking. Only meaningful when `INT == false`.
	int_state: bool,
}

impl<T: ?Sized, const INT: bool> Deref for SpinGuard<'_, T, INT> {
	type Target = T;

	fn deref(&self) -> &Self::Target {
		unsafe { &*self.lock.data.get() }
	}
}

impl<T: ?Sized, const INT: bool> DerefMut for SpinGuard<'_, T, INT> {
	fn deref_mut(&mut self) -> &mut Self::Target {
		unsafe { &mut *self.lock.data.get() }
	}
}

impl<T: ?Sized, const INT: bool> Drop for SpinGuard<'_, T, INT> {
	fn drop(&mut self) {
		self.lock.locked.store(false, Release);
		if !INT && self.int_state {
			NoInterruptControl::enable();
		}
	}
}

/// A mutex which leaves interrupts enabled while locked.
///
/// Suitable for data that is never touched from interrupt context.
pub type Mutex<T> = Spin<T, true>;

/// Guard type returned by [`Mutex::lock`].
pub type MutexGuard<'m, T> = SpinGuard<'m, T, true>;

/// A mutex which masks interrupts for the duration of the critical section.
///
/// Used for data that may also be accessed from an interrupt handler, such as the page table
/// consulted by the TLB-refill fault handler.
pub type IntMutex<T> = Spin<T, false>;

/// Guard type returned by [`IntMutex::lock`].
pub type IntMutexGuard<'m, T> = SpinGuard<'m, T, false>;
