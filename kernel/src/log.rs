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

//! Kernel-wide logging.
//!
//! A freestanding kernel has no stderr: log lines are kept in a ring buffer in memory instead,
//! readable through [`Logger::get_content`] (typically surfaced to a console driver or a debug
//! port by the binary embedding this crate). Tests assert on the buffer directly instead of
//! capturing stdout.

use core::{
	cmp::{min, Ordering},
	fmt,
	fmt::Write,
};
use utils::lock::IntMutex;

/// The size of the in-memory logs buffer, in bytes.
const LOGS_SIZE: usize = 65536;

/// The kernel's logger.
pub static LOGGER: IntMutex<Logger> = IntMutex::new(Logger::new());

/// Kernel logger, storing log lines into a ring buffer.
pub struct Logger {
	buf: [u8; LOGS_SIZE],
	read_head: usize,
	write_head: usize,
}

impl Logger {
	/// Creates a new, empty logger.
	const fn new() -> Self {
		Self {
			buf: [0; LOGS_SIZE],
			read_head: 0,
			write_head: 0,
		}
	}

	fn available_space(&self) -> usize {
		match self.write_head.cmp(&self.read_head) {
			Ordering::Equal => self.buf.len(),
			Ordering::Greater => self.buf.len() - (self.write_head - self.read_head),
			Ordering::Less => self.read_head - self.write_head - 1,
		}
	}

	/// Returns a slice over the logs currently held in the buffer, oldest first.
	///
	/// Note: this does not unwrap the ring, so a log line that wrapped around the buffer end
	/// will appear split across the start and end of the returned slice.
	pub fn get_content(&self) -> &[u8] {
		&self.buf
	}

	/// Appends `s` to the buffer, discarding whole lines from the front as needed to make room.
	pub fn push(&mut self, s: &[u8]) {
		if self.available_space() < s.len() {
			self.pop(s.len() - self.available_space());
		}
		let len = min(self.available_space(), s.len());
		let end = (self.write_head + len) % self.buf.len();
		if end < self.write_head {
			self.buf[self.write_head..].copy_from_slice(&s[0..(self.buf.len() - self.write_head)]);
			self.buf[0..end].copy_from_slice(&s[(self.buf.len() - self.write_head)..len]);
		} else {
			self.buf[self.write_head..end].copy_from_slice(&s[0..len]);
		}
		self.write_head = end;
	}

	/// Discards at least `n` bytes from the front, rounding up to a full line.
	fn pop(&mut self, n: usize) {
		let read_new = (self.read_head + n) % self.buf.len();
		if read_new >= self.write_head && read_new < self.read_head {
			self.read_head = self.write_head;
			return;
		}
		let mut i = 0;
		while i < self.buf.len() {
			let off = (read_new + i) % self.buf.len();
			if off >= self.write_head || self.buf[off] == b'\n' {
				break;
			}
			i += 1;
		}
		self.read_head = (read_new + i) % self.buf.len();
	}
}

impl Write for Logger {
	fn write_str(&mut self, s: &str) -> fmt::Result {
		self.push(s.as_bytes());
		Ok(())
	}
}

/// Writes a formatted log line. Used through [`log!`] and [`logln!`] only.
#[doc(hidden)]
pub fn _log(args: fmt::Arguments) {
	let mut logger = LOGGER.lock();
	fmt::write(&mut *logger, args).ok();
}

/// Logs a formatted message.
#[macro_export]
macro_rules! log {
	($($arg:tt)*) => {{
		$crate::log::_log(format_args!($($arg)*));
	}};
}

/// Same as [`log!`], appending a newline.
#[macro_export]
macro_rules! logln {
	() => ($crate::log!("\n"));
	($($arg:tt)*) => {{
		$crate::log::_log(format_args!($($arg)*));
		$crate::log::_log(format_args!("\n"));
	}};
}
