//! Utilities

// Modules
pub mod logger;

// Imports
use std::{cell::RefCell, fmt};

/// [`fmt::Display`] helper to display using a `FnMut(&mut fmt::Formatter)`
pub struct DisplayWrapper<F: FnMut(&mut fmt::Formatter) -> fmt::Result>(RefCell<F>);

impl<F: FnMut(&mut fmt::Formatter) -> fmt::Result> DisplayWrapper<F> {
	/// Creates a new display wrapper
	#[must_use]
	pub const fn new(func: F) -> Self {
		Self(RefCell::new(func))
	}
}


impl<F: FnMut(&mut fmt::Formatter) -> fmt::Result> fmt::Display for DisplayWrapper<F> {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		// Note: `f` cannot be re-entrant, so this cannot fail
		self.0.borrow_mut()(f)
	}
}

/// Formats an address range as `[0x..., 0x...]`
pub fn fmt_addr_range(f: &mut fmt::Formatter, first: u64, last: u64) -> fmt::Result {
	write!(f, "[{first:#010x}, {last:#010x}]")
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn display_wrapper_calls_closure() {
		let mut calls = 0;
		let wrapper = DisplayWrapper::new(|f| {
			calls += 1;
			fmt_addr_range(f, 0, 0x3fff_ffff)
		});
		assert_eq!(wrapper.to_string(), "[0x00000000, 0x3fffffff]");
		assert_eq!(wrapper.to_string(), "[0x00000000, 0x3fffffff]");
		drop(wrapper);
		assert_eq!(calls, 2);
	}
}
