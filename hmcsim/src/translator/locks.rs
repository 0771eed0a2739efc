//! Locked pages

// Imports
use {
	super::mapping::PageIdx,
	crate::request::SwapTag,
	std::collections::{btree_map, BTreeMap},
};

/// Pages currently being swapped
#[derive(Clone, Debug, Default)]
pub struct LockedPages {
	/// Tag of each locked page
	pages: BTreeMap<PageIdx, SwapTag>,

	/// Acknowledgements still expected for each tag
	pending_acks: BTreeMap<SwapTag, usize>,
}

impl LockedPages {
	/// Creates an empty set
	pub fn new() -> Self {
		Self::default()
	}

	/// Locks `pages` under `tag`, until `acks` acknowledgements arrive
	pub fn lock(&mut self, tag: SwapTag, pages: impl IntoIterator<Item = PageIdx>, acks: usize) {
		debug_assert!(acks > 0, "Locks must expect at least one acknowledgement");

		for page in pages {
			let prev_tag = self.pages.insert(page, tag);
			debug_assert!(prev_tag.is_none(), "Page {page:?} was already locked");
		}
		self.pending_acks.insert(tag, acks);
	}

	/// Returns the tag `page` is locked under, if any
	pub fn tag_of(&self, page: PageIdx) -> Option<SwapTag> {
		self.pages.get(&page).copied()
	}

	/// Returns if `page` is locked
	pub fn is_locked(&self, page: PageIdx) -> bool {
		self.pages.contains_key(&page)
	}

	/// Returns the number of locked pages
	pub fn len(&self) -> usize {
		self.pages.len()
	}

	/// Returns if no pages are locked
	pub fn is_empty(&self) -> bool {
		self.pages.is_empty()
	}

	/// Registers an acknowledgement for `tag`.
	///
	/// Once the last expected acknowledgement arrives, unlocks every page under `tag`.
	pub fn acknowledge(&mut self, tag: SwapTag) -> Ack {
		let btree_map::Entry::Occupied(mut entry) = self.pending_acks.entry(tag) else {
			return Ack::Unknown;
		};

		*entry.get_mut() -= 1;
		if *entry.get() > 0 {
			return Ack::Pending(*entry.get());
		}
		entry.remove();

		let mut released = vec![];
		self.pages.retain(|&page, &mut page_tag| match page_tag == tag {
			true => {
				released.push(page);
				false
			},
			false => true,
		});

		Ack::Released(released)
	}
}

/// Result of [`LockedPages::acknowledge`]
#[derive(PartialEq, Eq, Clone, Debug)]
pub enum Ack {
	/// The tag still expects this many acknowledgements
	Pending(usize),

	/// All acknowledgements arrived, these pages were unlocked
	Released(Vec<PageIdx>),

	/// The tag wasn't locking anything
	Unknown,
}
