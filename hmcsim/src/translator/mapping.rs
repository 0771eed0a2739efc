//! Mapping table

// Imports
use std::fmt;

/// Page index.
///
/// An address shifted right by the translator's offset bits.
#[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Hash)]
pub struct PageIdx(u64);

impl fmt::Debug for PageIdx {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_tuple("PageIdx").field(&format_args!("{:#x}", self.0)).finish()
	}
}

impl PageIdx {
	/// Creates a page index
	pub const fn new(idx: u64) -> Self {
		Self(idx)
	}

	/// Returns the page index as a `u64`
	pub fn to_u64(self) -> u64 {
		self.0
	}
}

/// Mapping table.
///
/// Dense map from CPU-side page indices to physical page indices, initially the
/// identity. Entries only ever change by swapping two of them, so the table stays
/// a permutation and the inverse is kept alongside it.
#[derive(Clone)]
pub struct MappingTable {
	/// First page index
	base: u64,

	/// Physical page of each CPU-side page, offset by `base`
	forward: Vec<u64>,

	/// CPU-side page of each physical page, offset by `base`
	inverse: Vec<u64>,
}

impl MappingTable {
	/// Creates an identity mapping for `len` pages starting at `base`
	pub fn identity(base: PageIdx, len: usize) -> Self {
		let forward = (0..len as u64).map(|idx| base.0 + idx).collect::<Vec<_>>();
		Self {
			base: base.0,
			inverse: forward.clone(),
			forward,
		}
	}

	/// Returns the number of pages mapped
	pub fn len(&self) -> usize {
		self.forward.len()
	}

	/// Returns if no pages are mapped
	pub fn is_empty(&self) -> bool {
		self.forward.is_empty()
	}

	/// Returns the physical page a CPU-side page maps to
	pub fn lookup(&self, page: PageIdx) -> Option<PageIdx> {
		self.forward.get(self.slot(page)?).copied().map(PageIdx)
	}

	/// Returns the CPU-side page that maps to a physical page
	pub fn source_of(&self, phys: PageIdx) -> Option<PageIdx> {
		self.inverse.get(self.slot(phys)?).copied().map(PageIdx)
	}

	/// Exchanges the physical pages of CPU-side pages `lhs` and `rhs`
	///
	/// # Panics
	/// Panics if either page isn't mapped by this table.
	pub fn swap(&mut self, lhs: PageIdx, rhs: PageIdx) {
		let lhs_slot = self.slot(lhs).filter(|&slot| slot < self.len()).expect("Page wasn't mapped");
		let rhs_slot = self.slot(rhs).filter(|&slot| slot < self.len()).expect("Page wasn't mapped");

		self.forward.swap(lhs_slot, rhs_slot);
		for slot in [lhs_slot, rhs_slot] {
			let phys_slot = (self.forward[slot] - self.base) as usize;
			self.inverse[phys_slot] = self.base + slot as u64;
		}
	}

	/// Returns the slot of `page` within the tables
	fn slot(&self, page: PageIdx) -> Option<usize> {
		let offset = page.0.checked_sub(self.base)?;
		usize::try_from(offset).ok()
	}
}

impl fmt::Debug for MappingTable {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		// Note: Tables are usually huge, so only show the remapped entries.
		let remapped = self
			.forward
			.iter()
			.enumerate()
			.filter(|&(slot, &phys)| self.base + slot as u64 != phys)
			.map(|(slot, &phys)| (PageIdx(self.base + slot as u64), PageIdx(phys)));

		f.debug_struct("MappingTable")
			.field("base", &PageIdx(self.base))
			.field("len", &self.len())
			.field("remapped", &MapEntries(remapped))
			.finish()
	}
}

/// Map entries, displayed with `debug_map`
struct MapEntries<I>(I);

impl<I: Iterator<Item = (PageIdx, PageIdx)> + Clone> fmt::Debug for MapEntries<I> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_map().entries(self.0.clone()).finish()
	}
}
