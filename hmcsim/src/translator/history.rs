//! Access history

// Imports
use {super::mapping::PageIdx, std::collections::BTreeMap};

/// Accesses to a single page during an epoch
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct PageHistory {
	/// Accesses by each cpu, by cpu index
	per_cpu: Vec<u64>,

	/// Accesses from origins that aren't registered cpus
	unattributed: u64,
}

impl PageHistory {
	/// Returns the accesses by each cpu
	pub fn per_cpu(&self) -> &[u64] {
		&self.per_cpu
	}

	/// Returns the accesses from unregistered origins
	pub fn unattributed(&self) -> u64 {
		self.unattributed
	}

	/// Returns all accesses
	pub fn total(&self) -> u64 {
		self.per_cpu.iter().sum::<u64>() + self.unattributed
	}
}

/// History table.
///
/// Sparse, only pages accessed during the current epoch have an entry.
#[derive(Clone, Debug)]
pub struct HistoryTable {
	/// Number of cpus tracked
	cpus: usize,

	/// History of each accessed page, by physical page
	pages: BTreeMap<PageIdx, PageHistory>,
}

impl HistoryTable {
	/// Creates an empty history table for `cpus` cpus
	pub fn new(cpus: usize) -> Self {
		Self {
			cpus,
			pages: BTreeMap::new(),
		}
	}

	/// Registers an access to `page` by cpu `cpu_idx`, or by an unknown origin if `None`
	///
	/// # Panics
	/// Panics if `cpu_idx` isn't a tracked cpu.
	pub fn record(&mut self, page: PageIdx, cpu_idx: Option<usize>) {
		let cpus = self.cpus;
		let history = self.pages.entry(page).or_insert_with(|| PageHistory {
			per_cpu:      vec![0; cpus],
			unattributed: 0,
		});

		match cpu_idx {
			Some(cpu_idx) => history.per_cpu[cpu_idx] += 1,
			None => history.unattributed += 1,
		}
	}

	/// Returns the history of a page
	pub fn get(&self, page: PageIdx) -> Option<&PageHistory> {
		self.pages.get(&page)
	}

	/// Returns all accessed pages, ordered by page
	pub fn iter(&self) -> impl Iterator<Item = (PageIdx, &PageHistory)> + '_ {
		self.pages.iter().map(|(&page, history)| (page, history))
	}

	/// Returns the number of accessed pages
	pub fn len(&self) -> usize {
		self.pages.len()
	}

	/// Returns if no pages were accessed
	pub fn is_empty(&self) -> bool {
		self.pages.is_empty()
	}

	/// Forgets all accesses
	pub fn clear(&mut self) {
		self.pages.clear();
	}
}

/// Distance table.
///
/// Cost of an access from each cpu to each module.
#[derive(Clone, Debug)]
pub struct DistanceTable {
	/// Number of modules per row
	modules: usize,

	/// Distances, by `cpu_idx * modules + module_idx`
	distances: Vec<Option<u64>>,
}

impl DistanceTable {
	/// Creates a table with no distances
	pub fn new(cpus: usize, modules: usize) -> Self {
		Self {
			modules,
			distances: vec![None; cpus * modules],
		}
	}

	/// Sets the distance from `cpu_idx` to `module_idx`
	pub fn set(&mut self, cpu_idx: usize, module_idx: usize, distance: u64) -> Result<(), anyhow::Error> {
		let slot = self.slot(cpu_idx, module_idx)?;
		self.distances[slot] = Some(distance);
		Ok(())
	}

	/// Returns the distance from `cpu_idx` to `module_idx`
	pub fn get(&self, cpu_idx: usize, module_idx: usize) -> Option<u64> {
		self.distances.get(self.slot(cpu_idx, module_idx).ok()?).copied().flatten()
	}

	/// Ensures every distance between the first `cpus` cpus and `modules` modules is set
	pub fn ensure_complete(&self, cpus: usize, modules: usize) -> Result<(), anyhow::Error> {
		for cpu_idx in 0..cpus {
			for module_idx in 0..modules {
				anyhow::ensure!(
					self.get(cpu_idx, module_idx).is_some(),
					"Missing distance from cpu #{cpu_idx} to module #{module_idx}"
				);
			}
		}

		Ok(())
	}

	fn slot(&self, cpu_idx: usize, module_idx: usize) -> Result<usize, anyhow::Error> {
		let slot = cpu_idx * self.modules + module_idx;
		anyhow::ensure!(
			module_idx < self.modules && slot < self.distances.len(),
			"Distance from cpu #{cpu_idx} to module #{module_idx} is outside of the table"
		);
		Ok(slot)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn records_by_cpu() {
		let mut history = HistoryTable::new(2);
		let page = PageIdx::new(7);
		history.record(page, Some(1));
		history.record(page, Some(1));
		history.record(page, Some(0));
		history.record(page, None);

		let page_history = history.get(page).unwrap();
		assert_eq!(page_history.per_cpu(), &[1, 2]);
		assert_eq!(page_history.unattributed(), 1);
		assert_eq!(page_history.total(), 4);

		history.clear();
		assert!(history.is_empty());
	}

	#[test]
	fn distances_must_be_complete() {
		let mut distances = DistanceTable::new(2, 2);
		distances.set(0, 0, 1).unwrap();
		distances.set(0, 1, 3).unwrap();
		distances.set(1, 0, 3).unwrap();
		assert!(distances.ensure_complete(2, 2).is_err());
		assert!(distances.ensure_complete(1, 2).is_ok());

		distances.set(1, 1, 1).unwrap();
		assert!(distances.ensure_complete(2, 2).is_ok());
		assert_eq!(distances.get(0, 1), Some(3));

		assert!(distances.set(0, 2, 1).is_err());
		assert!(distances.set(2, 0, 1).is_err());
	}
}
