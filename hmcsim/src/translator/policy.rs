//! Migration policies

// Imports
use {
	super::{
		history::{DistanceTable, HistoryTable},
		mapping::PageIdx,
		Module,
	},
	itertools::Itertools,
	std::{cmp::Reverse, fmt},
};

/// Everything a policy may look at when an epoch ends
#[derive(Clone, Copy, Debug)]
pub struct EpochView<'a> {
	/// Accesses of the epoch, by physical page
	pub history: &'a HistoryTable,

	/// Distances from each cpu to each module
	pub distances: &'a DistanceTable,

	/// Modules, by module index
	pub modules: &'a [Module],

	/// Number of registered cpus
	pub cpus: usize,

	/// Offset bits of a page
	pub offset_bits: u32,
}

impl EpochView<'_> {
	/// Returns the index of the module holding physical page `page`
	pub fn module_of(&self, page: PageIdx) -> Option<usize> {
		let addr = page.to_u64() << self.offset_bits;
		self.modules.iter().position(|module| module.range.contains(addr))
	}
}

/// A swap a policy would like to happen
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub struct SwapPlan {
	/// Physical page to move
	pub page: PageIdx,

	/// Module currently holding the page
	pub from: usize,

	/// Module to move the page to
	pub to: usize,

	/// Cost of the page during the epoch, higher is more urgent
	pub cost: u64,
}

/// Migration policy
pub trait MigrationPolicy: fmt::Debug {
	/// Returns the name of this policy
	fn name(&self) -> &'static str;

	/// Plans the swaps for the epoch that just ended.
	///
	/// The translator ranks and bounds the result, so order doesn't matter.
	fn plan(&self, view: &EpochView<'_>) -> Vec<SwapPlan>;

	/// Checks that this policy can run with the given distances
	fn check(&self, _distances: &DistanceTable, _cpus: usize, _modules: usize) -> Result<(), anyhow::Error> {
		Ok(())
	}
}

/// Distance-weighted policy.
///
/// Moves pages whose access cost is above a threshold to the module closest to the
/// cpu accessing them the most.
#[derive(Clone, Debug)]
pub struct GlobalPolicy {
	/// Cost above which a page is a candidate
	pub cost_threshold: u64,
}

impl MigrationPolicy for GlobalPolicy {
	fn name(&self) -> &'static str {
		"global"
	}

	fn plan(&self, view: &EpochView<'_>) -> Vec<SwapPlan> {
		view.history
			.iter()
			.filter_map(|(page, history)| {
				let from = view.module_of(page)?;
				let cost = history
					.per_cpu()
					.iter()
					.enumerate()
					.map(|(cpu_idx, &count)| count.saturating_mul(view.distances.get(cpu_idx, from).unwrap_or(0)))
					.fold(0_u64, u64::saturating_add);
				if cost <= self.cost_threshold {
					return None;
				}

				// Note: `position_min_by_key` keeps the first of equal elements, so
				//       ties go to the lowest cpu and module indices.
				let hot_cpu = history.per_cpu().iter().position_min_by_key(|&&count| Reverse(count))?;
				let to = (0..view.modules.len())
					.position_min_by_key(|&module_idx| view.distances.get(hot_cpu, module_idx).unwrap_or(u64::MAX))?;
				tracing::trace!(?page, cost, hot_cpu, from, to, "Found hot page");

				(to != from).then_some(SwapPlan { page, from, to, cost })
			})
			.collect()
	}

	fn check(&self, distances: &DistanceTable, cpus: usize, modules: usize) -> Result<(), anyhow::Error> {
		distances.ensure_complete(cpus, modules)
	}
}

/// Linear policy.
///
/// Moves pages accessed more than a threshold one module closer to module `0`.
#[derive(Clone, Debug)]
pub struct LinearPolicy {
	/// Accesses above which a page is a candidate
	pub threshold: u64,
}

impl MigrationPolicy for LinearPolicy {
	fn name(&self) -> &'static str {
		"linear"
	}

	fn plan(&self, view: &EpochView<'_>) -> Vec<SwapPlan> {
		view.history
			.iter()
			.filter_map(|(page, history)| {
				let cost = history.total();
				let from = view.module_of(page)?;
				(cost > self.threshold && from > 0).then(|| SwapPlan {
					page,
					from,
					to: from - 1,
					cost,
				})
			})
			.collect()
	}
}
