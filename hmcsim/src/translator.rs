//! Address translating controller
//!
//! Sits between the cpus and the memory endpoints, remapping pages between
//! endpoints as they get hot.

// Modules
pub mod history;
pub mod locks;
pub mod mapping;
pub mod policy;

// Exports
pub use self::{
	history::{DistanceTable, HistoryTable, PageHistory},
	locks::{Ack, LockedPages},
	mapping::{MappingTable, PageIdx},
	policy::{EpochView, GlobalPolicy, LinearPolicy, MigrationPolicy, SwapPlan},
};

// Imports
use {
	crate::{
		fabric::Fabric,
		node::{AddressRange, Node, NodeCore, NodeError, NodeId, NodeParams},
		outcome::Outcome,
		request::{Request, RequestId, RequestKind, TagAllocator},
	},
	std::{cmp::Reverse, error::Error, fmt},
};

/// Translator parameters
#[derive(Clone, Debug)]
pub struct TranslatorParams {
	/// Addresses translated
	pub range: AddressRange,

	/// Bits of an address
	pub address_bits: u32,

	/// Bits of the page offset, the migration granularity
	pub offset_bits: u32,

	/// Maximum cpus that may be registered
	pub max_cpus: usize,

	/// Maximum modules that may be registered
	pub max_modules: usize,
}

/// Migration settings
#[derive(Debug)]
pub struct Migration {
	/// Ticks of each epoch
	pub epoch_length: u64,

	/// Maximum swaps scheduled at the end of each epoch
	pub max_swaps_per_epoch: usize,

	/// Policy
	pub policy: Box<dyn MigrationPolicy>,
}

/// Memory module, an endpoint registered with the translator
#[derive(Clone, Copy, Debug)]
pub struct Module {
	/// Endpoint
	pub id: NodeId,

	/// Addresses held by the endpoint
	pub range: AddressRange,
}

/// A translated address
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub struct Translation {
	/// Physical address
	pub addr: u64,

	/// Physical page
	pub page: PageIdx,

	/// Module index holding the address
	pub module: usize,

	/// Endpoint holding the address
	pub endpoint: NodeId,
}

/// Translation error
#[derive(PartialEq, Eq, Clone, Debug)]
pub enum TranslateError {
	/// Address isn't translated by this translator
	OutOfRange { addr: u64, range: AddressRange },

	/// Address translated to something no module holds
	Unmapped { addr: u64, phys_addr: u64 },
}

impl fmt::Display for TranslateError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match *self {
			Self::OutOfRange { addr, range } => write!(f, "Address {addr:#010x} is outside of {range}"),
			Self::Unmapped { addr, phys_addr } => write!(
				f,
				"Address {addr:#010x} translated to {phys_addr:#010x}, which no module holds"
			),
		}
	}
}

impl Error for TranslateError {}

/// Translator statistics
#[derive(Clone, Debug, Default)]
pub struct TranslatorStats {
	/// Requests translated
	pub translated: u64,

	/// Requests that couldn't be translated
	pub faults: u64,

	/// Requests translated while their page was being swapped
	pub locked_translations: u64,

	/// Epochs evaluated
	pub epochs: u64,

	/// Swaps scheduled
	pub swaps_scheduled: u64,

	/// Swaps planned, but left out for lack of capacity
	pub swaps_deferred: u64,

	/// Swaps whose every acknowledgement arrived
	pub swaps_completed: u64,
}

/// Address translating controller
#[derive(Debug)]
pub struct Translator {
	/// Core
	core: NodeCore,

	/// Parameters
	params: TranslatorParams,

	/// Registered cpus, by cpu index
	cpus: Vec<NodeId>,

	/// Registered modules, by module index
	modules: Vec<Module>,

	/// Distances
	distances: DistanceTable,

	/// Mapping table
	mapping: MappingTable,

	/// History of the current epoch
	history: HistoryTable,

	/// Pages being swapped
	locks: LockedPages,

	/// Swap tags
	tags: TagAllocator,

	/// Migration, if enabled
	migration: Option<Migration>,

	/// Clock at the start of the current epoch
	epoch_start: u64,

	/// Statistics
	stats: TranslatorStats,
}

impl Translator {
	/// Creates a new translator
	pub fn new(
		node_params: NodeParams,
		params: TranslatorParams,
		migration: Option<Migration>,
	) -> Result<Self, anyhow::Error> {
		anyhow::ensure!(
			params.offset_bits < params.address_bits && params.address_bits <= 64,
			"Offset bits ({}) must be less than the address bits ({}), which must be at most 64",
			params.offset_bits,
			params.address_bits
		);
		anyhow::ensure!(
			params.address_bits == 64 || params.range.last() >> params.address_bits == 0,
			"Translator range {} doesn't fit in {} address bits",
			params.range,
			params.address_bits
		);
		Self::ensure_page_aligned(params.range, params.offset_bits)?;
		if let Some(migration) = &migration {
			anyhow::ensure!(migration.epoch_length > 0, "Epoch length must be positive");
		}

		let first_page = params.range.first() >> params.offset_bits;
		let pages = (params.range.last() >> params.offset_bits) - first_page + 1;
		let pages = usize::try_from(pages)
			.map_err(|_| anyhow::anyhow!("Translator range {} has too many pages", params.range))?;

		Ok(Self {
			core: NodeCore::new(node_params),
			distances: DistanceTable::new(params.max_cpus, params.max_modules),
			mapping: MappingTable::identity(PageIdx::new(first_page), pages),
			history: HistoryTable::new(params.max_cpus),
			params,
			cpus: vec![],
			modules: vec![],
			locks: LockedPages::new(),
			tags: TagAllocator::new(),
			migration,
			epoch_start: 0,
			stats: TranslatorStats::default(),
		})
	}

	/// Registers a cpu, returning its index
	pub fn add_cpu(&mut self, id: NodeId) -> Result<usize, anyhow::Error> {
		anyhow::ensure!(
			self.cpus.len() < self.params.max_cpus,
			"Translator {:?} may only have {} cpus",
			self.core.name(),
			self.params.max_cpus
		);
		anyhow::ensure!(!self.cpus.contains(&id), "Cpu {id} was already registered");

		self.cpus.push(id);
		Ok(self.cpus.len() - 1)
	}

	/// Registers a module, returning its index
	pub fn add_module(&mut self, id: NodeId, range: AddressRange) -> Result<usize, anyhow::Error> {
		anyhow::ensure!(
			self.modules.len() < self.params.max_modules,
			"Translator {:?} may only have {} modules",
			self.core.name(),
			self.params.max_modules
		);
		Self::ensure_page_aligned(range, self.params.offset_bits)?;
		if let Some(module) = self.modules.iter().find(|module| module.range.overlaps(&range)) {
			anyhow::bail!(
				"Module {id} range {range} overlaps module {} range {}",
				module.id,
				module.range
			);
		}

		self.modules.push(Module { id, range });
		Ok(self.modules.len() - 1)
	}

	/// Sets the distance from a cpu to a module
	pub fn add_distance(&mut self, cpu_idx: usize, module_idx: usize, distance: u64) -> Result<(), anyhow::Error> {
		self.distances.set(cpu_idx, module_idx, distance)
	}

	/// Returns the parameters
	pub fn params(&self) -> &TranslatorParams {
		&self.params
	}

	/// Returns the registered cpus
	pub fn cpus(&self) -> &[NodeId] {
		&self.cpus
	}

	/// Returns the registered modules
	pub fn modules(&self) -> &[Module] {
		&self.modules
	}

	/// Returns the mapping table
	pub fn mapping(&self) -> &MappingTable {
		&self.mapping
	}

	/// Returns the history of the current epoch
	pub fn history(&self) -> &HistoryTable {
		&self.history
	}

	/// Returns the pages being swapped
	pub fn locks(&self) -> &LockedPages {
		&self.locks
	}

	/// Returns the migration settings
	pub fn migration(&self) -> Option<&Migration> {
		self.migration.as_ref()
	}

	/// Returns the statistics
	pub fn stats(&self) -> &TranslatorStats {
		&self.stats
	}

	/// Returns the mask of the page offset bits
	fn offset_mask(&self) -> u64 {
		(1 << self.params.offset_bits) - 1
	}

	/// Translates an address
	pub fn translate(&self, addr: u64) -> Result<Translation, TranslateError> {
		if !self.params.range.contains(addr) {
			return Err(TranslateError::OutOfRange {
				addr,
				range: self.params.range,
			});
		}

		let page = PageIdx::new(addr >> self.params.offset_bits);
		let phys_page = self
			.mapping
			.lookup(page)
			.expect("Every page in range should be mapped");
		let phys_addr = (phys_page.to_u64() << self.params.offset_bits) | (addr & self.offset_mask());

		let module = self
			.modules
			.iter()
			.position(|module| module.range.contains(phys_addr))
			.ok_or(TranslateError::Unmapped { addr, phys_addr })?;

		Ok(Translation {
			addr: phys_addr,
			page: phys_page,
			module,
			endpoint: self.modules[module].id,
		})
	}

	/// Returns the address that translates to physical address `phys_addr`
	pub fn untranslate(&self, phys_addr: u64) -> Option<u64> {
		let phys_page = PageIdx::new(phys_addr >> self.params.offset_bits);
		let page = self.mapping.source_of(phys_page)?;
		Some((page.to_u64() << self.params.offset_bits) | (phys_addr & self.offset_mask()))
	}

	/// Ensures `range` covers whole pages
	fn ensure_page_aligned(range: AddressRange, offset_bits: u32) -> Result<(), anyhow::Error> {
		let mask = (1_u64 << offset_bits) - 1;
		anyhow::ensure!(
			range.first() & mask == 0 && range.last() & mask == mask,
			"Range {range} isn't aligned to pages of {} bytes",
			1_u64 << offset_bits
		);

		Ok(())
	}

	/// Ends the current epoch, scheduling any swaps the policy asks for.
	///
	/// Returns whether any swap was scheduled.
	fn end_epoch(&mut self, fabric: &mut Fabric) -> bool {
		let Some(migration) = &self.migration else {
			return false;
		};

		let view = EpochView {
			history:     &self.history,
			distances:   &self.distances,
			modules:     &self.modules,
			cpus:        self.cpus.len(),
			offset_bits: self.params.offset_bits,
		};
		let mut plans = migration.policy.plan(&view);
		plans.sort_by_key(|plan| (Reverse(plan.cost), plan.page));
		let max_swaps = migration.max_swaps_per_epoch;

		self.stats.epochs += 1;
		tracing::debug!(
			translator = self.core.name(),
			clock = self.core.clock(),
			pages = self.history.len(),
			candidates = plans.len(),
			"Epoch ended"
		);

		let mut scheduled = 0;
		for plan in plans {
			if scheduled >= max_swaps {
				break;
			}
			if self.schedule_swap(fabric, plan) {
				scheduled += 1;
			}
		}

		self.history.clear();
		self.epoch_start = self.core.clock();

		scheduled > 0
	}

	/// Schedules a swap, returning whether it was scheduled
	fn schedule_swap(&mut self, fabric: &mut Fabric, plan: SwapPlan) -> bool {
		let offset_bits = self.params.offset_bits;
		let from = self.modules[plan.from];
		let to = self.modules[plan.to];

		// The partner sits at the same offset of the target module
		let page_addr = plan.page.to_u64() << offset_bits;
		let Some(partner_addr) = from
			.range
			.offset_of(page_addr)
			.and_then(|offset| to.range.first().checked_add(offset))
			.filter(|&partner_addr| to.range.contains(partner_addr))
		else {
			tracing::trace!(?plan, "Swap partner is outside of the target module");
			return false;
		};
		let partner = PageIdx::new(partner_addr >> offset_bits);

		if self.locks.is_locked(plan.page) || self.locks.is_locked(partner) {
			tracing::trace!(?plan, ?partner, "Swap pages are locked");
			return false;
		}

		let (Some(page_src), Some(partner_src)) = (self.mapping.source_of(plan.page), self.mapping.source_of(partner))
		else {
			tracing::trace!(?plan, ?partner, "Swap pages aren't translated");
			return false;
		};

		let id = self.core.id();
		if fabric.resident(id).len() + 2 > self.core.params().capacity {
			tracing::debug!(?plan, translator = self.core.name(), "No space for swap requests");
			self.stats.swaps_deferred += 1;
			return false;
		}

		let tag = self.tags.allocate();
		self.mapping.swap(page_src, partner_src);
		self.locks.lock(tag, [plan.page, partner], 2);

		let page_bytes = 1 << offset_bits;
		let clock = self.core.clock();
		for (module, addr, partner, partner_addr) in [
			(from, page_addr, to, partner_addr),
			(to, partner_addr, from, page_addr),
		] {
			let request = Request::new(
				RequestKind::SwapReq {
					partner: partner.id,
					partner_addr,
					tag,
				},
				id,
				module.id,
				addr,
				page_bytes,
				format!("swap {tag} req {addr:#010x} -> {partner_addr:#010x}"),
			)
			.with_issued_at(clock);
			fabric.spawn(id, request);
		}

		self.stats.swaps_scheduled += 1;
		tracing::debug!(
			%tag,
			page = ?plan.page,
			?partner,
			from = %from.id,
			to = %to.id,
			cost = plan.cost,
			"Scheduled swap"
		);

		true
	}
}

impl Node for Translator {
	fn core(&self) -> &NodeCore {
		&self.core
	}

	fn core_mut(&mut self) -> &mut NodeCore {
		&mut self.core
	}

	fn address_range(&self) -> Option<AddressRange> {
		Some(self.params.range)
	}

	fn generate(&mut self, fabric: &mut Fabric) -> Outcome {
		let Some(migration) = &self.migration else {
			return Outcome::Done;
		};
		if self.core.clock() - self.epoch_start < migration.epoch_length {
			return Outcome::Done;
		}

		match self.end_epoch(fabric) {
			true => Outcome::Pending(0),
			false => Outcome::Done,
		}
	}

	fn admit(&mut self, fabric: &mut Fabric, req: RequestId) -> u64 {
		let id = self.core.id();
		let request = fabric.get(req);
		let is_access = matches!(request.kind, RequestKind::ReadReq | RequestKind::WriteReq);
		if !is_access || request.destination != id {
			return self.core.arrival_latency(request.destination);
		}

		match self.translate(request.addr) {
			Ok(translation) => {
				self.stats.translated += 1;
				if self.locks.is_locked(translation.page) {
					self.stats.locked_translations += 1;
				}
				if self.migration.is_some() {
					let cpu_idx = self.cpus.iter().position(|&cpu| cpu == request.origin);
					self.history.record(translation.page, cpu_idx);
				}

				let request = fabric.get_mut(req);
				tracing::trace!(
					name = %request.name,
					addr = format_args!("{:#010x}", request.addr),
					phys_addr = format_args!("{:#010x}", translation.addr),
					endpoint = %translation.endpoint,
					"Translated request"
				);
				request.addr = translation.addr;
				request.destination = translation.endpoint;

				self.core.params().routing_latency
			},

			// Note: The request stays addressed to us and is dealt with on retirement
			Err(err) => {
				tracing::warn!(name = %request.name, translator = self.core.name(), %err, "Unable to translate request");
				self.stats.faults += 1;

				self.core.params().retirement_latency
			},
		}
	}

	fn retire(&mut self, fabric: &mut Fabric, req: RequestId) -> Result<Outcome, NodeError> {
		let id = self.core.id();
		let request = fabric.get(req);
		match request.kind {
			RequestKind::SwapAck { tag } => {
				let request = fabric.destroy(req);
				match self.locks.acknowledge(tag) {
					Ack::Released(pages) => {
						self.stats.swaps_completed += 1;
						tracing::debug!(%tag, ?pages, "Swap completed");
					},
					Ack::Pending(remaining) => tracing::trace!(%tag, remaining, "Swap acknowledged"),
					Ack::Unknown => tracing::warn!(name = %request.name, %tag, "Acknowledgement for unknown swap"),
				}

				Ok(Outcome::Done)
			},

			// Note: Reads that couldn't be translated are answered by us, so the cpu
			//       doesn't wait on them forever.
			RequestKind::ReadReq => {
				let request = fabric.get_mut(req);
				request.into_response(id);
				tracing::trace!(name = %request.name, "Faulted read answered");

				Ok(Outcome::Pending(0))
			},

			RequestKind::WriteReq => {
				let request = fabric.destroy(req);
				tracing::trace!(name = %request.name, "Faulted write dropped");

				Ok(Outcome::Done)
			},

			RequestKind::ReadResp | RequestKind::SwapReq { .. } | RequestKind::SwapXfer { .. } => {
				Err(NodeError::UnexpectedRequest {
					node:    self.core.name().to_owned(),
					request: request.name.clone(),
					kind:    request.kind.name(),
				})
			},
		}
	}

	fn required_routes(&self) -> Vec<(NodeId, NodeId)> {
		let id = self.core.id();
		let mut routes = vec![];
		for module in &self.modules {
			routes.push((id, module.id));
			routes.push((module.id, id));
			routes.extend(self.cpus.iter().map(|&cpu| (module.id, cpu)));
		}
		routes.extend(self.cpus.iter().map(|&cpu| (id, cpu)));

		if self.migration.is_some() {
			for lhs in &self.modules {
				for rhs in &self.modules {
					if lhs.id != rhs.id {
						routes.push((lhs.id, rhs.id));
					}
				}
			}
		}

		routes
	}

	fn validate(&self) -> Result<(), anyhow::Error> {
		anyhow::ensure!(
			!self.modules.is_empty(),
			"Translator {:?} has no modules",
			self.core.name()
		);

		if let Some(migration) = &self.migration {
			migration
				.policy
				.check(&self.distances, self.cpus.len(), self.modules.len())
				.map_err(|err| {
					err.context(format!(
						"Translator {:?} cannot use the {} policy",
						self.core.name(),
						migration.policy.name()
					))
				})?;
		}

		Ok(())
	}

	fn fmt_debug(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let TranslatorStats {
			translated,
			faults,
			epochs,
			swaps_scheduled,
			swaps_completed,
			..
		} = self.stats;

		writeln!(
			f,
			"Translator {} {}: {translated} translated, {faults} faults, {epochs} epochs, \
			 {swaps_completed}/{swaps_scheduled} swaps completed, {} pages locked",
			self.core.name(),
			self.params.range,
			self.locks.len(),
		)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	const OFFSET_BITS: u32 = 12;

	/// Creates a fabric with a cpu (`0`), the translator (`1`) and two endpoints (`2`, `3`),
	/// holding `[0x0, 0x3fff]` and `[0x4000, 0x7fff]`.
	fn setup(node_params: NodeParams, migration: Option<Migration>) -> (Fabric, Translator) {
		let mut fabric = Fabric::new();
		let params = TranslatorParams {
			range:        AddressRange::new(0x0, 0x7fff).unwrap(),
			address_bits: 32,
			offset_bits:  OFFSET_BITS,
			max_cpus:     1,
			max_modules:  2,
		};
		let mut translator = Translator::new(node_params, params, migration).unwrap();

		let cpu = fabric.add_node();
		translator.core.set_id(fabric.add_node());
		translator.add_cpu(cpu).unwrap();
		for (first, last) in [(0x0, 0x3fff), (0x4000, 0x7fff)] {
			let endpoint = fabric.add_node();
			translator
				.add_module(endpoint, AddressRange::new(first, last).unwrap())
				.unwrap();
		}
		translator.add_distance(0, 0, 1).unwrap();
		translator.add_distance(0, 1, 4).unwrap();

		(fabric, translator)
	}

	fn global_migration(epoch_length: u64, cost_threshold: u64) -> Migration {
		Migration {
			epoch_length,
			max_swaps_per_epoch: 4,
			policy: Box::new(GlobalPolicy { cost_threshold }),
		}
	}

	/// Sends an access from the cpu to the translator
	fn access(fabric: &mut Fabric, translator: &mut Translator, kind: RequestKind, addr: u64) -> RequestId {
		let req = fabric.spawn(
			NodeId::new(0),
			Request::new(kind, NodeId::new(0), NodeId::new(1), addr, 4, "access"),
		);
		assert_eq!(translator.accept(fabric, req), Outcome::Done);
		req
	}

	#[test]
	fn identity_translation_round_trips() {
		let (_, translator) = setup(NodeParams::new("ctrl"), None);

		for addr in [0x0, 0x1234, 0x4000, 0x7fff] {
			let translation = translator.translate(addr).unwrap();
			assert_eq!(translation.addr, addr);
			assert_eq!(translator.untranslate(translation.addr), Some(addr));
		}
		assert_eq!(translator.translate(0x5000).unwrap().endpoint, NodeId::new(3));
	}

	#[test]
	fn swapped_pages_exchange_indices() {
		let (_, mut translator) = setup(NodeParams::new("ctrl"), None);
		translator.mapping.swap(PageIdx::new(1), PageIdx::new(5));

		assert_eq!(translator.translate(0x1abc).unwrap().addr, 0x5abc);
		assert_eq!(translator.translate(0x5abc).unwrap().addr, 0x1abc);
		assert_eq!(translator.translate(0x2abc).unwrap().addr, 0x2abc);
		assert_eq!(translator.untranslate(0x5abc), Some(0x1abc));
	}

	#[test]
	fn translation_errors() {
		let (_, translator) = setup(NodeParams::new("ctrl"), None);

		assert_eq!(
			translator.translate(0x8000),
			Err(TranslateError::OutOfRange {
				addr:  0x8000,
				range: AddressRange::new(0x0, 0x7fff).unwrap(),
			})
		);

		let params = TranslatorParams {
			range:        AddressRange::new(0x0, 0x7fff).unwrap(),
			address_bits: 32,
			offset_bits:  OFFSET_BITS,
			max_cpus:     1,
			max_modules:  1,
		};
		let mut translator = Translator::new(NodeParams::new("ctrl"), params, None).unwrap();
		translator
			.add_module(NodeId::new(2), AddressRange::new(0x0, 0x3fff).unwrap())
			.unwrap();
		assert_eq!(
			translator.translate(0x4010),
			Err(TranslateError::Unmapped {
				addr:      0x4010,
				phys_addr: 0x4010,
			})
		);
	}

	#[test]
	fn registration_is_checked() {
		let (_, mut translator) = setup(NodeParams::new("ctrl"), None);
		assert!(translator.add_cpu(NodeId::new(4)).is_err());
		assert!(translator
			.add_module(NodeId::new(4), AddressRange::new(0x8000, 0x8fff).unwrap())
			.is_err());
		assert!(translator.add_distance(1, 0, 1).is_err());

		let params = TranslatorParams {
			range:        AddressRange::new(0x0, 0x7fff).unwrap(),
			address_bits: 32,
			offset_bits:  OFFSET_BITS,
			max_cpus:     1,
			max_modules:  2,
		};
		let mut translator = Translator::new(NodeParams::new("ctrl"), params.clone(), None).unwrap();
		translator
			.add_module(NodeId::new(2), AddressRange::new(0x0, 0x3fff).unwrap())
			.unwrap();
		assert!(translator
			.add_module(NodeId::new(3), AddressRange::new(0x3000, 0x4fff).unwrap())
			.is_err());
		assert!(translator
			.add_module(NodeId::new(3), AddressRange::new(0x4000, 0x4ffe).unwrap())
			.is_err());

		let misaligned = TranslatorParams {
			range: AddressRange::new(0x10, 0x7fff).unwrap(),
			..params
		};
		assert!(Translator::new(NodeParams::new("ctrl"), misaligned, None).is_err());
	}

	#[test]
	fn accesses_are_routed_to_their_endpoint() {
		let (mut fabric, mut translator) = setup(NodeParams::new("ctrl").routing_latency(2), None);
		let req = access(&mut fabric, &mut translator, RequestKind::ReadReq, 0x4010);

		let request = fabric.get(req);
		assert_eq!(request.destination, NodeId::new(3));
		assert_eq!(request.addr, 0x4010);
		assert_eq!(request.cooldown, 2);
		assert_eq!(translator.stats().translated, 1);
		assert!(translator.history().is_empty());
	}

	#[test]
	fn faulted_reads_are_answered() {
		let (mut fabric, mut translator) = setup(NodeParams::new("ctrl").retirement_latency(3), None);
		let read = access(&mut fabric, &mut translator, RequestKind::ReadReq, 0x9000);
		assert_eq!(fabric.get(read).cooldown, 3);
		assert_eq!(translator.stats().faults, 1);

		assert_eq!(translator.retire(&mut fabric, read).unwrap(), Outcome::Pending(0));
		let response = fabric.get(read);
		assert_eq!(response.kind, RequestKind::ReadResp);
		assert_eq!(response.destination, NodeId::new(0));

		let write = access(&mut fabric, &mut translator, RequestKind::WriteReq, 0x9000);
		assert_eq!(translator.retire(&mut fabric, write).unwrap(), Outcome::Done);
		assert!(fabric.try_get(write).is_none());
	}

	#[test]
	fn hot_pages_are_swapped_towards_their_cpu() {
		let (mut fabric, mut translator) = setup(NodeParams::new("ctrl"), Some(global_migration(10, 5)));

		// 2 accesses to module 1 cost 8, over the threshold
		for _ in 0..2 {
			let req = access(&mut fabric, &mut translator, RequestKind::WriteReq, 0x5010);
			fabric.destroy(req);
		}
		assert_eq!(translator.history().get(PageIdx::new(5)).unwrap().per_cpu(), &[2]);

		// Epoch didn't end yet
		assert_eq!(translator.generate(&mut fabric), Outcome::Done);
		assert!(fabric.resident(NodeId::new(1)).is_empty());

		translator.advance_time(&mut fabric, 10);
		assert_eq!(translator.generate(&mut fabric), Outcome::Pending(0));
		assert_eq!(translator.stats().swaps_scheduled, 1);
		assert!(translator.history().is_empty());

		// Mapping changed right away
		assert_eq!(translator.translate(0x5010).unwrap().addr, 0x1010);
		assert_eq!(translator.translate(0x1010).unwrap().addr, 0x5010);
		assert!(translator.locks().is_locked(PageIdx::new(1)));
		assert!(translator.locks().is_locked(PageIdx::new(5)));

		// Both halves of the swap were requested
		let swaps = fabric
			.resident(NodeId::new(1))
			.iter()
			.map(|&req| fabric.get(req).clone())
			.collect::<Vec<_>>();
		assert_eq!(swaps.len(), 2);
		let [lhs, rhs] = &swaps[..] else { unreachable!() };
		let RequestKind::SwapReq {
			partner, partner_addr, tag,
		} = lhs.kind
		else {
			panic!("Expected a swap request, found {:?}", lhs.kind);
		};
		assert_eq!((lhs.destination, lhs.addr), (NodeId::new(3), 0x5000));
		assert_eq!((partner, partner_addr), (NodeId::new(2), 0x1000));
		assert_eq!(rhs.kind, RequestKind::SwapReq {
			partner:      NodeId::new(3),
			partner_addr: 0x5000,
			tag,
		});
		assert_eq!(lhs.bytes, 1 << OFFSET_BITS);

		// Locks are released only after both acknowledgements
		for remaining_locked in [2, 0] {
			let ack = fabric.spawn(
				NodeId::new(2),
				Request::new(RequestKind::SwapAck { tag }, NodeId::new(2), NodeId::new(1), 0x1000, 0, "ack"),
			);
			assert_eq!(translator.retire(&mut fabric, ack).unwrap(), Outcome::Done);
			assert_eq!(translator.locks().len(), remaining_locked);
		}
		assert_eq!(translator.stats().swaps_completed, 1);
	}

	#[test]
	fn costliest_unlocked_pages_are_swapped_first() {
		let migration = Migration {
			epoch_length:        10,
			max_swaps_per_epoch: 1,
			policy:              Box::new(GlobalPolicy { cost_threshold: 5 }),
		};
		let (mut fabric, mut translator) = setup(NodeParams::new("ctrl"), Some(migration));
		let touch = |fabric: &mut Fabric, translator: &mut Translator, addr: u64, times: usize| {
			for _ in 0..times {
				let req = access(fabric, translator, RequestKind::WriteReq, addr);
				fabric.destroy(req);
			}
		};

		// Pages 5, 6 and 7 are all hot, but page 5 costs the most
		touch(&mut fabric, &mut translator, 0x5000, 3);
		touch(&mut fabric, &mut translator, 0x6000, 2);
		touch(&mut fabric, &mut translator, 0x7000, 2);
		translator.advance_time(&mut fabric, 10);
		assert_eq!(translator.generate(&mut fabric), Outcome::Pending(0));

		assert_eq!(translator.stats().swaps_scheduled, 1);
		assert_eq!(translator.translate(0x5000).unwrap().addr, 0x1000);
		assert_eq!(translator.translate(0x6000).unwrap().addr, 0x6000);
		assert_eq!(translator.translate(0x7000).unwrap().addr, 0x7000);
		assert_eq!(fabric.resident(NodeId::new(1)).len(), 2);

		// `0x1000` now lives in page 5, still locked, so the next costliest page goes instead
		touch(&mut fabric, &mut translator, 0x1000, 3);
		touch(&mut fabric, &mut translator, 0x6000, 2);
		translator.advance_time(&mut fabric, 10);
		assert_eq!(translator.generate(&mut fabric), Outcome::Pending(0));

		assert_eq!(translator.stats().swaps_scheduled, 2);
		assert_eq!(translator.translate(0x1000).unwrap().addr, 0x5000);
		assert_eq!(translator.translate(0x6000).unwrap().addr, 0x2000);
		assert_eq!(translator.locks().len(), 4);
		assert!(translator.locks().is_locked(PageIdx::new(6)));
		assert_eq!(fabric.resident(NodeId::new(1)).len(), 4);
	}

	#[test]
	fn swaps_are_deferred_without_capacity() {
		let (mut fabric, mut translator) = setup(NodeParams::new("ctrl").capacity(1), Some(global_migration(1, 0)));
		access(&mut fabric, &mut translator, RequestKind::ReadReq, 0x5000);

		translator.advance_time(&mut fabric, 1);
		assert_eq!(translator.generate(&mut fabric), Outcome::Done);
		assert_eq!(translator.stats().swaps_deferred, 1);
		assert_eq!(translator.translate(0x5000).unwrap().addr, 0x5000);
		assert!(translator.locks().is_empty());
	}

	#[test]
	fn unexpected_requests_are_errors() {
		let (mut fabric, mut translator) = setup(NodeParams::new("ctrl"), None);
		let resp = fabric.spawn(
			NodeId::new(1),
			Request::new(RequestKind::ReadResp, NodeId::new(2), NodeId::new(1), 0x0, 4, "resp"),
		);
		assert!(matches!(
			translator.retire(&mut fabric, resp),
			Err(NodeError::UnexpectedRequest { kind: "ReadResp", .. })
		));
	}

	#[test]
	fn global_policy_needs_every_distance() {
		let (_, translator) = setup(NodeParams::new("ctrl"), Some(global_migration(10, 5)));
		assert!(translator.validate().is_ok());

		let params = TranslatorParams {
			range:        AddressRange::new(0x0, 0x7fff).unwrap(),
			address_bits: 32,
			offset_bits:  OFFSET_BITS,
			max_cpus:     1,
			max_modules:  2,
		};
		let mut translator = Translator::new(NodeParams::new("ctrl"), params, Some(global_migration(10, 5))).unwrap();
		translator.add_cpu(NodeId::new(0)).unwrap();
		translator
			.add_module(NodeId::new(2), AddressRange::new(0x0, 0x3fff).unwrap())
			.unwrap();
		assert!(translator.validate().is_err());
	}
}
