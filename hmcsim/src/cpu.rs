//! Cpus

// Imports
use {
	crate::{
		fabric::Fabric,
		node::{AddressRange, Node, NodeCore, NodeError, NodeId, NodeParams},
		outcome::Outcome,
		request::{Request, RequestId, RequestKind},
		trace::{AccessKind, TraceRecord},
	},
	average::Estimate,
	std::{collections::VecDeque, fmt},
};

/// Resident slots kept free for incoming responses
pub const RESPONSE_HEADROOM: usize = 3;

/// Bytes accessed by each generated request
pub const ACCESS_BYTES: u64 = 4;

/// Cpu statistics
#[derive(Clone, Debug)]
pub struct CpuStats {
	/// Reads issued
	pub reads: u64,

	/// Writes issued
	pub writes: u64,

	/// Responses received
	pub responses: u64,

	/// Records skipped, for lack of anyone holding their address
	pub skipped: u64,

	/// Requests received that weren't responses
	pub unexpected: u64,

	/// Ticks between issuing a read and receiving its response
	pub read_latency: average::Variance,
}

impl CpuStats {
	/// Creates empty statistics
	pub fn new() -> Self {
		Self {
			reads:        0,
			writes:       0,
			responses:    0,
			skipped:      0,
			unexpected:   0,
			read_latency: average::Variance::new(),
		}
	}
}

impl Default for CpuStats {
	fn default() -> Self {
		Self::new()
	}
}

/// Cpu.
///
/// Issues the accesses of a trace, in order.
#[derive(Debug)]
pub struct Cpu {
	/// Core
	core: NodeCore,

	/// Records not yet issued
	trace: VecDeque<TraceRecord>,

	/// Nodes accesses may be sent to, in resolution order
	addressables: Vec<(NodeId, AddressRange)>,

	/// Reads issued and not yet answered
	outstanding_reads: usize,

	/// Maximum outstanding reads
	max_outstanding_reads: usize,

	/// Statistics
	stats: CpuStats,
}

impl Cpu {
	/// Creates a new cpu
	pub fn new(params: NodeParams, trace: impl IntoIterator<Item = TraceRecord>, max_outstanding_reads: usize) -> Self {
		Self {
			core: NodeCore::new(params),
			trace: trace.into_iter().collect(),
			addressables: vec![],
			outstanding_reads: 0,
			max_outstanding_reads,
			stats: CpuStats::new(),
		}
	}

	/// Registers a node accesses in `range` may be sent to
	pub fn add_addressable(&mut self, id: NodeId, range: AddressRange) -> Result<(), anyhow::Error> {
		if let Some((other_id, other_range)) = self.addressables.iter().find(|(_, other)| other.overlaps(&range)) {
			anyhow::bail!(
				"Cpu {:?} addressable {id} range {range} overlaps {other_id} range {other_range}",
				self.core.name()
			);
		}

		self.addressables.push((id, range));
		Ok(())
	}

	/// Returns the records not yet issued
	pub fn trace_remaining(&self) -> usize {
		self.trace.len()
	}

	/// Returns the reads not yet answered
	pub fn outstanding_reads(&self) -> usize {
		self.outstanding_reads
	}

	/// Returns the statistics
	pub fn stats(&self) -> &CpuStats {
		&self.stats
	}

	/// Returns the node holding `addr`
	fn destination_of(&self, addr: u64) -> Option<NodeId> {
		self.addressables
			.iter()
			.find(|(_, range)| range.contains(addr))
			.map(|&(id, _)| id)
	}
}

impl Node for Cpu {
	fn core(&self) -> &NodeCore {
		&self.core
	}

	fn core_mut(&mut self) -> &mut NodeCore {
		&mut self.core
	}

	fn generate(&mut self, fabric: &mut Fabric) -> Outcome {
		let id = self.core.id();
		let max_resident = self.core.params().capacity.saturating_sub(RESPONSE_HEADROOM);

		let mut outcome = Outcome::Done;
		while fabric.resident(id).len() < max_resident {
			let Some(&record) = self.trace.front() else {
				break;
			};
			if record.kind == AccessKind::Read && self.outstanding_reads >= self.max_outstanding_reads {
				break;
			}
			self.trace.pop_front();

			let Some(destination) = self.destination_of(record.addr) else {
				tracing::warn!(cpu = self.core.name(), %record, "No node holds address, skipping");
				self.stats.skipped += 1;
				continue;
			};

			let (kind, op) = match record.kind {
				AccessKind::Read => {
					self.stats.reads += 1;
					self.outstanding_reads += 1;
					(RequestKind::ReadReq, "read")
				},
				AccessKind::Write => {
					self.stats.writes += 1;
					(RequestKind::WriteReq, "write")
				},
			};
			let request = Request::new(
				kind,
				id,
				destination,
				record.addr,
				ACCESS_BYTES,
				format!("{} {op} {:#010x}", self.core.name(), record.addr),
			)
			.with_issued_at(self.core.clock());
			tracing::trace!(name = %request.name, %destination, "Issued request");
			fabric.spawn(id, request);

			outcome = Outcome::Pending(0);
		}

		outcome
	}

	fn retire(&mut self, fabric: &mut Fabric, req: RequestId) -> Result<Outcome, NodeError> {
		let request = fabric.destroy(req);
		match request.kind {
			RequestKind::ReadResp => {
				self.stats.responses += 1;
				self.outstanding_reads = self.outstanding_reads.saturating_sub(1);

				let latency = self.core.clock().saturating_sub(request.issued_at);
				self.stats.read_latency.add(latency as f64);
				tracing::trace!(name = %request.name, latency, "Read completed");
			},
			_ => {
				self.stats.unexpected += 1;
				tracing::warn!(
					cpu = self.core.name(),
					name = %request.name,
					kind = request.kind.name(),
					"Received unexpected request"
				);
			},
		}

		Ok(Outcome::Done)
	}

	fn required_routes(&self) -> Vec<(NodeId, NodeId)> {
		let id = self.core.id();
		self.addressables
			.iter()
			.flat_map(|&(addressable, _)| [(id, addressable), (addressable, id)])
			.collect()
	}

	fn validate(&self) -> Result<(), anyhow::Error> {
		anyhow::ensure!(
			self.core.params().capacity > RESPONSE_HEADROOM,
			"Cpu {:?} capacity must be above {RESPONSE_HEADROOM}",
			self.core.name()
		);
		anyhow::ensure!(
			self.max_outstanding_reads > 0,
			"Cpu {:?} must allow at least 1 outstanding read",
			self.core.name()
		);

		Ok(())
	}

	fn fmt_debug(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let stats = &self.stats;
		writeln!(
			f,
			"Cpu {}: {} remaining, {} reads ({} outstanding), {} writes, {:.2} average read latency",
			self.core.name(),
			self.trace.len(),
			stats.reads,
			self.outstanding_reads,
			stats.writes,
			stats.read_latency.mean(),
		)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn record(kind: AccessKind, addr: u64) -> TraceRecord {
		TraceRecord { kind, addr }
	}

	/// Creates a fabric with the cpu (`0`) and a memory (`1`) holding `[0x0, 0xffff]`
	fn setup(params: NodeParams, trace: Vec<TraceRecord>, max_outstanding_reads: usize) -> (Fabric, Cpu) {
		let mut fabric = Fabric::new();
		let mut cpu = Cpu::new(params, trace, max_outstanding_reads);
		cpu.core.set_id(fabric.add_node());
		let memory = fabric.add_node();
		cpu.add_addressable(memory, AddressRange::new(0x0, 0xffff).unwrap())
			.unwrap();

		(fabric, cpu)
	}

	#[test]
	fn issues_requests_in_order() {
		let trace = vec![record(AccessKind::Read, 0x10), record(AccessKind::Write, 0x20)];
		let (mut fabric, mut cpu) = setup(NodeParams::new("CPU0"), trace, 8);

		assert_eq!(cpu.generate(&mut fabric), Outcome::Pending(0));
		let requests = fabric
			.resident(NodeId::new(0))
			.iter()
			.map(|&req| fabric.get(req))
			.collect::<Vec<_>>();
		assert_eq!(requests.len(), 2);
		assert_eq!(requests[0].kind, RequestKind::ReadReq);
		assert_eq!(requests[0].name, "CPU0 read 0x00000010");
		assert_eq!(requests[0].bytes, ACCESS_BYTES);
		assert_eq!(requests[1].kind, RequestKind::WriteReq);
		assert_eq!(requests[1].destination, NodeId::new(1));

		assert_eq!(cpu.generate(&mut fabric), Outcome::Done);
	}

	#[test]
	fn keeps_headroom_and_read_limit() {
		let trace = (0..10).map(|idx| record(AccessKind::Write, idx * 4)).collect();
		let (mut fabric, mut cpu) = setup(NodeParams::new("cpu").capacity(5), trace, 1);
		cpu.generate(&mut fabric);
		assert_eq!(fabric.resident(NodeId::new(0)).len(), 2);
		assert_eq!(cpu.trace_remaining(), 8);

		let trace = vec![record(AccessKind::Read, 0x0), record(AccessKind::Read, 0x4)];
		let (mut fabric, mut cpu) = setup(NodeParams::new("cpu"), trace, 1);
		cpu.generate(&mut fabric);
		assert_eq!(cpu.outstanding_reads(), 1);
		assert_eq!(cpu.trace_remaining(), 1);
	}

	#[test]
	fn skips_unknown_addresses() {
		let trace = vec![record(AccessKind::Read, 0x1_0000), record(AccessKind::Write, 0x0)];
		let (mut fabric, mut cpu) = setup(NodeParams::new("cpu"), trace, 1);
		cpu.generate(&mut fabric);

		assert_eq!(cpu.stats().skipped, 1);
		assert_eq!(cpu.outstanding_reads(), 0);
		assert_eq!(fabric.resident(NodeId::new(0)).len(), 1);
	}

	#[test]
	fn responses_complete_reads() {
		let trace = vec![record(AccessKind::Read, 0x10)];
		let (mut fabric, mut cpu) = setup(NodeParams::new("cpu"), trace, 1);
		cpu.generate(&mut fabric);
		let req = fabric.resident(NodeId::new(0))[0];

		// Send it to the memory and have it answer after 5 ticks
		fabric.transfer(req, NodeId::new(1));
		fabric.get_mut(req).into_response(NodeId::new(1));
		cpu.advance_time(&mut fabric, 5);
		assert_eq!(cpu.accept(&mut fabric, req), Outcome::Done);
		assert_eq!(cpu.retire(&mut fabric, req).unwrap(), Outcome::Done);

		assert_eq!(cpu.outstanding_reads(), 0);
		assert_eq!(cpu.stats().responses, 1);
		assert_eq!(cpu.stats().read_latency.mean(), 5.0);
	}

	#[test]
	fn needs_response_headroom() {
		let (_, cpu) = setup(NodeParams::new("cpu").capacity(3), vec![], 1);
		assert!(cpu.validate().is_err());
	}
}
