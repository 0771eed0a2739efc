//! Memory endpoints

// Imports
use {
	crate::{
		fabric::Fabric,
		node::{AddressRange, Node, NodeCore, NodeError, NodeId, NodeParams},
		outcome::Outcome,
		request::{Request, RequestId, RequestKind},
	},
	std::fmt,
};

/// Row buffer timing and geometry
#[derive(Clone, Debug)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct RowBufferParams {
	/// Extra ticks when accessing a row other than the open one
	#[serde(default)]
	pub miss_penalty: u64,

	/// Number of rows
	#[serde(default = "RowBufferParams::default_rows")]
	pub rows: u64,

	/// Bytes per row
	#[serde(default = "RowBufferParams::default_row_bytes")]
	pub row_bytes: u64,

	/// Bytes moved per tick during a page transfer.
	///
	/// `0` makes transfers cost only the row access.
	#[serde(default)]
	pub burst_bytes: u64,
}

impl RowBufferParams {
	// Note: Defaults are those of a 512 MiB DDR3 stick with 8 banks.
	fn default_rows() -> u64 {
		32768
	}

	fn default_row_bytes() -> u64 {
		2048
	}
}

impl Default for RowBufferParams {
	fn default() -> Self {
		Self {
			miss_penalty: 0,
			rows:         Self::default_rows(),
			row_bytes:    Self::default_row_bytes(),
			burst_bytes:  0,
		}
	}
}

/// Endpoint statistics
#[derive(Clone, Debug, Default)]
pub struct EndpointStats {
	/// Reads answered
	pub reads: u64,

	/// Writes committed
	pub writes: u64,

	/// Accesses to the open row
	pub row_hits: u64,

	/// Accesses that had to open a new row
	pub row_misses: u64,

	/// Pages sent to a swap partner
	pub swaps_sent: u64,

	/// Pages received from a swap partner
	pub swaps_received: u64,
}

/// Memory endpoint.
///
/// Answers reads, commits writes and moves pages during swaps.
#[derive(Debug)]
pub struct Endpoint {
	/// Core
	core: NodeCore,

	/// Addresses held
	range: AddressRange,

	/// Row buffer
	row_buffer: RowBufferParams,

	/// Currently open row.
	///
	/// Starts closed, so the first access is always a miss.
	open_row: Option<u64>,

	/// Statistics
	stats: EndpointStats,
}

impl Endpoint {
	/// Creates a new endpoint
	pub fn new(params: NodeParams, range: AddressRange, row_buffer: RowBufferParams) -> Self {
		Self {
			core: NodeCore::new(params),
			range,
			row_buffer,
			open_row: None,
			stats: EndpointStats::default(),
		}
	}

	/// Returns the addresses held
	pub fn range(&self) -> AddressRange {
		self.range
	}

	/// Returns the currently open row
	pub fn open_row(&self) -> Option<u64> {
		self.open_row
	}

	/// Returns the statistics
	pub fn stats(&self) -> &EndpointStats {
		&self.stats
	}

	/// Returns the row `addr` lives in
	fn row_of(&self, addr: u64) -> u64 {
		let offset = addr.saturating_sub(self.range.first());
		(offset / self.row_buffer.row_bytes.max(1)) % self.row_buffer.rows.max(1)
	}

	/// Accesses `addr`, opening its row, and returns the ticks it took
	fn access(&mut self, addr: u64) -> u64 {
		let row = self.row_of(addr);
		let hit = self.open_row == Some(row);
		self.open_row = Some(row);

		match hit {
			true => {
				self.stats.row_hits += 1;
				self.core.params().retirement_latency
			},
			false => {
				self.stats.row_misses += 1;
				self.core.params().retirement_latency + self.row_buffer.miss_penalty
			},
		}
	}

	/// Returns the ticks to stream `bytes` starting at `addr`
	fn transfer_time(&mut self, addr: u64, bytes: u64) -> u64 {
		let burst = match self.row_buffer.burst_bytes {
			0 => 0,
			burst_bytes => bytes.div_ceil(burst_bytes),
		};

		self.access(addr) + burst
	}

	/// Ensures `request` is for an address we hold
	fn check_addr(&self, request: &Request) -> Result<(), NodeError> {
		match self.range.contains(request.addr) {
			true => Ok(()),
			false => Err(NodeError::ForeignAddress {
				node:    self.core.name().to_owned(),
				request: request.name.clone(),
				addr:    request.addr,
				range:   self.range,
			}),
		}
	}

	/// Spawns a request on this endpoint, returning its cooldown
	fn spawn(&self, fabric: &mut Fabric, request: Request) -> Outcome {
		let cooldown = request.cooldown;
		let id = self.core.id();
		tracing::trace!(name = %request.name, node = self.core.name(), cooldown, "Spawned request");
		fabric.spawn(id, request);

		Outcome::Pending(cooldown)
	}
}

impl Node for Endpoint {
	fn core(&self) -> &NodeCore {
		&self.core
	}

	fn core_mut(&mut self) -> &mut NodeCore {
		&mut self.core
	}

	fn address_range(&self) -> Option<AddressRange> {
		Some(self.range)
	}

	fn admit(&mut self, fabric: &mut Fabric, req: RequestId) -> u64 {
		let request = fabric.get(req);
		match request.destination == self.core.id() {
			true => match request.kind {
				RequestKind::ReadReq | RequestKind::WriteReq => self.access(request.addr),
				_ => self.core.params().retirement_latency,
			},
			false => self.core.params().routing_latency,
		}
	}

	fn retire(&mut self, fabric: &mut Fabric, req: RequestId) -> Result<Outcome, NodeError> {
		let id = self.core.id();
		let request = fabric.get(req);
		match request.kind {
			RequestKind::ReadReq => {
				self.check_addr(request)?;
				self.stats.reads += 1;

				// Note: The response already waited for the access, so it leaves right away
				let request = fabric.get_mut(req);
				request.into_response(id);
				tracing::trace!(name = %request.name, node = self.core.name(), "Read answered");

				Ok(Outcome::Pending(0))
			},

			RequestKind::WriteReq => {
				self.check_addr(request)?;
				self.stats.writes += 1;

				let request = fabric.destroy(req);
				tracing::trace!(name = %request.name, node = self.core.name(), "Write committed");

				Ok(Outcome::Done)
			},

			RequestKind::SwapReq {
				partner,
				partner_addr,
				tag,
			} => {
				self.check_addr(request)?;
				self.stats.swaps_sent += 1;

				let request = fabric.destroy(req);
				let cooldown = self.transfer_time(request.addr, request.bytes);
				let xfer = Request::new(
					RequestKind::SwapXfer {
						requester: request.origin,
						tag,
					},
					id,
					partner,
					partner_addr,
					request.bytes,
					format!("swap {tag} xfer {} -> {partner}", self.core.name()),
				)
				.with_cooldown(cooldown);

				Ok(self.spawn(fabric, xfer))
			},

			RequestKind::SwapXfer { requester, tag } => {
				self.check_addr(request)?;
				self.stats.swaps_received += 1;

				let request = fabric.destroy(req);
				let cooldown = self.transfer_time(request.addr, request.bytes);
				let ack = Request::new(
					RequestKind::SwapAck { tag },
					id,
					requester,
					request.addr,
					0,
					format!("swap {tag} ack from {}", self.core.name()),
				)
				.with_cooldown(cooldown);

				Ok(self.spawn(fabric, ack))
			},

			RequestKind::ReadResp | RequestKind::SwapAck { .. } => Err(NodeError::UnexpectedRequest {
				node:    self.core.name().to_owned(),
				request: request.name.clone(),
				kind:    request.kind.name(),
			}),
		}
	}

	fn fmt_debug(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let EndpointStats {
			reads,
			writes,
			row_hits,
			row_misses,
			swaps_sent,
			swaps_received,
		} = self.stats;
		let hit_percentage = match row_hits + row_misses {
			0 => 0.0,
			accesses => 100.0 * (row_hits as f64 / accesses as f64),
		};

		writeln!(
			f,
			"Endpoint {} {}: {reads} reads, {writes} writes, {hit_percentage:.2}% row hits, {swaps_sent}/{swaps_received} \
			 swaps sent/received",
			self.core.name(),
			self.range,
		)
	}
}

#[cfg(test)]
mod tests {
	use {
		super::*,
		crate::request::TagAllocator,
	};

	/// Creates a fabric with a source node (`0`), an endpoint (`1`) and a partner id (`2`)
	fn setup(params: NodeParams, row_buffer: RowBufferParams) -> (Fabric, Endpoint) {
		let mut fabric = Fabric::new();
		fabric.add_node();
		let mut endpoint = Endpoint::new(params, AddressRange::new(0x0, 0xffff).unwrap(), row_buffer);
		endpoint.core.set_id(fabric.add_node());
		fabric.add_node();

		(fabric, endpoint)
	}

	fn send(fabric: &mut Fabric, endpoint: &mut Endpoint, kind: RequestKind, addr: u64, bytes: u64) -> RequestId {
		let req = fabric.spawn(
			NodeId::new(0),
			Request::new(kind, NodeId::new(0), NodeId::new(1), addr, bytes, "req"),
		);
		assert_eq!(endpoint.accept(fabric, req), Outcome::Done);
		req
	}

	#[test]
	fn row_hits_are_cheaper() {
		let (mut fabric, mut endpoint) = setup(NodeParams::new("mem").retirement_latency(4), RowBufferParams {
			miss_penalty: 10,
			rows:         16,
			row_bytes:    0x100,
			burst_bytes:  0,
		});

		let first = send(&mut fabric, &mut endpoint, RequestKind::ReadReq, 0x10, 4);
		let same_row = send(&mut fabric, &mut endpoint, RequestKind::ReadReq, 0xf0, 4);
		let other_row = send(&mut fabric, &mut endpoint, RequestKind::WriteReq, 0x100, 4);

		assert_eq!(fabric.get(first).cooldown, 14);
		assert_eq!(fabric.get(same_row).cooldown, 4);
		assert_eq!(fabric.get(other_row).cooldown, 14);
		assert_eq!(endpoint.open_row(), Some(1));
		assert_eq!(endpoint.stats().row_hits, 1);
		assert_eq!(endpoint.stats().row_misses, 2);
	}

	#[test]
	fn reads_turn_into_responses() {
		let (mut fabric, mut endpoint) = setup(NodeParams::new("mem"), RowBufferParams::default());
		let req = send(&mut fabric, &mut endpoint, RequestKind::ReadReq, 0x20, 4);

		assert_eq!(endpoint.retire(&mut fabric, req).unwrap(), Outcome::Pending(0));
		let response = fabric.get(req);
		assert_eq!(response.kind, RequestKind::ReadResp);
		assert_eq!(response.destination, NodeId::new(0));
		assert_eq!(response.owner(), NodeId::new(1));
	}

	#[test]
	fn writes_are_committed() {
		let (mut fabric, mut endpoint) = setup(NodeParams::new("mem"), RowBufferParams::default());
		let req = send(&mut fabric, &mut endpoint, RequestKind::WriteReq, 0x20, 4);

		assert_eq!(endpoint.retire(&mut fabric, req).unwrap(), Outcome::Done);
		assert_eq!(fabric.live(), 0);
		assert_eq!(endpoint.stats().writes, 1);
	}

	#[test]
	fn swap_request_spawns_transfer_to_partner() {
		let (mut fabric, mut endpoint) = setup(NodeParams::new("mem").retirement_latency(2), RowBufferParams {
			miss_penalty: 3,
			rows:         16,
			row_bytes:    0x100,
			burst_bytes:  256,
		});
		let tag = TagAllocator::new().allocate();
		let req = send(
			&mut fabric,
			&mut endpoint,
			RequestKind::SwapReq {
				partner: NodeId::new(2),
				partner_addr: 0x4000_0400,
				tag,
			},
			0x400,
			1024,
		);

		// Row miss (2 + 3), then 1024 bytes at 256 bytes per tick
		assert_eq!(endpoint.retire(&mut fabric, req).unwrap(), Outcome::Pending(9));

		let [xfer] = fabric.resident(NodeId::new(1)) else {
			panic!("Expected a single transfer");
		};
		let xfer = fabric.get(*xfer);
		assert_eq!(xfer.kind, RequestKind::SwapXfer {
			requester: NodeId::new(0),
			tag,
		});
		assert_eq!(xfer.destination, NodeId::new(2));
		assert_eq!(xfer.addr, 0x4000_0400);
		assert_eq!(xfer.bytes, 1024);
		assert_eq!(xfer.cooldown, 9);
	}

	#[test]
	fn swap_transfer_spawns_ack_to_requester() {
		let (mut fabric, mut endpoint) = setup(NodeParams::new("mem"), RowBufferParams::default());
		let tag = TagAllocator::new().allocate();
		let req = fabric.spawn(
			NodeId::new(2),
			Request::new(
				RequestKind::SwapXfer {
					requester: NodeId::new(0),
					tag,
				},
				NodeId::new(2),
				NodeId::new(1),
				0x400,
				1024,
				"xfer",
			),
		);
		assert_eq!(endpoint.accept(&mut fabric, req), Outcome::Done);
		assert_eq!(endpoint.retire(&mut fabric, req).unwrap(), Outcome::Pending(0));

		let [ack] = fabric.resident(NodeId::new(1)) else {
			panic!("Expected a single ack");
		};
		let ack = fabric.get(*ack);
		assert_eq!(ack.kind, RequestKind::SwapAck { tag });
		assert_eq!(ack.destination, NodeId::new(0));
		assert_eq!(endpoint.stats().swaps_received, 1);
	}

	#[test]
	fn unexpected_requests_are_errors() {
		let (mut fabric, mut endpoint) = setup(NodeParams::new("mem"), RowBufferParams::default());
		let req = send(&mut fabric, &mut endpoint, RequestKind::ReadResp, 0x20, 4);

		let err = endpoint.retire(&mut fabric, req).unwrap_err();
		assert!(matches!(err, NodeError::UnexpectedRequest { kind: "ReadResp", .. }));

		// The request stays where it was
		assert_eq!(fabric.get(req).owner(), NodeId::new(1));
	}

	#[test]
	fn foreign_addresses_are_errors() {
		let (mut fabric, mut endpoint) = setup(NodeParams::new("mem"), RowBufferParams::default());
		let req = send(&mut fabric, &mut endpoint, RequestKind::WriteReq, 0x1_0000, 4);

		let err = endpoint.retire(&mut fabric, req).unwrap_err();
		assert!(matches!(err, NodeError::ForeignAddress { addr: 0x1_0000, .. }));
	}
}
