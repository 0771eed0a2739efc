//! Nodes
//!
//! A node is anything requests can be resident on: CPUs, endpoints and translators.
//! Every node shares the same lifecycle (generate, advance time, wake, accept), with
//! common state kept in a [`NodeCore`] and the per-kind behavior in the [`Node`] impl.

// Imports
use {
	crate::{
		fabric::Fabric,
		outcome::Outcome,
		request::{RequestId, RequestKind},
	},
	std::{any::Any, collections::BTreeMap, error::Error, fmt},
};

/// Backoff returned by [`Node::accept`] when the node is at capacity
pub const CAPACITY_BACKOFF: u64 = 1;

/// Node id.
///
/// Assigned by the [`System`](crate::System) on registration.
#[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Hash, Debug)]
pub struct NodeId(usize);

impl NodeId {
	/// Id of a node that wasn't registered yet
	pub const UNREGISTERED: Self = Self(usize::MAX);

	/// Creates a node id from an index
	pub const fn new(idx: usize) -> Self {
		Self(idx)
	}

	/// Returns the index of this id
	pub fn to_usize(self) -> usize {
		self.0
	}
}

impl fmt::Display for NodeId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "node{}", self.0)
	}
}

/// Inclusive address range
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
#[derive(serde::Serialize)]
pub struct AddressRange {
	first: u64,
	last:  u64,
}

impl AddressRange {
	/// Creates a new address range `[first, last]`
	pub fn new(first: u64, last: u64) -> Result<Self, anyhow::Error> {
		anyhow::ensure!(
			first <= last,
			"Address range start {first:#x} is after its end {last:#x}"
		);
		Ok(Self { first, last })
	}

	/// Returns the first address
	pub fn first(&self) -> u64 {
		self.first
	}

	/// Returns the last address
	pub fn last(&self) -> u64 {
		self.last
	}

	/// Returns if `addr` is within this range
	pub fn contains(&self, addr: u64) -> bool {
		(self.first..=self.last).contains(&addr)
	}

	/// Returns if both ranges share at least one address
	pub fn overlaps(&self, other: &Self) -> bool {
		self.first <= other.last && other.first <= self.last
	}

	/// Returns the offset of `addr` from the start of this range
	pub fn offset_of(&self, addr: u64) -> Option<u64> {
		self.contains(addr).then(|| addr - self.first)
	}
}

impl fmt::Display for AddressRange {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		hmcsim_util::fmt_addr_range(f, self.first, self.last)
	}
}

/// Static node parameters
#[derive(Clone, Debug)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct NodeParams {
	/// Name
	pub name: String,

	/// Minimum ticks between two accepted requests
	#[serde(default)]
	pub initiation_interval: u64,

	/// Maximum resident requests
	#[serde(default = "NodeParams::default_capacity")]
	pub capacity: usize,

	/// Cooldown of accepted requests that are only passing through
	#[serde(default)]
	pub routing_latency: u64,

	/// Cooldown of accepted requests that reached their destination
	#[serde(default)]
	pub retirement_latency: u64,
}

impl NodeParams {
	/// Creates parameters with no latencies and the default capacity
	pub fn new(name: impl Into<String>) -> Self {
		Self {
			name:                name.into(),
			initiation_interval: 0,
			capacity:            Self::default_capacity(),
			routing_latency:     0,
			retirement_latency:  0,
		}
	}

	/// Sets the initiation interval
	#[must_use]
	pub fn initiation_interval(mut self, ticks: u64) -> Self {
		self.initiation_interval = ticks;
		self
	}

	/// Sets the capacity
	#[must_use]
	pub fn capacity(mut self, capacity: usize) -> Self {
		self.capacity = capacity;
		self
	}

	/// Sets the routing latency
	#[must_use]
	pub fn routing_latency(mut self, ticks: u64) -> Self {
		self.routing_latency = ticks;
		self
	}

	/// Sets the retirement latency
	#[must_use]
	pub fn retirement_latency(mut self, ticks: u64) -> Self {
		self.retirement_latency = ticks;
		self
	}

	fn default_capacity() -> usize {
		1024
	}
}

/// State shared by every node kind
#[derive(Clone, Debug)]
pub struct NodeCore {
	/// Id
	id: NodeId,

	/// Parameters
	params: NodeParams,

	/// Ticks until another request may be accepted
	cooldown: u64,

	/// Local clock, in ticks
	clock: u64,

	/// Routing table, from final destination to next hop
	routes: BTreeMap<NodeId, NodeId>,
}

impl NodeCore {
	/// Creates a new node core
	pub fn new(params: NodeParams) -> Self {
		debug_assert!(params.capacity > 0, "Node capacity must be at least 1");

		Self {
			id: NodeId::UNREGISTERED,
			params,
			cooldown: 0,
			clock: 0,
			routes: BTreeMap::new(),
		}
	}

	/// Returns the id of this node
	pub fn id(&self) -> NodeId {
		self.id
	}

	/// Sets the id of this node.
	///
	/// Only called by the system on registration.
	pub(crate) fn set_id(&mut self, id: NodeId) {
		self.id = id;
	}

	/// Returns the name of this node
	pub fn name(&self) -> &str {
		&self.params.name
	}

	/// Returns the parameters of this node
	pub fn params(&self) -> &NodeParams {
		&self.params
	}

	/// Returns the remaining cooldown of this node
	pub fn cooldown(&self) -> u64 {
		self.cooldown
	}

	/// Returns the local clock
	pub fn clock(&self) -> u64 {
		self.clock
	}

	/// Adds a route, so requests for `final_destination` are sent to `next_hop`
	pub fn add_route(&mut self, final_destination: NodeId, next_hop: NodeId) {
		self.routes.insert(final_destination, next_hop);
	}

	/// Returns the next hop towards `final_destination`
	pub fn next_hop(&self, final_destination: NodeId) -> Option<NodeId> {
		self.routes.get(&final_destination).copied()
	}

	/// Returns the cooldown a request arriving here with `destination` should get
	pub fn arrival_latency(&self, destination: NodeId) -> u64 {
		match destination == self.id {
			true => self.params.retirement_latency,
			false => self.params.routing_latency,
		}
	}
}

/// Node.
///
/// Only `core`/`core_mut` are required, every other method has the behavior of a
/// plain router that destroys whatever is addressed to it.
pub trait Node: Any + fmt::Debug {
	/// Returns the shared node state
	fn core(&self) -> &NodeCore;

	/// Returns the shared node state mutably
	fn core_mut(&mut self) -> &mut NodeCore;

	/// Returns the addresses this node answers for, if any
	fn address_range(&self) -> Option<AddressRange> {
		None
	}

	/// Creates new requests from nothing.
	///
	/// Returns the earliest cooldown of anything created.
	fn generate(&mut self, _fabric: &mut Fabric) -> Outcome {
		Outcome::Done
	}

	/// Advances this node's clock, cooldown and resident requests by `delta` ticks.
	///
	/// Returns the smallest resulting request cooldown. The node's own cooldown is
	/// left out, a node being ready isn't progress by itself.
	fn advance_time(&mut self, fabric: &mut Fabric, delta: u64) -> Outcome {
		let core = self.core_mut();
		core.clock += delta;
		core.cooldown = core.cooldown.saturating_sub(delta);

		fabric.advance(core.id, delta)
	}

	/// Called after `req` was moved onto this node.
	///
	/// Returns the cooldown the request should have.
	fn admit(&mut self, fabric: &mut Fabric, req: RequestId) -> u64 {
		self.core().arrival_latency(fabric.get(req).destination)
	}

	/// Tries to pull `req` from its current owner onto this node.
	///
	/// Returns `Done` if the request was taken, else the backoff its owner should wait.
	fn accept(&mut self, fabric: &mut Fabric, req: RequestId) -> Outcome {
		let core = self.core();
		let id = core.id;
		debug_assert_ne!(fabric.get(req).owner(), id, "Node tried to accept its own request");

		// Make sure we haven't accepted anything too recently
		if core.cooldown > 0 {
			return Outcome::Pending(core.cooldown);
		}

		// And that we have space, unless this is a swap acknowledgement, which
		// must never be held back, or in-progress migrations could deadlock
		let bypasses_capacity = matches!(fabric.get(req).kind, RequestKind::SwapAck { .. });
		if !bypasses_capacity && fabric.resident(id).len() >= core.params.capacity {
			return Outcome::Pending(CAPACITY_BACKOFF);
		}

		let source = fabric.transfer(req, id);
		let cooldown = self.admit(fabric, req);
		let request = fabric.get_mut(req);
		request.cooldown = cooldown;
		tracing::trace!(name = %request.name, %source, to = %id, cooldown, "Accepted request");

		let core = self.core_mut();
		core.cooldown = core.params.initiation_interval;

		Outcome::Done
	}

	/// Processes a request that reached this node as its final destination.
	///
	/// Returns the request's new cooldown (or that of anything it spawned), or
	/// `Done` if nothing is left to wait on.
	fn retire(&mut self, fabric: &mut Fabric, req: RequestId) -> Result<Outcome, NodeError> {
		let request = fabric.destroy(req);
		tracing::trace!(name = %request.name, node = self.core().name(), "Request retired");

		Ok(Outcome::Done)
	}

	/// Returns the routes, as `(from, to)` pairs, this node needs to exist before simulating
	fn required_routes(&self) -> Vec<(NodeId, NodeId)> {
		vec![]
	}

	/// Checks this node's configuration before simulating
	fn validate(&self) -> Result<(), anyhow::Error> {
		Ok(())
	}

	/// Formats debug output to `f`.
	fn fmt_debug(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let core = self.core();
		writeln!(f, "{} ({}): cooldown {}", core.name(), core.id, core.cooldown)
	}
}

/// Error processing a request on a node.
///
/// Halts the node, but not the rest of the simulation.
#[derive(Clone, Debug)]
pub enum NodeError {
	/// Request kind the node can't process
	UnexpectedRequest {
		node:    String,
		request: String,
		kind:    &'static str,
	},

	/// Request for an address the node doesn't hold
	ForeignAddress {
		node:    String,
		request: String,
		addr:    u64,
		range:   AddressRange,
	},
}

impl fmt::Display for NodeError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::UnexpectedRequest { node, request, kind } => {
				write!(f, "Node {node:?} cannot process {kind} request {request:?}")
			},
			Self::ForeignAddress {
				node,
				request,
				addr,
				range,
			} => write!(
				f,
				"Node {node:?} received request {request:?} for address {addr:#010x}, outside of {range}"
			),
		}
	}
}

impl Error for NodeError {}
