//! System

// Imports
use {
	crate::{
		fabric::Fabric,
		node::{Node, NodeError, NodeId},
		outcome::Outcome,
		request::{Request, RequestId},
	},
	anyhow::Context,
	std::{
		any::Any,
		collections::{BTreeMap, VecDeque},
		time::{Duration, Instant},
	},
};

/// System.
///
/// Owns every node and the fabric and drives them until nothing is left to do.
#[derive(Debug, Default)]
pub struct System {
	/// Nodes, by id
	nodes: Vec<Box<dyn Node>>,

	/// Fabric
	fabric: Fabric,

	/// Nodes halted by an error
	halted: BTreeMap<NodeId, NodeError>,

	/// Debug output period
	///
	/// Interval in which to output debug output for every node
	debug_output_period: Option<Duration>,

	/// Maximum passes before giving up
	pass_limit: Option<u64>,
}

impl System {
	/// Creates an empty system
	pub fn new() -> Self {
		Self::default()
	}

	/// Sets the debug output period
	pub fn set_debug_output_period(&mut self, period: Option<Duration>) {
		self.debug_output_period = period;
	}

	/// Sets the pass limit
	pub fn set_pass_limit(&mut self, pass_limit: Option<u64>) {
		self.pass_limit = pass_limit;
	}

	/// Registers a node, returning its id
	pub fn add_node<N: Node>(&mut self, mut node: N) -> NodeId {
		let id = self.fabric.add_node();
		node.core_mut().set_id(id);
		tracing::trace!(name = node.core().name(), %id, "Registered node");
		self.nodes.push(Box::new(node));

		id
	}

	/// Returns all nodes, by id
	pub fn nodes(&self) -> impl Iterator<Item = &dyn Node> + '_ {
		self.nodes.iter().map(|node| &**node)
	}

	/// Returns a node
	pub fn node(&self, id: NodeId) -> Option<&dyn Node> {
		self.nodes.get(id.to_usize()).map(|node| &**node)
	}

	/// Returns a node as its concrete type
	pub fn node_as<N: Node>(&self, id: NodeId) -> Option<&N> {
		let node: &dyn Node = &**self.nodes.get(id.to_usize())?;
		(node as &dyn Any).downcast_ref()
	}

	/// Returns a node as its concrete type, mutably
	pub fn node_as_mut<N: Node>(&mut self, id: NodeId) -> Option<&mut N> {
		let node: &mut dyn Node = &mut **self.nodes.get_mut(id.to_usize())?;
		(node as &mut dyn Any).downcast_mut()
	}

	/// Returns the fabric
	pub fn fabric(&self) -> &Fabric {
		&self.fabric
	}

	/// Returns the nodes halted by an error
	pub fn halted(&self) -> &BTreeMap<NodeId, NodeError> {
		&self.halted
	}

	/// Creates a request resident on `owner`
	pub fn inject(&mut self, owner: NodeId, request: Request) -> Result<RequestId, anyhow::Error> {
		self.ensure_node(owner)?;
		Ok(self.fabric.spawn(owner, request))
	}

	/// Adds a route on `node`, so requests for `final_destination` go to `next_hop`
	pub fn add_route(&mut self, node: NodeId, final_destination: NodeId, next_hop: NodeId) -> Result<(), anyhow::Error> {
		for id in [node, final_destination, next_hop] {
			self.ensure_node(id)?;
		}
		anyhow::ensure!(node != next_hop, "Node {node} cannot route to itself");

		self.nodes[node.to_usize()].core_mut().add_route(final_destination, next_hop);
		Ok(())
	}

	/// Derives every routing table from undirected links.
	///
	/// Each node routes through the first hop of a shortest path, with earlier
	/// links winning ties.
	pub fn connect(&mut self, links: &[(NodeId, NodeId)]) -> Result<(), anyhow::Error> {
		let nodes_len = self.nodes.len();
		let mut adjacencies = vec![vec![]; nodes_len];
		for &(lhs, rhs) in links {
			self.ensure_node(lhs)?;
			self.ensure_node(rhs)?;
			anyhow::ensure!(lhs != rhs, "Node {lhs} cannot be linked to itself");

			adjacencies[lhs.to_usize()].push(rhs.to_usize());
			adjacencies[rhs.to_usize()].push(lhs.to_usize());
		}

		for src in 0..nodes_len {
			let mut first_hops = vec![None; nodes_len];
			let mut visited = vec![false; nodes_len];
			let mut queue = VecDeque::new();
			visited[src] = true;
			queue.push_back(src);

			while let Some(cur) = queue.pop_front() {
				for &next in &adjacencies[cur] {
					if visited[next] {
						continue;
					}
					visited[next] = true;
					first_hops[next] = match cur == src {
						true => Some(next),
						false => first_hops[cur],
					};
					queue.push_back(next);
				}
			}

			let core = self.nodes[src].core_mut();
			for (dst, first_hop) in first_hops.into_iter().enumerate() {
				if let Some(first_hop) = first_hop {
					core.add_route(NodeId::new(dst), NodeId::new(first_hop));
				}
			}
		}

		Ok(())
	}

	/// Checks every node and every route any node requires
	pub fn validate(&self) -> Result<(), anyhow::Error> {
		for node in &self.nodes {
			node.validate()
				.with_context(|| format!("Node {:?} is misconfigured", node.core().name()))?;
		}

		for node in &self.nodes {
			for (from, to) in node.required_routes() {
				self.check_route(from, to).with_context(|| {
					format!("Node {:?} requires a route from {from} to {to}", node.core().name())
				})?;
			}
		}

		Ok(())
	}

	/// Checks that requests from `from` reach `to`
	fn check_route(&self, from: NodeId, to: NodeId) -> Result<(), anyhow::Error> {
		self.ensure_node(from)?;
		self.ensure_node(to)?;

		let mut cur = from;
		for _ in 0..self.nodes.len() {
			if cur == to {
				return Ok(());
			}

			let core = self.nodes[cur.to_usize()].core();
			cur = core
				.next_hop(to)
				.with_context(|| format!("Node {:?} has no route to {to}", core.name()))?;
			self.ensure_node(cur)?;
		}

		anyhow::ensure!(cur == to, "Route from {from} to {to} loops");
		Ok(())
	}

	fn ensure_node(&self, id: NodeId) -> Result<(), anyhow::Error> {
		anyhow::ensure!(id.to_usize() < self.nodes.len(), "Unknown node {id}");
		Ok(())
	}

	/// Runs the simulation until nothing is left to do
	pub fn simulate(&mut self) -> Result<RunOutput, anyhow::Error> {
		self.validate().context("Unable to validate system")?;

		// Note: We start in the past so that we output right away at the start
		let mut last_debug_time = self
			.debug_output_period
			.and_then(|period| Instant::now().checked_sub(period));

		let mut step = 0;
		let mut elapsed_ticks = 0_u64;
		let mut passes = 0_u64;
		loop {
			if let Some(pass_limit) = self.pass_limit {
				anyhow::ensure!(
					passes < pass_limit,
					"System didn't settle after {pass_limit} passes ({elapsed_ticks} ticks)"
				);
			}

			let outcome = self.run_pass(step).with_context(|| format!("Unable to run pass {passes}"))?;
			passes += 1;

			#[cfg(debug_assertions)]
			self.fabric
				.check_ownership()
				.with_context(|| format!("Request ownership broken after pass {passes}"))?;

			match outcome {
				Outcome::Pending(ticks) => {
					step = ticks;
					elapsed_ticks += ticks;
				},
				Outcome::Done => break,
			}

			// Then show debug output, if it's been long enough
			if let Some(period) = self.debug_output_period {
				let cur_time = Instant::now();
				if last_debug_time.is_none_or(|last_debug_time| cur_time.duration_since(last_debug_time) >= period) {
					tracing::info!(
						"[{elapsed_ticks} ticks, {passes} passes, {} live requests] Debug:\n{}",
						self.fabric.live(),
						hmcsim_util::DisplayWrapper::new(|f| self.nodes.iter().try_for_each(|node| node.fmt_debug(f)))
					);
					last_debug_time = Some(cur_time);
				}
			}
		}

		let stranded = self.fabric.live();
		if stranded > 0 {
			tracing::warn!(stranded, "Requests were left behind");
		}

		Ok(RunOutput {
			elapsed_ticks,
			passes,
			retired: self.fabric.retired(),
			stranded,
			halted: self
				.halted
				.iter()
				.map(|(&id, err)| HaltedNode {
					node:  self.nodes[id.to_usize()].core().name().to_owned(),
					error: err.to_string(),
				})
				.collect(),
		})
	}

	/// Runs a single generate/advance/wake pass, after `step` ticks went by.
	///
	/// Returns the earliest cooldown of anything in the system.
	pub fn run_pass(&mut self, step: u64) -> Result<Outcome, anyhow::Error> {
		let mut outcome = Outcome::Done;

		for (idx, node) in self.nodes.iter_mut().enumerate() {
			if !self.halted.contains_key(&NodeId::new(idx)) {
				outcome = outcome.min(node.generate(&mut self.fabric));
			}
		}

		for (idx, node) in self.nodes.iter_mut().enumerate() {
			if !self.halted.contains_key(&NodeId::new(idx)) {
				outcome = outcome.min(node.advance_time(&mut self.fabric, step));
			}
		}

		for idx in 0..self.nodes.len() {
			if !self.halted.contains_key(&NodeId::new(idx)) {
				outcome = outcome.min(self.wake(idx)?);
			}
		}

		Ok(outcome)
	}

	/// Retires or routes every ready request resident on node `idx`
	fn wake(&mut self, idx: usize) -> Result<Outcome, anyhow::Error> {
		let id = NodeId::new(idx);
		let ready = self
			.fabric
			.resident(id)
			.iter()
			.copied()
			.filter(|&req| self.fabric.get(req).cooldown == 0)
			.collect::<Vec<_>>();

		let mut outcome = Outcome::Done;
		for req in ready {
			debug_assert_eq!(self.fabric.get(req).owner(), id, "Ready request moved while waking");

			let req_outcome = match self.fabric.get(req).destination == id {
				true => match self.nodes[idx].retire(&mut self.fabric, req) {
					Ok(req_outcome) => req_outcome,
					Err(err) => {
						tracing::error!(node = self.nodes[idx].core().name(), %err, "Node halted");
						self.halted.insert(id, err);
						return Ok(outcome);
					},
				},
				false => self.route(idx, req)?,
			};
			outcome = outcome.min(req_outcome);
		}

		Ok(outcome)
	}

	/// Routes `req`, resident on node `idx`, to its next hop
	fn route(&mut self, idx: usize, req: RequestId) -> Result<Outcome, anyhow::Error> {
		let request = self.fabric.get(req);
		let destination = request.destination;
		let Some(next_hop) = self.nodes[idx].core().next_hop(destination) else {
			anyhow::bail!(
				"Node {:?} has no route to {destination} for request {:?}",
				self.nodes[idx].core().name(),
				request.name
			);
		};

		// Note: Halted nodes never advance, so retrying would never settle.
		//       The request stays put and is reported as stranded.
		if let Some(err) = self.halted.get(&next_hop) {
			tracing::warn!(
				name = %request.name,
				node = self.nodes[idx].core().name(),
				%next_hop,
				%err,
				"Next hop is halted, leaving request behind"
			);
			return Ok(Outcome::Done);
		}

		let [_, next] = self
			.nodes
			.get_disjoint_mut([idx, next_hop.to_usize()])
			.map_err(|err| anyhow::anyhow!("Unable to route from {} to {next_hop}: {err}", NodeId::new(idx)))?;

		match next.accept(&mut self.fabric, req) {
			Outcome::Done => Ok(Outcome::Done),
			Outcome::Pending(backoff) => {
				self.fabric.get_mut(req).cooldown = backoff;
				Ok(Outcome::Pending(backoff))
			},
		}
	}
}

/// A node halted by an error
#[derive(Clone, Debug)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct HaltedNode {
	/// Node name
	pub node: String,

	/// Error
	pub error: String,
}

/// Output for [`System::simulate`]
#[derive(Clone, Debug)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct RunOutput {
	/// Simulated ticks
	pub elapsed_ticks: u64,

	/// Passes run
	pub passes: u64,

	/// Requests retired
	pub retired: u64,

	/// Requests still alive at the end
	pub stranded: usize,

	/// Nodes halted by an error
	pub halted: Vec<HaltedNode>,
}
