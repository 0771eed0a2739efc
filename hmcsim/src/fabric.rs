//! Request fabric
//!
//! Single arena holding every live request, plus the resident set of each node.
//! Requests never get copied between nodes, "moving" one updates its owner and
//! both resident sets in one step.

// Imports
use {
	crate::{
		node::NodeId,
		outcome::{MinOutcome, Outcome},
		request::{Request, RequestId},
	},
	anyhow::Context,
};

/// Request fabric
#[derive(Debug, Default)]
pub struct Fabric {
	/// All request slots
	requests: Vec<Option<Request>>,

	/// Free request slots
	free: Vec<usize>,

	/// Resident requests of each node, in arrival order
	resident: Vec<Vec<RequestId>>,

	/// Total requests destroyed
	retired: u64,
}

impl Fabric {
	/// Creates an empty fabric
	pub fn new() -> Self {
		Self::default()
	}

	/// Adds a resident set for a new node, returning its id
	pub(crate) fn add_node(&mut self) -> NodeId {
		self.resident.push(vec![]);
		NodeId::new(self.resident.len() - 1)
	}

	/// Creates a request resident on `owner`
	///
	/// # Panics
	/// Panics if `owner` isn't a node of this fabric.
	pub fn spawn(&mut self, owner: NodeId, mut request: Request) -> RequestId {
		request.owner = owner;
		let id = match self.free.pop() {
			Some(idx) => {
				self.requests[idx] = Some(request);
				RequestId(idx)
			},
			None => {
				self.requests.push(Some(request));
				RequestId(self.requests.len() - 1)
			},
		};

		self.resident
			.get_mut(owner.to_usize())
			.expect("Request owner isn't a node")
			.push(id);
		id
	}

	/// Returns a live request
	pub fn try_get(&self, id: RequestId) -> Option<&Request> {
		self.requests.get(id.0)?.as_ref()
	}

	/// Returns a live request
	///
	/// # Panics
	/// Panics if `id` isn't alive.
	pub fn get(&self, id: RequestId) -> &Request {
		self.try_get(id).expect("Request wasn't alive")
	}

	/// Returns a live request mutably
	///
	/// # Panics
	/// Panics if `id` isn't alive.
	pub fn get_mut(&mut self, id: RequestId) -> &mut Request {
		self.requests
			.get_mut(id.0)
			.and_then(Option::as_mut)
			.expect("Request wasn't alive")
	}

	/// Moves a request onto `to`, returning its previous owner
	///
	/// # Panics
	/// Panics if `id` isn't alive or `to` isn't a node of this fabric.
	pub fn transfer(&mut self, id: RequestId, to: NodeId) -> NodeId {
		let request = self.requests[id.0].as_mut().expect("Request wasn't alive");
		let from = request.owner;
		request.owner = to;

		Self::remove_resident(&mut self.resident[from.to_usize()], id);
		self.resident[to.to_usize()].push(id);

		from
	}

	/// Destroys a request, returning it
	///
	/// # Panics
	/// Panics if `id` isn't alive.
	pub fn destroy(&mut self, id: RequestId) -> Request {
		let request = self.requests[id.0].take().expect("Request wasn't alive");
		Self::remove_resident(&mut self.resident[request.owner.to_usize()], id);
		self.free.push(id.0);
		self.retired += 1;

		request
	}

	/// Returns the requests resident on `node`, in arrival order
	pub fn resident(&self, node: NodeId) -> &[RequestId] {
		self.resident.get(node.to_usize()).map_or(&[], Vec::as_slice)
	}

	/// Decreases the cooldown of every request on `node` by `delta`, saturating at zero.
	///
	/// Returns the smallest resulting cooldown.
	pub fn advance(&mut self, node: NodeId, delta: u64) -> Outcome {
		let Self { requests, resident, .. } = self;
		let Some(resident) = resident.get(node.to_usize()) else {
			return Outcome::Done;
		};

		resident
			.iter()
			.map(|id| {
				let request = requests[id.0].as_mut().expect("Resident request wasn't alive");
				request.cooldown = request.cooldown.saturating_sub(delta);
				Outcome::Pending(request.cooldown)
			})
			.min_outcome()
	}

	/// Returns the number of live requests
	pub fn live(&self) -> usize {
		self.requests.len() - self.free.len()
	}

	/// Returns the total number of requests destroyed
	pub fn retired(&self) -> u64 {
		self.retired
	}

	/// Checks that every live request is resident on exactly its owner
	pub fn check_ownership(&self) -> Result<(), anyhow::Error> {
		let mut seen = vec![0_usize; self.requests.len()];
		for (node_idx, resident) in self.resident.iter().enumerate() {
			for id in resident {
				let request = self
					.try_get(*id)
					.with_context(|| format!("Node {node_idx} holds dead request {id:?}"))?;
				anyhow::ensure!(
					request.owner.to_usize() == node_idx,
					"Request {:?} is resident on node {node_idx}, but owned by {}",
					request.name,
					request.owner
				);
				seen[id.0] += 1;
			}
		}

		for (idx, request) in self.requests.iter().enumerate() {
			let Some(request) = request else { continue };
			anyhow::ensure!(
				seen[idx] == 1,
				"Request {:?} is resident on {} nodes",
				request.name,
				seen[idx]
			);
		}

		Ok(())
	}

	fn remove_resident(resident: &mut Vec<RequestId>, id: RequestId) {
		let pos = resident.iter().position(|&other| other == id);
		debug_assert!(pos.is_some(), "Request wasn't resident on its owner");
		if let Some(pos) = pos {
			resident.remove(pos);
		}
	}
}
