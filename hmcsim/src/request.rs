//! Requests

// Imports
use {crate::node::NodeId, std::fmt};

/// Request id.
///
/// Handle into the [`Fabric`](crate::Fabric)'s request arena. Only valid while
/// the request is alive, ids of destroyed requests may be reused.
#[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Hash, Debug)]
pub struct RequestId(pub(crate) usize);

/// Swap correlation tag
#[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Hash, Debug)]
pub struct SwapTag(u64);

impl SwapTag {
	/// Returns the tag as a `u64`
	pub fn to_u64(self) -> u64 {
		self.0
	}
}

impl fmt::Display for SwapTag {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "#{}", self.0)
	}
}

/// Swap tag allocator
#[derive(Clone, Debug, Default)]
pub struct TagAllocator {
	/// Next tag
	next: u64,
}

impl TagAllocator {
	/// Creates a new allocator, starting at tag `0`
	pub fn new() -> Self {
		Self { next: 0 }
	}

	/// Allocates a fresh tag
	pub fn allocate(&mut self) -> SwapTag {
		let tag = SwapTag(self.next);
		self.next += 1;
		tag
	}
}

/// Request kind
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum RequestKind {
	/// Memory read, becomes a [`RequestKind::ReadResp`] at its endpoint
	ReadReq,

	/// Response to a read, routed back to whoever issued it
	ReadResp,

	/// Memory write, committed and destroyed at its endpoint
	WriteReq,

	/// Asks an endpoint to send the page at the request's address to `partner`,
	/// where it will be stored at `partner_addr`
	SwapReq {
		partner:      NodeId,
		partner_addr: u64,
		tag:          SwapTag,
	},

	/// Page contents moving between two endpoints
	SwapXfer { requester: NodeId, tag: SwapTag },

	/// Tells `requester` that one half of a swap landed
	SwapAck { tag: SwapTag },
}

impl RequestKind {
	/// Returns a short name for this kind
	pub fn name(&self) -> &'static str {
		match self {
			Self::ReadReq => "ReadReq",
			Self::ReadResp => "ReadResp",
			Self::WriteReq => "WriteReq",
			Self::SwapReq { .. } => "SwapReq",
			Self::SwapXfer { .. } => "SwapXfer",
			Self::SwapAck { .. } => "SwapAck",
		}
	}

	/// Returns the swap tag carried by this kind, if any
	pub fn swap_tag(&self) -> Option<SwapTag> {
		match *self {
			Self::SwapReq { tag, .. } | Self::SwapXfer { tag, .. } | Self::SwapAck { tag } => Some(tag),
			Self::ReadReq | Self::ReadResp | Self::WriteReq => None,
		}
	}
}

/// Request
#[derive(Clone, Debug)]
pub struct Request {
	/// Kind
	pub kind: RequestKind,

	/// Node that created this request
	pub origin: NodeId,

	/// Node this request is being routed to
	pub destination: NodeId,

	/// Address of the first byte accessed
	pub addr: u64,

	/// Bytes accessed
	pub bytes: u64,

	/// Ticks until this request may be routed or retired
	pub cooldown: u64,

	/// Clock of the origin when this request was created
	pub issued_at: u64,

	/// Display name
	pub name: String,

	/// Node this request is resident on.
	///
	/// Managed by the fabric.
	pub(crate) owner: NodeId,
}

impl Request {
	/// Creates a new request, ready immediately
	pub fn new(
		kind: RequestKind,
		origin: NodeId,
		destination: NodeId,
		addr: u64,
		bytes: u64,
		name: impl Into<String>,
	) -> Self {
		Self {
			kind,
			origin,
			destination,
			addr,
			bytes,
			cooldown: 0,
			issued_at: 0,
			name: name.into(),
			owner: origin,
		}
	}

	/// Sets the initial cooldown
	#[must_use]
	pub fn with_cooldown(mut self, cooldown: u64) -> Self {
		self.cooldown = cooldown;
		self
	}

	/// Sets the issue time
	#[must_use]
	pub fn with_issued_at(mut self, issued_at: u64) -> Self {
		self.issued_at = issued_at;
		self
	}

	/// Returns the node this request is resident on
	pub fn owner(&self) -> NodeId {
		self.owner
	}

	/// Turns a read request into its response, in place.
	///
	/// The response heads back to the origin and is ready to be routed immediately.
	pub fn into_response(&mut self, responder: NodeId) {
		debug_assert_eq!(self.kind, RequestKind::ReadReq, "Only read requests have responses");

		self.kind = RequestKind::ReadResp;
		self.destination = self.origin;
		self.origin = responder;
		self.cooldown = 0;
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn tags_are_fresh() {
		let mut tags = TagAllocator::new();
		let first = tags.allocate();
		let second = tags.allocate();
		assert_ne!(first, second);
		assert_eq!(second.to_u64(), first.to_u64() + 1);
	}

	#[test]
	fn read_becomes_response() {
		let cpu = NodeId::new(0);
		let mem = NodeId::new(3);
		let mut req = Request::new(RequestKind::ReadReq, cpu, mem, 0x1000, 4, "read").with_cooldown(7);
		req.into_response(mem);

		assert_eq!(req.kind, RequestKind::ReadResp);
		assert_eq!(req.origin, mem);
		assert_eq!(req.destination, cpu);
		assert_eq!(req.addr, 0x1000);
		assert_eq!(req.cooldown, 0);
	}

	#[test]
	fn only_swap_kinds_carry_tags() {
		let mut tags = TagAllocator::new();
		let tag = tags.allocate();
		assert_eq!(RequestKind::SwapAck { tag }.swap_tag(), Some(tag));
		assert_eq!(RequestKind::WriteReq.swap_tag(), None);
	}
}
