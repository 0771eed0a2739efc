//! Hybrid memory cube simulator (`hmcsim`)
//!
//! Discrete-event simulator of cpus, memory endpoints and address translating
//! controllers that migrate hot pages between the endpoints.

// Modules
pub mod config;
pub mod cpu;
pub mod data;
pub mod endpoint;
pub mod fabric;
pub mod node;
pub mod outcome;
pub mod request;
pub mod system;
pub mod trace;
pub mod translator;

// Exports
pub use self::{
	cpu::Cpu,
	endpoint::{Endpoint, RowBufferParams},
	fabric::Fabric,
	node::{AddressRange, Node, NodeCore, NodeError, NodeId, NodeParams},
	outcome::{MinOutcome, Outcome},
	request::{Request, RequestId, RequestKind, SwapTag, TagAllocator},
	system::{RunOutput, System},
	trace::{AccessKind, TraceReader, TraceRecord, TraceWriter},
	translator::{Migration, TranslateError, Translator, TranslatorParams},
};
