//! Output data

// Imports
use crate::{
	config::Topology,
	cpu::{Cpu, CpuStats},
	endpoint::{Endpoint, EndpointStats},
	node::Node,
	system::RunOutput,
	translator::{Translator, TranslatorStats},
};

/// Output data
#[derive(Debug)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct Data {
	pub run:        RunOutput,
	pub cpus:       Vec<CpuData>,
	pub translator: Option<TranslatorData>,
	pub endpoints:  Vec<EndpointData>,
}

impl Data {
	/// Collects the output data of a finished run
	pub fn collect(topology: &Topology, run: RunOutput) -> Self {
		let system = &topology.system;
		Self {
			run,
			cpus: topology
				.cpus
				.iter()
				.filter_map(|&id| system.node_as::<Cpu>(id))
				.map(CpuData::new)
				.collect(),
			translator: topology
				.translator
				.and_then(|id| system.node_as::<Translator>(id))
				.map(TranslatorData::new),
			endpoints: topology
				.endpoints
				.iter()
				.filter_map(|&id| system.node_as::<Endpoint>(id))
				.map(EndpointData::new)
				.collect(),
		}
	}
}

/// Cpu output data
#[derive(Debug)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct CpuData {
	pub name:               String,
	pub reads:              u64,
	pub writes:             u64,
	pub responses:          u64,
	pub skipped:            u64,
	pub unexpected:         u64,
	pub read_latency_mean:  f64,
	pub read_latency_error: f64,
}

impl CpuData {
	fn new(cpu: &Cpu) -> Self {
		let CpuStats {
			reads,
			writes,
			responses,
			skipped,
			unexpected,
			ref read_latency,
		} = *cpu.stats();

		Self {
			name: cpu.core().name().to_owned(),
			reads,
			writes,
			responses,
			skipped,
			unexpected,
			read_latency_mean: read_latency.mean(),
			read_latency_error: read_latency.error(),
		}
	}
}

/// Translator output data
#[derive(Debug)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct TranslatorData {
	pub name:                String,
	pub translated:          u64,
	pub faults:              u64,
	pub locked_translations: u64,
	pub epochs:              u64,
	pub swaps_scheduled:     u64,
	pub swaps_deferred:      u64,
	pub swaps_completed:     u64,
	pub pages_locked:        usize,
}

impl TranslatorData {
	fn new(translator: &Translator) -> Self {
		let TranslatorStats {
			translated,
			faults,
			locked_translations,
			epochs,
			swaps_scheduled,
			swaps_deferred,
			swaps_completed,
		} = *translator.stats();

		Self {
			name: translator.core().name().to_owned(),
			translated,
			faults,
			locked_translations,
			epochs,
			swaps_scheduled,
			swaps_deferred,
			swaps_completed,
			pages_locked: translator.locks().len(),
		}
	}
}

/// Endpoint output data
#[derive(Debug)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct EndpointData {
	pub name:           String,
	pub first:          u64,
	pub last:           u64,
	pub reads:          u64,
	pub writes:         u64,
	pub row_hits:       u64,
	pub row_misses:     u64,
	pub swaps_sent:     u64,
	pub swaps_received: u64,
}

impl EndpointData {
	fn new(endpoint: &Endpoint) -> Self {
		let EndpointStats {
			reads,
			writes,
			row_hits,
			row_misses,
			swaps_sent,
			swaps_received,
		} = *endpoint.stats();
		let range = endpoint.range();

		Self {
			name: endpoint.core().name().to_owned(),
			first: range.first(),
			last: range.last(),
			reads,
			writes,
			row_hits,
			row_misses,
			swaps_sent,
			swaps_received,
		}
	}
}
