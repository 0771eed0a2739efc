//! Configuration

// Imports
use {
	crate::{
		cpu::Cpu,
		endpoint::{Endpoint, RowBufferParams},
		node::{AddressRange, Node, NodeId, NodeParams},
		system::System,
		trace,
		translator::{GlobalPolicy, LinearPolicy, Migration, MigrationPolicy, Translator, TranslatorParams},
	},
	anyhow::Context,
	itertools::Itertools,
	std::{
		collections::BTreeMap,
		fs,
		path::{Path, PathBuf},
		time::Duration,
	},
};

/// Configuration
#[derive(Debug)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct Config {
	/// Debug output period (in seconds)
	#[serde(default)]
	pub debug_output_period_secs: Option<f64>,

	/// Maximum scheduler passes
	#[serde(default)]
	pub pass_limit: Option<u64>,

	/// Cpus
	pub cpus: Vec<CpuConfig>,

	/// Translator
	#[serde(default)]
	pub translator: Option<TranslatorConfig>,

	/// Memory endpoints
	pub endpoints: Vec<EndpointConfig>,

	/// Distances from cpus to endpoints
	#[serde(default)]
	pub distances: Vec<DistanceConfig>,

	/// Links between nodes, by name
	pub links: Vec<(String, String)>,
}

/// Cpu config
#[derive(Debug)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct CpuConfig {
	#[serde(flatten)]
	pub node: NodeParams,

	/// Trace file, relative to the config file
	pub trace: PathBuf,

	#[serde(default = "CpuConfig::default_max_outstanding_reads")]
	pub max_outstanding_reads: usize,
}

impl CpuConfig {
	fn default_max_outstanding_reads() -> usize {
		16
	}
}

/// Endpoint config
#[derive(Debug)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct EndpointConfig {
	#[serde(flatten)]
	pub node: NodeParams,

	#[serde(deserialize_with = "self::deserialize_addr")]
	pub first: u64,

	#[serde(deserialize_with = "self::deserialize_addr")]
	pub last: u64,

	#[serde(default)]
	pub row_buffer: RowBufferParams,
}

/// Translator config
#[derive(Debug)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct TranslatorConfig {
	#[serde(flatten)]
	pub node: NodeParams,

	#[serde(deserialize_with = "self::deserialize_addr")]
	pub first: u64,

	#[serde(deserialize_with = "self::deserialize_addr")]
	pub last: u64,

	pub address_bits: u32,
	pub offset_bits:  u32,

	/// Maximum cpus, defaults to the number of cpus
	#[serde(default)]
	pub max_cpus: Option<usize>,

	/// Maximum modules, defaults to the number of endpoints
	#[serde(default)]
	pub max_modules: Option<usize>,

	#[serde(default)]
	pub migration: Option<MigrationConfig>,
}

/// Migration config
#[derive(Debug)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct MigrationConfig {
	pub epoch_length: u64,

	#[serde(default = "MigrationConfig::default_max_swaps_per_epoch")]
	pub max_swaps_per_epoch: usize,

	pub policy: PolicyConfig,
}

impl MigrationConfig {
	fn default_max_swaps_per_epoch() -> usize {
		4
	}
}

/// Migration policy config
#[derive(Debug)]
#[derive(serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PolicyConfig {
	Global { cost_threshold: u64 },
	Linear { threshold: u64 },
}

impl PolicyConfig {
	/// Creates the policy
	pub fn build(&self) -> Box<dyn MigrationPolicy> {
		match *self {
			Self::Global { cost_threshold } => Box::new(GlobalPolicy { cost_threshold }),
			Self::Linear { threshold } => Box::new(LinearPolicy { threshold }),
		}
	}
}

/// Distance config
#[derive(Debug)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct DistanceConfig {
	pub cpu:      String,
	pub endpoint: String,
	pub distance: u64,
}

impl Config {
	/// Reads a config file
	pub fn from_file(path: &Path) -> Result<Self, anyhow::Error> {
		let config_file = fs::File::open(path).with_context(|| format!("Unable to open config file {path:?}"))?;
		serde_json::from_reader(config_file).with_context(|| format!("Unable to parse config file {path:?}"))
	}
}

/// Deserializes an address, either a number or a hexadecimal string
fn deserialize_addr<'de, D: serde::Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
	#[derive(serde::Deserialize)]
	#[serde(untagged)]
	enum Addr {
		Number(u64),
		Hex(String),
	}

	match <Addr as serde::Deserialize>::deserialize(deserializer)? {
		Addr::Number(addr) => Ok(addr),
		Addr::Hex(addr) => trace::parse_hex(&addr).map_err(|err| serde::de::Error::custom(format!("{err:#}"))),
	}
}

/// A built system
#[derive(Debug)]
pub struct Topology {
	/// System
	pub system: System,

	/// Cpus, in config order
	pub cpus: Vec<NodeId>,

	/// Translator
	pub translator: Option<NodeId>,

	/// Endpoints, in config order
	pub endpoints: Vec<NodeId>,
}

/// Builds the system described by `config`.
///
/// Trace paths are relative to `base_dir`.
pub fn build(config: &Config, base_dir: &Path) -> Result<Topology, anyhow::Error> {
	// Check names are unique
	let names = config
		.cpus
		.iter()
		.map(|cpu| &cpu.node.name)
		.chain(config.translator.iter().map(|translator| &translator.node.name))
		.chain(config.endpoints.iter().map(|endpoint| &endpoint.node.name));
	if let Some((name, _)) = names.tuple_combinations().find(|(lhs, rhs)| lhs == rhs) {
		anyhow::bail!("Node name {name:?} is used more than once");
	}

	// And endpoint ranges don't overlap
	let endpoint_ranges = config
		.endpoints
		.iter()
		.map(|endpoint| {
			AddressRange::new(endpoint.first, endpoint.last)
				.with_context(|| format!("Endpoint {:?} has an invalid range", endpoint.node.name))
		})
		.collect::<Result<Vec<_>, _>>()?;
	for ((lhs, lhs_range), (rhs, rhs_range)) in config.endpoints.iter().zip(&endpoint_ranges).tuple_combinations() {
		anyhow::ensure!(
			!lhs_range.overlaps(rhs_range),
			"Endpoint {:?} range {lhs_range} overlaps endpoint {:?} range {rhs_range}",
			lhs.node.name,
			rhs.node.name
		);
	}

	let mut system = System::new();
	system.set_pass_limit(config.pass_limit);
	if let Some(secs) = config.debug_output_period_secs {
		let period = Duration::try_from_secs_f64(secs).context("Invalid debug output period")?;
		system.set_debug_output_period(Some(period));
	}

	// Note: Registration order is also the scheduling order
	let cpus = config
		.cpus
		.iter()
		.map(|cpu| -> Result<_, anyhow::Error> {
			let trace_path = base_dir.join(&cpu.trace);
			let trace = trace::read_file(&trace_path)
				.with_context(|| format!("Unable to read trace of cpu {:?}", cpu.node.name))?;
			tracing::debug!(cpu = %cpu.node.name, records = trace.len(), ?trace_path, "Read trace");

			let cpu = Cpu::new(cpu.node.clone(), trace, cpu.max_outstanding_reads);
			Ok(system.add_node(cpu))
		})
		.collect::<Result<Vec<_>, _>>()?;

	let translator = config
		.translator
		.as_ref()
		.map(|translator| -> Result<_, anyhow::Error> {
			let range = AddressRange::new(translator.first, translator.last).context("Translator has an invalid range")?;
			let params = TranslatorParams {
				range,
				address_bits: translator.address_bits,
				offset_bits: translator.offset_bits,
				max_cpus: translator.max_cpus.unwrap_or(config.cpus.len()),
				max_modules: translator.max_modules.unwrap_or(config.endpoints.len()),
			};
			let migration = translator.migration.as_ref().map(|migration| Migration {
				epoch_length:        migration.epoch_length,
				max_swaps_per_epoch: migration.max_swaps_per_epoch,
				policy:              migration.policy.build(),
			});

			let translator = Translator::new(translator.node.clone(), params, migration)
				.with_context(|| format!("Unable to create translator {:?}", translator.node.name))?;
			Ok((system.add_node(translator), range))
		})
		.transpose()?;

	let endpoints = config
		.endpoints
		.iter()
		.zip(&endpoint_ranges)
		.map(|(endpoint, &range)| {
			system.add_node(Endpoint::new(endpoint.node.clone(), range, endpoint.row_buffer.clone()))
		})
		.collect::<Vec<_>>();

	// Cpus address the translator, if any, else the endpoints directly
	let addressables = match translator {
		Some((translator, range)) => vec![(translator, range)],
		None => endpoints.iter().copied().zip(endpoint_ranges.iter().copied()).collect(),
	};
	for &cpu in &cpus {
		let cpu = system.node_as_mut::<Cpu>(cpu).context("Cpu should be registered")?;
		for &(id, range) in &addressables {
			cpu.add_addressable(id, range)?;
		}
	}

	if let Some((translator_id, _)) = translator {
		let translator = system
			.node_as_mut::<Translator>(translator_id)
			.context("Translator should be registered")?;
		for &cpu in &cpus {
			translator.add_cpu(cpu)?;
		}
		for (&endpoint, &range) in endpoints.iter().zip(&endpoint_ranges) {
			translator.add_module(endpoint, range)?;
		}

		for distance in &config.distances {
			let cpu_idx = config
				.cpus
				.iter()
				.position(|cpu| cpu.node.name == distance.cpu)
				.with_context(|| format!("Unknown cpu in distance: {:?}", distance.cpu))?;
			let module_idx = config
				.endpoints
				.iter()
				.position(|endpoint| endpoint.node.name == distance.endpoint)
				.with_context(|| format!("Unknown endpoint in distance: {:?}", distance.endpoint))?;
			translator.add_distance(cpu_idx, module_idx, distance.distance)?;
		}
	} else if !config.distances.is_empty() {
		tracing::warn!("Distances are only used by a translator, ignoring them");
	}

	// Finally wire everything up
	let ids = system
		.nodes()
		.map(|node| (node.core().name().to_owned(), node.core().id()))
		.collect::<BTreeMap<_, _>>();
	let links = config
		.links
		.iter()
		.map(|(lhs, rhs)| -> Result<_, anyhow::Error> {
			let get = |name: &String| {
				ids.get(name)
					.copied()
					.with_context(|| format!("Unknown node in link: {name:?}"))
			};
			Ok((get(lhs)?, get(rhs)?))
		})
		.collect::<Result<Vec<_>, _>>()?;
	system.connect(&links).context("Unable to connect nodes")?;

	Ok(Topology {
		system,
		cpus,
		translator: translator.map(|(id, _)| id),
		endpoints,
	})
}

#[cfg(test)]
mod tests {
	use {super::*, std::io::Write};

	const CONFIG: &str = r#"{
		"cpus": [{ "name": "CPU0", "trace": "trace.txt", "routing_latency": 1 }],
		"translator": {
			"name": "ctrl",
			"first": "0x0",
			"last": "0x7fffffff",
			"address_bits": 32,
			"offset_bits": 12,
			"routing_latency": 1,
			"retirement_latency": 1,
			"migration": {
				"epoch_length": 100,
				"policy": { "kind": "global", "cost_threshold": 5 }
			}
		},
		"endpoints": [
			{ "name": "mem0", "first": "0x0", "last": "0x3fffffff", "retirement_latency": 2 },
			{ "name": "mem1", "first": 1073741824, "last": "7fffffff", "retirement_latency": 8 }
		],
		"distances": [
			{ "cpu": "CPU0", "endpoint": "mem0", "distance": 1 },
			{ "cpu": "CPU0", "endpoint": "mem1", "distance": 4 }
		],
		"links": [["CPU0", "ctrl"], ["ctrl", "mem0"], ["ctrl", "mem1"]]
	}"#;

	fn write_file(dir: &Path, name: &str, contents: &str) -> PathBuf {
		let path = dir.join(name);
		let mut file = fs::File::create(&path).unwrap();
		file.write_all(contents.as_bytes()).unwrap();
		path
	}

	#[test]
	fn parses_and_builds() {
		let dir = tempfile::tempdir().unwrap();
		write_file(dir.path(), "trace.txt", "R 0x10000000\nW 0x50000000\n");
		let config_path = write_file(dir.path(), "config.json", CONFIG);

		let config = Config::from_file(&config_path).unwrap();
		assert_eq!(config.endpoints[1].first, 0x4000_0000);
		assert_eq!(config.endpoints[1].last, 0x7fff_ffff);
		assert_eq!(config.endpoints[0].node.capacity, 1024);
		assert_eq!(config.translator.as_ref().unwrap().migration.as_ref().unwrap().max_swaps_per_epoch, 4);

		let topology = build(&config, dir.path()).unwrap();
		assert_eq!(topology.cpus, [NodeId::new(0)]);
		assert_eq!(topology.translator, Some(NodeId::new(1)));
		assert_eq!(topology.endpoints, [NodeId::new(2), NodeId::new(3)]);

		let translator = topology
			.system
			.node_as::<Translator>(NodeId::new(1))
			.unwrap();
		assert_eq!(translator.modules().len(), 2);
		assert_eq!(translator.cpus(), [NodeId::new(0)]);

		let mut system = topology.system;
		let output = system.simulate().unwrap();
		assert_eq!(output.retired, 2);
		assert_eq!(output.stranded, 0);
	}

	#[test]
	fn rejects_bad_topologies() {
		let dir = tempfile::tempdir().unwrap();
		write_file(dir.path(), "trace.txt", "");

		let mut config = serde_json::from_str::<Config>(CONFIG).unwrap();
		config.endpoints[1].first = 0x3000_0000;
		let err = build(&config, dir.path()).unwrap_err();
		assert!(format!("{err:#}").contains("overlaps"), "Unexpected error: {err:#}");

		let mut config = serde_json::from_str::<Config>(CONFIG).unwrap();
		config.endpoints[1].node.name = "CPU0".to_owned();
		assert!(build(&config, dir.path()).is_err());

		let mut config = serde_json::from_str::<Config>(CONFIG).unwrap();
		config.links.push(("ctrl".to_owned(), "mem2".to_owned()));
		assert!(build(&config, dir.path()).is_err());

		let mut config = serde_json::from_str::<Config>(CONFIG).unwrap();
		config.distances[0].endpoint = "mem2".to_owned();
		assert!(build(&config, dir.path()).is_err());

		// Missing trace
		let config = serde_json::from_str::<Config>(CONFIG).unwrap();
		let empty_dir = tempfile::tempdir().unwrap();
		assert!(build(&config, empty_dir.path()).is_err());
	}

	#[test]
	fn builds_without_translator() {
		let dir = tempfile::tempdir().unwrap();
		write_file(dir.path(), "trace.txt", "R 0x10\nR 0x40000010\n");

		let mut config = serde_json::from_str::<Config>(CONFIG).unwrap();
		config.translator = None;
		config.distances.clear();
		config.links = vec![
			("CPU0".to_owned(), "mem0".to_owned()),
			("CPU0".to_owned(), "mem1".to_owned()),
		];

		let mut topology = build(&config, dir.path()).unwrap();
		assert_eq!(topology.endpoints, [NodeId::new(1), NodeId::new(2)]);
		let output = topology.system.simulate().unwrap();
		assert_eq!(output.retired, 2);

		let mem1 = topology.system.node_as::<Endpoint>(NodeId::new(2)).unwrap();
		assert_eq!(mem1.stats().reads, 1);
	}
}
