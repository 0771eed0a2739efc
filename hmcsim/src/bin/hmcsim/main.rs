//! Hybrid memory cube simulator (`hmcsim`)

// Modules
mod args;

// Imports
use {
	self::args::Args,
	anyhow::Context,
	clap::Parser,
	hmcsim::{config, data},
	hmcsim_util::logger,
	std::{fs, path::Path},
};

fn main() -> Result<(), anyhow::Error> {
	// Get arguments
	let args = Args::parse();
	logger::pre_init::debug(format!("Args: {args:?}"));

	// Initialize logging
	logger::init(args.log_file.as_deref(), args.log_file_append);

	// Read the config file and build the system
	let config = config::Config::from_file(&args.config_file)?;
	tracing::trace!(?config, "Parsed config");
	let base_dir = args.config_file.parent().unwrap_or(Path::new("."));
	let mut topology = config::build(&config, base_dir).context("Unable to build system")?;

	// Run the simulation
	let run = topology.system.simulate().context("Unable to run simulation")?;
	tracing::info!(
		elapsed_ticks = run.elapsed_ticks,
		passes = run.passes,
		retired = run.retired,
		stranded = run.stranded,
		halted = run.halted.len(),
		"Simulation finished"
	);
	for halted in &run.halted {
		tracing::error!(node = %halted.node, error = %halted.error, "Node was halted");
	}

	if let Some(output_path) = &args.output_file {
		let data = data::Data::collect(&topology, run);
		let output_file = fs::File::create(output_path).context("Unable to create output file")?;
		serde_json::to_writer_pretty(output_file, &data).context("Unable to write to output file")?;
	}

	Ok(())
}
