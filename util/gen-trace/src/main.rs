//! Generates random traces, with a configurable skew towards a few hot pages

// Imports
use {
	anyhow::Context,
	clap::Parser,
	hmcsim::{
		trace::{self, AccessKind, TraceRecord, TraceWriter},
		AddressRange,
	},
	hmcsim_util::logger,
	rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng},
	std::{
		fs,
		io::{self, BufWriter, Write},
		path::PathBuf,
	},
};

/// Arguments
#[derive(Debug)]
#[derive(clap::Parser)]
struct Args {
	/// Records to generate
	#[clap(long = "count", default_value_t = 10_000)]
	count: u64,

	/// First address
	#[clap(long = "first", value_parser = trace::parse_hex, default_value = "0x0")]
	first: u64,

	/// Last address
	#[clap(long = "last", value_parser = trace::parse_hex, default_value = "0x7fffffff")]
	last: u64,

	/// Bits of the page offset
	#[clap(long = "page-bits", default_value_t = 12)]
	page_bits: u32,

	/// Number of hot pages
	#[clap(long = "hot-pages", default_value_t = 4)]
	hot_pages: usize,

	/// Fraction of accesses going to the hot pages
	#[clap(long = "hot-fraction", default_value_t = 0.8)]
	hot_fraction: f64,

	/// Fraction of accesses that are reads
	#[clap(long = "read-fraction", default_value_t = 0.7)]
	read_fraction: f64,

	/// Random seed
	#[clap(long = "seed", default_value_t = 0)]
	seed: u64,

	/// Output file.
	///
	/// Writes to stdout if not given.
	#[clap(long = "output")]
	output_file: Option<PathBuf>,
}

fn main() -> Result<(), anyhow::Error> {
	// Get arguments
	let args = Args::parse();
	logger::pre_init::debug(format!("Args: {args:?}"));
	logger::init(None, false);

	let range = AddressRange::new(args.first, args.last).context("Invalid address range")?;
	anyhow::ensure!(args.page_bits < 64, "Page bits must be less than 64");
	anyhow::ensure!(
		(0.0..=1.0).contains(&args.hot_fraction) && (0.0..=1.0).contains(&args.read_fraction),
		"Fractions must be between 0 and 1"
	);
	let pages = ((range.last() - range.first()) >> args.page_bits) + 1;
	let page_size = 1_u64 << args.page_bits;

	// Pick the hot pages
	let mut rng = StdRng::seed_from_u64(args.seed);
	let hot_pages = (0..args.hot_pages)
		.map(|_| rng.gen_range(0..pages))
		.collect::<Vec<_>>();
	tracing::debug!(?hot_pages, "Picked hot pages");

	let writer: Box<dyn Write> = match &args.output_file {
		Some(path) => Box::new(fs::File::create(path).with_context(|| format!("Unable to create {path:?}"))?),
		None => Box::new(io::stdout().lock()),
	};
	let mut writer = TraceWriter::new(BufWriter::new(writer));

	for _ in 0..args.count {
		let page = match rng.gen_bool(args.hot_fraction) {
			true => hot_pages.choose(&mut rng).copied().unwrap_or_else(|| rng.gen_range(0..pages)),
			false => rng.gen_range(0..pages),
		};
		let offset = rng.gen_range(0..page_size) & !0b11;

		// Note: The last page may be cut short by the range
		let addr = range
			.first()
			.saturating_add(page << args.page_bits)
			.saturating_add(offset)
			.min(range.last());
		let kind = match rng.gen_bool(args.read_fraction) {
			true => AccessKind::Read,
			false => AccessKind::Write,
		};

		writer.write(&TraceRecord { kind, addr }).context("Unable to write record")?;
	}

	let records = writer.records_written();
	writer.finish().context("Unable to finish writing trace")?;
	tracing::info!(records, pages, "Generated trace");

	Ok(())
}
