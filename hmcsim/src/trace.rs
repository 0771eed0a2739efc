//! Text traces
//!
//! One access per line, the last two whitespace separated tokens being the
//! operation (`R` / `W`) and the hexadecimal address. Anything before them
//! (timestamps, thread ids, ...) is ignored, as are blank lines and lines
//! starting with `#`.

// Imports
use {
	anyhow::Context,
	std::{
		fmt,
		fs,
		io::{self, BufRead},
		path::Path,
	},
};

/// Access kind
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum AccessKind {
	Read,
	Write,
}

impl AccessKind {
	/// Returns the trace character for this kind
	pub fn as_char(self) -> char {
		match self {
			Self::Read => 'R',
			Self::Write => 'W',
		}
	}
}

/// Trace record
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub struct TraceRecord {
	/// Kind
	pub kind: AccessKind,

	/// Address
	pub addr: u64,
}

impl fmt::Display for TraceRecord {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{} {:#x}", self.kind.as_char(), self.addr)
	}
}

/// Parses a hexadecimal address, with an optional `0x` prefix
pub fn parse_hex(s: &str) -> Result<u64, anyhow::Error> {
	let digits = s
		.strip_prefix("0x")
		.or_else(|| s.strip_prefix("0X"))
		.unwrap_or(s);
	u64::from_str_radix(digits, 16).with_context(|| format!("Invalid hexadecimal address {s:?}"))
}

/// Parses a single trace line.
///
/// Returns `None` for lines without a record.
pub fn parse_line(line: &str) -> Result<Option<TraceRecord>, anyhow::Error> {
	let line = line.trim();
	if line.is_empty() || line.starts_with('#') {
		return Ok(None);
	}

	let mut tokens = line.split_whitespace().rev();
	let (Some(addr), Some(op)) = (tokens.next(), tokens.next()) else {
		anyhow::bail!("Expected an operation and an address, found {line:?}");
	};

	let kind = match op.chars().next().map(|c| c.to_ascii_uppercase()) {
		Some('R') => AccessKind::Read,
		Some('W') => AccessKind::Write,
		_ => anyhow::bail!("Unknown operation {op:?}"),
	};
	let addr = self::parse_hex(addr)?;

	Ok(Some(TraceRecord { kind, addr }))
}

/// Trace reader
#[derive(Clone, Debug)]
pub struct TraceReader<R> {
	/// Reader
	reader: R,

	/// Lines read
	line_idx: usize,

	/// Line buffer
	buffer: String,
}

impl<R: BufRead> TraceReader<R> {
	/// Creates a new reader
	pub fn new(reader: R) -> Self {
		Self {
			reader,
			line_idx: 0,
			buffer: String::new(),
		}
	}

	/// Reads the next record
	pub fn read_next(&mut self) -> Result<Option<TraceRecord>, anyhow::Error> {
		loop {
			self.buffer.clear();
			let bytes_read = self
				.reader
				.read_line(&mut self.buffer)
				.with_context(|| format!("Unable to read line {}", self.line_idx + 1))?;
			if bytes_read == 0 {
				return Ok(None);
			}
			self.line_idx += 1;

			if let Some(record) =
				self::parse_line(&self.buffer).with_context(|| format!("Unable to parse line {}", self.line_idx))?
			{
				return Ok(Some(record));
			}
		}
	}

	/// Reads all remaining records
	pub fn read_all(mut self) -> Result<Vec<TraceRecord>, anyhow::Error> {
		let mut records = vec![];
		while let Some(record) = self.read_next()? {
			records.push(record);
		}

		Ok(records)
	}
}

/// Reads every record of the trace at `path`
pub fn read_file(path: &Path) -> Result<Vec<TraceRecord>, anyhow::Error> {
	let file = fs::File::open(path).with_context(|| format!("Unable to open trace {path:?}"))?;
	TraceReader::new(io::BufReader::new(file))
		.read_all()
		.with_context(|| format!("Unable to read trace {path:?}"))
}

/// Trace writer
#[derive(Clone, Debug)]
pub struct TraceWriter<W> {
	/// Records written
	records_written: u64,

	/// Writer
	writer: W,
}

impl<W: io::Write> TraceWriter<W> {
	/// Creates a new writer
	pub fn new(writer: W) -> Self {
		Self {
			records_written: 0,
			writer,
		}
	}

	/// Writes a record
	pub fn write(&mut self, record: &TraceRecord) -> Result<(), anyhow::Error> {
		writeln!(self.writer, "{record}").context("Unable to write record")?;

		self.records_written += 1;
		Ok(())
	}

	/// Returns the records written
	pub fn records_written(&self) -> u64 {
		self.records_written
	}

	/// Finishes writing
	pub fn finish(mut self) -> Result<W, anyhow::Error> {
		self.writer.flush().context("Unable to flush writer")?;
		Ok(self.writer)
	}
}
