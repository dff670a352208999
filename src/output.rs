use std::fs::File;
use std::io::Write;

use comfy_table::{Table, ContentArrangement, presets::UTF8_FULL};

use crate::aggregator::AggregateReport;
use crate::error::BenchError;
use crate::stats::{RankedResolver, ResolverReport};
use crate::transport::{BenchmarkConfig, RecordFormat, ResolverConfig};

pub const SEPARATOR: &str = " ----------------------------------------------------------------";

/// Print the run configuration before any probing starts.
pub fn print_header(resolvers: &[ResolverConfig], source: &str, config: &BenchmarkConfig) {
	println!("DNS Resolver Ranking");
	println!("====================");
	println!("Resolvers:      {} (from {})", resolvers.len(), source);
	println!("Test domain:    {}", config.test_domain);
	println!("Workers:        {}", config.workers);
	println!("Tests:          {}", config.tests);
	println!("Timeout:        {} ms", config.timeout.as_millis());
	if config.prefilter.enabled {
		println!(
			"Truncation check: {} x {} ({} workers)",
			config.prefilter.probes, config.prefilter.domain, config.prefilter.concurrency,
		);
	}
	if let Some(seed) = config.seed {
		println!("Seed:           {}", seed);
	}
	if let Some(path) = &config.output {
		println!("Output:         {}", path);
	}
	println!();
}

/// Column header for the rows produced by [`format_row`].
pub fn print_table_header() {
	println!("{}", SEPARATOR);
	println!("| status |                ip | avg milsec | Rate |  Succ |  Fail |");
	println!("{}", SEPARATOR);
}

/// One fixed-width console row for a finalized resolver.
pub fn format_row(report: &ResolverReport) -> String {
	let status = if report.filtered() { "FILTER" } else { "OK    " };
	format!(
		"| {} | {:>17} | {:>10} | {:>3}% | {:>5} | {:>5} |",
		status,
		report.resolver,
		report.avg_latency_int(),
		report.success_rate,
		report.success_count,
		report.failure_count,
	)
}

/// Newline-delimited record sink for unfiltered resolvers.
pub struct ReportSink<W: Write> {
	writer: csv::Writer<W>,
	format: RecordFormat,
	name: String,
}

impl ReportSink<File> {
	/// Create (or truncate) the output file at `path`.
	pub fn create(path: &str, format: RecordFormat) -> Result<Self, BenchError> {
		let file = File::create(path).map_err(|e| BenchError::OutputSink {
			path: path.to_string(),
			source: e.into(),
		})?;
		Ok(Self::from_writer(file, format, path))
	}
}

impl<W: Write> ReportSink<W> {
	pub fn from_writer(inner: W, format: RecordFormat, name: &str) -> Self {
		let writer = csv::WriterBuilder::new()
			.has_headers(false)
			.terminator(csv::Terminator::Any(b'\n'))
			.from_writer(inner);
		Self {
			writer,
			format,
			name: name.to_string(),
		}
	}

	fn sink_error(&self, source: csv::Error) -> BenchError {
		BenchError::OutputSink {
			path: self.name.clone(),
			source,
		}
	}

	pub fn write(&mut self, report: &ResolverReport) -> Result<(), BenchError> {
		let result = match self.format {
			RecordFormat::HostnamesOnly => self.writer.write_record([report.resolver.as_str()]),
			RecordFormat::Full => self.writer.write_record([
				report.resolver.clone(),
				report.avg_latency_int().to_string(),
				report.success_rate.to_string(),
				report.success_count.to_string(),
				report.failure_count.to_string(),
			]),
		};
		result.map_err(|e| self.sink_error(e))
	}

	pub fn flush(&mut self) -> Result<(), BenchError> {
		self.writer.flush().map_err(|e| self.sink_error(e.into()))
	}
}

/// Print the unfiltered resolvers as a ranked table.
pub fn print_ranked_table(ranked: &[RankedResolver]) {
	if ranked.is_empty() {
		println!("\nNo resolver passed the filters.");
		return;
	}

	let mut table = Table::new();
	table.load_preset(UTF8_FULL);
	table.set_content_arrangement(ContentArrangement::Dynamic);
	table.set_header(vec![
		"Rank", "Resolver", "Avg ms", "Success %", "Succ", "Fail",
	]);

	for r in ranked {
		let s = &r.report;
		table.add_row(vec![
			format!("{}", r.rank),
			s.resolver.clone(),
			format!("{:.1}", s.avg_latency_ms),
			format!("{}%", s.success_rate),
			s.success_count.to_string(),
			s.failure_count.to_string(),
		]);
	}

	println!("\nRanked Resolvers");
	println!("================\n");
	println!("{table}");
}

/// One-line tally of how every tested resolver ended up.
pub fn summary_line(report: &AggregateReport, excluded: usize) -> String {
	let filtered = report.rows.iter().filter(|r| r.filtered()).count();
	let ok = report.rows.len() - filtered;
	let mut line = format!("{} ok, {} filtered", ok, filtered);
	if excluded > 0 {
		line.push_str(&format!(", {} excluded by truncation check", excluded));
	}
	if !report.incomplete.is_empty() {
		line.push_str(&format!(", {} incomplete", report.incomplete.len()));
	}
	line
}

pub fn print_summary(report: &AggregateReport, excluded: usize) {
	println!("\nSummary: {}", summary_line(report, excluded));
}
