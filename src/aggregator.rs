use std::collections::{HashMap, HashSet};
use std::io::Write;

use log::{debug, warn};
use tokio::sync::mpsc;

use crate::error::BenchError;
use crate::output::{format_row, ReportSink, SEPARATOR};
use crate::stats::{ResolverReport, ResolverStats};
use crate::transport::{FilterThresholds, ProbeResult, WorkerMessage};

/// What the aggregator saw by the time it stopped
#[derive(Debug, Default)]
pub struct AggregateReport {
	/// Finalized rows, in finalization order
	pub rows: Vec<ResolverReport>,
	/// Resolvers that never reached their quota: (label, results seen)
	pub incomplete: Vec<(String, u32)>,
}

/// Single consumer of probe results.
///
/// Owns every resolver's running statistics. A resolver is finalized exactly
/// once, when `tests` results have been observed for it; its row is printed to
/// `console` and, when unfiltered, written to `sink`.
pub struct Aggregator<C: Write, S: Write> {
	tests: u32,
	filters: FilterThresholds,
	stats: HashMap<String, ResolverStats>,
	finalized: HashSet<String>,
	console: C,
	sink: Option<ReportSink<S>>,
	rows: Vec<ResolverReport>,
}

impl<C: Write, S: Write> Aggregator<C, S> {
	pub fn new(
		tests: u32,
		filters: FilterThresholds,
		console: C,
		sink: Option<ReportSink<S>>,
	) -> Self {
		Self {
			tests,
			filters,
			stats: HashMap::new(),
			finalized: HashSet::new(),
			console,
			sink,
			rows: Vec::new(),
		}
	}

	/// Fold one result in; returns the report when it completes a quota.
	pub fn observe(&mut self, result: ProbeResult) -> Result<Option<ResolverReport>, BenchError> {
		if self.finalized.contains(&result.resolver) {
			warn!("{}: result after its quota was reached, ignored", result.resolver);
			return Ok(None);
		}

		let entry = self.stats
			.entry(result.resolver.clone())
			.or_insert_with(|| ResolverStats::new(&result.resolver));
		entry.record(&result.outcome);
		if entry.observed() < self.tests {
			return Ok(None);
		}

		let Some(stats) = self.stats.remove(&result.resolver) else {
			return Ok(None);
		};
		self.finalized.insert(result.resolver);
		let report = stats.finalize(self.tests, &self.filters);
		self.emit(&report)?;
		self.rows.push(report.clone());
		Ok(Some(report))
	}

	fn emit(&mut self, report: &ResolverReport) -> Result<(), BenchError> {
		writeln!(self.console, "{}", format_row(report))?;
		if report.filtered() {
			let reasons: Vec<String> = report.filtered_by.iter().map(|r| r.to_string()).collect();
			debug!("{}: filtered by {}", report.resolver, reasons.join(", "));
			return Ok(());
		}
		if let Some(sink) = self.sink.as_mut() {
			sink.write(report)?;
		}
		Ok(())
	}

	/// Flush the sink and hand back what was collected.
	pub fn finish(mut self) -> Result<AggregateReport, BenchError> {
		if let Some(sink) = self.sink.as_mut() {
			sink.flush()?;
		}
		writeln!(self.console, "{}", SEPARATOR)?;
		self.console.flush()?;

		let mut incomplete: Vec<(String, u32)> = self.stats.values()
			.map(|s| (s.resolver.clone(), s.observed()))
			.collect();
		incomplete.sort();
		for (resolver, seen) in &incomplete {
			warn!("{}: only {}/{} results before shutdown, no row", resolver, seen, self.tests);
		}
		Ok(AggregateReport {
			rows: self.rows,
			incomplete,
		})
	}

	/// Drain the result channel until the terminal marker or channel close.
	///
	/// A sink failure stops the drain immediately; dropping the receiver then
	/// makes every worker's next send fail so the pipeline winds down.
	pub async fn run(mut self, mut results: mpsc::Receiver<WorkerMessage>) -> Result<AggregateReport, BenchError> {
		while let Some(message) = results.recv().await {
			match message {
				WorkerMessage::Result(result) => {
					self.observe(result)?;
				}
				WorkerMessage::Done => {
					debug!("terminal marker received, {} rows finalized", self.rows.len());
					break;
				}
			}
		}
		self.finish()
	}
}
