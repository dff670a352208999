use std::fmt;

use crate::transport::{FilterThresholds, ProbeOutcome};

/// Running statistics for one resolver, owned by the aggregator
#[derive(Debug, Clone, Default)]
pub struct ResolverStats {
	pub resolver: String,
	pub success_count: u32,
	pub failure_count: u32,
	/// Sum of successful round trips in milliseconds
	pub rtt_accumulator: f64,
}

/// Which quality filter rejected a resolver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterReason {
	Latency,
	Failures,
	SuccessRate,
}

impl fmt::Display for FilterReason {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			FilterReason::Latency => "latency",
			FilterReason::Failures => "failures",
			FilterReason::SuccessRate => "success rate",
		};
		f.write_str(s)
	}
}

/// Finalized row for a resolver whose quota was fully observed
#[derive(Debug, Clone, PartialEq)]
pub struct ResolverReport {
	pub resolver: String,
	pub avg_latency_ms: f64,
	/// `success_count * 100 / tests`, truncated
	pub success_rate: u32,
	pub success_count: u32,
	pub failure_count: u32,
	pub filtered_by: Vec<FilterReason>,
}

impl ResolverReport {
	pub fn filtered(&self) -> bool {
		!self.filtered_by.is_empty()
	}

	/// Average latency as printed and persisted: truncated to whole ms.
	pub fn avg_latency_int(&self) -> u64 {
		self.avg_latency_ms as u64
	}
}

/// Ranked entry of the final summary table
#[derive(Debug, Clone)]
pub struct RankedResolver {
	pub rank: usize,
	pub report: ResolverReport,
}

impl ResolverStats {
	pub fn new(resolver: &str) -> Self {
		Self {
			resolver: resolver.to_string(),
			..Self::default()
		}
	}

	pub fn record(&mut self, outcome: &ProbeOutcome) {
		match outcome {
			ProbeOutcome::Success { rtt_ms } => {
				self.success_count += 1;
				self.rtt_accumulator += rtt_ms;
			}
			ProbeOutcome::Failure(_) => self.failure_count += 1,
		}
	}

	/// Number of results seen so far.
	pub fn observed(&self) -> u32 {
		self.success_count + self.failure_count
	}

	/// Mean successful round trip, 0 when nothing succeeded.
	pub fn avg_latency_ms(&self) -> f64 {
		if self.success_count == 0 {
			0.0
		} else {
			self.rtt_accumulator / self.success_count as f64
		}
	}

	/// Compute derived metrics and filter verdicts against a quota of `tests`.
	pub fn finalize(&self, tests: u32, filters: &FilterThresholds) -> ResolverReport {
		let avg = self.avg_latency_ms();
		let success_rate = success_rate(self.success_count, tests);
		ResolverReport {
			resolver: self.resolver.clone(),
			avg_latency_ms: avg,
			success_rate,
			success_count: self.success_count,
			failure_count: self.failure_count,
			filtered_by: apply_filters(avg as u64, self.failure_count, success_rate, filters),
		}
	}
}

/// Integer success rate in percent.
pub fn success_rate(success_count: u32, tests: u32) -> u32 {
	if tests == 0 {
		return 0;
	}
	(success_count as u64 * 100 / tests as u64) as u32
}

/// Evaluate every enabled filter; all three are checked, in order.
///
/// A success rate below `min_success_rate` is rejected: the threshold is a
/// lower bound on reliability.
pub fn apply_filters(
	avg_latency_ms: u64,
	failures: u32,
	success_rate: u32,
	filters: &FilterThresholds,
) -> Vec<FilterReason> {
	let mut reasons = Vec::new();
	if let Some(max) = filters.max_avg_latency_ms.filter(|&v| v > 0) {
		if avg_latency_ms > max as u64 {
			reasons.push(FilterReason::Latency);
		}
	}
	if let Some(max) = filters.max_failures.filter(|&v| v > 0) {
		if failures > max {
			reasons.push(FilterReason::Failures);
		}
	}
	if let Some(min) = filters.min_success_rate.filter(|&v| v > 0) {
		if success_rate < min {
			reasons.push(FilterReason::SuccessRate);
		}
	}
	reasons
}

/// Rank unfiltered resolvers by average latency, ascending.
///
/// Ties on latency go to the higher success rate.
pub fn rank_resolvers(reports: &[ResolverReport]) -> Vec<RankedResolver> {
	let mut kept: Vec<ResolverReport> = reports.iter()
		.filter(|r| !r.filtered())
		.cloned()
		.collect();
	kept.sort_by(|a, b| {
		a.avg_latency_ms.partial_cmp(&b.avg_latency_ms)
			.unwrap_or(std::cmp::Ordering::Equal)
			.then_with(|| b.success_rate.cmp(&a.success_rate))
	});
	kept.into_iter()
		.enumerate()
		.map(|(i, report)| RankedResolver { rank: i + 1, report })
		.collect()
}
