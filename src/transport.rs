use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use crate::error::BenchError;

/// Smallest and largest accepted worker pool size
pub const WORKERS_RANGE: (usize, usize) = (1, 250);
/// Smallest and largest accepted number of test rounds per resolver
pub const TESTS_RANGE: (u32, u32) = (1, 5000);

/// Configuration for a single DNS resolver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverConfig {
	pub label: String,
	pub addr: SocketAddr,
}

/// One unit of work pulled from the task queue by a worker
#[derive(Debug, Clone)]
pub enum ProbeTask {
	/// Query `name` against `resolver`
	Probe {
		name: String,
		resolver: ResolverConfig,
	},
	/// Exit without telling anyone
	Stop,
	/// Exit and tell the aggregator the run is over
	StopAndNotify,
}

/// Why a single probe did not count as a success
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeError {
	#[error("transport error: {0}")]
	Transport(String),
	#[error("timed out")]
	Timeout,
	#[error("unexpected response code {0}")]
	ProtocolMismatch(String),
}

/// Outcome of a single synthetic query
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeOutcome {
	/// Resolver answered NXDOMAIN; round trip in whole milliseconds
	Success { rtt_ms: f64 },
	Failure(ProbeError),
}

/// Result of a single probe, sent from a worker to the aggregator
#[derive(Debug, Clone)]
pub struct ProbeResult {
	pub resolver: String,
	pub outcome: ProbeOutcome,
}

/// Messages carried on the result channel
#[derive(Debug)]
pub enum WorkerMessage {
	Result(ProbeResult),
	/// All tasks have been handed out; no more results are expected
	Done,
}

/// Quality thresholds; `None` disables a filter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterThresholds {
	pub max_avg_latency_ms: Option<u32>,
	pub max_failures: Option<u32>,
	pub min_success_rate: Option<u32>,
}

impl FilterThresholds {
	/// Build thresholds from raw flag values where 0 means disabled.
	pub fn from_flags(time: u32, errors: u32, rate: u32) -> Self {
		let enabled = |v: u32| if v > 0 { Some(v) } else { None };
		Self {
			max_avg_latency_ms: enabled(time),
			max_failures: enabled(errors),
			min_success_rate: enabled(rate),
		}
	}
}

/// Format of the records appended to the output file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordFormat {
	/// `address,avg_ms,rate,succ,fail`
	Full,
	/// Bare resolver address
	HostnamesOnly,
}

/// Truncation prefilter configuration
#[derive(Debug, Clone)]
pub struct PrefilterConfig {
	pub enabled: bool,
	pub domain: String,
	pub probes: u32,
	pub concurrency: usize,
}

impl Default for PrefilterConfig {
	fn default() -> Self {
		Self {
			enabled: true,
			domain: "google.com".to_string(),
			probes: 20,
			concurrency: 10,
		}
	}
}

/// Benchmark configuration
#[derive(Debug, Clone)]
pub struct BenchmarkConfig {
	pub test_domain: String,
	pub workers: usize,
	pub tests: u32,
	pub timeout: Duration,
	pub filters: FilterThresholds,
	pub record_format: RecordFormat,
	pub output: Option<String>,
	pub seed: Option<u64>,
	pub prefilter: PrefilterConfig,
}

impl Default for BenchmarkConfig {
	fn default() -> Self {
		Self {
			test_domain: "example.com".to_string(),
			workers: 10,
			tests: 10,
			timeout: Duration::from_millis(2000),
			filters: FilterThresholds::default(),
			record_format: RecordFormat::Full,
			output: None,
			seed: None,
			prefilter: PrefilterConfig::default(),
		}
	}
}

impl BenchmarkConfig {
	/// Reject worker and test counts outside their accepted ranges.
	pub fn validate(&self) -> Result<(), BenchError> {
		let (min_w, max_w) = WORKERS_RANGE;
		if self.workers < min_w || self.workers > max_w {
			return Err(BenchError::config(format!(
				"invalid number of workers: {} (expected {}..={})",
				self.workers, min_w, max_w,
			)));
		}
		let (min_t, max_t) = TESTS_RANGE;
		if self.tests < min_t || self.tests > max_t {
			return Err(BenchError::config(format!(
				"invalid number of tests: {} (expected {}..={})",
				self.tests, min_t, max_t,
			)));
		}
		if self.test_domain.trim().is_empty() {
			return Err(BenchError::config("test domain is empty"));
		}
		if self.timeout.is_zero() {
			return Err(BenchError::config("timeout must be greater than zero"));
		}
		if self.prefilter.enabled && (self.prefilter.probes == 0 || self.prefilter.concurrency == 0) {
			return Err(BenchError::config("truncation check needs at least one probe and one worker"));
		}
		Ok(())
	}
}
