use std::time::Duration;

use clap::{ArgAction, Parser};
use log::LevelFilter;

use crate::error::BenchError;
use crate::transport::{
	BenchmarkConfig, FilterThresholds, PrefilterConfig, RecordFormat,
};

/// DNS resolver prober and ranker
#[derive(Parser, Debug)]
#[command(name = "dns-ranker")]
#[command(about = "Probe DNS resolvers with random NXDOMAIN queries, filter and rank them")]
pub struct Cli {
	/// DNS resolver address (repeatable, e.g. 1.1.1.1 or 1.1.1.1:53)
	#[arg(short = 'r', long = "resolver")]
	pub resolvers: Vec<String>,

	/// File containing resolver addresses (one per line)
	#[arg(short = 'i', long = "in")]
	pub input: Option<String>,

	/// Output file for unfiltered resolvers (recreated on every run)
	#[arg(short = 'o', long = "out")]
	pub output: Option<String>,

	/// Base domain for the random test names
	#[arg(short = 'd', long = "domain", default_value = "example.com")]
	pub domain: String,

	/// Number of concurrent workers
	#[arg(short = 'w', long = "workers", default_value = "10")]
	pub workers: usize,

	/// Number of test queries per resolver
	#[arg(short = 'n', long = "tests", default_value = "10")]
	pub tests: u32,

	/// Filter resolvers whose average latency exceeds this many ms (0 = off)
	#[arg(long = "filter-time", default_value = "0")]
	pub filter_time: u32,

	/// Filter resolvers with more failures than this (0 = off)
	#[arg(long = "filter-errors", default_value = "0")]
	pub filter_errors: u32,

	/// Filter resolvers whose success rate is below this percentage (0 = off)
	#[arg(long = "filter-rate", default_value = "0")]
	pub filter_rate: u32,

	/// Save just the resolver address instead of the full record
	#[arg(long = "save-dns")]
	pub save_dns: bool,

	/// Query timeout in milliseconds
	#[arg(short = 't', long = "timeout", default_value = "2000")]
	pub timeout: u64,

	/// Existing domain used by the truncation check
	#[arg(long = "check-domain", default_value = "google.com")]
	pub check_domain: String,

	/// Truncation probes per resolver
	#[arg(long = "check-probes", default_value = "20")]
	pub check_probes: u32,

	/// Skip the truncation check
	#[arg(long = "skip-check")]
	pub skip_check: bool,

	/// Random seed for reproducible test names
	#[arg(short = 's', long = "seed")]
	pub seed: Option<u64>,

	/// Increase log verbosity (-v info, -vv debug, -vvv trace)
	#[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
	pub verbose: u8,
}

impl Cli {
	/// Build and validate the benchmark configuration.
	pub fn to_config(&self) -> Result<BenchmarkConfig, BenchError> {
		let record_format = if self.save_dns {
			RecordFormat::HostnamesOnly
		} else {
			RecordFormat::Full
		};
		let config = BenchmarkConfig {
			test_domain: self.domain.trim().to_string(),
			workers: self.workers,
			tests: self.tests,
			timeout: Duration::from_millis(self.timeout),
			filters: FilterThresholds::from_flags(
				self.filter_time, self.filter_errors, self.filter_rate,
			),
			record_format,
			output: self.output.clone(),
			seed: self.seed,
			prefilter: PrefilterConfig {
				enabled: !self.skip_check,
				domain: self.check_domain.trim().to_string(),
				probes: self.check_probes,
				..PrefilterConfig::default()
			},
		};
		config.validate()?;
		Ok(config)
	}

	pub fn log_level(&self) -> LevelFilter {
		match self.verbose {
			0 => LevelFilter::Warn,
			1 => LevelFilter::Info,
			2 => LevelFilter::Debug,
			_ => LevelFilter::Trace,
		}
	}
}
