mod aggregator;
mod bench;
mod cli;
mod dns;
mod domains;
mod error;
mod output;
mod prefilter;
mod resolver;
mod stats;
mod transport;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use log::LevelFilter;

use crate::aggregator::Aggregator;
use crate::cli::Cli;
use crate::dns::UdpExchanger;
use crate::error::BenchError;
use crate::output::ReportSink;

/// Route `log` output to stderr; `RUST_LOG` overrides the `-v` level.
fn init_logger(level: LevelFilter) {
	let mut builder = env_logger::Builder::new();
	builder.filter_level(level);
	// hickory complains loudly about malformed datagrams we already count
	builder.filter_module("hickory_proto", LevelFilter::Error);
	builder.parse_default_env();
	builder.format_timestamp_millis();
	let _ = builder.try_init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let cli = Cli::parse();
	init_logger(cli.log_level());
	let config = cli.to_config()?;

	// Collect resolvers from flags and the input file
	let mut resolvers = Vec::new();
	for r in &cli.resolvers {
		resolvers.push(resolver::resolve_resolver(r).await?);
	}
	if let Some(path) = &cli.input {
		resolvers.extend(resolver::read_resolver_file(path).await?);
	}
	let resolvers = resolver::dedup_resolvers(resolvers);
	if resolvers.is_empty() {
		return Err(BenchError::NoResolvers.into());
	}

	let source = cli.input.as_deref().unwrap_or("command line");
	output::print_header(&resolvers, source, &config);

	// Truncate the output file before any traffic goes out
	let sink = match &config.output {
		Some(path) => Some(ReportSink::create(path, config.record_format)?),
		None => None,
	};
	let mut rng = domains::name_rng(config.seed);
	let names = domains::synthetic_names(&mut rng, config.tests, &config.test_domain);
	let aggregator = Aggregator::new(config.tests, config.filters, std::io::stdout(), sink);
	let exchanger = Arc::new(UdpExchanger::new(config.timeout));

	let outcome = bench::run_with_prefilter(&resolvers, &config, names, exchanger, aggregator)
		.await
		.context("benchmark failed")?;
	let report = outcome.report;
	let excluded = outcome.excluded.len();

	let ranked = stats::rank_resolvers(&report.rows);
	output::print_ranked_table(&ranked);
	output::print_summary(&report, excluded);

	if let Some(path) = &config.output {
		println!("\nResults written to: {}", path);
	}

	Ok(())
}
