use std::io::Write;
use std::sync::Arc;

use log::{debug, info, trace};
use tokio::sync::{mpsc, Mutex};

use crate::aggregator::{AggregateReport, Aggregator};
use crate::dns::{classify, Exchanger};
use crate::error::BenchError;
use crate::output;
use crate::prefilter::{self, Verdict};
use crate::transport::{BenchmarkConfig, ProbeResult, ProbeTask, ResolverConfig, WorkerMessage};

/// Capacity of the queue between the distributor and the workers
pub const TASK_QUEUE_CAPACITY: usize = 1000;
/// Capacity of the queue between the workers and the aggregator
pub const RESULT_QUEUE_CAPACITY: usize = 250;

/// Every task the distributor emits, in emission order.
///
/// Names form the outer loop and resolvers the inner one, so each round
/// touches every resolver before the next round starts. The `workers`
/// sentinels follow all real tasks; only the last one notifies.
pub fn task_plan<'a>(
	names: &'a [String],
	resolvers: &'a [ResolverConfig],
	workers: usize,
) -> impl Iterator<Item = ProbeTask> + 'a {
	let probes = names.iter().flat_map(move |name| {
		resolvers.iter().map(move |resolver| ProbeTask::Probe {
			name: name.clone(),
			resolver: resolver.clone(),
		})
	});
	let sentinels = (0..workers).map(move |i| {
		if i + 1 == workers {
			ProbeTask::StopAndNotify
		} else {
			ProbeTask::Stop
		}
	});
	probes.chain(sentinels)
}

/// Feed the task queue. Blocks whenever the queue is full.
async fn distribute(
	tasks: mpsc::Sender<ProbeTask>,
	names: Vec<String>,
	resolvers: Vec<ResolverConfig>,
	workers: usize,
) -> Result<(), BenchError> {
	let mut sent = 0usize;
	for task in task_plan(&names, &resolvers, workers) {
		tasks.send(task).await
			.map_err(|_| BenchError::Pipeline("task queue closed before distribution finished".into()))?;
		sent += 1;
	}
	debug!("distributor done, {} tasks queued", sent);
	Ok(())
}

/// Pull tasks until a sentinel; one query per probe task, no retries.
///
/// A result is fully sent before the next task is pulled, so once a worker
/// takes its sentinel every result it produced is already queued.
async fn run_worker<E: Exchanger + ?Sized>(
	id: usize,
	tasks: Arc<Mutex<mpsc::Receiver<ProbeTask>>>,
	results: mpsc::Sender<WorkerMessage>,
	exchanger: Arc<E>,
) {
	let mut probes = 0usize;
	loop {
		let task = tasks.lock().await.recv().await;
		match task {
			None | Some(ProbeTask::Stop) => break,
			Some(ProbeTask::StopAndNotify) => {
				let _ = results.send(WorkerMessage::Done).await;
				break;
			}
			Some(ProbeTask::Probe { name, resolver }) => {
				let outcome = classify(exchanger.exchange(resolver.addr, &name).await);
				trace!("worker {}: {} {} -> {:?}", id, resolver.label, name, outcome);
				probes += 1;
				let result = ProbeResult {
					resolver: resolver.label,
					outcome,
				};
				if results.send(WorkerMessage::Result(result)).await.is_err() {
					debug!("worker {}: aggregator gone, stopping", id);
					break;
				}
			}
		}
	}
	trace!("worker {} exiting after {} probes", id, probes);
}

/// Run the distributor, the worker pool and the aggregator to completion.
///
/// Resolves once the aggregator has seen the terminal marker and flushed its
/// sink. A sink failure aborts the remaining stages and is returned.
pub async fn run_benchmark<E, C, S>(
	resolvers: &[ResolverConfig],
	names: Vec<String>,
	workers: usize,
	exchanger: Arc<E>,
	aggregator: Aggregator<C, S>,
) -> Result<AggregateReport, BenchError>
where
	E: Exchanger + ?Sized + 'static,
	C: Write + Send + 'static,
	S: Write + Send + 'static,
{
	info!(
		"probing {} resolvers with {} names each using {} workers",
		resolvers.len(), names.len(), workers,
	);

	let (task_tx, task_rx) = mpsc::channel::<ProbeTask>(TASK_QUEUE_CAPACITY);
	let (result_tx, result_rx) = mpsc::channel::<WorkerMessage>(RESULT_QUEUE_CAPACITY);

	let aggregator = tokio::spawn(aggregator.run(result_rx));

	let task_rx = Arc::new(Mutex::new(task_rx));
	let mut pool = Vec::with_capacity(workers);
	for id in 0..workers {
		pool.push(tokio::spawn(run_worker(
			id,
			task_rx.clone(),
			result_tx.clone(),
			exchanger.clone(),
		)));
	}
	drop(task_rx);
	drop(result_tx);

	let distributor = tokio::spawn(distribute(task_tx, names, resolvers.to_vec(), workers));

	let report = match aggregator.await {
		Ok(Ok(report)) => report,
		Ok(Err(e)) => {
			distributor.abort();
			for worker in &pool {
				worker.abort();
			}
			return Err(e);
		}
		Err(e) => return Err(BenchError::Pipeline(format!("aggregator: {}", e))),
	};

	distributor.await
		.map_err(|e| BenchError::Pipeline(format!("distributor: {}", e)))??;
	for worker in pool {
		worker.await.map_err(|e| BenchError::Pipeline(format!("worker: {}", e)))?;
	}
	Ok(report)
}

/// Aggregated report plus the resolvers the truncation check threw out
#[derive(Debug)]
pub struct RunOutcome {
	pub report: AggregateReport,
	pub excluded: Vec<Verdict>,
}

/// Truncation check followed by the benchmark proper.
///
/// Only prefilter survivors are handed to the distributor. The aggregator
/// (and its sink) is built by the caller, so the output file already exists
/// and is empty before the first truncation probe goes out.
pub async fn run_with_prefilter<E, C, S>(
	candidates: &[ResolverConfig],
	config: &BenchmarkConfig,
	names: Vec<String>,
	exchanger: Arc<E>,
	aggregator: Aggregator<C, S>,
) -> Result<RunOutcome, BenchError>
where
	E: Exchanger + ?Sized + 'static,
	C: Write + Send + 'static,
	S: Write + Send + 'static,
{
	let (survivors, excluded) = if config.prefilter.enabled {
		println!("Checking {} resolvers for truncation...", candidates.len());
		let outcome = prefilter::check_truncation(candidates, &config.prefilter, exchanger.clone())
			.await?;
		for verdict in &outcome.excluded {
			println!(
				"  {}: excluded ({} truncated, {} errors)",
				verdict.resolver.label, verdict.truncated, verdict.errors,
			);
		}
		println!("  Kept {}/{} resolvers\n", outcome.survivors.len(), candidates.len());
		(outcome.survivors, outcome.excluded)
	} else {
		(candidates.to_vec(), Vec::new())
	};

	output::print_table_header();
	let report = run_benchmark(&survivors, names, config.workers, exchanger, aggregator).await?;
	Ok(RunOutcome { report, excluded })
}

#[cfg(test)]
mod tests {
	use std::collections::HashSet;
	use std::net::SocketAddr;
	use std::time::Duration;

	use super::*;
	use crate::dns::fake::{Behavior, FakeExchanger};
	use crate::domains::{name_rng, synthetic_names};
	use crate::output::ReportSink;
	use crate::resolver::parse_resolver;
	use crate::transport::{FilterThresholds, PrefilterConfig, RecordFormat};

	fn resolver(s: &str) -> ResolverConfig {
		parse_resolver(s).unwrap()
	}

	fn addr(s: &str) -> SocketAddr {
		resolver(s).addr
	}

	fn names(count: u32) -> Vec<String> {
		synthetic_names(&mut name_rng(Some(9)), count, "example.com")
	}

	fn quiet_aggregator(tests: u32, filters: FilterThresholds) -> Aggregator<Vec<u8>, std::fs::File> {
		Aggregator::new(tests, filters, Vec::new(), None)
	}

	#[test]
	fn test_plan_order_and_sentinels() {
		let names = vec!["a.example.com".to_string(), "b.example.com".to_string()];
		let resolvers = vec![resolver("1.1.1.1"), resolver("8.8.8.8")];
		let plan: Vec<ProbeTask> = task_plan(&names, &resolvers, 3).collect();
		assert_eq!(plan.len(), 4 + 3);

		let probes: Vec<(String, String)> = plan.iter()
			.filter_map(|t| match t {
				ProbeTask::Probe { name, resolver } => Some((name.clone(), resolver.label.clone())),
				_ => None,
			})
			.collect();
		assert_eq!(probes, vec![
			("a.example.com".to_string(), "1.1.1.1".to_string()),
			("a.example.com".to_string(), "8.8.8.8".to_string()),
			("b.example.com".to_string(), "1.1.1.1".to_string()),
			("b.example.com".to_string(), "8.8.8.8".to_string()),
		]);
		assert!(matches!(plan[4], ProbeTask::Stop));
		assert!(matches!(plan[5], ProbeTask::Stop));
		assert!(matches!(plan[6], ProbeTask::StopAndNotify));
	}

	#[test]
	fn test_plan_single_worker_only_notifies() {
		let names = vec!["a.example.com".to_string()];
		let resolvers = vec![resolver("1.1.1.1")];
		let plan: Vec<ProbeTask> = task_plan(&names, &resolvers, 1).collect();
		assert_eq!(plan.len(), 2);
		assert!(matches!(plan[1], ProbeTask::StopAndNotify));
	}

	#[tokio::test]
	async fn test_steady_resolver_latency() {
		let exchanger = Arc::new(FakeExchanger::new()
			.with(addr("10.0.0.1"), Behavior::NxDomain { delay: Duration::from_millis(10) }));
		let report = run_benchmark(
			&[resolver("10.0.0.1")], names(5), 4, exchanger.clone(),
			quiet_aggregator(5, FilterThresholds::default()),
		).await.unwrap();

		assert_eq!(report.rows.len(), 1);
		let row = &report.rows[0];
		assert_eq!(row.success_count, 5);
		assert_eq!(row.failure_count, 0);
		assert_eq!(row.success_rate, 100);
		assert!(row.avg_latency_ms >= 10.0 && row.avg_latency_ms < 60.0, "avg {}", row.avg_latency_ms);
		assert_eq!(exchanger.calls(addr("10.0.0.1")), 5);
	}

	#[tokio::test]
	async fn test_timeout_resolver_counts_failures() {
		let exchanger = Arc::new(FakeExchanger::new().with(addr("10.0.0.9"), Behavior::Timeout));
		let report = run_benchmark(
			&[resolver("10.0.0.9")], names(3), 2, exchanger,
			quiet_aggregator(3, FilterThresholds::default()),
		).await.unwrap();

		let row = &report.rows[0];
		assert_eq!((row.success_count, row.failure_count), (0, 3));
		assert_eq!(row.avg_latency_ms, 0.0);
	}

	#[tokio::test]
	async fn test_every_resolver_reported_once_with_full_quota() {
		let fast = Behavior::NxDomain { delay: Duration::from_millis(1) };
		let slow = Behavior::NxDomain { delay: Duration::from_millis(40) };
		let mut fake = FakeExchanger::new();
		let mut resolvers = Vec::new();
		for i in 1..=12u8 {
			let label = format!("10.0.2.{}", i);
			let behavior = match i % 4 {
				0 => slow,
				1 => Behavior::Forged,
				2 => Behavior::Refused,
				_ => fast,
			};
			fake = fake.with(addr(&label), behavior);
			resolvers.push(resolver(&label));
		}
		let tests = 7;
		let report = run_benchmark(
			&resolvers, names(tests), 16, Arc::new(fake),
			quiet_aggregator(tests, FilterThresholds::default()),
		).await.unwrap();

		assert!(report.incomplete.is_empty());
		assert_eq!(report.rows.len(), resolvers.len());
		let unique: HashSet<&str> = report.rows.iter().map(|r| r.resolver.as_str()).collect();
		assert_eq!(unique.len(), resolvers.len());
		for row in &report.rows {
			assert_eq!(row.success_count + row.failure_count, tests);
			assert_eq!(row.success_rate, row.success_count * 100 / tests);
		}
		let forged = report.rows.iter().find(|r| r.resolver == "10.0.2.1").unwrap();
		assert_eq!(forged.success_count, 0);
	}

	#[tokio::test]
	async fn test_slow_tail_is_not_lost_at_shutdown() {
		// The notifying worker finishes long before the slow resolver's last
		// probes come back; their results must still be counted.
		let exchanger = Arc::new(FakeExchanger::new()
			.with(addr("10.0.3.1"), Behavior::NxDomain { delay: Duration::from_millis(1) })
			.with(addr("10.0.3.2"), Behavior::NxDomain { delay: Duration::from_millis(150) }));
		let resolvers = vec![resolver("10.0.3.1"), resolver("10.0.3.2")];
		let report = run_benchmark(
			&resolvers, names(2), 8, exchanger,
			quiet_aggregator(2, FilterThresholds::default()),
		).await.unwrap();

		assert!(report.incomplete.is_empty());
		let order: Vec<&str> = report.rows.iter().map(|r| r.resolver.as_str()).collect();
		assert_eq!(order, vec!["10.0.3.1", "10.0.3.2"]);
		assert_eq!(report.rows[1].success_count, 2);
	}

	#[tokio::test]
	async fn test_more_tasks_than_queue_capacity() {
		let mut fake = FakeExchanger::new();
		let mut resolvers = Vec::new();
		for i in 1..=30u8 {
			let label = format!("10.0.4.{}", i);
			fake = fake.with(addr(&label), Behavior::NxDomain { delay: Duration::ZERO });
			resolvers.push(resolver(&label));
		}
		// 30 x 50 = 1500 tasks, more than the task queue holds
		let report = run_benchmark(
			&resolvers, names(50), 5, Arc::new(fake),
			quiet_aggregator(50, FilterThresholds::default()),
		).await.unwrap();
		assert_eq!(report.rows.len(), 30);
		assert!(report.rows.iter().all(|r| r.success_count == 50));
	}

	#[tokio::test]
	async fn test_hostnames_only_output() {
		let file = tempfile::NamedTempFile::new().unwrap();
		let path = file.path().to_str().unwrap().to_string();
		let sink = ReportSink::create(&path, RecordFormat::HostnamesOnly).unwrap();

		let exchanger = Arc::new(FakeExchanger::new()
			.with(addr("10.0.5.1"), Behavior::NxDomain { delay: Duration::from_millis(2) })
			.with(addr("10.0.5.2"), Behavior::Timeout)
			.with(addr("10.0.5.3"), Behavior::NxDomain { delay: Duration::from_millis(2) }));
		let resolvers = vec![resolver("10.0.5.1"), resolver("10.0.5.2"), resolver("10.0.5.3")];
		let filters = FilterThresholds::from_flags(0, 1, 0);
		let aggregator = Aggregator::new(4, filters, Vec::new(), Some(sink));
		let report = run_benchmark(&resolvers, names(4), 3, exchanger, aggregator)
			.await
			.unwrap();

		let expected: Vec<String> = report.rows.iter()
			.filter(|r| !r.filtered())
			.map(|r| format!("{}\n", r.resolver))
			.collect();
		assert_eq!(expected.len(), 2);
		let content = std::fs::read_to_string(&path).unwrap();
		assert_eq!(content, expected.concat());
		assert!(!content.contains("10.0.5.2"));
	}

	fn prefilter_config(tests: u32) -> BenchmarkConfig {
		BenchmarkConfig {
			tests,
			workers: 4,
			prefilter: PrefilterConfig { probes: 3, ..PrefilterConfig::default() },
			..BenchmarkConfig::default()
		}
	}

	#[tokio::test]
	async fn test_truncating_resolver_never_reaches_report() {
		let file = tempfile::NamedTempFile::new().unwrap();
		let path = file.path().to_str().unwrap().to_string();
		let sink = ReportSink::create(&path, RecordFormat::Full).unwrap();

		let honest = Behavior::NxDomain { delay: Duration::from_millis(1) };
		let exchanger = Arc::new(FakeExchanger::new()
			.with(addr("10.0.6.1"), honest)
			.with(addr("10.0.6.2"), Behavior::Truncated)
			.with(addr("10.0.6.3"), honest));
		let resolvers = vec![resolver("10.0.6.1"), resolver("10.0.6.2"), resolver("10.0.6.3")];
		let config = prefilter_config(4);
		let aggregator = Aggregator::new(config.tests, config.filters, Vec::new(), Some(sink));
		let outcome = run_with_prefilter(&resolvers, &config, names(4), exchanger.clone(), aggregator)
			.await
			.unwrap();

		assert_eq!(outcome.excluded.len(), 1);
		assert_eq!(outcome.excluded[0].resolver.label, "10.0.6.2");
		let labels: Vec<&str> = outcome.report.rows.iter().map(|r| r.resolver.as_str()).collect();
		assert_eq!(labels.len(), 2);
		assert!(!labels.contains(&"10.0.6.2"));
		assert!(outcome.report.incomplete.is_empty());

		let content = std::fs::read_to_string(&path).unwrap();
		assert_eq!(content.lines().count(), 2);
		assert!(content.contains("10.0.6.1,"));
		assert!(content.contains("10.0.6.3,"));
		assert!(!content.contains("10.0.6.2"));
		// Only the three truncation probes, no benchmark traffic
		assert_eq!(exchanger.calls(addr("10.0.6.2")), 3);
		assert_eq!(exchanger.calls(addr("10.0.6.1")), 3 + 4);
	}

	#[tokio::test]
	async fn test_output_file_emptied_even_when_all_excluded() {
		let file = tempfile::NamedTempFile::new().unwrap();
		std::fs::write(file.path(), "10.9.9.9,1,100,4,0\n").unwrap();
		let path = file.path().to_str().unwrap().to_string();
		let sink = ReportSink::create(&path, RecordFormat::Full).unwrap();

		let exchanger = Arc::new(FakeExchanger::new().with(addr("10.0.7.1"), Behavior::Truncated));
		let config = prefilter_config(2);
		let aggregator = Aggregator::new(config.tests, config.filters, Vec::new(), Some(sink));
		let err = run_with_prefilter(&[resolver("10.0.7.1")], &config, names(2), exchanger, aggregator)
			.await
			.unwrap_err();

		assert!(matches!(err, BenchError::AllExcluded(1)));
		assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
	}

	#[tokio::test]
	async fn test_skip_check_sends_everyone_to_benchmark() {
		let exchanger = Arc::new(FakeExchanger::new()
			.with(addr("10.0.8.1"), Behavior::Truncated)
			.with(addr("10.0.8.2"), Behavior::NxDomain { delay: Duration::ZERO }));
		let mut config = prefilter_config(2);
		config.prefilter.enabled = false;
		let resolvers = vec![resolver("10.0.8.1"), resolver("10.0.8.2")];
		let outcome = run_with_prefilter(
			&resolvers, &config, names(2), exchanger.clone(),
			quiet_aggregator(2, FilterThresholds::default()),
		).await.unwrap();

		assert!(outcome.excluded.is_empty());
		assert_eq!(outcome.report.rows.len(), 2);
		assert_eq!(exchanger.calls(addr("10.0.8.1")), 2);
	}
}
