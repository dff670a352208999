use std::sync::Arc;

use log::{debug, info, warn};
use tokio::sync::{mpsc, Mutex};

use crate::dns::Exchanger;
use crate::error::BenchError;
use crate::transport::{PrefilterConfig, ResolverConfig};

/// Tally of one candidate's truncation probes
#[derive(Debug, Clone)]
pub struct Verdict {
	pub resolver: ResolverConfig,
	pub truncated: u32,
	pub errors: u32,
}

impl Verdict {
	/// Any truncation or transport error disqualifies the resolver.
	pub fn healthy(&self) -> bool {
		self.truncated == 0 && self.errors == 0
	}
}

/// Survivors (in input order) and the verdicts of excluded resolvers
#[derive(Debug, Default)]
pub struct PrefilterOutcome {
	pub survivors: Vec<ResolverConfig>,
	pub excluded: Vec<Verdict>,
}

/// Send `probes` A queries for `domain` to one resolver and tally failures.
async fn probe_resolver<E: Exchanger + ?Sized>(
	exchanger: &E,
	resolver: ResolverConfig,
	domain: &str,
	probes: u32,
) -> Verdict {
	let mut verdict = Verdict {
		resolver,
		truncated: 0,
		errors: 0,
	};
	for _ in 0..probes {
		match exchanger.exchange(verdict.resolver.addr, domain).await {
			Ok(exchange) if exchange.response.truncated => verdict.truncated += 1,
			Ok(_) => {}
			Err(e) => {
				debug!("{}: truncation probe failed: {}", verdict.resolver.label, e);
				verdict.errors += 1;
			}
		}
	}
	verdict
}

/// Vet every candidate with a batch of truncation probes.
///
/// A fixed pool of workers pulls candidates from a shared queue and sends one
/// verdict each back to this task, which alone builds the survivor list.
/// Fails when there are no candidates or when every candidate is excluded.
pub async fn check_truncation<E: Exchanger + ?Sized + 'static>(
	candidates: &[ResolverConfig],
	config: &PrefilterConfig,
	exchanger: Arc<E>,
) -> Result<PrefilterOutcome, BenchError> {
	if candidates.is_empty() {
		return Err(BenchError::NoResolvers);
	}
	info!(
		"checking {} resolvers for truncation ({} probes of {})",
		candidates.len(), config.probes, config.domain,
	);

	let (job_tx, job_rx) = mpsc::channel::<(usize, ResolverConfig)>(candidates.len());
	for (idx, resolver) in candidates.iter().enumerate() {
		job_tx.send((idx, resolver.clone())).await
			.map_err(|e| BenchError::Pipeline(e.to_string()))?;
	}
	drop(job_tx);
	let job_rx = Arc::new(Mutex::new(job_rx));

	let (verdict_tx, mut verdict_rx) = mpsc::channel::<(usize, Verdict)>(candidates.len());
	let workers = config.concurrency.clamp(1, candidates.len());
	let mut handles = Vec::with_capacity(workers);
	for _ in 0..workers {
		let jobs = job_rx.clone();
		let verdicts = verdict_tx.clone();
		let exchanger = exchanger.clone();
		let domain = config.domain.clone();
		let probes = config.probes;

		handles.push(tokio::spawn(async move {
			loop {
				let job = jobs.lock().await.recv().await;
				let Some((idx, resolver)) = job else { break };
				let verdict = probe_resolver(exchanger.as_ref(), resolver, &domain, probes).await;
				if verdicts.send((idx, verdict)).await.is_err() {
					break;
				}
			}
		}));
	}
	drop(verdict_tx);

	let mut collected = Vec::with_capacity(candidates.len());
	while let Some(entry) = verdict_rx.recv().await {
		collected.push(entry);
	}
	for handle in handles {
		handle.await.map_err(|e| BenchError::Pipeline(format!("truncation worker: {}", e)))?;
	}
	collected.sort_by_key(|(idx, _)| *idx);

	let mut outcome = PrefilterOutcome::default();
	for (_, verdict) in collected {
		if verdict.healthy() {
			outcome.survivors.push(verdict.resolver);
		} else {
			warn!(
				"excluding {}: {} truncated, {} failed of {} probes",
				verdict.resolver.label, verdict.truncated, verdict.errors, config.probes,
			);
			outcome.excluded.push(verdict);
		}
	}

	if outcome.survivors.is_empty() {
		return Err(BenchError::AllExcluded(candidates.len()));
	}
	info!(
		"truncation check: {}/{} resolvers kept",
		outcome.survivors.len(), candidates.len(),
	);
	Ok(outcome)
}
