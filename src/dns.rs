use std::net::SocketAddr;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use hickory_proto::op::{Message, MessageType, Query, ResponseCode};
use hickory_proto::rr::{Name, RecordType};
use tokio::net::UdpSocket;

use crate::transport::{ProbeError, ProbeOutcome};

/// DNS response information extracted from a parsed message
#[derive(Debug, Clone)]
pub struct DnsResponse {
	pub rcode: ResponseCode,
	/// TC bit: the answer did not fit and was cut short
	pub truncated: bool,
	pub answer_count: usize,
	/// True if the answer section contains A records
	pub has_a_records: bool,
}

/// A parsed response together with the measured round trip
#[derive(Debug, Clone)]
pub struct Exchange {
	pub response: DnsResponse,
	pub rtt: Duration,
}

/// One blocking request/response exchange with a resolver.
///
/// Every probe in the crate, prefilter and benchmark alike, goes through this
/// trait so the pipeline can be driven by a scripted resolver in tests.
#[async_trait]
pub trait Exchanger: Send + Sync {
	/// Send an A query for `name` to `resolver` and wait for the answer.
	async fn exchange(&self, resolver: SocketAddr, name: &str) -> Result<Exchange, ProbeError>;
}

/// Build an A query message for the given domain.
///
/// Returns the serialized query bytes ready to send over UDP.
pub fn build_query(domain: &str, txid: u16) -> Result<Vec<u8>> {
	let name = Name::from_ascii(domain)
		.map_err(|e| anyhow!("invalid domain name '{}': {}", domain, e))?;

	let mut message = Message::new();
	message.set_id(txid);
	message.set_recursion_desired(true);
	message.add_query(Query::query(name, RecordType::A));

	let bytes = message.to_vec()
		.map_err(|e| anyhow!("failed to serialize DNS query: {}", e))?;
	Ok(bytes)
}

/// Parse a DNS response, validating the transaction ID and extracting the rcode.
///
/// Returns an error if the response cannot be parsed or the txid does not match.
pub fn parse_response(bytes: &[u8], expected_txid: u16) -> Result<DnsResponse> {
	let message = Message::from_vec(bytes)
		.map_err(|e| anyhow!("failed to parse DNS response: {}", e))?;

	if message.id() != expected_txid {
		return Err(anyhow!(
			"txid mismatch: expected {}, got {}",
			expected_txid, message.id()
		));
	}

	if message.message_type() != MessageType::Response {
		return Err(anyhow!("received a query instead of a response"));
	}

	let has_a_records = message.answers().iter()
		.any(|r| r.record_type() == RecordType::A);

	Ok(DnsResponse {
		rcode: message.response_code(),
		truncated: message.truncated(),
		answer_count: message.answer_count() as usize,
		has_a_records,
	})
}

/// Classify a benchmark exchange: only NXDOMAIN counts as a success.
///
/// A synthetic name should not exist, so any other rcode (including a
/// forged NoError answer) is a protocol mismatch.
pub fn classify(result: Result<Exchange, ProbeError>) -> ProbeOutcome {
	match result {
		Ok(exchange) if exchange.response.rcode == ResponseCode::NXDomain => {
			ProbeOutcome::Success {
				rtt_ms: exchange.rtt.as_millis() as f64,
			}
		}
		Ok(exchange) => {
			let response = exchange.response;
			let detail = if response.has_a_records {
				format!("{} with {} forged answers", response.rcode, response.answer_count)
			} else {
				response.rcode.to_string()
			};
			ProbeOutcome::Failure(ProbeError::ProtocolMismatch(detail))
		}
		Err(e) => ProbeOutcome::Failure(e),
	}
}

/// Plain UDP exchanger on a fresh socket per query.
///
/// A dedicated socket per query avoids response stealing between concurrent
/// workers talking to the same resolver.
#[derive(Debug, Clone)]
pub struct UdpExchanger {
	timeout: Duration,
}

impl UdpExchanger {
	pub fn new(timeout: Duration) -> Self {
		Self { timeout }
	}
}

#[async_trait]
impl Exchanger for UdpExchanger {
	async fn exchange(&self, resolver: SocketAddr, name: &str) -> Result<Exchange, ProbeError> {
		let txid: u16 = rand::random();
		let query_bytes = build_query(name, txid)
			.map_err(|e| ProbeError::Transport(e.to_string()))?;

		let bind_addr = if resolver.is_ipv4() {
			"0.0.0.0:0"
		} else {
			"[::]:0"
		};
		let socket = UdpSocket::bind(bind_addr).await
			.map_err(|e| ProbeError::Transport(e.to_string()))?;

		// Time send+recv together
		let start = Instant::now();
		socket.send_to(&query_bytes, resolver).await
			.map_err(|e| ProbeError::Transport(e.to_string()))?;

		// Stray datagrams with a foreign txid are skipped, a few times at most
		let mut buf = vec![0u8; 4096];
		let max_retries = 3;
		let mut last_error = ProbeError::Timeout;
		for _ in 0..max_retries {
			let elapsed = start.elapsed();
			if elapsed >= self.timeout {
				return Err(ProbeError::Timeout);
			}
			let remaining = self.timeout - elapsed;

			match tokio::time::timeout(remaining, socket.recv_from(&mut buf)).await {
				Ok(Ok((len, _src))) => {
					let rtt = start.elapsed();
					match parse_response(&buf[..len], txid) {
						Ok(response) => return Ok(Exchange { response, rtt }),
						Err(e) => {
							last_error = ProbeError::Transport(e.to_string());
							continue;
						}
					}
				}
				Ok(Err(e)) => return Err(ProbeError::Transport(e.to_string())),
				Err(_) => return Err(ProbeError::Timeout),
			}
		}
		Err(last_error)
	}
}

/// Scripted resolvers for driving the prefilter and the pipeline in tests.
#[cfg(test)]
pub mod fake {
	use std::collections::HashMap;
	use std::sync::atomic::{AtomicUsize, Ordering};
	use std::sync::Mutex;

	use super::*;

	#[derive(Debug, Clone, Copy)]
	pub enum Behavior {
		/// Honest resolver: NXDOMAIN after `delay`
		NxDomain { delay: Duration },
		/// Never answers
		Timeout,
		/// NXDOMAIN with the TC bit set
		Truncated,
		/// Forged NoError answer with an A record
		Forged,
		/// Refuses service
		Refused,
		/// Answers honestly to the first `n` calls, then times out
		FailAfter(usize),
	}

	#[derive(Default)]
	pub struct FakeExchanger {
		behaviors: HashMap<SocketAddr, Behavior>,
		calls: Mutex<HashMap<SocketAddr, usize>>,
		in_flight: AtomicUsize,
		peak: AtomicUsize,
	}

	/// Decrements the in-flight count on every exit path
	struct InFlight<'a>(&'a AtomicUsize);

	impl Drop for InFlight<'_> {
		fn drop(&mut self) {
			self.0.fetch_sub(1, Ordering::SeqCst);
		}
	}

	impl FakeExchanger {
		pub fn new() -> Self {
			Self::default()
		}

		pub fn with(mut self, addr: SocketAddr, behavior: Behavior) -> Self {
			self.behaviors.insert(addr, behavior);
			self
		}

		pub fn calls(&self, addr: SocketAddr) -> usize {
			self.calls.lock().unwrap().get(&addr).copied().unwrap_or(0)
		}

		/// Most exchanges that were ever outstanding at the same time
		pub fn peak_in_flight(&self) -> usize {
			self.peak.load(Ordering::SeqCst)
		}
	}

	fn reply(rcode: ResponseCode, truncated: bool, answers: usize) -> DnsResponse {
		DnsResponse {
			rcode,
			truncated,
			answer_count: answers,
			has_a_records: answers > 0,
		}
	}

	#[async_trait]
	impl Exchanger for FakeExchanger {
		async fn exchange(&self, resolver: SocketAddr, _name: &str) -> Result<Exchange, ProbeError> {
			let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
			self.peak.fetch_max(now, Ordering::SeqCst);
			let _guard = InFlight(&self.in_flight);
			let call = {
				let mut calls = self.calls.lock().unwrap();
				let count = calls.entry(resolver).or_default();
				*count += 1;
				*count
			};
			let behavior = self.behaviors.get(&resolver).copied()
				.unwrap_or(Behavior::Timeout);
			let start = Instant::now();
			let response = match behavior {
				Behavior::NxDomain { delay } => {
					tokio::time::sleep(delay).await;
					reply(ResponseCode::NXDomain, false, 0)
				}
				Behavior::Timeout => return Err(ProbeError::Timeout),
				Behavior::Truncated => reply(ResponseCode::NXDomain, true, 0),
				Behavior::Forged => reply(ResponseCode::NoError, false, 1),
				Behavior::Refused => reply(ResponseCode::Refused, false, 0),
				Behavior::FailAfter(n) if call > n => return Err(ProbeError::Timeout),
				Behavior::FailAfter(_) => reply(ResponseCode::NXDomain, false, 0),
			};
			Ok(Exchange { response, rtt: start.elapsed() })
		}
	}
}
