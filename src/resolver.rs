use std::net::SocketAddr;

use anyhow::{anyhow, Result};

use crate::transport::ResolverConfig;

/// Parse a resolver address string into a ResolverConfig.
///
/// Supports formats:
///   "1.1.1.1"              -- IPv4, default port 53
///   "1.1.1.1:53"           -- IPv4 with explicit port
///   "2606:4700::1111"      -- bare IPv6, default port 53
///   "[2606:4700::1111]:53" -- bracketed IPv6 with port
///
/// The label is the bare IP on port 53 and the full socket address otherwise,
/// so two resolvers on one host never share a report row.
pub fn parse_resolver(input: &str) -> Result<ResolverConfig> {
	let trimmed = input.trim();
	if trimmed.is_empty() {
		return Err(anyhow!("empty resolver address"));
	}

	let addr: SocketAddr = if trimmed.starts_with('[') {
		trimmed.parse()
			.map_err(|e| anyhow!("invalid bracketed IPv6 address '{}': {}", trimmed, e))?
	} else if trimmed.contains("::") || trimmed.matches(':').count() > 1 {
		let ip = trimmed.parse()
			.map_err(|e| anyhow!("invalid IPv6 address '{}': {}", trimmed, e))?;
		SocketAddr::new(ip, 53)
	} else if let Ok(addr) = trimmed.parse::<SocketAddr>() {
		addr
	} else {
		let ip = trimmed.parse()
			.map_err(|e| anyhow!("invalid IP address '{}': {}", trimmed, e))?;
		SocketAddr::new(ip, 53)
	};

	let label = if addr.port() == 53 {
		addr.ip().to_string()
	} else {
		addr.to_string()
	};
	Ok(ResolverConfig { label, addr })
}

/// Split `host` or `host:port`; the port defaults to 53.
fn split_host_port(input: &str) -> Result<(&str, u16)> {
	let (host, port) = match input.rsplit_once(':') {
		Some((host, port)) => {
			let port = port.parse()
				.map_err(|e| anyhow!("invalid port in '{}': {}", input, e))?;
			(host, port)
		}
		None => (input, 53),
	};
	let valid = !host.is_empty()
		&& host.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.');
	if !valid {
		return Err(anyhow!("invalid resolver address '{}'", input));
	}
	Ok((host, port))
}

/// Parse an IP literal, or look up a `host[:port]` name.
///
/// A resolved name keeps the string the user gave as its label. IPv4
/// addresses are preferred when the name has both families.
pub async fn resolve_resolver(input: &str) -> Result<ResolverConfig> {
	if let Ok(resolver) = parse_resolver(input) {
		return Ok(resolver);
	}
	let trimmed = input.trim();
	let (host, port) = split_host_port(trimmed)?;
	let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port)).await
		.map_err(|e| anyhow!("failed to resolve '{}': {}", trimmed, e))?
		.collect();
	let addr = addrs.iter()
		.find(|a| a.is_ipv4())
		.or_else(|| addrs.first())
		.copied()
		.ok_or_else(|| anyhow!("'{}' resolved to no addresses", trimmed))?;
	Ok(ResolverConfig {
		label: trimmed.to_string(),
		addr,
	})
}

/// Parse resolver lines, one per line.
///
/// Blank lines and lines starting with '#' are skipped.
pub async fn parse_resolver_list(content: &str) -> Result<Vec<ResolverConfig>> {
	let mut resolvers = Vec::new();
	for (lineno, line) in content.lines().enumerate() {
		let trimmed = line.trim();
		if trimmed.is_empty() || trimmed.starts_with('#') {
			continue;
		}
		let resolver = resolve_resolver(trimmed).await
			.map_err(|e| anyhow!("line {}: {}", lineno + 1, e))?;
		resolvers.push(resolver);
	}
	Ok(resolvers)
}

/// Read resolver addresses from a file, one per line.
pub async fn read_resolver_file(path: &str) -> Result<Vec<ResolverConfig>> {
	let content = tokio::fs::read_to_string(path).await
		.map_err(|e| anyhow!("failed to read resolver file '{}': {}", path, e))?;
	parse_resolver_list(&content).await
}

/// Drop repeated addresses, keeping the first occurrence.
pub fn dedup_resolvers(resolvers: Vec<ResolverConfig>) -> Vec<ResolverConfig> {
	let mut seen = std::collections::HashSet::new();
	resolvers.into_iter()
		.filter(|r| seen.insert(r.addr))
		.collect()
}
