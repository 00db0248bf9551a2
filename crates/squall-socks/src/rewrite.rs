use std::{collections::HashMap, net::SocketAddr};

use squall_core::types::TargetAddr;

use crate::proto::{Address, Request};

/// Request rewrite hook, run after parsing and before authorization.
/// Useful for DNS overrides and transparent redirects.
pub trait Rewriter: Send + Sync {
	fn rewrite(&self, request: Request, client_addr: SocketAddr) -> Request;
}

/// Rewrites destinations by domain name. A replacement with port 0 keeps
/// the port the client asked for.
#[derive(Debug, Default, Clone)]
pub struct StaticRewriter {
	map: HashMap<String, TargetAddr>,
}

impl StaticRewriter {
	pub fn new(map: HashMap<String, TargetAddr>) -> Self {
		Self { map }
	}
}

impl Rewriter for StaticRewriter {
	fn rewrite(&self, mut request: Request, _client_addr: SocketAddr) -> Request {
		if let Address::Domain(host, port) = &request.addr
			&& let Some(to) = self.map.get(host)
		{
			let port = if to.port() == 0 { *port } else { to.port() };
			request.addr = match to {
				TargetAddr::Domain(domain, _) => Address::Domain(domain.clone(), port),
				TargetAddr::IPv4(ip, _) => Address::IPv4(*ip, port),
				TargetAddr::IPv6(ip, _) => Address::IPv6(*ip, port),
			};
		}
		request
	}
}

#[cfg(test)]
mod test {
	use std::net::{Ipv4Addr, SocketAddr};

	use super::*;
	use crate::proto::Command;

	#[test]
	fn rewrites_mapped_domains_only() {
		let rewriter = StaticRewriter::new(
			[(
				"blocked.example".to_string(),
				TargetAddr::IPv4(Ipv4Addr::LOCALHOST, 0),
			)]
			.into(),
		);
		let client = SocketAddr::from((Ipv4Addr::LOCALHOST, 9));

		let hit = rewriter.rewrite(
			Request {
				command: Command::Connect,
				addr: Address::Domain("blocked.example".into(), 8443),
			},
			client,
		);
		assert_eq!(hit.addr, Address::IPv4(Ipv4Addr::LOCALHOST, 8443));

		let miss = rewriter.rewrite(
			Request {
				command: Command::Connect,
				addr: Address::Domain("other.example".into(), 80),
			},
			client,
		);
		assert_eq!(miss.addr, Address::Domain("other.example".into(), 80));
	}
}
