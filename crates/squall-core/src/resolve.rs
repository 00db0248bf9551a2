use std::net::{IpAddr, SocketAddr};

use async_trait::async_trait;

/// Maps a domain name to an IP address. `client_addr` identifies the session
/// asking, so implementations can answer differently per client (split
/// horizon, overrides, DNS-over-X backends).
#[async_trait]
pub trait AbstractResolver: Send + Sync {
	async fn resolve(&self, host: &str, client_addr: SocketAddr) -> std::io::Result<IpAddr>;
}

/// Resolver backed by the host's name resolution; returns the first record.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemResolver;

#[async_trait]
impl AbstractResolver for SystemResolver {
	async fn resolve(&self, host: &str, _client_addr: SocketAddr) -> std::io::Result<IpAddr> {
		let mut addrs = tokio::net::lookup_host((host, 0u16)).await?;
		addrs.next().map(|addr| addr.ip()).ok_or_else(|| {
			std::io::Error::new(std::io::ErrorKind::NotFound, format!("no records for {host}"))
		})
	}
}

#[cfg(test)]
mod test {
	use std::net::{Ipv4Addr, SocketAddr};

	use super::{AbstractResolver, SystemResolver};

	#[tokio::test]
	async fn resolves_localhost() -> eyre::Result<()> {
		let client = SocketAddr::from((Ipv4Addr::LOCALHOST, 40000));
		let ip = SystemResolver.resolve("localhost", client).await?;
		assert!(ip.is_loopback());
		Ok(())
	}
}
