use std::{
	fmt,
	net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr},
	str::FromStr,
};

use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TargetAddr {
	Domain(String, u16),
	IPv4(Ipv4Addr, u16),
	IPv6(Ipv6Addr, u16),
}

impl TargetAddr {
	pub fn port(&self) -> u16 {
		match self {
			TargetAddr::Domain(_, port) | TargetAddr::IPv4(_, port) | TargetAddr::IPv6(_, port) => *port,
		}
	}

	/// The address as a socket address, unless it still needs resolving.
	pub fn to_socket_addr(&self) -> Option<SocketAddr> {
		match self {
			TargetAddr::Domain(..) => None,
			TargetAddr::IPv4(ip, port) => Some(SocketAddr::from((*ip, *port))),
			TargetAddr::IPv6(ip, port) => Some(SocketAddr::from((*ip, *port))),
		}
	}

	pub fn with_ip(&self, ip: IpAddr) -> TargetAddr {
		match ip {
			IpAddr::V4(ip) => TargetAddr::IPv4(ip, self.port()),
			IpAddr::V6(ip) => TargetAddr::IPv6(ip, self.port()),
		}
	}
}

impl From<SocketAddr> for TargetAddr {
	fn from(value: SocketAddr) -> Self {
		match value {
			SocketAddr::V4(v4) => TargetAddr::IPv4(*v4.ip(), v4.port()),
			SocketAddr::V6(v6) => TargetAddr::IPv6(*v6.ip(), v6.port()),
		}
	}
}

impl fmt::Display for TargetAddr {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			TargetAddr::Domain(domain, port) => write!(f, "{domain}:{port}"),
			TargetAddr::IPv4(ip, port) => write!(f, "{ip}:{port}"),
			TargetAddr::IPv6(ip, port) => write!(f, "[{ip}]:{port}"),
		}
	}
}

impl FromStr for TargetAddr {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		if let Ok(addr) = s.parse::<SocketAddr>() {
			return Ok(addr.into());
		}
		let (host, port) = s
			.rsplit_once(':')
			.ok_or_else(|| format!("missing port in address {s:?}"))?;
		let port = port
			.parse::<u16>()
			.map_err(|_| format!("invalid port in address {s:?}"))?;
		if host.is_empty() {
			return Err(format!("empty host in address {s:?}"));
		}
		Ok(TargetAddr::Domain(host.to_owned(), port))
	}
}

impl Serialize for TargetAddr {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.collect_str(self)
	}
}

impl<'de> Deserialize<'de> for TargetAddr {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let s = String::deserialize(deserializer)?;
		s.parse().map_err(de::Error::custom)
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn parse_roundtrip() {
		for raw in ["127.0.0.1:1080", "[::1]:1080", "example.com:443"] {
			let addr: TargetAddr = raw.parse().unwrap();
			assert_eq!(addr.to_string(), raw);
		}
	}

	#[test]
	fn parse_rejects_garbage() {
		assert!("example.com".parse::<TargetAddr>().is_err());
		assert!(":80".parse::<TargetAddr>().is_err());
		assert!("example.com:http".parse::<TargetAddr>().is_err());
	}

	#[test]
	fn serde_as_string() {
		let addr = TargetAddr::Domain("example.com".into(), 443);
		let json = serde_json::to_string(&addr).unwrap();
		assert_eq!(json, "\"example.com:443\"");
		assert_eq!(serde_json::from_str::<TargetAddr>(&json).unwrap(), addr);
	}
}
