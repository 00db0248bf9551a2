use std::{
	net::{Ipv4Addr, Ipv6Addr, SocketAddr},
	str,
};

use bytes::{Buf, BufMut};
use num_enum::{FromPrimitive, IntoPrimitive};
use snafu::ResultExt;
use squall_core::types::TargetAddr;
use tokio_util::codec::{Decoder, Encoder};

use crate::proto::{
	BytesRemainingSnafu, DomainTooLongSnafu, FailParseDomainSnafu, ProtoError,
	UnknownAddressTypeSnafu,
};

//-----------------------------------------------------------------------------
// Type Definitions
//-----------------------------------------------------------------------------

/// Codec for the SOCKS5 address specifier: ATYP, address bytes, then a
/// big-endian port.
#[derive(Debug, Clone, Copy)]
pub struct AddressCodec;

/// SOCKS5 address representation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
	/// IPv4 address and port
	IPv4(Ipv4Addr, u16),
	/// Domain name and port
	Domain(String, u16),
	/// IPv6 address and port
	IPv6(Ipv6Addr, u16),
}

/// ATYP values as defined in RFC 1928
#[derive(IntoPrimitive, FromPrimitive, Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum AddressType {
	IPv4   = 0x01,
	Domain = 0x03,
	IPv6   = 0x04,
	#[num_enum(catch_all)]
	Other(u8),
}

//-----------------------------------------------------------------------------
// Implementations
//-----------------------------------------------------------------------------

impl Address {
	pub fn unspecified() -> Self {
		Address::IPv4(Ipv4Addr::UNSPECIFIED, 0)
	}
}

impl From<TargetAddr> for Address {
	fn from(value: TargetAddr) -> Self {
		match value {
			TargetAddr::Domain(domain, port) => Self::Domain(domain, port),
			TargetAddr::IPv4(ip, port) => Self::IPv4(ip, port),
			TargetAddr::IPv6(ip, port) => Self::IPv6(ip, port),
		}
	}
}

impl From<Address> for TargetAddr {
	fn from(value: Address) -> Self {
		match value {
			Address::Domain(domain, port) => Self::Domain(domain, port),
			Address::IPv4(ip, port) => Self::IPv4(ip, port),
			Address::IPv6(ip, port) => Self::IPv6(ip, port),
		}
	}
}

impl From<SocketAddr> for Address {
	fn from(value: SocketAddr) -> Self {
		match value {
			SocketAddr::V4(v4) => Self::IPv4(*v4.ip(), v4.port()),
			SocketAddr::V6(v6) => Self::IPv6(*v6.ip(), v6.port()),
		}
	}
}

/// Wire length of the address specifier starting at `src[0]` (the ATYP
/// byte), or `None` while the prefix is too short to tell.
pub(crate) fn specifier_len(src: &[u8]) -> Result<Option<usize>, ProtoError> {
	let Some(&atyp) = src.first() else {
		return Ok(None);
	};
	match AddressType::from(atyp) {
		AddressType::IPv4 => Ok(Some(1 + 4 + 2)),
		AddressType::IPv6 => Ok(Some(1 + 16 + 2)),
		AddressType::Domain => Ok(src.get(1).map(|&len| 1 + 1 + len as usize + 2)),
		AddressType::Other(value) => UnknownAddressTypeSnafu { value }.fail(),
	}
}

//-----------------------------------------------------------------------------
// Codec Implementation
//-----------------------------------------------------------------------------

impl Decoder for AddressCodec {
	type Error = ProtoError;
	type Item = Address;

	fn decode(&mut self, src: &mut bytes::BytesMut) -> Result<Option<Self::Item>, Self::Error> {
		let Some(len) = specifier_len(src)? else {
			return Ok(None);
		};
		if src.len() < len {
			return Ok(None);
		}

		match AddressType::from(src.get_u8()) {
			AddressType::IPv4 => {
				let mut octets = [0; 4];
				src.copy_to_slice(&mut octets);
				let ip = Ipv4Addr::from(octets);
				let port = src.get_u16();
				Ok(Some(Address::IPv4(ip, port)))
			}
			AddressType::IPv6 => {
				let mut octets = [0; 16];
				src.copy_to_slice(&mut octets);
				let ip = Ipv6Addr::from(octets);
				let port = src.get_u16();
				Ok(Some(Address::IPv6(ip, port)))
			}
			AddressType::Domain => {
				let domain_len = src.get_u8() as usize;
				let domain = &src[..domain_len];
				let domain = str::from_utf8(domain)
					.context(FailParseDomainSnafu {
						raw: hex::encode(domain),
					})?
					.to_string();
				src.advance(domain_len);
				let port = src.get_u16();
				Ok(Some(Address::Domain(domain, port)))
			}
			AddressType::Other(value) => UnknownAddressTypeSnafu { value }.fail(),
		}
	}

	fn decode_eof(&mut self, buf: &mut bytes::BytesMut) -> Result<Option<Self::Item>, Self::Error> {
		match self.decode(buf) {
			Ok(None) => BytesRemainingSnafu.fail(),
			v => v,
		}
	}
}

impl Encoder<Address> for AddressCodec {
	type Error = ProtoError;

	fn encode(&mut self, item: Address, dst: &mut bytes::BytesMut) -> Result<(), Self::Error> {
		match item {
			Address::IPv4(ip, port) => {
				// ATYP (1) + IPv4 (4) + Port (2)
				dst.reserve(1 + 4 + 2);
				dst.put_u8(AddressType::IPv4.into());
				dst.put_slice(&ip.octets());
				dst.put_u16(port);
			}
			Address::IPv6(ip, port) => {
				// ATYP (1) + IPv6 (16) + Port (2)
				dst.reserve(1 + 16 + 2);
				dst.put_u8(AddressType::IPv6.into());
				dst.put_slice(&ip.octets());
				dst.put_u16(port);
			}
			Address::Domain(domain, port) => {
				if domain.len() > u8::MAX as usize {
					return DomainTooLongSnafu { domain }.fail();
				}

				// ATYP (1) + Length (1) + Domain + Port (2)
				dst.reserve(1 + 1 + domain.len() + 2);
				dst.put_u8(AddressType::Domain.into());
				dst.put_u8(domain.len() as u8);
				dst.put_slice(domain.as_bytes());
				dst.put_u16(port);
			}
		}
		Ok(())
	}
}

//-----------------------------------------------------------------------------
// Tests
//-----------------------------------------------------------------------------

#[cfg(test)]
mod test {
	use std::net::{Ipv4Addr, Ipv6Addr};

	use futures_util::SinkExt as _;
	use tokio_stream::StreamExt as _;
	use tokio_util::codec::{FramedRead, FramedWrite};

	use super::{Address, AddressCodec};
	use crate::proto::ProtoError;

	/// Complete encoding and decoding cycle for all address types
	#[test_log::test(tokio::test)]
	async fn roundtrip_all_types() -> eyre::Result<()> {
		let buffer = Vec::with_capacity(128);
		let vars = vec![
			Address::IPv4(Ipv4Addr::LOCALHOST, 80),
			Address::IPv6(Ipv6Addr::UNSPECIFIED, 12),
			Address::Domain(String::from("www.example.com"), 443),
		];

		let mut writer = FramedWrite::new(buffer, AddressCodec);
		let mut expect_len = 0;
		for var in &vars {
			match var {
				Address::IPv4(..) => expect_len = expect_len + 1 + 4 + 2,
				Address::IPv6(..) => expect_len = expect_len + 1 + 16 + 2,
				Address::Domain(domain, _) => expect_len = expect_len + 1 + 1 + domain.len() + 2,
			}
			writer.send(var.clone()).await?;
			assert_eq!(writer.get_ref().len(), expect_len);
		}

		let buffer = writer.get_ref();
		let mut reader = FramedRead::new(buffer.as_slice(), AddressCodec);
		for var in vars {
			let frame = reader.next().await.unwrap()?;
			assert_eq!(var, frame);
		}
		Ok(())
	}

	/// Partial data must yield, not fail, until the frame completes
	#[test_log::test(tokio::test)]
	async fn partial_data() -> eyre::Result<()> {
		let vars = vec![
			Address::IPv4(Ipv4Addr::LOCALHOST, 80),
			Address::IPv6(Ipv6Addr::UNSPECIFIED, 12),
			Address::Domain(String::from("www.example.com"), 443),
		];

		for addr in vars {
			let buffer = Vec::with_capacity(128);
			let mut writer = FramedWrite::new(buffer, AddressCodec);
			writer.send(addr.clone()).await?;
			let mut buffer = writer.into_inner();

			let full_len = buffer.len();
			let mut half_b = buffer.split_off(full_len / 2);
			let mut half_a = buffer;

			{
				let mut reader = FramedRead::new(half_a.as_slice(), AddressCodec);
				assert!(matches!(
					reader.next().await.unwrap().unwrap_err(),
					ProtoError::BytesRemaining
				));
			}

			half_a.append(&mut half_b);
			let mut reader = FramedRead::new(half_a.as_slice(), AddressCodec);
			assert_eq!(reader.next().await.unwrap()?, addr);
		}

		Ok(())
	}

	/// Byte-exact layout per RFC 1928
	#[test_log::test(tokio::test)]
	async fn wire_layout() -> eyre::Result<()> {
		let mut buffer = Vec::new();
		FramedWrite::new(&mut buffer, AddressCodec)
			.send(Address::IPv4(Ipv4Addr::LOCALHOST, 80))
			.await?;
		assert_eq!(buffer, [0x01, 127, 0, 0, 1, 0, 80]);

		let mut buffer = Vec::new();
		FramedWrite::new(&mut buffer, AddressCodec)
			.send(Address::Domain("ab".into(), 443))
			.await?;
		assert_eq!(buffer, [0x03, 2, b'a', b'b', 0x01, 0xBB]);
		Ok(())
	}

	/// Unknown ATYP is a hard error
	#[test_log::test(tokio::test)]
	async fn unknown_atyp() {
		let bytes = [0x09u8, 0, 0, 0, 0, 0, 0];
		let mut reader = FramedRead::new(&bytes[..], AddressCodec);
		assert!(matches!(
			reader.next().await.unwrap().unwrap_err(),
			ProtoError::UnknownAddressType { value: 0x09, .. }
		));
	}
}
