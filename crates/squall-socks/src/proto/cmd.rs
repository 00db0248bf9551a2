use bytes::{Buf, BufMut as _};
use num_enum::{FromPrimitive, IntoPrimitive};
use snafu::ensure;
use tokio_util::codec::{Decoder, Encoder};

use crate::proto::{
	Address, AddressCodec, BytesRemainingSnafu, NonZeroReservedSnafu, ProtoError, VER,
	VersionMismatchSnafu, specifier_len,
};

//-----------------------------------------------------------------------------
// Type Definitions
//-----------------------------------------------------------------------------

/// SOCKS5 command byte
#[derive(IntoPrimitive, FromPrimitive, Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
	Connect      = 0x01,
	Bind         = 0x02,
	UdpAssociate = 0x03,
	#[num_enum(catch_all)]
	Other(u8),
}

/// REP byte of a reply
#[derive(IntoPrimitive, FromPrimitive, Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ReplyCode {
	Succeeded               = 0x00,
	GeneralFailure          = 0x01,
	RuleFailure             = 0x02,
	NetworkUnreachable      = 0x03,
	HostUnreachable         = 0x04,
	ConnectionRefused       = 0x05,
	TtlExpired              = 0x06,
	CommandNotSupported     = 0x07,
	AddressTypeNotSupported = 0x08,
	#[num_enum(catch_all)]
	Other(u8),
}

/// Client request: VER, CMD, RSV, then the destination specifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
	pub command: Command,
	pub addr: Address,
}

#[derive(Debug, Clone, Copy)]
pub struct RequestCodec;

/// Server reply: VER, REP, RSV, then the bound-address specifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
	pub rep: ReplyCode,
	pub bnd: Address,
}

#[derive(Debug, Clone, Copy)]
pub struct ReplyCodec;

//-----------------------------------------------------------------------------
// Codec Implementation
//-----------------------------------------------------------------------------

impl Decoder for RequestCodec {
	type Error = ProtoError;
	type Item = Request;

	fn decode(&mut self, src: &mut bytes::BytesMut) -> Result<Option<Self::Item>, Self::Error> {
		if src.len() < 4 {
			return Ok(None);
		}
		ensure!(
			src[0] == VER,
			VersionMismatchSnafu {
				expect: VER,
				current: src[0]
			}
		);
		ensure!(src[2] == 0, NonZeroReservedSnafu { value: src[2] });
		let Some(addr_len) = specifier_len(&src[3..])? else {
			return Ok(None);
		};
		if src.len() < 3 + addr_len {
			return Ok(None);
		}
		src.advance(1);
		let command = Command::from(src.get_u8());
		src.advance(1);
		let Some(addr) = AddressCodec.decode(src)? else {
			// length was established above
			return BytesRemainingSnafu.fail();
		};
		Ok(Some(Request { command, addr }))
	}

	fn decode_eof(&mut self, buf: &mut bytes::BytesMut) -> Result<Option<Self::Item>, Self::Error> {
		match self.decode(buf) {
			Ok(None) => BytesRemainingSnafu.fail(),
			v => v,
		}
	}
}

impl Encoder<Request> for RequestCodec {
	type Error = ProtoError;

	fn encode(&mut self, item: Request, dst: &mut bytes::BytesMut) -> Result<(), Self::Error> {
		dst.reserve(3);
		dst.put_u8(VER);
		dst.put_u8(item.command.into());
		dst.put_u8(0);
		AddressCodec.encode(item.addr, dst)
	}
}

impl Decoder for ReplyCodec {
	type Error = ProtoError;
	type Item = Reply;

	fn decode(&mut self, src: &mut bytes::BytesMut) -> Result<Option<Self::Item>, Self::Error> {
		if src.len() < 4 {
			return Ok(None);
		}
		ensure!(
			src[0] == VER,
			VersionMismatchSnafu {
				expect: VER,
				current: src[0]
			}
		);
		ensure!(src[2] == 0, NonZeroReservedSnafu { value: src[2] });
		let Some(addr_len) = specifier_len(&src[3..])? else {
			return Ok(None);
		};
		if src.len() < 3 + addr_len {
			return Ok(None);
		}
		src.advance(1);
		let rep = ReplyCode::from(src.get_u8());
		src.advance(1);
		let Some(bnd) = AddressCodec.decode(src)? else {
			return BytesRemainingSnafu.fail();
		};
		Ok(Some(Reply { rep, bnd }))
	}

	fn decode_eof(&mut self, buf: &mut bytes::BytesMut) -> Result<Option<Self::Item>, Self::Error> {
		match self.decode(buf) {
			Ok(None) => BytesRemainingSnafu.fail(),
			v => v,
		}
	}
}

impl Encoder<Reply> for ReplyCodec {
	type Error = ProtoError;

	fn encode(&mut self, item: Reply, dst: &mut bytes::BytesMut) -> Result<(), Self::Error> {
		dst.reserve(3);
		dst.put_u8(VER);
		dst.put_u8(item.rep.into());
		dst.put_u8(0);
		AddressCodec.encode(item.bnd, dst)
	}
}

//-----------------------------------------------------------------------------
// Tests
//-----------------------------------------------------------------------------

#[cfg(test)]
mod test {
	use std::net::Ipv4Addr;

	use futures_util::SinkExt as _;
	use tokio_stream::StreamExt as _;
	use tokio_util::codec::{FramedRead, FramedWrite};

	use super::*;

	#[test_log::test(tokio::test)]
	async fn request_roundtrip() -> eyre::Result<()> {
		let vars = vec![
			Request {
				command: Command::Connect,
				addr: Address::IPv4(Ipv4Addr::LOCALHOST, 8080),
			},
			Request {
				command: Command::Bind,
				addr: Address::Domain("www.example.com".into(), 21),
			},
			Request {
				command: Command::UdpAssociate,
				addr: Address::IPv4(Ipv4Addr::UNSPECIFIED, 0),
			},
		];
		for request in vars {
			let mut writer = FramedWrite::new(Vec::new(), RequestCodec);
			writer.send(request.clone()).await?;
			let buffer = writer.into_inner();
			let mut reader = FramedRead::new(buffer.as_slice(), RequestCodec);
			assert_eq!(reader.next().await.unwrap()?, request);
		}
		Ok(())
	}

	#[test_log::test(tokio::test)]
	async fn request_wire_layout() -> eyre::Result<()> {
		let mut writer = FramedWrite::new(Vec::new(), RequestCodec);
		writer
			.send(Request {
				command: Command::Connect,
				addr: Address::IPv4(Ipv4Addr::new(10, 0, 0, 1), 443),
			})
			.await?;
		assert_eq!(
			writer.get_ref(),
			&[0x05, 0x01, 0x00, 0x01, 10, 0, 0, 1, 0x01, 0xBB]
		);
		Ok(())
	}

	/// Unknown commands decode as `Other` so the server can still reply
	#[test_log::test(tokio::test)]
	async fn request_unknown_command() -> eyre::Result<()> {
		let bytes = [0x05u8, 0x09, 0x00, 0x01, 127, 0, 0, 1, 0x00, 0x50];
		let mut reader = FramedRead::new(&bytes[..], RequestCodec);
		let request = reader.next().await.unwrap()?;
		assert_eq!(request.command, Command::Other(0x09));
		Ok(())
	}

	#[test_log::test(tokio::test)]
	async fn request_rejects_nonzero_reserved() {
		let bytes = [0x05u8, 0x01, 0x01, 0x01, 127, 0, 0, 1, 0x00, 0x50];
		let mut reader = FramedRead::new(&bytes[..], RequestCodec);
		assert!(matches!(
			reader.next().await.unwrap().unwrap_err(),
			ProtoError::NonZeroReserved { value: 0x01, .. }
		));
	}

	#[test_log::test(tokio::test)]
	async fn reply_roundtrip() -> eyre::Result<()> {
		let reply = Reply {
			rep: ReplyCode::ConnectionRefused,
			bnd: Address::IPv4(Ipv4Addr::UNSPECIFIED, 0),
		};
		let mut writer = FramedWrite::new(Vec::new(), ReplyCodec);
		writer.send(reply.clone()).await?;
		assert_eq!(
			writer.get_ref(),
			&[0x05, 0x05, 0x00, 0x01, 0, 0, 0, 0, 0, 0]
		);

		let buffer = writer.into_inner();
		let mut reader = FramedRead::new(buffer.as_slice(), ReplyCodec);
		assert_eq!(reader.next().await.unwrap()?, reply);
		Ok(())
	}

	/// Split across every byte boundary, both frames keep decoding
	#[test_log::test(tokio::test)]
	async fn request_partial_data() -> eyre::Result<()> {
		let request = Request {
			command: Command::Connect,
			addr: Address::Domain("proxy.test".into(), 1080),
		};
		let mut writer = FramedWrite::new(Vec::new(), RequestCodec);
		writer.send(request.clone()).await?;
		let buffer = writer.into_inner();

		for cut in 1..buffer.len() {
			let mut reader = FramedRead::new(&buffer[..cut], RequestCodec);
			assert!(matches!(
				reader.next().await.unwrap().unwrap_err(),
				ProtoError::BytesRemaining
			));
		}
		let mut reader = FramedRead::new(buffer.as_slice(), RequestCodec);
		assert_eq!(reader.next().await.unwrap()?, request);
		Ok(())
	}
}
