use bytes::{Buf, BufMut as _, Bytes};
use snafu::ensure;
use tokio_util::codec::{Decoder, Encoder};

use crate::proto::{
	Address, AddressCodec, BytesRemainingSnafu, NonZeroReservedSnafu, ProtoError, specifier_len,
};

/// One encapsulated datagram on the client<->relay leg:
/// RSV (2), FRAG (1), destination specifier, then the raw payload.
///
/// Datagram framing is implicit; the codec consumes the whole buffer it is
/// handed, so it must only ever see one complete datagram at a time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UdpFrame {
	pub frag: u8,
	pub dst: Address,
	pub payload: Bytes,
}

#[derive(Debug, Clone, Copy)]
pub struct UdpFrameCodec;

impl Decoder for UdpFrameCodec {
	type Error = ProtoError;
	type Item = UdpFrame;

	fn decode(&mut self, src: &mut bytes::BytesMut) -> Result<Option<Self::Item>, Self::Error> {
		if src.len() < 4 {
			return Ok(None);
		}
		ensure!(src[0] == 0, NonZeroReservedSnafu { value: src[0] });
		ensure!(src[1] == 0, NonZeroReservedSnafu { value: src[1] });
		let Some(addr_len) = specifier_len(&src[3..])? else {
			return Ok(None);
		};
		if src.len() < 3 + addr_len {
			return Ok(None);
		}
		src.advance(2);
		let frag = src.get_u8();
		let Some(dst) = AddressCodec.decode(src)? else {
			return BytesRemainingSnafu.fail();
		};
		let payload = src.split_to(src.len()).freeze();
		Ok(Some(UdpFrame { frag, dst, payload }))
	}

	fn decode_eof(&mut self, buf: &mut bytes::BytesMut) -> Result<Option<Self::Item>, Self::Error> {
		match self.decode(buf) {
			Ok(None) => BytesRemainingSnafu.fail(),
			v => v,
		}
	}
}

impl Encoder<UdpFrame> for UdpFrameCodec {
	type Error = ProtoError;

	fn encode(&mut self, item: UdpFrame, dst: &mut bytes::BytesMut) -> Result<(), Self::Error> {
		dst.reserve(3 + item.payload.len());
		dst.put_u8(0);
		dst.put_u8(0);
		dst.put_u8(item.frag);
		AddressCodec.encode(item.dst, dst)?;
		dst.put_slice(&item.payload);
		Ok(())
	}
}

#[cfg(test)]
mod test {
	use std::net::Ipv4Addr;

	use bytes::{Bytes, BytesMut};
	use tokio_util::codec::{Decoder as _, Encoder as _};

	use super::{UdpFrame, UdpFrameCodec};
	use crate::proto::{Address, ProtoError};

	#[test]
	fn roundtrip() -> eyre::Result<()> {
		let frame = UdpFrame {
			frag: 0,
			dst: Address::IPv4(Ipv4Addr::new(192, 0, 2, 7), 53),
			payload: Bytes::from_static(b"ping"),
		};
		let mut buffer = BytesMut::new();
		UdpFrameCodec.encode(frame.clone(), &mut buffer)?;
		assert_eq!(
			&buffer[..],
			&[0x00, 0x00, 0x00, 0x01, 192, 0, 2, 7, 0, 53, b'p', b'i', b'n', b'g']
		);

		let decoded = UdpFrameCodec.decode(&mut buffer)?.unwrap();
		assert_eq!(decoded, frame);
		assert!(buffer.is_empty());
		Ok(())
	}

	#[test]
	fn empty_payload() -> eyre::Result<()> {
		let frame = UdpFrame {
			frag: 0,
			dst: Address::Domain("example.com".into(), 9999),
			payload: Bytes::new(),
		};
		let mut buffer = BytesMut::new();
		UdpFrameCodec.encode(frame.clone(), &mut buffer)?;
		assert_eq!(UdpFrameCodec.decode(&mut buffer)?.unwrap(), frame);
		Ok(())
	}

	/// The fragment byte survives decoding; dropping it is relay policy
	#[test]
	fn fragment_byte_passes_through() -> eyre::Result<()> {
		let mut buffer = BytesMut::new();
		UdpFrameCodec.encode(
			UdpFrame {
				frag: 0x7F,
				dst: Address::IPv4(Ipv4Addr::LOCALHOST, 1),
				payload: Bytes::from_static(b"x"),
			},
			&mut buffer,
		)?;
		assert_eq!(UdpFrameCodec.decode(&mut buffer)?.unwrap().frag, 0x7F);
		Ok(())
	}

	#[test]
	fn rejects_nonzero_reserved() {
		let mut buffer = BytesMut::from(&[0x00u8, 0x01, 0x00, 0x01, 127, 0, 0, 1, 0, 80][..]);
		assert!(matches!(
			UdpFrameCodec.decode(&mut buffer),
			Err(ProtoError::NonZeroReserved { value: 0x01, .. })
		));
	}

	/// A datagram cut short decodes to nothing rather than garbage
	#[test]
	fn truncated_header() -> eyre::Result<()> {
		let mut buffer = BytesMut::from(&[0x00u8, 0x00, 0x00, 0x01, 127][..]);
		assert!(UdpFrameCodec.decode(&mut buffer)?.is_none());
		Ok(())
	}
}
