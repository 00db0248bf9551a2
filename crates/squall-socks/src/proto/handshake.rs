use bytes::{Buf, BufMut as _};
use snafu::{ResultExt, ensure};
use tokio_util::codec::{Decoder, Encoder};

use crate::proto::{
	BytesRemainingSnafu, CredentialNotUtf8Snafu, FieldTooLongSnafu, ProtoError, SUB_VER, VER,
	VersionMismatchSnafu,
};

//-----------------------------------------------------------------------------
// Method negotiation
//-----------------------------------------------------------------------------

/// Client greeting: the set of authentication METHODs on offer, in the
/// client's preference order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodRequest {
	pub methods: Vec<u8>,
}

#[derive(Debug, Clone, Copy)]
pub struct MethodRequestCodec;

impl Decoder for MethodRequestCodec {
	type Error = ProtoError;
	type Item = MethodRequest;

	fn decode(&mut self, src: &mut bytes::BytesMut) -> Result<Option<Self::Item>, Self::Error> {
		if src.len() < 2 {
			return Ok(None);
		}
		ensure!(
			src[0] == VER,
			VersionMismatchSnafu {
				expect: VER,
				current: src[0]
			}
		);
		let nmethods = src[1] as usize;
		if src.len() < 2 + nmethods {
			return Ok(None);
		}
		src.advance(2);
		let methods = src.split_to(nmethods).to_vec();
		Ok(Some(MethodRequest { methods }))
	}

	fn decode_eof(&mut self, buf: &mut bytes::BytesMut) -> Result<Option<Self::Item>, Self::Error> {
		match self.decode(buf) {
			Ok(None) => BytesRemainingSnafu.fail(),
			v => v,
		}
	}
}

impl Encoder<MethodRequest> for MethodRequestCodec {
	type Error = ProtoError;

	fn encode(&mut self, item: MethodRequest, dst: &mut bytes::BytesMut) -> Result<(), Self::Error> {
		ensure!(
			item.methods.len() <= u8::MAX as usize,
			FieldTooLongSnafu {
				field: "methods",
				len: item.methods.len()
			}
		);
		dst.reserve(2 + item.methods.len());
		dst.put_u8(VER);
		dst.put_u8(item.methods.len() as u8);
		dst.put_slice(&item.methods);
		Ok(())
	}
}

/// Server method selection; `0xFF` when nothing on offer is acceptable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodSelect {
	pub method: u8,
}

#[derive(Debug, Clone, Copy)]
pub struct MethodSelectCodec;

impl Decoder for MethodSelectCodec {
	type Error = ProtoError;
	type Item = MethodSelect;

	fn decode(&mut self, src: &mut bytes::BytesMut) -> Result<Option<Self::Item>, Self::Error> {
		if src.len() < 2 {
			return Ok(None);
		}
		ensure!(
			src[0] == VER,
			VersionMismatchSnafu {
				expect: VER,
				current: src[0]
			}
		);
		let method = src[1];
		src.advance(2);
		Ok(Some(MethodSelect { method }))
	}

	fn decode_eof(&mut self, buf: &mut bytes::BytesMut) -> Result<Option<Self::Item>, Self::Error> {
		match self.decode(buf) {
			Ok(None) => BytesRemainingSnafu.fail(),
			v => v,
		}
	}
}

impl Encoder<MethodSelect> for MethodSelectCodec {
	type Error = ProtoError;

	fn encode(&mut self, item: MethodSelect, dst: &mut bytes::BytesMut) -> Result<(), Self::Error> {
		dst.reserve(2);
		dst.put_u8(VER);
		dst.put_u8(item.method);
		Ok(())
	}
}

//-----------------------------------------------------------------------------
// Username/password sub-negotiation (RFC 1929)
//-----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserPassRequest {
	pub username: String,
	pub password: String,
}

#[derive(Debug, Clone, Copy)]
pub struct UserPassRequestCodec;

impl Decoder for UserPassRequestCodec {
	type Error = ProtoError;
	type Item = UserPassRequest;

	fn decode(&mut self, src: &mut bytes::BytesMut) -> Result<Option<Self::Item>, Self::Error> {
		if src.len() < 2 {
			return Ok(None);
		}
		ensure!(
			src[0] == SUB_VER,
			VersionMismatchSnafu {
				expect: SUB_VER,
				current: src[0]
			}
		);
		let ulen = src[1] as usize;
		let Some(&plen) = src.get(2 + ulen) else {
			return Ok(None);
		};
		let plen = plen as usize;
		if src.len() < 2 + ulen + 1 + plen {
			return Ok(None);
		}
		src.advance(2);
		let username =
			String::from_utf8(src.split_to(ulen).to_vec()).context(CredentialNotUtf8Snafu)?;
		src.advance(1);
		let password =
			String::from_utf8(src.split_to(plen).to_vec()).context(CredentialNotUtf8Snafu)?;
		Ok(Some(UserPassRequest { username, password }))
	}

	fn decode_eof(&mut self, buf: &mut bytes::BytesMut) -> Result<Option<Self::Item>, Self::Error> {
		match self.decode(buf) {
			Ok(None) => BytesRemainingSnafu.fail(),
			v => v,
		}
	}
}

impl Encoder<UserPassRequest> for UserPassRequestCodec {
	type Error = ProtoError;

	fn encode(&mut self, item: UserPassRequest, dst: &mut bytes::BytesMut) -> Result<(), Self::Error> {
		ensure!(
			item.username.len() <= u8::MAX as usize,
			FieldTooLongSnafu {
				field: "username",
				len: item.username.len()
			}
		);
		ensure!(
			item.password.len() <= u8::MAX as usize,
			FieldTooLongSnafu {
				field: "password",
				len: item.password.len()
			}
		);
		dst.reserve(3 + item.username.len() + item.password.len());
		dst.put_u8(SUB_VER);
		dst.put_u8(item.username.len() as u8);
		dst.put_slice(item.username.as_bytes());
		dst.put_u8(item.password.len() as u8);
		dst.put_slice(item.password.as_bytes());
		Ok(())
	}
}

pub const USER_PASS_SUCCESS: u8 = 0x00;
pub const USER_PASS_FAILURE: u8 = 0x01;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserPassReply {
	pub status: u8,
}

impl UserPassReply {
	pub fn succeeded(&self) -> bool {
		self.status == USER_PASS_SUCCESS
	}
}

#[derive(Debug, Clone, Copy)]
pub struct UserPassReplyCodec;

impl Decoder for UserPassReplyCodec {
	type Error = ProtoError;
	type Item = UserPassReply;

	fn decode(&mut self, src: &mut bytes::BytesMut) -> Result<Option<Self::Item>, Self::Error> {
		if src.len() < 2 {
			return Ok(None);
		}
		ensure!(
			src[0] == SUB_VER,
			VersionMismatchSnafu {
				expect: SUB_VER,
				current: src[0]
			}
		);
		let status = src[1];
		src.advance(2);
		Ok(Some(UserPassReply { status }))
	}

	fn decode_eof(&mut self, buf: &mut bytes::BytesMut) -> Result<Option<Self::Item>, Self::Error> {
		match self.decode(buf) {
			Ok(None) => BytesRemainingSnafu.fail(),
			v => v,
		}
	}
}

impl Encoder<UserPassReply> for UserPassReplyCodec {
	type Error = ProtoError;

	fn encode(&mut self, item: UserPassReply, dst: &mut bytes::BytesMut) -> Result<(), Self::Error> {
		dst.reserve(2);
		dst.put_u8(SUB_VER);
		dst.put_u8(item.status);
		Ok(())
	}
}

//-----------------------------------------------------------------------------
// Tests
//-----------------------------------------------------------------------------

#[cfg(test)]
mod test {
	use futures_util::SinkExt as _;
	use tokio_stream::StreamExt as _;
	use tokio_util::codec::{FramedRead, FramedWrite};

	use super::*;

	#[test_log::test(tokio::test)]
	async fn greeting_roundtrip() -> eyre::Result<()> {
		let greeting = MethodRequest {
			methods: vec![0x00, 0x02],
		};
		let mut writer = FramedWrite::new(Vec::new(), MethodRequestCodec);
		writer.send(greeting.clone()).await?;
		assert_eq!(writer.get_ref(), &[0x05, 0x02, 0x00, 0x02]);

		let buffer = writer.into_inner();
		let mut reader = FramedRead::new(buffer.as_slice(), MethodRequestCodec);
		assert_eq!(reader.next().await.unwrap()?, greeting);
		Ok(())
	}

	#[test_log::test(tokio::test)]
	async fn greeting_rejects_socks4() {
		let bytes = [0x04u8, 0x01, 0x00];
		let mut reader = FramedRead::new(&bytes[..], MethodRequestCodec);
		assert!(matches!(
			reader.next().await.unwrap().unwrap_err(),
			ProtoError::VersionMismatch {
				expect: 5,
				current: 4,
				..
			}
		));
	}

	#[test_log::test(tokio::test)]
	async fn userpass_roundtrip() -> eyre::Result<()> {
		let request = UserPassRequest {
			username: "foo".into(),
			password: "bar".into(),
		};
		let mut writer = FramedWrite::new(Vec::new(), UserPassRequestCodec);
		writer.send(request.clone()).await?;
		assert_eq!(
			writer.get_ref(),
			&[0x01, 3, b'f', b'o', b'o', 3, b'b', b'a', b'r']
		);

		let buffer = writer.into_inner();
		let mut reader = FramedRead::new(buffer.as_slice(), UserPassRequestCodec);
		assert_eq!(reader.next().await.unwrap()?, request);
		Ok(())
	}

	/// Data not fully arrived must yield at every split point
	#[test_log::test(tokio::test)]
	async fn userpass_partial_data() -> eyre::Result<()> {
		let request = UserPassRequest {
			username: "username".into(),
			password: "password".into(),
		};
		let mut writer = FramedWrite::new(Vec::new(), UserPassRequestCodec);
		writer.send(request.clone()).await?;
		let buffer = writer.into_inner();

		for cut in 1..buffer.len() {
			let mut reader = FramedRead::new(&buffer[..cut], UserPassRequestCodec);
			assert!(matches!(
				reader.next().await.unwrap().unwrap_err(),
				ProtoError::BytesRemaining
			));
		}
		let mut reader = FramedRead::new(buffer.as_slice(), UserPassRequestCodec);
		assert_eq!(reader.next().await.unwrap()?, request);
		Ok(())
	}

	#[test_log::test(tokio::test)]
	async fn userpass_reply_wire() -> eyre::Result<()> {
		let mut writer = FramedWrite::new(Vec::new(), UserPassReplyCodec);
		writer
			.send(UserPassReply {
				status: USER_PASS_FAILURE,
			})
			.await?;
		assert_eq!(writer.get_ref(), &[0x01, 0x01]);

		let buffer = writer.into_inner();
		let mut reader = FramedRead::new(buffer.as_slice(), UserPassReplyCodec);
		assert!(!reader.next().await.unwrap()?.succeeded());
		Ok(())
	}
}
