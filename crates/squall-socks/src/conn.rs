use bytes::BytesMut;
use snafu::ResultExt as _;
use squall_core::AbstractTcpStream;
use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};
use tokio_util::codec::{Decoder, Encoder};

use crate::proto::{BytesRemainingSnafu, IoSnafu, ProtoError};

/// A client control connection with its read buffer.
///
/// All handshake stages read through the one buffer, so bytes a client
/// pipelines ahead of the current stage are kept for the next one, and
/// whatever is left when the handshake completes can be forwarded to the
/// data plane via [`SocksConn::into_parts`].
pub struct SocksConn {
	io: Box<dyn AbstractTcpStream>,
	buf: BytesMut,
}

impl SocksConn {
	pub fn new(io: impl AbstractTcpStream + 'static) -> Self {
		Self::from_boxed(Box::new(io))
	}

	pub fn from_boxed(io: Box<dyn AbstractTcpStream>) -> Self {
		Self {
			io,
			buf: BytesMut::with_capacity(512),
		}
	}

	/// Read exactly one frame, suspending until enough bytes arrived.
	/// EOF inside a frame surfaces as [`ProtoError::BytesRemaining`].
	pub async fn read_frame<C>(&mut self, mut codec: C) -> Result<C::Item, ProtoError>
	where
		C: Decoder<Error = ProtoError>,
	{
		loop {
			if let Some(frame) = codec.decode(&mut self.buf)? {
				return Ok(frame);
			}
			let num = self.io.read_buf(&mut self.buf).await.context(IoSnafu)?;
			if num == 0 {
				return match codec.decode_eof(&mut self.buf)? {
					Some(frame) => Ok(frame),
					None => BytesRemainingSnafu.fail(),
				};
			}
		}
	}

	pub async fn write_frame<C, I>(&mut self, mut codec: C, item: I) -> Result<(), ProtoError>
	where
		C: Encoder<I, Error = ProtoError>,
	{
		let mut out = BytesMut::with_capacity(64);
		codec.encode(item, &mut out)?;
		self.io.write_all(&out).await.context(IoSnafu)?;
		self.io.flush().await.context(IoSnafu)?;
		Ok(())
	}

	/// Resolves when the client closes the connection. Bytes arriving in
	/// the meantime are discarded; past the handshake the control stream
	/// only matters as a liveness signal.
	pub async fn wait_closed(&mut self) -> std::io::Result<()> {
		let mut sink = [0u8; 256];
		loop {
			if self.io.read(&mut sink).await? == 0 {
				return Ok(());
			}
		}
	}

	/// The raw stream plus any bytes read past the last frame.
	pub fn into_parts(self) -> (Box<dyn AbstractTcpStream>, BytesMut) {
		(self.io, self.buf)
	}
}

#[cfg(test)]
mod test {
	use tokio::io::AsyncWriteExt as _;

	use super::SocksConn;
	use crate::proto::{MethodRequestCodec, RequestCodec};

	/// Frames arriving byte-by-byte and frames pipelined in one write both
	/// come out whole.
	#[tokio::test]
	async fn reads_across_arbitrary_chunks() -> eyre::Result<()> {
		let (mut client, server) = tokio::io::duplex(64);
		let mut conn = SocksConn::new(server);

		let writer = tokio::spawn(async move {
			// greeting, dribbled out
			for byte in [0x05u8, 0x01, 0x00] {
				client.write_all(&[byte]).await?;
				client.flush().await?;
			}
			// request pipelined right behind, in one burst
			client
				.write_all(&[0x05, 0x01, 0x00, 0x01, 127, 0, 0, 1, 0x1F, 0x90])
				.await?;
			std::io::Result::Ok(client)
		});

		let greeting = conn.read_frame(MethodRequestCodec).await?;
		assert_eq!(greeting.methods, vec![0x00]);

		let request = conn.read_frame(RequestCodec).await?;
		assert_eq!(u8::from(request.command), 0x01);

		let (_, residual) = conn.into_parts();
		assert!(residual.is_empty());
		drop(writer.await??);
		Ok(())
	}

	#[tokio::test]
	async fn leftover_bytes_survive() -> eyre::Result<()> {
		let (mut client, server) = tokio::io::duplex(64);
		let mut conn = SocksConn::new(server);

		client.write_all(&[0x05, 0x01, 0x00]).await?;
		client.write_all(b"early data").await?;
		client.flush().await?;

		let _greeting = conn.read_frame(MethodRequestCodec).await?;
		// The early bytes may or may not have been swept into the buffer
		// yet; whatever is there must be the prefix of "early data".
		let (_, residual) = conn.into_parts();
		assert!(b"early data".starts_with(&residual[..]));
		Ok(())
	}
}
