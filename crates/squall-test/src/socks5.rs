//! Minimal hand-rolled SOCKS5 client moves, byte-for-byte, so the tests
//! pin the wire format rather than trusting any client library. The one
//! exception is the stock-client scenario, which goes through
//! `fast-socks5` on purpose.

use std::net::SocketAddr;

use tokio::{
	io::{AsyncReadExt as _, AsyncWriteExt as _},
	net::TcpStream,
};

/// Send a greeting offering `methods` and return the server's selection.
pub async fn negotiate(stream: &mut TcpStream, methods: &[u8]) -> eyre::Result<u8> {
	let mut greeting = vec![0x05, methods.len() as u8];
	greeting.extend_from_slice(methods);
	stream.write_all(&greeting).await?;

	let mut select = [0u8; 2];
	stream.read_exact(&mut select).await?;
	eyre::ensure!(select[0] == 0x05, "method selection version {:#04x}", select[0]);
	Ok(select[1])
}

/// RFC 1929 sub-negotiation; returns the status byte.
pub async fn authenticate(
	stream: &mut TcpStream,
	username: &str,
	password: &str,
) -> eyre::Result<u8> {
	let mut frame = vec![0x01, username.len() as u8];
	frame.extend_from_slice(username.as_bytes());
	frame.push(password.len() as u8);
	frame.extend_from_slice(password.as_bytes());
	stream.write_all(&frame).await?;

	let mut reply = [0u8; 2];
	stream.read_exact(&mut reply).await?;
	eyre::ensure!(reply[0] == 0x01, "sub-negotiation version {:#04x}", reply[0]);
	Ok(reply[1])
}

/// Send a request for `command` against an IP target and read the reply.
pub async fn request(
	stream: &mut TcpStream,
	command: u8,
	target: SocketAddr,
) -> eyre::Result<(u8, SocketAddr)> {
	let mut frame = vec![0x05, command, 0x00];
	put_addr(&mut frame, target);
	stream.write_all(&frame).await?;
	read_reply(stream).await
}

/// Read one reply frame; the bound address must be an IP literal.
pub async fn read_reply(stream: &mut TcpStream) -> eyre::Result<(u8, SocketAddr)> {
	let mut head = [0u8; 4];
	stream.read_exact(&mut head).await?;
	eyre::ensure!(head[0] == 0x05, "reply version {:#04x}", head[0]);
	eyre::ensure!(head[2] == 0x00, "reply reserved byte {:#04x}", head[2]);

	let bnd = match head[3] {
		0x01 => {
			let mut rest = [0u8; 6];
			stream.read_exact(&mut rest).await?;
			let ip: [u8; 4] = rest[..4].try_into()?;
			let port = u16::from_be_bytes([rest[4], rest[5]]);
			SocketAddr::from((ip, port))
		}
		0x04 => {
			let mut rest = [0u8; 18];
			stream.read_exact(&mut rest).await?;
			let ip: [u8; 16] = rest[..16].try_into()?;
			let port = u16::from_be_bytes([rest[16], rest[17]]);
			SocketAddr::from((ip, port))
		}
		other => eyre::bail!("unexpected reply ATYP {other:#04x}"),
	};
	Ok((head[1], bnd))
}

/// Encapsulate `payload` for the client->relay leg.
pub fn encode_udp_datagram(dst: SocketAddr, payload: &[u8]) -> Vec<u8> {
	let mut frame = vec![0x00, 0x00, 0x00];
	put_addr(&mut frame, dst);
	frame.extend_from_slice(payload);
	frame
}

/// Split a relay->client datagram into source address and payload.
pub fn decode_udp_datagram(buf: &[u8]) -> eyre::Result<(SocketAddr, Vec<u8>)> {
	eyre::ensure!(buf.len() >= 4, "datagram too short");
	eyre::ensure!(buf[0] == 0 && buf[1] == 0, "non-zero reserved bytes");
	eyre::ensure!(buf[2] == 0, "unexpected fragment {}", buf[2]);
	match buf[3] {
		0x01 => {
			eyre::ensure!(buf.len() >= 10, "short IPv4 datagram header");
			let ip: [u8; 4] = buf[4..8].try_into()?;
			let port = u16::from_be_bytes([buf[8], buf[9]]);
			Ok((SocketAddr::from((ip, port)), buf[10..].to_vec()))
		}
		0x04 => {
			eyre::ensure!(buf.len() >= 22, "short IPv6 datagram header");
			let ip: [u8; 16] = buf[4..20].try_into()?;
			let port = u16::from_be_bytes([buf[20], buf[21]]);
			Ok((SocketAddr::from((ip, port)), buf[22..].to_vec()))
		}
		other => eyre::bail!("unexpected datagram ATYP {other:#04x}"),
	}
}

fn put_addr(frame: &mut Vec<u8>, addr: SocketAddr) {
	match addr {
		SocketAddr::V4(v4) => {
			frame.push(0x01);
			frame.extend_from_slice(&v4.ip().octets());
			frame.extend_from_slice(&v4.port().to_be_bytes());
		}
		SocketAddr::V6(v6) => {
			frame.push(0x04);
			frame.extend_from_slice(&v6.ip().octets());
			frame.extend_from_slice(&v6.port().to_be_bytes());
		}
	}
}
