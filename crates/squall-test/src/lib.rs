//! In-process fixtures for exercising the SOCKS5 server end to end:
//! a proxy on an ephemeral port, a TCP responder that answers `"ping"`
//! with `"pong"`, and a UDP peer doing the same.

use std::{net::SocketAddr, sync::Arc};

use squall_socks::SocksInbound;
use tokio::{
	io::{AsyncReadExt as _, AsyncWriteExt as _},
	net::{TcpListener, UdpSocket},
};

pub mod socks5;

/// Serve `server` on an ephemeral loopback port in the background.
pub async fn start_proxy(server: SocksInbound) -> eyre::Result<(SocketAddr, Arc<SocksInbound>)> {
	let listener = TcpListener::bind("127.0.0.1:0").await?;
	let addr = listener.local_addr()?;
	let server = Arc::new(server);
	let serving = server.clone();
	tokio::spawn(async move {
		// serve returns Shutdown once the fixture is torn down
		let _ = serving.serve(listener).await;
	});
	Ok((addr, server))
}

/// TCP responder: answers each accepted connection's `"ping"` with
/// `"pong"`, then closes.
pub async fn start_pong_server() -> eyre::Result<SocketAddr> {
	let listener = TcpListener::bind("127.0.0.1:0").await?;
	let addr = listener.local_addr()?;
	tokio::spawn(async move {
		loop {
			let Ok((mut stream, _)) = listener.accept().await else {
				return;
			};
			tokio::spawn(async move {
				let mut buf = [0u8; 4];
				if stream.read_exact(&mut buf).await.is_ok() && &buf == b"ping" {
					let _ = stream.write_all(b"pong").await;
					let _ = stream.flush().await;
				}
				// linger until the peer is done reading
				let _ = stream.read(&mut buf).await;
			});
		}
	});
	Ok(addr)
}

/// UDP peer: answers every datagram with `"pong"`.
pub async fn start_udp_pong_peer() -> eyre::Result<SocketAddr> {
	let socket = UdpSocket::bind("127.0.0.1:0").await?;
	let addr = socket.local_addr()?;
	tokio::spawn(async move {
		let mut buf = [0u8; 2048];
		loop {
			let Ok((_, from)) = socket.recv_from(&mut buf).await else {
				return;
			};
			let _ = socket.send_to(b"pong", from).await;
		}
	});
	Ok(addr)
}
