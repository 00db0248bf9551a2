use std::net::{IpAddr, SocketAddr};

use async_trait::async_trait;
use socket2::{Domain, Socket, Type};
use tokio::net::{TcpListener, TcpSocket, TcpStream, UdpSocket};

/// Factory for the sockets a proxy session opens on behalf of a client:
/// outbound TCP, an ephemeral inbound listener, and relay UDP sockets.
/// Injectable so tests can point every session at loopback stand-ins.
#[async_trait]
pub trait AbstractDialer: Send + Sync {
	async fn connect_tcp(&self, target: SocketAddr) -> std::io::Result<TcpStream>;
	async fn bind_tcp(&self, local: SocketAddr) -> std::io::Result<TcpListener>;
	async fn bind_udp(&self, local: SocketAddr) -> std::io::Result<UdpSocket>;
}

/// Plain kernel-routed dialer. `bind_ip` pins the source address of
/// outbound connections when set.
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectDialer {
	pub bind_ip: Option<IpAddr>,
}

impl DirectDialer {
	pub fn new(bind_ip: Option<IpAddr>) -> Self {
		Self { bind_ip }
	}
}

#[async_trait]
impl AbstractDialer for DirectDialer {
	async fn connect_tcp(&self, target: SocketAddr) -> std::io::Result<TcpStream> {
		match self.bind_ip {
			Some(ip) => {
				let socket = match target {
					SocketAddr::V4(_) => TcpSocket::new_v4()?,
					SocketAddr::V6(_) => TcpSocket::new_v6()?,
				};
				socket.bind(SocketAddr::new(ip, 0))?;
				socket.connect(target).await
			}
			None => TcpStream::connect(target).await,
		}
	}

	async fn bind_tcp(&self, local: SocketAddr) -> std::io::Result<TcpListener> {
		TcpListener::bind(local).await
	}

	async fn bind_udp(&self, local: SocketAddr) -> std::io::Result<UdpSocket> {
		let socket = Socket::new(Domain::for_address(local), Type::DGRAM, None)?;
		socket.bind(&local.into())?;
		socket.set_nonblocking(true)?;
		UdpSocket::from_std(socket.into())
	}
}
