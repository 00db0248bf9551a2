use std::{
	collections::HashSet,
	net::{IpAddr, SocketAddr},
};

use bytes::{Bytes, BytesMut};
use snafu::{IntoError as _, ResultExt as _};
use squall_core::{debug, info, types::TargetAddr};
use tokio::net::UdpSocket;
use tokio_util::codec::{Decoder as _, Encoder as _};

use crate::{
	AuthContext, BindSocketSnafu, Error, IoSnafu, ProtoSnafu, SocksConn,
	proto::{ReplyCode, UdpFrame, UdpFrameCodec},
	session::{Session, SessionCtx},
};

/// Who counts as "the client" on the relay socket.
///
/// The address the client declared in its request is authoritative when
/// complete; a wildcard declaration means the relay locks onto the first
/// source whose IP matches the control connection's client IP.
enum ClientSide {
	Exact(SocketAddr),
	LearnFrom(IpAddr),
}

/// UDP ASSOCIATE: bind an ephemeral relay socket, advertise it on the
/// control stream, then shuttle encapsulated datagrams until the control
/// connection dies. Dropping the socket on return is what enforces the
/// relay's sub-lifetime.
pub(crate) async fn run_associate(
	session: &Session,
	mut conn: SocksConn,
	declared: SocketAddr,
	auth: &AuthContext,
) -> Result<(), Error> {
	let ctx = session.ctx();
	let bind_at = SocketAddr::new(session.ephemeral_ip(), 0);
	let socket = match ctx.dialer.bind_udp(bind_at).await {
		Ok(socket) => socket,
		Err(err) => {
			session.reply(&mut conn, ReplyCode::GeneralFailure).await.ok();
			return Err(BindSocketSnafu { socket_addr: bind_at }.into_error(err));
		}
	};
	let port = socket.local_addr().context(IoSnafu)?.port();
	let bnd = SocketAddr::new(session.external_ip(), port);

	let client_side = if declared.ip().is_unspecified() || declared.port() == 0 {
		ClientSide::LearnFrom(session.client_addr().ip())
	} else {
		ClientSide::Exact(declared)
	};

	info!(target: "[UDP-IN]", client = %session.client_addr(), user = auth.username().unwrap_or("-"), "udp associate relaying at {bnd}");
	session.reply_bnd(&mut conn, bnd).await?;

	// The control connection is the keep-alive: its EOF (or any error)
	// wins the select and tears the relay down with bounded delay.
	tokio::select! {
		res = relay_loop(ctx, &socket, client_side) => res,
		res = conn.wait_closed() => {
			debug!(client = %session.client_addr(), "control stream closed, releasing udp relay");
			res.context(IoSnafu)
		}
	}
}

/// The relay proper: one socket carries both legs, demultiplexed by source
/// address. Datagrams from anything that is neither the client nor a peer
/// we have sent to are dropped without comment on the wire.
async fn relay_loop(
	ctx: &SessionCtx,
	socket: &UdpSocket,
	client_side: ClientSide,
) -> Result<(), Error> {
	let mut buf = vec![0u8; ctx.opt.udp_buffer];
	let mut client: Option<SocketAddr> = match client_side {
		ClientSide::Exact(addr) => Some(addr),
		ClientSide::LearnFrom(_) => None,
	};
	let mut peers: HashSet<SocketAddr> = HashSet::new();

	loop {
		let (len, src) = socket.recv_from(&mut buf).await.context(IoSnafu)?;
		// A datagram that fills the buffer may have been truncated by the
		// kernel; it cannot be forwarded faithfully.
		if len == buf.len() {
			debug!(%src, len, "datagram at buffer limit dropped");
			continue;
		}

		let from_client = match (client, &client_side) {
			(Some(addr), _) => src == addr,
			(None, ClientSide::LearnFrom(ip)) => src.ip() == *ip,
			(None, ClientSide::Exact(_)) => false,
		};

		if from_client {
			if client.is_none() {
				info!(target: "[UDP-IN]", "relay locked to client source {src}");
				client = Some(src);
			}
			forward_to_remote(ctx, socket, src, &buf[..len], &mut peers).await;
		} else if peers.contains(&src) {
			let Some(client) = client else { continue };
			let mut out = BytesMut::with_capacity(len + 22);
			UdpFrameCodec
				.encode(
					UdpFrame {
						frag: 0,
						dst: src.into(),
						payload: Bytes::copy_from_slice(&buf[..len]),
					},
					&mut out,
				)
				.context(ProtoSnafu)?;
			if let Err(err) = socket.send_to(&out, client).await {
				debug!(%client, %err, "reply datagram not deliverable");
			}
		} else {
			debug!(%src, "datagram from unknown source dropped");
		}
	}
}

/// Decapsulate one client datagram and pass its payload on.
async fn forward_to_remote(
	ctx: &SessionCtx,
	socket: &UdpSocket,
	client: SocketAddr,
	datagram: &[u8],
	peers: &mut HashSet<SocketAddr>,
) {
	let mut frame_buf = BytesMut::from(datagram);
	let frame = match UdpFrameCodec.decode(&mut frame_buf) {
		Ok(Some(frame)) => frame,
		Ok(None) | Err(_) => {
			debug!(%client, "malformed client datagram dropped");
			return;
		}
	};
	// no reassembly
	if frame.frag != 0 {
		debug!(%client, frag = frame.frag, "fragmented datagram dropped");
		return;
	}

	let dst = match TargetAddr::from(frame.dst) {
		TargetAddr::IPv4(ip, port) => SocketAddr::from((ip, port)),
		TargetAddr::IPv6(ip, port) => SocketAddr::from((ip, port)),
		TargetAddr::Domain(host, port) => match ctx.resolver.resolve(&host, client).await {
			Ok(ip) => SocketAddr::new(ip, port),
			Err(err) => {
				debug!(%client, host, %err, "datagram destination did not resolve");
				return;
			}
		},
	};

	peers.insert(dst);
	if let Err(err) = socket.send_to(&frame.payload, dst).await {
		debug!(%dst, %err, "datagram not deliverable");
	}
}
