use std::{
	net::{IpAddr, SocketAddr},
	sync::Arc,
	time::Duration,
};

use snafu::{IntoError as _, ResultExt as _};
use squall_core::{
	AbstractDialer, AbstractResolver, AbstractTcpStream, debug, info, io::copy_io, types::TargetAddr,
};
use tokio::io::AsyncWriteExt as _;
use tokio::net::TcpStream;

use crate::{
	AddrTypeNotSupportedSnafu, AuthContext, Authenticator, BindSocketSnafu, CommandNotSupportedSnafu,
	DialSnafu, Error, IoSnafu, NoSupportedAuthSnafu, RequestTimeoutSnafu, ResolveSnafu,
	Rewriter, RuleDeniedSnafu, RuleSet, SocksConn, UnsupportedVersionSnafu, udp,
	proto::{
		Address, Command, MethodRequestCodec, MethodSelect, MethodSelectCodec, ProtoError, Reply,
		ReplyCode, ReplyCodec, Request, RequestCodec, method,
	},
};

/// Options for the SOCKS5 inbound; see the builder methods on
/// [`crate::SocksInbound`] for the pluggable parts.
#[derive(Debug, Clone)]
pub struct SocksInboundOpt {
	/// External IP to advertise in BIND and UDP ASSOCIATE replies.
	/// Defaults to the IP the client connected to.
	pub public_addr: Option<IpAddr>,

	/// Source IP for outbound dials and ephemeral binds.
	pub bind_ip: Option<IpAddr>,

	/// Deadline for the whole handshake, greeting through request.
	pub request_timeout: Duration,

	/// Relay datagram buffer; datagrams that fill it are dropped.
	pub udp_buffer: usize,

	/// Gate for the UDP ASSOCIATE command.
	pub allow_udp: bool,
}

impl Default for SocksInboundOpt {
	fn default() -> Self {
		Self {
			public_addr: None,
			bind_ip: None,
			request_timeout: Duration::from_secs(10),
			udp_buffer: 64 * 1024,
			allow_udp: true,
		}
	}
}

/// Capabilities shared read-only by every session.
pub(crate) struct SessionCtx {
	pub opt: SocksInboundOpt,
	pub authenticators: Vec<Arc<dyn Authenticator>>,
	pub resolver: Arc<dyn AbstractResolver>,
	pub rules: Arc<dyn RuleSet>,
	pub rewriter: Option<Arc<dyn Rewriter>>,
	pub dialer: Arc<dyn AbstractDialer>,
}

/// One client control connection, driven from greeting to data-plane
/// teardown. Every socket the session opens dies with it.
pub(crate) struct Session {
	ctx: Arc<SessionCtx>,
	client_addr: SocketAddr,
	local_addr: SocketAddr,
}

impl Session {
	pub fn new(ctx: Arc<SessionCtx>, client_addr: SocketAddr, local_addr: SocketAddr) -> Self {
		Self {
			ctx,
			client_addr,
			local_addr,
		}
	}

	/// IP to advertise for sockets we open on the client's behalf.
	pub fn external_ip(&self) -> IpAddr {
		self.ctx.opt.public_addr.unwrap_or(self.local_addr.ip())
	}

	/// IP to bind those sockets on.
	pub fn ephemeral_ip(&self) -> IpAddr {
		self.ctx.opt.bind_ip.unwrap_or(self.local_addr.ip())
	}

	pub async fn run(self, stream: Box<dyn AbstractTcpStream>) -> Result<(), Error> {
		let mut conn = SocksConn::from_boxed(stream);

		let handshake = tokio::time::timeout(
			self.ctx.opt.request_timeout,
			self.handshake(&mut conn),
		);
		let (auth, request) = match handshake.await {
			Ok(res) => res?,
			Err(_) => return RequestTimeoutSnafu.fail(),
		};

		let target = self.prepare_target(&mut conn, &auth, &request).await?;
		match request.command {
			Command::Connect => self.run_connect(conn, target, &auth).await,
			Command::Bind => self.run_bind(conn, target, &auth).await,
			// only UdpAssociate can reach here; handshake rejected the rest
			_ => udp::run_associate(&self, conn, target, &auth).await,
		}
	}

	/// Greeting, method selection, authentication sub-protocol, request.
	async fn handshake(&self, conn: &mut SocksConn) -> Result<(AuthContext, Request), Error> {
		// Nothing of ours is on the wire yet: protocol errors here close
		// the connection silently.
		let greeting = match conn.read_frame(MethodRequestCodec).await {
			Ok(greeting) => greeting,
			Err(ProtoError::VersionMismatch { current, .. }) => {
				return UnsupportedVersionSnafu { version: current }.fail();
			}
			Err(err) => return Err(err.into()),
		};

		// First supported method in the client's order wins.
		let selected = greeting
			.methods
			.iter()
			.find_map(|offered| {
				self.ctx
					.authenticators
					.iter()
					.find(|auth| auth.code() == *offered)
			});
		let Some(authenticator) = selected else {
			conn.write_frame(
				MethodSelectCodec,
				MethodSelect {
					method: method::NO_ACCEPTABLE,
				},
			)
			.await?;
			return NoSupportedAuthSnafu.fail();
		};

		let auth = authenticator.negotiate(conn, self.client_addr).await?;
		debug!(client = %self.client_addr, method = auth.method, user = auth.username().unwrap_or("-"), "authenticated");

		let mut request = match conn.read_frame(RequestCodec).await {
			Ok(request) => request,
			Err(err) => {
				// From here on the wire permits a reply.
				let rep = match &err {
					ProtoError::UnknownAddressType { .. } => ReplyCode::AddressTypeNotSupported,
					_ => ReplyCode::GeneralFailure,
				};
				let _ = self.reply(conn, rep).await;
				return match err {
					ProtoError::UnknownAddressType { value, .. } => {
						AddrTypeNotSupportedSnafu { atyp: value }.fail()
					}
					err => Err(err.into()),
				};
			}
		};

		if let Command::Other(command) = request.command {
			self.reply(conn, ReplyCode::CommandNotSupported).await.ok();
			return CommandNotSupportedSnafu { command }.fail();
		}
		if request.command == Command::UdpAssociate && !self.ctx.opt.allow_udp {
			self.reply(conn, ReplyCode::CommandNotSupported).await.ok();
			return CommandNotSupportedSnafu {
				command: u8::from(Command::UdpAssociate),
			}
			.fail();
		}

		if let Some(rewriter) = &self.ctx.rewriter {
			request = rewriter.rewrite(request, self.client_addr);
		}

		Ok((auth, request))
	}

	/// Authorization and resolution, shared by all three commands.
	async fn prepare_target(
		&self,
		conn: &mut SocksConn,
		auth: &AuthContext,
		request: &Request,
	) -> Result<SocketAddr, Error> {
		let target = TargetAddr::from(request.addr.clone());

		if !self
			.ctx
			.rules
			.allow(request.command, auth, self.client_addr, &target)
		{
			self.reply(conn, ReplyCode::RuleFailure).await.ok();
			return RuleDeniedSnafu.fail();
		}

		match target {
			TargetAddr::IPv4(ip, port) => Ok(SocketAddr::from((ip, port))),
			TargetAddr::IPv6(ip, port) => Ok(SocketAddr::from((ip, port))),
			TargetAddr::Domain(host, port) => {
				match self.ctx.resolver.resolve(&host, self.client_addr).await {
					Ok(ip) => Ok(SocketAddr::new(ip, port)),
					Err(err) => {
						self.reply(conn, ReplyCode::HostUnreachable).await.ok();
						Err(ResolveSnafu { host }.into_error(err))
					}
				}
			}
		}
	}

	/// CONNECT: dial out, report the outbound local address, splice.
	async fn run_connect(
		&self,
		mut conn: SocksConn,
		target: SocketAddr,
		auth: &AuthContext,
	) -> Result<(), Error> {
		let outbound = match self.ctx.dialer.connect_tcp(target).await {
			Ok(stream) => stream,
			Err(err) => {
				let rep = reply_for_io(&err);
				self.reply(&mut conn, rep).await.ok();
				return Err(DialSnafu { target, reply: rep }.into_error(err));
			}
		};
		let bnd = outbound.local_addr().context(IoSnafu)?;
		info!(target: "[TCP-IN]", client = %self.client_addr, user = auth.username().unwrap_or("-"), "connect {target} via {bnd}");
		self.reply_bnd(&mut conn, bnd).await?;

		self.splice(conn, outbound).await
	}

	/// BIND: one ephemeral listener, two replies, then splice with the
	/// single accepted peer.
	async fn run_bind(
		&self,
		mut conn: SocksConn,
		expected: SocketAddr,
		auth: &AuthContext,
	) -> Result<(), Error> {
		let bind_at = SocketAddr::new(self.ephemeral_ip(), 0);
		let listener = match self.ctx.dialer.bind_tcp(bind_at).await {
			Ok(listener) => listener,
			Err(err) => {
				self.reply(&mut conn, ReplyCode::GeneralFailure).await.ok();
				return Err(BindSocketSnafu { socket_addr: bind_at }.into_error(err));
			}
		};
		let port = listener.local_addr().context(IoSnafu)?.port();
		let bnd = SocketAddr::new(self.external_ip(), port);
		info!(target: "[TCP-IN]", client = %self.client_addr, user = auth.username().unwrap_or("-"), "bind listening on {bnd}, peer hint {expected}");
		self.reply_bnd(&mut conn, bnd).await?;

		let (peer_stream, peer_addr) = tokio::select! {
			accepted = listener.accept() => accepted.context(IoSnafu)?,
			closed = conn.wait_closed() => {
				debug!(client = %self.client_addr, "client left before bind accept");
				return closed.context(IoSnafu);
			}
		};
		// one accept only
		drop(listener);
		if peer_addr.ip() != expected.ip() {
			debug!(client = %self.client_addr, "bind peer {peer_addr} differs from hint {expected}");
		}
		self.reply_bnd(&mut conn, peer_addr).await?;

		self.splice(conn, peer_stream).await
	}

	async fn splice(&self, conn: SocksConn, mut remote: TcpStream) -> Result<(), Error> {
		let (client, residual) = conn.into_parts();
		// bytes the client pipelined behind its request
		if !residual.is_empty() {
			remote.write_all(&residual).await.context(IoSnafu)?;
		}

		let (sent, received, err) = copy_io(client, remote).await;
		debug!(client = %self.client_addr, sent, received, "splice finished");
		match err {
			Some(err) => Err(IoSnafu.into_error(err)),
			None => Ok(()),
		}
	}

	pub(crate) async fn reply(&self, conn: &mut SocksConn, rep: ReplyCode) -> Result<(), Error> {
		conn.write_frame(
			ReplyCodec,
			Reply {
				rep,
				bnd: Address::unspecified(),
			},
		)
		.await?;
		Ok(())
	}

	pub(crate) async fn reply_bnd(&self, conn: &mut SocksConn, bnd: SocketAddr) -> Result<(), Error> {
		conn.write_frame(
			ReplyCodec,
			Reply {
				rep: ReplyCode::Succeeded,
				bnd: bnd.into(),
			},
		)
		.await?;
		Ok(())
	}

	pub(crate) fn ctx(&self) -> &SessionCtx {
		&self.ctx
	}

	pub(crate) fn client_addr(&self) -> SocketAddr {
		self.client_addr
	}
}

/// Map a dial failure onto the closest RFC 1928 reply code.
pub(crate) fn reply_for_io(err: &std::io::Error) -> ReplyCode {
	use std::io::ErrorKind;
	match err.kind() {
		ErrorKind::ConnectionRefused => ReplyCode::ConnectionRefused,
		ErrorKind::NetworkUnreachable => ReplyCode::NetworkUnreachable,
		ErrorKind::HostUnreachable | ErrorKind::NotFound => ReplyCode::HostUnreachable,
		ErrorKind::TimedOut => ReplyCode::TtlExpired,
		_ => ReplyCode::GeneralFailure,
	}
}

#[cfg(test)]
mod test {
	use std::io::ErrorKind;

	use super::reply_for_io;
	use crate::proto::ReplyCode;

	#[test]
	fn io_errors_map_to_reply_codes() {
		let cases = [
			(ErrorKind::ConnectionRefused, ReplyCode::ConnectionRefused),
			(ErrorKind::NetworkUnreachable, ReplyCode::NetworkUnreachable),
			(ErrorKind::HostUnreachable, ReplyCode::HostUnreachable),
			(ErrorKind::TimedOut, ReplyCode::TtlExpired),
			(ErrorKind::PermissionDenied, ReplyCode::GeneralFailure),
		];
		for (kind, rep) in cases {
			assert_eq!(reply_for_io(&std::io::Error::from(kind)), rep);
		}
	}
}
