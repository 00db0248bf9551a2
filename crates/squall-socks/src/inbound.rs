use std::{net::SocketAddr, sync::Arc, time::Duration};

use snafu::{IntoError as _, ResultExt as _};
use squall_core::{
	AbstractDialer, AbstractResolver, AbstractTcpStream, DirectDialer, SystemResolver, debug, info,
	warn,
};
use tokio::net::TcpListener;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::{
	Authenticator, BindSocketSnafu, Error, IoSnafu, NoAuth, PermitAll, Rewriter, RuleSet,
	ShutdownSnafu,
	session::{Session, SessionCtx},
};

pub use crate::session::SocksInboundOpt;

/// SOCKS5 inbound server: accept loop plus per-connection session tasks.
///
/// Construct with [`SocksInbound::new`], plug capabilities in with the
/// `with_*` builder methods, then either hand it a listener via
/// [`SocksInbound::serve`] or an already-accepted stream via
/// [`SocksInbound::handle_stream`].
pub struct SocksInbound {
	opt: SocksInboundOpt,
	authenticators: Vec<Arc<dyn Authenticator>>,
	resolver: Arc<dyn AbstractResolver>,
	rules: Arc<dyn RuleSet>,
	rewriter: Option<Arc<dyn Rewriter>>,
	dialer: Arc<dyn AbstractDialer>,
	cancel: CancellationToken,
	kill: CancellationToken,
	tasks: TaskTracker,
}

impl SocksInbound {
	pub fn new(opt: SocksInboundOpt) -> Self {
		let dialer = DirectDialer::new(opt.bind_ip);
		Self {
			opt,
			authenticators: Vec::new(),
			resolver: Arc::new(SystemResolver),
			rules: Arc::new(PermitAll),
			rewriter: None,
			dialer: Arc::new(dialer),
			cancel: CancellationToken::new(),
			kill: CancellationToken::new(),
			tasks: TaskTracker::new(),
		}
	}

	/// Replace the ordered authenticator set; the first method the client
	/// offers that appears here wins.
	pub fn with_authenticators(mut self, authenticators: Vec<Arc<dyn Authenticator>>) -> Self {
		self.authenticators = authenticators;
		self
	}

	/// Append one authenticator (e.g. a GSSAPI implementation) to the set.
	pub fn with_authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
		self.authenticators.push(authenticator);
		self
	}

	pub fn with_resolver(mut self, resolver: Arc<dyn AbstractResolver>) -> Self {
		self.resolver = resolver;
		self
	}

	pub fn with_rules(mut self, rules: Arc<dyn RuleSet>) -> Self {
		self.rules = rules;
		self
	}

	pub fn with_rewriter(mut self, rewriter: Arc<dyn Rewriter>) -> Self {
		self.rewriter = Some(rewriter);
		self
	}

	pub fn with_dialer(mut self, dialer: Arc<dyn AbstractDialer>) -> Self {
		self.dialer = dialer;
		self
	}

	fn session_ctx(&self) -> Arc<SessionCtx> {
		// An unconfigured server still talks to stock clients.
		let authenticators = if self.authenticators.is_empty() {
			vec![Arc::new(NoAuth) as Arc<dyn Authenticator>]
		} else {
			self.authenticators.clone()
		};
		Arc::new(SessionCtx {
			opt: self.opt.clone(),
			authenticators,
			resolver: self.resolver.clone(),
			rules: self.rules.clone(),
			rewriter: self.rewriter.clone(),
			dialer: self.dialer.clone(),
		})
	}

	/// Bind and serve in one step.
	pub async fn listen_and_serve(&self, addr: SocketAddr) -> Result<(), Error> {
		let listener = TcpListener::bind(addr)
			.await
			.map_err(|err| BindSocketSnafu { socket_addr: addr }.into_error(err))?;
		self.serve(listener).await
	}

	/// Accept loop. Runs until [`SocksInbound::shutdown`], then returns
	/// `Error::Shutdown` while in-flight sessions drain.
	pub async fn serve(&self, listener: TcpListener) -> Result<(), Error> {
		let ctx = self.session_ctx();
		let local = listener.local_addr().context(IoSnafu)?;
		info!(target: "[SOCKS]", "listening on {local}");

		loop {
			tokio::select! {
				_ = self.cancel.cancelled() => break,
				accepted = listener.accept() => {
					let (stream, client_addr) = match accepted {
						Ok(pair) => pair,
						Err(err) => {
							warn!(target: "[SOCKS]", "accept failed: {err}");
							continue;
						}
					};
					let local_addr = match stream.local_addr() {
						Ok(addr) => addr,
						Err(err) => {
							warn!(target: "[SOCKS]", "no local addr for accepted socket: {err}");
							continue;
						}
					};
					let ctx = ctx.clone();
					let kill = self.kill.clone();
					self.tasks.spawn(async move {
						let session = Session::new(ctx, client_addr, local_addr);
						tokio::select! {
							res = session.run(Box::new(stream)) => if let Err(err) = res {
								info!(target: "[SOCKS]", client = %client_addr, "session ended: {err}");
							},
							_ = kill.cancelled() => {
								debug!(client = %client_addr, "session aborted at shutdown deadline");
							}
						}
					});
				}
			}
		}

		info!(target: "[SOCKS]", "accept loop on {local} stopped");
		ShutdownSnafu.fail()
	}

	/// Drive one already-established client stream; the embedding entry
	/// point. The caller supplies the addresses the stream came with.
	pub async fn handle_stream(
		&self,
		stream: impl AbstractTcpStream + 'static,
		client_addr: SocketAddr,
		local_addr: SocketAddr,
	) -> Result<(), Error> {
		Session::new(self.session_ctx(), client_addr, local_addr)
			.run(Box::new(stream))
			.await
	}

	/// Stop accepting and wait for every running session to finish.
	pub async fn shutdown(&self) {
		self.cancel.cancel();
		self.tasks.close();
		self.tasks.wait().await;
	}

	/// Like [`SocksInbound::shutdown`], but sessions still running at the
	/// deadline are aborted.
	pub async fn shutdown_with_deadline(&self, deadline: Duration) {
		self.cancel.cancel();
		self.tasks.close();
		if tokio::time::timeout(deadline, self.tasks.wait()).await.is_err() {
			self.kill.cancel();
			self.tasks.wait().await;
		}
	}
}
