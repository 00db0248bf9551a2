use std::{net::SocketAddr, sync::Arc};

use squall_socks::{
	Authenticator, NoAuth, SocksInbound, SocksInboundOpt, StaticCredentials, StaticRewriter,
	UserPassAuthenticator,
};

use super::persistent::{AuthModeConfig, PersistentConfig};

pub struct Config {
	pub listen_addr: SocketAddr,
	pub opt: SocksInboundOpt,
	pub authenticators: Vec<Arc<dyn Authenticator>>,
	pub rewriter: Option<Arc<StaticRewriter>>,
}

impl Config {
	pub fn from_persist(config: PersistentConfig) -> Self {
		let socks = config.socks_opt;

		let authenticators: Vec<Arc<dyn Authenticator>> = match socks.auth {
			AuthModeConfig::NoAuth => vec![Arc::new(NoAuth)],
			AuthModeConfig::Password { username, password } => {
				let store: Arc<StaticCredentials> =
					Arc::new([(username, password)].into_iter().collect());
				vec![Arc::new(UserPassAuthenticator::new(store))]
			}
		};

		let rewriter = (!socks.rewrites.is_empty())
			.then(|| Arc::new(StaticRewriter::new(socks.rewrites)));

		Self {
			listen_addr: socks.listen_addr,
			opt: SocksInboundOpt {
				public_addr: socks.public_addr,
				bind_ip: socks.bind_ip,
				request_timeout: socks.request_timeout,
				udp_buffer: socks.udp_buffer,
				allow_udp: socks.allow_udp,
			},
			authenticators,
			rewriter,
		}
	}

	pub fn build_server(self) -> (SocketAddr, SocksInbound) {
		let mut server =
			SocksInbound::new(self.opt).with_authenticators(self.authenticators);
		if let Some(rewriter) = self.rewriter {
			server = server.with_rewriter(rewriter);
		}
		(self.listen_addr, server)
	}
}
