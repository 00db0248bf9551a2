use std::{collections::HashMap, net::SocketAddr, sync::Arc};

use async_trait::async_trait;
use squall_core::debug;

use crate::{
	Error, SocksConn, UserAuthFailedSnafu,
	proto::{
		MethodSelect, MethodSelectCodec, USER_PASS_FAILURE, USER_PASS_SUCCESS, UserPassReply,
		UserPassReplyCodec, UserPassRequestCodec, method,
	},
};

/// What a session knows about its client after authentication: the METHOD
/// that ran and whatever attributes its sub-protocol collected.
#[derive(Debug, Clone, Default)]
pub struct AuthContext {
	pub method: u8,
	pub payload: HashMap<String, String>,
}

impl AuthContext {
	pub fn new(method: u8) -> Self {
		Self {
			method,
			payload: HashMap::new(),
		}
	}

	pub fn username(&self) -> Option<&str> {
		self.payload.get("username").map(String::as_str)
	}
}

/// One authentication METHOD: its wire code plus the sub-protocol that runs
/// once the server has selected it. `negotiate` writes the method-selection
/// bytes itself, so it owns the wire from the greeting reply onwards.
///
/// GSSAPI or any other scheme plugs in as another implementation of this
/// trait; nothing else in the server knows method specifics.
#[async_trait]
pub trait Authenticator: Send + Sync {
	fn code(&self) -> u8;

	async fn negotiate(
		&self,
		conn: &mut SocksConn,
		client_addr: SocketAddr,
	) -> Result<AuthContext, Error>;
}

/// METHOD `0x00`: anyone may proceed.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAuth;

#[async_trait]
impl Authenticator for NoAuth {
	fn code(&self) -> u8 {
		method::NO_AUTH
	}

	async fn negotiate(
		&self,
		conn: &mut SocksConn,
		_client_addr: SocketAddr,
	) -> Result<AuthContext, Error> {
		conn.write_frame(
			MethodSelectCodec,
			MethodSelect {
				method: method::NO_AUTH,
			},
		)
		.await?;
		Ok(AuthContext::new(method::NO_AUTH))
	}
}

/// Decides whether a username/password pair is acceptable. Stores with
/// interior mutability must synchronize themselves; one instance is shared
/// by every session.
#[async_trait]
pub trait CredentialStore: Send + Sync {
	async fn verify(&self, username: &str, password: &str) -> bool;
}

/// In-memory credential map.
#[derive(Debug, Default, Clone)]
pub struct StaticCredentials {
	users: HashMap<String, String>,
}

impl StaticCredentials {
	pub fn new(users: HashMap<String, String>) -> Self {
		Self { users }
	}
}

impl FromIterator<(String, String)> for StaticCredentials {
	fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
		Self {
			users: iter.into_iter().collect(),
		}
	}
}

#[async_trait]
impl CredentialStore for StaticCredentials {
	async fn verify(&self, username: &str, password: &str) -> bool {
		self.users.get(username).map(String::as_str) == Some(password)
	}
}

/// METHOD `0x02`: RFC 1929 username/password sub-negotiation against a
/// pluggable credential store.
pub struct UserPassAuthenticator {
	store: Arc<dyn CredentialStore>,
}

impl UserPassAuthenticator {
	pub fn new(store: Arc<dyn CredentialStore>) -> Self {
		Self { store }
	}
}

#[async_trait]
impl Authenticator for UserPassAuthenticator {
	fn code(&self) -> u8 {
		method::USER_PASS
	}

	async fn negotiate(
		&self,
		conn: &mut SocksConn,
		client_addr: SocketAddr,
	) -> Result<AuthContext, Error> {
		conn.write_frame(
			MethodSelectCodec,
			MethodSelect {
				method: method::USER_PASS,
			},
		)
		.await?;

		// Any read failure here is fatal; there is no in-band way to
		// renegotiate a broken sub-negotiation.
		let request = conn.read_frame(UserPassRequestCodec).await?;

		if self.store.verify(&request.username, &request.password).await {
			conn.write_frame(
				UserPassReplyCodec,
				UserPassReply {
					status: USER_PASS_SUCCESS,
				},
			)
			.await?;
			let mut ctx = AuthContext::new(method::USER_PASS);
			ctx.payload.insert("username".into(), request.username);
			ctx.payload.insert("password".into(), request.password);
			Ok(ctx)
		} else {
			debug!(client = %client_addr, username = %request.username, "credentials rejected");
			conn.write_frame(
				UserPassReplyCodec,
				UserPassReply {
					status: USER_PASS_FAILURE,
				},
			)
			.await?;
			UserAuthFailedSnafu {
				username: request.username,
			}
			.fail()
		}
	}
}

#[cfg(test)]
mod test {
	use std::net::{Ipv4Addr, SocketAddr};
	use std::sync::Arc;

	use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};

	use super::*;
	use crate::Error;

	fn client_addr() -> SocketAddr {
		SocketAddr::from((Ipv4Addr::LOCALHOST, 50000))
	}

	fn store() -> Arc<StaticCredentials> {
		Arc::new(
			[("foo".to_string(), "bar".to_string())]
				.into_iter()
				.collect::<StaticCredentials>(),
		)
	}

	#[tokio::test]
	async fn no_auth_selects_method() -> eyre::Result<()> {
		let (mut client, server) = tokio::io::duplex(64);
		let mut conn = SocksConn::new(server);

		let ctx = NoAuth.negotiate(&mut conn, client_addr()).await?;
		assert_eq!(ctx.method, 0x00);

		let mut select = [0u8; 2];
		client.read_exact(&mut select).await?;
		assert_eq!(select, [0x05, 0x00]);
		Ok(())
	}

	#[tokio::test]
	async fn userpass_accepts_matching_credentials() -> eyre::Result<()> {
		let (mut client, server) = tokio::io::duplex(64);
		let mut conn = SocksConn::new(server);

		client
			.write_all(&[0x01, 3, b'f', b'o', b'o', 3, b'b', b'a', b'r'])
			.await?;

		let auth = UserPassAuthenticator::new(store());
		let ctx = auth.negotiate(&mut conn, client_addr()).await?;
		assert_eq!(ctx.method, 0x02);
		assert_eq!(ctx.username(), Some("foo"));
		assert_eq!(ctx.payload.get("password").map(String::as_str), Some("bar"));

		let mut wire = [0u8; 4];
		client.read_exact(&mut wire).await?;
		assert_eq!(wire, [0x05, 0x02, 0x01, 0x00]);
		Ok(())
	}

	#[tokio::test]
	async fn userpass_rejects_bad_password() -> eyre::Result<()> {
		let (mut client, server) = tokio::io::duplex(64);
		let mut conn = SocksConn::new(server);

		client
			.write_all(&[0x01, 3, b'f', b'o', b'o', 3, b'b', b'a', b'z'])
			.await?;

		let auth = UserPassAuthenticator::new(store());
		let err = auth.negotiate(&mut conn, client_addr()).await.unwrap_err();
		assert!(matches!(err, Error::UserAuthFailed { username } if username == "foo"));

		let mut wire = [0u8; 4];
		client.read_exact(&mut wire).await?;
		assert_eq!(wire, [0x05, 0x02, 0x01, 0x01]);
		Ok(())
	}

	#[tokio::test]
	async fn userpass_read_error_is_fatal() {
		let (client, server) = tokio::io::duplex(64);
		let mut conn = SocksConn::new(server);

		// Client hangs up mid sub-negotiation.
		drop(client);

		let auth = UserPassAuthenticator::new(store());
		let err = auth.negotiate(&mut conn, client_addr()).await.unwrap_err();
		assert!(matches!(err, Error::Proto { .. }));
	}
}
