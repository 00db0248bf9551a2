use std::{backtrace::Backtrace, net::SocketAddr};

use snafu::{IntoError, Snafu};

pub mod proto;

mod acl;
mod auth;
mod conn;
mod inbound;
mod rewrite;
mod session;
mod udp;

pub use acl::*;
pub use auth::*;
pub use conn::*;
pub use inbound::*;
pub use rewrite::*;

use crate::proto::{ProtoError, ReplyCode};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
	/// Framing failure anywhere on the control stream.
	Proto {
		source: ProtoError,
		backtrace: Backtrace,
	},
	#[snafu(display("client offered protocol version {version}, not SOCKS5"))]
	UnsupportedVersion { version: u8 },
	#[snafu(display("no mutually supported authentication method"))]
	NoSupportedAuth,
	#[snafu(display("credentials rejected for {username:?}"))]
	UserAuthFailed { username: String },
	#[snafu(display("command {command:#04x} not supported"))]
	CommandNotSupported { command: u8 },
	#[snafu(display("address type {atyp:#04x} not supported"))]
	AddrTypeNotSupported { atyp: u8 },
	#[snafu(display("request denied by rule set"))]
	RuleDenied,
	#[snafu(display("failed to resolve {host:?}"))]
	Resolve {
		host: String,
		source: std::io::Error,
		backtrace: Backtrace,
	},
	#[snafu(display("dial to {target} failed, replied {reply:?}"))]
	Dial {
		target: SocketAddr,
		reply: ReplyCode,
		source: std::io::Error,
		backtrace: Backtrace,
	},
	BindSocket {
		socket_addr: SocketAddr,
		source: std::io::Error,
		backtrace: Backtrace,
	},
	#[snafu(display("handshake deadline exceeded"))]
	RequestTimeout,
	Io {
		source: std::io::Error,
		backtrace: Backtrace,
	},
	#[snafu(display("server is shut down"))]
	Shutdown,
}

impl From<ProtoError> for Error {
	#[inline(always)]
	fn from(value: ProtoError) -> Self {
		ProtoSnafu.into_error(value)
	}
}
