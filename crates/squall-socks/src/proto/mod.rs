mod error;
pub use error::*;

mod addr;
pub use addr::*;

mod cmd;
pub use cmd::*;

mod handshake;
pub use handshake::*;

mod udp_frame;
pub use udp_frame::*;

pub const VER: u8 = 5;

/// RFC 1929 sub-negotiation version
pub const SUB_VER: u8 = 1;

/// Authentication METHOD codes from the IANA SOCKS registry
pub mod method {
	pub const NO_AUTH: u8 = 0x00;
	pub const GSSAPI: u8 = 0x01;
	pub const USER_PASS: u8 = 0x02;
	pub const NO_ACCEPTABLE: u8 = 0xFF;
}
