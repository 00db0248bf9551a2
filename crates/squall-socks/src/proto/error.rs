use std::{backtrace::Backtrace, str::Utf8Error, string::FromUtf8Error};

use snafu::prelude::*;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ProtoError {
	#[snafu(display("expected protocol version {expect}, got {current}"))]
	VersionMismatch {
		expect: u8,
		current: u8,
		backtrace: Backtrace,
	},
	#[snafu(display("reserved field must be zero, got {value:#04x}"))]
	NonZeroReserved { value: u8, backtrace: Backtrace },
	#[snafu(display("unable to decode address due to type {value:#04x}"))]
	UnknownAddressType { value: u8, backtrace: Backtrace },
	FailParseDomain {
		// HEX
		raw: String,
		source: Utf8Error,
		backtrace: Backtrace,
	},
	DomainTooLong { domain: String, backtrace: Backtrace },
	#[snafu(display("credentials are not valid UTF-8"))]
	CredentialNotUtf8 {
		source: FromUtf8Error,
		backtrace: Backtrace,
	},
	#[snafu(display("{field} does not fit the wire format: {len}"))]
	FieldTooLong {
		field: &'static str,
		len: usize,
		backtrace: Backtrace,
	},
	// Caller should yield
	BytesRemaining,
	Io {
		source: std::io::Error,
		backtrace: Backtrace,
	},
}

impl From<std::io::Error> for ProtoError {
	fn from(source: std::io::Error) -> Self {
		use snafu::IntoError as _;
		IoSnafu.into_error(source)
	}
}
