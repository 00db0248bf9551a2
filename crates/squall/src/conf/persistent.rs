use std::{
	collections::HashMap,
	net::{IpAddr, SocketAddr},
	path::{Path, PathBuf},
	time::Duration,
};

use educe::Educe;
use eyre::Context as _;
use figment::{
	Figment,
	providers::{Env, Format, Serialized, Toml, Yaml},
};
use serde::{Deserialize, Serialize};
use squall_core::types::TargetAddr;

use crate::cli::{Cli, ConfigFormat};

#[derive(Debug, Deserialize, Serialize, Educe)]
#[educe(Default)]
pub struct PersistentConfig {
	pub socks_opt: SocksOpt,
}

#[derive(Debug, Deserialize, Serialize, Educe)]
#[educe(Default)]
pub struct SocksOpt {
	#[educe(Default(expression = "127.0.0.1:1080".parse().unwrap()))]
	pub listen_addr: SocketAddr,

	/// External IP advertised in BIND and UDP ASSOCIATE replies.
	#[educe(Default = None)]
	pub public_addr: Option<IpAddr>,

	/// Source IP for outbound dials.
	#[educe(Default = None)]
	pub bind_ip: Option<IpAddr>,

	#[educe(Default = AuthModeConfig::NoAuth)]
	pub auth: AuthModeConfig,

	#[educe(Default = true)]
	pub allow_udp: bool,

	#[serde(with = "humantime_serde")]
	#[educe(Default(expression = Duration::from_secs(10)))]
	pub request_timeout: Duration,

	#[educe(Default = 65536)]
	pub udp_buffer: usize,

	/// Static destination overrides, keyed by requested domain. A target
	/// with port 0 keeps the client's port.
	#[educe(Default(expression = HashMap::new()))]
	pub rewrites: HashMap<String, TargetAddr>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Educe)]
#[educe(Default)]
pub enum AuthModeConfig {
	#[educe(Default)]
	NoAuth,
	Password { username: String, password: String },
}

impl PersistentConfig {
	pub fn load(cli: &Cli) -> eyre::Result<Self> {
		let mut figment = Figment::from(Serialized::defaults(PersistentConfig::default()));

		let path = match &cli.config {
			Some(path) => Some(path.clone()),
			None => {
				let dir = cli.config_dir.clone().unwrap_or_else(|| PathBuf::from("."));
				["squall.yaml", "squall.toml"]
					.iter()
					.map(|name| dir.join(name))
					.find(|candidate| candidate.is_file())
			}
		};
		if let Some(path) = path {
			figment = match path.extension().and_then(|ext| ext.to_str()) {
				Some("toml") => figment.merge(Toml::file(&path)),
				_ => figment.merge(Yaml::file(&path)),
			};
		}

		figment
			.merge(Env::prefixed("SQUALL_").split("__"))
			.extract()
			.wrap_err("failed to load configuration")
	}

	pub fn export_to_file(&self, file_path: &Path, format: ConfigFormat) -> eyre::Result<()> {
		let content = match format {
			ConfigFormat::Toml => toml::to_string_pretty(self)?,
			ConfigFormat::Yaml => serde_yaml::to_string(self)?,
		};
		std::fs::write(file_path, content)
			.wrap_err_with(|| format!("failed to write {}", file_path.display()))?;
		Ok(())
	}
}
