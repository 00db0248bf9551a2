use std::{path::PathBuf, sync::Arc};

use clap::Parser as _;
use squall_core::info;
use squall_socks::Error;

use crate::{
	cli::{Cli, Commands},
	conf::{persistent::PersistentConfig, runtime::Config},
};

mod cli;
mod conf;
mod log;

// curl --socks5 127.0.0.1:1080 example.com
#[tokio::main]
async fn main() -> eyre::Result<()> {
	let cli = match Cli::try_parse() {
		Ok(v) => v,
		Err(err) => {
			println!("{:#}", err);
			return Ok(());
		}
	};
	log::init_log(cli.verbose)?;

	if cli.version {
		const VER: &str = match option_env!("SQUALL_OVERRIDE_VERSION") {
			Some(v) => v,
			None => env!("CARGO_PKG_VERSION"),
		};
		println!("squall {VER}");
		return Ok(());
	}

	if let Some(Commands::Init { format }) = &cli.command {
		let format = *format;
		let dir = cli.config_dir.clone().unwrap_or_else(|| PathBuf::from("."));
		let path = dir.join(format!("squall.{}", format.extension()));
		PersistentConfig::default().export_to_file(&path, format)?;
		println!("wrote default configuration to {}", path.display());
		return Ok(());
	}

	let persistent = PersistentConfig::load(&cli)?;
	let (listen_addr, server) = Config::from_persist(persistent).build_server();
	let server = Arc::new(server);

	info!(target: "[MAIN]", "squall starting");
	tokio::select! {
		res = server.listen_and_serve(listen_addr) => match res {
			Err(Error::Shutdown) | Ok(()) => {}
			Err(err) => return Err(err.into()),
		},
		_ = tokio::signal::ctrl_c() => {
			info!(target: "[MAIN]", "interrupt received, draining sessions");
			server.shutdown().await;
		}
	}

	Ok(())
}
