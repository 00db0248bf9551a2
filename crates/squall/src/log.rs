use time::macros::format_description;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{
	filter::Targets, fmt::time::LocalTime, layer::SubscriberExt as _, util::SubscriberInitExt as _,
};

/// Workspace crates whose module-path targets should follow the CLI
/// verbosity. Everything else (tokio, figment, ...) stays at the default
/// so `--verbose` surfaces handshake traces without runtime noise.
const WORKSPACE_TARGETS: [&str; 3] = ["squall", "squall_core", "squall_socks"];

pub fn init_log(verbose: bool) -> eyre::Result<()> {
	let level = if verbose {
		LevelFilter::DEBUG
	} else {
		LevelFilter::INFO
	};
	// The default stays at INFO: the bracketed accept-loop targets
	// ("squall_socks [SOCKS]" etc.) are emitted at INFO and WARN only,
	// while per-session DEBUG events carry plain module-path targets and
	// ride the workspace entries above.
	let filter = WORKSPACE_TARGETS
		.iter()
		.fold(Targets::new(), |targets, name| {
			targets.with_target(*name, level)
		})
		.with_default(LevelFilter::INFO);

	// A proxy log is read while tailing, not archived; day and time are
	// enough.
	let format = tracing_subscriber::fmt::layer()
		.with_target(true)
		.with_timer(LocalTime::new(format_description!(
			"[month]-[day] [hour]:[minute]:[second]"
		)));

	tracing_subscriber::registry()
		.with(filter)
		.with(format)
		.try_init()?;

	Ok(())
}
