#[macro_export]
macro_rules! info {
    (target: $target:expr, $($arg:tt)*) => {
		tracing::info!(target: const_str::concat!($crate::log::crate_name(module_path!()), " ", $target), $($arg)*)
    };
    ($($arg:tt)*) => {
        tracing::info!($($arg)*)
    };
}

#[macro_export]
macro_rules! warn {
    (target: $target:expr, $($arg:tt)*) => {
		tracing::warn!(target: const_str::concat!($crate::log::crate_name(module_path!()), " ", $target), $($arg)*)
    };
    ($($arg:tt)*) => {
        tracing::warn!($($arg)*)
    };
}

#[macro_export]
macro_rules! error {
    (target: $target:expr, $($arg:tt)*) => {
		tracing::error!(target: const_str::concat!($crate::log::crate_name(module_path!()), " ", $target), $($arg)*)
    };
    ($($arg:tt)*) => {
        tracing::error!($($arg)*)
    };
}

#[macro_export]
macro_rules! debug {
    (target: $target:expr, $($arg:tt)*) => {
		tracing::debug!(target: const_str::concat!($crate::log::crate_name(module_path!()), " ", $target), $($arg)*)
    };
    ($($arg:tt)*) => {
        tracing::debug!($($arg)*)
    };
}

/// Crate component of a `module_path!()`. The macros above prefix their
/// targets with it, so filter rules keyed on a workspace crate name also
/// catch the bracketed accept-loop targets. `module_path!()` expands where
/// the macro is invoked, so the prefix names the calling crate.
pub const fn crate_name(module_path: &'static str) -> &'static str {
	let bytes = module_path.as_bytes();
	let mut end = 0;
	while end < bytes.len() && bytes[end] != b':' {
		end += 1;
	}
	module_path.split_at(end).0
}

#[cfg(test)]
mod test {
	use super::crate_name;

	#[test]
	fn strips_module_segments() {
		assert_eq!(crate_name("squall_core::log::test"), "squall_core");
		assert_eq!(crate_name("squall"), "squall");
		assert_eq!(crate_name(module_path!()), "squall_core");
	}
}
