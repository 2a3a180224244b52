use env_logger::Builder;
use log::{LevelFilter, debug};

/// `RUST_LOG` still overrides the defaults set here.
pub fn init() {
    #[cfg(debug_assertions)]
    let default_level = LevelFilter::Debug;
    #[cfg(not(debug_assertions))]
    let default_level = LevelFilter::Info;

    Builder::new()
        .filter_level(LevelFilter::Off)
        .filter_module("gesturectl", default_level)
        .parse_default_env()
        .format_timestamp_secs()
        .format_module_path(false)
        .init();

    debug!("logging initialized");
}
