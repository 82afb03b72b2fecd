use env_logger::Env;
use log::LevelFilter;

/// Default filter when neither `--log-level` nor `RUST_LOG` is given.
pub const DEFAULT_FILTER: &str = "info";

/// Logger builder honouring `RUST_LOG`; an explicit `level` overrides it.
fn builder(level: Option<LevelFilter>) -> env_logger::Builder {
    let mut builder = env_logger::Builder::from_env(Env::default().default_filter_or(DEFAULT_FILTER));
    if let Some(level) = level {
        builder.filter_level(level);
    }
    builder.format_timestamp_millis();
    builder
}

/// Initialize the logger, with the specified level if any
pub fn init_logger(level: Option<LevelFilter>) {
    builder(level).init();
}
