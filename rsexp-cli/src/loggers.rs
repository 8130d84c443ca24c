use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Installs the global subscriber. `RUST_LOG` overrides the level, which is
/// `debug` with `--verbose` and `info` otherwise.
pub fn init_logger(verbose: bool) -> Result<()> {
    let log_level = if verbose { "debug" } else { "info" };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| log_level.into());
    let subscriber = tracing_subscriber::fmt::layer()
        .with_file(true)
        .with_line_number(true)
        .with_target(true)
        .with_thread_names(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr);
    tracing_subscriber::registry().with(subscriber).with(env_filter).try_init()?;

    Ok(())
}
