use anyhow::{Result, anyhow};
use shared::config::{ClientConfig, LogFormat};
use tracing_subscriber::{EnvFilter, filter::LevelFilter, fmt};

/// Installs the global subscriber. Logs go to stderr so transcripts on
/// stdout stay clean.
pub fn initialize_tracing(config: &ClientConfig) -> Result<()> {
    let fmt_builder = fmt::fmt()
        .with_env_filter(build_env_filter(config))
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(true);

    let installed = if matches!(config.logging.format, LogFormat::Json) {
        fmt_builder.json().with_ansi(false).try_init()
    } else {
        fmt_builder.with_ansi(true).try_init()
    };
    installed.map_err(|err| anyhow!("failed to install tracing subscriber: {err}"))
}

fn build_env_filter(config: &ClientConfig) -> EnvFilter {
    let default_level = config
        .logging
        .level
        .parse::<LevelFilter>()
        .unwrap_or(LevelFilter::WARN);

    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::builder()
            .with_default_directive(default_level.into())
            .from_env_lossy()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn unknown_level_falls_back_to_warn() {
        // SAFETY: tests touching the environment are serialized.
        unsafe { std::env::remove_var("RUST_LOG") };
        let mut config = ClientConfig::with_defaults();
        config.logging.level = "chatty".to_string();

        let filter = build_env_filter(&config);

        assert_eq!(filter.max_level_hint(), Some(LevelFilter::WARN));
    }

    #[test]
    #[serial]
    fn configured_level_is_the_default_directive() {
        // SAFETY: tests touching the environment are serialized.
        unsafe { std::env::remove_var("RUST_LOG") };
        let mut config = ClientConfig::with_defaults();
        config.logging.level = "debug".to_string();

        let filter = build_env_filter(&config);

        assert_eq!(filter.max_level_hint(), Some(LevelFilter::DEBUG));
    }
}
