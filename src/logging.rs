// logging.rs — One-time `env_logger` installation.
//
// Library code only talks to the `log` facade. Binaries, benches and the
// GPU test children call `init_logging` once; later calls are ignored.

use std::sync::Once;

/// Logger configuration.
///
/// `env_filter` uses `env_logger` filter syntax, e.g.
/// `"levelgrid=debug,wgpu_core=warn"`.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub env_filter: Option<String>,
    pub write_style: env_logger::WriteStyle,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            env_filter: None,
            write_style: env_logger::WriteStyle::Auto,
        }
    }
}

impl LoggingConfig {
    /// Verbose preset used by the GPU test children (`gpu_session`): our
    /// own crate at debug, wgpu internals at warn.
    pub fn verbose() -> Self {
        Self {
            env_filter: Some("levelgrid=debug,wgpu_core=warn,wgpu_hal=warn,naga=warn".into()),
            ..Self::default()
        }
    }
}

static INIT: Once = Once::new();

/// Install the global logger. Idempotent.
///
/// Filter precedence: `config.env_filter`, then `RUST_LOG`, then `info`.
pub fn init_logging(config: LoggingConfig) {
    INIT.call_once(|| {
        let mut builder = env_logger::Builder::new();

        if let Some(filter) = config.env_filter {
            builder.parse_filters(&filter);
        } else if let Ok(filter) = std::env::var("RUST_LOG") {
            builder.parse_filters(&filter);
        } else {
            builder.filter_level(log::LevelFilter::Info);
        }

        builder.write_style(config.write_style);
        // try_init: a host application may already own the global logger.
        if builder.try_init().is_err() {
            return;
        }

        log::debug!("logging initialized");
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbose_preset_filters() {
        let filter = LoggingConfig::verbose().env_filter.unwrap();
        assert!(filter.starts_with("levelgrid=debug"));
        assert!(filter.contains("wgpu_core=warn"));
        assert!(LoggingConfig::default().env_filter.is_none());
    }

    #[test]
    fn test_init_is_idempotent() {
        init_logging(LoggingConfig::verbose());
        init_logging(LoggingConfig::default());
        log::debug!("still one logger");
    }
}
