use std::sync::Once;

use log::LevelFilter;

/// Targets that log per-command batching and binding decisions.
const BATCHING_TARGETS: [&str; 2] = ["vellum_gfx::command", "vellum_gfx::state"];

/// Logger configuration.
///
/// `env_filter` follows the `env_logger` filter syntax (e.g. "info",
/// "vellum_gfx::command=debug,wgpu=warn") and replaces `RUST_LOG` when set.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub env_filter: Option<String>,
    /// Level used when neither `env_filter` nor `RUST_LOG` is present.
    pub default_level: LevelFilter,
    /// Raise the queue and state cache targets to `trace`, on top of
    /// whatever the filter says. Merges and skipped binds show up there.
    pub trace_batching: bool,
    pub write_style: env_logger::WriteStyle,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            env_filter: None,
            default_level: LevelFilter::Info,
            trace_batching: false,
            write_style: env_logger::WriteStyle::Auto,
        }
    }
}

/// Filter directives for `config`, given the value of `RUST_LOG`.
fn filter_directives(config: &LoggingConfig, rust_log: Option<String>) -> String {
    let mut directives = config
        .env_filter
        .clone()
        .or(rust_log)
        .unwrap_or_else(|| config.default_level.to_string().to_lowercase());
    if config.trace_batching {
        for target in BATCHING_TARGETS {
            directives.push_str(&format!(",{target}=trace"));
        }
    }
    directives
}

static INIT: Once = Once::new();

/// Installs the global logger once.
///
/// Later calls are ignored, so tests and binaries may both call it. A logger
/// installed by the host application beforehand is left in place.
pub fn init_logging(config: LoggingConfig) {
    INIT.call_once(|| {
        let directives = filter_directives(&config, std::env::var("RUST_LOG").ok());

        let mut builder = env_logger::Builder::new();
        builder.parse_filters(&directives);
        builder.write_style(config.write_style);

        if builder.try_init().is_ok() {
            log::debug!("logging initialized ({directives})");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_filter_beats_rust_log() {
        let config = LoggingConfig {
            env_filter: Some("warn".into()),
            ..Default::default()
        };
        assert_eq!(filter_directives(&config, Some("trace".into())), "warn");
    }

    #[test]
    fn falls_back_to_rust_log_then_default_level() {
        let config = LoggingConfig::default();
        assert_eq!(filter_directives(&config, Some("debug".into())), "debug");
        assert_eq!(filter_directives(&config, None), "info");
    }

    #[test]
    fn trace_batching_appends_directives() {
        let config = LoggingConfig {
            trace_batching: true,
            default_level: LevelFilter::Warn,
            ..Default::default()
        };
        assert_eq!(
            filter_directives(&config, None),
            "warn,vellum_gfx::command=trace,vellum_gfx::state=trace"
        );
    }
}
