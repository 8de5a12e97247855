//! Structured logging for the Aether tools.
//!
//! Console output carries the time since start and the module path. Debug
//! builds also write one JSON object per event to `aether.log`, which is
//! handy for comparing two bakes after the fact. Records emitted through the
//! `log` facade by the scattering and render crates end up in the same
//! subscriber.

use std::fs::File;
use std::path::Path;

use aether_config::Config;
use tracing::Subscriber;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::fmt::format::{Format, Json, JsonFields};
use tracing_subscriber::fmt::time::Uptime;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Directives used when neither `RUST_LOG` nor the config name a level.
pub const DEFAULT_FILTER: &str = "info,wgpu=warn,naga=warn";

/// Name of the JSON log written in debug builds.
pub const LOG_FILE_NAME: &str = "aether.log";

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` wins over `config.debug.log_level`, which wins over
/// [`DEFAULT_FILTER`]. The JSON file is only written when `debug_build` is
/// set and `log_dir` can be created.
///
/// ```no_run
/// use aether_config::Config;
/// use aether_log::init_logging;
///
/// let config = Config::default();
/// init_logging(Some(std::path::Path::new("./logs")), true, Some(&config));
/// ```
pub fn init_logging(log_dir: Option<&Path>, debug_build: bool, config: Option<&Config>) {
    let directives = filter_directives(config);
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&directives));

    let console_layer = fmt::layer()
        .with_target(true)
        .with_thread_names(true)
        .with_level(true)
        .with_timer(fmt::time::uptime());

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer);

    if debug_build
        && let Some(log_dir) = log_dir
        && std::fs::create_dir_all(log_dir).is_ok()
        && let Ok(log_file) = File::create(log_dir.join(LOG_FILE_NAME))
    {
        subscriber.with(json_file_layer(log_file)).init();
        tracing::debug!(path = %log_dir.join(LOG_FILE_NAME).display(), "JSON log enabled");
        return;
    }

    subscriber.init();
}

/// Filter directives for `config`.
///
/// A bare level such as `"debug"` keeps the GPU stack at `warn`; anything
/// with a target or several directives is used as written.
pub fn filter_directives(config: Option<&Config>) -> String {
    let level = config.map(|config| config.debug.log_level.trim()).unwrap_or("");
    if level.is_empty() {
        DEFAULT_FILTER.to_string()
    } else if level.contains(',') || level.contains('=') {
        level.to_string()
    } else {
        format!("{level},wgpu=warn,naga=warn")
    }
}

pub type JsonFileLayer<S> = fmt::Layer<S, JsonFields, Format<Json, Uptime>, File>;

/// JSON lines layer writing to `log_file`, without ANSI escapes.
pub fn json_file_layer<S>(log_file: File) -> JsonFileLayer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fmt::layer()
        .with_writer(log_file)
        .with_ansi(false)
        .with_target(true)
        .with_timer(fmt::time::uptime())
        .json()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_without_config() {
        assert_eq!(filter_directives(None), DEFAULT_FILTER);

        let mut config = Config::default();
        config.debug.log_level = "  ".to_string();
        assert_eq!(filter_directives(Some(&config)), DEFAULT_FILTER);
    }

    #[test]
    fn test_bare_level_keeps_gpu_quiet() {
        let mut config = Config::default();
        config.debug.log_level = "debug".to_string();
        assert_eq!(
            filter_directives(Some(&config)),
            "debug,wgpu=warn,naga=warn"
        );
    }

    #[test]
    fn test_explicit_directives_used_verbatim() {
        let mut config = Config::default();
        config.debug.log_level = "warn,aether_scattering=trace".to_string();
        assert_eq!(
            filter_directives(Some(&config)),
            "warn,aether_scattering=trace"
        );
    }

    #[test]
    fn test_filter_directives_parse() {
        for level in ["info", "debug", "trace,aether_render=debug", "error"] {
            let mut config = Config::default();
            config.debug.log_level = level.to_string();
            let directives = filter_directives(Some(&config));
            assert!(
                EnvFilter::try_new(&directives).is_ok(),
                "Failed to parse filter: {directives}"
            );
        }
    }

    #[test]
    fn test_json_file_layer_writes_events() {
        let temp_dir = tempfile::tempdir().unwrap();
        let log_path = temp_dir.path().join(LOG_FILE_NAME);
        let log_file = File::create(&log_path).unwrap();

        let subscriber = tracing_subscriber::registry().with(json_file_layer(log_file));
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(orders = 4, "precompute finished");
        });

        let contents = std::fs::read_to_string(&log_path).unwrap();
        let line = contents.lines().next().expect("one event logged");
        let event: serde_json::Value = serde_json::from_str(line).unwrap();
        assert_eq!(event["level"], "INFO");
        assert_eq!(event["fields"]["message"], "precompute finished");
        assert_eq!(event["fields"]["orders"], 4);
        assert_eq!(event["target"], "aether_log::tests");
    }
}
