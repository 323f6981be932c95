// In: src/observability.rs

//! Logging setup shared by the CLI and the test harnesses, plus the
//! `log_event!` macro used for one-line structured progress events.

use log::LevelFilter;
use std::fs::OpenOptions;
use std::sync::Once;

use crate::error::Result;

static INIT_LOGGER: Once = Once::new();

/// Emits a structured `event key=value ...` line at info level.
///
/// ```ignore
/// log_event!("pair_finished", case = name, status = "pass");
/// ```
#[macro_export]
macro_rules! log_event {
    ($event:expr $(, $key:ident = $value:expr)* $(,)?) => {{
        let mut line = String::from($event);
        $(
            line.push_str(&format!(" {}={}", stringify!($key), $value));
        )*
        log::info!("{}", line);
    }};
}

/// Installs the global `env_logger` once. Later calls are no-ops.
///
/// The level falls back to `RUST_LOG` semantics when `level` is `None`.
/// When `log_file` is set, records are appended to it instead of stderr.
pub fn init_logging(level: Option<LevelFilter>, log_file: Option<&str>) -> Result<()> {
    let file = match log_file {
        Some(path) => Some(OpenOptions::new().append(true).create(true).open(path)?),
        None => None,
    };

    INIT_LOGGER.call_once(move || {
        let mut builder = match level {
            Some(level) => {
                let mut builder = env_logger::Builder::new();
                builder.filter_level(level);
                builder
            }
            None => env_logger::Builder::from_env(
                env_logger::Env::default().default_filter_or("info"),
            ),
        };

        builder.is_test(false);

        // Custom formatter: just print the level and message
        builder.format(|buf, record| {
            use std::io::Write;
            writeln!(buf, "[{}] {}", record.level(), record.args())
        });

        if let Some(file) = file {
            builder.target(env_logger::Target::Pipe(Box::new(file)));
        }

        let _ = builder.try_init();
    });
    Ok(())
}

/// Maps the CLI verbosity count onto a level filter.
pub fn level_from_verbosity(verbose: u8, quiet: bool) -> LevelFilter {
    if quiet {
        return LevelFilter::Error;
    }
    match verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_mapping() {
        assert_eq!(level_from_verbosity(0, false), LevelFilter::Info);
        assert_eq!(level_from_verbosity(1, false), LevelFilter::Debug);
        assert_eq!(level_from_verbosity(5, false), LevelFilter::Trace);
        assert_eq!(level_from_verbosity(3, true), LevelFilter::Error);
    }

    #[test]
    fn test_init_logging_is_idempotent() {
        assert!(init_logging(Some(LevelFilter::Warn), None).is_ok());
        assert!(init_logging(Some(LevelFilter::Debug), None).is_ok());
        log_event!("logging_ready", attempt = 2);
    }
}
