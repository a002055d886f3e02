//! Tracing setup: a compact stderr layer plus an optional daily rolling
//! file under the project's log directory.

use anyhow::Result;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Environment variable checked before `RUST_LOG`.
pub const LOG_ENV: &str = "MARE_LOG";

fn env_filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .or_else(|_| EnvFilter::try_new(default_directives(verbose)))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

fn default_directives(verbose: bool) -> &'static str {
    if verbose { "mare=debug,info" } else { "mare=info,warn" }
}

/// Install the global subscriber.
///
/// When `log_dir` is given, events are also written to `mare.log.<date>`
/// there. The returned guard flushes the file writer on drop and must be
/// held for the life of the process. A second call is a no-op.
pub fn init(verbose: bool, log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let stderr_layer = fmt::layer()
        .with_target(verbose)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .compact();

    let (file_layer, guard) = match log_dir {
        Some(dir) if std::fs::create_dir_all(dir).is_ok() => {
            let appender = tracing_appender::rolling::daily(dir, "mare.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_ansi(false)
                .with_target(true)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        _ => (None, None),
    };

    if tracing_subscriber::registry()
        .with(env_filter(verbose))
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .is_err()
    {
        return Ok(None);
    }

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_directives_follow_verbosity() {
        assert_eq!(default_directives(false), "mare=info,warn");
        assert_eq!(default_directives(true), "mare=debug,info");
    }

    #[test]
    fn test_init_twice_does_not_fail() {
        let dir = tempdir().unwrap();
        let _first = init(false, Some(dir.path())).unwrap();
        let second = init(true, None).unwrap();
        assert!(second.is_none());
    }
}
