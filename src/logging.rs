use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

pub enum LogTarget {
    Stderr,
    /// Used by the interactive chat so log lines do not tear the terminal UI.
    File(PathBuf),
}

pub fn default_log_path() -> PathBuf {
    crate::auth::state_dir().join("chat.log")
}

/// `RUST_LOG` wins over the `-v` count when set.
pub fn filter(verbosity: u8) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }

    match verbosity {
        0 => EnvFilter::new("warn"),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    }
}

/// Install the global subscriber. Keep the returned guard alive for the life of
/// the process so buffered file output is flushed.
pub fn init(verbosity: u8, target: LogTarget) -> anyhow::Result<Option<WorkerGuard>> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter(verbosity))
        .with_target(false);

    match target {
        LogTarget::Stderr => {
            builder
                .with_writer(std::io::stderr)
                .try_init()
                .map_err(|err| anyhow::anyhow!(err))?;
            Ok(None)
        }
        LogTarget::File(path) => {
            let dir = path
                .parent()
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("."));
            std::fs::create_dir_all(&dir)?;
            let file_name = path
                .file_name()
                .map(|name| name.to_os_string())
                .unwrap_or_else(|| "chat.log".into());

            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name));
            builder
                .with_writer(writer)
                .with_ansi(false)
                .try_init()
                .map_err(|err| anyhow::anyhow!(err))?;
            Ok(Some(guard))
        }
    }
}
