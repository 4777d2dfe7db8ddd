//! Tracing subscriber installation.
//!
//! The projection crates only emit `tracing` events; whoever owns the process
//! decides where they go. Filtering follows `RUST_LOG`, falling back to `info`.

use tracing_subscriber::EnvFilter;

/// Output format of the installed subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// One JSON object per line, for collectors.
    #[default]
    Json,
    /// Human-readable single-line output, for terminals and demos.
    Compact,
    /// Compact output routed through the test harness' captured writer.
    Test,
}

impl LogFormat {
    /// Parse `json`, `compact` or `test` (case-insensitive).
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "json" => Some(Self::Json),
            "compact" => Some(Self::Compact),
            "test" => Some(Self::Test),
            _ => None,
        }
    }
}

fn filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber. Returns `false` if one was already installed.
pub fn init(format: LogFormat) -> bool {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter())
        .with_target(false);

    let installed = match format {
        LogFormat::Json => builder
            .json()
            .with_timer(tracing_subscriber::fmt::time::SystemTime)
            .try_init(),
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Test => builder.compact().with_test_writer().try_init(),
    };
    installed.is_ok()
}
