use serdeconv;
use sloggers::{Config, LoggerConfig};

/// Builds the terminal-backed root logger shared by every server component.
///
/// `level` accepts any of sloggers' severity names (`trace`, `debug`, `info`,
/// `warning`, `error`, `critical`).
pub fn init(level: &str) -> slog::Logger {
    let config: LoggerConfig = serdeconv::from_toml_str(&format!(
        r#"
type = "terminal"
level = "{}"
destination = "stderr"
"#,
        level
    ))
    .expect("invalid logger config");

    config.build_logger().expect("failed to build logger")
}
