use sloggers::{Config, LoggerConfig};

pub use slog::{b, crit, debug, error, info, o, trace, warn, Discard, Drain, Logger};

/// Logging setup used when the host process does not carry a logging section
/// in its own config file.
const DEFAULT_CONFIG: &str = r#"
type = "terminal"
level = "debug"
destination = "stderr"
"#;

/// Build the root logger from the embedded terminal config.
pub fn init() -> Logger {
    build(DEFAULT_CONFIG)
}

/// Build the root logger from a TOML logging config file.
pub fn init_from_file(path: &str) -> Logger {
    let config: LoggerConfig =
        serdeconv::from_toml_file(path).expect("Error parsing logging config file");
    config.build_logger().expect("Logger construction failed")
}

fn build(toml: &str) -> Logger {
    let config: LoggerConfig = serdeconv::from_toml_str(toml).expect("Logging config must parse");
    config.build_logger().expect("Logger construction failed")
}
