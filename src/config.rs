pub use self::parser::{AdminConfig, Config, DatabaseConfig, LoggingConfig, RetryConfig};
pub use self::validator::ConfigError;

mod parser;
mod validator;
