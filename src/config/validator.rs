use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

pub(super) fn require_non_empty(value: &str, field: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::InvalidConfig(format!("{field} cannot be empty")));
    }
    Ok(())
}

/// Accepts `http(s)://host[:port][/path]`.
pub(super) fn require_http_url(value: &str, field: &str) -> Result<(), ConfigError> {
    require_non_empty(value, field)?;
    match url::Url::parse(value) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(()),
        Ok(url) => Err(ConfigError::InvalidConfig(format!(
            "{field} must use http or https, got {}",
            url.scheme()
        ))),
        Err(e) => Err(ConfigError::InvalidConfig(format!("{field} is not a valid url: {e}"))),
    }
}
