use super::ConfigError;
use super::validator::{require_http_url, require_non_empty};
use crate::db::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub homeserver: HomeserverConfig,
    pub admin: AdminConfig,
    #[serde(default)]
    pub migration: MigrationConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HomeserverConfig {
    pub url: String,
    pub domain: String,
    #[serde(default)]
    pub registration_shared_secret: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl HomeserverConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// The Rocket.Chat admin is mapped onto an existing Matrix account instead of
/// being registered.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AdminConfig {
    pub username: String,
    pub matrix_id: String,
    #[serde(default)]
    pub access_token: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MigrationConfig {
    #[serde(default = "default_inputs_dir")]
    pub inputs_dir: PathBuf,
    #[serde(default = "default_users_file")]
    pub users_file: String,
    #[serde(default = "default_rooms_file")]
    pub rooms_file: String,
    #[serde(default = "default_messages_file")]
    pub messages_file: String,
    /// Rocket.Chat user IDs or usernames that are never migrated.
    #[serde(default)]
    pub excluded_users: Vec<String>,
    #[serde(default = "default_email_brand")]
    pub email_brand: String,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            inputs_dir: default_inputs_dir(),
            users_file: default_users_file(),
            rooms_file: default_rooms_file(),
            messages_file: default_messages_file(),
            excluded_users: Vec::new(),
            email_brand: default_email_brand(),
        }
    }
}

impl MigrationConfig {
    pub fn users_path(&self) -> PathBuf {
        self.inputs_dir.join(&self.users_file)
    }

    pub fn rooms_path(&self) -> PathBuf {
        self.inputs_dir.join(&self.rooms_file)
    }

    pub fn messages_path(&self) -> PathBuf {
        self.inputs_dir.join(&self.messages_file)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    pub filename: String,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl DatabaseConfig {
    pub fn sqlite_path(&self) -> String {
        self.filename
            .strip_prefix("sqlite://")
            .unwrap_or(&self.filename)
            .to_string()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry.max_attempts,
            Duration::from_millis(self.retry.initial_backoff_ms),
            Duration::from_millis(self.retry.max_backoff_ms),
        )
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    #[serde(default = "default_retry_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_retry_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_max_attempts(),
            initial_backoff_ms: default_retry_initial_backoff_ms(),
            max_backoff_ms: default_retry_max_backoff_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::load_with_overrides(path, |key| std::env::var(key).ok())
    }

    fn load_with_overrides<P, F>(path: P, lookup: F) -> Result<Self, ConfigError>
    where
        P: AsRef<Path>,
        F: Fn(&str) -> Option<String>,
    {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = serde_yaml::from_str(&content)?;
        config.apply_overrides(lookup);
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        require_http_url(&self.homeserver.url, "homeserver.url")?;
        require_non_empty(&self.homeserver.domain, "homeserver.domain")?;
        require_non_empty(
            &self.homeserver.registration_shared_secret,
            "homeserver.registration_shared_secret",
        )?;
        require_non_empty(&self.admin.username, "admin.username")?;
        require_non_empty(&self.admin.access_token, "admin.access_token")?;
        require_non_empty(&self.database.sqlite_path(), "database.filename")?;

        if self.homeserver.request_timeout_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "homeserver.request_timeout_secs must be at least 1".to_string(),
            ));
        }

        if self.database.retry.max_attempts == 0 {
            return Err(ConfigError::InvalidConfig(
                "database.retry.max_attempts must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("HOMESERVER_URL") {
            self.homeserver.url = value;
        }
        if let Some(value) = lookup("REGISTRATION_SHARED_SECRET") {
            self.homeserver.registration_shared_secret = value;
        }
        if let Some(value) = lookup("ADMIN_USERNAME") {
            self.admin.username = value;
        }
        if let Some(value) = lookup("ADMIN_ACCESS_TOKEN") {
            self.admin.access_token = value;
        }
        if let Some(value) = lookup("EXCLUDED_USERS") {
            self.migration.excluded_users = value
                .split(',')
                .map(str::trim)
                .filter(|entry| !entry.is_empty())
                .map(ToOwned::to_owned)
                .collect();
        }
        if let Some(value) = lookup("DATABASE") {
            self.database.filename = value;
        }
    }
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_inputs_dir() -> PathBuf {
    PathBuf::from("inputs")
}

fn default_users_file() -> String {
    "users.json".to_string()
}

fn default_rooms_file() -> String {
    "rocketchat_room.json".to_string()
}

fn default_messages_file() -> String {
    "rocketchat_message.json".to_string()
}

fn default_email_brand() -> String {
    "IM".to_string()
}

fn default_retry_max_attempts() -> u32 {
    8
}

fn default_retry_initial_backoff_ms() -> u64 {
    25
}

fn default_retry_max_backoff_ms() -> u64 {
    2000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;
    use std::path::PathBuf;

    use tempfile::NamedTempFile;

    use super::Config;
    use crate::config::ConfigError;

    const MINIMAL: &str = r#"
homeserver:
  url: http://localhost:8008
  domain: example.org
  registration_shared_secret: s3cret
admin:
  username: admin
  matrix_id: "@admin:example.org"
  access_token: syt_admin
database:
  filename: db.sqlite
"#;

    fn parse(yaml: &str) -> Config {
        serde_yaml::from_str(yaml).expect("valid yaml")
    }

    #[test]
    fn minimal_config_gets_defaults() {
        let config = parse(MINIMAL);
        config.validate().expect("valid config");

        assert_eq!(config.homeserver.request_timeout_secs, 30);
        assert_eq!(config.migration.inputs_dir, PathBuf::from("inputs"));
        assert_eq!(
            config.migration.users_path(),
            PathBuf::from("inputs").join("users.json")
        );
        assert_eq!(
            config.migration.rooms_path(),
            PathBuf::from("inputs").join("rocketchat_room.json")
        );
        assert_eq!(config.migration.email_brand, "IM");
        assert!(config.migration.excluded_users.is_empty());
        assert_eq!(config.database.retry.max_attempts, 8);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, "pretty");
    }

    #[test]
    fn sqlite_prefix_is_stripped() {
        let mut config = parse(MINIMAL);
        config.database.filename = "sqlite://data/migration.db".to_string();
        assert_eq!(config.database.sqlite_path(), "data/migration.db");
    }

    #[test]
    fn overrides_replace_file_values() {
        let mut config = parse(MINIMAL);
        let env: HashMap<&str, &str> = HashMap::from([
            ("REGISTRATION_SHARED_SECRET", "from-env"),
            ("ADMIN_USERNAME", "root"),
            ("EXCLUDED_USERS", "bot1, rocket.cat,,"),
            ("DATABASE", "other.sqlite"),
        ]);

        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.homeserver.registration_shared_secret, "from-env");
        assert_eq!(config.admin.username, "root");
        assert_eq!(
            config.migration.excluded_users,
            vec!["bot1".to_string(), "rocket.cat".to_string()]
        );
        assert_eq!(config.database.filename, "other.sqlite");
        assert_eq!(config.homeserver.url, "http://localhost:8008");
    }

    #[test]
    fn missing_shared_secret_is_rejected() {
        let mut config = parse(MINIMAL);
        config.homeserver.registration_shared_secret.clear();

        match config.validate() {
            Err(ConfigError::InvalidConfig(msg)) => {
                assert!(msg.contains("registration_shared_secret"));
            }
            other => panic!("unexpected validation result: {other:?}"),
        }
    }

    #[test]
    fn non_http_homeserver_url_is_rejected() {
        let mut config = parse(MINIMAL);
        config.homeserver.url = "ftp://example.org".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_retry_budget_is_rejected() {
        let mut config = parse(MINIMAL);
        config.database.retry.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_from_file_reads_yaml() {
        let mut file = NamedTempFile::new().expect("temp config");
        file.write_all(MINIMAL.as_bytes()).expect("write config");

        let config = Config::load_with_overrides(file.path(), |_| None).expect("load config");
        assert_eq!(config.homeserver.domain, "example.org");
        assert_eq!(config.database.filename, "db.sqlite");
    }

    #[test]
    fn load_applies_overrides_before_validation() {
        let yaml = MINIMAL.replace("  registration_shared_secret: s3cret\n", "");
        let mut file = NamedTempFile::new().expect("temp config");
        file.write_all(yaml.as_bytes()).expect("write config");

        assert!(Config::load_with_overrides(file.path(), |_| None).is_err());

        let config = Config::load_with_overrides(file.path(), |key| {
            (key == "REGISTRATION_SHARED_SECRET").then(|| "from-env".to_string())
        })
        .expect("secret supplied by override");
        assert_eq!(config.homeserver.registration_shared_secret, "from-env");
    }
}
