use std::env;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::schedule::{is_time_label, ScheduleLabel};

pub const DEFAULT_TEMPORARY_FILES_DIRECTORY: &str = ".";
pub const DEFAULT_REDIS_PREFIX: &str = "channelbot";
pub const DEFAULT_REDIS_ADDRESS: &str = "localhost:6379";
pub const DEFAULT_START_MESSAGE: &str = "Hmm?..";
pub const DEFAULT_API_URL: &str = "https://api.telegram.org";
pub const DEFAULT_DEBOUNCE_MILLIS: u64 = 1000;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

/// Resolve a `${VAR}` reference against the environment; other values pass through.
pub fn resolve_env_ref(value: &str) -> Result<String, CoreError> {
    if !value.starts_with("${") {
        return Ok(value.to_string());
    }
    let var_name = value
        .strip_prefix("${")
        .and_then(|s| s.strip_suffix('}'))
        .ok_or_else(|| CoreError::Config(format!("Malformed env var reference: {value}")))?;
    env::var(var_name)
        .map_err(|_| CoreError::Config(format!("Environment variable '{var_name}' is not set")))
}

// ── Bot config ────────────────────────────────────────────────

/// Bot configuration, read from a JSON file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BotConfig {
    pub token: String,
    #[serde(default)]
    pub admin_list: Vec<i64>,
    #[serde(default)]
    pub default_post_times: Vec<String>,
    #[serde(default)]
    pub channel_id: i64,
    #[serde(default)]
    pub comments_id: i64,
    #[serde(default)]
    pub start_message: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub temporary_files_directory: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub redis_prefix: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub redis_address: String,
    #[serde(default, skip_serializing_if = "is_zero_i64")]
    pub redis_database_number: i64,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub default_post_text: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_url: String,
    #[serde(default, skip_serializing_if = "is_zero_u64")]
    pub debounce_millis: u64,
    #[serde(default, skip_serializing_if = "is_false")]
    pub verbose: bool,

    /// Where this config was loaded from; `dump()` writes back here.
    #[serde(skip)]
    pub config_path: Option<PathBuf>,
}

fn is_zero_i64(v: &i64) -> bool {
    *v == 0
}

fn is_zero_u64(v: &u64) -> bool {
    *v == 0
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl BotConfig {
    /// Read, fill defaults and validate a config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            CoreError::Config(format!("failed to read config {}: {e}", path.display()))
        })?;
        let mut config: Self = serde_json::from_str(&content)?;
        config.config_path = Some(path.to_path_buf());
        let config = config.fill_defaults();
        config.validate()?;
        Ok(config)
    }

    pub fn fill_defaults(mut self) -> Self {
        if self.temporary_files_directory.is_empty() {
            self.temporary_files_directory = DEFAULT_TEMPORARY_FILES_DIRECTORY.to_string();
        }
        if self.redis_prefix.is_empty() {
            self.redis_prefix = DEFAULT_REDIS_PREFIX.to_string();
        }
        if self.redis_address.is_empty() {
            self.redis_address = DEFAULT_REDIS_ADDRESS.to_string();
        }
        if self.start_message.is_empty() {
            self.start_message = DEFAULT_START_MESSAGE.to_string();
        }
        if self.api_url.is_empty() {
            self.api_url = DEFAULT_API_URL.to_string();
        }
        if self.debounce_millis == 0 {
            self.debounce_millis = DEFAULT_DEBOUNCE_MILLIS;
        }
        self
    }

    /// Reject malformed schedule labels; the whole config is refused on the first one.
    pub fn validate(&self) -> Result<(), CoreError> {
        if let Some(bad) = self.default_post_times.iter().find(|t| !is_time_label(t)) {
            return Err(CoreError::Config(format!(
                "default-post-times: time '{bad}' is invalid"
            )));
        }
        Ok(())
    }

    /// The bot token with any `${VAR}` reference resolved.
    pub fn resolved_token(&self) -> Result<String, CoreError> {
        let token = resolve_env_ref(&self.token)?;
        if token.is_empty() {
            return Err(CoreError::Config("token must not be empty".to_string()));
        }
        Ok(token)
    }

    pub fn default_labels(&self) -> Vec<ScheduleLabel> {
        self.default_post_times
            .iter()
            .map(|t| ScheduleLabel::At(t.clone()))
            .collect()
    }

    pub fn is_admin(&self, user_id: i64) -> bool {
        self.admin_list.contains(&user_id)
    }

    /// Redis connection URL built from address and database number.
    pub fn redis_url(&self) -> String {
        format!("redis://{}/{}", self.redis_address, self.redis_database_number)
    }

    /// Key namespace for a bot with the given user id.
    pub fn store_prefix(&self, bot_id: i64) -> String {
        format!("{}:{}", self.redis_prefix, bot_id)
    }

    pub fn dump_to(&self, path: impl AsRef<Path>) -> Result<(), CoreError> {
        let buffer = serde_json::to_string_pretty(self)?;
        std::fs::write(path, buffer)?;
        Ok(())
    }

    /// Write the config back to the file it was loaded from.
    pub fn dump(&self) -> Result<(), CoreError> {
        let path = self
            .config_path
            .as_ref()
            .ok_or_else(|| CoreError::Config("config was not loaded from a file".to_string()))?;
        self.dump_to(path)
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded:");
        tracing::info!("  channel:     id={}, comments={}", self.channel_id, self.comments_id);
        tracing::info!("  operators:   {}", self.admin_list.len());
        tracing::info!("  schedule:    {}", self.default_post_times.join(" "));
        tracing::info!(
            "  redis:       addr={}, db={}, prefix={}",
            self.redis_address,
            self.redis_database_number,
            self.redis_prefix
        );
        tracing::info!("  api:         url={}", self.api_url);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "token": "123:ABC",
        "admin-list": [11, 22],
        "default-post-times": ["09:00", "18:30"],
        "channel-id": -1001,
        "comments-id": -1002,
        "start-message": ""
    }"#;

    #[test]
    fn load_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.json");
        std::fs::write(&path, SAMPLE).unwrap();

        let config = BotConfig::load(&path).unwrap();
        assert_eq!(config.redis_prefix, DEFAULT_REDIS_PREFIX);
        assert_eq!(config.redis_address, DEFAULT_REDIS_ADDRESS);
        assert_eq!(config.start_message, DEFAULT_START_MESSAGE);
        assert_eq!(config.debounce_millis, 1000);
        assert_eq!(config.default_labels().len(), 2);
        assert!(config.is_admin(22));
        assert!(!config.is_admin(33));
        assert_eq!(config.redis_url(), "redis://localhost:6379/0");
        assert_eq!(config.store_prefix(777), "channelbot:777");
    }

    #[test]
    fn load_rejects_bad_label() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.json");
        std::fs::write(&path, SAMPLE.replace("18:30", "25:00")).unwrap();
        let err = BotConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("25:00"));
    }

    #[test]
    fn dump_round_trips_through_original_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.json");
        std::fs::write(&path, SAMPLE).unwrap();

        let mut config = BotConfig::load(&path).unwrap();
        config.default_post_times = vec!["07:15".into()];
        config.dump().unwrap();

        let reloaded = BotConfig::load(&path).unwrap();
        assert_eq!(reloaded.default_post_times, vec!["07:15".to_string()]);
        assert_eq!(reloaded.admin_list, vec![11, 22]);
    }

    #[test]
    fn dump_without_path_fails() {
        assert!(BotConfig::default().dump().is_err());
    }

    #[test]
    fn token_env_reference() {
        std::env::set_var("CHANPOST_TEST_TOKEN", "42:XYZ");
        let config = BotConfig {
            token: "${CHANPOST_TEST_TOKEN}".into(),
            ..Default::default()
        };
        assert_eq!(config.resolved_token().unwrap(), "42:XYZ");
        std::env::remove_var("CHANPOST_TEST_TOKEN");

        let missing = BotConfig {
            token: "${CHANPOST_MISSING_TOKEN_VAR}".into(),
            ..Default::default()
        };
        assert!(missing
            .resolved_token()
            .unwrap_err()
            .to_string()
            .contains("CHANPOST_MISSING_TOKEN_VAR"));
        assert!(BotConfig::default().resolved_token().is_err());
    }
}
