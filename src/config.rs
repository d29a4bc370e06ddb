/// Service configuration — persisted as TOML in the config directory.
///
/// The binary looks for `<config-dir>/config.toml` (default: the working
/// directory). A missing file is not an error: every field has a default, so
/// a fresh checkout runs against `./reminders.sqlite` with the standard job
/// intervals.
///
/// NOTE: `push.access_token` can also come from the `FCM_ACCESS_TOKEN`
/// environment variable, which wins over the file so the token does not need
/// to be written to disk. OAuth tokens expire after an hour, so long-running
/// deployments should point `push.access_token_file` at a file that an
/// external refresher (e.g. `gcloud auth print-access-token`) keeps current;
/// it is re-read on every send.
use anyhow::Result;
use chrono::{DateTime, FixedOffset, Local, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "config.toml";
pub const ACCESS_TOKEN_ENV: &str = "FCM_ACCESS_TOKEN";

// ---------------------------------------------------------------------------
// AppConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaffeineJobConfig {
    /// Minutes between caffeine scans.
    #[serde(default = "default_caffeine_interval")]
    pub interval_minutes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HydrationJobConfig {
    /// Minutes between hydration scans.
    #[serde(default = "default_hydration_interval")]
    pub interval_minutes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushConfig {
    /// FCM API host; requests go to `{endpoint}/v1/projects/{project_id}/messages:send`.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Firebase project that owns the client registrations.
    #[serde(default)]
    pub project_id: String,

    /// OAuth2 bearer token with the `firebase.messaging` scope.
    #[serde(default)]
    pub access_token: String,

    /// File holding the bearer token. Takes precedence over `access_token`.
    #[serde(default)]
    pub access_token_file: Option<PathBuf>,

    /// Notification title shown by the client.
    #[serde(default = "default_title")]
    pub title: String,

    /// Icon path forwarded to the client display layer. Empty = omit.
    #[serde(default = "default_icon")]
    pub icon: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// SQLite document store. Relative paths resolve against the config dir.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Directory for the rolling log file. Relative paths resolve against the
    /// config dir.
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    /// Offset used to anchor `bedtime` to a calendar day. `None` = host local.
    #[serde(default)]
    pub utc_offset_minutes: Option<i32>,

    #[serde(default)]
    pub caffeine: CaffeineJobConfig,

    #[serde(default)]
    pub hydration: HydrationJobConfig,

    #[serde(default)]
    pub push: PushConfig,
}

fn default_caffeine_interval() -> u64 { 5 }
fn default_hydration_interval() -> u64 { 15 }
fn default_endpoint() -> String { "https://fcm.googleapis.com".to_owned() }
fn default_title() -> String { "Health Reminder!".to_owned() }
fn default_icon() -> String { "/icons/icon-192x192.png".to_owned() }
fn default_timeout_secs() -> u64 { 10 }
fn default_db_path() -> PathBuf { PathBuf::from("reminders.sqlite") }
fn default_log_dir() -> PathBuf { PathBuf::from("logs") }

impl Default for CaffeineJobConfig {
    fn default() -> Self {
        Self { interval_minutes: default_caffeine_interval() }
    }
}

impl Default for HydrationJobConfig {
    fn default() -> Self {
        Self { interval_minutes: default_hydration_interval() }
    }
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            endpoint:          default_endpoint(),
            project_id:        String::new(),
            access_token:      String::new(),
            access_token_file: None,
            title:             default_title(),
            icon:              default_icon(),
            timeout_secs:      default_timeout_secs(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path:            default_db_path(),
            log_dir:            default_log_dir(),
            utc_offset_minutes: None,
            caffeine:           CaffeineJobConfig::default(),
            hydration:          HydrationJobConfig::default(),
            push:               PushConfig::default(),
        }
    }
}

impl AppConfig {
    /// Current time in the configured evaluation offset.
    pub fn now(&self) -> DateTime<FixedOffset> {
        match self.utc_offset_minutes.and_then(|m| FixedOffset::east_opt(m * 60)) {
            Some(offset) => Utc::now().with_timezone(&offset),
            None         => Local::now().fixed_offset(),
        }
    }

    /// Resolve `db_path`, `log_dir` and the token file against `config_dir`
    /// when relative.
    pub fn resolve_paths(&mut self, config_dir: &Path) {
        if self.db_path.is_relative() {
            self.db_path = config_dir.join(&self.db_path);
        }
        if self.log_dir.is_relative() {
            self.log_dir = config_dir.join(&self.log_dir);
        }
        if let Some(file) = self.push.access_token_file.as_mut() {
            if file.is_relative() {
                *file = config_dir.join(&*file);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Load / save
// ---------------------------------------------------------------------------

pub fn load_or_default(config_dir: &Path) -> Result<AppConfig> {
    let path = config_dir.join(CONFIG_FILE);
    let mut cfg = if path.exists() {
        let raw = std::fs::read_to_string(&path)?;
        toml::from_str::<AppConfig>(&raw)
            .map_err(|e| anyhow::anyhow!("Config parse error: {}", e))?
    } else {
        AppConfig::default()
    };

    if let Ok(token) = std::env::var(ACCESS_TOKEN_ENV) {
        if !token.is_empty() {
            cfg.push.access_token = token;
        }
    }
    Ok(cfg)
}

/// Write `config` to `<config_dir>/config.toml`, creating the directory.
pub fn save(config: &AppConfig, config_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(config_dir)?;
    let raw = toml::to_string_pretty(config)
        .map_err(|e| anyhow::anyhow!("Config serialize error: {}", e))?;
    std::fs::write(config_dir.join(CONFIG_FILE), raw)?;
    Ok(())
}
