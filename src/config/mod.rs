use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub backup: BackupConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            data_dir: default_data_dir(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Bootstrap admin credentials, used only when no account exists yet.
    #[serde(default = "default_admin_email")]
    pub admin_email: String,
    #[serde(default)]
    pub admin_password: Option<String>,
    /// Secret used to sign bearer tokens.
    #[serde(default = "default_token_secret")]
    pub token_secret: String,
    /// Nominal bearer token lifetime in minutes.
    #[serde(default = "default_token_minutes")]
    pub token_minutes: i64,
    /// Sliding session timeout in minutes.
    #[serde(default = "default_session_timeout_minutes")]
    pub session_timeout_minutes: i64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            admin_email: default_admin_email(),
            admin_password: None,
            token_secret: default_token_secret(),
            token_minutes: default_token_minutes(),
            session_timeout_minutes: default_session_timeout_minutes(),
        }
    }
}

fn default_admin_email() -> String {
    "admin@visitdesk.local".to_string()
}

fn default_token_secret() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn default_token_minutes() -> i64 {
    60
}

fn default_session_timeout_minutes() -> i64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackupConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Directory for local snapshots, relative to the data directory unless
    /// absolute.
    #[serde(default = "default_backup_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    /// Cron expression (with seconds) for the nightly snapshot.
    #[serde(default = "default_nightly_schedule")]
    pub nightly_schedule: String,
    /// Cron expression (with seconds) for the weekly retention prune.
    #[serde(default = "default_prune_schedule")]
    pub prune_schedule: String,
    /// UTC offset ("+02:00") the cron schedules are evaluated in.
    #[serde(default = "default_utc_offset")]
    pub utc_offset: String,
    /// Optional S3 mirror; snapshots stay local-only without it.
    #[serde(default)]
    pub s3: Option<S3Config>,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            dir: default_backup_dir(),
            retention_days: default_retention_days(),
            nightly_schedule: default_nightly_schedule(),
            prune_schedule: default_prune_schedule(),
            utc_offset: default_utc_offset(),
            s3: None,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_backup_dir() -> PathBuf {
    PathBuf::from("backups")
}

fn default_retention_days() -> u32 {
    crate::backup::DEFAULT_RETENTION_DAYS
}

fn default_nightly_schedule() -> String {
    // 02:00 every night, in the configured offset.
    "0 0 2 * * *".to_string()
}

fn default_prune_schedule() -> String {
    // 02:30 on Sundays, in the configured offset.
    "0 30 2 * * Sun".to_string()
}

fn default_utc_offset() -> String {
    "+00:00".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    pub bucket: String,
    #[serde(default)]
    pub region: Option<String>,
    /// Custom endpoint for S3-compatible stores (MinIO etc.).
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_s3_prefix")]
    pub prefix: String,
}

fn default_s3_prefix() -> String {
    "visitdesk-backups".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    /// Audit log file, relative to the data directory unless absolute.
    #[serde(default = "default_audit_log")]
    pub audit_log: PathBuf,
    /// Failed logins per IP per hour before an escalation event fires.
    #[serde(default = "default_failed_login_threshold")]
    pub failed_login_threshold: u32,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            audit_log: default_audit_log(),
            failed_login_threshold: default_failed_login_threshold(),
        }
    }
}

fn default_audit_log() -> PathBuf {
    PathBuf::from("security-events.log")
}

fn default_failed_login_threshold() -> u32 {
    crate::security::DEFAULT_FAILED_LOGIN_THRESHOLD
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            info!("Loading configuration from {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            let config: Config =
                toml::from_str(&content).with_context(|| "Failed to parse configuration file")?;
            Ok(config)
        } else {
            info!("No config file found, using defaults");
            Ok(Config::default())
        }
    }

    /// Local snapshot directory, resolved against the data directory.
    pub fn backup_dir(&self) -> PathBuf {
        if self.backup.dir.is_absolute() {
            self.backup.dir.clone()
        } else {
            self.server.data_dir.join(&self.backup.dir)
        }
    }

    /// Timezone the backup schedules run in, parsed from `backup.utc_offset`.
    pub fn backup_timezone(&self) -> Result<chrono::FixedOffset> {
        self.backup
            .utc_offset
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid backup.utc_offset {:?}: {e}", self.backup.utc_offset))
    }

    /// Audit log path, resolved against the data directory.
    pub fn audit_log_path(&self) -> PathBuf {
        if self.security.audit_log.is_absolute() {
            self.security.audit_log.clone()
        } else {
            self.server.data_dir.join(&self.security.audit_log)
        }
    }
}
