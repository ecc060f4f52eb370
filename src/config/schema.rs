use anyhow::{Context, Result};
use directories::UserDirs;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

// ── Top-level config ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to config.toml - computed from home, not serialized
    #[serde(skip)]
    pub config_path: PathBuf,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub debug: bool,

    #[serde(default)]
    pub mode: Mode,

    /// Directory holding `.tmp/` and `media/`. Defaults to the current directory at start.
    #[serde(default)]
    pub workspace_dir: Option<PathBuf>,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub media: MediaConfig,

    #[serde(default)]
    pub reliability: ReliabilityConfig,

    #[serde(default)]
    pub polls: PollsConfig,

    #[serde(default)]
    pub transport: TransportConfig,
}

fn default_log_level() -> String {
    "info".into()
}

/// Which surfaces are active.
///
/// `none` only keeps the session alive for stdin commands, `send` adds the
/// HTTP control plane, and `both` also normalizes and delivers inbound messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    None,
    Send,
    Both,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Send => "send",
            Self::Both => "both",
        }
    }

    /// Control plane and HTTP-driven commands are enabled.
    pub fn serves_commands(self) -> bool {
        matches!(self, Self::Send | Self::Both)
    }

    /// Inbound messages are normalized and delivered.
    pub fn delivers_messages(self) -> bool {
        self == Self::Both
    }
}

impl std::str::FromStr for Mode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "" => Ok(Self::None),
            "send" => Ok(Self::Send),
            "both" => Ok(Self::Both),
            other => anyhow::bail!("unknown mode {other:?} (expected none, send or both)"),
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Database ─────────────────────────────────────────────────────

/// Credential store used by the transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_dialect")]
    pub dialect: String,
    #[serde(default = "default_db_address")]
    pub address: String,
}

fn default_db_dialect() -> String {
    "sqlite3".into()
}

fn default_db_address() -> String {
    "file:waclaw.db?_foreign_keys=on".into()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            dialect: default_db_dialect(),
            address: default_db_address(),
        }
    }
}

impl DatabaseConfig {
    /// Filesystem path of a `file:` address, without URI query parameters.
    pub fn file_path(&self) -> &str {
        let address = self.address.strip_prefix("file:").unwrap_or(&self.address);
        address.split('?').next().unwrap_or(address)
    }
}

// ── Sync ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Ask the phone for the full history on first pairing.
    #[serde(default)]
    pub request_full_sync: bool,
}

// ── Gateway (control plane) ──────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Gateway host (default: 127.0.0.1)
    #[serde(default = "default_gateway_host")]
    pub host: String,
    /// Gateway port (default: 7774). Also the delivery port.
    #[serde(default = "default_gateway_port")]
    pub port: u16,
}

fn default_gateway_port() -> u16 {
    7774
}

fn default_gateway_host() -> String {
    "127.0.0.1".into()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_gateway_host(),
            port: default_gateway_port(),
        }
    }
}

// ── Media ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    /// Download inbound media and deliver it as `*_message` records.
    #[serde(default)]
    pub save_media: bool,
    /// Remove produced files some time after the record was handed off.
    #[serde(default)]
    pub auto_delete: bool,
    #[serde(default = "default_auto_delete_secs")]
    pub auto_delete_secs: u64,
}

fn default_auto_delete_secs() -> u64 {
    30
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            save_media: false,
            auto_delete: false,
            auto_delete_secs: default_auto_delete_secs(),
        }
    }
}

// ── Reliability ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReliabilityConfig {
    /// Pause between reconnect attempts.
    #[serde(default = "default_reconnect_backoff_secs")]
    pub reconnect_backoff_secs: u64,
    /// How long an operator has to reject a device-link request.
    #[serde(default = "default_pair_timeout_secs")]
    pub pair_timeout_secs: u64,
    /// Delay between acknowledging `stop`/`restart` and acting on it.
    #[serde(default = "default_command_grace_millis")]
    pub command_grace_millis: u64,
    #[serde(default = "default_delivery_timeout_millis")]
    pub delivery_timeout_millis: u64,
}

fn default_reconnect_backoff_secs() -> u64 {
    2
}

fn default_pair_timeout_secs() -> u64 {
    3
}

fn default_command_grace_millis() -> u64 {
    1000
}

fn default_delivery_timeout_millis() -> u64 {
    1000
}

impl Default for ReliabilityConfig {
    fn default() -> Self {
        Self {
            reconnect_backoff_secs: default_reconnect_backoff_secs(),
            pair_timeout_secs: default_pair_timeout_secs(),
            command_grace_millis: default_command_grace_millis(),
            delivery_timeout_millis: default_delivery_timeout_millis(),
        }
    }
}

// ── Polls ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollsConfig {
    #[serde(default = "default_poll_capacity")]
    pub capacity: usize,
    #[serde(default = "default_poll_ttl_secs")]
    pub ttl_secs: u64,
    /// Mirror records to `.tmp/` for external inspection.
    #[serde(default = "default_true")]
    pub mirror_to_disk: bool,
}

fn default_poll_capacity() -> usize {
    1024
}

fn default_poll_ttl_secs() -> u64 {
    7 * 24 * 60 * 60
}

fn default_true() -> bool {
    true
}

impl Default for PollsConfig {
    fn default() -> Self {
        Self {
            capacity: default_poll_capacity(),
            ttl_secs: default_poll_ttl_secs(),
            mirror_to_disk: true,
        }
    }
}

// ── Transport ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Phone number for pair-code linking (optional)
    #[serde(default)]
    pub pair_phone: Option<String>,
    /// WebSocket endpoint override
    #[serde(default)]
    pub ws_url: Option<String>,
    /// Name announced once the session is available
    #[serde(default = "default_display_name")]
    pub display_name: String,
}

fn default_display_name() -> String {
    "waclaw".into()
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            pair_phone: None,
            ws_url: None,
            display_name: default_display_name(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let home =
            UserDirs::new().map_or_else(|| PathBuf::from("."), |u| u.home_dir().to_path_buf());
        let waclaw_dir = home.join(".waclaw");

        Self {
            config_path: waclaw_dir.join("config.toml"),
            log_level: default_log_level(),
            debug: false,
            mode: Mode::default(),
            workspace_dir: None,
            database: DatabaseConfig::default(),
            sync: SyncConfig::default(),
            gateway: GatewayConfig::default(),
            media: MediaConfig::default(),
            reliability: ReliabilityConfig::default(),
            polls: PollsConfig::default(),
            transport: TransportConfig::default(),
        }
    }
}

impl Config {
    pub fn load_or_init() -> Result<Self> {
        let home = UserDirs::new()
            .map(|u| u.home_dir().to_path_buf())
            .context("Could not find home directory")?;
        let mut config = Self::load_or_init_at(&home.join(".waclaw").join("config.toml"))?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load `config_path`, writing defaults there first if it does not exist.
    /// Environment overrides are not applied.
    pub fn load_or_init_at(config_path: &Path) -> Result<Self> {
        if config_path.exists() {
            let contents =
                fs::read_to_string(config_path).context("Failed to read config file")?;
            let mut config: Config =
                toml::from_str(&contents).context("Failed to parse config file")?;
            // Set computed paths that are skipped during serialization
            config.config_path = config_path.to_path_buf();
            Ok(config)
        } else {
            let config = Config {
                config_path: config_path.to_path_buf(),
                ..Config::default()
            };
            config.save()?;
            Ok(config)
        }
    }

    /// Directory that holds config.toml and daemon_state.json.
    pub fn config_dir(&self) -> PathBuf {
        self.config_path
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
    }

    /// Effective working directory for media and poll files.
    pub fn workspace(&self) -> PathBuf {
        self.workspace_dir.clone().unwrap_or_else(|| {
            std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
        })
    }

    /// Apply environment variable overrides to config
    pub fn apply_env_overrides(&mut self) {
        self.apply_env_overrides_from(|key| std::env::var(key).ok());
    }

    /// Same as [`Config::apply_env_overrides`] with an injectable lookup.
    pub fn apply_env_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.is_empty());

        // Mode: WACLAW_MODE
        if let Some(mode) = non_empty("WACLAW_MODE") {
            match mode.parse() {
                Ok(mode) => self.mode = mode,
                Err(e) => tracing::warn!("Ignoring WACLAW_MODE: {e}"),
            }
        }

        // Port: WACLAW_PORT or PORT
        if let Some(port_str) = non_empty("WACLAW_PORT").or_else(|| non_empty("PORT")) {
            if let Ok(port) = port_str.parse::<u16>() {
                self.gateway.port = port;
            }
        }

        // Log level: WACLAW_LOG_LEVEL
        if let Some(level) = non_empty("WACLAW_LOG_LEVEL") {
            self.log_level = level;
        }

        // Workspace directory: WACLAW_WORKSPACE
        if let Some(workspace) = non_empty("WACLAW_WORKSPACE") {
            self.workspace_dir = Some(PathBuf::from(workspace));
        }

        // Credential store: WACLAW_DB_ADDRESS
        if let Some(address) = non_empty("WACLAW_DB_ADDRESS") {
            self.database.address = address;
        }
    }

    pub fn save(&self) -> Result<()> {
        let toml_str = toml::to_string_pretty(self).context("Failed to serialize config")?;

        let parent_dir = self
            .config_path
            .parent()
            .context("Config path must have a parent directory")?;
        fs::create_dir_all(parent_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                parent_dir.display()
            )
        })?;

        let file_name = self
            .config_path
            .file_name()
            .and_then(|v| v.to_str())
            .unwrap_or("config.toml");
        let temp_path = parent_dir.join(format!(".{file_name}.tmp-{}", uuid::Uuid::new_v4()));

        let mut temp_file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .with_context(|| {
                format!(
                    "Failed to create temporary config file: {}",
                    temp_path.display()
                )
            })?;
        temp_file
            .write_all(toml_str.as_bytes())
            .context("Failed to write temporary config contents")?;
        temp_file
            .sync_all()
            .context("Failed to fsync temporary config file")?;
        drop(temp_file);

        if let Err(e) = fs::rename(&temp_path, &self.config_path) {
            let _ = fs::remove_file(&temp_path);
            anyhow::bail!("Failed to atomically replace config file: {e}");
        }

        sync_directory(parent_dir)
    }
}

#[cfg(unix)]
fn sync_directory(path: &Path) -> Result<()> {
    let dir = File::open(path)
        .with_context(|| format!("Failed to open directory for fsync: {}", path.display()))?;
    dir.sync_all()
        .with_context(|| format!("Failed to fsync directory metadata: {}", path.display()))?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_directory(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    // ── Defaults ─────────────────────────────────────────────

    #[test]
    fn config_default_has_sane_values() {
        let c = Config::default();
        assert_eq!(c.log_level, "info");
        assert_eq!(c.mode, Mode::None);
        assert_eq!(c.gateway.host, "127.0.0.1");
        assert_eq!(c.gateway.port, 7774);
        assert_eq!(c.database.dialect, "sqlite3");
        assert_eq!(c.database.address, "file:waclaw.db?_foreign_keys=on");
        assert!(!c.media.save_media);
        assert_eq!(c.media.auto_delete_secs, 30);
        assert!(c.config_path.to_string_lossy().contains("config.toml"));
    }

    #[test]
    fn reliability_config_default() {
        let r = ReliabilityConfig::default();
        assert_eq!(r.reconnect_backoff_secs, 2);
        assert_eq!(r.pair_timeout_secs, 3);
        assert_eq!(r.command_grace_millis, 1000);
        assert_eq!(r.delivery_timeout_millis, 1000);
    }

    #[test]
    fn polls_config_default() {
        let p = PollsConfig::default();
        assert_eq!(p.capacity, 1024);
        assert_eq!(p.ttl_secs, 604_800);
        assert!(p.mirror_to_disk);
    }

    #[test]
    fn mode_parses_and_gates_surfaces() {
        assert_eq!("BOTH".parse::<Mode>().unwrap(), Mode::Both);
        assert_eq!("send".parse::<Mode>().unwrap(), Mode::Send);
        assert_eq!("".parse::<Mode>().unwrap(), Mode::None);
        assert!("receive".parse::<Mode>().is_err());

        assert!(!Mode::None.serves_commands());
        assert!(Mode::Send.serves_commands());
        assert!(!Mode::Send.delivers_messages());
        assert!(Mode::Both.delivers_messages());
    }

    #[test]
    fn database_file_path_strips_uri_parts() {
        let db = DatabaseConfig::default();
        assert_eq!(db.file_path(), "waclaw.db");

        let plain = DatabaseConfig {
            address: "/var/lib/waclaw/session.db".into(),
            ..DatabaseConfig::default()
        };
        assert_eq!(plain.file_path(), "/var/lib/waclaw/session.db");
    }

    // ── Serde ────────────────────────────────────────────────

    #[test]
    fn partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
mode = "both"

[gateway]
port = 9000

[media]
save_media = true
"#,
        )
        .unwrap();
        assert_eq!(config.mode, Mode::Both);
        assert_eq!(config.gateway.port, 9000);
        assert_eq!(config.gateway.host, "127.0.0.1");
        assert!(config.media.save_media);
        assert_eq!(config.media.auto_delete_secs, 30);
        assert_eq!(config.reliability.pair_timeout_secs, 3);
    }

    #[test]
    fn load_or_init_writes_defaults_then_reads_them_back() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("config.toml");

        let created = Config::load_or_init_at(&path).unwrap();
        assert!(path.exists());
        assert_eq!(created.config_path, path);

        let mut edited = created.clone();
        edited.mode = Mode::Send;
        edited.save().unwrap();

        let loaded = Config::load_or_init_at(&path).unwrap();
        assert_eq!(loaded.mode, Mode::Send);
        assert_eq!(loaded.gateway.port, 7774);
        assert_eq!(loaded.config_dir(), tmp.path().join("nested"));
    }

    #[test]
    fn save_leaves_no_temp_files_behind() {
        let tmp = TempDir::new().unwrap();
        let config = Config {
            config_path: tmp.path().join("config.toml"),
            ..Config::default()
        };
        config.save().unwrap();
        config.save().unwrap();

        let names: Vec<_> = fs::read_dir(tmp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["config.toml".to_string()]);
    }

    // ── Env overrides ────────────────────────────────────────

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = Config::default();
        config.apply_env_overrides_from(env(&[
            ("WACLAW_MODE", "both"),
            ("WACLAW_PORT", "8123"),
            ("WACLAW_LOG_LEVEL", "debug"),
            ("WACLAW_WORKSPACE", "/srv/waclaw"),
            ("WACLAW_DB_ADDRESS", "file:/srv/waclaw/store.db"),
        ]));
        assert_eq!(config.mode, Mode::Both);
        assert_eq!(config.gateway.port, 8123);
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.workspace(), PathBuf::from("/srv/waclaw"));
        assert_eq!(config.database.file_path(), "/srv/waclaw/store.db");
    }

    #[test]
    fn generic_port_is_a_fallback() {
        let mut config = Config::default();
        config.apply_env_overrides_from(env(&[("PORT", "9999")]));
        assert_eq!(config.gateway.port, 9999);

        let mut config = Config::default();
        config.apply_env_overrides_from(env(&[("PORT", "9999"), ("WACLAW_PORT", "7000")]));
        assert_eq!(config.gateway.port, 7000);
    }

    #[test]
    fn invalid_env_values_are_ignored() {
        let mut config = Config::default();
        config.apply_env_overrides_from(env(&[
            ("WACLAW_MODE", "everything"),
            ("WACLAW_PORT", "not-a-port"),
            ("WACLAW_LOG_LEVEL", ""),
        ]));
        assert_eq!(config.mode, Mode::None);
        assert_eq!(config.gateway.port, 7774);
        assert_eq!(config.log_level, "info");
    }
}
