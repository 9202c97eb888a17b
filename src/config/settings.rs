//! Adapter settings and the persisted application configuration

use super::ConfigError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

const UNIX_PORT_PATTERN: &str = r"^/[A-Za-z0-9/._-]+$";
const WINDOWS_PORT_PATTERN: &str = r"^COM\d+$";

/// Protocol timeouts and pacing delays, in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timings {
    /// Reply timeout of OK/FAIL and query commands
    pub command_timeout_ms: u64,
    /// Active scan period
    pub scan_timeout_ms: u64,
    /// Settle delay after the register writes
    pub settle_ms: u64,
    /// Upper bound of one PANA attempt
    pub join_timeout_ms: u64,
    /// Delay after a failed PANA attempt
    pub join_retry_ms: u64,
    /// UDP send confirmation timeout
    pub send_timeout_ms: u64,
    /// Wait for a reply with a matching transaction ID
    pub response_timeout_ms: u64,
    /// Pause after every exchange attempt
    pub pacing_ms: u64,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            command_timeout_ms: 5000,
            scan_timeout_ms: 18_200,
            settle_ms: 200,
            join_timeout_ms: 20_000,
            join_retry_ms: 1000,
            send_timeout_ms: 5000,
            response_timeout_ms: 10_000,
            pacing_ms: 1000,
        }
    }
}

impl Timings {
    /// Command reply timeout
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    /// Active scan period
    pub fn scan_timeout(&self) -> Duration {
        Duration::from_millis(self.scan_timeout_ms)
    }

    /// Register settle delay
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    /// PANA attempt timeout
    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    /// Delay between PANA attempts
    pub fn join_retry(&self) -> Duration {
        Duration::from_millis(self.join_retry_ms)
    }

    /// Send confirmation timeout
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    /// Reply correlation timeout
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    /// Device pacing delay
    pub fn pacing(&self) -> Duration {
        Duration::from_millis(self.pacing_ms)
    }
}

/// Check a serial port name: an absolute device path or `COM<n>`
pub fn validate_port(port: &str) -> Result<(), ConfigError> {
    let unix = !port.contains("..")
        && Regex::new(UNIX_PORT_PATTERN)
            .map(|re| re.is_match(port))
            .unwrap_or(false);
    let windows = Regex::new(WINDOWS_PORT_PATTERN)
        .map(|re| re.is_match(port))
        .unwrap_or(false);

    if unix || windows {
        Ok(())
    } else {
        Err(ConfigError::InvalidPort(port.to_string()))
    }
}

/// Normalize a Route-B ID: whitespace removed, upper-cased, 32 hex digits
pub fn normalize_id(id: &str) -> Result<String, ConfigError> {
    let id: String = id
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_uppercase();

    if id.len() == 32 && id.chars().all(|c| c.is_ascii_hexdigit()) {
        Ok(id)
    } else {
        Err(ConfigError::InvalidId)
    }
}

/// Check a Route-B password: non-empty, ASCII alphanumeric
pub fn validate_password(password: &str) -> Result<(), ConfigError> {
    if !password.is_empty() && password.chars().all(|c| c.is_ascii_alphanumeric()) {
        Ok(())
    } else {
        Err(ConfigError::InvalidPassword)
    }
}

/// Validated adapter configuration
#[derive(Clone)]
pub struct AdapterConfig {
    port: String,
    baud_rate: u32,
    id: String,
    password: String,
    timings: Timings,
}

impl AdapterConfig {
    /// Dongle default baud rate
    pub const DEFAULT_BAUD_RATE: u32 = 115_200;

    /// Validate the port name and Route-B credentials
    pub fn new(port: &str, id: &str, password: &str) -> Result<Self, ConfigError> {
        validate_port(port)?;
        let id = normalize_id(id)?;
        validate_password(password)?;

        Ok(Self {
            port: port.to_string(),
            baud_rate: Self::DEFAULT_BAUD_RATE,
            id,
            password: password.to_string(),
            timings: Timings::default(),
        })
    }

    /// Set baud rate
    #[must_use]
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    /// Set protocol timings
    #[must_use]
    pub fn with_timings(mut self, timings: Timings) -> Self {
        self.timings = timings;
        self
    }

    /// Serial port name
    pub fn port(&self) -> &str {
        &self.port
    }

    /// Baud rate
    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    /// Normalized Route-B ID
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Route-B password
    pub fn password(&self) -> &str {
        &self.password
    }

    /// Protocol timings
    pub fn timings(&self) -> &Timings {
        &self.timings
    }
}

impl fmt::Debug for AdapterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterConfig")
            .field("port", &self.port)
            .field("baud_rate", &self.baud_rate)
            .field("id", &format!("{}...", &self.id[..4]))
            .field("password", &"********")
            .field("timings", &self.timings)
            .finish()
    }
}

/// `[adapter]` section; every field may be overridden from the command line
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterSection {
    /// Serial port
    pub port: Option<String>,
    /// Baud rate
    pub baud_rate: Option<u32>,
    /// Route-B ID
    pub id: Option<String>,
    /// Route-B password
    pub password: Option<String>,
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    /// Human readable
    #[default]
    Text,
    /// One JSON object per event
    Json,
}

/// `[logging]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Directory for daily rolling log files
    pub directory: Option<PathBuf>,
    /// Log format
    pub format: LogOutput,
    /// Default filter when `RUST_LOG` is unset
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: None,
            format: LogOutput::Text,
            level: "info".to_string(),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Adapter settings
    pub adapter: AdapterSection,
    /// Timing overrides
    pub timing: Timings,
    /// Logging settings
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load config from the default location; a missing file yields defaults
    pub fn load() -> Result<Self, ConfigError> {
        let path = super::config_file().ok_or(ConfigError::NoConfigDir)?;
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from file
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&content)?)
    }

    /// Save config to file, creating parent directories
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        std::fs::write(path, content).map_err(io_err)
    }

    /// Save config to the default location
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = super::config_file().ok_or(ConfigError::NoConfigDir)?;
        self.save_to(&path)
    }

    /// Build a validated adapter configuration; explicit values win over the file
    pub fn adapter_config(
        &self,
        port: Option<&str>,
        id: Option<&str>,
        password: Option<&str>,
        baud_rate: Option<u32>,
    ) -> Result<AdapterConfig, ConfigError> {
        let port = port
            .or(self.adapter.port.as_deref())
            .ok_or(ConfigError::Missing("port"))?;
        let id = id
            .or(self.adapter.id.as_deref())
            .ok_or(ConfigError::Missing("id"))?;
        let password = password
            .or(self.adapter.password.as_deref())
            .ok_or(ConfigError::Missing("password"))?;
        let baud_rate = baud_rate
            .or(self.adapter.baud_rate)
            .unwrap_or(AdapterConfig::DEFAULT_BAUD_RATE);

        Ok(AdapterConfig::new(port, id, password)?
            .with_baud_rate(baud_rate)
            .with_timings(self.timing))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "0000 0039 0000 0000 0000 0000 0000 0ABC";

    #[test]
    fn test_port_validation() {
        assert!(validate_port("/dev/ttyUSB0").is_ok());
        assert!(validate_port("/dev/serial/by-id/usb-ROHM_BP35C2-if00").is_ok());
        assert!(validate_port("COM3").is_ok());
        assert!(validate_port("/dev/../etc/passwd").is_err());
        assert!(validate_port("ttyUSB0").is_err());
        assert!(validate_port("/dev/tty USB0").is_err());
        assert!(validate_port("COM").is_err());
    }

    #[test]
    fn test_id_normalization() {
        assert_eq!(normalize_id(ID).unwrap(), "00000039000000000000000000000ABC");
        assert_eq!(
            normalize_id("00000039000000000000000000000abc").unwrap(),
            "00000039000000000000000000000ABC"
        );
        assert!(matches!(normalize_id("0039"), Err(ConfigError::InvalidId)));
        assert!(normalize_id("00000039000000000000000000000ABG").is_err());
    }

    #[test]
    fn test_password_validation() {
        assert!(validate_password("ABCDEF123456").is_ok());
        assert!(matches!(validate_password(""), Err(ConfigError::InvalidPassword)));
        assert!(validate_password("abc-123").is_err());
    }

    #[test]
    fn test_adapter_config_debug_masks_password() {
        let config = AdapterConfig::new("/dev/ttyUSB0", ID, "SECRET123").unwrap();
        let debug = format!("{config:?}");
        assert!(!debug.contains("SECRET123"));
        assert_eq!(config.baud_rate(), 115_200);
        assert_eq!(config.timings().scan_timeout(), Duration::from_millis(18_200));
    }

    #[test]
    fn test_toml_round_trip_with_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("routeb").join("config.toml");

        let mut config = AppConfig::default();
        config.adapter.port = Some("/dev/ttyUSB0".into());
        config.adapter.id = Some(ID.into());
        config.adapter.password = Some("SECRET123".into());
        config.timing.pacing_ms = 250;
        config.logging.format = LogOutput::Json;
        config.save_to(&path).unwrap();

        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded.timing.pacing_ms, 250);
        assert_eq!(loaded.timing.scan_timeout_ms, 18_200);
        assert_eq!(loaded.logging.format, LogOutput::Json);

        let adapter = loaded
            .adapter_config(Some("COM4"), None, None, Some(9600))
            .unwrap();
        assert_eq!(adapter.port(), "COM4");
        assert_eq!(adapter.baud_rate(), 9600);
        assert_eq!(adapter.timings().pacing(), Duration::from_millis(250));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: AppConfig = toml::from_str("[timing]\nscan_timeout_ms = 500\n").unwrap();
        assert_eq!(config.timing.scan_timeout_ms, 500);
        assert_eq!(config.timing.join_timeout_ms, 20_000);
        assert!(matches!(
            config.adapter_config(None, None, None, None),
            Err(ConfigError::Missing("port"))
        ));
    }
}
