use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::warn;

use seven_link::LinkConfig;

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub device: DeviceCfg,
    #[serde(default)]
    pub link: LinkConfig,
    #[serde(default)]
    pub poll: PollCfg,
    #[serde(default)]
    pub gnss: GnssCfg,
    #[serde(default)]
    pub log: LogCfg,
}

/// Where the display unit's Bluetooth address comes from. A file wins
/// over the inline value so it can be rewritten while the daemon runs.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeviceCfg {
    pub address: Option<String>,
    pub address_file: Option<String>,
}

impl DeviceCfg {
    /// `None` when no address is configured or the file is unreadable or blank.
    pub fn resolve(&self) -> Option<String> {
        let Some(path) = &self.address_file else {
            return self.address.as_deref().and_then(normalize_address);
        };
        match std::fs::read_to_string(path) {
            Ok(s) => normalize_address(s.lines().next().unwrap_or("")),
            Err(e) => {
                warn!("device.address_file {}: {}", path, e);
                None
            }
        }
    }
}

fn normalize_address(s: &str) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_ascii_uppercase())
}

#[derive(Debug, Default, Deserialize)]
pub struct PollCfg {
    pub period_ms: Option<u64>,
}

impl PollCfg {
    pub fn period(&self) -> Duration {
        self.period_ms.map_or(seven_poll::DEFAULT_PERIOD, Duration::from_millis)
    }
}

#[derive(Debug, Deserialize)]
pub struct GnssCfg {
    /// "none", "nmea-serial" or "nmea-file".
    #[serde(default = "default_gnss_source")]
    pub source: String,
    pub nmea_device: Option<String>,
    pub nmea_file: Option<String>,
    #[serde(default = "default_gnss_baud")]
    pub baud: u32,
}

impl Default for GnssCfg {
    fn default() -> Self {
        Self {
            source: default_gnss_source(),
            nmea_device: None,
            nmea_file: None,
            baud: default_gnss_baud(),
        }
    }
}

fn default_gnss_source() -> String {
    "none".to_string()
}

fn default_gnss_baud() -> u32 {
    9600
}

#[derive(Debug, Default, Deserialize)]
pub struct LogCfg {
    /// Filter used when RUST_LOG is unset, e.g. "info" or "seven_link=debug".
    pub level: Option<String>,
}

pub fn load_config(path: &str) -> Result<Config> {
    let s = std::fs::read_to_string(path).with_context(|| format!("read config {}", path))?;
    toml::from_str(&s).context("parse config toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let cfg: Config = toml::from_str("").unwrap();
        assert_eq!(cfg.link.transport, "rfcomm");
        assert_eq!(cfg.poll.period(), Duration::from_millis(1000));
        assert_eq!(cfg.gnss.source, "none");
        assert_eq!(cfg.device.resolve(), None);
    }

    #[test]
    fn parses_sections() {
        let cfg: Config = toml::from_str(
            r#"
            [device]
            address = " 00:06:66:4a:1b:2c "

            [link]
            transport = "tcp"
            endpoint = "127.0.0.1:7070"
            io_timeout_ms = 800

            [poll]
            period_ms = 500

            [gnss]
            source = "nmea-file"
            nmea_file = "ride.nmea"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.device.resolve().as_deref(), Some("00:06:66:4A:1B:2C"));
        assert_eq!(cfg.link.endpoint.as_deref(), Some("127.0.0.1:7070"));
        assert_eq!(cfg.link.io_timeout(), Duration::from_millis(800));
        assert_eq!(cfg.poll.period(), Duration::from_millis(500));
        assert_eq!(cfg.gnss.baud, 9600);
    }

    #[test]
    fn address_file_first_line_wins() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("seven-addr-{}", std::process::id()));
        std::fs::write(&path, "  00:06:66:aa:bb:cc\nignored\n").unwrap();

        let dev = DeviceCfg {
            address: Some("11:11:11:11:11:11".into()),
            address_file: Some(path.to_string_lossy().into_owned()),
        };
        assert_eq!(dev.resolve().as_deref(), Some("00:06:66:AA:BB:CC"));

        std::fs::write(&path, "\n").unwrap();
        assert_eq!(dev.resolve(), None);

        std::fs::remove_file(&path).unwrap();
        assert_eq!(dev.resolve(), None);
    }
}
