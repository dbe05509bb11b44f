use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use serde::Deserialize;
use anyhow::{bail, Context, Result};
use shared::protocol::{DEFAULT_API_LISTEN, GAME_PORT};
use crate::decode::lookup;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub decoder: DecoderConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveryConfig {
    /// Local UDP endpoint; game servers answer to the probe's source port
    #[serde(default = "default_discovery_listen")]
    pub listen: SocketAddr,
    #[serde(default = "default_broadcast")]
    pub broadcast: SocketAddr,
    /// Probe payload, hex encoded
    #[serde(default = "default_probe_hex")]
    pub probe_hex: String,
    /// Overall collection window
    #[serde(default = "default_max_receiving_time")]
    pub max_receiving_time_ms: u64,
    /// Per-receive timeout, must be smaller than the collection window
    #[serde(default = "default_receive_timeout")]
    pub receive_timeout_ms: u64,
    #[serde(default = "default_recv_buffer_size")]
    pub recv_buffer_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DecoderConfig {
    /// The server name always begins at this index of a reply
    #[serde(default = "default_name_offset")]
    pub name_offset: usize,
    #[serde(default = "default_min_reply_len")]
    pub min_reply_len: usize,
    #[serde(default = "lookup::default_modes")]
    pub modes: Vec<ModeEntry>,
    /// Scanned in order, first match wins
    #[serde(default = "lookup::default_levels")]
    pub levels: Vec<LevelEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ModeEntry {
    pub id: u8,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LevelEntry {
    pub name: String,
    /// Bytes >= 0x80 of a reply read as '?', so signatures use '?' for them
    pub signature: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_ttl")]
    pub ttl_ms: u64,
    /// A loading flag older than this is considered abandoned.
    /// Unset means only `ResetIsLoading` clears a wedged flag.
    #[serde(default)]
    pub loading_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_listen")]
    pub listen: String,
}

fn default_discovery_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], GAME_PORT))
}

fn default_broadcast() -> SocketAddr {
    SocketAddr::from(([255, 255, 255, 255], GAME_PORT))
}

fn default_probe_hex() -> String {
    "0A00000A23A4C14D8B21450013769A0EA1B3980EA1B398".to_string()
}

fn default_max_receiving_time() -> u64 {
    2000
}

fn default_receive_timeout() -> u64 {
    250
}

fn default_recv_buffer_size() -> usize {
    2048
}

fn default_name_offset() -> usize {
    27
}

fn default_min_reply_len() -> usize {
    40
}

fn default_ttl() -> u64 {
    30_000
}

fn default_api_listen() -> String {
    DEFAULT_API_LISTEN.to_string()
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            listen: default_discovery_listen(),
            broadcast: default_broadcast(),
            probe_hex: default_probe_hex(),
            max_receiving_time_ms: default_max_receiving_time(),
            receive_timeout_ms: default_receive_timeout(),
            recv_buffer_size: default_recv_buffer_size(),
        }
    }
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            name_offset: default_name_offset(),
            min_reply_len: default_min_reply_len(),
            modes: lookup::default_modes(),
            levels: lookup::default_levels(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_ms: default_ttl(),
            loading_timeout_ms: None,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: default_api_listen(),
        }
    }
}

impl DiscoveryConfig {
    /// Decode the hex probe payload
    pub fn probe(&self) -> Result<Vec<u8>> {
        let probe = hex::decode(self.probe_hex.trim())
            .with_context(|| format!("Invalid probe_hex: {}", self.probe_hex))?;
        if probe.is_empty() {
            bail!("probe_hex must not be empty");
        }
        Ok(probe)
    }

    pub fn max_receiving_time(&self) -> Duration {
        Duration::from_millis(self.max_receiving_time_ms)
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    pub fn loading_timeout(&self) -> Option<Duration> {
        self.loading_timeout_ms.map(Duration::from_millis)
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", path.display()))?;

        Ok(config)
    }

    /// Reject settings the collector or decoder cannot work with
    pub fn validate(&self) -> Result<()> {
        let discovery = &self.discovery;
        discovery.probe()?;

        if discovery.receive_timeout_ms == 0 {
            bail!("discovery.receive_timeout_ms must be greater than zero");
        }
        if discovery.receive_timeout_ms >= discovery.max_receiving_time_ms {
            bail!(
                "discovery.receive_timeout_ms ({}) must be smaller than max_receiving_time_ms ({})",
                discovery.receive_timeout_ms,
                discovery.max_receiving_time_ms
            );
        }
        if discovery.recv_buffer_size < self.decoder.min_reply_len {
            bail!("discovery.recv_buffer_size is smaller than decoder.min_reply_len");
        }

        let decoder = &self.decoder;
        if decoder.min_reply_len <= decoder.name_offset {
            bail!(
                "decoder.min_reply_len ({}) must exceed name_offset ({})",
                decoder.min_reply_len,
                decoder.name_offset
            );
        }

        let mut ids = HashSet::new();
        for mode in &decoder.modes {
            if !ids.insert(mode.id) {
                bail!("Duplicate mode id {:#04x} ({})", mode.id, mode.name);
            }
        }

        for level in &decoder.levels {
            if level.signature.is_empty() {
                bail!("Level {} has an empty signature", level.name);
            }
            if !level.signature.is_ascii() {
                bail!("Level {} signature must be ASCII", level.name);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();

        assert_eq!(config.discovery.listen.port(), 2360);
        assert_eq!(config.discovery.probe().unwrap().len(), 23);
        assert_eq!(config.decoder.modes.len(), 7);
        assert_eq!(config.decoder.levels.len(), 13);
        assert_eq!(config.cache.ttl(), Duration::from_secs(30));
        assert_eq!(config.cache.loading_timeout(), None);
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.discovery.max_receiving_time_ms, 2000);
        assert_eq!(config.discovery.receive_timeout_ms, 250);
        assert_eq!(config.decoder.name_offset, 27);
        assert_eq!(config.api.listen, "0.0.0.0:8080");
    }

    #[test]
    fn test_load_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
            [discovery]
            listen = "127.0.0.1:4000"
            max_receiving_time_ms = 500
            receive_timeout_ms = 50

            [cache]
            ttl_ms = 1000
            loading_timeout_ms = 10000

            [[decoder.modes]]
            id = 120
            name = "tdm"

            [[decoder.levels]]
            name = "shire"
            signature = "\u000f?%?X?c?"
            "#
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.discovery.listen, "127.0.0.1:4000".parse().unwrap());
        assert_eq!(config.discovery.max_receiving_time(), Duration::from_millis(500));
        assert_eq!(config.cache.loading_timeout(), Some(Duration::from_secs(10)));
        assert_eq!(config.decoder.modes, vec![ModeEntry { id: 120, name: "tdm".into() }]);
        assert_eq!(config.decoder.levels[0].signature.as_bytes(), b"\x0f?%?X?c?");
    }

    #[test]
    fn test_receive_timeout_must_be_below_window() {
        let mut config = Config::default();
        config.discovery.receive_timeout_ms = 2000;
        assert!(config.validate().is_err());

        config.discovery.receive_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_probe_rejected() {
        let mut config = Config::default();
        config.discovery.probe_hex = "0A0".to_string();
        assert!(config.validate().is_err());

        config.discovery.probe_hex = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_mode_rejected() {
        let mut config = Config::default();
        config.decoder.modes.push(ModeEntry { id: b'x', name: "again".into() });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file_fails() {
        assert!(Config::load("/nonexistent/serverlistd.toml").is_err());
    }
}
