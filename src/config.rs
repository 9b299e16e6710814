//! Configuration management for dae-emu.
//!
//! Configuration is loaded from multiple sources in priority order:
//! 1. Environment variables (`DAE_NUM_CORES`, `DAE_PARTITION_SIZE`, ...)
//! 2. Project-local config file (`./dae-emu.toml`)
//! 3. User config file (`~/.config/dae-emu/config.toml`)
//! 4. Built-in defaults
//!
//! # Config File Format
//!
//! ```toml
//! # dae-emu.toml
//! num_cores = 4
//! partition_size = 16384
//! cmd_queue_size = 16
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::controller::ArbiterPolicy;
use crate::device::dae_spec::{CMD_QUEUE_SIZE, DEFAULT_PARTITION_SIZE, MAX_CORES, MAX_PARTITION_SIZE, MAX_WAIT, VP_LEN};

/// Global cached configuration.
static CONFIG: OnceLock<EngineConfig> = OnceLock::new();

/// Engine configuration. Unset fields fall back to the architecture defaults.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// Cores sharing the partitioned scratchpad.
    pub num_cores: Option<usize>,

    /// Bytes of scratchpad per core.
    pub partition_size: Option<u64>,

    /// Bound on each command queue.
    pub cmd_queue_size: Option<usize>,

    /// Vector port FIFO capacity in words.
    pub port_fifo_len: Option<usize>,

    /// Cycles without progress before the engine counts as stuck.
    pub max_wait: Option<u64>,

    /// Cycles a memory load takes to return.
    pub mem_latency: Option<u64>,

    /// Stream arbitration policy: `round_robin` or `fixed`.
    pub arbiter: Option<ArbiterPolicy>,
}

impl EngineConfig {
    /// Load configuration from all sources.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables
    /// 2. Project-local `dae-emu.toml`
    /// 3. User config `~/.config/dae-emu/config.toml`
    /// 4. Defaults
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(user_config) = Self::load_user_config() {
            config.merge(user_config);
        }

        if let Some(local_config) = Self::load_local_config() {
            config.merge(local_config);
        }

        config.apply_env_overrides();

        config
    }

    /// Get the cached global configuration.
    ///
    /// Loads configuration on first call and caches it.
    pub fn get() -> &'static EngineConfig {
        CONFIG.get_or_init(|| {
            let config = Self::load();
            log::debug!("Loaded configuration: {:?}", config);
            config
        })
    }

    /// Parse a TOML document.
    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn num_cores(&self) -> usize {
        self.num_cores.unwrap_or(1).clamp(1, MAX_CORES)
    }

    /// Partition size, limited to what a 16-bit remote address reaches.
    pub fn partition_size(&self) -> u64 {
        self.partition_size
            .unwrap_or(DEFAULT_PARTITION_SIZE)
            .clamp(1, MAX_PARTITION_SIZE)
    }

    pub fn cmd_queue_size(&self) -> usize {
        self.cmd_queue_size.unwrap_or(CMD_QUEUE_SIZE).max(1)
    }

    pub fn port_fifo_len(&self) -> usize {
        self.port_fifo_len.unwrap_or(VP_LEN).max(1)
    }

    pub fn max_wait(&self) -> u64 {
        self.max_wait.unwrap_or(MAX_WAIT)
    }

    pub fn mem_latency(&self) -> u64 {
        self.mem_latency.unwrap_or(0)
    }

    pub fn arbiter(&self) -> ArbiterPolicy {
        self.arbiter.unwrap_or_default()
    }

    /// Load user configuration from ~/.config/dae-emu/config.toml
    fn load_user_config() -> Option<Self> {
        Self::load_from_file(&Self::user_config_path()?)
    }

    /// Load project-local configuration from ./dae-emu.toml
    fn load_local_config() -> Option<Self> {
        let local_path = Path::new("dae-emu.toml");
        if let Some(config) = Self::load_from_file(local_path) {
            return Some(config);
        }

        if let Ok(manifest_dir) = std::env::var("CARGO_MANIFEST_DIR") {
            let project_path = Path::new(&manifest_dir).join("dae-emu.toml");
            if let Some(config) = Self::load_from_file(&project_path) {
                return Some(config);
            }
        }

        None
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match std::fs::read_to_string(path) {
            Ok(content) => match Self::from_toml(&content) {
                Ok(config) => {
                    log::info!("Loaded config from {}", path.display());
                    Some(config)
                }
                Err(e) => {
                    log::warn!("Failed to parse {}: {}", path.display(), e);
                    None
                }
            },
            Err(e) => {
                log::warn!("Failed to read {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Merge another config into this one.
    /// Only overrides fields that are Some in the other config.
    pub fn merge(&mut self, other: Self) {
        if other.num_cores.is_some() {
            self.num_cores = other.num_cores;
        }
        if other.partition_size.is_some() {
            self.partition_size = other.partition_size;
        }
        if other.cmd_queue_size.is_some() {
            self.cmd_queue_size = other.cmd_queue_size;
        }
        if other.port_fifo_len.is_some() {
            self.port_fifo_len = other.port_fifo_len;
        }
        if other.max_wait.is_some() {
            self.max_wait = other.max_wait;
        }
        if other.mem_latency.is_some() {
            self.mem_latency = other.mem_latency;
        }
        if other.arbiter.is_some() {
            self.arbiter = other.arbiter;
        }
    }

    /// Apply environment variable overrides.
    fn apply_env_overrides(&mut self) {
        fn env_value<T: std::str::FromStr>(name: &str) -> Option<T> {
            let raw = std::env::var(name).ok()?;
            match raw.parse() {
                Ok(value) => {
                    log::info!("Using {} from environment: {}", name, raw);
                    Some(value)
                }
                Err(_) => {
                    log::warn!("Ignoring {}={}: not a valid value", name, raw);
                    None
                }
            }
        }

        self.merge(Self {
            num_cores: env_value("DAE_NUM_CORES"),
            partition_size: env_value("DAE_PARTITION_SIZE"),
            cmd_queue_size: env_value("DAE_CMD_QUEUE_SIZE"),
            port_fifo_len: env_value("DAE_PORT_FIFO_LEN"),
            max_wait: env_value("DAE_MAX_WAIT"),
            mem_latency: env_value("DAE_MEM_LATENCY"),
            arbiter: env_value("DAE_ARBITER"),
        });
    }

    /// Get the path to the user config file (for display/creation).
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("dae-emu").join("config.toml"))
    }

    /// Generate a sample config file content.
    pub fn sample_config() -> String {
        r#"# dae-emu configuration
# Place this file at ~/.config/dae-emu/config.toml or ./dae-emu.toml

# Cores sharing the partitioned scratchpad (1..=64)
num_cores = 4

# Bytes of scratchpad owned by each core (at most 65536)
partition_size = 16384

# Entries each command queue accepts before can_add_* reports false
cmd_queue_size = 16

# Vector port FIFO depth in 64-bit words
# port_fifo_len = 64

# Cycles without forward progress before the engine reports being stuck
# max_wait = 1000

# Cycles before a memory load returns
# mem_latency = 0

# Stream arbitration: "round_robin" or "fixed" (lowest slot first)
# arbiter = "round_robin"
"#
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.num_cores(), 1);
        assert_eq!(config.partition_size(), DEFAULT_PARTITION_SIZE);
        assert_eq!(config.cmd_queue_size(), CMD_QUEUE_SIZE);
        assert_eq!(config.port_fifo_len(), VP_LEN);
        assert_eq!(config.max_wait(), MAX_WAIT);
        assert_eq!(config.mem_latency(), 0);
        assert_eq!(config.arbiter(), ArbiterPolicy::RoundRobin);
    }

    #[test]
    fn test_arbiter_from_toml() {
        let config = EngineConfig::from_toml("arbiter = \"fixed\"").unwrap();
        assert_eq!(config.arbiter(), ArbiterPolicy::Fixed);
        assert_eq!("round_robin".parse::<ArbiterPolicy>(), Ok(ArbiterPolicy::RoundRobin));
        assert!("lottery".parse::<ArbiterPolicy>().is_err());
    }

    #[test]
    fn test_config_merge() {
        let mut base = EngineConfig {
            num_cores: Some(2),
            cmd_queue_size: Some(8),
            ..Default::default()
        };

        let overlay = EngineConfig {
            num_cores: None,
            partition_size: Some(4096),
            cmd_queue_size: Some(4),
            ..Default::default()
        };

        base.merge(overlay);

        assert_eq!(base.num_cores, Some(2));
        assert_eq!(base.partition_size, Some(4096));
        assert_eq!(base.cmd_queue_size, Some(4));
    }

    #[test]
    fn test_limits_clamped() {
        let config = EngineConfig {
            num_cores: Some(500),
            partition_size: Some(1 << 20),
            ..Default::default()
        };
        assert_eq!(config.num_cores(), MAX_CORES);
        assert_eq!(config.partition_size(), MAX_PARTITION_SIZE);
    }

    #[test]
    fn test_sample_config_parses() {
        let config = EngineConfig::from_toml(&EngineConfig::sample_config()).unwrap();
        assert_eq!(config.num_cores, Some(4));
        assert_eq!(config.partition_size, Some(16384));
        assert_eq!(config.max_wait, None);
    }
}
