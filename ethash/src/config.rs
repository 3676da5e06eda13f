//! Engine configuration as read from the node's TOML file.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Configured proof-of-work mode.
///
/// Parsing never fails: a value that names no known mode is kept verbatim in
/// [`PowMode::Other`] and is treated like [`PowMode::Normal`] by the engine
/// selector.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PowMode {
    #[default]
    Normal,
    Shared,
    Test,
    Fake,
    Other(String),
}

impl PowMode {
    pub fn as_str(&self) -> &str {
        match self {
            PowMode::Normal => "normal",
            PowMode::Shared => "shared",
            PowMode::Test => "test",
            PowMode::Fake => "fake",
            PowMode::Other(s) => s,
        }
    }
}

impl From<&str> for PowMode {
    fn from(s: &str) -> Self {
        match s {
            "normal" => PowMode::Normal,
            "shared" => PowMode::Shared,
            "test" => PowMode::Test,
            "fake" => PowMode::Fake,
            other => PowMode::Other(other.to_string()),
        }
    }
}

impl From<String> for PowMode {
    fn from(s: String) -> Self {
        PowMode::from(s.as_str())
    }
}

impl From<PowMode> for String {
    fn from(mode: PowMode) -> Self {
        mode.as_str().to_string()
    }
}

impl fmt::Display for PowMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Proof-of-work engine settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EthashConfig {
    #[serde(default)]
    pub pow_mode: PowMode,

    /// Directory for persisted epoch caches, relative to the data directory.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    #[serde(default = "default_caches_in_mem")]
    pub caches_in_mem: usize,

    #[serde(default = "default_caches_on_disk")]
    pub caches_on_disk: usize,

    #[serde(default = "default_dataset_dir")]
    pub dataset_dir: PathBuf,

    #[serde(default = "default_datasets_in_mem")]
    pub datasets_in_mem: usize,

    #[serde(default = "default_datasets_on_disk")]
    pub datasets_on_disk: usize,
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("ethash")
}

fn default_caches_in_mem() -> usize {
    2
}

fn default_caches_on_disk() -> usize {
    3
}

fn default_dataset_dir() -> PathBuf {
    PathBuf::from(".ethash")
}

fn default_datasets_in_mem() -> usize {
    1
}

fn default_datasets_on_disk() -> usize {
    2
}

impl Default for EthashConfig {
    fn default() -> Self {
        Self {
            pow_mode: PowMode::default(),
            cache_dir: default_cache_dir(),
            caches_in_mem: default_caches_in_mem(),
            caches_on_disk: default_caches_on_disk(),
            dataset_dir: default_dataset_dir(),
            datasets_in_mem: default_datasets_in_mem(),
            datasets_on_disk: default_datasets_on_disk(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_modes_parse() {
        assert_eq!(PowMode::from("fake"), PowMode::Fake);
        assert_eq!(PowMode::from("test"), PowMode::Test);
        assert_eq!(PowMode::from("shared"), PowMode::Shared);
        assert_eq!(PowMode::from("normal"), PowMode::Normal);
    }

    #[test]
    fn unknown_mode_is_preserved() {
        let mode = PowMode::from("turbo");
        assert_eq!(mode, PowMode::Other("turbo".into()));
        assert_eq!(mode.to_string(), "turbo");
    }

    #[test]
    fn config_defaults_from_empty_toml() {
        let config: EthashConfig = toml::from_str("").unwrap();
        assert_eq!(config, EthashConfig::default());
    }

    #[test]
    fn pow_mode_from_toml_string() {
        let config: EthashConfig = toml::from_str("pow_mode = \"fake\"\ncaches_in_mem = 5").unwrap();
        assert_eq!(config.pow_mode, PowMode::Fake);
        assert_eq!(config.caches_in_mem, 5);
        assert_eq!(config.caches_on_disk, 3);
    }
}
