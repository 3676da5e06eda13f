//! Chain synchronisation modes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// How the node synchronises with the network.
///
/// Configuration values that name no known mode are kept verbatim as
/// [`SyncMode::Invalid`] so node construction can reject them with the
/// offending value.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SyncMode {
    /// Download and execute every block.
    Full,
    /// Download headers and state snapshot, execute recent blocks.
    #[default]
    Fast,
    /// Headers only; served by a separate light-client composition.
    Light,
    /// Anything else found in configuration.
    Invalid(String),
}

impl SyncMode {
    pub fn is_valid(&self) -> bool {
        !matches!(self, Self::Invalid(_))
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Full => "full",
            Self::Fast => "fast",
            Self::Light => "light",
            Self::Invalid(raw) => raw,
        }
    }
}

impl From<String> for SyncMode {
    fn from(raw: String) -> Self {
        match raw.to_lowercase().as_str() {
            "full" => Self::Full,
            "fast" => Self::Fast,
            "light" => Self::Light,
            _ => Self::Invalid(raw),
        }
    }
}

impl From<&str> for SyncMode {
    fn from(raw: &str) -> Self {
        Self::from(raw.to_string())
    }
}

impl From<SyncMode> for String {
    fn from(mode: SyncMode) -> Self {
        mode.as_str().to_string()
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
