//! Network identifier.

use serde::{Deserialize, Serialize};

/// Identifies which keel network a node is connected to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkId {
    /// The production network.
    Live,
    /// The public test network.
    Test,
    /// Local development network.
    Dev,
}

impl NetworkId {
    /// Default P2P port for this network.
    pub fn default_port(&self) -> u16 {
        match self {
            Self::Live => 10333,
            Self::Test => 20333,
            Self::Dev => 30333,
        }
    }

    /// Magic number that opens every wire frame on this network.
    pub fn magic(&self) -> u32 {
        match self {
            Self::Live => 0x004f_454e,
            Self::Test => 0x7474_6e41,
            Self::Dev => 0x0064_6576,
        }
    }

    /// Human-readable name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Live => "live",
            Self::Test => "test",
            Self::Dev => "dev",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "live" => Some(Self::Live),
            "test" => Some(Self::Test),
            "dev" => Some(Self::Dev),
            _ => None,
        }
    }
}
