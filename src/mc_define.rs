//! MC プロトコル接続パラメータ定義
//!
//! Connection-level parameters passed through to the protocol engine. The
//! engine owns framing; this crate only names the choices.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Deserialize, Serialize)]
/// Frame format selection for MC framing. Default is MC3E, the format most
/// Q-series Ethernet modules are configured for.
pub enum FrameFormat {
    #[default]
    #[serde(rename = "3E", alias = "MC3E")]
    MC3E,
    #[serde(rename = "4E", alias = "MC4E")]
    MC4E,
}

impl FrameFormat {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::MC3E => "3E",
            Self::MC4E => "4E",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Transport {
    #[default]
    Tcp,
    Udp,
}

impl Transport {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Tcp => "TCP",
            Self::Udp => "UDP",
        }
    }
}

/// Log level handed to the engine. Kept as a name rather than a `log::Level`
/// because engines may have their own level vocabulary.
pub const DEFAULT_ENGINE_LOG_LEVEL: &str = "WARN";
