use serde::{Deserialize, Serialize};

/// PLC family handed to the protocol engine (`plcType`).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum PlcSeries {
    #[default]
    Q,
    R,
}

impl PlcSeries {
    /// Parse PLC series from string like "Q" or "R".
    #[allow(clippy::should_implement_trait)]
    #[must_use]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim() {
            "Q" | "q" => Some(Self::Q),
            "R" | "r" => Some(Self::R),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Q => "Q",
            Self::R => "R",
        }
    }
}

impl std::str::FromStr for PlcSeries {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_str(s).ok_or(())
    }
}

impl std::fmt::Display for PlcSeries {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
