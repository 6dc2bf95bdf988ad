use std::fmt;
use std::str::FromStr;

/// Data centre hosting an Amplitude project.
///
/// Each region resolves to exactly one API base URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Region {
    /// EU data centre, the primary region.
    #[default]
    Eu,
    /// US data centre.
    Us,
}

impl Region {
    pub fn base_url(self) -> &'static str {
        match self {
            Region::Eu => "https://analytics.eu.amplitude.com",
            Region::Us => "https://amplitude.com",
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Region::Eu => f.write_str("eu"),
            Region::Us => f.write_str("us"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown region {0:?} (expected `eu` or `us`)")]
pub struct ParseRegionError(String);

impl FromStr for Region {
    type Err = ParseRegionError;

    /// Accepts region names as well as the numeric selectors `1` (EU) and `2` (US).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "eu" | "1" => Ok(Region::Eu),
            "us" | "2" => Ok(Region::Us),
            other => Err(ParseRegionError(other.to_string())),
        }
    }
}
