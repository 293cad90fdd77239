use crate::{Error, Result};
use serde::Serialize;
use std::str::FromStr;
use std::time::Duration;

/// Backoff shape applied between attempts of one logical request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryDelay {
    /// `base * e^attempt`
    Expo,
    /// `base`
    Const,
}

impl RetryDelay {
    pub fn seconds(self, base_secs: f64, attempt: u32) -> f64 {
        match self {
            Self::Expo => base_secs * std::f64::consts::E.powf(f64::from(attempt)),
            Self::Const => base_secs,
        }
    }

    pub fn delay(self, base: Duration, attempt: u32) -> Duration {
        let secs = self.seconds(base.as_secs_f64(), attempt);
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }
}

impl FromStr for RetryDelay {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "expo" => Ok(Self::Expo),
            "const" => Ok(Self::Const),
            other => Err(Error::InvalidInput(format!(
                "unknown retry delay function '{other}'"
            ))),
        }
    }
}
