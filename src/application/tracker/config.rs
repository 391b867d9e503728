use std::{fmt, str::FromStr};

use serde::Deserialize;

/// Execution environment the tracker is embedded in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    Development,
    #[default]
    Production,
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(format!("unknown environment `{other}`")),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Development => f.write_str("development"),
            Environment::Production => f.write_str("production"),
        }
    }
}

/// Construction-time switches deciding whether a tracker performs remote writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackingConfig {
    pub environment: Environment,
    pub enabled: bool,
    /// Record analytics even when running in [`Environment::Development`].
    pub track_in_development: bool,
}

impl TrackingConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn writes_enabled(&self) -> bool {
        self.enabled
            && (self.environment != Environment::Development || self.track_in_development)
    }
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            environment: Environment::Production,
            enabled: true,
            track_in_development: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn development_requires_override() {
        let dev = TrackingConfig {
            environment: Environment::Development,
            ..TrackingConfig::default()
        };
        assert!(!dev.writes_enabled());

        let forced = TrackingConfig {
            track_in_development: true,
            ..dev
        };
        assert!(forced.writes_enabled());
        assert!(TrackingConfig::default().writes_enabled());
        assert!(!TrackingConfig::disabled().writes_enabled());
    }

    #[test]
    fn environment_parses_short_names() {
        assert_eq!("dev".parse::<Environment>(), Ok(Environment::Development));
        assert_eq!(" Production ".parse::<Environment>(), Ok(Environment::Production));
        assert!("staging".parse::<Environment>().is_err());
    }
}
