//! Tunable constants for the live pipeline.
//!
//! Values are stored in milliseconds / characters so the TOML file stays
//! readable; use the `Duration` accessors in code.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{LiveError, Result};

/// Environment variable overriding the throttle interval (ms).
pub const THROTTLE_MS_ENV: &str = "SWITCHBOARD_THROTTLE_MS";
/// Environment variable overriding the stall timeout (ms).
pub const STALL_TIMEOUT_MS_ENV: &str = "SWITCHBOARD_STALL_TIMEOUT_MS";
/// Environment variable overriding the heartbeat interval (ms).
pub const HEARTBEAT_MS_ENV: &str = "SWITCHBOARD_HEARTBEAT_MS";
/// Environment variable overriding the base reveal rate (chars/frame).
pub const REVEAL_RATE_ENV: &str = "SWITCHBOARD_REVEAL_RATE";
/// Environment variable overriding the catch-up threshold (chars).
pub const CATCH_UP_THRESHOLD_ENV: &str = "SWITCHBOARD_CATCH_UP_THRESHOLD";
/// Environment variable overriding the catch-up multiplier.
pub const CATCH_UP_MULTIPLIER_ENV: &str = "SWITCHBOARD_CATCH_UP_MULTIPLIER";
/// Environment variable overriding the rich-render interval (ms).
pub const RICH_RENDER_MS_ENV: &str = "SWITCHBOARD_RICH_RENDER_MS";
/// Environment variable overriding the host frame interval (ms).
pub const FRAME_MS_ENV: &str = "SWITCHBOARD_FRAME_MS";

/// Live pipeline configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    /// Minimum spacing between two commits of one session.
    pub throttle_interval_ms: u64,
    /// Age after which a run without a terminal event counts as stalled.
    pub stall_timeout_ms: u64,
    /// Period of the stall check.
    pub heartbeat_interval_ms: u64,
    /// Characters revealed per animation frame.
    pub reveal_rate: usize,
    /// Backlog (chars) above which a frame reveals faster.
    pub catch_up_threshold: usize,
    /// Rate multiplier applied while over the catch-up threshold.
    pub catch_up_multiplier: usize,
    /// Minimum spacing between two rich renders of a revealing node.
    pub rich_render_interval_ms: u64,
    /// Host frame pacing used by real-time drivers.
    pub frame_interval_ms: u64,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            throttle_interval_ms: 50,
            stall_timeout_ms: 60_000,
            heartbeat_interval_ms: 10_000,
            reveal_rate: 12,
            catch_up_threshold: 200,
            catch_up_multiplier: 4,
            rich_render_interval_ms: 300,
            frame_interval_ms: 16,
        }
    }
}

impl LiveConfig {
    /// Load from a TOML file. Missing keys keep their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content).map_err(|source| LiveError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "Loaded live config");
        config.validate()?;
        Ok(config)
    }

    /// Defaults with environment overrides applied.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Apply `SWITCHBOARD_*` environment overrides on top of this config.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup, then validate.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        override_value(&lookup, THROTTLE_MS_ENV, &mut self.throttle_interval_ms)?;
        override_value(&lookup, STALL_TIMEOUT_MS_ENV, &mut self.stall_timeout_ms)?;
        override_value(&lookup, HEARTBEAT_MS_ENV, &mut self.heartbeat_interval_ms)?;
        override_value(&lookup, REVEAL_RATE_ENV, &mut self.reveal_rate)?;
        override_value(&lookup, CATCH_UP_THRESHOLD_ENV, &mut self.catch_up_threshold)?;
        override_value(&lookup, CATCH_UP_MULTIPLIER_ENV, &mut self.catch_up_multiplier)?;
        override_value(&lookup, RICH_RENDER_MS_ENV, &mut self.rich_render_interval_ms)?;
        override_value(&lookup, FRAME_MS_ENV, &mut self.frame_interval_ms)?;
        self.validate()
    }

    /// Reject values that would stall or spin the pipeline.
    pub fn validate(&self) -> Result<()> {
        let zero_checks = [
            ("throttle_interval_ms", self.throttle_interval_ms),
            ("stall_timeout_ms", self.stall_timeout_ms),
            ("heartbeat_interval_ms", self.heartbeat_interval_ms),
            ("reveal_rate", self.reveal_rate as u64),
            ("rich_render_interval_ms", self.rich_render_interval_ms),
            ("frame_interval_ms", self.frame_interval_ms),
        ];
        for (name, value) in zero_checks {
            if value == 0 {
                return Err(LiveError::Config(format!("{name} must be greater than zero")));
            }
        }
        if self.catch_up_multiplier < 1 {
            return Err(LiveError::Config(
                "catch_up_multiplier must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn throttle_interval(&self) -> Duration {
        Duration::from_millis(self.throttle_interval_ms)
    }

    pub fn stall_timeout(&self) -> Duration {
        Duration::from_millis(self.stall_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn rich_render_interval(&self) -> Duration {
        Duration::from_millis(self.rich_render_interval_ms)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }

    /// Render as TOML.
    pub fn to_toml(&self) -> String {
        // Flat struct of integers, serialization cannot fail.
        toml::to_string_pretty(self).unwrap_or_default()
    }
}

fn override_value<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    slot: &mut T,
) -> Result<()> {
    let Some(raw) = lookup(key) else {
        return Ok(());
    };
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(());
    }
    *slot = raw
        .parse()
        .map_err(|_| LiveError::Config(format!("{key}: invalid value '{raw}'")))?;
    debug!(key, value = raw, "Applied config override");
    Ok(())
}
