//! Configuration system.
//!
//! Loads relay/client configuration from JSON strings or files. Every field
//! has a default so a config file only needs the values it overrides.

use std::{path::Path, time::Duration};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Root configuration shared by client/server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ZoneConfig {
    /// Relay listen/connect address, e.g. `127.0.0.1:40000`.
    pub server_addr: String,
    /// Outbound pose broadcasts per second.
    pub tick_hz: u32,
    /// Nominal render rate, used when wall-clock deltas can't be trusted.
    pub frame_hz: u32,
    /// Display name (client only). `None` waits for the relay to assign one.
    pub player_name: Option<String>,
    /// Model key (client only).
    pub player_model: Option<String>,
    /// Root directory for models and the label font (client only).
    pub assets_dir: String,
    /// Remote entities silent for this long are evicted (client only).
    pub liveness_window_secs: f32,
    /// Period of the liveness sweep (client only).
    pub sweep_interval_secs: f32,
    /// Assign a name/model to sessions that join without one (server only).
    pub assign_identities: bool,
    /// Display names handed out by the relay.
    pub name_pool: Vec<String>,
    /// Model keys handed out by the relay.
    pub model_pool: Vec<String>,
}

const DEFAULT_LIVENESS_WINDOW: Duration = Duration::from_secs(10);
const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

fn default_name_pool() -> Vec<String> {
    [
        "Maple", "Juniper", "Pebble", "Clover", "Biscuit", "Nimbus", "Sprocket", "Willow",
        "Tofu", "Comet", "Pickle", "Marble",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_model_pool() -> Vec<String> {
    ["fox", "owl", "frog", "rabbit", "bear", "penguin"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for ZoneConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:40000".to_string(),
            tick_hz: 15,
            frame_hz: 60,
            player_name: None,
            player_model: None,
            assets_dir: "assets".to_string(),
            liveness_window_secs: DEFAULT_LIVENESS_WINDOW.as_secs_f32(),
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL.as_secs_f32(),
            assign_identities: true,
            name_pool: default_name_pool(),
            model_pool: default_model_pool(),
        }
    }
}

impl ZoneConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    /// Reads and parses a JSON config file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        let cfg = Self::from_json_str(&text)
            .with_context(|| format!("parse config {}", path.display()))?;
        debug!(path = %path.display(), "Loaded config");
        Ok(cfg)
    }

    /// Falls back to the default window when the value is not representable.
    pub fn liveness_window(&self) -> Duration {
        secs_or(self.liveness_window_secs, 0.0, DEFAULT_LIVENESS_WINDOW)
    }

    /// Falls back to the default interval when the value is not representable.
    pub fn sweep_interval(&self) -> Duration {
        secs_or(self.sweep_interval_secs, 0.001, DEFAULT_SWEEP_INTERVAL)
    }
}

/// `secs` clamped below by `min`, or `fallback` when infinite or too large.
fn secs_or(secs: f32, min: f32, fallback: Duration) -> Duration {
    Duration::try_from_secs_f32(secs.max(min)).unwrap_or(fallback)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg = ZoneConfig::from_json_str(r#"{"tick_hz": 20, "player_name": "Owl"}"#).unwrap();
        assert_eq!(cfg.tick_hz, 20);
        assert_eq!(cfg.frame_hz, 60);
        assert_eq!(cfg.player_name.as_deref(), Some("Owl"));
        assert_eq!(cfg.liveness_window(), Duration::from_secs(10));
        assert!(cfg.assign_identities);
        assert!(!cfg.model_pool.is_empty());
    }

    #[test]
    fn unrepresentable_durations_fall_back_to_defaults() {
        let cfg = ZoneConfig::from_json_str(
            r#"{"liveness_window_secs": 1e20, "sweep_interval_secs": 3e38}"#,
        )
        .unwrap();
        assert_eq!(cfg.liveness_window(), Duration::from_secs(10));
        assert_eq!(cfg.sweep_interval(), Duration::from_secs(1));

        let cfg = ZoneConfig {
            liveness_window_secs: f32::INFINITY,
            sweep_interval_secs: -5.0,
            ..Default::default()
        };
        assert_eq!(cfg.liveness_window(), Duration::from_secs(10));
        assert_eq!(cfg.sweep_interval(), Duration::from_millis(1));
    }
}
