//! Read-only configuration consumed by the render core.
//!
//! The compositor's configuration layer owns loading and persistence; this
//! module only defines the schema, TOML parsing and the environment toggles
//! that developers use to force a code path on a misbehaving driver.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

pub const ENV_PERSISTENT_BUFFERS: &str = "NOVADE_GL_PERSISTENT_BUFFERS";
pub const ENV_USE_BUFFER_AGE: &str = "NOVADE_USE_BUFFER_AGE";

const DEFAULT_RING_SIZE: usize = 1024 * 1024;
const DEFAULT_FENCE_TIMEOUT_MS: u64 = 1000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Force persistent-mapped streaming on or off. `None` selects it whenever
    /// the device supports immutable buffer storage.
    pub persistent_streaming: Option<bool>,
    /// Initial capacity of the streaming ring, in bytes.
    pub streaming_ring_size: usize,
    /// Upper bound for a CPU wait on a GPU fence.
    pub fence_timeout_ms: u64,
    /// Allow buffer-age based partial repaints.
    pub use_buffer_age: bool,
    /// Request a core profile when creating a desktop GL context.
    pub prefer_core_profile: bool,
    /// Renderer-string substrings whose framebuffer clear path is broken.
    pub clear_blacklist: Vec<String>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            persistent_streaming: None,
            streaming_ring_size: DEFAULT_RING_SIZE,
            fence_timeout_ms: DEFAULT_FENCE_TIMEOUT_MS,
            use_buffer_age: true,
            prefer_core_profile: true,
            clear_blacklist: Vec::new(),
        }
    }
}

impl RenderConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: RenderConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.streaming_ring_size == 0 {
            return Err(ConfigError::Validation(
                "streaming_ring_size must be greater than zero".to_string(),
            ));
        }
        if self.fence_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "fence_timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Overlays the process environment on top of this configuration.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Same as [`apply_env`](Self::apply_env) with an injectable lookup.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_PERSISTENT_BUFFERS) {
            match parse_toggle(&value) {
                Some(on) => {
                    debug!("{} overrides persistent streaming: {}", ENV_PERSISTENT_BUFFERS, on);
                    self.persistent_streaming = Some(on);
                }
                None => warn!("Ignoring {}={:?}: expected 0 or 1", ENV_PERSISTENT_BUFFERS, value),
            }
        }
        if let Some(value) = lookup(ENV_USE_BUFFER_AGE) {
            match parse_toggle(&value) {
                Some(on) => {
                    debug!("{} overrides buffer age usage: {}", ENV_USE_BUFFER_AGE, on);
                    self.use_buffer_age = on;
                }
                None => warn!("Ignoring {}={:?}: expected 0 or 1", ENV_USE_BUFFER_AGE, value),
            }
        }
    }

    pub fn fence_timeout(&self) -> Duration {
        Duration::from_millis(self.fence_timeout_ms)
    }

    /// Whether the clear fast path must be avoided on the given renderer.
    pub fn is_clear_blacklisted(&self, renderer: &str) -> bool {
        self.clear_blacklist
            .iter()
            .any(|pattern| !pattern.is_empty() && renderer.contains(pattern.as_str()))
    }
}

fn parse_toggle(value: &str) -> Option<bool> {
    match value.trim() {
        "1" | "true" | "on" => Some(true),
        "0" | "false" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_partial_toml_with_defaults() {
        let config = RenderConfig::from_toml_str(
            r#"
            persistent_streaming = false
            clear_blacklist = ["Mesa Intel(R) HD Graphics 3000"]
            "#,
        )
        .unwrap();
        assert_eq!(config.persistent_streaming, Some(false));
        assert_eq!(config.streaming_ring_size, DEFAULT_RING_SIZE);
        assert!(config.use_buffer_age);
        assert!(config.is_clear_blacklisted("Mesa Intel(R) HD Graphics 3000 (SNB GT2)"));
        assert!(!config.is_clear_blacklisted("llvmpipe"));
    }

    #[test]
    fn rejects_zero_sizes() {
        assert!(matches!(
            RenderConfig::from_toml_str("streaming_ring_size = 0"),
            Err(ConfigError::Validation(_))
        ));
        assert!(matches!(
            RenderConfig::from_toml_str("fence_timeout_ms = 0"),
            Err(ConfigError::Validation(_))
        ));
        assert!(matches!(
            RenderConfig::from_toml_str("use_buffer_age = \"maybe\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn environment_overrides() {
        let mut config = RenderConfig::default();
        config.apply_overrides(|key| match key {
            ENV_PERSISTENT_BUFFERS => Some("1".to_string()),
            ENV_USE_BUFFER_AGE => Some("0".to_string()),
            _ => None,
        });
        assert_eq!(config.persistent_streaming, Some(true));
        assert!(!config.use_buffer_age);

        config.apply_overrides(|_| Some("bogus".to_string()));
        assert_eq!(config.persistent_streaming, Some(true));
    }
}
