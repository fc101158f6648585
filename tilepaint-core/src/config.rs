//! # Configuration
//!
//! Settings for the canvas core, loadable from TOML. Every field has a default, so a partial or
//! empty file is valid.

use crate::composite::ResampleFilter;
use crate::pixel::PixelFormat;

/// Prefixed to saved configs.
const DOCUMENTATION: &str = r"# Canvas settings.
# history.max_entries and history.max_bytes bound the undo history. Zero means unlimited.
# resample.bilinear smooths layers drawn at non-integer positions, rotations, and magnification.

";

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("failed to access config: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Bounds on how much the undo history may hold. Oldest entries go first.
#[derive(Copy, Clone, PartialEq, Eq, Debug, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct HistoryLimits {
    /// Maximum number of undo steps, zero for unlimited.
    pub max_entries: usize,
    /// Maximum bytes of pixel data kept alive by history, zero for unlimited.
    pub max_bytes: u64,
}
impl Default for HistoryLimits {
    fn default() -> Self {
        Self {
            max_entries: 100,
            max_bytes: 512 * 1024 * 1024,
        }
    }
}
impl HistoryLimits {
    pub const UNLIMITED: Self = Self {
        max_entries: 0,
        max_bytes: 0,
    };
    /// Check whether a history of this many entries and bytes is within bounds.
    #[must_use]
    pub fn allows(&self, entries: usize, bytes: u64) -> bool {
        (self.max_entries == 0 || entries <= self.max_entries)
            && (self.max_bytes == 0 || bytes <= self.max_bytes)
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ResampleConfig {
    pub bilinear: bool,
}
impl Default for ResampleConfig {
    fn default() -> Self {
        Self { bilinear: true }
    }
}
impl ResampleConfig {
    #[must_use]
    pub fn filter(&self) -> ResampleFilter {
        if self.bilinear {
            ResampleFilter::Bilinear
        } else {
            ResampleFilter::Nearest
        }
    }
}

#[derive(Clone, PartialEq, Eq, Debug, Default, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct CanvasConfig {
    /// Pixel format of new documents.
    pub format: PixelFormat,
    pub history: HistoryLimits,
    pub resample: ResampleConfig,
}
impl CanvasConfig {
    /// # Errors
    /// If the text is not valid TOML or has fields of the wrong type.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }
    /// # Errors
    /// Never in practice, all fields are representable.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(DOCUMENTATION.to_owned() + &toml::ser::to_string_pretty(self)?)
    }
    /// Load from a file, falling back to defaults if it is missing or malformed.
    #[must_use]
    pub fn load_or_default(path: &std::path::Path) -> Self {
        let loaded = std::fs::read_to_string(path)
            .map_err(ConfigError::from)
            .and_then(|text| Self::from_toml_str(&text));
        match loaded {
            Ok(config) => config,
            Err(err) => {
                log::warn!("using default canvas config, {} not loaded: {err}", path.display());
                Self::default()
            }
        }
    }
    /// # Errors
    /// If the file could not be written.
    pub fn save(&self, path: &std::path::Path) -> Result<(), ConfigError> {
        std::fs::write(path, self.to_toml_string()?)?;
        Ok(())
    }
}
