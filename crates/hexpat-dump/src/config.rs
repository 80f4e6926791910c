//! Configuration management module
//!
//! Settings are loaded from a TOML file, by default at:
//! - macOS/Linux: ~/.config/hexpat/config.toml
//! - Windows: %APPDATA%\hexpat\config.toml

use std::path::{Path, PathBuf};

use anyhow::Context;
use hexpat::config::{DEFAULT_MAX_ARRAY_LENGTH, DEFAULT_MAX_RECURSION_DEPTH};
use hexpat::EvalConfig;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Output settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    /// Print nodes marked `[[hidden]]`
    pub show_hidden: bool,
    /// Maximum tree depth to print (0 = unlimited)
    pub max_depth: usize,
    /// Array elements printed before the rest are elided (0 = all)
    pub max_array_elements: usize,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            show_hidden: false,
            max_depth: 0,
            max_array_elements: 32,
        }
    }
}

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Evaluation limits
    pub limits: EvalConfig,
    /// Tree printing
    pub output: OutputSettings,
}

impl Settings {
    /// Get the default configuration file path
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("hexpat").join("config.toml"))
    }

    /// Load settings from an explicit path. A missing or malformed file is
    /// an error here, since the user asked for it by name.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let mut settings: Settings = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        settings.validate();
        Ok(settings)
    }

    /// Load settings from the default location.
    /// Returns default settings if the file doesn't exist or is invalid.
    pub fn load() -> Self {
        let Some(path) = Self::config_path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }
        match Self::load_from(&path) {
            Ok(settings) => settings,
            Err(e) => {
                warn!("{:#}", e);
                Self::default()
            }
        }
    }

    /// Validate and fix invalid setting values
    fn validate(&mut self) {
        // Deep recursion overflows the evaluation thread's stack (1-4096)
        if self.limits.max_recursion_depth == 0 || self.limits.max_recursion_depth > 4096 {
            warn!(
                value = self.limits.max_recursion_depth,
                "max_recursion_depth out of range, using default"
            );
            self.limits.max_recursion_depth = DEFAULT_MAX_RECURSION_DEPTH;
        }

        // Arrays beyond 16M elements are never intended (0 = unlimited is allowed)
        if self.limits.max_array_length > 0x100_0000 {
            warn!(
                value = self.limits.max_array_length,
                "max_array_length out of range, using default"
            );
            self.limits.max_array_length = DEFAULT_MAX_ARRAY_LENGTH;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hexpat::config::DEFAULT_MAX_STEPS;
    use hexpat::Endianness;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let file = write_config("[limits]\ndefault_endian = \"big\"\n\n[output]\nshow_hidden = true\n");
        let settings = Settings::load_from(file.path()).unwrap();
        assert_eq!(settings.limits.default_endian, Endianness::Big);
        assert_eq!(settings.limits.max_steps, DEFAULT_MAX_STEPS);
        assert!(settings.output.show_hidden);
        assert_eq!(settings.output.max_array_elements, 32);
    }

    #[test]
    fn test_out_of_range_values_are_reset() {
        let file = write_config("[limits]\nmax_recursion_depth = 0\nmax_array_length = 999999999\n");
        let settings = Settings::load_from(file.path()).unwrap();
        assert_eq!(settings.limits.max_recursion_depth, DEFAULT_MAX_RECURSION_DEPTH);
        assert_eq!(settings.limits.max_array_length, DEFAULT_MAX_ARRAY_LENGTH);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let file = write_config("[limits\nmax_steps = ");
        let err = Settings::load_from(file.path()).unwrap_err();
        assert!(err.to_string().starts_with("failed to parse config file"));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let err = Settings::load_from(Path::new("/nonexistent/hexpat.toml")).unwrap_err();
        assert!(err.to_string().starts_with("failed to read config file"));
    }
}
