//! TOML configuration.
//!
//! Every section and field is optional in the file; missing values take the
//! defaults documented on each field. Unknown keys are rejected so typos surface
//! as errors instead of silently falling back.
//!
//! ```toml
//! [window]
//! width = 1280
//! height = 720
//!
//! [graphics]
//! buffer_count = 2
//! vsync = true
//!
//! [demo]
//! name = "mesh_batching"
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::logging::DEFAULT_LOG_FILTER;

/// Default config file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "tessera.toml";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub materials: MaterialsConfig,
    pub logging: LoggingConfig,
    pub demo: DemoConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WindowConfig {
    /// Initial client width in physical pixels.
    pub width: u32,
    /// Initial client height in physical pixels.
    pub height: u32,
    pub title: String,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            title: "Tessera".to_string(),
        }
    }
}

/// Device, queue and swap chain settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GraphicsConfig {
    /// Number of swap chain back buffers.
    pub buffer_count: u32,
    /// Present with vertical sync.
    pub vsync: bool,
    /// Enable the Khronos validation layer when it is installed.
    pub validation: bool,
    /// First fence value the command queue signals.
    pub initial_fence_value: u64,
    /// Capacity of the render-target descriptor heap.
    pub rtv_descriptor_count: u32,
    /// Color the back buffer is cleared to at the start of every frame.
    pub clear_color: [f32; 4],
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            buffer_count: 2,
            vsync: true,
            validation: cfg!(debug_assertions),
            initial_fence_value: 1,
            rtv_descriptor_count: 256,
            clear_color: [0.4, 0.6, 0.9, 1.0],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MaterialsConfig {
    /// Directory holding compiled shader bytecode and root signature descriptions.
    pub dir: PathBuf,
}

impl Default for MaterialsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("materials"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is not set.
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DemoConfig {
    /// Which demo scene to build.
    pub name: String,
    /// Triangle count for the batching demo.
    pub triangle_count: u32,
    /// Seed for reproducible placement; random when absent.
    pub seed: Option<u64>,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            name: "plain_triangle".to_string(),
            triangle_count: 30,
            seed: None,
        }
    }
}

impl Config {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Config = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = fs::read_to_string(path).map_err(|source| Error::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&source)?;
        tracing::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Like [`Config::load`], but a missing file yields the defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            tracing::debug!("No config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Check value ranges. Reports the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.window.width == 0 || self.window.height == 0 {
            return Err(Error::Config {
                field: "window.width/height",
                reason: format!(
                    "must be non-zero, got {}x{}",
                    self.window.width, self.window.height
                ),
            });
        }

        if !(2..=16).contains(&self.graphics.buffer_count) {
            return Err(Error::Config {
                field: "graphics.buffer_count",
                reason: format!("must be in 2..=16, got {}", self.graphics.buffer_count),
            });
        }

        if self.graphics.initial_fence_value == 0 {
            return Err(Error::Config {
                field: "graphics.initial_fence_value",
                reason: "must be at least 1".to_string(),
            });
        }

        if self.graphics.rtv_descriptor_count < self.graphics.buffer_count {
            return Err(Error::Config {
                field: "graphics.rtv_descriptor_count",
                reason: format!(
                    "must hold every back buffer ({} < {})",
                    self.graphics.rtv_descriptor_count, self.graphics.buffer_count
                ),
            });
        }

        if self.demo.triangle_count == 0 {
            return Err(Error::Config {
                field: "demo.triangle_count",
                reason: "must be non-zero".to_string(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.graphics.buffer_count, 2);
        assert_eq!(config.graphics.rtv_descriptor_count, 256);
        assert_eq!(config.graphics.initial_fence_value, 1);
        assert!(config.graphics.vsync);
        assert_eq!(config.graphics.clear_color, [0.4, 0.6, 0.9, 1.0]);
    }

    #[test]
    fn test_empty_document_yields_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_partial_sections_keep_other_defaults() {
        let config = Config::from_toml_str(
            r#"
            [window]
            width = 800

            [graphics]
            buffer_count = 3
            vsync = false

            [demo]
            name = "world_space"
            seed = 7
            "#,
        )
        .unwrap();

        assert_eq!(config.window.width, 800);
        assert_eq!(config.window.height, 720);
        assert_eq!(config.graphics.buffer_count, 3);
        assert!(!config.graphics.vsync);
        assert_eq!(config.demo.name, "world_space");
        assert_eq!(config.demo.seed, Some(7));
        assert_eq!(config.materials.dir, PathBuf::from("materials"));
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        let err = Config::from_toml_str("[graphics]\nbufer_count = 2\n").unwrap_err();
        assert!(matches!(err, Error::ConfigParse(_)));
    }

    #[test]
    fn test_buffer_count_out_of_range() {
        let err = Config::from_toml_str("[graphics]\nbuffer_count = 1\n").unwrap_err();
        assert!(matches!(
            err,
            Error::Config {
                field: "graphics.buffer_count",
                ..
            }
        ));
    }

    #[test]
    fn test_zero_fence_value_rejected() {
        let err = Config::from_toml_str("[graphics]\ninitial_fence_value = 0\n").unwrap_err();
        assert!(matches!(
            err,
            Error::Config {
                field: "graphics.initial_fence_value",
                ..
            }
        ));
    }

    #[test]
    fn test_rtv_heap_must_hold_back_buffers() {
        let err = Config::from_toml_str(
            "[graphics]\nbuffer_count = 4\nrtv_descriptor_count = 3\n",
        )
        .unwrap_err();
        assert!(matches!(
            err,
            Error::Config {
                field: "graphics.rtv_descriptor_count",
                ..
            }
        ));
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let config = Config::load_or_default("definitely/not/here/tessera.toml").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_missing_file_reports_path() {
        let err = Config::load("definitely/not/here/tessera.toml").unwrap_err();
        match err {
            Error::ConfigRead { path, .. } => {
                assert!(path.ends_with("tessera.toml"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
