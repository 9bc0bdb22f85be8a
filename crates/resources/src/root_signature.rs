//! Root-signature descriptions.
//!
//! A root signature is described by a small TOML document listing its
//! push-constant ranges:
//!
//! ```toml
//! [[push_constants]]
//! name = "instance"
//! visibility = "vertex"
//! offset = 0
//! size = 8
//! ```

use serde::Deserialize;

use tessera_rhi::pipeline::{PushConstantRange, ShaderVisibility, validate_push_constant_ranges};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Vertex,
    Pixel,
    All,
}

impl From<Visibility> for ShaderVisibility {
    fn from(visibility: Visibility) -> Self {
        match visibility {
            Visibility::Vertex => ShaderVisibility::Vertex,
            Visibility::Pixel => ShaderVisibility::Pixel,
            Visibility::All => ShaderVisibility::All,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PushConstantDesc {
    /// Label used in logs only.
    #[serde(default)]
    pub name: Option<String>,
    pub visibility: Visibility,
    #[serde(default)]
    pub offset: u32,
    pub size: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RootSignatureDesc {
    #[serde(default)]
    pub push_constants: Vec<PushConstantDesc>,
}

impl RootSignatureDesc {
    /// Parse and validate a description.
    ///
    /// Returns a human-readable reason on failure.
    pub fn from_toml_str(source: &str) -> Result<Self, String> {
        let desc: Self = toml::from_str(source).map_err(|e| e.to_string())?;
        validate_push_constant_ranges(&desc.ranges()).map_err(|e| e.to_string())?;
        Ok(desc)
    }

    pub fn ranges(&self) -> Vec<PushConstantRange> {
        self.push_constants
            .iter()
            .map(|pc| PushConstantRange {
                visibility: pc.visibility.into(),
                offset: pc.offset,
                size: pc.size,
            })
            .collect()
    }
}
