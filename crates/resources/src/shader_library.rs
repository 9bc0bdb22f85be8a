//! Compiled shader lookup by material name.
//!
//! Bytecode lives flat in one directory and is found by suffix:
//! `<Name>.vertx.spv` for vertex shaders, `<Name>.pixel.spv` for pixel
//! shaders and `<Name>.rsign.toml` for root-signature descriptions.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, error};

use tessera_rhi::device::Device;
use tessera_rhi::pipeline::RootSignature;
use tessera_rhi::shader::{Shader, ShaderStage};

use crate::error::{ResourceError, ResourceResult};
use crate::root_signature::RootSignatureDesc;

/// Entry point every compiled shader exports.
pub const SHADER_ENTRY_POINT: &str = "main";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BytecodeKind {
    Vertex,
    Pixel,
    RootSignature,
}

impl BytecodeKind {
    pub fn suffix(self) -> &'static str {
        match self {
            BytecodeKind::Vertex => "vertx.spv",
            BytecodeKind::Pixel => "pixel.spv",
            BytecodeKind::RootSignature => "rsign.toml",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            BytecodeKind::Vertex => "vertex shader",
            BytecodeKind::Pixel => "pixel shader",
            BytecodeKind::RootSignature => "root signature",
        }
    }
}

impl From<ShaderStage> for BytecodeKind {
    fn from(stage: ShaderStage) -> Self {
        match stage {
            ShaderStage::Vertex => BytecodeKind::Vertex,
            ShaderStage::Pixel => BytecodeKind::Pixel,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ShaderLibrary {
    dir: PathBuf,
}

impl ShaderLibrary {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, name: &str, kind: BytecodeKind) -> PathBuf {
        self.dir.join(format!("{name}.{}", kind.suffix()))
    }

    /// Read the raw bytes for `name`.
    pub fn load_bytes(&self, name: &str, kind: BytecodeKind) -> ResourceResult<Vec<u8>> {
        let path = self.path_for(name, kind);
        match std::fs::read(&path) {
            Ok(bytes) => {
                debug!("Loaded {} '{}' ({} bytes)", kind.label(), path.display(), bytes.len());
                Ok(bytes)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                error!("Missing {} '{}'", kind.label(), path.display());
                Err(ResourceError::MissingBytecode {
                    kind: kind.label(),
                    path,
                })
            }
            Err(source) => {
                error!("Failed to read '{}': {source}", path.display());
                Err(ResourceError::Io { path, source })
            }
        }
    }

    pub fn load_shader(&self, device: Arc<Device>, name: &str, stage: ShaderStage) -> ResourceResult<Shader> {
        let bytes = self.load_bytes(name, stage.into())?;
        Ok(Shader::from_spirv_bytes(device, &bytes, stage, SHADER_ENTRY_POINT)?)
    }

    pub fn load_root_signature_desc(&self, name: &str) -> ResourceResult<RootSignatureDesc> {
        let kind = BytecodeKind::RootSignature;
        let bytes = self.load_bytes(name, kind)?;
        let path = self.path_for(name, kind);

        let source = String::from_utf8(bytes).map_err(|e| ResourceError::InvalidRootSignature {
            path: path.clone(),
            reason: e.to_string(),
        })?;

        RootSignatureDesc::from_toml_str(&source).map_err(|reason| {
            error!("Invalid root signature '{}': {reason}", path.display());
            ResourceError::InvalidRootSignature { path, reason }
        })
    }

    pub fn load_root_signature(&self, device: &Arc<Device>, name: &str) -> ResourceResult<Arc<RootSignature>> {
        let desc = self.load_root_signature_desc(name)?;
        let signature = device.create_root_signature(&desc.ranges())?;
        Ok(Arc::new(signature))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_rhi::pipeline::ShaderVisibility;

    #[test]
    fn test_suffix_convention() {
        let library = ShaderLibrary::new("materials");
        assert_eq!(
            library.path_for("ColorRed", BytecodeKind::Pixel),
            Path::new("materials").join("ColorRed.pixel.spv")
        );
        assert_eq!(
            library.path_for("WorldPosition", BytecodeKind::Vertex),
            Path::new("materials").join("WorldPosition.vertx.spv")
        );
        assert_eq!(
            library.path_for("Base", BytecodeKind::RootSignature),
            Path::new("materials").join("Base.rsign.toml")
        );
    }

    #[test]
    fn test_missing_file_reports_kind_and_path() {
        let dir = tempfile::tempdir().unwrap();
        let library = ShaderLibrary::new(dir.path());

        match library.load_bytes("Nothing", BytecodeKind::Vertex) {
            Err(ResourceError::MissingBytecode { kind, path }) => {
                assert_eq!(kind, "vertex shader");
                assert!(path.ends_with("Nothing.vertx.spv"));
            }
            other => panic!("expected missing bytecode, got {other:?}"),
        }
    }

    #[test]
    fn test_root_signature_loaded_from_toml() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("WorldPosition.rsign.toml"),
            "[[push_constants]]\nvisibility = \"vertex\"\noffset = 0\nsize = 8\n",
        )
        .unwrap();

        let library = ShaderLibrary::new(dir.path());
        let desc = library.load_root_signature_desc("WorldPosition").unwrap();
        let ranges = desc.ranges();
        assert_eq!(ranges.len(), 1);
        assert_eq!(ranges[0].visibility, ShaderVisibility::Vertex);
        assert_eq!(ranges[0].size, 8);
    }

    #[test]
    fn test_malformed_root_signature() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Broken.rsign.toml"), "push_constants = 3").unwrap();

        let library = ShaderLibrary::new(dir.path());
        assert!(matches!(
            library.load_root_signature_desc("Broken"),
            Err(ResourceError::InvalidRootSignature { .. })
        ));
    }
}
