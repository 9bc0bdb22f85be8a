//! Error types for shader and material loading.

use std::path::PathBuf;

use thiserror::Error;

use tessera_rhi::RhiError;

use crate::material::MaterialId;

#[derive(Error, Debug)]
pub enum ResourceError {
    /// A bytecode file exists but could not be read.
    #[error("Failed to read '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// No bytecode file for the requested name and kind.
    #[error("Missing {kind} bytecode '{path}'")]
    MissingBytecode { kind: &'static str, path: PathBuf },

    /// A root-signature description failed to parse or validate.
    #[error("Invalid root signature '{path}': {reason}")]
    InvalidRootSignature { path: PathBuf, reason: String },

    #[error("Material {0} is not registered")]
    MaterialNotFound(MaterialId),

    /// A material is missing one of its required parts.
    #[error("Material '{name}' is incomplete: {reason}")]
    IncompleteMaterial { name: String, reason: &'static str },

    #[error(transparent)]
    Rhi(#[from] RhiError),
}

pub type ResourceResult<T> = Result<T, ResourceError>;
