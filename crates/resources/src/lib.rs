//! Shader bytecode, root signatures and materials.
//!
//! - [`ShaderLibrary`] finds compiled shaders by name and suffix
//! - [`RootSignatureDesc`] describes push-constant layouts in TOML
//! - [`MaterialBuilder`] turns named shaders into a registered [`Material`]
//! - [`MaterialRegistry`] maps [`MaterialId`]s to shared materials

mod error;
pub mod material;
pub mod root_signature;
pub mod shader_library;

pub use error::{ResourceError, ResourceResult};
pub use material::{Material, MaterialBuilder, MaterialId, MaterialRegistry};
pub use root_signature::RootSignatureDesc;
pub use shader_library::{BytecodeKind, ShaderLibrary};
