//! Scene errors.

use thiserror::Error;

use tessera_resources::ResourceError;
use tessera_rhi::RhiError;

use crate::node::NodeId;

#[derive(Error, Debug)]
pub enum SceneError {
    /// More drawables in one frame than the rendering key can index.
    #[error("Object index {index} does not fit in the rendering key (max {max})")]
    ObjectIndexOverflow { index: usize, max: u32 },

    #[error("Node {0:?} does not exist in this scene")]
    InvalidNode(NodeId),

    /// Reparenting would put a node below itself.
    #[error("Cannot move node {node:?} under its own descendant {parent:?}")]
    CyclicParent { node: NodeId, parent: NodeId },

    /// Meshes need at least one vertex.
    #[error("Mesh '{0}' has no vertices")]
    EmptyMesh(String),

    #[error(transparent)]
    Rhi(#[from] RhiError),

    #[error(transparent)]
    Resource(#[from] ResourceError),
}

pub type SceneResult<T> = Result<T, SceneError>;
