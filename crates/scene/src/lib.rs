//! Scene graph, meshes and per-frame draw batching.
//!
//! - [`Scene`]: node arena with parent/child links and local transforms
//! - [`RenderBatch`]: sort-keyed draw list rebuilt every frame
//! - [`MeshInstance`]: a shared [`Mesh`] with per-node constants

pub mod batch;
pub mod error;
pub mod frame;
pub mod mesh;
pub mod node;

pub use batch::{BatchStep, RenderBatch, RenderPass, RenderingKey};
pub use error::{SceneError, SceneResult};
pub use frame::{collect_batch, record_draws, record_updates};
pub use mesh::{Drawable, InstanceConstants, Mesh, MeshInstance, Vertex, create_mesh, create_mesh_node};
pub use node::{Node, NodeId, Scene};
