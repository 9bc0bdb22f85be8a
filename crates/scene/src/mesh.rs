//! Shared meshes and their per-node instances.

use std::mem::size_of;
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use glam::Mat4;
use tracing::debug;

use tessera_resources::{Material, MaterialId, MaterialRegistry};
use tessera_rhi::buffer::{BufferUsage, DeviceBuffer, UploadBuffer};
use tessera_rhi::command::CommandList;
use tessera_rhi::device::Device;
use tessera_rhi::pipeline::PushConstantRange;
use tessera_rhi::resource::ResourceState;

use crate::error::{SceneError, SceneResult};
use crate::node::{NodeId, Scene};

/// Position-only vertex.
pub type Vertex = [f32; 3];

/// Something traversal can update and draw.
pub trait Drawable {
    /// Record the per-frame constant upload for `world`.
    fn update(&mut self, cmd: &mut CommandList<'_>, world: &Mat4, delta_time: f32) -> SceneResult<()>;

    /// Record the draw. The material is already bound.
    fn draw(&self, cmd: &mut CommandList<'_>) -> SceneResult<()>;
}

/// Immutable vertex data shared by any number of instances.
pub struct Mesh {
    vertex_buffer: UploadBuffer,
    vertex_count: u32,
}

impl Mesh {
    pub fn new(device: &Arc<Device>, vertices: &[Vertex], name: &str) -> SceneResult<Self> {
        if vertices.is_empty() {
            return Err(SceneError::EmptyMesh(name.to_string()));
        }

        let vertex_buffer = UploadBuffer::with_data(
            device.clone(),
            BufferUsage::Vertex,
            bytemuck::cast_slice(vertices),
            name,
        )?;
        debug!("Mesh '{name}' created with {} vertices", vertices.len());

        Ok(Self {
            vertex_buffer,
            vertex_count: vertices.len() as u32,
        })
    }

    #[inline]
    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    #[inline]
    pub fn vertex_buffer(&self) -> &UploadBuffer {
        &self.vertex_buffer
    }

    pub fn record_draw(&self, cmd: &mut CommandList<'_>) -> SceneResult<()> {
        cmd.set_vertex_buffer(&self.vertex_buffer);
        cmd.draw(self.vertex_count)?;
        Ok(())
    }
}

/// Per-instance shader constants.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct InstanceConstants {
    /// Column-major object-to-world matrix.
    pub world: Mat4,
}

impl InstanceConstants {
    pub const SIZE: u64 = size_of::<Self>() as u64;
}

/// A mesh placed in the scene with its own constant buffer.
///
/// The world matrix is written into a CPU-visible buffer and copied into a
/// GPU-only buffer each frame; shaders read the latter through the device
/// address passed as a push constant.
pub struct MeshInstance {
    mesh: Arc<Mesh>,
    material: Arc<Material>,
    constants_upload: UploadBuffer,
    constants: DeviceBuffer,
}

impl MeshInstance {
    pub fn new(device: &Arc<Device>, mesh: Arc<Mesh>, material: Arc<Material>, name: &str) -> SceneResult<Self> {
        let constants_upload = device.create_upload_buffer(
            BufferUsage::Staging,
            InstanceConstants::SIZE,
            &format!("{name} constants (upload)"),
        )?;
        let constants = device.create_device_buffer(
            BufferUsage::Constant,
            InstanceConstants::SIZE,
            &format!("{name} constants"),
        )?;

        Ok(Self {
            mesh,
            material,
            constants_upload,
            constants,
        })
    }

    #[inline]
    pub fn mesh(&self) -> &Arc<Mesh> {
        &self.mesh
    }

    #[inline]
    pub fn material(&self) -> &Arc<Material> {
        &self.material
    }
}

impl Drawable for MeshInstance {
    fn update(&mut self, cmd: &mut CommandList<'_>, world: &Mat4, _delta_time: f32) -> SceneResult<()> {
        let constants = InstanceConstants { world: *world };
        self.constants_upload.map()?.write_pod(0, &constants)?;

        cmd.transition(&mut self.constants, ResourceState::CopyDest);
        cmd.copy_buffer(&self.constants_upload, &self.constants, InstanceConstants::SIZE)?;
        cmd.transition(&mut self.constants, ResourceState::GenericRead);
        Ok(())
    }

    fn draw(&self, cmd: &mut CommandList<'_>) -> SceneResult<()> {
        let address = self.constants.device_address();
        if let Some(bytes) = address_push(cmd.push_constant_ranges(), address) {
            cmd.push_constants(0, &bytes)?;
        }
        self.mesh.record_draw(cmd)
    }
}

/// The constants address as pushed at offset 0, if the bound root signature
/// takes push constants at all.
fn address_push(bound: &[PushConstantRange], address: u64) -> Option<[u8; 8]> {
    (!bound.is_empty()).then(|| bytemuck::cast(address))
}

pub fn create_mesh(device: &Arc<Device>, vertices: &[Vertex], name: &str) -> SceneResult<Arc<Mesh>> {
    Mesh::new(device, vertices, name).map(Arc::new)
}

/// Add a node drawing `mesh` with `material` under `parent`.
pub fn create_mesh_node(
    scene: &mut Scene<MeshInstance>,
    parent: NodeId,
    device: &Arc<Device>,
    materials: &MaterialRegistry<Material>,
    material: MaterialId,
    mesh: &Arc<Mesh>,
) -> SceneResult<NodeId> {
    let resolved = materials.lookup(material)?;
    let name = format!("node {}", scene.len());
    let instance = MeshInstance::new(device, Arc::clone(mesh), resolved, &name)?;
    scene.add_node(parent, material, Some(instance))
}
