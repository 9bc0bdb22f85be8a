//! Materials and the registry that hands out their ids.
//!
//! Scene nodes refer to materials by [`MaterialId`] only, so traversal can
//! group and sort draws without touching the materials themselves. The
//! registry is an ordinary value owned by whoever creates materials; there is
//! no process-wide table.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::{error, info};

use tessera_rhi::command::CommandList;
use tessera_rhi::device::Device;
use tessera_rhi::pipeline::{GraphicsPipelineBuilder, PipelineState, RootSignature};
use tessera_rhi::shader::ShaderStage;
use tessera_rhi::vk;

use crate::error::{ResourceError, ResourceResult};
use crate::shader_library::ShaderLibrary;

/// Integer handle of a registered material.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct MaterialId(u32);

impl MaterialId {
    /// Ids below this are reserved; nodes carrying one are never drawn.
    pub const FIRST_ASSIGNABLE: u32 = 100;

    /// Id of nodes without a material.
    pub const NONE: MaterialId = MaterialId(0);

    #[inline]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn value(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn is_assignable(self) -> bool {
        self.0 >= Self::FIRST_ASSIGNABLE
    }
}

impl fmt::Display for MaterialId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Pipeline state plus the root signature it was built against.
///
/// Immutable once built and shared through `Arc`.
pub struct Material {
    id: MaterialId,
    name: String,
    pipeline: PipelineState,
    root_signature: Arc<RootSignature>,
}

impl Material {
    #[inline]
    pub fn id(&self) -> MaterialId {
        self.id
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn pipeline(&self) -> &PipelineState {
        &self.pipeline
    }

    #[inline]
    pub fn root_signature(&self) -> &Arc<RootSignature> {
        &self.root_signature
    }

    /// Bind the root signature and pipeline state.
    pub fn bind(&self, cmd: &mut CommandList<'_>) {
        cmd.set_root_signature(&self.root_signature);
        cmd.set_pipeline_state(&self.pipeline);
    }
}

impl fmt::Debug for Material {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Material")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Id-keyed store of shared materials.
///
/// Ids are assigned sequentially from [`MaterialId::FIRST_ASSIGNABLE`] and
/// never reused.
pub struct MaterialRegistry<M = Material> {
    materials: HashMap<MaterialId, Arc<M>>,
    next_id: u32,
}

impl<M> MaterialRegistry<M> {
    pub fn new() -> Self {
        Self {
            materials: HashMap::new(),
            next_id: MaterialId::FIRST_ASSIGNABLE,
        }
    }

    /// Store `material` under the next free id.
    pub fn register(&mut self, material: M) -> MaterialId {
        let id = self.take_id();
        self.materials.insert(id, Arc::new(material));
        id
    }

    /// Build a material that needs to know its own id, then store it.
    ///
    /// The id is consumed only when `create` succeeds.
    pub fn register_with<E, F>(&mut self, create: F) -> Result<MaterialId, E>
    where
        F: FnOnce(MaterialId) -> Result<M, E>,
    {
        let id = MaterialId(self.next_id);
        let material = create(id)?;
        let taken = self.take_id();
        debug_assert_eq!(taken, id);
        self.materials.insert(id, Arc::new(material));
        Ok(id)
    }

    pub fn get(&self, id: MaterialId) -> Option<&Arc<M>> {
        self.materials.get(&id)
    }

    /// Like [`MaterialRegistry::get`], but a miss is an error.
    pub fn lookup(&self, id: MaterialId) -> ResourceResult<Arc<M>> {
        self.materials.get(&id).cloned().ok_or_else(|| {
            error!("Failed to find material with id {id}");
            ResourceError::MaterialNotFound(id)
        })
    }

    pub fn contains(&self, id: MaterialId) -> bool {
        self.materials.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.materials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.materials.is_empty()
    }

    /// Registered ids in ascending order.
    pub fn ids(&self) -> Vec<MaterialId> {
        let mut ids: Vec<MaterialId> = self.materials.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Drop every material. Ids handed out so far stay retired.
    pub fn clear(&mut self) {
        self.materials.clear();
    }

    fn take_id(&mut self) -> MaterialId {
        let id = MaterialId(self.next_id);
        self.next_id += 1;
        id
    }
}

impl<M> Default for MaterialRegistry<M> {
    fn default() -> Self {
        Self::new()
    }
}

/// Assembles a [`Material`] from named shaders in a [`ShaderLibrary`].
///
/// ```no_run
/// # use std::sync::Arc;
/// # use tessera_resources::{MaterialBuilder, MaterialRegistry, ShaderLibrary};
/// # fn example(device: &Arc<tessera_rhi::device::Device>) -> tessera_resources::ResourceResult<()> {
/// let library = ShaderLibrary::new("materials");
/// let mut registry = MaterialRegistry::new();
/// let signature = library.load_root_signature(device, "WorldPosition")?;
///
/// let red = MaterialBuilder::new("ColorRed")
///     .vertex_shader("WorldPosition")
///     .pixel_shader("ColorRed")
///     .root_signature(signature)
///     .color_format(tessera_rhi::vk::Format::B8G8R8A8_UNORM)
///     .build(device, &library, &mut registry)?;
/// # Ok(())
/// # }
/// ```
pub struct MaterialBuilder {
    name: String,
    vertex_shader: Option<String>,
    pixel_shader: Option<String>,
    root_signature: Option<Arc<RootSignature>>,
    color_format: Option<vk::Format>,
}

impl MaterialBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            vertex_shader: None,
            pixel_shader: None,
            root_signature: None,
            color_format: None,
        }
    }

    pub fn vertex_shader(mut self, name: &str) -> Self {
        self.vertex_shader = Some(name.to_string());
        self
    }

    pub fn pixel_shader(mut self, name: &str) -> Self {
        self.pixel_shader = Some(name.to_string());
        self
    }

    pub fn root_signature(mut self, signature: Arc<RootSignature>) -> Self {
        self.root_signature = Some(signature);
        self
    }

    pub fn color_format(mut self, format: vk::Format) -> Self {
        self.color_format = Some(format);
        self
    }

    /// Load the shaders, create the pipeline state and register the result.
    pub fn build(
        self,
        device: &Arc<Device>,
        library: &ShaderLibrary,
        registry: &mut MaterialRegistry<Material>,
    ) -> ResourceResult<MaterialId> {
        let incomplete = |reason| ResourceError::IncompleteMaterial {
            name: self.name.clone(),
            reason,
        };
        let vertex_name = self
            .vertex_shader
            .as_deref()
            .ok_or_else(|| incomplete("no vertex shader"))?;
        let pixel_name = self
            .pixel_shader
            .as_deref()
            .ok_or_else(|| incomplete("no pixel shader"))?;
        let root_signature = self
            .root_signature
            .clone()
            .ok_or_else(|| incomplete("no root signature"))?;
        let color_format = self.color_format.ok_or_else(|| incomplete("no color format"))?;

        let vertex = library.load_shader(device.clone(), vertex_name, ShaderStage::Vertex)?;
        let pixel = library.load_shader(device.clone(), pixel_name, ShaderStage::Pixel)?;

        let pipeline = GraphicsPipelineBuilder::new(&self.name)
            .vertex_shader(&vertex)
            .pixel_shader(&pixel)
            .color_format(color_format)
            .build(device.clone(), &root_signature)?;

        let name = self.name;
        let id = registry.register_with(|id| -> ResourceResult<Material> {
            Ok(Material {
                id,
                name: name.clone(),
                pipeline,
                root_signature,
            })
        })?;

        info!("Material '{name}' registered as {id}");
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_start_at_first_assignable() {
        let mut registry = MaterialRegistry::new();
        let red = registry.register("red");
        let blue = registry.register("blue");

        assert_eq!(red.value(), MaterialId::FIRST_ASSIGNABLE);
        assert_eq!(blue.value(), MaterialId::FIRST_ASSIGNABLE + 1);
        assert!(red.is_assignable());
        assert!(!MaterialId::NONE.is_assignable());
        assert_eq!(*registry.lookup(blue).unwrap(), "blue");
    }

    #[test]
    fn test_lookup_miss_is_an_error() {
        let registry: MaterialRegistry<&str> = MaterialRegistry::new();
        assert!(matches!(
            registry.lookup(MaterialId::new(100)),
            Err(ResourceError::MaterialNotFound(id)) if id == MaterialId::new(100)
        ));
        assert!(registry.get(MaterialId::new(100)).is_none());
    }

    #[test]
    fn test_failed_creation_keeps_id() {
        let mut registry: MaterialRegistry<String> = MaterialRegistry::new();
        let failed: Result<MaterialId, &str> = registry.register_with(|_| Err("no shader"));
        assert!(failed.is_err());

        let id = registry
            .register_with(|id| Ok::<_, &str>(format!("material {}", id.value())))
            .unwrap();
        assert_eq!(id.value(), MaterialId::FIRST_ASSIGNABLE);
        assert_eq!(registry.get(id).map(|m| m.as_str()), Some("material 100"));
    }

    #[test]
    fn test_registries_are_independent() {
        let mut first = MaterialRegistry::new();
        let mut second = MaterialRegistry::new();
        let a = first.register(1u32);
        let b = second.register(2u32);

        assert_eq!(a, b);
        assert_eq!(*first.lookup(a).unwrap(), 1);
        assert_eq!(*second.lookup(b).unwrap(), 2);
    }

    #[test]
    fn test_cleared_ids_are_not_reused() {
        let mut registry = MaterialRegistry::new();
        let old = registry.register(());
        registry.clear();
        assert!(registry.is_empty());

        let new = registry.register(());
        assert!(new > old);
        assert_eq!(registry.ids(), vec![new]);
    }
}
