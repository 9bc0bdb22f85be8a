//! Per-frame traversal: update every renderable node, then draw them in
//! material order.

use glam::Mat4;

use tessera_resources::{Material, MaterialRegistry};
use tessera_rhi::command::CommandList;

use crate::batch::{BatchStep, RenderBatch, RenderPass};
use crate::error::{SceneError, SceneResult};
use crate::mesh::Drawable;
use crate::node::{NodeId, Scene};

/// Rebuild `batch` from the scene, calling `update` on each renderable node
/// in traversal order before it is keyed.
pub fn collect_batch<D, E, F>(scene: &mut Scene<D>, batch: &mut RenderBatch<NodeId>, mut update: F) -> Result<(), E>
where
    F: FnMut(&mut D, &Mat4) -> Result<(), E>,
    E: From<SceneError>,
{
    batch.clear();
    scene.for_each_renderable_mut(|id, material, drawable, world| {
        update(drawable, world)?;
        batch.push(RenderPass::Opaque, material, id)?;
        Ok(())
    })
}

/// Record constant uploads for every renderable node and key it into `batch`.
pub fn record_updates<D: Drawable>(
    scene: &mut Scene<D>,
    batch: &mut RenderBatch<NodeId>,
    cmd: &mut CommandList<'_>,
    delta_time: f32,
) -> SceneResult<()> {
    collect_batch(scene, batch, |drawable, world| drawable.update(cmd, world, delta_time))
}

/// Record draws in key order, binding each material once. Returns the number
/// of material switches.
pub fn record_draws<D: Drawable>(
    scene: &Scene<D>,
    batch: &RenderBatch<NodeId>,
    materials: &MaterialRegistry<Material>,
    cmd: &mut CommandList<'_>,
) -> SceneResult<usize> {
    batch.walk(|step| match step {
        BatchStep::SwitchMaterial(id) => {
            materials.lookup(id)?.bind(cmd);
            Ok(())
        }
        BatchStep::Draw(_, &node) => scene
            .node(node)
            .and_then(|n| n.drawable())
            .ok_or(SceneError::InvalidNode(node))?
            .draw(cmd),
    })
}

#[cfg(test)]
mod tests {
    use glam::Vec3;
    use tessera_resources::MaterialId;

    use super::*;

    #[test]
    fn test_batch_groups_nodes_by_material() {
        let mut scene: Scene<&str> = Scene::new();
        let root = scene.root();
        let a = scene.add_node(root, MaterialId::new(105), Some("a")).unwrap();
        let b = scene.add_node(root, MaterialId::new(105), Some("b")).unwrap();
        let c = scene.add_node(root, MaterialId::new(103), Some("c")).unwrap();
        let d = scene.add_node(root, MaterialId::new(109), Some("d")).unwrap();

        let mut updated = Vec::new();
        let mut batch = RenderBatch::new();
        collect_batch(&mut scene, &mut batch, |drawable, _| {
            updated.push(*drawable);
            Ok::<_, SceneError>(())
        })
        .unwrap();

        assert_eq!(updated, vec!["a", "b", "c", "d"]);
        let drawn: Vec<NodeId> = batch.keys().map(|key| *batch.object(key).unwrap()).collect();
        assert_eq!(drawn, vec![c, a, b, d]);
    }

    #[test]
    fn test_batch_is_rebuilt_each_frame() {
        let mut scene: Scene<()> = Scene::new();
        let root = scene.root();
        scene.add_node(root, MaterialId::new(100), Some(())).unwrap();

        let mut batch = RenderBatch::new();
        for _ in 0..3 {
            collect_batch(&mut scene, &mut batch, |_, _| Ok::<_, SceneError>(())).unwrap();
        }
        assert_eq!(batch.len(), 1);
    }

    #[test]
    fn test_update_sees_world_transform() {
        let mut scene: Scene<Vec3> = Scene::new();
        let root = scene.root();
        let group = scene.add_group(root).unwrap();
        scene.translate(group, Vec3::new(1.0, 0.0, 0.0)).unwrap();
        let child = scene
            .add_node(group, MaterialId::new(100), Some(Vec3::ZERO))
            .unwrap();
        scene.translate(child, Vec3::new(0.0, 2.0, 0.0)).unwrap();

        let mut batch = RenderBatch::new();
        collect_batch(&mut scene, &mut batch, |position, world| {
            *position = world.transform_point3(Vec3::ZERO);
            Ok::<_, SceneError>(())
        })
        .unwrap();

        let moved = scene.node(child).unwrap().drawable().unwrap();
        assert!((*moved - Vec3::new(1.0, 2.0, 0.0)).length() < 1e-6);
    }

    #[test]
    fn test_update_error_aborts_collection() {
        let mut scene: Scene<u32> = Scene::new();
        let root = scene.root();
        scene.add_node(root, MaterialId::new(100), Some(1)).unwrap();
        scene.add_node(root, MaterialId::new(100), Some(2)).unwrap();

        let mut batch = RenderBatch::new();
        let result = collect_batch(&mut scene, &mut batch, |value, _| {
            if *value == 1 {
                Err(SceneError::EmptyMesh("broken".into()))
            } else {
                Ok(())
            }
        });
        assert!(matches!(result, Err(SceneError::EmptyMesh(_))));
        assert!(batch.is_empty());
    }
}
