//! The three demo scenes.
//!
//! Scene layout is kept separate from GPU object creation: every layout
//! function takes an `add` callback that creates one node, so the same layout
//! builds real mesh nodes in the binary and plain nodes in tests.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, anyhow};
use clap::ValueEnum;
use glam::Vec3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

use tessera_core::DemoConfig;
use tessera_renderer::Renderer;
use tessera_resources::{MaterialBuilder, MaterialId, ResourceError, ResourceResult, ShaderLibrary};
use tessera_rhi::pipeline::RootSignature;
use tessera_scene::{MeshInstance, NodeId, Scene, SceneResult, Vertex, create_mesh, create_mesh_node};

/// The triangle every demo draws.
pub const TRIANGLE: [Vertex; 3] = [[-0.1, -0.1, 0.0], [0.0, 0.1, 0.0], [0.1, -0.1, 0.0]];

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum DemoKind {
    /// One red triangle in local space.
    #[value(name = "plain_triangle")]
    PlainTriangle,
    /// Many triangles sharing one mesh, alternating two materials.
    #[value(name = "mesh_batching")]
    MeshBatching,
    /// Nested transforms: a rotated child of a rotated parent.
    #[value(name = "world_space")]
    WorldSpace,
}

impl DemoKind {
    pub fn from_name(name: &str) -> anyhow::Result<Self> {
        <Self as ValueEnum>::from_str(name, false).map_err(|_| {
            anyhow!("unknown demo '{name}', expected plain_triangle, mesh_batching or world_space")
        })
    }
}

/// Build `kind` and hand the scene to the renderer.
pub fn build(
    kind: DemoKind,
    renderer: &mut Renderer,
    library: &ShaderLibrary,
    config: &DemoConfig,
) -> anyhow::Result<()> {
    let scene = match kind {
        DemoKind::PlainTriangle => plain_triangle(renderer, library),
        DemoKind::MeshBatching => mesh_batching(renderer, library, config),
        DemoKind::WorldSpace => world_space(renderer, library),
    }
    .with_context(|| format!("failed to build the {kind:?} demo"))?;

    info!(
        "{kind:?} demo: {} nodes, {} materials",
        scene.len(),
        renderer.materials().len()
    );
    renderer.set_scene(scene);
    Ok(())
}

fn plain_triangle(renderer: &mut Renderer, library: &ShaderLibrary) -> anyhow::Result<Scene<MeshInstance>> {
    let device = Arc::clone(renderer.device());
    let signature = library.load_root_signature(&device, "Base")?;
    let red = material(renderer, library, "LocalPosition", "ColorRed", signature)?;
    let mesh = create_mesh(&device, &TRIANGLE, "triangle")?;

    let mut scene = Scene::new();
    let root = scene.root();
    create_mesh_node(&mut scene, root, &device, renderer.materials(), red, &mesh)?;
    Ok(scene)
}

fn mesh_batching(
    renderer: &mut Renderer,
    library: &ShaderLibrary,
    config: &DemoConfig,
) -> anyhow::Result<Scene<MeshInstance>> {
    let device = Arc::clone(renderer.device());
    let signature = library.load_root_signature(&device, "WorldPosition")?;
    let red = material(renderer, library, "WorldPosition", "ColorRed", Arc::clone(&signature))?;
    let blue = material(renderer, library, "WorldPosition", "ColorBlue", signature)?;
    let mesh = create_mesh(&device, &TRIANGLE, "triangle")?;

    let positions = scatter_positions(config.triangle_count, config.seed);
    let materials = renderer.materials();
    let mut scene = Scene::new();
    layout_batching(&mut scene, &positions, [red, blue], |scene, parent, id| {
        create_mesh_node(scene, parent, &device, materials, id, &mesh)
    })?;
    Ok(scene)
}

fn world_space(renderer: &mut Renderer, library: &ShaderLibrary) -> anyhow::Result<Scene<MeshInstance>> {
    let device = Arc::clone(renderer.device());
    let signature = library.load_root_signature(&device, "WorldPosition")?;
    let red = material(renderer, library, "WorldPosition", "ColorRed", signature)?;
    let mesh = create_mesh(&device, &TRIANGLE, "triangle")?;

    let materials = renderer.materials();
    let mut scene = Scene::new();
    layout_world_space(&mut scene, red, |scene, parent, id| {
        create_mesh_node(scene, parent, &device, materials, id, &mesh)
    })?;
    Ok(scene)
}

/// Point at the shader build script when compiled bytecode is missing from
/// `dir`. Other errors pass through unchanged.
pub fn with_shader_hint(error: anyhow::Error, dir: &Path) -> anyhow::Error {
    let missing = error.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<ResourceError>(),
            Some(ResourceError::MissingBytecode { .. })
        )
    });
    if missing {
        error.context(format!(
            "no compiled shaders in '{}'; run materials/build.sh (needs glslc) first",
            dir.display()
        ))
    } else {
        error
    }
}

/// Build a material named after its pixel shader.
fn material(
    renderer: &mut Renderer,
    library: &ShaderLibrary,
    vertex: &str,
    pixel: &str,
    signature: Arc<RootSignature>,
) -> ResourceResult<MaterialId> {
    let device = Arc::clone(renderer.device());
    let format = renderer.color_format();
    MaterialBuilder::new(pixel)
        .vertex_shader(vertex)
        .pixel_shader(pixel)
        .root_signature(signature)
        .color_format(format)
        .build(&device, library, renderer.materials_mut())
}

/// `count` points with x and y uniform in [-1, 1] and z = 0.
pub fn scatter_positions(count: u32, seed: Option<u64>) -> Vec<Vec3> {
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    (0..count)
        .map(|_| Vec3::new(rng.gen_range(-1.0..=1.0), rng.gen_range(-1.0..=1.0), 0.0))
        .collect()
}

/// One node per position under the root, even indices with the first
/// material and odd ones with the second.
pub fn layout_batching<D, F>(
    scene: &mut Scene<D>,
    positions: &[Vec3],
    materials: [MaterialId; 2],
    mut add: F,
) -> SceneResult<Vec<NodeId>>
where
    F: FnMut(&mut Scene<D>, NodeId, MaterialId) -> SceneResult<NodeId>,
{
    let root = scene.root();
    let mut nodes = Vec::with_capacity(positions.len());
    for (i, &position) in positions.iter().enumerate() {
        let node = add(scene, root, materials[i % 2])?;
        scene.translate(node, position)?;
        nodes.push(node);
    }
    Ok(nodes)
}

#[derive(Clone, Copy, Debug)]
pub struct WorldSpaceNodes {
    pub rotated_one: NodeId,
    pub rotated_two: NodeId,
    pub straight: NodeId,
}

/// Two nested nodes that each translate by 0.3 along x and then rotate 90
/// degrees about z, plus an untransformed sibling of the outer one.
pub fn layout_world_space<D, F>(scene: &mut Scene<D>, material: MaterialId, mut add: F) -> SceneResult<WorldSpaceNodes>
where
    F: FnMut(&mut Scene<D>, NodeId, MaterialId) -> SceneResult<NodeId>,
{
    let root = scene.root();

    let rotated_one = add(scene, root, material)?;
    scene.translate(rotated_one, Vec3::new(0.3, 0.0, 0.0))?;
    scene.rotate_z(rotated_one, 90.0)?;

    let rotated_two = add(scene, rotated_one, material)?;
    scene.translate(rotated_two, Vec3::new(0.3, 0.0, 0.0))?;
    scene.rotate_z(rotated_two, 90.0)?;

    let straight = add(scene, root, material)?;

    Ok(WorldSpaceNodes {
        rotated_one,
        rotated_two,
        straight,
    })
}

#[cfg(test)]
mod tests {
    use glam::Mat4;

    use super::*;

    fn add_plain(scene: &mut Scene<()>, parent: NodeId, material: MaterialId) -> SceneResult<NodeId> {
        scene.add_node(parent, material, Some(()))
    }

    fn origin_of(scene: &Scene<()>, node: NodeId) -> Vec3 {
        scene.world_transform(node).unwrap().transform_point3(Vec3::ZERO)
    }

    #[test]
    fn test_demo_names_parse() {
        assert_eq!(DemoKind::from_name("plain_triangle").unwrap(), DemoKind::PlainTriangle);
        assert_eq!(DemoKind::from_name("mesh_batching").unwrap(), DemoKind::MeshBatching);
        assert_eq!(DemoKind::from_name("world_space").unwrap(), DemoKind::WorldSpace);
        assert!(DemoKind::from_name("deferred").is_err());
    }

    #[test]
    fn test_missing_bytecode_mentions_build_script() {
        let missing = anyhow::Error::from(ResourceError::MissingBytecode {
            kind: "vertex",
            path: "materials/WorldPosition.vertx.spv".into(),
        })
        .context("failed to build the MeshBatching demo");

        let hinted = with_shader_hint(missing, Path::new("materials"));
        assert!(format!("{hinted:#}").contains("materials/build.sh"));

        let other = with_shader_hint(anyhow!("unknown demo"), Path::new("materials"));
        assert!(!format!("{other:#}").contains("build.sh"));
    }

    #[test]
    fn test_scatter_stays_in_clip_square() {
        let positions = scatter_positions(200, Some(42));
        assert_eq!(positions.len(), 200);
        assert!(positions.iter().all(|p| p.x.abs() <= 1.0 && p.y.abs() <= 1.0 && p.z == 0.0));
    }

    #[test]
    fn test_scatter_is_reproducible_with_seed() {
        assert_eq!(scatter_positions(10, Some(7)), scatter_positions(10, Some(7)));
    }

    #[test]
    fn test_batching_alternates_materials() {
        let red = MaterialId::new(100);
        let blue = MaterialId::new(101);
        let positions = scatter_positions(5, Some(1));

        let mut scene = Scene::new();
        let nodes = layout_batching(&mut scene, &positions, [red, blue], add_plain).unwrap();

        let materials: Vec<MaterialId> = nodes
            .iter()
            .map(|&n| scene.node(n).unwrap().material())
            .collect();
        assert_eq!(materials, vec![red, blue, red, blue, red]);
        for (node, position) in nodes.iter().zip(&positions) {
            assert!((origin_of(&scene, *node) - *position).length() < 1e-6);
        }
    }

    #[test]
    fn test_world_space_nesting() {
        let mut scene = Scene::new();
        let nodes = layout_world_space(&mut scene, MaterialId::new(100), add_plain).unwrap();

        assert!((origin_of(&scene, nodes.rotated_one) - Vec3::new(0.0, 0.3, 0.0)).length() < 1e-6);
        assert!((origin_of(&scene, nodes.rotated_two) - Vec3::new(-0.3, 0.3, 0.0)).length() < 1e-6);
        assert_eq!(scene.world_transform(nodes.straight).unwrap(), Mat4::IDENTITY);
        assert_eq!(
            scene.node(nodes.rotated_two).unwrap().parent(),
            Some(nodes.rotated_one)
        );
    }
}
