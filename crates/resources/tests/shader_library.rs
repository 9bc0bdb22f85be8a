//! Loading root-signature descriptions and bytecode from a materials directory.

use tessera_resources::{BytecodeKind, ResourceError, ShaderLibrary};
use tessera_rhi::pipeline::ShaderVisibility;

fn write(dir: &std::path::Path, file: &str, contents: &[u8]) {
    std::fs::write(dir.join(file), contents).expect("write fixture");
}

#[test]
fn test_material_set_resolves_by_suffix() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "WorldPosition.vertx.spv", &[0x03, 0x02, 0x23, 0x07]);
    write(dir.path(), "ColorRed.pixel.spv", &[0x03, 0x02, 0x23, 0x07]);
    write(
        dir.path(),
        "WorldPosition.rsign.toml",
        br#"
[[push_constants]]
name = "instance"
visibility = "vertex"
offset = 0
size = 8

[[push_constants]]
name = "tint"
visibility = "pixel"
offset = 16
size = 16
"#,
    );

    let library = ShaderLibrary::new(dir.path());
    assert_eq!(
        library.load_bytes("WorldPosition", BytecodeKind::Vertex).unwrap().len(),
        4
    );
    assert!(library.load_bytes("ColorRed", BytecodeKind::Pixel).is_ok());

    let ranges = library
        .load_root_signature_desc("WorldPosition")
        .unwrap()
        .ranges();
    assert_eq!(ranges.len(), 2);
    assert_eq!(ranges[1].visibility, ShaderVisibility::Pixel);
    assert_eq!(ranges[1].end(), 32);
}

#[test]
fn test_pixel_shader_is_not_found_under_vertex_suffix() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "ColorBlue.pixel.spv", &[0x03, 0x02, 0x23, 0x07]);

    let library = ShaderLibrary::new(dir.path());
    assert!(matches!(
        library.load_bytes("ColorBlue", BytecodeKind::Vertex),
        Err(ResourceError::MissingBytecode { .. })
    ));
}

#[test]
fn test_shipped_root_signatures_parse() {
    let library = ShaderLibrary::new(concat!(env!("CARGO_MANIFEST_DIR"), "/../../materials"));

    let base = library.load_root_signature_desc("Base").unwrap();
    assert!(base.ranges().is_empty());

    let world = library.load_root_signature_desc("WorldPosition").unwrap().ranges();
    assert_eq!(world.len(), 1);
    assert_eq!(world[0].visibility, ShaderVisibility::Vertex);
    assert_eq!((world[0].offset, world[0].size), (0, 8));
}
