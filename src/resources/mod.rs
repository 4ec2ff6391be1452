//! Scene loading: turning fetched bytes into a renderable scene graph.
//!
//! The loader never touches the network and never requires a GPU device; it
//! parses an opaque payload, builds CPU-side nodes, then normalizes the result
//! so every asset arrives centered at the origin in a ~2-unit frame with
//! comparable material parameters. On any parse failure the caller substitutes
//! [`placeholder_scene`] so the viewport is never empty.

use thiserror::Error;

use crate::cache::Blob;
use crate::data_structures::model::{Material, MeshData, Model, ModelVertex, Rgba8Image};
use crate::data_structures::scene_graph::{ContainerNode, MeshNode, SceneGraph, SceneNode};

pub mod mesh;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("malformed asset: {0}")]
    Malformed(String),
    #[error("gltf parse failed: {0}")]
    Gltf(#[from] gltf::Error),
    #[error("obj parse failed: {0}")]
    Obj(#[from] tobj::LoadError),
    #[error("unsupported asset format: {0}")]
    Unsupported(String),
}

/// Parses `blob` into a normalized scene graph.
///
/// Format dispatch follows the content type, falling back to sniffing the
/// payload for containers that arrive as `application/octet-stream`.
/// `origin` is carried as the graph label for diagnostics only.
pub fn load_scene(blob: &Blob, origin: &str) -> Result<SceneGraph, ParseError> {
    let content_type = blob.content_type.to_ascii_lowercase();
    let asset_root = if content_type.contains("gltf") {
        load_gltf_node(&blob.data)?
    } else if content_type.contains("obj") {
        Box::new(MeshNode::from_model(mesh::load_obj_model(&blob.data)?))
    } else if content_type == "model/fbx" || content_type == "model/stl" {
        return Err(ParseError::Unsupported(content_type));
    } else if looks_like_gltf(&blob.data) {
        load_gltf_node(&blob.data)?
    } else {
        return Err(ParseError::Unsupported(content_type));
    };

    let mut graph = SceneGraph::new(asset_root, origin, false);
    normalize_materials(&mut graph);
    graph.normalize_framing();
    Ok(graph)
}

/// GLB containers start with the `glTF` magic; embedded JSON documents with a
/// brace. Anything else is not worth handing to the glTF importer.
fn looks_like_gltf(bytes: &[u8]) -> bool {
    bytes.starts_with(b"glTF") || bytes.iter().find(|b| !b.is_ascii_whitespace()) == Some(&b'{')
}

/// Source assets are inconsistent about winding, and provider pipelines leave
/// PBR factors in varying states; every loaded graph passes through here so
/// assets from different origins render comparably.
fn normalize_materials(graph: &mut SceneGraph) {
    graph.for_each_material(|material| {
        material.double_sided = true;
    });
}

fn load_gltf_node(bytes: &[u8]) -> Result<Box<dyn SceneNode>, ParseError> {
    let (document, buffers, images) = gltf::import_slice(bytes)?;

    let mut materials: Vec<Material> = document
        .materials()
        .map(|material| convert_gltf_material(&material, &images))
        .collect();
    // Primitives without a material index fall through to a trailing neutral
    // default, so `materials` is never empty.
    materials.push(Material::neutral("gltf default"));
    let default_material = materials.len() - 1;

    let scene = document
        .default_scene()
        .or_else(|| document.scenes().next())
        .ok_or_else(|| ParseError::Malformed("gltf document contains no scene".into()))?;

    let mut nodes: Vec<Box<dyn SceneNode>> = scene
        .nodes()
        .map(|node| to_scene_node(node, &buffers, &materials, default_material))
        .collect();

    if nodes.is_empty() {
        return Err(ParseError::Malformed("gltf scene contains no nodes".into()));
    }

    Ok(if nodes.len() == 1 {
        nodes.remove(0)
    } else {
        let mut root = ContainerNode::new();
        for node in nodes {
            root.add_child(node);
        }
        Box::new(root)
    })
}

fn convert_gltf_material(material: &gltf::Material, images: &[gltf::image::Data]) -> Material {
    let pbr = material.pbr_metallic_roughness();
    let base_color_image = pbr
        .base_color_texture()
        .and_then(|info| images.get(info.texture().source().index()))
        .and_then(decode_gltf_image);
    Material {
        name: material.name().unwrap_or("unnamed").to_string(),
        base_color: pbr.base_color_factor(),
        metallic: pbr.metallic_factor(),
        roughness: pbr.roughness_factor(),
        double_sided: true,
        unlit: material.unlit(),
        tint: None,
        wireframe: false,
        base_color_image,
    }
}

/// Converts importer pixel data to RGBA8. Uncommon channel layouts are
/// dropped rather than guessed; the material then renders with its factor
/// color alone.
fn decode_gltf_image(data: &gltf::image::Data) -> Option<Rgba8Image> {
    use gltf::image::Format;
    let pixels = match data.format {
        Format::R8G8B8A8 => data.pixels.clone(),
        Format::R8G8B8 => data
            .pixels
            .chunks_exact(3)
            .flat_map(|rgb| [rgb[0], rgb[1], rgb[2], 255])
            .collect(),
        _ => {
            log::warn!("skipping base color texture with format {:?}", data.format);
            return None;
        }
    };
    Some(Rgba8Image {
        pixels,
        width: data.width,
        height: data.height,
    })
}

fn to_scene_node(
    node: gltf::scene::Node,
    buffers: &[gltf::buffer::Data],
    materials: &[Material],
    default_material: usize,
) -> Box<dyn SceneNode> {
    let mut scene_node: Box<dyn SceneNode> = match node.mesh() {
        Some(gltf_mesh) => {
            let mut meshes = Vec::new();
            for primitive in gltf_mesh.primitives() {
                let reader = primitive.reader(|buffer| buffers.get(buffer.index()).map(|v| &v.0[..]));

                let mut vertices = Vec::new();
                if let Some(positions) = reader.read_positions() {
                    for position in positions {
                        vertices.push(ModelVertex {
                            position,
                            tex_coords: Default::default(),
                            normal: Default::default(),
                        });
                    }
                }
                if let Some(normals) = reader.read_normals() {
                    for (i, normal) in normals.enumerate() {
                        if let Some(vertex) = vertices.get_mut(i) {
                            vertex.normal = normal;
                        }
                    }
                }
                if let Some(tex_coords) = reader.read_tex_coords(0).map(|v| v.into_f32()) {
                    for (i, uv) in tex_coords.enumerate() {
                        if let Some(vertex) = vertices.get_mut(i) {
                            vertex.tex_coords = uv;
                        }
                    }
                }

                let indices = match reader.read_indices() {
                    Some(raw) => raw.into_u32().collect::<Vec<u32>>(),
                    // Non-indexed primitives draw vertices in order.
                    None => (0..vertices.len() as u32).collect(),
                };

                meshes.push(MeshData {
                    name: gltf_mesh.name().unwrap_or("unknown_mesh").to_string(),
                    vertices,
                    indices,
                    material: primitive.material().index().unwrap_or(default_material),
                });
            }
            let model = Model {
                meshes,
                materials: materials.to_vec(),
            };
            Box::new(MeshNode::from_model(model))
        }
        None => Box::new(ContainerNode::new()),
    };

    let (position, rotation, scale) = node.transform().decomposed();
    let mut instance = crate::data_structures::instance::Instance::default();
    instance.position = position.into();
    instance.rotation = rotation.into();
    instance.scale = scale.into();
    scene_node.set_local_transform(instance);

    for child in node.children() {
        scene_node.add_child(to_scene_node(child, buffers, materials, default_material));
    }

    scene_node
}

/// The built-in fallback asset: a neutral grey unit cube.
///
/// Always loadable, shown whenever resolution or parsing fails so the
/// viewport keeps displaying something interactive.
pub fn placeholder_scene() -> SceneGraph {
    let positions: [([f32; 3], [f32; 3]); 6] = [
        ([0.0, 0.0, 1.0], [1.0, 0.0, 0.0]),
        ([0.0, 0.0, -1.0], [-1.0, 0.0, 0.0]),
        ([1.0, 0.0, 0.0], [0.0, 0.0, -1.0]),
        ([-1.0, 0.0, 0.0], [0.0, 0.0, 1.0]),
        ([0.0, 1.0, 0.0], [1.0, 0.0, 0.0]),
        ([0.0, -1.0, 0.0], [1.0, 0.0, 0.0]),
    ];
    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);
    for (normal, tangent) in positions {
        let n = cgmath::Vector3::from(normal);
        let t = cgmath::Vector3::from(tangent);
        let b = n.cross(t);
        let base = vertices.len() as u32;
        for (u, v) in [(-0.5, -0.5), (0.5, -0.5), (0.5, 0.5), (-0.5, 0.5)] {
            let p = n * 0.5 + t * u + b * v;
            vertices.push(ModelVertex {
                position: p.into(),
                tex_coords: [u + 0.5, v + 0.5],
                normal,
            });
        }
        indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }

    let model = Model {
        meshes: vec![MeshData {
            name: "placeholder cube".to_string(),
            vertices,
            indices,
            material: 0,
        }],
        materials: vec![Material::neutral("placeholder")],
    };
    let mut graph = SceneGraph::new(
        Box::new(MeshNode::from_model(model)),
        "builtin:placeholder",
        true,
    );
    graph.normalize_framing();
    graph
}
