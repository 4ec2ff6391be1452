//! Wavefront OBJ parsing into CPU mesh data.

use std::io::{BufReader, Cursor};

use crate::data_structures::model::{Material, MeshData, Model, ModelVertex};
use crate::resources::ParseError;

/// Parses an OBJ payload into a [`Model`].
///
/// Material libraries cannot be resolved from a single opaque payload, so
/// every mesh gets the neutral physically-based default (0.5 metallic and
/// roughness) the way unspecified materials are normalized everywhere else.
pub fn load_obj_model(bytes: &[u8]) -> Result<Model, ParseError> {
    let cursor = Cursor::new(bytes);
    let mut reader = BufReader::new(cursor);

    let (models, _materials) = tobj::load_obj_buf(
        &mut reader,
        &tobj::LoadOptions {
            triangulate: true,
            single_index: true,
            ..Default::default()
        },
        // .mtl references point at sibling files we do not have.
        |_path| Err(tobj::LoadError::OpenFileFailed),
    )?;

    if models.is_empty() {
        return Err(ParseError::Malformed("obj payload contains no meshes".into()));
    }

    let meshes = models
        .into_iter()
        .map(|m| {
            let vertices = (0..m.mesh.positions.len() / 3)
                .map(|i| ModelVertex {
                    position: [
                        m.mesh.positions[i * 3],
                        m.mesh.positions[i * 3 + 1],
                        m.mesh.positions[i * 3 + 2],
                    ],
                    tex_coords: [
                        m.mesh.texcoords.get(i * 2).map_or(0.0, |f| *f),
                        1.0 - m.mesh.texcoords.get(i * 2 + 1).map_or(0.0, |f| *f),
                    ],
                    normal: [
                        m.mesh.normals.get(i * 3).map_or(0.0, |f| *f),
                        m.mesh.normals.get(i * 3 + 1).map_or(0.0, |f| *f),
                        m.mesh.normals.get(i * 3 + 2).map_or(0.0, |f| *f),
                    ],
                })
                .collect::<Vec<_>>();

            MeshData {
                name: if m.name.is_empty() {
                    "unnamed_mesh".to_string()
                } else {
                    m.name
                },
                vertices,
                indices: m.mesh.indices,
                material: 0,
            }
        })
        .collect();

    Ok(Model {
        meshes,
        materials: vec![Material::neutral("obj default")],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRIANGLE_OBJ: &str = "\
v 0.0 0.0 0.0
v 1.0 0.0 0.0
v 0.0 1.0 0.0
f 1 2 3
";

    #[test]
    fn parses_a_minimal_obj() {
        let model = load_obj_model(TRIANGLE_OBJ.as_bytes()).unwrap();
        assert_eq!(model.meshes.len(), 1);
        assert_eq!(model.meshes[0].vertices.len(), 3);
        assert_eq!(model.meshes[0].indices, vec![0, 1, 2]);
        assert_eq!(model.materials.len(), 1);
        assert_eq!(model.materials[0].metallic, 0.5);
        assert_eq!(model.materials[0].roughness, 0.5);
    }

    #[test]
    fn empty_payload_is_malformed() {
        assert!(load_obj_model(b"# nothing here\n").is_err());
    }
}
