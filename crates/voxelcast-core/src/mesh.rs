//! OBJ mesh loading.

use std::path::Path;

use glam::Vec3;

use crate::error::{Error, Result};
use crate::types::MeshData;

/// Load a Wavefront OBJ file into flat positions and triangle indices.
///
/// Faces are triangulated. Every model in the file is appended, with its
/// indices offset past the positions of the models before it. Normals,
/// texture coordinates and materials are ignored.
pub fn load_obj(path: impl AsRef<Path>) -> Result<MeshData> {
    let path = path.as_ref();

    let options = tobj::LoadOptions {
        triangulate: true,
        ignore_points: true,
        ignore_lines: true,
        ..Default::default()
    };

    let (models, materials) = tobj::load_obj(path, &options)
        .map_err(|e| Error::MeshLoad(format!("{}: {e}", path.display())))?;

    if let Err(e) = materials {
        tracing::debug!("Ignoring materials of {}: {e}", path.display());
    }

    let mut mesh = MeshData::default();
    for model in &models {
        let positions = &model.mesh.positions;
        if positions.len() % 3 != 0 {
            return Err(Error::MeshLoad(format!(
                "model {:?} has {} position floats, not a multiple of 3",
                model.name,
                positions.len()
            )));
        }

        let base = mesh.positions.len() as u32;
        mesh.positions.extend(
            positions
                .chunks_exact(3)
                .map(|p| Vec3::new(p[0], p[1], p[2])),
        );
        mesh.indices
            .extend(model.mesh.indices.iter().map(|&i| base + i));
    }

    mesh.validate()?;

    tracing::info!(
        "Loaded {}: {} models, {} vertices, {} triangles",
        path.display(),
        models.len(),
        mesh.positions.len(),
        mesh.indices.len() / 3
    );

    Ok(mesh)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_obj(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".obj").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn single_triangle() {
        let file = write_obj("v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\n");
        let mesh = load_obj(file.path()).unwrap();

        assert_eq!(mesh.positions.len(), 3);
        assert_eq!(mesh.indices, vec![0, 1, 2]);
        assert_eq!(mesh.index_count(), 3);
        assert_eq!(mesh.positions[1], Vec3::X);
    }

    #[test]
    fn quad_is_triangulated() {
        let file = write_obj("v 0 0 0\nv 1 0 0\nv 1 1 0\nv 0 1 0\nf 1 2 3 4\n");
        let mesh = load_obj(file.path()).unwrap();

        assert_eq!(mesh.positions.len(), 4);
        assert_eq!(mesh.index_count(), 6);
        assert!(mesh.indices.iter().all(|&i| i < 4));
    }

    #[test]
    fn multiple_objects_are_offset() {
        let file = write_obj(
            "o a\nv 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\n\
             o b\nv 0 0 1\nv 1 0 1\nv 0 1 1\nf 4 5 6\n",
        );
        let mesh = load_obj(file.path()).unwrap();

        assert_eq!(mesh.positions.len(), 6);
        assert_eq!(mesh.index_count(), 6);
        assert!(mesh.validate().is_ok());
        assert_eq!(mesh.positions[mesh.indices[3] as usize].z, 1.0);
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = load_obj("definitely/not/here.obj").unwrap_err();
        assert!(matches!(err, Error::MeshLoad(_)));
    }

    #[test]
    fn file_without_faces_is_rejected() {
        let file = write_obj("v 0 0 0\nv 1 0 0\n");
        assert!(load_obj(file.path()).is_err());
    }
}
