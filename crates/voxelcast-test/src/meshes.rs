//! Small meshes inside the `[-1, 1]` voxel grid.

use glam::Vec3;
use voxelcast_core::MeshData;

/// One triangle in the `y = 0` plane.
pub fn flat_triangle() -> MeshData {
    MeshData::new(
        vec![
            Vec3::new(-0.5, 0.0, -0.5),
            Vec3::new(0.5, 0.0, -0.5),
            Vec3::new(0.0, 0.0, 0.5),
        ],
        vec![0, 1, 2],
    )
}

/// Axis-aligned cube with half-size `half`, twelve outward-facing triangles.
pub fn cube(half: f32) -> MeshData {
    let positions = (0..8)
        .map(|i| {
            Vec3::new(
                if i & 1 == 0 { -half } else { half },
                if i & 2 == 0 { -half } else { half },
                if i & 4 == 0 { -half } else { half },
            )
        })
        .collect();

    #[rustfmt::skip]
    let indices = vec![
        0, 2, 1, 1, 2, 3, // -z
        4, 5, 6, 5, 7, 6, // +z
        0, 1, 4, 1, 5, 4, // -y
        2, 6, 3, 3, 6, 7, // +y
        0, 4, 2, 2, 4, 6, // -x
        1, 3, 5, 3, 7, 5, // +x
    ];

    MeshData::new(positions, indices)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meshes_are_valid() {
        assert!(flat_triangle().validate().is_ok());

        let cube = cube(0.5);
        assert!(cube.validate().is_ok());
        assert_eq!(cube.positions.len(), 8);
        assert_eq!(cube.index_count(), 36);
    }

    #[test]
    fn cube_faces_point_outward() {
        let cube = cube(1.0);
        for tri in cube.indices.chunks_exact(3) {
            let [a, b, c] = [0, 1, 2].map(|k| cube.positions[tri[k] as usize]);
            let normal = (b - a).cross(c - a);
            let centroid = (a + b + c) / 3.0;
            assert!(normal.dot(centroid) > 0.0, "triangle {tri:?} faces inward");
        }
    }
}
