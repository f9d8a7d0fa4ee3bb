use super::clip::Clip;
use super::pose::{frame_pose, PoseSpace};
use crate::error::Error;
use glam::Vec3;
use serde::Deserialize;
use static_assertions::const_assert_eq;

/// One joint influence on one vertex, as delivered by the loader.
#[derive(Debug, Clone, Deserialize)]
pub struct WeightRecord {
    pub joint: usize,
    pub bias: f32,
    pub offset: [f32; 3],
}

/// A vertex referencing a contiguous run of weights.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VertexRecord {
    pub weight_start: usize,
    pub weight_count: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MeshRecord {
    pub vertices: Vec<VertexRecord>,
    pub weights: Vec<WeightRecord>,
    pub triangles: Vec<[usize; 3]>,
}

/// Bind-time vertex output, laid out for direct upload by the renderer.
///
/// Each vertex carries exactly two joint influences; vertices with fewer
/// original weights are padded with zero-bias entries.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct SkinnedVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub joints: [u32; 2],
    pub weights: [f32; 2],
}

const_assert_eq!(core::mem::size_of::<SkinnedVertex>(), 40);

/// A mesh bound against a clip's frame-0 pose.
#[derive(Debug, Clone)]
pub struct SkinnedMesh {
    pub vertices: Vec<SkinnedVertex>,
    pub triangles: Vec<[usize; 3]>,
}

impl SkinnedMesh {
    /// Raw vertex bytes for the renderer.
    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }
}

/// Pick the two heaviest influences of a weight run.
///
/// Comparison is strict, so among equal biases the first one seen wins. Runs
/// longer than two entries get the kept pair renormalized to sum 1; shorter
/// runs keep their raw biases, padded with zero-bias entries.
fn reduce_influences(run: &[WeightRecord]) -> ([u32; 2], [f32; 2]) {
    let mut joints = [0u32; 2];
    let mut biases = [0.0f32; 2];
    for weight in run {
        if weight.bias > biases[0] {
            joints[1] = joints[0];
            biases[1] = biases[0];
            joints[0] = weight.joint as u32;
            biases[0] = weight.bias;
        } else if weight.bias > biases[1] {
            joints[1] = weight.joint as u32;
            biases[1] = weight.bias;
        }
    }
    if run.len() > 2 {
        let sum = biases[0] + biases[1];
        if sum > 0.0 {
            biases[0] /= sum;
            biases[1] /= sum;
        }
    }
    (joints, biases)
}

/// Bind a mesh against a clip: compute bind-pose vertex positions from the
/// full weight runs, reduce each vertex to its two heaviest influences and
/// rebuild smooth vertex normals.
pub fn bind(clip: &Clip, mesh: &MeshRecord) -> Result<SkinnedMesh, Error> {
    for (w, weight) in mesh.weights.iter().enumerate() {
        if weight.joint >= clip.joints.len() {
            return Err(Error::WeightJointOutOfBounds {
                weight: w,
                joint: weight.joint,
                count: clip.joints.len(),
            });
        }
    }

    // Bind pose is evaluated once, in hierarchy-composed space.
    let bind_pose = frame_pose(clip, 0, PoseSpace::Bound)?;

    let mut vertices = Vec::with_capacity(mesh.vertices.len());
    for (v, vertex) in mesh.vertices.iter().enumerate() {
        let end = vertex.weight_start + vertex.weight_count;
        let run = mesh
            .weights
            .get(vertex.weight_start..end)
            .ok_or(Error::WeightRunOutOfBounds {
                vertex: v,
                start: vertex.weight_start,
                end,
                count: mesh.weights.len(),
            })?;

        // Weighted average of joint-space offsets; biases are expected to
        // sum to 1 but are not verified.
        let mut position = Vec3::ZERO;
        for weight in run {
            let joint = &bind_pose[weight.joint];
            let rotated = joint.orientation * Vec3::from(weight.offset);
            position += (joint.position + rotated) * weight.bias;
        }

        let (joints, weights) = reduce_influences(run);
        vertices.push(SkinnedVertex {
            position: position.to_array(),
            normal: [0.0; 3],
            joints,
            weights,
        });
    }

    let mut normals = vec![Vec3::ZERO; vertices.len()];
    for (t, tri) in mesh.triangles.iter().enumerate() {
        for &index in tri {
            if index >= vertices.len() {
                return Err(Error::TriangleOutOfBounds {
                    triangle: t,
                    vertex: index,
                    count: vertices.len(),
                });
            }
        }
        let v0 = Vec3::from(vertices[tri[0]].position);
        let v1 = Vec3::from(vertices[tri[1]].position);
        let v2 = Vec3::from(vertices[tri[2]].position);
        // Unnormalized, so larger faces weigh more in the smoothed result.
        let face = (v2 - v1).cross(v0 - v2);
        normals[tri[0]] += face;
        normals[tri[1]] += face;
        normals[tri[2]] += face;
    }
    for (vertex, normal) in vertices.iter_mut().zip(&normals) {
        vertex.normal = normal.normalize_or_zero().to_array();
    }

    Ok(SkinnedMesh {
        vertices,
        triangles: mesh.triangles.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rig::clip::{ClipRecord, JointBaseRecord, JointRecord};

    fn bind_clip() -> Clip {
        // Two independent root joints; frame 0 repeats the base values.
        let record = ClipRecord {
            name: "bind".to_string(),
            frame_rate: 24.0,
            base_frame: vec![
                JointBaseRecord {
                    position: [0.0, 0.0, 0.0],
                    orientation: [0.0, 0.0, 0.0],
                },
                JointBaseRecord {
                    position: [0.0, 2.0, 0.0],
                    orientation: [0.0, 0.0, 0.0],
                },
            ],
            frames: vec![vec![]],
            hierarchy: vec![
                JointRecord {
                    name: "a".to_string(),
                    parent: -1,
                    flags: 0,
                    index: 0,
                },
                JointRecord {
                    name: "b".to_string(),
                    parent: -1,
                    flags: 0,
                    index: 0,
                },
            ],
        };
        Clip::from_record(record).unwrap()
    }

    fn weight(joint: usize, bias: f32, offset: [f32; 3]) -> WeightRecord {
        WeightRecord {
            joint,
            bias,
            offset,
        }
    }

    #[test]
    fn test_single_weight_vertex_position() {
        let clip = bind_clip();
        let mesh = MeshRecord {
            vertices: vec![VertexRecord {
                weight_start: 0,
                weight_count: 1,
            }],
            weights: vec![weight(1, 1.0, [1.0, 0.0, 0.0])],
            triangles: vec![],
        };

        let bound = bind(&clip, &mesh).unwrap();
        // Joint 1 sits at (0, 2, 0) with identity-equivalent orientation.
        assert_eq!(bound.vertices[0].position, [1.0, 2.0, 0.0]);
        assert_eq!(bound.vertices[0].joints, [1, 0]);
        assert_eq!(bound.vertices[0].weights, [1.0, 0.0]);
    }

    #[test]
    fn test_weighted_average_of_two_joints() {
        let clip = bind_clip();
        let mesh = MeshRecord {
            vertices: vec![VertexRecord {
                weight_start: 0,
                weight_count: 2,
            }],
            weights: vec![
                weight(0, 0.5, [0.0, 0.0, 0.0]),
                weight(1, 0.5, [0.0, 0.0, 0.0]),
            ],
            triangles: vec![],
        };

        let bound = bind(&clip, &mesh).unwrap();
        // Midpoint of joints at y=0 and y=2.
        assert_eq!(bound.vertices[0].position, [0.0, 1.0, 0.0]);
        // Two raw weights are kept without renormalization.
        assert_eq!(bound.vertices[0].weights, [0.5, 0.5]);
    }

    #[test]
    fn test_reduction_keeps_two_heaviest_and_renormalizes() {
        let run = [
            weight(3, 0.2, [0.0; 3]),
            weight(5, 0.5, [0.0; 3]),
            weight(7, 0.3, [0.0; 3]),
        ];
        let (joints, biases) = reduce_influences(&run);
        assert_eq!(joints, [5, 7]);
        let sum = biases[0] + biases[1];
        assert!((sum - 1.0).abs() < 1e-6, "kept biases must sum to 1, got {}", sum);
        assert!((biases[0] - 0.625).abs() < 1e-6);
        assert!((biases[1] - 0.375).abs() < 1e-6);
    }

    #[test]
    fn test_reduction_tie_first_seen_wins() {
        let run = [
            weight(1, 0.4, [0.0; 3]),
            weight(2, 0.4, [0.0; 3]),
            weight(3, 0.2, [0.0; 3]),
        ];
        let (joints, _) = reduce_influences(&run);
        assert_eq!(joints, [1, 2], "equal biases keep first-seen ordering");
    }

    #[test]
    fn test_normals_point_along_face_winding() {
        let clip = bind_clip();
        // Three vertices in the xy plane attached to joint 0 at the origin.
        let mesh = MeshRecord {
            vertices: vec![
                VertexRecord {
                    weight_start: 0,
                    weight_count: 1,
                },
                VertexRecord {
                    weight_start: 1,
                    weight_count: 1,
                },
                VertexRecord {
                    weight_start: 2,
                    weight_count: 1,
                },
            ],
            weights: vec![
                weight(0, 1.0, [0.0, 0.0, 0.0]),
                weight(0, 1.0, [1.0, 0.0, 0.0]),
                weight(0, 1.0, [0.0, 1.0, 0.0]),
            ],
            triangles: vec![[0, 1, 2]],
        };

        let bound = bind(&clip, &mesh).unwrap();
        // (v2 - v1) x (v0 - v2) = (-1, 1, 0) x (0, -1, 0) = (0, 0, 1)
        for vertex in &bound.vertices {
            assert_eq!(vertex.normal, [0.0, 0.0, 1.0]);
        }
    }

    #[test]
    fn test_bad_weight_run_is_rejected() {
        let clip = bind_clip();
        let mesh = MeshRecord {
            vertices: vec![VertexRecord {
                weight_start: 0,
                weight_count: 3,
            }],
            weights: vec![weight(0, 1.0, [0.0; 3])],
            triangles: vec![],
        };
        let err = bind(&clip, &mesh).unwrap_err();
        assert!(matches!(err, Error::WeightRunOutOfBounds { vertex: 0, .. }));
    }
}
