use super::clip::{
    Clip, CHANNEL_POS_X, CHANNEL_POS_Y, CHANNEL_POS_Z, CHANNEL_ROT_X, CHANNEL_ROT_Y, CHANNEL_ROT_Z,
};
use crate::error::Error;
use glam::{Quat, Vec3};

/// Space a reconstructed pose is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoseSpace {
    /// Parent-relative joint transforms, exactly as stored.
    Local,
    /// Transforms composed through the hierarchy into model space
    /// (parent position/orientation folded into each child).
    Bound,
}

/// One joint's reconstructed transform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JointPose {
    pub position: Vec3,
    pub orientation: Quat,
}

/// Rebuild a unit quaternion from its stored xyz part.
///
/// The source format never stores w; it is recomputed as
/// `-sqrt(|1 - x^2 - y^2 - z^2|)`. The sign is always non-positive; this
/// matches the reference playback and must not be "corrected".
pub fn reconstruct_orientation(xyz: Vec3) -> Quat {
    let w = -(1.0 - xyz.length_squared()).abs().sqrt();
    Quat::from_xyzw(xyz.x, xyz.y, xyz.z, w)
}

/// Reconstruct the full joint pose list for one frame of a clip.
///
/// Each joint starts from its base-frame transform; flagged channels are
/// overwritten with values consumed from the frame's flat delta array in
/// posX, posY, posZ, rotX, rotY, rotZ order, starting at the joint's offset.
/// With `PoseSpace::Bound`, parent transforms are folded in as joints are
/// visited; the parents-first hierarchy order guarantees the parent pose is
/// already computed.
pub fn frame_pose(clip: &Clip, frame: usize, space: PoseSpace) -> Result<Vec<JointPose>, Error> {
    let Some(deltas) = clip.frames.get(frame) else {
        return Err(Error::FrameOutOfRange {
            clip: clip.name.clone(),
            frame,
            count: clip.frames.len(),
        });
    };

    let mut poses: Vec<JointPose> = Vec::with_capacity(clip.joints.len());
    for (i, joint) in clip.joints.iter().enumerate() {
        let base = &clip.base[i];
        let mut position = base.position;
        let mut rotation = base.orientation;

        let mut cursor = joint.offset;
        let mut next = |out: &mut f32| -> Result<(), Error> {
            *out = *deltas
                .get(cursor)
                .ok_or(Error::FrameTooShort { frame, joint: i })?;
            cursor += 1;
            Ok(())
        };

        if joint.channels & CHANNEL_POS_X != 0 {
            next(&mut position.x)?;
        }
        if joint.channels & CHANNEL_POS_Y != 0 {
            next(&mut position.y)?;
        }
        if joint.channels & CHANNEL_POS_Z != 0 {
            next(&mut position.z)?;
        }
        if joint.channels & CHANNEL_ROT_X != 0 {
            next(&mut rotation.x)?;
        }
        if joint.channels & CHANNEL_ROT_Y != 0 {
            next(&mut rotation.y)?;
        }
        if joint.channels & CHANNEL_ROT_Z != 0 {
            next(&mut rotation.z)?;
        }

        let mut pose = JointPose {
            position,
            orientation: reconstruct_orientation(rotation),
        };

        if space == PoseSpace::Bound && joint.parent >= 0 {
            let parent = &poses[joint.parent as usize];
            pose.position = parent.position + parent.orientation * pose.position;
            pose.orientation = parent.orientation * pose.orientation;
        }

        poses.push(pose);
    }

    Ok(poses)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rig::clip::{ClipRecord, JointBaseRecord, JointRecord};
    use crate::EPSILON;

    fn walk_clip() -> Clip {
        // 2-joint hierarchy (root, child of root), position-only deltas
        // (flags 7). Frame 0 repeats the base values; frame 1 moves the root
        // by +1 in x.
        let record = ClipRecord {
            name: "walk".to_string(),
            frame_rate: 25.0,
            base_frame: vec![
                JointBaseRecord {
                    position: [0.0, 0.0, 0.0],
                    orientation: [0.0, 0.6, 0.0],
                },
                JointBaseRecord {
                    position: [2.0, 0.0, 0.0],
                    orientation: [0.0, 0.0, 0.0],
                },
            ],
            frames: vec![
                vec![0.0, 0.0, 0.0, 2.0, 0.0, 0.0],
                vec![1.0, 0.0, 0.0, 2.0, 0.0, 0.0],
            ],
            hierarchy: vec![
                JointRecord {
                    name: "root".to_string(),
                    parent: -1,
                    flags: 0x07,
                    index: 0,
                },
                JointRecord {
                    name: "child".to_string(),
                    parent: 0,
                    flags: 0x07,
                    index: 3,
                },
            ],
        };
        Clip::from_record(record).unwrap()
    }

    #[test]
    fn test_out_of_range_frame() {
        let clip = walk_clip();
        let err = frame_pose(&clip, 2, PoseSpace::Local).unwrap_err();
        assert!(matches!(err, Error::FrameOutOfRange { frame: 2, count: 2, .. }));
    }

    #[test]
    fn test_pose_is_deterministic() {
        let clip = walk_clip();
        let a = frame_pose(&clip, 1, PoseSpace::Bound).unwrap();
        let b = frame_pose(&clip, 1, PoseSpace::Bound).unwrap();
        assert_eq!(a, b, "same clip and frame must give bit-identical poses");
    }

    #[test]
    fn test_reconstructed_orientation_is_negative_unit() {
        let clip = walk_clip();
        for pose in frame_pose(&clip, 0, PoseSpace::Local).unwrap() {
            assert!(pose.orientation.w <= 0.0, "w must be non-positive");
            assert!(
                (pose.orientation.length() - 1.0).abs() < 1e-5,
                "orientation must be unit length, got {}",
                pose.orientation.length()
            );
        }
    }

    #[test]
    fn test_delta_overwrites_base() {
        let clip = walk_clip();
        let frame0 = frame_pose(&clip, 0, PoseSpace::Local).unwrap();
        let frame1 = frame_pose(&clip, 1, PoseSpace::Local).unwrap();

        assert!(frame0[0].position.abs_diff_eq(Vec3::ZERO, EPSILON));
        assert!(
            frame1[0].position.abs_diff_eq(Vec3::new(1.0, 0.0, 0.0), EPSILON),
            "root x must advance by 1 in frame 1"
        );
        // Child deltas repeat the same values in both frames.
        assert_eq!(frame1[1].position, frame0[1].position);
    }

    #[test]
    fn test_hierarchy_composition() {
        let clip = walk_clip();
        let local = frame_pose(&clip, 1, PoseSpace::Local).unwrap();
        let bound = frame_pose(&clip, 1, PoseSpace::Bound).unwrap();

        // Root is unchanged by binding.
        assert_eq!(local[0], bound[0]);

        // Child = parent position + parent orientation applied to the local
        // offset; orientation pre-multiplied by the parent's.
        let expected_pos = bound[0].position + bound[0].orientation * local[1].position;
        let expected_rot = bound[0].orientation * local[1].orientation;
        assert!(
            bound[1].position.abs_diff_eq(expected_pos, 1e-5),
            "child position {:?} != composed {:?}",
            bound[1].position,
            expected_pos
        );
        assert!((bound[1].orientation.dot(expected_rot).abs() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_end_to_end_child_follows_root() {
        // Base frame in frame 0, root moved +1x in frame 1: the child's bound
        // position must follow the root through its (rotated) frame.
        let clip = walk_clip();
        let f0 = frame_pose(&clip, 0, PoseSpace::Bound).unwrap();
        let f1 = frame_pose(&clip, 1, PoseSpace::Bound).unwrap();

        let delta = f1[1].position - f0[1].position;
        assert!(
            delta.abs_diff_eq(Vec3::new(1.0, 0.0, 0.0), 1e-5),
            "child must shift exactly with the root, got {:?}",
            delta
        );
    }
}
