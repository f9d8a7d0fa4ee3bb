use crate::error::Error;
use glam::Vec3;
use serde::Deserialize;

// Channel flag bits, consumed from a frame's delta array in this exact order.
pub const CHANNEL_POS_X: u8 = 1 << 0;
pub const CHANNEL_POS_Y: u8 = 1 << 1;
pub const CHANNEL_POS_Z: u8 = 1 << 2;
pub const CHANNEL_ROT_X: u8 = 1 << 3;
pub const CHANNEL_ROT_Y: u8 = 1 << 4;
pub const CHANNEL_ROT_Z: u8 = 1 << 5;

/// One joint of the clip's hierarchy.
///
/// `parent` is -1 for the root. The hierarchy is stored parents-first; that
/// ordering comes from the source data and is validated at load, never sorted.
#[derive(Debug, Clone)]
pub struct JointDef {
    pub name: String,
    pub parent: i32,
    /// 6-bit mask over {posX, posY, posZ, rotX, rotY, rotZ} selecting which
    /// channels are present in a frame's delta data for this joint.
    pub channels: u8,
    /// First index of this joint's delta run inside each frame's flat array.
    pub offset: usize,
}

/// Base-frame transform for one joint. Orientation stores only the xyz
/// imaginary part; w is reconstructed on every pose evaluation.
#[derive(Debug, Clone, Copy)]
pub struct JointBase {
    pub position: Vec3,
    pub orientation: Vec3,
}

/// Immutable source animation data: hierarchy, base frame and per-frame
/// delta arrays. Shared across clip instances via `Rc`.
#[derive(Debug, Clone)]
pub struct Clip {
    pub name: String,
    pub frame_rate: f32,
    pub base: Vec<JointBase>,
    pub frames: Vec<Vec<f32>>,
    pub joints: Vec<JointDef>,
}

impl Clip {
    /// Duration of one frame in milliseconds.
    pub fn frame_time(&self) -> f32 {
        1000.0 / self.frame_rate
    }

    /// Total clip length in milliseconds: `(frameCount - 1) * frameTime`.
    pub fn length(&self) -> f32 {
        self.frames.len().saturating_sub(1) as f32 * self.frame_time()
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Frame index for a playback cursor in milliseconds, clamped to the
    /// last frame.
    pub fn frame_at(&self, time_ms: f32) -> usize {
        if self.frames.is_empty() {
            return 0;
        }
        let frame = (time_ms / self.frame_time()).floor().max(0.0) as usize;
        frame.min(self.frames.len() - 1)
    }
}

// --- Loader boundary ---
//
// The browser loader parses the model file format and hands over plain JSON.
// These records mirror that JSON; conversion into `Clip` is where all
// structural validation happens.

#[derive(Debug, Clone, Deserialize)]
pub struct JointRecord {
    pub name: String,
    pub parent: i32,
    pub flags: u8,
    pub index: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JointBaseRecord {
    pub position: [f32; 3],
    pub orientation: [f32; 3],
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClipRecord {
    pub name: String,
    pub frame_rate: f32,
    pub base_frame: Vec<JointBaseRecord>,
    pub frames: Vec<Vec<f32>>,
    pub hierarchy: Vec<JointRecord>,
}

impl Clip {
    /// Build a validated clip from a loader record.
    ///
    /// Rejects hierarchies that are not parents-first, base frames that do
    /// not match the joint count, and frames too short for any joint's
    /// flagged channels.
    pub fn from_record(record: ClipRecord) -> Result<Self, Error> {
        let joint_count = record.hierarchy.len();
        if record.base_frame.len() != joint_count {
            return Err(Error::BaseFrameMismatch {
                joints: joint_count,
                base: record.base_frame.len(),
            });
        }

        let mut joints = Vec::with_capacity(joint_count);
        for (i, joint) in record.hierarchy.into_iter().enumerate() {
            if joint.parent >= i as i32 || joint.parent < -1 {
                return Err(Error::HierarchyOrder {
                    joint: i,
                    parent: joint.parent,
                });
            }
            joints.push(JointDef {
                name: joint.name,
                parent: joint.parent,
                channels: joint.flags & 0x3f,
                offset: joint.index,
            });
        }

        for (f, frame) in record.frames.iter().enumerate() {
            for (i, joint) in joints.iter().enumerate() {
                let needed = joint.offset + joint.channels.count_ones() as usize;
                if needed > frame.len() {
                    return Err(Error::FrameTooShort { frame: f, joint: i });
                }
            }
        }

        let base = record
            .base_frame
            .into_iter()
            .map(|b| JointBase {
                position: Vec3::from(b.position),
                orientation: Vec3::from(b.orientation),
            })
            .collect();

        Ok(Self {
            name: record.name,
            frame_rate: record.frame_rate,
            base,
            frames: record.frames,
            joints,
        })
    }

    /// Parse a clip from a JSON string as produced by the loader.
    pub fn from_json(json: &str) -> Result<Self, Error> {
        let record: ClipRecord = serde_json::from_str(json)?;
        Self::from_record(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_joint_record() -> ClipRecord {
        ClipRecord {
            name: "walk".to_string(),
            frame_rate: 25.0,
            base_frame: vec![
                JointBaseRecord {
                    position: [0.0, 0.0, 0.0],
                    orientation: [0.0, 0.0, 0.0],
                },
                JointBaseRecord {
                    position: [1.0, 0.0, 0.0],
                    orientation: [0.0, 0.0, 0.0],
                },
            ],
            frames: vec![vec![0.0; 6], vec![0.0; 6]],
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
        }
    }

    #[test]
    fn test_length_invariant() {
        let clip = Clip::from_record(two_joint_record()).unwrap();
        // 2 frames at 25 fps: length = (2 - 1) * 40ms
        assert_eq!(clip.frame_time(), 40.0);
        assert_eq!(clip.length(), 40.0);
    }

    #[test]
    fn test_frame_at_clamps() {
        let clip = Clip::from_record(two_joint_record()).unwrap();
        assert_eq!(clip.frame_at(0.0), 0);
        assert_eq!(clip.frame_at(39.9), 0);
        assert_eq!(clip.frame_at(40.0), 1);
        assert_eq!(clip.frame_at(10_000.0), 1, "cursor past the end clamps");
    }

    #[test]
    fn test_rejects_child_before_parent() {
        let mut record = two_joint_record();
        record.hierarchy[0].parent = 1;
        let err = Clip::from_record(record).unwrap_err();
        assert!(matches!(err, Error::HierarchyOrder { joint: 0, .. }));
    }

    #[test]
    fn test_rejects_short_frame() {
        let mut record = two_joint_record();
        record.frames[1] = vec![0.0; 4];
        let err = Clip::from_record(record).unwrap_err();
        assert!(matches!(err, Error::FrameTooShort { frame: 1, joint: 1 }));
    }

    #[test]
    fn test_rejects_base_frame_mismatch() {
        let mut record = two_joint_record();
        record.base_frame.pop();
        let err = Clip::from_record(record).unwrap_err();
        assert!(matches!(
            err,
            Error::BaseFrameMismatch { joints: 2, base: 1 }
        ));
    }

    #[test]
    fn test_parse_from_json() {
        let json = r#"{
            "name": "idle",
            "frameRate": 24,
            "baseFrame": [
                { "position": [0, 1, 0], "orientation": [0, 0, 0] }
            ],
            "frames": [[0.5]],
            "hierarchy": [
                { "name": "origin", "parent": -1, "flags": 1, "index": 0 }
            ]
        }"#;

        let clip = Clip::from_json(json).unwrap();
        assert_eq!(clip.name, "idle");
        assert_eq!(clip.joints.len(), 1);
        assert_eq!(clip.joints[0].channels, CHANNEL_POS_X);
    }
}
