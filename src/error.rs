use thiserror::Error;

/// Failures surfaced by the animation core.
///
/// Model-construction variants (hierarchy, base frame, weight runs) abort the
/// load of that model. Lookup and step-query variants indicate flow
/// construction bugs and are raised at the call site rather than papered over
/// with a default clip.
#[derive(Debug, Error)]
pub enum Error {
    #[error("unknown animation \"{name}\"")]
    UnknownAnimation { name: String },

    #[error("unknown flow \"{name}\"")]
    UnknownFlow { name: String },

    #[error("frame {frame} out of range for clip \"{clip}\" ({count} frames)")]
    FrameOutOfRange {
        clip: String,
        frame: usize,
        count: usize,
    },

    #[error("joint {joint} appears before its parent {parent}")]
    HierarchyOrder { joint: usize, parent: i32 },

    #[error("base frame has {base} entries for {joints} joints")]
    BaseFrameMismatch { joints: usize, base: usize },

    #[error("frame {frame} ends before the deltas of joint {joint}")]
    FrameTooShort { frame: usize, joint: usize },

    #[error("vertex {vertex} references weights {start}..{end} outside the weight table ({count} entries)")]
    WeightRunOutOfBounds {
        vertex: usize,
        start: usize,
        end: usize,
        count: usize,
    },

    #[error("weight {weight} references joint {joint} outside the hierarchy ({count} joints)")]
    WeightJointOutOfBounds {
        weight: usize,
        joint: usize,
        count: usize,
    },

    #[error("triangle {triangle} references vertex {vertex} outside the mesh ({count} vertices)")]
    TriangleOutOfBounds {
        triangle: usize,
        vertex: usize,
        count: usize,
    },

    #[error("step has never been started")]
    StepNeverStarted,

    #[error("conditional step took no branch")]
    NoActiveBranch,

    #[error("invalid model payload: {0}")]
    Payload(#[from] serde_json::Error),
}
