//! Rigflow - skeletal animation core for the browser game client.
//!
//! Per-frame joint pose reconstruction from compact clip data, bind-time
//! skin deformation and the animation-flow scheduler live here. Asset
//! parsing, rendering, physics and the frame loop stay on the JavaScript
//! side of the wasm boundary.

pub mod error;
pub mod flow;
pub mod mixer;
pub mod rig;
pub mod state;

#[cfg(target_arch = "wasm32")]
pub mod api;

/// Small epsilon value for floating-point comparisons
pub const EPSILON: f32 = 1e-6;

pub use error::Error;
pub use flow::{Flow, FlowBuilder, FlowId, StepBuilder, StepConfig, StepId};
pub use mixer::{Action, ActionId, LoopMode, Mixer};
pub use rig::{
    bind, frame_pose, Clip, ClipRecord, JointPose, MeshRecord, PoseSpace, SkinnedMesh,
    SkinnedVertex,
};
pub use state::{Entity, EntityHandle, ModelRecord};

// Re-exports for the WASM API
#[cfg(target_arch = "wasm32")]
pub use api::{
    create_entity, define_loop_flow, destroy_entity, entity_joint_positions,
    entity_skinned_vertices, init_runtime, start_flow, stop_flow, update_entity,
};

#[cfg(all(test, target_arch = "wasm32"))]
mod wasm_tests {
    use wasm_bindgen_test::*;
    wasm_bindgen_test_configure!(run_in_browser);
}
