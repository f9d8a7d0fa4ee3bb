//! Browser-facing bindings: handle-based entity sessions driven by the JS
//! game loop. Everything here is a thin wrapper over `state` and the core;
//! per-tick failures are logged instead of crossing the frame boundary.

use crate::state::{with_app_state, with_app_state_mut, Entity, EntityHandle};
use wasm_bindgen::prelude::*;

/// Install the panic hook and the console logger. Call once at startup.
#[wasm_bindgen]
pub fn init_runtime() {
    console_error_panic_hook::set_once();
    console_log::init_with_level(log::Level::Info).ok();
}

/// Create an entity from a loader-produced model JSON payload.
///
/// Structural defects in the clips or the mesh abort the load and surface to
/// JS as an error string.
#[wasm_bindgen]
pub fn create_entity(model_json: &str) -> Result<u32, JsValue> {
    let entity = Entity::from_json(model_json, rand::random::<u64>())
        .map_err(|err| JsValue::from_str(&format!("failed to load model: {}", err)))?;
    Ok(with_app_state_mut(|app| app.insert(entity)))
}

#[wasm_bindgen]
pub fn destroy_entity(handle: u32) {
    with_app_state_mut(|app| {
        if app.remove(handle as EntityHandle).is_none() {
            log::warn!("destroy_entity: unknown handle {}", handle);
        }
    });
}

/// Advance one entity by the elapsed frame time in milliseconds. Call
/// exactly once per rendered frame per entity.
#[wasm_bindgen]
pub fn update_entity(handle: u32, delta_ms: f32) {
    with_app_state_mut(|app| match app.get_mut(handle as EntityHandle) {
        Some(entity) => entity.update(delta_ms),
        None => log::warn!("update_entity: unknown handle {}", handle),
    });
}

/// Define a minimal one-step flow that plays `clip` `repetitions` times.
/// Richer flows (alternation, conditionals, cross-fades, callbacks) are
/// composed on the Rust side by entity behavior code.
#[wasm_bindgen]
pub fn define_loop_flow(handle: u32, flow_name: &str, clip: &str, repetitions: u32) -> bool {
    with_app_state_mut(|app| {
        let Some(entity) = app.get_mut(handle as EntityHandle) else {
            log::warn!("define_loop_flow: unknown handle {}", handle);
            return false;
        };
        match entity.mixer.flow(flow_name).single_step(clip) {
            Ok(step) => {
                if repetitions > 1 {
                    step.repeat(repetitions);
                }
                true
            }
            Err(err) => {
                log::error!("define_loop_flow \"{}\": {}", flow_name, err);
                false
            }
        }
    })
}

#[wasm_bindgen]
pub fn start_flow(handle: u32, name: &str) -> bool {
    with_app_state_mut(|app| {
        let Some(entity) = app.get_mut(handle as EntityHandle) else {
            log::warn!("start_flow: unknown handle {}", handle);
            return false;
        };
        match entity.mixer.start_flow(name) {
            Ok(()) => true,
            Err(err) => {
                log::error!("start_flow: {}", err);
                false
            }
        }
    })
}

#[wasm_bindgen]
pub fn stop_flow(handle: u32, name: &str) -> bool {
    with_app_state_mut(|app| {
        let Some(entity) = app.get_mut(handle as EntityHandle) else {
            log::warn!("stop_flow: unknown handle {}", handle);
            return false;
        };
        match entity.mixer.stop_flow(name) {
            Ok(()) => true,
            Err(err) => {
                log::error!("stop_flow: {}", err);
                false
            }
        }
    })
}

/// Bind-time vertex data (position, normal, 2 joint indices, 2 weights per
/// vertex) as raw bytes for the renderer.
#[wasm_bindgen]
pub fn entity_skinned_vertices(handle: u32) -> Vec<u8> {
    with_app_state(|app| {
        app.get(handle as EntityHandle)
            .and_then(|entity| entity.mesh.as_ref())
            .map(|mesh| mesh.vertex_bytes().to_vec())
            .unwrap_or_default()
    })
}

/// Hierarchy-composed joint positions of the entity's heaviest running clip,
/// for debug overlays.
#[wasm_bindgen]
pub fn entity_joint_positions(handle: u32) -> JsValue {
    let positions: Vec<[f32; 3]> = with_app_state(|app| {
        app.get(handle as EntityHandle)
            .and_then(|entity| entity.current_pose())
            .map(|pose| pose.iter().map(|joint| joint.position.to_array()).collect())
            .unwrap_or_default()
    });
    serde_wasm_bindgen::to_value(&positions).unwrap_or(JsValue::NULL)
}
