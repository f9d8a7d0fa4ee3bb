//! Entity sessions and the application state behind the wasm surface.
//!
//! Follows a context passing pattern:
//! 1. `AppState` is a single struct holding every live entity slot
//! 2. Core types (`Entity`, `Mixer`) take explicit references and know
//!    nothing about globals
//! 3. The wasm bindings in `api` are thin wrappers that extract from
//!    `AppState` and call the core
//!
//! This keeps the core unit-testable on the host while the browser talks to
//! a handle-based API.

use crate::error::Error;
use crate::mixer::Mixer;
use crate::rig::{bind, frame_pose, Clip, ClipRecord, JointPose, MeshRecord, PoseSpace, SkinnedMesh};
use serde::Deserialize;
use std::cell::RefCell;
use std::rc::Rc;

/// Everything the loader hands over for one character model: its animation
/// clips and, optionally, the mesh to bind against the first clip.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelRecord {
    pub clips: Vec<ClipRecord>,
    #[serde(default)]
    pub mesh: Option<MeshRecord>,
}

pub type EntityHandle = u32;

/// One animated character: its mixer, the shared clip data and the mesh
/// bound at construction time.
pub struct Entity {
    pub mixer: Mixer,
    pub clips: Vec<Rc<Clip>>,
    pub mesh: Option<SkinnedMesh>,
}

impl std::fmt::Debug for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entity")
            .field("clips", &self.clips.len())
            .field("mesh", &self.mesh.is_some())
            .finish_non_exhaustive()
    }
}

impl Entity {
    /// Build an entity from a loader record. Any structural defect in the
    /// clips or the mesh aborts the load of this model.
    pub fn from_record(record: ModelRecord, seed: u64) -> Result<Self, Error> {
        let mut mixer = Mixer::new(seed);
        let mut clips = Vec::with_capacity(record.clips.len());
        for clip_record in record.clips {
            let clip = Rc::new(Clip::from_record(clip_record)?);
            mixer.add_clip(clip.clone());
            clips.push(clip);
        }
        let mesh = match (record.mesh, clips.first()) {
            (Some(mesh), Some(clip)) => Some(bind(clip, &mesh)?),
            (Some(_), None) => {
                log::warn!("model carries a mesh but no clips; nothing to bind against");
                None
            }
            _ => None,
        };
        Ok(Self { mixer, clips, mesh })
    }

    pub fn from_json(json: &str, seed: u64) -> Result<Self, Error> {
        let record: ModelRecord = serde_json::from_str(json)?;
        Self::from_record(record, seed)
    }

    /// Advance this entity by the elapsed frame time. Called exactly once
    /// per rendered frame.
    pub fn update(&mut self, delta_ms: f32) {
        self.mixer.update(delta_ms);
    }

    /// Hierarchy-composed pose of the heaviest running clip at its current
    /// frame, for debug overlays and skin-matrix construction.
    pub fn current_pose(&self) -> Option<Vec<JointPose>> {
        let action = self
            .mixer
            .actions
            .iter()
            .filter(|action| action.playing)
            .max_by(|a, b| a.weight.total_cmp(&b.weight))?;
        let clip = action.clip();
        let frame = clip.frame_at(action.time);
        frame_pose(clip, frame, PoseSpace::Bound).ok()
    }
}

/// Live entity slots, indexed by handle. Freed slots are reused.
#[derive(Default)]
pub struct AppState {
    entities: Vec<Option<Entity>>,
}

impl AppState {
    pub fn insert(&mut self, entity: Entity) -> EntityHandle {
        if let Some(slot) = self.entities.iter().position(Option::is_none) {
            self.entities[slot] = Some(entity);
            slot as EntityHandle
        } else {
            self.entities.push(Some(entity));
            (self.entities.len() - 1) as EntityHandle
        }
    }

    pub fn remove(&mut self, handle: EntityHandle) -> Option<Entity> {
        self.entities.get_mut(handle as usize)?.take()
    }

    pub fn get(&self, handle: EntityHandle) -> Option<&Entity> {
        self.entities.get(handle as usize)?.as_ref()
    }

    pub fn get_mut(&mut self, handle: EntityHandle) -> Option<&mut Entity> {
        self.entities.get_mut(handle as usize)?.as_mut()
    }
}

// Global state access, thin wrapper for the wasm bindings only.
thread_local! {
    static APP_STATE: RefCell<AppState> = RefCell::new(AppState::default());
}

/// Execute a closure with immutable access to the application state.
pub fn with_app_state<F, R>(f: F) -> R
where
    F: FnOnce(&AppState) -> R,
{
    APP_STATE.with(|state| f(&state.borrow()))
}

/// Execute a closure with mutable access to the application state.
pub fn with_app_state_mut<F, R>(f: F) -> R
where
    F: FnOnce(&mut AppState) -> R,
{
    APP_STATE.with(|state| f(&mut state.borrow_mut()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODEL_JSON: &str = r#"{
        "clips": [{
            "name": "idle",
            "frameRate": 25,
            "baseFrame": [
                { "position": [0, 0, 0], "orientation": [0, 0, 0] },
                { "position": [0, 1, 0], "orientation": [0, 0, 0] }
            ],
            "frames": [[0, 0, 0], [0, 0.5, 0]],
            "hierarchy": [
                { "name": "root", "parent": -1, "flags": 7, "index": 0 },
                { "name": "head", "parent": 0, "flags": 0, "index": 3 }
            ]
        }],
        "mesh": {
            "vertices": [
                { "weightStart": 0, "weightCount": 1 },
                { "weightStart": 1, "weightCount": 1 },
                { "weightStart": 2, "weightCount": 1 }
            ],
            "weights": [
                { "joint": 1, "bias": 1.0, "offset": [0, 0, 0] },
                { "joint": 1, "bias": 1.0, "offset": [1, 0, 0] },
                { "joint": 1, "bias": 1.0, "offset": [0, 0, 1] }
            ],
            "triangles": [[0, 1, 2]]
        }
    }"#;

    #[test]
    fn test_entity_from_json_binds_mesh() {
        let entity = Entity::from_json(MODEL_JSON, 1).unwrap();
        let mesh = entity.mesh.as_ref().expect("mesh should be bound");
        assert_eq!(mesh.vertices.len(), 3);
        // Joint 1 sits at (0, 1, 0) in the bind pose.
        assert_eq!(mesh.vertices[0].position, [0.0, 1.0, 0.0]);
        assert_eq!(mesh.vertices[0].joints, [1, 0]);
    }

    #[test]
    fn test_entity_rejects_malformed_payload() {
        assert!(matches!(
            Entity::from_json("{\"clips\": 3}", 1).unwrap_err(),
            Error::Payload(_)
        ));
    }

    #[test]
    fn test_entity_update_drives_the_mixer() {
        let mut entity = Entity::from_json(MODEL_JSON, 1).unwrap();
        entity.mixer.flow("idle").single_step("idle").unwrap();
        entity.mixer.start_flow("idle").unwrap();

        entity.update(20.0);
        let action = entity.mixer.find_action("idle").unwrap();
        assert_eq!(entity.mixer.action(action).time, 20.0);

        let pose = entity.current_pose().expect("a clip is running");
        assert_eq!(pose.len(), 2);
    }

    #[test]
    fn test_app_state_handles_are_reused() {
        let mut app = AppState::default();
        let a = app.insert(Entity::from_json(MODEL_JSON, 1).unwrap());
        let b = app.insert(Entity::from_json(MODEL_JSON, 2).unwrap());
        assert_ne!(a, b);

        assert!(app.remove(a).is_some());
        assert!(app.get(a).is_none());
        let c = app.insert(Entity::from_json(MODEL_JSON, 3).unwrap());
        assert_eq!(c, a, "freed slot must be reused");
        assert!(app.remove(a).is_some());
        assert!(app.remove(b).is_some());
    }
}
