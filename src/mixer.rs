//! Per-entity blending engine: owns one clip instance per named animation,
//! advances them by elapsed time each tick and dispatches registered step
//! handlers in registration order.

use crate::error::Error;
use crate::flow::{Flow, FlowId, Step, StepId};
use crate::rig::Clip;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use std::collections::HashMap;
use std::rc::Rc;

pub type ActionId = usize;

/// How a clip instance treats the end of its clip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopMode {
    /// Play through once and stop.
    Once,
    /// Play the clip this many times in total.
    Repeat(u32),
}

#[derive(Debug, Clone, Copy)]
struct Fade {
    from: f32,
    to: f32,
    duration: f32,
    elapsed: f32,
}

/// A live playback handle for one clip on one entity.
///
/// Owned exclusively by the mixer that created it; never shared across
/// entities. Time is a millisecond cursor into the clip.
pub struct Action {
    clip: Rc<Clip>,
    pub time: f32,
    pub playing: bool,
    pub loop_mode: LoopMode,
    pub loops_done: u32,
    pub weight: f32,
    pub clamp_when_finished: bool,
    /// Playback rate multiplier; only moved off 1.0 by warped cross-fades.
    pub time_scale: f32,
    fade: Option<Fade>,
    pub(crate) on_loop: Option<Rc<dyn Fn(u32)>>,
    // Crossing window of the latest advance, read by time-trigger handlers:
    // cursor before the tick, cursor after it (pre-rewind), whether a loop
    // wrap happened in between, and whether the action moved at all this
    // tick (a stale window must not re-fire).
    pub(crate) prev_time: f32,
    pub(crate) tick_end: f32,
    pub(crate) wrapped: bool,
    pub(crate) advanced: bool,
}

impl Action {
    fn new(clip: Rc<Clip>) -> Self {
        Self {
            clip,
            time: 0.0,
            playing: false,
            loop_mode: LoopMode::Once,
            loops_done: 0,
            weight: 1.0,
            clamp_when_finished: false,
            time_scale: 1.0,
            fade: None,
            on_loop: None,
            prev_time: 0.0,
            tick_end: 0.0,
            wrapped: false,
            advanced: false,
        }
    }

    pub fn clip(&self) -> &Clip {
        &self.clip
    }

    pub fn name(&self) -> &str {
        &self.clip.name
    }

    /// Total play time including completed loop repetitions, in ms.
    pub fn elapsed_total(&self) -> f32 {
        self.loops_done as f32 * self.clip.length() + self.time
    }

    /// Remaining time in the current pass through the clip, in ms.
    pub fn remaining(&self) -> f32 {
        (self.clip.length() - self.time).max(0.0)
    }

    pub(crate) fn play_from(&mut self, start_at: f32) {
        self.time = start_at;
        self.prev_time = start_at;
        self.tick_end = start_at;
        self.wrapped = false;
        self.advanced = false;
        self.loops_done = 0;
        self.playing = true;
    }

    pub(crate) fn stop(&mut self) {
        self.playing = false;
        self.time = 0.0;
        self.prev_time = 0.0;
        self.tick_end = 0.0;
        self.wrapped = false;
        self.advanced = false;
        self.loops_done = 0;
        self.weight = 1.0;
        self.time_scale = 1.0;
        self.fade = None;
    }

    pub(crate) fn fade_to(&mut self, target: f32, duration: f32) {
        self.fade = Some(Fade {
            from: self.weight,
            to: target,
            duration: duration.max(f32::EPSILON),
            elapsed: 0.0,
        });
    }

    fn finish(&mut self) {
        self.playing = false;
        if self.clamp_when_finished {
            self.time = self.clip.length();
        } else {
            self.time = 0.0;
        }
    }

    fn advance(&mut self, delta_ms: f32) {
        self.advanced = false;
        if !self.playing {
            return;
        }
        self.advanced = true;
        self.prev_time = self.time;
        self.wrapped = false;

        let length = self.clip.length();
        self.time += delta_ms * self.time_scale;

        if length > 0.0 && self.time >= length {
            let repeats = match self.loop_mode {
                LoopMode::Once => 1,
                LoopMode::Repeat(n) => n.max(1),
            };
            while self.time >= length && self.loops_done + 1 < repeats {
                self.time -= length;
                self.loops_done += 1;
                self.wrapped = true;
                if let Some(on_loop) = self.on_loop.clone() {
                    on_loop(self.loops_done);
                }
            }
            self.tick_end = self.time;
            if self.time >= length {
                self.finish();
            }
        } else {
            self.tick_end = self.time;
        }

        if let Some(fade) = &mut self.fade {
            fade.elapsed += delta_ms;
            let t = (fade.elapsed / fade.duration).min(1.0);
            self.weight = fade.from + (fade.to - fade.from) * t;
            if t >= 1.0 {
                let faded_out = fade.to <= 0.0;
                self.fade = None;
                self.time_scale = 1.0;
                if faded_out {
                    self.stop();
                }
            }
        }
    }
}

/// The per-entity animation engine.
///
/// Holds the clip-instance table, the flow/step arena built on top of it and
/// the ordered list of per-tick step handlers. All of it is single-threaded
/// state driven by exactly one `update` per rendered frame.
pub struct Mixer {
    pub(crate) actions: Vec<Action>,
    action_names: HashMap<String, ActionId>,
    pub(crate) flows: Vec<Flow>,
    pub(crate) flow_names: HashMap<String, FlowId>,
    pub(crate) steps: Vec<Step>,
    pub(crate) handlers: Vec<StepId>,
    pub(crate) rng: SmallRng,
}

impl Mixer {
    /// The seed feeds every step's private generator, so a fixed seed makes
    /// all ambiguous clip picks reproducible.
    pub fn new(seed: u64) -> Self {
        Self {
            actions: Vec::new(),
            action_names: HashMap::new(),
            flows: Vec::new(),
            flow_names: HashMap::new(),
            steps: Vec::new(),
            handlers: Vec::new(),
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    /// Register a clip, creating its instance for this entity. A clip
    /// re-registered under the same name replaces the previous instance.
    pub fn add_clip(&mut self, clip: Rc<Clip>) -> ActionId {
        let name = clip.name.clone();
        if let Some(&existing) = self.action_names.get(&name) {
            log::warn!("clip \"{}\" re-registered, resetting its instance", name);
            self.actions[existing] = Action::new(clip);
            return existing;
        }
        let id = self.actions.len();
        self.actions.push(Action::new(clip));
        self.action_names.insert(name, id);
        id
    }

    pub fn find_action(&self, name: &str) -> Result<ActionId, Error> {
        self.action_names
            .get(name)
            .copied()
            .ok_or_else(|| Error::UnknownAnimation {
                name: name.to_string(),
            })
    }

    pub fn find_actions(&self, names: &[&str]) -> Result<Vec<ActionId>, Error> {
        names.iter().map(|name| self.find_action(name)).collect()
    }

    pub fn action(&self, id: ActionId) -> &Action {
        &self.actions[id]
    }

    pub fn action_mut(&mut self, id: ActionId) -> &mut Action {
        &mut self.actions[id]
    }

    /// First running clip instance in table order, if any.
    pub fn running_action(&self) -> Option<ActionId> {
        self.actions.iter().position(|action| action.playing)
    }

    /// Advance all clip instances by the elapsed milliseconds, then run every
    /// registered step handler in registration order. Handlers for unstarted
    /// steps are no-ops; handler failures are logged, never propagated.
    pub fn update(&mut self, delta_ms: f32) {
        for action in &mut self.actions {
            action.advance(delta_ms);
        }
        for i in 0..self.handlers.len() {
            let step = self.handlers[i];
            self.handle_step(step, delta_ms);
        }
    }
}
