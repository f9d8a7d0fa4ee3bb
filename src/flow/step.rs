//! Flow steps: the composable units of the animation-flow DSL.
//!
//! The five step kinds form a closed tagged-variant type; the common
//! contract (`start` / `stop` / `action` / `started` / `clone`) is dispatched
//! by the mixer over the enum. Each variant carries only the state it needs,
//! next to a shared plain configuration struct filled in by the builders.

use crate::error::Error;
use crate::mixer::{ActionId, LoopMode, Mixer};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::rc::Rc;

use super::FlowId;

pub type StepId = usize;

/// Fallback cross-fade duration when no delay and no explicit duration are
/// configured: one time unit.
pub const DEFAULT_FADE_MS: f32 = 1.0;

pub type StartCallback = Rc<dyn Fn()>;
pub type LoopCallback = Rc<dyn Fn(u32)>;
pub type TimeCallback = Rc<dyn Fn(f32)>;
pub type NameFilter = Rc<dyn Fn(&str) -> bool>;
pub type Condition = Rc<dyn Fn() -> bool>;

/// Modifiers shared by every step kind. Builders fill this in; starting a
/// step applies it to the clip instance it plays.
#[derive(Clone, Default)]
pub struct StepConfig {
    pub repeat: Option<u32>,
    pub start_at: Option<f32>,
    pub clamp_when_finished: bool,
    pub stop_before_start: bool,
    pub delay: Option<f32>,
    pub duration: Option<f32>,
    pub fade_out: Option<f32>,
    pub fade_in: Option<f32>,
    pub warp: bool,
    pub on_start: Option<StartCallback>,
    pub on_loop: Option<LoopCallback>,
}

/// A time trigger armed against the active clip of an Any/CrossFade step.
#[derive(Clone)]
pub struct TimeTrigger {
    pub times: Vec<f32>,
    pub callback: TimeCallback,
    pub filter: Option<NameFilter>,
}

/// Candidate set plus the step's private pick generator.
pub struct AnyState {
    pub candidates: Vec<ActionId>,
    pub rng: SmallRng,
    pub active: Option<ActionId>,
    pub triggers: Vec<TimeTrigger>,
}

/// Sub-step reference of an Alternate step: index 0 is a step inside the
/// owning flow, later entries live in flows of their own. Non-owning either
/// way; the arena in the mixer owns everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AltTarget {
    Step(StepId),
    Flow(FlowId),
}

pub struct AlternateState {
    pub subs: Vec<AltTarget>,
    pub cursor: usize,
    pub active: Option<AltTarget>,
}

pub struct ConditionalState {
    pub condition: Condition,
    pub then_flow: FlowId,
    pub else_flow: Option<FlowId>,
    pub taken: Option<FlowId>,
}

/// Gate state of a delayed cross-fade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FadePhase {
    Idle,
    /// Started with a delay; polling the source step's elapsed time.
    Waiting,
    /// Fade triggered.
    Running,
    /// Delay can never be reached; logged once and parked.
    Disabled,
}

pub struct CrossFadeState {
    pub any: AnyState,
    /// Step whose active clip is faded out.
    pub source: StepId,
    pub phase: FadePhase,
}

pub struct CurrentState {
    pub captured: Option<ActionId>,
}

pub enum StepKind {
    Any(AnyState),
    Alternate(AlternateState),
    Conditional(ConditionalState),
    CrossFade(CrossFadeState),
    Current(CurrentState),
}

pub struct Step {
    pub flow: FlowId,
    /// Started only through a composite step (Alternate sub 0), skipped by
    /// `Flow::start`.
    pub driven: bool,
    pub started: bool,
    pub config: StepConfig,
    pub kind: StepKind,
}

impl Mixer {
    // --- common contract -------------------------------------------------

    pub fn start_step(&mut self, id: StepId) {
        match &self.steps[id].kind {
            StepKind::Any(_) => self.start_any(id),
            StepKind::Alternate(_) => self.start_alternate(id),
            StepKind::Conditional(_) => self.start_conditional(id),
            StepKind::CrossFade(_) => self.start_cross_fade(id),
            StepKind::Current(_) => self.start_current(id),
        }
    }

    /// Stop the step's active clip instances. A no-op on a step that was
    /// never started.
    pub fn stop_step(&mut self, id: StepId) {
        if !self.steps[id].started {
            return;
        }
        self.steps[id].started = false;

        enum Stop {
            Action(ActionId),
            Step(StepId),
            Flow(FlowId),
        }
        let mut pending = Vec::new();
        match &mut self.steps[id].kind {
            StepKind::Any(any) => {
                if let Some(action) = any.active.take() {
                    pending.push(Stop::Action(action));
                }
            }
            StepKind::CrossFade(cf) => {
                cf.phase = FadePhase::Idle;
                if let Some(action) = cf.any.active.take() {
                    pending.push(Stop::Action(action));
                }
            }
            StepKind::Alternate(alt) => {
                alt.active = None;
                for sub in &alt.subs {
                    pending.push(match sub {
                        AltTarget::Step(step) => Stop::Step(*step),
                        AltTarget::Flow(flow) => Stop::Flow(*flow),
                    });
                }
            }
            StepKind::Conditional(cond) => {
                if let Some(flow) = cond.taken.take() {
                    pending.push(Stop::Flow(flow));
                }
            }
            StepKind::Current(current) => {
                if let Some(action) = current.captured.take() {
                    pending.push(Stop::Action(action));
                }
            }
        }
        for stop in pending {
            match stop {
                Stop::Action(action) => self.actions[action].stop(),
                Stop::Step(step) => self.stop_step(step),
                Stop::Flow(flow) => self.stop_flow_id(flow),
            }
        }
    }

    pub fn step_started(&self, id: StepId) -> bool {
        self.steps[id].started
    }

    /// The step's currently active clip instance.
    ///
    /// Fails on a step that has never been started, or on a conditional step
    /// that took no branch. Both are flow-construction errors.
    pub fn step_action(&self, id: StepId) -> Result<ActionId, Error> {
        if !self.steps[id].started {
            return Err(Error::StepNeverStarted);
        }
        match &self.steps[id].kind {
            StepKind::Conditional(cond) => match cond.taken {
                Some(flow) => self.flow_action_id(flow).ok_or(Error::NoActiveBranch),
                None => Err(Error::NoActiveBranch),
            },
            _ => self.step_action_id(id).ok_or(Error::StepNeverStarted),
        }
    }

    /// Clone a step's kind and configuration onto a new step appended to
    /// `target_flow`. Runtime state (active clip, fade phase, cursor,
    /// capture) is reset; the original step is left untouched.
    pub fn clone_step(&mut self, id: StepId, target_flow: FlowId) -> StepId {
        let fork = SmallRng::from_rng(&mut self.rng);
        let source = &self.steps[id];
        let config = source.config.clone();
        let kind = match &source.kind {
            StepKind::Any(any) => StepKind::Any(AnyState {
                candidates: any.candidates.clone(),
                rng: fork,
                active: None,
                triggers: any.triggers.clone(),
            }),
            StepKind::CrossFade(cf) => StepKind::CrossFade(CrossFadeState {
                any: AnyState {
                    candidates: cf.any.candidates.clone(),
                    rng: fork,
                    active: None,
                    triggers: cf.any.triggers.clone(),
                },
                // Rebind to the step the clone will follow in its new flow.
                source: self.flows[target_flow]
                    .steps
                    .last()
                    .copied()
                    .unwrap_or(cf.source),
                phase: FadePhase::Idle,
            }),
            StepKind::Alternate(alt) => StepKind::Alternate(AlternateState {
                subs: alt.subs.clone(),
                cursor: 0,
                active: None,
            }),
            StepKind::Conditional(cond) => StepKind::Conditional(ConditionalState {
                condition: cond.condition.clone(),
                then_flow: cond.then_flow,
                else_flow: cond.else_flow,
                taken: None,
            }),
            StepKind::Current(_) => StepKind::Current(CurrentState { captured: None }),
        };
        self.push_step(target_flow, false, config, kind)
    }

    // --- construction helpers (used by the builders) ---------------------

    pub(crate) fn push_step(
        &mut self,
        flow: FlowId,
        driven: bool,
        config: StepConfig,
        kind: StepKind,
    ) -> StepId {
        let ticks = matches!(kind, StepKind::Any(_) | StepKind::CrossFade(_));
        let id = self.steps.len();
        self.steps.push(Step {
            flow,
            driven,
            started: false,
            config,
            kind,
        });
        self.flows[flow].steps.push(id);
        if ticks {
            self.handlers.push(id);
        }
        id
    }

    pub(crate) fn fork_rng(&mut self) -> SmallRng {
        SmallRng::from_rng(&mut self.rng)
    }

    // --- start per kind --------------------------------------------------

    fn start_any(&mut self, id: StepId) {
        let config = self.steps[id].config.clone();
        let candidates = match &self.steps[id].kind {
            StepKind::Any(any) => any.candidates.clone(),
            _ => return,
        };
        if candidates.is_empty() {
            log::error!("any-step started with no candidate clips");
            return;
        }
        if config.stop_before_start {
            for &action in &candidates {
                self.actions[action].stop();
            }
        }
        let pick = self.pick_candidate(id, candidates.len());
        let action = candidates[pick];
        self.apply_config_and_play(action, &config);
        if let StepKind::Any(any) = &mut self.steps[id].kind {
            any.active = Some(action);
        }
        self.steps[id].started = true;
        if let Some(on_start) = config.on_start {
            on_start();
        }
    }

    fn start_alternate(&mut self, id: StepId) {
        let target = {
            let StepKind::Alternate(alt) = &mut self.steps[id].kind else {
                return;
            };
            if alt.subs.is_empty() {
                log::error!("alternate-step started with no sub-steps");
                return;
            }
            let target = alt.subs[alt.cursor];
            alt.cursor = (alt.cursor + 1) % alt.subs.len();
            alt.active = Some(target);
            target
        };
        self.steps[id].started = true;
        match target {
            AltTarget::Step(step) => self.start_step(step),
            AltTarget::Flow(flow) => self.start_flow_id(flow),
        }
    }

    fn start_conditional(&mut self, id: StepId) {
        let (taken, run) = {
            let StepKind::Conditional(cond) = &self.steps[id].kind else {
                return;
            };
            if (cond.condition)() {
                (Some(cond.then_flow), Some(cond.then_flow))
            } else {
                (cond.else_flow, cond.else_flow)
            }
        };
        if let StepKind::Conditional(cond) = &mut self.steps[id].kind {
            cond.taken = taken;
        }
        self.steps[id].started = true;
        if let Some(flow) = run {
            self.start_flow_id(flow);
        }
    }

    fn start_cross_fade(&mut self, id: StepId) {
        self.steps[id].started = true;
        let delayed = self.steps[id].config.delay.is_some();
        if let StepKind::CrossFade(cf) = &mut self.steps[id].kind {
            cf.phase = if delayed {
                FadePhase::Waiting
            } else {
                FadePhase::Running
            };
        }
        if !delayed {
            self.trigger_cross_fade(id);
        }
    }

    fn start_current(&mut self, id: StepId) {
        let config = self.steps[id].config.clone();
        let Some(action) = self.running_action() else {
            // Recoverable scheduling race: nothing is playing right now.
            log::error!("current-step started while no clip instance is running");
            return;
        };
        self.steps[id].started = true;
        if config.stop_before_start {
            self.actions[action].stop();
        }
        self.apply_config_and_play(action, &config);
        if let StepKind::Current(current) = &mut self.steps[id].kind {
            current.captured = Some(action);
        }
        if let Some(on_start) = config.on_start {
            on_start();
        }
    }

    // --- per-tick handling ------------------------------------------------

    /// Per-tick hook for registered steps. Must be an idempotent no-op when
    /// the step is not started.
    pub(crate) fn handle_step(&mut self, id: StepId, delta_ms: f32) {
        if !self.steps[id].started {
            return;
        }
        if matches!(self.steps[id].kind, StepKind::CrossFade(_)) {
            self.poll_cross_fade(id);
        }
        self.fire_time_triggers(id, delta_ms);
    }

    /// Delayed cross-fade gating: trigger once the source step's elapsed
    /// time, including completed loop repetitions, crosses the delay.
    fn poll_cross_fade(&mut self, id: StepId) {
        let (source_step, phase) = match &self.steps[id].kind {
            StepKind::CrossFade(cf) => (cf.source, cf.phase),
            _ => return,
        };
        if phase != FadePhase::Waiting {
            return;
        }
        let delay = match self.steps[id].config.delay {
            Some(delay) => delay,
            None => return,
        };
        let Some(source) = self.step_action_id(source_step) else {
            return;
        };

        let action = &self.actions[source];
        let scheduled = match action.loop_mode {
            LoopMode::Once => action.clip().length(),
            LoopMode::Repeat(n) => action.clip().length() * n.max(1) as f32,
        };
        if delay > scheduled {
            log::warn!(
                "cross-fade delay {}ms exceeds the {}ms scheduled for \"{}\"; step disabled",
                delay,
                scheduled,
                action.name()
            );
            if let StepKind::CrossFade(cf) = &mut self.steps[id].kind {
                cf.phase = FadePhase::Disabled;
            }
            return;
        }

        if action.elapsed_total() >= delay {
            if let StepKind::CrossFade(cf) = &mut self.steps[id].kind {
                cf.phase = FadePhase::Running;
            }
            self.trigger_cross_fade(id);
        }
    }

    /// Start the target clip and begin fading the source out and the target
    /// in. Duration falls back to 1 time unit for immediate fades and to the
    /// remaining source time for delayed ones.
    fn trigger_cross_fade(&mut self, id: StepId) {
        let config = self.steps[id].config.clone();
        let (source_step, candidates) = match &self.steps[id].kind {
            StepKind::CrossFade(cf) => (cf.source, cf.any.candidates.clone()),
            _ => return,
        };
        if candidates.is_empty() {
            log::error!("cross-fade step has no candidate clips");
            return;
        }
        let Some(source) = self.step_action_id(source_step) else {
            log::warn!("cross-fade source step has no active clip; fade skipped");
            return;
        };
        if !self.actions[source].playing {
            log::warn!(
                "cross-fade source \"{}\" is not running; fade skipped",
                self.actions[source].name()
            );
            return;
        }

        let default_duration = if config.delay.is_some() {
            self.actions[source].remaining().max(DEFAULT_FADE_MS)
        } else {
            DEFAULT_FADE_MS
        };
        let duration = config.duration.unwrap_or(default_duration);
        let fade_out = config.fade_out.unwrap_or(duration);
        let fade_in = config.fade_in.unwrap_or(duration);

        let pick = self.pick_candidate(id, candidates.len());
        let target = candidates[pick];
        self.apply_config_and_play(target, &config);

        if config.warp {
            // Rate matching: the incoming clip runs at the outgoing clip's
            // cycle rate until its fade-in completes.
            let source_len = self.actions[source].clip().length();
            let target_len = self.actions[target].clip().length();
            if source_len > 0.0 && target_len > 0.0 {
                self.actions[target].time_scale = target_len / source_len;
            }
        }

        self.actions[source].fade_to(0.0, fade_out);
        self.actions[target].weight = 0.0;
        self.actions[target].fade_to(1.0, fade_in);

        if let StepKind::CrossFade(cf) = &mut self.steps[id].kind {
            cf.any.active = Some(target);
        }
        if let Some(on_start) = config.on_start {
            on_start();
        }
    }

    /// Fire time triggers whose values were crossed by the active clip during
    /// this tick. Each value fires at most once per tick; loop wraps are
    /// folded into the crossing window.
    fn fire_time_triggers(&mut self, id: StepId, _delta_ms: f32) {
        let any = match &self.steps[id].kind {
            StepKind::Any(any) => any,
            StepKind::CrossFade(cf) => &cf.any,
            _ => return,
        };
        if any.triggers.is_empty() {
            return;
        }
        let Some(action_id) = any.active else {
            return;
        };

        let action = &self.actions[action_id];
        if !action.advanced {
            return;
        }
        let name = action.name().to_string();
        let (prev, now, wrapped) = (action.prev_time, action.tick_end, action.wrapped);

        let triggers = any.triggers.clone();
        for trigger in &triggers {
            if let Some(filter) = &trigger.filter {
                if !filter(&name) {
                    continue;
                }
            }
            for &at in &trigger.times {
                let crossed = if wrapped {
                    at > prev || at <= now
                } else {
                    at > prev && at <= now
                };
                if crossed {
                    (trigger.callback)(at);
                }
            }
        }
    }

    // --- shared helpers ---------------------------------------------------

    fn pick_candidate(&mut self, id: StepId, len: usize) -> usize {
        if len <= 1 {
            return 0;
        }
        let rng = match &mut self.steps[id].kind {
            StepKind::Any(any) => &mut any.rng,
            StepKind::CrossFade(cf) => &mut cf.any.rng,
            _ => return 0,
        };
        rng.random_range(0..len)
    }

    fn apply_config_and_play(&mut self, id: ActionId, config: &StepConfig) {
        let action = &mut self.actions[id];
        if let Some(repeats) = config.repeat {
            action.loop_mode = LoopMode::Repeat(repeats);
        } else {
            action.loop_mode = LoopMode::Once;
        }
        action.clamp_when_finished = config.clamp_when_finished;
        action.on_loop = config.on_loop.clone();
        action.play_from(config.start_at.unwrap_or(0.0));
    }

    /// Active clip of a step, without the configuration-error policy of
    /// `step_action`. Used internally where "none yet" is an expected state.
    pub(crate) fn step_action_id(&self, id: StepId) -> Option<ActionId> {
        match &self.steps[id].kind {
            StepKind::Any(any) => any.active,
            StepKind::CrossFade(cf) => cf.any.active,
            StepKind::Current(current) => current.captured,
            StepKind::Alternate(alt) => match alt.active? {
                AltTarget::Step(step) => self.step_action_id(step),
                AltTarget::Flow(flow) => self.flow_action_id(flow),
            },
            StepKind::Conditional(cond) => self.flow_action_id(cond.taken?),
        }
    }

    pub(crate) fn flow_action_id(&self, flow: FlowId) -> Option<ActionId> {
        self.flows[flow]
            .steps
            .iter()
            .find_map(|&step| self.step_action_id(step))
    }
}
