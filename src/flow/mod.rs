//! Animation flows: named, ordered step sequences representing one behavior
//! ("attack", "start_walking"), composed through fluent builders over the
//! mixer's step arena.

pub mod step;

pub use step::*;

use crate::error::Error;
use crate::mixer::Mixer;
use std::rc::Rc;

pub type FlowId = usize;

/// An ordered list of steps. Starting a flow starts every step that is not
/// driven by a composite step; delayed and conditional steps arm themselves
/// and act on later ticks.
pub struct Flow {
    pub name: String,
    pub steps: Vec<StepId>,
}

impl Mixer {
    /// Begin building a named flow. Re-using a name replaces the previous
    /// flow in the lookup table (the old steps stay parked in the arena).
    pub fn flow(&mut self, name: &str) -> FlowBuilder<'_> {
        if self.flow_names.contains_key(name) {
            log::warn!("flow \"{}\" redefined", name);
        }
        let id = self.create_flow(name.to_string());
        self.flow_names.insert(name.to_string(), id);
        FlowBuilder { mixer: self, flow: id }
    }

    pub(crate) fn create_flow(&mut self, name: String) -> FlowId {
        let id = self.flows.len();
        self.flows.push(Flow {
            name,
            steps: Vec::new(),
        });
        id
    }

    pub fn find_flow(&self, name: &str) -> Result<FlowId, Error> {
        self.flow_names
            .get(name)
            .copied()
            .ok_or_else(|| Error::UnknownFlow {
                name: name.to_string(),
            })
    }

    pub fn start_flow(&mut self, name: &str) -> Result<(), Error> {
        let id = self.find_flow(name)?;
        self.start_flow_id(id);
        Ok(())
    }

    pub fn stop_flow(&mut self, name: &str) -> Result<(), Error> {
        let id = self.find_flow(name)?;
        self.stop_flow_id(id);
        Ok(())
    }

    pub(crate) fn start_flow_id(&mut self, id: FlowId) {
        for i in 0..self.flows[id].steps.len() {
            let step = self.flows[id].steps[i];
            if !self.steps[step].driven {
                self.start_step(step);
            }
        }
    }

    /// Stopping a flow stops every step, driven ones included, which in turn
    /// stops each step's active clip instance immediately.
    pub(crate) fn stop_flow_id(&mut self, id: FlowId) {
        for i in 0..self.flows[id].steps.len() {
            let step = self.flows[id].steps[i];
            self.stop_step(step);
        }
    }
}

/// Entry point of the flow DSL: appends the first step of a flow.
pub struct FlowBuilder<'m> {
    mixer: &'m mut Mixer,
    flow: FlowId,
}

impl<'m> FlowBuilder<'m> {
    /// A step that always plays this one clip.
    pub fn single_step(self, clip: &str) -> Result<StepBuilder<'m>, Error> {
        self.any_step(&[clip])
    }

    /// A step that plays one of the candidate clips, picked by the step's
    /// seeded generator.
    pub fn any_step(self, clips: &[&str]) -> Result<StepBuilder<'m>, Error> {
        let step = push_any(self.mixer, self.flow, clips, false)?;
        Ok(StepBuilder {
            mixer: self.mixer,
            flow: self.flow,
            step,
        })
    }

    /// A step cycling round-robin through sub-steps: the first candidate set
    /// becomes a step of this flow, later ones get flows of their own.
    pub fn alternate_step(self, subs: &[&[&str]]) -> Result<StepBuilder<'m>, Error> {
        let step = push_alternate(self.mixer, self.flow, subs)?;
        Ok(StepBuilder {
            mixer: self.mixer,
            flow: self.flow,
            step,
        })
    }

    /// A step that starts one of two named flows depending on a predicate
    /// evaluated at start time.
    pub fn conditional_step(
        self,
        condition: impl Fn() -> bool + 'static,
        then_flow: &str,
        else_flow: Option<&str>,
    ) -> Result<StepBuilder<'m>, Error> {
        let then_flow = self.mixer.find_flow(then_flow)?;
        let else_flow = match else_flow {
            Some(name) => Some(self.mixer.find_flow(name)?),
            None => None,
        };
        let kind = StepKind::Conditional(ConditionalState {
            condition: Rc::new(condition),
            then_flow,
            else_flow,
            taken: None,
        });
        let step = self
            .mixer
            .push_step(self.flow, false, StepConfig::default(), kind);
        Ok(StepBuilder {
            mixer: self.mixer,
            flow: self.flow,
            step,
        })
    }

    /// A step that replays whatever clip instance is running when it starts.
    pub fn current_step(self) -> StepBuilder<'m> {
        let kind = StepKind::Current(CurrentState { captured: None });
        let step = self
            .mixer
            .push_step(self.flow, false, StepConfig::default(), kind);
        StepBuilder {
            mixer: self.mixer,
            flow: self.flow,
            step,
        }
    }
}

fn push_any(mixer: &mut Mixer, flow: FlowId, clips: &[&str], driven: bool) -> Result<StepId, Error> {
    let candidates = mixer.find_actions(clips)?;
    let rng = mixer.fork_rng();
    let kind = StepKind::Any(AnyState {
        candidates,
        rng,
        active: None,
        triggers: Vec::new(),
    });
    Ok(mixer.push_step(flow, driven, StepConfig::default(), kind))
}

fn push_alternate(mixer: &mut Mixer, flow: FlowId, subs: &[&[&str]]) -> Result<StepId, Error> {
    let mut targets = Vec::with_capacity(subs.len());
    for (i, clips) in subs.iter().enumerate() {
        if i == 0 {
            let step = push_any(mixer, flow, clips, true)?;
            targets.push(AltTarget::Step(step));
        } else {
            let sub_flow = mixer.create_flow(format!("{}#alt{}", mixer.flows[flow].name, i));
            push_any(mixer, sub_flow, clips, false)?;
            targets.push(AltTarget::Flow(sub_flow));
        }
    }
    let kind = StepKind::Alternate(AlternateState {
        subs: targets,
        cursor: 0,
        active: None,
    });
    Ok(mixer.push_step(flow, false, StepConfig::default(), kind))
}

/// Chainable handle for the step just appended: carries the modifier methods
/// and appends follow-up steps to the same flow.
pub struct StepBuilder<'m> {
    mixer: &'m mut Mixer,
    flow: FlowId,
    step: StepId,
}

impl<'m> std::fmt::Debug for StepBuilder<'m> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepBuilder")
            .field("flow", &self.flow)
            .field("step", &self.step)
            .finish_non_exhaustive()
    }
}

impl<'m> StepBuilder<'m> {
    pub fn id(&self) -> StepId {
        self.step
    }

    /// Append a cross-fade step that blends from this step's active clip to
    /// one of the given candidates.
    pub fn cross_fade_step(self, clips: &[&str]) -> Result<StepBuilder<'m>, Error> {
        let candidates = self.mixer.find_actions(clips)?;
        let rng = self.mixer.fork_rng();
        let kind = StepKind::CrossFade(CrossFadeState {
            any: AnyState {
                candidates,
                rng,
                active: None,
                triggers: Vec::new(),
            },
            source: self.step,
            phase: FadePhase::Idle,
        });
        let step = self
            .mixer
            .push_step(self.flow, false, StepConfig::default(), kind);
        Ok(StepBuilder {
            mixer: self.mixer,
            flow: self.flow,
            step,
        })
    }

    /// Append an independent follow-up step to the same flow.
    pub fn single_step(self, clip: &str) -> Result<StepBuilder<'m>, Error> {
        let step = push_any(self.mixer, self.flow, &[clip], false)?;
        Ok(StepBuilder {
            mixer: self.mixer,
            flow: self.flow,
            step,
        })
    }

    pub fn any_step(self, clips: &[&str]) -> Result<StepBuilder<'m>, Error> {
        let step = push_any(self.mixer, self.flow, clips, false)?;
        Ok(StepBuilder {
            mixer: self.mixer,
            flow: self.flow,
            step,
        })
    }

    // --- modifiers --------------------------------------------------------

    fn config(&mut self) -> &mut StepConfig {
        &mut self.mixer.steps[self.step].config
    }

    /// Play the clip this many times in total instead of once.
    pub fn repeat(mut self, times: u32) -> Self {
        self.config().repeat = Some(times);
        self
    }

    pub fn start_at_time(mut self, time_ms: f32) -> Self {
        self.config().start_at = Some(time_ms);
        self
    }

    /// Hold the last frame when the clip finishes instead of rewinding.
    pub fn clamp_when_finished(mut self) -> Self {
        self.config().clamp_when_finished = true;
        self
    }

    /// Stop every candidate clip before starting the picked one.
    pub fn stop_before_start(mut self) -> Self {
        self.config().stop_before_start = true;
        self
    }

    /// Delay a cross-fade until the source step has played this long,
    /// counting completed loop repetitions.
    pub fn with_delay(mut self, delay_ms: f32) -> Self {
        self.config().delay = Some(delay_ms);
        self
    }

    pub fn with_duration(mut self, duration_ms: f32) -> Self {
        self.config().duration = Some(duration_ms);
        self
    }

    pub fn with_fade_out_duration(mut self, duration_ms: f32) -> Self {
        self.config().fade_out = Some(duration_ms);
        self
    }

    pub fn with_fade_in_duration(mut self, duration_ms: f32) -> Self {
        self.config().fade_in = Some(duration_ms);
        self
    }

    /// Match the incoming clip's playback rate to the outgoing clip's cycle
    /// for the duration of the fade.
    pub fn with_warp(mut self) -> Self {
        self.config().warp = true;
        self
    }

    pub fn on_start(mut self, callback: impl Fn() + 'static) -> Self {
        self.config().on_start = Some(Rc::new(callback));
        self
    }

    pub fn on_loop(mut self, callback: impl Fn(u32) + 'static) -> Self {
        self.config().on_loop = Some(Rc::new(callback));
        self
    }

    /// Fire the callback once whenever the active clip's cursor crosses one
    /// of the listed times during a tick.
    pub fn on_time(self, times: &[f32], callback: impl Fn(f32) + 'static) -> Self {
        self.add_trigger(times, Rc::new(callback), None)
    }

    /// Like `on_time`, additionally filtered by the active clip's name.
    pub fn on_time_when(
        self,
        times: &[f32],
        callback: impl Fn(f32) + 'static,
        filter: impl Fn(&str) -> bool + 'static,
    ) -> Self {
        self.add_trigger(times, Rc::new(callback), Some(Rc::new(filter)))
    }

    fn add_trigger(
        mut self,
        times: &[f32],
        callback: TimeCallback,
        filter: Option<NameFilter>,
    ) -> Self {
        let trigger = TimeTrigger {
            times: times.to_vec(),
            callback,
            filter,
        };
        match &mut self.mixer.steps[self.step].kind {
            StepKind::Any(any) => any.triggers.push(trigger),
            StepKind::CrossFade(cf) => cf.any.triggers.push(trigger),
            _ => log::warn!("time trigger attached to a step kind that never ticks"),
        }
        self
    }
}
