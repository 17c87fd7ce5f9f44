//! Application lifecycle and event loop
//!
//! An `App` moves through three states:
//!
//! ```text
//! Idle ──start()──> Running ──step()*──> Terminated(Success | Failure)
//! ```
//!
//! While idle, the reactor tree is declared through `root()`. `start()`
//! assigns reaction priorities (a cycle aborts before any event is
//! processed) and queues startup, timer and timeout events. Each `step()`
//! either processes one burst of tags at the same logical time or reports
//! why it cannot: the next event lies in the physical future (`Waiting`) or
//! the federation has not granted the tag yet (`Stalled`). `run()` drives
//! `step()` to completion, sleeping through the application's `Alarm`; a
//! stalled step sleeps for the configured snooze before asking again.

use crate::alarm::{Alarm, SimulatedAlarm, ThreadAlarm, Wakeup};
use crate::federation::{Federation, Standalone};
use crate::reactor::ReactorBuilder;
use crate::scheduler::Engine;
use crate::{
    AppConfig, Error, ManualClock, PhysicalClock, ReactionId, Readable, Result,
    SchedulableAction, SystemClock, Tag, TimeValue, Value,
};
use std::time::Duration;

#[cfg(feature = "journal")]
use crate::Journal;

/// Name of the top-level reactor
pub const ROOT_NAME: &str = "app";

/// How execution ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

/// Lifecycle state of an application
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppState {
    /// Declaring reactors, not started
    Idle,
    /// Processing events
    Running,
    /// Finished; no further events are processed
    Terminated(Outcome),
}

/// Result of a single `App::step`
#[derive(Debug, Clone)]
pub enum Step {
    /// Progress was made; step again
    Ready,
    /// Nothing to do before the wakeup
    Waiting(Wakeup),
    /// The federation has not granted this tag yet
    Stalled(Tag),
    /// Execution has ended
    Terminated(Outcome),
}

/// A reactor program together with its runtime
pub struct App {
    engine: Engine,
    state: AppState,
    alarm: Box<dyn Alarm>,
    pending: Option<Wakeup>,
    on_success: Option<Box<dyn FnOnce()>>,
    on_failure: Option<Box<dyn FnOnce(&Error)>>,
}

impl App {
    /// Create an application on the system clock
    pub fn new(config: AppConfig) -> Self {
        Self {
            engine: Engine::new(config, Box::new(SystemClock), Box::new(Standalone), ROOT_NAME),
            state: AppState::Idle,
            alarm: Box::new(ThreadAlarm::new()),
            pending: None,
            on_success: None,
            on_failure: None,
        }
    }

    /// Create an application whose physical time is `clock`
    ///
    /// Waiting for a wakeup advances the clock instead of sleeping.
    pub fn simulated(config: AppConfig, clock: ManualClock) -> Self {
        Self::new(config)
            .with_clock(clock.clone())
            .with_alarm(SimulatedAlarm::new(clock))
    }

    /// Replace the physical clock
    pub fn with_clock(mut self, clock: impl PhysicalClock + 'static) -> Self {
        self.engine.clock = Box::new(clock);
        self
    }

    /// Replace the wakeup facility used by `run`
    pub fn with_alarm(mut self, alarm: impl Alarm + 'static) -> Self {
        self.alarm = Box::new(alarm);
        self
    }

    /// Join a federation
    pub fn with_federation(mut self, federation: impl Federation + 'static) -> Self {
        self.engine.federation = Box::new(federation);
        self
    }

    /// Call `callback` once if execution ends successfully
    pub fn on_success(&mut self, callback: impl FnOnce() + 'static) {
        self.on_success = Some(Box::new(callback));
    }

    /// Call `callback` once with the error if execution fails
    pub fn on_failure(&mut self, callback: impl FnOnce(&Error) + 'static) {
        self.on_failure = Some(Box::new(callback));
    }

    /// Declare components of the top-level reactor
    pub fn root(&mut self) -> Result<ReactorBuilder<'_>> {
        if self.state != AppState::Idle {
            return Err(Error::AlreadyStarted);
        }
        let root = self.engine.tree.root();
        ReactorBuilder::new(&mut self.engine.tree, root)
    }

    /// Current lifecycle state
    pub fn state(&self) -> AppState {
        self.state
    }

    /// Configuration in use
    pub fn config(&self) -> &AppConfig {
        &self.engine.config
    }

    /// The tag being (or last) processed
    pub fn current_tag(&self) -> Tag {
        self.engine.current_tag
    }

    /// The tag at which execution started
    pub fn start_tag(&self) -> Tag {
        self.engine.start_tag
    }

    /// The end-of-execution tag, once known
    pub fn end_tag(&self) -> Option<Tag> {
        self.engine.end_tag
    }

    /// Priority assigned to a reaction
    pub fn priority(&self, reaction: ReactionId) -> Option<u64> {
        self.engine.tree.reaction(reaction).ok().map(|r| r.priority)
    }

    /// The most recent value of a trigger, present or not
    pub fn trigger_value(&self, trigger: &impl Readable) -> Option<&Value> {
        self.engine
            .tree
            .trigger(trigger.trigger_id())
            .ok()
            .and_then(|t| t.last_value())
    }

    /// The reaction precedence graph in DOT format
    pub fn precedence_graph_dot(&self) -> String {
        self.engine.tree.precedence_dot()
    }

    /// Execution journal
    #[cfg(feature = "journal")]
    pub fn journal(&self) -> &Journal {
        &self.engine.journal
    }

    /// Execution journal, for starting and stopping recording
    #[cfg(feature = "journal")]
    pub fn journal_mut(&mut self) -> &mut Journal {
        &mut self.engine.journal
    }

    /// Validate the program and begin execution
    pub fn start(&mut self) -> Result<()> {
        if self.state != AppState::Idle {
            return Err(Error::AlreadyStarted);
        }
        let spacing = self.engine.config.priority_spacing();
        if let Err(err) = self.engine.tree.assign_priorities(spacing) {
            return Err(self.fail(err));
        }
        self.engine.begin();
        self.state = AppState::Running;
        tracing::info!(
            start = %self.engine.start_tag,
            reactors = self.engine.tree.reactors.len(),
            reactions = self.engine.tree.reactions.len(),
            fast = self.engine.config.fast(),
            keep_alive = self.engine.config.keep_alive(),
            "execution started"
        );
        Ok(())
    }

    /// Process one burst of tags, or report why the head cannot run yet
    pub fn step(&mut self) -> Result<Step> {
        match self.state {
            AppState::Idle => return Err(Error::NotStarted),
            AppState::Terminated(outcome) => return Ok(Step::Terminated(outcome)),
            AppState::Running => {}
        }
        self.cancel_pending();

        let Some(head) = self.engine.events.peek_tag() else {
            if self.engine.end_tag.is_some() {
                return Ok(self.finish());
            }
            if self.engine.config.keep_alive() {
                let at = self.engine.clock.now() + self.engine.config.snooze();
                tracing::trace!(%at, "idle, snoozing");
                return Ok(Step::Waiting(self.arm(at)));
            }
            tracing::debug!("event queue drained, shutting down");
            self.engine.request_shutdown();
            return Ok(Step::Ready);
        };

        if self.engine.end_tag.is_some_and(|end| head > end) {
            return Ok(self.finish());
        }
        if !self.engine.config.fast() && self.engine.clock.now().is_earlier_than(head.time) {
            return Ok(Step::Waiting(self.arm(head.time)));
        }
        if !self.engine.federation.can_proceed(head) {
            tracing::trace!(tag = %head, "waiting for federation grant");
            return Ok(Step::Stalled(head));
        }

        match self.engine.run_burst() {
            Ok(()) => Ok(Step::Ready),
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Start if needed and run until execution ends
    pub fn run(&mut self) -> Result<Outcome> {
        if self.state == AppState::Idle {
            self.start()?;
        }
        loop {
            match self.step()? {
                Step::Ready => {}
                Step::Waiting(wakeup) => self.alarm.wait(&wakeup),
                Step::Stalled(tag) => {
                    let at = self.engine.clock.now() + self.engine.config.snooze();
                    tracing::trace!(%tag, %at, "federation gate closed, snoozing");
                    let wakeup = self.arm(at);
                    self.alarm.wait(&wakeup);
                }
                Step::Terminated(outcome) => return Ok(outcome),
            }
        }
    }

    /// End execution one microstep after the current tag
    ///
    /// Ignored unless the application is running.
    pub fn shutdown(&mut self) {
        if self.state == AppState::Running {
            self.engine.request_shutdown();
            self.cancel_pending();
        }
    }

    /// Schedule an action from outside the program
    ///
    /// Intended for physical actions fed by the environment between steps.
    /// Returns the tag of the new event, or `None` once execution has ended.
    pub fn schedule(
        &mut self,
        action: &SchedulableAction,
        extra_delay: Duration,
        value: impl Into<Value>,
    ) -> Result<Option<Tag>> {
        match self.state {
            AppState::Idle => Err(Error::NotStarted),
            AppState::Terminated(_) => {
                tracing::warn!(
                    action = %self.engine.tree.trigger_name(action.action),
                    "schedule after termination ignored"
                );
                Ok(None)
            }
            AppState::Running => {
                let owner = self.engine.tree.trigger(action.action)?.owner;
                if self.engine.tree.reactor(owner)?.key != action.key {
                    return Err(Error::AccessDenied(format!(
                        "schedule capability for {} does not match",
                        self.engine.tree.trigger_name(action.action)
                    )));
                }
                let tag = self
                    .engine
                    .schedule_action(action.action, extra_delay, value.into())?;
                self.cancel_pending();
                Ok(Some(tag))
            }
        }
    }

    fn arm(&mut self, at: TimeValue) -> Wakeup {
        let wakeup = self.alarm.schedule_wakeup(at);
        self.pending = Some(wakeup.clone());
        wakeup
    }

    fn cancel_pending(&mut self) {
        if let Some(wakeup) = self.pending.take() {
            wakeup.cancel();
        }
    }

    fn finish(&mut self) -> Step {
        self.state = AppState::Terminated(Outcome::Success);
        self.engine.clear();
        self.cancel_pending();
        self.on_failure = None;
        tracing::info!(tag = %self.engine.current_tag, "execution finished");
        if let Some(callback) = self.on_success.take() {
            callback();
        }
        Step::Terminated(Outcome::Success)
    }

    fn fail(&mut self, err: Error) -> Error {
        self.state = AppState::Terminated(Outcome::Failure);
        self.engine.clear();
        self.cancel_pending();
        self.on_success = None;
        tracing::error!(tag = %self.engine.current_tag, error = %err, "execution failed");
        if let Some(callback) = self.on_failure.take() {
            callback(&err);
        }
        err
    }
}
