//! Tag-by-tag execution engine
//!
//! The engine owns the reactor tree and both queues. One call to
//! `run_burst` processes every tag at the logical time of the event-queue
//! head:
//! 1. advance the current tag to the head's tag
//! 2. apply every event at that tag, staging the reactions they trigger
//! 3. drain the reaction queue in priority order
//! 4. apply deferred deletions and refresh priorities if the topology changed
//! 5. repeat while the next head shares the same time (a later microstep)
//!
//! Mutations that connect, disconnect or create reactors refresh priorities
//! as soon as their commands are applied, so reactions staged later in the
//! same tag are ordered by the new topology.

use crate::context::{MutationCtx, ReactionCtx};
use crate::federation::Federation;
use crate::reaction::Body;
use crate::reactor::Tree;
use crate::trigger::action_spec;
use crate::{
    AppConfig, Cmd, Error, Event, EventQueue, Origin, PhysicalClock, PortKind, ReactionId,
    ReactionKind, ReactionQueue, ReactorId, Result, Tag, TriggerId, TriggerKind, Value,
};
use std::collections::HashSet;
use std::time::Duration;

#[cfg(feature = "journal")]
use crate::Journal;

pub(crate) struct Engine {
    pub(crate) tree: Tree,
    pub(crate) events: EventQueue,
    pub(crate) reactions: ReactionQueue,
    pub(crate) current_tag: Tag,
    pub(crate) start_tag: Tag,
    pub(crate) end_tag: Option<Tag>,
    pub(crate) clock: Box<dyn PhysicalClock>,
    pub(crate) federation: Box<dyn Federation>,
    pub(crate) config: AppConfig,
    /// First capability violation of the running reaction
    pub(crate) fault: Option<Error>,
    pending_deletions: Vec<ReactorId>,
    topology_changed: bool,
    #[cfg(feature = "journal")]
    pub(crate) journal: Journal,
}

impl Engine {
    pub(crate) fn new(
        config: AppConfig,
        clock: Box<dyn PhysicalClock>,
        federation: Box<dyn Federation>,
        root_name: &str,
    ) -> Self {
        Self {
            tree: Tree::new(root_name),
            events: EventQueue::new(),
            reactions: ReactionQueue::new(),
            current_tag: Tag::default(),
            start_tag: Tag::default(),
            end_tag: None,
            clock,
            federation,
            config,
            fault: None,
            pending_deletions: Vec::new(),
            topology_changed: false,
            #[cfg(feature = "journal")]
            journal: Journal::new(),
        }
    }

    /// Fix the start tag and queue startup, timer and timeout events
    pub(crate) fn begin(&mut self) {
        let start = Tag::new(self.clock.now(), 0);
        self.start_tag = start;
        self.current_tag = start;

        let everyone: HashSet<ReactorId> = self.tree.reactors.keys().copied().collect();
        self.queue_startup(&everyone, start);

        if let Some(timeout) = self.config.execution_timeout() {
            self.set_end(start.later_tag(timeout));
        }
    }

    /// Queue the startup events of `reactors` at `at` and the first firing
    /// of their timers
    fn queue_startup(&mut self, reactors: &HashSet<ReactorId>, at: Tag) {
        let startups: Vec<TriggerId> = self
            .tree
            .reactors
            .values()
            .filter(|r| reactors.contains(&r.id))
            .map(|r| r.startup)
            .collect();
        for startup in startups {
            self.events.push(Event::new(startup, at, Value::Unit));
        }

        let timers: Vec<(TriggerId, Duration)> = self
            .tree
            .triggers
            .values()
            .filter(|t| reactors.contains(&t.owner))
            .filter_map(|t| match t.kind {
                TriggerKind::Timer(spec) => Some((t.id, spec.offset)),
                _ => None,
            })
            .collect();
        for (timer, offset) in timers {
            let first = if offset.is_zero() {
                at.microstep_later()
            } else {
                at.later_tag(offset)
            };
            self.events.push(Event::new(timer, first, Value::Unit));
        }
    }

    /// Bring a reactor declared by a mutation, and its descendants, to life
    fn start_created(&mut self, reactor: ReactorId) {
        let created: HashSet<ReactorId> = self.tree.subtree(reactor).into_iter().collect();
        let at = self.current_tag.microstep_later();
        self.queue_startup(&created, at);

        if let Some(end) = self.end_tag.filter(|end| *end > self.current_tag) {
            let shutdowns: Vec<TriggerId> = self
                .tree
                .reactors
                .values()
                .filter(|r| created.contains(&r.id))
                .map(|r| r.shutdown)
                .collect();
            for shutdown in shutdowns {
                self.events.push(Event::new(shutdown, end, Value::Unit));
            }
        }
        tracing::info!(reactor = %self.tree.reactor_name(reactor), startup = %at, "created reactor");
    }

    /// Set the end-of-execution tag and queue every shutdown trigger there
    fn set_end(&mut self, tag: Tag) {
        self.end_tag = Some(tag);
        let shutdowns: Vec<TriggerId> = self.tree.reactors.values().map(|r| r.shutdown).collect();
        for shutdown in shutdowns {
            self.events.push(Event::new(shutdown, tag, Value::Unit));
        }
        tracing::debug!(%tag, "end of execution set");
    }

    /// Shut down one microstep after the current tag
    ///
    /// Ignored if execution already ends at or before that tag.
    pub(crate) fn request_shutdown(&mut self) {
        let tag = self.current_tag.microstep_later();
        if self.end_tag.is_some_and(|end| end <= tag) {
            return;
        }
        self.set_end(tag);
    }

    /// Queue an action event; returns its tag
    pub(crate) fn schedule_action(
        &mut self,
        action: TriggerId,
        extra_delay: Duration,
        value: Value,
    ) -> Result<Tag> {
        let spec = action_spec(self.tree.trigger(action)?)?;
        let delay = spec.min_delay.saturating_add(extra_delay);
        let mut tag = self.current_tag.later_tag(delay);
        match spec.origin {
            Origin::Logical => tag = tag.microstep_later(),
            Origin::Physical => {
                let now = self.clock.now();
                if tag.time.is_earlier_than(now) {
                    tag = Tag::new(now, 0);
                } else {
                    tag = tag.microstep_later();
                }
            }
        }
        tracing::debug!(
            action = %self.tree.trigger_name(action),
            origin = ?spec.origin,
            %tag,
            "scheduled action"
        );
        self.events.push(Event::new(action, tag, value));
        Ok(tag)
    }

    fn stage(&mut self, reaction: ReactionId) -> Result<()> {
        let reaction = self.tree.reaction(reaction)?;
        // Procedures only run when invoked
        if reaction.kind != ReactionKind::Procedure {
            self.reactions.push(reaction.priority, reaction.id);
        }
        Ok(())
    }

    /// Set a port at the current tag, propagate through connections and
    /// stage every observing reaction
    pub(crate) fn write_port(&mut self, port: TriggerId, value: Value) -> Result<()> {
        let tag = self.current_tag;
        let mut pending = vec![port];
        while let Some(id) = pending.pop() {
            let trigger = self.tree.trigger_mut(id)?;
            trigger.update(value.clone(), tag);
            let forwards = matches!(trigger.kind.port(), Some(PortKind::Input | PortKind::Output));
            let observers: Vec<ReactionId> = trigger.reactions.iter().copied().collect();
            let receivers: Vec<TriggerId> = if forwards {
                trigger.receivers.iter().rev().copied().collect()
            } else {
                Vec::new()
            };
            for reaction in observers {
                self.stage(reaction)?;
            }
            pending.extend(receivers);
        }
        Ok(())
    }

    fn apply_event(&mut self, event: Event) -> Result<()> {
        if event.tag != self.current_tag {
            return Err(Error::TagMismatch {
                expected: self.current_tag,
                found: event.tag,
            });
        }
        let Some(kind) = self.tree.triggers.get(&event.trigger).map(|t| t.kind) else {
            // Deleted after the event was queued
            return Ok(());
        };

        #[cfg(feature = "journal")]
        self.journal
            .record_event(event.tag, event.trigger, self.tree.trigger_name(event.trigger));

        if kind.is_port() {
            return self.write_port(event.trigger, event.value);
        }

        let observers: Vec<ReactionId> = {
            let trigger = self.tree.trigger_mut(event.trigger)?;
            trigger.update(event.value, event.tag);
            trigger.reactions.iter().copied().collect()
        };
        for reaction in observers {
            self.stage(reaction)?;
        }

        if let TriggerKind::Timer(spec) = kind {
            if !spec.period.is_zero() {
                let next = event.tag.later_tag(spec.period);
                self.events.push(Event::new(event.trigger, next, Value::Unit));
            }
        }
        Ok(())
    }

    /// Run one reaction, its late handler or its mutation commands
    pub(crate) fn execute(&mut self, id: ReactionId) -> Result<()> {
        let (name, owner, deadline) = {
            let reaction = self.tree.reaction(id)?;
            (reaction.name.clone(), reaction.owner, reaction.deadline)
        };
        tracing::trace!(reaction = %name, tag = %self.current_tag, "executing reaction");
        #[cfg(feature = "journal")]
        self.journal.record_reaction(self.current_tag, name.clone());

        let missed = deadline.is_some_and(|d| {
            self.current_tag.later_tag(d) < Tag::new(self.clock.now(), 0)
        });
        let result = if missed {
            self.run_late(id, &name)
        } else {
            self.run_body(id, owner, &name)
        };
        let result = match self.fault.take() {
            Some(fault) => Err(fault),
            None => result,
        };

        result.map_err(|err| match err {
            failed @ Error::ReactionFailed { .. } => failed,
            other => {
                tracing::error!(reaction = %name, error = %other, "reaction failed");
                Error::ReactionFailed {
                    reaction: name,
                    source: Box::new(other),
                }
            }
        })
    }

    fn run_late(&mut self, id: ReactionId, name: &str) -> Result<()> {
        let Some(mut handler) = self.tree.reaction_mut(id)?.late.take() else {
            tracing::warn!(reaction = %name, tag = %self.current_tag, "deadline missed");
            return Ok(());
        };
        tracing::debug!(reaction = %name, "deadline missed, running late handler");
        let result = handler(&mut ReactionCtx::new(self, id));
        if let Ok(reaction) = self.tree.reaction_mut(id) {
            reaction.late = Some(handler);
        }
        result
    }

    fn run_body(&mut self, id: ReactionId, owner: ReactorId, name: &str) -> Result<()> {
        let body = self
            .tree
            .reaction_mut(id)?
            .body
            .take()
            .ok_or_else(|| Error::ReentrantInvocation(name.to_string()))?;

        let (body, result) = match body {
            Body::Reaction(mut f) => {
                let result = f(&mut ReactionCtx::new(self, id));
                (Body::Reaction(f), result)
            }
            Body::Mutation(mut f) => {
                let mut ctx = MutationCtx::new(self, id);
                let result = f(&mut ctx);
                let commands = ctx.into_commands();
                let result = result
                    .and_then(|()| self.apply(owner, Cmd::batch(commands)))
                    .and_then(|()| self.refresh_priorities());
                (Body::Mutation(f), result)
            }
        };

        if let Ok(reaction) = self.tree.reaction_mut(id) {
            reaction.body = Some(body);
        }
        result
    }

    /// Apply the commands of a mutation owned by `scope`
    fn apply(&mut self, scope: ReactorId, cmd: Cmd) -> Result<()> {
        for cmd in cmd.into_vec() {
            match cmd {
                Cmd::None => {}
                Cmd::Batch(inner) => self.apply(scope, Cmd::Batch(inner))?,
                Cmd::Connect { src, dst } => {
                    self.tree.connect(scope, src, dst)?;
                    self.topology_changed = true;
                }
                Cmd::Disconnect { src, dst } => {
                    if self.tree.disconnect(src, dst) {
                        self.topology_changed = true;
                    }
                }
                Cmd::Create(reactor) => {
                    self.start_created(reactor);
                    self.topology_changed = true;
                }
                Cmd::Delete(reactor) => {
                    if !self.pending_deletions.contains(&reactor) {
                        self.pending_deletions.push(reactor);
                    }
                }
            }
        }
        Ok(())
    }

    /// Deferred deletions and priority refresh at the end of a step
    fn finish_step(&mut self) -> Result<()> {
        for reactor in std::mem::take(&mut self.pending_deletions) {
            // Already gone with a deleted ancestor
            if !self.tree.reactors.contains_key(&reactor) {
                continue;
            }
            let name = self.tree.reactor_name(reactor);
            let removed = self.tree.remove_reactor(reactor)?;
            let dead: HashSet<TriggerId> = removed.triggers.into_iter().collect();
            self.events.retain_triggers(|t| !dead.contains(&t));
            for id in &removed.reactions {
                self.reactions.remove(*id);
            }
            self.topology_changed = true;
            tracing::info!(reactor = %name, tag = %self.current_tag, "deleted reactor");
        }

        self.refresh_priorities()
    }

    /// Reassign priorities after a topology change and re-key staged reactions
    fn refresh_priorities(&mut self) -> Result<()> {
        if !self.topology_changed {
            return Ok(());
        }
        self.topology_changed = false;
        self.tree.assign_priorities(self.config.priority_spacing())?;
        let tree = &self.tree;
        self.reactions
            .reprioritize(|id| tree.reactions.get(&id).map(|r| r.priority));
        tracing::debug!("reaction priorities refreshed");
        Ok(())
    }

    /// Check whether the burst may continue with the event-queue head
    fn continues_burst(&mut self, time: crate::TimeValue) -> bool {
        let Some(head) = self.events.peek_tag() else {
            return false;
        };
        head.time == time
            && self.end_tag.map_or(true, |end| head <= end)
            && self.federation.can_proceed(head)
    }

    /// Process the tags at the logical time of the event-queue head
    ///
    /// The caller has checked that the head may be processed.
    pub(crate) fn run_burst(&mut self) -> Result<()> {
        let Some(first) = self.events.peek_tag() else {
            return Ok(());
        };
        loop {
            let Some(tag) = self.events.peek_tag() else {
                break;
            };
            self.current_tag = tag;
            tracing::debug!(%tag, "processing tag");
            #[cfg(feature = "journal")]
            self.journal.record_tag(tag);

            while self.events.peek_tag() == Some(tag) {
                if let Some(event) = self.events.pop() {
                    self.apply_event(event)?;
                }
            }
            while let Some(reaction) = self.reactions.pop() {
                self.execute(reaction)?;
            }
            self.finish_step()?;

            if !self.continues_burst(first.time) {
                break;
            }
        }
        Ok(())
    }

    /// Drop everything still queued
    pub(crate) fn clear(&mut self) {
        self.events.clear();
        self.reactions.clear();
        self.pending_deletions.clear();
    }
}
