//! What a reaction body sees while it runs
//!
//! `ReactionCtx` exposes the current tag, the values of the triggers the
//! reaction declared, and the effects it is allowed to have: writing ports,
//! scheduling actions, calling procedures and requesting shutdown.
//! `MutationCtx` adds structural changes, which are recorded as `Cmd`s and
//! applied by the runtime once the mutation returns. Reactors a mutation
//! creates are declared on the spot; only their startup is deferred.
//!
//! Every write and schedule is checked against the capability handle and the
//! reaction's declaration. A failed check is fatal to the run even if the
//! body ignores the returned error.

use crate::reactor::{PendingEdits, ReactorBuilder};
use crate::scheduler::Engine;
use crate::{
    Cmd, Error, Port, PortKind, ReactionId, ReactionKind, Readable, ReactorId, Result,
    SchedulableAction, Tag, TimeValue, TriggerKind, Value, WritablePort,
};
use std::ops::{Deref, DerefMut};
use std::time::Duration;

/// Context passed to reaction, procedure and deadline handler bodies
pub struct ReactionCtx<'a> {
    pub(crate) engine: &'a mut Engine,
    reaction: ReactionId,
}

impl<'a> ReactionCtx<'a> {
    pub(crate) fn new(engine: &'a mut Engine, reaction: ReactionId) -> Self {
        Self { engine, reaction }
    }

    /// ID of the running reaction
    pub fn reaction(&self) -> ReactionId {
        self.reaction
    }

    /// Fully-qualified name of the running reaction
    pub fn reaction_name(&self) -> &str {
        self.engine
            .tree
            .reaction(self.reaction)
            .map(|r| r.name.as_str())
            .unwrap_or_default()
    }

    /// The tag being processed
    pub fn current_tag(&self) -> Tag {
        self.engine.current_tag
    }

    /// The tag at which execution started
    pub fn start_tag(&self) -> Tag {
        self.engine.start_tag
    }

    /// Logical time of the current tag
    pub fn logical_time(&self) -> TimeValue {
        self.engine.current_tag.time
    }

    /// Logical time elapsed since the start of execution
    pub fn elapsed_logical_time(&self) -> Duration {
        self.engine
            .current_tag
            .time
            .difference(self.engine.start_tag.time)
    }

    /// Current physical time
    pub fn physical_time(&self) -> TimeValue {
        self.engine.clock.now()
    }

    /// Physical time elapsed since the start of execution
    pub fn elapsed_physical_time(&self) -> Duration {
        self.engine
            .clock
            .now()
            .difference(self.engine.start_tag.time)
    }

    /// Check if `trigger` has a value at the current tag
    pub fn is_present(&self, trigger: &impl Readable) -> bool {
        self.get(trigger).is_some()
    }

    /// The value of `trigger` if it is present at the current tag
    ///
    /// Only triggers the reaction declared (as trigger, source, effect or
    /// scheduled action) can be read; anything else reads as absent.
    pub fn get(&self, trigger: &impl Readable) -> Option<&Value> {
        let id = trigger.trigger_id();
        let reaction = self.engine.tree.reaction(self.reaction).ok()?;
        if !reaction.observes(id) {
            return None;
        }
        self.engine.tree.trigger(id).ok()?.get(self.engine.current_tag)
    }

    fn owner(&self) -> Result<ReactorId> {
        Ok(self.engine.tree.reaction(self.reaction)?.owner)
    }

    /// Record a capability violation; the run fails once the body returns
    fn deny(&mut self, what: &str, trigger: crate::TriggerId) -> Error {
        let message = format!(
            "{} may not {} {}",
            self.reaction_name(),
            what,
            self.engine.tree.trigger_name(trigger)
        );
        tracing::error!(%message, "capability violation");
        self.engine
            .fault
            .get_or_insert_with(|| Error::AccessDenied(message.clone()));
        Error::AccessDenied(message)
    }

    fn holds_key(&self, key: crate::AccessKey) -> Result<bool> {
        let owner = self.owner()?;
        Ok(self.engine.tree.reactor(owner)?.key == key)
    }

    /// Write a value to a port declared as an effect
    ///
    /// The value propagates through connections immediately and every
    /// reaction observing an affected port is staged for the current tag.
    pub fn set(&mut self, port: &WritablePort, value: impl Into<Value>) -> Result<()> {
        let declared = self
            .engine
            .tree
            .reaction(self.reaction)?
            .effects
            .contains(&port.port);
        if !declared || !self.holds_key(port.key)? {
            return Err(self.deny("write", port.port));
        }
        self.engine.write_port(port.port, value.into())
    }

    /// Write a value if there is one; `None` leaves the port untouched
    pub fn set_opt(&mut self, port: &WritablePort, value: Option<Value>) -> Result<()> {
        match value {
            Some(value) => self.set(port, value),
            None => Ok(()),
        }
    }

    /// Schedule an action declared with `schedules`
    ///
    /// Returns the tag of the resulting event.
    pub fn schedule(
        &mut self,
        action: &SchedulableAction,
        extra_delay: Duration,
        value: impl Into<Value>,
    ) -> Result<Tag> {
        let declared = self
            .engine
            .tree
            .reaction(self.reaction)?
            .schedules
            .contains(&action.action);
        if !declared || !self.holds_key(action.key)? {
            return Err(self.deny("schedule", action.action));
        }
        self.engine
            .schedule_action(action.action, extra_delay, value.into())
    }

    /// Call the procedure connected to a caller port declared as an effect
    ///
    /// The procedure runs to completion before this returns. Returns the
    /// value it passed to `ret`, or `None` if it returned nothing or the
    /// caller is not connected.
    pub fn invoke(&mut self, caller: &WritablePort, args: impl Into<Value>) -> Result<Option<Value>> {
        let declared = self
            .engine
            .tree
            .reaction(self.reaction)?
            .effects
            .contains(&caller.port);
        if !declared || !self.holds_key(caller.key)? {
            return Err(self.deny("call through", caller.port));
        }
        let (kind, callee) = {
            let port = self.engine.tree.trigger(caller.port)?;
            (port.kind, port.receivers.first().copied())
        };
        if kind != TriggerKind::Port(PortKind::Caller) {
            return Err(self.deny("call through", caller.port));
        }
        let Some(callee) = callee else {
            tracing::debug!(
                caller = %self.engine.tree.trigger_name(caller.port),
                "call through unconnected caller"
            );
            return Ok(None);
        };

        let tag = self.engine.current_tag;
        let args = args.into();
        self.engine.tree.trigger_mut(caller.port)?.update(args.clone(), tag);
        let observers: Vec<ReactionId> = {
            let target = self.engine.tree.trigger_mut(callee)?;
            target.update(args, tag);
            target.returned = None;
            target.reactions.iter().copied().collect()
        };
        let procedure = observers.into_iter().find(|r| {
            self.engine
                .tree
                .reactions
                .get(r)
                .is_some_and(|r| r.kind == ReactionKind::Procedure)
        });
        let Some(procedure) = procedure else {
            return Ok(None);
        };

        let outer = self.engine.fault.take();
        let result = self.engine.execute(procedure);
        self.engine.fault = outer;
        match result {
            Ok(()) => Ok(self.engine.tree.trigger_mut(callee)?.returned.take()),
            Err(err) => {
                let message = err.to_string();
                self.engine.fault.get_or_insert(err);
                Err(Error::Custom(message))
            }
        }
    }

    /// Return a value from a procedure to its caller
    pub fn ret(&mut self, callee: &WritablePort, value: impl Into<Value>) -> Result<()> {
        let serves = self
            .engine
            .tree
            .reaction(self.reaction)?
            .triggers
            .contains(&callee.port);
        if !serves || !self.holds_key(callee.key)? {
            return Err(self.deny("return through", callee.port));
        }
        self.engine.tree.trigger_mut(callee.port)?.returned = Some(value.into());
        Ok(())
    }

    /// End execution one microstep after the current tag
    pub fn request_shutdown(&mut self) {
        self.engine.request_shutdown();
    }

    /// Send a message to another federate
    pub fn send_message(&mut self, destination: u32, port: u32, payload: &[u8]) -> Result<()> {
        self.engine
            .federation
            .send_message(destination, port, payload)
    }

    /// Send a message to be delivered `delay` after the current tag
    pub fn send_timed_message(
        &mut self,
        destination: u32,
        port: u32,
        delay: Duration,
        payload: &[u8],
    ) -> Result<()> {
        let tag = self.engine.current_tag.later_tag(delay);
        self.engine
            .federation
            .send_timed_message(destination, port, tag, payload)
    }
}

/// Context passed to mutation bodies
///
/// Dereferences to `ReactionCtx` for everything an ordinary reaction can do.
pub struct MutationCtx<'a> {
    ctx: ReactionCtx<'a>,
    commands: Vec<Cmd>,
    pending: PendingEdits,
}

impl<'a> MutationCtx<'a> {
    pub(crate) fn new(engine: &'a mut Engine, reaction: ReactionId) -> Self {
        Self {
            ctx: ReactionCtx::new(engine, reaction),
            commands: Vec::new(),
            pending: PendingEdits::default(),
        }
    }

    /// Connect two ports visible from this mutation's reactor
    ///
    /// Besides the construction-time rules, the connection must not close a
    /// cycle or add a direct input-to-output path through the reactor.
    pub fn connect(&mut self, src: &impl Port, dst: &impl Port) -> Result<()> {
        let (src, dst) = (src.trigger_id(), dst.trigger_id());
        let scope = self.ctx.owner()?;
        let tree = &self.ctx.engine.tree;
        tree.can_connect(scope, src, dst, true, &self.pending)
            .map_err(|reason| tree.connection_error(src, dst, reason))?;
        self.pending.connects.push((src, dst));
        self.commands.push(Cmd::connect(src, dst));
        Ok(())
    }

    /// Remove a connection previously made by this mutation's reactor
    pub fn disconnect(&mut self, src: &impl Port, dst: &impl Port) -> Result<()> {
        let (src, dst) = (src.trigger_id(), dst.trigger_id());
        let scope = self.ctx.owner()?;
        let tree = &self.ctx.engine.tree;
        if !tree.owns_connection(scope, src, dst) || self.pending.releases(src, dst) {
            return Err(Error::OutOfScope(format!(
                "{} has no connection from {} to {}",
                tree.reactor_name(scope),
                tree.trigger_name(src),
                tree.trigger_name(dst)
            )));
        }
        self.pending.disconnects.push((src, dst));
        self.commands.push(Cmd::disconnect(src, dst));
        Ok(())
    }

    /// Declare a new child of this mutation's reactor
    ///
    /// The child exists as soon as `build` returns, so the rest of the
    /// mutation can connect its ports. Its startup trigger fires one
    /// microstep after the current tag.
    pub fn create_child<T>(
        &mut self,
        name: &str,
        build: impl FnOnce(&mut ReactorBuilder<'_>) -> Result<T>,
    ) -> Result<T> {
        let scope = self.ctx.owner()?;
        let tree = &mut self.ctx.engine.tree;
        let id = tree.create_reactor(Some(scope), name);
        self.commands.push(Cmd::create(id));
        build(&mut ReactorBuilder::new(&mut *tree, id)?)
    }

    /// Delete a descendant reactor at the end of the current step
    pub fn delete(&mut self, reactor: ReactorId) -> Result<()> {
        let scope = self.ctx.owner()?;
        let tree = &self.ctx.engine.tree;
        if !tree.is_descendant(reactor, scope) {
            return Err(Error::OutOfScope(format!(
                "{} cannot delete {}",
                tree.reactor_name(scope),
                tree.reactor_name(reactor)
            )));
        }
        self.commands.push(Cmd::delete(reactor));
        Ok(())
    }

    /// Commands recorded so far
    pub fn commands(&self) -> &[Cmd] {
        &self.commands
    }

    pub(crate) fn into_commands(self) -> Vec<Cmd> {
        self.commands
    }
}

impl<'a> Deref for MutationCtx<'a> {
    type Target = ReactionCtx<'a>;

    fn deref(&self) -> &Self::Target {
        &self.ctx
    }
}

impl DerefMut for MutationCtx<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.ctx
    }
}
