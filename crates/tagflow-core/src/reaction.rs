//! Reactions, mutations and procedures
//!
//! A reaction is a body bound to the triggers that stage it, the triggers it
//! may read, the ports it may write and the actions it may schedule. Its
//! priority is assigned by the global topological sort before execution.
//!
//! ## Kinds
//!
//! - `Reaction` - Ordinary computation
//! - `Mutation` - May additionally connect, disconnect and delete through `MutationCtx`
//! - `Procedure` - Triggered only by a callee port and run synchronously by callers
//!
//! ## Declaring reactions
//!
//! ```rust,ignore
//! let out = reactor.output("out");
//! let w = reactor.writable(&out)?;
//! let tick = reactor.timer("tick", Duration::ZERO, Duration::from_secs(1));
//! reactor
//!     .reaction()
//!     .named("emit")
//!     .trigger(&tick)
//!     .effect(&w)
//!     .body(move |ctx| ctx.set(&w, 1i64))?;
//! ```

use crate::context::{MutationCtx, ReactionCtx};
use crate::reactor::Tree;
use crate::{
    AccessKey, Error, PortKind, Readable, ReactionId, ReactorId, Result, SchedulableAction,
    TriggerKind, WritablePort,
};
use std::marker::PhantomData;
use std::time::Duration;

/// Body of an ordinary reaction, a procedure, or a deadline handler
pub type ReactionFn = Box<dyn FnMut(&mut ReactionCtx<'_>) -> Result<()>>;

/// Body of a mutation
pub type MutationFn = Box<dyn FnMut(&mut MutationCtx<'_>) -> Result<()>>;

/// The role a reaction plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReactionKind {
    Reaction,
    Mutation,
    Procedure,
}

impl ReactionKind {
    fn tag(&self) -> char {
        match self {
            ReactionKind::Reaction => 'R',
            ReactionKind::Mutation => 'M',
            ReactionKind::Procedure => 'P',
        }
    }
}

pub(crate) enum Body {
    Reaction(ReactionFn),
    Mutation(MutationFn),
}

/// Runtime record of a reaction
pub struct Reaction {
    pub(crate) id: ReactionId,
    pub(crate) owner: ReactorId,
    pub(crate) kind: ReactionKind,
    pub(crate) name: String,
    pub(crate) triggers: Vec<crate::TriggerId>,
    pub(crate) sources: Vec<crate::TriggerId>,
    pub(crate) effects: Vec<crate::TriggerId>,
    pub(crate) schedules: Vec<crate::TriggerId>,
    pub(crate) body: Option<Body>,
    pub(crate) deadline: Option<Duration>,
    pub(crate) late: Option<ReactionFn>,
    pub(crate) priority: u64,
}

impl Reaction {
    /// Reaction ID
    pub fn id(&self) -> ReactionId {
        self.id
    }

    /// Fully-qualified name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Owning reactor
    pub fn owner(&self) -> ReactorId {
        self.owner
    }

    /// Kind of reaction
    pub fn kind(&self) -> ReactionKind {
        self.kind
    }

    /// Assigned priority (lower runs first)
    pub fn priority(&self) -> u64 {
        self.priority
    }

    /// Deadline relative to the tag of the triggering event
    pub fn deadline(&self) -> Option<Duration> {
        self.deadline
    }

    /// Check if the reaction may read `trigger`
    pub(crate) fn observes(&self, trigger: crate::TriggerId) -> bool {
        self.triggers.contains(&trigger)
            || self.sources.contains(&trigger)
            || self.effects.contains(&trigger)
            || self.schedules.contains(&trigger)
    }

    /// Forget a trigger that no longer exists
    pub(crate) fn forget(&mut self, trigger: crate::TriggerId) {
        self.triggers.retain(|t| *t != trigger);
        self.sources.retain(|t| *t != trigger);
        self.effects.retain(|t| *t != trigger);
        self.schedules.retain(|t| *t != trigger);
    }
}

impl std::fmt::Debug for Reaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reaction")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

/// Marker for builders producing ordinary reactions
pub struct ForReaction;

/// Marker for builders producing mutations
pub struct ForMutation;

/// Builder for a mutation
pub type MutationBuilder<'r> = ReactionBuilder<'r, ForMutation>;

/// Declares a reaction on a reactor
///
/// Scope errors are collected while chaining and reported by `body`.
pub struct ReactionBuilder<'r, K = ForReaction> {
    tree: &'r mut Tree,
    owner: ReactorId,
    key: AccessKey,
    label: Option<String>,
    triggers: Vec<crate::TriggerId>,
    sources: Vec<crate::TriggerId>,
    effects: Vec<crate::TriggerId>,
    schedules: Vec<crate::TriggerId>,
    deadline: Option<Duration>,
    late: Option<ReactionFn>,
    error: Option<Error>,
    _kind: PhantomData<K>,
}

impl<'r, K> ReactionBuilder<'r, K> {
    pub(crate) fn new(tree: &'r mut Tree, owner: ReactorId, key: AccessKey) -> Self {
        Self {
            tree,
            owner,
            key,
            label: None,
            triggers: Vec::new(),
            sources: Vec::new(),
            effects: Vec::new(),
            schedules: Vec::new(),
            deadline: None,
            late: None,
            error: None,
            _kind: PhantomData,
        }
    }

    /// Give the reaction a readable name
    pub fn named(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Stage the reaction whenever `trigger` becomes present
    pub fn trigger(mut self, trigger: &impl Readable) -> Self {
        let id = trigger.trigger_id();
        if let Err(err) = self.tree.check_readable(self.owner, id) {
            self.error.get_or_insert(err);
        } else if !self.triggers.contains(&id) {
            self.triggers.push(id);
        }
        self
    }

    /// Allow the reaction to read `source` without being staged by it
    pub fn source(mut self, source: &impl Readable) -> Self {
        let id = source.trigger_id();
        if let Err(err) = self.tree.check_readable(self.owner, id) {
            self.error.get_or_insert(err);
        } else if !self.sources.contains(&id) {
            self.sources.push(id);
        }
        self
    }

    /// Allow the reaction to write `port`
    pub fn effect(mut self, port: &WritablePort) -> Self {
        if port.key != self.key {
            self.error.get_or_insert(Error::AccessDenied(format!(
                "write capability for {} belongs to another reactor",
                self.tree.trigger_name(port.port)
            )));
        } else if !self.effects.contains(&port.port) {
            self.effects.push(port.port);
        }
        self
    }

    /// Allow the reaction to schedule `action`
    pub fn schedules(mut self, action: &SchedulableAction) -> Self {
        if action.key != self.key {
            self.error.get_or_insert(Error::AccessDenied(format!(
                "schedule capability for {} belongs to another reactor",
                self.tree.trigger_name(action.action)
            )));
        } else if !self.schedules.contains(&action.action) {
            self.schedules.push(action.action);
        }
        self
    }

    /// Run the late handler instead of the body when physical time has
    /// passed the triggering tag by more than `deadline`
    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Handler for deadline violations; without one a warning is logged
    pub fn late(
        mut self,
        handler: impl FnMut(&mut ReactionCtx<'_>) -> Result<()> + 'static,
    ) -> Self {
        self.late = Some(Box::new(handler));
        self
    }

    fn register(self, mutation: bool, body: Body) -> Result<ReactionId> {
        if let Some(err) = self.error {
            return Err(err);
        }
        let tree = self.tree;
        let reactor_name = tree.reactor(self.owner)?.fqn.clone();

        let callees: Vec<_> = self
            .triggers
            .iter()
            .filter(|t| {
                tree.trigger(**t)
                    .map(|t| t.kind == TriggerKind::Port(PortKind::Callee))
                    .unwrap_or(false)
            })
            .copied()
            .collect();
        let kind = match (callees.first(), mutation) {
            (None, false) => ReactionKind::Reaction,
            (None, true) => ReactionKind::Mutation,
            (Some(_), true) => {
                return Err(Error::OutOfScope(format!(
                    "mutation of {} cannot serve a callee port",
                    reactor_name
                )))
            }
            (Some(callee), false) => {
                if self.triggers.len() > 1 {
                    return Err(Error::ProcedureTriggers(reactor_name));
                }
                let callee_trigger = tree.trigger(*callee)?;
                let taken = callee_trigger.reactions.iter().any(|r| {
                    tree.reaction(*r)
                        .map(|r| r.kind == ReactionKind::Procedure)
                        .unwrap_or(false)
                });
                if taken {
                    return Err(Error::MultipleProcedures(tree.trigger_name(*callee)));
                }
                ReactionKind::Procedure
            }
        };

        // Reactions may not write ports that are fed by a connection
        for effect in &self.effects {
            let port = tree.trigger(*effect)?;
            if port.source.is_some() {
                return Err(Error::IllegalConnection {
                    src: tree.trigger_name(port.source.unwrap_or(*effect)),
                    dst: tree.trigger_name(*effect),
                    reason: crate::ConnectionRejection::AlreadyConnected,
                });
            }
        }

        let id = ReactionId::new(tree.next_raw_id());
        let index = {
            let reactor = tree.reactor(self.owner)?;
            reactor.mutations.len() + reactor.reactions.len()
        };
        let name = match &self.label {
            Some(label) => format!("{}.{}", reactor_name, label),
            None => format!("{}[{}{}]", reactor_name, kind.tag(), index),
        };

        for trigger in &self.triggers {
            tree.trigger_manager(*trigger, self.key)?.add_reaction(id);
        }
        for effect in &self.effects {
            tree.trigger_mut(*effect)?.writers.insert(id);
        }

        let reaction = Reaction {
            id,
            owner: self.owner,
            kind,
            name,
            triggers: self.triggers,
            sources: self.sources,
            effects: self.effects,
            schedules: self.schedules,
            body: Some(body),
            deadline: self.deadline,
            late: self.late,
            priority: u64::MAX,
        };
        tracing::debug!(reaction = %reaction.name, kind = ?kind, "registered reaction");
        tree.insert_reaction(reaction)?;
        Ok(id)
    }
}

impl ReactionBuilder<'_, ForReaction> {
    /// Finish the declaration with the reaction body
    pub fn body(
        self,
        body: impl FnMut(&mut ReactionCtx<'_>) -> Result<()> + 'static,
    ) -> Result<ReactionId> {
        self.register(false, Body::Reaction(Box::new(body)))
    }
}

impl ReactionBuilder<'_, ForMutation> {
    /// Finish the declaration with the mutation body
    pub fn body(
        self,
        body: impl FnMut(&mut MutationCtx<'_>) -> Result<()> + 'static,
    ) -> Result<ReactionId> {
        self.register(true, Body::Mutation(Box::new(body)))
    }
}
