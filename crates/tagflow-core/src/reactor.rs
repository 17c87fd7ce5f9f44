//! Reactor tree, construction API and connection rules
//!
//! All reactors, triggers and reactions of an application live in one arena
//! (`Tree`) owned by the runtime. Reactors are declared through
//! `ReactorBuilder`, which registers every component explicitly and hands
//! out capability handles only to the declaring reactor.
//!
//! ## Connection rules
//!
//! A reactor may connect ports that are visible from its scope:
//! - output of a child to input of a child (siblings, or a child to itself)
//! - output of a child to its own output
//! - its own input to input of a child
//!
//! Inputs never feed outputs directly, a destination accepts one source,
//! and a port written by reactions cannot also be fed by a connection.
//! Connections made while the program runs are also checked against the
//! causality interfaces of the children: the new edge must neither close a
//! cycle nor create a new input-to-output path through the reactor.

use crate::graph::{DependencyGraph, PriorityError};
use crate::reaction::{ForMutation, MutationBuilder, Reaction, ReactionBuilder, ReactionKind};
use crate::{
    AccessKey, Action, ActionSpec, CalleePort, CallerPort, ConnectionRejection, Error, InputPort,
    Origin, OutputPort, Port, PortKind, ReactionId, ReactorId, Result, SchedulableAction, Shutdown,
    Startup, Timer, TimerSpec, Trigger, TriggerId, TriggerKind, TriggerManager, WritablePort,
};
use indexmap::{IndexMap, IndexSet};
use std::collections::HashSet;
use std::time::Duration;

/// Node of the local and global dependency graphs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Node {
    Port(TriggerId),
    Reaction(ReactionId),
}

/// Runtime record of a reactor
#[derive(Debug, Clone)]
pub struct Reactor {
    pub(crate) id: ReactorId,
    pub(crate) fqn: String,
    pub(crate) parent: Option<ReactorId>,
    pub(crate) key: AccessKey,
    pub(crate) children: Vec<ReactorId>,
    pub(crate) triggers: Vec<TriggerId>,
    pub(crate) mutations: Vec<ReactionId>,
    pub(crate) reactions: Vec<ReactionId>,
    /// Connections made by this reactor, as `(source, destination)`
    pub(crate) connections: Vec<(TriggerId, TriggerId)>,
    pub(crate) startup: TriggerId,
    pub(crate) shutdown: TriggerId,
}

impl Reactor {
    /// Reactor ID
    pub fn id(&self) -> ReactorId {
        self.id
    }

    /// Fully-qualified name, e.g. `app.sensor`
    pub fn name(&self) -> &str {
        &self.fqn
    }

    /// Containing reactor (`None` for the top-level reactor)
    pub fn parent(&self) -> Option<ReactorId> {
        self.parent
    }

    /// Child reactors in declaration order
    pub fn children(&self) -> &[ReactorId] {
        &self.children
    }

    /// Mutations first, then reactions, each in declaration order
    pub(crate) fn ordered_reactions(&self) -> impl Iterator<Item = ReactionId> + '_ {
        self.mutations.iter().chain(self.reactions.iter()).copied()
    }
}

/// Edits recorded by a running mutation but not applied yet
#[derive(Debug, Clone, Default)]
pub(crate) struct PendingEdits {
    pub(crate) connects: Vec<(TriggerId, TriggerId)>,
    pub(crate) disconnects: Vec<(TriggerId, TriggerId)>,
}

impl PendingEdits {
    fn connects_to(&self, dst: TriggerId) -> bool {
        self.connects.iter().any(|(_, d)| *d == dst)
    }

    fn connects_from(&self, src: TriggerId) -> bool {
        self.connects.iter().any(|(s, _)| *s == src)
    }

    pub(crate) fn releases(&self, src: TriggerId, dst: TriggerId) -> bool {
        self.disconnects.contains(&(src, dst))
    }
}

/// What a deletion removed
#[derive(Debug, Clone, Default)]
pub(crate) struct Removed {
    pub(crate) reactors: Vec<ReactorId>,
    pub(crate) triggers: Vec<TriggerId>,
    pub(crate) reactions: Vec<ReactionId>,
}

/// Arena holding every reactor, trigger and reaction
#[derive(Debug)]
pub(crate) struct Tree {
    pub(crate) reactors: IndexMap<ReactorId, Reactor>,
    pub(crate) triggers: IndexMap<TriggerId, Trigger>,
    pub(crate) reactions: IndexMap<ReactionId, Reaction>,
    next_id: u64,
    root: ReactorId,
}

impl Tree {
    /// Create a tree holding only the top-level reactor
    pub(crate) fn new(root_name: &str) -> Self {
        let mut tree = Self {
            reactors: IndexMap::new(),
            triggers: IndexMap::new(),
            reactions: IndexMap::new(),
            next_id: 0,
            root: ReactorId::new(0),
        };
        tree.root = tree.create_reactor(None, root_name);
        tree
    }

    pub(crate) fn root(&self) -> ReactorId {
        self.root
    }

    pub(crate) fn next_raw_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub(crate) fn create_reactor(&mut self, parent: Option<ReactorId>, name: &str) -> ReactorId {
        let id = ReactorId::new(self.next_raw_id());
        let key = AccessKey::new(self.next_raw_id());
        let fqn = match parent.and_then(|p| self.reactors.get(&p)) {
            Some(p) => format!("{}.{}", p.fqn, name),
            None => name.to_string(),
        };
        let startup = TriggerId::new(self.next_raw_id());
        let shutdown = TriggerId::new(self.next_raw_id());
        self.triggers
            .insert(startup, Trigger::new(startup, "startup", id, TriggerKind::Startup));
        self.triggers
            .insert(shutdown, Trigger::new(shutdown, "shutdown", id, TriggerKind::Shutdown));
        self.reactors.insert(
            id,
            Reactor {
                id,
                fqn,
                parent,
                key,
                children: Vec::new(),
                triggers: vec![startup, shutdown],
                mutations: Vec::new(),
                reactions: Vec::new(),
                connections: Vec::new(),
                startup,
                shutdown,
            },
        );
        if let Some(parent) = parent.and_then(|p| self.reactors.get_mut(&p)) {
            parent.children.push(id);
        }
        id
    }

    pub(crate) fn add_trigger(&mut self, owner: ReactorId, name: &str, kind: TriggerKind) -> TriggerId {
        let id = TriggerId::new(self.next_raw_id());
        self.triggers.insert(id, Trigger::new(id, name, owner, kind));
        if let Some(reactor) = self.reactors.get_mut(&owner) {
            reactor.triggers.push(id);
        }
        id
    }

    pub(crate) fn insert_reaction(&mut self, reaction: Reaction) -> Result<()> {
        let reactor = self
            .reactors
            .get_mut(&reaction.owner)
            .ok_or_else(|| Error::UnknownReactor(reaction.owner.to_string()))?;
        if reaction.kind == ReactionKind::Mutation {
            reactor.mutations.push(reaction.id);
        } else {
            reactor.reactions.push(reaction.id);
        }
        self.reactions.insert(reaction.id, reaction);
        Ok(())
    }

    pub(crate) fn reactor(&self, id: ReactorId) -> Result<&Reactor> {
        self.reactors
            .get(&id)
            .ok_or_else(|| Error::UnknownReactor(id.to_string()))
    }

    pub(crate) fn trigger(&self, id: TriggerId) -> Result<&Trigger> {
        self.triggers
            .get(&id)
            .ok_or_else(|| Error::UnknownTrigger(id.to_string()))
    }

    pub(crate) fn trigger_mut(&mut self, id: TriggerId) -> Result<&mut Trigger> {
        self.triggers
            .get_mut(&id)
            .ok_or_else(|| Error::UnknownTrigger(id.to_string()))
    }

    pub(crate) fn reaction(&self, id: ReactionId) -> Result<&Reaction> {
        self.reactions
            .get(&id)
            .ok_or_else(|| Error::UnknownReaction(id.to_string()))
    }

    pub(crate) fn reaction_mut(&mut self, id: ReactionId) -> Result<&mut Reaction> {
        self.reactions
            .get_mut(&id)
            .ok_or_else(|| Error::UnknownReaction(id.to_string()))
    }

    /// Fully-qualified trigger name, e.g. `app.sensor.out`
    pub(crate) fn trigger_name(&self, id: TriggerId) -> String {
        match self.triggers.get(&id) {
            Some(trigger) => match self.reactors.get(&trigger.owner) {
                Some(owner) => format!("{}.{}", owner.fqn, trigger.name),
                None => trigger.name.clone(),
            },
            None => id.to_string(),
        }
    }

    pub(crate) fn reactor_name(&self, id: ReactorId) -> String {
        self.reactors
            .get(&id)
            .map(|r| r.fqn.clone())
            .unwrap_or_else(|| id.to_string())
    }

    fn parent_of(&self, reactor: ReactorId) -> Option<ReactorId> {
        self.reactors.get(&reactor).and_then(|r| r.parent)
    }

    /// Check if `candidate` is a strict descendant of `ancestor`
    pub(crate) fn is_descendant(&self, candidate: ReactorId, ancestor: ReactorId) -> bool {
        let mut current = self.parent_of(candidate);
        while let Some(reactor) = current {
            if reactor == ancestor {
                return true;
            }
            current = self.parent_of(reactor);
        }
        false
    }

    /// Observer-set capability for `trigger`, granted to its owner and the owner's container
    pub(crate) fn trigger_manager(&mut self, trigger: TriggerId, key: AccessKey) -> Result<TriggerManager<'_>> {
        let owner = self.reactor(self.trigger(trigger)?.owner)?;
        let container_key = owner
            .parent
            .and_then(|p| self.reactors.get(&p))
            .map(|p| p.key);
        if owner.key != key && container_key != Some(key) {
            return Err(Error::AccessDenied(format!(
                "cannot manage reactions of {}",
                self.trigger_name(trigger)
            )));
        }
        Ok(TriggerManager {
            trigger: self.trigger_mut(trigger)?,
        })
    }

    /// A reaction of `reactor` may observe its own inputs and non-port
    /// triggers, and the outputs of its children
    pub(crate) fn check_readable(&self, reactor: ReactorId, trigger: TriggerId) -> Result<()> {
        let t = self.trigger(trigger)?;
        let visible = match t.kind.port() {
            Some(kind) => {
                (t.owner == reactor && kind.is_input_like())
                    || (self.parent_of(t.owner) == Some(reactor) && kind == PortKind::Output)
            }
            None => t.owner == reactor,
        };
        if visible {
            Ok(())
        } else {
            Err(Error::OutOfScope(format!(
                "{} cannot observe {} {}",
                self.reactor_name(reactor),
                t.kind.label(),
                self.trigger_name(trigger)
            )))
        }
    }

    /// Decide whether `scope` may connect `src` to `dst`
    ///
    /// `pending` holds the edits accepted earlier in the same mutation but not
    /// applied yet. With `runtime` set, the causality check runs too.
    pub(crate) fn can_connect(
        &self,
        scope: ReactorId,
        src: TriggerId,
        dst: TriggerId,
        runtime: bool,
        pending: &PendingEdits,
    ) -> std::result::Result<(), ConnectionRejection> {
        if src == dst {
            return Err(ConnectionRejection::SelfLoop);
        }
        let (Some(s), Some(d)) = (self.triggers.get(&src), self.triggers.get(&dst)) else {
            return Err(ConnectionRejection::OutOfScope);
        };
        let (Some(src_kind), Some(dst_kind)) = (s.kind.port(), d.kind.port()) else {
            return Err(ConnectionRejection::OutOfScope);
        };

        let caller = src_kind == PortKind::Caller;
        let callee = dst_kind == PortKind::Callee;
        if caller != callee {
            return Err(ConnectionRejection::CallerCalleeMismatch);
        }

        if !src_kind.is_output_like() && !dst_kind.is_input_like() {
            return Err(ConnectionRejection::InputToOutput);
        }

        let fed = d.source.is_some_and(|s| !pending.releases(s, dst));
        if !callee && (fed || pending.connects_to(dst)) {
            return Err(ConnectionRejection::AlreadyConnected);
        }
        let calling = s.receivers.iter().any(|r| !pending.releases(src, *r));
        if caller && (calling || pending.connects_from(src)) {
            return Err(ConnectionRejection::AlreadyConnected);
        }
        if !d.writers.is_empty() {
            return Err(ConnectionRejection::WrittenByReaction);
        }

        let src_child = s.owner == scope;
        let dst_child = d.owner == scope;
        let src_grandchild = self.parent_of(s.owner) == Some(scope);
        let dst_grandchild = self.parent_of(d.owner) == Some(scope);
        let in_scope = match (src_kind.is_output_like(), dst_kind.is_input_like()) {
            (true, true) => src_grandchild && dst_grandchild,
            (true, false) => src_grandchild && dst_child,
            (false, true) => src_child && dst_grandchild,
            (false, false) => false,
        };
        if !in_scope {
            return Err(ConnectionRejection::OutOfScope);
        }

        if runtime && !caller {
            self.check_feedback(scope, src, dst, pending)?;
        }
        Ok(())
    }

    fn check_feedback(
        &self,
        scope: ReactorId,
        src: TriggerId,
        dst: TriggerId,
        pending: &PendingEdits,
    ) -> std::result::Result<(), ConnectionRejection> {
        let mut graph = self.interface_graph(scope);
        for (s, d) in &pending.disconnects {
            graph.remove_edge(Node::Port(*d), Node::Port(*s));
        }
        for (s, d) in &pending.connects {
            if !self.is_call_link(*s, *d) {
                graph.add_edge(Node::Port(*d), Node::Port(*s));
            }
        }
        let before = self.boundary_pairs(scope, &graph);
        graph.add_edge(Node::Port(dst), Node::Port(src));
        if graph.has_cycle() {
            return Err(ConnectionRejection::Cycle);
        }
        let after = self.boundary_pairs(scope, &graph);
        if after.iter().any(|pair| !before.contains(pair)) {
            return Err(ConnectionRejection::ZeroDelayFeedback);
        }
        Ok(())
    }

    fn is_call_link(&self, src: TriggerId, dst: TriggerId) -> bool {
        let kind = |id| self.triggers.get(&id).and_then(|t| t.kind.port());
        kind(src) == Some(PortKind::Caller) && kind(dst) == Some(PortKind::Callee)
    }

    pub(crate) fn connection_error(&self, src: TriggerId, dst: TriggerId, reason: ConnectionRejection) -> Error {
        Error::IllegalConnection {
            src: self.trigger_name(src),
            dst: self.trigger_name(dst),
            reason,
        }
    }

    /// Record a connection made by `scope`; legality must be checked first
    pub(crate) fn connect(&mut self, scope: ReactorId, src: TriggerId, dst: TriggerId) -> Result<()> {
        let call_link = self.is_call_link(src, dst);
        self.trigger_mut(src)?.receivers.insert(dst);
        if !call_link {
            self.trigger_mut(dst)?.source = Some(src);
        }
        let reactor = self
            .reactors
            .get_mut(&scope)
            .ok_or_else(|| Error::UnknownReactor(scope.to_string()))?;
        reactor.connections.push((src, dst));
        tracing::debug!(
            src = %self.trigger_name(src),
            dst = %self.trigger_name(dst),
            "connected ports"
        );
        Ok(())
    }

    /// Check that `scope` made the connection `src -> dst`
    pub(crate) fn owns_connection(&self, scope: ReactorId, src: TriggerId, dst: TriggerId) -> bool {
        self.reactors
            .get(&scope)
            .is_some_and(|r| r.connections.contains(&(src, dst)))
    }

    /// Remove a connection; returns whether it existed
    pub(crate) fn disconnect(&mut self, src: TriggerId, dst: TriggerId) -> bool {
        let mut found = false;
        for reactor in self.reactors.values_mut() {
            let before = reactor.connections.len();
            reactor.connections.retain(|c| *c != (src, dst));
            found |= reactor.connections.len() != before;
        }
        if let Some(s) = self.triggers.get_mut(&src) {
            s.receivers.shift_remove(&dst);
        }
        if let Some(d) = self.triggers.get_mut(&dst) {
            if d.source == Some(src) {
                d.source = None;
            }
        }
        if found {
            tracing::debug!(
                src = %self.trigger_name(src),
                dst = %self.trigger_name(dst),
                "disconnected ports"
            );
        }
        found
    }

    /// Ports and reactions of `reactor` with the edges it declares itself
    pub(crate) fn local_graph(&self, reactor: ReactorId) -> DependencyGraph<Node> {
        let mut graph = DependencyGraph::new();
        let Some(r) = self.reactors.get(&reactor) else {
            return graph;
        };
        let port_kind = |id: &TriggerId| self.triggers.get(id).and_then(|t| t.kind.port());

        let mut prev: Option<Node> = None;
        for id in r.ordered_reactions() {
            let Some(reaction) = self.reactions.get(&id) else {
                continue;
            };
            let node = Node::Reaction(id);
            graph.add_node(node);
            if let Some(prev) = prev {
                graph.add_edge(node, prev);
            }
            for read in reaction.triggers.iter().chain(reaction.sources.iter()) {
                match port_kind(read) {
                    Some(PortKind::Callee) | None => {}
                    Some(_) => graph.add_edge(node, Node::Port(*read)),
                }
            }
            for effect in &reaction.effects {
                if matches!(port_kind(effect), Some(PortKind::Input | PortKind::Output)) {
                    graph.add_edge(Node::Port(*effect), node);
                }
            }
            prev = Some(node);
        }
        for (src, dst) in &r.connections {
            if !self.is_call_link(*src, *dst) {
                graph.add_edge(Node::Port(*dst), Node::Port(*src));
            }
        }
        graph
    }

    /// Local graph extended with the causality interfaces of the children
    fn interface_graph(&self, reactor: ReactorId) -> DependencyGraph<Node> {
        let mut graph = self.local_graph(reactor);
        if let Some(r) = self.reactors.get(&reactor) {
            for child in &r.children {
                for (input, output) in self.causality_interface(*child) {
                    graph.add_edge(Node::Port(output), Node::Port(input));
                }
            }
        }
        graph
    }

    /// Pairs `(input, output)` of `reactor` such that the output depends on the input
    pub(crate) fn causality_interface(&self, reactor: ReactorId) -> IndexSet<(TriggerId, TriggerId)> {
        let graph = self.interface_graph(reactor);
        self.boundary_pairs(reactor, &graph)
    }

    fn boundary_pairs(
        &self,
        reactor: ReactorId,
        graph: &DependencyGraph<Node>,
    ) -> IndexSet<(TriggerId, TriggerId)> {
        let mut pairs = IndexSet::new();
        let Some(r) = self.reactors.get(&reactor) else {
            return pairs;
        };
        let ports: Vec<(TriggerId, PortKind)> = r
            .triggers
            .iter()
            .filter_map(|id| self.triggers.get(id).and_then(|t| t.kind.port()).map(|k| (*id, k)))
            .collect();
        let inputs: IndexSet<Node> = ports
            .iter()
            .filter(|(_, k)| k.is_input_like())
            .map(|(id, _)| Node::Port(*id))
            .collect();
        for (output, _) in ports.iter().filter(|(_, k)| k.is_output_like()) {
            for origin in graph.reachable_origins(Node::Port(*output), &inputs) {
                if let Node::Port(input) = origin {
                    pairs.insert((input, *output));
                }
            }
        }
        pairs
    }

    /// The reaction preceding and following `reaction` in its reactor
    fn neighbors(&self, reaction: ReactionId) -> (Option<ReactionId>, Option<ReactionId>) {
        let Some(owner) = self
            .reactions
            .get(&reaction)
            .and_then(|r| self.reactors.get(&r.owner))
        else {
            return (None, None);
        };
        let ordered: Vec<ReactionId> = owner.ordered_reactions().collect();
        match ordered.iter().position(|r| *r == reaction) {
            Some(i) => (
                i.checked_sub(1).map(|p| ordered[p]),
                ordered.get(i + 1).copied(),
            ),
            None => (None, None),
        }
    }

    /// Reactions that may invoke the procedure served by `callee`
    fn callers_of(&self, callee: TriggerId) -> Vec<ReactionId> {
        self.reactions
            .values()
            .filter(|r| {
                r.effects.iter().any(|e| {
                    self.triggers.get(e).is_some_and(|t| {
                        t.kind == TriggerKind::Port(PortKind::Caller) && t.receivers.contains(&callee)
                    })
                })
            })
            .map(|r| r.id)
            .collect()
    }

    /// Global precedence graph collapsed onto reactions
    pub(crate) fn precedence_graph(&self) -> DependencyGraph<Node> {
        let mut graph = DependencyGraph::new();
        for reactor in self.reactors.keys() {
            graph.merge(&self.local_graph(*reactor));
        }

        // Callers run inside the procedure's slot of its reactor
        for procedure in self.reactions.values().filter(|r| r.kind == ReactionKind::Procedure) {
            let Some(callee) = procedure.triggers.first() else {
                continue;
            };
            let callers = self.callers_of(*callee);
            let (prev, next) = self.neighbors(procedure.id);
            for caller in &callers {
                if let Some(prev) = prev {
                    graph.add_edge(Node::Reaction(*caller), Node::Reaction(prev));
                }
                if let Some(next) = next {
                    graph.add_edge(Node::Reaction(next), Node::Reaction(*caller));
                }
            }
            for pair in callers.windows(2) {
                graph.add_edge(Node::Reaction(pair[1]), Node::Reaction(pair[0]));
            }
        }

        graph.collapse(|node| matches!(node, Node::Reaction(_)))
    }

    /// Assign every reaction its priority from the global topological order
    pub(crate) fn assign_priorities(&mut self, spacing: u64) -> Result<()> {
        let mut graph = self.precedence_graph();
        let nodes = graph.len();
        let mut assigned = Vec::with_capacity(nodes);
        let sorted = graph.update_priorities(true, spacing, |node, priority| {
            if let Node::Reaction(id) = node {
                assigned.push((id, priority));
            }
        });
        match sorted {
            Ok(()) => {}
            Err(PriorityError::Cycle) => {
                let stuck: Vec<String> = graph
                    .nodes()
                    .filter_map(|n| match n {
                        Node::Reaction(id) => self.reactions.get(&id).map(|r| r.name.clone()),
                        Node::Port(_) => None,
                    })
                    .collect();
                tracing::error!(reactions = ?stuck, "cycle in the precedence graph");
                return Err(Error::CycleDetected);
            }
            Err(PriorityError::Overflow) => {
                return Err(Error::Config(format!(
                    "priority spacing {spacing} is too large for {nodes} reactions"
                )));
            }
        }
        for (id, priority) in assigned {
            if let Some(reaction) = self.reactions.get_mut(&id) {
                reaction.priority = priority;
            }
        }
        Ok(())
    }

    /// The collapsed precedence graph in DOT format
    pub(crate) fn precedence_dot(&self) -> String {
        self.precedence_graph().to_dot(|node| match node {
            Node::Reaction(id) => self
                .reactions
                .get(id)
                .map(|r| r.name.clone())
                .unwrap_or_else(|| id.to_string()),
            Node::Port(id) => self.trigger_name(*id),
        })
    }

    /// `reactor` and all of its descendants, parents before children
    pub(crate) fn subtree(&self, reactor: ReactorId) -> Vec<ReactorId> {
        let mut order = Vec::new();
        let mut stack = vec![reactor];
        while let Some(id) = stack.pop() {
            if let Some(r) = self.reactors.get(&id) {
                order.push(id);
                stack.extend(r.children.iter().rev().copied());
            }
        }
        order
    }

    /// Delete a reactor with its descendants, triggers, reactions and connections
    pub(crate) fn remove_reactor(&mut self, reactor: ReactorId) -> Result<Removed> {
        if reactor == self.root {
            return Err(Error::OutOfScope("the top-level reactor cannot be deleted".into()));
        }
        self.reactor(reactor)?;

        let mut removed = Removed::default();
        for id in self.subtree(reactor) {
            let r = &self.reactors[&id];
            removed.reactors.push(id);
            removed.triggers.extend(r.triggers.iter().copied());
            removed.reactions.extend(r.ordered_reactions());
        }
        let dead_triggers: HashSet<TriggerId> = removed.triggers.iter().copied().collect();
        let dead_reactions: HashSet<ReactionId> = removed.reactions.iter().copied().collect();

        for trigger in self.triggers.values_mut() {
            trigger.reactions.retain(|r| !dead_reactions.contains(r));
            trigger.writers.retain(|r| !dead_reactions.contains(r));
            trigger.receivers.retain(|t| !dead_triggers.contains(t));
            if trigger.source.is_some_and(|s| dead_triggers.contains(&s)) {
                trigger.source = None;
            }
        }
        for reaction in self.reactions.values_mut() {
            if dead_reactions.contains(&reaction.id) {
                continue;
            }
            for trigger in &removed.triggers {
                if reaction.observes(*trigger) {
                    reaction.forget(*trigger);
                }
            }
        }
        for r in self.reactors.values_mut() {
            r.connections
                .retain(|(s, d)| !dead_triggers.contains(s) && !dead_triggers.contains(d));
            r.children.retain(|c| *c != reactor);
        }

        for id in &removed.triggers {
            self.triggers.shift_remove(id);
        }
        for id in &removed.reactions {
            self.reactions.shift_remove(id);
        }
        for id in &removed.reactors {
            self.reactors.shift_remove(id);
        }
        tracing::debug!(
            reactors = removed.reactors.len(),
            triggers = removed.triggers.len(),
            reactions = removed.reactions.len(),
            "deleted reactor subtree"
        );
        Ok(removed)
    }
}

/// Declares the components of one reactor
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use tagflow_core::{App, AppConfig};
///
/// let mut app = App::new(AppConfig::default().with_fast(true));
/// let mut root = app.root().unwrap();
/// let sink = root
///     .child("sink", |sink| {
///         let input = sink.input("in");
///         sink.reaction().trigger(&input).body(|_| Ok(()))?;
///         Ok(input)
///     })
///     .unwrap();
/// let source = root
///     .child("source", |source| {
///         let out = source.output("out");
///         let w = source.writable(&out)?;
///         let start = source.startup();
///         source
///             .reaction()
///             .trigger(&start)
///             .effect(&w)
///             .body(move |ctx| ctx.set(&w, 42i64))?;
///         Ok(out)
///     })
///     .unwrap();
/// root.connect(&source, &sink).unwrap();
/// ```
pub struct ReactorBuilder<'a> {
    tree: &'a mut Tree,
    id: ReactorId,
    key: AccessKey,
    startup: TriggerId,
    shutdown: TriggerId,
}

impl<'a> ReactorBuilder<'a> {
    pub(crate) fn new(tree: &'a mut Tree, id: ReactorId) -> Result<Self> {
        let reactor = tree.reactor(id)?;
        let (key, startup, shutdown) = (reactor.key, reactor.startup, reactor.shutdown);
        Ok(Self {
            tree,
            id,
            key,
            startup,
            shutdown,
        })
    }

    /// ID of the reactor being declared
    pub fn id(&self) -> ReactorId {
        self.id
    }

    /// Fully-qualified name of the reactor being declared
    pub fn name(&self) -> String {
        self.tree.reactor_name(self.id)
    }

    /// Declare an input port
    pub fn input(&mut self, name: &str) -> InputPort {
        InputPort(self.tree.add_trigger(self.id, name, TriggerKind::Port(PortKind::Input)))
    }

    /// Declare an output port
    pub fn output(&mut self, name: &str) -> OutputPort {
        OutputPort(self.tree.add_trigger(self.id, name, TriggerKind::Port(PortKind::Output)))
    }

    /// Declare a port that calls procedures of other reactors
    pub fn caller(&mut self, name: &str) -> CallerPort {
        CallerPort(self.tree.add_trigger(self.id, name, TriggerKind::Port(PortKind::Caller)))
    }

    /// Declare a port served by a procedure of this reactor
    pub fn callee(&mut self, name: &str) -> CalleePort {
        CalleePort(self.tree.add_trigger(self.id, name, TriggerKind::Port(PortKind::Callee)))
    }

    /// Declare an action
    pub fn action(&mut self, name: &str, origin: Origin, min_delay: Duration) -> Action {
        let spec = match origin {
            Origin::Logical => ActionSpec::logical(min_delay),
            Origin::Physical => ActionSpec::physical(min_delay),
        };
        self.action_with(name, spec)
    }

    /// Declare an action from a full spec
    pub fn action_with(&mut self, name: &str, spec: ActionSpec) -> Action {
        Action(self.tree.add_trigger(self.id, name, TriggerKind::Action(spec)))
    }

    /// Declare a timer; a zero period fires once
    pub fn timer(&mut self, name: &str, offset: Duration, period: Duration) -> Timer {
        Timer(self.tree.add_trigger(
            self.id,
            name,
            TriggerKind::Timer(TimerSpec { offset, period }),
        ))
    }

    /// Trigger present at the start of execution
    pub fn startup(&self) -> Startup {
        Startup(self.startup)
    }

    /// Trigger present at the end of execution
    pub fn shutdown(&self) -> Shutdown {
        Shutdown(self.shutdown)
    }

    /// Obtain the write capability for a port
    ///
    /// Granted for this reactor's outputs, callers and callees (to return
    /// results), and for the inputs of its children.
    pub fn writable(&self, port: &impl Port) -> Result<WritablePort> {
        let id = port.trigger_id();
        let trigger = self.tree.trigger(id)?;
        let own = trigger.owner == self.id;
        let child = self.tree.parent_of(trigger.owner) == Some(self.id);
        let allowed = match trigger.kind.port() {
            Some(PortKind::Output | PortKind::Caller | PortKind::Callee) => own,
            Some(PortKind::Input) => child,
            None => false,
        };
        if !allowed {
            return Err(Error::OutOfScope(format!(
                "{} cannot write {}",
                self.name(),
                self.tree.trigger_name(id)
            )));
        }
        Ok(WritablePort { port: id, key: self.key })
    }

    /// Obtain the schedule capability for one of this reactor's actions
    pub fn schedulable(&self, action: &Action) -> Result<SchedulableAction> {
        let trigger = self.tree.trigger(action.0)?;
        if trigger.owner != self.id {
            return Err(Error::OutOfScope(format!(
                "{} cannot schedule {}",
                self.name(),
                self.tree.trigger_name(action.0)
            )));
        }
        Ok(SchedulableAction {
            action: action.0,
            key: self.key,
        })
    }

    /// Declare a child reactor
    pub fn child<T>(
        &mut self,
        name: &str,
        build: impl FnOnce(&mut ReactorBuilder<'_>) -> Result<T>,
    ) -> Result<T> {
        let id = self.tree.create_reactor(Some(self.id), name);
        let mut child = ReactorBuilder::new(&mut *self.tree, id)?;
        build(&mut child)
    }

    /// Check whether this reactor may connect `src` to `dst`
    pub fn can_connect(&self, src: &impl Port, dst: &impl Port) -> Result<()> {
        let (src, dst) = (src.trigger_id(), dst.trigger_id());
        self.tree
            .can_connect(self.id, src, dst, false, &PendingEdits::default())
            .map_err(|reason| self.tree.connection_error(src, dst, reason))
    }

    /// Connect two ports visible from this reactor
    pub fn connect(&mut self, src: &impl Port, dst: &impl Port) -> Result<()> {
        self.can_connect(src, dst)?;
        self.tree.connect(self.id, src.trigger_id(), dst.trigger_id())
    }

    /// Start declaring a reaction
    pub fn reaction(&mut self) -> ReactionBuilder<'_> {
        ReactionBuilder::new(&mut *self.tree, self.id, self.key)
    }

    /// Start declaring a mutation
    pub fn mutation(&mut self) -> MutationBuilder<'_> {
        ReactionBuilder::<ForMutation>::new(&mut *self.tree, self.id, self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> Tree {
        Tree::new("app")
    }

    fn builder(tree: &mut Tree) -> ReactorBuilder<'_> {
        let root = tree.root();
        ReactorBuilder::new(tree, root).expect("root exists")
    }

    /// A reactor forwarding `in` to `out` through one reaction
    fn passthrough(b: &mut ReactorBuilder<'_>, name: &str) -> Result<(InputPort, OutputPort)> {
        b.child(name, |c| {
            let input = c.input("in");
            let out = c.output("out");
            let w = c.writable(&out)?;
            c.reaction().trigger(&input).effect(&w).body(|_| Ok(()))?;
            Ok((input, out))
        })
    }

    #[test]
    fn test_fully_qualified_names() {
        let mut tree = tree();
        let mut root = builder(&mut tree);
        let port = root
            .child("outer", |o| o.child("inner", |i| Ok(i.output("out"))))
            .unwrap();
        assert_eq!(tree.trigger_name(port.id()), "app.outer.inner.out");
    }

    #[test]
    fn test_sibling_connection_is_legal() {
        let mut tree = tree();
        let mut root = builder(&mut tree);
        let (_, a_out) = passthrough(&mut root, "a").unwrap();
        let (b_in, _) = passthrough(&mut root, "b").unwrap();
        root.connect(&a_out, &b_in).unwrap();
        assert_eq!(tree.trigger(b_in.id()).unwrap().source, Some(a_out.id()));
    }

    #[test]
    fn test_fan_in_is_rejected_without_mutation() {
        let mut tree = tree();
        let mut root = builder(&mut tree);
        let (_, a_out) = passthrough(&mut root, "a").unwrap();
        let (_, b_out) = passthrough(&mut root, "b").unwrap();
        let (c_in, _) = passthrough(&mut root, "c").unwrap();
        root.connect(&a_out, &c_in).unwrap();
        let err = root.connect(&b_out, &c_in).unwrap_err();
        assert_eq!(err.rejection(), Some(ConnectionRejection::AlreadyConnected));
        assert_eq!(tree.trigger(c_in.id()).unwrap().source, Some(a_out.id()));
        assert!(tree.trigger(b_out.id()).unwrap().receivers.is_empty());
    }

    #[test]
    fn test_self_loop_and_input_to_output() {
        let mut tree = tree();
        let mut root = builder(&mut tree);
        let (a_in, a_out) = passthrough(&mut root, "a").unwrap();
        assert_eq!(
            root.connect(&a_in, &a_in).unwrap_err().rejection(),
            Some(ConnectionRejection::SelfLoop)
        );
        // a.out is also written by a reaction; the direction rule is reported
        assert_eq!(
            root.connect(&a_in, &a_out).unwrap_err().rejection(),
            Some(ConnectionRejection::InputToOutput)
        );
    }

    #[test]
    fn test_crossing_two_levels_is_rejected() {
        let mut tree = tree();
        let mut root = builder(&mut tree);
        let deep_out = root
            .child("outer", |o| o.child("inner", |i| Ok(i.output("out"))))
            .unwrap();
        let (b_in, _) = passthrough(&mut root, "b").unwrap();
        let err = root.connect(&deep_out, &b_in).unwrap_err();
        assert_eq!(err.rejection(), Some(ConnectionRejection::OutOfScope));
        assert!(tree.reactor(tree.root()).unwrap().connections.is_empty());
    }

    #[test]
    fn test_hierarchical_connections() {
        let mut tree = tree();
        let mut root = builder(&mut tree);
        root.child("outer", |o| {
            let input = o.input("in");
            let out = o.output("out");
            let (inner_in, inner_out) = passthrough(o, "inner")?;
            // input to input, one level inward
            o.connect(&input, &inner_in)?;
            // output to output, one level outward
            o.connect(&inner_out, &out)?;
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_port_written_by_reaction_cannot_be_connected() {
        let mut tree = tree();
        let mut root = builder(&mut tree);
        let (_, a_out) = passthrough(&mut root, "a").unwrap();
        let (b_in, _) = passthrough(&mut root, "b").unwrap();
        let w = root.writable(&b_in).unwrap();
        root.reaction().effect(&w).body(|_| Ok(())).unwrap();
        assert_eq!(
            root.connect(&a_out, &b_in).unwrap_err().rejection(),
            Some(ConnectionRejection::WrittenByReaction)
        );
    }

    #[test]
    fn test_caller_must_meet_callee() {
        let mut tree = tree();
        let mut root = builder(&mut tree);
        let caller = root.child("client", |c| Ok(c.caller("call"))).unwrap();
        let (b_in, _) = passthrough(&mut root, "b").unwrap();
        let callee = root.child("server", |s| Ok(s.callee("serve"))).unwrap();
        assert_eq!(
            root.connect(&caller, &b_in).unwrap_err().rejection(),
            Some(ConnectionRejection::CallerCalleeMismatch)
        );
        root.connect(&caller, &callee).unwrap();
        // The call link does not set a source on the callee
        assert_eq!(tree.trigger(callee.id()).unwrap().source, None);
    }

    #[test]
    fn test_procedure_rules() {
        let mut tree = tree();
        let mut root = builder(&mut tree);
        let err = root
            .child("server", |s| {
                let serve = s.callee("serve");
                let other = s.input("other");
                s.reaction().trigger(&serve).trigger(&other).body(|_| Ok(()))?;
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(err, Error::ProcedureTriggers(_)));

        let err = root
            .child("server2", |s| {
                let serve = s.callee("serve");
                s.reaction().trigger(&serve).body(|_| Ok(()))?;
                s.reaction().trigger(&serve).body(|_| Ok(()))?;
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(err, Error::MultipleProcedures(_)));
    }

    #[test]
    fn test_scope_of_reads_and_writes() {
        let mut tree = tree();
        let mut root = builder(&mut tree);
        let (a_in, a_out) = passthrough(&mut root, "a").unwrap();
        // A container cannot react to a child's input or write a child's output
        let err = root.reaction().trigger(&a_in).body(|_| Ok(())).unwrap_err();
        assert!(matches!(err, Error::OutOfScope(_)));
        assert!(matches!(root.writable(&a_out), Err(Error::OutOfScope(_))));
        // but may react to the child's output
        root.reaction().trigger(&a_out).body(|_| Ok(())).unwrap();
    }

    #[test]
    fn test_foreign_capability_is_refused() {
        let mut tree = tree();
        let mut root = builder(&mut tree);
        let foreign = root
            .child("a", |a| {
                let out = a.output("out");
                a.writable(&out)
            })
            .unwrap();
        let err = root.reaction().effect(&foreign).body(|_| Ok(())).unwrap_err();
        assert!(matches!(err, Error::AccessDenied(_)));
    }

    #[test]
    fn test_declaration_order_defines_priorities() {
        let mut tree = tree();
        let mut root = builder(&mut tree);
        let start = root.startup();
        let r0 = root.reaction().trigger(&start).body(|_| Ok(())).unwrap();
        let r1 = root.reaction().trigger(&start).body(|_| Ok(())).unwrap();
        let m0 = root.mutation().trigger(&start).body(|_| Ok(())).unwrap();
        tree.assign_priorities(100).unwrap();
        let p = |id| tree.reaction(id).unwrap().priority;
        // Mutations precede reactions of the same reactor
        assert!(p(m0) < p(r0));
        assert!(p(r0) < p(r1));
    }

    #[test]
    fn test_port_chain_orders_reactions_across_reactors() {
        let mut tree = tree();
        let mut root = builder(&mut tree);
        let (b_in, b_out) = passthrough(&mut root, "b").unwrap();
        let (a_in, a_out) = passthrough(&mut root, "a").unwrap();
        root.connect(&a_out, &b_in).unwrap();
        let _ = (a_in, b_out);
        tree.assign_priorities(100).unwrap();
        let reaction_of = |name: &str| {
            tree.reactions
                .values()
                .find(|r| r.name.starts_with(name))
                .map(|r| r.priority)
                .unwrap()
        };
        // b was declared first, but reads what a writes
        assert!(reaction_of("app.a[") < reaction_of("app.b["));
    }

    #[test]
    fn test_oversized_spacing_is_refused() {
        let mut tree = tree();
        let mut root = builder(&mut tree);
        let (b_in, b_out) = passthrough(&mut root, "b").unwrap();
        let (a_in, a_out) = passthrough(&mut root, "a").unwrap();
        let (c_in, c_out) = passthrough(&mut root, "c").unwrap();
        root.connect(&a_out, &b_in).unwrap();
        root.connect(&b_out, &c_in).unwrap();
        let _ = (a_in, c_out);

        let err = tree.assign_priorities(u64::MAX / 2 + 1).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.is_configuration());
        // A failed assignment leaves every reaction unassigned
        assert!(tree.reactions.values().all(|r| r.priority == u64::MAX));

        tree.assign_priorities(u64::MAX / 4).unwrap();
        let mut priorities: Vec<u64> = tree.reactions.values().map(|r| r.priority).collect();
        priorities.sort_unstable();
        priorities.dedup();
        assert_eq!(priorities.len(), 3);
    }

    #[test]
    fn test_zero_delay_cycle_is_detected() {
        let mut tree = tree();
        let mut root = builder(&mut tree);
        let (a_in, a_out) = passthrough(&mut root, "a").unwrap();
        let (b_in, b_out) = passthrough(&mut root, "b").unwrap();
        root.connect(&a_out, &b_in).unwrap();
        root.connect(&b_out, &a_in).unwrap();
        assert!(matches!(tree.assign_priorities(100), Err(Error::CycleDetected)));
    }

    #[test]
    fn test_causality_interface() {
        let mut tree = tree();
        let mut root = builder(&mut tree);
        let (a_in, a_out) = passthrough(&mut root, "a").unwrap();
        let silent = root
            .child("s", |s| {
                let input = s.input("in");
                let out = s.output("out");
                s.reaction().trigger(&input).body(|_| Ok(()))?;
                Ok((input, out))
            })
            .unwrap();
        let a = tree.trigger(a_in.id()).unwrap().owner;
        let s = tree.trigger(silent.0.id()).unwrap().owner;
        let pairs = tree.causality_interface(a);
        assert_eq!(pairs.len(), 1);
        assert!(pairs.contains(&(a_in.id(), a_out.id())));
        assert!(tree.causality_interface(s).is_empty());
    }

    #[test]
    fn test_runtime_connection_rejects_feedback() {
        let mut tree = tree();
        let mut root = builder(&mut tree);
        let (a_in, a_out) = passthrough(&mut root, "a").unwrap();
        let root_id = tree.root();
        assert_eq!(
            tree.can_connect(root_id, a_out.id(), a_in.id(), true, &PendingEdits::default()),
            Err(ConnectionRejection::Cycle)
        );
        // Allowed while building: the cycle is only caught by the global sort
        assert_eq!(tree.can_connect(root_id, a_out.id(), a_in.id(), false, &PendingEdits::default()), Ok(()));
    }

    #[test]
    fn test_runtime_connection_rejects_new_feedthrough() {
        let mut tree = tree();
        let mut root = builder(&mut tree);
        let (outer_in, outer_out, inner_in, inner_out) = root
            .child("outer", |o| {
                let input = o.input("in");
                let out = o.output("out");
                let (inner_in, inner_out) = passthrough(o, "inner")?;
                o.connect(&inner_out, &out)?;
                Ok((input, out, inner_in, inner_out))
            })
            .unwrap();
        let outer = tree.trigger(outer_in.id()).unwrap().owner;
        assert!(tree.causality_interface(outer).is_empty());
        // Wiring the outer input into the inner passthrough would make
        // outer.out depend on outer.in within the same tag
        assert_eq!(
            tree.can_connect(outer, outer_in.id(), inner_in.id(), true, &PendingEdits::default()),
            Err(ConnectionRejection::ZeroDelayFeedback)
        );
        let _ = (outer_out, inner_out);
    }

    #[test]
    fn test_pending_connections_count_as_fan_in() {
        let mut tree = tree();
        let mut root = builder(&mut tree);
        let (_, a_out) = passthrough(&mut root, "a").unwrap();
        let (_, b_out) = passthrough(&mut root, "b").unwrap();
        let (c_in, _) = passthrough(&mut root, "c").unwrap();
        let root_id = tree.root();
        let mut pending = PendingEdits::default();
        pending.connects.push((a_out.id(), c_in.id()));
        assert_eq!(
            tree.can_connect(root_id, b_out.id(), c_in.id(), true, &pending),
            Err(ConnectionRejection::AlreadyConnected)
        );
    }

    #[test]
    fn test_pending_disconnect_frees_destination() {
        let mut tree = tree();
        let mut root = builder(&mut tree);
        let (_, a_out) = passthrough(&mut root, "a").unwrap();
        let (_, b_out) = passthrough(&mut root, "b").unwrap();
        let (c_in, _) = passthrough(&mut root, "c").unwrap();
        root.connect(&a_out, &c_in).unwrap();
        let root_id = tree.root();
        let mut pending = PendingEdits::default();
        assert_eq!(
            tree.can_connect(root_id, b_out.id(), c_in.id(), true, &pending),
            Err(ConnectionRejection::AlreadyConnected)
        );
        pending.disconnects.push((a_out.id(), c_in.id()));
        assert_eq!(tree.can_connect(root_id, b_out.id(), c_in.id(), true, &pending), Ok(()));
    }

    #[test]
    fn test_remove_reactor_cleans_up() {
        let mut tree = tree();
        let mut root = builder(&mut tree);
        let (a_in, a_out) = passthrough(&mut root, "a").unwrap();
        let (b_in, _) = passthrough(&mut root, "b").unwrap();
        root.connect(&a_out, &b_in).unwrap();
        let observer = root.reaction().trigger(&a_out).body(|_| Ok(())).unwrap();
        let a = tree.trigger(a_in.id()).unwrap().owner;

        let removed = tree.remove_reactor(a).unwrap();
        assert_eq!(removed.reactors, vec![a]);
        assert!(tree.trigger(a_out.id()).is_err());
        assert_eq!(tree.trigger(b_in.id()).unwrap().source, None);
        assert!(tree.reactor(tree.root()).unwrap().connections.is_empty());
        assert!(tree.reaction(observer).unwrap().triggers.is_empty());
        assert!(tree.remove_reactor(tree.root()).is_err());
        tree.assign_priorities(100).unwrap();
    }

    #[test]
    fn test_trigger_manager_is_gated() {
        let mut tree = tree();
        let mut root = builder(&mut tree);
        let (a_in, _) = passthrough(&mut root, "a").unwrap();
        let outsider = root.child("z", |z| Ok(z.id())).unwrap();
        let outsider_key = tree.reactor(outsider).unwrap().key;
        let root_key = tree.reactor(tree.root()).unwrap().key;
        assert!(tree.trigger_manager(a_in.id(), outsider_key).is_err());
        assert!(tree.trigger_manager(a_in.id(), root_key).is_ok());
    }
}
