//! Triggers: ports, actions, timers, startup and shutdown
//!
//! The runtime stores every trigger as a `Trigger` record whose behavior is
//! selected by `TriggerKind`. Reactors only ever see handles:
//! - read handles (`InputPort`, `OutputPort`, `Action`, `Timer`, ...) are
//!   plain copies of the trigger ID and may be passed around freely
//! - capability handles (`WritablePort`, `SchedulableAction`) carry the
//!   `AccessKey` of the reactor that obtained them, and the runtime checks it
//!   on every write or schedule

use crate::{AccessKey, Error, ReactionId, ReactorId, Result, Tag, TriggerId, Value};
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Direction and role of a port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortKind {
    /// Receives values from outside the reactor
    Input,
    /// Sends values out of the reactor
    Output,
    /// Issues synchronous procedure calls
    Caller,
    /// Serves synchronous procedure calls
    Callee,
}

impl PortKind {
    /// Inputs and callees face into their reactor
    pub fn is_input_like(&self) -> bool {
        matches!(self, PortKind::Input | PortKind::Callee)
    }

    /// Outputs and callers face out of their reactor
    pub fn is_output_like(&self) -> bool {
        matches!(self, PortKind::Output | PortKind::Caller)
    }
}

/// Where an action's events come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Origin {
    /// Scheduled relative to the current logical time
    #[default]
    Logical,
    /// Scheduled relative to physical time (e.g. from I/O)
    Physical,
}

/// Static properties of an action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionSpec {
    /// Logical or physical
    pub origin: Origin,
    /// Delay added to every schedule call
    pub min_delay: Duration,
    /// Minimum spacing between events (recorded, not enforced)
    pub min_inter_arrival: Duration,
}

impl ActionSpec {
    /// A logical action with the given minimum delay
    pub fn logical(min_delay: Duration) -> Self {
        Self {
            origin: Origin::Logical,
            min_delay,
            min_inter_arrival: Duration::from_nanos(1),
        }
    }

    /// A physical action with the given minimum delay
    pub fn physical(min_delay: Duration) -> Self {
        Self {
            origin: Origin::Physical,
            ..Self::logical(min_delay)
        }
    }

    /// Set the minimum inter-arrival time
    pub fn with_min_inter_arrival(mut self, spacing: Duration) -> Self {
        self.min_inter_arrival = spacing;
        self
    }
}

/// Static properties of a timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerSpec {
    /// Delay of the first firing relative to the start of execution
    pub offset: Duration,
    /// Interval between firings; zero fires once
    pub period: Duration,
}

/// What kind of trigger a record is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerKind {
    Port(PortKind),
    Action(ActionSpec),
    Timer(TimerSpec),
    Startup,
    Shutdown,
}

impl TriggerKind {
    /// The port kind, if this is a port
    pub fn port(&self) -> Option<PortKind> {
        match self {
            TriggerKind::Port(kind) => Some(*kind),
            _ => None,
        }
    }

    /// Check if this is a port of any kind
    pub fn is_port(&self) -> bool {
        matches!(self, TriggerKind::Port(_))
    }

    /// Short name used in diagnostics
    pub fn label(&self) -> &'static str {
        match self {
            TriggerKind::Port(PortKind::Input) => "input",
            TriggerKind::Port(PortKind::Output) => "output",
            TriggerKind::Port(PortKind::Caller) => "caller",
            TriggerKind::Port(PortKind::Callee) => "callee",
            TriggerKind::Action(_) => "action",
            TriggerKind::Timer(_) => "timer",
            TriggerKind::Startup => "startup",
            TriggerKind::Shutdown => "shutdown",
        }
    }
}

/// Runtime record of a trigger
#[derive(Debug, Clone)]
pub struct Trigger {
    pub(crate) id: TriggerId,
    pub(crate) name: String,
    pub(crate) owner: ReactorId,
    pub(crate) kind: TriggerKind,
    /// Last value set, together with the tag it was set at
    pub(crate) value: Option<Value>,
    pub(crate) tag: Option<Tag>,
    /// Reactions that observe this trigger
    pub(crate) reactions: IndexSet<ReactionId>,
    /// Upstream port feeding this port
    pub(crate) source: Option<TriggerId>,
    /// Downstream ports (for a caller: the callee it is bound to)
    pub(crate) receivers: IndexSet<TriggerId>,
    /// Reactions that declared this port as an effect
    pub(crate) writers: IndexSet<ReactionId>,
    /// Return value of the last procedure call (callee ports only)
    pub(crate) returned: Option<Value>,
}

impl Trigger {
    pub(crate) fn new(
        id: TriggerId,
        name: impl Into<String>,
        owner: ReactorId,
        kind: TriggerKind,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            owner,
            kind,
            value: None,
            tag: None,
            reactions: IndexSet::new(),
            source: None,
            receivers: IndexSet::new(),
            writers: IndexSet::new(),
            returned: None,
        }
    }

    /// Trigger ID
    pub fn id(&self) -> TriggerId {
        self.id
    }

    /// Local name within the owning reactor
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Reactor that owns this trigger
    pub fn owner(&self) -> ReactorId {
        self.owner
    }

    /// Kind of trigger
    pub fn kind(&self) -> TriggerKind {
        self.kind
    }

    /// Present iff the value was set at the current tag
    pub fn is_present(&self, current: Tag) -> bool {
        self.tag == Some(current)
    }

    /// The value, if present at the current tag
    pub fn get(&self, current: Tag) -> Option<&Value> {
        if self.is_present(current) {
            self.value.as_ref()
        } else {
            None
        }
    }

    /// The value most recently set, present or not
    pub fn last_value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    pub(crate) fn update(&mut self, value: Value, tag: Tag) {
        self.value = Some(value);
        self.tag = Some(tag);
    }

    /// Reactions observing this trigger
    pub fn reactions(&self) -> impl Iterator<Item = ReactionId> + '_ {
        self.reactions.iter().copied()
    }
}

/// Manager capability for a trigger's observer set
///
/// Only handed out to the reactor owning the trigger or to its container
/// (which may react to a child's outputs).
pub struct TriggerManager<'a> {
    pub(crate) trigger: &'a mut Trigger,
}

impl TriggerManager<'_> {
    /// Subscribe a reaction to this trigger
    pub fn add_reaction(&mut self, reaction: ReactionId) {
        self.trigger.reactions.insert(reaction);
    }

    /// Unsubscribe a reaction; returns whether it was subscribed
    pub fn del_reaction(&mut self, reaction: ReactionId) -> bool {
        self.trigger.reactions.shift_remove(&reaction)
    }
}

/// Anything a reaction may observe
pub trait Readable {
    /// The trigger behind this handle
    fn trigger_id(&self) -> TriggerId;
}

/// Handles that can take part in a connection
pub trait Port: Readable {}

macro_rules! read_handle {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(pub(crate) TriggerId);

        impl $name {
            /// Trigger ID behind this handle
            pub fn id(&self) -> TriggerId {
                self.0
            }
        }

        impl Readable for $name {
            fn trigger_id(&self) -> TriggerId {
                self.0
            }
        }
    };
}

read_handle!(
    /// Input port of a reactor
    InputPort
);
read_handle!(
    /// Output port of a reactor
    OutputPort
);
read_handle!(
    /// Port issuing procedure calls
    CallerPort
);
read_handle!(
    /// Port serving procedure calls
    CalleePort
);
read_handle!(
    /// Self-scheduled event source
    Action
);
read_handle!(
    /// Periodic or one-shot event source
    Timer
);
read_handle!(
    /// Present once, at the start of execution
    Startup
);
read_handle!(
    /// Present once, at the end of execution
    Shutdown
);

impl Port for InputPort {}
impl Port for OutputPort {}
impl Port for CallerPort {}
impl Port for CalleePort {}

/// Write capability for a port
///
/// Obtained from `ReactorBuilder::writable` and only usable by reactions of
/// the same reactor that declared it as an effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WritablePort {
    pub(crate) port: TriggerId,
    pub(crate) key: AccessKey,
}

impl WritablePort {
    /// Port this capability writes to
    pub fn id(&self) -> TriggerId {
        self.port
    }
}

impl Readable for WritablePort {
    fn trigger_id(&self) -> TriggerId {
        self.port
    }
}

/// Schedule capability for an action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SchedulableAction {
    pub(crate) action: TriggerId,
    pub(crate) key: AccessKey,
}

impl SchedulableAction {
    /// Action this capability schedules
    pub fn id(&self) -> TriggerId {
        self.action
    }
}

impl Readable for SchedulableAction {
    fn trigger_id(&self) -> TriggerId {
        self.action
    }
}

/// Check that `trigger` is an action and return its spec
pub(crate) fn action_spec(trigger: &Trigger) -> Result<ActionSpec> {
    match trigger.kind {
        TriggerKind::Action(spec) => Ok(spec),
        other => Err(Error::AccessDenied(format!(
            "{} is a {}, not an action",
            trigger.name,
            other.label()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TimeValue;

    fn tag(micro: u64) -> Tag {
        Tag::new(TimeValue::from_secs(1), micro)
    }

    #[test]
    fn test_presence_is_tag_scoped() {
        let mut trigger = Trigger::new(
            TriggerId::new(1),
            "out",
            ReactorId::new(0),
            TriggerKind::Port(PortKind::Output),
        );
        assert!(!trigger.is_present(tag(0)));
        assert_eq!(trigger.get(tag(0)), None);

        trigger.update(Value::from(5i64), tag(0));
        assert!(trigger.is_present(tag(0)));
        assert_eq!(trigger.get(tag(0)), Some(&Value::Int(5)));

        // One microstep later the value is retained but absent
        assert!(!trigger.is_present(tag(1)));
        assert_eq!(trigger.get(tag(1)), None);
        assert_eq!(trigger.last_value(), Some(&Value::Int(5)));
    }

    #[test]
    fn test_manager_adds_and_removes_reactions() {
        let mut trigger = Trigger::new(
            TriggerId::new(1),
            "t",
            ReactorId::new(0),
            TriggerKind::Timer(TimerSpec {
                offset: Duration::ZERO,
                period: Duration::ZERO,
            }),
        );
        let mut manager = TriggerManager {
            trigger: &mut trigger,
        };
        manager.add_reaction(ReactionId::new(3));
        manager.add_reaction(ReactionId::new(3));
        assert!(manager.del_reaction(ReactionId::new(3)));
        assert!(!manager.del_reaction(ReactionId::new(3)));
        assert_eq!(trigger.reactions().count(), 0);
    }

    #[test]
    fn test_port_kind_direction() {
        assert!(PortKind::Input.is_input_like());
        assert!(PortKind::Callee.is_input_like());
        assert!(PortKind::Output.is_output_like());
        assert!(PortKind::Caller.is_output_like());
        assert_eq!(TriggerKind::Port(PortKind::Caller).label(), "caller");
    }

    #[test]
    fn test_action_spec_builders() {
        let spec = ActionSpec::physical(Duration::from_millis(5))
            .with_min_inter_arrival(Duration::from_millis(1));
        assert_eq!(spec.origin, Origin::Physical);
        assert_eq!(spec.min_delay, Duration::from_millis(5));
        assert_eq!(spec.min_inter_arrival, Duration::from_millis(1));
        assert_eq!(ActionSpec::logical(Duration::ZERO).origin, Origin::Logical);
    }
}
