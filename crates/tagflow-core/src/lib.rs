//! Tagflow Core - Deterministic reactor runtime with tagged logical time
//!
//! A program is a tree of reactors. Each reactor owns ports, actions and
//! timers, and reactions that fire when those triggers are present:
//!
//! ```text
//!                    ┌──────────────────── app ────────────────────┐
//!                    │                                             │
//!   timer ──> [R0] ──┼──> out ───> in ──> [R0] ──> out ───> in ──> │ [R0]
//!                    │   source             relay           sink   │
//!                    └─────────────────────────────────────────────┘
//! ```
//!
//! Time is a `Tag`: a physical-time value plus a microstep. Events are
//! processed in tag order; within a tag, reactions run in the order of the
//! priorities computed from the precedence graph, so every run of the same
//! program with the same inputs behaves identically.
//!
//! ## Key Components
//!
//! - `App` - lifecycle, event loop and external scheduling
//! - `ReactorBuilder` - declares ports, actions, timers, children and connections
//! - `ReactionCtx` / `MutationCtx` - what a running reaction may read and do
//! - `EventQueue` / `ReactionQueue` - the two queues driving execution
//! - `DependencyGraph` - precedence analysis and priority assignment
//! - `Alarm` / `Federation` - hooks for waiting and for distributed execution
//!
//! ## Example
//!
//! ```rust
//! use std::time::Duration;
//! use tagflow_core::{App, AppConfig, Outcome};
//!
//! let mut app = App::new(AppConfig::default().with_fast(true));
//! let mut root = app.root().unwrap();
//! let tick = root.timer("tick", Duration::ZERO, Duration::ZERO);
//! root.reaction()
//!     .trigger(&tick)
//!     .body(|ctx| {
//!         assert!(ctx.elapsed_logical_time().is_zero());
//!         Ok(())
//!     })
//!     .unwrap();
//! assert_eq!(app.run().unwrap(), Outcome::Success);
//! ```
//!
//! ## Journal Feature
//!
//! Enable the `journal` feature to record processed tags, applied events and
//! executed reactions:
//! ```toml
//! tagflow-core = { version = "0.1", features = ["journal"] }
//! ```

pub mod alarm;
mod cmd;
pub mod config;
mod context;
mod error;
pub mod federation;
pub mod graph;
mod identity;
mod queue;
mod reaction;
mod reactor;
pub mod runtime;
mod scheduler;
pub mod time;
mod trigger;
mod value;

#[cfg(feature = "journal")]
pub mod journal;

pub use alarm::{Alarm, SimulatedAlarm, ThreadAlarm, Wakeup};
pub use cmd::Cmd;
pub use config::{AppConfig, DEFAULT_SNOOZE};
pub use context::{MutationCtx, ReactionCtx};
pub use error::{ConnectionRejection, Error, Result};
pub use federation::{Federation, Standalone};
pub use graph::{DependencyGraph, PriorityError, DEFAULT_PRIORITY_SPACING};
pub use identity::{AccessKey, ReactionId, ReactorId, TriggerId};
pub use queue::{Event, EventQueue, ReactionQueue};
pub use reaction::{
    ForMutation, ForReaction, MutationBuilder, MutationFn, Reaction, ReactionBuilder,
    ReactionFn, ReactionKind,
};
pub use reactor::{Reactor, ReactorBuilder};
pub use runtime::{App, AppState, Outcome, Step, ROOT_NAME};
pub use time::{ManualClock, PhysicalClock, SystemClock, Tag, TimeValue};
pub use trigger::{
    Action, ActionSpec, CalleePort, CallerPort, InputPort, Origin, OutputPort, Port, PortKind,
    Readable, SchedulableAction, Shutdown, Startup, Timer, TimerSpec, Trigger, TriggerKind,
    TriggerManager, WritablePort,
};
pub use value::{Value, ValueMap};

#[cfg(feature = "journal")]
pub use journal::{Journal, JournalConfig, JournalEntry};
