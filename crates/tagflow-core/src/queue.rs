//! Event and reaction queues
//!
//! - `EventQueue` orders tagged events by tag and keeps at most one event per
//!   `(trigger, tag)`; pushing a duplicate overwrites the queued value.
//! - `ReactionQueue` orders staged reactions by priority and stages each
//!   reaction at most once.

use crate::{ReactionId, Tag, TriggerId, Value};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A value destined for a trigger at a given tag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// The trigger this event updates
    pub trigger: TriggerId,
    /// When the event is due
    pub tag: Tag,
    /// Payload
    pub value: Value,
}

impl Event {
    /// Create a new event
    pub fn new(trigger: TriggerId, tag: Tag, value: impl Into<Value>) -> Self {
        Self {
            trigger,
            tag,
            value: value.into(),
        }
    }
}

/// Tag-ordered queue of pending events
///
/// Events sharing a tag are popped in the order their triggers were first
/// pushed at that tag.
#[derive(Debug, Clone, Default)]
pub struct EventQueue {
    by_tag: BTreeMap<Tag, IndexMap<TriggerId, Value>>,
    len: usize,
}

impl EventQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an event
    ///
    /// Returns `true` if the event was new, `false` if it replaced the value
    /// of an event already queued for the same trigger and tag.
    pub fn push(&mut self, event: Event) -> bool {
        let slot = self.by_tag.entry(event.tag).or_default();
        let fresh = slot.insert(event.trigger, event.value).is_none();
        if fresh {
            self.len += 1;
        }
        fresh
    }

    /// Tag of the earliest event
    pub fn peek_tag(&self) -> Option<Tag> {
        self.by_tag.keys().next().copied()
    }

    /// Earliest event, without removing it
    pub fn peek(&self) -> Option<Event> {
        let (tag, slot) = self.by_tag.iter().next()?;
        let (trigger, value) = slot.first()?;
        Some(Event {
            trigger: *trigger,
            tag: *tag,
            value: value.clone(),
        })
    }

    /// Remove and return the earliest event
    pub fn pop(&mut self) -> Option<Event> {
        let mut entry = self.by_tag.first_entry()?;
        let tag = *entry.key();
        let (trigger, value) = entry.get_mut().shift_remove_index(0)?;
        if entry.get().is_empty() {
            entry.remove();
        }
        self.len -= 1;
        Some(Event { trigger, tag, value })
    }

    /// Remove every event whose trigger fails `keep`
    pub fn retain_triggers(&mut self, mut keep: impl FnMut(TriggerId) -> bool) {
        let mut removed = 0;
        self.by_tag.retain(|_, slot| {
            let before = slot.len();
            slot.retain(|trigger, _| keep(*trigger));
            removed += before - slot.len();
            !slot.is_empty()
        });
        self.len -= removed;
    }

    /// Check if an event is queued for `trigger` at `tag`
    pub fn contains(&self, trigger: TriggerId, tag: Tag) -> bool {
        self.by_tag
            .get(&tag)
            .is_some_and(|slot| slot.contains_key(&trigger))
    }

    /// Number of queued events
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if no events are queued
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Drop all events
    pub fn clear(&mut self) {
        self.by_tag.clear();
        self.len = 0;
    }
}

/// Priority-ordered set of staged reactions
#[derive(Debug, Clone, Default)]
pub struct ReactionQueue {
    staged: BTreeSet<(u64, ReactionId)>,
    /// Priority each staged reaction was queued with
    index: IndexMap<ReactionId, u64>,
}

impl ReactionQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage a reaction; returns `false` if it was already staged
    pub fn push(&mut self, priority: u64, reaction: ReactionId) -> bool {
        if self.index.contains_key(&reaction) {
            return false;
        }
        self.index.insert(reaction, priority);
        self.staged.insert((priority, reaction))
    }

    /// Remove and return the staged reaction with the lowest priority value
    pub fn pop(&mut self) -> Option<ReactionId> {
        let (_, reaction) = self.staged.pop_first()?;
        self.index.swap_remove(&reaction);
        Some(reaction)
    }

    /// Check if a reaction is staged
    pub fn contains(&self, reaction: ReactionId) -> bool {
        self.index.contains_key(&reaction)
    }

    /// Unstage a reaction
    pub fn remove(&mut self, reaction: ReactionId) {
        if let Some(priority) = self.index.swap_remove(&reaction) {
            self.staged.remove(&(priority, reaction));
        }
    }

    /// Re-key every staged reaction after priorities were reassigned
    ///
    /// Reactions for which `priority` returns `None` are unstaged.
    pub fn reprioritize(&mut self, mut priority: impl FnMut(ReactionId) -> Option<u64>) {
        let staged: Vec<ReactionId> = self.index.keys().copied().collect();
        self.clear();
        for reaction in staged {
            if let Some(p) = priority(reaction) {
                self.push(p, reaction);
            }
        }
    }

    /// Number of staged reactions
    pub fn len(&self) -> usize {
        self.staged.len()
    }

    /// Check if nothing is staged
    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }

    /// Drop all staged reactions
    pub fn clear(&mut self) {
        self.staged.clear();
        self.index.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TimeValue;
    use proptest::prelude::*;

    fn tag(secs: u64, microstep: u64) -> Tag {
        Tag::new(TimeValue::from_secs(secs), microstep)
    }

    #[test]
    fn test_events_pop_in_tag_order() {
        let mut queue = EventQueue::new();
        queue.push(Event::new(TriggerId::new(1), tag(2, 0), 1i64));
        queue.push(Event::new(TriggerId::new(2), tag(1, 1), 2i64));
        queue.push(Event::new(TriggerId::new(3), tag(1, 0), 3i64));

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.peek_tag(), Some(tag(1, 0)));
        assert_eq!(queue.pop().map(|e| e.trigger), Some(TriggerId::new(3)));
        assert_eq!(queue.pop().map(|e| e.trigger), Some(TriggerId::new(2)));
        assert_eq!(queue.pop().map(|e| e.trigger), Some(TriggerId::new(1)));
        assert!(queue.pop().is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_duplicate_event_overwrites_value() {
        let mut queue = EventQueue::new();
        assert!(queue.push(Event::new(TriggerId::new(1), tag(1, 1), "goodbye")));
        assert!(!queue.push(Event::new(TriggerId::new(1), tag(1, 1), "hello")));
        assert_eq!(queue.len(), 1);
        let event = queue.pop().expect("one event");
        assert_eq!(event.value, Value::from("hello"));
    }

    #[test]
    fn test_same_trigger_different_tags_are_kept() {
        let mut queue = EventQueue::new();
        queue.push(Event::new(TriggerId::new(1), tag(1, 0), 1i64));
        queue.push(Event::new(TriggerId::new(1), tag(1, 1), 2i64));
        assert_eq!(queue.len(), 2);
        assert!(queue.contains(TriggerId::new(1), tag(1, 1)));
    }

    #[test]
    fn test_same_tag_pops_in_insertion_order() {
        let mut queue = EventQueue::new();
        for id in [5u64, 2, 9] {
            queue.push(Event::new(TriggerId::new(id), tag(1, 0), Value::Unit));
        }
        let order: Vec<u64> = std::iter::from_fn(|| queue.pop())
            .map(|e| e.trigger.raw())
            .collect();
        assert_eq!(order, vec![5, 2, 9]);
    }

    #[test]
    fn test_retain_triggers() {
        let mut queue = EventQueue::new();
        queue.push(Event::new(TriggerId::new(1), tag(1, 0), Value::Unit));
        queue.push(Event::new(TriggerId::new(2), tag(1, 0), Value::Unit));
        queue.push(Event::new(TriggerId::new(2), tag(3, 0), Value::Unit));
        queue.retain_triggers(|t| t != TriggerId::new(2));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.peek().map(|e| e.trigger), Some(TriggerId::new(1)));
    }

    #[test]
    fn test_reaction_queue_orders_and_dedups() {
        let mut queue = ReactionQueue::new();
        assert!(queue.push(200, ReactionId::new(2)));
        assert!(queue.push(0, ReactionId::new(7)));
        assert!(!queue.push(200, ReactionId::new(2)));
        assert_eq!(queue.len(), 2);
        assert!(queue.contains(ReactionId::new(2)));
        assert_eq!(queue.pop(), Some(ReactionId::new(7)));
        assert_eq!(queue.pop(), Some(ReactionId::new(2)));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn test_reaction_queue_stages_once_per_reaction() {
        let mut queue = ReactionQueue::new();
        assert!(queue.push(300, ReactionId::new(4)));
        // A stale priority for the same reaction does not stage it twice
        assert!(!queue.push(100, ReactionId::new(4)));
        assert_eq!(queue.len(), 1);

        queue.push(200, ReactionId::new(5));
        queue.remove(ReactionId::new(4));
        assert!(!queue.contains(ReactionId::new(4)));
        queue.remove(ReactionId::new(4));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pop(), Some(ReactionId::new(5)));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_reprioritize_reorders_staged_reactions() {
        let mut queue = ReactionQueue::new();
        queue.push(0, ReactionId::new(1));
        queue.push(100, ReactionId::new(2));
        queue.push(200, ReactionId::new(3));
        queue.reprioritize(|r| match r.raw() {
            1 => Some(200),
            2 => None,
            _ => Some(0),
        });
        assert_eq!(queue.len(), 2);
        assert!(!queue.contains(ReactionId::new(2)));
        assert_eq!(queue.pop(), Some(ReactionId::new(3)));
        assert_eq!(queue.pop(), Some(ReactionId::new(1)));
    }

    proptest! {
        #[test]
        fn prop_events_pop_sorted(entries in prop::collection::vec((0u64..5, 0u64..3, 0u64..4), 1..50)) {
            let mut queue = EventQueue::new();
            for (secs, micro, trigger) in &entries {
                queue.push(Event::new(TriggerId::new(*trigger), tag(*secs, *micro), Value::Unit));
            }
            let mut last: Option<Tag> = None;
            let mut popped = 0;
            while let Some(event) = queue.pop() {
                if let Some(prev) = last {
                    prop_assert!(prev <= event.tag);
                }
                last = Some(event.tag);
                popped += 1;
            }
            let distinct: std::collections::HashSet<_> = entries
                .iter()
                .map(|(s, m, t)| (*s, *m, *t))
                .collect();
            prop_assert_eq!(popped, distinct.len());
        }
    }
}
