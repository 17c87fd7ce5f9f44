//! Execution journal for determinism audits
//!
//! The journal records, in order:
//! - every tag the application processes
//! - every event applied at that tag
//! - every reaction executed, with its position within the tag
//!
//! Two runs of the same program with the same external inputs produce
//! identical journals, which makes the journal a convenient oracle in tests.
//!
//! # Example
//!
//! ```rust,ignore
//! let mut app = App::simulated(config, clock);
//! // ... declare reactors ...
//! app.run()?;
//! let order: Vec<_> = app.journal().reactions().map(|(_, name)| name).collect();
//! ```

use crate::{Tag, TriggerId};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// One recorded step of execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JournalEntry {
    /// Processing moved to a new tag
    TagBoundary { tag: Tag },
    /// An event was applied to its trigger
    Event {
        tag: Tag,
        trigger: TriggerId,
        /// Fully-qualified trigger name
        name: String,
    },
    /// A reaction was executed
    Reaction {
        tag: Tag,
        /// Fully-qualified reaction name
        name: String,
        /// Position among the reactions executed at `tag`
        seq: u64,
    },
}

impl JournalEntry {
    /// Tag the entry belongs to
    pub fn tag(&self) -> Tag {
        match self {
            JournalEntry::TagBoundary { tag }
            | JournalEntry::Event { tag, .. }
            | JournalEntry::Reaction { tag, .. } => *tag,
        }
    }
}

/// Journal settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalConfig {
    /// Record entries as they happen
    pub recording: bool,
    /// Keep only the most recent entries; `None` keeps everything
    pub capacity: Option<usize>,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            recording: true,
            capacity: None,
        }
    }
}

/// Ordered record of an application's execution
#[derive(Debug, Clone, Default)]
pub struct Journal {
    config: JournalConfig,
    entries: VecDeque<JournalEntry>,
    /// Tag of the last boundary and reactions executed at it so far
    cursor: Option<(Tag, u64)>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: JournalConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn start_recording(&mut self) {
        self.config.recording = true;
    }

    pub fn stop_recording(&mut self) {
        self.config.recording = false;
    }

    pub fn is_recording(&self) -> bool {
        self.config.recording
    }

    /// Record a tag boundary unless `tag` is already the current one
    pub fn record_tag(&mut self, tag: Tag) {
        if !self.config.recording || self.cursor.is_some_and(|(t, _)| t == tag) {
            return;
        }
        self.cursor = Some((tag, 0));
        self.push(JournalEntry::TagBoundary { tag });
    }

    /// Record an event being applied
    pub fn record_event(&mut self, tag: Tag, trigger: TriggerId, name: impl Into<String>) {
        if !self.config.recording {
            return;
        }
        self.record_tag(tag);
        self.push(JournalEntry::Event {
            tag,
            trigger,
            name: name.into(),
        });
    }

    /// Record a reaction being executed
    pub fn record_reaction(&mut self, tag: Tag, name: impl Into<String>) {
        if !self.config.recording {
            return;
        }
        self.record_tag(tag);
        let seq = match &mut self.cursor {
            Some((_, next)) => {
                *next += 1;
                *next - 1
            }
            None => 0,
        };
        self.push(JournalEntry::Reaction {
            tag,
            name: name.into(),
            seq,
        });
    }

    fn push(&mut self, entry: JournalEntry) {
        self.entries.push_back(entry);
        if let Some(capacity) = self.config.capacity {
            while self.entries.len() > capacity {
                self.entries.pop_front();
            }
        }
    }

    /// All retained entries, oldest first
    pub fn entries(&self) -> impl Iterator<Item = &JournalEntry> + '_ {
        self.entries.iter()
    }

    /// Entries at or after `tag`
    pub fn entries_since(&self, tag: Tag) -> impl Iterator<Item = &JournalEntry> + '_ {
        self.entries.iter().filter(move |e| e.tag() >= tag)
    }

    /// Executed reactions with the tag they ran at
    pub fn reactions(&self) -> impl Iterator<Item = (Tag, &str)> + '_ {
        self.entries.iter().filter_map(|e| match e {
            JournalEntry::Reaction { tag, name, .. } => Some((*tag, name.as_str())),
            _ => None,
        })
    }

    /// Processed tags in order
    pub fn tags(&self) -> impl Iterator<Item = Tag> + '_ {
        self.entries.iter().filter_map(|e| match e {
            JournalEntry::TagBoundary { tag } => Some(*tag),
            _ => None,
        })
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.cursor = None;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
