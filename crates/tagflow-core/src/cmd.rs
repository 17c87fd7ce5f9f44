//! Structural commands produced by mutations
//!
//! Mutations never rewire the reactor tree directly. Their context records
//! commands, and the runtime applies them as a batch once the mutation body
//! returns. A reactor created by a mutation is declared immediately; its
//! `Create` command only starts it.

use crate::{ReactorId, TriggerId};
use serde::{Deserialize, Serialize};

/// A topology change to be applied by the runtime
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Cmd {
    /// No operation
    None,

    /// Batch multiple commands
    Batch(Vec<Cmd>),

    /// Connect two ports (already checked for legality)
    Connect { src: TriggerId, dst: TriggerId },

    /// Remove an existing connection
    Disconnect { src: TriggerId, dst: TriggerId },

    /// Start a reactor declared by the mutation
    Create(ReactorId),

    /// Delete a reactor and everything it contains at the end of the step
    Delete(ReactorId),
}

impl Cmd {
    /// Create an empty command
    pub fn none() -> Self {
        Cmd::None
    }

    /// Create a batch of commands
    pub fn batch(cmds: Vec<Cmd>) -> Self {
        // Flatten nested batches and filter out None
        let mut flattened: Vec<Cmd> = cmds
            .into_iter()
            .flat_map(|cmd| match cmd {
                Cmd::None => vec![],
                Cmd::Batch(inner) => inner,
                other => vec![other],
            })
            .collect();

        match flattened.len() {
            0 => Cmd::None,
            1 => flattened.pop().unwrap_or(Cmd::None),
            _ => Cmd::Batch(flattened),
        }
    }

    /// Create a connect command
    pub fn connect(src: TriggerId, dst: TriggerId) -> Self {
        Cmd::Connect { src, dst }
    }

    /// Create a disconnect command
    pub fn disconnect(src: TriggerId, dst: TriggerId) -> Self {
        Cmd::Disconnect { src, dst }
    }

    /// Create a command starting a freshly declared reactor
    pub fn create(reactor: ReactorId) -> Self {
        Cmd::Create(reactor)
    }

    /// Create a delete command
    pub fn delete(reactor: ReactorId) -> Self {
        Cmd::Delete(reactor)
    }

    /// Check if this is a None command
    pub fn is_none(&self) -> bool {
        matches!(self, Cmd::None)
    }

    /// The commands in application order
    pub fn into_vec(self) -> Vec<Cmd> {
        match self {
            Cmd::None => vec![],
            Cmd::Batch(cmds) => cmds,
            other => vec![other],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cmd_batch() {
        let cmd = Cmd::batch(vec![
            Cmd::None,
            Cmd::delete(ReactorId::new(3)),
            Cmd::None,
        ]);

        // Should flatten to single command
        assert_eq!(cmd, Cmd::Delete(ReactorId::new(3)));
    }

    #[test]
    fn test_cmd_batch_nested() {
        let cmd = Cmd::batch(vec![
            Cmd::batch(vec![
                Cmd::connect(TriggerId::new(1), TriggerId::new(2)),
                Cmd::disconnect(TriggerId::new(3), TriggerId::new(4)),
            ]),
            Cmd::create(ReactorId::new(6)),
            Cmd::delete(ReactorId::new(5)),
        ]);

        if let Cmd::Batch(cmds) = &cmd {
            assert_eq!(cmds.len(), 4);
            assert_eq!(cmds[2], Cmd::Create(ReactorId::new(6)));
        } else {
            panic!("Expected Batch");
        }
        assert_eq!(cmd.into_vec().len(), 4);
    }

    #[test]
    fn test_cmd_batch_empty() {
        assert!(Cmd::batch(vec![Cmd::None, Cmd::Batch(vec![])]).is_none());
        assert!(Cmd::none().into_vec().is_empty());
    }
}
