//! Hooks for distributed execution
//!
//! A federated application may only advance to a tag once the coordinator
//! grants it, and exchanges messages with other federates through the
//! coordinator. The transport itself lives outside this crate; the runtime
//! only talks to the `Federation` trait.

use crate::{Error, Result, Tag};

/// Coordination with other federates
pub trait Federation {
    /// Check whether the application may process events at `tag`
    fn can_proceed(&mut self, tag: Tag) -> bool {
        let _ = tag;
        true
    }

    /// Send a message to a port of another federate
    fn send_message(&mut self, destination: u32, port: u32, payload: &[u8]) -> Result<()>;

    /// Send a message to be delivered at `tag` at the receiving federate
    fn send_timed_message(
        &mut self,
        destination: u32,
        port: u32,
        tag: Tag,
        payload: &[u8],
    ) -> Result<()>;
}

/// A single application with no peers
///
/// Every tag may be processed, and sending fails with `NotFederated`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Standalone;

impl Federation for Standalone {
    fn send_message(&mut self, _destination: u32, _port: u32, _payload: &[u8]) -> Result<()> {
        Err(Error::NotFederated)
    }

    fn send_timed_message(
        &mut self,
        _destination: u32,
        _port: u32,
        _tag: Tag,
        _payload: &[u8],
    ) -> Result<()> {
        Err(Error::NotFederated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TimeValue;

    #[test]
    fn test_standalone_always_proceeds() {
        let mut federation = Standalone;
        assert!(federation.can_proceed(Tag::new(TimeValue::from_secs(9), 3)));
    }

    #[test]
    fn test_standalone_cannot_send() {
        let mut federation = Standalone;
        assert!(matches!(
            federation.send_message(1, 2, b"hi"),
            Err(Error::NotFederated)
        ));
        assert!(matches!(
            federation.send_timed_message(1, 2, Tag::default(), b"hi"),
            Err(Error::NotFederated)
        ));
    }
}
