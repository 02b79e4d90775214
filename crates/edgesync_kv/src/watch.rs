//! Watch streams.

use crate::backend::KvRecord;
use crate::error::{KvError, KvResult};
use crate::types::Revision;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::Duration;

/// Type of a live watch event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Key was created or overwritten.
    Put,
    /// Key was deleted. The event carries no value.
    Delete,
}

/// A single committed change delivered by a watch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    /// Type of change.
    pub kind: EventKind,
    /// Full key.
    pub key: String,
    /// New value. Empty for deletes.
    pub value: Vec<u8>,
    /// Revision of the commit.
    pub revision: Revision,
    /// True if later events of the same commit follow this one.
    ///
    /// A multi-key commit is delivered as consecutive events sharing one
    /// revision. Only the last of them has `more_events` unset.
    pub more_events: bool,
}

impl WatchEvent {
    /// Creates a put event.
    pub fn put(key: impl Into<String>, value: Vec<u8>, revision: Revision) -> Self {
        Self {
            kind: EventKind::Put,
            key: key.into(),
            value,
            revision,
            more_events: false,
        }
    }

    /// Creates a delete event.
    pub fn delete(key: impl Into<String>, revision: Revision) -> Self {
        Self {
            kind: EventKind::Delete,
            key: key.into(),
            value: Vec::new(),
            revision,
            more_events: false,
        }
    }

    /// Sets whether later events of the same commit follow.
    #[must_use]
    pub fn with_more_events(mut self, more_events: bool) -> Self {
        self.more_events = more_events;
        self
    }
}

/// The subscriber side of a prefix watch.
///
/// A stream starts with the snapshot of every record under the prefix as of
/// [`WatchStream::snapshot_revision`], then yields every later change in
/// commit order. The snapshot and the subscription are taken atomically, so
/// there is neither a gap nor an overlap between them.
#[derive(Debug)]
pub struct WatchStream {
    snapshot: Vec<KvRecord>,
    snapshot_revision: Revision,
    events: Receiver<WatchEvent>,
}

impl WatchStream {
    /// Creates a stream from its parts.
    pub fn new(
        snapshot: Vec<KvRecord>,
        snapshot_revision: Revision,
        events: Receiver<WatchEvent>,
    ) -> Self {
        Self {
            snapshot,
            snapshot_revision,
            events,
        }
    }

    /// Returns the revision the snapshot is consistent with.
    #[must_use]
    pub fn snapshot_revision(&self) -> Revision {
        self.snapshot_revision
    }

    /// Takes the snapshot records, leaving the stream with live events only.
    pub fn take_snapshot(&mut self) -> Vec<KvRecord> {
        std::mem::take(&mut self.snapshot)
    }

    /// Waits up to `timeout` for the next live event.
    ///
    /// Returns `Ok(None)` if no event arrived in time.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` once the backend has dropped the subscription.
    pub fn recv_timeout(&self, timeout: Duration) -> KvResult<Option<WatchEvent>> {
        match self.events.recv_timeout(timeout) {
            Ok(event) => Ok(Some(event)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                Err(KvError::unavailable("watch stream closed by backend"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn stream_yields_snapshot_then_events() {
        let (tx, rx) = mpsc::channel();
        let record = KvRecord {
            key: "App/a".into(),
            value: vec![1],
            mod_revision: Revision::new(3),
        };
        let mut stream = WatchStream::new(vec![record.clone()], Revision::new(4), rx);

        assert_eq!(stream.snapshot_revision(), Revision::new(4));
        assert_eq!(stream.take_snapshot(), vec![record]);
        assert!(stream.take_snapshot().is_empty());

        tx.send(WatchEvent::delete("App/a", Revision::new(5))).unwrap();
        let event = stream
            .recv_timeout(Duration::from_millis(100))
            .unwrap()
            .unwrap();
        assert_eq!(event.kind, EventKind::Delete);
        assert!(event.value.is_empty());
    }

    #[test]
    fn stream_timeout_and_disconnect() {
        let (tx, rx) = mpsc::channel::<WatchEvent>();
        let stream = WatchStream::new(Vec::new(), Revision::ZERO, rx);

        assert_eq!(stream.recv_timeout(Duration::from_millis(5)).unwrap(), None);

        drop(tx);
        let result = stream.recv_timeout(Duration::from_millis(5));
        assert!(matches!(result, Err(KvError::Unavailable { .. })));
    }
}
