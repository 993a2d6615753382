//! Core aggregate and domain event traits.

use event_store::Version;
use serde::{Serialize, de::DeserializeOwned};

/// Trait for domain events.
///
/// Domain events represent facts that have happened in the domain.
/// They are immutable and should be named in past tense.
pub trait DomainEvent: Serialize + DeserializeOwned + Send + Sync + Clone {
    /// Returns the event type name stored alongside the payload.
    fn event_type(&self) -> &'static str;
}

/// An event-sourced consistency boundary.
///
/// An aggregate owns exactly one stream in the journal. Its state is rebuilt
/// by replaying that stream, commands against it produce new events, and
/// those events are appended with the version the command was decided on.
pub trait Aggregate: Default + Send + Sync + Sized {
    /// The type of events this aggregate produces and consumes.
    type Event: DomainEvent;

    /// The type of errors its commands can produce.
    type Error: std::error::Error + Send + Sync;

    /// Returns the aggregate type name, stored with every event.
    fn aggregate_type() -> &'static str;

    /// Returns true once the stream holds at least the creation event.
    fn exists(&self) -> bool;

    /// Returns the version of the last applied event.
    fn version(&self) -> Version;

    /// Sets the aggregate version.
    ///
    /// Called by the command handler after loading events.
    fn set_version(&mut self, version: Version);

    /// Applies an event to the aggregate, updating its state.
    ///
    /// Must be pure and must not fail: events are facts that already happened.
    fn apply(&mut self, event: Self::Event);

    /// Applies multiple events in sequence.
    fn apply_events(&mut self, events: impl IntoIterator<Item = Self::Event>) {
        for event in events {
            self.apply(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    enum TallyEvent {
        Opened,
        Counted { by: u32 },
    }

    impl DomainEvent for TallyEvent {
        fn event_type(&self) -> &'static str {
            match self {
                TallyEvent::Opened => "TallyOpened",
                TallyEvent::Counted { .. } => "TallyCounted",
            }
        }
    }

    #[derive(Debug, Default)]
    struct Tally {
        open: bool,
        total: u32,
        version: Version,
    }

    #[derive(Debug, thiserror::Error)]
    #[error("tally error")]
    struct TallyError;

    impl Aggregate for Tally {
        type Event = TallyEvent;
        type Error = TallyError;

        fn aggregate_type() -> &'static str {
            "Tally"
        }

        fn exists(&self) -> bool {
            self.open
        }

        fn version(&self) -> Version {
            self.version
        }

        fn set_version(&mut self, version: Version) {
            self.version = version;
        }

        fn apply(&mut self, event: Self::Event) {
            match event {
                TallyEvent::Opened => self.open = true,
                TallyEvent::Counted { by } => self.total += by,
            }
        }
    }

    #[test]
    fn test_apply_events() {
        let mut tally = Tally::default();
        assert!(!tally.exists());

        tally.apply_events(vec![
            TallyEvent::Opened,
            TallyEvent::Counted { by: 2 },
            TallyEvent::Counted { by: 3 },
        ]);

        assert!(tally.exists());
        assert_eq!(tally.total, 5);
    }

    #[test]
    fn test_domain_event_type() {
        assert_eq!(TallyEvent::Opened.event_type(), "TallyOpened");
        assert_eq!(TallyEvent::Counted { by: 1 }.event_type(), "TallyCounted");
    }
}
