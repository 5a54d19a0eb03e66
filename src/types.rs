//! Progress events emitted during a processor run

use serde::{Deserialize, Serialize};

/// Event emitted by a running processor
///
/// Events are advisory: a run never waits for subscribers, and lagging or
/// dropped receivers do not affect it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// The expected number of items is known and the run loops are starting
    Started {
        /// Expected total number of items
        total: u64,
    },

    /// The producer enqueued another chunk
    Fetched {
        /// Items fetched so far
        count: u64,
        /// Expected total number of items
        total: u64,
    },

    /// The worker committed another chunk
    Processed {
        /// Items processed so far
        count: u64,
        /// Expected total number of items
        total: u64,
    },

    /// The worker drained the queue
    Finished {
        /// Items processed in total
        processed: u64,
    },
}

impl Event {
    /// Fraction of the expected total this event reports, if any
    pub fn fraction(&self) -> Option<f64> {
        match self {
            Event::Fetched { count, total } | Event::Processed { count, total } if *total > 0 => {
                Some((*count as f64 / *total as f64).min(1.0))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = Event::Processed {
            count: 200,
            total: 1000,
        };
        let json = serde_json::to_string(&event).unwrap_or_default();
        assert_eq!(json, r#"{"type":"processed","count":200,"total":1000}"#);
    }

    #[test]
    fn test_fraction() {
        assert_eq!(Event::Fetched { count: 5, total: 10 }.fraction(), Some(0.5));
        assert_eq!(Event::Fetched { count: 15, total: 10 }.fraction(), Some(1.0));
        assert_eq!(Event::Started { total: 10 }.fraction(), None);
        assert_eq!(Event::Processed { count: 1, total: 0 }.fraction(), None);
    }
}
