//! In-memory event log.
//!
//! RULE: Only the engine appends. Entries are never edited or removed;
//! the log lives exactly as long as the session.

use crate::{
    error::SimResult,
    event::SimEvent,
    types::{SessionId, Tick},
};
use serde::{Deserialize, Serialize};

/// One logged event. `payload` is the JSON-serialized SimEvent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub seq:        u64,
    pub session_id: SessionId,
    pub tick:       Tick,
    pub source:     String,
    pub event_type: String,
    pub payload:    String,
}

#[derive(Debug, Default)]
pub struct EventLog {
    entries: Vec<EventLogEntry>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(
        &mut self,
        session_id: &str,
        tick:       Tick,
        source:     &str,
        event:      &SimEvent,
    ) -> SimResult<()> {
        let entry = EventLogEntry {
            seq:        self.entries.len() as u64,
            session_id: session_id.to_string(),
            tick,
            source:     source.to_string(),
            event_type: event.kind().to_string(),
            payload:    serde_json::to_string(event)?,
        };
        self.entries.push(entry);
        Ok(())
    }

    pub fn entries(&self) -> &[EventLogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn events_for_tick(&self, tick: Tick) -> Vec<&EventLogEntry> {
        self.entries.iter().filter(|e| e.tick == tick).collect()
    }

    /// Count entries of one event type, e.g. "day_advanced".
    pub fn count_of(&self, event_type: &str) -> usize {
        self.entries.iter().filter(|e| e.event_type == event_type).count()
    }
}
