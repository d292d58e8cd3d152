//! # Open Transactions
//!
//! A [`Transaction`] is one source transaction that has been observed in
//! the redo log but not yet committed or rolled back. It owns the event
//! buffer holding its uncommitted changes.

use crate::buffer::{EventBuffer, TransactionEventBuffer};
use crate::error::Result;
use crate::event::{LogMinerEvent, Scn};
use tracing::trace;

/// An open source transaction and its buffered events.
#[derive(Debug)]
pub struct Transaction {
    transaction_id: String,
    start_scn: Scn,
    change_time: i64,
    user_name: Option<String>,
    number_of_events: u64,
    events: TransactionEventBuffer,
}

impl Transaction {
    pub fn new(
        transaction_id: impl Into<String>,
        start_scn: Scn,
        change_time: i64,
        user_name: Option<String>,
        events: TransactionEventBuffer,
    ) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            start_scn,
            change_time,
            user_name,
            number_of_events: 0,
            events,
        }
    }

    pub fn transaction_id(&self) -> &str {
        &self.transaction_id
    }

    pub fn start_scn(&self) -> Scn {
        self.start_scn
    }

    /// Time of the first observed change (Unix epoch millis)
    pub fn change_time(&self) -> i64 {
        self.change_time
    }

    pub fn user_name(&self) -> Option<&str> {
        self.user_name.as_deref()
    }

    /// Events appended since the transaction started, including undone ones.
    ///
    /// Never decreases while the transaction is open.
    pub fn event_count(&self) -> u64 {
        self.number_of_events
    }

    /// Events currently retained in the buffer
    pub fn buffered_len(&self) -> usize {
        self.events.len()
    }

    pub fn is_spilled(&self) -> bool {
        self.events.is_spilled()
    }

    pub fn events(&self) -> &TransactionEventBuffer {
        &self.events
    }

    /// Reset the event counter for a new use of this transaction object.
    pub fn start(&mut self) {
        self.number_of_events = 0;
    }

    /// Hand out the next event id
    pub fn next_event_id(&mut self) -> u64 {
        let id = self.number_of_events;
        self.number_of_events += 1;
        id
    }

    /// Buffer an event.
    ///
    /// The counter only advances once the buffer accepted the event.
    pub fn add_event(&mut self, event: LogMinerEvent) -> Result<u64> {
        self.events.append(event)?;
        Ok(self.next_event_id())
    }

    /// Undo every buffered change made to `row_id`.
    ///
    /// Returns the number of removed events. Finding nothing is normal: the
    /// row may have been filtered out before it reached the buffer.
    pub fn remove_events_with_row_id(&mut self, row_id: &str) -> Result<usize> {
        let transaction_id = &self.transaction_id;
        self.events.remove_if(&mut |event| {
            if event.row_id == row_id {
                trace!(%transaction_id, scn = %event.scn, "Undo applied for event");
                true
            } else {
                false
            }
        })
    }

    /// Take the buffered events sorted by ascending SCN.
    ///
    /// The sort is stable, so events sharing an SCN keep their append order.
    pub fn drain_ordered(&mut self) -> Result<Vec<LogMinerEvent>> {
        let mut events = self.events.drain()?;
        events.sort_by_key(|event| event.scn);
        Ok(events)
    }

    /// Drop every buffered event, including spilled ones
    pub fn discard(&mut self) -> Result<()> {
        self.events.clear()
    }
}
