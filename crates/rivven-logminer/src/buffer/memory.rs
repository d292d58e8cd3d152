//! Heap-resident event buffer

use super::EventBuffer;
use crate::error::{LogMinerError, Result};
use crate::event::LogMinerEvent;

/// Events held in a `Vec`, index `i` is position `i`.
#[derive(Debug, Clone)]
pub struct MemoryEventBuffer {
    transaction_id: String,
    events: Vec<LogMinerEvent>,
}

impl MemoryEventBuffer {
    pub fn new(transaction_id: impl Into<String>) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            events: Vec::new(),
        }
    }

    /// Borrow the resident events in order
    pub fn events(&self) -> &[LogMinerEvent] {
        &self.events
    }

    fn out_of_bounds(&self, index: usize) -> LogMinerError {
        LogMinerError::IndexOutOfBounds {
            transaction_id: self.transaction_id.clone(),
            index,
            len: self.events.len(),
        }
    }
}

impl EventBuffer for MemoryEventBuffer {
    fn transaction_id(&self) -> &str {
        &self.transaction_id
    }

    fn append(&mut self, event: LogMinerEvent) -> Result<()> {
        self.events.push(event);
        Ok(())
    }

    fn get(&self, index: usize) -> Result<LogMinerEvent> {
        self.events
            .get(index)
            .cloned()
            .ok_or_else(|| self.out_of_bounds(index))
    }

    fn remove_at(&mut self, index: usize) -> Result<LogMinerEvent> {
        if index >= self.events.len() {
            return Err(self.out_of_bounds(index));
        }
        Ok(self.events.remove(index))
    }

    fn remove_if(&mut self, predicate: &mut dyn FnMut(&LogMinerEvent) -> bool) -> Result<usize> {
        let before = self.events.len();
        self.events.retain(|event| !predicate(event));
        Ok(before - self.events.len())
    }

    fn len(&self) -> usize {
        self.events.len()
    }

    fn drain(&mut self) -> Result<Vec<LogMinerEvent>> {
        Ok(std::mem::take(&mut self.events))
    }

    fn clear(&mut self) -> Result<()> {
        self.events.clear();
        Ok(())
    }

    fn is_spilled(&self) -> bool {
        false
    }
}
