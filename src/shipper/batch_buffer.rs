use crate::humio::{DecodedEvent, Event};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

/// Size and age thresholds that trigger a flush.
#[derive(Debug, Clone, Copy)]
pub struct FlushPolicy {
    pub bulk_max_size: usize,
    pub flush_wait_time: Duration,
}

/// Events of one partition waiting to be delivered.
///
/// Owned by a single worker. Cleared only through [`BatchBuffer::commit`], which
/// the worker calls after the ingest endpoint accepted the batch.
#[derive(Debug)]
pub struct BatchBuffer {
    events: Vec<Event>,
    /// Offset to resume from once everything buffered is delivered
    next_offset: Option<u64>,
    last_flush: Instant,
    /// 0 means unbounded
    limit: usize,
}

impl BatchBuffer {
    pub fn new(limit: usize, now: Instant) -> Self {
        Self {
            events: Vec::new(),
            next_offset: None,
            last_flush: now,
            limit,
        }
    }

    /// Append an event in arrival order.
    /// Returns Err if the buffer already holds `limit` undelivered events.
    pub fn push(&mut self, decoded: DecodedEvent) -> Result<(), BufferError> {
        if self.limit != 0 && self.events.len() >= self.limit {
            return Err(BufferError::BufferFull { limit: self.limit });
        }

        if let Some(offset) = decoded.offset {
            self.next_offset = Some(offset + 1);
        }
        self.events.push(decoded.event);

        Ok(())
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Offset to persist if the current contents are delivered.
    pub fn next_offset(&self) -> Option<u64> {
        self.next_offset
    }

    /// Flush when full or aged, never when empty.
    pub fn should_flush(&self, policy: &FlushPolicy, now: Instant) -> bool {
        if self.events.is_empty() {
            return false;
        }

        self.events.len() >= policy.bulk_max_size || now >= self.last_flush + policy.flush_wait_time
    }

    /// When the age trigger fires, if anything is buffered.
    pub fn flush_deadline(&self, policy: &FlushPolicy) -> Option<Instant> {
        if self.events.is_empty() {
            None
        } else {
            Some(self.last_flush + policy.flush_wait_time)
        }
    }

    /// Drop delivered events. Returns the count and the offset to persist.
    pub fn commit(&mut self, now: Instant) -> (usize, Option<u64>) {
        let shipped = self.events.len();
        self.events.clear();
        self.last_flush = now;
        (shipped, self.next_offset.take())
    }

    /// Keep everything for the next attempt but restart the age clock.
    pub fn mark_failed(&mut self, now: Instant) {
        self.last_flush = now;
    }

    pub fn stats(&self) -> BufferStats {
        BufferStats {
            buffered: self.events.len(),
            limit: self.limit,
            next_offset: self.next_offset,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BufferStats {
    pub buffered: usize,
    pub limit: usize,
    pub next_offset: Option<u64>,
}

#[derive(Debug, Error)]
pub enum BufferError {
    #[error("buffer is full ({limit} events)")]
    BufferFull { limit: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(offset: u64) -> DecodedEvent {
        DecodedEvent {
            event: Event::Raw(format!("event-{}", offset)),
            offset: Some(offset),
        }
    }

    fn policy(bulk_max_size: usize, wait_secs: u64) -> FlushPolicy {
        FlushPolicy {
            bulk_max_size,
            flush_wait_time: Duration::from_secs(wait_secs),
        }
    }

    #[test]
    fn test_empty_buffer_never_flushes() {
        let start = Instant::now();
        let buffer = BatchBuffer::new(0, start);

        assert!(!buffer.should_flush(&policy(1, 0), start + Duration::from_secs(3600)));
        assert!(buffer.flush_deadline(&policy(1, 10)).is_none());
    }

    #[test]
    fn test_flush_on_size_before_wait_time() {
        let start = Instant::now();
        let mut buffer = BatchBuffer::new(0, start);
        let policy = policy(2, 9999);

        buffer.push(event(10)).unwrap();
        assert!(!buffer.should_flush(&policy, start));

        buffer.push(event(11)).unwrap();
        assert!(buffer.should_flush(&policy, start));
    }

    #[test]
    fn test_flush_on_wait_time_below_size() {
        let start = Instant::now();
        let mut buffer = BatchBuffer::new(0, start);
        let policy = policy(200, 10);

        buffer.push(event(1)).unwrap();
        assert!(!buffer.should_flush(&policy, start + Duration::from_secs(9)));
        assert!(buffer.should_flush(&policy, start + Duration::from_secs(10)));
        assert_eq!(
            buffer.flush_deadline(&policy),
            Some(start + Duration::from_secs(10))
        );
    }

    #[test]
    fn test_next_offset_follows_last_event() {
        let start = Instant::now();
        let mut buffer = BatchBuffer::new(0, start);

        buffer.push(event(10)).unwrap();
        buffer.push(event(11)).unwrap();
        // Raw line without a readable offset leaves the pending offset alone
        buffer
            .push(DecodedEvent {
                event: Event::Raw("no offset".into()),
                offset: None,
            })
            .unwrap();

        assert_eq!(buffer.next_offset(), Some(12));
        assert_eq!(buffer.len(), 3);
    }

    #[test]
    fn test_commit_clears_and_resets_clock() {
        let start = Instant::now();
        let mut buffer = BatchBuffer::new(0, start);
        let policy = policy(200, 10);

        buffer.push(event(5)).unwrap();
        let later = start + Duration::from_secs(11);
        assert!(buffer.should_flush(&policy, later));

        assert_eq!(buffer.commit(later), (1, Some(6)));
        assert!(buffer.is_empty());
        assert_eq!(buffer.next_offset(), None);

        buffer.push(event(6)).unwrap();
        assert!(!buffer.should_flush(&policy, later + Duration::from_secs(5)));
    }

    #[test]
    fn test_failed_flush_retains_events() {
        let start = Instant::now();
        let mut buffer = BatchBuffer::new(0, start);
        let policy = policy(200, 10);

        buffer.push(event(1)).unwrap();
        buffer.push(event(2)).unwrap();
        let failed_at = start + Duration::from_secs(10);
        buffer.mark_failed(failed_at);
        buffer.push(event(3)).unwrap();

        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.next_offset(), Some(4));
        assert!(!buffer.should_flush(&policy, failed_at + Duration::from_secs(1)));
        assert!(buffer.should_flush(&policy, failed_at + Duration::from_secs(10)));
    }

    #[test]
    fn test_limit_rejects_overflow() {
        let mut buffer = BatchBuffer::new(2, Instant::now());

        assert!(buffer.push(event(0)).is_ok());
        assert!(buffer.push(event(1)).is_ok());
        assert!(matches!(
            buffer.push(event(2)),
            Err(BufferError::BufferFull { limit: 2 })
        ));

        let stats = buffer.stats();
        assert_eq!(stats.buffered, 2);
        assert_eq!(stats.limit, 2);
        assert_eq!(stats.next_offset, Some(2));
    }
}
