use crate::ingest::batch::Batch;
use crate::sensor::Reading;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// Accumulates readings until a size or age trigger fires.
///
/// Shared between the poll and flush activities behind a mutex; `drain` hands
/// out each reading exactly once.
#[derive(Debug)]
pub struct BatchBuffer {
    max_rows: usize,
    max_age: Duration,
    /// Readings with their arrival time, oldest first
    readings: VecDeque<(Instant, Reading)>,
}

impl BatchBuffer {
    pub fn new(max_rows: usize, max_age: Duration) -> Self {
        Self {
            max_rows: max_rows.max(1),
            max_age,
            readings: VecDeque::with_capacity(max_rows),
        }
    }

    pub fn push(&mut self, reading: Reading) {
        self.push_at(reading, Instant::now());
    }

    pub fn push_at(&mut self, reading: Reading, now: Instant) {
        self.readings.push_back((now, reading));
    }

    /// Size trigger reached, or the oldest reading has waited `max_age`
    pub fn should_flush(&self, now: Instant) -> bool {
        if self.readings.len() >= self.max_rows {
            return true;
        }
        self.flush_deadline().is_some_and(|deadline| now >= deadline)
    }

    /// When the age trigger fires for the current contents
    pub fn flush_deadline(&self) -> Option<Instant> {
        self.readings
            .front()
            .map(|(arrived, _)| *arrived + self.max_age)
    }

    /// Take up to `max_rows` readings, oldest first.
    ///
    /// Readings left behind keep their arrival time, so an overdue remainder
    /// is still due after the drain.
    pub fn drain(&mut self) -> Option<Batch> {
        let take = self.readings.len().min(self.max_rows);
        let drained = self
            .readings
            .drain(..take)
            .map(|(_, reading)| reading)
            .collect();
        Batch::new(drained)
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    pub fn max_rows(&self) -> usize {
        self.max_rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn reading(n: i64) -> Reading {
        Reading::builder(Utc::now()).field("ts", n).build()
    }

    #[test]
    fn test_count_trigger_fires_before_interval() {
        // 10 readings every 500ms against a 5s interval
        let mut buffer = BatchBuffer::new(10, Duration::from_secs(5));
        let start = Instant::now();

        for i in 0..10 {
            let now = start + Duration::from_millis(500 * i as u64);
            assert!(!buffer.should_flush(now), "flushed early at reading {}", i);
            buffer.push_at(reading(i), now);
        }

        let now = start + Duration::from_millis(4500);
        assert!(buffer.should_flush(now));
        let batch = buffer.drain().unwrap();
        assert_eq!(batch.len(), 10);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_time_trigger_flushes_partial_batch() {
        // 3 readings, then silence for 30s
        let mut buffer = BatchBuffer::new(10, Duration::from_secs(5));
        let start = Instant::now();
        for i in 0..3 {
            buffer.push_at(reading(i), start + Duration::from_millis(100 * i as u64));
        }

        assert!(!buffer.should_flush(start + Duration::from_millis(4999)));
        assert_eq!(buffer.flush_deadline(), Some(start + Duration::from_secs(5)));
        assert!(buffer.should_flush(start + Duration::from_secs(5)));
        assert!(buffer.should_flush(start + Duration::from_secs(30)));

        let batch = buffer.drain().unwrap();
        assert_eq!(batch.len(), 3);
    }

    #[test]
    fn test_empty_buffer() {
        let mut buffer = BatchBuffer::new(10, Duration::from_secs(5));
        assert!(buffer.drain().is_none());
        assert!(buffer.flush_deadline().is_none());
        assert!(!buffer.should_flush(Instant::now() + Duration::from_secs(3600)));
    }

    #[test]
    fn test_drain_keeps_arrival_order_and_caps_size() {
        let mut buffer = BatchBuffer::new(4, Duration::from_secs(5));
        let readings: Vec<Reading> = (0..6).map(reading).collect();
        let ids: Vec<_> = readings.iter().map(Reading::id).collect();
        for r in readings {
            buffer.push(r);
        }

        let first = buffer.drain().unwrap();
        assert_eq!(first.readings().iter().map(Reading::id).collect::<Vec<_>>(), ids[..4]);
        assert_eq!(buffer.len(), 2);
        assert!(buffer.flush_deadline().is_some());

        let second = buffer.drain().unwrap();
        assert_eq!(second.readings().iter().map(Reading::id).collect::<Vec<_>>(), ids[4..]);
        assert!(buffer.drain().is_none());
    }

    #[test]
    fn test_overdue_remainder_stays_due_after_drain() {
        let mut buffer = BatchBuffer::new(4, Duration::from_secs(5));
        let start = Instant::now();
        for i in 0..6 {
            buffer.push_at(reading(i), start + Duration::from_millis(100 * i as u64));
        }

        // drained late, after a slow retry
        let late = start + Duration::from_secs(12);
        assert_eq!(buffer.drain().unwrap().len(), 4);
        assert_eq!(
            buffer.flush_deadline(),
            Some(start + Duration::from_millis(400) + Duration::from_secs(5))
        );
        assert!(buffer.should_flush(late));
        assert_eq!(buffer.drain().unwrap().len(), 2);
        assert!(buffer.flush_deadline().is_none());
    }
}
