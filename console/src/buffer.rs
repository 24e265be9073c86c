use shared::LogLine;
use std::collections::VecDeque;

/// Ordered, append-only buffer of received console lines.
///
/// Every line carries the socket generation it arrived on and a sequence
/// number that is monotonic within that generation. The sequence counter
/// resets to 0 whenever a new generation starts appending, so the view layer
/// can tell lines from successive connections apart without the buffer ever
/// reordering or deduplicating anything.
#[derive(Debug, Clone)]
pub struct LogBuffer {
    lines: VecDeque<LogLine>,
    capacity: Option<usize>,
    generation: u32,
    next_sequence: u64,
}

impl LogBuffer {
    /// Unbounded buffer, matching the live-session semantics.
    pub fn new() -> Self {
        LogBuffer {
            lines: VecDeque::new(),
            capacity: None,
            generation: 0,
            next_sequence: 0,
        }
    }

    /// Bounded buffer that evicts the oldest lines first once `capacity`
    /// retained lines is exceeded. Append order of retained lines is
    /// unaffected.
    pub fn with_capacity(capacity: usize) -> Self {
        LogBuffer {
            lines: VecDeque::with_capacity(capacity.min(1024)),
            capacity: Some(capacity),
            generation: 0,
            next_sequence: 0,
        }
    }

    /// Appends a line received on (or echoed into) the given generation and
    /// assigns it the next sequence number for that generation.
    pub fn append(&mut self, generation: u32, text: impl Into<String>) {
        if generation != self.generation {
            self.generation = generation;
            self.next_sequence = 0;
        }

        let line = LogLine {
            sequence: self.next_sequence,
            generation,
            text: text.into(),
        };
        self.next_sequence += 1;
        self.lines.push_back(line);

        if let Some(capacity) = self.capacity {
            while self.lines.len() > capacity {
                self.lines.pop_front();
            }
        }
    }

    /// Lazy iterator over the retained lines in append order. Calling it
    /// again restarts from the oldest retained line.
    pub fn snapshot(&self) -> impl Iterator<Item = &LogLine> + '_ {
        self.lines.iter()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_is_monotonic_within_generation() {
        let mut buffer = LogBuffer::new();
        buffer.append(1, "a");
        buffer.append(1, "b");
        buffer.append(1, "c");

        let sequences: Vec<u64> = buffer.snapshot().map(|l| l.sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2]);
    }

    #[test]
    fn test_sequence_resets_on_generation_change() {
        let mut buffer = LogBuffer::new();
        buffer.append(1, "a");
        buffer.append(1, "b");
        buffer.append(2, "c");
        buffer.append(2, "d");

        let lines: Vec<(u32, u64)> = buffer
            .snapshot()
            .map(|l| (l.generation, l.sequence))
            .collect();
        assert_eq!(lines, vec![(1, 0), (1, 1), (2, 0), (2, 1)]);
    }

    #[test]
    fn test_append_order_is_preserved_across_generations() {
        let mut buffer = LogBuffer::new();
        buffer.append(1, "first");
        buffer.append(2, "second");
        buffer.append(2, "third");

        let texts: Vec<&str> = buffer.snapshot().map(|l| l.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_snapshot_is_restartable() {
        let mut buffer = LogBuffer::new();
        buffer.append(1, "a");
        buffer.append(1, "b");

        assert_eq!(buffer.snapshot().count(), 2);
        assert_eq!(buffer.snapshot().count(), 2);
    }

    #[test]
    fn test_bounded_buffer_evicts_oldest_first() {
        let mut buffer = LogBuffer::with_capacity(2);
        buffer.append(1, "a");
        buffer.append(1, "b");
        buffer.append(1, "c");

        let lines: Vec<(u64, &str)> = buffer
            .snapshot()
            .map(|l| (l.sequence, l.text.as_str()))
            .collect();
        // Sequence numbers of retained lines are untouched by eviction.
        assert_eq!(lines, vec![(1, "b"), (2, "c")]);
    }
}
