use crate::telemetry::SensorSample;

/// Fixed-capacity ring of recent sensor samples.
///
/// Storage is allocated once; inserting into a full ring overwrites the
/// oldest entry. Age is only considered when reading: `average` skips entries
/// older than the cutoff without evicting them.
pub struct AverageWindowBuffer {
    slots: Box<[SensorSample]>,
    /// Index the next insert writes to.
    head: usize,
    count: usize,
}

impl AverageWindowBuffer {
    /// Creates an empty ring holding up to `capacity` samples.
    ///
    /// A zero capacity is bumped to one.
    pub fn new(capacity: usize) -> Self {
        let empty = SensorSample {
            timestamp_ms: 0,
            value: 0,
        };
        Self {
            slots: vec![empty; capacity.max(1)].into_boxed_slice(),
            head: 0,
            count: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Appends a sample, overwriting the oldest one when full.
    pub fn push(&mut self, sample: SensorSample) {
        let cap = self.slots.len();
        if let Some(slot) = self.slots.get_mut(self.head) {
            *slot = sample;
        }
        self.head = (self.head + 1) % cap;
        if self.count < cap {
            self.count += 1;
        }
    }

    /// Iterates retained samples from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &SensorSample> + '_ {
        let cap = self.slots.len();
        let start = (self.head + cap - self.count) % cap;
        (0..self.count).filter_map(move |i| self.slots.get((start + i) % cap))
    }

    /// Integer mean of samples with `timestamp_ms >= now_ms - window_ms`.
    ///
    /// Returns 0 when no retained sample falls inside the window.
    pub fn average(&self, now_ms: i64, window_ms: i64) -> u32 {
        let cutoff = now_ms.saturating_sub(window_ms);

        let (sum, n) = self
            .iter()
            .filter(|s| s.timestamp_ms >= cutoff)
            .fold((0i64, 0i64), |(sum, n), s| (sum + i64::from(s.value), n + 1));

        if n == 0 {
            return 0;
        }

        u32::try_from((sum / n).max(0)).unwrap_or(u32::MAX)
    }
}
