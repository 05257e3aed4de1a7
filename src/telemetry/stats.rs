use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Pipeline occurrences worth counting between status reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PipelineEvent {
    SensorTriggerDropped = 0,
    UptimeTriggerDropped = 1,
    SensorSampleDropped = 2,
    UptimeSampleDropped = 3,
    DeadlineMissed = 4,
    StaleSensor = 5,
    StaleUptime = 6,
    DegradedFrame = 7,
    LoadBurst = 8,
}

/// Highest discriminant of [`PipelineEvent`].
pub const MAX_PIPELINE_EVENT: usize = 8;

impl PipelineEvent {
    /// All variants, in discriminant order.
    pub fn all() -> &'static [PipelineEvent] {
        &[
            Self::SensorTriggerDropped,
            Self::UptimeTriggerDropped,
            Self::SensorSampleDropped,
            Self::UptimeSampleDropped,
            Self::DeadlineMissed,
            Self::StaleSensor,
            Self::StaleUptime,
            Self::DegradedFrame,
            Self::LoadBurst,
        ]
    }

    pub fn from_u8(raw: u8) -> Option<Self> {
        Self::all().get(usize::from(raw)).copied()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SensorTriggerDropped => "sensor_trigger_dropped",
            Self::UptimeTriggerDropped => "uptime_trigger_dropped",
            Self::SensorSampleDropped => "sensor_sample_dropped",
            Self::UptimeSampleDropped => "uptime_sample_dropped",
            Self::DeadlineMissed => "deadline_missed",
            Self::StaleSensor => "stale_sensor",
            Self::StaleUptime => "stale_uptime",
            Self::DegradedFrame => "degraded_frame",
            Self::LoadBurst => "load_burst",
        }
    }
}

impl fmt::Display for PipelineEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lock-free pipeline counters shared between tasks.
///
/// Per-event counters are reset by `snapshot()`, which suits periodic
/// reporting. The cumulative frame count mirrors the aggregator's frame
/// counter for readers on other threads and is never reset.
pub struct PipelineStats {
    counts: [AtomicU64; MAX_PIPELINE_EVENT + 1],
    frames_total: AtomicU64,
    load_busy_ms: AtomicU64,
}

impl PipelineStats {
    /// Create zeroed stats.
    pub fn new() -> Self {
        Self {
            counts: std::array::from_fn(|_| AtomicU64::new(0)),
            frames_total: AtomicU64::new(0),
            load_busy_ms: AtomicU64::new(0),
        }
    }

    /// Increment the counter for the given event by one.
    pub fn record(&self, event: PipelineEvent) {
        if let Some(counter) = self.counts.get(event as usize) {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Publish the aggregator's current frame count.
    pub fn set_frames_total(&self, frames: u64) {
        self.frames_total.store(frames, Ordering::Relaxed);
    }

    /// Cumulative frames emitted since start.
    pub fn frames_total(&self) -> u64 {
        self.frames_total.load(Ordering::Relaxed)
    }

    /// Add CPU-burst time spent by the load generator.
    pub fn add_load_busy_ms(&self, ms: u64) {
        self.load_busy_ms.fetch_add(ms, Ordering::Relaxed);
    }

    /// Cumulative CPU-burst time spent by the load generator.
    pub fn load_busy_ms(&self) -> u64 {
        self.load_busy_ms.load(Ordering::Relaxed)
    }

    /// Atomically read and reset all event counters, returning non-zero entries.
    pub fn snapshot(&self) -> Vec<(PipelineEvent, u64)> {
        let mut result = Vec::new();

        for (i, counter) in self.counts.iter().enumerate() {
            let v = counter.swap(0, Ordering::Relaxed);
            if v > 0 {
                if let Some(event) = u8::try_from(i).ok().and_then(PipelineEvent::from_u8) {
                    result.push((event, v));
                }
            }
        }

        result
    }
}

impl Default for PipelineStats {
    fn default() -> Self {
        Self::new()
    }
}
