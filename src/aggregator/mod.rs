pub mod window;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::error::TryRecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::{self, Clock, PeriodicSchedule, ScheduleError};
use crate::config::Config;
use crate::export::health::HealthMetrics;
use crate::producer::SampleReceivers;
use crate::sink::FrameSink;
use crate::telemetry::stats::{PipelineEvent, PipelineStats};
use crate::telemetry::{SensorSample, TelemetryFrame, UptimeSample, SENSOR_SENTINEL};

use self::window::AverageWindowBuffer;

/// Timing parameters for frame aggregation, resolved to milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregatorSettings {
    pub period: Duration,
    pub tolerance_ms: i64,
    pub window_ms: i64,
    pub sensor_timeout_ms: i64,
    pub uptime_timeout_ms: i64,
    pub window_capacity: usize,
}

impl AggregatorSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            period: cfg.aggregator.frame_interval,
            tolerance_ms: clock::duration_ms(cfg.aggregator.deadline_tolerance),
            window_ms: clock::duration_ms(cfg.aggregator.average_window),
            sensor_timeout_ms: clock::duration_ms(cfg.sensor_timeout()),
            uptime_timeout_ms: clock::duration_ms(cfg.uptime_timeout()),
            window_capacity: cfg.aggregator.window_capacity,
        }
    }

    pub fn period_ms(&self) -> i64 {
        clock::duration_ms(self.period)
    }
}

impl Default for AggregatorSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Result of comparing a wake time against the previous frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeadlineCheck {
    pub met: bool,
    pub elapsed_ms: i64,
    /// Time past the nominal period; negative when early.
    pub overage_ms: i64,
}

/// A built frame together with the conditions that shaped it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleOutcome {
    pub frame: TelemetryFrame,
    pub stale_sensor: bool,
    pub stale_uptime: bool,
    pub deadline_missed: bool,
}

/// Everything the aggregator carries from one cycle to the next.
pub struct AggregatorState {
    settings: AggregatorSettings,
    start_ms: i64,
    frame_counter: u32,
    window: AverageWindowBuffer,
    held_uptime: Option<UptimeSample>,
    /// Timestamp of the previous frame, or the start before the first one.
    last_reference_ms: i64,
}

impl AggregatorState {
    pub fn new(settings: AggregatorSettings, start_ms: i64) -> Self {
        Self {
            settings,
            start_ms,
            frame_counter: 0,
            window: AverageWindowBuffer::new(settings.window_capacity),
            held_uptime: None,
            last_reference_ms: start_ms,
        }
    }

    pub fn settings(&self) -> &AggregatorSettings {
        &self.settings
    }

    /// Frames built so far.
    pub fn frame_counter(&self) -> u32 {
        self.frame_counter
    }

    pub fn window(&self) -> &AverageWindowBuffer {
        &self.window
    }

    pub fn held_uptime(&self) -> Option<UptimeSample> {
        self.held_uptime
    }

    pub fn check_deadline(&self, now_ms: i64) -> DeadlineCheck {
        let period_ms = self.settings.period_ms();
        let elapsed_ms = now_ms - self.last_reference_ms;
        DeadlineCheck {
            met: elapsed_ms <= period_ms + self.settings.tolerance_ms,
            elapsed_ms,
            overage_ms: elapsed_ms - period_ms,
        }
    }

    /// Keep an uptime sample; the most recent one wins.
    pub fn hold_uptime(&mut self, sample: UptimeSample) {
        self.held_uptime = Some(sample);
    }

    /// Add a sensor sample to the average window.
    pub fn ingest_sensor(&mut self, sample: SensorSample) {
        self.window.push(sample);
    }

    /// Empty both queues without waiting.
    ///
    /// Returns the last sensor sample drained, if any arrived this cycle.
    pub fn drain(&mut self, receivers: &mut SampleReceivers) -> Option<SensorSample> {
        loop {
            match receivers.uptime.try_recv() {
                Ok(sample) => self.hold_uptime(sample),
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
        }

        let mut current = None;
        loop {
            match receivers.sensor.try_recv() {
                Ok(sample) => {
                    self.ingest_sensor(sample);
                    current = Some(sample);
                }
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
        }

        current
    }

    /// Build the next frame from the state and this cycle's inputs.
    ///
    /// `current_sensor` is the newest sensor sample drained this cycle. A
    /// stale or missing input is replaced by the sentinel (sensor) or the
    /// clock-derived uptime and marks the frame degraded.
    pub fn build_frame(
        &mut self,
        now_ms: i64,
        deadline_met: bool,
        current_sensor: Option<SensorSample>,
    ) -> CycleOutcome {
        self.frame_counter = self.frame_counter.wrapping_add(1);

        let fresh_uptime = self
            .held_uptime
            .filter(|u| now_ms - u.timestamp_ms <= self.settings.uptime_timeout_ms);
        let (uptime_secs, stale_uptime) = match fresh_uptime {
            Some(u) => (u.uptime_secs, false),
            None => (clock::uptime_secs(self.start_ms, now_ms), true),
        };

        let fresh_sensor =
            current_sensor.filter(|s| now_ms - s.timestamp_ms <= self.settings.sensor_timeout_ms);
        let (latest_sensor_value, stale_sensor) = match fresh_sensor {
            Some(s) => (s.value, false),
            None => (SENSOR_SENTINEL, true),
        };

        let frame = TelemetryFrame {
            frame_id: self.frame_counter,
            timestamp_ms: now_ms,
            uptime_secs,
            latest_sensor_value,
            windowed_average: self.window.average(now_ms, self.settings.window_ms),
            degraded: stale_uptime || stale_sensor || !deadline_met,
        };

        self.last_reference_ms = frame.timestamp_ms;

        CycleOutcome {
            frame,
            stale_sensor,
            stale_uptime,
            deadline_missed: !deadline_met,
        }
    }
}

/// Periodic frame builder.
///
/// Wakes on an absolute deadline grid, drains both sample queues, and emits
/// exactly one frame per wake.
pub struct Aggregator {
    clock: Clock,
    state: AggregatorState,
    schedule: PeriodicSchedule,
    receivers: SampleReceivers,
    sink: FrameSink,
    stats: Arc<PipelineStats>,
    metrics: Option<Arc<HealthMetrics>>,
}

impl Aggregator {
    /// Create an aggregator whose first frame is due one period after `start_ms`.
    pub fn new(
        settings: AggregatorSettings,
        clock: Clock,
        start_ms: i64,
        receivers: SampleReceivers,
        sink: FrameSink,
        stats: Arc<PipelineStats>,
    ) -> Result<Self, ScheduleError> {
        let schedule = PeriodicSchedule::new(start_ms, settings.period)?;

        Ok(Self {
            clock,
            state: AggregatorState::new(settings, start_ms),
            schedule,
            receivers,
            sink,
            stats,
            metrics: None,
        })
    }

    /// Report frames and deadline overage to prometheus.
    pub fn with_metrics(mut self, metrics: Arc<HealthMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Run cycles until cancelled. Cancellation is only observed while
    /// waiting for a deadline; a started cycle always completes.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(
            period_ms = self.schedule.period_ms(),
            sink = self.sink.name(),
            "aggregator started"
        );

        loop {
            let deadline = self.clock.instant_at(self.schedule.next_deadline());

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep_until(deadline) => {}
            }

            let woke_ms = self.clock.now_ms();
            let skipped = self.schedule.advance(woke_ms);
            if skipped > 0 {
                debug!(skipped, next_deadline_ms = self.schedule.next_deadline(), "skipped overrun periods");
            }

            self.run_cycle(woke_ms);
        }

        info!(frames = self.state.frame_counter(), "aggregator stopped");
    }

    /// One aggregation cycle for a wake observed at `woke_ms`.
    ///
    /// The deadline is judged at the wake; the frame is stamped with a fresh
    /// clock read taken after the queues are drained.
    pub fn run_cycle(&mut self, woke_ms: i64) -> TelemetryFrame {
        let deadline = self.state.check_deadline(woke_ms);
        if !deadline.met {
            warn!(
                overage_ms = deadline.overage_ms,
                elapsed_ms = deadline.elapsed_ms,
                "frame deadline missed"
            );
        }

        let current = self.state.drain(&mut self.receivers);
        let now_ms = self.clock.now_ms().max(woke_ms);
        let outcome = self.state.build_frame(now_ms, deadline.met, current);
        self.record(&outcome, &deadline);

        self.sink.emit(&outcome.frame);
        outcome.frame
    }

    fn record(&self, outcome: &CycleOutcome, deadline: &DeadlineCheck) {
        self.stats.set_frames_total(u64::from(self.state.frame_counter()));

        if outcome.deadline_missed {
            self.stats.record(PipelineEvent::DeadlineMissed);
        }
        if outcome.stale_sensor {
            self.stats.record(PipelineEvent::StaleSensor);
        }
        if outcome.stale_uptime {
            self.stats.record(PipelineEvent::StaleUptime);
        }
        if outcome.frame.degraded {
            self.stats.record(PipelineEvent::DegradedFrame);
        }

        if let Some(metrics) = &self.metrics {
            metrics.frames_emitted.inc();
            if outcome.frame.degraded {
                metrics.degraded_frames.inc();
            }
            if outcome.deadline_missed {
                metrics.deadline_misses.inc();
                metrics
                    .deadline_overage
                    .observe(deadline.overage_ms.max(0) as f64 / 1000.0);
            }
        }
    }
}
