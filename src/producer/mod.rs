pub mod dispatch;
pub mod synth;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::{self, Clock};
use crate::telemetry::stats::{PipelineEvent, PipelineStats};
use crate::telemetry::{SensorSample, Trigger, UptimeSample};

use self::dispatch::TriggerDispatch;
use self::synth::SineSensor;

/// Publishing ends of the sample queues, owned by the producer.
pub struct SampleSenders {
    pub sensor: mpsc::Sender<SensorSample>,
    pub uptime: mpsc::Sender<UptimeSample>,
}

/// Consuming ends of the sample queues, owned by the aggregator.
pub struct SampleReceivers {
    pub sensor: mpsc::Receiver<SensorSample>,
    pub uptime: mpsc::Receiver<UptimeSample>,
}

/// Create the bounded sensor and uptime queues.
pub fn sample_queues(sensor_depth: usize, uptime_depth: usize) -> (SampleSenders, SampleReceivers) {
    let (sensor_tx, sensor_rx) = mpsc::channel(sensor_depth.max(1));
    let (uptime_tx, uptime_rx) = mpsc::channel(uptime_depth.max(1));
    (
        SampleSenders {
            sensor: sensor_tx,
            uptime: uptime_tx,
        },
        SampleReceivers {
            sensor: sensor_rx,
            uptime: uptime_rx,
        },
    )
}

/// Sampling periods driving the producer's timers.
#[derive(Debug, Clone, Copy)]
pub struct ProducerRates {
    pub sensor: Duration,
    pub uptime: Duration,
}

/// Synthesizes sensor and uptime samples on demand and publishes them
/// without ever blocking. A full queue drops the sample.
pub struct Producer {
    clock: Clock,
    start_ms: i64,
    sensor: SineSensor,
    senders: SampleSenders,
    stats: Arc<PipelineStats>,
}

impl Producer {
    pub fn new(
        clock: Clock,
        start_ms: i64,
        sensor: SineSensor,
        senders: SampleSenders,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            clock,
            start_ms,
            sensor,
            senders,
            stats,
        }
    }

    /// Take one sensor reading timestamped now.
    pub fn sample_sensor(&mut self) -> SensorSample {
        SensorSample {
            timestamp_ms: self.clock.now_ms(),
            value: self.sensor.next_value(),
        }
    }

    /// Take one uptime reading timestamped now.
    pub fn sample_uptime(&self) -> UptimeSample {
        let now = self.clock.now_ms();
        UptimeSample {
            timestamp_ms: now,
            uptime_secs: clock::uptime_secs(self.start_ms, now),
        }
    }

    /// Sample the source named by `trigger` and publish the result.
    ///
    /// Returns false if the sample was dropped.
    pub fn handle_trigger(&mut self, trigger: Trigger) -> bool {
        match trigger {
            Trigger::Sensor => {
                let sample = self.sample_sensor();
                match self.senders.sensor.try_send(sample) {
                    Ok(()) => true,
                    Err(TrySendError::Full(dropped)) => {
                        warn!(
                            timestamp_ms = dropped.timestamp_ms,
                            value = dropped.value,
                            "sensor queue full, dropping sample"
                        );
                        self.stats.record(PipelineEvent::SensorSampleDropped);
                        false
                    }
                    Err(TrySendError::Closed(_)) => {
                        debug!("sensor queue closed");
                        false
                    }
                }
            }
            Trigger::Uptime => {
                let sample = self.sample_uptime();
                match self.senders.uptime.try_send(sample) {
                    Ok(()) => true,
                    Err(TrySendError::Full(dropped)) => {
                        warn!(
                            timestamp_ms = dropped.timestamp_ms,
                            uptime_secs = dropped.uptime_secs,
                            "uptime queue full, dropping sample"
                        );
                        self.stats.record(PipelineEvent::UptimeSampleDropped);
                        false
                    }
                    Err(TrySendError::Closed(_)) => {
                        debug!("uptime queue closed");
                        false
                    }
                }
            }
        }
    }

    /// Consume triggers until cancelled or every trigger sender is gone.
    pub async fn run(mut self, mut triggers: mpsc::Receiver<Trigger>, cancel: CancellationToken) {
        info!("producer started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                trigger = triggers.recv() => match trigger {
                    Some(trigger) => {
                        self.handle_trigger(trigger);
                    }
                    None => {
                        debug!("trigger channel closed");
                        break;
                    }
                },
            }
        }

        info!("producer stopped");
    }

    /// Start both sampling timers and run the producer loop.
    ///
    /// Must be called inside a tokio runtime; the timers are spawned onto it
    /// and stop with `cancel`.
    pub async fn run_with_timers(
        self,
        rates: ProducerRates,
        trigger_depth: usize,
        cancel: CancellationToken,
    ) {
        let (dispatch, triggers) = TriggerDispatch::channel(trigger_depth, Arc::clone(&self.stats));

        let uptime_timer = dispatch.spawn_timer(Trigger::Uptime, rates.uptime, cancel.clone());
        let sensor_timer = dispatch.spawn_timer(Trigger::Sensor, rates.sensor, cancel.clone());
        // Only the timers keep the trigger channel open.
        drop(dispatch);

        self.run(triggers, cancel).await;

        for timer in [uptime_timer, sensor_timer] {
            if let Err(e) = timer.await {
                warn!(error = %e, "trigger timer join failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn producer(sensor_depth: usize, uptime_depth: usize) -> (Producer, SampleReceivers, Arc<PipelineStats>) {
        let stats = Arc::new(PipelineStats::new());
        let (senders, receivers) = sample_queues(sensor_depth, uptime_depth);
        let producer = Producer::new(
            Clock::start(),
            0,
            SineSensor::with_seed(1),
            senders,
            Arc::clone(&stats),
        );
        (producer, receivers, stats)
    }

    #[tokio::test(start_paused = true)]
    async fn test_sensor_trigger_publishes_sample() {
        let (mut producer, mut rx, _stats) = producer(10, 2);

        tokio::time::advance(Duration::from_millis(50)).await;
        assert!(producer.handle_trigger(Trigger::Sensor));

        let sample = rx.sensor.try_recv().expect("sample");
        assert_eq!(sample.timestamp_ms, 50);
        assert!((0..=100).contains(&sample.value));
        assert!(rx.uptime.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_uptime_trigger_reports_whole_seconds() {
        let (mut producer, mut rx, _stats) = producer(10, 2);

        tokio::time::advance(Duration::from_millis(2_500)).await;
        assert!(producer.handle_trigger(Trigger::Uptime));

        let sample = rx.uptime.try_recv().expect("sample");
        assert_eq!(sample.timestamp_ms, 2_500);
        assert_eq!(sample.uptime_secs, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_sensor_queue_drops_without_blocking() {
        let (mut producer, mut rx, stats) = producer(3, 2);

        for _ in 0..3 {
            assert!(producer.handle_trigger(Trigger::Sensor));
        }
        assert!(!producer.handle_trigger(Trigger::Sensor));
        assert!(!producer.handle_trigger(Trigger::Sensor));

        let snap = stats.snapshot();
        assert_eq!(snap, vec![(PipelineEvent::SensorSampleDropped, 2)]);

        let mut drained = 0;
        while rx.sensor.try_recv().is_ok() {
            drained += 1;
        }
        assert_eq!(drained, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_uptime_queue_drops_newest() {
        let (mut producer, mut rx, stats) = producer(10, 2);

        for secs in 1..=3u64 {
            tokio::time::advance(Duration::from_secs(1)).await;
            producer.handle_trigger(Trigger::Uptime);
            assert_eq!(secs > 2, stats.snapshot().len() == 1);
        }

        // The queued samples are the two oldest; the third was dropped.
        assert_eq!(rx.uptime.try_recv().expect("first").uptime_secs, 1);
        assert_eq!(rx.uptime.try_recv().expect("second").uptime_secs, 2);
        assert!(rx.uptime.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_with_timers_produces_at_both_rates() {
        let (producer, mut rx, _stats) = producer(64, 8);
        let cancel = CancellationToken::new();
        let rates = ProducerRates {
            sensor: Duration::from_millis(50),
            uptime: Duration::from_millis(1_000),
        };

        let task = tokio::spawn(producer.run_with_timers(rates, 72, cancel.clone()));

        tokio::time::sleep(Duration::from_millis(1_020)).await;
        cancel.cancel();
        task.await.expect("producer task");

        let mut sensor = Vec::new();
        while let Ok(s) = rx.sensor.try_recv() {
            sensor.push(s);
        }
        let mut uptime = Vec::new();
        while let Ok(u) = rx.uptime.try_recv() {
            uptime.push(u);
        }

        assert_eq!(sensor.len(), 20);
        assert!(sensor.windows(2).all(|w| w[1].timestamp_ms - w[0].timestamp_ms == 50));
        assert_eq!(uptime.len(), 1);
        assert_eq!(uptime[0].uptime_secs, 1);
    }
}
