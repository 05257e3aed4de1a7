use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::telemetry::stats::{PipelineEvent, PipelineStats};
use crate::telemetry::Trigger;

/// Non-blocking notification stage between periodic timers and the producer.
///
/// Timer contexts only enqueue a [`Trigger`]; all sampling happens in the
/// producer task that owns the receiving end.
#[derive(Clone)]
pub struct TriggerDispatch {
    tx: mpsc::Sender<Trigger>,
    stats: Arc<PipelineStats>,
}

impl TriggerDispatch {
    /// Creates a dispatch stage with a bounded trigger channel.
    pub fn channel(depth: usize, stats: Arc<PipelineStats>) -> (Self, mpsc::Receiver<Trigger>) {
        let (tx, rx) = mpsc::channel(depth.max(1));
        (Self { tx, stats }, rx)
    }

    /// Enqueue a trigger without waiting. Returns false if it was dropped.
    pub fn notify(&self, trigger: Trigger) -> bool {
        match self.tx.try_send(trigger) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(trigger = %trigger, "trigger queue full, dropping trigger");
                self.stats.record(match trigger {
                    Trigger::Sensor => PipelineEvent::SensorTriggerDropped,
                    Trigger::Uptime => PipelineEvent::UptimeTriggerDropped,
                });
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(trigger = %trigger, "trigger queue closed");
                false
            }
        }
    }

    /// Spawn a periodic timer that notifies `trigger` every `period`.
    ///
    /// The first notification fires one period after the call. Ticks missed
    /// under load are skipped rather than replayed in a burst.
    pub fn spawn_timer(
        &self,
        trigger: Trigger,
        period: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let dispatch = self.clone();
        let start = tokio::time::Instant::now() + period;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(start, period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!(trigger = %trigger, "trigger timer stopped");
                        return;
                    }
                    _ = ticker.tick() => {
                        dispatch.notify(trigger);
                    }
                }
            }
        })
    }
}
