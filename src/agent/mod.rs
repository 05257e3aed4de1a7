use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::aggregator::{Aggregator, AggregatorSettings};
use crate::clock::{self, Clock};
use crate::config::Config;
use crate::export::health::HealthMetrics;
use crate::load::LoadGenerator;
use crate::producer::synth::SineSensor;
use crate::producer::{sample_queues, Producer, ProducerRates};
use crate::sched;
use crate::sink::{ConsoleSink, FrameSink};
use crate::telemetry::stats::PipelineStats;
use crate::telemetry::StatusReport;

const AGGREGATOR_THREAD: &str = "tlm-aggregator";
const PRODUCER_THREAD: &str = "tlm-producer";
const LOAD_THREAD: &str = "tlm-load";

/// Agent wires the queues, pipeline threads, status monitor and optional
/// health server, and owns shutdown.
pub struct Agent {
    cfg: Config,
    stats: Arc<PipelineStats>,
    health: Option<Arc<HealthMetrics>>,
    frame_sink: Option<FrameSink>,
    status_out: Option<ConsoleSink>,
    cancel: CancellationToken,
    load_stop: Arc<AtomicBool>,
    threads: Vec<(&'static str, JoinHandle<Result<()>>)>,
    monitor: Option<tokio::task::JoinHandle<()>>,
}

impl Agent {
    /// Creates a new Agent, initializing health metrics when enabled.
    pub fn new(cfg: Config) -> Result<Self> {
        cfg.validate().context("validating config")?;

        let health = if cfg.health.enabled {
            Some(Arc::new(
                HealthMetrics::new(&cfg.health.addr).context("creating health metrics")?,
            ))
        } else {
            None
        };

        Ok(Self {
            cfg,
            stats: Arc::new(PipelineStats::new()),
            health,
            frame_sink: None,
            status_out: None,
            cancel: CancellationToken::new(),
            load_stop: Arc::new(AtomicBool::new(false)),
            threads: Vec::new(),
            monitor: None,
        })
    }

    /// Send frames somewhere other than stdout.
    pub fn with_frame_sink(mut self, sink: FrameSink) -> Self {
        self.frame_sink = Some(sink);
        self
    }

    /// Write status lines somewhere other than stdout.
    pub fn with_status_output(mut self, out: ConsoleSink) -> Self {
        self.status_out = Some(out);
        self
    }

    pub fn stats(&self) -> Arc<PipelineStats> {
        Arc::clone(&self.stats)
    }

    pub fn health(&self) -> Option<Arc<HealthMetrics>> {
        self.health.clone()
    }

    /// Start all components.
    ///
    /// If any component fails to start, everything already running is torn
    /// down before the error is returned.
    pub async fn start(&mut self) -> Result<()> {
        if let Err(e) = self.start_components().await {
            error!(error = %e, "startup failed, stopping started components");
            if let Err(stop_err) = self.stop().await {
                error!(error = %stop_err, "stopping after failed startup");
            }
            return Err(e);
        }

        Ok(())
    }

    async fn start_components(&mut self) -> Result<()> {
        // 0. Health server first so health checks respond while the pipeline spins up.
        if let Some(health) = &self.health {
            health
                .start()
                .await
                .context("starting health metrics server")?;
        }

        // 1. Shared clock and queues.
        let clock = Clock::start();
        let start_ms = clock.now_ms();
        let (senders, receivers) = sample_queues(
            self.cfg.producer.sensor_queue_depth,
            self.cfg.producer.uptime_queue_depth,
        );

        // 2. Aggregator thread.
        let frame_sink = self
            .frame_sink
            .take()
            .unwrap_or_else(|| FrameSink::stdout(self.cfg.sink.format));
        let mut aggregator = Aggregator::new(
            AggregatorSettings::from_config(&self.cfg),
            clock,
            start_ms,
            receivers,
            frame_sink,
            Arc::clone(&self.stats),
        )
        .context("building frame schedule")?;
        if let Some(health) = &self.health {
            aggregator = aggregator.with_metrics(Arc::clone(health));
        }

        let handle = sched::spawn_runtime_thread(
            AGGREGATOR_THREAD,
            self.cfg.priorities.aggregator,
            aggregator.run(self.cancel.child_token()),
        )?;
        self.threads.push((AGGREGATOR_THREAD, handle));

        // 3. Producer thread with its sampling timers.
        let sensor = match self.cfg.producer.seed {
            Some(seed) => SineSensor::with_seed(seed),
            None => SineSensor::new(),
        };
        let producer = Producer::new(clock, start_ms, sensor, senders, Arc::clone(&self.stats));
        let rates = ProducerRates {
            sensor: self.cfg.producer.sensor_interval,
            uptime: self.cfg.producer.uptime_interval,
        };

        let handle = sched::spawn_runtime_thread(
            PRODUCER_THREAD,
            self.cfg.priorities.producer,
            producer.run_with_timers(rates, self.cfg.trigger_queue_depth(), self.cancel.child_token()),
        )?;
        self.threads.push((PRODUCER_THREAD, handle));

        // 4. Load generator thread.
        if self.cfg.load.enabled {
            let generator = LoadGenerator::new(
                self.cfg.load.clone(),
                Arc::clone(&self.stats),
                Arc::clone(&self.load_stop),
            );
            let handle = sched::spawn_named(LOAD_THREAD, self.cfg.priorities.load_generator, move || {
                generator.run();
                Ok(())
            })?;
            self.threads.push((LOAD_THREAD, handle));
        } else {
            info!("load generator disabled");
        }

        // 5. Status monitor on the main runtime.
        let out = self
            .status_out
            .take()
            .unwrap_or_else(|| ConsoleSink::stdout(self.cfg.sink.format));
        self.monitor = Some(tokio::spawn(run_status_monitor(
            self.cfg.status_interval,
            clock,
            start_ms,
            Arc::clone(&self.stats),
            self.health.clone(),
            out,
            self.cancel.child_token(),
        )));

        info!(
            frame_interval = ?self.cfg.aggregator.frame_interval,
            sensor_interval = ?self.cfg.producer.sensor_interval,
            uptime_interval = ?self.cfg.producer.uptime_interval,
            "telemetry pipeline started"
        );

        Ok(())
    }

    /// Stop all components and wait for the pipeline threads to exit.
    pub async fn stop(&mut self) -> Result<()> {
        // Signal all tasks and threads to stop.
        self.cancel.cancel();
        self.load_stop.store(true, Ordering::Relaxed);

        if let Some(monitor) = self.monitor.take() {
            if let Err(e) = monitor.await {
                error!(error = %e, "status monitor task failed");
            }
        }

        for (name, handle) in self.threads.drain(..) {
            let joined = tokio::task::spawn_blocking(move || sched::join_thread(name, handle))
                .await
                .context("joining pipeline thread")?;

            match joined {
                Ok(Ok(())) => debug!(thread = name, "pipeline thread exited"),
                Ok(Err(e)) | Err(e) => error!(thread = name, error = %e, "pipeline thread failed"),
            }
        }

        if let Some(health) = &self.health {
            health.stop();
        }

        info!(frames = self.stats.frames_total(), "telemetry pipeline stopped");

        Ok(())
    }
}

/// Periodically print the status line and publish stats snapshots.
async fn run_status_monitor(
    interval: Duration,
    clock: Clock,
    start_ms: i64,
    stats: Arc<PipelineStats>,
    health: Option<Arc<HealthMetrics>>,
    mut out: ConsoleSink,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {
                let uptime_secs = clock::uptime_secs(start_ms, clock.now_ms());
                out.write_status(&StatusReport {
                    frames_total: stats.frames_total(),
                    uptime_secs,
                });

                let snapshot = stats.snapshot();

                if let Some(health) = &health {
                    health.observe_events(&snapshot);
                    health.frames_total.set(stats.frames_total() as f64);
                    health.load_busy_seconds.set(stats.load_busy_ms() as f64 / 1000.0);
                    health.uptime_seconds.set(f64::from(uptime_secs));
                }

                let total: u64 = snapshot.iter().map(|(_, n)| n).sum();
                if total == 0 {
                    continue;
                }

                info!(events = total, "pipeline events since last status");

                for (event, count) in &snapshot {
                    debug!(event = %event, count, "  by kind");
                }
            }
        }
    }
}
