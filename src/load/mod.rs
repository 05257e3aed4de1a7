use std::hint::black_box;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use crate::config::LoadConfig;
use crate::telemetry::stats::{PipelineEvent, PipelineStats};

/// Spin batches between voluntary yields inside a burst.
const YIELD_EVERY_BATCHES: u32 = 10;

/// Longest single sleep while idle, so a stop request is noticed promptly.
const IDLE_SLICE: Duration = Duration::from_millis(100);

/// Alternates random idle periods with random CPU-bound bursts.
///
/// Runs on a dedicated OS thread and never touches pipeline data; its only
/// effect is contention for the CPU.
pub struct LoadGenerator {
    cfg: LoadConfig,
    rng: StdRng,
    stats: Arc<PipelineStats>,
    stop: Arc<AtomicBool>,
}

impl LoadGenerator {
    pub fn new(cfg: LoadConfig, stats: Arc<PipelineStats>, stop: Arc<AtomicBool>) -> Self {
        Self {
            cfg,
            rng: StdRng::from_os_rng(),
            stats,
            stop,
        }
    }

    /// Use a fixed seed for the interval and burst draws.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    fn stopped(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    /// Uniform duration in `[min, max)`, or `min` when the range is empty.
    pub fn pick(&mut self, min: Duration, max: Duration) -> Duration {
        if min >= max {
            return min;
        }
        let lo = u64::try_from(min.as_micros()).unwrap_or(u64::MAX);
        let hi = u64::try_from(max.as_micros()).unwrap_or(u64::MAX);
        if lo >= hi {
            return min;
        }
        Duration::from_micros(self.rng.random_range(lo..hi))
    }

    /// Sleep for `idle`, returning early if stopped. Returns false if stopped.
    fn idle(&self, idle: Duration) -> bool {
        let deadline = Instant::now() + idle;
        loop {
            if self.stopped() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep((deadline - now).min(IDLE_SLICE));
        }
    }

    /// Busy-spin for `burst`, yielding the thread every few batches.
    ///
    /// Returns the time actually spent spinning.
    pub fn spin(&self, burst: Duration) -> Duration {
        let start = Instant::now();
        let mut acc = 0u64;
        let mut batches = 0u32;

        while start.elapsed() < burst && !self.stopped() {
            for i in 0..self.cfg.spin_batch {
                acc = black_box(acc.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(u64::from(i)));
            }
            batches = batches.wrapping_add(1);
            if batches % YIELD_EVERY_BATCHES == 0 {
                thread::yield_now();
            }
        }

        black_box(acc);
        start.elapsed()
    }

    /// Run one idle-then-burst cycle. Returns false once stopped.
    pub fn step(&mut self) -> bool {
        let idle = self.pick(self.cfg.interval_min, self.cfg.interval_max);
        if !self.idle(idle) {
            return false;
        }

        let burst = self.pick(self.cfg.burst_min, self.cfg.burst_max);
        debug!(
            idle_ms = idle.as_millis() as u64,
            burst_ms = burst.as_millis() as u64,
            "starting load burst"
        );

        let spent = self.spin(burst);
        self.stats.record(PipelineEvent::LoadBurst);
        self.stats
            .add_load_busy_ms(u64::try_from(spent.as_millis()).unwrap_or(u64::MAX));
        debug!(spent_ms = spent.as_millis() as u64, "load burst finished");

        !self.stopped()
    }

    /// Loop until the stop flag is set.
    pub fn run(mut self) {
        info!(
            interval_min = ?self.cfg.interval_min,
            interval_max = ?self.cfg.interval_max,
            burst_min = ?self.cfg.burst_min,
            burst_max = ?self.cfg.burst_max,
            "load generator started"
        );

        while self.step() {}

        info!(busy_ms = self.stats.load_busy_ms(), "load generator stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn short_config() -> LoadConfig {
        LoadConfig {
            enabled: true,
            interval_min: Duration::from_millis(1),
            interval_max: Duration::from_millis(3),
            burst_min: Duration::from_millis(2),
            burst_max: Duration::from_millis(5),
            spin_batch: 100,
        }
    }

    fn generator(cfg: LoadConfig) -> (LoadGenerator, Arc<PipelineStats>, Arc<AtomicBool>) {
        let stats = Arc::new(PipelineStats::new());
        let stop = Arc::new(AtomicBool::new(false));
        let generator =
            LoadGenerator::new(cfg, Arc::clone(&stats), Arc::clone(&stop)).with_seed(9);
        (generator, stats, stop)
    }

    #[test]
    fn test_pick_stays_in_range() {
        let (mut g, _, _) = generator(short_config());
        let min = Duration::from_millis(500);
        let max = Duration::from_millis(3_000);
        for _ in 0..1_000 {
            let d = g.pick(min, max);
            assert!(d >= min && d < max, "d={d:?}");
        }
    }

    #[test]
    fn test_pick_degenerate_range_returns_min() {
        let (mut g, _, _) = generator(short_config());
        let fixed = Duration::from_millis(40);
        assert_eq!(g.pick(fixed, fixed), fixed);
    }

    #[test]
    fn test_spin_runs_for_burst() {
        let (g, _, _) = generator(short_config());
        let spent = g.spin(Duration::from_millis(5));
        assert!(spent >= Duration::from_millis(5));
    }

    #[test]
    fn test_spin_stops_when_flag_set() {
        let (g, _, stop) = generator(short_config());
        stop.store(true, Ordering::Relaxed);
        let spent = g.spin(Duration::from_secs(10));
        assert!(spent < Duration::from_secs(1));
    }

    #[test]
    fn test_step_records_burst() {
        let (mut g, stats, _) = generator(short_config());
        assert!(g.step());
        assert_eq!(stats.snapshot(), vec![(PipelineEvent::LoadBurst, 1)]);
        assert!(stats.load_busy_ms() >= 2);
    }

    #[test]
    fn test_run_exits_on_stop() {
        let (g, stats, stop) = generator(short_config());
        let handle = thread::spawn(move || g.run());

        thread::sleep(Duration::from_millis(50));
        stop.store(true, Ordering::Relaxed);
        handle.join().expect("load thread");

        assert!(stats.load_busy_ms() > 0);
    }

    #[test]
    fn test_idle_interrupted_by_stop() {
        let mut cfg = short_config();
        cfg.interval_min = Duration::from_secs(30);
        cfg.interval_max = Duration::from_secs(30);
        let (g, stats, stop) = generator(cfg);

        let started = Instant::now();
        let handle = thread::spawn(move || g.run());
        thread::sleep(Duration::from_millis(20));
        stop.store(true, Ordering::Relaxed);
        handle.join().expect("load thread");

        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(stats.snapshot().is_empty());
    }
}
