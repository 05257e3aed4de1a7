use std::f64::consts::PI;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::telemetry::{SENSOR_MAX, SENSOR_MIN};

/// Samples per full sine period (5s at 20Hz).
pub const STEPS_PER_PERIOD: u32 = 100;

/// Peak noise magnitude added to each reading.
pub const NOISE_AMPLITUDE: i32 = 10;

/// Synthetic sensor producing a noisy sine wave in `[0, 100]`.
pub struct SineSensor {
    step: u32,
    rng: StdRng,
}

impl SineSensor {
    /// Sensor with OS-seeded noise.
    pub fn new() -> Self {
        Self {
            step: 0,
            rng: StdRng::from_os_rng(),
        }
    }

    /// Sensor with reproducible noise.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            step: 0,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Noise-free component for a given step.
    pub fn base_value(step: u32) -> i32 {
        let phase = f64::from(step % STEPS_PER_PERIOD) * 2.0 * PI / f64::from(STEPS_PER_PERIOD);
        // Truncates toward zero.
        (50.0 * phase.sin()) as i32 + 50
    }

    /// Next reading; advances the phase by one step.
    pub fn next_value(&mut self) -> i32 {
        let noise = self.rng.random_range(-NOISE_AMPLITUDE..=NOISE_AMPLITUDE);
        let value = (Self::base_value(self.step) + noise).clamp(SENSOR_MIN, SENSOR_MAX);
        self.step = self.step.wrapping_add(1);
        value
    }
}

impl Default for SineSensor {
    fn default() -> Self {
        Self::new()
    }
}
