//! Accelerometer drivers

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::protocol::Sample;

/// Reading one-g on the z axis at the ADC's default gain
const ONE_G: i16 = 16384;

/// Trait for whatever produces (x, y, z) readings
pub trait SensorDriver {
    fn sample(&mut self) -> Sample;
}

/// Seeded stand-in for an accelerometer at rest: gravity on z plus noise
#[derive(Debug)]
pub struct SyntheticSensor {
    rng: ChaCha8Rng,
    noise: i16,
}

impl SyntheticSensor {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            noise: 64,
        }
    }

    fn jitter(&mut self) -> i16 {
        self.rng.gen_range(-self.noise..=self.noise)
    }
}

impl SensorDriver for SyntheticSensor {
    fn sample(&mut self) -> Sample {
        Sample {
            x: self.jitter(),
            y: self.jitter(),
            z: ONE_G + self.jitter(),
        }
    }
}
