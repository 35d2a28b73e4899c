use crate::sensor::device::{DeviceIdentity, RowComposer, SensorValues, SystemProbe};
use crate::sensor::reading::Reading;
use crate::sensor::{ReadingSource, SensorError};
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Generates plausible Sense HAT readings without hardware.
///
/// With a fixed seed and clock the generated sensor values are reproducible.
pub struct SimulatedSensor {
    rng: StdRng,
    composer: RowComposer,
    probe: Option<SystemProbe>,
    clock: Box<dyn FnMut() -> DateTime<Utc> + Send>,
}

impl SimulatedSensor {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        Self {
            rng,
            composer: RowComposer::new(DeviceIdentity::detect(), true),
            probe: Some(SystemProbe::new()),
            clock: Box::new(Utc::now),
        }
    }

    /// Fully deterministic variant: fixed identity, no host metrics, caller clock
    pub fn with_clock(
        seed: u64,
        identity: DeviceIdentity,
        clock: impl FnMut() -> DateTime<Utc> + Send + 'static,
    ) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            composer: RowComposer::new(identity, true),
            probe: None,
            clock: Box::new(clock),
        }
    }

    fn gaussian(&mut self, mean: f64, std_dev: f64) -> f64 {
        // Box-Muller; u1 is kept away from zero for the logarithm
        let u1: f64 = self.rng.random_range(f64::EPSILON..1.0);
        let u2: f64 = self.rng.random();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        mean + z * std_dev
    }

    fn sample_values(&mut self) -> SensorValues {
        SensorValues {
            temperature: self.gaussian(22.0, 2.0),
            humidity: self.gaussian(45.0, 5.0).clamp(0.0, 100.0),
            pressure: self.gaussian(1013.25, 5.0),
            pitch: self.rng.random_range(-5.0..5.0),
            roll: self.rng.random_range(-5.0..5.0),
            yaw: self.rng.random_range(0.0..360.0),
            accel: [
                self.gaussian(0.0, 0.1),
                self.gaussian(0.0, 0.1),
                self.gaussian(1.0, 0.05),
            ],
            gyro: [
                self.gaussian(0.0, 1.0),
                self.gaussian(0.0, 1.0),
                self.gaussian(0.0, 1.0),
            ],
            mag: [
                self.gaussian(20.0, 5.0),
                self.gaussian(-10.0, 5.0),
                self.gaussian(-50.0, 10.0),
            ],
            compass: self.rng.random_range(0.0..360.0),
        }
    }
}

impl ReadingSource for SimulatedSensor {
    fn poll(&mut self) -> Result<Reading, SensorError> {
        let values = self.sample_values();
        let system = self
            .probe
            .as_mut()
            .map(SystemProbe::sample)
            .unwrap_or_default();
        let now = (self.clock)();
        Ok(self.composer.compose(now, &values, &system))
    }

    fn is_simulated(&self) -> bool {
        true
    }
}

impl std::fmt::Debug for SimulatedSensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedSensor")
            .field("readings", &self.composer.reading_count())
            .finish()
    }
}
