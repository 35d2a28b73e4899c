pub mod device;
pub mod display;
pub mod hardware;
pub mod reading;
pub mod schema;
pub mod simulated;

use crate::config::types::SensorConfig;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{info, warn};

pub use display::LedMatrix;
pub use hardware::HardwareSensor;
pub use reading::{FieldValue, Reading, ReadingBuilder};
pub use simulated::SimulatedSensor;

#[derive(Debug, Error)]
pub enum SensorError {
    #[error("sensor device '{device}' unavailable: {message}")]
    Unavailable { device: String, message: String },

    #[error("failed to read {}: {message}", .path.display())]
    Read { path: PathBuf, message: String },
}

/// Ordered, pollable producer of readings.
///
/// The ingestion core only ever sees this trait; whether readings come from
/// hardware or a simulator is decided once in [`open_source`].
pub trait ReadingSource: Send {
    fn poll(&mut self) -> Result<Reading, SensorError>;

    fn is_simulated(&self) -> bool;

    /// Show a reading on the device's display, if it has one
    fn display(&mut self, _reading: &Reading) {}

    fn clear_display(&mut self) {}
}

/// Build the configured reading source.
///
/// Falls back to the simulator when the Sense HAT cannot be opened.
pub fn open_source(config: &SensorConfig) -> Box<dyn ReadingSource> {
    if config.simulate {
        info!("Running in simulation mode");
        return Box::new(SimulatedSensor::new(config.seed));
    }

    match HardwareSensor::open() {
        Ok(sensor) if config.display => match LedMatrix::open() {
            Ok(led) => Box::new(sensor.with_led(led)),
            Err(e) => {
                warn!(error = %e, "LED matrix unavailable, display disabled");
                Box::new(sensor)
            }
        },
        Ok(sensor) => Box::new(sensor),
        Err(e) => {
            warn!(error = %e, "Failed to open Sense HAT, using simulation");
            Box::new(SimulatedSensor::new(config.seed))
        }
    }
}
