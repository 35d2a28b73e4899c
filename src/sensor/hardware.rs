use crate::sensor::device::{DeviceIdentity, RowComposer, SensorValues, SystemProbe};
use crate::sensor::display::LedMatrix;
use crate::sensor::reading::Reading;
use crate::sensor::{ReadingSource, SensorError};
use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const IIO_DEVICES: &str = "/sys/bus/iio/devices";
const STANDARD_GRAVITY: f64 = 9.806_65;

/// One Linux industrial-I/O device exposed through sysfs
#[derive(Debug, Clone)]
struct IioDevice {
    path: PathBuf,
}

impl IioDevice {
    /// Find a device by the contents of its `name` attribute
    fn find(root: &Path, name: &str) -> Result<Self, SensorError> {
        let entries = fs::read_dir(root).map_err(|e| SensorError::Unavailable {
            device: name.to_string(),
            message: format!("cannot list {}: {}", root.display(), e),
        })?;

        for entry in entries.flatten() {
            let path = entry.path();
            let device_name = fs::read_to_string(path.join("name")).unwrap_or_default();
            if device_name.trim() == name {
                debug!(device = name, path = %path.display(), "Found IIO device");
                return Ok(Self { path });
            }
        }

        Err(SensorError::Unavailable {
            device: name.to_string(),
            message: format!("no IIO device named '{}' under {}", name, root.display()),
        })
    }

    fn read_attr(&self, attr: &str) -> Result<Option<f64>, SensorError> {
        let path = self.path.join(attr);
        match fs::read_to_string(&path) {
            Ok(raw) => raw
                .trim()
                .parse::<f64>()
                .map(Some)
                .map_err(|_| SensorError::Read {
                    path: path.clone(),
                    message: format!("not a number: '{}'", raw.trim()),
                }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SensorError::Read {
                path,
                message: e.to_string(),
            }),
        }
    }

    /// Processed channel value: (raw + offset) * scale.
    ///
    /// `channel` is e.g. `accel_x`; the scale may be per channel or shared
    /// by the channel type (`in_accel_scale`).
    fn channel(&self, channel: &str) -> Result<f64, SensorError> {
        let raw = self
            .read_attr(&format!("in_{}_raw", channel))?
            .ok_or_else(|| SensorError::Read {
                path: self.path.join(format!("in_{}_raw", channel)),
                message: "channel not present".to_string(),
            })?;

        let channel_type = channel.split('_').next().unwrap_or(channel);
        let offset = match self.read_attr(&format!("in_{}_offset", channel))? {
            Some(offset) => offset,
            None => self
                .read_attr(&format!("in_{}_offset", channel_type))?
                .unwrap_or(0.0),
        };
        let scale = match self.read_attr(&format!("in_{}_scale", channel))? {
            Some(scale) => scale,
            None => self
                .read_attr(&format!("in_{}_scale", channel_type))?
                .unwrap_or(1.0),
        };

        Ok((raw + offset) * scale)
    }

    fn axes(&self, channel_type: &str) -> Result<[f64; 3], SensorError> {
        Ok([
            self.channel(&format!("{}_x", channel_type))?,
            self.channel(&format!("{}_y", channel_type))?,
            self.channel(&format!("{}_z", channel_type))?,
        ])
    }
}

/// Sense HAT sensors read through the kernel IIO drivers
/// (HTS221 humidity, LPS25H pressure, LSM9DS1 IMU).
pub struct HardwareSensor {
    humidity: IioDevice,
    pressure: IioDevice,
    accel: IioDevice,
    gyro: IioDevice,
    magn: IioDevice,
    composer: RowComposer,
    probe: SystemProbe,
    led: Option<LedMatrix>,
}

impl HardwareSensor {
    pub fn open() -> Result<Self, SensorError> {
        Self::open_at(Path::new(IIO_DEVICES), DeviceIdentity::detect())
    }

    pub fn open_at(root: &Path, identity: DeviceIdentity) -> Result<Self, SensorError> {
        let sensor = Self {
            humidity: IioDevice::find(root, "hts221")?,
            pressure: IioDevice::find(root, "lps25h")?,
            accel: IioDevice::find(root, "lsm9ds1_accel")?,
            gyro: IioDevice::find(root, "lsm9ds1_gyro")?,
            magn: IioDevice::find(root, "lsm9ds1_magn")?,
            composer: RowComposer::new(identity, false),
            probe: SystemProbe::new(),
            led: None,
        };
        info!("Sense HAT initialized");
        Ok(sensor)
    }

    pub fn with_led(mut self, led: LedMatrix) -> Self {
        self.led = Some(led);
        self
    }

    fn sample_values(&self) -> Result<SensorValues, SensorError> {
        // IIO units: milli degrees C, milli percent, kPa, m/s^2, rad/s, gauss
        let temperature = self.humidity.channel("temp")? / 1000.0;
        let humidity = self.humidity.channel("humidityrelative")? / 1000.0;
        let pressure = self.pressure.channel("pressure")? * 10.0;

        let accel_ms2 = self.accel.axes("accel")?;
        let accel = accel_ms2.map(|v| v / STANDARD_GRAVITY);
        let gyro = self.gyro.axes("anglvel")?;
        // Gauss to microtesla
        let mag = self.magn.axes("magn")?.map(|v| v * 100.0);

        let (pitch, roll) = tilt_degrees(accel);
        let compass = heading_degrees(mag);

        Ok(SensorValues {
            temperature,
            humidity,
            pressure,
            pitch,
            roll,
            yaw: compass,
            accel,
            gyro,
            mag,
            compass,
        })
    }
}

/// Pitch and roll from the gravity vector, in degrees
fn tilt_degrees(accel: [f64; 3]) -> (f64, f64) {
    let [x, y, z] = accel;
    let pitch = (-x).atan2((y * y + z * z).sqrt()).to_degrees();
    let roll = y.atan2(z).to_degrees();
    (pitch, roll)
}

/// Magnetic heading in [0, 360) degrees
fn heading_degrees(mag: [f64; 3]) -> f64 {
    let heading = mag[1].atan2(mag[0]).to_degrees();
    if heading < 0.0 {
        heading + 360.0
    } else {
        heading
    }
}

impl ReadingSource for HardwareSensor {
    fn poll(&mut self) -> Result<Reading, SensorError> {
        let values = self.sample_values()?;
        let system = self.probe.sample();
        Ok(self.composer.compose(Utc::now(), &values, &system))
    }

    fn is_simulated(&self) -> bool {
        false
    }

    fn display(&mut self, reading: &Reading) {
        if let Some(led) = self.led.as_mut() {
            if let Err(e) = led.show_reading(reading) {
                debug!(error = %e, "LED update failed");
            }
        }
    }

    fn clear_display(&mut self) {
        if let Some(led) = self.led.as_mut() {
            if let Err(e) = led.clear() {
                warn!(error = %e, "Failed to clear LED matrix");
            }
        }
    }
}
