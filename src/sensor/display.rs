use crate::sensor::reading::{FieldValue, Reading};
use crate::sensor::SensorError;
use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

const GRAPHICS_CLASS: &str = "/sys/class/graphics";
const DEV_ROOT: &str = "/dev";
const FRAMEBUFFER_NAME: &str = "RPi-Sense FB";
const PIXELS: usize = 64;
const DEFAULT_TEMPERATURE: f64 = 20.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Rgb {
    pub const OFF: Rgb = Rgb(0, 0, 0);
    pub const BLUE: Rgb = Rgb(0, 0, 255);
    pub const GREEN: Rgb = Rgb(0, 255, 0);
    pub const YELLOW: Rgb = Rgb(255, 255, 0);
    pub const RED: Rgb = Rgb(255, 0, 0);

    /// Pixel format of the Sense HAT framebuffer
    pub fn to_rgb565(self) -> u16 {
        let Rgb(r, g, b) = self;
        (((r as u16) >> 3) << 11) | (((g as u16) >> 2) << 5) | ((b as u16) >> 3)
    }
}

/// Colour band for a temperature in degrees C
pub fn temperature_colour(celsius: f64) -> Rgb {
    if celsius < 15.0 {
        Rgb::BLUE
    } else if celsius < 25.0 {
        Rgb::GREEN
    } else if celsius < 30.0 {
        Rgb::YELLOW
    } else {
        Rgb::RED
    }
}

/// The 8x8 LED matrix, driven through its framebuffer device
#[derive(Debug)]
pub struct LedMatrix {
    path: PathBuf,
    file: File,
}

impl LedMatrix {
    pub fn open() -> Result<Self, SensorError> {
        Self::open_at(Path::new(GRAPHICS_CLASS), Path::new(DEV_ROOT))
    }

    /// Find the framebuffer whose `name` is the Sense HAT's and open its
    /// device node under `dev_root`.
    pub fn open_at(class_root: &Path, dev_root: &Path) -> Result<Self, SensorError> {
        let unavailable = |message: String| SensorError::Unavailable {
            device: FRAMEBUFFER_NAME.to_string(),
            message,
        };

        let entries = fs::read_dir(class_root)
            .map_err(|e| unavailable(format!("cannot list {}: {}", class_root.display(), e)))?;

        for entry in entries.flatten() {
            let name = fs::read_to_string(entry.path().join("name")).unwrap_or_default();
            if name.trim() != FRAMEBUFFER_NAME {
                continue;
            }

            let path = dev_root.join(entry.file_name());
            let file = OpenOptions::new()
                .write(true)
                .open(&path)
                .map_err(|e| unavailable(format!("cannot open {}: {}", path.display(), e)))?;
            debug!(path = %path.display(), "Found LED matrix");
            return Ok(Self { path, file });
        }

        Err(unavailable(format!(
            "no framebuffer named '{}' under {}",
            FRAMEBUFFER_NAME,
            class_root.display()
        )))
    }

    pub fn fill(&mut self, colour: Rgb) -> Result<(), SensorError> {
        let pixel = colour.to_rgb565().to_le_bytes();
        let frame: Vec<u8> = pixel.iter().copied().cycle().take(PIXELS * 2).collect();

        self.file
            .seek(SeekFrom::Start(0))
            .and_then(|_| self.file.write_all(&frame))
            .and_then(|_| self.file.flush())
            .map_err(|e| SensorError::Read {
                path: self.path.clone(),
                message: e.to_string(),
            })
    }

    pub fn clear(&mut self) -> Result<(), SensorError> {
        self.fill(Rgb::OFF)
    }

    /// Light the whole matrix in the reading's temperature band
    pub fn show_reading(&mut self, reading: &Reading) -> Result<(), SensorError> {
        let celsius = match reading.get("temperature") {
            Some(FieldValue::Number(t)) => *t,
            Some(FieldValue::Integer(t)) => *t as f64,
            _ => DEFAULT_TEMPERATURE,
        };
        self.fill(temperature_colour(celsius))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::TempDir;

    /// A graphics class dir with an unrelated fb0 and the Sense HAT on fb1
    pub(crate) fn fake_framebuffers() -> TempDir {
        let dir = TempDir::new().unwrap();
        for (fb, name) in [("fb0", "BCM2708 FB"), ("fb1", FRAMEBUFFER_NAME)] {
            let class = dir.path().join("class").join(fb);
            fs::create_dir_all(&class).unwrap();
            fs::write(class.join("name"), format!("{}\n", name)).unwrap();
        }
        fs::create_dir_all(dir.path().join("dev")).unwrap();
        fs::write(dir.path().join("dev/fb0"), b"").unwrap();
        fs::write(dir.path().join("dev/fb1"), b"").unwrap();
        dir
    }

    pub(crate) fn open_fake(dir: &TempDir) -> LedMatrix {
        LedMatrix::open_at(&dir.path().join("class"), &dir.path().join("dev")).unwrap()
    }

    pub(crate) fn frame(dir: &TempDir) -> Vec<u8> {
        fs::read(dir.path().join("dev/fb1")).unwrap()
    }

    #[test]
    fn test_temperature_bands() {
        assert_eq!(temperature_colour(-5.0), Rgb::BLUE);
        assert_eq!(temperature_colour(14.9), Rgb::BLUE);
        assert_eq!(temperature_colour(15.0), Rgb::GREEN);
        assert_eq!(temperature_colour(25.0), Rgb::YELLOW);
        assert_eq!(temperature_colour(30.0), Rgb::RED);
    }

    #[test]
    fn test_rgb565_packing() {
        assert_eq!(Rgb::RED.to_rgb565(), 0xF800);
        assert_eq!(Rgb::GREEN.to_rgb565(), 0x07E0);
        assert_eq!(Rgb::BLUE.to_rgb565(), 0x001F);
        assert_eq!(Rgb::OFF.to_rgb565(), 0);
    }

    #[test]
    fn test_fill_then_clear_overwrites_frame() {
        let dir = fake_framebuffers();
        let mut led = open_fake(&dir);

        led.fill(Rgb::RED).unwrap();
        let lit = frame(&dir);
        assert_eq!(lit.len(), PIXELS * 2);
        assert!(lit.chunks(2).all(|px| px == [0x00, 0xF8]));
        assert!(fs::read(dir.path().join("dev/fb0")).unwrap().is_empty());

        led.clear().unwrap();
        let cleared = frame(&dir);
        assert_eq!(cleared.len(), PIXELS * 2);
        assert!(cleared.iter().all(|b| *b == 0));
    }

    #[test]
    fn test_missing_framebuffer_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let err = LedMatrix::open_at(dir.path(), dir.path()).unwrap_err();
        assert!(matches!(err, SensorError::Unavailable { .. }));
    }
}
