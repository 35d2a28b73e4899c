use crate::sensor::reading::Reading;
use chrono::{DateTime, Utc};
use std::fs;
use std::net::{IpAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use sysinfo::{Disks, System};

const THERMAL_ZONE: &str = "/sys/class/thermal/thermal_zone0/temp";
const NET_CLASS: &str = "/sys/class/net";

/// Raw values produced by one sensor sample, before row composition
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SensorValues {
    pub temperature: f64,
    pub humidity: f64,
    pub pressure: f64,
    pub pitch: f64,
    pub roll: f64,
    pub yaw: f64,
    pub accel: [f64; 3],
    pub gyro: [f64; 3],
    pub mag: [f64; 3],
    pub compass: f64,
}

/// Host identity columns shared by every row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub hostname: String,
    pub ip_address: String,
    pub mac_address: String,
}

impl DeviceIdentity {
    pub fn detect() -> Self {
        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.to_str().map(|s| s.to_string()))
            .unwrap_or_else(|| "sensehat".to_string());

        let ip_address = resolve_ipv4(&hostname).unwrap_or_else(|| "127.0.0.1".to_string());
        let mac_address =
            first_mac_address(Path::new(NET_CLASS)).unwrap_or_else(|| "00:00:00:00:00:00".to_string());

        Self {
            hostname,
            ip_address,
            mac_address,
        }
    }
}

fn resolve_ipv4(hostname: &str) -> Option<String> {
    (hostname, 0)
        .to_socket_addrs()
        .ok()?
        .map(|addr| addr.ip())
        .find(IpAddr::is_ipv4)
        .map(|ip| ip.to_string())
}

/// First non-loopback interface address, by interface name order
fn first_mac_address(net_class: &Path) -> Option<String> {
    let mut interfaces: Vec<PathBuf> = fs::read_dir(net_class)
        .ok()?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.file_name().is_some_and(|name| name != "lo"))
        .collect();
    interfaces.sort();

    interfaces.iter().find_map(|iface| {
        let mac = fs::read_to_string(iface.join("address")).ok()?;
        let mac = mac.trim();
        (!mac.is_empty() && mac != "00:00:00:00:00:00").then(|| mac.to_string())
    })
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SystemMetrics {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub disk_usage_mb: f64,
    pub cpu_temp_c: f64,
}

impl SystemMetrics {
    pub fn cpu_temp_f(&self) -> f64 {
        self.cpu_temp_c * 9.0 / 5.0 + 32.0
    }
}

/// Samples CPU, memory, root disk usage and SoC temperature
pub struct SystemProbe {
    system: System,
    thermal_zone: PathBuf,
}

impl SystemProbe {
    pub fn new() -> Self {
        let mut system = System::new();
        // CPU usage is computed between two refreshes
        system.refresh_cpu_usage();
        Self {
            system,
            thermal_zone: PathBuf::from(THERMAL_ZONE),
        }
    }

    pub fn sample(&mut self) -> SystemMetrics {
        self.system.refresh_cpu_usage();
        self.system.refresh_memory();

        let total_memory = self.system.total_memory();
        let memory_percent = if total_memory > 0 {
            self.system.used_memory() as f64 / total_memory as f64 * 100.0
        } else {
            0.0
        };

        let disks = Disks::new_with_refreshed_list();
        let disk_usage_mb = disks
            .list()
            .iter()
            .find(|disk| disk.mount_point() == Path::new("/"))
            .map(|disk| {
                disk.total_space().saturating_sub(disk.available_space()) as f64
                    / (1024.0 * 1024.0)
            })
            .unwrap_or(0.0);

        let cpu_temp_c = fs::read_to_string(&self.thermal_zone)
            .ok()
            .and_then(|raw| raw.trim().parse::<f64>().ok())
            .map(|milli| milli / 1000.0)
            .unwrap_or(0.0);

        SystemMetrics {
            cpu_percent: self.system.global_cpu_usage() as f64,
            memory_percent,
            disk_usage_mb,
            cpu_temp_c,
        }
    }
}

impl Default for SystemProbe {
    fn default() -> Self {
        Self::new()
    }
}

pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Turns sensor values into rows that follow the table contract.
///
/// Capture timestamps never move backwards: if the wall clock steps back,
/// the previous capture time is reused.
pub struct RowComposer {
    identity: DeviceIdentity,
    simulated: bool,
    reading_count: u64,
    last_capture: Option<DateTime<Utc>>,
}

impl RowComposer {
    pub fn new(identity: DeviceIdentity, simulated: bool) -> Self {
        Self {
            identity,
            simulated,
            reading_count: 0,
            last_capture: None,
        }
    }

    pub fn reading_count(&self) -> u64 {
        self.reading_count
    }

    pub fn compose(
        &mut self,
        now: DateTime<Utc>,
        values: &SensorValues,
        system: &SystemMetrics,
    ) -> Reading {
        self.reading_count += 1;
        let captured_at = match self.last_capture {
            Some(last) if last > now => last,
            _ => now,
        };
        self.last_capture = Some(captured_at);

        let compact = captured_at.format("%Y%m%d%H%M%S").to_string();
        let id = uuid::Uuid::new_v4();

        Reading::builder(captured_at)
            .field(
                "uuid",
                format!(
                    "sensehat_{}_{}_{}",
                    self.identity.hostname, compact, self.reading_count
                ),
            )
            .field("rowid", format!("{}_{}", compact, id))
            .field("hostname", self.identity.hostname.as_str())
            .field("ipaddress", self.identity.ip_address.as_str())
            .field("macaddress", self.identity.mac_address.as_str())
            .field("ts", captured_at.timestamp())
            .field("datetimestamp", captured_at.to_rfc3339())
            .field(
                "systemtime",
                captured_at.format("%m/%d/%Y %H:%M:%S").to_string(),
            )
            .field("temperature", round_to(values.temperature, 2))
            .field("humidity", round_to(values.humidity, 2))
            .field("pressure", round_to(values.pressure, 2))
            .field("pitch", round_to(values.pitch, 2))
            .field("roll", round_to(values.roll, 2))
            .field("yaw", round_to(values.yaw, 2))
            .field("accel_x", round_to(values.accel[0], 4))
            .field("accel_y", round_to(values.accel[1], 4))
            .field("accel_z", round_to(values.accel[2], 4))
            .field("gyro_x", round_to(values.gyro[0], 4))
            .field("gyro_y", round_to(values.gyro[1], 4))
            .field("gyro_z", round_to(values.gyro[2], 4))
            .field("mag_x", round_to(values.mag[0], 4))
            .field("mag_y", round_to(values.mag[1], 4))
            .field("mag_z", round_to(values.mag[2], 4))
            .field("compass", round_to(values.compass, 2))
            .field("cpu_percent", round_to(system.cpu_percent, 1))
            .field("memory_percent", round_to(system.memory_percent, 1))
            .field("disk_usage_mb", round_to(system.disk_usage_mb, 1))
            .field("cputempc", round_to(system.cpu_temp_c, 1))
            .field("cputempf", round_to(system.cpu_temp_f(), 1))
            .field("simulated", self.simulated)
            .build_with_id(id)
    }
}
