use anyhow::{ensure, Context};
use serde_derive::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

pub const HOUSE_SENSOR: &str = "HouseSensor";
pub const SOLAR_SENSOR: &str = "SolarSensor";

/// Settings shared by the poller and the uploader, read from `config.xml`.
///
/// ```xml
/// <config>
///   <serialport>/dev/ttyUSB0</serialport>
///   <apikey>...</apikey>
///   <systemid>12345</systemid>
///   <host>pvoutput.org</host>
///   <service>/service/r2/addstatus.jsp</service>
///   <scriptpath>/mnt/sda1/</scriptpath>
///   <sensors>
///     <sensor index="0">HouseSensor</sensor>
///     <sensor index="1">SolarSensor</sensor>
///   </sensors>
/// </config>
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(rename = "serialport", default)]
    pub serial_port: String,
    #[serde(rename = "baudrate", default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(rename = "apikey", default)]
    pub api_key: String,
    #[serde(rename = "systemid", default)]
    pub system_id: String,
    /// Only kept for reference, PVOutput identifies the system by `systemid`
    #[serde(default)]
    pub feed: Option<String>,
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_service")]
    pub service: String,
    /// Prefix for the daily CSV files, usually a directory ending in `/`
    #[serde(rename = "scriptpath", default)]
    pub script_path: String,
    #[serde(rename = "bridgeurl", default = "default_bridge_url")]
    pub bridge_url: String,
    #[serde(rename = "solarthreshold", default = "default_solar_threshold")]
    pub solar_threshold_watts: i64,
    #[serde(rename = "framedeadline", default)]
    pub frame_deadline_secs: Option<u64>,
    #[serde(default)]
    sensors: Option<SensorList>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct SensorList {
    #[serde(rename = "sensor", default)]
    entries: Vec<SensorEntry>,
}

#[derive(Debug, Clone, Deserialize)]
struct SensorEntry {
    #[serde(rename = "@index")]
    index: u32,
    #[serde(rename = "$text")]
    name: String,
}

fn default_baud_rate() -> u32 {
    57600
}

fn default_service() -> String {
    "/service/r2/addstatus.jsp".into()
}

fn default_bridge_url() -> String {
    "http://localhost".into()
}

fn default_solar_threshold() -> i64 {
    70
}

impl Config {
    /// Load the XML config from disk and validate it.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, anyhow::Error> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_xml(&raw).with_context(|| format!("invalid config file {}", path.display()))
    }

    pub fn from_xml(raw: &str) -> Result<Self, anyhow::Error> {
        let cfg: Self = quick_xml::de::from_str(raw)?;
        ensure!(cfg.baud_rate > 0, "baudrate must be positive");
        // Surface sensor mapping problems at load time rather than on the first frame
        cfg.sensor_identity()?;
        Ok(cfg)
    }

    /// The configured sensor mapping, or the default house/solar pair.
    pub fn sensor_identity(&self) -> Result<SensorIdentity, anyhow::Error> {
        match &self.sensors {
            Some(list) if !list.entries.is_empty() => SensorIdentity::new(
                list.entries
                    .iter()
                    .map(|entry| (entry.index, entry.name.trim().to_string())),
            ),
            _ => Ok(SensorIdentity::default()),
        }
    }

    pub fn frame_deadline(&self) -> Option<Duration> {
        self.frame_deadline_secs.map(Duration::from_secs)
    }
}

/// Maps the sensor number reported by the monitor to a logical name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorIdentity {
    names: BTreeMap<u32, String>,
}

impl SensorIdentity {
    pub fn new(entries: impl IntoIterator<Item = (u32, String)>) -> Result<Self, anyhow::Error> {
        let mut names = BTreeMap::new();
        for (index, name) in entries {
            ensure!(!name.is_empty(), "sensor {index} has an empty name");
            ensure!(
                names.insert(index, name).is_none(),
                "sensor {index} is configured more than once"
            );
        }
        ensure!(!names.is_empty(), "at least one sensor must be configured");
        Ok(Self { names })
    }

    pub fn name(&self, index: u32) -> Option<&str> {
        self.names.get(&index).map(String::as_str)
    }

    pub fn is_solar(&self, index: u32) -> bool {
        self.name(index) == Some(SOLAR_SENSOR)
    }

    pub fn is_house(&self, index: u32) -> bool {
        self.name(index) == Some(HOUSE_SENSOR)
    }
}

impl Default for SensorIdentity {
    fn default() -> Self {
        Self {
            names: BTreeMap::from([
                (0, HOUSE_SENSOR.to_string()),
                (1, SOLAR_SENSOR.to_string()),
            ]),
        }
    }
}
