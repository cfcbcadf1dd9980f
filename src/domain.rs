//! ==============================================================================
//! domain.rs - shared data model
//! ==============================================================================
//!
//! purpose:
//!     the types that flow between the backend registry, the mqtt feed, the
//!     aggregation engine and the web dashboard.
//!
//! relationships:
//!     - read from: registry.rs (devices, containments, cameras, sensor records)
//!     - built by: engine.rs (realtime data, groups, averages, summary)
//!     - served by: web.rs (json api, html dashboard)
//!
//! ==============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;

// ==============================================================================
// sensor type & status
// ==============================================================================

/// static sensor category of a device; decides which group it lands in
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum SensorType {
    Temperature,
    #[serde(rename = "Air Flow")]
    AirFlow,
    Vibration,
    #[serde(rename = "Dust Sensor")]
    DustSensor,
    Humidity,
    Pressure,
    Unknown,
}

impl SensorType {
    pub const ALL: [SensorType; 7] = [
        SensorType::Temperature,
        SensorType::AirFlow,
        SensorType::Vibration,
        SensorType::DustSensor,
        SensorType::Humidity,
        SensorType::Pressure,
        SensorType::Unknown,
    ];

    /// display name, as stored by the backend
    pub fn name(self) -> &'static str {
        match self {
            SensorType::Temperature => "Temperature",
            SensorType::AirFlow => "Air Flow",
            SensorType::Vibration => "Vibration",
            SensorType::DustSensor => "Dust Sensor",
            SensorType::Humidity => "Humidity",
            SensorType::Pressure => "Pressure",
            SensorType::Unknown => "Unknown",
        }
    }

    /// declared unit of the sensor type's principal metric
    pub fn unit(self) -> &'static str {
        match self {
            SensorType::Temperature => "°C",
            SensorType::AirFlow => "L/min",
            SensorType::Vibration => "m/s²",
            SensorType::DustSensor => "µg/m³",
            SensorType::Humidity => "%",
            SensorType::Pressure => "hPa",
            SensorType::Unknown => "",
        }
    }

    /// case-insensitive lookup by display name; anything unrecognised is `Unknown`
    pub fn from_name(name: &str) -> Self {
        Self::from_known_name(name).unwrap_or(SensorType::Unknown)
    }

    /// like `from_name`, but only exact display names (including "Unknown") match
    pub fn from_known_name(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL
            .into_iter()
            .find(|t| t.name().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for SensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorStatus {
    Normal,
    Warning,
    Critical,
    Offline,
}

impl SensorStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SensorStatus::Normal => "normal",
            SensorStatus::Warning => "warning",
            SensorStatus::Critical => "critical",
            SensorStatus::Offline => "offline",
        }
    }

    /// worst-case-wins: critical if any is critical, else warning if any is
    /// warning, else normal. offline entries are ignored.
    pub fn worst_of<I: IntoIterator<Item = SensorStatus>>(statuses: I) -> SensorStatus {
        let mut worst = SensorStatus::Normal;
        for status in statuses {
            match status {
                SensorStatus::Critical => return SensorStatus::Critical,
                SensorStatus::Warning => worst = SensorStatus::Warning,
                SensorStatus::Normal | SensorStatus::Offline => {}
            }
        }
        worst
    }
}

impl fmt::Display for SensorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ==============================================================================
// payload
// ==============================================================================

/// a sensor message as received
///
/// `Object` is a parsed json object with arbitrary per-device keys, e.g.
/// `{"temp": 25.5, "humidity": 65, "air_pressure_hpa": 1013.2}`.
/// `Raw` keeps the text of anything that was not a json object.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    Object(Map<String, Value>),
    Raw(String),
}

impl Payload {
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Object(map) => Payload::Object(map),
            Value::String(text) => Payload::Raw(text),
            other => Payload::Raw(other.to_string()),
        }
    }

    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str::<Value>(text).map(Self::from_json)
    }

    pub fn parse_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice::<Value>(bytes).map(Self::from_json)
    }

    pub fn as_object(&self) -> Option<&Map<String, Value>> {
        match self {
            Payload::Object(map) => Some(map),
            Payload::Raw(_) => None,
        }
    }

    pub fn is_object(&self) -> bool {
        matches!(self, Payload::Object(_))
    }

    /// numeric value of a field; strings and other json types are ignored
    pub fn number(&self, key: &str) -> Option<f64> {
        self.as_object()?.get(key)?.as_f64()
    }

    /// first field in `keys` that carries a number
    pub fn first_number(&self, keys: &[&str]) -> Option<f64> {
        keys.iter().find_map(|key| self.number(key))
    }

    /// typed extraction step: every numeric field of the object
    pub fn metrics(&self) -> BTreeMap<String, f64> {
        self.as_object()
            .map(|map| {
                map.iter()
                    .filter_map(|(key, value)| value.as_f64().map(|n| (key.clone(), n)))
                    .collect()
            })
            .unwrap_or_default()
    }
}

// ==============================================================================
// backend records (read-only)
// ==============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rack {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub containment_id: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub device_type: String,
    #[serde(default)]
    pub rack_id: i64,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub sensor_type: Option<String>,
    #[serde(default)]
    pub rack: Option<Rack>,
}

impl Device {
    pub fn is_sensor(&self) -> bool {
        self.device_type == "Sensor"
    }

    /// None when the device has no sensor type recorded
    pub fn sensor_kind(&self) -> Option<SensorType> {
        self.sensor_type
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .map(SensorType::from_name)
    }

    pub fn containment_id(&self) -> Option<i64> {
        self.rack.as_ref().map(|rack| rack.containment_id)
    }

    pub fn mqtt_topic(&self) -> Option<&str> {
        self.topic.as_deref().map(str::trim).filter(|t| !t.is_empty())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Containment {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// camera lookup; the api key is deliberately not deserialized
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraConfig {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub ip_address: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub is_active: bool,
}

/// one persisted sensor reading from `/devicesensordata/latest`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSensorRecord {
    #[serde(default)]
    pub id: i64,
    pub device_id: i64,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub raw_payload: Option<String>,
    #[serde(default)]
    pub sensor_type: Option<String>,
    #[serde(default)]
    pub device: Option<Device>,
}

impl DeviceSensorRecord {
    /// sensor type of the owning device, falling back to the record's own tag
    pub fn sensor_kind(&self) -> Option<SensorType> {
        self.device
            .as_ref()
            .and_then(Device::sensor_kind)
            .or_else(|| {
                self.sensor_type
                    .as_deref()
                    .filter(|name| !name.trim().is_empty())
                    .map(SensorType::from_name)
            })
    }
}

/// backend response envelope
#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse<T> {
    #[serde(alias = "Success")]
    pub success: bool,
    #[serde(default, alias = "Data")]
    pub data: Option<T>,
    #[serde(default, alias = "Message")]
    pub message: String,
}

impl<T> ApiResponse<T> {
    pub fn into_data(self) -> anyhow::Result<T> {
        match (self.success, self.data) {
            (true, Some(data)) => Ok(data),
            (true, None) => Err(anyhow::anyhow!("backend returned no data: {}", self.message)),
            (false, _) => Err(anyhow::anyhow!("backend reported failure: {}", self.message)),
        }
    }
}

// ==============================================================================
// aggregation state
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub value: Payload,
}

/// live state of one device
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorRealtimeData {
    pub device_id: i64,
    pub current_value: Option<Payload>,
    /// time of the last applied sample; None until the first one
    pub timestamp: Option<DateTime<Utc>>,
    pub status: SensorStatus,
    pub history: VecDeque<HistoryEntry>,
}

impl SensorRealtimeData {
    pub fn new(device_id: i64) -> Self {
        Self {
            device_id,
            current_value: None,
            timestamp: None,
            status: SensorStatus::Offline,
            history: VecDeque::new(),
        }
    }

    /// online with a structured payload, i.e. eligible for averaging
    pub fn is_active(&self) -> bool {
        self.status != SensorStatus::Offline
            && self.current_value.as_ref().is_some_and(Payload::is_object)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupAverage {
    pub value: f64,
    pub status: SensorStatus,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyAverage {
    /// raw payload field name, e.g. `air_pressure_hpa`
    pub key: String,
    /// display form of the key, e.g. `Air Pressure Hpa`
    pub label: String,
    pub value: f64,
    pub unit: String,
    pub count: usize,
    pub status: SensorStatus,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorGroup {
    pub sensor_type: SensorType,
    pub devices: Vec<Device>,
    pub realtime_data: BTreeMap<i64, SensorRealtimeData>,
    pub average: GroupAverage,
    pub key_averages: Vec<KeyAverage>,
}

/// headline counters of the dashboard
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSummary {
    pub total_sensors: usize,
    pub sensor_types: usize,
    pub online_devices: usize,
    pub key_parameters: usize,
    pub warning_devices: usize,
    pub critical_devices: usize,
}
