//! ==============================================================================
//! thresholds.rs - metric table, status classifiers and formatting
//! ==============================================================================
//!
//! purpose:
//!     one declarative table of payload metrics (key patterns, unit, bounds)
//!     and one profile per sensor type (principal metric, how the primary
//!     value is extracted). both the device-level classifier and the key-level
//!     classifier read their thresholds from here.
//!
//! relationships:
//!     - used by: engine.rs (status, averages, key averages)
//!     - used by: web.rs (value formatting)
//!
//! ==============================================================================

use crate::domain::{Payload, SensorStatus, SensorType};

// ==============================================================================
// bounds
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Bound {
    /// critical above `critical`, warning above `warning`
    Above { warning: f64, critical: f64 },
    /// critical below `critical`, warning below `warning`
    Below { warning: f64, critical: f64 },
    /// warning outside `low..=high`, never critical
    Band { low: f64, high: f64 },
}

impl Bound {
    pub fn classify(self, value: f64) -> SensorStatus {
        match self {
            Bound::Above { warning, critical } => {
                if value > critical {
                    SensorStatus::Critical
                } else if value > warning {
                    SensorStatus::Warning
                } else {
                    SensorStatus::Normal
                }
            }
            Bound::Below { warning, critical } => {
                if value < critical {
                    SensorStatus::Critical
                } else if value < warning {
                    SensorStatus::Warning
                } else {
                    SensorStatus::Normal
                }
            }
            Bound::Band { low, high } => {
                if value < low || value > high {
                    SensorStatus::Warning
                } else {
                    SensorStatus::Normal
                }
            }
        }
    }
}

// ==============================================================================
// metric table
// ==============================================================================

/// a family of payload keys sharing a unit and thresholds
#[derive(Debug)]
pub struct Metric {
    /// lowercase substrings that identify the key
    pub patterns: &'static [&'static str],
    /// lowercase key names matched exactly
    pub exact: &'static [&'static str],
    pub unit: &'static str,
    pub bound: Option<Bound>,
    /// compare |value| against the bound
    pub absolute: bool,
}

impl Metric {
    fn matches(&self, key_lower: &str) -> bool {
        self.patterns.iter().any(|p| key_lower.contains(p)) || self.exact.contains(&key_lower)
    }

    pub fn classify(&self, value: f64) -> SensorStatus {
        let value = if self.absolute { value.abs() } else { value };
        self.bound
            .map(|bound| bound.classify(value))
            .unwrap_or(SensorStatus::Normal)
    }
}

pub static TEMPERATURE: Metric = Metric {
    patterns: &["temp"],
    exact: &[],
    unit: "°C",
    bound: Some(Bound::Above { warning: 30.0, critical: 35.0 }),
    absolute: false,
};

pub static HUMIDITY: Metric = Metric {
    patterns: &["hum"],
    exact: &[],
    unit: "%",
    bound: Some(Bound::Band { low: 20.0, high: 80.0 }),
    absolute: false,
};

pub static PRESSURE: Metric = Metric {
    patterns: &["pressure", "hpa"],
    exact: &[],
    unit: "hPa",
    bound: Some(Bound::Band { low: 990.0, high: 1030.0 }),
    absolute: false,
};

pub static AIR_FLOW: Metric = Metric {
    patterns: &["flow", "lpm"],
    exact: &[],
    unit: "L/min",
    bound: Some(Bound::Below { warning: 20.0, critical: 10.0 }),
    absolute: false,
};

pub static DUST: Metric = Metric {
    patterns: &["dust", "pm", "ug"],
    exact: &[],
    unit: "µg/m³",
    bound: Some(Bound::Above { warning: 50.0, critical: 100.0 }),
    absolute: false,
};

pub static VIBRATION: Metric = Metric {
    patterns: &["vibration"],
    exact: &["x", "y", "z"],
    unit: "m/s²",
    bound: Some(Bound::Above { warning: 1.5, critical: 3.0 }),
    absolute: true,
};

pub static VOLTAGE: Metric = Metric {
    patterns: &["voltage"],
    exact: &[],
    unit: "V",
    bound: None,
    absolute: false,
};

pub static CURRENT: Metric = Metric {
    patterns: &["current"],
    exact: &[],
    unit: "A",
    bound: None,
    absolute: false,
};

pub static POWER: Metric = Metric {
    patterns: &["power"],
    exact: &[],
    unit: "W",
    bound: None,
    absolute: false,
};

/// lookup order for key names; first match wins
pub static METRICS: [&Metric; 9] = [
    &TEMPERATURE,
    &HUMIDITY,
    &PRESSURE,
    &AIR_FLOW,
    &DUST,
    &VIBRATION,
    &VOLTAGE,
    &CURRENT,
    &POWER,
];

// ==============================================================================
// sensor profiles
// ==============================================================================

#[derive(Debug)]
pub enum Extraction {
    /// first numeric field among these names
    Fields(&'static [&'static str]),
    /// sqrt(x² + y² + z²), each axis the first numeric field of its names,
    /// missing axes count as 0
    Magnitude([&'static [&'static str]; 3]),
    None,
}

#[derive(Debug)]
pub struct SensorProfile {
    pub principal: Option<&'static Metric>,
    pub extraction: Extraction,
    /// whether the device-level classifier applies the principal bound
    pub classify_devices: bool,
}

static TEMPERATURE_PROFILE: SensorProfile = SensorProfile {
    principal: Some(&TEMPERATURE),
    extraction: Extraction::Fields(&["temp", "temperature"]),
    classify_devices: true,
};

static AIR_FLOW_PROFILE: SensorProfile = SensorProfile {
    principal: Some(&AIR_FLOW),
    extraction: Extraction::Fields(&["air_flow_lpm", "flow"]),
    classify_devices: true,
};

static DUST_PROFILE: SensorProfile = SensorProfile {
    principal: Some(&DUST),
    extraction: Extraction::Fields(&["dust_level_ug_m3", "dust", "pm25"]),
    classify_devices: true,
};

static VIBRATION_PROFILE: SensorProfile = SensorProfile {
    principal: Some(&VIBRATION),
    extraction: Extraction::Magnitude([
        &["vibration_x", "x"],
        &["vibration_y", "y"],
        &["vibration_z", "z"],
    ]),
    classify_devices: true,
};

// humidity and pressure devices are averaged but never flagged at device level;
// their bands only apply per key
static HUMIDITY_PROFILE: SensorProfile = SensorProfile {
    principal: Some(&HUMIDITY),
    extraction: Extraction::Fields(&["hum", "humidity"]),
    classify_devices: false,
};

static PRESSURE_PROFILE: SensorProfile = SensorProfile {
    principal: Some(&PRESSURE),
    extraction: Extraction::Fields(&["pressure", "air_pressure_hpa"]),
    classify_devices: false,
};

static UNKNOWN_PROFILE: SensorProfile = SensorProfile {
    principal: None,
    extraction: Extraction::None,
    classify_devices: false,
};

pub fn profile(sensor_type: SensorType) -> &'static SensorProfile {
    match sensor_type {
        SensorType::Temperature => &TEMPERATURE_PROFILE,
        SensorType::AirFlow => &AIR_FLOW_PROFILE,
        SensorType::DustSensor => &DUST_PROFILE,
        SensorType::Vibration => &VIBRATION_PROFILE,
        SensorType::Humidity => &HUMIDITY_PROFILE,
        SensorType::Pressure => &PRESSURE_PROFILE,
        SensorType::Unknown => &UNKNOWN_PROFILE,
    }
}

// ==============================================================================
// extraction & classification
// ==============================================================================

/// the sensor type's primary numeric value, None when the payload is not an
/// object or carries none of the primary fields
pub fn primary_value(sensor_type: SensorType, payload: &Payload) -> Option<f64> {
    if !payload.is_object() {
        return None;
    }
    match &profile(sensor_type).extraction {
        Extraction::Fields(fields) => payload.first_number(fields),
        Extraction::Magnitude(axes) => {
            let sum: f64 = axes
                .iter()
                .map(|names| payload.first_number(names).unwrap_or(0.0))
                .map(|v| v * v)
                .sum();
            Some(sum.sqrt())
        }
        Extraction::None => None,
    }
}

/// primary value with missing treated as 0, as used by group averages
pub fn extract_numeric_value(sensor_type: SensorType, payload: &Payload) -> f64 {
    primary_value(sensor_type, payload).unwrap_or(0.0)
}

/// device-level status
pub fn calculate_status(sensor_type: SensorType, payload: Option<&Payload>) -> SensorStatus {
    let Some(payload) = payload.filter(|p| p.is_object()) else {
        return SensorStatus::Offline;
    };
    let profile = profile(sensor_type);
    let Some(metric) = profile.principal.filter(|_| profile.classify_devices) else {
        return SensorStatus::Normal;
    };
    match primary_value(sensor_type, payload) {
        Some(value) => metric.classify(value),
        None => SensorStatus::Normal,
    }
}

/// metric a payload key belongs to; the sensor type's principal metric is
/// tried before the shared table
pub fn metric_for_key(sensor_type: SensorType, key: &str) -> Option<&'static Metric> {
    let key_lower = key.to_lowercase();
    profile(sensor_type)
        .principal
        .into_iter()
        .chain(METRICS.iter().copied())
        .find(|metric| metric.matches(&key_lower))
}

/// metric whose thresholds apply to a key: the group's own principal metric,
/// else the humidity and pressure bands. other sensor types' limits never apply.
fn classified_metric_for_key(sensor_type: SensorType, key: &str) -> Option<&'static Metric> {
    let key_lower = key.to_lowercase();
    profile(sensor_type)
        .principal
        .into_iter()
        .chain([&HUMIDITY, &PRESSURE])
        .find(|metric| metric.matches(&key_lower))
}

/// key-level status; never offline
pub fn calculate_key_status(sensor_type: SensorType, key: &str, value: f64) -> SensorStatus {
    classified_metric_for_key(sensor_type, key)
        .map(|metric| metric.classify(value))
        .unwrap_or(SensorStatus::Normal)
}

pub fn unit_for_key(sensor_type: SensorType, key: &str) -> &'static str {
    metric_for_key(sensor_type, key)
        .map(|metric| metric.unit)
        .unwrap_or_else(|| sensor_type.unit())
}

// ==============================================================================
// formatting
// ==============================================================================

/// `air_pressure_hpa` -> `Air Pressure Hpa`, `airFlow` -> `Air Flow`
pub fn format_key_name(key: &str) -> String {
    let mut spaced = String::with_capacity(key.len() + 4);
    for c in key.chars() {
        if c == '_' {
            spaced.push(' ');
        } else if c.is_ascii_uppercase() {
            spaced.push(' ');
            spaced.push(c);
        } else {
            spaced.push(c);
        }
    }
    spaced
        .to_lowercase()
        .split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
        .trim()
        .to_string()
}

pub fn format_value(sensor_type: SensorType, value: f64) -> String {
    match sensor_type {
        SensorType::Vibration => format!("{:.2} {}", value, sensor_type.unit()),
        SensorType::Unknown => format!("{:.2}", value),
        _ => format!("{:.1} {}", value, sensor_type.unit()),
    }
}

// ==============================================================================
// tests
// ==============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use serde_json::json;

    fn payload(value: serde_json::Value) -> Payload {
        Payload::from_json(value)
    }

    #[test]
    fn temperature_thresholds() {
        let t = SensorType::Temperature;
        assert_eq!(calculate_status(t, Some(&payload(json!({"temp": 36})))), SensorStatus::Critical);
        assert_eq!(calculate_status(t, Some(&payload(json!({"temperature": 31})))), SensorStatus::Warning);
        assert_eq!(calculate_status(t, Some(&payload(json!({"temp": 30})))), SensorStatus::Normal);
    }

    #[test]
    fn air_flow_thresholds_are_lower_bounds() {
        let t = SensorType::AirFlow;
        assert_eq!(calculate_status(t, Some(&payload(json!({"air_flow_lpm": 5})))), SensorStatus::Critical);
        assert_eq!(calculate_status(t, Some(&payload(json!({"flow": 15})))), SensorStatus::Warning);
        assert_eq!(calculate_status(t, Some(&payload(json!({"flow": 45.2})))), SensorStatus::Normal);
        // a real zero reading is a stopped fan, not a missing field
        assert_eq!(calculate_status(t, Some(&payload(json!({"flow": 0})))), SensorStatus::Critical);
    }

    #[test]
    fn dust_thresholds() {
        let t = SensorType::DustSensor;
        assert_eq!(calculate_status(t, Some(&payload(json!({"pm25": 120})))), SensorStatus::Critical);
        assert_eq!(calculate_status(t, Some(&payload(json!({"dust_level_ug_m3": 60})))), SensorStatus::Warning);
        assert_eq!(calculate_status(t, Some(&payload(json!({"dust": 10})))), SensorStatus::Normal);
    }

    #[test]
    fn vibration_uses_vector_magnitude() {
        let p = payload(json!({"x": 2, "y": 2, "z": 2}));
        assert_relative_eq!(
            primary_value(SensorType::Vibration, &p).unwrap(),
            12f64.sqrt(),
            epsilon = 1e-9
        );
        assert_eq!(calculate_status(SensorType::Vibration, Some(&p)), SensorStatus::Critical);

        let p = payload(json!({"vibration_x": 1.0, "vibration_y": 1.2}));
        assert_eq!(calculate_status(SensorType::Vibration, Some(&p)), SensorStatus::Warning);
        assert_eq!(
            calculate_status(SensorType::Vibration, Some(&payload(json!({})))),
            SensorStatus::Normal
        );
    }

    #[test]
    fn non_objects_and_missing_payloads_are_offline() {
        assert_eq!(calculate_status(SensorType::Temperature, None), SensorStatus::Offline);
        assert_eq!(
            calculate_status(SensorType::Temperature, Some(&Payload::Raw("garbage".into()))),
            SensorStatus::Offline
        );
    }

    #[test]
    fn humidity_and_pressure_devices_default_to_normal() {
        let wet = payload(json!({"humidity": 95}));
        assert_eq!(calculate_status(SensorType::Humidity, Some(&wet)), SensorStatus::Normal);
        let low = payload(json!({"pressure": 900}));
        assert_eq!(calculate_status(SensorType::Pressure, Some(&low)), SensorStatus::Normal);
        assert_eq!(calculate_status(SensorType::Unknown, Some(&low)), SensorStatus::Normal);
    }

    #[test]
    fn missing_primary_field_is_normal() {
        let p = payload(json!({"voltage": 3.3}));
        assert_eq!(calculate_status(SensorType::Temperature, Some(&p)), SensorStatus::Normal);
        assert_eq!(extract_numeric_value(SensorType::Temperature, &p), 0.0);
    }

    #[test]
    fn key_status_bands() {
        let t = SensorType::Temperature;
        assert_eq!(calculate_key_status(t, "humidity", 85.0), SensorStatus::Warning);
        assert_eq!(calculate_key_status(t, "Humidity", 15.0), SensorStatus::Warning);
        assert_eq!(calculate_key_status(t, "humidity", 50.0), SensorStatus::Normal);
        assert_eq!(calculate_key_status(SensorType::AirFlow, "air_pressure_hpa", 985.0), SensorStatus::Warning);
        assert_eq!(calculate_key_status(SensorType::AirFlow, "air_pressure_hpa", 1013.0), SensorStatus::Normal);
        assert_eq!(calculate_key_status(SensorType::Pressure, "pressure", 1031.0), SensorStatus::Warning);
    }

    #[test]
    fn key_status_reuses_principal_thresholds() {
        assert_eq!(calculate_key_status(SensorType::Temperature, "temp", 36.0), SensorStatus::Critical);
        assert_eq!(calculate_key_status(SensorType::AirFlow, "air_flow_lpm", 12.0), SensorStatus::Warning);
        assert_eq!(calculate_key_status(SensorType::DustSensor, "pm25", 101.0), SensorStatus::Critical);
        assert_eq!(calculate_key_status(SensorType::Vibration, "x", -3.5), SensorStatus::Critical);
        assert_eq!(calculate_key_status(SensorType::Vibration, "vibration_y", 2.0), SensorStatus::Warning);
    }

    #[test]
    fn key_and_device_classifiers_agree_on_principal_metric() {
        for (sensor_type, key, value) in [
            (SensorType::Temperature, "temp", 33.0),
            (SensorType::AirFlow, "flow", 8.0),
            (SensorType::DustSensor, "dust", 75.0),
        ] {
            let device = calculate_status(sensor_type, Some(&payload(json!({ key: value }))));
            assert_eq!(calculate_key_status(sensor_type, key, value), device, "{sensor_type} {key}");
        }
    }

    #[test]
    fn foreign_metrics_do_not_classify_keys() {
        // temperature limits belong to temperature groups only
        assert_eq!(calculate_key_status(SensorType::AirFlow, "temp", 36.0), SensorStatus::Normal);
        assert_eq!(calculate_key_status(SensorType::Vibration, "flow", 2.0), SensorStatus::Normal);
        // "pm" inside "rpm" is not a dust reading outside dust groups
        assert_eq!(calculate_key_status(SensorType::AirFlow, "fan_rpm", 3000.0), SensorStatus::Normal);
        // the shared bands still apply everywhere
        assert_eq!(calculate_key_status(SensorType::Vibration, "humidity", 90.0), SensorStatus::Warning);
    }

    #[test]
    fn unmatched_keys_are_normal() {
        assert_eq!(calculate_key_status(SensorType::Temperature, "battery", 1e6), SensorStatus::Normal);
        assert_eq!(calculate_key_status(SensorType::Temperature, "voltage", 400.0), SensorStatus::Normal);
    }

    #[test]
    fn units_follow_key_names() {
        let t = SensorType::Temperature;
        assert_eq!(unit_for_key(t, "temp"), "°C");
        assert_eq!(unit_for_key(t, "humidity"), "%");
        assert_eq!(unit_for_key(t, "air_pressure_hpa"), "hPa");
        assert_eq!(unit_for_key(t, "air_flow_lpm"), "L/min");
        assert_eq!(unit_for_key(t, "dust_level_ug_m3"), "µg/m³");
        assert_eq!(unit_for_key(t, "Z"), "m/s²");
        assert_eq!(unit_for_key(t, "voltage"), "V");
        assert_eq!(unit_for_key(t, "current"), "A");
        assert_eq!(unit_for_key(t, "power"), "W");
        assert_eq!(unit_for_key(SensorType::AirFlow, "reading"), "L/min");
        assert_eq!(unit_for_key(SensorType::Unknown, "reading"), "");
    }

    #[test]
    fn key_names_are_title_cased() {
        assert_eq!(format_key_name("air_pressure_hpa"), "Air Pressure Hpa");
        assert_eq!(format_key_name("airFlow"), "Air Flow");
        assert_eq!(format_key_name("pm25"), "Pm25");
        assert_eq!(format_key_name("temp"), "Temp");
    }

    #[test]
    fn values_are_formatted_per_sensor_type() {
        assert_eq!(format_value(SensorType::Temperature, 25.46), "25.5 °C");
        assert_eq!(format_value(SensorType::Vibration, 3.4641), "3.46 m/s²");
        assert_eq!(format_value(SensorType::Unknown, 1.0), "1.00");
    }
}
