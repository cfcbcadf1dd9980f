//! ==============================================================================
//! engine.rs - sensor aggregation engine
//! ==============================================================================
//!
//! purpose:
//!     keeps one SensorGroup per sensor type, ingests samples per device and
//!     recomputes the group's average and per-key averages after every
//!     applied sample.
//!
//! relationships:
//!     - fed by: mqtt.rs (live messages), registry.rs (historical seed)
//!     - read by: web.rs (through state.rs)
//!     - uses: thresholds.rs (classification, extraction, units)
//!
//! ==============================================================================

use crate::domain::{
    DashboardSummary, Device, GroupAverage, HistoryEntry, KeyAverage, Payload, SensorGroup,
    SensorRealtimeData, SensorStatus, SensorType,
};
use crate::thresholds;

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};

pub const DEFAULT_HISTORY_LIMIT: usize = 50;

/// what happened to a sample handed to [`SensorEngine::ingest`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Applied(SensorStatus),
    /// no such device in the group for that sensor type
    UnknownDevice,
}

/// group selection for the dashboard; None means "all"
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupFilter {
    pub sensor_type: Option<SensorType>,
    pub containment: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct SensorEngine {
    groups: BTreeMap<SensorType, SensorGroup>,
    history_limit: usize,
}

impl SensorEngine {
    /// partition sensor devices by sensor type; every device starts offline
    pub fn new(devices: &[Device], history_limit: usize) -> Self {
        let now = Utc::now();
        let mut groups: BTreeMap<SensorType, SensorGroup> = BTreeMap::new();

        for device in devices.iter().filter(|d| d.is_sensor()) {
            let Some(sensor_type) = device.sensor_kind() else {
                continue;
            };
            let group = groups.entry(sensor_type).or_insert_with(|| SensorGroup {
                sensor_type,
                devices: Vec::new(),
                realtime_data: BTreeMap::new(),
                average: GroupAverage {
                    value: 0.0,
                    status: SensorStatus::Offline,
                    last_updated: now,
                },
                key_averages: Vec::new(),
            });
            if group.realtime_data.contains_key(&device.id) {
                continue;
            }
            group.devices.push(device.clone());
            group
                .realtime_data
                .insert(device.id, SensorRealtimeData::new(device.id));
        }

        Self {
            groups,
            history_limit: history_limit.max(1),
        }
    }

    /// apply one sample to a device and recompute its group; the last
    /// applied sample wins whatever its timestamp
    pub fn ingest(
        &mut self,
        device_id: i64,
        sensor_type: SensorType,
        payload: Payload,
        observed_at: DateTime<Utc>,
    ) -> IngestOutcome {
        let Some(group) = self.groups.get_mut(&sensor_type) else {
            return IngestOutcome::UnknownDevice;
        };
        let Some(data) = group.realtime_data.get_mut(&device_id) else {
            return IngestOutcome::UnknownDevice;
        };
        let status = thresholds::calculate_status(sensor_type, Some(&payload));
        data.status = status;
        data.timestamp = Some(observed_at);
        data.history.push_back(HistoryEntry {
            timestamp: observed_at,
            value: payload.clone(),
        });
        while data.history.len() > self.history_limit {
            data.history.pop_front();
        }
        data.current_value = Some(payload);

        let average = calculate_group_average(group, observed_at);
        let key_averages = calculate_key_averages(group);
        group.average = average;
        group.key_averages = key_averages;

        IngestOutcome::Applied(status)
    }

    pub fn groups(&self) -> impl Iterator<Item = &SensorGroup> {
        self.groups.values()
    }

    pub fn group(&self, sensor_type: SensorType) -> Option<&SensorGroup> {
        self.groups.get(&sensor_type)
    }

    pub fn devices(&self) -> impl Iterator<Item = &Device> {
        self.groups.values().flat_map(|g| g.devices.iter())
    }

    pub fn device(&self, device_id: i64) -> Option<&SensorRealtimeData> {
        self.groups
            .values()
            .find_map(|g| g.realtime_data.get(&device_id))
    }

    /// whether the device has received any sample yet
    pub fn has_sample(&self, device_id: i64) -> bool {
        self.device(device_id).is_some_and(|d| d.timestamp.is_some())
    }

    pub fn filtered_groups(&self, filter: &GroupFilter) -> Vec<&SensorGroup> {
        self.groups
            .values()
            .filter(|group| {
                filter
                    .sensor_type
                    .map_or(true, |wanted| group.sensor_type == wanted)
            })
            .filter(|group| {
                filter.containment.map_or(true, |containment| {
                    group
                        .devices
                        .iter()
                        .any(|d| d.containment_id() == Some(containment))
                })
            })
            .collect()
    }

    pub fn summary(&self) -> DashboardSummary {
        let mut summary = DashboardSummary {
            sensor_types: self.groups.len(),
            ..DashboardSummary::default()
        };
        for group in self.groups.values() {
            summary.total_sensors += group.devices.len();
            summary.key_parameters += group.key_averages.len();
            for data in group.realtime_data.values() {
                match data.status {
                    SensorStatus::Offline => continue,
                    SensorStatus::Warning => summary.warning_devices += 1,
                    SensorStatus::Critical => summary.critical_devices += 1,
                    SensorStatus::Normal => {}
                }
                summary.online_devices += 1;
            }
        }
        summary
    }
}

// ==============================================================================
// aggregation - pure functions of the group's current values
// ==============================================================================

/// mean primary value over active devices, worst-case-wins status
pub fn calculate_group_average(group: &SensorGroup, now: DateTime<Utc>) -> GroupAverage {
    let active: Vec<&SensorRealtimeData> = group
        .realtime_data
        .values()
        .filter(|d| d.is_active())
        .collect();

    if active.is_empty() {
        return GroupAverage {
            value: 0.0,
            status: SensorStatus::Offline,
            last_updated: now,
        };
    }

    let total: f64 = active
        .iter()
        .filter_map(|d| d.current_value.as_ref())
        .map(|payload| thresholds::extract_numeric_value(group.sensor_type, payload))
        .sum();

    GroupAverage {
        value: total / active.len() as f64,
        status: SensorStatus::worst_of(active.iter().map(|d| d.status)),
        last_updated: now,
    }
}

/// cross-device mean of every numeric key reported by active devices
pub fn calculate_key_averages(group: &SensorGroup) -> Vec<KeyAverage> {
    let metrics: Vec<BTreeMap<String, f64>> = group
        .realtime_data
        .values()
        .filter(|d| d.is_active())
        .filter_map(|d| d.current_value.as_ref())
        .map(Payload::metrics)
        .collect();

    let keys: BTreeSet<&str> = metrics
        .iter()
        .flat_map(|m| m.keys().map(String::as_str))
        .collect();

    let mut averages: Vec<KeyAverage> = keys
        .into_iter()
        .filter_map(|key| {
            let values: Vec<f64> = metrics.iter().filter_map(|m| m.get(key).copied()).collect();
            if values.is_empty() {
                return None;
            }
            let status = SensorStatus::worst_of(
                values
                    .iter()
                    .map(|v| thresholds::calculate_key_status(group.sensor_type, key, *v)),
            );
            Some(KeyAverage {
                key: key.to_string(),
                label: thresholds::format_key_name(key),
                value: values.iter().sum::<f64>() / values.len() as f64,
                unit: thresholds::unit_for_key(group.sensor_type, key).to_string(),
                count: values.len(),
                status,
            })
        })
        .collect();

    averages.sort_by(|a, b| a.label.cmp(&b.label).then_with(|| a.key.cmp(&b.key)));
    averages
}
