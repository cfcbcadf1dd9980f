//! ==============================================================================
//! registry.rs - backend access (device registry, lookups, sensor history)
//! ==============================================================================
//!
//! purpose:
//!     provides a unified interface for everything the monitor reads from the
//!     facility backend. abstracts away the http client so the startup and
//!     seeding logic can run against an in-memory registry in tests.
//!
//! endpoints (relative to api.base_url):
//!     - GET /device                         -> [Device]
//!     - GET /containment                    -> [Containment]
//!     - GET /cameraconfig                   -> [CameraConfig]
//!     - GET /devicesensordata/latest?limit  -> ApiResponse<[DeviceSensorRecord]>
//!
//! relationships:
//!     - used by: main.rs (initial load, historical seed task)
//!     - feeds: engine.rs (through state.rs)
//!
//! ==============================================================================

use crate::config::ApiConfig;
use crate::domain::{ApiResponse, CameraConfig, Containment, Device, DeviceSensorRecord, Payload};
use crate::engine::IngestOutcome;
use crate::state::SharedState;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::future::Future;
use tracing::{debug, info, warn};

pub trait DeviceRegistry: Send + Sync {
    fn fetch_devices(&self) -> impl Future<Output = Result<Vec<Device>>> + Send;
    fn fetch_containments(&self) -> impl Future<Output = Result<Vec<Containment>>> + Send;
    fn fetch_cameras(&self) -> impl Future<Output = Result<Vec<CameraConfig>>> + Send;
    /// newest first, as the backend returns them
    fn fetch_recent_sensor_data(
        &self,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<DeviceSensorRecord>>> + Send;
}

// ==============================================================================
// http implementation
// ==============================================================================

#[derive(Clone)]
pub struct HttpRegistry {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpRegistry {
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .context("failed to build http client")?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token.clone().filter(|t| !t.is_empty()),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.url(path);
        let mut request = self.client.get(&url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .with_context(|| format!("GET {} failed", url))?
            .error_for_status()
            .with_context(|| format!("GET {} returned an error status", url))?;
        response
            .json::<T>()
            .await
            .with_context(|| format!("GET {} returned an unexpected body", url))
    }
}

impl DeviceRegistry for HttpRegistry {
    async fn fetch_devices(&self) -> Result<Vec<Device>> {
        self.get_json("/device").await
    }

    async fn fetch_containments(&self) -> Result<Vec<Containment>> {
        self.get_json("/containment").await
    }

    async fn fetch_cameras(&self) -> Result<Vec<CameraConfig>> {
        self.get_json("/cameraconfig").await
    }

    async fn fetch_recent_sensor_data(&self, limit: usize) -> Result<Vec<DeviceSensorRecord>> {
        let response: ApiResponse<Vec<DeviceSensorRecord>> = self
            .get_json(&format!("/devicesensordata/latest?limit={}", limit))
            .await?;
        response.into_data()
    }
}

// ==============================================================================
// startup load
// ==============================================================================

#[derive(Debug, Default)]
pub struct InitialData {
    /// sensor devices only
    pub devices: Vec<Device>,
    pub containments: Vec<Containment>,
    pub cameras: Vec<CameraConfig>,
}

/// fetch everything concurrently; a failed lookup leaves its list empty
pub async fn load_initial_data<R: DeviceRegistry>(registry: &R) -> InitialData {
    let (devices, containments, cameras) = tokio::join!(
        registry.fetch_devices(),
        registry.fetch_containments(),
        registry.fetch_cameras(),
    );

    let devices = match devices {
        Ok(devices) => {
            let sensors: Vec<Device> = devices.into_iter().filter(Device::is_sensor).collect();
            if sensors.is_empty() {
                warn!("no sensor devices found in the system");
            }
            sensors
        }
        Err(e) => {
            warn!(error = %format!("{:#}", e), "failed to load devices");
            Vec::new()
        }
    };

    let containments = containments.unwrap_or_else(|e| {
        warn!(error = %format!("{:#}", e), "failed to load containments");
        Vec::new()
    });

    let cameras = cameras.unwrap_or_else(|e| {
        warn!(error = %format!("{:#}", e), "failed to load camera configs");
        Vec::new()
    });

    info!(
        sensors = devices.len(),
        containments = containments.len(),
        cameras = cameras.len(),
        "initial data loaded"
    );

    InitialData { devices, containments, cameras }
}

// ==============================================================================
// historical seed
// ==============================================================================

/// backend timestamps come as rfc 3339 or as naive iso-8601 in utc
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(|naive| naive.and_utc())
}

/// replay recent persisted readings through the engine, oldest first.
/// devices that already received live data are skipped.
/// returns the number of applied samples.
pub async fn seed_history<R: DeviceRegistry>(
    registry: &R,
    state: &SharedState,
    limit: usize,
) -> Result<usize> {
    let records = registry
        .fetch_recent_sensor_data(limit)
        .await
        .context("historical data api failed")?;

    if records.is_empty() {
        info!("no historical sensor data found - starting with empty data");
        return Ok(0);
    }

    let now = Utc::now();
    let mut samples: Vec<_> = records
        .into_iter()
        .filter_map(|record| {
            let Some(sensor_type) = record.sensor_kind() else {
                debug!(record = record.id, "skipping record without sensor type");
                return None;
            };
            let Some(raw) = record.raw_payload.as_deref() else {
                debug!(record = record.id, "skipping record without payload");
                return None;
            };
            let payload = Payload::parse(raw).unwrap_or_else(|e| {
                warn!(device = record.device_id, error = %e, "failed to parse stored payload; replaying raw");
                Payload::Raw(raw.to_string())
            });
            let observed_at = parse_timestamp(&record.timestamp).unwrap_or_else(|| {
                debug!(record = record.id, timestamp = %record.timestamp, "unparsable timestamp; using now");
                now
            });
            Some((observed_at, record.device_id, sensor_type, payload))
        })
        .collect();

    // stable, so records sharing a timestamp keep the backend's relative order
    samples.sort_by_key(|(observed_at, ..)| *observed_at);

    let total = samples.len();
    let mut applied = 0;
    let mut guard = state.write().await;
    // record timestamps come from device clocks, so they only order records
    // among themselves; a device that already got live data keeps it
    let live: HashSet<i64> = samples
        .iter()
        .map(|(_, device_id, ..)| *device_id)
        .filter(|device_id| guard.engine.has_sample(*device_id))
        .collect();
    for (observed_at, device_id, sensor_type, payload) in samples {
        if live.contains(&device_id) {
            debug!(device = device_id, "historical record superseded by live data");
            continue;
        }
        match guard.engine.ingest(device_id, sensor_type, payload, observed_at) {
            IngestOutcome::Applied(_) => applied += 1,
            IngestOutcome::UnknownDevice => debug!(device = device_id, "historical record for unknown device"),
        }
    }
    drop(guard);

    info!(applied, total, "historical sensor data replayed");
    Ok(applied)
}
