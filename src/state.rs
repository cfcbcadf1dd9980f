// ==============================================================================
// shared state
// ==============================================================================
// this struct holds everything that is shared between:
// - the mqtt feed and the historical seed (write samples into the engine)
// - the web server (reads for api and dashboard)
//
// arc<rwlock<>>: one writer applies a whole sample (including the
// group recomputation) per lock hold, so readers never see a half-updated group.

use crate::domain::{CameraConfig, Containment, DashboardSummary, SensorGroup};
use crate::engine::{GroupFilter, SensorEngine};

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;

pub type SharedState = Arc<RwLock<MonitorState>>;

#[derive(Debug)]
pub struct MonitorState {
    pub engine: SensorEngine,
    pub containments: Vec<Containment>,
    pub cameras: Vec<CameraConfig>,
    pub mqtt_connected: bool,
    /// time of the last applied live message
    pub last_update: Option<DateTime<Utc>>,
}

/// owned copy of what the dashboard renders
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSnapshot {
    pub summary: DashboardSummary,
    pub mqtt_connected: bool,
    pub last_update: Option<DateTime<Utc>>,
    pub groups: Vec<SensorGroup>,
}

impl MonitorState {
    pub fn new(
        engine: SensorEngine,
        containments: Vec<Containment>,
        cameras: Vec<CameraConfig>,
    ) -> Self {
        Self {
            engine,
            containments,
            cameras,
            mqtt_connected: false,
            last_update: None,
        }
    }

    pub fn shared(self) -> SharedState {
        Arc::new(RwLock::new(self))
    }

    pub fn snapshot(&self, filter: &GroupFilter) -> DashboardSnapshot {
        DashboardSnapshot {
            summary: self.engine.summary(),
            mqtt_connected: self.mqtt_connected,
            last_update: self.last_update,
            groups: self
                .engine
                .filtered_groups(filter)
                .into_iter()
                .cloned()
                .collect(),
        }
    }

    pub fn containment_name(&self, id: i64) -> Option<&str> {
        self.containments
            .iter()
            .find(|c| c.id == id)
            .map(|c| c.name.as_str())
    }
}
