//! ==============================================================================
//! web.rs - dashboard and json api
//! ==============================================================================
//!
//! routes:
//!     GET /                        html dashboard (same filters as /api/groups)
//!     GET /api                     summary + connection flag + all groups
//!     GET /api/summary             headline counters
//!     GET /api/groups              ?sensor_type=Temperature&containment=2 ("all" allowed)
//!     GET /api/groups/:sensor_type one group by display name, e.g. "Air Flow"
//!     GET /api/devices/:id         realtime data and history of one device
//!     GET /api/containments        containment lookup
//!     GET /api/cameras             camera lookup
//!
//! relationships:
//!     - reads: state.rs (shared monitor state)
//!     - uses: thresholds.rs (value formatting)
//!
//! ==============================================================================

use crate::domain::{
    CameraConfig, Containment, DashboardSummary, Payload, SensorGroup, SensorRealtimeData,
    SensorStatus, SensorType,
};
use crate::engine::GroupFilter;
use crate::state::{DashboardSnapshot, MonitorState, SharedState};
use crate::thresholds;

use anyhow::{Context, Result};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::Deserialize;
use std::fmt::Write as _;
use tower_http::cors::CorsLayer;
use tracing::info;

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(dashboard_handler))
        .route("/api", get(api_handler))
        .route("/api/summary", get(summary_handler))
        .route("/api/groups", get(groups_handler))
        .route("/api/groups/:sensor_type", get(group_handler))
        .route("/api/devices/:id", get(device_handler))
        .route("/api/containments", get(containments_handler))
        .route("/api/cameras", get(cameras_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn serve(bind: &str, state: SharedState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind dashboard on {}", bind))?;
    info!(address = %bind, "dashboard live");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

// ==============================================================================
// query parsing
// ==============================================================================

/// group filters as sent by the dashboard; "all" or empty means no filter
#[derive(Debug, Default, Deserialize)]
pub struct GroupQuery {
    pub sensor_type: Option<String>,
    pub containment: Option<String>,
}

impl GroupQuery {
    pub fn to_filter(&self) -> Result<GroupFilter, String> {
        let selected = |value: &Option<String>| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("all"))
                .map(str::to_string)
        };
        let containment = match selected(&self.containment) {
            Some(raw) => Some(
                raw.parse::<i64>()
                    .map_err(|_| format!("invalid containment id: {}", raw))?,
            ),
            None => None,
        };
        Ok(GroupFilter {
            sensor_type: selected(&self.sensor_type).map(|name| SensorType::from_name(&name)),
            containment,
        })
    }
}

fn error_response(status: StatusCode, message: String) -> Response {
    (
        status,
        Json(serde_json::json!({"status": "error", "message": message})),
    )
        .into_response()
}

// ==============================================================================
// handlers
// ==============================================================================

async fn dashboard_handler(
    State(state): State<SharedState>,
    Query(query): Query<GroupQuery>,
) -> Response {
    let filter = match query.to_filter() {
        Ok(filter) => filter,
        Err(message) => return error_response(StatusCode::BAD_REQUEST, message),
    };
    let state = state.read().await;
    Html(render_dashboard(&state, &filter)).into_response()
}

/// json api endpoint for programmatic access
async fn api_handler(State(state): State<SharedState>) -> Json<DashboardSnapshot> {
    let state = state.read().await;
    Json(state.snapshot(&GroupFilter::default()))
}

async fn summary_handler(State(state): State<SharedState>) -> Json<DashboardSummary> {
    Json(state.read().await.engine.summary())
}

async fn groups_handler(
    State(state): State<SharedState>,
    Query(query): Query<GroupQuery>,
) -> Response {
    match query.to_filter() {
        Ok(filter) => {
            let state = state.read().await;
            let groups: Vec<SensorGroup> = state
                .engine
                .filtered_groups(&filter)
                .into_iter()
                .cloned()
                .collect();
            Json(groups).into_response()
        }
        Err(message) => error_response(StatusCode::BAD_REQUEST, message),
    }
}

async fn group_handler(
    State(state): State<SharedState>,
    Path(sensor_type): Path<String>,
) -> Response {
    let state = state.read().await;
    match SensorType::from_known_name(&sensor_type).and_then(|t| state.engine.group(t)) {
        Some(group) => Json::<SensorGroup>(group.clone()).into_response(),
        None => error_response(
            StatusCode::NOT_FOUND,
            format!("no sensor group for {}", sensor_type),
        ),
    }
}

async fn device_handler(State(state): State<SharedState>, Path(id): Path<i64>) -> Response {
    let state = state.read().await;
    match state.engine.device(id) {
        Some(data) => Json::<SensorRealtimeData>(data.clone()).into_response(),
        None => error_response(StatusCode::NOT_FOUND, format!("unknown sensor device {}", id)),
    }
}

async fn containments_handler(State(state): State<SharedState>) -> Json<Vec<Containment>> {
    Json(state.read().await.containments.clone())
}

async fn cameras_handler(State(state): State<SharedState>) -> Json<Vec<CameraConfig>> {
    Json(state.read().await.cameras.clone())
}

// ==============================================================================
// html rendering
// ==============================================================================

fn status_color(status: SensorStatus) -> &'static str {
    match status {
        SensorStatus::Normal => "#2ecc71",
        SensorStatus::Warning => "#f39c12",
        SensorStatus::Critical => "#e74c3c",
        SensorStatus::Offline => "#7f8c8d",
    }
}

fn status_badge(status: SensorStatus) -> String {
    format!(
        r#"<span class="badge" style="background: {};">{}</span>"#,
        status_color(status),
        status
    )
}

fn payload_preview(payload: Option<&Payload>) -> String {
    match payload {
        Some(Payload::Object(map)) => serde_json::to_string(map).unwrap_or_default(),
        Some(Payload::Raw(text)) => text.clone(),
        None => "-".to_string(),
    }
}

pub fn render_dashboard(state: &MonitorState, filter: &GroupFilter) -> String {
    let summary = state.engine.summary();
    let mut html = String::with_capacity(8 * 1024);

    html.push_str(
        r#"<!doctype html>
<html>
<head>
<meta charset="utf-8">
<meta http-equiv="refresh" content="5">
<title>sensor monitor</title>
<style>
body { font-family: system-ui; padding: 2rem; background: #1a1a2e; color: #eee; }
.cards { display: flex; gap: 1rem; flex-wrap: wrap; }
.card { background: #16213e; padding: 1rem 1.5rem; border-radius: 8px; min-width: 10rem; }
.card b { display: block; font-size: 1.8rem; }
table { border-collapse: collapse; width: 100%; margin: 0.5rem 0 1.5rem; }
td, th { border-bottom: 1px solid #2c3e50; padding: 0.35rem 0.6rem; text-align: left; }
.badge { padding: 0.1rem 0.5rem; border-radius: 4px; color: #111; }
code { color: #9ad; }
</style>
</head>
<body>
<h1>real-time sensors</h1>
"#,
    );

    let mqtt = if state.mqtt_connected { "connected" } else { "disconnected" };
    let _ = writeln!(html, "<p>mqtt: {}</p>", mqtt);

    let _ = writeln!(
        html,
        r#"<div class="cards">
<div class="card">total sensors<b>{}</b></div>
<div class="card">sensor types<b>{}</b></div>
<div class="card">online devices<b>{}</b></div>
<div class="card">key parameters<b>{}</b></div>
<div class="card">warning / critical<b>{} / {}</b></div>
</div>"#,
        summary.total_sensors,
        summary.sensor_types,
        summary.online_devices,
        summary.key_parameters,
        summary.warning_devices,
        summary.critical_devices,
    );

    let groups = state.engine.filtered_groups(filter);
    if groups.is_empty() {
        html.push_str("<p>no sensor groups match the current filter</p>\n");
    }

    for group in groups {
        let _ = writeln!(
            html,
            "<h2>{} &mdash; {} {}</h2>",
            html_escape(group.sensor_type.name()),
            html_escape(&thresholds::format_value(group.sensor_type, group.average.value)),
            status_badge(group.average.status),
        );

        if !group.key_averages.is_empty() {
            html.push_str("<table><tr><th>parameter</th><th>average</th><th>devices</th><th>status</th></tr>\n");
            for key in &group.key_averages {
                let _ = writeln!(
                    html,
                    "<tr><td>{}</td><td>{:.2} {}</td><td>{}</td><td>{}</td></tr>",
                    html_escape(&key.label),
                    key.value,
                    html_escape(&key.unit),
                    key.count,
                    status_badge(key.status),
                );
            }
            html.push_str("</table>\n");
        }

        html.push_str("<table><tr><th>device</th><th>containment</th><th>status</th><th>updated</th><th>payload</th></tr>\n");
        for device in &group.devices {
            let data = group.realtime_data.get(&device.id);
            let containment = device
                .containment_id()
                .and_then(|id| state.containment_name(id))
                .unwrap_or("-");
            let updated = data
                .and_then(|d| d.timestamp)
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "never".to_string());
            let _ = writeln!(
                html,
                "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td><code>{}</code></td></tr>",
                html_escape(&device.name),
                html_escape(containment),
                status_badge(data.map_or(SensorStatus::Offline, |d| d.status)),
                updated,
                html_escape(&payload_preview(data.and_then(|d| d.current_value.as_ref()))),
            );
        }
        html.push_str("</table>\n");
    }

    html.push_str("</body>\n</html>\n");
    html
}

/// escape html special characters to prevent xss
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

// ==============================================================================
// tests
// ==============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::SensorEngine;
    use crate::registry::tests::sensor;
    use chrono::Utc;
    use serde_json::json;

    fn state() -> SharedState {
        let mut hostile = sensor(2, "Air Flow");
        hostile.name = "<script>alert(1)</script>".into();
        let mut engine = SensorEngine::new(&[sensor(1, "Temperature"), hostile], 50);
        engine.ingest(
            1,
            SensorType::Temperature,
            Payload::from_json(json!({"temp": 36.5, "humidity": 50})),
            Utc::now(),
        );
        MonitorState::new(
            engine,
            vec![Containment { id: 1, name: "Cold Aisle A".into(), ..Default::default() }],
            Vec::new(),
        )
        .shared()
    }

    #[test]
    fn query_all_means_no_filter() {
        let query = GroupQuery {
            sensor_type: Some("all".into()),
            containment: Some("all".into()),
        };
        assert_eq!(query.to_filter().unwrap(), GroupFilter::default());

        let query = GroupQuery {
            sensor_type: Some("air flow".into()),
            containment: Some("3".into()),
        };
        assert_eq!(
            query.to_filter().unwrap(),
            GroupFilter { sensor_type: Some(SensorType::AirFlow), containment: Some(3) }
        );

        let query = GroupQuery { sensor_type: None, containment: Some("rack".into()) };
        assert!(query.to_filter().is_err());
    }

    #[test]
    fn html_escape_handles_markup() {
        assert_eq!(html_escape(r#"<a href="x">&</a>"#), "&lt;a href=&quot;x&quot;&gt;&amp;&lt;/a&gt;");
    }

    #[tokio::test]
    async fn dashboard_renders_groups_and_escapes_names() {
        let state = state();
        let guard = state.read().await;
        let html = render_dashboard(&guard, &GroupFilter::default());
        assert!(html.contains("Temperature &mdash; 36.5 °C"));
        assert!(html.contains("Cold Aisle A"));
        assert!(html.contains("&lt;script&gt;"));
        assert!(!html.contains("<script>"));

        let only_flow = GroupFilter { sensor_type: Some(SensorType::AirFlow), containment: None };
        let html = render_dashboard(&guard, &only_flow);
        assert!(!html.contains("Temperature &mdash;"));
    }

    #[tokio::test]
    async fn device_endpoint_returns_404_for_unknown_ids() {
        let state = state();
        let found = device_handler(State(state.clone()), Path(1)).await;
        assert_eq!(found.status(), StatusCode::OK);
        let missing = device_handler(State(state), Path(404)).await;
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn group_endpoint_matches_display_names() {
        let state = state();
        let found = group_handler(State(state.clone()), Path("air flow".to_string())).await;
        assert_eq!(found.status(), StatusCode::OK);
        let missing = group_handler(State(state), Path("Dust Sensor".to_string())).await;
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn group_endpoint_does_not_alias_unknown_names() {
        let mut odd = sensor(3, "Seismograph");
        odd.topic = Some("dc/3".into());
        let state = MonitorState::new(SensorEngine::new(&[odd], 50), Vec::new(), Vec::new()).shared();

        let bogus = group_handler(State(state.clone()), Path("Foo".to_string())).await;
        assert_eq!(bogus.status(), StatusCode::NOT_FOUND);
        let unknown = group_handler(State(state), Path("unknown".to_string())).await;
        assert_eq!(unknown.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn groups_endpoint_rejects_bad_containment() {
        let state = state();
        let query = GroupQuery { sensor_type: None, containment: Some("x".into()) };
        let response = groups_handler(State(state), Query(query)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn api_snapshot_reports_summary() {
        let state = state();
        let Json(snapshot) = api_handler(State(state)).await;
        assert_eq!(snapshot.summary.total_sensors, 2);
        assert_eq!(snapshot.summary.critical_devices, 1);
        assert_eq!(snapshot.groups.len(), 2);
        assert!(!snapshot.mqtt_connected);
    }
}
