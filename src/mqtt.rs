//! ==============================================================================
//! mqtt.rs - live sensor feed
//! ==============================================================================
//!
//! purpose:
//!     subscribes to every sensor device's topic and hands each inbound
//!     message to the aggregation engine as soon as it arrives.
//!
//! message flow:
//!
//!     broker ──► eventloop.poll() ──► TopicRouter ──► Payload::parse_bytes
//!                                          │                 │ (raw text on failure)
//!                                          ▼                 ▼
//!                                  (device, sensor type) ──► engine.ingest
//!
//! lifecycle:
//!     - every ConnAck re-subscribes all topics (rumqttc reconnects on poll)
//!     - connection errors flip `mqtt_connected` and back off for a while
//!     - on shutdown all topics are unsubscribed before disconnecting
//!
//! relationships:
//!     - used by: main.rs (runs until ctrl-c)
//!     - writes: state.rs (engine, connection flag)
//!
//! ==============================================================================

use crate::config::MqttConfig;
use crate::domain::{Device, Payload, SensorType};
use crate::engine::{IngestOutcome, SensorEngine};
use crate::state::SharedState;

use chrono::{DateTime, Utc};
use rumqttc::{AsyncClient, Event, MqttOptions, Outgoing, Packet, Publish, QoS, SubscribeFilter};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

const CHANNEL_CAPACITY: usize = 64;
const SHUTDOWN_FLUSH: Duration = Duration::from_secs(2);

// ==============================================================================
// topic routing
// ==============================================================================

#[derive(Debug, Clone)]
struct Route {
    filter: String,
    device_id: i64,
    sensor_type: SensorType,
}

/// maps topics to the sensor devices listening on them
#[derive(Debug, Clone, Default)]
pub struct TopicRouter {
    routes: Vec<Route>,
}

impl TopicRouter {
    pub fn from_devices<'a, I: IntoIterator<Item = &'a Device>>(devices: I) -> Self {
        let routes = devices
            .into_iter()
            .filter_map(|device| {
                Some(Route {
                    filter: device.mqtt_topic()?.to_string(),
                    device_id: device.id,
                    sensor_type: device.sensor_kind()?,
                })
            })
            .collect();
        Self { routes }
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// distinct subscription filters, sorted
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.routes.iter().map(|r| r.filter.clone()).collect();
        topics.sort();
        topics.dedup();
        topics
    }

    pub fn targets<'a>(&'a self, topic: &'a str) -> impl Iterator<Item = (i64, SensorType)> + 'a {
        self.routes
            .iter()
            .filter(move |r| topic_matches(&r.filter, topic))
            .map(|r| (r.device_id, r.sensor_type))
    }
}

/// mqtt filter matching with `+` (one level) and `#` (rest of the topic)
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');
    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => continue,
            (Some(f), Some(t)) if f == t => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

// ==============================================================================
// message handling
// ==============================================================================

/// decode a message body; anything that is not json is kept as raw text
pub fn decode_payload(topic: &str, bytes: &[u8]) -> Payload {
    Payload::parse_bytes(bytes).unwrap_or_else(|e| {
        warn!(topic, error = %e, "failed to parse mqtt payload; keeping raw text");
        Payload::Raw(String::from_utf8_lossy(bytes).into_owned())
    })
}

/// apply one message to every device routed to its topic
pub fn apply_message(
    engine: &mut SensorEngine,
    router: &TopicRouter,
    topic: &str,
    bytes: &[u8],
    received_at: DateTime<Utc>,
) -> Vec<(i64, IngestOutcome)> {
    let targets: Vec<(i64, SensorType)> = router.targets(topic).collect();
    if targets.is_empty() {
        debug!(topic, "message on unrouted topic");
        return Vec::new();
    }
    let payload = decode_payload(topic, bytes);
    targets
        .into_iter()
        .map(|(device_id, sensor_type)| {
            let outcome = engine.ingest(device_id, sensor_type, payload.clone(), received_at);
            (device_id, outcome)
        })
        .collect()
}

async fn handle_publish(state: &SharedState, router: &TopicRouter, publish: &Publish, show_data: bool) {
    let now = Utc::now();
    let mut guard = state.write().await;
    let outcomes = apply_message(&mut guard.engine, router, &publish.topic, &publish.payload, now);
    if !outcomes.is_empty() {
        guard.last_update = Some(now);
    }
    drop(guard);

    for (device, outcome) in outcomes {
        if show_data {
            info!(device, topic = %publish.topic, ?outcome, "sensor message");
        } else {
            debug!(device, topic = %publish.topic, ?outcome, "sensor message");
        }
    }
}

// ==============================================================================
// feed loop
// ==============================================================================

pub fn mqtt_options(config: &MqttConfig) -> MqttOptions {
    let mut options = MqttOptions::new(config.client_id.clone(), config.host.clone(), config.port);
    options.set_keep_alive(config.keep_alive());
    if let Some(username) = &config.username {
        options.set_credentials(username.clone(), config.password.clone().unwrap_or_default());
    }
    options
}

async fn set_connected(state: &SharedState, connected: bool) {
    state.write().await.mqtt_connected = connected;
}

/// run the feed until `shutdown` resolves
pub async fn run_feed<F>(config: &MqttConfig, state: SharedState, show_data: bool, shutdown: F)
where
    F: Future<Output = ()>,
{
    let router = {
        let guard = state.read().await;
        TopicRouter::from_devices(guard.engine.devices())
    };
    if router.is_empty() {
        warn!("no sensor devices with mqtt topics; live feed idle");
        shutdown.await;
        return;
    }

    let topics = router.topics();
    info!(
        broker = %format!("{}:{}", config.host, config.port),
        topics = topics.len(),
        "starting mqtt feed"
    );

    let (client, mut eventloop) = AsyncClient::new(mqtt_options(config), CHANNEL_CAPACITY);
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            event = eventloop.poll() => match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("mqtt connected");
                    set_connected(&state, true).await;
                    let filters: Vec<SubscribeFilter> = topics
                        .iter()
                        .map(|t| SubscribeFilter::new(t.clone(), QoS::AtMostOnce))
                        .collect();
                    // the eventloop must keep polling while the request is queued
                    let client = client.clone();
                    tokio::spawn(async move {
                        if let Err(e) = client.subscribe_many(filters).await {
                            warn!(error = %e, "failed to subscribe sensor topics");
                        }
                    });
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    handle_publish(&state, &router, &publish, show_data).await;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "mqtt connection error");
                    set_connected(&state, false).await;
                    tokio::time::sleep(config.reconnect_delay()).await;
                }
            }
        }
    }

    info!("stopping mqtt feed");
    for topic in &topics {
        if let Err(e) = client.try_unsubscribe(topic.clone()) {
            debug!(topic = %topic, error = %e, "unsubscribe not queued");
        }
    }
    if let Err(e) = client.try_disconnect() {
        debug!(error = %e, "disconnect not queued");
    }
    let flush = async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    };
    if tokio::time::timeout(SHUTDOWN_FLUSH, flush).await.is_err() {
        debug!("mqtt disconnect did not flush in time");
    }
    set_connected(&state, false).await;
}

// ==============================================================================
// tests
// ==============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SensorStatus;
    use crate::registry::tests::sensor;

    #[test]
    fn wildcard_filters() {
        assert!(topic_matches("dc/a/temp", "dc/a/temp"));
        assert!(!topic_matches("dc/a/temp", "dc/a/temp/x"));
        assert!(topic_matches("dc/+/temp", "dc/rack1/temp"));
        assert!(!topic_matches("dc/+/temp", "dc/rack1/flow"));
        assert!(topic_matches("dc/#", "dc/rack1/temp"));
        assert!(topic_matches("#", "anything/at/all"));
        assert!(!topic_matches("dc/a", "dc"));
    }

    #[test]
    fn router_skips_devices_without_topic_or_type() {
        let mut silent = sensor(2, "Temperature");
        silent.topic = Some("  ".into());
        let mut untyped = sensor(3, "Temperature");
        untyped.sensor_type = None;
        let mut shared = sensor(4, "Humidity");
        shared.topic = Some("dc/1".into());

        let router = TopicRouter::from_devices(&[sensor(1, "Temperature"), silent, untyped, shared]);
        assert_eq!(router.topics(), ["dc/1"]);
        let targets: Vec<_> = router.targets("dc/1").collect();
        assert_eq!(
            targets,
            [(1, SensorType::Temperature), (4, SensorType::Humidity)]
        );
    }

    #[test]
    fn messages_reach_routed_devices() {
        let devices = [sensor(1, "Temperature"), sensor(2, "Air Flow")];
        let mut engine = SensorEngine::new(&devices, 50);
        let router = TopicRouter::from_devices(&devices);

        let outcomes = apply_message(&mut engine, &router, "dc/1", br#"{"temp": 31.5}"#, Utc::now());
        assert_eq!(outcomes, [(1, IngestOutcome::Applied(SensorStatus::Warning))]);
        assert!(apply_message(&mut engine, &router, "dc/9", b"{}", Utc::now()).is_empty());
        assert_eq!(engine.device(2).unwrap().status, SensorStatus::Offline);
    }

    #[test]
    fn unparsable_messages_are_ingested_raw() {
        let devices = [sensor(1, "Temperature")];
        let mut engine = SensorEngine::new(&devices, 50);
        let router = TopicRouter::from_devices(&devices);

        apply_message(&mut engine, &router, "dc/1", br#"{"temp": 22}"#, Utc::now());
        assert_eq!(engine.device(1).unwrap().status, SensorStatus::Normal);

        let outcomes = apply_message(&mut engine, &router, "dc/1", b"temp=22", Utc::now());
        assert_eq!(outcomes, [(1, IngestOutcome::Applied(SensorStatus::Offline))]);
        assert_eq!(
            engine.device(1).unwrap().current_value,
            Some(Payload::Raw("temp=22".into()))
        );
    }

    #[test]
    fn options_carry_credentials() {
        let config = MqttConfig {
            username: Some("monitor".into()),
            password: Some("pw".into()),
            ..MqttConfig::default()
        };
        let options = mqtt_options(&config);
        assert_eq!(options.broker_address(), ("localhost".to_string(), 1883));
        assert_eq!(
            options.credentials(),
            Some(("monitor".to_string(), "pw".to_string()))
        );
    }
}
