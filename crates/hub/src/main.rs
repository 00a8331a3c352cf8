mod calibration;
mod config;
mod context;
mod control;
mod engine;
mod gateway;
mod humidity;
mod light;
mod mqtt;
mod ph_monitor;
mod plug;
mod sensors;
mod state;
mod web;

use anyhow::Result;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::{env, sync::Arc, time::Duration};
use tokio::sync::RwLock;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use config::{AlertSinkKind, ConfigStore, SensorSourceKind, TransportKind};
use context::ContextHandle;
use control::Controller;
use gateway::{ActuatorGateway, PlugTransport};
use mqtt::{
    extract_node_id, extract_plug_id, parse_power_payload, TelemetryMsg, PLUG_STATE_FILTER,
    TELEMETRY_FILTER,
};
use ph_monitor::{AlertSink, LogAlertSink, MqttAlertSink, PhMonitor};
use plug::{MockPlugs, MqttPlugs};
use sensors::{SensorSource, SimulatedSensors, TelemetrySensors};
use state::{SharedState, SystemState};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("grow_hub=info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // ── Env config ──────────────────────────────────────────────────
    let broker = env::var("MQTT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port: u16 = env::var("MQTT_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(1883);
    let web_port: u16 = env::var("WEB_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(8080);
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "grow.toml".to_string());

    // ── Config file ─────────────────────────────────────────────────
    let store = ConfigStore::new(&config_path);
    let cfg = store.load()?;
    info!(
        path = %config_path,
        stage = %cfg.current_stage,
        stages = cfg.stages.len(),
        devices = cfg.actuators.devices.configured().count(),
        "config loaded"
    );

    // ── MQTT client ─────────────────────────────────────────────────
    let mut mqttoptions = MqttOptions::new("grow-hub", broker, port);
    mqttoptions.set_keep_alive(Duration::from_secs(30));
    let (client, eventloop) = AsyncClient::new(mqttoptions, 20);

    // ── Sensors, plugs, alerts ──────────────────────────────────────
    let telemetry = match cfg.sensors.source {
        SensorSourceKind::Mqtt => Some(Arc::new(TelemetrySensors::new(Duration::from_secs(
            cfg.sensors.stale_after_sec,
        )))),
        SensorSourceKind::Sim => None,
    };
    let sensors: Arc<dyn SensorSource> = match &telemetry {
        Some(t) => t.clone(),
        None => {
            warn!("using simulated sensors");
            Arc::new(SimulatedSensors::new())
        }
    };

    let mqtt_plugs = match cfg.actuators.transport {
        TransportKind::Mqtt => Some(Arc::new(MqttPlugs::new(client.clone()))),
        TransportKind::Mock => None,
    };
    let transport: Arc<dyn PlugTransport> = match &mqtt_plugs {
        Some(p) => p.clone(),
        None => {
            warn!("using mock plugs; no device will be switched");
            Arc::new(MockPlugs::new())
        }
    };

    let sink: Arc<dyn AlertSink> = match cfg.alerts.sink {
        AlertSinkKind::Log => Arc::new(LogAlertSink),
        AlertSinkKind::Mqtt => Arc::new(MqttAlertSink::new(client.clone())),
    };

    let io_timeout = cfg.control.device_timeout();
    let controller = Arc::new(Controller {
        gateway: ActuatorGateway::new(transport, cfg.control.plug_cache(), io_timeout),
        context: ContextHandle::new(cfg, Some(store)),
        sensors,
        read_timeout: io_timeout,
    });

    // ── Shared state (ephemeral, for the web API) ───────────────────
    let shared: SharedState = Arc::new(RwLock::new(SystemState::new()));
    shared
        .write()
        .await
        .record_system("hub started".to_string());

    // ── Background tasks ────────────────────────────────────────────
    tokio::spawn(control::run(Arc::clone(&controller), Arc::clone(&shared)));

    let monitor = Arc::new(PhMonitor::new(Arc::clone(&controller), sink, io_timeout));
    tokio::spawn(ph_monitor::run(monitor, Arc::clone(&shared)));

    let web_state = web::AppState {
        controller: Arc::clone(&controller),
        shared: Arc::clone(&shared),
    };
    let web_task = tokio::spawn(web::serve(web_state, web_port));

    tokio::spawn(mqtt_loop(
        client,
        eventloop,
        telemetry,
        mqtt_plugs,
        Arc::clone(&shared),
    ));

    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            if let Err(e) = res {
                error!("failed to listen for shutdown signal: {e}");
            }
            info!("shutting down");
        }
        res = web_task => {
            match res {
                Ok(Err(e)) => error!("{e:#}"),
                Ok(Ok(())) => warn!("web server stopped"),
                Err(e) => error!("web server task failed: {e}"),
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// MQTT event loop
// ---------------------------------------------------------------------------

async fn mqtt_loop(
    client: AsyncClient,
    mut eventloop: EventLoop,
    telemetry: Option<Arc<TelemetrySensors>>,
    plugs: Option<Arc<MqttPlugs>>,
    shared: SharedState,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(p))) => {
                if let Err(msg) = handle_publish(&p.topic, &p.payload, &telemetry, &plugs) {
                    warn!("{msg}");
                    shared.write().await.record_error(msg);
                }
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("mqtt connected");
                // Subscriptions don't survive a clean-session reconnect.
                for filter in [TELEMETRY_FILTER, PLUG_STATE_FILTER] {
                    if let Err(e) = client.try_subscribe(filter, QoS::AtLeastOnce) {
                        error!("mqtt subscribe {filter} failed: {e}");
                    }
                }
                let mut st = shared.write().await;
                st.mqtt_connected = true;
                st.record_system("mqtt connected".to_string());
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                warn!("mqtt disconnected");
                let mut st = shared.write().await;
                st.mqtt_connected = false;
                st.record_system("mqtt disconnected".to_string());
            }
            Ok(_) => {}
            Err(e) => {
                warn!("mqtt error: {e}. reconnecting...");
                let mut st = shared.write().await;
                st.mqtt_connected = false;
                st.record_error(format!("mqtt error: {e}"));
                drop(st);

                sleep(Duration::from_secs(2)).await;
            }
        }
    }
}

/// Route one incoming publish. Returns a description of anything malformed.
fn handle_publish(
    topic: &str,
    payload: &[u8],
    telemetry: &Option<Arc<TelemetrySensors>>,
    plugs: &Option<Arc<MqttPlugs>>,
) -> Result<(), String> {
    if let Some(node_id) = extract_node_id(topic) {
        let msg: TelemetryMsg = serde_json::from_slice(payload)
            .map_err(|e| format!("bad telemetry json: {e} topic={topic}"))?;
        debug!(node = node_id, ts = msg.ts, readings = msg.readings.len(), "telemetry");
        match telemetry {
            Some(t) => {
                for r in &msg.readings {
                    t.record(r.quantity, r.raw);
                }
            }
            None => debug!(node = node_id, "telemetry ignored (simulated sensors)"),
        }
    } else if let Some(plug_id) = extract_plug_id(topic) {
        let on = parse_power_payload(payload).map_err(|e| format!("{e} topic={topic}"))?;
        debug!(plug = plug_id, on, "plug state");
        if let Some(p) = plugs {
            p.observe(plug_id, on);
        }
    } else {
        debug!("unhandled topic={topic}");
    }
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::PlugTransport;
    use crate::sensors::{Quantity, Reading};

    fn mqtt_plugs() -> (Arc<MqttPlugs>, EventLoop) {
        let (client, eventloop) = AsyncClient::new(MqttOptions::new("test", "127.0.0.1", 1883), 10);
        (Arc::new(MqttPlugs::new(client)), eventloop)
    }

    #[tokio::test]
    async fn telemetry_is_recorded() {
        let t = Arc::new(TelemetrySensors::new(Duration::from_secs(60)));
        let payload = br#"{"ts":1,"readings":[{"quantity":"ph_probe","raw":1.6}]}"#;
        handle_publish("tele/tent-a/reading", payload, &Some(t.clone()), &None).unwrap();
        assert_eq!(t.read(Quantity::PhProbe).await, Reading::Value(1.6));
    }

    #[test]
    fn bad_telemetry_is_reported() {
        let err = handle_publish("tele/tent-a/reading", b"not json", &None, &None).unwrap_err();
        assert!(err.contains("bad telemetry json"));
    }

    #[tokio::test]
    async fn plug_state_reaches_transport() {
        let (plugs, _eventloop) = mqtt_plugs();
        let query = tokio::spawn({
            let plugs = plugs.clone();
            async move { plugs.get_power("tent-fan").await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle_publish("stat/tent-fan/POWER", b"ON", &None, &Some(plugs)).unwrap();
        assert!(query.await.unwrap().unwrap());
    }

    #[test]
    fn bad_plug_payload_is_reported() {
        let err = handle_publish("stat/tent-fan/POWER", b"BLINK", &None, &None).unwrap_err();
        assert!(err.contains("unknown power state"));
    }

    #[test]
    fn unrelated_topic_is_ignored() {
        handle_publish("zigbee/bridge/state", b"online", &None, &None).unwrap();
    }
}
