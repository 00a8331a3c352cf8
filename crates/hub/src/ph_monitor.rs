//! Periodic reservoir pH check.
//!
//! ```text
//! Idle ──[interval elapsed]──▶ Checking ──[read, compare, maybe alert]──▶ Idle
//! ```
//!
//! Every failure along the way is logged and the monitor goes back to Idle.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, QoS};
use serde::Serialize;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::config::TargetRange;
use crate::control::Controller;
use crate::mqtt::ALERT_TOPIC;
use crate::sensors::{read_ph, Reading};
use crate::state::SharedState;

/// Where out-of-range notifications go.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn notify(&self, subject: &str, body: &str) -> anyhow::Result<()>;
}

/// Writes alerts to the log only.
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn notify(&self, subject: &str, body: &str) -> anyhow::Result<()> {
        warn!(subject, "ALERT: {body}");
        Ok(())
    }
}

/// Publishes `{"subject", "body"}` to `grow/alerts`.
pub struct MqttAlertSink {
    client: AsyncClient,
}

impl MqttAlertSink {
    pub fn new(client: AsyncClient) -> Self {
        Self { client }
    }
}

#[derive(Serialize)]
struct AlertMsg<'a> {
    subject: &'a str,
    body: &'a str,
}

#[async_trait]
impl AlertSink for MqttAlertSink {
    async fn notify(&self, subject: &str, body: &str) -> anyhow::Result<()> {
        let payload = serde_json::to_vec(&AlertMsg { subject, body })?;
        self.client
            .publish(ALERT_TOPIC, QoS::AtLeastOnce, false, payload)
            .await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Monitor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorState {
    Idle,
    Checking,
}

/// Outcome of one check.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum PhCheck {
    InRange { ph: f64 },
    Alerted { ph: f64, min: f64, max: f64 },
    AlertFailed { ph: f64, error: String },
    Unavailable { reason: String },
    NoTargetRange { stage: String },
}

impl PhCheck {
    fn summary(&self) -> String {
        match self {
            Self::InRange { ph } => format!("pH {ph:.2} in range"),
            Self::Alerted { ph, min, max } => {
                format!("pH {ph:.2} outside [{min}, {max}], alert sent")
            }
            Self::AlertFailed { ph, error } => {
                format!("pH {ph:.2} out of range, alert failed: {error}")
            }
            Self::Unavailable { reason } => format!("pH check skipped: {reason}"),
            Self::NoTargetRange { stage } => {
                format!("pH check skipped: stage '{stage}' has no pH range")
            }
        }
    }
}

pub struct PhMonitor {
    controller: Arc<Controller>,
    sink: Arc<dyn AlertSink>,
    state: Mutex<MonitorState>,
    /// Bound for one alert delivery.
    notify_timeout: Duration,
}

impl PhMonitor {
    pub fn new(
        controller: Arc<Controller>,
        sink: Arc<dyn AlertSink>,
        notify_timeout: Duration,
    ) -> Self {
        Self {
            controller,
            sink,
            state: Mutex::new(MonitorState::Idle),
            notify_timeout,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> MonitorState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, next: MonitorState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = next;
    }

    /// Run one Idle → Checking → Idle cycle.
    pub async fn check_once(&self) -> PhCheck {
        self.set_state(MonitorState::Checking);
        let outcome = self.check().await;
        self.set_state(MonitorState::Idle);
        outcome
    }

    async fn check(&self) -> PhCheck {
        let ctx = self.controller.context.snapshot();
        let cfg = &ctx.config;

        let Some(range) = cfg.current_profile().and_then(|p| p.water_ph) else {
            return PhCheck::NoTargetRange {
                stage: cfg.current_stage.clone(),
            };
        };

        let ph = match read_ph(
            self.controller.sensors.as_ref(),
            &cfg.calibration.model,
            self.controller.read_timeout,
        )
        .await
        {
            Reading::Value(ph) => ph,
            Reading::Unavailable(reason) => return PhCheck::Unavailable { reason },
        };

        if in_range(ph, &range) {
            return PhCheck::InRange { ph };
        }

        let subject = format!("pH out of range ({ph:.2})");
        let body = format!(
            "Reservoir pH is {ph:.2}; stage '{}' expects {}-{} (target {}).",
            cfg.current_stage, range.min, range.max, range.target
        );
        match timeout(self.notify_timeout, self.sink.notify(&subject, &body)).await {
            Ok(Ok(())) => PhCheck::Alerted {
                ph,
                min: range.min,
                max: range.max,
            },
            Ok(Err(e)) => PhCheck::AlertFailed {
                ph,
                error: format!("{e:#}"),
            },
            Err(_) => PhCheck::AlertFailed {
                ph,
                error: "alert delivery timed out".to_string(),
            },
        }
    }
}

fn in_range(ph: f64, range: &TargetRange) -> bool {
    (range.min..=range.max).contains(&ph)
}

/// Check on a fixed interval forever; the first check runs one full interval
/// after startup.
pub async fn run(monitor: Arc<PhMonitor>, shared: SharedState) {
    let period = monitor.controller.context.snapshot().config.control.ph_check_interval();
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(interval_sec = period.as_secs(), "pH monitor started");

    loop {
        ticker.tick().await;

        let m = Arc::clone(&monitor);
        match tokio::spawn(async move { m.check_once().await }).await {
            Ok(outcome) => {
                let summary = outcome.summary();
                let mut st = shared.write().await;
                match &outcome {
                    PhCheck::InRange { .. } | PhCheck::NoTargetRange { .. } => {
                        info!("{summary}");
                        st.record_system(summary);
                    }
                    PhCheck::Alerted { .. } => {
                        warn!("{summary}");
                        st.record_alert(summary);
                    }
                    PhCheck::AlertFailed { .. } | PhCheck::Unavailable { .. } => {
                        warn!("{summary}");
                        st.record_error(summary);
                    }
                }
            }
            Err(e) => {
                // The task died mid-check; make sure the next interval starts Idle.
                monitor.set_state(MonitorState::Idle);
                error!("pH check aborted: {e}");
                shared.write().await.record_error(format!("pH check aborted: {e}"));
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::sample_config;
    use crate::control::tests::rig_with;
    use crate::sensors::Quantity;
    use crate::state::SystemState;
    use tokio::sync::RwLock;

    /// Records every alert; optionally fails or hangs.
    #[derive(Default)]
    struct RecordingSink {
        sent: Mutex<Vec<(String, String)>>,
        fail: bool,
        hang: bool,
    }

    #[async_trait]
    impl AlertSink for RecordingSink {
        async fn notify(&self, subject: &str, body: &str) -> anyhow::Result<()> {
            if self.hang {
                std::future::pending::<()>().await;
            }
            if self.fail {
                anyhow::bail!("smtp unreachable");
            }
            self.sent
                .lock()
                .unwrap()
                .push((subject.to_string(), body.to_string()));
            Ok(())
        }
    }

    // Default model: pH = -5.6548 * V + 15.509.
    fn volts_for(ph: f64) -> f64 {
        (ph - 15.509) / -5.6548
    }

    fn monitor(sink: Arc<RecordingSink>) -> (PhMonitor, Arc<crate::sensors::TelemetrySensors>) {
        let r = rig_with(sample_config());
        (PhMonitor::new(r.controller, sink, Duration::from_secs(5)), r.sensors)
    }

    #[tokio::test]
    async fn in_range_sends_nothing() {
        let sink = Arc::new(RecordingSink::default());
        let (m, sensors) = monitor(sink.clone());
        sensors.record(Quantity::PhProbe, volts_for(6.2));

        let outcome = m.check_once().await;
        assert!(matches!(outcome, PhCheck::InRange { ph } if (ph - 6.2).abs() < 0.01));
        assert!(sink.sent.lock().unwrap().is_empty());
        assert_eq!(m.state(), MonitorState::Idle);
    }

    #[tokio::test]
    async fn out_of_range_alerts() {
        let sink = Arc::new(RecordingSink::default());
        let (m, sensors) = monitor(sink.clone());
        sensors.record(Quantity::PhProbe, volts_for(7.4));

        let outcome = m.check_once().await;
        assert!(matches!(outcome, PhCheck::Alerted { min, max, .. } if min == 5.8 && max == 6.5));
        let sent = sink.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].0.contains("7.40"));
        assert!(sent[0].1.contains("Vegetative"));
    }

    #[tokio::test]
    async fn boundary_value_is_in_range() {
        let sink = Arc::new(RecordingSink::default());
        let (m, sensors) = monitor(sink.clone());
        sensors.record(Quantity::PhProbe, volts_for(6.5));

        assert!(matches!(m.check_once().await, PhCheck::InRange { .. }));
    }

    #[tokio::test]
    async fn missing_reading_is_swallowed() {
        let sink = Arc::new(RecordingSink::default());
        let (m, _sensors) = monitor(sink.clone());

        let outcome = m.check_once().await;
        assert!(matches!(
            outcome,
            PhCheck::Unavailable { ref reason } if reason.contains("no pH reading")
        ));
        assert_eq!(m.state(), MonitorState::Idle);
    }

    #[tokio::test]
    async fn failing_sink_is_reported_not_raised() {
        let sink = Arc::new(RecordingSink {
            fail: true,
            ..Default::default()
        });
        let (m, sensors) = monitor(sink);
        sensors.record(Quantity::PhProbe, volts_for(4.0));

        let outcome = m.check_once().await;
        assert!(matches!(
            outcome,
            PhCheck::AlertFailed { ref error, .. } if error.contains("smtp unreachable")
        ));
        assert_eq!(m.state(), MonitorState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_sink_times_out() {
        let sink = Arc::new(RecordingSink {
            hang: true,
            ..Default::default()
        });
        let (m, sensors) = monitor(sink);
        sensors.record(Quantity::PhProbe, volts_for(4.0));

        let outcome = m.check_once().await;
        assert!(matches!(
            outcome,
            PhCheck::AlertFailed { ref error, .. } if error.contains("timed out")
        ));
    }

    #[tokio::test]
    async fn stage_without_ph_range_is_skipped() {
        let sink = Arc::new(RecordingSink::default());
        let r = rig_with(sample_config());
        r.controller.context.set_stage("Flowering").await.unwrap();
        r.sensors.record(Quantity::PhProbe, volts_for(9.0));
        let m = PhMonitor::new(r.controller, sink.clone(), Duration::from_secs(5));

        let outcome = m.check_once().await;
        assert_eq!(
            outcome,
            PhCheck::NoTargetRange {
                stage: "Flowering".into()
            }
        );
        assert!(sink.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn log_sink_always_succeeds() {
        LogAlertSink.notify("subject", "body").await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn loop_waits_one_interval_then_records_alert() {
        let sink = Arc::new(RecordingSink::default());
        let r = rig_with(sample_config());
        let m = Arc::new(PhMonitor::new(r.controller, sink.clone(), Duration::from_secs(5)));
        let shared = Arc::new(RwLock::new(SystemState::new()));

        let handle = tokio::spawn(run(m.clone(), shared.clone()));

        tokio::time::sleep(Duration::from_secs(4 * 60 * 60 - 60)).await;
        // Feed the reading just before the first check so it isn't stale.
        r.sensors.record(Quantity::PhProbe, volts_for(8.0));
        assert!(sink.sent.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(sink.sent.lock().unwrap().len(), 1);
        assert_eq!(m.state(), MonitorState::Idle);
        assert!(shared
            .read()
            .await
            .events()
            .any(|e| e.detail.contains("alert sent")));

        handle.abort();
    }
}
