use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::control::TickReport;

/// Maximum number of events retained in the ring buffer.
const MAX_EVENTS: usize = 200;

// ---------------------------------------------------------------------------
// Public type alias
// ---------------------------------------------------------------------------

pub type SharedState = Arc<RwLock<SystemState>>;

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

pub struct SystemState {
    pub started_at: Instant,
    pub mqtt_connected: bool,
    last_report: Option<TickReport>,
    events: VecDeque<SystemEvent>,
}

#[derive(Clone, Serialize)]
pub struct SystemEvent {
    #[serde(with = "time::serde::rfc3339")]
    pub ts: OffsetDateTime,
    pub kind: EventKind,
    pub detail: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Tick,
    Actuator,
    Alert,
    Error,
    System,
}

// ---------------------------------------------------------------------------
// JSON response (what the API returns)
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct StatusResponse {
    pub uptime_secs: u64,
    pub mqtt_connected: bool,
    pub config_version: u64,
    pub current_stage: String,
    pub last_tick: Option<TickReport>,
    pub events: Vec<SystemEvent>,
}

// ---------------------------------------------------------------------------
// Construction & mutation
// ---------------------------------------------------------------------------

impl SystemState {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            mqtt_connected: false,
            last_report: None,
            events: VecDeque::with_capacity(MAX_EVENTS),
        }
    }

    pub fn last_report(&self) -> Option<&TickReport> {
        self.last_report.as_ref()
    }

    /// Newest first.
    pub fn events(&self) -> impl Iterator<Item = &SystemEvent> {
        self.events.iter().rev()
    }

    /// Record a finished control tick and one event per device command.
    pub fn record_tick(&mut self, report: TickReport) {
        for a in &report.actions {
            if let Some(on) = a.desired_on {
                let state_str = if on { "ON" } else { "OFF" };
                self.push_event(
                    EventKind::Actuator,
                    format!("{} set {state_str}: {} ({:?})", a.device, a.reason, a.outcome),
                );
            }
        }
        self.push_event(
            EventKind::Tick,
            format!(
                "{:?} tick, stage {}: {} applied, {} failed",
                report.trigger,
                report.stage,
                report.applied_actions(),
                report.failed_actions()
            ),
        );
        self.last_report = Some(report);
    }

    pub fn record_alert(&mut self, detail: String) {
        self.push_event(EventKind::Alert, detail);
    }

    /// Record an error event.
    pub fn record_error(&mut self, detail: String) {
        self.push_event(EventKind::Error, detail);
    }

    /// Record a generic system event.
    pub fn record_system(&mut self, detail: String) {
        self.push_event(EventKind::System, detail);
    }

    /// Build the JSON-serialisable status snapshot.
    pub fn to_status(&self, config_version: u64, current_stage: &str) -> StatusResponse {
        StatusResponse {
            uptime_secs: self.started_at.elapsed().as_secs(),
            mqtt_connected: self.mqtt_connected,
            config_version,
            current_stage: current_stage.to_string(),
            last_tick: self.last_report().cloned(),
            events: self.events().cloned().collect(),
        }
    }

    fn push_event(&mut self, kind: EventKind, detail: String) {
        if self.events.len() >= MAX_EVENTS {
            self.events.pop_front();
        }
        self.events.push_back(SystemEvent {
            ts: OffsetDateTime::now_utc(),
            kind,
            detail,
        });
    }
}

impl Default for SystemState {
    fn default() -> Self {
        Self::new()
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::tests::{feed_air, rig};
    use crate::control::{run_tick, Trigger};

    #[test]
    fn ring_buffer_drops_oldest() {
        let mut st = SystemState::new();
        for i in 0..(MAX_EVENTS + 5) {
            st.record_system(format!("event {i}"));
        }
        assert_eq!(st.events().count(), MAX_EVENTS);
        assert_eq!(st.events().next().unwrap().detail, format!("event {}", MAX_EVENTS + 4));
        assert_eq!(st.events().last().unwrap().detail, "event 5");
    }

    #[test]
    fn event_kinds_serialize_lowercase() {
        let mut st = SystemState::new();
        st.record_alert("pH high".into());
        let status = st.to_status(3, "Vegetative");
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["events"][0]["kind"], "alert");
        assert_eq!(json["config_version"], 3);
        assert!(json["last_tick"].is_null());
    }

    #[tokio::test]
    async fn record_tick_keeps_report_and_logs_commands() {
        let r = rig();
        feed_air(&r.sensors, 75.0, 45.0);
        let report = run_tick(&r.controller, Trigger::OnDemand).await;
        let commands = report.actions.iter().filter(|a| a.desired_on.is_some()).count();

        let mut st = SystemState::new();
        st.record_tick(report);

        assert!(st.last_report().is_some());
        let kinds: Vec<EventKind> = st.events().map(|e| e.kind).collect();
        assert_eq!(kinds[0], EventKind::Tick);
        assert_eq!(
            kinds.iter().filter(|k| **k == EventKind::Actuator).count(),
            commands
        );
    }
}
