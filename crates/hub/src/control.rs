//! Control loop: one tick reads the sensors, asks the engine what each device
//! should do, and pushes the commands through the gateway.
//!
//! Scheduled ticks and on-demand ticks (HTTP) share [`run_tick`]. A tick
//! never fails; everything that went wrong is in its [`TickReport`].
//!
//! ```text
//! snapshot config ──▶ light phase ──▶ read sensors ┐
//!                                   query light plug ┴─▶ decide ──▶ apply ──▶ report
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use time::OffsetDateTime;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{error, info};

use crate::context::ContextHandle;
use crate::engine::{self, decide, Device, EngineInput, LightInput};
use crate::gateway::{ActionEntry, ActionOutcome, ActuatorGateway};
use crate::humidity::HumidityMode;
use crate::light::LightPhase;
use crate::sensors::{take_snapshot_within, Reading, SensorSnapshot, SensorSource};
use crate::state::SharedState;

/// Delay before the first scheduled tick so telemetry can arrive.
const STARTUP_DELAY: Duration = Duration::from_secs(30);

/// Everything a tick needs. Shared by the control loop, the pH monitor and
/// the web front end.
pub struct Controller {
    pub context: ContextHandle,
    pub gateway: ActuatorGateway,
    pub sensors: Arc<dyn SensorSource>,
    /// Upper bound for one sensor snapshot.
    pub read_timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Scheduled,
    OnDemand,
}

#[derive(Debug, Clone, Serialize)]
pub struct TickReport {
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
    pub trigger: Trigger,
    pub config_version: u64,
    pub stage: String,
    pub light_phase: LightPhase,
    pub humidity_mode: HumidityMode,
    pub readings: SensorSnapshot,
    pub vpd: Reading,
    pub actions: Vec<ActionEntry>,
    pub notes: Vec<String>,
}

impl TickReport {
    pub fn failed_actions(&self) -> usize {
        self.actions
            .iter()
            .filter(|a| matches!(a.outcome, ActionOutcome::Failed { .. }))
            .count()
    }

    pub fn applied_actions(&self) -> usize {
        self.actions
            .iter()
            .filter(|a| a.outcome == ActionOutcome::Applied)
            .count()
    }
}

// ---------------------------------------------------------------------------
// One tick
// ---------------------------------------------------------------------------

pub async fn run_tick(controller: &Controller, trigger: Trigger) -> TickReport {
    run_tick_at(controller, trigger, OffsetDateTime::now_utc()).await
}

/// [`run_tick`] with an explicit wall-clock time.
pub async fn run_tick_at(
    controller: &Controller,
    trigger: Trigger,
    now: OffsetDateTime,
) -> TickReport {
    // One snapshot for the whole tick.
    let ctx = controller.context.snapshot();
    let cfg = &ctx.config;
    let devices = &cfg.actuators.devices;

    let local = cfg.light_schedule.local_time(now);
    let light_phase = cfg.light_schedule.phase_at(local);

    let light_state = async {
        match devices.address(Device::Light) {
            Some(addr) => controller.gateway.get_power(Device::Light, addr).await,
            None => None,
        }
    };
    let (readings, last_known) = tokio::join!(
        take_snapshot_within(
            controller.sensors.as_ref(),
            &cfg.calibration.model,
            controller.read_timeout
        ),
        light_state
    );

    let decision = decide(&EngineInput {
        snapshot: &readings,
        stage: &cfg.current_stage,
        profile: cfg.current_profile(),
        light_phase,
        mode: cfg.humidity_mode,
        devices,
        light: LightInput {
            should_be_on: light_phase == LightPhase::LightsOn,
            last_known,
        },
    });

    let actions = controller.gateway.apply(&decision.intents, devices).await;

    let report = TickReport {
        at: now,
        trigger,
        config_version: ctx.version,
        stage: cfg.current_stage.clone(),
        light_phase,
        humidity_mode: cfg.humidity_mode,
        vpd: engine::snapshot_vpd(&readings),
        readings,
        actions,
        notes: decision.notes,
    };
    info!(
        ?trigger,
        stage = %report.stage,
        version = report.config_version,
        applied = report.applied_actions(),
        failed = report.failed_actions(),
        "control tick complete"
    );
    report
}

// ---------------------------------------------------------------------------
// Loop
// ---------------------------------------------------------------------------

/// Run scheduled ticks forever. Intended to be `tokio::spawn`-ed from main.
///
/// The interval is read once at startup. Each tick runs in its own task so a
/// panic is logged and the loop carries on.
pub async fn run(controller: Arc<Controller>, shared: SharedState) {
    let period = controller.context.snapshot().config.control.tick_interval();
    let mut ticker = interval_at(Instant::now() + STARTUP_DELAY, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(tick_sec = period.as_secs(), "control loop started");
    shared
        .write()
        .await
        .record_system(format!("control loop started (every {}s)", period.as_secs()));

    loop {
        ticker.tick().await;

        let c = Arc::clone(&controller);
        match tokio::spawn(async move { run_tick(&c, Trigger::Scheduled).await }).await {
            Ok(report) => shared.write().await.record_tick(report),
            Err(e) => {
                error!("control tick aborted: {e}");
                shared
                    .write()
                    .await
                    .record_error(format!("control tick aborted: {e}"));
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
