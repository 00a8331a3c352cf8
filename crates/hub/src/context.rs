//! The live configuration snapshot and the operations that replace it.
//!
//! Readers take an `Arc<ControllerContext>` once and keep it for the whole
//! tick. Writers build a modified copy, validate and persist it, then swap it
//! in; nothing is ever mutated in place.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tracing::info;

use crate::calibration::{
    CalibrationError, CalibrationMode, CalibrationPoint, CalibrationProgress,
};
use crate::config::{Config, ConfigStore, StageProfile};
use crate::humidity::HumidityMode;
use crate::light::LightSchedule;

#[derive(Debug)]
pub struct ControllerContext {
    /// Bumped on every accepted update.
    pub version: u64,
    pub config: Config,
}

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("unknown stage '{0}'")]
    UnknownStage(String),
    #[error("calibration failed: {0}")]
    Calibration(#[from] CalibrationError),
    #[error("{0:#}")]
    Invalid(anyhow::Error),
    #[error("failed to persist configuration: {0:#}")]
    Persist(anyhow::Error),
}

pub struct ContextHandle {
    tx: watch::Sender<Arc<ControllerContext>>,
    writer: Mutex<()>,
    store: Option<ConfigStore>,
}

impl ContextHandle {
    /// `store` is written on every update; `None` keeps changes in memory.
    pub fn new(config: Config, store: Option<ConfigStore>) -> Self {
        let (tx, _) = watch::channel(Arc::new(ControllerContext { version: 1, config }));
        Self {
            tx,
            writer: Mutex::new(()),
            store,
        }
    }

    pub fn snapshot(&self) -> Arc<ControllerContext> {
        self.tx.borrow().clone()
    }

    /// Apply `edit` to a copy of the live config and swap the copy in.
    /// Any error leaves the live snapshot untouched.
    async fn update<T>(
        &self,
        what: &str,
        edit: impl FnOnce(&mut Config) -> Result<T, UpdateError>,
    ) -> Result<T, UpdateError> {
        let _guard = self.writer.lock().await;
        let current = self.snapshot();
        let mut config = current.config.clone();

        let out = edit(&mut config)?;
        config.validate().map_err(UpdateError::Invalid)?;
        if let Some(store) = &self.store {
            store.save(&config).map_err(UpdateError::Persist)?;
        }

        let version = current.version + 1;
        self.tx
            .send_replace(Arc::new(ControllerContext { version, config }));
        info!(version, "configuration updated: {what}");
        Ok(out)
    }

    pub async fn set_stage(&self, stage: &str) -> Result<(), UpdateError> {
        self.update("stage", |c| {
            if !c.stages.contains_key(stage) {
                return Err(UpdateError::UnknownStage(stage.to_string()));
            }
            c.current_stage = stage.to_string();
            Ok(())
        })
        .await
    }

    pub async fn set_humidity_mode(&self, mode: HumidityMode) -> Result<(), UpdateError> {
        self.update("humidity mode", |c| {
            c.humidity_mode = mode;
            Ok(())
        })
        .await
    }

    pub async fn set_light_schedule(&self, schedule: LightSchedule) -> Result<(), UpdateError> {
        self.update("light schedule", |c| {
            c.light_schedule = schedule;
            Ok(())
        })
        .await
    }

    /// Insert or replace one stage's target bands.
    pub async fn set_stage_profile(
        &self,
        stage: &str,
        profile: StageProfile,
    ) -> Result<(), UpdateError> {
        self.update("stage profile", |c| {
            c.stages.insert(stage.to_string(), profile);
            Ok(())
        })
        .await
    }

    pub async fn add_calibration_point(
        &self,
        point: CalibrationPoint,
    ) -> Result<CalibrationProgress, UpdateError> {
        self.update("calibration point", |c| Ok(c.calibration.add_point(point)?))
            .await
    }

    pub async fn set_calibration_mode(&self, mode: CalibrationMode) -> Result<(), UpdateError> {
        self.update("calibration mode", |c| {
            c.calibration.set_mode(mode);
            Ok(())
        })
        .await
    }

    pub async fn reset_calibration(&self) -> Result<(), UpdateError> {
        self.update("calibration reset", |c| {
            c.calibration.reset();
            Ok(())
        })
        .await
    }
}

// ===========================================================================
// Tests
// ===========================================================================
