//! Actuator gateway: the only path from intents to physical plugs.
//!
//! Plug state queries are cached per device for a short window so several
//! callers within one tick (or overlapping ticks) share a single network
//! round-trip. Each device has its own lock; a slow plug never blocks
//! another device's query.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

use crate::config::DeviceMap;
use crate::engine::{ActuatorIntent, Device};

/// A network power switch, addressed by a stable identifier.
#[async_trait]
pub trait PlugTransport: Send + Sync {
    async fn set_power(&self, address: &str, on: bool) -> anyhow::Result<()>;
    async fn get_power(&self, address: &str) -> anyhow::Result<bool>;
}

// ---------------------------------------------------------------------------
// Action log
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ActionOutcome {
    /// No command was issued.
    Skipped,
    Applied,
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionEntry {
    pub device: Device,
    pub desired_on: Option<bool>,
    pub reason: String,
    pub outcome: ActionOutcome,
}

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

#[derive(Default)]
struct CacheEntry {
    /// Address the entry was observed for; a remapped device starts cold.
    address: String,
    state: Option<bool>,
    observed_at: Option<Instant>,
}

pub struct ActuatorGateway {
    transport: Arc<dyn PlugTransport>,
    cache: HashMap<Device, Mutex<CacheEntry>>,
    cache_window: Duration,
    call_timeout: Duration,
}

impl ActuatorGateway {
    pub fn new(
        transport: Arc<dyn PlugTransport>,
        cache_window: Duration,
        call_timeout: Duration,
    ) -> Self {
        let cache = Device::ALL
            .into_iter()
            .map(|d| (d, Mutex::new(CacheEntry::default())))
            .collect();
        Self {
            transport,
            cache,
            cache_window,
            call_timeout,
        }
    }

    /// Current plug state, `None` when unknown.
    ///
    /// Served from cache when observed within the window. Otherwise one
    /// query is made while holding the device's entry; concurrent callers
    /// wait for it and reuse the result. A failed or timed-out query is
    /// cached as unknown for the same window.
    pub async fn get_power(&self, device: Device, address: &str) -> Option<bool> {
        let mut entry = self.cache.get(&device)?.lock().await;

        if entry.address == address {
            if let Some(at) = entry.observed_at {
                if at.elapsed() < self.cache_window {
                    return entry.state;
                }
            }
        }

        let state = match timeout(self.call_timeout, self.transport.get_power(address)).await {
            Ok(Ok(on)) => Some(on),
            Ok(Err(e)) => {
                warn!(device = %device, address, "plug query failed: {e:#}");
                None
            }
            Err(_) => {
                warn!(device = %device, address, "plug query timed out");
                None
            }
        };
        debug!(device = %device, address, ?state, "plug state refreshed");

        entry.address = address.to_string();
        entry.state = state;
        entry.observed_at = Some(Instant::now());
        state
    }

    /// Issue every intent that carries a command, concurrently.
    ///
    /// Returns one entry per intent in input order. Failures are recorded
    /// per device and never stop the others.
    pub async fn apply(&self, intents: &[ActuatorIntent], devices: &DeviceMap) -> Vec<ActionEntry> {
        let calls = intents.iter().map(|intent| async move {
            let outcome = match (intent.desired_on, devices.address(intent.device)) {
                (Some(on), Some(address)) => self.set_power(intent.device, address, on).await,
                _ => ActionOutcome::Skipped,
            };
            ActionEntry {
                device: intent.device,
                desired_on: intent.desired_on,
                reason: intent.reason.clone(),
                outcome,
            }
        });
        join_all(calls).await
    }

    async fn set_power(&self, device: Device, address: &str, on: bool) -> ActionOutcome {
        let state = if on { "ON" } else { "OFF" };
        match timeout(self.call_timeout, self.transport.set_power(address, on)).await {
            Ok(Ok(())) => {
                info!(device = %device, address, "plug set {state}");
                ActionOutcome::Applied
            }
            Ok(Err(e)) => {
                warn!(device = %device, address, "plug set {state} failed: {e:#}");
                ActionOutcome::Failed {
                    error: format!("{e:#}"),
                }
            }
            Err(_) => {
                warn!(device = %device, address, "plug set {state} timed out");
                ActionOutcome::Failed {
                    error: format!("timed out after {}ms", self.call_timeout.as_millis()),
                }
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
