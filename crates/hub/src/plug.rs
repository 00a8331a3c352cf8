//! Plug transports. `MqttPlugs` drives Tasmota-style smart plugs through the
//! broker; `MockPlugs` keeps state in memory for development and tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use rumqttc::{AsyncClient, QoS};
use tokio::sync::watch;
use tracing::info;

use crate::gateway::PlugTransport;
use crate::mqtt::command_topic;

// ---------------------------------------------------------------------------
// MQTT plugs (production)
// ---------------------------------------------------------------------------

/// Publishes `ON`/`OFF` to `cmnd/<id>/POWER` and waits for the plug to echo
/// its state on `stat/<id>/POWER`. An empty command payload asks the plug to
/// report without switching.
pub struct MqttPlugs {
    client: AsyncClient,
    /// Latest reported state per plug id, fed by the MQTT event loop.
    states: Mutex<HashMap<String, watch::Sender<Option<bool>>>>,
}

impl MqttPlugs {
    pub fn new(client: AsyncClient) -> Self {
        Self {
            client,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Record a state report from `stat/<id>/POWER`.
    pub fn observe(&self, id: &str, on: bool) {
        let mut states = self.states.lock().unwrap_or_else(|e| e.into_inner());
        states
            .entry(id.to_string())
            .or_insert_with(|| watch::channel(None).0)
            .send_replace(Some(on));
    }

    fn subscribe(&self, id: &str) -> watch::Receiver<Option<bool>> {
        let mut states = self.states.lock().unwrap_or_else(|e| e.into_inner());
        // A fresh receiver has the current value marked seen.
        states
            .entry(id.to_string())
            .or_insert_with(|| watch::channel(None).0)
            .subscribe()
    }

    /// Publish a command and wait for the next report. The caller bounds the
    /// wait with a timeout.
    async fn command(&self, id: &str, payload: &'static [u8]) -> Result<bool> {
        let mut rx = self.subscribe(id);
        self.client
            .publish(command_topic(id), QoS::AtLeastOnce, false, payload)
            .await
            .with_context(|| format!("failed to publish command for plug '{id}'"))?;
        loop {
            if rx.changed().await.is_err() {
                bail!("state channel for plug '{id}' closed");
            }
            if let Some(on) = *rx.borrow_and_update() {
                return Ok(on);
            }
        }
    }
}

#[async_trait]
impl PlugTransport for MqttPlugs {
    async fn set_power(&self, address: &str, on: bool) -> Result<()> {
        let payload: &'static [u8] = if on { b"ON" } else { b"OFF" };
        let reported = self.command(address, payload).await?;
        if reported != on {
            bail!(
                "plug '{address}' reported {} after {} command",
                if reported { "ON" } else { "OFF" },
                if on { "ON" } else { "OFF" }
            );
        }
        Ok(())
    }

    async fn get_power(&self, address: &str) -> Result<bool> {
        self.command(address, b"").await
    }
}

// ---------------------------------------------------------------------------
// Mock plugs (development, no hardware)
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MockInner {
    states: HashMap<String, bool>,
    get_calls: HashMap<String, usize>,
    set_calls: HashMap<String, usize>,
    failing: HashSet<String>,
    hanging: HashSet<String>,
}

/// In-memory plugs. Every plug starts off; unknown addresses are created on
/// first use.
#[derive(Default)]
pub struct MockPlugs {
    inner: Mutex<MockInner>,
}

enum MockBehavior {
    Normal,
    Fail,
    Hang,
}

impl MockPlugs {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn behavior(inner: &MockInner, address: &str) -> MockBehavior {
        if inner.hanging.contains(address) {
            MockBehavior::Hang
        } else if inner.failing.contains(address) {
            MockBehavior::Fail
        } else {
            MockBehavior::Normal
        }
    }
}

// Inspection and fault injection for tests.
#[cfg(test)]
impl MockPlugs {
    pub fn state(&self, address: &str) -> Option<bool> {
        self.lock().states.get(address).copied()
    }

    pub fn set_state(&self, address: &str, on: bool) {
        self.lock().states.insert(address.to_string(), on);
    }

    /// Make every call to `address` fail as unreachable.
    pub fn set_failing(&self, address: &str, failing: bool) {
        let mut inner = self.lock();
        if failing {
            inner.failing.insert(address.to_string());
        } else {
            inner.failing.remove(address);
        }
    }

    /// Make every call to `address` never complete.
    pub fn set_hanging(&self, address: &str, hanging: bool) {
        let mut inner = self.lock();
        if hanging {
            inner.hanging.insert(address.to_string());
        } else {
            inner.hanging.remove(address);
        }
    }

    pub fn get_calls(&self, address: &str) -> usize {
        self.lock().get_calls.get(address).copied().unwrap_or(0)
    }

    pub fn set_calls(&self, address: &str) -> usize {
        self.lock().set_calls.get(address).copied().unwrap_or(0)
    }
}

#[async_trait]
impl PlugTransport for MockPlugs {
    async fn set_power(&self, address: &str, on: bool) -> Result<()> {
        let behavior = {
            let mut inner = self.lock();
            *inner.set_calls.entry(address.to_string()).or_default() += 1;
            let behavior = Self::behavior(&inner, address);
            if matches!(behavior, MockBehavior::Normal) {
                inner.states.insert(address.to_string(), on);
            }
            behavior
        };
        match behavior {
            MockBehavior::Normal => {
                info!(address, "[mock-plug] set {}", if on { "ON" } else { "OFF" });
                Ok(())
            }
            MockBehavior::Fail => bail!("plug '{address}' unreachable"),
            MockBehavior::Hang => std::future::pending().await,
        }
    }

    async fn get_power(&self, address: &str) -> Result<bool> {
        let (behavior, state) = {
            let mut inner = self.lock();
            *inner.get_calls.entry(address.to_string()).or_default() += 1;
            let state = *inner.states.entry(address.to_string()).or_insert(false);
            (Self::behavior(&inner, address), state)
        };
        match behavior {
            MockBehavior::Normal => Ok(state),
            MockBehavior::Fail => bail!("plug '{address}' unreachable"),
            MockBehavior::Hang => std::future::pending().await,
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
