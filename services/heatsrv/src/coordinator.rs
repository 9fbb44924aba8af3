//! Polling coordinator
//!
//! Drives one poll cycle per interval over the item registry, keeps the
//! per-point state table and publishes each cycle's snapshot through a
//! `watch` channel.
//!
//! ```text
//!   tick ──► connection check ──► read items in registry order ──► publish
//!               │ (connect(false))        │ (cycle timeout)            │
//!               └── fail: empty ──────────┴── timeout: empty ──────────┘
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use heatlink_modbus::{
    ConnectionManager, ItemRegistry, ModbusError, ModbusItem, PointState, Reading,
    RegisterObject,
};
use tokio::sync::{watch, RwLock};
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{CircuitConfig, ServiceConfig};
use crate::error::{Result, ServiceError};

/// Identifier → decoded value of the points attempted in one cycle
pub type Snapshot = BTreeMap<String, Option<i32>>;

pub struct Coordinator {
    manager: Arc<ConnectionManager>,
    registry: Arc<ItemRegistry>,
    circuits: CircuitConfig,
    interval: Duration,
    cycle_timeout: Duration,
    /// Indexed like the registry
    states: RwLock<Vec<PointState>>,
    snapshot_tx: watch::Sender<Arc<Snapshot>>,
}

impl Coordinator {
    pub fn new(
        manager: Arc<ConnectionManager>,
        registry: Arc<ItemRegistry>,
        circuits: CircuitConfig,
        interval: Duration,
        cycle_timeout: Duration,
    ) -> Self {
        let states = vec![PointState::default(); registry.len()];
        let (snapshot_tx, _) = watch::channel(Arc::new(Snapshot::new()));
        Self {
            manager,
            registry,
            circuits,
            interval,
            cycle_timeout,
            states: RwLock::new(states),
            snapshot_tx,
        }
    }

    pub fn from_config(config: &ServiceConfig, registry: Arc<ItemRegistry>) -> Self {
        let manager = Arc::new(ConnectionManager::new(config.device.connection_params()));
        Self::new(
            manager,
            registry,
            config.circuits,
            config.polling.interval(),
            config.polling.cycle_timeout(),
        )
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    pub fn registry(&self) -> &Arc<ItemRegistry> {
        &self.registry
    }

    /// Startup connect; the coordinator is unusable when this fails
    pub async fn setup(&self) -> Result<()> {
        if self.manager.handle().is_none() {
            return Err(ServiceError::init("No Modbus transport configured"));
        }
        if !self.manager.connect(true).await {
            return Err(ServiceError::init(format!(
                "Connect to {} failed",
                self.manager.target()
            )));
        }
        info!(
            "Coordinator ready: {} items @ {}",
            self.registry.len(),
            self.manager.target()
        );
        Ok(())
    }

    /// Read all enabled items, or the given registry indices, in order
    ///
    /// Points marked invalid are reported absent without a device read.
    pub async fn fetch_data(
        &self,
        indices: Option<&[usize]>,
    ) -> std::result::Result<Snapshot, ModbusError> {
        let transport = self.manager.handle().ok_or(ModbusError::NotConnected)?;
        if !transport.is_connected() && !self.manager.connect(false).await {
            return Err(ModbusError::NotConnected);
        }

        let all: Vec<usize>;
        let order = match indices {
            Some(indices) => indices,
            None => {
                all = (0..self.registry.len()).collect();
                &all
            },
        };

        let mut snapshot = Snapshot::new();
        for &index in order {
            let Some(item) = self.registry.get(index) else {
                debug!("No item at index {}", index);
                continue;
            };
            if !self.circuits.is_enabled(item.device) {
                continue;
            }

            let is_invalid = self
                .states
                .read()
                .await
                .get(index)
                .is_some_and(|state| state.is_invalid);
            if is_invalid {
                snapshot.insert(item.id.clone(), None);
                continue;
            }

            let reading = RegisterObject::new(&self.manager, item).read().await;
            if let Some(state) = self.states.write().await.get_mut(index) {
                state.apply(reading);
            }
            if reading == Reading::Unavailable && !transport.is_connected() {
                return Err(ModbusError::NotConnected);
            }
            snapshot.insert(item.id.clone(), reading.value());
        }
        Ok(snapshot)
    }

    /// One bounded cycle; publishes and returns the new snapshot
    ///
    /// Any failure or a timeout publishes an empty snapshot.
    pub async fn poll_cycle(&self) -> Arc<Snapshot> {
        let snapshot = match timeout(self.cycle_timeout, self.fetch_data(None)).await {
            Ok(Ok(snapshot)) => snapshot,
            Ok(Err(ModbusError::NotConnected)) => {
                debug!("Poll skipped: not connected");
                Snapshot::new()
            },
            Ok(Err(e)) => {
                warn!("Poll failed: {}", e);
                Snapshot::new()
            },
            Err(_) => {
                warn!("Poll timeout: {}ms", self.cycle_timeout.as_millis());
                // A late response would desync the next request
                self.manager.close().await;
                Snapshot::new()
            },
        };

        let snapshot = Arc::new(snapshot);
        self.snapshot_tx.send_replace(Arc::clone(&snapshot));
        snapshot
    }

    /// Poll every interval until `shutdown` fires, then close the connection
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("Polling every {}ms", self.interval.as_millis());

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    tokio::select! {
                        snapshot = self.poll_cycle() => {
                            debug!("Cycle: {} points", snapshot.len());
                        }
                        () = shutdown.cancelled() => break,
                    }
                }
                () = shutdown.cancelled() => break,
            }
        }

        self.manager.close().await;
        info!("Polling stopped");
    }

    /// Write a point, connecting first when needed
    ///
    /// On success the written value becomes the point's state.
    pub async fn write(&self, id: &str, value: i32) -> Result<()> {
        let (index, item) = self.lookup(id)?;
        if !item.kind.is_writable() {
            return Err(ServiceError::ReadOnly(id.to_string()));
        }
        self.ensure_connected().await?;

        RegisterObject::new(&self.manager, item).write(value).await?;
        if let Some(state) = self.states.write().await.get_mut(index) {
            state.apply(Reading::Value(value));
        }
        info!("Write {} = {}", id, value);
        Ok(())
    }

    /// On-demand read of a single point outside the poll cycle
    pub async fn read_point(&self, id: &str) -> Result<Option<i32>> {
        let (index, item) = self.lookup(id)?;
        self.ensure_connected().await?;

        let reading = RegisterObject::new(&self.manager, item).read().await;
        if let Some(state) = self.states.write().await.get_mut(index) {
            state.apply(reading);
        }
        Ok(reading.value())
    }

    /// Last known value of a point, without waiting for a cycle
    pub async fn get_value(&self, id: &str) -> Option<i32> {
        let index = self.registry.index_of(id)?;
        self.states.read().await.get(index).and_then(|s| s.value)
    }

    pub async fn state(&self, id: &str) -> Option<PointState> {
        let index = self.registry.index_of(id)?;
        self.states.read().await.get(index).copied()
    }

    /// Last known value of every point
    pub async fn values(&self) -> Snapshot {
        let states = self.states.read().await;
        self.registry
            .iter()
            .zip(states.iter())
            .map(|(item, state)| (item.id.clone(), state.value))
            .collect()
    }

    /// Latest published snapshot
    pub fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.snapshot_tx.borrow())
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<Snapshot>> {
        self.snapshot_tx.subscribe()
    }

    fn lookup(&self, id: &str) -> Result<(usize, &ModbusItem)> {
        self.registry
            .index_of(id)
            .and_then(|index| self.registry.get(index).map(|item| (index, item)))
            .ok_or_else(|| ServiceError::point_not_found(id))
    }

    async fn ensure_connected(&self) -> Result<()> {
        if self.manager.is_connected() || self.manager.connect(false).await {
            Ok(())
        } else {
            Err(ModbusError::NotConnected.into())
        }
    }
}
