//! Primary/backup connection controller.
//!
//! The manager is the single writer of the active connection. Readers call
//! [`ConnectionProvider::active_connection`], which never blocks: it returns whatever is
//! currently published (or `None`) and, when nothing is published, kicks off a
//! background connection attempt.
//!
//! A periodic health check pings the active connection. A failing primary is replaced by
//! the backup (when failover is enabled); while on the backup each tick also probes the
//! primary and switches back as soon as it answers.

use std::{
    fmt,
    sync::{
        Arc, Mutex, Weak,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use arc_swap::ArcSwapOption;
use metrics::{counter, gauge};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::{
    config::StoreSettings,
    scheduler::{TaskHandle, spawn_ticker},
    util::sync::mutex_lock,
};

use super::{ConnectionProvider, Connector, KvConnection, RedisConnector, StoreError};

const SOURCE: &str = "store::manager";

const DEFAULT_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_MAX_CONNECT_ATTEMPTS: u32 = 3;
const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(100);
const DEFAULT_BACKOFF_MAX: Duration = Duration::from_millis(3000);

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub failover_enabled: bool,
    pub health_check_interval: Duration,
    pub max_connect_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            failover_enabled: false,
            health_check_interval: DEFAULT_HEALTH_CHECK_INTERVAL,
            max_connect_attempts: DEFAULT_MAX_CONNECT_ATTEMPTS,
            backoff_base: DEFAULT_BACKOFF_BASE,
            backoff_max: DEFAULT_BACKOFF_MAX,
        }
    }
}

impl From<&StoreSettings> for ManagerConfig {
    fn from(settings: &StoreSettings) -> Self {
        Self {
            failover_enabled: settings.failover_enabled,
            health_check_interval: settings.health_check_interval,
            max_connect_attempts: settings.max_connect_attempts.get(),
            backoff_base: settings.backoff_base,
            backoff_max: settings.backoff_max,
        }
    }
}

impl ManagerConfig {
    /// Delay after the `attempt`-th failure: `min(base * 2^(attempt-1), max)`.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.backoff_base
            .saturating_mul(1_u32 << exponent)
            .min(self.backoff_max)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionRole {
    Primary,
    Backup,
}

impl ConnectionRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Backup => "backup",
        }
    }
}

impl fmt::Display for ConnectionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Ready,
    Error,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionPhase {
    Disconnected,
    Connecting,
    Ready,
    Switching,
    Error,
    Closed,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionState {
    pub role: ConnectionRole,
    pub status: ConnectionStatus,
    pub last_error: Option<String>,
}

/// Serializable snapshot of the manager, used by health endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStatus {
    pub configured: bool,
    pub ready: bool,
    pub phase: ConnectionPhase,
    pub active: Option<ConnectionRole>,
    pub failover_enabled: bool,
    pub permanently_unavailable: bool,
    pub primary: Option<ConnectionState>,
    pub backup: Option<ConnectionState>,
}

struct Slot {
    connector: Arc<dyn Connector>,
    connection: Option<Arc<dyn KvConnection>>,
    state: ConnectionState,
}

impl Slot {
    fn new(role: ConnectionRole, connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            connection: None,
            state: ConnectionState {
                role,
                status: ConnectionStatus::Disconnected,
                last_error: None,
            },
        }
    }
}

struct Inner {
    phase: ConnectionPhase,
    primary: Option<Slot>,
    backup: Option<Slot>,
}

impl Inner {
    fn slot_mut(&mut self, role: ConnectionRole) -> Option<&mut Slot> {
        match role {
            ConnectionRole::Primary => self.primary.as_mut(),
            ConnectionRole::Backup => self.backup.as_mut(),
        }
    }
}

struct ActiveConnection {
    role: ConnectionRole,
    connection: Arc<dyn KvConnection>,
}

/// Clears the in-progress flag when a connection attempt finishes.
struct ConnectAttempt<'a>(&'a AtomicBool);

impl<'a> ConnectAttempt<'a> {
    fn begin(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for ConnectAttempt<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct ConnectionManager {
    config: ManagerConfig,
    self_ref: Weak<ConnectionManager>,
    active: ArcSwapOption<ActiveConnection>,
    inner: Mutex<Inner>,
    connecting: AtomicBool,
    unavailable: AtomicBool,
    health_task: Mutex<Option<TaskHandle>>,
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("config", &self.config)
            .field("active", &self.active_role())
            .field("phase", &self.phase())
            .finish()
    }
}

impl ConnectionManager {
    pub fn new(
        config: ManagerConfig,
        primary: Option<Arc<dyn Connector>>,
        backup: Option<Arc<dyn Connector>>,
    ) -> Arc<Self> {
        let backup = match backup {
            Some(connector) if config.failover_enabled && primary.is_some() => Some(connector),
            Some(connector) => {
                info!(
                    backup = %connector.describe(),
                    "backup store configured without failover; ignoring it"
                );
                None
            }
            None => None,
        };

        if primary.is_none() {
            info!("no store configured; running without cache");
        }

        Arc::new_cyclic(|self_ref| Self {
            config,
            self_ref: self_ref.clone(),
            active: ArcSwapOption::empty(),
            inner: Mutex::new(Inner {
                phase: ConnectionPhase::Disconnected,
                primary: primary.map(|c| Slot::new(ConnectionRole::Primary, c)),
                backup: backup.map(|c| Slot::new(ConnectionRole::Backup, c)),
            }),
            connecting: AtomicBool::new(false),
            unavailable: AtomicBool::new(false),
            health_task: Mutex::new(None),
        })
    }

    /// Build Redis connectors from validated settings.
    pub fn from_settings(settings: &StoreSettings) -> Arc<Self> {
        let connector = |label: &'static str, url: &String| -> Arc<dyn Connector> {
            Arc::new(RedisConnector::new(
                label,
                url.clone(),
                settings.connect_timeout,
                settings.command_timeout,
            ))
        };
        Self::new(
            ManagerConfig::from(settings),
            settings.primary_url.as_ref().map(|url| connector("primary", url)),
            settings.backup_url.as_ref().map(|url| connector("backup", url)),
        )
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn is_configured(&self) -> bool {
        mutex_lock(&self.inner, SOURCE, "is_configured")
            .primary
            .is_some()
    }

    fn has_backup(&self) -> bool {
        mutex_lock(&self.inner, SOURCE, "has_backup").backup.is_some()
    }

    pub fn phase(&self) -> ConnectionPhase {
        mutex_lock(&self.inner, SOURCE, "phase").phase
    }

    pub fn active_role(&self) -> Option<ConnectionRole> {
        self.active.load().as_ref().map(|active| active.role)
    }

    pub fn is_permanently_unavailable(&self) -> bool {
        self.unavailable.load(Ordering::SeqCst)
    }

    /// Connect the primary, failing over to the backup when the primary cannot be reached.
    ///
    /// Exhausting every attempt marks the store permanently unavailable; from then on the
    /// manager stays out of the way and callers run without cache.
    pub async fn connect(&self) -> Result<ConnectionRole, StoreError> {
        if !self.is_configured() {
            return Err(StoreError::NotConfigured);
        }
        let Some(_attempt) = ConnectAttempt::begin(&self.connecting) else {
            return Err(StoreError::ConnectInProgress);
        };
        if self.phase() == ConnectionPhase::Closed {
            return Err(StoreError::Unavailable);
        }

        self.set_phase(ConnectionPhase::Connecting);
        let attempts = self.config.max_connect_attempts.max(1);

        let primary_error = match self.establish(ConnectionRole::Primary, attempts).await {
            Ok(connection) => {
                self.activate(ConnectionRole::Primary, connection);
                return Ok(ConnectionRole::Primary);
            }
            Err(err) => err,
        };

        if !self.has_backup() {
            self.mark_unavailable(&primary_error);
            return Err(primary_error);
        }

        warn!(error = %primary_error, "primary store unreachable; failing over to backup");
        match self.establish(ConnectionRole::Backup, attempts).await {
            Ok(connection) => {
                self.activate(ConnectionRole::Backup, connection);
                counter!("motorcache_store_failover_total", "to" => "backup").increment(1);
                Ok(ConnectionRole::Backup)
            }
            Err(err) => {
                self.mark_unavailable(&err);
                Err(err)
            }
        }
    }

    /// One health-check pass. Called by the ticker; exposed for tests and manual probes.
    pub async fn health_check_tick(&self) {
        let Some(active) = self.active.load_full() else {
            if self.is_configured()
                && !self.is_permanently_unavailable()
                && self.phase() != ConnectionPhase::Closed
                && let Err(err) = self.connect().await
            {
                debug!(error = %err, "health check could not establish a store connection");
            }
            return;
        };

        let result = active.connection.ping().await;
        match (active.role, result) {
            (ConnectionRole::Primary, Ok(())) => {
                self.update_slot(ConnectionRole::Primary, ConnectionStatus::Ready, None);
                if self.phase() == ConnectionPhase::Error {
                    self.set_phase(ConnectionPhase::Ready);
                }
            }
            (ConnectionRole::Primary, Err(err)) => {
                warn!(role = "primary", error = %err, "store health check failed");
                self.update_slot(
                    ConnectionRole::Primary,
                    ConnectionStatus::Error,
                    Some(err.to_string()),
                );
                if self.has_backup() {
                    self.fail_over().await;
                }
            }
            (ConnectionRole::Backup, result) => {
                if let Err(err) = result {
                    warn!(
                        role = "backup",
                        error = %err,
                        "backup store health check failed; already degraded"
                    );
                    self.update_slot(
                        ConnectionRole::Backup,
                        ConnectionStatus::Error,
                        Some(err.to_string()),
                    );
                }
                self.try_restore_primary().await;
            }
        }
    }

    /// Start the periodic health check. Replaces any previous loop.
    pub fn start_health_checks(&self) {
        if !self.is_configured() {
            return;
        }
        let weak = self.self_ref.clone();
        let handle = spawn_ticker(
            "store-health-check",
            self.config.health_check_interval,
            move || {
                let weak = weak.clone();
                async move {
                    if let Some(manager) = weak.upgrade() {
                        manager.health_check_tick().await;
                    }
                }
            },
        );
        *mutex_lock(&self.health_task, SOURCE, "start_health_checks") = Some(handle);
    }

    /// Stop health checks and close both connections. Terminal.
    pub async fn shutdown(&self) {
        let task = mutex_lock(&self.health_task, SOURCE, "shutdown").take();
        if let Some(task) = task {
            task.shutdown().await;
        }

        self.active.store(None);
        gauge!("motorcache_store_ready").set(0.0);

        let connections: Vec<Arc<dyn KvConnection>> = {
            let mut guard = mutex_lock(&self.inner, SOURCE, "shutdown");
            let inner = &mut *guard;
            inner.phase = ConnectionPhase::Closed;
            [inner.primary.as_mut(), inner.backup.as_mut()]
                .into_iter()
                .flatten()
                .filter_map(|slot| {
                    slot.state.status = ConnectionStatus::Closed;
                    slot.connection.take()
                })
                .collect()
        };

        for connection in connections {
            connection.close().await;
        }
        info!("store connections closed");
    }

    pub fn status(&self) -> StoreStatus {
        let inner = mutex_lock(&self.inner, SOURCE, "status");
        let active = self.active_role();
        StoreStatus {
            configured: inner.primary.is_some(),
            ready: active.is_some(),
            phase: inner.phase,
            active,
            failover_enabled: self.config.failover_enabled,
            permanently_unavailable: self.is_permanently_unavailable(),
            primary: inner.primary.as_ref().map(|slot| slot.state.clone()),
            backup: inner.backup.as_ref().map(|slot| slot.state.clone()),
        }
    }

    async fn establish(
        &self,
        role: ConnectionRole,
        attempts: u32,
    ) -> Result<Arc<dyn KvConnection>, StoreError> {
        let connector = {
            let mut inner = mutex_lock(&self.inner, SOURCE, "establish");
            match inner.slot_mut(role) {
                Some(slot) => Arc::clone(&slot.connector),
                None => return Err(StoreError::NotConfigured),
            }
        };

        let mut last_error = StoreError::Unavailable;
        for attempt in 1..=attempts {
            self.update_slot(role, ConnectionStatus::Connecting, None);
            match connector.connect().await {
                Ok(connection) => {
                    {
                        let mut inner = mutex_lock(&self.inner, SOURCE, "establish");
                        if let Some(slot) = inner.slot_mut(role) {
                            slot.connection = Some(Arc::clone(&connection));
                            slot.state.status = ConnectionStatus::Ready;
                            slot.state.last_error = None;
                        }
                    }
                    info!(%role, endpoint = %connector.describe(), attempt, "store connection ready");
                    return Ok(connection);
                }
                Err(err) => {
                    warn!(
                        %role,
                        attempt,
                        max_attempts = attempts,
                        error = %err,
                        "store connection attempt failed"
                    );
                    counter!("motorcache_store_connect_failure_total", "role" => role.as_str())
                        .increment(1);
                    self.update_slot(role, ConnectionStatus::Error, Some(err.to_string()));
                    last_error = err;
                    if attempt < attempts {
                        tokio::time::sleep(self.config.backoff_for(attempt)).await;
                    }
                }
            }
        }
        Err(last_error)
    }

    /// Reuse the role's existing connection when it answers a ping, else dial once.
    async fn probe(&self, role: ConnectionRole) -> Result<Arc<dyn KvConnection>, StoreError> {
        let existing = {
            let mut inner = mutex_lock(&self.inner, SOURCE, "probe");
            inner.slot_mut(role).and_then(|slot| slot.connection.clone())
        };
        match existing {
            Some(connection) => {
                connection.ping().await?;
                self.update_slot(role, ConnectionStatus::Ready, None);
                Ok(connection)
            }
            None => self.establish(role, 1).await,
        }
    }

    async fn fail_over(&self) {
        self.set_phase(ConnectionPhase::Switching);
        match self.probe(ConnectionRole::Backup).await {
            Ok(connection) => {
                self.activate(ConnectionRole::Backup, connection);
                counter!("motorcache_store_failover_total", "to" => "backup").increment(1);
                warn!("switched active store connection to backup");
            }
            Err(err) => {
                self.update_slot(
                    ConnectionRole::Backup,
                    ConnectionStatus::Error,
                    Some(err.to_string()),
                );
                self.set_phase(ConnectionPhase::Error);
                error!(error = %err, "failover to backup store failed; keeping primary");
            }
        }
    }

    async fn try_restore_primary(&self) {
        match self.probe(ConnectionRole::Primary).await {
            Ok(connection) => {
                self.set_phase(ConnectionPhase::Switching);
                self.activate(ConnectionRole::Primary, connection);
                counter!("motorcache_store_failover_total", "to" => "primary").increment(1);
                info!("primary store healthy again; switched back from backup");
            }
            Err(err) => {
                debug!(error = %err, "primary store still unavailable");
            }
        }
    }

    fn activate(&self, role: ConnectionRole, connection: Arc<dyn KvConnection>) {
        self.active
            .store(Some(Arc::new(ActiveConnection { role, connection })));
        self.unavailable.store(false, Ordering::SeqCst);
        self.set_phase(ConnectionPhase::Ready);
        gauge!("motorcache_store_ready").set(1.0);
    }

    fn mark_unavailable(&self, err: &StoreError) {
        self.unavailable.store(true, Ordering::SeqCst);
        self.set_phase(ConnectionPhase::Error);
        gauge!("motorcache_store_ready").set(0.0);
        error!(
            error = %err,
            max_attempts = self.config.max_connect_attempts,
            "store unavailable after exhausting connection attempts; running without cache"
        );
    }

    fn set_phase(&self, phase: ConnectionPhase) {
        mutex_lock(&self.inner, SOURCE, "set_phase").phase = phase;
    }

    fn update_slot(&self, role: ConnectionRole, status: ConnectionStatus, error: Option<String>) {
        let mut inner = mutex_lock(&self.inner, SOURCE, "update_slot");
        if let Some(slot) = inner.slot_mut(role) {
            slot.state.status = status;
            if error.is_some() || status == ConnectionStatus::Ready {
                slot.state.last_error = error;
            }
        }
    }

    fn spawn_lazy_connect(&self) {
        if !self.is_configured()
            || self.is_permanently_unavailable()
            || self.connecting.load(Ordering::SeqCst)
            || self.phase() == ConnectionPhase::Closed
        {
            return;
        }
        let Some(manager) = self.self_ref.upgrade() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        runtime.spawn(async move {
            if let Err(err) = manager.connect().await {
                debug!(error = %err, "lazy store connection attempt did not succeed");
            }
        });
    }
}

impl ConnectionProvider for ConnectionManager {
    fn active_connection(&self) -> Option<Arc<dyn KvConnection>> {
        if let Some(active) = self.active.load().as_ref() {
            return Some(Arc::clone(&active.connection));
        }
        self.spawn_lazy_connect();
        None
    }

    fn is_ready(&self) -> bool {
        self.active.load().is_some()
    }
}
