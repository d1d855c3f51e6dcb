//! Owns every console session, keyed by instance name
//!
//! The map itself is only locked to find or create an instance's entry.
//! Each entry carries its own session lock, so a slow command on one server
//! never holds up commands to another. Commands run on a spawned task that
//! owns the session lock, which lets an exchange finish (or time out) even
//! when the caller stops waiting for it.

use crate::commands::AdminCommand;
use crate::config::{BusyPolicy, ConsoleConfig, Credential};
use crate::error::{ConsoleError, ExchangeFailure};
use crate::history::{CommandRecord, HistoryLedger};
use crate::session::{Connector, Session, TcpConnector};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

type Slot<S> = Arc<Mutex<Option<Session<S>>>>;

/// Per-instance state; entries are created on first use and never removed
struct Entry<S> {
    /// Mirrors whether the slot holds a usable session, readable without the lock
    connected: AtomicBool,
    session: Slot<S>,
}

impl<S> Entry<S> {
    fn new() -> Self {
        Self {
            connected: AtomicBool::new(false),
            session: Arc::new(Mutex::new(None)),
        }
    }
}

pub struct ConnectionRegistry<C: Connector = TcpConnector> {
    connector: C,
    config: ConsoleConfig,
    entries: RwLock<HashMap<String, Arc<Entry<C::Stream>>>>,
    history: Arc<HistoryLedger>,
}

impl ConnectionRegistry<TcpConnector> {
    pub fn new(config: ConsoleConfig) -> Self {
        Self::with_connector(TcpConnector, config)
    }
}

impl Default for ConnectionRegistry<TcpConnector> {
    fn default() -> Self {
        Self::new(ConsoleConfig::default())
    }
}

impl<C: Connector> ConnectionRegistry<C> {
    pub fn with_connector(connector: C, config: ConsoleConfig) -> Self {
        let history = Arc::new(HistoryLedger::new(config.history_capacity));
        Self {
            connector,
            config,
            entries: RwLock::new(HashMap::new()),
            history,
        }
    }

    pub fn config(&self) -> &ConsoleConfig {
        &self.config
    }

    /// Commands run through this registry, per instance
    pub fn history(&self) -> &HistoryLedger {
        &self.history
    }

    /// Opens a fresh session for `instance`, closing any existing one first.
    ///
    /// Waits for a command in flight on the old session to finish. On
    /// failure, or when the returned future is dropped before login
    /// completes, the instance is left without a session and the half-open
    /// socket is closed.
    pub async fn connect(
        &self,
        instance: &str,
        host: &str,
        port: u16,
        credential: Credential,
    ) -> Result<(), ConsoleError> {
        let entry = self.entry(instance).await;
        let mut slot = entry.session.lock().await;

        if let Some(mut previous) = slot.take() {
            entry.connected.store(false, Ordering::SeqCst);
            info!("[{}] replacing console session to {}", instance, previous.addr());
            previous.close().await;
        }

        match Session::open(&self.connector, instance, host, port, credential, &self.config).await
        {
            Ok(session) => {
                *slot = Some(session);
                entry.connected.store(true, Ordering::SeqCst);
                Ok(())
            }
            Err(err) => {
                warn!("[{}] connect failed: {}", instance, err);
                Err(err)
            }
        }
    }

    /// Runs a command on the instance's session and records the outcome.
    ///
    /// A failure that breaks the session closes its socket and leaves it
    /// registered, so later calls report `SessionBroken` until the caller
    /// reconnects. Losing the connection outright unregisters the session.
    pub async fn execute(&self, instance: &str, command: &str) -> Result<String, ConsoleError> {
        let entry = self
            .lookup(instance)
            .await
            .ok_or_else(|| ConsoleError::NotConnected {
                instance: instance.to_string(),
            })?;

        let slot = match self.config.busy_policy {
            BusyPolicy::Reject => Arc::clone(&entry.session)
                .try_lock_owned()
                .map_err(|_| {
                    debug!("[{}] rejecting '{}', session busy", instance, command);
                    ConsoleError::SessionBusy {
                        instance: instance.to_string(),
                    }
                })?,
            BusyPolicy::Queue => Arc::clone(&entry.session).lock_owned().await,
        };

        let exchange = run_exchange(
            slot,
            Arc::clone(&entry),
            Arc::clone(&self.history),
            instance.to_string(),
            command.to_string(),
            self.config.command_timeout,
        );

        match tokio::spawn(exchange).await {
            Ok(result) => result,
            Err(join_error) => Err(ConsoleError::Execution {
                instance: instance.to_string(),
                command: command.to_string(),
                source: ExchangeFailure::Aborted(join_error.to_string()),
            }),
        }
    }

    /// Runs one of the canned admin actions
    pub async fn run(&self, instance: &str, command: &AdminCommand) -> Result<String, ConsoleError> {
        self.execute(instance, &command.to_string()).await
    }

    /// Closes and unregisters the instance's session.
    ///
    /// Returns whether a session was closed. `false` means there was nothing
    /// to close, which is a successful no-op rather than an error.
    pub async fn disconnect(&self, instance: &str) -> bool {
        let entry = match self.lookup(instance).await {
            Some(entry) => entry,
            None => return false,
        };

        let mut slot = entry.session.lock().await;
        entry.connected.store(false, Ordering::SeqCst);
        match slot.take() {
            Some(mut session) => {
                session.close().await;
                info!("[{}] disconnected", instance);
                true
            }
            None => false,
        }
    }

    /// True while the instance holds an open, unbroken session
    pub async fn is_connected(&self, instance: &str) -> bool {
        self.entries
            .read()
            .await
            .get(instance)
            .map_or(false, |entry| entry.connected.load(Ordering::SeqCst))
    }

    pub async fn connected_instances(&self) -> Vec<String> {
        let entries = self.entries.read().await;
        let mut names: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| entry.connected.load(Ordering::SeqCst))
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Closes every session, waiting for commands in flight
    pub async fn shutdown(&self) {
        let entries: Vec<(String, Arc<Entry<C::Stream>>)> = self
            .entries
            .read()
            .await
            .iter()
            .map(|(name, entry)| (name.clone(), Arc::clone(entry)))
            .collect();

        for (name, entry) in entries {
            let mut slot = entry.session.lock().await;
            entry.connected.store(false, Ordering::SeqCst);
            if let Some(mut session) = slot.take() {
                session.close().await;
                debug!("[{}] closed during shutdown", name);
            }
        }
        info!("Console registry shut down");
    }

    async fn lookup(&self, instance: &str) -> Option<Arc<Entry<C::Stream>>> {
        self.entries.read().await.get(instance).cloned()
    }

    async fn entry(&self, instance: &str) -> Arc<Entry<C::Stream>> {
        if let Some(entry) = self.lookup(instance).await {
            return entry;
        }

        let mut entries = self.entries.write().await;
        Arc::clone(
            entries
                .entry(instance.to_string())
                .or_insert_with(|| Arc::new(Entry::new())),
        )
    }
}

/// One command against a locked session, plus the bookkeeping that follows it
async fn run_exchange<S>(
    mut slot: OwnedMutexGuard<Option<Session<S>>>,
    entry: Arc<Entry<S>>,
    history: Arc<HistoryLedger>,
    instance: String,
    command: String,
    limit: Duration,
) -> Result<String, ConsoleError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let result = match slot.as_mut() {
        Some(session) => session.execute(&command, limit).await,
        None => Err(ConsoleError::NotConnected {
            instance: instance.clone(),
        }),
    };

    match &result {
        Ok(response) => {
            info!("[{}] ran '{}'", instance, command);
            history
                .append(&instance, CommandRecord::success(&command, response))
                .await;
        }
        Err(err) => {
            if err.reached_server() {
                history
                    .append(&instance, CommandRecord::failure(&command, &err.to_string()))
                    .await;
            }

            if err.is_connection_fatal() {
                entry.connected.store(false, Ordering::SeqCst);
                if let Some(mut session) = slot.take() {
                    session.close().await;
                }
                info!("[{}] console session dropped: connection lost", instance);
            } else if err.breaks_session() {
                entry.connected.store(false, Ordering::SeqCst);
                if let Some(session) = slot.as_mut() {
                    session.close().await;
                }
                warn!("[{}] console session broken, reconnect required", instance);
            }
        }
    }

    result
}
